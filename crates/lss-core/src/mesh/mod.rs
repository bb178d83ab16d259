//! Coordinator-centric mesh networking, a reduced AODV.
//!
//! The mesh is a tree anchored at the coordinator (node 0). Every mesh
//! frame carries a 9-byte header in front of its payload; routing state is
//! a bounded table learned passively from traffic and actively from
//! periodic neighbour beacons. Route discovery (RREQ/RREP) codes are
//! reserved on the wire but the tree topology means beacons plus passive
//! learning are sufficient in practice.
//!
//! Per inbound frame the router decides one of three things:
//!
//! ```text
//! Received → length check → hop budget → record neighbour → classify
//!          → Deliver (payload up to the application)
//!          → Forward (caller re-transmits with hop+1, ttl-1, prevHop=self)
//!          → Drop
//! ```
//!
//! Beacons never reach the application layer; an RREQ addressed to this
//! node does.

pub mod header;
pub mod router;

pub use header::{MeshHeader, MeshPacketType, MESH_HEADER_SIZE};
pub use router::{
    MeshDecision, MeshRouter, RouteEntry, BEACON_INTERVAL_MS, MAX_HOPS, MAX_ROUTES,
    ROUTE_TIMEOUT_MS,
};
