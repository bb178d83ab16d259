//! Mesh router: framing, forwarding decisions, neighbour discovery.
//!
//! Time is supplied by the caller as a `u32` millisecond tick so the router
//! stays deterministic under test and free of clock ownership. All elapsed
//! computations use wrapping subtraction; the ~49-day counter wraparound is
//! therefore harmless.

use super::header::{MeshHeader, MeshPacketType, MESH_HEADER_SIZE};
use crate::wire::NODE_ID_BROADCAST;
use tracing::{debug, trace};

/// Routing table capacity.
pub const MAX_ROUTES: usize = 20;
/// Frames whose hop count has reached this are dropped.
pub const MAX_HOPS: u8 = 5;
/// Route entries older than this are evicted (10 minutes).
pub const ROUTE_TIMEOUT_MS: u32 = 600_000;
/// Neighbour beacons are produced at most this often (30 seconds).
pub const BEACON_INTERVAL_MS: u32 = 30_000;

/// One routing table slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteEntry {
    pub dest: u8,
    pub next_hop: u8,
    pub hop_count: u8,
    /// Millisecond tick of the last refresh.
    pub last_updated: u32,
    pub valid: bool,
}

/// What to do with a received mesh frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshDecision<'a> {
    /// The payload is for this node; hand it to the upper layer.
    Deliver(&'a [u8]),
    /// Not for this node; re-transmit via [`MeshRouter::prepare_forward`].
    Forward,
    /// Consumed or invalid; nothing further to do.
    Drop,
}

/// Per-node mesh routing state.
///
/// Not thread-safe; meant to be driven from a single runtime loop.
#[derive(Debug)]
pub struct MeshRouter {
    node_id: u8,
    enabled: bool,
    routes: [RouteEntry; MAX_ROUTES],
    seq: u16,
    last_beacon: u32,
}

impl MeshRouter {
    /// Create a router for `node_id`.
    pub fn new(node_id: u8, enabled: bool) -> Self {
        Self {
            node_id,
            enabled,
            routes: [RouteEntry::default(); MAX_ROUTES],
            seq: 0,
            last_beacon: 0,
        }
    }

    /// Whether this node participates in mesh forwarding.
    ///
    /// The flag is advisory: `wrap` and `receive` never consult it, the
    /// caller decides. It exists so `CMD_SET_MESH_CONFIG` has one handle to
    /// flip.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable mesh participation.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Process an inbound raw mesh frame.
    ///
    /// Refreshes routing state as a side effect and classifies the frame.
    /// Frames shorter than the mesh header and frames over the hop budget
    /// are dropped. Beacons record a one-hop route and never deliver.
    pub fn receive<'a>(&mut self, raw: &'a [u8], now_ms: u32) -> MeshDecision<'a> {
        let hdr = match MeshHeader::from_bytes(raw) {
            Some(hdr) => hdr,
            None => return MeshDecision::Drop,
        };

        if hdr.hop_count >= MAX_HOPS {
            debug!(source = hdr.source, hops = hdr.hop_count, "hop budget exceeded");
            return MeshDecision::Drop;
        }

        // The transmitting neighbour is a usable next hop toward the source
        if hdr.prev_hop != 0 && hdr.prev_hop != NODE_ID_BROADCAST {
            self.update_route(hdr.source, hdr.prev_hop, hdr.hop_count, now_ms);
        }

        let payload = &raw[MESH_HEADER_SIZE..];
        match hdr.packet_type {
            MeshPacketType::Beacon => {
                self.update_route(hdr.source, hdr.source, 1, now_ms);
                trace!(source = hdr.source, "neighbour beacon");
                MeshDecision::Drop
            }
            MeshPacketType::RouteRequest => {
                if hdr.dest == self.node_id {
                    MeshDecision::Deliver(payload)
                } else {
                    // Flood onward; the caller re-transmits
                    MeshDecision::Forward
                }
            }
            _ => {
                if hdr.dest == self.node_id || hdr.dest == NODE_ID_BROADCAST {
                    MeshDecision::Deliver(payload)
                } else {
                    MeshDecision::Forward
                }
            }
        }
    }

    /// Wrap a payload in a mesh DATA frame addressed to `dest`.
    ///
    /// The next hop comes from the routing table, falling back to broadcast
    /// when no route is known. Does not consult the enabled flag.
    pub fn wrap(&mut self, dest: u8, payload: &[u8]) -> Vec<u8> {
        let hdr = MeshHeader {
            packet_type: MeshPacketType::Data,
            source: self.node_id,
            dest,
            next_hop: if dest == NODE_ID_BROADCAST {
                NODE_ID_BROADCAST
            } else {
                self.next_hop_for(dest)
            },
            prev_hop: self.node_id,
            hop_count: 0,
            ttl: MAX_HOPS,
            sequence: self.next_seq(),
        };

        let mut frame = Vec::with_capacity(MESH_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&hdr.to_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    /// Rewrite a received frame for re-transmission.
    ///
    /// Increments the hop count, decrements the TTL and stamps this node as
    /// the previous hop. Returns `None` when the frame is unparseable or
    /// its TTL is spent.
    pub fn prepare_forward(&self, raw: &[u8]) -> Option<Vec<u8>> {
        let mut hdr = MeshHeader::from_bytes(raw)?;
        if hdr.ttl <= 1 {
            return None;
        }
        hdr.hop_count += 1;
        hdr.ttl -= 1;
        hdr.prev_hop = self.node_id;
        hdr.next_hop = if hdr.dest == NODE_ID_BROADCAST {
            NODE_ID_BROADCAST
        } else {
            self.next_hop_for(hdr.dest)
        };

        let mut frame = Vec::with_capacity(raw.len());
        frame.extend_from_slice(&hdr.to_bytes());
        frame.extend_from_slice(&raw[MESH_HEADER_SIZE..]);
        Some(frame)
    }

    /// Periodic housekeeping: evict stale routes, emit a beacon when due.
    ///
    /// Produces at most one beacon per [`BEACON_INTERVAL_MS`]; returns
    /// `None` otherwise. Beacons are single-hop (TTL 1) broadcasts.
    pub fn tick(&mut self, now_ms: u32) -> Option<[u8; MESH_HEADER_SIZE]> {
        self.evict_stale_routes(now_ms);

        if now_ms.wrapping_sub(self.last_beacon) < BEACON_INTERVAL_MS {
            return None;
        }
        self.last_beacon = now_ms;

        let hdr = MeshHeader {
            packet_type: MeshPacketType::Beacon,
            source: self.node_id,
            dest: NODE_ID_BROADCAST,
            next_hop: NODE_ID_BROADCAST,
            prev_hop: self.node_id,
            hop_count: 0,
            ttl: 1,
            sequence: self.next_seq(),
        };
        Some(hdr.to_bytes())
    }

    /// Insert or refresh the route to `dest`.
    ///
    /// Refresh is last-writer-wins: a newer update replaces the stored next
    /// hop even at a worse hop count. A full table evicts the entry with
    /// the oldest timestamp.
    pub fn update_route(&mut self, dest: u8, next_hop: u8, hop_count: u8, now_ms: u32) {
        let idx = self
            .find_route(dest)
            .unwrap_or_else(|| self.alloc_slot(now_ms));

        self.routes[idx] = RouteEntry {
            dest,
            next_hop,
            hop_count,
            last_updated: now_ms,
            valid: true,
        };
    }

    /// Next hop toward `dest`, or 255 (broadcast fallback) with no route.
    pub fn next_hop_for(&self, dest: u8) -> u8 {
        match self.find_route(dest) {
            Some(idx) => self.routes[idx].next_hop,
            None => NODE_ID_BROADCAST,
        }
    }

    /// Invalidate entries not refreshed within [`ROUTE_TIMEOUT_MS`].
    pub fn evict_stale_routes(&mut self, now_ms: u32) {
        for route in self.routes.iter_mut() {
            if route.valid && now_ms.wrapping_sub(route.last_updated) > ROUTE_TIMEOUT_MS {
                debug!(dest = route.dest, "route expired");
                route.valid = false;
            }
        }
    }

    /// Snapshot of the currently valid routes.
    pub fn routes(&self) -> impl Iterator<Item = &RouteEntry> {
        self.routes.iter().filter(|r| r.valid)
    }

    fn find_route(&self, dest: u8) -> Option<usize> {
        self.routes
            .iter()
            .position(|r| r.valid && r.dest == dest)
    }

    /// An empty slot, or the slot with the oldest timestamp when full.
    fn alloc_slot(&self, now_ms: u32) -> usize {
        if let Some(idx) = self.routes.iter().position(|r| !r.valid) {
            return idx;
        }
        self.routes
            .iter()
            .enumerate()
            .max_by_key(|(_, r)| now_ms.wrapping_sub(r.last_updated))
            .map(|(idx, _)| idx)
            .unwrap_or(0)
    }

    fn next_seq(&mut self) -> u16 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_frame(source: u8, dest: u8, hop_count: u8, ttl: u8, payload: &[u8]) -> Vec<u8> {
        let hdr = MeshHeader {
            packet_type: MeshPacketType::Data,
            source,
            dest,
            next_hop: dest,
            prev_hop: source,
            hop_count,
            ttl,
            sequence: 1,
        };
        let mut frame = hdr.to_bytes().to_vec();
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn test_deliver_to_self() {
        let mut router = MeshRouter::new(5, true);
        let frame = data_frame(1, 5, 0, 5, b"hello");
        assert_eq!(router.receive(&frame, 0), MeshDecision::Deliver(b"hello"));
    }

    #[test]
    fn test_forward_other_dest() {
        let mut router = MeshRouter::new(5, true);
        let frame = data_frame(1, 3, 0, 5, b"hello");
        assert_eq!(router.receive(&frame, 0), MeshDecision::Forward);
    }

    #[test]
    fn test_drop_hop_budget() {
        let mut router = MeshRouter::new(5, true);
        let frame = data_frame(1, 5, MAX_HOPS, 1, b"hello");
        assert_eq!(router.receive(&frame, 0), MeshDecision::Drop);
    }

    #[test]
    fn test_deliver_broadcast() {
        let mut router = MeshRouter::new(5, true);
        let frame = data_frame(1, 255, 0, 5, b"hello");
        assert_eq!(router.receive(&frame, 0), MeshDecision::Deliver(b"hello"));
    }

    #[test]
    fn test_short_frame_dropped() {
        let mut router = MeshRouter::new(5, true);
        assert_eq!(router.receive(&[0, 1, 2], 0), MeshDecision::Drop);
    }

    #[test]
    fn test_beacon_learns_neighbour() {
        let mut router = MeshRouter::new(5, true);
        let beacon = MeshHeader {
            packet_type: MeshPacketType::Beacon,
            source: 2,
            dest: 255,
            next_hop: 255,
            prev_hop: 2,
            hop_count: 0,
            ttl: 1,
            sequence: 0,
        };
        let beacon_bytes = beacon.to_bytes();
        let decision = router.receive(&beacon_bytes, 1000);
        assert_eq!(decision, MeshDecision::Drop);
        assert_eq!(router.next_hop_for(2), 2);
    }

    #[test]
    fn test_receive_records_prev_hop_route() {
        let mut router = MeshRouter::new(0, true);
        // Frame from node 7 relayed by node 3
        let hdr = MeshHeader {
            packet_type: MeshPacketType::Data,
            source: 7,
            dest: 0,
            next_hop: 0,
            prev_hop: 3,
            hop_count: 1,
            ttl: 4,
            sequence: 9,
        };
        router.receive(&hdr.to_bytes(), 0);
        assert_eq!(router.next_hop_for(7), 3);
    }

    #[test]
    fn test_route_request_for_self_delivers() {
        let mut router = MeshRouter::new(5, true);
        let hdr = MeshHeader {
            packet_type: MeshPacketType::RouteRequest,
            source: 1,
            dest: 5,
            next_hop: 255,
            prev_hop: 1,
            hop_count: 0,
            ttl: 5,
            sequence: 0,
        };
        let mut frame = hdr.to_bytes().to_vec();
        frame.extend_from_slice(b"rr");
        assert_eq!(router.receive(&frame, 0), MeshDecision::Deliver(b"rr"));

        let mut other = frame.clone();
        other[2] = 9; // dest
        assert_eq!(router.receive(&other, 0), MeshDecision::Forward);
    }

    #[test]
    fn test_wrap_sets_header() {
        let mut router = MeshRouter::new(5, true);
        router.update_route(0, 2, 2, 0);

        let frame = router.wrap(0, b"payload");
        let hdr = MeshHeader::from_bytes(&frame).unwrap();
        assert_eq!(hdr.packet_type, MeshPacketType::Data);
        assert_eq!(hdr.source, 5);
        assert_eq!(hdr.dest, 0);
        assert_eq!(hdr.next_hop, 2);
        assert_eq!(hdr.prev_hop, 5);
        assert_eq!(hdr.hop_count, 0);
        assert_eq!(hdr.ttl, MAX_HOPS);
        assert_eq!(&frame[MESH_HEADER_SIZE..], b"payload");
    }

    #[test]
    fn test_wrap_broadcast_next_hop() {
        let mut router = MeshRouter::new(5, true);
        let frame = router.wrap(255, b"x");
        let hdr = MeshHeader::from_bytes(&frame).unwrap();
        assert_eq!(hdr.next_hop, 255);
    }

    #[test]
    fn test_wrap_sequence_increments() {
        let mut router = MeshRouter::new(5, true);
        let a = MeshHeader::from_bytes(&router.wrap(0, b"")).unwrap();
        let b = MeshHeader::from_bytes(&router.wrap(0, b"")).unwrap();
        assert_eq!(b.sequence, a.sequence.wrapping_add(1));
    }

    #[test]
    fn test_prepare_forward() {
        let router = MeshRouter::new(5, true);
        let frame = data_frame(1, 3, 1, 4, b"hop");
        let fwd = router.prepare_forward(&frame).unwrap();
        let hdr = MeshHeader::from_bytes(&fwd).unwrap();
        assert_eq!(hdr.hop_count, 2);
        assert_eq!(hdr.ttl, 3);
        assert_eq!(hdr.prev_hop, 5);
        assert_eq!(&fwd[MESH_HEADER_SIZE..], b"hop");
    }

    #[test]
    fn test_prepare_forward_spent_ttl() {
        let router = MeshRouter::new(5, true);
        let frame = data_frame(1, 3, 4, 1, b"hop");
        assert!(router.prepare_forward(&frame).is_none());
    }

    #[test]
    fn test_last_writer_wins_refresh() {
        let mut router = MeshRouter::new(0, true);
        router.update_route(7, 3, 1, 0);
        router.update_route(7, 4, 3, 10);
        // Newer update wins even with a worse hop count
        assert_eq!(router.next_hop_for(7), 4);
    }

    #[test]
    fn test_no_route_broadcast_fallback() {
        let router = MeshRouter::new(0, true);
        assert_eq!(router.next_hop_for(42), 255);
    }

    #[test]
    fn test_eviction_after_timeout() {
        let mut router = MeshRouter::new(0, true);
        router.update_route(7, 3, 1, 1000);
        router.evict_stale_routes(1000 + ROUTE_TIMEOUT_MS + 1);
        assert_eq!(router.next_hop_for(7), 255);
    }

    #[test]
    fn test_entry_survives_within_timeout() {
        let mut router = MeshRouter::new(0, true);
        router.update_route(7, 3, 1, 1000);
        router.evict_stale_routes(1000 + ROUTE_TIMEOUT_MS);
        assert_eq!(router.next_hop_for(7), 3);
    }

    #[test]
    fn test_full_table_evicts_oldest() {
        let mut router = MeshRouter::new(0, true);
        for i in 0..MAX_ROUTES as u8 {
            router.update_route(10 + i, 1, 1, 1000 + i as u32);
        }
        // Table full; next insert evicts dest 10 (oldest)
        router.update_route(200, 2, 1, 5000);
        assert_eq!(router.next_hop_for(200), 2);
        assert_eq!(router.next_hop_for(10), 255);
        assert_eq!(router.next_hop_for(11), 1);
    }

    #[test]
    fn test_beacon_rate_limit() {
        let mut router = MeshRouter::new(5, true);
        let first = router.tick(BEACON_INTERVAL_MS);
        assert!(first.is_some());
        let hdr = MeshHeader::from_bytes(&first.unwrap()).unwrap();
        assert_eq!(hdr.packet_type, MeshPacketType::Beacon);
        assert_eq!(hdr.dest, 255);
        assert_eq!(hdr.ttl, 1);
        assert_eq!(hdr.hop_count, 0);

        // Within the interval: nothing
        assert!(router.tick(BEACON_INTERVAL_MS + 1).is_none());
        assert!(router.tick(2 * BEACON_INTERVAL_MS - 1).is_none());
        // Due again
        assert!(router.tick(2 * BEACON_INTERVAL_MS).is_some());
    }

    #[test]
    fn test_tick_evicts_stale_routes() {
        let mut router = MeshRouter::new(5, true);
        router.update_route(7, 3, 1, 0);
        router.tick(ROUTE_TIMEOUT_MS + 1);
        assert_eq!(router.next_hop_for(7), 255);
    }
}
