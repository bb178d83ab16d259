//! Mesh frame header.
//!
//! Prepended to every mesh frame. All single-byte fields; the sequence
//! number is a little-endian u16.
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0x00    1     packet type
//! 0x01    1     source id
//! 0x02    1     destination id (255 = broadcast)
//! 0x03    1     next hop
//! 0x04    1     previous hop
//! 0x05    1     hop count
//! 0x06    1     TTL (hops remaining)
//! 0x07    2     sequence number
//! ```

use serde::{Deserialize, Serialize};

/// Serialised mesh header size.
pub const MESH_HEADER_SIZE: usize = 9;

/// Mesh frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MeshPacketType {
    /// User data payload.
    Data = 0,
    /// Route request - flooded to discover a route.
    RouteRequest = 1,
    /// Route reply - unicast back along the found route.
    RouteReply = 2,
    /// Broken-link notification to upstream nodes.
    RouteError = 3,
    /// Periodic single-hop neighbour discovery broadcast.
    Beacon = 4,
}

impl MeshPacketType {
    /// Decode a wire byte; `None` for unknown types.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(MeshPacketType::Data),
            1 => Some(MeshPacketType::RouteRequest),
            2 => Some(MeshPacketType::RouteReply),
            3 => Some(MeshPacketType::RouteError),
            4 => Some(MeshPacketType::Beacon),
            _ => None,
        }
    }
}

/// Parsed mesh header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshHeader {
    pub packet_type: MeshPacketType,
    pub source: u8,
    /// 255 = broadcast.
    pub dest: u8,
    pub next_hop: u8,
    pub prev_hop: u8,
    pub hop_count: u8,
    /// Hops this frame may still travel.
    pub ttl: u8,
    pub sequence: u16,
}

impl MeshHeader {
    /// Serialise to wire bytes.
    pub fn to_bytes(&self) -> [u8; MESH_HEADER_SIZE] {
        let seq = self.sequence.to_le_bytes();
        [
            self.packet_type as u8,
            self.source,
            self.dest,
            self.next_hop,
            self.prev_hop,
            self.hop_count,
            self.ttl,
            seq[0],
            seq[1],
        ]
    }

    /// Parse a header from the front of `buf`.
    ///
    /// Returns `None` if the buffer is short or the type byte is unknown;
    /// the latter also lets callers cheaply distinguish mesh frames from
    /// bare LSS frames, whose sync bytes never form a valid type.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < MESH_HEADER_SIZE {
            return None;
        }
        Some(Self {
            packet_type: MeshPacketType::from_byte(buf[0])?,
            source: buf[1],
            dest: buf[2],
            next_hop: buf[3],
            prev_hop: buf[4],
            hop_count: buf[5],
            ttl: buf[6],
            sequence: u16::from_le_bytes([buf[7], buf[8]]),
        })
    }
}
