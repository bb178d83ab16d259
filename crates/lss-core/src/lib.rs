//! # LSS Core
//!
//! Protocol core for an LSS (LoRa Sensor System) deployment: a star/mesh
//! network of battery-powered sensor nodes reporting to a single
//! coordinator over raw LoRa frames.
//!
//! Both endpoints live here and share one codec, which is the point - the
//! wire format, CRC discipline, sequence-number semantics and routing
//! rules must agree bit-exactly or the network fails silently:
//!
//! - **wire**: the four frame families (legacy telemetry, multi-sensor
//!   telemetry, command, acknowledgement), CRC-16/CCITT-FALSE, frame
//!   classification
//! - **mesh**: reduced-AODV routing - bounded route table with timeout,
//!   neighbour beacons, deliver/forward/drop decisions
//! - **node**: client firmware logic - persistent configuration, command
//!   application, sensor interface, the cooperative runtime loop
//! - **station**: coordinator logic - outbound command queue with retry
//!   and ACK correlation, node registry, receive/transmit threads
//! - **link**: the radio and clock seams everything is generic over;
//!   hardware drivers plug in from outside, tests plug in fakes
//!
//! ## Wire example
//!
//! ```rust
//! use lss_core::wire::{MultiSensorPacket, SensorValue, ValueKind};
//!
//! let pkt = MultiSensorPacket {
//!     network_id: 1,
//!     sensor_id: 5,
//!     battery_percent: 85,
//!     power_state: 0,
//!     last_command_seq: 0,
//!     ack_status: 0,
//!     location: "Shed".to_string(),
//!     zone: "Outdoor".to_string(),
//!     values: vec![SensorValue::new(ValueKind::Temperature, 19.5)],
//! };
//!
//! let bytes = pkt.to_bytes().unwrap();
//! let parsed = MultiSensorPacket::from_bytes(&bytes).unwrap();
//! assert_eq!(parsed, pkt);
//! ```

pub mod link;
pub mod mesh;
pub mod node;
pub mod station;
pub mod wire;

// Re-export main types
pub use link::{
    ChannelLink, FakeClock, LinkError, LoopbackLink, LoopbackMedium, MonotonicClock, RadioLink,
    SystemClock, MAX_RADIO_PAYLOAD,
};
pub use mesh::{MeshDecision, MeshHeader, MeshPacketType, MeshRouter};
pub use node::{NodeConfig, NodeRuntime, Sensor};
pub use station::{CommandQueue, CommandStatus, NodeRegistry, StationConfig, StationManager};
pub use wire::{
    crc16, detect_frame, AckPacket, CommandKind, CommandPacket, FrameKind, MultiSensorPacket,
    SensorValue, ValueKind, WireError,
};
