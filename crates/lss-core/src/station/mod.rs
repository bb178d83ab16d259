//! Base station: command reliability layer, node registry, frame dispatch.
//!
//! The coordinator (node 0) receives everything the fleet transmits and is
//! the only producer of commands. Delivery is best-effort with bounded
//! retries; acknowledgements, standalone or piggybacked on telemetry,
//! complete queued commands. The surrounding deployment (dashboard, MQTT,
//! alert delivery, durable history) consumes these structures from outside
//! this crate.

pub mod alerts;
pub mod config;
pub mod manager;
pub mod queue;
pub mod registry;

pub use alerts::{AlertThresholds, ThresholdAlert};
pub use config::{ConfigError, LoraConfig, StationConfig};
pub use manager::{StationManager, TIME_SYNC_INTERVAL_SECS};
pub use queue::{
    CommandHandle, CommandQueue, CommandStatus, DueCommand, PendingSummary, COMMAND_RETRY_COUNT,
    COMMAND_RETRY_TIMEOUT_SECS,
};
pub use registry::{
    HistoryPoint, NodeRegistry, NodeState, MAX_HISTORY_POINTS, MAX_NODES,
    NODE_OFFLINE_TIMEOUT_SECS,
};
