//! Client node: configuration, sensors, command handling, runtime loop.

pub mod commands;
pub mod config;
pub mod runtime;
pub mod sensors;

pub use commands::{apply_command, CommandOutcome, NodeAction};
pub use config::{
    JsonKvStore, KvStore, MemoryKvStore, NodeConfig, NodeConfigStore, StoreError, NODE_NAMESPACE,
};
pub use runtime::{NodeError, NodeRuntime, RadioParams};
pub use sensors::{Sensor, SimulatedSensor};
