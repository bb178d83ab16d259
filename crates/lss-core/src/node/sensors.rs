//! Sensor driver interface.
//!
//! A sensor may expose multiple values (a combined sensor yields
//! temperature and humidity, for example). Concrete hardware drivers live
//! in firmware crates; this crate defines the contract they satisfy plus a
//! simulated implementation for host tests and the CLI simulator.

use crate::wire::{SensorValue, ValueKind};

/// A sensor that can be read and emit typed measurements.
pub trait Sensor {
    /// Initialise the hardware. Called once at startup; returns `false`
    /// when the sensor is absent or fails self-test.
    fn begin(&mut self) -> bool;

    /// Trigger a new measurement and cache the result.
    ///
    /// Returns `false` on failure (hardware error, timeout). Cached values
    /// MUST remain unchanged on failure.
    fn read(&mut self) -> bool;

    /// Append up to `max` of the most recently cached values to `out`.
    ///
    /// Returns the number of entries appended.
    fn values(&self, out: &mut Vec<SensorValue>, max: usize) -> usize;

    /// Human-readable name, e.g. `"DHT22"`.
    fn name(&self) -> &'static str;

    /// True once `begin` has succeeded.
    fn is_ready(&self) -> bool;
}

/// Deterministic fake sensor.
///
/// Emits a fixed set of readings, optionally drifting each value by a
/// small step per read so histories are non-flat. Can be told to fail
/// reads to exercise the cached-value contract.
#[derive(Debug)]
pub struct SimulatedSensor {
    name: &'static str,
    readings: Vec<SensorValue>,
    drift: f32,
    fail_reads: bool,
    ready: bool,
}

impl SimulatedSensor {
    pub fn new(name: &'static str, readings: Vec<SensorValue>) -> Self {
        Self {
            name,
            readings,
            drift: 0.0,
            fail_reads: false,
            ready: false,
        }
    }

    /// A plausible outdoor temperature/humidity unit.
    pub fn weather(name: &'static str) -> Self {
        Self::new(
            name,
            vec![
                SensorValue::new(ValueKind::Temperature, 19.5),
                SensorValue::new(ValueKind::Humidity, 62.0),
            ],
        )
    }

    /// Add `drift` to every value on each successful read.
    pub fn with_drift(mut self, drift: f32) -> Self {
        self.drift = drift;
        self
    }

    /// Make every subsequent `read` fail.
    pub fn set_failing(&mut self, failing: bool) {
        self.fail_reads = failing;
    }
}

impl Sensor for SimulatedSensor {
    fn begin(&mut self) -> bool {
        self.ready = true;
        true
    }

    fn read(&mut self) -> bool {
        if self.fail_reads {
            return false;
        }
        for value in &mut self.readings {
            value.value += self.drift;
        }
        true
    }

    fn values(&self, out: &mut Vec<SensorValue>, max: usize) -> usize {
        let n = self.readings.len().min(max);
        out.extend_from_slice(&self.readings[..n]);
        n
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn is_ready(&self) -> bool {
        self.ready
    }
}
