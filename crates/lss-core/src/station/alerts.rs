//! Threshold evaluation for incoming telemetry.
//!
//! The station compares every telemetry frame against its configured
//! thresholds and surfaces breaches. Delivery of alerts (chat webhooks,
//! mail) is an external consumer's job; here a breach is a value handed
//! to the caller and a `tracing` warning in the station log.

use crate::wire::{MultiSensorPacket, ValueKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fleet-wide alert thresholds, part of the station configuration.
///
/// Defaults match the node-side configuration defaults so a fresh
/// deployment agrees on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Degrees C above which a high-temperature alert fires.
    pub temp_high: f32,
    /// Degrees C below which a low-temperature alert fires.
    pub temp_low: f32,
    /// Percent at or below which a low-battery alert fires.
    pub battery_low: f32,
    /// Percent at or below which a critical-battery alert fires.
    pub battery_critical: f32,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            temp_high: 50.0,
            temp_low: -20.0,
            battery_low: 20.0,
            battery_critical: 10.0,
        }
    }
}

/// One threshold breach observed in a telemetry frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAlert {
    HighTemperature { node_id: u8, value: f32, limit: f32 },
    LowTemperature { node_id: u8, value: f32, limit: f32 },
    LowBattery { node_id: u8, percent: u8, limit: f32 },
    CriticalBattery { node_id: u8, percent: u8, limit: f32 },
}

impl fmt::Display for ThresholdAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdAlert::HighTemperature { node_id, value, limit } => write!(
                f,
                "node {node_id}: temperature {value:.1}°C exceeds threshold {limit:.1}°C"
            ),
            ThresholdAlert::LowTemperature { node_id, value, limit } => write!(
                f,
                "node {node_id}: temperature {value:.1}°C below threshold {limit:.1}°C"
            ),
            ThresholdAlert::LowBattery { node_id, percent, limit } => write!(
                f,
                "node {node_id}: battery at {percent}% (low threshold {limit:.0}%)"
            ),
            ThresholdAlert::CriticalBattery { node_id, percent, limit } => write!(
                f,
                "node {node_id}: battery at {percent}% (critical threshold {limit:.0}%)"
            ),
        }
    }
}

/// Evaluate a telemetry frame against the configured thresholds.
///
/// Every temperature-typed value is checked against the high/low pair.
/// Battery is checked once from the header; at or below critical
/// supersedes the low alert.
pub fn evaluate(thresholds: &AlertThresholds, pkt: &MultiSensorPacket) -> Vec<ThresholdAlert> {
    let node_id = pkt.sensor_id;
    let mut alerts = Vec::new();

    for value in &pkt.values {
        if !matches!(
            value.kind,
            ValueKind::Temperature | ValueKind::ThermistorTemperature
        ) {
            continue;
        }
        if value.value > thresholds.temp_high {
            alerts.push(ThresholdAlert::HighTemperature {
                node_id,
                value: value.value,
                limit: thresholds.temp_high,
            });
        } else if value.value < thresholds.temp_low {
            alerts.push(ThresholdAlert::LowTemperature {
                node_id,
                value: value.value,
                limit: thresholds.temp_low,
            });
        }
    }

    let battery = pkt.battery_percent as f32;
    if battery <= thresholds.battery_critical {
        alerts.push(ThresholdAlert::CriticalBattery {
            node_id,
            percent: pkt.battery_percent,
            limit: thresholds.battery_critical,
        });
    } else if battery <= thresholds.battery_low {
        alerts.push(ThresholdAlert::LowBattery {
            node_id,
            percent: pkt.battery_percent,
            limit: thresholds.battery_low,
        });
    }

    alerts
}
