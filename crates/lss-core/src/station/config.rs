//! Base-station configuration.
//!
//! Runtime-adjustable settings persisted to a JSON file. The radio block
//! MUST match the fleet's node configuration field for field; a mismatch
//! on any PHY parameter silently partitions the network.

use crate::station::alerts::AlertThresholds;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

/// Errors loading or saving station configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse failure: {0}")]
    Parse(#[from] serde_json::Error),
}

/// LoRa radio parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoraConfig {
    /// MHz.
    pub frequency: f32,
    pub spreading_factor: u8,
    /// Hz.
    pub bandwidth: u32,
    /// Denominator of 4/x.
    pub coding_rate: u8,
    /// dBm.
    pub tx_power: u8,
    /// Symbols.
    pub preamble_length: u8,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            frequency: 915.0,
            spreading_factor: 10,
            bandwidth: 125_000,
            coding_rate: 5,
            tx_power: 20,
            preamble_length: 8,
        }
    }
}

/// Persisted base-station settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Shared by every node in this deployment; seeds the radio sync word.
    pub network_id: u16,
    pub lora: LoraConfig,
    /// Fleet-wide telemetry alert thresholds.
    pub alerts: AlertThresholds,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            network_id: 1,
            lora: LoraConfig::default(),
            alerts: AlertThresholds::default(),
        }
    }
}

impl StationConfig {
    /// Load from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist to `path` (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(text.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// PHY sync word for this deployment.
    pub fn radio_sync_word(&self) -> u8 {
        crate::wire::radio_sync_word(self.network_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_node_side() {
        let cfg = StationConfig::default();
        assert_eq!(cfg.network_id, 1);
        assert_eq!(cfg.lora.frequency, 915.0);
        assert_eq!(cfg.lora.spreading_factor, 10);
        assert_eq!(cfg.lora.bandwidth, 125_000);
        assert_eq!(cfg.lora.coding_rate, 5);
        assert_eq!(cfg.lora.tx_power, 20);
        assert_eq!(cfg.lora.preamble_length, 8);
        assert_eq!(cfg.alerts, AlertThresholds::default());
        assert_eq!(cfg.radio_sync_word(), 0x13);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("lss-no-such-config.json");
        let _ = fs::remove_file(&path);
        let cfg = StationConfig::load(&path).unwrap();
        assert_eq!(cfg, StationConfig::default());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let path = std::env::temp_dir().join(format!(
            "lss-station-config-{}.json",
            std::process::id()
        ));
        let cfg = StationConfig {
            network_id: 7,
            lora: LoraConfig {
                frequency: 868.1,
                spreading_factor: 9,
                ..LoraConfig::default()
            },
            ..StationConfig::default()
        };
        cfg.save(&path).unwrap();
        let loaded = StationConfig::load(&path).unwrap();
        assert_eq!(loaded, cfg);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let path = std::env::temp_dir().join(format!(
            "lss-partial-config-{}.json",
            std::process::id()
        ));
        fs::write(&path, r#"{"network_id": 9}"#).unwrap();
        let cfg = StationConfig::load(&path).unwrap();
        assert_eq!(cfg.network_id, 9);
        assert_eq!(cfg.lora, LoraConfig::default());
        let _ = fs::remove_file(&path);
    }
}
