//! Persistent per-node configuration.
//!
//! Configuration is loaded from a namespaced key/value store at boot and
//! written back whenever a `CMD_SET_*` command is applied. The store is a
//! trait seam: firmware targets back it with NVS, hosts with a JSON file,
//! tests with a map. Values travel as strings keyed by the exact names the
//! deployed fleet already uses, so a host-side store can read a dump of a
//! node's NVS namespace verbatim.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Key/value namespace holding node configuration.
pub const NODE_NAMESPACE: &str = "lss_node";

/// Longest location string the config (and the wire format) can hold.
pub const LOCATION_TRUNCATE: usize = crate::wire::telemetry::LOCATION_CAPACITY - 1;
/// Longest zone string the config (and the wire format) can hold.
pub const ZONE_TRUNCATE: usize = crate::wire::telemetry::ZONE_CAPACITY - 1;

/// Errors from the configuration store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing storage rejected a read or write.
    #[error("storage backend failure: {0}")]
    Backend(String),
    /// Filesystem-level failure of a file-backed store.
    #[error("storage I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// All runtime-configurable parameters for a client node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// 1-254; must be unique in the network. 0 and 255 are reserved.
    pub node_id: u8,
    /// Must match the base station.
    pub network_id: u16,
    /// Telemetry transmission period, bounded to [1000, 3600000].
    pub telemetry_interval_ms: u32,
    pub location: String,
    pub zone: String,
    /// Degrees C above which an alert fires.
    pub temp_thresh_high: f32,
    /// Degrees C below which an alert fires.
    pub temp_thresh_low: f32,
    /// Percent below which a low-battery alert fires.
    pub battery_thresh_low: f32,
    /// Percent below which a critical-battery alert fires.
    pub battery_thresh_critical: f32,
    /// MHz.
    pub lora_frequency: f32,
    pub lora_spreading_factor: u8,
    /// dBm.
    pub lora_tx_power: u8,
    /// Whether to participate in mesh routing.
    pub mesh_enabled: bool,
    /// UTC timezone offset in minutes.
    pub tz_offset_minutes: i32,
    /// Unix epoch of the last time sync (UTC); 0 = never.
    pub last_time_sync: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            network_id: 1,
            telemetry_interval_ms: 30_000,
            location: "Unknown".to_string(),
            zone: "default".to_string(),
            temp_thresh_high: 50.0,
            temp_thresh_low: -20.0,
            battery_thresh_low: 20.0,
            battery_thresh_critical: 10.0,
            lora_frequency: 915.0,
            lora_spreading_factor: 10,
            lora_tx_power: 20,
            mesh_enabled: true,
            tz_offset_minutes: 0,
            last_time_sync: 0,
        }
    }
}

/// Namespaced key/value storage, the shape of ESP-IDF `Preferences`.
pub trait KvStore {
    /// Read a value.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value.
    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Erase every key in the namespace.
    fn clear(&mut self) -> Result<(), StoreError>;

    /// True when the namespace holds no keys yet.
    fn is_empty(&self) -> bool;
}

/// Volatile map-backed store for tests and stub mode.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: HashMap<String, String>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.entries.clear();
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// File-backed store: one JSON object per namespace.
///
/// Writes go through a temp file then rename, so a crash mid-save leaves
/// the previous contents intact.
#[derive(Debug)]
pub struct JsonKvStore {
    path: PathBuf,
    entries: HashMap<String, String>,
}

impl JsonKvStore {
    /// Open (or create) the namespace file `<dir>/<namespace>.json`.
    pub fn open(dir: &Path, namespace: &str) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{namespace}.json"));
        let entries = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(path = %path.display(), "corrupt namespace file, starting fresh: {e}");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Ok(Self { path, entries })
    }

    fn flush(&self) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(text.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KvStore for JsonKvStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        self.flush()
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.entries.clear();
        self.flush()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The node's view of its persisted configuration.
#[derive(Debug)]
pub struct NodeConfigStore<S: KvStore> {
    store: S,
    cfg: NodeConfig,
}

impl<S: KvStore> NodeConfigStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cfg: NodeConfig::default(),
        }
    }

    /// Current in-memory configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.cfg
    }

    /// Mutable access; call [`Self::save`] afterwards to persist.
    pub fn config_mut(&mut self) -> &mut NodeConfig {
        &mut self.cfg
    }

    /// Load every field from the store.
    ///
    /// An empty namespace means first boot: defaults are written back and
    /// returned. A missing or unparseable individual key falls back to its
    /// default without failing the load.
    pub fn load(&mut self) -> Result<(), StoreError> {
        if self.store.is_empty() {
            info!("no saved config, writing defaults");
            self.cfg = NodeConfig::default();
            return self.save();
        }

        let d = NodeConfig::default();
        self.cfg = NodeConfig {
            node_id: self.get_parsed("node_id", d.node_id),
            network_id: self.get_parsed("network_id", d.network_id),
            telemetry_interval_ms: self.get_parsed("tx_interval", d.telemetry_interval_ms),
            location: self.store.get("location").unwrap_or(d.location),
            zone: self.store.get("zone").unwrap_or(d.zone),
            temp_thresh_high: self.get_parsed("temp_hi", d.temp_thresh_high),
            temp_thresh_low: self.get_parsed("temp_lo", d.temp_thresh_low),
            battery_thresh_low: self.get_parsed("batt_lo", d.battery_thresh_low),
            battery_thresh_critical: self.get_parsed("batt_crit", d.battery_thresh_critical),
            lora_frequency: self.get_parsed("lora_freq", d.lora_frequency),
            lora_spreading_factor: self.get_parsed("lora_sf", d.lora_spreading_factor),
            lora_tx_power: self.get_parsed("lora_txpwr", d.lora_tx_power),
            mesh_enabled: self.get_parsed("mesh_en", d.mesh_enabled),
            tz_offset_minutes: self.get_parsed("tz_offset", d.tz_offset_minutes),
            last_time_sync: self.get_parsed("time_sync", d.last_time_sync),
        };
        Ok(())
    }

    /// Persist every field. Best effort per key; the first failure aborts.
    pub fn save(&mut self) -> Result<(), StoreError> {
        let cfg = self.cfg.clone();
        self.store.put("node_id", &cfg.node_id.to_string())?;
        self.store.put("network_id", &cfg.network_id.to_string())?;
        self.store
            .put("tx_interval", &cfg.telemetry_interval_ms.to_string())?;
        self.store.put("location", &cfg.location)?;
        self.store.put("zone", &cfg.zone)?;
        self.store.put("temp_hi", &cfg.temp_thresh_high.to_string())?;
        self.store.put("temp_lo", &cfg.temp_thresh_low.to_string())?;
        self.store.put("batt_lo", &cfg.battery_thresh_low.to_string())?;
        self.store
            .put("batt_crit", &cfg.battery_thresh_critical.to_string())?;
        self.store.put("lora_freq", &cfg.lora_frequency.to_string())?;
        self.store
            .put("lora_sf", &cfg.lora_spreading_factor.to_string())?;
        self.store.put("lora_txpwr", &cfg.lora_tx_power.to_string())?;
        self.store.put("mesh_en", &cfg.mesh_enabled.to_string())?;
        self.store
            .put("tz_offset", &cfg.tz_offset_minutes.to_string())?;
        self.store.put("time_sync", &cfg.last_time_sync.to_string())?;
        Ok(())
    }

    /// Erase the namespace and reload defaults.
    pub fn factory_reset(&mut self) -> Result<(), StoreError> {
        info!("factory reset: clearing namespace");
        self.store.clear()?;
        self.cfg = NodeConfig::default();
        self.save()
    }

    fn get_parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.store
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let d = NodeConfig::default();
        assert_eq!(d.node_id, 1);
        assert_eq!(d.network_id, 1);
        assert_eq!(d.telemetry_interval_ms, 30_000);
        assert_eq!(d.location, "Unknown");
        assert_eq!(d.zone, "default");
        assert_eq!(d.temp_thresh_high, 50.0);
        assert_eq!(d.temp_thresh_low, -20.0);
        assert_eq!(d.battery_thresh_low, 20.0);
        assert_eq!(d.battery_thresh_critical, 10.0);
        assert_eq!(d.lora_frequency, 915.0);
        assert_eq!(d.lora_spreading_factor, 10);
        assert_eq!(d.lora_tx_power, 20);
        assert!(d.mesh_enabled);
        assert_eq!(d.tz_offset_minutes, 0);
        assert_eq!(d.last_time_sync, 0);
    }

    #[test]
    fn test_first_boot_writes_defaults() {
        let mut store = NodeConfigStore::new(MemoryKvStore::new());
        store.load().unwrap();
        assert_eq!(store.config(), &NodeConfig::default());
        assert_eq!(store.store.get("node_id").as_deref(), Some("1"));
        assert_eq!(store.store.get("tx_interval").as_deref(), Some("30000"));
        assert_eq!(store.store.get("mesh_en").as_deref(), Some("true"));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let mut store = NodeConfigStore::new(MemoryKvStore::new());
        store.load().unwrap();
        {
            let cfg = store.config_mut();
            cfg.node_id = 12;
            cfg.network_id = 3;
            cfg.telemetry_interval_ms = 60_000;
            cfg.location = "Greenhouse".to_string();
            cfg.zone = "north".to_string();
            cfg.temp_thresh_low = -5.5;
            cfg.lora_frequency = 868.1;
            cfg.mesh_enabled = false;
            cfg.tz_offset_minutes = -480;
            cfg.last_time_sync = 1_700_000_000;
        }
        store.save().unwrap();
        let expected = store.config().clone();

        // A fresh view over the same backing keys reads identical values
        let mut reloaded = NodeConfigStore::new(store.store);
        reloaded.load().unwrap();
        assert_eq!(reloaded.config(), &expected);
    }

    #[test]
    fn test_missing_key_falls_back_to_default() {
        let mut kv = MemoryKvStore::new();
        kv.put("node_id", "9").unwrap();
        kv.put("tx_interval", "not-a-number").unwrap();
        let mut store = NodeConfigStore::new(kv);
        store.load().unwrap();
        assert_eq!(store.config().node_id, 9);
        assert_eq!(store.config().telemetry_interval_ms, 30_000);
        assert_eq!(store.config().zone, "default");
    }

    #[test]
    fn test_factory_reset() {
        let mut store = NodeConfigStore::new(MemoryKvStore::new());
        store.load().unwrap();
        store.config_mut().node_id = 99;
        store.save().unwrap();

        store.factory_reset().unwrap();
        assert_eq!(store.config(), &NodeConfig::default());
        // Defaults are persisted again after the wipe
        assert_eq!(store.store.get("node_id").as_deref(), Some("1"));
    }

    #[test]
    fn test_json_store_persists() {
        let dir = std::env::temp_dir().join(format!(
            "lss-test-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = fs::remove_dir_all(&dir);

        {
            let kv = JsonKvStore::open(&dir, NODE_NAMESPACE).unwrap();
            let mut store = NodeConfigStore::new(kv);
            store.load().unwrap();
            store.config_mut().node_id = 42;
            store.save().unwrap();
        }
        {
            let kv = JsonKvStore::open(&dir, NODE_NAMESPACE).unwrap();
            let mut store = NodeConfigStore::new(kv);
            store.load().unwrap();
            assert_eq!(store.config().node_id, 42);
        }

        let _ = fs::remove_dir_all(&dir);
    }
}
