//! In-memory node registry: last-known state and recent history.
//!
//! Every incoming telemetry frame updates the node's cached state and
//! appends to a bounded history ring for dashboard sparklines. Nodes are
//! created on first receipt (or on announce) up to [`MAX_NODES`]; a node
//! that goes quiet for [`NODE_OFFLINE_TIMEOUT_SECS`] is marked offline by
//! the periodic sweep.
//!
//! Durable time-series persistence (SQLite on the original deployment)
//! lives outside this crate.

use crate::wire::{LegacyPacket, MultiSensorPacket, ValueKind, BASE_STATION_ID, NODE_ID_BROADCAST};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Maximum nodes tracked; additional nodes are logged and ignored.
pub const MAX_NODES: usize = 10;
/// Per-node in-memory history ring length.
pub const MAX_HISTORY_POINTS: usize = 120;
/// Seconds without a frame before a node is considered offline.
pub const NODE_OFFLINE_TIMEOUT_SECS: u64 = 300;

/// One time-series sample.
#[derive(Debug, Clone)]
pub struct HistoryPoint {
    pub at: Instant,
    pub battery_percent: u8,
    pub rssi: Option<f32>,
    pub snr: Option<f32>,
    pub values: HashMap<ValueKind, f32>,
}

/// Last-known state for a single sensor node.
#[derive(Debug, Clone)]
pub struct NodeState {
    pub node_id: u8,
    pub location: String,
    pub zone: String,
    pub battery_percent: u8,
    /// 0 = discharging, 1 = charging.
    pub power_state: u8,
    pub rssi: Option<f32>,
    pub snr: Option<f32>,
    pub last_seen: Option<Instant>,
    pub online: bool,
    /// Latest value per measurement type.
    pub values: HashMap<ValueKind, f32>,
    history: VecDeque<HistoryPoint>,
}

impl NodeState {
    fn new(node_id: u8) -> Self {
        Self {
            node_id,
            location: String::new(),
            zone: String::new(),
            battery_percent: 0,
            power_state: 0,
            rssi: None,
            snr: None,
            last_seen: None,
            online: false,
            values: HashMap::new(),
            history: VecDeque::with_capacity(MAX_HISTORY_POINTS),
        }
    }

    /// Recent samples, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &HistoryPoint> {
        self.history.iter()
    }

    fn push_history(&mut self, point: HistoryPoint) {
        if self.history.len() == MAX_HISTORY_POINTS {
            self.history.pop_front();
        }
        self.history.push_back(point);
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    nodes: HashMap<u8, NodeState>,
}

impl RegistryInner {
    fn get_or_create(&mut self, node_id: u8) -> Option<&mut NodeState> {
        if !self.nodes.contains_key(&node_id) {
            if self.nodes.len() >= MAX_NODES {
                warn!(node_id, "node limit reached, ignoring new node");
                return None;
            }
            info!(node_id, "registered new node");
            self.nodes.insert(node_id, NodeState::new(node_id));
        }
        self.nodes.get_mut(&node_id)
    }
}

/// Thread-safe store of per-node state.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    inner: Mutex<RegistryInner>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a multi-sensor telemetry frame.
    ///
    /// Frames claiming a reserved node id (coordinator or broadcast) are
    /// dropped.
    pub fn ingest_telemetry(
        &self,
        pkt: &MultiSensorPacket,
        rssi: Option<f32>,
        snr: Option<f32>,
        now: Instant,
    ) {
        let node_id = pkt.sensor_id;
        if node_id == BASE_STATION_ID || node_id == NODE_ID_BROADCAST {
            debug!(node_id, "dropping telemetry from reserved node id");
            return;
        }

        let mut inner = self.inner.lock().expect("registry lock");
        let Some(node) = inner.get_or_create(node_id) else {
            return;
        };
        if !pkt.location.is_empty() {
            node.location = pkt.location.clone();
        }
        if !pkt.zone.is_empty() {
            node.zone = pkt.zone.clone();
        }
        node.battery_percent = pkt.battery_percent;
        node.power_state = pkt.power_state;
        node.rssi = rssi;
        node.snr = snr;
        node.last_seen = Some(now);
        node.online = true;
        for value in &pkt.values {
            node.values.insert(value.kind, value.value);
        }
        node.push_history(HistoryPoint {
            at: now,
            battery_percent: node.battery_percent,
            rssi,
            snr,
            values: node.values.clone(),
        });
    }

    /// Record a legacy v1 telemetry frame.
    pub fn ingest_legacy(
        &self,
        pkt: &LegacyPacket,
        rssi: Option<f32>,
        snr: Option<f32>,
        now: Instant,
    ) {
        let mut inner = self.inner.lock().expect("registry lock");
        let Some(node) = inner.get_or_create(pkt.sensor_id) else {
            return;
        };
        node.battery_percent = pkt.battery_percent;
        node.rssi = rssi.or(Some(pkt.rssi as f32));
        node.snr = snr.or(Some(pkt.snr));
        node.last_seen = Some(now);
        node.online = true;
        node.values.insert(ValueKind::Temperature, pkt.temperature);
        node.values.insert(ValueKind::Humidity, pkt.humidity);
        node.push_history(HistoryPoint {
            at: now,
            battery_percent: node.battery_percent,
            rssi: node.rssi,
            snr: node.snr,
            values: node.values.clone(),
        });
    }

    /// Register a node seen via `CMD_SENSOR_ANNOUNCE` without telemetry yet.
    pub fn enrol(&self, node_id: u8, now: Instant) {
        let mut inner = self.inner.lock().expect("registry lock");
        if let Some(node) = inner.get_or_create(node_id) {
            node.last_seen = Some(now);
            node.online = true;
        }
    }

    /// Snapshot of one node.
    pub fn get(&self, node_id: u8) -> Option<NodeState> {
        let inner = self.inner.lock().expect("registry lock");
        inner.nodes.get(&node_id).cloned()
    }

    /// Snapshots of every tracked node, ordered by node id.
    pub fn all(&self) -> Vec<NodeState> {
        let inner = self.inner.lock().expect("registry lock");
        let mut nodes: Vec<_> = inner.nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.node_id);
        nodes
    }

    /// Node ids currently considered online.
    pub fn online_nodes(&self) -> Vec<u8> {
        let inner = self.inner.lock().expect("registry lock");
        let mut ids: Vec<_> = inner
            .nodes
            .values()
            .filter(|n| n.online)
            .map(|n| n.node_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of tracked nodes.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("registry lock");
        inner.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Transition quiet nodes to offline. Returns the ids transitioned.
    pub fn sweep_offline(&self, now: Instant) -> Vec<u8> {
        let mut inner = self.inner.lock().expect("registry lock");
        let mut transitioned = Vec::new();
        for node in inner.nodes.values_mut() {
            if !node.online {
                continue;
            }
            let quiet = node
                .last_seen
                .map(|t| now.saturating_duration_since(t).as_secs())
                .unwrap_or(u64::MAX);
            if quiet > NODE_OFFLINE_TIMEOUT_SECS {
                info!(node_id = node.node_id, quiet_secs = quiet, "node offline");
                node.online = false;
                transitioned.push(node.node_id);
            }
        }
        transitioned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::SensorValue;
    use std::time::Duration;

    fn telemetry(node_id: u8) -> MultiSensorPacket {
        MultiSensorPacket {
            network_id: 1,
            sensor_id: node_id,
            battery_percent: 80,
            power_state: 0,
            last_command_seq: 0,
            ack_status: 0,
            location: "Shed".to_string(),
            zone: "Outdoor".to_string(),
            values: vec![SensorValue::new(ValueKind::Temperature, 20.0)],
        }
    }

    #[test]
    fn test_ingest_creates_node() {
        let registry = NodeRegistry::new();
        let now = Instant::now();
        registry.ingest_telemetry(&telemetry(5), Some(-70.0), Some(8.0), now);

        let node = registry.get(5).unwrap();
        assert!(node.online);
        assert_eq!(node.location, "Shed");
        assert_eq!(node.battery_percent, 80);
        assert_eq!(node.values[&ValueKind::Temperature], 20.0);
        assert_eq!(node.rssi, Some(-70.0));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reserved_ids_dropped() {
        let registry = NodeRegistry::new();
        let now = Instant::now();
        registry.ingest_telemetry(&telemetry(0), None, None, now);
        registry.ingest_telemetry(&telemetry(255), None, None, now);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_node_limit() {
        let registry = NodeRegistry::new();
        let now = Instant::now();
        for id in 1..=(MAX_NODES as u8 + 3) {
            registry.ingest_telemetry(&telemetry(id), None, None, now);
        }
        assert_eq!(registry.len(), MAX_NODES);
    }

    #[test]
    fn test_history_ring_bounded() {
        let registry = NodeRegistry::new();
        let now = Instant::now();
        for i in 0..(MAX_HISTORY_POINTS + 10) {
            registry.ingest_telemetry(&telemetry(5), None, None, now + Duration::from_secs(i as u64));
        }
        let node = registry.get(5).unwrap();
        assert_eq!(node.history().count(), MAX_HISTORY_POINTS);
    }

    #[test]
    fn test_offline_sweep() {
        let registry = NodeRegistry::new();
        let t0 = Instant::now();
        registry.ingest_telemetry(&telemetry(5), None, None, t0);
        registry.ingest_telemetry(&telemetry(6), None, None, t0 + Duration::from_secs(400));

        let gone = registry.sweep_offline(t0 + Duration::from_secs(401));
        assert_eq!(gone, vec![5]);
        assert!(!registry.get(5).unwrap().online);
        assert!(registry.get(6).unwrap().online);
        assert_eq!(registry.online_nodes(), vec![6]);

        // A fresh frame brings the node back
        registry.ingest_telemetry(&telemetry(5), None, None, t0 + Duration::from_secs(500));
        assert!(registry.get(5).unwrap().online);
    }

    #[test]
    fn test_enrol_without_telemetry() {
        let registry = NodeRegistry::new();
        registry.enrol(7, Instant::now());
        let node = registry.get(7).unwrap();
        assert!(node.online);
        assert!(node.values.is_empty());
    }

    #[test]
    fn test_legacy_ingest() {
        let registry = NodeRegistry::new();
        let pkt = LegacyPacket {
            sensor_id: 3,
            network_id: 1,
            temperature: 21.5,
            humidity: 50.0,
            battery_percent: 77,
            rssi: -65,
            snr: 7.5,
        };
        registry.ingest_legacy(&pkt, None, None, Instant::now());
        let node = registry.get(3).unwrap();
        assert_eq!(node.battery_percent, 77);
        assert_eq!(node.values[&ValueKind::Temperature], 21.5);
        assert_eq!(node.values[&ValueKind::Humidity], 50.0);
        // Falls back to the node-reported link quality
        assert_eq!(node.rssi, Some(-65.0));
    }

    #[test]
    fn test_empty_strings_keep_previous() {
        let registry = NodeRegistry::new();
        let now = Instant::now();
        registry.ingest_telemetry(&telemetry(5), None, None, now);

        let mut bare = telemetry(5);
        bare.location = String::new();
        bare.zone = String::new();
        registry.ingest_telemetry(&bare, None, None, now);

        let node = registry.get(5).unwrap();
        assert_eq!(node.location, "Shed");
        assert_eq!(node.zone, "Outdoor");
    }
}
