//! Client node runtime: the cooperative scheduling loop.
//!
//! One value owns everything a node needs - radio, clock, configuration
//! store, mesh router, sensors - and a single-threaded loop drives it:
//!
//! 1. Drain received frames: unwrap mesh framing, tolerate the 4-byte
//!    RadioHead header the base station's radio driver prepends, parse
//!    commands addressed to this node, apply them, transmit the ACK.
//! 2. When the telemetry interval has elapsed, assemble and transmit a
//!    multi-sensor frame (mesh-wrapped toward the coordinator when mesh is
//!    enabled).
//! 3. Produce a mesh neighbour beacon when due.
//!
//! The receive-complete interrupt of a real radio reduces to
//! [`RadioLink::try_receive`] returning a frame; all parsing and dispatch
//! happens in loop context.

use crate::link::{LinkError, MonotonicClock, RadioLink};
use crate::mesh::{MeshDecision, MeshRouter};
use crate::node::commands::{apply_command, NodeAction};
use crate::node::config::{KvStore, NodeConfigStore, StoreError};
use crate::node::sensors::Sensor;
use crate::wire::{
    self, detect_frame, CommandKind, CommandPacket, FrameKind, MultiSensorPacket, SensorValue,
    MAX_SENSOR_VALUES,
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Pause between receiving a command and transmitting its ACK, so the base
/// station's radio has turned around to receive.
const ACK_BACKOFF_MS: u32 = 50;
/// Pause between transmitting an ACK and executing a restart/wipe, so the
/// frame has left the radio before the node disappears.
const ACTION_GRACE_MS: u32 = 200;

/// Radio parameters derived from the node configuration.
///
/// The crate does not drive hardware; firmware reads this record at boot
/// and programs its radio accordingly. Both sides of a deployment must
/// agree on every field.
#[derive(Debug, Clone, PartialEq)]
pub struct RadioParams {
    /// MHz.
    pub frequency: f32,
    /// kHz.
    pub bandwidth: f32,
    pub spreading_factor: u8,
    /// Denominator of 4/x.
    pub coding_rate: u8,
    /// PHY sync word, derived from the network id.
    pub sync_word: u8,
    /// dBm.
    pub tx_power: u8,
    /// Symbols.
    pub preamble_length: u8,
}

/// Errors from the node runtime.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// A complete client node.
pub struct NodeRuntime<R: RadioLink, C: MonotonicClock, S: KvStore> {
    radio: R,
    clock: C,
    store: NodeConfigStore<S>,
    mesh: MeshRouter,
    sensors: Vec<Box<dyn Sensor>>,
    battery_percent: u8,
    power_state: u8,
    last_tx_ms: u32,
    /// Piggybacked onto the next telemetry frame.
    last_command_seq: u8,
    last_ack_status: u8,
    restarts: u32,
}

impl<R: RadioLink, C: MonotonicClock, S: KvStore> NodeRuntime<R, C, S> {
    /// Create a runtime over the given capabilities. Call
    /// [`Self::start`] before polling.
    pub fn new(radio: R, clock: C, store: S) -> Self {
        Self {
            radio,
            clock,
            store: NodeConfigStore::new(store),
            mesh: MeshRouter::new(0, true),
            sensors: Vec::new(),
            battery_percent: 100,
            power_state: 0,
            last_tx_ms: 0,
            last_command_seq: 0,
            last_ack_status: 0,
            restarts: 0,
        }
    }

    /// Attach a sensor. Call before [`Self::start`].
    pub fn add_sensor(&mut self, sensor: Box<dyn Sensor>) {
        self.sensors.push(sensor);
    }

    /// Latest battery reading, fed in by the platform's battery monitor.
    pub fn set_battery(&mut self, percent: u8, charging: bool) {
        self.battery_percent = percent.min(100);
        self.power_state = charging as u8;
    }

    /// Node configuration as currently loaded.
    pub fn config(&self) -> &crate::node::config::NodeConfig {
        self.store.config()
    }

    /// Mesh router state (for inspection and tests).
    pub fn mesh(&self) -> &MeshRouter {
        &self.mesh
    }

    /// The clock driving this runtime; simulators step fake clocks here.
    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    /// How many times a RESTART / FACTORY_RESET has re-bootstrapped this
    /// runtime.
    pub fn restart_count(&self) -> u32 {
        self.restarts
    }

    /// Radio parameters the platform must program before polling.
    pub fn radio_params(&self) -> RadioParams {
        let cfg = self.store.config();
        RadioParams {
            frequency: cfg.lora_frequency,
            bandwidth: 125.0,
            spreading_factor: cfg.lora_spreading_factor,
            coding_rate: 5,
            sync_word: wire::radio_sync_word(cfg.network_id),
            tx_power: cfg.lora_tx_power,
            preamble_length: 8,
        }
    }

    /// Boot sequence: load configuration, bring up sensors, announce.
    pub fn start(&mut self) -> Result<(), NodeError> {
        self.store.load()?;
        let cfg = self.store.config().clone();
        self.mesh = MeshRouter::new(cfg.node_id, cfg.mesh_enabled);

        for sensor in &mut self.sensors {
            if !sensor.begin() {
                warn!(sensor = sensor.name(), "sensor failed to initialise");
            }
        }

        self.announce()?;
        info!(
            node_id = cfg.node_id,
            network_id = cfg.network_id,
            "node announced"
        );
        Ok(())
    }

    /// One pass of the main loop. Call continuously.
    pub fn poll(&mut self) -> Result<(), NodeError> {
        while let Some(raw) = self.radio.try_receive() {
            self.handle_frame(&raw)?;
        }

        let now = self.clock.now_ms();
        let interval = self.store.config().telemetry_interval_ms;
        if now.wrapping_sub(self.last_tx_ms) >= interval {
            self.last_tx_ms = now;
            self.transmit_telemetry()?;
        }

        if self.store.config().mesh_enabled {
            let now = self.clock.now_ms();
            if let Some(beacon) = self.mesh.tick(now) {
                self.radio.transmit(&beacon)?;
            }
        }

        Ok(())
    }

    /// Broadcast `CMD_SENSOR_ANNOUNCE` so the base station enrols us.
    fn announce(&mut self) -> Result<(), NodeError> {
        let cfg = self.store.config();
        let pkt = CommandPacket::new(
            CommandKind::SensorAnnounce,
            cfg.node_id,
            0,
            Vec::new(),
        );
        // A fresh announce has no oversized payload
        let bytes = pkt.to_bytes().expect("announce serialises");
        self.radio.transmit(&bytes)?;
        Ok(())
    }

    /// Classify and dispatch one received buffer.
    ///
    /// Detection order: bare LSS frame at offset 0; LSS frame at offset 4
    /// (the base station's RadioHead driver prepends [dest, node, id,
    /// flags] that we never asked for); then a mesh frame. Mesh frames can
    /// never alias the first two - their hop-count byte is below any sync
    /// byte value.
    fn handle_frame(&mut self, raw: &[u8]) -> Result<(), NodeError> {
        if detect_frame(raw).is_some() {
            return self.handle_lss_frame(raw);
        }

        if raw.len() > 4 && detect_frame(&raw[4..]).is_some() {
            return self.handle_lss_frame(&raw[4..]);
        }

        let now = self.clock.now_ms();
        match self.mesh.receive(raw, now) {
            MeshDecision::Deliver(payload) => self.handle_lss_frame(payload),
            MeshDecision::Forward => {
                if self.store.config().mesh_enabled {
                    if let Some(frame) = self.mesh.prepare_forward(raw) {
                        debug!("forwarding mesh frame");
                        self.radio.transmit(&frame)?;
                    }
                }
                Ok(())
            }
            MeshDecision::Drop => Ok(()),
        }
    }

    /// Parse a bare LSS frame and apply it if it is a command for us.
    fn handle_lss_frame(&mut self, raw: &[u8]) -> Result<(), NodeError> {
        if detect_frame(raw) != Some(FrameKind::Command) {
            // Telemetry and ACKs from peers are not ours to consume
            return Ok(());
        }

        let cmd = match CommandPacket::from_bytes(raw) {
            Ok(cmd) => cmd,
            Err(e) => {
                debug!("discarding bad command frame: {e}");
                return Ok(());
            }
        };

        let node_id = self.store.config().node_id;
        if cmd.target_sensor_id != node_id && cmd.target_sensor_id != wire::NODE_ID_BROADCAST {
            return Ok(());
        }
        // Announces are broadcast by peers booting up, not commands to us
        if cmd.kind() == Some(CommandKind::SensorAnnounce) {
            return Ok(());
        }

        debug!(
            code = cmd.command_type,
            seq = cmd.sequence_number,
            "applying command"
        );
        let outcome = apply_command(&cmd, &mut self.store, &mut self.mesh);

        self.last_command_seq = cmd.sequence_number;
        self.last_ack_status = outcome.status;

        // The base station has just stopped transmitting; give its radio a
        // moment to switch back to receive before answering
        self.clock.sleep_ms(ACK_BACKOFF_MS);
        self.radio.transmit(&outcome.response)?;

        match outcome.action {
            NodeAction::None => Ok(()),
            NodeAction::Restart => {
                self.clock.sleep_ms(ACTION_GRACE_MS);
                self.reboot()
            }
            NodeAction::FactoryReset => {
                self.clock.sleep_ms(ACTION_GRACE_MS);
                self.store.factory_reset()?;
                self.reboot()
            }
        }
    }

    /// Host-side stand-in for a hardware reset: re-run the boot sequence.
    fn reboot(&mut self) -> Result<(), NodeError> {
        info!("restarting node runtime");
        self.restarts += 1;
        self.last_tx_ms = self.clock.now_ms();
        self.last_command_seq = 0;
        self.last_ack_status = 0;
        self.start()
    }

    /// Assemble a multi-sensor frame from the sensor array and transmit it.
    fn transmit_telemetry(&mut self) -> Result<(), NodeError> {
        let cfg = self.store.config().clone();

        let mut values: Vec<SensorValue> = Vec::new();
        for sensor in &mut self.sensors {
            if !sensor.is_ready() {
                continue;
            }
            if !sensor.read() {
                debug!(sensor = sensor.name(), "read failed, using cached values");
            }
            let remaining = MAX_SENSOR_VALUES - values.len();
            if remaining == 0 {
                break;
            }
            sensor.values(&mut values, remaining);
        }

        let pkt = MultiSensorPacket {
            network_id: cfg.network_id,
            sensor_id: cfg.node_id,
            battery_percent: self.battery_percent,
            power_state: self.power_state,
            last_command_seq: self.last_command_seq,
            ack_status: self.last_ack_status,
            location: cfg.location.clone(),
            zone: cfg.zone.clone(),
            values,
        };

        let payload = match pkt.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("telemetry serialisation failed: {e}");
                return Ok(());
            }
        };

        let frame = if cfg.mesh_enabled {
            self.mesh.wrap(wire::BASE_STATION_ID, &payload)
        } else {
            payload
        };
        self.radio.transmit(&frame)?;
        debug!(values = pkt.values.len(), "telemetry transmitted");
        Ok(())
    }
}
