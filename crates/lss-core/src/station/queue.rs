//! Outbound command queue with retry and acknowledgement tracking.
//!
//! Commands are enqueued through [`CommandQueue::submit`] (or a typed
//! helper) and drained by the station's transmit loop. Each command is
//! delivered at most [`COMMAND_RETRY_COUNT`] times, re-sent after
//! [`COMMAND_RETRY_TIMEOUT_SECS`] without an acknowledgement, and completed by
//! a matching ACK/NACK - standalone or piggybacked in a telemetry header.
//! Commands to distinct nodes are independent; commands to the same node
//! are serialised, one in flight at a time.
//!
//! The queue carries its own lock; every public method takes `&self` and
//! may be called from any thread.

use crate::wire::{CommandKind, CommandPacket};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Maximum delivery attempts per command.
pub const COMMAND_RETRY_COUNT: u32 = 3;
/// Seconds between delivery attempts.
pub const COMMAND_RETRY_TIMEOUT_SECS: u64 = 12;

/// Opaque handle for polling a submitted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandHandle(u64);

/// Observable lifecycle of a submitted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Not yet transmitted.
    Pending,
    /// Transmitted, awaiting acknowledgement.
    InFlight,
    /// Positively acknowledged with the node's status code.
    Acked(u8),
    /// Negatively acknowledged with the node's status code.
    Nacked(u8),
    /// Retry budget exhausted without an acknowledgement.
    TimedOut,
    /// Cancelled through the API before completion.
    Cancelled,
    /// Handle does not refer to a known command.
    Unknown,
}

impl CommandStatus {
    /// True once the command will never transmit again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommandStatus::Pending | CommandStatus::InFlight)
    }
}

/// One queued command.
#[derive(Debug, Clone)]
struct PendingCommand {
    handle: CommandHandle,
    node_id: u8,
    command_type: u8,
    sequence_number: u8,
    data: Vec<u8>,
    enqueued_at: Instant,
    attempts: u32,
    last_attempt_at: Option<Instant>,
    status: CommandStatus,
    completed_at: Option<Instant>,
}

impl PendingCommand {
    fn active(&self) -> bool {
        !self.status.is_terminal()
    }

    fn raw_packet(&self) -> Vec<u8> {
        let pkt = CommandPacket {
            command_type: self.command_type,
            target_sensor_id: self.node_id,
            sequence_number: self.sequence_number,
            data: self.data.clone(),
        };
        // Payload length is validated at submission
        pkt.to_bytes().expect("queued command serialises")
    }
}

/// Summary row for the API surface.
#[derive(Debug, Clone)]
pub struct PendingSummary {
    pub handle: CommandHandle,
    pub node_id: u8,
    pub command_type: u8,
    pub command_name: &'static str,
    pub sequence_number: u8,
    pub attempts: u32,
    pub status: CommandStatus,
    pub enqueued_at: Instant,
}

/// A command due for (re)transmission, as handed to the transmit loop.
#[derive(Debug, Clone)]
pub struct DueCommand {
    pub handle: CommandHandle,
    pub node_id: u8,
    pub sequence_number: u8,
    /// Ready-to-transmit serialised frame.
    pub frame: Vec<u8>,
}

#[derive(Debug, Default)]
struct QueueInner {
    queue: Vec<PendingCommand>,
    /// Per-node sequence counters; 0 is reserved as the "no piggybacked
    /// ACK" sentinel, so counters run 1..=255.
    next_seq: HashMap<u8, u8>,
    next_handle: u64,
}

/// Thread-safe outbound command queue.
#[derive(Debug, Default)]
pub struct CommandQueue {
    inner: Mutex<QueueInner>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a command for `node_id`.
    ///
    /// Stamps the next per-node sequence number and returns a handle for
    /// polling. Payloads longer than the wire data area are rejected at
    /// the codec layer, so build them with the typed helpers below.
    pub fn submit(&self, node_id: u8, command_type: u8, data: Vec<u8>) -> CommandHandle {
        let mut inner = self.inner.lock().expect("queue lock");
        let seq = Self::next_seq_for(&mut inner, node_id);
        let handle = CommandHandle(inner.next_handle);
        inner.next_handle += 1;
        debug!(
            node_id,
            seq,
            name = command_name(command_type),
            "command enqueued"
        );
        inner.queue.push(PendingCommand {
            handle,
            node_id,
            command_type,
            sequence_number: seq,
            data,
            enqueued_at: Instant::now(),
            attempts: 0,
            last_attempt_at: None,
            status: CommandStatus::Pending,
            completed_at: None,
        });
        handle
    }

    /// Current status of a submitted command.
    pub fn status(&self, handle: CommandHandle) -> CommandStatus {
        let inner = self.inner.lock().expect("queue lock");
        inner
            .queue
            .iter()
            .find(|c| c.handle == handle)
            .map(|c| c.status)
            .unwrap_or(CommandStatus::Unknown)
    }

    /// Cancel a command that has not completed yet.
    pub fn cancel(&self, handle: CommandHandle) -> bool {
        let mut inner = self.inner.lock().expect("queue lock");
        match inner
            .queue
            .iter_mut()
            .find(|c| c.handle == handle && c.active())
        {
            Some(cmd) => {
                cmd.status = CommandStatus::Cancelled;
                cmd.completed_at = Some(Instant::now());
                true
            }
            None => false,
        }
    }

    /// The next command due for (re)transmission at `now`, if any.
    ///
    /// A command is due when it has never been attempted, or its last
    /// attempt is older than the retry timeout with budget remaining.
    /// Exhausted commands transition to `TimedOut` here. Only the oldest
    /// active command per node is considered, which serialises delivery
    /// per node.
    pub fn next_due(&self, now: Instant) -> Option<DueCommand> {
        let mut inner = self.inner.lock().expect("queue lock");
        let mut nodes_seen = Vec::new();

        let mut due = None;
        for cmd in inner.queue.iter_mut() {
            if !cmd.active() {
                continue;
            }
            if nodes_seen.contains(&cmd.node_id) {
                // An earlier command to this node is still in flight
                continue;
            }
            nodes_seen.push(cmd.node_id);

            if cmd.attempts == 0 {
                due = Some(cmd.clone());
                break;
            }
            let elapsed = cmd
                .last_attempt_at
                .map(|t| now.saturating_duration_since(t).as_secs())
                .unwrap_or(u64::MAX);
            if elapsed >= COMMAND_RETRY_TIMEOUT_SECS {
                if cmd.attempts >= COMMAND_RETRY_COUNT {
                    warn!(
                        node_id = cmd.node_id,
                        seq = cmd.sequence_number,
                        attempts = cmd.attempts,
                        "command exhausted all retries"
                    );
                    cmd.status = CommandStatus::TimedOut;
                    cmd.completed_at = Some(now);
                    nodes_seen.pop();
                    continue;
                }
                due = Some(cmd.clone());
                break;
            }
        }

        due.map(|cmd| DueCommand {
            handle: cmd.handle,
            node_id: cmd.node_id,
            sequence_number: cmd.sequence_number,
            frame: cmd.raw_packet(),
        })
    }

    /// Record a transmission attempt.
    pub fn mark_sent(&self, handle: CommandHandle, now: Instant) {
        let mut inner = self.inner.lock().expect("queue lock");
        if let Some(cmd) = inner.queue.iter_mut().find(|c| c.handle == handle) {
            cmd.attempts += 1;
            cmd.last_attempt_at = Some(now);
            cmd.status = CommandStatus::InFlight;
            debug!(
                node_id = cmd.node_id,
                seq = cmd.sequence_number,
                attempt = cmd.attempts,
                "command transmitted"
            );
        }
    }

    /// Complete the in-flight command matching `(node_id, seq)`.
    ///
    /// Returns `true` when a matching active entry was found.
    pub fn process_ack(&self, node_id: u8, seq: u8, success: bool, status_code: u8) -> bool {
        let mut inner = self.inner.lock().expect("queue lock");
        let cmd = inner
            .queue
            .iter_mut()
            .find(|c| c.active() && c.node_id == node_id && c.sequence_number == seq);
        match cmd {
            Some(cmd) => {
                if success {
                    info!(node_id, seq, "command acknowledged");
                    cmd.status = CommandStatus::Acked(status_code);
                } else {
                    warn!(node_id, seq, status_code, "command rejected by node");
                    cmd.status = CommandStatus::Nacked(status_code);
                }
                cmd.completed_at = Some(Instant::now());
                true
            }
            None => false,
        }
    }

    /// Apply acknowledgement state piggybacked in a telemetry header.
    ///
    /// A `last_command_seq` of 0 means the node has handled no command.
    pub fn process_piggyback_ack(&self, node_id: u8, last_command_seq: u8, ack_status: u8) {
        if last_command_seq == 0 {
            return;
        }
        self.process_ack(node_id, last_command_seq, ack_status == 0, ack_status);
    }

    /// Active commands targeting `node_id`.
    pub fn pending_for_node(&self, node_id: u8) -> Vec<PendingSummary> {
        let inner = self.inner.lock().expect("queue lock");
        inner
            .queue
            .iter()
            .filter(|c| c.active() && c.node_id == node_id)
            .map(summarise)
            .collect()
    }

    /// All active commands, for the API surface.
    pub fn all_pending(&self) -> Vec<PendingSummary> {
        let inner = self.inner.lock().expect("queue lock");
        inner.queue.iter().filter(|c| c.active()).map(summarise).collect()
    }

    /// Drop every completed entry. Returns the number removed.
    pub fn purge_completed(&self) -> usize {
        let mut inner = self.inner.lock().expect("queue lock");
        let before = inner.queue.len();
        inner.queue.retain(|c| c.active());
        before - inner.queue.len()
    }

    /// Drop completed entries older than `retention`, keeping recent ones
    /// so `status(handle)` stays answerable for a while after completion.
    pub fn purge_stale(&self, now: Instant, retention: std::time::Duration) -> usize {
        let mut inner = self.inner.lock().expect("queue lock");
        let before = inner.queue.len();
        inner.queue.retain(|c| {
            c.active()
                || c.completed_at
                    .map(|t| now.saturating_duration_since(t) < retention)
                    .unwrap_or(true)
        });
        before - inner.queue.len()
    }

    fn next_seq_for(inner: &mut QueueInner, node_id: u8) -> u8 {
        let seq = inner.next_seq.entry(node_id).or_insert(0);
        *seq = if *seq == 255 { 1 } else { *seq + 1 };
        *seq
    }

    // ------------------------------------------------------------------
    // Typed payload helpers
    // ------------------------------------------------------------------

    /// Queue a `CMD_PING`.
    pub fn submit_ping(&self, node_id: u8) -> CommandHandle {
        self.submit(node_id, CommandKind::Ping as u8, Vec::new())
    }

    /// Queue `CMD_SET_INTERVAL` with a little-endian u32 millisecond value.
    pub fn submit_set_interval(&self, node_id: u8, interval_ms: u32) -> CommandHandle {
        self.submit(
            node_id,
            CommandKind::SetInterval as u8,
            interval_ms.to_le_bytes().to_vec(),
        )
    }

    /// Queue `CMD_SET_LOCATION` with NUL-terminated location and zone.
    pub fn submit_set_location(&self, node_id: u8, location: &str, zone: &str) -> CommandHandle {
        let mut data = Vec::new();
        data.extend_from_slice(&location.as_bytes()[..location.len().min(31)]);
        data.push(0);
        data.extend_from_slice(&zone.as_bytes()[..zone.len().min(15)]);
        data.push(0);
        self.submit(node_id, CommandKind::SetLocation as u8, data)
    }

    /// Queue `CMD_SET_TEMP_THRESH` with two little-endian f32s (low, high).
    pub fn submit_set_temp_thresh(&self, node_id: u8, low: f32, high: f32) -> CommandHandle {
        let mut data = low.to_le_bytes().to_vec();
        data.extend_from_slice(&high.to_le_bytes());
        self.submit(node_id, CommandKind::SetTempThresh as u8, data)
    }

    /// Queue `CMD_SET_BATTERY_THRESH` with two f32s (low, critical).
    pub fn submit_set_battery_thresh(
        &self,
        node_id: u8,
        low: f32,
        critical: f32,
    ) -> CommandHandle {
        let mut data = low.to_le_bytes().to_vec();
        data.extend_from_slice(&critical.to_le_bytes());
        self.submit(node_id, CommandKind::SetBatteryThresh as u8, data)
    }

    /// Queue `CMD_SET_MESH_CONFIG` with a single flag byte.
    pub fn submit_set_mesh_config(&self, node_id: u8, enabled: bool) -> CommandHandle {
        self.submit(node_id, CommandKind::SetMeshConfig as u8, vec![enabled as u8])
    }

    /// Queue `CMD_RESTART`.
    pub fn submit_restart(&self, node_id: u8) -> CommandHandle {
        self.submit(node_id, CommandKind::Restart as u8, Vec::new())
    }

    /// Queue `CMD_FACTORY_RESET`.
    pub fn submit_factory_reset(&self, node_id: u8) -> CommandHandle {
        self.submit(node_id, CommandKind::FactoryReset as u8, Vec::new())
    }

    /// Queue `CMD_SET_LORA_PARAMS` (f32 MHz, SF byte, pad, TX power byte).
    pub fn submit_set_lora_params(
        &self,
        node_id: u8,
        frequency: f32,
        spreading_factor: u8,
        tx_power: u8,
    ) -> CommandHandle {
        let mut data = frequency.to_le_bytes().to_vec();
        data.push(spreading_factor);
        data.push(0);
        data.push(tx_power);
        self.submit(node_id, CommandKind::SetLoraParams as u8, data)
    }

    /// Queue `CMD_TIME_SYNC` with epoch (u32) and tz offset minutes (i16).
    pub fn submit_time_sync(&self, node_id: u8, utc_epoch: u32, tz_offset_min: i16) -> CommandHandle {
        let mut data = utc_epoch.to_le_bytes().to_vec();
        data.extend_from_slice(&tz_offset_min.to_le_bytes());
        self.submit(node_id, CommandKind::TimeSync as u8, data)
    }

    /// Queue `CMD_BASE_WELCOME` (time sync payload) for a newly enrolled node.
    pub fn submit_base_welcome(
        &self,
        node_id: u8,
        utc_epoch: u32,
        tz_offset_min: i16,
    ) -> CommandHandle {
        let mut data = utc_epoch.to_le_bytes().to_vec();
        data.extend_from_slice(&tz_offset_min.to_le_bytes());
        self.submit(node_id, CommandKind::BaseWelcome as u8, data)
    }
}

fn summarise(cmd: &PendingCommand) -> PendingSummary {
    PendingSummary {
        handle: cmd.handle,
        node_id: cmd.node_id,
        command_type: cmd.command_type,
        command_name: command_name(cmd.command_type),
        sequence_number: cmd.sequence_number,
        attempts: cmd.attempts,
        status: cmd.status,
        enqueued_at: cmd.enqueued_at,
    }
}

fn command_name(command_type: u8) -> &'static str {
    CommandKind::from_byte(command_type)
        .map(|k| k.name())
        .unwrap_or("CMD_UNKNOWN")
}
