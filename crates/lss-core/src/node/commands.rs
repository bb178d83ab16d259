//! Apply incoming base-station commands to node state.
//!
//! The applier is a pure mapping from a parsed command plus mutable
//! configuration to an updated configuration and a serialised ACK or NACK.
//! Destructive work (reboot, storage wipe) is deferred to the caller as a
//! [`NodeAction`]: the acknowledgement must be on the wire before the node
//! invalidates its own storage or restarts.

use crate::mesh::MeshRouter;
use crate::node::config::{KvStore, NodeConfigStore, LOCATION_TRUNCATE, ZONE_TRUNCATE};
use crate::wire::{build_ack, AckKind, CommandKind, CommandPacket};
use tracing::{debug, warn};

/// Deferred side effect the runtime performs after the ACK transmits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAction {
    /// Nothing further.
    None,
    /// Reboot the node.
    Restart,
    /// Wipe persistent configuration, then reboot.
    FactoryReset,
}

/// Result of applying one command.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// Serialised ACK (status 0) or NACK (status 1), sequence number
    /// echoing the command's.
    pub response: Vec<u8>,
    /// Status carried in the response: 0 success, 1 failure.
    pub status: u8,
    /// Work to perform after the response is transmitted.
    pub action: NodeAction,
}

/// Decode and apply a received command.
///
/// The frame's sync word and CRC are already verified; addressing is the
/// caller's concern. Accepted mutations are persisted before the ACK is
/// produced; a failed save turns the ACK into a NACK and leaves the loop
/// running.
pub fn apply_command<S: KvStore>(
    pkt: &CommandPacket,
    store: &mut NodeConfigStore<S>,
    mesh: &mut MeshRouter,
) -> CommandOutcome {
    let node_id = store.config().node_id;
    let seq = pkt.sequence_number;
    let mut action = NodeAction::None;

    let ok = match pkt.kind() {
        Some(CommandKind::Ping) => true,

        // Reserved: a future payload could return the config record
        Some(CommandKind::GetConfig) => true,

        Some(CommandKind::SetInterval) => match read_u32(&pkt.data, 0) {
            Some(interval) if (1000..=3_600_000).contains(&interval) => {
                store.config_mut().telemetry_interval_ms = interval;
                persist(store)
            }
            Some(interval) => {
                warn!(interval, "rejected out-of-range telemetry interval");
                false
            }
            None => false,
        },

        Some(CommandKind::SetLocation) => {
            let (location, zone) = split_location_zone(&pkt.data);
            store.config_mut().location = location;
            if let Some(zone) = zone {
                store.config_mut().zone = zone;
            }
            persist(store)
        }

        Some(CommandKind::SetTempThresh) => {
            match (read_f32(&pkt.data, 0), read_f32(&pkt.data, 4)) {
                (Some(low), Some(high)) => {
                    store.config_mut().temp_thresh_low = low;
                    store.config_mut().temp_thresh_high = high;
                    persist(store)
                }
                _ => false,
            }
        }

        Some(CommandKind::SetBatteryThresh) => {
            match (read_f32(&pkt.data, 0), read_f32(&pkt.data, 4)) {
                (Some(low), Some(critical)) => {
                    store.config_mut().battery_thresh_low = low;
                    store.config_mut().battery_thresh_critical = critical;
                    persist(store)
                }
                _ => false,
            }
        }

        Some(CommandKind::SetMeshConfig) => match pkt.data.first() {
            Some(&flag) => {
                let enabled = flag != 0;
                store.config_mut().mesh_enabled = enabled;
                mesh.set_enabled(enabled);
                persist(store)
            }
            None => false,
        },

        Some(CommandKind::Restart) => {
            action = NodeAction::Restart;
            true
        }

        Some(CommandKind::FactoryReset) => {
            action = NodeAction::FactoryReset;
            true
        }

        Some(CommandKind::SetLoraParams) => match read_f32(&pkt.data, 0) {
            Some(freq) if pkt.data.len() >= 7 => {
                store.config_mut().lora_frequency = freq;
                store.config_mut().lora_spreading_factor = pkt.data[4];
                store.config_mut().lora_tx_power = pkt.data[6];
                // Radio params take effect on next boot
                persist(store)
            }
            _ => false,
        },

        Some(CommandKind::TimeSync) | Some(CommandKind::BaseWelcome) => {
            match read_u32(&pkt.data, 0) {
                Some(epoch) if pkt.data.len() >= 6 => {
                    let tz = i16::from_le_bytes([pkt.data[4], pkt.data[5]]);
                    store.config_mut().last_time_sync = epoch;
                    store.config_mut().tz_offset_minutes = tz as i32;
                    persist(store)
                }
                _ => false,
            }
        }

        // ACK/NACK/announce codes are never node-addressed commands
        _ => {
            debug!(code = pkt.command_type, "unknown command code");
            false
        }
    };

    let (response, status) = if ok {
        (build_ack(AckKind::Ack, node_id, seq, 0x00), 0x00)
    } else {
        (build_ack(AckKind::Nack, node_id, seq, 0x01), 0x01)
    };

    CommandOutcome {
        response,
        status,
        action,
    }
}

fn persist<S: KvStore>(store: &mut NodeConfigStore<S>) -> bool {
    match store.save() {
        Ok(()) => true,
        Err(e) => {
            warn!("config save failed: {e}");
            false
        }
    }
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
}

fn read_f32(data: &[u8], offset: usize) -> Option<f32> {
    data.get(offset..offset + 4)
        .map(|b| f32::from_le_bytes(b.try_into().unwrap()))
}

/// Split a `SET_LOCATION` payload: NUL-terminated location, then
/// NUL-terminated zone. Both truncate to their field capacities; a missing
/// zone leaves the stored one alone.
fn split_location_zone(data: &[u8]) -> (String, Option<String>) {
    let loc_end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    let location = lossy_truncated(&data[..loc_end], LOCATION_TRUNCATE);

    let zone = data.get(loc_end + 1..).and_then(|rest| {
        let zone_end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        if zone_end == 0 {
            None
        } else {
            Some(lossy_truncated(&rest[..zone_end], ZONE_TRUNCATE))
        }
    });

    (location, zone)
}

fn lossy_truncated(bytes: &[u8], max: usize) -> String {
    String::from_utf8_lossy(&bytes[..bytes.len().min(max)]).into_owned()
}
