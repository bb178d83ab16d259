//! Command and acknowledgement frames.
//!
//! Both families share the `0xCDEF` sync word, a fixed 192-byte data area
//! (only the first `data_length` bytes are meaningful) and a trailing CRC
//! over every preceding byte. The command-type byte disambiguates:
//! `0xA0`/`0xA1` are ACK/NACK, every other code is a command.
//!
//! ```text
//! Command (201 bytes)            ACK / NACK (202 bytes)
//! ------  ----  -----            ------  ----  -----
//! 0x00    2     sync (0xCDEF)    0x00    2     sync (0xCDEF)
//! 0x02    1     command type     0x02    1     command type (0xA0/0xA1)
//! 0x03    1     target node id   0x03    1     responding node id
//! 0x04    1     sequence number  0x04    1     sequence number
//! 0x05    1     data length      0x05    1     status code
//! 0x06    1     pad              0x06    1     data length
//!                                0x07    1     pad
//! 0x07    192   data area        0x08    192   data area
//! 0xC7    2     CRC              0xC8    2     CRC
//! ```

use super::{crc16, WireError, SYNC_COMMAND};
use serde::{Deserialize, Serialize};

/// Total serialised size of a command frame.
pub const COMMAND_PACKET_SIZE: usize = 201;
/// Total serialised size of an ACK/NACK frame.
pub const ACK_PACKET_SIZE: usize = 202;
/// Capacity of the fixed data area in both layouts.
pub const COMMAND_DATA_CAPACITY: usize = 192;

/// Command codes understood by client nodes and the base station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandKind {
    /// Liveness probe; always ACKed.
    Ping = 0x00,
    /// Reserved; ACKed with no payload.
    GetConfig = 0x01,
    /// Set the telemetry interval (u32 milliseconds).
    SetInterval = 0x02,
    /// Set location and zone strings (both NUL-terminated).
    SetLocation = 0x03,
    /// Set temperature alert thresholds (f32 low, f32 high).
    SetTempThresh = 0x04,
    /// Set battery alert thresholds (f32 low, f32 critical).
    SetBatteryThresh = 0x05,
    /// Enable or disable mesh participation (u8 flag).
    SetMeshConfig = 0x06,
    /// ACK, then reboot.
    Restart = 0x07,
    /// ACK, then wipe persistent config and reboot.
    FactoryReset = 0x08,
    /// Set LoRa radio parameters; effective on next boot.
    SetLoraParams = 0x09,
    /// Update the node clock (u32 epoch, i16 tz offset minutes).
    TimeSync = 0x0A,
    /// Broadcast by a node at boot to enrol with the base station.
    SensorAnnounce = 0x0B,
    /// Base station's reply to an announce; same payload as TimeSync.
    BaseWelcome = 0x0C,
    /// Positive acknowledgement.
    Ack = 0xA0,
    /// Negative acknowledgement.
    Nack = 0xA1,
}

impl CommandKind {
    /// Decode a command-type byte; `None` for unknown codes.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(CommandKind::Ping),
            0x01 => Some(CommandKind::GetConfig),
            0x02 => Some(CommandKind::SetInterval),
            0x03 => Some(CommandKind::SetLocation),
            0x04 => Some(CommandKind::SetTempThresh),
            0x05 => Some(CommandKind::SetBatteryThresh),
            0x06 => Some(CommandKind::SetMeshConfig),
            0x07 => Some(CommandKind::Restart),
            0x08 => Some(CommandKind::FactoryReset),
            0x09 => Some(CommandKind::SetLoraParams),
            0x0A => Some(CommandKind::TimeSync),
            0x0B => Some(CommandKind::SensorAnnounce),
            0x0C => Some(CommandKind::BaseWelcome),
            0xA0 => Some(CommandKind::Ack),
            0xA1 => Some(CommandKind::Nack),
            _ => None,
        }
    }

    /// Human-readable name for logs and the CLI.
    pub fn name(self) -> &'static str {
        match self {
            CommandKind::Ping => "CMD_PING",
            CommandKind::GetConfig => "CMD_GET_CONFIG",
            CommandKind::SetInterval => "CMD_SET_INTERVAL",
            CommandKind::SetLocation => "CMD_SET_LOCATION",
            CommandKind::SetTempThresh => "CMD_SET_TEMP_THRESH",
            CommandKind::SetBatteryThresh => "CMD_SET_BATTERY_THRESH",
            CommandKind::SetMeshConfig => "CMD_SET_MESH_CONFIG",
            CommandKind::Restart => "CMD_RESTART",
            CommandKind::FactoryReset => "CMD_FACTORY_RESET",
            CommandKind::SetLoraParams => "CMD_SET_LORA_PARAMS",
            CommandKind::TimeSync => "CMD_TIME_SYNC",
            CommandKind::SensorAnnounce => "CMD_SENSOR_ANNOUNCE",
            CommandKind::BaseWelcome => "CMD_BASE_WELCOME",
            CommandKind::Ack => "CMD_ACK",
            CommandKind::Nack => "CMD_NACK",
        }
    }
}

/// Parsed command frame (base station → node).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPacket {
    /// Raw command-type byte; unknown codes are preserved so the node can
    /// NACK them with the original sequence number.
    pub command_type: u8,
    /// Destination node id; 255 addresses every node.
    pub target_sensor_id: u8,
    /// Monotonic counter for ACK correlation.
    pub sequence_number: u8,
    /// Meaningful payload bytes (at most [`COMMAND_DATA_CAPACITY`]).
    pub data: Vec<u8>,
}

impl CommandPacket {
    /// Build a command for a known code.
    pub fn new(kind: CommandKind, target: u8, seq: u8, data: Vec<u8>) -> Self {
        Self {
            command_type: kind as u8,
            target_sensor_id: target,
            sequence_number: seq,
            data,
        }
    }

    /// Decode the command-type byte, if the code is known.
    pub fn kind(&self) -> Option<CommandKind> {
        CommandKind::from_byte(self.command_type)
    }

    /// Serialise to the fixed 201-byte wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        if self.data.len() > COMMAND_DATA_CAPACITY {
            return Err(WireError::DataTooLong(self.data.len()));
        }
        let mut buf = Vec::with_capacity(COMMAND_PACKET_SIZE);
        buf.extend_from_slice(&SYNC_COMMAND.to_le_bytes());
        buf.push(self.command_type);
        buf.push(self.target_sensor_id);
        buf.push(self.sequence_number);
        buf.push(self.data.len() as u8);
        buf.push(0); // pad
        buf.extend_from_slice(&self.data);
        buf.resize(COMMAND_PACKET_SIZE - 2, 0);
        let crc = crc16(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Parse a command frame; fixed total size, CRC over all preceding bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        check_fixed_frame(buf, COMMAND_PACKET_SIZE)?;
        let data_len = (buf[5] as usize).min(COMMAND_DATA_CAPACITY);
        Ok(Self {
            command_type: buf[2],
            target_sensor_id: buf[3],
            sequence_number: buf[4],
            data: buf[7..7 + data_len].to_vec(),
        })
    }
}

/// ACK / NACK disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckKind {
    /// Command applied successfully.
    Ack,
    /// Command rejected or failed.
    Nack,
}

impl AckKind {
    fn command_byte(self) -> u8 {
        match self {
            AckKind::Ack => CommandKind::Ack as u8,
            AckKind::Nack => CommandKind::Nack as u8,
        }
    }
}

/// Parsed acknowledgement frame (node → base station).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckPacket {
    /// ACK or NACK.
    pub kind: AckKind,
    /// Responding node id.
    pub sensor_id: u8,
    /// Echoes the originating command's sequence number.
    pub sequence_number: u8,
    /// 0 = success; non-zero = implementation-defined error.
    pub status_code: u8,
    /// Optional response payload.
    pub data: Vec<u8>,
}

impl AckPacket {
    /// True for a positive acknowledgement.
    pub fn is_success(&self) -> bool {
        self.kind == AckKind::Ack
    }

    /// Serialise to the fixed 202-byte wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        if self.data.len() > COMMAND_DATA_CAPACITY {
            return Err(WireError::DataTooLong(self.data.len()));
        }
        let mut buf = Vec::with_capacity(ACK_PACKET_SIZE);
        buf.extend_from_slice(&SYNC_COMMAND.to_le_bytes());
        buf.push(self.kind.command_byte());
        buf.push(self.sensor_id);
        buf.push(self.sequence_number);
        buf.push(self.status_code);
        buf.push(self.data.len() as u8);
        buf.push(0); // pad
        buf.extend_from_slice(&self.data);
        buf.resize(ACK_PACKET_SIZE - 2, 0);
        let crc = crc16(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Parse an acknowledgement frame.
    ///
    /// Fails with [`WireError::SyncMismatch`] when the command-type byte is
    /// neither `CMD_ACK` nor `CMD_NACK`.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        check_fixed_frame(buf, ACK_PACKET_SIZE)?;
        let kind = match CommandKind::from_byte(buf[2]) {
            Some(CommandKind::Ack) => AckKind::Ack,
            Some(CommandKind::Nack) => AckKind::Nack,
            _ => return Err(WireError::SyncMismatch(SYNC_COMMAND)),
        };
        let data_len = (buf[6] as usize).min(COMMAND_DATA_CAPACITY);
        Ok(Self {
            kind,
            sensor_id: buf[3],
            sequence_number: buf[4],
            status_code: buf[5],
            data: buf[8..8 + data_len].to_vec(),
        })
    }
}

/// Build and serialise an ACK or NACK with an empty data area.
pub fn build_ack(kind: AckKind, sensor_id: u8, seq: u8, status_code: u8) -> Vec<u8> {
    let pkt = AckPacket {
        kind,
        sensor_id,
        sequence_number: seq,
        status_code,
        data: Vec::new(),
    };
    // Serialisation of an empty data area cannot fail
    pkt.to_bytes().expect("empty ack serialises")
}

/// Validate length, sync word and CRC of a fixed-size frame.
fn check_fixed_frame(buf: &[u8], size: usize) -> Result<(), WireError> {
    if buf.len() < size {
        return Err(WireError::ShortBuffer {
            have: buf.len(),
            need: size,
        });
    }
    let sync = u16::from_le_bytes([buf[0], buf[1]]);
    if sync != SYNC_COMMAND {
        return Err(WireError::SyncMismatch(sync));
    }
    let got = u16::from_le_bytes([buf[size - 2], buf[size - 1]]);
    let want = crc16(&buf[..size - 2]);
    if got != want {
        return Err(WireError::CrcMismatch { got, want });
    }
    Ok(())
}
