//! LSS wire protocol: frame families, codec, and CRC.
//!
//! Every frame exchanged between a client node and the base station belongs
//! to one of four families, classified by the leading 16-bit sync word
//! (little-endian, like every multi-byte field on the wire):
//!
//! | Family                 | Sync     | Discriminant                     |
//! |------------------------|----------|----------------------------------|
//! | Legacy telemetry (v1)  | `0x1234` | none                             |
//! | Multi-sensor telemetry | `0xABCD` | `packet_type = 1`                |
//! | Command                | `0xCDEF` | `command_type` not ACK/NACK      |
//! | Acknowledgement        | `0xCDEF` | `command_type` `0xA0` or `0xA1`  |
//!
//! All structs are packed: the only padding is the single explicit pad byte
//! in the telemetry header and in command/ACK frames. Checked frames carry a
//! trailing CRC-16/CCITT-FALSE; a frame that fails length, sync, or CRC
//! validation is discarded without side effects.

pub mod command;
pub mod crc;
pub mod telemetry;

pub use command::{
    build_ack, AckKind, AckPacket, CommandKind, CommandPacket, ACK_PACKET_SIZE,
    COMMAND_DATA_CAPACITY, COMMAND_PACKET_SIZE,
};
pub use crc::crc16;
pub use telemetry::{
    LegacyPacket, MultiSensorPacket, SensorValue, ValueKind, LEGACY_PACKET_SIZE,
    MAX_SENSOR_VALUES, MULTI_SENSOR_HEADER_SIZE, SENSOR_VALUE_SIZE,
};

use thiserror::Error;

/// Legacy v1 telemetry sync word.
pub const SYNC_LEGACY: u16 = 0x1234;
/// Multi-sensor telemetry sync word.
pub const SYNC_MULTI_SENSOR: u16 = 0xABCD;
/// Command / acknowledgement sync word.
pub const SYNC_COMMAND: u16 = 0xCDEF;

/// The coordinator / base station node id.
pub const BASE_STATION_ID: u8 = 0;
/// Broadcast node id.
pub const NODE_ID_BROADCAST: u8 = 255;

/// Derive the PHY-layer radio sync word from the network id.
///
/// Distinct from the application sync words above: this seeds the radio so
/// co-located networks ignore each other's transmissions. Both sides must
/// derive it from the same `network_id`.
pub fn radio_sync_word(network_id: u16) -> u8 {
    0x12 + (network_id % 244) as u8
}

/// Errors surfaced by the frame codec.
///
/// Codec failures never panic and never mutate caller state; a failed parse
/// leaves nothing but this value behind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// The buffer is shorter than the frame it claims to hold.
    #[error("buffer too short ({have} bytes, need {need})")]
    ShortBuffer { have: usize, need: usize },

    /// The leading sync word does not match the expected family.
    #[error("sync word mismatch (got 0x{0:04X})")]
    SyncMismatch(u16),

    /// The trailing CRC does not match the computed one.
    #[error("CRC mismatch (got 0x{got:04X}, want 0x{want:04X})")]
    CrcMismatch { got: u16, want: u16 },

    /// The telemetry header claims more value entries than a frame may carry.
    #[error("value count {0} exceeds maximum 16")]
    TooManyValues(u8),

    /// A command payload exceeds the fixed data area.
    #[error("command data too long ({0} > 192 bytes)")]
    DataTooLong(usize),
}

/// Frame families distinguishable from a raw buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Legacy v1 telemetry.
    Legacy,
    /// Multi-sensor telemetry.
    MultiSensor,
    /// Base-station command.
    Command,
    /// ACK / NACK response.
    Ack,
}

/// Classify a raw buffer by its sync word.
///
/// Reads the first two bytes as a little-endian u16. `0xCDEF` frames are
/// disambiguated into command vs acknowledgement by the command-type byte.
/// Returns `None` when the buffer is unclassifiable; full validation
/// (length, CRC) is left to the family-specific parser.
pub fn detect_frame(buf: &[u8]) -> Option<FrameKind> {
    if buf.len() < 2 {
        return None;
    }
    let sync = u16::from_le_bytes([buf[0], buf[1]]);
    match sync {
        SYNC_LEGACY if buf.len() >= LEGACY_PACKET_SIZE => Some(FrameKind::Legacy),
        SYNC_MULTI_SENSOR => Some(FrameKind::MultiSensor),
        SYNC_COMMAND => {
            if buf.len() >= 3
                && (buf[2] == CommandKind::Ack as u8 || buf[2] == CommandKind::Nack as u8)
            {
                Some(FrameKind::Ack)
            } else {
                Some(FrameKind::Command)
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_multi_sensor() {
        let buf = [0xCD, 0xAB, 0x01, 0x05];
        assert_eq!(detect_frame(&buf), Some(FrameKind::MultiSensor));
    }

    #[test]
    fn test_detect_command_vs_ack() {
        let cmd = [0xEF, 0xCD, 0x02, 0x07];
        assert_eq!(detect_frame(&cmd), Some(FrameKind::Command));

        let ack = [0xEF, 0xCD, 0xA0, 0x07];
        assert_eq!(detect_frame(&ack), Some(FrameKind::Ack));

        let nack = [0xEF, 0xCD, 0xA1, 0x07];
        assert_eq!(detect_frame(&nack), Some(FrameKind::Ack));
    }

    #[test]
    fn test_detect_legacy_requires_full_frame() {
        // Sync word alone is not enough for the uncheckable legacy family
        let short = [0x34, 0x12, 0x00];
        assert_eq!(detect_frame(&short), None);

        let mut full = [0u8; LEGACY_PACKET_SIZE];
        full[0] = 0x34;
        full[1] = 0x12;
        assert_eq!(detect_frame(&full), Some(FrameKind::Legacy));
    }

    #[test]
    fn test_detect_unknown() {
        assert_eq!(detect_frame(&[0x00, 0x00, 0x00]), None);
        assert_eq!(detect_frame(&[0xCD]), None);
        assert_eq!(detect_frame(&[]), None);
    }

    #[test]
    fn test_radio_sync_word() {
        assert_eq!(radio_sync_word(1), 0x13);
        assert_eq!(radio_sync_word(0), 0x12);
        // Wraps within the usable sync word range
        assert_eq!(radio_sync_word(244), 0x12);
    }
}
