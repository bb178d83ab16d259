//! Telemetry frames: multi-sensor (current) and legacy v1 (parse only).
//!
//! A multi-sensor frame is a 60-byte header followed by up to sixteen
//! 5-byte value entries and a trailing CRC over everything before it:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0x00    2     sync word (0xABCD)
//! 0x02    2     network id
//! 0x04    1     packet type (1)
//! 0x05    1     sensor id (node id, 1-254)
//! 0x06    1     value count (<= 16)
//! 0x07    1     battery percent
//! 0x08    1     power state (0 discharging, 1 charging)
//! 0x09    1     last command seq (piggybacked ACK)
//! 0x0A    1     ack status (0 success)
//! 0x0B    1     pad
//! 0x0C    32    location (NUL-terminated)
//! 0x2C    16    zone (NUL-terminated)
//! 0x3C    5*n   value entries: type tag (1) + float32 (4)
//! ...     2     CRC-16/CCITT-FALSE over header + values
//! ```

use super::{crc16, WireError, SYNC_LEGACY, SYNC_MULTI_SENSOR};
use serde::{Deserialize, Serialize};

/// Serialised size of the multi-sensor header.
pub const MULTI_SENSOR_HEADER_SIZE: usize = 60;
/// Serialised size of one value entry (type tag + float32).
pub const SENSOR_VALUE_SIZE: usize = 5;
/// Maximum value entries per multi-sensor frame.
pub const MAX_SENSOR_VALUES: usize = 16;
/// Serialised size of a legacy v1 telemetry frame.
pub const LEGACY_PACKET_SIZE: usize = 19;

/// Capacity of the location field, including the NUL terminator.
pub const LOCATION_CAPACITY: usize = 32;
/// Capacity of the zone field, including the NUL terminator.
pub const ZONE_CAPACITY: usize = 16;

/// On-wire packet type carried in the multi-sensor header.
const PACKET_TYPE_MULTI_SENSOR: u8 = 1;

/// Measurement type tag carried with every telemetry value.
///
/// Unknown tags are preserved as [`ValueKind::Unknown`] so that a parsed
/// frame re-serialises bit-identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// Temperature in degrees Celsius
    Temperature,
    /// Relative humidity in %RH
    Humidity,
    /// Barometric pressure in hPa
    Pressure,
    /// Illuminance in lux
    Light,
    /// Voltage in volts
    Voltage,
    /// Current in milliamps
    Current,
    /// Power in milliwatts
    Power,
    /// Energy in watt-hours
    Energy,
    /// Gas resistance in ohms
    GasResistance,
    /// Battery level in percent
    Battery,
    /// Signal strength in dBm
    SignalStrength,
    /// Soil/material moisture in percent
    Moisture,
    /// Unitless generic value
    Generic,
    /// Thermistor temperature in degrees Celsius
    ThermistorTemperature,
    /// Tag not in the table; kept verbatim for round-tripping
    Unknown(u8),
}

impl ValueKind {
    /// Decode a wire tag.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => ValueKind::Temperature,
            1 => ValueKind::Humidity,
            2 => ValueKind::Pressure,
            3 => ValueKind::Light,
            4 => ValueKind::Voltage,
            5 => ValueKind::Current,
            6 => ValueKind::Power,
            7 => ValueKind::Energy,
            8 => ValueKind::GasResistance,
            9 => ValueKind::Battery,
            10 => ValueKind::SignalStrength,
            11 => ValueKind::Moisture,
            12 => ValueKind::Generic,
            13 => ValueKind::ThermistorTemperature,
            other => ValueKind::Unknown(other),
        }
    }

    /// Encode to the wire tag.
    pub fn to_byte(self) -> u8 {
        match self {
            ValueKind::Temperature => 0,
            ValueKind::Humidity => 1,
            ValueKind::Pressure => 2,
            ValueKind::Light => 3,
            ValueKind::Voltage => 4,
            ValueKind::Current => 5,
            ValueKind::Power => 6,
            ValueKind::Energy => 7,
            ValueKind::GasResistance => 8,
            ValueKind::Battery => 9,
            ValueKind::SignalStrength => 10,
            ValueKind::Moisture => 11,
            ValueKind::Generic => 12,
            ValueKind::ThermistorTemperature => 13,
            ValueKind::Unknown(other) => other,
        }
    }

    /// Short machine-readable name (dashboard / MQTT topic key).
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Temperature => "temperature",
            ValueKind::Humidity => "humidity",
            ValueKind::Pressure => "pressure",
            ValueKind::Light => "light",
            ValueKind::Voltage => "voltage",
            ValueKind::Current => "current",
            ValueKind::Power => "power",
            ValueKind::Energy => "energy",
            ValueKind::GasResistance => "gas_resistance",
            ValueKind::Battery => "battery",
            ValueKind::SignalStrength => "signal_strength",
            ValueKind::Moisture => "moisture",
            ValueKind::Generic => "generic",
            ValueKind::ThermistorTemperature => "thermistor_temperature",
            ValueKind::Unknown(_) => "unknown",
        }
    }

    /// Display unit for this measurement type.
    pub fn unit(self) -> &'static str {
        match self {
            ValueKind::Temperature | ValueKind::ThermistorTemperature => "°C",
            ValueKind::Humidity => "%RH",
            ValueKind::Pressure => "hPa",
            ValueKind::Light => "lx",
            ValueKind::Voltage => "V",
            ValueKind::Current => "mA",
            ValueKind::Power => "mW",
            ValueKind::Energy => "Wh",
            ValueKind::GasResistance => "Ω",
            ValueKind::Battery | ValueKind::Moisture => "%",
            ValueKind::SignalStrength => "dBm",
            ValueKind::Generic | ValueKind::Unknown(_) => "",
        }
    }
}

/// A single typed measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorValue {
    /// Measurement type tag.
    pub kind: ValueKind,
    /// Measured value.
    pub value: f32,
}

impl SensorValue {
    /// Create a new measurement.
    pub fn new(kind: ValueKind, value: f32) -> Self {
        Self { kind, value }
    }
}

/// Parsed multi-sensor telemetry frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiSensorPacket {
    /// Network identifier (must match the base station).
    pub network_id: u16,
    /// Originating node id (1-254).
    pub sensor_id: u8,
    /// Battery level, 0-100.
    pub battery_percent: u8,
    /// 0 = discharging, 1 = charging.
    pub power_state: u8,
    /// Sequence number of the most recently handled command (0 = none).
    pub last_command_seq: u8,
    /// Status of that command: 0 success, non-zero error.
    pub ack_status: u8,
    /// Human-readable placement, truncated to 31 bytes on the wire.
    pub location: String,
    /// Grouping zone, truncated to 15 bytes on the wire.
    pub zone: String,
    /// Up to [`MAX_SENSOR_VALUES`] measurements.
    pub values: Vec<SensorValue>,
}

impl MultiSensorPacket {
    /// Serialised size of this packet.
    pub fn wire_size(&self) -> usize {
        MULTI_SENSOR_HEADER_SIZE + self.values.len() * SENSOR_VALUE_SIZE + 2
    }

    /// Serialise to wire bytes: header, value entries, trailing CRC.
    ///
    /// Fails if the packet carries more than [`MAX_SENSOR_VALUES`] entries.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        if self.values.len() > MAX_SENSOR_VALUES {
            return Err(WireError::TooManyValues(self.values.len() as u8));
        }

        let mut buf = Vec::with_capacity(self.wire_size());
        buf.extend_from_slice(&SYNC_MULTI_SENSOR.to_le_bytes());
        buf.extend_from_slice(&self.network_id.to_le_bytes());
        buf.push(PACKET_TYPE_MULTI_SENSOR);
        buf.push(self.sensor_id);
        buf.push(self.values.len() as u8);
        buf.push(self.battery_percent);
        buf.push(self.power_state);
        buf.push(self.last_command_seq);
        buf.push(self.ack_status);
        buf.push(0); // pad
        push_fixed_str(&mut buf, &self.location, LOCATION_CAPACITY);
        push_fixed_str(&mut buf, &self.zone, ZONE_CAPACITY);

        for value in &self.values {
            buf.push(value.kind.to_byte());
            buf.extend_from_slice(&value.value.to_le_bytes());
        }

        let crc = crc16(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Parse a multi-sensor frame.
    ///
    /// Fails on short buffer, sync mismatch, oversized value count, or CRC
    /// mismatch; trailing bytes beyond the CRC are ignored.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < MULTI_SENSOR_HEADER_SIZE + 2 {
            return Err(WireError::ShortBuffer {
                have: buf.len(),
                need: MULTI_SENSOR_HEADER_SIZE + 2,
            });
        }

        let sync = u16::from_le_bytes([buf[0], buf[1]]);
        if sync != SYNC_MULTI_SENSOR {
            return Err(WireError::SyncMismatch(sync));
        }

        let value_count = buf[6] as usize;
        if value_count > MAX_SENSOR_VALUES {
            return Err(WireError::TooManyValues(value_count as u8));
        }

        let payload_end = MULTI_SENSOR_HEADER_SIZE + value_count * SENSOR_VALUE_SIZE;
        if buf.len() < payload_end + 2 {
            return Err(WireError::ShortBuffer {
                have: buf.len(),
                need: payload_end + 2,
            });
        }

        let got = u16::from_le_bytes([buf[payload_end], buf[payload_end + 1]]);
        let want = crc16(&buf[..payload_end]);
        if got != want {
            return Err(WireError::CrcMismatch { got, want });
        }

        let mut values = Vec::with_capacity(value_count);
        let mut offset = MULTI_SENSOR_HEADER_SIZE;
        for _ in 0..value_count {
            let kind = ValueKind::from_byte(buf[offset]);
            let value = f32::from_le_bytes([
                buf[offset + 1],
                buf[offset + 2],
                buf[offset + 3],
                buf[offset + 4],
            ]);
            values.push(SensorValue { kind, value });
            offset += SENSOR_VALUE_SIZE;
        }

        Ok(Self {
            network_id: u16::from_le_bytes([buf[2], buf[3]]),
            sensor_id: buf[5],
            battery_percent: buf[7],
            power_state: buf[8],
            last_command_seq: buf[9],
            ack_status: buf[10],
            location: parse_fixed_str(&buf[12..12 + LOCATION_CAPACITY]),
            zone: parse_fixed_str(&buf[44..44 + ZONE_CAPACITY]),
            values,
        })
    }
}

/// Parsed legacy v1 telemetry frame.
///
/// Nodes no longer emit this format; the base station still parses it.
/// Legacy frames carry no checksum, so the sync word is the only guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyPacket {
    pub sensor_id: u8,
    pub network_id: u16,
    pub temperature: f32,
    pub humidity: f32,
    pub battery_percent: u8,
    /// Last-hop RSSI in dBm as reported by the node itself.
    pub rssi: i8,
    /// Last-hop SNR in dB as reported by the node itself.
    pub snr: f32,
}

impl LegacyPacket {
    /// Parse a legacy v1 frame.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < LEGACY_PACKET_SIZE {
            return Err(WireError::ShortBuffer {
                have: buf.len(),
                need: LEGACY_PACKET_SIZE,
            });
        }
        let sync = u16::from_le_bytes([buf[0], buf[1]]);
        if sync != SYNC_LEGACY {
            return Err(WireError::SyncMismatch(sync));
        }
        Ok(Self {
            sensor_id: buf[2],
            network_id: u16::from_le_bytes([buf[3], buf[4]]),
            temperature: f32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]),
            humidity: f32::from_le_bytes([buf[9], buf[10], buf[11], buf[12]]),
            battery_percent: buf[13],
            rssi: buf[14] as i8,
            snr: f32::from_le_bytes([buf[15], buf[16], buf[17], buf[18]]),
        })
    }
}

/// Append `s` as a NUL-terminated field of exactly `capacity` bytes.
///
/// Strings longer than `capacity - 1` bytes are truncated; the terminator
/// is always present.
fn push_fixed_str(buf: &mut Vec<u8>, s: &str, capacity: usize) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(capacity - 1);
    buf.extend_from_slice(&bytes[..len]);
    buf.resize(buf.len() + (capacity - len), 0);
}

/// Read a NUL-terminated field out of a fixed-size region.
fn parse_fixed_str(region: &[u8]) -> String {
    let end = region.iter().position(|&b| b == 0).unwrap_or(region.len());
    String::from_utf8_lossy(&region[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet() -> MultiSensorPacket {
        MultiSensorPacket {
            network_id: 1,
            sensor_id: 5,
            battery_percent: 85,
            power_state: 0,
            last_command_seq: 0,
            ack_status: 0,
            location: "Shed".to_string(),
            zone: "Outdoor".to_string(),
            values: vec![
                SensorValue::new(ValueKind::Temperature, 19.5),
                SensorValue::new(ValueKind::Humidity, 62.0),
            ],
        }
    }

    #[test]
    fn test_header_size() {
        let pkt = MultiSensorPacket {
            values: Vec::new(),
            ..sample_packet()
        };
        let bytes = pkt.to_bytes().unwrap();
        assert_eq!(bytes.len(), MULTI_SENSOR_HEADER_SIZE + 2);
    }

    #[test]
    fn test_roundtrip() {
        let pkt = sample_packet();
        let bytes = pkt.to_bytes().unwrap();
        assert_eq!(bytes.len(), MULTI_SENSOR_HEADER_SIZE + 2 * SENSOR_VALUE_SIZE + 2);

        let parsed = MultiSensorPacket::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.network_id, 1);
        assert_eq!(parsed.sensor_id, 5);
        assert_eq!(parsed.battery_percent, 85);
        assert_eq!(parsed.location, "Shed");
        assert_eq!(parsed.zone, "Outdoor");
        assert_eq!(parsed.values.len(), 2);
        assert_eq!(parsed.values[0].kind, ValueKind::Temperature);
        assert!((parsed.values[0].value - 19.5).abs() < 1e-3);
        assert_eq!(parsed.values[1].kind, ValueKind::Humidity);
        assert!((parsed.values[1].value - 62.0).abs() < 1e-3);
        assert_eq!(parsed, pkt);
    }

    #[test]
    fn test_reserialise_preserves_crc() {
        let bytes = sample_packet().to_bytes().unwrap();
        let parsed = MultiSensorPacket::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_crc_corruption_rejected() {
        let bytes = sample_packet().to_bytes().unwrap();
        // Flip every bit of the trailing CRC in turn
        for bit in 0..16 {
            let mut corrupt = bytes.clone();
            let idx = corrupt.len() - 2 + bit / 8;
            corrupt[idx] ^= 1 << (bit % 8);
            assert!(matches!(
                MultiSensorPacket::from_bytes(&corrupt),
                Err(WireError::CrcMismatch { .. })
            ));
        }
    }

    #[test]
    fn test_payload_corruption_rejected() {
        let mut bytes = sample_packet().to_bytes().unwrap();
        bytes[7] ^= 0x01; // battery percent
        assert!(matches!(
            MultiSensorPacket::from_bytes(&bytes),
            Err(WireError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_sync_mismatch() {
        let mut bytes = sample_packet().to_bytes().unwrap();
        bytes[0] = 0x00;
        assert!(matches!(
            MultiSensorPacket::from_bytes(&bytes),
            Err(WireError::SyncMismatch(_))
        ));
    }

    #[test]
    fn test_short_buffer() {
        let bytes = sample_packet().to_bytes().unwrap();
        assert!(matches!(
            MultiSensorPacket::from_bytes(&bytes[..10]),
            Err(WireError::ShortBuffer { .. })
        ));
        // Header claims two values but the buffer stops after one
        assert!(matches!(
            MultiSensorPacket::from_bytes(&bytes[..MULTI_SENSOR_HEADER_SIZE + SENSOR_VALUE_SIZE]),
            Err(WireError::ShortBuffer { .. })
        ));
    }

    #[test]
    fn test_oversized_value_count_rejected() {
        let mut bytes = sample_packet().to_bytes().unwrap();
        bytes[6] = 17;
        assert!(matches!(
            MultiSensorPacket::from_bytes(&bytes),
            Err(WireError::TooManyValues(17))
        ));
    }

    #[test]
    fn test_too_many_values_on_serialise() {
        let mut pkt = sample_packet();
        pkt.values = (0..17)
            .map(|i| SensorValue::new(ValueKind::Generic, i as f32))
            .collect();
        assert!(matches!(pkt.to_bytes(), Err(WireError::TooManyValues(17))));
    }

    #[test]
    fn test_long_strings_truncate() {
        let mut pkt = sample_packet();
        pkt.location = "x".repeat(60);
        pkt.zone = "y".repeat(40);
        let bytes = pkt.to_bytes().unwrap();
        let parsed = MultiSensorPacket::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.location.len(), LOCATION_CAPACITY - 1);
        assert_eq!(parsed.zone.len(), ZONE_CAPACITY - 1);
    }

    #[test]
    fn test_unknown_value_kind_roundtrips() {
        let mut pkt = sample_packet();
        pkt.values = vec![SensorValue::new(ValueKind::Unknown(42), 1.0)];
        let bytes = pkt.to_bytes().unwrap();
        let parsed = MultiSensorPacket::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.values[0].kind, ValueKind::Unknown(42));
        assert_eq!(parsed.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_legacy_parse() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&SYNC_LEGACY.to_le_bytes());
        buf.push(3); // sensor id
        buf.extend_from_slice(&7u16.to_le_bytes());
        buf.extend_from_slice(&21.5f32.to_le_bytes());
        buf.extend_from_slice(&48.0f32.to_le_bytes());
        buf.push(90);
        buf.push((-60i8) as u8);
        buf.extend_from_slice(&9.25f32.to_le_bytes());
        assert_eq!(buf.len(), LEGACY_PACKET_SIZE);

        let pkt = LegacyPacket::from_bytes(&buf).unwrap();
        assert_eq!(pkt.sensor_id, 3);
        assert_eq!(pkt.network_id, 7);
        assert!((pkt.temperature - 21.5).abs() < 1e-3);
        assert!((pkt.humidity - 48.0).abs() < 1e-3);
        assert_eq!(pkt.battery_percent, 90);
        assert_eq!(pkt.rssi, -60);
        assert!((pkt.snr - 9.25).abs() < 1e-3);
    }

    #[test]
    fn test_value_kind_table() {
        for byte in 0u8..14 {
            let kind = ValueKind::from_byte(byte);
            assert_eq!(kind.to_byte(), byte);
            assert!(!matches!(kind, ValueKind::Unknown(_)));
        }
        assert_eq!(ValueKind::Temperature.unit(), "°C");
        assert_eq!(ValueKind::GasResistance.name(), "gas_resistance");
        assert_eq!(ValueKind::from_byte(200), ValueKind::Unknown(200));
    }
}
