use std::io::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::WireError;

/// Single-byte value type tag.
///
/// String payloads carry a u32 little-endian length prefix; numeric payloads
/// carry their fixed width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SerialType {
    String = 0xdb,
    Int8 = 0xd0,
    Int16 = 0xd1,
    Int32 = 0xd2,
    Int64 = 0xd3,
    Float32 = 0xca,
}

impl SerialType {
    pub fn from_u8(raw: u8) -> Result<Self, WireError> {
        match raw {
            0xdb => Ok(Self::String),
            0xd0 => Ok(Self::Int8),
            0xd1 => Ok(Self::Int16),
            0xd2 => Ok(Self::Int32),
            0xd3 => Ok(Self::Int64),
            0xca => Ok(Self::Float32),
            other => Err(WireError::UnknownSerialType(other)),
        }
    }

    /// Fixed payload width in bytes, or `None` for length-prefixed strings.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            Self::String => None,
            Self::Int8 => Some(1),
            Self::Int16 => Some(2),
            Self::Int32 | Self::Float32 => Some(4),
            Self::Int64 => Some(8),
        }
    }
}

/// Single-byte message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Placeholder message; keeps the session alive without a payload.
    KeepAlive = 0,
    /// Complete key/value snapshot, sent on run events.
    TimeSeriesFull = 1,
    /// Changes since the previous message, sent periodically mid-run.
    TimeSeriesDiff = 2,
}

impl MessageType {
    pub fn from_u8(raw: u8) -> Result<Self, WireError> {
        match raw {
            0 => Ok(Self::KeepAlive),
            1 => Ok(Self::TimeSeriesFull),
            2 => Ok(Self::TimeSeriesDiff),
            other => Err(WireError::InvalidMessageType(other)),
        }
    }

    /// True when this kind carries a dict payload.
    pub fn has_body(self) -> bool {
        matches!(self, Self::TimeSeriesFull | Self::TimeSeriesDiff)
    }
}

/// Single-byte game event that triggered a message.
///
/// Unknown bytes are carried through opaquely; the reason never affects
/// decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageReason {
    None,
    ShopEntered,
    StartedWave,
    RunEnded,
    Poll,
    Connect,
    Other(u8),
}

impl MessageReason {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::None,
            1 => Self::ShopEntered,
            2 => Self::StartedWave,
            3 => Self::RunEnded,
            4 => Self::Poll,
            5 => Self::Connect,
            other => Self::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::ShopEntered => 1,
            Self::StartedWave => 2,
            Self::RunEnded => 3,
            Self::Poll => 4,
            Self::Connect => 5,
            Self::Other(raw) => raw,
        }
    }
}

/// Unix epoch time in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MicroTime(pub i64);

impl MicroTime {
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Self(micros)
    }
}

/// One decoded key/value pair.
///
/// Borrows the decoder's scratch buffer and mapping table; both are
/// invalidated by the next pull, so copy out anything that must outlive it.
/// Value slices are exactly as wide as the serial type demands.
#[derive(Debug, Clone, Copy)]
pub struct KeyValue<'a> {
    /// Short wire form of the key.
    pub id: u16,
    /// Full key name the id maps to.
    pub name: &'a str,
    pub serial_type: SerialType,
    /// Raw value bytes.
    pub value: &'a [u8],
}

impl KeyValue<'_> {
    /// Appends the JSON encoding of the value.
    ///
    /// Strings are emitted as double-quoted raw bytes (names and string
    /// values are ASCII-safe by contract with the exporter); integers as
    /// signed base-10; floats as shortest round-trip decimal.
    pub fn append_json(&self, out: &mut Vec<u8>) {
        match self.serial_type {
            SerialType::String => {
                out.push(b'"');
                out.extend_from_slice(self.value);
                out.push(b'"');
            }
            SerialType::Int8 => match <[u8; 1]>::try_from(self.value) {
                Ok(raw) => {
                    let _ = write!(out, "{}", i8::from_le_bytes(raw));
                }
                Err(_) => out.extend_from_slice(b"null"),
            },
            SerialType::Int16 => match <[u8; 2]>::try_from(self.value) {
                Ok(raw) => {
                    let _ = write!(out, "{}", i16::from_le_bytes(raw));
                }
                Err(_) => out.extend_from_slice(b"null"),
            },
            SerialType::Int32 => match <[u8; 4]>::try_from(self.value) {
                Ok(raw) => {
                    let _ = write!(out, "{}", i32::from_le_bytes(raw));
                }
                Err(_) => out.extend_from_slice(b"null"),
            },
            SerialType::Int64 => match <[u8; 8]>::try_from(self.value) {
                Ok(raw) => {
                    let _ = write!(out, "{}", i64::from_le_bytes(raw));
                }
                Err(_) => out.extend_from_slice(b"null"),
            },
            SerialType::Float32 => match <[u8; 4]>::try_from(self.value) {
                Ok(raw) => {
                    let _ = write!(out, "{}", f32::from_le_bytes(raw));
                }
                Err(_) => out.extend_from_slice(b"null"),
            },
        }
    }
}

/// Owned key/value pair for the encoding side.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedKeyValue {
    pub name: String,
    pub serial_type: SerialType,
    pub value: Vec<u8>,
}

impl OwnedKeyValue {
    pub fn string(name: impl Into<String>, value: impl AsRef<[u8]>) -> Self {
        Self {
            name: name.into(),
            serial_type: SerialType::String,
            value: value.as_ref().to_vec(),
        }
    }

    pub fn int8(name: impl Into<String>, value: i8) -> Self {
        Self {
            name: name.into(),
            serial_type: SerialType::Int8,
            value: value.to_le_bytes().to_vec(),
        }
    }

    pub fn int16(name: impl Into<String>, value: i16) -> Self {
        Self {
            name: name.into(),
            serial_type: SerialType::Int16,
            value: value.to_le_bytes().to_vec(),
        }
    }

    pub fn int32(name: impl Into<String>, value: i32) -> Self {
        Self {
            name: name.into(),
            serial_type: SerialType::Int32,
            value: value.to_le_bytes().to_vec(),
        }
    }

    pub fn int64(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            serial_type: SerialType::Int64,
            value: value.to_le_bytes().to_vec(),
        }
    }

    pub fn float32(name: impl Into<String>, value: f32) -> Self {
        Self {
            name: name.into(),
            serial_type: SerialType::Float32,
            value: value.to_le_bytes().to_vec(),
        }
    }

    /// Borrowed view with a synthetic id, for JSON encoding of owned pairs.
    pub fn as_key_value(&self) -> KeyValue<'_> {
        KeyValue {
            id: 0,
            name: &self.name,
            serial_type: self.serial_type,
            value: &self.value,
        }
    }
}
