//! Bluetooth UUIDs as seen by the connection manager
//!
//! A UUID keeps the width it was declared or received with: a 16-bit UUID
//! never compares equal to a 128-bit one, even when the 128-bit value is the
//! Bluetooth base UUID expansion of the 16-bit value. Service templates and
//! scan filters are matched against what the peer actually sends, so the
//! comparison has to be type-sensitive.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Client Characteristic Configuration descriptor
pub const CLIENT_CHAR_CONFIG_UUID: u16 = 0x2902;
/// Generic Access service
pub const GAP_SERVICE_UUID: u16 = 0x1800;

/// UUID for GATT attributes and advertised services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Uuid {
    /// 16-bit SIG-assigned UUID
    Uuid16(u16),
    /// 128-bit UUID, most significant byte first (as written in text form)
    Uuid128([u8; 16]),
}

impl Uuid {
    /// Create a UUID from a 16-bit value
    pub const fn from_u16(uuid: u16) -> Self {
        Uuid::Uuid16(uuid)
    }

    /// Create a 128-bit UUID from its numeric value
    pub const fn from_u128(uuid: u128) -> Self {
        Uuid::Uuid128(uuid.to_be_bytes())
    }

    /// Convert on-air (little-endian) bytes to a UUID based on length
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            2 => Some(Uuid::Uuid16(u16::from_le_bytes([bytes[0], bytes[1]]))),
            16 => {
                let mut uuid = [0u8; 16];
                for (dst, src) in uuid.iter_mut().zip(bytes.iter().rev()) {
                    *dst = *src;
                }
                Some(Uuid::Uuid128(uuid))
            }
            _ => None,
        }
    }

    /// The on-air (little-endian) representation
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            Uuid::Uuid16(uuid) => uuid.to_le_bytes().to_vec(),
            Uuid::Uuid128(uuid) => uuid.iter().rev().copied().collect(),
        }
    }

    /// Number of octets this UUID occupies on air
    pub fn encoded_len(&self) -> usize {
        match self {
            Uuid::Uuid16(_) => 2,
            Uuid::Uuid128(_) => 16,
        }
    }

    /// Get the 16-bit UUID value if this is a 16-bit UUID
    pub fn as_u16(&self) -> Option<u16> {
        match self {
            Uuid::Uuid16(uuid) => Some(*uuid),
            Uuid::Uuid128(_) => None,
        }
    }

    pub fn is_16bit(&self) -> bool {
        matches!(self, Uuid::Uuid16(_))
    }

    /// Compare against a UUID exactly as it appears on air.
    ///
    /// 128-bit values are transmitted least significant byte first, so the
    /// stored bytes are walked in reverse.
    pub fn matches_le(&self, on_air: &[u8]) -> bool {
        match self {
            Uuid::Uuid16(uuid) => on_air.len() == 2 && on_air == &uuid.to_le_bytes()[..],
            Uuid::Uuid128(uuid) => {
                on_air.len() == 16 && uuid.iter().rev().zip(on_air).all(|(a, b)| a == b)
            }
        }
    }
}

impl From<u16> for Uuid {
    fn from(uuid: u16) -> Self {
        Uuid::Uuid16(uuid)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uuid::Uuid16(uuid) => write!(f, "{:04x}", uuid),
            Uuid::Uuid128(b) => write!(
                f,
                "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
                b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
                b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
            ),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum UuidParseError {
    #[error("UUID must have 4 or 32 hex digits")]
    InvalidLength,
    #[error("Invalid hex: {0}")]
    HexError(#[from] hex::FromHexError),
}

impl FromStr for Uuid {
    type Err = UuidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s.chars().filter(|c| *c != '-').collect();

        match cleaned.len() {
            4 => {
                let mut bytes = [0u8; 2];
                hex::decode_to_slice(&cleaned, &mut bytes)?;
                Ok(Uuid::Uuid16(u16::from_be_bytes(bytes)))
            }
            32 => {
                let mut bytes = [0u8; 16];
                hex::decode_to_slice(&cleaned, &mut bytes)?;
                Ok(Uuid::Uuid128(bytes))
            }
            _ => Err(UuidParseError::InvalidLength),
        }
    }
}
