//! Hardware addresses for mesh nodes and observed devices
//!
//! Both mesh nodes and the radio devices they observe are identified by a
//! 6-byte hardware address. The address is opaque: it is only ever compared,
//! hashed, and rendered for logs and wire encodings.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Length of a hardware address in bytes
pub const ADDR_LEN: usize = 6;

/// A 6-byte hardware address.
///
/// Equality and hashing operate over the raw bytes. The serde form is the
/// compact lowercase hex string (`"aabbccddeeff"`) used on the wire; the
/// `Display` form is the colon-separated notation used in logs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MeshAddr([u8; ADDR_LEN]);

impl MeshAddr {
    /// Broadcast address (all 0xFF)
    pub const BROADCAST: MeshAddr = MeshAddr([0xFF; ADDR_LEN]);

    /// Create an address from raw bytes
    pub const fn new(bytes: [u8; ADDR_LEN]) -> Self {
        Self(bytes)
    }

    /// Create an address from a slice, which must be exactly 6 bytes long
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
        let raw: [u8; ADDR_LEN] = bytes.try_into().map_err(|_| CoreError::InvalidAddress {
            input: hex::encode(bytes),
            reason: format!("expected {} bytes, got {}", ADDR_LEN, bytes.len()),
        })?;
        Ok(Self(raw))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; ADDR_LEN] {
        &self.0
    }

    /// Compact lowercase hex form without separators
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the compact hex form (12 hex digits)
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(s).map_err(|e| CoreError::InvalidAddress {
            input: s.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_slice(&bytes).map_err(|_| CoreError::InvalidAddress {
            input: s.to_string(),
            reason: format!("expected {} hex digits", ADDR_LEN * 2),
        })
    }
}

impl From<[u8; ADDR_LEN]> for MeshAddr {
    fn from(bytes: [u8; ADDR_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for MeshAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for MeshAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MeshAddr({})", self)
    }
}

/// Accepts both `aa:bb:cc:dd:ee:ff` and `aabbccddeeff` (any case)
impl FromStr for MeshAddr {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        Self::from_hex(&compact).map_err(|_| CoreError::InvalidAddress {
            input: s.to_string(),
            reason: "not a 6-byte hardware address".to_string(),
        })
    }
}

impl Serialize for MeshAddr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for MeshAddr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        MeshAddr::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
