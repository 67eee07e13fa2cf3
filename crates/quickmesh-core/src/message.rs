//! Message shapes carried across the mesh and the broker link
//!
//! - [`DeltaEvent`] travels from an observing node to the root as a compact
//!   JSON object.
//! - [`BridgeMessage`] is what the root receives from the mesh and publishes.
//! - [`BridgeCommand`] is what the broker hands the root for delivery into
//!   the mesh.
//!
//! Payload buffers are owned [`Bytes`] and move along the path; nothing here
//! is shared between producer and consumer.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::address::MeshAddr;
use crate::error::{CoreError, Result};

/// Kind tag carried in every presence payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Signal strength of an observed device changed by at least the threshold
    Delta,
}

/// A presence report emitted when a device's signal strength moved enough
/// to be worth telling the broker about.
///
/// Wire form:
/// `{"type":"delta","observer":"240ac4000102","broadcaster":"aabbccddeeff","rssi":-60}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaEvent {
    /// Always [`EventKind::Delta`]
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Mesh address of the reporting node
    pub observer: MeshAddr,
    /// Address of the observed device
    pub broadcaster: MeshAddr,
    /// Signal strength in dBm
    pub rssi: i32,
}

impl DeltaEvent {
    /// Create a delta event
    pub fn new(observer: MeshAddr, broadcaster: MeshAddr, rssi: i32) -> Self {
        Self {
            kind: EventKind::Delta,
            observer,
            broadcaster,
            rssi,
        }
    }

    /// Serialize to the compact JSON wire form
    pub fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| CoreError::Encode(e.to_string()))
    }

    /// Parse the JSON wire form
    pub fn decode(data: &[u8]) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_slice(data).map_err(|e| CoreError::Decode(e.to_string()))?;
        match value.get("type").and_then(|t| t.as_str()) {
            Some("delta") => {}
            Some(other) => return Err(CoreError::UnexpectedKind(other.to_string())),
            None => return Err(CoreError::Decode("missing \"type\" field".to_string())),
        }
        serde_json::from_value(value).map_err(|e| CoreError::Decode(e.to_string()))
    }
}

/// A payload received by the root from a mesh node, on its way to the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeMessage {
    /// Mesh address of the sending node
    pub source: MeshAddr,
    /// Raw payload as sent by the node
    pub payload: Bytes,
}

impl BridgeMessage {
    /// Create a bridge message
    pub fn new(source: MeshAddr, payload: impl Into<Bytes>) -> Self {
        Self {
            source,
            payload: payload.into(),
        }
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// A broker-originated payload to deliver to one or more mesh nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeCommand {
    /// Destination node addresses
    pub destinations: Vec<MeshAddr>,
    /// Raw payload to deliver
    pub payload: Bytes,
}

impl BridgeCommand {
    /// Create a bridge command
    pub fn new(destinations: Vec<MeshAddr>, payload: impl Into<Bytes>) -> Self {
        Self {
            destinations,
            payload: payload.into(),
        }
    }

    /// Number of destinations
    pub fn destination_count(&self) -> usize {
        self.destinations.len()
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}
