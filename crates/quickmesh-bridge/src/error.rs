//! Error types for bridge operations
//!
//! Every steady-state failure in the bridge is absorbed and logged by the
//! loop that hit it; these errors exist so collaborators can report what
//! went wrong and so log lines carry a stable code.

use quickmesh_core::CoreError;
use thiserror::Error;

/// Main error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    // ===== Mesh Transport Errors =====
    /// Mesh transport refused or failed a send
    #[error("Mesh send failed: {0}")]
    MeshSend(String),

    /// Mesh transport failed a receive
    #[error("Mesh receive failed: {0}")]
    MeshRecv(String),

    /// Mesh link is down
    #[error("Mesh link is not connected")]
    MeshDisconnected,

    // ===== Broker Errors =====
    /// Broker connect failed
    #[error("Broker connect to {endpoint} failed: {reason}")]
    BrokerConnect {
        /// Endpoint that was dialed
        endpoint: String,
        /// Failure reason
        reason: String,
    },

    /// Broker publish failed
    #[error("Broker publish to {topic} failed: {reason}")]
    BrokerPublish {
        /// Topic of the failed publish
        topic: String,
        /// Failure reason
        reason: String,
    },

    /// Broker subscribe failed
    #[error("Broker subscribe to {topic} failed: {reason}")]
    BrokerSubscribe {
        /// Topic of the failed subscription
        topic: String,
        /// Failure reason
        reason: String,
    },

    /// Topology push failed
    #[error("Topology update failed: {0}")]
    TopologyUpdate(String),

    /// Broker session is not established
    #[error("Broker session is not connected")]
    BrokerDisconnected,

    // ===== Uplink Errors =====
    /// Uplink could not start address acquisition
    #[error("Address acquisition failed: {0}")]
    AddressAcquisition(String),

    // ===== Role Errors =====
    /// Operation requires the mesh root role
    #[error("This node is not the mesh root")]
    NotRoot,

    // ===== Configuration Errors =====
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ===== General Errors =====
    /// Wire type error
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,

    /// Bounded queue is full
    #[error("Queue full: {0}")]
    QueueFull(&'static str),
}

impl BridgeError {
    /// Check if this error is a transient transport failure
    ///
    /// Transient failures drop the message in hand and the loop continues.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BridgeError::MeshSend(_)
                | BridgeError::MeshRecv(_)
                | BridgeError::MeshDisconnected
                | BridgeError::BrokerPublish { .. }
                | BridgeError::BrokerSubscribe { .. }
                | BridgeError::TopologyUpdate(_)
                | BridgeError::BrokerDisconnected
                | BridgeError::QueueFull(_)
        )
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            BridgeError::MeshSend(_) => "MESH_SEND",
            BridgeError::MeshRecv(_) => "MESH_RECV",
            BridgeError::MeshDisconnected => "MESH_DISCONNECTED",
            BridgeError::BrokerConnect { .. } => "BROKER_CONNECT",
            BridgeError::BrokerPublish { .. } => "BROKER_PUBLISH",
            BridgeError::BrokerSubscribe { .. } => "BROKER_SUBSCRIBE",
            BridgeError::TopologyUpdate(_) => "TOPOLOGY_UPDATE",
            BridgeError::BrokerDisconnected => "BROKER_DISCONNECTED",
            BridgeError::AddressAcquisition(_) => "ADDRESS_ACQUISITION",
            BridgeError::NotRoot => "NOT_ROOT",
            BridgeError::InvalidConfig(_) => "INVALID_CONFIG",
            BridgeError::Core(e) => e.error_code(),
            BridgeError::ChannelClosed => "CHANNEL_CLOSED",
            BridgeError::QueueFull(_) => "QUEUE_FULL",
        }
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for BridgeError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        BridgeError::ChannelClosed
    }
}
