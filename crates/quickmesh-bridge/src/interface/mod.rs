//! Collaborator interfaces the bridge is driven through
//!
//! The bridge never talks to a radio, a routing stack or an MQTT client
//! directly. It is handed implementations of these traits:
//!
//! - [`MeshTransport`] - self-organizing mesh: role, link state, addressed send/receive
//! - [`broker::BrokerClient`] - publish/subscribe session on the IP side
//! - [`uplink::Uplink`] - IP address acquisition for the root's upstream link
//!
//! Asynchronous notifications from any of them (parent link changes, broker
//! session up/down, address acquired) are delivered as
//! [`LifecycleEvent`](crate::lifecycle::LifecycleEvent)s through the runtime
//! handle, never by calling back into the bridge.

pub mod broker;
pub mod uplink;

pub use broker::BrokerClient;
pub use uplink::Uplink;

use async_trait::async_trait;
use bytes::Bytes;
use quickmesh_core::{BridgeMessage, MeshAddr};
use std::time::Duration;

use crate::error::Result;

/// Position of this node in the mesh tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeshRole {
    /// Elected root with the upstream IP link
    Root,
    /// Any other node
    Node,
}

impl MeshRole {
    /// Check if this is the root role
    pub fn is_root(&self) -> bool {
        matches!(self, MeshRole::Root)
    }
}

impl std::fmt::Display for MeshRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeshRole::Root => write!(f, "root"),
            MeshRole::Node => write!(f, "node"),
        }
    }
}

/// Where a mesh send is addressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// The current root, wherever it is
    Root,
    /// An explicit list of node addresses
    Nodes(Vec<MeshAddr>),
}

/// Which messages a mesh receive waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvFilter {
    /// Messages addressed to the root for bridging upstream
    RootAddressed,
    /// Messages addressed to this node
    SelfAddressed,
}

/// Trait for the mesh networking stack
///
/// Implementations own their queues; every method takes `&self` so the scan
/// path, both bridge workers and the node receive loop can share one
/// transport behind an `Arc`.
#[async_trait]
pub trait MeshTransport: Send + Sync {
    /// Send a payload
    ///
    /// `confirm` requests mesh-level delivery confirmation where the stack
    /// supports it.
    async fn send(&self, destination: Destination, payload: Bytes, confirm: bool) -> Result<()>;

    /// Receive the next message matching `filter`
    ///
    /// `None` timeout waits indefinitely. Returns `Ok(None)` when the timeout
    /// elapses with nothing received.
    async fn recv(
        &self,
        filter: RecvFilter,
        timeout: Option<Duration>,
    ) -> Result<Option<BridgeMessage>>;

    /// Check whether this node has a live link into the mesh
    fn is_connected(&self) -> bool;

    /// Current role of this node
    fn role(&self) -> MeshRole;

    /// This node's own address
    fn local_addr(&self) -> MeshAddr;

    /// Every node currently reachable through the routing table
    fn routing_table(&self) -> Vec<MeshAddr>;

    /// Get the transport name (for logging)
    fn name(&self) -> &str;
}
