//! Publish/subscribe broker session

use async_trait::async_trait;
use bytes::Bytes;
use quickmesh_core::{BridgeCommand, TopologySnapshot};
use std::time::Duration;

use crate::error::Result;

/// Trait for the broker client used by the root
///
/// `connect` only starts the session. Establishment and loss are reported
/// later as `BrokerConnected` / `BrokerDisconnected` lifecycle events, the
/// way MQTT clients report them from their own event loop.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Start a session towards `endpoint`
    async fn connect(&self, endpoint: &str) -> Result<()>;

    /// Tear the session down; a no-op when already disconnected
    async fn disconnect(&self) -> Result<()>;

    /// Check if the session is currently established
    fn is_connected(&self) -> bool;

    /// Publish a payload on a topic
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;

    /// Subscribe to a topic filter; matching messages become commands
    async fn subscribe(&self, topic: &str) -> Result<()>;

    /// Wait up to `timeout` for the next downstream command
    ///
    /// Returns `Ok(None)` when the wait elapses.
    async fn next_command(&self, timeout: Duration) -> Result<Option<BridgeCommand>>;

    /// Publish the set of reachable nodes on `topic`
    ///
    /// The body is [`TopologySnapshot::to_json`].
    async fn push_topology(&self, topic: &str, snapshot: &TopologySnapshot) -> Result<()>;
}
