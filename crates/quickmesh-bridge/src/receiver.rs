//! Node receive loop
//!
//! Runs on every node, root included, and consumes messages addressed to
//! this node. Payloads are only logged; acting on them is left to the
//! application.

use quickmesh_core::BridgeMessage;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::context::{BridgeContext, StatsRecorder};
use crate::interface::{MeshTransport, RecvFilter};
use crate::shutdown::ShutdownSignal;

/// Consumes self-addressed mesh messages
pub struct NodeReceiver<M> {
    mesh: Arc<M>,
    ctx: Arc<BridgeContext>,
    idle_poll: Duration,
}

impl<M: MeshTransport + 'static> NodeReceiver<M> {
    /// Create the receive loop
    pub fn new(mesh: Arc<M>, ctx: Arc<BridgeContext>, config: &BridgeConfig) -> Self {
        Self {
            mesh,
            ctx,
            idle_poll: config.idle_poll,
        }
    }

    /// Run until shutdown
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        info!(node = %self.mesh.local_addr(), "Node receive loop running");

        while !shutdown.is_triggered() {
            if !self.mesh.is_connected() {
                if shutdown.sleep(self.idle_poll).await {
                    break;
                }
                continue;
            }

            let received = tokio::select! {
                received = self.mesh.recv(RecvFilter::SelfAddressed, None) => received,
                _ = shutdown.triggered() => break,
            };

            match received {
                Ok(Some(message)) => self.handle(&message),
                Ok(None) => {}
                Err(e) => {
                    warn!(code = e.error_code(), "Node receive failed: {}", e);
                    if shutdown.sleep(self.idle_poll).await {
                        break;
                    }
                }
            }
        }

        debug!("Node receive loop stopped");
    }

    fn handle(&self, message: &BridgeMessage) {
        StatsRecorder::bump(&self.ctx.stats.node_messages);
        info!(
            source = %message.source,
            size = message.size(),
            "Node message: {}",
            String::from_utf8_lossy(&message.payload)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::Destination;
    use crate::shutdown::ShutdownTrigger;
    use crate::test_utils::MockMeshNetwork;
    use bytes::Bytes;
    use quickmesh_core::MeshAddr;

    #[tokio::test]
    async fn test_counts_self_addressed_messages() {
        let network = MockMeshNetwork::new();
        let root = network.join(MeshAddr::new([0, 0, 0, 0, 0, 1]));
        network.set_root(root.local_addr());
        let leaf = network.join(MeshAddr::new([0, 0, 0, 0, 0, 2]));

        let ctx = Arc::new(BridgeContext::default());
        let trigger = ShutdownTrigger::new();
        let receiver = NodeReceiver::new(Arc::clone(&leaf), Arc::clone(&ctx), &BridgeConfig::default());
        let task = tokio::spawn(receiver.run(trigger.signal()));

        root.send(
            Destination::Nodes(vec![leaf.local_addr()]),
            Bytes::from_static(b"ping"),
            true,
        )
        .await
        .unwrap();

        for _ in 0..100 {
            if ctx.stats().node_messages == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(ctx.stats().node_messages, 1);

        trigger.trigger();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_idles_while_disconnected() {
        let network = MockMeshNetwork::new();
        let leaf = network.join(MeshAddr::new([0, 0, 0, 0, 0, 2]));
        leaf.set_connected(false);

        let ctx = Arc::new(BridgeContext::default());
        let trigger = ShutdownTrigger::new();
        let receiver = NodeReceiver::new(leaf, Arc::clone(&ctx), &BridgeConfig::default());
        let task = tokio::spawn(receiver.run(trigger.signal()));

        tokio::time::sleep(Duration::from_secs(2)).await;
        trigger.trigger();
        task.await.unwrap();
        assert_eq!(ctx.stats().node_messages, 0);
    }
}
