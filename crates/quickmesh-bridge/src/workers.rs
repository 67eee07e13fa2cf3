//! Root bridge workers
//!
//! Two tasks run on the root while it holds the role:
//!
//! ```text
//!            ┌──────────────────┐  publish {prefix}/{src}/toCloud
//!  mesh ───► │  InboundWorker   │ ──────────────────────────────► broker
//!            └──────────────────┘
//!            ┌──────────────────┐  next_command (bounded wait)
//!  mesh ◄─── │  OutboundWorker  │ ◄────────────────────────────── broker
//!            └──────────────────┘
//! ```
//!
//! Both idle while the broker is not ready, exit once the node loses the
//! root role, and stop the broker session on the way out.

use quickmesh_core::{BridgeCommand, BridgeMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::BridgeConfig;
use crate::context::{BridgeContext, StatsRecorder};
use crate::interface::{BrokerClient, Destination, MeshRole, MeshTransport, RecvFilter};
use crate::mapper::TopicMapper;
use crate::shutdown::ShutdownSignal;

/// Forwards root-addressed mesh messages to the broker
pub struct InboundWorker<M, B> {
    mesh: Arc<M>,
    broker: Arc<B>,
    ctx: Arc<BridgeContext>,
    topics: TopicMapper,
    idle_poll: Duration,
}

impl<M, B> InboundWorker<M, B>
where
    M: MeshTransport + 'static,
    B: BrokerClient + 'static,
{
    /// Create the worker
    pub fn new(
        mesh: Arc<M>,
        broker: Arc<B>,
        ctx: Arc<BridgeContext>,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            mesh,
            broker,
            ctx,
            topics: TopicMapper::from_config(config),
            idle_poll: config.idle_poll,
        }
    }

    /// Run until the root role is lost or shutdown
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        info!("Inbound bridge worker started");

        while !shutdown.is_triggered() && self.mesh.role() == MeshRole::Root {
            if !self.ctx.is_ready() {
                if shutdown.sleep(self.idle_poll).await {
                    break;
                }
                continue;
            }

            let received = tokio::select! {
                received = self.mesh.recv(RecvFilter::RootAddressed, None) => received,
                _ = self.role_lost() => break,
                _ = shutdown.triggered() => break,
            };

            match received {
                Ok(Some(message)) => self.forward(message).await,
                Ok(None) => trace!("Mesh receive returned nothing"),
                Err(e) => {
                    if e.is_transient() {
                        warn!(code = e.error_code(), "Mesh receive failed: {}", e);
                    } else {
                        error!(code = e.error_code(), "Mesh receive failed: {}", e);
                    }
                    if shutdown.sleep(self.idle_poll).await {
                        break;
                    }
                }
            }
        }

        warn!("Inbound bridge worker exiting");
        stop_broker(self.broker.as_ref()).await;
    }

    /// Resolve once this node stops being the root, checked every idle poll
    async fn role_lost(&self) {
        while self.mesh.role() == MeshRole::Root {
            tokio::time::sleep(self.idle_poll).await;
        }
    }

    async fn forward(&self, message: BridgeMessage) {
        let stats = &self.ctx.stats;

        // Readiness or role may have changed while blocked in recv
        if !self.ctx.is_ready() || self.mesh.role() != MeshRole::Root {
            debug!(
                source = %message.source,
                size = message.size(),
                "Broker not ready, dropping message"
            );
            StatsRecorder::bump(&stats.dropped_not_ready);
            return;
        }

        let source = message.source;
        let topic = self.topics.uplink_topic(&source);
        let size = message.size();
        match self.broker.publish(&topic, message.payload).await {
            Ok(()) => {
                debug!(source = %source, size, topic = %topic, "Published");
                StatsRecorder::bump(&stats.published);
            }
            Err(e) => {
                warn!(code = e.error_code(), topic = %topic, "Publish failed: {}", e);
                StatsRecorder::bump(&stats.publish_failures);
            }
        }
    }
}

/// Delivers broker commands into the mesh
pub struct OutboundWorker<M, B> {
    mesh: Arc<M>,
    broker: Arc<B>,
    ctx: Arc<BridgeContext>,
    idle_poll: Duration,
    command_wait: Duration,
}

impl<M, B> OutboundWorker<M, B>
where
    M: MeshTransport + 'static,
    B: BrokerClient + 'static,
{
    /// Create the worker
    pub fn new(
        mesh: Arc<M>,
        broker: Arc<B>,
        ctx: Arc<BridgeContext>,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            mesh,
            broker,
            ctx,
            idle_poll: config.idle_poll,
            command_wait: config.command_wait,
        }
    }

    /// Run until the root role is lost or shutdown
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        info!("Outbound bridge worker started");

        while !shutdown.is_triggered() && self.mesh.role() == MeshRole::Root {
            if !self.ctx.is_ready() {
                if shutdown.sleep(self.idle_poll).await {
                    break;
                }
                continue;
            }

            let next = tokio::select! {
                next = self.broker.next_command(self.command_wait) => next,
                _ = shutdown.triggered() => break,
            };

            match next {
                Ok(Some(command)) => self.deliver(command).await,
                Ok(None) => {}
                Err(e) => {
                    debug!(code = e.error_code(), "No broker command: {}", e);
                    if shutdown.sleep(self.idle_poll).await {
                        break;
                    }
                }
            }
        }

        warn!("Outbound bridge worker exiting");
        stop_broker(self.broker.as_ref()).await;
    }

    async fn deliver(&self, command: BridgeCommand) {
        let stats = &self.ctx.stats;
        let count = command.destination_count();
        let size = command.size();

        match self
            .mesh
            .send(Destination::Nodes(command.destinations), command.payload, true)
            .await
        {
            Ok(()) => {
                debug!(size, nodes = count, "Delivered command");
                StatsRecorder::bump(&stats.commands_delivered);
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(code = e.error_code(), nodes = count, "Command delivery failed: {}", e);
                } else {
                    error!(code = e.error_code(), nodes = count, "Command delivery failed: {}", e);
                }
                StatsRecorder::bump(&stats.command_failures);
            }
        }
    }
}

async fn stop_broker<B: BrokerClient + ?Sized>(broker: &B) {
    if !broker.is_connected() {
        return;
    }
    if let Err(e) = broker.disconnect().await {
        warn!("Error stopping broker session: {}", e);
    }
}

fn spawn_inbound<M, B>(
    mesh: Arc<M>,
    broker: Arc<B>,
    ctx: Arc<BridgeContext>,
    config: &BridgeConfig,
    shutdown: ShutdownSignal,
) -> JoinHandle<()>
where
    M: MeshTransport + 'static,
    B: BrokerClient + 'static,
{
    tokio::spawn(InboundWorker::new(mesh, broker, ctx, config).run(shutdown))
}

fn spawn_outbound<M, B>(
    mesh: Arc<M>,
    broker: Arc<B>,
    ctx: Arc<BridgeContext>,
    config: &BridgeConfig,
    shutdown: ShutdownSignal,
) -> JoinHandle<()>
where
    M: MeshTransport + 'static,
    B: BrokerClient + 'static,
{
    tokio::spawn(OutboundWorker::new(mesh, broker, ctx, config).run(shutdown))
}

/// Join handles of the root's bridge workers
pub(crate) struct WorkerPair {
    inbound: JoinHandle<()>,
    outbound: JoinHandle<()>,
}

impl WorkerPair {
    /// Spawn both workers
    pub fn spawn<M, B>(
        mesh: Arc<M>,
        broker: Arc<B>,
        ctx: Arc<BridgeContext>,
        config: &BridgeConfig,
        shutdown: ShutdownSignal,
    ) -> Self
    where
        M: MeshTransport + 'static,
        B: BrokerClient + 'static,
    {
        Self {
            inbound: spawn_inbound(
                Arc::clone(&mesh),
                Arc::clone(&broker),
                Arc::clone(&ctx),
                config,
                shutdown.clone(),
            ),
            outbound: spawn_outbound(mesh, broker, ctx, config, shutdown),
        }
    }

    /// Whether both workers are still running
    pub fn is_running(&self) -> bool {
        !self.inbound.is_finished() && !self.outbound.is_finished()
    }

    /// Respawn whichever worker has exited
    ///
    /// A worker that has not yet noticed a role change keeps running and is
    /// left alone. Returns the number of workers started.
    pub fn restart_finished<M, B>(
        &mut self,
        mesh: Arc<M>,
        broker: Arc<B>,
        ctx: Arc<BridgeContext>,
        config: &BridgeConfig,
        shutdown: ShutdownSignal,
    ) -> usize
    where
        M: MeshTransport + 'static,
        B: BrokerClient + 'static,
    {
        let mut started = 0;
        if self.inbound.is_finished() {
            self.inbound = spawn_inbound(
                Arc::clone(&mesh),
                Arc::clone(&broker),
                Arc::clone(&ctx),
                config,
                shutdown.clone(),
            );
            started += 1;
        }
        if self.outbound.is_finished() {
            self.outbound = spawn_outbound(mesh, broker, ctx, config, shutdown);
            started += 1;
        }
        started
    }

    /// Wait for both workers to finish
    pub async fn join(self) {
        for (name, handle) in [("inbound", self.inbound), ("outbound", self.outbound)] {
            if let Err(e) = handle.await {
                warn!("{} worker task failed: {}", name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownTrigger;
    use crate::test_utils::{MockBroker, MockMesh, MockMeshNetwork};
    use bytes::Bytes;
    use quickmesh_core::MeshAddr;

    const ROOT: MeshAddr = MeshAddr::new([0x24, 0x0a, 0xc4, 0, 0, 1]);
    const LEAF: MeshAddr = MeshAddr::new([0x24, 0x0a, 0xc4, 0, 0, 2]);

    fn config() -> BridgeConfig {
        BridgeConfig {
            idle_poll: Duration::from_millis(5),
            command_wait: Duration::from_millis(5),
            ..Default::default()
        }
    }

    async fn ready_root() -> (MockMeshNetwork, Arc<MockMesh>, Arc<MockBroker>, Arc<BridgeContext>) {
        let network = MockMeshNetwork::new();
        let root = network.join(ROOT);
        network.set_root(ROOT);
        network.join(LEAF);

        let broker = Arc::new(MockBroker::new());
        broker.connect("mqtt://test").await.unwrap();
        let ctx = Arc::new(BridgeContext::default());
        ctx.set_ready(true);
        (network, root, broker, ctx)
    }

    #[tokio::test]
    async fn test_inbound_publishes_on_source_topic() {
        let (network, root, broker, ctx) = ready_root().await;
        let trigger = ShutdownTrigger::new();
        let worker = InboundWorker::new(root, Arc::clone(&broker), Arc::clone(&ctx), &config());
        let task = tokio::spawn(worker.run(trigger.signal()));

        network.inject_to_root(LEAF, Bytes::from_static(b"hello"));
        assert!(broker.wait_for_published(1).await);

        let published = broker.published();
        assert_eq!(published[0].0, "mesh/240ac4000002/toCloud");
        assert_eq!(&published[0].1[..], b"hello");

        trigger.trigger();
        task.await.unwrap();
        assert_eq!(ctx.stats().published, 1);
        assert!(!broker.is_connected());
    }

    #[tokio::test]
    async fn test_inbound_drops_when_readiness_lost_during_recv() {
        let (network, root, broker, ctx) = ready_root().await;
        let trigger = ShutdownTrigger::new();
        let worker = InboundWorker::new(root, Arc::clone(&broker), Arc::clone(&ctx), &config());
        let task = tokio::spawn(worker.run(trigger.signal()));

        // Let the worker block in recv, then clear readiness
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.set_ready(false);
        network.inject_to_root(LEAF, Bytes::from_static(b"late"));
        tokio::time::sleep(Duration::from_millis(20)).await;

        trigger.trigger();
        task.await.unwrap();
        assert!(broker.published().is_empty());
        assert_eq!(ctx.stats().dropped_not_ready, 1);
    }

    #[tokio::test]
    async fn test_inbound_exits_on_role_loss() {
        let (network, root, broker, ctx) = ready_root().await;
        ctx.set_ready(false);
        let trigger = ShutdownTrigger::new();
        let worker = InboundWorker::new(root, Arc::clone(&broker), ctx, &config());
        let task = tokio::spawn(worker.run(trigger.signal()));

        network.set_root(LEAF);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("worker should exit")
            .unwrap();
        assert!(!broker.is_connected());
    }

    #[tokio::test]
    async fn test_inbound_blocked_in_recv_exits_on_role_loss() {
        let (network, root, broker, ctx) = ready_root().await;
        let trigger = ShutdownTrigger::new();
        let worker = InboundWorker::new(root, Arc::clone(&broker), ctx, &config());
        let task = tokio::spawn(worker.run(trigger.signal()));

        // Ready, so the worker is parked in an unbounded recv
        tokio::time::sleep(Duration::from_millis(20)).await;
        network.set_root(LEAF);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("worker should exit")
            .unwrap();
        assert!(!broker.is_connected());
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_non_root_ignores_stale_readiness() {
        let (network, root, broker, ctx) = ready_root().await;

        // Work queued for both directions while this node was still root
        network.inject_to_root(LEAF, Bytes::from_static(b"stale"));
        broker.inject_command(BridgeCommand::new(vec![LEAF], Bytes::from_static(b"stale")));
        network.set_root(LEAF);
        assert!(ctx.is_ready());

        let trigger = ShutdownTrigger::new();
        let inbound = InboundWorker::new(
            Arc::clone(&root),
            Arc::clone(&broker),
            Arc::clone(&ctx),
            &config(),
        );
        let outbound = OutboundWorker::new(root, Arc::clone(&broker), Arc::clone(&ctx), &config());
        let inbound = tokio::spawn(inbound.run(trigger.signal()));
        let outbound = tokio::spawn(outbound.run(trigger.signal()));

        for task in [inbound, outbound] {
            tokio::time::timeout(Duration::from_secs(1), task)
                .await
                .expect("worker should exit")
                .unwrap();
        }
        assert!(broker.published().is_empty());
        assert!(network.deliveries().is_empty());
        assert!(!broker.is_connected());
        let stats = ctx.stats();
        assert_eq!(stats.published, 0);
        assert_eq!(stats.commands_delivered, 0);
    }

    #[tokio::test]
    async fn test_outbound_delivers_to_destinations() {
        let (network, root, broker, ctx) = ready_root().await;
        let trigger = ShutdownTrigger::new();
        let worker = OutboundWorker::new(root, Arc::clone(&broker), Arc::clone(&ctx), &config());
        let task = tokio::spawn(worker.run(trigger.signal()));

        broker.inject_command(BridgeCommand::new(vec![LEAF], Bytes::from_static(b"on")));
        assert!(network.wait_for_deliveries(1).await);

        let delivered = network.deliveries();
        assert_eq!(delivered[0].0, LEAF);
        assert_eq!(delivered[0].1.source, ROOT);
        assert_eq!(&delivered[0].1.payload[..], b"on");

        trigger.trigger();
        task.await.unwrap();
        assert_eq!(ctx.stats().commands_delivered, 1);
    }

    #[tokio::test]
    async fn test_outbound_failure_counted() {
        let (network, root, broker, ctx) = ready_root().await;
        let trigger = ShutdownTrigger::new();
        let worker = OutboundWorker::new(root, Arc::clone(&broker), Arc::clone(&ctx), &config());
        let task = tokio::spawn(worker.run(trigger.signal()));

        let unknown = MeshAddr::new([9, 9, 9, 9, 9, 9]);
        broker.inject_command(BridgeCommand::new(vec![unknown], Bytes::from_static(b"x")));
        tokio::time::sleep(Duration::from_millis(50)).await;

        trigger.trigger();
        task.await.unwrap();
        assert!(network.deliveries().is_empty());
        assert_eq!(ctx.stats().command_failures, 1);
    }

    #[tokio::test]
    async fn test_outbound_idles_until_ready() {
        let (network, root, broker, ctx) = ready_root().await;
        ctx.set_ready(false);
        let trigger = ShutdownTrigger::new();
        let worker = OutboundWorker::new(root, Arc::clone(&broker), Arc::clone(&ctx), &config());
        let task = tokio::spawn(worker.run(trigger.signal()));

        broker.inject_command(BridgeCommand::new(vec![LEAF], Bytes::from_static(b"on")));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(network.deliveries().is_empty());

        ctx.set_ready(true);
        assert!(network.wait_for_deliveries(1).await);

        trigger.trigger();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_pair_stops_on_shutdown() {
        let (_network, root, broker, ctx) = ready_root().await;
        let trigger = ShutdownTrigger::new();
        let pair = WorkerPair::spawn(root, Arc::clone(&broker), ctx, &config(), trigger.signal());
        assert!(pair.is_running());

        trigger.trigger();
        pair.join().await;
        assert!(!broker.is_connected());
    }

    #[tokio::test]
    async fn test_worker_pair_restarts_after_reelection() {
        let (network, root, broker, ctx) = ready_root().await;
        let trigger = ShutdownTrigger::new();
        let mut pair = WorkerPair::spawn(
            Arc::clone(&root),
            Arc::clone(&broker),
            Arc::clone(&ctx),
            &config(),
            trigger.signal(),
        );

        network.set_root(LEAF);
        for _ in 0..500 {
            if pair.inbound.is_finished() && pair.outbound.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(pair.inbound.is_finished() && pair.outbound.is_finished());
        assert!(!pair.is_running());

        network.set_root(ROOT);
        broker.connect("mqtt://test").await.unwrap();
        let started = pair.restart_finished(
            root,
            Arc::clone(&broker),
            Arc::clone(&ctx),
            &config(),
            trigger.signal(),
        );
        assert_eq!(started, 2);
        assert!(pair.is_running());

        broker.inject_command(BridgeCommand::new(vec![LEAF], Bytes::from_static(b"again")));
        assert!(network.wait_for_deliveries(1).await);

        trigger.trigger();
        pair.join().await;
    }
}
