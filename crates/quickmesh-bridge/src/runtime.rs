//! Bridge runtime
//!
//! [`BridgeRuntime`] owns one node's bridge: it runs the scan processor and
//! node receive loop for the node's whole life, feeds lifecycle events
//! through the [`LifecycleMachine`] and executes the resulting actions,
//! including spawning the root bridge workers.
//!
//! Everything outside talks to the runtime through a cloneable
//! [`RuntimeHandle`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use quickmesh_bridge::{BridgeConfig, BridgeRuntime, LifecycleEvent};
//! use quickmesh_bridge::test_utils::{MockBroker, MockMeshNetwork, MockUplink};
//! use quickmesh_core::MeshAddr;
//!
//! # async fn example() -> quickmesh_bridge::Result<()> {
//! let network = MockMeshNetwork::new();
//! let mesh = network.join(MeshAddr::new([0x24, 0x0a, 0xc4, 0, 0, 1]));
//! let (runtime, handle) = BridgeRuntime::new(
//!     BridgeConfig::default(),
//!     mesh,
//!     Arc::new(MockBroker::new()),
//!     Arc::new(MockUplink::new()),
//! )?;
//!
//! let task = tokio::spawn(runtime.run());
//! handle.post_event(LifecycleEvent::MeshStarted).await?;
//! handle.shutdown();
//! task.await.ok();
//! # Ok(())
//! # }
//! ```

use quickmesh_core::{MeshAddr, TopologySnapshot};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::context::{BridgeContext, BridgeStats};
use crate::error::{BridgeError, Result};
use crate::interface::{BrokerClient, MeshTransport, Uplink};
use crate::lifecycle::{LifecycleAction, LifecycleEvent, LifecycleMachine};
use crate::mapper::TopicMapper;
use crate::receiver::NodeReceiver;
use crate::scanner::{Discovery, ScanProcessor};
use crate::shutdown::ShutdownTrigger;
use crate::workers::WorkerPair;

/// Handle for driving a [`BridgeRuntime`]
#[derive(Clone)]
pub struct RuntimeHandle {
    event_tx: mpsc::Sender<LifecycleEvent>,
    discovery_tx: mpsc::Sender<Discovery>,
    shutdown: Arc<ShutdownTrigger>,
    ctx: Arc<BridgeContext>,
}

impl RuntimeHandle {
    /// Deliver a lifecycle event, waiting for queue space
    pub async fn post_event(&self, event: LifecycleEvent) -> Result<()> {
        self.event_tx.send(event).await?;
        Ok(())
    }

    /// Sender for collaborators that report events themselves
    pub fn event_sender(&self) -> mpsc::Sender<LifecycleEvent> {
        self.event_tx.clone()
    }

    /// Report a radio sighting without blocking
    ///
    /// Sightings are dropped when the queue is full; the radio will see
    /// the device again.
    pub fn report_discovery(&self, device: MeshAddr, rssi: i32) -> Result<()> {
        self.discovery_tx
            .try_send(Discovery::new(device, rssi))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => BridgeError::QueueFull("discovery"),
                mpsc::error::TrySendError::Closed(_) => BridgeError::ChannelClosed,
            })
    }

    /// Whether the broker session is ready
    pub fn is_ready(&self) -> bool {
        self.ctx.is_ready()
    }

    /// Current counters
    pub fn stats(&self) -> BridgeStats {
        self.ctx.stats()
    }

    /// Shared bridge state
    pub fn context(&self) -> &Arc<BridgeContext> {
        &self.ctx
    }

    /// Stop every loop owned by the runtime
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }
}

/// One node's bridge
pub struct BridgeRuntime<M, B, U> {
    config: BridgeConfig,
    mesh: Arc<M>,
    broker: Arc<B>,
    uplink: Arc<U>,
    ctx: Arc<BridgeContext>,
    topics: TopicMapper,
    machine: LifecycleMachine,
    event_rx: mpsc::Receiver<LifecycleEvent>,
    discovery_rx: Option<mpsc::Receiver<Discovery>>,
    shutdown: Arc<ShutdownTrigger>,
    workers: Option<WorkerPair>,
}

impl<M, B, U> BridgeRuntime<M, B, U>
where
    M: MeshTransport + 'static,
    B: BrokerClient + 'static,
    U: Uplink + 'static,
{
    /// Create a runtime and its handle
    pub fn new(
        config: BridgeConfig,
        mesh: Arc<M>,
        broker: Arc<B>,
        uplink: Arc<U>,
    ) -> Result<(Self, RuntimeHandle)> {
        config.validate()?;

        let (event_tx, event_rx) = mpsc::channel(config.event_queue_size);
        let (discovery_tx, discovery_rx) = mpsc::channel(config.discovery_queue_size);
        let ctx = Arc::new(BridgeContext::new(&config));
        let shutdown = Arc::new(ShutdownTrigger::new());

        let handle = RuntimeHandle {
            event_tx,
            discovery_tx,
            shutdown: Arc::clone(&shutdown),
            ctx: Arc::clone(&ctx),
        };

        let runtime = Self {
            topics: TopicMapper::from_config(&config),
            config,
            mesh,
            broker,
            uplink,
            ctx,
            machine: LifecycleMachine::new(),
            event_rx,
            discovery_rx: Some(discovery_rx),
            shutdown,
            workers: None,
        };

        Ok((runtime, handle))
    }

    /// Run until shutdown or until every event sender is gone
    pub async fn run(mut self) -> Result<()> {
        info!(
            "Starting presence bridge on {} via {}",
            self.mesh.local_addr(),
            self.mesh.name()
        );

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        if let Some(discovery_rx) = self.discovery_rx.take() {
            let scanner = ScanProcessor::new(Arc::clone(&self.mesh), Arc::clone(&self.ctx), &self.config);
            tasks.push(tokio::spawn(scanner.run(discovery_rx, self.shutdown.signal())));
        }
        let receiver = NodeReceiver::new(Arc::clone(&self.mesh), Arc::clone(&self.ctx), &self.config);
        tasks.push(tokio::spawn(receiver.run(self.shutdown.signal())));

        let mut shutdown = self.shutdown.signal();
        loop {
            tokio::select! {
                maybe = self.event_rx.recv() => match maybe {
                    Some(event) => self.dispatch(event).await,
                    None => {
                        debug!("All event senders dropped");
                        break;
                    }
                },
                _ = shutdown.triggered() => {
                    info!("Bridge shutdown requested");
                    break;
                }
            }
        }

        self.shutdown.trigger();
        self.ctx.set_ready(false);

        if let Some(workers) = self.workers.take() {
            workers.join().await;
        }
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Bridge task failed: {}", e);
            }
        }
        if self.broker.is_connected() {
            if let Err(e) = self.broker.disconnect().await {
                warn!("Error stopping broker session: {}", e);
            }
        }

        info!("Presence bridge stopped");
        Ok(())
    }

    async fn dispatch(&mut self, event: LifecycleEvent) {
        let role = self.mesh.role();
        let actions = self.machine.handle(&event, role);
        info!(
            event = event.name(),
            role = %role,
            actions = actions.len(),
            "Lifecycle event"
        );

        for action in actions {
            self.execute(action).await;
        }
    }

    async fn execute(&mut self, action: LifecycleAction) {
        debug!("Executing {:?}", action);
        match action {
            LifecycleAction::AcquireAddress => {
                if let Err(e) = self.uplink.acquire_address().await {
                    error!(code = e.error_code(), "Address acquisition failed: {}", e);
                }
            }
            LifecycleAction::StartBroker => {
                if let Err(e) = self.broker.connect(&self.config.broker_url).await {
                    error!(code = e.error_code(), "Broker start failed: {}", e);
                }
            }
            LifecycleAction::StopBroker => {
                if let Err(e) = self.broker.disconnect().await {
                    warn!("Error stopping broker session: {}", e);
                }
            }
            LifecycleAction::StartWorkers => self.start_workers(),
            LifecycleAction::SubscribeCommands => {
                let filter = self.topics.command_filter();
                match self.broker.subscribe(&filter).await {
                    Ok(()) => info!("Subscribed to {}", filter),
                    Err(e) => error!(code = e.error_code(), "Subscribe failed: {}", e),
                }
            }
            LifecycleAction::PushTopology => self.push_topology().await,
            LifecycleAction::SetReady(ready) => {
                if self.ctx.set_ready(ready) != ready {
                    info!("Broker readiness now {}", ready);
                }
            }
        }
    }

    fn start_workers(&mut self) {
        if let Some(workers) = self.workers.as_mut() {
            if workers.is_running() {
                warn!("Bridge workers already running, not starting another pair");
                return;
            }
            // One of them may still be draining a previous root term
            let started = workers.restart_finished(
                Arc::clone(&self.mesh),
                Arc::clone(&self.broker),
                Arc::clone(&self.ctx),
                &self.config,
                self.shutdown.signal(),
            );
            info!("Restarted {} bridge worker(s)", started);
            return;
        }

        info!("Starting bridge workers");
        self.workers = Some(WorkerPair::spawn(
            Arc::clone(&self.mesh),
            Arc::clone(&self.broker),
            Arc::clone(&self.ctx),
            &self.config,
            self.shutdown.signal(),
        ));
    }

    async fn push_topology(&self) {
        let snapshot = TopologySnapshot::new(self.mesh.local_addr(), self.mesh.routing_table());
        let topic = self.topics.topology_topic(&snapshot.root);
        match self.broker.push_topology(&topic, &snapshot).await {
            Ok(()) => debug!(topic = %topic, nodes = snapshot.node_count(), "Pushed topology"),
            Err(e) => warn!(code = e.error_code(), topic = %topic, "Topology update failed: {}", e),
        }
    }
}
