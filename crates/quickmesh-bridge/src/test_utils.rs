//! In-memory collaborators for testing the bridge without radios or a broker
//!
//! - [`MockMeshNetwork`] / [`MockMesh`] - a shared mesh with a movable root
//! - [`MockBroker`] - records publishes and subscriptions, replays commands
//! - [`MockUplink`] - counts address requests
//!
//! The broker and uplink mocks can be attached to a runtime's event sender,
//! in which case they report `BrokerConnected`, `BrokerDisconnected` and
//! `RootGotIp` the way real clients do.
//!
//! # Example
//!
//! ```rust
//! use quickmesh_bridge::test_utils::MockMeshNetwork;
//! use quickmesh_bridge::interface::{MeshRole, MeshTransport};
//! use quickmesh_core::MeshAddr;
//!
//! let network = MockMeshNetwork::new();
//! let root = network.join(MeshAddr::new([0, 0, 0, 0, 0, 1]));
//! let leaf = network.join(MeshAddr::new([0, 0, 0, 0, 0, 2]));
//! network.set_root(root.local_addr());
//!
//! assert_eq!(root.role(), MeshRole::Root);
//! assert_eq!(leaf.role(), MeshRole::Node);
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use quickmesh_core::{BridgeCommand, BridgeMessage, MeshAddr, TopologySnapshot};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::interface::{BrokerClient, Destination, MeshRole, MeshTransport, RecvFilter, Uplink};
use crate::lifecycle::LifecycleEvent;

/// How long the `wait_for_*` helpers poll before giving up
const WAIT_LIMIT: Duration = Duration::from_secs(2);
const WAIT_STEP: Duration = Duration::from_millis(2);

async fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while tokio::time::Instant::now() < deadline {
        if done() {
            return true;
        }
        tokio::time::sleep(WAIT_STEP).await;
    }
    done()
}

async fn recv_with_timeout<T>(
    rx: &tokio::sync::Mutex<mpsc::UnboundedReceiver<T>>,
    timeout: Option<Duration>,
) -> Option<Option<T>> {
    let mut rx = rx.lock().await;
    match timeout {
        None => Some(rx.recv().await),
        Some(limit) => tokio::time::timeout(limit, rx.recv()).await.ok(),
    }
}

struct NodeSlot {
    to_root: mpsc::UnboundedSender<BridgeMessage>,
    to_self: mpsc::UnboundedSender<BridgeMessage>,
    connected: Arc<AtomicBool>,
}

#[derive(Default)]
struct NetworkInner {
    nodes: HashMap<MeshAddr, NodeSlot>,
    root: Option<MeshAddr>,
    uplinked: Vec<BridgeMessage>,
    deliveries: Vec<(MeshAddr, BridgeMessage)>,
    fail_sends: bool,
}

/// Shared in-memory mesh
#[derive(Clone, Default)]
pub struct MockMeshNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl MockMeshNetwork {
    /// Create an empty network with no root
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node and return its transport; new nodes start connected
    pub fn join(&self, addr: MeshAddr) -> Arc<MockMesh> {
        let (to_root, root_rx) = mpsc::unbounded_channel();
        let (to_self, self_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        self.inner.lock().nodes.insert(
            addr,
            NodeSlot {
                to_root,
                to_self,
                connected: Arc::clone(&connected),
            },
        );

        Arc::new(MockMesh {
            addr,
            network: self.clone(),
            root_rx: tokio::sync::Mutex::new(root_rx),
            self_rx: tokio::sync::Mutex::new(self_rx),
            connected,
        })
    }

    /// Elect a root
    pub fn set_root(&self, addr: MeshAddr) {
        self.inner.lock().root = Some(addr);
    }

    /// Leave the network without a root
    pub fn clear_root(&self) {
        self.inner.lock().root = None;
    }

    /// Current root
    pub fn root(&self) -> Option<MeshAddr> {
        self.inner.lock().root
    }

    /// Make every send fail
    pub fn set_fail_sends(&self, fail: bool) {
        self.inner.lock().fail_sends = fail;
    }

    /// Queue a root-addressed message as if `source` had sent it
    ///
    /// Returns `false` if there is no root.
    pub fn inject_to_root(&self, source: MeshAddr, payload: Bytes) -> bool {
        let inner = self.inner.lock();
        let Some(slot) = inner.root.and_then(|root| inner.nodes.get(&root)) else {
            return false;
        };
        slot.to_root.send(BridgeMessage::new(source, payload)).is_ok()
    }

    /// Every message sent towards the root, in order
    pub fn sent_to_root(&self) -> Vec<BridgeMessage> {
        self.inner.lock().uplinked.clone()
    }

    /// Every node-addressed delivery as `(destination, message)`
    pub fn deliveries(&self) -> Vec<(MeshAddr, BridgeMessage)> {
        self.inner.lock().deliveries.clone()
    }

    /// Wait until at least `count` messages went towards the root
    pub async fn wait_for_uplinked(&self, count: usize) -> bool {
        wait_until(|| self.inner.lock().uplinked.len() >= count).await
    }

    /// Wait until at least `count` node deliveries happened
    pub async fn wait_for_deliveries(&self, count: usize) -> bool {
        wait_until(|| self.inner.lock().deliveries.len() >= count).await
    }

    fn connected_nodes(&self) -> Vec<MeshAddr> {
        self.inner
            .lock()
            .nodes
            .iter()
            .filter(|(_, slot)| slot.connected.load(Ordering::Relaxed))
            .map(|(addr, _)| *addr)
            .collect()
    }
}

/// One node's view of a [`MockMeshNetwork`]
pub struct MockMesh {
    addr: MeshAddr,
    network: MockMeshNetwork,
    root_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<BridgeMessage>>,
    self_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<BridgeMessage>>,
    connected: Arc<AtomicBool>,
}

impl MockMesh {
    /// Bring this node's mesh link up or down
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    /// The network this node belongs to
    pub fn network(&self) -> &MockMeshNetwork {
        &self.network
    }
}

#[async_trait]
impl MeshTransport for MockMesh {
    async fn send(&self, destination: Destination, payload: Bytes, _confirm: bool) -> Result<()> {
        if !self.is_connected() {
            return Err(BridgeError::MeshDisconnected);
        }

        let mut guard = self.network.inner.lock();
        let inner = &mut *guard;
        if inner.fail_sends {
            return Err(BridgeError::MeshSend("injected failure".into()));
        }

        match destination {
            Destination::Root => {
                let root = inner
                    .root
                    .ok_or_else(|| BridgeError::MeshSend("no root elected".into()))?;
                let message = BridgeMessage::new(self.addr, payload);
                inner.uplinked.push(message.clone());
                if let Some(slot) = inner.nodes.get(&root) {
                    let _ = slot.to_root.send(message);
                }
                Ok(())
            }
            Destination::Nodes(targets) => {
                let mut missing = Vec::new();
                for target in targets {
                    let message = BridgeMessage::new(self.addr, payload.clone());
                    match inner.nodes.get(&target) {
                        Some(slot) => {
                            let _ = slot.to_self.send(message.clone());
                            inner.deliveries.push((target, message));
                        }
                        None => missing.push(target.to_string()),
                    }
                }
                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(BridgeError::MeshSend(format!(
                        "unknown destination(s): {}",
                        missing.join(", ")
                    )))
                }
            }
        }
    }

    async fn recv(
        &self,
        filter: RecvFilter,
        timeout: Option<Duration>,
    ) -> Result<Option<BridgeMessage>> {
        let rx = match filter {
            RecvFilter::RootAddressed if self.role() != MeshRole::Root => {
                return Err(BridgeError::NotRoot);
            }
            RecvFilter::RootAddressed => &self.root_rx,
            RecvFilter::SelfAddressed => &self.self_rx,
        };
        match recv_with_timeout(rx, timeout).await {
            None => Ok(None),
            Some(Some(message)) => Ok(Some(message)),
            Some(None) => Err(BridgeError::MeshRecv("queue closed".into())),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn role(&self) -> MeshRole {
        if self.network.root() == Some(self.addr) {
            MeshRole::Root
        } else {
            MeshRole::Node
        }
    }

    fn local_addr(&self) -> MeshAddr {
        self.addr
    }

    fn routing_table(&self) -> Vec<MeshAddr> {
        self.network.connected_nodes()
    }

    fn name(&self) -> &str {
        "mock-mesh"
    }
}

/// Recording broker client
pub struct MockBroker {
    connected: AtomicBool,
    fail_connect: AtomicBool,
    fail_publish: AtomicBool,
    fail_subscribe: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    published: Mutex<Vec<(String, Bytes)>>,
    subscriptions: Mutex<Vec<String>>,
    topologies: Mutex<Vec<(String, Bytes)>>,
    command_tx: mpsc::UnboundedSender<BridgeCommand>,
    command_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<BridgeCommand>>,
    events: Mutex<Option<mpsc::Sender<LifecycleEvent>>>,
}

impl MockBroker {
    /// Create a disconnected broker
    pub fn new() -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Self {
            connected: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            topologies: Mutex::new(Vec::new()),
            command_tx,
            command_rx: tokio::sync::Mutex::new(command_rx),
            events: Mutex::new(None),
        }
    }

    /// Report session changes on `events`
    pub fn attach_events(&self, events: mpsc::Sender<LifecycleEvent>) {
        *self.events.lock() = Some(events);
    }

    /// Make `connect` fail
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::Relaxed);
    }

    /// Make `publish` fail
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::Relaxed);
    }

    /// Make `subscribe` fail
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::Relaxed);
    }

    /// Queue a downstream command
    pub fn inject_command(&self, command: BridgeCommand) {
        let _ = self.command_tx.send(command);
    }

    /// Drop the session as if the server went away
    pub fn drop_session(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            self.notify(LifecycleEvent::BrokerDisconnected);
        }
    }

    /// Every publish as `(topic, payload)`
    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.published.lock().clone()
    }

    /// Subscribed topic filters
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    /// Pushed topology snapshots
    pub fn topologies(&self) -> Vec<TopologySnapshot> {
        self.topologies
            .lock()
            .iter()
            .filter_map(|(_, body)| TopologySnapshot::from_json(body).ok())
            .collect()
    }

    /// Topics topology snapshots were pushed on, in order
    pub fn topology_topics(&self) -> Vec<String> {
        self.topologies
            .lock()
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    /// Number of successful connects
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::Relaxed)
    }

    /// Number of disconnects that ended a session
    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::Relaxed)
    }

    /// Wait until at least `count` publishes were recorded
    pub async fn wait_for_published(&self, count: usize) -> bool {
        wait_until(|| self.published.lock().len() >= count).await
    }

    /// Wait until at least `count` topology pushes were recorded
    pub async fn wait_for_topologies(&self, count: usize) -> bool {
        wait_until(|| self.topologies.lock().len() >= count).await
    }

    fn notify(&self, event: LifecycleEvent) {
        if let Some(events) = self.events.lock().as_ref() {
            if let Err(e) = events.try_send(event) {
                debug!("Mock broker could not report event: {}", e);
            }
        }
    }
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn connect(&self, endpoint: &str) -> Result<()> {
        if self.fail_connect.load(Ordering::Relaxed) {
            return Err(BridgeError::BrokerConnect {
                endpoint: endpoint.to_string(),
                reason: "injected failure".into(),
            });
        }
        self.connects.fetch_add(1, Ordering::Relaxed);
        if !self.connected.swap(true, Ordering::AcqRel) {
            self.notify(LifecycleEvent::BrokerConnected);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.connected.swap(false, Ordering::AcqRel) {
            self.disconnects.fetch_add(1, Ordering::Relaxed);
            self.notify(LifecycleEvent::BrokerDisconnected);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(BridgeError::BrokerDisconnected);
        }
        if self.fail_publish.load(Ordering::Relaxed) {
            return Err(BridgeError::BrokerPublish {
                topic: topic.to_string(),
                reason: "injected failure".into(),
            });
        }
        self.published.lock().push((topic.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        if !self.is_connected() || self.fail_subscribe.load(Ordering::Relaxed) {
            return Err(BridgeError::BrokerSubscribe {
                topic: topic.to_string(),
                reason: "session unavailable".into(),
            });
        }
        self.subscriptions.lock().push(topic.to_string());
        Ok(())
    }

    async fn next_command(&self, timeout: Duration) -> Result<Option<BridgeCommand>> {
        if !self.is_connected() {
            return Err(BridgeError::BrokerDisconnected);
        }
        match recv_with_timeout(&self.command_rx, Some(timeout)).await {
            Some(Some(command)) => Ok(Some(command)),
            Some(None) => Err(BridgeError::ChannelClosed),
            None => Ok(None),
        }
    }

    async fn push_topology(&self, topic: &str, snapshot: &TopologySnapshot) -> Result<()> {
        if !self.is_connected() {
            return Err(BridgeError::TopologyUpdate("broker not connected".into()));
        }
        let body = snapshot.to_json()?;
        self.topologies
            .lock()
            .push((topic.to_string(), Bytes::from(body)));
        Ok(())
    }
}

/// Uplink that optionally reports an address straight away
pub struct MockUplink {
    requests: AtomicUsize,
    grant: Mutex<Option<(mpsc::Sender<LifecycleEvent>, IpAddr)>>,
}

impl MockUplink {
    /// Create an uplink that never reports an address
    pub fn new() -> Self {
        Self {
            requests: AtomicUsize::new(0),
            grant: Mutex::new(None),
        }
    }

    /// Report `RootGotIp { address }` on `events` for every request
    pub fn grant_on(&self, events: mpsc::Sender<LifecycleEvent>, address: IpAddr) {
        *self.grant.lock() = Some((events, address));
    }

    /// Number of address requests
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }
}

impl Default for MockUplink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Uplink for MockUplink {
    async fn acquire_address(&self) -> Result<()> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if let Some((events, address)) = self.grant.lock().as_ref() {
            events
                .try_send(LifecycleEvent::RootGotIp { address: *address })
                .map_err(|e| BridgeError::AddressAcquisition(e.to_string()))?;
        }
        Ok(())
    }
}
