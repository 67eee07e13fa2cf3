//! Simulated mesh of bridge runtimes
//!
//! Every node gets its own runtime, broker client and uplink over one shared
//! in-memory mesh. Node 0 is the root. Devices wander around the nodes and
//! their signal strength drifts, which is what drives delta reports.

use bytes::Bytes;
use quickmesh_bridge::test_utils::{MockBroker, MockMeshNetwork, MockUplink};
use quickmesh_bridge::{
    BridgeConfig, BridgeError, BridgeRuntime, BridgeStats, LifecycleEvent, MembershipChange,
    RuntimeHandle,
};
use quickmesh_core::{BridgeCommand, MeshAddr};
use rand::rngs::StdRng;
use rand::Rng;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Weakest signal a simulated device reports
pub const RSSI_FLOOR: i32 = -100;
/// Strongest signal a simulated device reports
pub const RSSI_CEILING: i32 = -30;

/// Node address for index `n`
pub fn node_addr(n: u16) -> MeshAddr {
    let [_, a, b, c] = (u32::from(n) + 1).to_be_bytes();
    MeshAddr::new([0x24, 0x0a, 0xc4, a, b, c])
}

/// Device address for index `n`
pub fn device_addr(n: u16) -> MeshAddr {
    let [hi, lo] = n.to_be_bytes();
    MeshAddr::new([0xaa, 0xbb, 0xcc, 0xdd, hi, lo])
}

/// Move `rssi` by at most `step` in either direction, clamped to the radio range
pub fn drift(rssi: i32, step: i32, rng: &mut impl Rng) -> i32 {
    let delta = rng.gen_range(-step..=step);
    (rssi + delta).clamp(RSSI_FLOOR, RSSI_CEILING)
}

struct SimNode {
    addr: MeshAddr,
    broker: Arc<MockBroker>,
    handle: RuntimeHandle,
    task: JoinHandle<quickmesh_bridge::Result<()>>,
}

/// A running simulated mesh
pub struct Simulation {
    network: MockMeshNetwork,
    nodes: Vec<SimNode>,
    /// Current strength of each device at each node
    signal: Vec<Vec<i32>>,
    rng: StdRng,
    next_node: u16,
    dropped_discoveries: AtomicU64,
}

impl Simulation {
    /// Start `node_count` runtimes and bring the root up
    pub fn start(
        config: &BridgeConfig,
        node_count: u16,
        device_count: u16,
        mut rng: StdRng,
    ) -> anyhow::Result<Self> {
        let network = MockMeshNetwork::new();
        let mut nodes = Vec::with_capacity(usize::from(node_count));

        for index in 0..node_count {
            let addr = node_addr(index);
            let mesh = network.join(addr);
            if index == 0 {
                network.set_root(addr);
            }

            let broker = Arc::new(MockBroker::new());
            let uplink = Arc::new(MockUplink::new());
            let (runtime, handle) =
                BridgeRuntime::new(config.clone(), mesh, Arc::clone(&broker), uplink.clone())?;

            broker.attach_events(handle.event_sender());
            let address = IpAddr::V4(Ipv4Addr::from(
                u32::from(Ipv4Addr::new(10, 0, 0, 2)) + u32::from(index),
            ));
            uplink.grant_on(handle.event_sender(), address);

            let task = tokio::spawn(runtime.run());
            nodes.push(SimNode {
                addr,
                broker,
                handle,
                task,
            });
        }

        let signal = (0..node_count)
            .map(|_| {
                (0..device_count)
                    .map(|_| rng.gen_range(RSSI_FLOOR..=RSSI_CEILING))
                    .collect()
            })
            .collect();

        Ok(Self {
            network,
            nodes,
            signal,
            rng,
            next_node: node_count,
            dropped_discoveries: AtomicU64::new(0),
        })
    }

    /// Deliver the mesh start and parent link events to every node
    pub async fn bring_up(&self) -> anyhow::Result<()> {
        for node in &self.nodes {
            node.handle.post_event(LifecycleEvent::MeshStarted).await?;
            node.handle.post_event(LifecycleEvent::ParentConnected).await?;
        }
        Ok(())
    }

    /// Wait up to `limit` for the root to become ready
    pub async fn wait_root_ready(&self, limit: Duration) -> bool {
        let Some(root) = self.nodes.first() else {
            return false;
        };
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if root.handle.is_ready() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        root.handle.is_ready()
    }

    /// One radio scan on every node
    pub fn scan_round(&mut self, step: i32) {
        for (index, node) in self.nodes.iter().enumerate() {
            for (rssi, device) in self.signal[index].iter_mut().zip(0u16..) {
                // Not every device is heard on every scan
                if !self.rng.gen_bool(0.7) {
                    continue;
                }
                *rssi = drift(*rssi, step, &mut self.rng);
                match node.handle.report_discovery(device_addr(device), *rssi) {
                    Ok(()) => {}
                    Err(BridgeError::QueueFull(_)) => {
                        self.dropped_discoveries.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => warn!("Discovery rejected on {}: {}", node.addr, e),
                }
            }
        }
    }

    /// Send a command from the broker side to a random non-root node
    pub fn send_command(&mut self) {
        if self.nodes.len() < 2 {
            return;
        }
        let target = self.rng.gen_range(1..self.nodes.len());
        let payload = serde_json::json!({ "cmd": "blink", "target": target }).to_string();
        let command = BridgeCommand::new(vec![self.nodes[target].addr], Bytes::from(payload));
        self.nodes[0].broker.inject_command(command);
        debug!("Injected command for {}", self.nodes[target].addr);
    }

    /// Add one node to the mesh and tell the root about it
    pub async fn grow(&mut self) -> anyhow::Result<()> {
        let Some(next) = self.next_node.checked_add(1) else {
            warn!("Node address space exhausted, not growing the mesh");
            return Ok(());
        };
        let addr = node_addr(self.next_node);
        self.next_node = next;
        self.network.join(addr);
        if let Some(root) = self.nodes.first() {
            root.handle
                .post_event(LifecycleEvent::MembershipChanged {
                    change: MembershipChange::Added,
                    nodes: vec![addr],
                })
                .await?;
        }
        info!("Node {} joined the mesh", addr);
        Ok(())
    }

    /// Log a summary of every node
    pub fn report(&self) {
        info!("═══════════════════════════════════════════════════════════");
        for (index, node) in self.nodes.iter().enumerate() {
            let stats: BridgeStats = node.handle.stats();
            let role = if index == 0 { "root" } else { "node" };
            info!(
                "  {} ({}) sightings={} forwarded={} suppressed={} offline={} clears={} received={}",
                node.addr,
                role,
                stats.sightings,
                stats.forwarded,
                stats.suppressed,
                stats.dropped_offline,
                stats.cache_clears,
                stats.node_messages
            );
        }
        if let Some(root) = self.nodes.first() {
            let stats = root.handle.stats();
            info!(
                "  broker: published={} publish_failures={} not_ready={} commands={} topology_pushes={}",
                stats.published,
                stats.publish_failures,
                stats.dropped_not_ready,
                stats.commands_delivered,
                root.broker.topologies().len()
            );
        }
        info!(
            "  discoveries dropped on full queue: {}",
            self.dropped_discoveries.load(Ordering::Relaxed)
        );
        info!("═══════════════════════════════════════════════════════════");
    }

    /// Shut every runtime down
    pub async fn stop(self) {
        for node in &self.nodes {
            node.handle.shutdown();
        }
        for node in self.nodes {
            match node.task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Runtime on {} failed: {}", node.addr, e),
                Err(e) => warn!("Runtime task on {} panicked: {}", node.addr, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_drift_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut rssi = RSSI_CEILING;
        for _ in 0..1000 {
            rssi = drift(rssi, 12, &mut rng);
            assert!((RSSI_FLOOR..=RSSI_CEILING).contains(&rssi));
        }
    }

    #[test]
    fn test_addresses_are_distinct() {
        assert_ne!(node_addr(0), node_addr(1));
        assert_eq!(node_addr(0).to_hex(), "240ac4000001");
        assert_eq!(node_addr(u16::MAX).to_hex(), "240ac4010000");
        assert_eq!(device_addr(3).to_hex(), "aabbccdd0003");
        assert_ne!(device_addr(0), device_addr(u16::MAX));
    }

    #[tokio::test]
    async fn test_small_mesh_bridges_deltas() {
        let config = BridgeConfig {
            idle_poll: Duration::from_millis(5),
            command_wait: Duration::from_millis(5),
            ..Default::default()
        };
        let mut sim = Simulation::start(&config, 3, 4, StdRng::seed_from_u64(1)).unwrap();
        sim.bring_up().await.unwrap();
        assert!(sim.wait_root_ready(Duration::from_secs(2)).await);

        sim.scan_round(40);
        let root = &sim.nodes[0];
        assert!(root.broker.wait_for_published(1).await);

        sim.stop().await;
    }
}
