//! State shared between the runtime and every bridge loop
//!
//! The scan path, both bridge workers, the node receive loop and the
//! lifecycle executor each hold an `Arc<BridgeContext>`. It carries the
//! observation cache, the broker readiness flag and the counters.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::cache::ObservationCache;
use crate::config::BridgeConfig;

/// Bridge statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Discoveries handed to the scan processor
    pub sightings: u64,
    /// Delta events submitted towards the root
    pub forwarded: u64,
    /// Sightings below the delta threshold
    pub suppressed: u64,
    /// Deltas dropped because the link was down
    pub dropped_offline: u64,
    /// Times the observation cache overflowed and was cleared
    pub cache_clears: u64,
    /// Mesh sends of delta events that failed
    pub send_failures: u64,
    /// Mesh messages published to the broker
    pub published: u64,
    /// Broker publishes that failed
    pub publish_failures: u64,
    /// Mesh messages dropped because the broker was not ready
    pub dropped_not_ready: u64,
    /// Broker commands delivered into the mesh
    pub commands_delivered: u64,
    /// Broker commands the mesh refused
    pub command_failures: u64,
    /// Messages received by the node receive loop
    pub node_messages: u64,
}

/// Lock-free counters behind [`BridgeStats`]
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    pub sightings: AtomicU64,
    pub forwarded: AtomicU64,
    pub suppressed: AtomicU64,
    pub dropped_offline: AtomicU64,
    pub cache_clears: AtomicU64,
    pub send_failures: AtomicU64,
    pub published: AtomicU64,
    pub publish_failures: AtomicU64,
    pub dropped_not_ready: AtomicU64,
    pub commands_delivered: AtomicU64,
    pub command_failures: AtomicU64,
    pub node_messages: AtomicU64,
}

impl StatsRecorder {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BridgeStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        BridgeStats {
            sightings: load(&self.sightings),
            forwarded: load(&self.forwarded),
            suppressed: load(&self.suppressed),
            dropped_offline: load(&self.dropped_offline),
            cache_clears: load(&self.cache_clears),
            send_failures: load(&self.send_failures),
            published: load(&self.published),
            publish_failures: load(&self.publish_failures),
            dropped_not_ready: load(&self.dropped_not_ready),
            commands_delivered: load(&self.commands_delivered),
            command_failures: load(&self.command_failures),
            node_messages: load(&self.node_messages),
        }
    }
}

/// Shared bridge state
#[derive(Debug)]
pub struct BridgeContext {
    cache: ObservationCache,
    ready: AtomicBool,
    pub(crate) stats: StatsRecorder,
}

impl BridgeContext {
    /// Create a context with an empty cache and readiness cleared
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            cache: ObservationCache::from_config(config),
            ready: AtomicBool::new(false),
            stats: StatsRecorder::default(),
        }
    }

    /// The observation cache
    pub fn cache(&self) -> &ObservationCache {
        &self.cache
    }

    /// Whether the broker session is ready to carry traffic
    ///
    /// Only ever true on the root.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Written only by the lifecycle executor
    pub(crate) fn set_ready(&self, ready: bool) -> bool {
        self.ready.swap(ready, Ordering::AcqRel)
    }

    /// Current counters
    pub fn stats(&self) -> BridgeStats {
        self.stats.snapshot()
    }
}

impl Default for BridgeContext {
    fn default() -> Self {
        Self::new(&BridgeConfig::default())
    }
}
