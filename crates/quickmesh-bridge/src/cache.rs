//! Observation cache for delta filtering
//!
//! Nodes hear the same nearby devices over and over. The cache remembers the
//! last forwarded signal strength per device so the scan path can suppress
//! reports that have not moved by at least the configured threshold.
//!
//! # Overflow
//!
//! The table holds at most `capacity` devices. When an insertion would
//! exceed that, the whole table is cleared and the insertion is dropped.
//! There is no partial eviction: callers must tolerate a device being
//! forgotten, which only causes its next sighting to be forwarded.
//!
//! # Locking
//!
//! The forwarding decision reads and then writes the same entry, so
//! [`ObservationCache::observe`] runs lookup and record under one exclusive
//! lock. Cloned handles share the same table.

use parking_lot::Mutex;
use quickmesh_core::MeshAddr;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, trace};

use crate::config::BridgeConfig;

/// Baseline used for a device the cache does not know
pub const UNKNOWN_RSSI_BASELINE: i32 = 0;

/// Outcome of [`ObservationCache::record`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The entry was inserted or updated
    Accepted,
    /// Inserting would have exceeded capacity; the table is now empty
    TableCleared,
}

/// Result of one atomic delta decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Last recorded strength, `None` if the device was unknown
    pub previous: Option<i32>,
    /// Whether the change met the threshold
    pub forward: bool,
    /// Set when the sighting was forwarded and the record cleared the table
    pub cleared: bool,
}

/// Bounded per-device last-seen signal strength
#[derive(Debug)]
pub struct ObservationCache {
    entries: Arc<Mutex<HashMap<MeshAddr, i32>>>,
    capacity: usize,
}

impl ObservationCache {
    /// Create a cache holding at most `capacity` devices
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Arc::new(Mutex::new(HashMap::with_capacity(capacity))),
            capacity,
        }
    }

    /// Create from bridge configuration
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::with_capacity(config.cache_capacity)
    }

    /// Last recorded strength for a device
    pub fn lookup(&self, addr: &MeshAddr) -> Option<i32> {
        self.entries.lock().get(addr).copied()
    }

    /// Insert or update a device's strength
    pub fn record(&self, addr: MeshAddr, rssi: i32) -> RecordOutcome {
        let mut entries = self.entries.lock();
        Self::record_locked(&mut entries, self.capacity, addr, rssi)
    }

    /// Lookup, threshold check and record as one atomic decision
    ///
    /// The entry is only written when the sighting is forwarded.
    pub fn observe(&self, addr: MeshAddr, rssi: i32, threshold: u32) -> Observation {
        let mut entries = self.entries.lock();

        let previous = entries.get(&addr).copied();
        let baseline = previous.unwrap_or(UNKNOWN_RSSI_BASELINE);
        let forward = rssi.abs_diff(baseline) >= threshold;

        let cleared = forward
            && Self::record_locked(&mut entries, self.capacity, addr, rssi)
                == RecordOutcome::TableCleared;

        trace!(device = %addr, rssi, ?previous, forward, "Observation evaluated");
        Observation {
            previous,
            forward,
            cleared,
        }
    }

    fn record_locked(
        entries: &mut HashMap<MeshAddr, i32>,
        capacity: usize,
        addr: MeshAddr,
        rssi: i32,
    ) -> RecordOutcome {
        if let Some(existing) = entries.get_mut(&addr) {
            *existing = rssi;
            return RecordOutcome::Accepted;
        }

        if entries.len() >= capacity {
            entries.clear();
            info!(capacity, "Observation cache full, table cleared");
            return RecordOutcome::TableCleared;
        }

        entries.insert(addr, rssi);
        RecordOutcome::Accepted
    }

    /// Number of tracked devices
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of tracked devices
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Forget every device
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for ObservationCache {
    fn default() -> Self {
        Self::with_capacity(crate::config::DEFAULT_CACHE_CAPACITY)
    }
}

impl Clone for ObservationCache {
    fn clone(&self) -> Self {
        // Shares the underlying table
        Self {
            entries: Arc::clone(&self.entries),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u16) -> MeshAddr {
        let [hi, lo] = n.to_be_bytes();
        MeshAddr::new([0x10, 0x20, 0x30, 0x40, hi, lo])
    }

    #[test]
    fn test_record_then_lookup() {
        let cache = ObservationCache::with_capacity(4);
        assert_eq!(cache.lookup(&addr(1)), None);

        assert_eq!(cache.record(addr(1), -60), RecordOutcome::Accepted);
        assert_eq!(cache.lookup(&addr(1)), Some(-60));

        assert_eq!(cache.record(addr(1), -72), RecordOutcome::Accepted);
        assert_eq!(cache.lookup(&addr(1)), Some(-72));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_update_at_capacity_does_not_clear() {
        let cache = ObservationCache::with_capacity(2);
        cache.record(addr(1), -50);
        cache.record(addr(2), -50);

        assert_eq!(cache.record(addr(2), -90), RecordOutcome::Accepted);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_overflow_clears_whole_table() {
        let cache = ObservationCache::with_capacity(128);
        for i in 0..128 {
            assert_eq!(cache.record(addr(i), -40), RecordOutcome::Accepted);
        }
        assert_eq!(cache.len(), 128);

        assert_eq!(cache.record(addr(128), -40), RecordOutcome::TableCleared);
        assert!(cache.is_empty());
        assert_eq!(cache.lookup(&addr(128)), None);
        assert_eq!(cache.lookup(&addr(0)), None);

        // The table is usable again straight away
        assert_eq!(cache.record(addr(128), -41), RecordOutcome::Accepted);
        assert_eq!(cache.lookup(&addr(128)), Some(-41));
    }

    #[test]
    fn test_observe_threshold_boundary() {
        let cache = ObservationCache::with_capacity(8);

        // Unknown device is compared against 0
        let first = cache.observe(addr(1), -15, 15);
        assert!(first.forward);
        assert_eq!(first.previous, None);

        let below = cache.observe(addr(1), -29, 15);
        assert!(!below.forward);
        assert_eq!(cache.lookup(&addr(1)), Some(-15));

        let exact = cache.observe(addr(1), -30, 15);
        assert!(exact.forward);
        assert_eq!(exact.previous, Some(-15));
        assert_eq!(cache.lookup(&addr(1)), Some(-30));
    }

    #[test]
    fn test_observe_unknown_weak_change_is_not_recorded() {
        let cache = ObservationCache::with_capacity(8);
        let obs = cache.observe(addr(1), -14, 15);
        assert!(!obs.forward);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_observe_reports_clear() {
        let cache = ObservationCache::with_capacity(1);
        assert!(!cache.observe(addr(1), -60, 15).cleared);

        let obs = cache.observe(addr(2), -60, 15);
        assert!(obs.forward);
        assert!(obs.cleared);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_presence_scenario() {
        let cache = ObservationCache::default();
        let device: MeshAddr = "AA:BB:CC:DD:EE:FF".parse().unwrap();

        assert!(cache.observe(device, -60, 15).forward);
        assert_eq!(cache.lookup(&device), Some(-60));

        assert!(!cache.observe(device, -65, 15).forward);
        assert_eq!(cache.lookup(&device), Some(-60));

        assert!(cache.observe(device, -80, 15).forward);
        assert_eq!(cache.lookup(&device), Some(-80));
    }

    #[test]
    fn test_clone_shares_table() {
        let a = ObservationCache::with_capacity(4);
        let b = a.clone();
        a.record(addr(7), -70);
        assert_eq!(b.lookup(&addr(7)), Some(-70));
        assert_eq!(b.capacity(), 4);
    }

    #[test]
    fn test_from_config() {
        let config = BridgeConfig {
            cache_capacity: 32,
            ..Default::default()
        };
        assert_eq!(ObservationCache::from_config(&config).capacity(), 32);
    }
}
