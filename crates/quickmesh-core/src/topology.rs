//! Topology snapshots pushed to the broker
//!
//! The broker side uses the snapshot to learn which node addresses are
//! currently reachable through this root.

use serde::{Deserialize, Serialize};

use crate::address::MeshAddr;
use crate::error::{CoreError, Result};

/// Reachable mesh nodes as seen from the root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    /// Address of the root node publishing the snapshot
    pub root: MeshAddr,
    /// Every node in the root's routing table, root included
    pub nodes: Vec<MeshAddr>,
}

impl TopologySnapshot {
    /// Build a snapshot; node order is normalized and duplicates dropped
    pub fn new(root: MeshAddr, mut nodes: Vec<MeshAddr>) -> Self {
        nodes.sort();
        nodes.dedup();
        Self { root, nodes }
    }

    /// Number of reachable nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Check whether a node is reachable
    pub fn contains(&self, addr: &MeshAddr) -> bool {
        self.nodes.binary_search(addr).is_ok()
    }

    /// JSON body: `{"root":"<hex>","nodes":["<hex>",...]}`
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CoreError::Encode(e.to_string()))
    }

    /// Parse a body produced by [`TopologySnapshot::to_json`]
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_slice(data).map_err(|e| CoreError::Decode(e.to_string()))?;
        Ok(Self::new(snapshot.root, snapshot.nodes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_normalizes() {
        let root = MeshAddr::new([0, 0, 0, 0, 0, 1]);
        let a = MeshAddr::new([0, 0, 0, 0, 0, 3]);
        let b = MeshAddr::new([0, 0, 0, 0, 0, 2]);
        let snap = TopologySnapshot::new(root, vec![a, root, b, a]);

        assert_eq!(snap.node_count(), 3);
        assert_eq!(snap.nodes, vec![root, b, a]);
        assert!(snap.contains(&b));
        assert!(!snap.contains(&MeshAddr::BROADCAST));
    }

    #[test]
    fn test_snapshot_json() {
        let root = MeshAddr::new([0, 0, 0, 0, 0, 1]);
        let snap = TopologySnapshot::new(root, vec![root]);
        let json = String::from_utf8(snap.to_json().unwrap()).unwrap();
        assert_eq!(json, r#"{"root":"000000000001","nodes":["000000000001"]}"#);
    }

    #[test]
    fn test_snapshot_from_json_normalizes() {
        let raw = br#"{"root":"000000000001","nodes":["000000000002","000000000001","000000000002"]}"#;
        let snap = TopologySnapshot::from_json(raw).unwrap();
        assert_eq!(snap.node_count(), 2);
        assert!(snap.contains(&MeshAddr::new([0, 0, 0, 0, 0, 2])));

        assert!(matches!(
            TopologySnapshot::from_json(b"{}"),
            Err(CoreError::Decode(_))
        ));
    }
}
