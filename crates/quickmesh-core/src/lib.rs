//! Quickmesh Core - shared wire types for the presence bridge
//!
//! Every node in the mesh and the root bridge agree on these shapes:
//!
//! - [`address`] - 6-byte hardware addresses for nodes and observed devices
//! - [`message`] - delta events, bridge messages and bridge commands
//! - [`topology`] - reachable-node snapshots pushed to the broker
//! - [`error`] - parse and encode errors
//!
//! # Example
//!
//! ```rust
//! use quickmesh_core::{DeltaEvent, MeshAddr};
//!
//! let observer: MeshAddr = "24:0a:c4:00:01:02".parse().unwrap();
//! let device: MeshAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();
//!
//! let payload = DeltaEvent::new(observer, device, -60).encode().unwrap();
//! let back = DeltaEvent::decode(&payload).unwrap();
//! assert_eq!(back.rssi, -60);
//! ```

pub mod address;
pub mod error;
pub mod message;
pub mod topology;

pub use address::{MeshAddr, ADDR_LEN};
pub use error::{CoreError, Result};
pub use message::{BridgeCommand, BridgeMessage, DeltaEvent, EventKind};
pub use topology::TopologySnapshot;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.contains('.'), "VERSION should be semver format");
    }
}
