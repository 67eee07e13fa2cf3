//! Upstream IP link of the root node

use async_trait::async_trait;

use crate::error::Result;

/// Trait for the root's upstream network interface
#[async_trait]
pub trait Uplink: Send + Sync {
    /// Begin acquiring an IP address
    ///
    /// Completion is reported as a `RootGotIp` lifecycle event.
    async fn acquire_address(&self) -> Result<()>;
}
