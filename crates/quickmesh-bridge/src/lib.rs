//! Quickmesh Bridge - radio presence mesh to publish/subscribe broker
//!
//! Every node in a self-organizing mesh scans for nearby devices and sends
//! a compact delta event towards the root whenever a device's signal
//! strength moves enough to matter. The root holds the only IP uplink and
//! bridges traffic in both directions between the mesh and a broker.
//!
//! # Architecture
//!
//! ```text
//!  radio ──► ScanProcessor ──► ObservationCache ──► mesh (to root)
//!
//!  root only:
//!    mesh ──► InboundWorker  ──► broker   {prefix}/{node}/toCloud
//!    mesh ◄── OutboundWorker ◄── broker   {prefix}/+/toDevice
//!
//!  every node:
//!    mesh ──► NodeReceiver (log)
//!
//!  events ──► LifecycleMachine ──► actions (uplink, broker, workers, readiness)
//! ```
//!
//! The mesh stack, broker client and uplink are supplied through the traits
//! in [`interface`]. [`test_utils`] has in-memory versions of all three.
//!
//! # Readiness
//!
//! A single flag in [`BridgeContext`] says whether the broker session can
//! carry traffic. It is only ever set on the root, after the command
//! subscription and first topology push, and is cleared before the session
//! is torn down.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use quickmesh_bridge::{BridgeConfigBuilder, BridgeRuntime, LifecycleEvent};
//! use quickmesh_bridge::test_utils::{MockBroker, MockMeshNetwork, MockUplink};
//! use quickmesh_core::MeshAddr;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BridgeConfigBuilder::new()
//!         .broker_url("mqtt://10.0.0.1:1883")
//!         .delta_threshold(15)
//!         .build();
//!
//!     let root = MeshAddr::new([0x24, 0x0a, 0xc4, 0, 0, 1]);
//!     let network = MockMeshNetwork::new();
//!     let mesh = network.join(root);
//!     network.set_root(root);
//!
//!     let (runtime, handle) = BridgeRuntime::new(
//!         config,
//!         mesh,
//!         Arc::new(MockBroker::new()),
//!         Arc::new(MockUplink::new()),
//!     )?;
//!     tokio::spawn(runtime.run());
//!
//!     handle.post_event(LifecycleEvent::ParentConnected).await?;
//!     handle.report_discovery("aa:bb:cc:dd:ee:ff".parse()?, -60)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Foundations
pub mod config;
pub mod context;
pub mod error;
pub mod interface;
pub mod shutdown;

// Node side
pub mod cache;
pub mod mapper;
pub mod receiver;
pub mod scanner;

// Root side
pub mod lifecycle;
pub mod runtime;
pub mod workers;

// Testing utilities
pub mod test_utils;

pub use cache::{Observation, ObservationCache, RecordOutcome, UNKNOWN_RSSI_BASELINE};
pub use config::{
    BridgeConfig, BridgeConfigBuilder, DEFAULT_BROKER_URL, DEFAULT_CACHE_CAPACITY,
    DEFAULT_DELTA_THRESHOLD, DEFAULT_TOPIC_PREFIX,
};
pub use context::{BridgeContext, BridgeStats};
pub use error::{BridgeError, Result};
pub use interface::{BrokerClient, Destination, MeshRole, MeshTransport, RecvFilter, Uplink};
pub use lifecycle::{
    LifecycleAction, LifecycleEvent, LifecycleMachine, LifecycleState, MembershipChange,
};
pub use mapper::TopicMapper;
pub use receiver::NodeReceiver;
pub use runtime::{BridgeRuntime, RuntimeHandle};
pub use scanner::{Discovery, ScanOutcome, ScanProcessor};
pub use shutdown::{ShutdownSignal, ShutdownTrigger};
pub use workers::{InboundWorker, OutboundWorker};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
