//! Scan event processing
//!
//! Every node's radio reports nearby devices. A sighting is turned into a
//! delta event and sent towards the root only when the device's signal
//! strength moved by at least the configured threshold since the last
//! forwarded sighting.

use bytes::Bytes;
use quickmesh_core::{DeltaEvent, MeshAddr};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::BridgeConfig;
use crate::context::{BridgeContext, StatsRecorder};
use crate::interface::{Destination, MeshRole, MeshTransport};
use crate::shutdown::ShutdownSignal;

/// One device sighting from the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discovery {
    /// Hardware address of the advertising device
    pub device: MeshAddr,
    /// Received signal strength in dBm
    pub rssi: i32,
}

impl Discovery {
    /// Create a sighting
    pub fn new(device: MeshAddr, rssi: i32) -> Self {
        Self { device, rssi }
    }
}

/// What happened to a sighting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Change below threshold, nothing sent
    Suppressed,
    /// Delta event handed to the mesh
    Forwarded,
    /// Change met the threshold but the link was down
    DroppedOffline,
    /// The mesh refused the send
    SendFailed,
}

/// Turns sightings into delta events
pub struct ScanProcessor<M> {
    mesh: Arc<M>,
    ctx: Arc<BridgeContext>,
    threshold: u32,
}

impl<M: MeshTransport + 'static> ScanProcessor<M> {
    /// Create a processor
    pub fn new(mesh: Arc<M>, ctx: Arc<BridgeContext>, config: &BridgeConfig) -> Self {
        Self {
            mesh,
            ctx,
            threshold: config.delta_threshold,
        }
    }

    /// Whether a delta event may be handed to the mesh right now
    ///
    /// Every node needs a live mesh link. The root additionally needs the
    /// broker to be ready, since it would only be sending to itself.
    pub fn link_up(&self) -> bool {
        self.mesh.is_connected()
            && (self.mesh.role() != MeshRole::Root || self.ctx.is_ready())
    }

    /// Process one sighting
    pub async fn process(&self, discovery: Discovery) -> ScanOutcome {
        let stats = &self.ctx.stats;
        StatsRecorder::bump(&stats.sightings);

        let observation = self
            .ctx
            .cache()
            .observe(discovery.device, discovery.rssi, self.threshold);
        if observation.cleared {
            StatsRecorder::bump(&stats.cache_clears);
        }

        if !observation.forward {
            trace!(
                device = %discovery.device,
                rssi = discovery.rssi,
                last = ?observation.previous,
                "Suppressed sighting"
            );
            StatsRecorder::bump(&stats.suppressed);
            return ScanOutcome::Suppressed;
        }

        if !self.link_up() {
            debug!(
                device = %discovery.device,
                rssi = discovery.rssi,
                "Link down, dropping delta"
            );
            StatsRecorder::bump(&stats.dropped_offline);
            return ScanOutcome::DroppedOffline;
        }

        let event = DeltaEvent::new(self.mesh.local_addr(), discovery.device, discovery.rssi);
        let payload: Bytes = match event.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(device = %discovery.device, "Failed to encode delta event: {}", e);
                StatsRecorder::bump(&stats.send_failures);
                return ScanOutcome::SendFailed;
            }
        };

        match self.mesh.send(Destination::Root, payload, false).await {
            Ok(()) => {
                debug!(
                    device = %discovery.device,
                    rssi = discovery.rssi,
                    last = ?observation.previous,
                    "Forwarded delta"
                );
                StatsRecorder::bump(&stats.forwarded);
                ScanOutcome::Forwarded
            }
            Err(e) => {
                warn!(
                    code = e.error_code(),
                    device = %discovery.device,
                    "Delta send failed: {}",
                    e
                );
                StatsRecorder::bump(&stats.send_failures);
                ScanOutcome::SendFailed
            }
        }
    }

    /// Consume sightings until the channel closes or shutdown
    pub async fn run(self, mut discoveries: mpsc::Receiver<Discovery>, mut shutdown: ShutdownSignal) {
        info!(node = %self.mesh.local_addr(), "Scan processor running");

        loop {
            tokio::select! {
                maybe = discoveries.recv() => match maybe {
                    Some(discovery) => {
                        self.process(discovery).await;
                    }
                    None => {
                        debug!("Discovery channel closed");
                        break;
                    }
                },
                _ = shutdown.triggered() => break,
            }
        }

        info!("Scan processor stopped");
    }
}
