//! Quickmesh Sim - drive the presence bridge with a simulated mesh
//!
//! Starts one bridge runtime per simulated node over an in-memory mesh,
//! feeds them drifting device sightings and prints what reached the broker.

mod simulation;

use clap::Parser;
use quickmesh_bridge::BridgeConfig;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use simulation::Simulation;

#[derive(Parser)]
#[command(name = "quickmesh-sim")]
#[command(about = "Simulated presence mesh bridged to an in-memory broker")]
struct Args {
    /// JSON bridge configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Number of mesh nodes (node 0 is the root)
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u16).range(1..=200))]
    nodes: u16,

    /// Number of advertising devices
    #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u16).range(0..=4096))]
    devices: u16,

    /// How long to run, in seconds
    #[arg(long, default_value_t = 10)]
    duration: u64,

    /// Interval between scan rounds, in milliseconds
    #[arg(long, default_value_t = 250)]
    scan_interval: u64,

    /// Largest per-scan signal change, in dBm
    #[arg(long, default_value_t = 8)]
    drift: i32,

    /// Override the delta threshold
    #[arg(long)]
    threshold: Option<u32>,

    /// Override the broker endpoint
    #[arg(long)]
    broker_url: Option<String>,

    /// RNG seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

async fn load_config(args: &Args) -> anyhow::Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let data = tokio::fs::read_to_string(path).await?;
            BridgeConfig::from_json(&data)?
        }
        None => BridgeConfig::default(),
    };

    if let Some(threshold) = args.threshold {
        config.delta_threshold = threshold;
    }
    if let Some(url) = &args.broker_url {
        config.broker_url = url.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --verbose
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&args).await?;
    info!(
        "Starting simulation: {} node(s), {} device(s), threshold {} dBm, broker {}",
        args.nodes, args.devices, config.delta_threshold, config.broker_url
    );

    let mut sim = Simulation::start(
        &config,
        args.nodes,
        args.devices,
        StdRng::seed_from_u64(args.seed),
    )?;
    sim.bring_up().await?;

    if sim.wait_root_ready(Duration::from_secs(5)).await {
        info!("Root bridge is ready");
    } else {
        warn!("Root bridge not ready after 5s, sightings will be dropped");
    }

    let deadline = Instant::now() + Duration::from_secs(args.duration);
    let mut ticker = tokio::time::interval(Duration::from_millis(args.scan_interval.max(1)));
    let mut round: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if Instant::now() >= deadline {
                    break;
                }
                round += 1;
                sim.scan_round(args.drift.max(0));
                if round % 10 == 0 {
                    sim.send_command();
                }
                if round % 25 == 0 {
                    sim.grow().await?;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    info!("Ran {} scan round(s)", round);
    sim.report();
    sim.stop().await;
    Ok(())
}
