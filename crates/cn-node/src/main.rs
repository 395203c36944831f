//! cn-node: runs one logical CAN node described by a DBC database.
//!
//! Transmits every message the node sends on its cycle time and logs every
//! message it receives, until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use cn_dbc::Database;
use cn_node::config::NodeConfig;
use cn_node::{node, status};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "cn-node starting");

    // ── Load config ─────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/cn-node/node.toml".to_string());

    let config = NodeConfig::from_file(&config_path)?;
    tracing::info!(
        node = %config.node,
        can_interface = %config.can_interface,
        "config loaded"
    );

    // ── Load database ───────────────────────────────────────────
    let json = std::fs::read_to_string(&config.database_path)?;
    let db = Arc::new(Database::from_json(&json)?);
    let stats = db.stats();
    tracing::info!(
        version = db.version(),
        messages = stats.num_messages,
        signals = stats.num_signals,
        nodes = stats.num_nodes,
        multiplexed = stats.num_multiplexed,
        "database loaded"
    );

    // ── CAN interface ───────────────────────────────────────────
    let transport = Arc::new(open_transport(&config.can_interface)?);

    // ── Runner ──────────────────────────────────────────────────
    let mut node = node::build(&config, db, transport.clone(), transport)?;
    node.runner.start()?;

    tracing::info!("cn-node ready");

    tokio::select! {
        () = status::run(&node.runner, Duration::from_secs(config.status_interval_secs)) => {
            tracing::error!("status loop exited unexpectedly");
        }
        // Graceful shutdown on SIGINT/SIGTERM
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    node.runner.stop().await?;
    tracing::info!("cn-node stopped");
    Ok(())
}

#[cfg(target_os = "linux")]
fn open_transport(interface: &str) -> anyhow::Result<cn_runner::SocketCanTransport> {
    Ok(cn_runner::SocketCanTransport::open(interface)?)
}

#[cfg(not(target_os = "linux"))]
fn open_transport(interface: &str) -> anyhow::Result<cn_runner::mock::MockTransport> {
    tracing::warn!(interface, "SocketCAN is Linux-only, using an idle mock transport");
    Ok(cn_runner::mock::MockTransport::new())
}
