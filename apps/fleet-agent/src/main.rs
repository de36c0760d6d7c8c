//! # Fleet Agent
//!
//! Runs the sync agent for one member cluster against the in-process
//! reference control plane.
//!
//! ## Process Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Fleet Agent Process                              │
//! │                                                                         │
//! │  REST (listen_addr) ───► MockControlPlane ◄─── churn (simulate=true)   │
//! │                                 ▲                                       │
//! │                                 │ fetch desired / push status           │
//! │                          FleetSyncAgent ───► SimulatedCluster          │
//! │                                                                         │
//! │  SIGINT / SIGTERM: churn ──► agent ──► REST, in that order             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fleet_sync::{ControlPlaneServer, FleetConfig, FleetSyncAgent, MockControlPlane};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing (RUST_LOG, default info)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    info!("Starting fleet agent...");

    let config = FleetConfig::load_or_default(None);
    config.validate().context("invalid fleet agent configuration")?;
    info!(
        cluster_id = %config.cluster_id(),
        namespace = %config.cluster.namespace,
        simulate = config.is_simulation(),
        "Configuration loaded"
    );

    let control_plane = Arc::new(MockControlPlane::new(
        config.cluster_id(),
        config.control_plane.max_workloads as usize,
    ));

    let api = ControlPlaneServer::new(config.control_plane.listen_addr.clone(), control_plane.clone())
        .start()
        .await
        .context("failed to start control plane API")?;

    let simulation = if config.is_simulation() {
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(control_plane.clone().run_simulation(config.poll_interval(), rx));
        Some((tx, task))
    } else {
        None
    };

    let mut agent = FleetSyncAgent::builder(config)
        .with_client(control_plane)
        .build()
        .context("failed to assemble fleet agent")?;
    agent.start().await.context("failed to start fleet agent")?;

    shutdown_signal().await;

    if let Some((tx, task)) = simulation {
        if tx.send(()).await.is_err() {
            warn!("Simulation already stopped");
        }
        if let Err(e) = task.await {
            warn!(?e, "Simulation task ended abnormally");
        }
    }

    agent.shutdown().await?;
    api.shutdown().await?;

    info!("Fleet agent shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(?e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
