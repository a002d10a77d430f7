//! # Server Binary Entry Point
//!
//! Runs one border node's control plane.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin server -- --config config/node1.toml
//! ```
//!
//! The server will:
//! 1. Load node settings and the cluster config they point at
//! 2. Start the control server (nonce issuance, endpoint dispatch, nonce sweep)
//! 3. Retry the publisher election every interval until it succeeds
//! 4. Shut down cleanly on Ctrl-C

use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

use border::common::acme::AcmeChallenges;
use border::common::config::{load_config, NodeSettings, SharedConfig};
use border::common::logging::init_logger;
use border::{ControlClient, ControlServer, Election};

/// Command-line arguments for the server binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the node settings file (TOML format)
    ///
    /// Example: config/node1.toml
    #[arg(short, long)]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();
    let settings: NodeSettings = load_config(&args.config)?;

    let config = Arc::new(
        SharedConfig::load(&settings.node.cluster_config)
            .await
            .context("loading cluster config")?,
    );
    if config.find_peer(&settings.node.name).await.is_none() {
        anyhow::bail!(
            "node {} is not in the peer directory at {}",
            settings.node.name,
            config.path().display()
        );
    }

    let client = Arc::new(ControlClient::new(Duration::from_millis(
        settings.control.request_timeout_ms,
    )));
    let election = Arc::new(Election::new(
        settings.node.name.clone(),
        config.clone(),
        client,
    ));

    let server = ControlServer::new(
        config,
        election.clone(),
        Arc::new(AcmeChallenges::new()),
        &settings.control,
    );
    let handle = server.bind(settings.node.listen).await?;

    info!(
        "🚀 Node {} started (election #{})",
        settings.node.name,
        election.index()
    );

    // Elections fail as a whole while any peer is unreachable; keep trying.
    let interval = Duration::from_secs(settings.election.interval_secs);
    let elector = election.clone();
    let election_task = tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            match elector.elect().await {
                Ok(publisher) => {
                    info!("👑 Publisher is {}", publisher.name);
                    break;
                }
                Err(e) => warn!("⚠️  Election attempt failed: {}", e),
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    election_task.abort();
    handle.shutdown().await?;

    Ok(())
}
