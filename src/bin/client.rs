//! # Client Binary Entry Point
//!
//! Operator tool for a border cluster: key generation and one-shot control
//! requests against a single peer.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin client -- keygen
//! cargo run --bin client -- new-peer --ip 10.0.0.1 --control 10.0.0.1:5309
//! cargo run --bin client -- --cluster config/cluster.toml ping 3f9c0a1be2d47781
//! cargo run --bin client -- --cluster config/cluster.toml publisher 3f9c0a1be2d47781
//! ```

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use border::client::wait_for_acme_ready;
use border::common::config::{Config, Peer, SharedConfig};
use border::common::crypto::make_key;
use border::common::logging::init_logger;
use border::common::messages::{
    AuthCheckRequest, ConfigChainRequest, IdentifyPublisherRequest, PeerRegisterRequest,
    UptimeRequest,
};
use border::ControlClient;

/// Command-line arguments for the client binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the cluster config holding the peer directory
    #[arg(long, default_value = "config/cluster.toml")]
    cluster: PathBuf,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a fresh shared key as TOML
    Keygen {
        /// Key identifier (random if omitted)
        #[arg(long)]
        id: Option<String>,
    },
    /// Print a new peer entry (with a fresh key) as TOML
    NewPeer {
        #[arg(long = "ip", required = true)]
        ips: Vec<IpAddr>,
        #[arg(long)]
        control: SocketAddr,
    },
    /// Check a peer is alive
    Ping { peer: String },
    /// Prove the encrypted channel to a peer works
    AuthCheck { peer: String },
    /// Show how long a peer has been up
    Uptime { peer: String },
    /// Ask a peer who it considers the publisher
    Publisher { peer: String },
    /// Compare a peer's config chain with the local one
    Chain { peer: String },
    /// Register a peer from the local directory with another peer
    Register {
        /// Peer to send the registration to
        target: String,
        /// Peer entry to register
        peer: String,
    },
    /// Wait until every peer has observed an ACME challenge
    AcmeReady {
        domain: String,
        #[arg(long, default_value_t = 60)]
        deadline_secs: u64,
    },
}

async fn lookup(config: &SharedConfig, name: &str) -> Result<Peer> {
    config
        .find_peer(name)
        .await
        .ok_or_else(|| anyhow!("peer {} is not in {}", name, config.path().display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();

    let args = Args::parse();
    let client = ControlClient::new(Duration::from_millis(args.timeout_ms));

    match args.command {
        Command::Keygen { id } => {
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            println!("{}", toml::to_string_pretty(&make_key(id)?)?);
        }
        Command::NewPeer { ips, control } => {
            let key = make_key(uuid::Uuid::new_v4().to_string())?;
            let mut config = Config::default();
            config.upsert_peer(Peer::new(ips, control, key));
            println!("{}", toml::to_string_pretty(&config)?);
        }
        command => {
            let config = SharedConfig::load(&args.cluster).await?;
            run_remote(&client, &config, command).await?;
        }
    }

    Ok(())
}

async fn run_remote(client: &ControlClient, config: &SharedConfig, command: Command) -> Result<()> {
    match command {
        Command::Ping { peer } => {
            let peer = lookup(config, &peer).await?;
            client.ping(&peer).await?;
            println!("{} is alive", peer.name);
        }
        Command::AuthCheck { peer } => {
            let peer = lookup(config, &peer).await?;
            client.exchange(&peer, AuthCheckRequest::default()).await?;
            println!("channel to {} is valid", peer.name);
        }
        Command::Uptime { peer } => {
            let peer = lookup(config, &peer).await?;
            let response = client.exchange(&peer, UptimeRequest::default()).await?;
            println!("{} up for {:?}", peer.name, response.uptime);
        }
        Command::Publisher { peer } => {
            let peer = lookup(config, &peer).await?;
            let response = client
                .exchange(&peer, IdentifyPublisherRequest::default())
                .await?;
            println!("{}", response.publisher);
        }
        Command::Chain { peer } => {
            let peer = lookup(config, &peer).await?;
            let response = client.exchange(&peer, ConfigChainRequest::default()).await?;
            let divergent = config.chain().await.diverges_from(&response.chain);
            if divergent.is_empty() {
                println!("{} is in sync", peer.name);
            } else {
                println!("{} diverges in: {}", peer.name, divergent.join(", "));
            }
        }
        Command::Register { target, peer } => {
            let target = lookup(config, &target).await?;
            let peer = lookup(config, &peer).await?;
            let name = peer.name.clone();
            client
                .exchange(
                    &target,
                    PeerRegisterRequest {
                        peer,
                        nonce: Default::default(),
                    },
                )
                .await?;
            println!("registered {} with {}", name, target.name);
        }
        Command::AcmeReady {
            domain,
            deadline_secs,
        } => {
            let peers = config.peers().await;
            wait_for_acme_ready(
                client,
                &peers,
                &domain,
                Duration::from_secs(1),
                Duration::from_secs(deadline_secs),
            )
            .await?;
            println!("all peers ready for {}", domain);
        }
        other => anyhow::bail!("{:?} does not talk to a peer", other),
    }

    Ok(())
}
