//! # Configuration
//!
//! Two kinds of configuration live here:
//!
//! - [`NodeSettings`]: node-local settings (who am I, where do I listen), loaded
//!   once at startup from a TOML file with [`load_config`].
//! - [`Config`]: the cluster configuration shared by all peers (the peer
//!   directory plus zone and listener data consumed by the DNS and load
//!   balancer services). It is held in a [`SharedConfig`] which owns the lock
//!   guarding every edit and knows how to persist itself.
//!
//! ## Chain
//!
//! Peers compare [`ConfigChain`]s to detect divergence: one SHA-256 checksum
//! per configuration section.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{RwLock, RwLockReadGuard};

use super::crypto::SymmetricKey;

/// Load a TOML configuration file and deserialize it into the specified type.
///
/// # Example
/// ```ignore
/// let settings: NodeSettings = load_config("config/node1.toml")?;
/// ```
pub fn load_config<T>(path: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)?;
    let config: T = toml::from_str(&content)?;
    Ok(config)
}

// ============================================================================
// NODE SETTINGS
// ============================================================================

/// Node-local settings, one file per node.
///
/// # Example TOML
///
/// ```toml
/// [node]
/// name = "3f9c0a1be2d47781"
/// listen = "0.0.0.0:5309"
/// cluster_config = "config/cluster.toml"
///
/// [control]
/// nonce_expiry_secs = 30
/// request_timeout_ms = 1000
/// max_body_bytes = 1048576
///
/// [election]
/// interval_secs = 10
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    pub node: NodeInfo,
    #[serde(default)]
    pub control: ControlSettings,
    #[serde(default)]
    pub election: ElectionSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Name of this node's entry in the peer directory
    pub name: String,
    /// Address the control server binds to
    pub listen: SocketAddr,
    /// Path of the persisted cluster configuration
    pub cluster_config: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlSettings {
    /// How long an issued nonce stays valid; also the sweep period
    pub nonce_expiry_secs: u64,
    /// Timeout applied to each leg of an outbound exchange
    pub request_timeout_ms: u64,
    /// Largest accepted request body
    pub max_body_bytes: usize,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            nonce_expiry_secs: 30,
            request_timeout_ms: 1000,
            max_body_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionSettings {
    /// Delay between election attempts until a publisher is elected
    pub interval_secs: u64,
}

impl Default for ElectionSettings {
    fn default() -> Self {
        Self { interval_secs: 10 }
    }
}

// ============================================================================
// PEERS
// ============================================================================

/// A member of the border quorum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Identity, derived from `ips` by [`Peer::derive_name`]
    pub name: String,
    /// Addresses the peer serves DNS and balanced traffic on
    pub ips: Vec<IpAddr>,
    /// Address of the peer's control server
    pub control_server: SocketAddr,
    /// Shared key used for every message addressed to this peer
    pub key: SymmetricKey,
}

impl Peer {
    /// Build a peer whose name is derived from its addresses.
    pub fn new(ips: Vec<IpAddr>, control_server: SocketAddr, key: SymmetricKey) -> Self {
        Self {
            name: Self::derive_name(&ips),
            ips,
            control_server,
            key,
        }
    }

    /// Stable name for a set of addresses: order-insensitive, 16 hex chars.
    pub fn derive_name(ips: &[IpAddr]) -> String {
        let mut sorted: Vec<String> = ips.iter().map(IpAddr::to_string).collect();
        sorted.sort();

        let digest = Sha256::digest(sorted.join(",").as_bytes());
        hex_string(&digest[..8])
    }
}

// ============================================================================
// CLUSTER CONFIG
// ============================================================================

/// Cluster-wide configuration replicated between peers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Peer directory keyed by peer name
    #[serde(default)]
    pub peers: BTreeMap<String, Peer>,
    /// DNS zone data, opaque to the control plane
    #[serde(default)]
    pub zones: toml::Table,
    /// Load balancer listener data, opaque to the control plane
    #[serde(default)]
    pub listeners: toml::Table,
}

impl Config {
    pub fn find_peer(&self, name: &str) -> Option<&Peer> {
        self.peers.get(name)
    }

    /// Insert `peer`, replacing any existing entry with the same name.
    pub fn upsert_peer(&mut self, peer: Peer) {
        self.peers.insert(peer.name.clone(), peer);
    }

    /// Checksum summary of every section.
    pub fn chain(&self) -> ConfigChain {
        let mut sections = BTreeMap::new();
        sections.insert("peers".to_string(), section_sum(&self.peers));
        sections.insert("zones".to_string(), section_sum(&self.zones));
        sections.insert("listeners".to_string(), section_sum(&self.listeners));
        ConfigChain { sections }
    }
}

/// Per-section checksums of a [`Config`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChain {
    pub sections: BTreeMap<String, String>,
}

impl ConfigChain {
    /// Names of the sections whose checksum differs from `other`.
    pub fn diverges_from(&self, other: &ConfigChain) -> Vec<String> {
        let names: BTreeSet<&String> = self
            .sections
            .keys()
            .chain(other.sections.keys())
            .filter(|name| self.sections.get(*name) != other.sections.get(*name))
            .collect();
        names.into_iter().cloned().collect()
    }
}

fn section_sum<T: Serialize>(section: &T) -> String {
    // BTreeMap-backed sections serialize in key order, so the encoding is stable.
    let encoded = serde_json::to_vec(section).unwrap_or_default();
    hex_string(&Sha256::digest(&encoded))
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// ============================================================================
// PERSISTENCE
// ============================================================================

/// Which side of persistence failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOp {
    Dump,
    Load,
}

impl fmt::Display for PersistOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistOp::Dump => write!(f, "dump"),
            PersistOp::Load => write!(f, "load"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config {op} failed for {}: {source}", path.display())]
    Persistence {
        op: PersistOp,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config at {} is malformed: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("config could not be encoded: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// The live cluster configuration plus the lock that guards its edits.
///
/// Readers share the lock; `replace`, `upsert_peer` and `reload` take it
/// exclusively, so no edit is ever observed half-applied.
#[derive(Debug)]
pub struct SharedConfig {
    path: PathBuf,
    inner: RwLock<Config>,
}

impl SharedConfig {
    /// Wrap an in-memory config that persists to `path`.
    pub fn new(path: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            path: path.into(),
            inner: RwLock::new(config),
        }
    }

    /// Load the config persisted at `path`.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = read_config(&path).await?;
        Ok(Self::new(path, config))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Config> {
        self.inner.read().await
    }

    /// Owned copy of the current config.
    pub async fn snapshot(&self) -> Config {
        self.inner.read().await.clone()
    }

    pub async fn find_peer(&self, name: &str) -> Option<Peer> {
        self.inner.read().await.find_peer(name).cloned()
    }

    /// Every peer in name order.
    pub async fn peers(&self) -> Vec<Peer> {
        self.inner.read().await.peers.values().cloned().collect()
    }

    pub async fn chain(&self) -> ConfigChain {
        self.inner.read().await.chain()
    }

    /// Swap in a whole new config.
    pub async fn replace(&self, config: Config) {
        *self.inner.write().await = config;
    }

    /// Insert or update a peer and persist the result.
    pub async fn upsert_peer(&self, peer: Peer) -> Result<(), ConfigError> {
        let mut config = self.inner.write().await;
        config.upsert_peer(peer);
        write_config(&self.path, &config).await
    }

    /// Re-read the config from its backing file.
    pub async fn reload(&self) -> Result<(), ConfigError> {
        let mut config = self.inner.write().await;
        *config = read_config(&self.path).await?;
        Ok(())
    }

    /// Read the backing file without touching the live config.
    pub async fn read_persisted(&self) -> Result<Config, ConfigError> {
        read_config(&self.path).await
    }

    /// Persist the current config.
    pub async fn save(&self) -> Result<(), ConfigError> {
        let config = self.inner.read().await;
        write_config(&self.path, &config).await
    }
}

async fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Persistence {
            op: PersistOp::Load,
            path: path.to_path_buf(),
            source,
        })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

async fn write_config(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;
    tokio::fs::write(path, content)
        .await
        .map_err(|source| ConfigError::Persistence {
            op: PersistOp::Dump,
            path: path.to_path_buf(),
            source,
        })
}
