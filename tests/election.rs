use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use border::common::config::{Config, Peer, SharedConfig};
use border::common::crypto::make_key;
use border::election::{ElectionError, ElectionState, ElectionTransport};
use border::{ControlError, Election};

/// Routes election calls straight to the other nodes' `Election`s.
///
/// Uptimes come from a fixed table so every node sees the same facts.
struct Mesh {
    uptimes: HashMap<String, Duration>,
    nodes: OnceLock<HashMap<String, Arc<Election>>>,
    down: Option<String>,
    calls: AtomicUsize,
}

impl Mesh {
    fn node(&self, peer: &Peer) -> Result<&Arc<Election>, ControlError> {
        if self.down.as_deref() == Some(peer.name.as_str()) {
            return Err(ControlError::NonceAcquisition {
                peer: peer.name.clone(),
                reason: "connection refused".into(),
                source: None,
            });
        }
        self.nodes
            .get()
            .and_then(|nodes| nodes.get(&peer.name))
            .ok_or_else(|| ControlError::UnknownPeer(peer.name.clone()))
    }
}

#[async_trait]
impl ElectionTransport for Mesh {
    async fn uptime(&self, peer: &Peer) -> Result<Duration, ControlError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.node(peer)?;
        self.uptimes
            .get(&peer.name)
            .copied()
            .ok_or_else(|| ControlError::UnknownPeer(peer.name.clone()))
    }

    async fn candidate(&self, peer: &Peer) -> Result<String, ControlError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let node = self.node(peer)?;
        let chosen = node
            .electorate_peer()
            .await
            .map_err(|e| ControlError::handler(e.to_string()))?;
        Ok(chosen.name)
    }
}

fn directory(size: usize) -> Config {
    let mut config = Config::default();
    for i in 0..size {
        let ip: IpAddr = format!("192.0.2.{}", i + 1).parse().unwrap();
        let control = format!("192.0.2.{}:5309", i + 1).parse().unwrap();
        config.upsert_peer(Peer::new(vec![ip], control, make_key(format!("k{i}")).unwrap()));
    }
    config
}

fn build_mesh(
    config: &Config,
    uptimes: HashMap<String, Duration>,
    down: Option<String>,
) -> (Arc<Mesh>, Vec<Arc<Election>>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mesh = Arc::new(Mesh {
        uptimes,
        nodes: OnceLock::new(),
        down,
        calls: AtomicUsize::new(0),
    });

    let mut nodes = HashMap::new();
    let mut elections = Vec::new();
    for (i, name) in config.peers.keys().enumerate() {
        let shared = Arc::new(SharedConfig::new(
            dir.path().join(format!("{i}.toml")),
            config.clone(),
        ));
        let election = Arc::new(Election::new(name.clone(), shared, mesh.clone()));
        nodes.insert(name.clone(), election.clone());
        elections.push(election);
    }
    assert!(mesh.nodes.set(nodes).is_ok());

    (mesh, elections, dir)
}

#[tokio::test]
async fn test_eight_peers_converge_on_one_publisher() {
    let config = directory(8);
    let names: Vec<String> = config.peers.keys().cloned().collect();

    // Two peers share the smallest uptime; the smaller name must win.
    let mut uptimes = HashMap::new();
    for (i, name) in names.iter().enumerate() {
        uptimes.insert(name.clone(), Duration::from_secs(100 + 10 * i as u64));
    }
    uptimes.insert(names[5].clone(), Duration::from_secs(7));
    uptimes.insert(names[3].clone(), Duration::from_secs(7));
    let expected = names[3].clone();

    let (_mesh, elections, _dir) = build_mesh(&config, uptimes, None);

    let rounds: Vec<_> = elections
        .iter()
        .cloned()
        .map(|election| tokio::spawn(async move { election.elect().await }))
        .collect();

    for round in rounds {
        assert_eq!(round.await.unwrap().unwrap().name, expected);
    }
    for election in &elections {
        assert_eq!(election.state().await, ElectionState::Resolved);
        assert!(election.voter().ready_to_vote().await);
    }
}

#[tokio::test]
async fn test_unreachable_peer_fails_the_round() {
    let config = directory(4);
    let names: Vec<String> = config.peers.keys().cloned().collect();
    let uptimes = names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), Duration::from_secs(i as u64 + 1)))
        .collect();

    let (_mesh, elections, _dir) = build_mesh(&config, uptimes, Some(names[2].clone()));

    let err = elections[0].elect().await.unwrap_err();
    assert!(matches!(err, ElectionError::Uptime { ref peer, .. } if *peer == names[2]));
    assert_eq!(elections[0].state().await, ElectionState::Uninitialized);
}

#[tokio::test]
async fn test_repeated_elections_reuse_ballots() {
    let config = directory(3);
    let names: Vec<String> = config.peers.keys().cloned().collect();
    let uptimes = names
        .iter()
        .map(|name| (name.clone(), Duration::from_secs(60)))
        .collect();

    let (mesh, elections, _dir) = build_mesh(&config, uptimes, None);

    let first = elections[1].elect().await.unwrap();
    assert_eq!(first.name, names[0]);
    let spent = mesh.calls.load(Ordering::SeqCst);

    let second = elections[1].elect().await.unwrap();
    assert_eq!(second, first);
    assert_eq!(mesh.calls.load(Ordering::SeqCst), spent);
}
