use std::error::Error as _;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use border::client::wait_for_acme_ready;
use border::common::acme::AcmeChallenges;
use border::common::config::{Config, ControlSettings, Peer, SharedConfig};
use border::common::crypto::{get_decrypter, get_encrypter, make_key, SymmetricKey};
use border::common::messages::*;
use border::server::ServerHandle;
use border::{ControlClient, ControlServer, Election, ErrorKind};
use tokio::net::TcpListener;

struct Node {
    peer: Peer,
    config: Arc<SharedConfig>,
    election: Arc<Election>,
    acme: Arc<AcmeChallenges>,
    handle: ServerHandle,
}

struct Cluster {
    nodes: Vec<Node>,
    client: ControlClient,
    _dir: tempfile::TempDir,
}

async fn spawn_cluster(size: usize) -> Cluster {
    let dir = tempfile::tempdir().unwrap();

    let mut listeners = Vec::new();
    let mut config = Config::default();
    let mut peers = Vec::new();
    for i in 0..size {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ip: IpAddr = format!("10.0.0.{}", i + 1).parse().unwrap();
        let peer = Peer::new(
            vec![ip],
            listener.local_addr().unwrap(),
            make_key(format!("node-{i}")).unwrap(),
        );
        config.upsert_peer(peer.clone());
        peers.push(peer);
        listeners.push(listener);
    }

    let client = ControlClient::new(Duration::from_secs(2));
    let mut nodes = Vec::new();
    for (i, (peer, listener)) in peers.into_iter().zip(listeners).enumerate() {
        let shared = Arc::new(SharedConfig::new(
            dir.path().join(format!("cluster-{i}.toml")),
            config.clone(),
        ));
        shared.save().await.unwrap();

        let election = Arc::new(Election::new(
            peer.name.clone(),
            shared.clone(),
            Arc::new(client.clone()),
        ));
        // Distinct boot instants keep uptime ordering strict.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let acme = Arc::new(AcmeChallenges::new());
        let handle = ControlServer::new(
            shared.clone(),
            election.clone(),
            acme.clone(),
            &ControlSettings::default(),
        )
        .serve(listener)
        .unwrap();

        nodes.push(Node {
            peer,
            config: shared,
            election,
            acme,
            handle,
        });
    }

    Cluster {
        nodes,
        client,
        _dir: dir,
    }
}

async fn fetch_nonce(addr: SocketAddr, key: &SymmetricKey) -> Nonce {
    let body = reqwest::get(format!("http://{addr}/nonce"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    Nonce(get_decrypter(key).decrypt(&body).unwrap())
}

async fn put_raw(addr: SocketAddr, endpoint: &str, body: String) -> reqwest::Response {
    reqwest::Client::new()
        .put(format!("http://{addr}/{endpoint}"))
        .body(body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_ping_round_trip() {
    let cluster = spawn_cluster(1).await;
    let node = &cluster.nodes[0];

    cluster.client.ping(&node.peer).await.unwrap();
    cluster
        .client
        .exchange(&node.peer, AuthCheckRequest::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_wrong_key_cannot_talk() {
    let cluster = spawn_cluster(1).await;
    let mut impostor = cluster.nodes[0].peer.clone();
    impostor.key = make_key(impostor.key.id.clone()).unwrap();

    let err = cluster.client.ping(&impostor).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DecryptFailure);
}

#[tokio::test]
async fn test_replayed_request_is_rejected() {
    let cluster = spawn_cluster(1).await;
    let node = &cluster.nodes[0];
    let addr = node.handle.local_addr();

    let mut request = PingRequest::default();
    request.set_nonce(fetch_nonce(addr, &node.peer.key).await);
    let sealed = get_encrypter(&node.peer.key)
        .encrypt(&serde_json::to_vec(&request).unwrap())
        .unwrap();

    let first = put_raw(addr, "ping", sealed.clone()).await;
    assert_eq!(first.status(), 200);

    let replay = put_raw(addr, "ping", sealed).await;
    assert_eq!(replay.status(), 403);
}

#[tokio::test]
async fn test_missing_nonce_is_rejected() {
    let cluster = spawn_cluster(1).await;
    let node = &cluster.nodes[0];

    let sealed = get_encrypter(&node.peer.key)
        .encrypt(&serde_json::to_vec(&PingRequest::default()).unwrap())
        .unwrap();
    let response = put_raw(node.handle.local_addr(), "ping", sealed).await;

    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn test_untrusted_bodies_get_plain_errors() {
    let cluster = spawn_cluster(1).await;
    let node = &cluster.nodes[0];
    let addr = node.handle.local_addr();

    let garbage = put_raw(addr, "ping", "not.a.sealed.message.at-all".into()).await;
    assert_eq!(garbage.status(), 401);
    assert!(garbage.text().await.unwrap().contains("decrypt"));

    let unknown = put_raw(addr, "bogus", String::new()).await;
    assert_eq!(unknown.status(), 404);

    let nonce_by_put = put_raw(addr, "nonce", String::new()).await;
    assert_eq!(nonce_by_put.status(), 405);

    let sealed_junk = get_encrypter(&node.peer.key).encrypt(b"{not json").unwrap();
    let malformed = put_raw(addr, "ping", sealed_junk).await;
    assert_eq!(malformed.status(), 400);
}

#[tokio::test]
async fn test_concurrent_exchanges() {
    let cluster = Arc::new(spawn_cluster(1).await);

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let cluster = cluster.clone();
            tokio::spawn(async move { cluster.client.ping(&cluster.nodes[0].peer).await })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_peer_register_persists() {
    let cluster = spawn_cluster(1).await;
    let node = &cluster.nodes[0];

    let newcomer = Peer::new(
        vec!["10.0.9.9".parse().unwrap()],
        "10.0.9.9:5309".parse().unwrap(),
        make_key("newcomer").unwrap(),
    );
    cluster
        .client
        .exchange(
            &node.peer,
            PeerRegisterRequest {
                peer: newcomer.clone(),
                nonce: Nonce::default(),
            },
        )
        .await
        .unwrap();

    let persisted = SharedConfig::load(node.config.path()).await.unwrap();
    assert_eq!(persisted.find_peer(&newcomer.name).await, Some(newcomer));
}

#[tokio::test]
async fn test_config_update_and_fetch() {
    let cluster = spawn_cluster(1).await;
    let node = &cluster.nodes[0];

    let mut updated = node.config.snapshot().await;
    updated
        .zones
        .insert("example.org".into(), toml::Value::String("zone".into()));

    let before = cluster
        .client
        .exchange(&node.peer, ConfigChainRequest::default())
        .await
        .unwrap();
    cluster
        .client
        .exchange(
            &node.peer,
            ConfigUpdateRequest {
                config: updated.clone(),
                nonce: Nonce::default(),
            },
        )
        .await
        .unwrap();

    let fetched = cluster
        .client
        .exchange(&node.peer, ConfigFetchRequest::default())
        .await
        .unwrap();
    assert_eq!(fetched.config, updated);
    assert_eq!(fetched.chain.diverges_from(&before.chain), vec!["zones"]);

    // The update lives only in memory until reloaded over.
    cluster
        .client
        .exchange(&node.peer, ConfigReloadRequest::default())
        .await
        .unwrap();
    assert!(node.config.snapshot().await.zones.is_empty());
}

#[tokio::test]
async fn test_config_update_without_local_peer_is_refused() {
    let cluster = spawn_cluster(1).await;
    let node = &cluster.nodes[0];

    let err = cluster
        .client
        .exchange(
            &node.peer,
            ConfigUpdateRequest {
                config: Config::default(),
                nonce: Nonce::default(),
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BadResponse);
    assert!(err.to_string().contains("local peer"));
    assert_eq!(node.config.peers().await.len(), 1);
}

#[tokio::test]
async fn test_reload_of_config_without_local_peer_is_refused() {
    let cluster = spawn_cluster(1).await;
    let node = &cluster.nodes[0];

    SharedConfig::new(node.config.path(), Config::default())
        .save()
        .await
        .unwrap();

    let err = cluster
        .client
        .exchange(&node.peer, ConfigReloadRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadResponse);
    assert!(err.to_string().contains("local peer"));

    // The live config is untouched, so the node stays reachable and repairable.
    cluster.client.ping(&node.peer).await.unwrap();
    cluster
        .client
        .exchange(
            &node.peer,
            ConfigUpdateRequest {
                config: node.config.snapshot().await,
                nonce: Nonce::default(),
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_uptime_and_peer_nonce() {
    let cluster = spawn_cluster(1).await;
    let node = &cluster.nodes[0];

    let first = cluster
        .client
        .exchange(&node.peer, UptimeRequest::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = cluster
        .client
        .exchange(&node.peer, UptimeRequest::default())
        .await
        .unwrap();
    assert!(second.uptime > first.uptime);

    let issued = cluster
        .client
        .exchange(&node.peer, PeerNonceRequest::default())
        .await
        .unwrap();
    assert_eq!(issued.nonce.as_bytes().len(), 128);
}

#[tokio::test]
async fn test_cluster_elects_most_recently_booted_peer() {
    let cluster = spawn_cluster(3).await;
    let newest = cluster.nodes[2].peer.name.clone();

    for node in &cluster.nodes {
        let publisher = cluster
            .client
            .exchange(&node.peer, IdentifyPublisherRequest::default())
            .await
            .unwrap();
        assert_eq!(publisher.publisher, newest);
    }

    for node in &cluster.nodes {
        assert_eq!(node.election.elect().await.unwrap().name, newest);
    }
}

#[tokio::test]
async fn test_publisher_is_plurality_winner_not_local_candidate() {
    let cluster = spawn_cluster(3).await;
    let names: Vec<String> = cluster.nodes.iter().map(|n| n.peer.name.clone()).collect();
    let node = &cluster.nodes[0];

    // node 0 proposes the newest node, but the ballots elect node 0.
    assert_eq!(node.election.electorate_peer().await.unwrap().name, names[2]);
    node.election.register_vote(&names[0], &names[0]).await;
    node.election.register_vote(&names[1], &names[0]).await;
    node.election.register_vote(&names[2], &names[2]).await;

    let publisher = cluster
        .client
        .exchange(&node.peer, IdentifyPublisherRequest::default())
        .await
        .unwrap();
    assert_eq!(publisher.publisher, names[0]);
}

#[tokio::test]
async fn test_acme_readiness_polling() {
    let cluster = spawn_cluster(2).await;
    let peers: Vec<Peer> = cluster.nodes.iter().map(|n| n.peer.clone()).collect();

    cluster.nodes[0].acme.set("example.org", "token.thumb").await;
    let err = wait_for_acme_ready(
        &cluster.client,
        &peers,
        "example.org",
        Duration::from_millis(20),
        Duration::from_millis(100),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains(&peers[1].name));

    let late = cluster.nodes[1].acme.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        late.set("example.org", "token.thumb").await;
    });
    wait_for_acme_ready(
        &cluster.client,
        &peers,
        "example.org",
        Duration::from_millis(20),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    let challenge = cluster
        .client
        .exchange(
            &peers[1],
            AcmeChallengeRequest {
                domain: "example.org".into(),
                nonce: Nonce::default(),
            },
        )
        .await
        .unwrap();
    assert_eq!(challenge.challenge, "token.thumb");
}

#[tokio::test]
async fn test_shutdown_closes_listener() {
    let mut cluster = spawn_cluster(1).await;
    let node = cluster.nodes.remove(0);
    cluster.client.ping(&node.peer).await.unwrap();

    node.handle.shutdown().await.unwrap();

    let err = cluster.client.ping(&node.peer).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NonceAcquisitionFailure);
    assert!(err.source().unwrap().is::<reqwest::Error>());
}
