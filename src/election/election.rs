//! # Election Engine
//!
//! Picks the border publisher from peer-reported uptimes.
//!
//! ## Algorithm
//!
//! 1. **Gather**: ask every peer in the directory (this node included) for its
//!    uptime, one concurrent call per peer. The first failure aborts the whole
//!    round; there is no partial-quorum fallback.
//! 2. **Candidate**: the peer reporting the *smallest* uptime (the most
//!    recently booted) becomes this node's electorate peer. Equal uptimes are
//!    broken by peer name. The result is memoized for the life of the
//!    instance.
//! 3. **Ballots**: this node votes for its candidate and collects every other
//!    peer's candidate through `identifyPublisher`.
//! 4. **Plurality**: once every peer has a ballot the [`Voter`] resolves the
//!    winner.
//!
//! Nodes converge only when they observe identical uptime facts; divergent
//! views are not reconciled.
//!
//! ## Publisher
//!
//! [`Election::publisher`] (what `identifyPublisher` answers) is the plurality
//! winner once every peer has a ballot. While ballots are still being
//! collected it falls back to this node's candidate, which is also the answer
//! a peer records as this node's ballot.
//!
//! ## States
//!
//! ```text
//! Uninitialized -> GatheringUptimes -> Resolved
//! ```
//!
//! A failed gather returns to `Uninitialized`; `Resolved` is final.

use async_trait::async_trait;
use futures_util::future::try_join_all;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{OnceCell, RwLock};

use super::voter::Voter;
use crate::common::config::{Peer, SharedConfig};
use crate::common::error::ControlError;

/// How the election reaches other peers.
#[async_trait]
pub trait ElectionTransport: Send + Sync {
    /// Time since `peer` booted.
    async fn uptime(&self, peer: &Peer) -> Result<Duration, ControlError>;

    /// Name of the peer that `peer` proposes as publisher.
    async fn candidate(&self, peer: &Peer) -> Result<String, ControlError>;
}

#[derive(Error, Debug)]
pub enum ElectionError {
    #[error("no peers configured")]
    NoPeers,
    #[error("could not gather uptime from {peer}: {source}")]
    Uptime {
        peer: String,
        #[source]
        source: ControlError,
    },
    #[error("could not collect ballot from {peer}: {source}")]
    Ballot {
        peer: String,
        #[source]
        source: ControlError,
    },
    #[error("no ballots have been cast")]
    NoBallots,
    #[error("not every peer has voted yet")]
    NotReady,
    #[error("elected peer {0} is not in the peer directory")]
    UnknownCandidate(String),
}

/// Observable state of an [`Election`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    Uninitialized,
    GatheringUptimes,
    Resolved,
}

pub struct Election {
    /// Name of this node in the peer directory
    local: String,
    config: Arc<SharedConfig>,
    transport: Arc<dyn ElectionTransport>,
    booted: Instant,
    index: u64,
    /// peer name -> reported uptime, from the latest gather
    uptimes: RwLock<HashMap<String, Duration>>,
    gathering: AtomicBool,
    electorate: OnceCell<Peer>,
    voter: Voter,
}

impl Election {
    pub fn new(
        local: impl Into<String>,
        config: Arc<SharedConfig>,
        transport: Arc<dyn ElectionTransport>,
    ) -> Self {
        let index = rand::random::<u64>();

        Self {
            local: local.into(),
            voter: Voter::new(config.clone(), index),
            config,
            transport,
            booted: Instant::now(),
            index,
            uptimes: RwLock::new(HashMap::new()),
            gathering: AtomicBool::new(false),
            electorate: OnceCell::new(),
        }
    }

    pub fn local_name(&self) -> &str {
        &self.local
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    /// Time since this node booted.
    pub fn uptime(&self) -> Duration {
        self.booted.elapsed()
    }

    pub fn voter(&self) -> &Voter {
        &self.voter
    }

    pub async fn state(&self) -> ElectionState {
        if self.electorate.initialized() {
            ElectionState::Resolved
        } else if self.gathering.load(Ordering::SeqCst) {
            ElectionState::GatheringUptimes
        } else {
            ElectionState::Uninitialized
        }
    }

    /// This node's candidate for publisher.
    ///
    /// The first successful call gathers uptimes from every peer; later calls
    /// return the memoized peer without touching the network.
    pub async fn electorate_peer(&self) -> Result<Peer, ElectionError> {
        self.electorate
            .get_or_try_init(|| async {
                let _gathering = GatherFlag::raise(&self.gathering);
                self.resolve_candidate().await
            })
            .await
            .cloned()
    }

    async fn resolve_candidate(&self) -> Result<Peer, ElectionError> {
        self.gather_uptimes().await?;

        let name = select_candidate(&*self.uptimes.read().await).ok_or(ElectionError::NoPeers)?;
        let peer = self
            .config
            .find_peer(&name)
            .await
            .ok_or(ElectionError::UnknownCandidate(name))?;

        info!(
            "🎯 Election #{}: {} picks {} as electorate peer",
            self.index, self.local, peer.name
        );
        Ok(peer)
    }

    /// Ask every configured peer for its uptime, failing on the first error.
    async fn gather_uptimes(&self) -> Result<(), ElectionError> {
        let peers = self.config.peers().await;
        if peers.is_empty() {
            return Err(ElectionError::NoPeers);
        }

        self.uptimes.write().await.clear();

        let calls = peers.iter().map(|peer| async move {
            let uptime =
                self.transport
                    .uptime(peer)
                    .await
                    .map_err(|source| ElectionError::Uptime {
                        peer: peer.name.clone(),
                        source,
                    })?;
            self.uptimes.write().await.insert(peer.name.clone(), uptime);
            Ok::<(), ElectionError>(())
        });

        if let Err(e) = try_join_all(calls).await {
            warn!("⚠️  Election #{}: uptime round failed: {}", self.index, e);
            return Err(e);
        }
        Ok(())
    }

    /// Uptimes observed in the latest gather.
    pub async fn uptimes(&self) -> HashMap<String, Duration> {
        self.uptimes.read().await.clone()
    }

    /// The elected publisher once every peer has voted, else this node's
    /// candidate.
    pub async fn publisher(&self) -> Result<Peer, ElectionError> {
        if self.voter.ready_to_vote().await {
            self.voter.vote().await
        } else {
            self.electorate_peer().await
        }
    }

    pub async fn register_vote(&self, voter: &str, candidate: &str) -> bool {
        self.voter.register_vote(voter, candidate).await
    }

    /// Run the election to completion and return the publisher.
    ///
    /// Peers that already have a ballot are not asked again, so retrying
    /// after a failed round only contacts the missing voters.
    pub async fn elect(&self) -> Result<Peer, ElectionError> {
        let candidate = self.electorate_peer().await?;
        self.voter.register_vote(&self.local, &candidate.name).await;

        let mut pending = Vec::new();
        for peer in self.config.peers().await {
            if !self.voter.has_voted(&peer.name).await {
                pending.push(peer);
            }
        }

        let ballots = pending.iter().map(|peer| async move {
            let choice =
                self.transport
                    .candidate(peer)
                    .await
                    .map_err(|source| ElectionError::Ballot {
                        peer: peer.name.clone(),
                        source,
                    })?;
            self.voter.register_vote(&peer.name, &choice).await;
            Ok::<(), ElectionError>(())
        });
        try_join_all(ballots).await?;

        if !self.voter.ready_to_vote().await {
            return Err(ElectionError::NotReady);
        }

        let publisher = self.voter.vote().await?;
        info!(
            "👑 Election #{}: {} is the publisher",
            self.index, publisher.name
        );
        Ok(publisher)
    }
}

/// Marks a gather in progress; lowered on drop, so a cancelled gather does
/// not leave the election stuck in `GatheringUptimes`.
struct GatherFlag<'a>(&'a AtomicBool);

impl<'a> GatherFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for GatherFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Name of the peer with the smallest uptime; ties go to the smaller name.
pub fn select_candidate(uptimes: &HashMap<String, Duration>) -> Option<String> {
    uptimes
        .iter()
        .min_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)))
        .map(|(name, _)| name.clone())
}
