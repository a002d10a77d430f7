//! # Voter - Plurality Resolution
//!
//! The ballot box of one election. Each peer gets exactly one ballot: the
//! first vote registered for a peer is kept and later ones are ignored, so a
//! peer cannot flip-flop once committed.
//!
//! Ties in the tally resolve to the lexicographically smallest candidate name,
//! so every node holding the same ballots elects the same peer.

use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::election::ElectionError;
use crate::common::config::{Peer, SharedConfig};

pub struct Voter {
    config: Arc<SharedConfig>,
    index: u64,
    /// voter peer name -> candidate peer name
    ballots: RwLock<HashMap<String, String>>,
}

impl Voter {
    pub fn new(config: Arc<SharedConfig>, index: u64) -> Self {
        Self {
            config,
            index,
            ballots: RwLock::new(HashMap::new()),
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    /// Record `voter`'s ballot for `candidate` unless `voter` already voted.
    ///
    /// Returns `true` when the ballot was recorded.
    pub async fn register_vote(&self, voter: &str, candidate: &str) -> bool {
        let mut ballots = self.ballots.write().await;
        if ballots.contains_key(voter) {
            debug!(
                "🗳️  Election #{}: ignoring repeat ballot from {}",
                self.index, voter
            );
            return false;
        }

        ballots.insert(voter.to_string(), candidate.to_string());
        info!(
            "🗳️  Election #{}: {} votes for {}",
            self.index, voter, candidate
        );
        true
    }

    pub async fn has_voted(&self, voter: &str) -> bool {
        self.ballots.read().await.contains_key(voter)
    }

    /// The candidate `voter` voted for, if any.
    pub async fn ballot(&self, voter: &str) -> Option<String> {
        self.ballots.read().await.get(voter).cloned()
    }

    /// True once every peer in the directory has a ballot.
    pub async fn ready_to_vote(&self) -> bool {
        let config = self.config.read().await;
        let ballots = self.ballots.read().await;

        !config.peers.is_empty() && config.peers.keys().all(|name| ballots.contains_key(name))
    }

    /// Tally the ballots and resolve the winner against the peer directory.
    pub async fn vote(&self) -> Result<Peer, ElectionError> {
        let winner = {
            let ballots = self.ballots.read().await;

            let mut tally: BTreeMap<&str, usize> = BTreeMap::new();
            for candidate in ballots.values() {
                *tally.entry(candidate.as_str()).or_default() += 1;
            }

            // Strictly greater keeps the earliest name on ties.
            let mut best: Option<(&str, usize)> = None;
            for (candidate, count) in tally {
                if best.map_or(true, |(_, top)| count > top) {
                    best = Some((candidate, count));
                }
            }

            match best {
                Some((name, count)) => {
                    debug!(
                        "📊 Election #{}: {} leads with {}/{} ballots",
                        self.index,
                        name,
                        count,
                        ballots.len()
                    );
                    name.to_string()
                }
                None => return Err(ElectionError::NoBallots),
            }
        };

        self.config
            .find_peer(&winner)
            .await
            .ok_or(ElectionError::UnknownCandidate(winner))
    }
}
