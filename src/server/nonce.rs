//! # Nonce Authority
//!
//! Issues the single-use, time-limited challenges that bind every control
//! request to a fresh server-issued token.
//!
//! A nonce leaves the store in one of two ways:
//! - **consumed**: the request carrying it was accepted (replays then fail),
//! - **expired**: the background sweep found it older than the expiry window.
//!
//! A nonce older than the window is refused even if the sweep has not yet
//! removed it.

use log::debug;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};

use crate::common::crypto::{get_encrypter, random_bytes, CryptoError, SymmetricKey};
use crate::common::messages::Nonce;

/// Size of every issued nonce in bytes.
pub const NONCE_SIZE: usize = 128;

pub struct NonceAuthority {
    /// nonce value -> issue time
    store: RwLock<HashMap<Vec<u8>, Instant>>,
    expire_time: Duration,
}

impl NonceAuthority {
    pub fn new(expire_time: Duration) -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
            expire_time,
        }
    }

    pub fn expire_time(&self) -> Duration {
        self.expire_time
    }

    /// Generate and record a new nonce.
    pub async fn issue(&self) -> Result<Nonce, CryptoError> {
        let mut store = self.store.write().await;

        let mut value = random_bytes(NONCE_SIZE)?;
        while store.contains_key(&value) {
            value = random_bytes(NONCE_SIZE)?;
        }

        store.insert(value.clone(), Instant::now());
        Ok(Nonce(value))
    }

    /// Issue a nonce and seal it for the holder of `key`.
    pub async fn issue_nonce(&self, key: &SymmetricKey) -> Result<String, CryptoError> {
        let nonce = self.issue().await?;
        get_encrypter(key).encrypt(nonce.as_bytes())
    }

    /// Remove `nonce` from the store, returning whether it was valid.
    ///
    /// Valid means issued by this authority, not yet consumed and not older
    /// than the expiry window.
    pub async fn consume(&self, nonce: &Nonce) -> bool {
        if nonce.is_empty() {
            return false;
        }

        match self.store.write().await.remove(nonce.as_bytes()) {
            Some(issued) => issued.elapsed() <= self.expire_time,
            None => false,
        }
    }

    pub async fn contains(&self, nonce: &Nonce) -> bool {
        self.store.read().await.contains_key(nonce.as_bytes())
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }

    /// Drop every nonce issued more than the expiry window before `now`.
    ///
    /// Each entry is checked and deleted under the same write lock.
    pub async fn sweep_at(&self, now: Instant) -> usize {
        let mut store = self.store.write().await;
        let before = store.len();
        store.retain(|_, issued| now.saturating_duration_since(*issued) <= self.expire_time);
        before - store.len()
    }

    pub async fn sweep(&self) -> usize {
        self.sweep_at(Instant::now()).await
    }

    /// Sweep once per expiry window until `shutdown` fires or its sender goes away.
    pub async fn expire_nonces(&self, mut shutdown: watch::Receiver<bool>) {
        // A zero period would make `interval` panic.
        let mut ticker = tokio::time::interval(self.expire_time.max(Duration::from_millis(1)));
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.sweep().await;
                    if removed > 0 {
                        debug!("🧹 Expired {} nonce(s)", removed);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("🛑 Nonce sweep stopped");
                        break;
                    }
                }
            }
        }
    }
}
