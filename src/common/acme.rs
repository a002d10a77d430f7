//! ACME challenge bookkeeping shared with the certificate collaborator.
//!
//! The ACME solver records the key authorization it expects for a domain on
//! every peer; the control plane only reads it back (`acmeChallenge`) or
//! reports whether it is present (`acmeReady`).

use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct AcmeChallenges {
    challenges: RwLock<HashMap<String, String>>,
}

impl AcmeChallenges {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, domain: impl Into<String>, challenge: impl Into<String>) {
        self.challenges
            .write()
            .await
            .insert(domain.into(), challenge.into());
    }

    pub async fn remove(&self, domain: &str) -> Option<String> {
        self.challenges.write().await.remove(domain)
    }

    pub async fn get(&self, domain: &str) -> Option<String> {
        self.challenges.read().await.get(domain).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = AcmeChallenges::new();
        assert_eq!(store.get("example.org").await, None);

        store.set("example.org", "token.thumbprint").await;
        assert_eq!(
            store.get("example.org").await.as_deref(),
            Some("token.thumbprint")
        );

        assert!(store.remove("example.org").await.is_some());
        assert_eq!(store.get("example.org").await, None);
    }
}
