//! ACME readiness polling.
//!
//! Before the publisher asks the ACME server to validate a challenge, every
//! peer must be able to answer it. [`wait_for_acme_ready`] polls `acmeReady`
//! on all peers until each one has answered successfully once, or until the
//! deadline passes. Single exchanges keep their own short timeout; this loop
//! supplies the long end-to-end deadline.

use futures_util::future::join_all;
use log::{debug, info};
use std::time::{Duration, Instant};

use super::client::ControlClient;
use crate::common::config::Peer;
use crate::common::error::ControlError;
use crate::common::messages::AcmeReadyRequest;

pub async fn wait_for_acme_ready(
    client: &ControlClient,
    peers: &[Peer],
    domain: &str,
    interval: Duration,
    deadline: Duration,
) -> Result<(), ControlError> {
    let started = Instant::now();
    let mut pending: Vec<&Peer> = peers.iter().collect();

    loop {
        let polls = pending.iter().map(|peer| async move {
            let request = AcmeReadyRequest {
                domain: domain.to_string(),
                nonce: Default::default(),
            };
            match client.exchange(peer, request).await {
                Ok(_) => true,
                Err(e) => {
                    debug!("⏳ {} not ready for {}: {}", peer.name, domain, e);
                    false
                }
            }
        });
        let ready = join_all(polls).await;

        pending = pending
            .into_iter()
            .zip(ready)
            .filter_map(|(peer, ok)| (!ok).then_some(peer))
            .collect();

        if pending.is_empty() {
            info!("✅ All peers observed the ACME challenge for {}", domain);
            return Ok(());
        }

        if started.elapsed() + interval > deadline {
            let names: Vec<&str> = pending.iter().map(|p| p.name.as_str()).collect();
            return Err(ControlError::handler(format!(
                "peers not ready for {} before deadline: {}",
                domain,
                names.join(", ")
            )));
        }

        tokio::time::sleep(interval).await;
    }
}
