//! # Control Client
//!
//! Peer-side RPC stub for the control plane.
//!
//! ## Exchange
//!
//! Every call to [`ControlClient::exchange`] is self-contained:
//!
//! 1. `GET /nonce` on the peer and decrypt the challenge with the peer's key
//! 2. Stamp the nonce on the request, encode it and seal it
//! 3. `PUT /<endpoint>` with the sealed body
//! 4. Decrypt and decode the response
//!
//! Each network leg has its own timeout. Nothing is retried here; callers
//! that need a longer deadline poll (see [`acme`](super::acme)).

use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::common::config::Peer;
use crate::common::crypto::{get_decrypter, get_encrypter};
use crate::common::error::ControlError;
use crate::common::messages::{
    Endpoint, IdentifyPublisherRequest, Nonce, PingRequest, Request, UptimeRequest,
};
use crate::election::ElectionTransport;

/// Default per-leg timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ControlClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl Default for ControlClient {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl ControlClient {
    /// # Arguments
    /// - `timeout`: budget for each network leg (nonce fetch, main call)
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `request` to `peer` and return its response.
    ///
    /// # Errors
    /// Every failure is tagged with its [`ErrorKind`](crate::common::error::ErrorKind):
    /// nonce acquisition, marshal, encrypt, transport/bad response, decrypt.
    pub async fn exchange<R: Request>(
        &self,
        peer: &Peer,
        mut request: R,
    ) -> Result<R::Response, ControlError> {
        let nonce = self.fetch_nonce(peer).await?;
        request.set_nonce(nonce);

        let json = serde_json::to_vec(&request).map_err(ControlError::Marshal)?;
        let sealed = get_encrypter(&peer.key)
            .encrypt(&json)
            .map_err(ControlError::Encrypt)?;

        debug!("📤 {} -> {}", R::ENDPOINT, peer.name);
        let response = self
            .http
            .put(url(peer, R::ENDPOINT))
            .timeout(self.timeout)
            .body(sealed)
            .send()
            .await
            .map_err(|source| transport(peer, source))?;

        let body = read_ok_body(peer, response).await?;
        open(peer, &body)
    }

    /// Fetch and decrypt a fresh challenge from `peer`.
    async fn fetch_nonce(&self, peer: &Peer) -> Result<Nonce, ControlError> {
        let failed = |source: reqwest::Error| ControlError::NonceAcquisition {
            peer: peer.name.clone(),
            reason: source.to_string(),
            source: Some(source),
        };

        let response = self
            .http
            .get(url(peer, Endpoint::Nonce))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(failed)?;

        let status = response.status();
        let body = response.text().await.map_err(failed)?;
        if status != StatusCode::OK {
            return Err(ControlError::NonceAcquisition {
                peer: peer.name.clone(),
                reason: format!("status {}: {}", status.as_u16(), body),
                source: None,
            });
        }

        let raw = get_decrypter(&peer.key)
            .decrypt(&body)
            .map_err(ControlError::Decrypt)?;
        Ok(Nonce(raw))
    }

    pub async fn ping(&self, peer: &Peer) -> Result<(), ControlError> {
        self.exchange(peer, PingRequest::default()).await.map(|_| ())
    }
}

fn url(peer: &Peer, endpoint: Endpoint) -> String {
    format!("http://{}/{}", peer.control_server, endpoint)
}

fn transport(peer: &Peer, source: reqwest::Error) -> ControlError {
    ControlError::Transport {
        peer: peer.name.clone(),
        source,
    }
}

async fn read_ok_body(peer: &Peer, response: reqwest::Response) -> Result<String, ControlError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|source| transport(peer, source))?;

    if status != StatusCode::OK {
        return Err(ControlError::BadResponse {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

fn open<T: DeserializeOwned>(peer: &Peer, body: &str) -> Result<T, ControlError> {
    let plaintext = get_decrypter(&peer.key)
        .decrypt(body)
        .map_err(ControlError::Decrypt)?;
    serde_json::from_slice(&plaintext).map_err(ControlError::Marshal)
}

#[async_trait]
impl ElectionTransport for ControlClient {
    async fn uptime(&self, peer: &Peer) -> Result<Duration, ControlError> {
        let response = self.exchange(peer, UptimeRequest::default()).await?;
        Ok(response.uptime)
    }

    async fn candidate(&self, peer: &Peer) -> Result<String, ControlError> {
        let response = self
            .exchange(peer, IdentifyPublisherRequest::default())
            .await?;
        Ok(response.publisher)
    }
}
