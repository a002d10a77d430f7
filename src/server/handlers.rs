//! # Endpoint Handlers
//!
//! Authentication and business logic for every `PUT /<endpoint>`.
//!
//! ## Request pipeline
//!
//! 1. Decrypt the body with this node's key; undecryptable input never reaches
//!    a handler.
//! 2. Decode the JSON into the request type registered for the endpoint.
//! 3. Consume the embedded nonce; missing, unknown, expired or replayed nonces
//!    are rejected.
//! 4. Run the handler and seal its response with the same key.

use log::info;

use super::server::ControlState;
use crate::common::crypto::{get_decrypter, get_encrypter, SymmetricKey};
use crate::common::error::ControlError;
use crate::common::messages::*;

impl ControlState {
    /// Authenticate, decode and answer one sealed request.
    pub(crate) async fn dispatch(
        &self,
        endpoint: Endpoint,
        body: &str,
    ) -> Result<String, ControlError> {
        let key = self.key().await?;
        let plaintext = get_decrypter(&key)
            .decrypt(body)
            .map_err(ControlError::Decrypt)?;

        match endpoint {
            // `/nonce` has its own GET route, so axum answers `PUT /nonce`
            // with 405 before it reaches dispatch.
            Endpoint::Nonce => Err(ControlError::UnknownEndpoint(format!(
                "{} only answers GET",
                endpoint
            ))),
            Endpoint::AuthCheck => {
                let _: AuthCheckRequest = self.open(&plaintext).await?;
                seal(&key, &NilResponse {})
            }
            Endpoint::PeerRegister => {
                let request: PeerRegisterRequest = self.open(&plaintext).await?;
                seal(&key, &self.peer_register(request).await?)
            }
            Endpoint::ConfigUpdate => {
                let request: ConfigUpdateRequest = self.open(&plaintext).await?;
                seal(&key, &self.config_update(request).await?)
            }
            Endpoint::ConfigReload => {
                let _: ConfigReloadRequest = self.open(&plaintext).await?;
                seal(&key, &self.config_reload().await?)
            }
            Endpoint::IdentifyPublisher => {
                let _: IdentifyPublisherRequest = self.open(&plaintext).await?;
                seal(&key, &self.identify_publisher().await?)
            }
            Endpoint::PeerNonce => {
                let _: PeerNonceRequest = self.open(&plaintext).await?;
                let nonce = self.nonces.issue().await.map_err(ControlError::Encrypt)?;
                seal(&key, &NonceResponse { nonce })
            }
            Endpoint::Uptime => {
                let _: UptimeRequest = self.open(&plaintext).await?;
                let uptime = self.election.uptime();
                seal(&key, &UptimeResponse { uptime })
            }
            Endpoint::Ping => {
                let _: PingRequest = self.open(&plaintext).await?;
                seal(&key, &NilResponse {})
            }
            Endpoint::AcmeChallenge => {
                let request: AcmeChallengeRequest = self.open(&plaintext).await?;
                seal(&key, &self.acme_challenge(request).await?)
            }
            Endpoint::AcmeReady => {
                let request: AcmeReadyRequest = self.open(&plaintext).await?;
                seal(&key, &self.acme_ready(request).await?)
            }
            Endpoint::ConfigChain => {
                let _: ConfigChainRequest = self.open(&plaintext).await?;
                let chain = self.config.chain().await;
                seal(&key, &ChainResponse { chain })
            }
            Endpoint::ConfigFetch => {
                let _: ConfigFetchRequest = self.open(&plaintext).await?;
                let config = self.config.snapshot().await;
                let chain = config.chain();
                seal(&key, &ConfigFetchResponse { config, chain })
            }
        }
    }

    /// Decode a request and consume its nonce.
    async fn open<R: Request>(&self, plaintext: &[u8]) -> Result<R, ControlError> {
        let request: R = serde_json::from_slice(plaintext).map_err(ControlError::Malformed)?;

        if !self.nonces.consume(request.nonce()).await {
            return Err(ControlError::InvalidNonce);
        }
        Ok(request)
    }

    async fn peer_register(
        &self,
        request: PeerRegisterRequest,
    ) -> Result<NilResponse, ControlError> {
        let name = request.peer.name.clone();
        self.config.upsert_peer(request.peer).await?;

        info!("🤝 Registered peer {}", name);
        Ok(NilResponse {})
    }

    async fn config_update(
        &self,
        request: ConfigUpdateRequest,
    ) -> Result<NilResponse, ControlError> {
        // Dropping our own entry would leave this node without a key.
        if request.config.find_peer(self.local_name()).is_none() {
            return Err(ControlError::handler(format!(
                "config update does not contain local peer {}",
                self.local_name()
            )));
        }

        let divergent = self
            .config
            .chain()
            .await
            .diverges_from(&request.config.chain());
        self.config.replace(request.config).await;

        info!("📝 Cluster config replaced (changed sections: {:?})", divergent);
        Ok(NilResponse {})
    }

    async fn config_reload(&self) -> Result<NilResponse, ControlError> {
        let persisted = self.config.read_persisted().await?;
        if persisted.find_peer(self.local_name()).is_none() {
            return Err(ControlError::handler(format!(
                "persisted config at {} does not contain local peer {}",
                self.config.path().display(),
                self.local_name()
            )));
        }

        self.config.replace(persisted).await;
        info!("🔄 Cluster config reloaded from {}", self.config.path().display());
        Ok(NilResponse {})
    }

    async fn identify_publisher(&self) -> Result<PublisherResponse, ControlError> {
        let peer = self
            .election
            .publisher()
            .await
            .map_err(|e| ControlError::handler(format!("no publisher: {e}")))?;

        Ok(PublisherResponse {
            publisher: peer.name,
        })
    }

    async fn acme_challenge(
        &self,
        request: AcmeChallengeRequest,
    ) -> Result<AcmeChallengeResponse, ControlError> {
        let challenge = self.acme.get(&request.domain).await.ok_or_else(|| {
            ControlError::handler(format!("no challenge for {}", request.domain))
        })?;

        Ok(AcmeChallengeResponse { challenge })
    }

    async fn acme_ready(&self, request: AcmeReadyRequest) -> Result<NilResponse, ControlError> {
        if self.acme.get(&request.domain).await.is_none() {
            return Err(ControlError::handler(format!(
                "challenge for {} not yet observed",
                request.domain
            )));
        }
        Ok(NilResponse {})
    }
}

fn seal<T: serde::Serialize>(key: &SymmetricKey, response: &T) -> Result<String, ControlError> {
    let json = serde_json::to_vec(response).map_err(ControlError::Marshal)?;
    get_encrypter(key).encrypt(&json).map_err(ControlError::Encrypt)
}
