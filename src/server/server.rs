//! # Control Server
//!
//! Terminates the control-plane HTTP listener of one border node.
//!
//! ## Wire Protocol
//!
//! ```text
//! GET /nonce        -> 200 sealed(nonce bytes)
//! PUT /<endpoint>   -> 200 sealed(JSON response)   body: sealed(JSON request)
//!                   -> 4xx/5xx plaintext diagnostic
//! ```
//!
//! Everything is sealed with this node's own peer key, which every other
//! peer holds a copy of.
//!
//! ## Lifecycle
//!
//! `Running -> ShuttingDown`. [`ServerHandle::shutdown`] first closes the
//! listener and waits for in-flight requests, and only then stops the nonce
//! sweep.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
    Router,
};
use log::{debug, error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tower_http::limit::RequestBodyLimitLayer;

use super::nonce::NonceAuthority;
use crate::common::acme::AcmeChallenges;
use crate::common::config::{ControlSettings, SharedConfig};
use crate::common::crypto::SymmetricKey;
use crate::common::error::ControlError;
use crate::common::messages::Endpoint;
use crate::election::Election;

/// Everything a request handler can reach.
pub struct ControlState {
    pub(crate) config: Arc<SharedConfig>,
    pub(crate) nonces: Arc<NonceAuthority>,
    pub(crate) election: Arc<Election>,
    pub(crate) acme: Arc<AcmeChallenges>,
}

impl ControlState {
    /// Name of this node in the peer directory.
    pub fn local_name(&self) -> &str {
        self.election.local_name()
    }

    /// This node's own peer key, read fresh so config updates take effect.
    pub(crate) async fn key(&self) -> Result<SymmetricKey, ControlError> {
        self.config
            .find_peer(self.local_name())
            .await
            .map(|peer| peer.key)
            .ok_or_else(|| ControlError::UnknownPeer(self.local_name().to_string()))
    }
}

/// The control-plane HTTP server of one node.
pub struct ControlServer {
    state: Arc<ControlState>,
    max_body_bytes: usize,
}

impl ControlServer {
    /// # Arguments
    /// - `config`: the cluster config; must contain the election's local peer
    /// - `election`: this node's election, also the source of its uptime
    /// - `acme`: challenges published by the ACME collaborator
    /// - `settings`: nonce expiry and body limit
    pub fn new(
        config: Arc<SharedConfig>,
        election: Arc<Election>,
        acme: Arc<AcmeChallenges>,
        settings: &ControlSettings,
    ) -> Self {
        let nonces = Arc::new(NonceAuthority::new(Duration::from_secs(
            settings.nonce_expiry_secs,
        )));

        Self {
            state: Arc::new(ControlState {
                config,
                nonces,
                election,
                acme,
            }),
            max_body_bytes: settings.max_body_bytes,
        }
    }

    pub fn state(&self) -> Arc<ControlState> {
        self.state.clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/nonce", get(nonce_handler))
            .route("/:endpoint", put(endpoint_handler))
            .layer(RequestBodyLimitLayer::new(self.max_body_bytes))
            .with_state(self.state.clone())
    }

    /// Bind `addr` and start serving.
    pub async fn bind(self, addr: SocketAddr) -> io::Result<ServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener)
    }

    /// Start serving on an already bound listener.
    ///
    /// Spawns the HTTP server and the nonce sweep and returns immediately.
    pub fn serve(self, listener: TcpListener) -> io::Result<ServerHandle> {
        let local_addr = listener.local_addr()?;
        let app = self.router();

        info!(
            "📡 Control server for {} listening on {}",
            self.state.local_name(),
            local_addr
        );

        let (stop_listener, listener_stopped) = oneshot::channel::<()>();
        let server_task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = listener_stopped.await;
                })
                .await
        });

        let (stop_sweep, sweep_stopped) = watch::channel(false);
        let nonces = self.state.nonces.clone();
        let sweep_task = tokio::spawn(async move { nonces.expire_nonces(sweep_stopped).await });

        Ok(ServerHandle {
            local_addr,
            stop_listener,
            server_task,
            stop_sweep,
            sweep_task,
        })
    }
}

/// A running control server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    stop_listener: oneshot::Sender<()>,
    server_task: JoinHandle<io::Result<()>>,
    stop_sweep: watch::Sender<bool>,
    sweep_task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Close the listener, then stop the nonce sweep.
    pub async fn shutdown(self) -> io::Result<()> {
        info!("🛑 Control server on {} shutting down", self.local_addr);

        let _ = self.stop_listener.send(());
        let served = self
            .server_task
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));

        let _ = self.stop_sweep.send(true);
        if let Err(e) = self.sweep_task.await {
            error!("❌ Nonce sweep task failed: {}", e);
        }

        served?
    }
}

// ============================================================================
// HTTP HANDLERS
// ============================================================================

async fn nonce_handler(State(state): State<Arc<ControlState>>) -> Result<String, ControlError> {
    let key = state.key().await?;
    let sealed = state
        .nonces
        .issue_nonce(&key)
        .await
        .map_err(ControlError::Encrypt)?;

    debug!("🔑 Issued nonce ({} outstanding)", state.nonces.len().await);
    Ok(sealed)
}

async fn endpoint_handler(
    State(state): State<Arc<ControlState>>,
    Path(endpoint): Path<String>,
    body: String,
) -> Result<String, ControlError> {
    let endpoint: Endpoint = endpoint
        .parse()
        .map_err(ControlError::UnknownEndpoint)?;

    debug!("📥 {} request", endpoint);
    state.dispatch(endpoint, &body).await.map_err(|e| {
        warn!("⚠️  {} request rejected: {}", endpoint, e);
        e
    })
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = match &self {
            ControlError::Decrypt(_) => StatusCode::UNAUTHORIZED,
            ControlError::InvalidNonce => StatusCode::FORBIDDEN,
            ControlError::UnknownEndpoint(_) => StatusCode::NOT_FOUND,
            ControlError::Malformed(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
