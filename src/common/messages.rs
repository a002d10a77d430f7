//! # Message Protocol
//!
//! Defines the request/response catalog of the peer control plane.
//!
//! Every request type:
//! - names the wire endpoint it is sent to (`PUT /<endpoint>`),
//! - names its paired response type,
//! - carries a `nonce` field which the client fills with a fresh,
//!   server-issued challenge right before sending.
//!
//! Messages are JSON encoded, then sealed with the receiving peer's key (see
//! [`crypto`](super::crypto)).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::config::{Config, ConfigChain, Peer};

// ============================================================================
// ENDPOINT CATALOG
// ============================================================================

/// Every path served by a control server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Nonce,
    AuthCheck,
    PeerRegister,
    ConfigUpdate,
    ConfigReload,
    IdentifyPublisher,
    PeerNonce,
    Uptime,
    Ping,
    AcmeChallenge,
    AcmeReady,
    ConfigChain,
    ConfigFetch,
}

impl Endpoint {
    pub const ALL: [Endpoint; 13] = [
        Endpoint::Nonce,
        Endpoint::AuthCheck,
        Endpoint::PeerRegister,
        Endpoint::ConfigUpdate,
        Endpoint::ConfigReload,
        Endpoint::IdentifyPublisher,
        Endpoint::PeerNonce,
        Endpoint::Uptime,
        Endpoint::Ping,
        Endpoint::AcmeChallenge,
        Endpoint::AcmeReady,
        Endpoint::ConfigChain,
        Endpoint::ConfigFetch,
    ];

    /// Wire name, as it appears in the URL path.
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Nonce => "nonce",
            Endpoint::AuthCheck => "authCheck",
            Endpoint::PeerRegister => "peerRegister",
            Endpoint::ConfigUpdate => "configUpdate",
            Endpoint::ConfigReload => "configReload",
            Endpoint::IdentifyPublisher => "identifyPublisher",
            Endpoint::PeerNonce => "peerNonce",
            Endpoint::Uptime => "uptime",
            Endpoint::Ping => "ping",
            Endpoint::AcmeChallenge => "acmeChallenge",
            Endpoint::AcmeReady => "acmeReady",
            Endpoint::ConfigChain => "configChain",
            Endpoint::ConfigFetch => "configFetch",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

// ============================================================================
// NONCE
// ============================================================================

/// Raw challenge bytes; base64 in JSON.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Nonce(pub Vec<u8>);

impl Nonce {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({} bytes)", self.0.len())
    }
}

impl Serialize for Nonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Nonce {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Nonce)
            .map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// REQUEST CONTRACT
// ============================================================================

/// A control-plane request and the response it is answered with.
pub trait Request: Serialize + DeserializeOwned + Send + Sync + 'static {
    type Response: Serialize + DeserializeOwned + Send + 'static;

    const ENDPOINT: Endpoint;

    fn nonce(&self) -> &Nonce;

    fn set_nonce(&mut self, nonce: Nonce);
}

macro_rules! request {
    ($request:ty => $response:ty, $endpoint:expr) => {
        impl Request for $request {
            type Response = $response;

            const ENDPOINT: Endpoint = $endpoint;

            fn nonce(&self) -> &Nonce {
                &self.nonce
            }

            fn set_nonce(&mut self, nonce: Nonce) {
                self.nonce = nonce;
            }
        }
    };
}

/// Round-trips a nonce to prove the channel works.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthCheckRequest {
    #[serde(default)]
    pub nonce: Nonce,
}

/// Upserts a peer in the receiver's directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRegisterRequest {
    pub peer: Peer,
    #[serde(default)]
    pub nonce: Nonce,
}

/// Replaces the receiver's whole cluster config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigUpdateRequest {
    pub config: Config,
    #[serde(default)]
    pub nonce: Nonce,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigReloadRequest {
    #[serde(default)]
    pub nonce: Nonce,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentifyPublisherRequest {
    #[serde(default)]
    pub nonce: Nonce,
}

/// Asks for a fresh nonce through an authenticated exchange.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerNonceRequest {
    #[serde(default)]
    pub nonce: Nonce,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UptimeRequest {
    #[serde(default)]
    pub nonce: Nonce,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PingRequest {
    #[serde(default)]
    pub nonce: Nonce,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcmeChallengeRequest {
    pub domain: String,
    #[serde(default)]
    pub nonce: Nonce,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcmeReadyRequest {
    pub domain: String,
    #[serde(default)]
    pub nonce: Nonce,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigChainRequest {
    #[serde(default)]
    pub nonce: Nonce,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFetchRequest {
    #[serde(default)]
    pub nonce: Nonce,
}

// ========== RESPONSES ==========

/// Empty acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NilResponse {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceResponse {
    pub nonce: Nonce,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherResponse {
    pub publisher: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UptimeResponse {
    pub uptime: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainResponse {
    pub chain: ConfigChain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFetchResponse {
    pub config: Config,
    pub chain: ConfigChain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcmeChallengeResponse {
    pub challenge: String,
}

request!(AuthCheckRequest => NilResponse, Endpoint::AuthCheck);
request!(PeerRegisterRequest => NilResponse, Endpoint::PeerRegister);
request!(ConfigUpdateRequest => NilResponse, Endpoint::ConfigUpdate);
request!(ConfigReloadRequest => NilResponse, Endpoint::ConfigReload);
request!(IdentifyPublisherRequest => PublisherResponse, Endpoint::IdentifyPublisher);
request!(PeerNonceRequest => NonceResponse, Endpoint::PeerNonce);
request!(UptimeRequest => UptimeResponse, Endpoint::Uptime);
request!(PingRequest => NilResponse, Endpoint::Ping);
request!(AcmeChallengeRequest => AcmeChallengeResponse, Endpoint::AcmeChallenge);
request!(AcmeReadyRequest => NilResponse, Endpoint::AcmeReady);
request!(ConfigChainRequest => ChainResponse, Endpoint::ConfigChain);
request!(ConfigFetchRequest => ConfigFetchResponse, Endpoint::ConfigFetch);
