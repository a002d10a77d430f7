//! # Control-Plane Errors
//!
//! One enum covers every way an exchange between peers can fail, on either
//! side of the wire. Callers branch on [`ControlError::kind`] instead of
//! parsing message text; the underlying cause stays reachable through
//! [`std::error::Error::source`].

use thiserror::Error;

use super::config::ConfigError;
use super::crypto::CryptoError;

/// Coarse classification of a [`ControlError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NonceAcquisitionFailure,
    MarshalFailure,
    EncryptFailure,
    DecryptFailure,
    BadResponse,
    HandlerFailure,
    ConfigPersistenceFailure,
}

#[derive(Error, Debug)]
pub enum ControlError {
    /// `source` is the network failure, absent when the peer answered non-200
    #[error("could not acquire nonce from {peer}: {reason}")]
    NonceAcquisition {
        peer: String,
        reason: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("could not marshal message: {0}")]
    Marshal(#[source] serde_json::Error),

    /// A request body that decrypted but is not the endpoint's JSON shape
    #[error("malformed request: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("could not encrypt message: {0}")]
    Encrypt(#[source] CryptoError),

    #[error("could not decrypt message: {0}")]
    Decrypt(#[source] CryptoError),

    #[error("bad response from peer (status {status}): {body}")]
    BadResponse { status: u16, body: String },

    /// Network failure or timeout talking to a peer
    #[error("request to {peer} failed: {source}")]
    Transport {
        peer: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("nonce is missing, unknown or expired")]
    InvalidNonce,

    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    /// Business-logic rejection raised by an endpoint handler
    #[error("{0}")]
    Handler(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ControlError {
    pub fn handler(msg: impl Into<String>) -> Self {
        ControlError::Handler(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ControlError::NonceAcquisition { .. } => ErrorKind::NonceAcquisitionFailure,
            ControlError::Marshal(_) | ControlError::Malformed(_) => ErrorKind::MarshalFailure,
            ControlError::Encrypt(_) => ErrorKind::EncryptFailure,
            ControlError::Decrypt(_) => ErrorKind::DecryptFailure,
            ControlError::BadResponse { .. } | ControlError::Transport { .. } => {
                ErrorKind::BadResponse
            }
            ControlError::InvalidNonce
            | ControlError::UnknownEndpoint(_)
            | ControlError::UnknownPeer(_)
            | ControlError::Handler(_) => ErrorKind::HandlerFailure,
            ControlError::Config(_) => ErrorKind::ConfigPersistenceFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_kind_and_source_preserved() {
        let err = ControlError::Decrypt(CryptoError::DecryptionFailed);

        assert_eq!(err.kind(), ErrorKind::DecryptFailure);
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("could not decrypt message"));
    }

    #[test]
    fn test_handler_rejections_share_a_kind() {
        for err in [
            ControlError::InvalidNonce,
            ControlError::UnknownEndpoint("bogus".into()),
            ControlError::UnknownPeer("p9".into()),
            ControlError::handler("no such record type"),
        ] {
            assert_eq!(err.kind(), ErrorKind::HandlerFailure);
        }
    }
}
