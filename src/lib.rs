//! # border
//!
//! Peer control plane for a small quorum of edge nodes that jointly serve DNS
//! and balance traffic. Peers talk over an encrypted, nonce-authenticated
//! request/response protocol and elect one of themselves as the publisher.

pub mod client;
pub mod common;
pub mod election;
pub mod server;

pub use client::ControlClient;
pub use common::config::{Config, Peer, SharedConfig};
pub use common::error::{ControlError, ErrorKind};
pub use election::Election;
pub use server::ControlServer;
