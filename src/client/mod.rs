//! # Client Components
//!
//! ## Control Client ([`client`])
//! Performs one authenticated exchange with a peer's control server: fetch a
//! nonce, seal the request, call the endpoint, open the response.
//!
//! ## ACME polling ([`acme`])
//! Long-deadline loop on top of single exchanges, used while an ACME
//! challenge propagates to every peer.

pub mod acme;
pub mod client;

pub use acme::wait_for_acme_ready;
pub use client::ControlClient;
