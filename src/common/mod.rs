//! # Common Components
//!
//! Shared utilities and data structures used by both the control server and
//! the control client.
//!
//! ## Modules
//!
//! - [`crypto`]: key generation and per-peer message sealing
//! - [`messages`]: the request/response catalog and endpoint names
//! - [`config`]: node settings, the peer directory and cluster config
//! - [`error`]: control-plane error kinds
//! - [`acme`]: ACME challenge store consulted by the control endpoints
//! - [`logging`]: logger setup for the binaries

pub mod acme;
pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod messages;
