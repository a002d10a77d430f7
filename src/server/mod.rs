//! # Control Server Components
//!
//! - [`server`]: the HTTP listener, routing and shutdown ordering
//! - [`handlers`]: request authentication and per-endpoint business logic
//! - [`nonce`]: the nonce authority issuing single-use challenges

pub mod handlers;
pub mod nonce;
pub mod server;

pub use nonce::NonceAuthority;
pub use server::{ControlServer, ControlState, ServerHandle};
