//! # Leader Election
//!
//! Decides which peer is the border publisher.
//!
//! - [`election`]: gathers peer uptimes and computes this node's candidate
//! - [`voter`]: the ballot box that resolves the plurality winner

pub mod election;
pub mod voter;

pub use election::{Election, ElectionError, ElectionState, ElectionTransport};
pub use voter::Voter;
