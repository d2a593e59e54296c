//! Matchmaking queue and match creation

pub mod queue;
pub mod service;

pub use service::{MatchmakingError, MatchmakingService};
