//! Moo Arena server library
//!
//! The combat state machine in [`game`] is shared by the authoritative match
//! loop and by clients, which predict with [`game::client::ClientPredictor`]
//! and plug their presentation in through [`game::client::PresentationHooks`].

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod matchmaking;
pub mod util;
pub mod ws;
