//! Game simulation modules

pub mod client;
pub mod combat;
pub mod combatant;
pub mod controller;
pub mod r#match;
pub mod montage;
pub mod pawn;
pub mod physics;
pub mod prop;
pub mod scheduler;
pub mod snapshot;
pub mod sweep;

pub use r#match::{GameMatch, MatchHandle, MatchRegistry, MatchSettings};

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Player input received from WebSocket
#[derive(Debug, Clone)]
pub struct PlayerInput {
    pub user_id: Uuid,
    /// Name to show other players; only read on join
    pub display_name: Option<String>,
    pub msg: ClientMsg,
    pub received_at: u64,
    /// The sender's own channel, for replies nobody else should see
    pub reply_tx: Option<broadcast::Sender<ServerMsg>>,
}
