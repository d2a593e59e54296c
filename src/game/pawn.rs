//! Pawn selection for players entering a match

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PawnKind {
    /// The playable cow
    #[default]
    Cow,
    /// Observer without a combatant
    Spectator,
}

/// Chooses which pawn a new player controls
#[derive(Debug, Clone)]
pub struct MatchPawnSelector {
    default_pawn: PawnKind,
    allow_spectators: bool,
}

impl MatchPawnSelector {
    pub fn new(default_pawn: PawnKind, allow_spectators: bool) -> Self {
        Self {
            default_pawn,
            allow_spectators,
        }
    }

    pub fn select(&self, requested: Option<PawnKind>) -> PawnKind {
        match requested {
            Some(PawnKind::Spectator) if self.allow_spectators => PawnKind::Spectator,
            Some(PawnKind::Cow) => PawnKind::Cow,
            _ => self.default_pawn,
        }
    }
}

impl Default for MatchPawnSelector {
    fn default() -> Self {
        Self::new(PawnKind::Cow, true)
    }
}
