//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use glam::Vec3;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::combat::AttackKind;
use crate::game::combatant::HeadbuttPhase;
use crate::game::montage::MontageId;
use crate::game::pawn::PawnKind;
use crate::game::prop::PropId;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Request to join a match
    JoinMatch {
        /// Optional specific match ID, otherwise matchmaking assigns one
        match_id: Option<Uuid>,
        /// Requested pawn; the match decides what is granted
        #[serde(default)]
        pawn: Option<PawnKind>,
    },

    /// Movement axis input (x = right, y = forward)
    Move {
        /// Sequence number for client-side prediction reconciliation
        seq: u32,
        x: f32,
        y: f32,
    },

    /// Look axis input (x = yaw, y = pitch)
    Look { x: f32, y: f32 },

    SprintStart,
    SprintStop,

    /// Headbutt button pressed
    HeadbuttCharge,
    /// Headbutt button released after the local release checks passed
    HeadbuttRelease,
    /// Headbutt button released but the local release checks failed
    HeadbuttCancel,

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Leave current match
    LeaveMatch,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        user_id: Uuid,
        server_time: u64,
    },

    /// Confirmation of match join
    MatchJoined {
        match_id: Uuid,
        /// Seed for deterministic random generation
        seed: u64,
        /// All players in the match at join time
        players: Vec<PlayerInfo>,
    },

    /// Player joined the match
    PlayerJoined {
        player: PlayerInfo,
    },

    /// Player left the match
    PlayerLeft {
        user_id: Uuid,
        reason: String,
    },

    /// Game state snapshot (sent at regular intervals)
    Snapshot {
        /// Server tick number
        tick: u64,
        /// Seconds left in the round
        round_remaining: f32,
        combatants: Vec<CombatantSnapshot>,
        props: Vec<PropSnapshot>,
    },

    /// Combat effects issued by the authority this tick, in issue order
    Effects {
        tick: u64,
        effects: Vec<CombatEffect>,
    },

    /// Match countdown starting
    MatchCountdown {
        seconds_remaining: u32,
    },

    /// Match has started
    MatchStarted {
        tick: u64,
    },

    /// Match has ended
    MatchEnd {
        /// Highest score, if anyone played
        winner_user_id: Option<Uuid>,
        scoreboard: Vec<ScoreEntry>,
    },

    /// Error message
    Error {
        code: String,
        message: String,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

/// Player info for lobby/join
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub user_id: Uuid,
    pub display_name: String,
    pub pawn: PawnKind,
}

/// Combatant state in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombatantSnapshot {
    pub user_id: Uuid,
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub max_walk_speed: f32,
    pub stamina: f32,
    pub headbutt_phase: HeadbuttPhase,
    pub headbutt_on_cooldown: bool,
    pub invincible: bool,
    pub stunned: bool,
    pub score: i32,
    /// Last Move sequence applied, for prediction reconciliation
    pub last_input_seq: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropSnapshot {
    pub prop_id: PropId,
    pub position: Vec3,
    pub point_value: i32,
}

/// Replicated combat effects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum CombatEffect {
    /// Speed cap changed (sprint start/stop)
    SpeedCapChanged {
        combatant: Uuid,
        max_walk_speed: f32,
    },

    /// Attack window opened with a repeating hit-check
    AttackWindowOpened {
        combatant: Uuid,
        attack: AttackKind,
    },

    AttackWindowClosed {
        combatant: Uuid,
        attack: AttackKind,
    },

    HeadbuttCharging {
        combatant: Uuid,
    },

    HeadbuttChargeCancelled {
        combatant: Uuid,
    },

    /// Release cue: launch impulse plus montage section to play
    HeadbuttReleased {
        combatant: Uuid,
        impulse: Vec3,
        montage: MontageId,
        section: String,
        rate: f32,
    },

    /// Authoritative headbutt cooldown elapsed
    HeadbuttCooldownReady {
        combatant: Uuid,
    },

    ScoreChanged {
        combatant: Uuid,
        delta: i32,
        score: i32,
    },

    Stunned {
        combatant: Uuid,
        by: Uuid,
        direction: Vec3,
    },

    StunEnded {
        combatant: Uuid,
    },

    InvincibilityChanged {
        combatant: Uuid,
        invincible: bool,
    },

    /// Destruction cue; the prop is gone from the world
    PropDestroyed {
        prop_id: PropId,
        destroyed_by: Option<Uuid>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub user_id: Uuid,
    pub display_name: String,
    pub score: i32,
    pub placement: u32,
}
