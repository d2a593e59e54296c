//! Combat tuning, attack kinds and the combat error taxonomy

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::prop::PropId;

/// Gameplay constants for the sprint and headbutt actions
#[derive(Debug, Clone, Copy)]
pub struct CombatTuning {
    /// Speed cap while walking
    pub normal_speed: f32,
    /// Speed cap while sprinting
    pub sprint_speed: f32,
    pub stamina_max: f32,
    /// Stamina lost per second of sprinting
    pub stamina_drain_per_sec: f32,
    /// Stamina regained per second while not sprinting
    pub stamina_regen_per_sec: f32,

    /// Cadence of the repeating hit-check (seconds)
    pub hit_check_interval: f32,
    pub sprint_sweep_distance: f32,
    pub headbutt_sweep_distance: f32,
    /// Sweep sphere radius; zero degenerates to a line trace
    pub sweep_radius: f32,
    /// Points moved from target to attacker on a combatant hit
    pub hit_score: i32,

    /// Minimum charge time before a headbutt may be released
    pub min_charge_secs: f32,
    /// Strength gained per second of charging
    pub charge_rate_per_sec: f32,
    pub max_strength: f32,
    pub release_montage_secs: f32,
    pub headbutt_cooldown_secs: f32,
    /// Launch impulse at zero strength
    pub launch_base: f32,
    /// Extra launch impulse per unit of strength
    pub launch_per_strength: f32,

    pub stun_secs: f32,
    pub stun_knockback: f32,
}

impl Default for CombatTuning {
    fn default() -> Self {
        Self {
            normal_speed: 200.0,
            sprint_speed: 600.0,
            stamina_max: 1.0,
            stamina_drain_per_sec: 0.25,
            stamina_regen_per_sec: 0.15,
            hit_check_interval: 0.1,
            sprint_sweep_distance: 100.0,
            headbutt_sweep_distance: 50.0,
            sweep_radius: 50.0,
            hit_score: 10,
            min_charge_secs: 0.4,
            charge_rate_per_sec: 1.0,
            max_strength: 1.0,
            release_montage_secs: 0.8,
            headbutt_cooldown_secs: 1.5,
            launch_base: 600.0,
            launch_per_strength: 900.0,
            stun_secs: 1.5,
            stun_knockback: 400.0,
        }
    }
}

/// Which action opened the current attack window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackKind {
    /// Sprinting into someone
    Charge,
    Headbutt,
}

impl AttackKind {
    pub fn label(&self) -> &'static str {
        match self {
            AttackKind::Charge => "Charge",
            AttackKind::Headbutt => "Headbutt",
        }
    }

    pub fn sweep_distance(&self, tuning: &CombatTuning) -> f32 {
        match self {
            AttackKind::Charge => tuning.sprint_sweep_distance,
            AttackKind::Headbutt => tuning.headbutt_sweep_distance,
        }
    }
}

/// What a hit against an invincible combatant does to the attack window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvincibleHitPolicy {
    /// Ignore the hit and keep sweeping
    #[default]
    KeepOpen,
    /// Treat the contact as the end of the attack
    Close,
}

impl std::str::FromStr for InvincibleHitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep_open" => Ok(Self::KeepOpen),
            "close" => Ok(Self::Close),
            other => Err(format!("unknown invincible hit policy: {}", other)),
        }
    }
}

/// Work items the match scheduler hands back when due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombatTask {
    HitCheck { owner: Uuid, attack: AttackKind },
    CooldownReady { owner: Uuid },
    StunEnd { owner: Uuid },
}

/// Combat failures. All of them are absorbed by the match loop: the action
/// simply produces no effect.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CombatError {
    #[error("Precondition not met: {0}")]
    PreconditionNotMet(&'static str),

    #[error("Sweep hit an unrecognized target")]
    InvalidTarget,

    #[error("Prop {0:?} already destroyed")]
    AlreadyDestroyed(PropId),

    #[error("No world context for sweep")]
    NoWorldContext,

    #[error("Unknown combatant {0}")]
    UnknownCombatant(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headbutt_sweeps_shorter_than_charge() {
        let tuning = CombatTuning::default();
        assert_eq!(AttackKind::Charge.sweep_distance(&tuning), 100.0);
        assert_eq!(AttackKind::Headbutt.sweep_distance(&tuning), 50.0);
    }

    #[test]
    fn policy_parses_from_config_strings() {
        assert_eq!("keep_open".parse::<InvincibleHitPolicy>(), Ok(InvincibleHitPolicy::KeepOpen));
        assert_eq!(" Close ".parse::<InvincibleHitPolicy>(), Ok(InvincibleHitPolicy::Close));
        assert!("sometimes".parse::<InvincibleHitPolicy>().is_err());
    }
}
