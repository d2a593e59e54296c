//! Per-player combat state (authoritative on the server, predicted on clients)

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::time::unix_millis;

use super::combat::{AttackKind, CombatTuning};
use super::montage::MontageTracker;
use super::pawn::PawnKind;
use super::scheduler::TimerSlot;

/// Headbutt input state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadbuttPhase {
    #[default]
    Idle,
    Charging,
}

#[derive(Debug, Clone)]
pub struct Combatant {
    pub user_id: Uuid,
    pub display_name: String,
    pub pawn: PawnKind,

    // Transform
    pub position: Vec3,
    /// Control yaw in radians, 0 = +X
    pub yaw: f32,
    pub pitch: f32,
    /// Last Move input (x = right, y = forward)
    pub move_input: Vec2,
    pub last_input_seq: u32,
    /// Residual velocity from launches and knockback
    pub launch_velocity: Vec3,

    // Combat
    pub max_walk_speed: f32,
    pub stamina: f32,
    pub headbutt_strength: f32,
    pub headbutt_on_cooldown: bool,
    pub headbutt_phase: HeadbuttPhase,
    pub invincible: bool,
    pub stunned: bool,
    pub score: i32,

    /// Player still has a live connection driving this pawn
    pub connected: bool,
    pub montages: MontageTracker,

    /// Attack whose window is currently open
    pub attack_window: Option<AttackKind>,
    /// Repeating hit-check for the open attack window
    pub sweep_timer: TimerSlot,
    pub cooldown_timer: TimerSlot,
    pub stun_timer: TimerSlot,

    pub joined_at: u64,
}

impl Combatant {
    pub fn new(
        user_id: Uuid,
        display_name: String,
        pawn: PawnKind,
        position: Vec3,
        yaw: f32,
        tuning: &CombatTuning,
    ) -> Self {
        Self {
            user_id,
            display_name,
            pawn,
            position,
            yaw,
            pitch: 0.0,
            move_input: Vec2::ZERO,
            last_input_seq: 0,
            launch_velocity: Vec3::ZERO,
            max_walk_speed: tuning.normal_speed,
            stamina: tuning.stamina_max,
            headbutt_strength: 0.0,
            headbutt_on_cooldown: false,
            headbutt_phase: HeadbuttPhase::Idle,
            invincible: false,
            stunned: false,
            score: 0,
            connected: true,
            montages: MontageTracker::new(),
            attack_window: None,
            sweep_timer: TimerSlot::new(),
            cooldown_timer: TimerSlot::new(),
            stun_timer: TimerSlot::new(),
            joined_at: unix_millis(),
        }
    }

    /// Horizontal facing direction
    pub fn forward(&self) -> Vec3 {
        Vec3::new(self.yaw.cos(), self.yaw.sin(), 0.0)
    }

    pub fn right(&self) -> Vec3 {
        Vec3::new(self.yaw.sin(), -self.yaw.cos(), 0.0)
    }

    /// A controller is driving this pawn and it can act
    pub fn has_controller(&self) -> bool {
        self.connected && !self.stunned
    }

    pub fn is_sprinting(&self, tuning: &CombatTuning) -> bool {
        self.max_walk_speed >= tuning.sprint_speed
    }

    pub fn set_max_speed(&mut self, speed: f32) {
        self.max_walk_speed = speed;
    }

    /// Add an instantaneous velocity change
    pub fn launch(&mut self, impulse: Vec3) {
        self.launch_velocity += impulse;
    }

    pub fn add_score(&mut self, delta: i32) -> i32 {
        self.score = self.score.saturating_add(delta);
        self.score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn combatant(yaw: f32) -> Combatant {
        Combatant::new(
            Uuid::new_v4(),
            "Bessie".to_string(),
            PawnKind::Cow,
            Vec3::ZERO,
            yaw,
            &CombatTuning::default(),
        )
    }

    #[test]
    fn spawns_walking_with_full_stamina() {
        let c = combatant(0.0);
        let tuning = CombatTuning::default();
        assert_eq!(c.max_walk_speed, tuning.normal_speed);
        assert_eq!(c.stamina, tuning.stamina_max);
        assert!(!c.is_sprinting(&tuning));
        assert!(c.has_controller());
    }

    #[test]
    fn forward_follows_yaw() {
        let c = combatant(std::f32::consts::FRAC_PI_2);
        assert!((c.forward() - Vec3::Y).length() < 1e-5);
        assert!((c.right() - Vec3::X).length() < 1e-5);
    }

    #[test]
    fn stunned_combatant_has_no_controller() {
        let mut c = combatant(0.0);
        c.stunned = true;
        assert!(!c.has_controller());
    }

    #[test]
    fn score_can_go_negative() {
        let mut c = combatant(0.0);
        assert_eq!(c.add_score(-10), -10);
        assert_eq!(c.add_score(25), 15);
    }
}
