//! Character movement, look and stamina integration

use glam::{Vec2, Vec3};

use crate::util::time::tick_delta;

use super::combat::CombatTuning;
use super::combatant::{Combatant, HeadbuttPhase};

/// Movement constants for the cow pawn
#[derive(Debug, Clone, Copy)]
pub struct MovementStats {
    /// Look input scale
    pub mouse_sensitivity: f32,
    /// Pitch limit in radians (both directions)
    pub max_pitch: f32,
    /// Fraction of launch velocity kept each tick
    pub launch_drag: f32,
    /// Launch velocity below this is zeroed
    pub launch_rest_speed: f32,
    /// Players are kept inside this radius around the origin
    pub arena_radius: f32,
    /// Collision capsule radius
    pub capsule_radius: f32,
}

impl Default for MovementStats {
    fn default() -> Self {
        Self {
            mouse_sensitivity: 0.6,
            max_pitch: 80f32.to_radians(),
            launch_drag: 0.88,
            launch_rest_speed: 5.0,
            arena_radius: 1200.0,
            capsule_radius: 42.0,
        }
    }
}

/// Result of integrating one combatant for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepOutcome {
    /// Stamina ran out while sprinting; the sprint must be stopped
    pub stamina_depleted: bool,
}

pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Apply a Look input (degrees-per-unit scaled by sensitivity)
    pub fn apply_look(combatant: &mut Combatant, look: Vec2, stats: &MovementStats) {
        let yaw_delta = (look.x * stats.mouse_sensitivity).to_radians();
        let pitch_delta = (look.y * stats.mouse_sensitivity).to_radians();
        combatant.yaw = (combatant.yaw + yaw_delta).rem_euclid(std::f32::consts::TAU);
        combatant.pitch = (combatant.pitch + pitch_delta).clamp(-stats.max_pitch, stats.max_pitch);
    }

    /// Store a Move input; magnitude is clamped to 1
    pub fn apply_move(combatant: &mut Combatant, input: Vec2) {
        combatant.move_input = input.clamp_length_max(1.0);
    }

    /// Integrate one tick of movement, stamina, charge and montages
    pub fn step(combatant: &mut Combatant, stats: &MovementStats, tuning: &CombatTuning) -> StepOutcome {
        let dt = tick_delta();
        let mut outcome = StepOutcome::default();

        // Walking velocity is relative to control yaw; stunned pawns don't walk.
        let walk = if combatant.stunned {
            Vec3::ZERO
        } else {
            (combatant.forward() * combatant.move_input.y + combatant.right() * combatant.move_input.x)
                * combatant.max_walk_speed
        };

        let velocity = walk + combatant.launch_velocity;
        let mut position = combatant.position + velocity * dt;

        // Keep inside the arena ring
        let flat = Vec2::new(position.x, position.y);
        if flat.length() > stats.arena_radius {
            let clamped = flat.normalize_or_zero() * stats.arena_radius;
            position.x = clamped.x;
            position.y = clamped.y;
        }
        combatant.position = position;

        combatant.launch_velocity *= stats.launch_drag;
        if combatant.launch_velocity.length() < stats.launch_rest_speed {
            combatant.launch_velocity = Vec3::ZERO;
        }

        // Stamina drains while sprinting and regenerates otherwise
        if combatant.is_sprinting(tuning) {
            combatant.stamina = (combatant.stamina - tuning.stamina_drain_per_sec * dt).max(0.0);
            outcome.stamina_depleted = combatant.stamina <= 0.0;
        } else {
            combatant.stamina =
                (combatant.stamina + tuning.stamina_regen_per_sec * dt).min(tuning.stamina_max);
        }

        if combatant.headbutt_phase == HeadbuttPhase::Charging {
            combatant.headbutt_strength =
                (combatant.headbutt_strength + tuning.charge_rate_per_sec * dt).min(tuning.max_strength);
        }

        combatant.montages.tick();

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::pawn::PawnKind;
    use uuid::Uuid;

    fn cow() -> Combatant {
        Combatant::new(
            Uuid::new_v4(),
            "Daisy".to_string(),
            PawnKind::Cow,
            Vec3::ZERO,
            0.0,
            &CombatTuning::default(),
        )
    }

    #[test]
    fn move_is_relative_to_yaw() {
        let stats = MovementStats::default();
        let tuning = CombatTuning::default();
        let mut c = cow();
        c.yaw = std::f32::consts::FRAC_PI_2;
        PhysicsSystem::apply_move(&mut c, Vec2::new(0.0, 1.0));

        PhysicsSystem::step(&mut c, &stats, &tuning);

        let expected = tuning.normal_speed * tick_delta();
        assert!(c.position.x.abs() < 1e-3);
        assert!((c.position.y - expected).abs() < 1e-3);
    }

    #[test]
    fn stunned_pawn_only_drifts_with_launch() {
        let stats = MovementStats::default();
        let tuning = CombatTuning::default();
        let mut c = cow();
        c.stunned = true;
        PhysicsSystem::apply_move(&mut c, Vec2::new(0.0, 1.0));

        PhysicsSystem::step(&mut c, &stats, &tuning);
        assert_eq!(c.position, Vec3::ZERO);
    }

    #[test]
    fn pitch_is_clamped() {
        let stats = MovementStats::default();
        let mut c = cow();
        PhysicsSystem::apply_look(&mut c, Vec2::new(0.0, 10_000.0), &stats);
        assert!((c.pitch - stats.max_pitch).abs() < 1e-5);
    }

    #[test]
    fn sprinting_drains_stamina_until_depleted() {
        let stats = MovementStats::default();
        let tuning = CombatTuning::default();
        let mut c = cow();
        c.set_max_speed(tuning.sprint_speed);
        c.stamina = tuning.stamina_drain_per_sec * tick_delta() * 1.5;

        assert!(!PhysicsSystem::step(&mut c, &stats, &tuning).stamina_depleted);
        assert!(PhysicsSystem::step(&mut c, &stats, &tuning).stamina_depleted);
        assert_eq!(c.stamina, 0.0);
    }

    #[test]
    fn walking_regenerates_stamina_up_to_max() {
        let stats = MovementStats::default();
        let tuning = CombatTuning::default();
        let mut c = cow();
        c.stamina = tuning.stamina_max - 0.001;
        PhysicsSystem::step(&mut c, &stats, &tuning);
        assert_eq!(c.stamina, tuning.stamina_max);
    }

    #[test]
    fn launch_decays_to_rest() {
        let stats = MovementStats::default();
        let tuning = CombatTuning::default();
        let mut c = cow();
        c.launch(Vec3::new(600.0, 0.0, 0.0));
        for _ in 0..120 {
            PhysicsSystem::step(&mut c, &stats, &tuning);
        }
        assert_eq!(c.launch_velocity, Vec3::ZERO);
        assert!(c.position.x > 0.0);
    }

    #[test]
    fn charging_accumulates_strength_up_to_cap() {
        let stats = MovementStats::default();
        let tuning = CombatTuning::default();
        let mut c = cow();
        c.headbutt_phase = HeadbuttPhase::Charging;
        for _ in 0..120 {
            PhysicsSystem::step(&mut c, &stats, &tuning);
        }
        assert_eq!(c.headbutt_strength, tuning.max_strength);
    }
}
