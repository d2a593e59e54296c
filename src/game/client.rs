//! Client-side prediction of combat actions
//!
//! The predictor runs the same `validate` as the authority so inputs that
//! would be rejected are never sent, applies the optimistic part locally,
//! and reconciles with the effects the authority broadcasts.

use glam::Vec3;
use uuid::Uuid;

use crate::ws::protocol::{ClientMsg, CombatEffect};

use super::combat::CombatTuning;
use super::combatant::{Combatant, HeadbuttPhase};
use super::controller::{
    AuthoritativeAction, HeadbuttCharge, HeadbuttRelease, SprintStart, CHARGE_SECTION, RELEASE_SECTION,
};
use super::montage::MontageId;

/// Extension points implemented by the presentation layer
pub trait PresentationHooks {
    /// A headbutt was released locally; start the cooldown refresh display
    fn cooldown_refresh_requested(&mut self) {}

    /// The local pawn was stunned and should play its knockback
    fn stun_requested(&mut self, _direction: Vec3) {}
}

/// Hooks for headless clients
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl PresentationHooks for NoopHooks {}

pub struct ClientPredictor<H: PresentationHooks = NoopHooks> {
    local: Combatant,
    tuning: CombatTuning,
    hooks: H,
}

impl<H: PresentationHooks> ClientPredictor<H> {
    pub fn new(local: Combatant, tuning: CombatTuning, hooks: H) -> Self {
        Self { local, tuning, hooks }
    }

    pub fn local(&self) -> &Combatant {
        &self.local
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn on_sprint_pressed(&mut self) -> Option<ClientMsg> {
        SprintStart.validate(&self.local, &self.tuning).ok()?;
        self.local.set_max_speed(self.tuning.sprint_speed);
        Some(ClientMsg::SprintStart)
    }

    pub fn on_sprint_released(&mut self) -> Option<ClientMsg> {
        self.local.set_max_speed(self.tuning.normal_speed);
        Some(ClientMsg::SprintStop)
    }

    pub fn on_headbutt_pressed(&mut self) -> Option<ClientMsg> {
        HeadbuttCharge.validate(&self.local, &self.tuning).ok()?;
        self.local.headbutt_phase = HeadbuttPhase::Charging;
        self.local.headbutt_strength = 0.0;
        self.local
            .montages
            .play(MontageId::HeadbuttCharge, 1.0, CHARGE_SECTION, self.tuning.min_charge_secs);
        Some(ClientMsg::HeadbuttCharge)
    }

    /// Headbutt button released.
    ///
    /// While on cooldown nothing is sent and nothing changes; the charge is
    /// held until the cooldown clears. Any other failed check abandons the
    /// charge on both ends.
    pub fn on_headbutt_released(&mut self) -> Option<ClientMsg> {
        if self.local.headbutt_on_cooldown {
            return None;
        }
        if HeadbuttRelease.validate(&self.local, &self.tuning).is_err() {
            if self.local.headbutt_phase != HeadbuttPhase::Charging {
                return None;
            }
            self.reset_charge();
            return Some(ClientMsg::HeadbuttCancel);
        }

        self.local.headbutt_on_cooldown = true;
        self.hooks.cooldown_refresh_requested();
        self.reset_charge();
        self.local
            .montages
            .play(MontageId::HeadbuttRelease, 1.0, RELEASE_SECTION, self.tuning.release_montage_secs);
        Some(ClientMsg::HeadbuttRelease)
    }

    /// Presentation finished its cooldown display
    pub fn complete_cooldown(&mut self) {
        self.local.headbutt_on_cooldown = false;
    }

    /// Advance local timers by one tick
    pub fn advance(&mut self, dt: f32) {
        if self.local.headbutt_phase == HeadbuttPhase::Charging {
            self.local.headbutt_strength =
                (self.local.headbutt_strength + self.tuning.charge_rate_per_sec * dt).min(self.tuning.max_strength);
        }
        self.local.montages.tick();
    }

    /// Reconcile with one authoritative effect
    pub fn apply_effect(&mut self, effect: &CombatEffect) {
        let me = self.local.user_id;
        match effect {
            CombatEffect::SpeedCapChanged {
                combatant,
                max_walk_speed,
            } if *combatant == me => self.local.set_max_speed(*max_walk_speed),
            CombatEffect::HeadbuttChargeCancelled { combatant } if *combatant == me => self.reset_charge(),
            CombatEffect::HeadbuttReleased { combatant, impulse, .. } if *combatant == me => {
                self.local.launch(*impulse);
            }
            CombatEffect::HeadbuttCooldownReady { combatant } if *combatant == me => self.complete_cooldown(),
            CombatEffect::ScoreChanged { combatant, score, .. } if *combatant == me => self.local.score = *score,
            CombatEffect::Stunned {
                combatant, direction, ..
            } if *combatant == me => {
                self.local.stunned = true;
                self.hooks.stun_requested(*direction);
            }
            CombatEffect::StunEnded { combatant } if *combatant == me => self.local.stunned = false,
            CombatEffect::InvincibilityChanged {
                combatant,
                invincible,
            } if *combatant == me => self.local.invincible = *invincible,
            _ => {}
        }
    }

    /// The local pawn's user id
    pub fn user_id(&self) -> Uuid {
        self.local.user_id
    }

    fn reset_charge(&mut self) {
        self.local.headbutt_phase = HeadbuttPhase::Idle;
        self.local.headbutt_strength = 0.0;
        self.local.montages.stop(MontageId::HeadbuttCharge);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::pawn::PawnKind;
    use crate::util::time::{tick_delta, ticks_for};

    #[derive(Default)]
    struct RecordingHooks {
        refreshes: u32,
        stuns: Vec<Vec3>,
    }

    impl PresentationHooks for RecordingHooks {
        fn cooldown_refresh_requested(&mut self) {
            self.refreshes += 1;
        }

        fn stun_requested(&mut self, direction: Vec3) {
            self.stuns.push(direction);
        }
    }

    fn predictor() -> ClientPredictor<RecordingHooks> {
        let tuning = CombatTuning::default();
        let local = Combatant::new(Uuid::new_v4(), "Clover".to_string(), PawnKind::Cow, Vec3::ZERO, 0.0, &tuning);
        ClientPredictor::new(local, tuning, RecordingHooks::default())
    }

    fn charge_fully(p: &mut ClientPredictor<RecordingHooks>) {
        assert!(matches!(p.on_headbutt_pressed(), Some(ClientMsg::HeadbuttCharge)));
        for _ in 0..ticks_for(p.tuning.min_charge_secs) {
            p.advance(tick_delta());
        }
    }

    #[test]
    fn sprint_without_stamina_sends_nothing() {
        let mut p = predictor();
        p.local.stamina = 0.0;
        assert!(p.on_sprint_pressed().is_none());
        assert_eq!(p.local().max_walk_speed, 200.0);
    }

    #[test]
    fn release_latches_cooldown_and_requests_refresh() {
        let mut p = predictor();
        charge_fully(&mut p);

        assert!(matches!(p.on_headbutt_released(), Some(ClientMsg::HeadbuttRelease)));
        assert!(p.local().headbutt_on_cooldown);
        assert_eq!(p.local().headbutt_phase, HeadbuttPhase::Idle);
        assert_eq!(p.local().headbutt_strength, 0.0);
        assert_eq!(p.hooks().refreshes, 1);
    }

    #[test]
    fn release_on_cooldown_sends_nothing_and_changes_nothing() {
        let mut p = predictor();
        charge_fully(&mut p);
        p.local.headbutt_on_cooldown = true;
        let strength = p.local().headbutt_strength;

        assert!(p.on_headbutt_released().is_none());
        assert_eq!(p.local().headbutt_phase, HeadbuttPhase::Charging);
        assert_eq!(p.local().headbutt_strength, strength);
        assert_eq!(p.hooks().refreshes, 0);
    }

    #[test]
    fn early_release_cancels_the_charge() {
        let mut p = predictor();
        p.on_headbutt_pressed();

        assert!(matches!(p.on_headbutt_released(), Some(ClientMsg::HeadbuttCancel)));
        assert_eq!(p.local().headbutt_phase, HeadbuttPhase::Idle);
        assert!(!p.local().headbutt_on_cooldown);
    }

    #[test]
    fn cooldown_ready_effect_reenables_release() {
        let mut p = predictor();
        charge_fully(&mut p);
        p.on_headbutt_released();

        let me = p.user_id();
        p.apply_effect(&CombatEffect::HeadbuttCooldownReady { combatant: me });
        assert!(!p.local().headbutt_on_cooldown);

        charge_fully(&mut p);
        assert!(matches!(p.on_headbutt_released(), Some(ClientMsg::HeadbuttRelease)));
    }

    #[test]
    fn stun_effect_reaches_presentation() {
        let mut p = predictor();
        let me = p.user_id();

        p.apply_effect(&CombatEffect::Stunned {
            combatant: me,
            by: Uuid::new_v4(),
            direction: Vec3::Y,
        });
        p.apply_effect(&CombatEffect::Stunned {
            combatant: Uuid::new_v4(),
            by: me,
            direction: Vec3::X,
        });

        assert!(p.local().stunned);
        assert_eq!(p.hooks().stuns, vec![Vec3::Y]);
        assert!(p.on_sprint_pressed().is_none());
    }

    #[test]
    fn authority_speed_cap_overrides_prediction() {
        let mut p = predictor();
        p.on_sprint_pressed();
        let me = p.user_id();
        p.apply_effect(&CombatEffect::SpeedCapChanged {
            combatant: me,
            max_walk_speed: 200.0,
        });
        assert_eq!(p.local().max_walk_speed, 200.0);
    }
}
