//! Combat action controller
//!
//! Sprint and headbutt are modelled as [`AuthoritativeAction`]s: a pure
//! `validate` shared by client prediction and the authority, and an `apply`
//! that only the authority runs. `apply` mutates the combatant and pushes the
//! effects to broadcast, in order.
//!
//! While an attack window is open the authority runs a repeating hit-check
//! ([`CombatActionController::run_hit_check`]) that sweeps forward from the
//! neck bone and resolves whatever it hits into score, stun or destruction.

use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::util::time::ticks_for;
use crate::ws::protocol::CombatEffect;

use super::combat::{AttackKind, CombatError, CombatTask, CombatTuning, InvincibleHitPolicy};
use super::combatant::{Combatant, HeadbuttPhase};
use super::montage::MontageId;
use super::prop::PropRegistry;
use super::scheduler::{Scheduler, TaskHandle};
use super::sweep::{Bone, HitTarget, SweepQuery, WorldQuery};

/// Montage section played when a headbutt is released
pub const RELEASE_SECTION: &str = "ReleaseAttack";
pub const CHARGE_SECTION: &str = "Charge";

/// A client request the authority validates and applies
pub trait AuthoritativeAction {
    const NAME: &'static str;

    /// Preconditions, identical on client and authority
    fn validate(&self, combatant: &Combatant, tuning: &CombatTuning) -> Result<(), CombatError>;

    /// Authoritative state change. Only called after `validate` succeeded.
    fn apply<S>(
        &self,
        combatant: &mut Combatant,
        tuning: &CombatTuning,
        scheduler: &mut S,
        effects: &mut Vec<CombatEffect>,
    ) where
        S: Scheduler<CombatTask> + ?Sized;
}

fn require(condition: bool, reason: &'static str) -> Result<(), CombatError> {
    if condition {
        Ok(())
    } else {
        Err(CombatError::PreconditionNotMet(reason))
    }
}

/// Open an attack window, replacing whatever window was open
fn open_window<S>(
    combatant: &mut Combatant,
    attack: AttackKind,
    tuning: &CombatTuning,
    scheduler: &mut S,
    effects: &mut Vec<CombatEffect>,
) where
    S: Scheduler<CombatTask> + ?Sized,
{
    // Observers see a close for every open
    close_window(combatant, scheduler, effects);
    combatant.sweep_timer.start_repeating(
        scheduler,
        ticks_for(tuning.hit_check_interval),
        CombatTask::HitCheck {
            owner: combatant.user_id,
            attack,
        },
    );
    combatant.attack_window = Some(attack);
    effects.push(CombatEffect::AttackWindowOpened {
        combatant: combatant.user_id,
        attack,
    });
}

/// Cancel the repeating hit-check. Returns false if no window was open.
fn close_window<S>(combatant: &mut Combatant, scheduler: &mut S, effects: &mut Vec<CombatEffect>) -> bool
where
    S: Scheduler<CombatTask> + ?Sized,
{
    let attack = combatant.attack_window.take();
    let was_live = combatant.sweep_timer.clear(scheduler);
    if let Some(attack) = attack {
        effects.push(CombatEffect::AttackWindowClosed {
            combatant: combatant.user_id,
            attack,
        });
    }
    was_live
}

fn cancel_charge(combatant: &mut Combatant, effects: &mut Vec<CombatEffect>) {
    combatant.headbutt_phase = HeadbuttPhase::Idle;
    combatant.headbutt_strength = 0.0;
    combatant.montages.stop(MontageId::HeadbuttCharge);
    effects.push(CombatEffect::HeadbuttChargeCancelled {
        combatant: combatant.user_id,
    });
}

/// Sprint button pressed
#[derive(Debug, Clone, Copy)]
pub struct SprintStart;

impl AuthoritativeAction for SprintStart {
    const NAME: &'static str = "sprint_start";

    fn validate(&self, combatant: &Combatant, tuning: &CombatTuning) -> Result<(), CombatError> {
        require(combatant.has_controller(), "no controller")?;
        require(combatant.max_walk_speed < tuning.sprint_speed, "already sprinting")?;
        require(combatant.stamina > 0.0, "no stamina")
    }

    fn apply<S>(&self, combatant: &mut Combatant, tuning: &CombatTuning, scheduler: &mut S, effects: &mut Vec<CombatEffect>)
    where
        S: Scheduler<CombatTask> + ?Sized,
    {
        combatant.set_max_speed(tuning.sprint_speed);
        effects.push(CombatEffect::SpeedCapChanged {
            combatant: combatant.user_id,
            max_walk_speed: tuning.sprint_speed,
        });
        open_window(combatant, AttackKind::Charge, tuning, scheduler, effects);
    }
}

/// Sprint button released. Always valid.
#[derive(Debug, Clone, Copy)]
pub struct SprintStop;

impl AuthoritativeAction for SprintStop {
    const NAME: &'static str = "sprint_stop";

    fn validate(&self, _combatant: &Combatant, _tuning: &CombatTuning) -> Result<(), CombatError> {
        Ok(())
    }

    fn apply<S>(&self, combatant: &mut Combatant, tuning: &CombatTuning, scheduler: &mut S, effects: &mut Vec<CombatEffect>)
    where
        S: Scheduler<CombatTask> + ?Sized,
    {
        close_window(combatant, scheduler, effects);
        combatant.set_max_speed(tuning.normal_speed);
        effects.push(CombatEffect::SpeedCapChanged {
            combatant: combatant.user_id,
            max_walk_speed: tuning.normal_speed,
        });
    }
}

/// Headbutt button pressed: start charging
#[derive(Debug, Clone, Copy)]
pub struct HeadbuttCharge;

impl AuthoritativeAction for HeadbuttCharge {
    const NAME: &'static str = "headbutt_charge";

    fn validate(&self, combatant: &Combatant, _tuning: &CombatTuning) -> Result<(), CombatError> {
        require(combatant.has_controller(), "no controller")?;
        require(combatant.headbutt_phase == HeadbuttPhase::Idle, "already charging")
    }

    fn apply<S>(&self, combatant: &mut Combatant, tuning: &CombatTuning, _scheduler: &mut S, effects: &mut Vec<CombatEffect>)
    where
        S: Scheduler<CombatTask> + ?Sized,
    {
        combatant.headbutt_phase = HeadbuttPhase::Charging;
        combatant.headbutt_strength = 0.0;
        combatant
            .montages
            .play(MontageId::HeadbuttCharge, 1.0, CHARGE_SECTION, tuning.min_charge_secs);
        effects.push(CombatEffect::HeadbuttCharging {
            combatant: combatant.user_id,
        });
    }
}

/// Headbutt button released.
///
/// Release requires the charge montage to have finished, i.e. the minimum
/// charge time has elapsed since the charge began.
#[derive(Debug, Clone, Copy)]
pub struct HeadbuttRelease;

impl AuthoritativeAction for HeadbuttRelease {
    const NAME: &'static str = "headbutt_release";

    fn validate(&self, combatant: &Combatant, _tuning: &CombatTuning) -> Result<(), CombatError> {
        require(combatant.has_controller(), "no controller")?;
        require(combatant.headbutt_phase == HeadbuttPhase::Charging, "not charging")?;
        require(!combatant.headbutt_on_cooldown, "headbutt on cooldown")?;
        require(combatant.stamina > 0.0, "no stamina")?;
        require(
            !combatant.montages.is_active(MontageId::HeadbuttCharge),
            "charge too short",
        )
    }

    fn apply<S>(&self, combatant: &mut Combatant, tuning: &CombatTuning, scheduler: &mut S, effects: &mut Vec<CombatEffect>)
    where
        S: Scheduler<CombatTask> + ?Sized,
    {
        let owner = combatant.user_id;

        combatant.headbutt_on_cooldown = true;
        combatant.cooldown_timer.start_once(
            scheduler,
            ticks_for(tuning.headbutt_cooldown_secs),
            CombatTask::CooldownReady { owner },
        );

        let impulse = combatant.forward()
            * (tuning.launch_base + combatant.headbutt_strength * tuning.launch_per_strength);
        combatant.headbutt_strength = 0.0;
        combatant.headbutt_phase = HeadbuttPhase::Idle;
        combatant.montages.stop(MontageId::HeadbuttCharge);
        combatant
            .montages
            .play(MontageId::HeadbuttRelease, 1.0, RELEASE_SECTION, tuning.release_montage_secs);
        combatant.launch(impulse);

        let section = combatant
            .montages
            .section(MontageId::HeadbuttRelease)
            .unwrap_or(RELEASE_SECTION);
        effects.push(CombatEffect::HeadbuttReleased {
            combatant: owner,
            impulse,
            montage: MontageId::HeadbuttRelease,
            section: section.to_string(),
            rate: 1.0,
        });
        open_window(combatant, AttackKind::Headbutt, tuning, scheduler, effects);
    }
}

/// Headbutt button released before the release checks passed
#[derive(Debug, Clone, Copy)]
pub struct HeadbuttCancel;

impl AuthoritativeAction for HeadbuttCancel {
    const NAME: &'static str = "headbutt_cancel";

    fn validate(&self, combatant: &Combatant, _tuning: &CombatTuning) -> Result<(), CombatError> {
        require(combatant.headbutt_phase == HeadbuttPhase::Charging, "not charging")
    }

    fn apply<S>(&self, combatant: &mut Combatant, _tuning: &CombatTuning, _scheduler: &mut S, effects: &mut Vec<CombatEffect>)
    where
        S: Scheduler<CombatTask> + ?Sized,
    {
        cancel_charge(combatant, effects);
    }
}

/// What one hit-check tick observed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitCheckReport {
    pub target: Option<HitTarget>,
    /// Points the attacker gained this tick
    pub points: i32,
    /// The repeating hit-check is still scheduled
    pub window_open: bool,
}

/// Authoritative combat rules for one match
#[derive(Debug, Clone)]
pub struct CombatActionController {
    tuning: CombatTuning,
    invincible_policy: InvincibleHitPolicy,
}

impl CombatActionController {
    pub fn new(tuning: CombatTuning, invincible_policy: InvincibleHitPolicy) -> Self {
        Self {
            tuning,
            invincible_policy,
        }
    }

    pub fn tuning(&self) -> &CombatTuning {
        &self.tuning
    }

    pub fn invincible_policy(&self) -> InvincibleHitPolicy {
        self.invincible_policy
    }

    /// Validate and apply a request on the authority
    pub fn request<A, S>(
        &self,
        action: &A,
        combatant: &mut Combatant,
        scheduler: &mut S,
        effects: &mut Vec<CombatEffect>,
    ) -> Result<(), CombatError>
    where
        A: AuthoritativeAction,
        S: Scheduler<CombatTask> + ?Sized,
    {
        action.validate(combatant, &self.tuning)?;
        action.apply(combatant, &self.tuning, scheduler, effects);
        debug!(user_id = %combatant.user_id, action = A::NAME, "Action applied");
        Ok(())
    }

    /// Authoritative headbutt release.
    ///
    /// A rejected release still ends the charge so the authority never
    /// stays in Charging after the button came up.
    pub fn release_headbutt<S>(
        &self,
        combatant: &mut Combatant,
        scheduler: &mut S,
        effects: &mut Vec<CombatEffect>,
    ) -> Result<(), CombatError>
    where
        S: Scheduler<CombatTask> + ?Sized,
    {
        let result = self.request(&HeadbuttRelease, combatant, scheduler, effects);
        if result.is_err() && combatant.headbutt_phase == HeadbuttPhase::Charging {
            cancel_charge(combatant, effects);
        }
        result
    }

    /// One tick of the repeating hit-check for `attacker_id`
    #[allow(clippy::too_many_arguments)]
    pub fn run_hit_check<W, S>(
        &self,
        handle: TaskHandle,
        attacker_id: Uuid,
        attack: AttackKind,
        combatants: &mut HashMap<Uuid, Combatant>,
        props: &mut PropRegistry,
        world: &W,
        scheduler: &mut S,
        effects: &mut Vec<CombatEffect>,
    ) -> Result<HitCheckReport, CombatError>
    where
        W: WorldQuery + ?Sized,
        S: Scheduler<CombatTask> + ?Sized,
    {
        let attacker = combatants
            .get(&attacker_id)
            .ok_or(CombatError::UnknownCombatant(attacker_id))?;

        // A handle the slot no longer owns is an orphan from a replaced window
        if !attacker.sweep_timer.holds(handle) {
            scheduler.cancel(handle);
            return Ok(HitCheckReport {
                target: None,
                points: 0,
                window_open: false,
            });
        }

        let forward = attacker.forward();
        let origin = world.bone_location(attacker_id, Bone::Neck3)?;
        let head = world.bone_location(attacker_id, Bone::Head)?;
        let query = SweepQuery {
            origin,
            direction: (head - origin).try_normalize().unwrap_or(forward),
            distance: attack.sweep_distance(&self.tuning),
            radius: self.tuning.sweep_radius,
            ignore: attacker_id,
        };
        let target = world.sweep(&query)?;

        let mut points = 0;
        let mut close = false;
        match target {
            Some(HitTarget::Combatant(target_id)) => {
                match self.resolve_combatant_hit(attacker_id, target_id, forward, combatants, scheduler, effects) {
                    Ok((closes, awarded)) => {
                        close = closes;
                        points = awarded;
                    }
                    Err(e) => debug!(attacker = %attacker_id, error = %e, "Hit ignored"),
                }
            }
            Some(HitTarget::Prop(prop_id)) => match props.destroy(prop_id, Some(attacker_id), effects) {
                Ok(value) => {
                    points = value;
                    if let Some(attacker) = combatants.get_mut(&attacker_id) {
                        let score = attacker.add_score(value);
                        effects.push(CombatEffect::ScoreChanged {
                            combatant: attacker_id,
                            delta: value,
                            score,
                        });
                    }
                }
                Err(e) => debug!(attacker = %attacker_id, error = %e, "Prop hit ignored"),
            },
            Some(HitTarget::Other) | None => {}
        }

        let attacker = combatants
            .get_mut(&attacker_id)
            .ok_or(CombatError::UnknownCombatant(attacker_id))?;

        if !close
            && attack == AttackKind::Headbutt
            && !attacker.montages.is_active(MontageId::HeadbuttRelease)
            && attacker.max_walk_speed < self.tuning.sprint_speed
        {
            close = true;
        }

        if close {
            close_window(attacker, scheduler, effects);
            debug!(attacker = %attacker_id, attack = attack.label(), "Attack window closed");
        }

        Ok(HitCheckReport {
            target,
            points,
            window_open: !close,
        })
    }

    /// Apply a sweep contact against another combatant.
    ///
    /// Returns whether the attack window should close and the points the
    /// attacker gained.
    fn resolve_combatant_hit<S>(
        &self,
        attacker_id: Uuid,
        target_id: Uuid,
        direction: glam::Vec3,
        combatants: &mut HashMap<Uuid, Combatant>,
        scheduler: &mut S,
        effects: &mut Vec<CombatEffect>,
    ) -> Result<(bool, i32), CombatError>
    where
        S: Scheduler<CombatTask> + ?Sized,
    {
        let invincible = combatants
            .get(&target_id)
            .ok_or(CombatError::InvalidTarget)?
            .invincible;

        if invincible {
            debug!(attacker = %attacker_id, target = %target_id, "Target is invincible");
            return Ok((self.invincible_policy == InvincibleHitPolicy::Close, 0));
        }

        let hit_score = self.tuning.hit_score;

        let attacker = combatants
            .get_mut(&attacker_id)
            .ok_or(CombatError::UnknownCombatant(attacker_id))?;
        let score = attacker.add_score(hit_score);
        effects.push(CombatEffect::ScoreChanged {
            combatant: attacker_id,
            delta: hit_score,
            score,
        });

        let target = combatants.get_mut(&target_id).ok_or(CombatError::InvalidTarget)?;
        let score = target.add_score(-hit_score);
        effects.push(CombatEffect::ScoreChanged {
            combatant: target_id,
            delta: -hit_score,
            score,
        });

        target.stunned = true;
        target.invincible = true;
        target.launch(direction * self.tuning.stun_knockback);
        target.stun_timer.start_once(
            scheduler,
            ticks_for(self.tuning.stun_secs),
            CombatTask::StunEnd { owner: target_id },
        );
        effects.push(CombatEffect::Stunned {
            combatant: target_id,
            by: attacker_id,
            direction,
        });
        effects.push(CombatEffect::InvincibilityChanged {
            combatant: target_id,
            invincible: true,
        });

        Ok((true, hit_score))
    }

    /// Authoritative cooldown elapsed
    pub fn finish_cooldown(&self, handle: TaskHandle, combatant: &mut Combatant, effects: &mut Vec<CombatEffect>) {
        combatant.cooldown_timer.release(handle);
        if combatant.headbutt_on_cooldown {
            combatant.headbutt_on_cooldown = false;
            effects.push(CombatEffect::HeadbuttCooldownReady {
                combatant: combatant.user_id,
            });
        }
    }

    /// Stun duration elapsed; invincibility ends with it
    pub fn end_stun(&self, handle: TaskHandle, combatant: &mut Combatant, effects: &mut Vec<CombatEffect>) {
        combatant.stun_timer.release(handle);
        if combatant.stunned {
            combatant.stunned = false;
            effects.push(CombatEffect::StunEnded {
                combatant: combatant.user_id,
            });
        }
        if combatant.invincible {
            combatant.invincible = false;
            effects.push(CombatEffect::InvincibilityChanged {
                combatant: combatant.user_id,
                invincible: false,
            });
        }
    }

    /// Cancel every timer a departing combatant owns
    pub fn retire<S>(&self, combatant: &mut Combatant, scheduler: &mut S)
    where
        S: Scheduler<CombatTask> + ?Sized,
    {
        combatant.connected = false;
        combatant.attack_window = None;
        combatant.sweep_timer.clear(scheduler);
        combatant.cooldown_timer.clear(scheduler);
        combatant.stun_timer.clear(scheduler);
    }
}

impl Default for CombatActionController {
    fn default() -> Self {
        Self::new(CombatTuning::default(), InvincibleHitPolicy::default())
    }
}
