//! Match state and authoritative tick loop

use dashmap::DashMap;
use glam::{Vec2, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::util::time::{tick_delta, tick_duration, unix_millis, SIMULATION_TPS, SNAPSHOT_TPS};
use crate::ws::protocol::{ClientMsg, CombatEffect, PlayerInfo, ScoreEntry, ServerMsg};

use super::combat::{CombatTask, CombatTuning, InvincibleHitPolicy};
use super::combatant::Combatant;
use super::controller::{
    AuthoritativeAction, CombatActionController, HeadbuttCancel, HeadbuttCharge, SprintStart, SprintStop,
};
use super::pawn::{MatchPawnSelector, PawnKind};
use super::physics::{MovementStats, PhysicsSystem};
use super::prop::{ArenaLayout, PropRegistry};
use super::scheduler::{Scheduler, TickScheduler};
use super::snapshot::SnapshotBuilder;
use super::sweep::ArenaWorld;
use super::PlayerInput;

const COUNTDOWN_SECS: u32 = 5;

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// Waiting for players
    Waiting,
    /// Countdown before start
    Countdown,
    /// Round in progress
    InProgress,
    /// Match ended
    Ended,
}

/// Per-match rules taken from server configuration
#[derive(Debug, Clone)]
pub struct MatchSettings {
    pub min_players: usize,
    pub max_players: usize,
    pub round_length_secs: f32,
    pub invincible_policy: InvincibleHitPolicy,
    pub allow_spectators: bool,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            min_players: 2,
            max_players: 8,
            round_length_secs: 180.0,
            invincible_policy: InvincibleHitPolicy::default(),
            allow_spectators: true,
        }
    }
}

/// Match state (owned by match task)
pub struct MatchState {
    pub id: Uuid,
    pub seed: u64,
    pub phase: MatchPhase,
    pub tick: u64,
    pub combatants: HashMap<Uuid, Combatant>,
    /// Observers without a pawn, by display name
    pub spectators: HashMap<Uuid, String>,
    pub props: PropRegistry,
    pub layout: ArenaLayout,
    pub scheduler: TickScheduler<CombatTask>,
    pub rng: ChaCha8Rng,
    pub start_time: Option<u64>,
    pub countdown_remaining: f32,
    pub round_remaining: f32,
    pub settings: MatchSettings,
}

impl MatchState {
    pub fn new(id: Uuid, seed: u64, settings: MatchSettings) -> Self {
        let layout = ArenaLayout::default();
        Self {
            id,
            seed,
            phase: MatchPhase::Waiting,
            tick: 0,
            combatants: HashMap::new(),
            spectators: HashMap::new(),
            props: PropRegistry::from_layout(&layout),
            layout,
            scheduler: TickScheduler::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            start_time: None,
            countdown_remaining: COUNTDOWN_SECS as f32,
            round_remaining: settings.round_length_secs,
            settings,
        }
    }

    /// Spawn point on the arena ring, facing the centre
    pub fn generate_spawn_position(&mut self) -> (Vec3, f32) {
        let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
        let radius = self.layout.spawn_radius;
        let position = Vec3::new(angle.cos() * radius, angle.sin() * radius, 0.0);
        let yaw = (angle + std::f32::consts::PI).rem_euclid(std::f32::consts::TAU);
        (position, yaw)
    }

    /// Everyone in the match, pawn or not
    pub fn participant_count(&self) -> usize {
        self.combatants.len() + self.spectators.len()
    }

    pub fn player_infos(&self) -> Vec<PlayerInfo> {
        let mut players: Vec<PlayerInfo> = self
            .combatants
            .values()
            .map(|c| PlayerInfo {
                user_id: c.user_id,
                display_name: c.display_name.clone(),
                pawn: c.pawn,
            })
            .chain(self.spectators.iter().map(|(id, name)| PlayerInfo {
                user_id: *id,
                display_name: name.clone(),
                pawn: PawnKind::Spectator,
            }))
            .collect();
        players.sort_by_key(|p| p.user_id);
        players
    }

    /// Final standings, highest score first; ties go to the earlier joiner
    pub fn scoreboard(&self) -> Vec<ScoreEntry> {
        let mut ranked: Vec<&Combatant> = self.combatants.values().collect();
        ranked.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then(a.joined_at.cmp(&b.joined_at))
                .then(a.user_id.cmp(&b.user_id))
        });
        ranked
            .into_iter()
            .enumerate()
            .map(|(i, c)| ScoreEntry {
                user_id: c.user_id,
                display_name: c.display_name.clone(),
                score: c.score,
                placement: (i + 1) as u32,
            })
            .collect()
    }
}

/// Handle to a running match
#[derive(Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    pub input_tx: mpsc::Sender<PlayerInput>,
    pub snapshot_tx: broadcast::Sender<ServerMsg>,
    pub player_count: Arc<AtomicUsize>,
}

impl MatchHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }
}

/// Registry of all active matches
pub struct MatchRegistry {
    matches: DashMap<Uuid, MatchHandle>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            matches: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    pub fn insert(&self, handle: MatchHandle) {
        self.matches.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.remove(id).map(|(_, h)| h)
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_players(&self) -> usize {
        self.matches.iter().map(|m| m.value().player_count()).sum()
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative game match
pub struct GameMatch {
    state: MatchState,
    controller: CombatActionController,
    movement: MovementStats,
    pawn_selector: MatchPawnSelector,
    input_rx: mpsc::Receiver<PlayerInput>,
    snapshot_tx: broadcast::Sender<ServerMsg>,
    snapshot_builder: SnapshotBuilder,
    player_count: Arc<AtomicUsize>,
    /// Effects issued this tick, broadcast together in issue order
    pending_effects: Vec<CombatEffect>,
}

impl GameMatch {
    /// Create a new match
    pub fn new(id: Uuid, seed: u64, settings: MatchSettings) -> (Self, MatchHandle) {
        let (input_tx, input_rx) = mpsc::channel(256);
        let (snapshot_tx, _) = broadcast::channel(256);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = MatchHandle {
            id,
            input_tx,
            snapshot_tx: snapshot_tx.clone(),
            player_count: player_count.clone(),
        };

        let controller = CombatActionController::new(CombatTuning::default(), settings.invincible_policy);
        let pawn_selector = MatchPawnSelector::new(PawnKind::Cow, settings.allow_spectators);
        let snapshot_interval = SIMULATION_TPS / SNAPSHOT_TPS;

        let game_match = Self {
            state: MatchState::new(id, seed, settings),
            controller,
            movement: MovementStats::default(),
            pawn_selector,
            input_rx,
            snapshot_tx,
            snapshot_builder: SnapshotBuilder::new(snapshot_interval),
            player_count,
            pending_effects: Vec::new(),
        };

        (game_match, handle)
    }

    /// Run the authoritative tick loop
    pub async fn run(mut self) {
        info!(match_id = %self.state.id, "Match started");

        let mut tick_interval = interval(tick_duration());
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;

            // Drain input queue
            self.process_inputs();

            // Run simulation tick
            self.run_tick();

            if self.snapshot_builder.should_send() {
                let snapshot = self.snapshot_builder.build(
                    self.state.tick,
                    self.state.round_remaining,
                    &self.state.combatants,
                    &self.state.props,
                );
                let _ = self.snapshot_tx.send(snapshot);
            }

            if self.state.phase == MatchPhase::Ended {
                let duration_secs = self
                    .state
                    .start_time
                    .map(|start| unix_millis().saturating_sub(start) / 1000)
                    .unwrap_or(0);
                info!(match_id = %self.state.id, duration_secs, "Match ended");
                break;
            }

            if self.state.participant_count() == 0 && self.state.phase != MatchPhase::Waiting {
                info!(match_id = %self.state.id, "All players left, ending match");
                break;
            }
        }

        let _ = self.snapshot_tx.send(self.match_end());
    }

    fn match_end(&self) -> ServerMsg {
        let scoreboard = self.state.scoreboard();
        ServerMsg::MatchEnd {
            winner_user_id: scoreboard.first().map(|entry| entry.user_id),
            scoreboard,
        }
    }

    /// Process all pending inputs from players
    fn process_inputs(&mut self) {
        while let Ok(input) = self.input_rx.try_recv() {
            trace!(user_id = %input.user_id, queued_ms = unix_millis().saturating_sub(input.received_at), "Input");
            self.handle_msg(input);
        }
    }

    fn handle_msg(&mut self, input: PlayerInput) {
        let user_id = input.user_id;
        match input.msg {
            ClientMsg::JoinMatch { pawn, .. } => {
                let name = input
                    .display_name
                    .unwrap_or_else(|| format!("Cow_{}", &user_id.simple().to_string()[..8]));
                self.handle_join(user_id, name, pawn, input.reply_tx);
            }
            ClientMsg::Move { seq, x, y } => {
                if let Some(c) = self.state.combatants.get_mut(&user_id) {
                    if seq > c.last_input_seq {
                        c.last_input_seq = seq;
                        PhysicsSystem::apply_move(c, Vec2::new(x, y));
                    }
                }
            }
            ClientMsg::Look { x, y } => {
                if let Some(c) = self.state.combatants.get_mut(&user_id) {
                    PhysicsSystem::apply_look(c, Vec2::new(x, y), &self.movement);
                }
            }
            ClientMsg::SprintStart => self.handle_action(user_id, SprintStart),
            ClientMsg::SprintStop => self.handle_action(user_id, SprintStop),
            ClientMsg::HeadbuttCharge => self.handle_action(user_id, HeadbuttCharge),
            ClientMsg::HeadbuttCancel => self.handle_action(user_id, HeadbuttCancel),
            ClientMsg::HeadbuttRelease => self.handle_release(user_id),
            // Answered by the connection itself
            ClientMsg::Ping { .. } => {}
            ClientMsg::LeaveMatch => self.handle_leave(user_id, "left"),
        }
    }

    fn combat_allowed(&self, user_id: Uuid, action: &'static str) -> bool {
        if self.state.phase == MatchPhase::InProgress {
            return true;
        }
        debug!(user_id = %user_id, action, phase = ?self.state.phase, "Combat input outside round");
        false
    }

    fn handle_action<A: AuthoritativeAction>(&mut self, user_id: Uuid, action: A) {
        if !self.combat_allowed(user_id, A::NAME) {
            return;
        }
        let Some(combatant) = self.state.combatants.get_mut(&user_id) else {
            return;
        };
        if let Err(e) = self.controller.request(
            &action,
            combatant,
            &mut self.state.scheduler,
            &mut self.pending_effects,
        ) {
            debug!(user_id = %user_id, action = A::NAME, error = %e, "Action rejected");
        }
    }

    fn handle_release(&mut self, user_id: Uuid) {
        if !self.combat_allowed(user_id, "headbutt_release") {
            return;
        }
        let Some(combatant) = self.state.combatants.get_mut(&user_id) else {
            return;
        };
        if let Err(e) = self.controller.release_headbutt(
            combatant,
            &mut self.state.scheduler,
            &mut self.pending_effects,
        ) {
            debug!(user_id = %user_id, error = %e, "Headbutt release rejected");
        }
    }

    /// Handle player join request
    fn handle_join(
        &mut self,
        user_id: Uuid,
        display_name: String,
        requested: Option<PawnKind>,
        reply_tx: Option<broadcast::Sender<ServerMsg>>,
    ) {
        if self.state.combatants.contains_key(&user_id) || self.state.spectators.contains_key(&user_id) {
            warn!(user_id = %user_id, "Player already in match");
            return;
        }

        if self.state.participant_count() >= self.state.settings.max_players {
            warn!(match_id = %self.state.id, user_id = %user_id, "Join refused, match is full");
            if let Some(reply_tx) = reply_tx {
                let _ = reply_tx.send(ServerMsg::Error {
                    code: "match_full".to_string(),
                    message: "Match is full".to_string(),
                });
            }
            return;
        }

        let pawn = self.pawn_selector.select(requested);
        match pawn {
            PawnKind::Spectator => {
                self.state.spectators.insert(user_id, display_name.clone());
            }
            PawnKind::Cow => {
                let (position, yaw) = self.state.generate_spawn_position();
                let combatant = Combatant::new(
                    user_id,
                    display_name.clone(),
                    pawn,
                    position,
                    yaw,
                    self.controller.tuning(),
                );
                self.state.combatants.insert(user_id, combatant);
            }
        }
        self.player_count
            .store(self.state.participant_count(), Ordering::Relaxed);

        // Notify all players of the new player
        let _ = self.snapshot_tx.send(ServerMsg::PlayerJoined {
            player: PlayerInfo {
                user_id,
                display_name,
                pawn,
            },
        });

        let _ = self.snapshot_tx.send(ServerMsg::MatchJoined {
            match_id: self.state.id,
            seed: self.state.seed,
            players: self.state.player_infos(),
        });

        info!(
            match_id = %self.state.id,
            user_id = %user_id,
            pawn = ?pawn,
            player_count = self.state.participant_count(),
            "Player joined match"
        );

        // Check if we should start countdown
        if self.state.phase == MatchPhase::Waiting && self.state.combatants.len() >= self.state.settings.min_players {
            self.state.phase = MatchPhase::Countdown;
            self.state.countdown_remaining = COUNTDOWN_SECS as f32;
            let _ = self.snapshot_tx.send(ServerMsg::MatchCountdown {
                seconds_remaining: COUNTDOWN_SECS,
            });
        }
    }

    /// Handle player leave
    fn handle_leave(&mut self, user_id: Uuid, reason: &str) {
        let removed = match self.state.combatants.remove(&user_id) {
            Some(mut combatant) => {
                self.controller.retire(&mut combatant, &mut self.state.scheduler);
                true
            }
            None => self.state.spectators.remove(&user_id).is_some(),
        };
        if !removed {
            return;
        }

        self.player_count
            .store(self.state.participant_count(), Ordering::Relaxed);

        let _ = self.snapshot_tx.send(ServerMsg::PlayerLeft {
            user_id,
            reason: reason.to_string(),
        });

        info!(match_id = %self.state.id, user_id = %user_id, reason, "Player left match");

        // Not enough players left to start
        if self.state.phase == MatchPhase::Countdown && self.state.combatants.len() < self.state.settings.min_players {
            self.state.phase = MatchPhase::Waiting;
        }
    }

    /// Run a single simulation tick
    fn run_tick(&mut self) {
        self.state.tick += 1;

        match self.state.phase {
            MatchPhase::Waiting => {}
            MatchPhase::Countdown => {
                self.state.countdown_remaining -= tick_delta();
                if self.state.countdown_remaining <= 0.0 {
                    self.state.phase = MatchPhase::InProgress;
                    self.state.start_time = Some(unix_millis());
                    self.state.round_remaining = self.state.settings.round_length_secs;
                    let _ = self.snapshot_tx.send(ServerMsg::MatchStarted {
                        tick: self.state.tick,
                    });
                    info!(
                        match_id = %self.state.id,
                        invincible_policy = ?self.controller.invincible_policy(),
                        "Round started"
                    );
                }
            }
            MatchPhase::InProgress => {
                self.update_physics();
                self.run_scheduled_tasks();

                self.state.round_remaining -= tick_delta();
                if self.state.round_remaining <= 0.0 {
                    self.state.phase = MatchPhase::Ended;
                    self.snapshot_builder.force_next();
                }
            }
            MatchPhase::Ended => {}
        }

        self.flush_effects();
    }

    /// Integrate movement and stop sprints that ran out of stamina
    fn update_physics(&mut self) {
        let mut exhausted = Vec::new();
        for combatant in self.state.combatants.values_mut() {
            let outcome = PhysicsSystem::step(combatant, &self.movement, self.controller.tuning());
            if outcome.stamina_depleted {
                exhausted.push(combatant.user_id);
            }
        }

        exhausted.sort();
        for user_id in exhausted {
            debug!(user_id = %user_id, "Stamina depleted, stopping sprint");
            self.handle_action(user_id, SprintStop);
        }
    }

    /// Advance the scheduler and dispatch every task due this tick
    fn run_scheduled_tasks(&mut self) {
        self.state.scheduler.advance();

        while let Some((handle, task)) = self.state.scheduler.pop_due() {
            match task {
                CombatTask::HitCheck { owner, attack } => {
                    // Fresh capture so props removed earlier this tick are gone
                    let world = ArenaWorld::capture(
                        self.state.combatants.values(),
                        &self.state.props,
                        &self.state.layout.obstacles,
                        &self.movement,
                    );
                    match self.controller.run_hit_check(
                        handle,
                        owner,
                        attack,
                        &mut self.state.combatants,
                        &mut self.state.props,
                        &world,
                        &mut self.state.scheduler,
                        &mut self.pending_effects,
                    ) {
                        Ok(report) if report.points != 0 => {
                            debug!(
                                match_id = %self.state.id,
                                attacker = %owner,
                                target = ?report.target,
                                points = report.points,
                                "Hit scored"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(match_id = %self.state.id, attacker = %owner, error = %e, "Hit-check aborted");
                            self.state.scheduler.cancel(handle);
                        }
                    }
                }
                CombatTask::CooldownReady { owner } => {
                    if let Some(c) = self.state.combatants.get_mut(&owner) {
                        self.controller.finish_cooldown(handle, c, &mut self.pending_effects);
                    }
                }
                CombatTask::StunEnd { owner } => {
                    if let Some(c) = self.state.combatants.get_mut(&owner) {
                        self.controller.end_stun(handle, c, &mut self.pending_effects);
                    }
                }
            }
        }
    }

    fn flush_effects(&mut self) {
        if self.pending_effects.is_empty() {
            return;
        }
        let effects = std::mem::take(&mut self.pending_effects);
        let _ = self.snapshot_tx.send(ServerMsg::Effects {
            tick: self.state.tick,
            effects,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::combatant::HeadbuttPhase;
    use std::time::Duration;

    fn input(user_id: Uuid, msg: ClientMsg) -> PlayerInput {
        PlayerInput {
            user_id,
            display_name: None,
            msg,
            received_at: unix_millis(),
            reply_tx: None,
        }
    }

    fn join(m: &mut GameMatch, pawn: Option<PawnKind>) -> Uuid {
        let user_id = Uuid::new_v4();
        m.handle_msg(input(user_id, ClientMsg::JoinMatch { match_id: None, pawn }));
        user_id
    }

    fn started_match() -> (GameMatch, broadcast::Receiver<ServerMsg>, Uuid, Uuid) {
        let settings = MatchSettings {
            min_players: 2,
            ..MatchSettings::default()
        };
        let (mut m, handle) = GameMatch::new(Uuid::new_v4(), 42, settings);
        let rx = handle.snapshot_tx.subscribe();
        let a = join(&mut m, None);
        let b = join(&mut m, Some(PawnKind::Cow));
        assert_eq!(m.state.phase, MatchPhase::Countdown);
        while m.state.phase != MatchPhase::InProgress {
            m.run_tick();
        }
        (m, rx, a, b)
    }

    /// Put `attacker` just behind `target`, both facing +X
    fn line_up(m: &mut GameMatch, attacker: Uuid, target: Uuid) {
        for (id, x) in [(attacker, 0.0), (target, 150.0)] {
            let c = m.state.combatants.get_mut(&id).unwrap();
            c.position = Vec3::new(x, 450.0, 0.0);
            c.yaw = 0.0;
        }
    }

    fn drain_effects(rx: &mut broadcast::Receiver<ServerMsg>) -> Vec<CombatEffect> {
        let mut effects = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let ServerMsg::Effects { effects: batch, .. } = msg {
                effects.extend(batch);
            }
        }
        effects
    }

    #[test]
    fn spectators_get_no_combatant() {
        let (mut m, _handle) = GameMatch::new(Uuid::new_v4(), 1, MatchSettings::default());
        let watcher = join(&mut m, Some(PawnKind::Spectator));

        assert!(m.state.combatants.is_empty());
        assert!(m.state.spectators.contains_key(&watcher));
        assert_eq!(m.player_count.load(Ordering::Relaxed), 1);
        assert_eq!(m.state.phase, MatchPhase::Waiting);
    }

    #[test]
    fn combat_input_is_ignored_before_the_round() {
        let (mut m, _handle) = GameMatch::new(Uuid::new_v4(), 1, MatchSettings::default());
        let a = join(&mut m, None);

        m.handle_msg(input(a, ClientMsg::SprintStart));

        assert_eq!(m.state.combatants[&a].max_walk_speed, 200.0);
        assert!(m.state.scheduler.is_empty());
    }

    #[test]
    fn sprint_effects_are_broadcast_in_issue_order() {
        let (mut m, mut rx, a, _b) = started_match();
        drain_effects(&mut rx);

        m.handle_msg(input(a, ClientMsg::SprintStart));
        m.handle_msg(input(a, ClientMsg::SprintStop));
        m.run_tick();

        let caps: Vec<f32> = drain_effects(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                CombatEffect::SpeedCapChanged {
                    combatant,
                    max_walk_speed,
                } if combatant == a => Some(max_walk_speed),
                _ => None,
            })
            .collect();
        assert_eq!(caps, vec![600.0, 200.0]);
    }

    #[test]
    fn running_out_of_stamina_stops_the_sprint() {
        let (mut m, mut rx, a, _b) = started_match();
        m.handle_msg(input(a, ClientMsg::SprintStart));
        m.state.combatants.get_mut(&a).unwrap().stamina = 0.001;
        m.run_tick();

        let c = &m.state.combatants[&a];
        assert_eq!(c.max_walk_speed, 200.0);
        assert!(c.attack_window.is_none());
        assert!(drain_effects(&mut rx)
            .iter()
            .any(|e| matches!(e, CombatEffect::SpeedCapChanged { max_walk_speed, .. } if *max_walk_speed == 200.0)));
    }

    #[test]
    fn sprint_into_opponent_scores_and_stuns() {
        let (mut m, mut rx, a, b) = started_match();
        line_up(&mut m, a, b);

        m.handle_msg(input(a, ClientMsg::SprintStart));
        for _ in 0..3 {
            m.run_tick();
        }

        assert_eq!(m.state.combatants[&a].score, 10);
        assert_eq!(m.state.combatants[&b].score, -10);
        assert!(m.state.combatants[&b].stunned);
        assert!(drain_effects(&mut rx)
            .iter()
            .any(|e| matches!(e, CombatEffect::Stunned { combatant, by, .. } if *combatant == b && *by == a)));

        // Stun and invincibility wear off
        for _ in 0..60 {
            m.run_tick();
        }
        assert!(!m.state.combatants[&b].stunned);
        assert!(!m.state.combatants[&b].invincible);
    }

    #[test]
    fn headbutt_cycle_through_inputs() {
        let (mut m, mut rx, a, _b) = started_match();

        m.handle_msg(input(a, ClientMsg::HeadbuttCharge));
        for _ in 0..15 {
            m.run_tick();
        }
        assert!(m.state.combatants[&a].headbutt_strength > 0.0);

        m.handle_msg(input(a, ClientMsg::HeadbuttRelease));
        let c = &m.state.combatants[&a];
        assert!(c.headbutt_on_cooldown);
        assert_eq!(c.headbutt_phase, HeadbuttPhase::Idle);

        for _ in 0..60 {
            m.run_tick();
        }
        assert!(!m.state.combatants[&a].headbutt_on_cooldown);
        assert!(drain_effects(&mut rx).contains(&CombatEffect::HeadbuttCooldownReady { combatant: a }));
    }

    #[test]
    fn full_match_refuses_only_the_joiner() {
        let settings = MatchSettings {
            max_players: 1,
            ..MatchSettings::default()
        };
        let (mut m, handle) = GameMatch::new(Uuid::new_v4(), 5, settings);
        join(&mut m, None);
        let mut match_rx = handle.snapshot_tx.subscribe();
        let (reply_tx, mut reply_rx) = broadcast::channel(8);

        let late = Uuid::new_v4();
        m.handle_msg(PlayerInput {
            reply_tx: Some(reply_tx),
            ..input(late, ClientMsg::JoinMatch { match_id: None, pawn: None })
        });

        match reply_rx.try_recv() {
            Ok(ServerMsg::Error { code, .. }) => assert_eq!(code, "match_full"),
            other => panic!("unexpected reply: {:?}", other),
        }
        assert!(match_rx.try_recv().is_err());
        assert!(!m.state.combatants.contains_key(&late));
    }

    #[test]
    fn countdown_records_moves_without_integrating() {
        let (mut m, _handle) = GameMatch::new(Uuid::new_v4(), 9, MatchSettings::default());
        let a = join(&mut m, None);
        join(&mut m, None);
        assert_eq!(m.state.phase, MatchPhase::Countdown);
        let start = m.state.combatants[&a].position;

        m.handle_msg(input(a, ClientMsg::Move { seq: 1, x: 0.0, y: 1.0 }));
        for _ in 0..10 {
            m.run_tick();
        }

        assert_eq!(m.state.phase, MatchPhase::Countdown);
        assert_eq!(m.state.combatants[&a].position, start);
        assert_eq!(m.state.combatants[&a].move_input, Vec2::new(0.0, 1.0));
    }

    #[test]
    fn leaving_cancels_timers_and_ends_when_empty() {
        let (mut m, _rx, a, b) = started_match();
        m.handle_msg(input(a, ClientMsg::SprintStart));
        assert!(!m.state.scheduler.is_empty());

        m.handle_msg(input(a, ClientMsg::LeaveMatch));
        assert!(m.state.scheduler.is_empty());

        m.handle_msg(input(b, ClientMsg::LeaveMatch));
        assert_eq!(m.state.participant_count(), 0);
        assert_eq!(m.player_count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn round_timer_ends_the_match_with_a_scoreboard() {
        let settings = MatchSettings {
            min_players: 1,
            round_length_secs: 0.5,
            ..MatchSettings::default()
        };
        let (mut m, _handle) = GameMatch::new(Uuid::new_v4(), 7, settings);
        let a = join(&mut m, None);
        let b = join(&mut m, None);
        m.state.combatants.get_mut(&b).unwrap().score = 25;

        for _ in 0..300 {
            m.run_tick();
            if m.state.phase == MatchPhase::Ended {
                break;
            }
        }
        assert_eq!(m.state.phase, MatchPhase::Ended);

        match m.match_end() {
            ServerMsg::MatchEnd {
                winner_user_id,
                scoreboard,
            } => {
                assert_eq!(winner_user_id, Some(b));
                assert_eq!(scoreboard.len(), 2);
                assert_eq!(scoreboard[1].user_id, a);
                assert_eq!(scoreboard[1].placement, 2);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn match_task_answers_joins() {
        let settings = MatchSettings {
            min_players: 1,
            ..MatchSettings::default()
        };
        let (game_match, handle) = GameMatch::new(Uuid::new_v4(), 3, settings);
        let mut rx = handle.snapshot_tx.subscribe();
        tokio::spawn(game_match.run());

        let user_id = Uuid::new_v4();
        handle
            .input_tx
            .send(PlayerInput {
                user_id,
                display_name: Some("Buttercup".to_string()),
                msg: ClientMsg::JoinMatch {
                    match_id: Some(handle.id),
                    pawn: None,
                },
                received_at: unix_millis(),
                reply_tx: None,
            })
            .await
            .unwrap();

        let joined = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(ServerMsg::MatchJoined { players, .. }) = rx.recv().await {
                    return players;
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].display_name, "Buttercup");
        assert_eq!(handle.player_count(), 1);
    }
}
