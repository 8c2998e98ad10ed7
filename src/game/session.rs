//! Session state and the authoritative tick loop.
//!
//! One session = one isolated match. All mutation happens on the session
//! task: inputs drain from an mpsc queue, the tick pipeline runs
//! (validate -> integrate -> collide -> resolve -> sync), and outbound
//! messages fan out on a broadcast channel. Slow external calls (rewards,
//! persistence) are spawned fire-and-forget and never block a tick.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::collision::{CollisionDetector, CollisionEvent, CollisionKind};
use super::combat::DamageModel;
use super::flight::FlightIntegrator;
use super::player::{
    ActionError, DamageSource, Lifecycle, PlayerAircraft, PlayerEvent, RESPAWN_DELAY_SECS,
    SPAWN_INVULN_SECS,
};
use super::projectile::{Projectile, ProjectileSystem};
use super::scheduler::{TickScheduler, TimerKind};
use super::snapshot::SyncTracker;
use super::validation::MovementValidator;
use super::world::WorldMap;
use super::SessionInput;
use crate::rewards::RewardService;
use crate::store::records::{PilotSessionStats, SessionRecord};
use crate::store::RecordStore;
use crate::util::time::{
    secs_to_ticks, tick_delta, unix_millis, Timer, SESSION_RETENTION_SECS, SIMULATION_TPS,
    TICK_DURATION_MICROS,
};
use crate::ws::protocol::{
    AircraftKind, ClientMsg, ControlState, GameEvent, GameMode, Loadout, PlayerAction,
    RankingEntry, ScoreReason, ServerMsg, SessionInfo, SessionSettings,
};

/// Placement rewards for ranks 1..=3
pub const PLACEMENT_REWARDS: [u32; 3] = [50, 30, 15];

/// Score at which an Objective-mode session completes
const OBJECTIVE_SCORE_TARGET: u32 = 1000;

const LOBBY_COUNTDOWN_SECS: f32 = 5.0;
const BOOST_DURATION_SECS: f32 = 4.0;

/// Slack multiplier when validating client hit claims against server state
const HIT_CLAIM_SLACK: f32 = 2.0;

/// Session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Created, nobody joined yet
    Created,
    /// Lobby-started countdown before going live
    Countdown,
    InProgress,
    /// Complete; retained briefly for late result delivery
    Ending,
    /// Torn down
    Ended,
}

/// Session state (owned by the session task)
pub struct SessionState {
    pub id: Uuid,
    pub settings: SessionSettings,
    pub world: WorldMap,
    pub phase: SessionPhase,
    pub tick: u64,
    pub players: HashMap<Uuid, PlayerAircraft>,
    pub projectiles: HashMap<Uuid, Projectile>,
    pub rng: ChaCha8Rng,
    pub scheduler: TickScheduler,
    pub started_at_ms: Option<u64>,
    pub start_tick: Option<u64>,
    pub countdown_remaining: f32,
    pub ended_at_tick: Option<u64>,
}

impl SessionState {
    pub fn new(id: Uuid, settings: SessionSettings, seed: u64, from_lobby: bool) -> Self {
        let world = WorldMap::for_map(settings.map);
        Self {
            id,
            world,
            phase: if from_lobby {
                SessionPhase::Countdown
            } else {
                SessionPhase::Created
            },
            tick: 0,
            players: HashMap::new(),
            projectiles: HashMap::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            scheduler: TickScheduler::new(),
            started_at_ms: None,
            start_tick: None,
            countdown_remaining: LOBBY_COUNTDOWN_SECS,
            ended_at_tick: None,
            settings,
        }
    }

    /// Spawn placement: a random bearing at a safe altitude inside bounds
    pub fn generate_spawn_position(&mut self) -> Vec3 {
        let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
        let reach = self.world.max.x.min(self.world.max.z);
        let radius = self.rng.gen_range(0.2..0.7) * reach;
        let altitude = self.rng.gen_range(800.0..1800.0);
        Vec3::new(angle.cos() * radius, altitude, angle.sin() * radius)
    }

    pub fn session_info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id,
            settings: self.settings.clone(),
            bounds_min: self.world.min,
            bounds_max: self.world.max,
            started_at: self.started_at_ms,
        }
    }

    fn elapsed_secs(&self) -> u32 {
        self.start_tick
            .map(|start| ((self.tick - start) / SIMULATION_TPS as u64) as u32)
            .unwrap_or(0)
    }
}

/// External collaborators the session dispatches to asynchronously
#[derive(Clone)]
pub struct SessionServices {
    pub rewards: RewardService,
    pub records: RecordStore,
}

/// Handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    pub input_tx: mpsc::Sender<SessionInput>,
    pub events_tx: broadcast::Sender<ServerMsg>,
    pub player_count: Arc<AtomicUsize>,
}

impl SessionHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }
}

/// Registry of all active sessions
pub struct SessionRegistry {
    sessions: DashMap<Uuid, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<SessionHandle> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    pub fn insert(&self, handle: SessionHandle) {
        self.sessions.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<SessionHandle> {
        self.sessions.remove(id).map(|(_, h)| h)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn total_players(&self) -> usize {
        self.sessions.iter().map(|s| s.value().player_count()).sum()
    }

    /// Find a session with open slots
    pub fn find_joinable(&self, max_players: usize) -> Option<SessionHandle> {
        self.sessions
            .iter()
            .find(|entry| entry.value().player_count() < max_players)
            .map(|entry| entry.value().clone())
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative game session
pub struct GameSession {
    state: SessionState,
    sync: SyncTracker,
    input_rx: mpsc::Receiver<SessionInput>,
    events_tx: broadcast::Sender<ServerMsg>,
    player_count: Arc<AtomicUsize>,
    services: Option<SessionServices>,
    /// Wire events accumulated between input handling and the tick's delta
    pending_events: Vec<GameEvent>,
    /// Reward grants accumulated this tick, dispatched fire-and-forget
    pending_rewards: Vec<(Uuid, u32, &'static str)>,
}

impl GameSession {
    pub fn new(
        id: Uuid,
        settings: SessionSettings,
        seed: u64,
        from_lobby: bool,
        services: Option<SessionServices>,
    ) -> (Self, SessionHandle) {
        let (input_tx, input_rx) = mpsc::channel(256);
        let (events_tx, _) = broadcast::channel(256);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = SessionHandle {
            id,
            input_tx,
            events_tx: events_tx.clone(),
            player_count: player_count.clone(),
        };

        let session = Self {
            state: SessionState::new(id, settings, seed, from_lobby),
            sync: SyncTracker::new(),
            input_rx,
            events_tx,
            player_count,
            services,
            pending_events: Vec::new(),
            pending_rewards: Vec::new(),
        };

        (session, handle)
    }

    /// Run the authoritative tick loop until the session is torn down
    pub async fn run(mut self) {
        info!(session_id = %self.state.id, map = ?self.state.settings.map, "Session started");

        let tick_duration = Duration::from_micros(TICK_DURATION_MICROS);
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let budget_ms = (TICK_DURATION_MICROS / 1000).max(1);
        loop {
            tick_interval.tick().await;

            let timer = Timer::new();
            self.process_inputs();
            self.run_tick();

            let elapsed = timer.elapsed_ms();
            if elapsed > budget_ms {
                warn!(
                    session_id = %self.state.id,
                    tick = self.state.tick,
                    elapsed_ms = elapsed,
                    "Tick exceeded its budget"
                );
            }

            if self.state.phase == SessionPhase::Ended {
                info!(session_id = %self.state.id, "Session ended");
                break;
            }
        }
    }

    /// Drain the input queue. Malformed references are dropped with a log,
    /// never a crash.
    fn process_inputs(&mut self) {
        while let Ok(input) = self.input_rx.try_recv() {
            let SessionInput {
                player_id,
                callsign,
                msg,
                ..
            } = input;

            match msg {
                ClientMsg::JoinSession {
                    aircraft, loadout, ..
                } => self.handle_join(player_id, callsign, aircraft, loadout),
                ClientMsg::UpdatePosition {
                    position,
                    rotation,
                    velocity,
                    controls,
                    timestamp,
                } => self.handle_position(player_id, position, rotation, velocity, controls, timestamp),
                ClientMsg::Action { action } => self.handle_action(player_id, action),
                ClientMsg::ReportAchievement { id } => self.handle_achievement(player_id, id),
                ClientMsg::EndSession => self.begin_end("requested"),
                ClientMsg::Ping { t } => {
                    let _ = self.events_tx.send(ServerMsg::Pong { t });
                }
                ClientMsg::Leave => self.remove_player(player_id, "left"),
                ClientMsg::LobbyJoin { .. } | ClientMsg::LobbyStart => {
                    debug!(player_id = %player_id, "Lobby message reached a live session, ignoring");
                }
            }
        }
    }

    fn handle_join(
        &mut self,
        player_id: Uuid,
        callsign: String,
        aircraft: AircraftKind,
        loadout: Loadout,
    ) {
        if self.state.players.contains_key(&player_id) {
            warn!(player_id = %player_id, "Player already in session");
            return;
        }

        if self.state.players.len() >= self.state.settings.max_players {
            let _ = self.events_tx.send(ServerMsg::Error {
                code: "session_full".to_string(),
                message: "Session is full".to_string(),
            });
            return;
        }

        let spawn = self.state.generate_spawn_position();
        let player = PlayerAircraft::new(player_id, callsign, aircraft, loadout, spawn);
        let player_info = player.info();

        self.state.players.insert(player_id, player);
        self.player_count
            .store(self.state.players.len(), Ordering::Relaxed);
        self.state.scheduler.schedule(
            self.state.tick + secs_to_ticks(SPAWN_INVULN_SECS),
            player_id,
            TimerKind::InvulnerabilityEnd,
        );

        // Incremental notice to everyone, full snapshot to the joiner
        let _ = self.events_tx.send(ServerMsg::PlayerJoined {
            player: player_info,
        });
        let snapshot = self.sync.full_snapshot(
            player_id,
            self.state.session_info(),
            self.state.tick,
            &self.state.players,
            &self.state.projectiles,
        );
        let _ = self.events_tx.send(snapshot);

        info!(
            session_id = %self.state.id,
            player_id = %player_id,
            player_count = self.state.players.len(),
            "Player joined session"
        );

        // Ad hoc sessions go live on first join; lobby sessions are already
        // counting down
        if self.state.phase == SessionPhase::Created {
            self.go_live();
        }
    }

    fn go_live(&mut self) {
        self.state.phase = SessionPhase::InProgress;
        self.state.started_at_ms = Some(unix_millis());
        self.state.start_tick = Some(self.state.tick);
        let _ = self.events_tx.send(ServerMsg::SessionStarted {
            tick: self.state.tick,
        });
        info!(session_id = %self.state.id, "Session live");
    }

    /// Validate and commit a client-reported transform
    fn handle_position(
        &mut self,
        player_id: Uuid,
        position: Vec3,
        rotation: glam::Quat,
        velocity: Vec3,
        controls: ControlState,
        timestamp: u64,
    ) {
        let Some(player) = self.state.players.get_mut(&player_id) else {
            debug!(player_id = %player_id, "Position update for unknown player dropped");
            return;
        };
        if player.lifecycle != Lifecycle::Active {
            return;
        }

        let result = MovementValidator::validate(
            player.flight.position,
            position,
            velocity,
            player.last_update_ms,
            timestamp,
            player.profile.max_speed,
        );

        player.flight.position = result.position;
        player.flight.velocity = result.velocity;
        player.flight.orientation = rotation.normalize();
        player.controls = controls;
        player.last_update_ms = timestamp;

        if !result.valid {
            player.movement_violations += 1;
            warn!(
                player_id = %player_id,
                violations = player.movement_violations,
                "Out-of-envelope movement clamped"
            );
            // Clients must snap to the corrected transform
            self.pending_events.push(GameEvent::PlayerMoved {
                player_id,
                position: result.position,
                rotation,
                velocity: result.velocity,
            });
        }
    }

    fn handle_action(&mut self, player_id: Uuid, action: PlayerAction) {
        let action_name = action.name();
        let result = self.apply_action(player_id, &action);

        if let Err(reason) = result {
            let _ = self.events_tx.send(ServerMsg::ActionRejected {
                recipient: player_id,
                action: action_name.to_string(),
                reason,
            });
        }
    }

    fn apply_action(&mut self, player_id: Uuid, action: &PlayerAction) -> Result<(), String> {
        match action {
            PlayerAction::Shoot => {
                let Some(player) = self.state.players.get_mut(&player_id) else {
                    return Err("not in session".to_string());
                };
                let stats = player.try_fire_primary().map_err(reject)?;
                let forward = player.flight.forward();
                let origin = player.flight.position
                    + forward * (player.profile.collision_radius + 5.0);
                let projectile =
                    Projectile::new(player_id, origin, forward, &stats, None, self.state.tick);
                self.spawn_projectile(projectile);
                Ok(())
            }
            PlayerAction::FireSecondary { target_id } => {
                // A lock is only honored on a live, distinct target
                let target = target_id.filter(|id| {
                    *id != player_id
                        && self
                            .state
                            .players
                            .get(id)
                            .map(|t| t.lifecycle == Lifecycle::Active)
                            .unwrap_or(false)
                });

                let Some(player) = self.state.players.get_mut(&player_id) else {
                    return Err("not in session".to_string());
                };
                let stats = player.try_fire_secondary().map_err(reject)?;
                let forward = player.flight.forward();
                let origin = player.flight.position
                    + forward * (player.profile.collision_radius + 5.0);
                let projectile =
                    Projectile::new(player_id, origin, forward, &stats, target, self.state.tick);
                self.spawn_projectile(projectile);
                Ok(())
            }
            PlayerAction::ReportHit {
                projectile_id,
                target_id,
            } => self.handle_hit_claim(player_id, *projectile_id, *target_id),
            PlayerAction::Countermeasure => {
                let Some(player) = self.state.players.get_mut(&player_id) else {
                    return Err("not in session".to_string());
                };
                player.try_countermeasure().map_err(reject)?;
                self.break_missile_locks(player_id);
                Ok(())
            }
            PlayerAction::UseAbility => {
                let Some(player) = self.state.players.get_mut(&player_id) else {
                    return Err("not in session".to_string());
                };
                let ability = player.try_use_ability().map_err(reject)?;
                match ability {
                    crate::ws::protocol::Ability::Boost => {
                        player.boosting = true;
                        self.state.scheduler.schedule(
                            self.state.tick + secs_to_ticks(BOOST_DURATION_SECS),
                            player_id,
                            TimerKind::AbilityEnd,
                        );
                    }
                    crate::ws::protocol::Ability::FieldRepair => {
                        // Healing applied inside the state machine
                    }
                    crate::ws::protocol::Ability::Decoy => {
                        self.break_missile_locks(player_id);
                    }
                }
                Ok(())
            }
        }
    }

    /// Client hit claims are advisory: the named projectile must exist,
    /// belong to the claimant, and actually be near the target.
    fn handle_hit_claim(
        &mut self,
        claimant: Uuid,
        projectile_id: Uuid,
        target_id: Uuid,
    ) -> Result<(), String> {
        let Some(projectile) = self.state.projectiles.get(&projectile_id) else {
            return Err("unknown projectile".to_string());
        };
        if projectile.owner != claimant {
            return Err("not your projectile".to_string());
        }
        let Some(target) = self.state.players.get(&target_id) else {
            return Err("unknown target".to_string());
        };

        let reach =
            (projectile.radius + target.profile.collision_radius) * HIT_CLAIM_SLACK;
        let distance = projectile.position.distance(target.flight.position);
        if distance > reach {
            debug!(
                claimant = %claimant,
                projectile_id = %projectile_id,
                distance,
                reach,
                "Hit claim out of range, rejected"
            );
            return Err("unverified hit".to_string());
        }

        let event = CollisionDetector::projectile_collision(&target.body(), projectile)
            .unwrap_or(CollisionEvent {
                kind: CollisionKind::Projectile {
                    projectile: projectile.id,
                    owner: projectile.owner,
                    kind: projectile.kind,
                    damage: projectile.damage,
                },
                position: projectile.position,
                normal: Vec3::Y,
                severity: 0.8,
            });

        self.resolve_collisions(vec![(target_id, event)]);
        Ok(())
    }

    fn break_missile_locks(&mut self, protected: Uuid) {
        for projectile in self.state.projectiles.values_mut() {
            if projectile.target == Some(protected) {
                projectile.target = None;
            }
        }
    }

    fn spawn_projectile(&mut self, projectile: Projectile) {
        self.pending_events.push(GameEvent::ProjectileSpawned {
            projectile: projectile.snapshot(),
        });
        self.state.projectiles.insert(projectile.id, projectile);
    }

    fn handle_achievement(&mut self, player_id: Uuid, id: String) {
        if id.is_empty() || id.len() > 64 {
            debug!(player_id = %player_id, "Malformed achievement id dropped");
            return;
        }
        let tick = self.state.tick;
        let Some(player) = self.state.players.get_mut(&player_id) else {
            return;
        };

        let reason = if id.starts_with("mission_") {
            ScoreReason::Mission
        } else {
            ScoreReason::Achievement
        };
        let events = player.record_achievement(&id, reason, tick);
        let position = player.flight.position;
        self.absorb_player_events(player_id, position, events);
    }

    fn remove_player(&mut self, player_id: Uuid, reason: &str) {
        let Some(mut player) = self.state.players.remove(&player_id) else {
            return;
        };
        player.disconnect();

        // Pending timers must never fire for a removed entity
        self.state.scheduler.cancel_owner(player_id);
        self.sync.forget_player(player_id);
        self.player_count
            .store(self.state.players.len(), Ordering::Relaxed);

        let _ = self.events_tx.send(ServerMsg::PlayerLeft {
            player_id,
            reason: reason.to_string(),
        });

        info!(
            session_id = %self.state.id,
            player_id = %player_id,
            reason,
            "Player left session"
        );

        if self.state.players.is_empty() && self.state.phase != SessionPhase::Created {
            self.state.phase = SessionPhase::Ended;
        }
    }

    /// One simulation tick
    pub fn run_tick(&mut self) {
        self.state.tick += 1;
        let dt = tick_delta();

        match self.state.phase {
            SessionPhase::Created => {}
            SessionPhase::Countdown => {
                let before = self.state.countdown_remaining.ceil() as u32;
                self.state.countdown_remaining -= dt;
                let after = self.state.countdown_remaining.max(0.0).ceil() as u32;
                if after != before {
                    let _ = self.events_tx.send(ServerMsg::SessionCountdown {
                        seconds_remaining: after,
                    });
                }
                if self.state.countdown_remaining <= 0.0 {
                    self.go_live();
                }
            }
            SessionPhase::InProgress => {
                self.simulate(dt);
            }
            SessionPhase::Ending => {
                let retention = secs_to_ticks(SESSION_RETENTION_SECS as f32);
                if let Some(ended_at) = self.state.ended_at_tick {
                    if self.state.tick.saturating_sub(ended_at) >= retention {
                        self.state.phase = SessionPhase::Ended;
                    }
                }
            }
            SessionPhase::Ended => {}
        }
    }

    /// The physics/collision pass. No suspension points anywhere inside.
    fn simulate(&mut self, dt: f32) {
        // 1. Projectiles move first so collision tests see this tick's
        // positions
        let targets: HashMap<Uuid, Vec3> = self
            .state
            .players
            .values()
            .filter(|p| p.lifecycle == Lifecycle::Active)
            .map(|p| (p.id, p.flight.position))
            .collect();
        let report = ProjectileSystem::advance(
            &mut self.state.projectiles,
            &targets,
            &self.state.world,
            dt,
        );
        for (id, reason) in &report.removed {
            self.pending_events.push(GameEvent::ProjectileRemoved {
                projectile_id: *id,
                reason: (*reason).to_string(),
            });
        }

        // 2. Per-player upkeep (lifecycle promotion, cooldowns, fuel)
        let mut upkeep = Vec::new();
        for player in self.state.players.values_mut() {
            let events = player.update(dt);
            if !events.is_empty() {
                upkeep.push((player.id, player.flight.position, events));
            }
        }
        for (id, position, events) in upkeep {
            self.absorb_player_events(id, position, events);
        }

        // 3. Flight integration for active aircraft
        {
            let SessionState {
                players, rng, ..
            } = &mut self.state;
            for player in players.values_mut() {
                if player.lifecycle != Lifecycle::Active {
                    continue;
                }
                let mut controls = player.controls;
                if player.boosting {
                    controls.afterburner = true;
                }
                FlightIntegrator::step(&player.profile, &mut player.flight, &controls, rng, dt);
            }
        }

        // 4. Collision detection, then resolution
        let collisions = self.detect_collisions();
        self.resolve_collisions(collisions);

        // 5. Session-clock timers
        for timer in self.state.scheduler.fire_due(self.state.tick) {
            self.fire_timer(timer.owner, timer.kind);
        }

        // 6. End conditions
        if let Some(limit) = self.state.settings.time_limit_secs {
            if self.state.elapsed_secs() >= limit {
                self.begin_end("time_limit");
            }
        }
        if self.state.settings.mode == GameMode::Objective
            && self
                .state
                .players
                .values()
                .any(|p| p.score >= OBJECTIVE_SCORE_TARGET)
        {
            self.begin_end("objective_complete");
        }

        // 7. Synchronize: pack only what changed
        let events = std::mem::take(&mut self.pending_events);
        if let Some(delta) = self.sync.delta(
            self.state.tick,
            &self.state.players,
            &self.state.projectiles,
            &report.steered,
            events,
        ) {
            let _ = self.events_tx.send(delta);
        }

        self.flush_rewards();
    }

    /// Pairwise and environmental collision checks for every active
    /// aircraft. O(players^2) per tick; fine for capped rosters, a known
    /// scalability limit beyond that.
    fn detect_collisions(&self) -> Vec<(Uuid, CollisionEvent)> {
        let bodies: Vec<_> = self
            .state
            .players
            .values()
            .filter(|p| p.lifecycle == Lifecycle::Active)
            .map(|p| p.body())
            .collect();
        let projectiles: Vec<&Projectile> = self.state.projectiles.values().collect();

        let mut all = Vec::new();
        for body in &bodies {
            for event in
                CollisionDetector::detect(body, &self.state.world, &bodies, &projectiles)
            {
                all.push((body.id, event));
            }
        }
        all
    }

    /// Map collisions to damage, deaths and kill credit. Each event is
    /// resolved independently; ordering carries no meaning.
    fn resolve_collisions(&mut self, collisions: Vec<(Uuid, CollisionEvent)>) {
        struct PendingKill {
            attacker: Uuid,
            victim_score: u32,
            victim_streak: u32,
        }

        let mut consumed_projectiles: HashSet<Uuid> = HashSet::new();
        let mut kills: Vec<PendingKill> = Vec::new();

        for (victim_id, event) in collisions {
            // A projectile hits once, then it is gone
            if let CollisionKind::Projectile { projectile, .. } = &event.kind {
                if !consumed_projectiles.insert(*projectile) {
                    continue;
                }
                self.state.projectiles.remove(projectile);
                self.pending_events.push(GameEvent::ProjectileRemoved {
                    projectile_id: *projectile,
                    reason: "hit".to_string(),
                });
            }

            let source = match &event.kind {
                CollisionKind::Terrain => DamageSource::Terrain,
                CollisionKind::Boundary => DamageSource::Boundary,
                CollisionKind::Player { other, .. } => DamageSource::Ram { other: *other },
                CollisionKind::Projectile { owner, kind, .. } => DamageSource::Projectile {
                    owner: *owner,
                    kind: *kind,
                },
            };
            let damage = DamageModel::collision_damage(&event);

            let Some(victim) = self.state.players.get_mut(&victim_id) else {
                continue;
            };
            let victim_score = victim.score;
            let victim_streak = victim.kill_streak;
            let events = victim.apply_damage(damage, source);
            let position = victim.flight.position;

            let died = events
                .iter()
                .any(|e| matches!(e, PlayerEvent::Died { .. }));
            self.absorb_player_events(victim_id, position, events);

            if died {
                if let Some(attacker) = source.attacker() {
                    kills.push(PendingKill {
                        attacker,
                        victim_score,
                        victim_streak,
                    });
                }
            }
        }

        let tick = self.state.tick;
        for kill in kills {
            let Some(attacker) = self.state.players.get_mut(&kill.attacker) else {
                continue;
            };
            let events = attacker.record_kill(kill.victim_score, kill.victim_streak, tick);
            let position = attacker.flight.position;
            self.absorb_player_events(kill.attacker, position, events);
        }
    }

    fn fire_timer(&mut self, owner: Uuid, kind: TimerKind) {
        match kind {
            TimerKind::Respawn => {
                let spawn = self.state.generate_spawn_position();
                let Some(player) = self.state.players.get_mut(&owner) else {
                    return;
                };
                let events = player.complete_respawn(spawn);
                if events.is_empty() {
                    return;
                }
                let rotation = player.flight.orientation;
                self.pending_events.push(GameEvent::PlayerRespawned {
                    player_id: owner,
                    position: spawn,
                });
                self.pending_events.push(GameEvent::PlayerMoved {
                    player_id: owner,
                    position: spawn,
                    rotation,
                    velocity: Vec3::ZERO,
                });
                self.state.scheduler.schedule(
                    self.state.tick + secs_to_ticks(SPAWN_INVULN_SECS),
                    owner,
                    TimerKind::InvulnerabilityEnd,
                );
            }
            TimerKind::InvulnerabilityEnd => {
                if let Some(player) = self.state.players.get_mut(&owner) {
                    player.end_invulnerability();
                }
            }
            TimerKind::AbilityEnd => {
                if let Some(player) = self.state.players.get_mut(&owner) {
                    player.boosting = false;
                }
            }
        }
    }

    /// Route typed player events to the wire and the reward dispatcher
    fn absorb_player_events(&mut self, player_id: Uuid, position: Vec3, events: Vec<PlayerEvent>) {
        for event in events {
            match event {
                PlayerEvent::BecameActive => {}
                PlayerEvent::Damaged { amount, source } => {
                    self.pending_events.push(GameEvent::PlayerHit {
                        player_id,
                        attacker_id: source.attacker(),
                        damage: amount,
                        position,
                    });
                }
                PlayerEvent::Died { cause } => {
                    self.pending_events.push(GameEvent::PlayerDefeated {
                        player_id,
                        attacker_id: cause.attacker(),
                        cause: cause.label().to_string(),
                    });
                    self.state.scheduler.schedule(
                        self.state.tick + secs_to_ticks(RESPAWN_DELAY_SECS),
                        player_id,
                        TimerKind::Respawn,
                    );
                }
                PlayerEvent::EngineOut => {
                    self.pending_events.push(GameEvent::EngineOut { player_id });
                }
                PlayerEvent::ScoreAwarded {
                    reason,
                    points,
                    reward,
                } => {
                    self.pending_events.push(GameEvent::ScoreAwarded {
                        player_id,
                        reason,
                        points,
                        reward,
                    });
                    if reward > 0 {
                        self.pending_rewards
                            .push((player_id, reward, reason_label(reason)));
                    }
                }
                PlayerEvent::AchievementUnlocked { id } => {
                    self.pending_events
                        .push(GameEvent::AchievementUnlocked { player_id, id });
                }
            }
        }
    }

    /// Dispatch accumulated reward grants off the tick path. A grant that
    /// fails all retries produces a non-fatal notice; score and kills
    /// already applied are never rolled back.
    fn flush_rewards(&mut self) {
        let grants = std::mem::take(&mut self.pending_rewards);
        let Some(services) = &self.services else {
            return;
        };
        for (account, amount, reason) in grants {
            let rewards = services.rewards.clone();
            let notify = self.events_tx.clone();
            tokio::spawn(async move {
                if rewards.award_with_retry(account, amount, reason).await.is_none() {
                    let _ = notify.send(ServerMsg::Notice {
                        recipient: account,
                        code: "reward_failed".to_string(),
                        message: format!("Reward of {} tokens could not be delivered", amount),
                    });
                }
            });
        }
    }

    /// Final rankings by score (kills, then fewest deaths break ties)
    pub fn final_rankings(&self) -> Vec<RankingEntry> {
        let mut ranked: Vec<&PlayerAircraft> = self.state.players.values().collect();
        ranked.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then(b.kills.cmp(&a.kills))
                .then(a.deaths.cmp(&b.deaths))
        });

        ranked
            .into_iter()
            .enumerate()
            .map(|(i, p)| RankingEntry {
                player_id: p.id,
                callsign: p.callsign.clone(),
                placement: (i + 1) as u32,
                score: p.score,
                kills: p.kills,
                deaths: p.deaths,
                reward: PLACEMENT_REWARDS.get(i).copied().unwrap_or(0),
            })
            .collect()
    }

    /// End the session: rankings out, placement rewards and the session
    /// record dispatched asynchronously, then a retention window before
    /// teardown.
    fn begin_end(&mut self, reason: &str) {
        if !matches!(
            self.state.phase,
            SessionPhase::InProgress | SessionPhase::Countdown
        ) {
            return;
        }

        let rankings = self.final_rankings();
        let duration_secs = self.state.elapsed_secs();

        let _ = self.events_tx.send(ServerMsg::SessionComplete {
            session_id: self.state.id,
            duration_secs,
            rankings: rankings.clone(),
        });

        if let Some(services) = &self.services {
            // Placement rewards, one request per ranked player
            for entry in rankings.iter().filter(|r| r.reward > 0) {
                let rewards = services.rewards.clone();
                let notify = self.events_tx.clone();
                let (account, amount) = (entry.player_id, entry.reward);
                tokio::spawn(async move {
                    if rewards
                        .award_with_retry(account, amount, "session_placement")
                        .await
                        .is_none()
                    {
                        let _ = notify.send(ServerMsg::Notice {
                            recipient: account,
                            code: "reward_failed".to_string(),
                            message: format!(
                                "Placement reward of {} tokens could not be delivered",
                                amount
                            ),
                        });
                    }
                });
            }

            let record = SessionRecord {
                id: self.state.id,
                mode: format!("{:?}", self.state.settings.mode).to_lowercase(),
                map: format!("{:?}", self.state.settings.map).to_lowercase(),
                started_at: self
                    .state
                    .started_at_ms
                    .and_then(|ms| chrono::DateTime::from_timestamp_millis(ms as i64))
                    .unwrap_or_else(chrono::Utc::now),
                duration_secs,
                player_count: self.state.players.len() as u32,
            };
            let stats: Vec<PilotSessionStats> = rankings
                .iter()
                .map(|r| PilotSessionStats {
                    session_id: self.state.id,
                    player_id: r.player_id,
                    score: r.score,
                    kills: r.kills,
                    deaths: r.deaths,
                    placement: r.placement,
                    movement_violations: self
                        .state
                        .players
                        .get(&r.player_id)
                        .map(|p| p.movement_violations)
                        .unwrap_or(0),
                })
                .collect();
            let records = services.records.clone();
            tokio::spawn(async move {
                records.persist_session_outcome(record, stats).await;
            });
        }

        self.state.phase = SessionPhase::Ending;
        self.state.ended_at_tick = Some(self.state.tick);

        info!(
            session_id = %self.state.id,
            reason,
            duration_secs,
            "Session complete"
        );
    }

    #[cfg(test)]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    #[cfg(test)]
    pub fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }
}

fn reject(e: ActionError) -> String {
    e.to_string()
}

fn reason_label(reason: ScoreReason) -> &'static str {
    match reason {
        ScoreReason::Kill => "kill",
        ScoreReason::Objective => "objective",
        ScoreReason::Mission => "mission",
        ScoreReason::Achievement => "achievement",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::LifecycleState;

    fn new_session() -> (GameSession, SessionHandle) {
        GameSession::new(
            Uuid::new_v4(),
            SessionSettings::default(),
            42,
            false,
            None,
        )
    }

    fn join(session: &mut GameSession, callsign: &str) -> Uuid {
        let id = Uuid::new_v4();
        session.handle_join(
            id,
            callsign.to_string(),
            AircraftKind::Fighter,
            Loadout::default(),
        );
        id
    }

    /// Drain broadcast into a vec for assertions
    fn drain(rx: &mut broadcast::Receiver<ServerMsg>) -> Vec<ServerMsg> {
        let mut msgs = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            msgs.push(msg);
        }
        msgs
    }

    fn tick_events(msgs: &[ServerMsg]) -> Vec<GameEvent> {
        msgs.iter()
            .filter_map(|m| match m {
                ServerMsg::StateDelta { events, .. } => Some(events.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn ad_hoc_join_starts_session_and_pushes_full_state() {
        let (mut session, handle) = new_session();
        let mut rx = handle.events_tx.subscribe();

        let id = join(&mut session, "Viper");

        assert_eq!(session.state().phase, SessionPhase::InProgress);
        assert_eq!(handle.player_count(), 1);

        let msgs = drain(&mut rx);
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMsg::PlayerJoined { .. })));
        let init = msgs
            .iter()
            .find_map(|m| match m {
                ServerMsg::InitState {
                    recipient, players, ..
                } => Some((*recipient, players.len())),
                _ => None,
            })
            .expect("joiner receives a full snapshot");
        assert_eq!(init, (id, 1));
    }

    #[test]
    fn below_ground_aircraft_takes_full_terrain_damage() {
        let (mut session, handle) = new_session();
        let mut rx = handle.events_tx.subscribe();
        let id = join(&mut session, "Dirt");

        // Activate, drop spawn protection, and put the aircraft underground
        session.run_tick();
        {
            let player = session.state_mut().players.get_mut(&id).unwrap();
            player.end_invulnerability();
            player.flight.position = Vec3::new(0.0, -5.0, 0.0);
            player.flight.velocity = Vec3::ZERO;
        }
        drain(&mut rx);

        session.run_tick();

        let player = &session.state().players[&id];
        assert!(
            (player.health - 75.0).abs() < 1.0,
            "terrain crash at severity 1.0 deals 25: health = {}",
            player.health
        );

        let events = tick_events(&drain(&mut rx));
        assert!(events.iter().any(|e| matches!(
            e,
            GameEvent::PlayerHit { player_id, .. } if *player_id == id
        )));
    }

    #[test]
    fn respawn_returns_to_active_after_exact_delay() {
        let (mut session, _handle) = new_session();
        let id = join(&mut session, "Phoenix");

        session.run_tick();
        {
            let player = session.state_mut().players.get_mut(&id).unwrap();
            player.end_invulnerability();
        }

        // Kill via direct damage resolution
        let death_tick = session.state().tick;
        {
            let player = session.state_mut().players.get_mut(&id).unwrap();
            player.apply_damage(200.0, DamageSource::Terrain);
            assert_eq!(player.lifecycle, Lifecycle::Respawning);
        }
        session
            .state_mut()
            .scheduler
            .schedule(death_tick + secs_to_ticks(RESPAWN_DELAY_SECS), id, TimerKind::Respawn);

        let respawn_ticks = secs_to_ticks(RESPAWN_DELAY_SECS);
        for i in 1..=respawn_ticks {
            // Keep the aircraft safely airborne while waiting
            session.run_tick();
            let player = &session.state().players[&id];
            if i < respawn_ticks {
                assert_eq!(
                    player.lifecycle,
                    Lifecycle::Respawning,
                    "respawned early at tick offset {}",
                    i
                );
            }
        }

        let player = &session.state().players[&id];
        assert_eq!(player.lifecycle, Lifecycle::Active);
        assert_eq!(player.health, crate::game::player::MAX_HEALTH);
        assert_eq!(player.fuel, crate::game::player::MAX_FUEL);
        assert!(player.invulnerable, "fresh spawn carries protection");
    }

    #[test]
    fn shoot_spawns_projectile_and_repeat_is_rejected() {
        let (mut session, handle) = new_session();
        let mut rx = handle.events_tx.subscribe();
        let id = join(&mut session, "Gunner");
        session.run_tick();
        {
            let player = session.state_mut().players.get_mut(&id).unwrap();
            player.flight.position = Vec3::new(0.0, 1500.0, 0.0);
        }
        drain(&mut rx);

        session.handle_action(id, PlayerAction::Shoot);
        assert_eq!(session.state().players[&id].ammo, 99);
        assert_eq!(session.state().projectiles.len(), 1);

        // Cooldown still hot: rejected, addressed to the shooter only
        session.handle_action(id, PlayerAction::Shoot);
        assert_eq!(session.state().players[&id].ammo, 99);

        let msgs = drain(&mut rx);
        let rejection = msgs
            .iter()
            .find_map(|m| match m {
                ServerMsg::ActionRejected {
                    recipient, action, ..
                } => Some((*recipient, action.clone())),
                _ => None,
            })
            .expect("second shot must be rejected");
        assert_eq!(rejection, (id, "shoot".to_string()));
    }

    #[test]
    fn rankings_award_placement_rewards_once_each() {
        let (mut session, _handle) = new_session();
        let a = join(&mut session, "First");
        let b = join(&mut session, "Second");
        let c = join(&mut session, "Third");
        let d = join(&mut session, "Fourth");

        session.state_mut().players.get_mut(&a).unwrap().score = 900;
        session.state_mut().players.get_mut(&b).unwrap().score = 500;
        session.state_mut().players.get_mut(&c).unwrap().score = 200;
        session.state_mut().players.get_mut(&d).unwrap().score = 50;

        let rankings = session.final_rankings();
        assert_eq!(rankings.len(), 4);
        assert_eq!(rankings[0].player_id, a);
        assert_eq!(
            rankings.iter().map(|r| r.reward).collect::<Vec<_>>(),
            vec![50, 30, 15, 0]
        );
        assert_eq!(
            rankings.iter().map(|r| r.placement).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
    }

    #[test]
    fn end_session_broadcasts_complete_and_retains() {
        let (mut session, handle) = new_session();
        let mut rx = handle.events_tx.subscribe();
        join(&mut session, "Solo");
        drain(&mut rx);

        session.begin_end("requested");
        assert_eq!(session.state().phase, SessionPhase::Ending);

        let msgs = drain(&mut rx);
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMsg::SessionComplete { .. })));

        // A second end request is a no-op
        session.begin_end("requested");
        let msgs = drain(&mut rx);
        assert!(msgs.is_empty());
    }

    #[test]
    fn leaving_last_player_ends_the_session() {
        let (mut session, _handle) = new_session();
        let id = join(&mut session, "Quitter");
        session.run_tick();

        session.remove_player(id, "left");
        assert_eq!(session.state().phase, SessionPhase::Ended);
        assert_eq!(session.state().scheduler.pending(), 0);
    }

    #[test]
    fn disconnect_cancels_pending_timers() {
        let (mut session, _handle) = new_session();
        let id = join(&mut session, "Ghost");
        let other = join(&mut session, "Stays");

        // Join scheduled spawn-protection timers for both
        assert!(session
            .state()
            .scheduler
            .is_scheduled(id, TimerKind::InvulnerabilityEnd));

        session.remove_player(id, "disconnected");
        assert!(!session
            .state()
            .scheduler
            .is_scheduled(id, TimerKind::InvulnerabilityEnd));
        assert!(session
            .state()
            .scheduler
            .is_scheduled(other, TimerKind::InvulnerabilityEnd));
    }

    #[test]
    fn overlapping_aircraft_report_symmetric_player_collisions() {
        let (mut session, _handle) = new_session();
        let a = join(&mut session, "Lead");
        let b = join(&mut session, "Wing");
        session.run_tick();

        {
            let state = session.state_mut();
            let pa = state.players.get_mut(&a).unwrap();
            pa.flight.position = Vec3::new(0.0, 1000.0, 0.0);
            pa.flight.velocity = Vec3::ZERO;
            let pb = state.players.get_mut(&b).unwrap();
            pb.flight.position = Vec3::new(4.0, 1000.0, 0.0);
            pb.flight.velocity = Vec3::ZERO;
        }

        let collisions = session.detect_collisions();
        let players_hit: Vec<Uuid> = collisions
            .iter()
            .filter(|(_, e)| matches!(e.kind, CollisionKind::Player { .. }))
            .map(|(id, _)| *id)
            .collect();

        assert!(players_hit.contains(&a), "A must see the collision");
        assert!(players_hit.contains(&b), "B must see the collision");

        // Zero relative speed: severity zero, still typed player
        for (_, event) in collisions
            .iter()
            .filter(|(_, e)| matches!(e.kind, CollisionKind::Player { .. }))
        {
            assert_eq!(event.severity, 0.0);
        }
    }

    #[test]
    fn projectile_hits_victim_and_credits_the_kill() {
        let (mut session, handle) = new_session();
        let mut rx = handle.events_tx.subscribe();
        let shooter = join(&mut session, "Hunter");
        let victim = join(&mut session, "Prey");
        session.run_tick();

        {
            let state = session.state_mut();
            for id in [shooter, victim] {
                let p = state.players.get_mut(&id).unwrap();
                p.end_invulnerability();
                p.flight.velocity = Vec3::ZERO;
            }
            let p = state.players.get_mut(&victim).unwrap();
            p.flight.position = Vec3::new(0.0, 1000.0, 100.0);
            p.health = 10.0;
            let s = state.players.get_mut(&shooter).unwrap();
            s.flight.position = Vec3::new(0.0, 1000.0, 0.0);
        }
        drain(&mut rx);

        // Fire straight at the victim, then advance until the round lands
        session.handle_action(shooter, PlayerAction::Shoot);
        for _ in 0..10 {
            session.run_tick();
            if session.state().projectiles.is_empty() {
                break;
            }
        }

        let victim_state = &session.state().players[&victim];
        assert_eq!(victim_state.lifecycle, Lifecycle::Respawning);
        assert_eq!(victim_state.deaths, 1);

        let shooter_state = &session.state().players[&shooter];
        assert_eq!(shooter_state.kills, 1);
        assert!(shooter_state.score >= 100, "kill score applied");

        let events = tick_events(&drain(&mut rx));
        assert!(events.iter().any(|e| matches!(
            e,
            GameEvent::PlayerDefeated { player_id, attacker_id, .. }
                if *player_id == victim && *attacker_id == Some(shooter)
        )));
    }

    #[test]
    fn idle_session_emits_no_deltas() {
        let (mut session, handle) = new_session();
        let mut rx = handle.events_tx.subscribe();
        let id = join(&mut session, "Idle");

        // Park the aircraft in a stable spot with no controls and let the
        // first ticks (activation, settling) pass
        session.run_tick();
        {
            let player = session.state_mut().players.get_mut(&id).unwrap();
            player.lifecycle = Lifecycle::Spectating;
            player.flight.velocity = Vec3::ZERO;
        }
        session.run_tick();
        drain(&mut rx);

        // Spectating, motionless: nothing changes, nothing is sent
        session.run_tick();
        session.run_tick();
        let msgs = drain(&mut rx);
        let deltas: Vec<_> = msgs
            .iter()
            .filter(|m| matches!(m, ServerMsg::StateDelta { .. }))
            .collect();
        assert!(deltas.is_empty(), "idle entities must not sync: {:?}", deltas);
    }

    #[test]
    fn hit_claims_far_from_the_target_are_rejected() {
        let (mut session, _handle) = new_session();
        let shooter = join(&mut session, "Claimer");
        let victim = join(&mut session, "Distant");
        session.run_tick();

        {
            let state = session.state_mut();
            state.players.get_mut(&shooter).unwrap().flight.position =
                Vec3::new(0.0, 1000.0, 0.0);
            let v = state.players.get_mut(&victim).unwrap();
            v.end_invulnerability();
            v.flight.position = Vec3::new(0.0, 1000.0, 4000.0);
        }

        session.handle_action(shooter, PlayerAction::Shoot);
        let projectile_id = *session.state().projectiles.keys().next().unwrap();

        let result = session.handle_hit_claim(shooter, projectile_id, victim);
        assert!(result.is_err(), "distant hit claim must not apply damage");
        assert_eq!(
            session.state().players[&victim].health,
            crate::game::player::MAX_HEALTH
        );
    }

    #[test]
    fn lobby_sessions_count_down_before_going_live() {
        let (mut session, handle) = GameSession::new(
            Uuid::new_v4(),
            SessionSettings::default(),
            7,
            true,
            None,
        );
        let mut rx = handle.events_tx.subscribe();
        join(&mut session, "Early");
        assert_eq!(session.state().phase, SessionPhase::Countdown);

        for _ in 0..secs_to_ticks(LOBBY_COUNTDOWN_SECS) + 1 {
            session.run_tick();
        }
        assert_eq!(session.state().phase, SessionPhase::InProgress);

        let msgs = drain(&mut rx);
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMsg::SessionCountdown { .. })));
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMsg::SessionStarted { .. })));
    }

    #[test]
    fn snapshot_marks_lifecycle_on_the_wire() {
        let (mut session, _handle) = new_session();
        let id = join(&mut session, "Wire");
        let snap = session.state().players[&id].snapshot();
        assert_eq!(snap.lifecycle, LifecycleState::Spawning);
    }
}
