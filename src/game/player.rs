//! Player state machine: lifecycle, resources, cooldowns, scoring.
//!
//! Every mutation returns typed events; the session routes them to the
//! synchronizer and the reward dispatcher. No callbacks, no listeners.

use std::collections::{HashMap, HashSet};

use glam::Vec3;
use uuid::Uuid;

use super::collision::AircraftBody;
use super::combat::DamageModel;
use super::combat::WeaponStats;
use super::flight::{AircraftProfile, FlightState};
use crate::ws::protocol::{
    Ability, AircraftKind, ControlState, LifecycleState, Loadout, PlayerInfo, PlayerSnapshot,
    ProjectileKind, ScoreReason, Upgrade,
};

pub const MAX_HEALTH: f32 = 100.0;
pub const MAX_FUEL: f32 = 100.0;

/// Seconds between death and the automatic return to Active
pub const RESPAWN_DELAY_SECS: f32 = 5.0;
/// Spawn-protection window
pub const SPAWN_INVULN_SECS: f32 = 3.0;

/// Fuel units per second at full throttle
const FUEL_DRAIN_RATE: f32 = 0.4;
const AFTERBURNER_FUEL_MULT: f32 = 3.0;
const EXTENDED_TANK_FACTOR: f32 = 0.7;

const COUNTERMEASURE_COOLDOWN: f32 = 5.0;
const ABILITY_COOLDOWN: f32 = 12.0;
const AUTOLOADER_FACTOR: f32 = 0.8;

const FIELD_REPAIR_AMOUNT: f32 = 25.0;

/// Reward rate limiting: at most this many awards per window
const SCORE_WINDOW_TICKS: u64 = 60;
const SCORE_AWARDS_PER_WINDOW: u32 = 5;

/// Internal lifecycle; Disconnected is terminal and never synchronized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Spawning,
    Active,
    Respawning,
    Spectating,
    Disconnected,
}

impl Lifecycle {
    pub fn wire(self) -> LifecycleState {
        match self {
            Lifecycle::Spawning => LifecycleState::Spawning,
            Lifecycle::Active => LifecycleState::Active,
            Lifecycle::Respawning => LifecycleState::Respawning,
            // Disconnected players are detached before any sync pass
            Lifecycle::Spectating | Lifecycle::Disconnected => LifecycleState::Spectating,
        }
    }
}

/// What damaged a player
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DamageSource {
    Terrain,
    Boundary,
    Ram { other: Uuid },
    Projectile { owner: Uuid, kind: ProjectileKind },
}

impl DamageSource {
    pub fn attacker(&self) -> Option<Uuid> {
        match self {
            DamageSource::Ram { other } => Some(*other),
            DamageSource::Projectile { owner, .. } => Some(*owner),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DamageSource::Terrain => "terrain",
            DamageSource::Boundary => "boundary",
            DamageSource::Ram { .. } => "ram",
            DamageSource::Projectile { kind, .. } => match kind {
                ProjectileKind::Bullet => "bullet",
                ProjectileKind::Missile => "missile",
                ProjectileKind::Rocket => "rocket",
                ProjectileKind::Bomb => "bomb",
            },
        }
    }
}

/// Typed outcome of a player mutation, routed by the session
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    BecameActive,
    Damaged { amount: f32, source: DamageSource },
    Died { cause: DamageSource },
    EngineOut,
    ScoreAwarded {
        reason: ScoreReason,
        points: u32,
        reward: u32,
    },
    AchievementUnlocked { id: String },
}

/// Why an action was refused; relayed only to the originating client
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("player is not active")]
    NotActive,
    #[error("weapon is cooling down")]
    Cooldown,
    #[error("out of ammunition")]
    OutOfAmmo,
    #[error("no ordnance remaining")]
    OutOfOrdnance,
    #[error("no countermeasures remaining")]
    OutOfCountermeasures,
}

/// Cooldown timers, seconds remaining. The ability map is keyed by the
/// ability id so switching loadouts mid-session cannot skip a cooldown.
#[derive(Debug, Clone, Default)]
pub struct Cooldowns {
    pub primary: f32,
    pub secondary: f32,
    pub countermeasure: f32,
    pub abilities: HashMap<Ability, f32>,
}

impl Cooldowns {
    fn tick(&mut self, dt: f32) {
        self.primary = (self.primary - dt).max(0.0);
        self.secondary = (self.secondary - dt).max(0.0);
        self.countermeasure = (self.countermeasure - dt).max(0.0);
        for remaining in self.abilities.values_mut() {
            *remaining = (*remaining - dt).max(0.0);
        }
        self.abilities.retain(|_, remaining| *remaining > 0.0);
    }

    fn ability_ready(&self, ability: Ability) -> bool {
        self.abilities.get(&ability).copied().unwrap_or(0.0) <= 0.0
    }
}

/// Base points per scoring reason; multipliers order kill > objective >
/// mission > achievement
pub fn score_points(reason: ScoreReason) -> u32 {
    match reason {
        ScoreReason::Kill => 100,
        ScoreReason::Objective => 60,
        ScoreReason::Mission => 40,
        ScoreReason::Achievement => 25,
    }
}

/// Token reward associated with a score grant
fn reward_amount(points: u32) -> u32 {
    points / 5
}

/// One player's full authoritative state
#[derive(Debug, Clone)]
pub struct PlayerAircraft {
    /// Verified account id attached by the auth layer
    pub id: Uuid,
    pub callsign: String,
    pub kind: AircraftKind,
    pub profile: AircraftProfile,
    pub flight: FlightState,
    pub controls: ControlState,
    pub lifecycle: Lifecycle,
    pub invulnerable: bool,
    /// Boost ability engaged; grants afterburner-grade thrust until the
    /// ability timer ends
    pub boosting: bool,

    pub health: f32,
    pub fuel: f32,
    pub ammo: u32,
    pub ordnance: u32,
    pub countermeasures: u32,
    pub cooldowns: Cooldowns,

    pub loadout: Loadout,
    pub score: u32,
    pub kills: u32,
    pub deaths: u32,
    pub kill_streak: u32,
    pub achievements: HashSet<String>,
    pub missions: HashSet<String>,

    /// Out-of-envelope movement corrections, for monitoring
    pub movement_violations: u32,
    /// Client clock of the last accepted position update
    pub last_update_ms: u64,

    score_window_start: u64,
    score_awards_in_window: u32,
    engine_out_reported: bool,
}

impl PlayerAircraft {
    pub fn new(
        id: Uuid,
        callsign: String,
        kind: AircraftKind,
        loadout: Loadout,
        spawn_position: Vec3,
    ) -> Self {
        let profile = AircraftProfile::for_kind(kind);
        let mut player = Self {
            id,
            callsign,
            kind,
            profile,
            flight: FlightState::at(spawn_position),
            controls: ControlState::default(),
            lifecycle: Lifecycle::Spawning,
            invulnerable: true,
            boosting: false,
            health: MAX_HEALTH,
            fuel: MAX_FUEL,
            ammo: profile.ammo_capacity,
            ordnance: profile.ordnance_capacity,
            countermeasures: profile.countermeasure_capacity,
            cooldowns: Cooldowns::default(),
            loadout,
            score: 0,
            kills: 0,
            deaths: 0,
            kill_streak: 0,
            achievements: HashSet::new(),
            missions: HashSet::new(),
            movement_violations: 0,
            last_update_ms: 0,
            score_window_start: 0,
            score_awards_in_window: 0,
            engine_out_reported: false,
        };
        player.reset_resources(spawn_position);
        player
    }

    fn reset_resources(&mut self, position: Vec3) {
        self.health = MAX_HEALTH;
        self.fuel = MAX_FUEL;
        self.ammo = self.profile.ammo_capacity;
        self.ordnance = self.profile.ordnance_capacity;
        self.countermeasures = self.profile.countermeasure_capacity;
        self.cooldowns = Cooldowns::default();
        self.flight = FlightState::at(position);
        self.controls = ControlState::default();
        self.boosting = false;
        self.engine_out_reported = false;
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0.0
    }

    /// Per-tick upkeep: Spawning promotes to Active, cooldowns count down,
    /// fuel drains with throttle.
    pub fn update(&mut self, dt: f32) -> Vec<PlayerEvent> {
        let mut events = Vec::new();

        if self.lifecycle == Lifecycle::Spawning {
            self.lifecycle = Lifecycle::Active;
            events.push(PlayerEvent::BecameActive);
        }

        self.cooldowns.tick(dt);

        if self.lifecycle == Lifecycle::Active && self.controls.throttle > 0.0 {
            let mut drain = FUEL_DRAIN_RATE * self.controls.throttle;
            if self.controls.afterburner {
                drain *= AFTERBURNER_FUEL_MULT;
            }
            if self.loadout.upgrades.contains(&Upgrade::ExtendedTank) {
                drain *= EXTENDED_TANK_FACTOR;
            }
            self.fuel = (self.fuel - drain * dt).max(0.0);
        }

        if self.fuel <= 0.0 {
            // Engine stall: no thrust until respawn
            self.controls.throttle = 0.0;
            self.controls.afterburner = false;
            if !self.engine_out_reported {
                self.engine_out_reported = true;
                events.push(PlayerEvent::EngineOut);
            }
        }

        events
    }

    /// Apply incoming damage. No-op while invulnerable or already dead.
    /// The >0 to 0 crossing produces exactly one death transition.
    pub fn apply_damage(&mut self, amount: f32, source: DamageSource) -> Vec<PlayerEvent> {
        if self.invulnerable || !self.is_alive() {
            return Vec::new();
        }
        if self.lifecycle != Lifecycle::Active {
            return Vec::new();
        }

        let reduced = DamageModel::reduce_for_loadout(amount, &self.loadout.upgrades);
        self.health = (self.health - reduced).max(0.0);

        let mut events = vec![PlayerEvent::Damaged {
            amount: reduced,
            source,
        }];

        if self.health <= 0.0 {
            self.lifecycle = Lifecycle::Respawning;
            self.deaths += 1;
            self.kill_streak = 0;
            events.push(PlayerEvent::Died { cause: source });
        }

        events
    }

    /// Fire the primary weapon: requires Active, ammo, and a cold barrel
    pub fn try_fire_primary(&mut self) -> Result<WeaponStats, ActionError> {
        self.require_active()?;
        if self.cooldowns.primary > 0.0 {
            return Err(ActionError::Cooldown);
        }
        if self.ammo == 0 {
            return Err(ActionError::OutOfAmmo);
        }

        let stats = WeaponStats::primary(self.loadout.primary);
        self.ammo -= 1;
        self.cooldowns.primary = self.cooldown_for(stats.cooldown);
        Ok(stats)
    }

    /// Launch the secondary weapon
    pub fn try_fire_secondary(&mut self) -> Result<WeaponStats, ActionError> {
        self.require_active()?;
        if self.cooldowns.secondary > 0.0 {
            return Err(ActionError::Cooldown);
        }
        if self.ordnance == 0 {
            return Err(ActionError::OutOfOrdnance);
        }

        let stats = WeaponStats::secondary(self.loadout.secondary);
        self.ordnance -= 1;
        self.cooldowns.secondary = self.cooldown_for(stats.cooldown);
        Ok(stats)
    }

    pub fn try_countermeasure(&mut self) -> Result<(), ActionError> {
        self.require_active()?;
        if self.cooldowns.countermeasure > 0.0 {
            return Err(ActionError::Cooldown);
        }
        if self.countermeasures == 0 {
            return Err(ActionError::OutOfCountermeasures);
        }

        self.countermeasures -= 1;
        self.cooldowns.countermeasure = self.cooldown_for(COUNTERMEASURE_COOLDOWN);
        Ok(())
    }

    /// Trigger the equipped ability; the session applies its effect
    pub fn try_use_ability(&mut self) -> Result<Ability, ActionError> {
        self.require_active()?;
        let ability = self.loadout.ability;
        if !self.cooldowns.ability_ready(ability) {
            return Err(ActionError::Cooldown);
        }

        self.cooldowns
            .abilities
            .insert(ability, self.cooldown_for(ABILITY_COOLDOWN));

        if ability == Ability::FieldRepair {
            self.health = (self.health + FIELD_REPAIR_AMOUNT).min(MAX_HEALTH);
        }
        Ok(ability)
    }

    fn require_active(&self) -> Result<(), ActionError> {
        if self.lifecycle == Lifecycle::Active {
            Ok(())
        } else {
            Err(ActionError::NotActive)
        }
    }

    fn cooldown_for(&self, base: f32) -> f32 {
        if self.loadout.upgrades.contains(&Upgrade::Autoloader) {
            base * AUTOLOADER_FACTOR
        } else {
            base
        }
    }

    /// Grant score for a reason. The associated token reward is
    /// rate-limited per player; score itself always accrues.
    pub fn add_score(&mut self, reason: ScoreReason, tick: u64) -> PlayerEvent {
        let points = score_points(reason);
        self.score += points;

        if tick.saturating_sub(self.score_window_start) >= SCORE_WINDOW_TICKS {
            self.score_window_start = tick;
            self.score_awards_in_window = 0;
        }

        let reward = if self.score_awards_in_window < SCORE_AWARDS_PER_WINDOW {
            self.score_awards_in_window += 1;
            reward_amount(points)
        } else {
            0
        };

        PlayerEvent::ScoreAwarded {
            reason,
            points,
            reward,
        }
    }

    /// Credit a kill: streak, base kill score, differential bonus, and any
    /// streak achievements.
    pub fn record_kill(
        &mut self,
        victim_score: u32,
        victim_streak: u32,
        tick: u64,
    ) -> Vec<PlayerEvent> {
        self.kills += 1;
        self.kill_streak += 1;

        let mut events = Vec::new();
        let bonus = DamageModel::kill_bonus(self.score, victim_score, victim_streak);
        events.push(self.add_score(ScoreReason::Kill, tick));
        self.score += bonus;

        for id in DamageModel::streak_achievements(self.kill_streak) {
            if self.achievements.insert(id.to_string()) {
                events.push(PlayerEvent::AchievementUnlocked { id: id.to_string() });
                events.push(self.add_score(ScoreReason::Achievement, tick));
            }
        }

        events
    }

    /// Record client-reported mission/achievement progress once
    pub fn record_achievement(
        &mut self,
        id: &str,
        reason: ScoreReason,
        tick: u64,
    ) -> Vec<PlayerEvent> {
        let newly = if reason == ScoreReason::Mission {
            self.missions.insert(id.to_string())
        } else {
            self.achievements.insert(id.to_string())
        };
        if !newly {
            return Vec::new();
        }
        vec![
            PlayerEvent::AchievementUnlocked { id: id.to_string() },
            self.add_score(reason, tick),
        ]
    }

    /// Timer-driven return to Active after the respawn delay
    pub fn complete_respawn(&mut self, position: Vec3) -> Vec<PlayerEvent> {
        if self.lifecycle != Lifecycle::Respawning {
            return Vec::new();
        }
        self.reset_resources(position);
        self.lifecycle = Lifecycle::Active;
        self.invulnerable = true;
        vec![PlayerEvent::BecameActive]
    }

    pub fn end_invulnerability(&mut self) {
        self.invulnerable = false;
    }

    /// Explicit mode switch, not a combat transition
    pub fn set_spectating(&mut self, spectating: bool) {
        match (spectating, self.lifecycle) {
            (true, Lifecycle::Active) => self.lifecycle = Lifecycle::Spectating,
            (false, Lifecycle::Spectating) => self.lifecycle = Lifecycle::Active,
            _ => {}
        }
    }

    pub fn disconnect(&mut self) {
        self.lifecycle = Lifecycle::Disconnected;
    }

    /// Collision view of this aircraft
    pub fn body(&self) -> AircraftBody {
        AircraftBody {
            id: self.id,
            position: self.flight.position,
            velocity: self.flight.velocity,
            half_extents: self.profile.half_extents,
            radius: self.profile.collision_radius,
        }
    }

    pub fn info(&self) -> PlayerInfo {
        PlayerInfo {
            player_id: self.id,
            callsign: self.callsign.clone(),
            aircraft: self.kind,
            loadout: self.loadout.clone(),
        }
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            player_id: self.id,
            position: self.flight.position,
            rotation: self.flight.orientation,
            velocity: self.flight.velocity,
            health: self.health,
            fuel: self.fuel,
            ammo: self.ammo,
            missiles: self.ordnance,
            countermeasures: self.countermeasures,
            lifecycle: self.lifecycle.wire(),
            score: self.score,
            kills: self.kills,
            deaths: self.deaths,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::time::tick_delta;

    fn fighter() -> PlayerAircraft {
        let mut p = PlayerAircraft::new(
            Uuid::new_v4(),
            "Maverick".into(),
            AircraftKind::Fighter,
            Loadout::default(),
            Vec3::new(0.0, 500.0, 0.0),
        );
        // Promote out of Spawning and drop spawn protection for combat tests
        p.update(tick_delta());
        p.end_invulnerability();
        p
    }

    #[test]
    fn spawning_promotes_to_active_on_first_update() {
        let mut p = PlayerAircraft::new(
            Uuid::new_v4(),
            "Rookie".into(),
            AircraftKind::Fighter,
            Loadout::default(),
            Vec3::ZERO,
        );
        assert_eq!(p.lifecycle, Lifecycle::Spawning);
        assert!(p.invulnerable);

        let events = p.update(tick_delta());
        assert_eq!(p.lifecycle, Lifecycle::Active);
        assert!(events.contains(&PlayerEvent::BecameActive));
    }

    #[test]
    fn firing_decrements_ammo_and_sets_cooldown() {
        let mut p = fighter();
        assert_eq!(p.ammo, 100);

        let stats = p.try_fire_primary().expect("first shot fires");
        assert_eq!(p.ammo, 99);
        assert!((p.cooldowns.primary - stats.cooldown).abs() < 1e-6);

        // Second shot before the cooldown elapses is rejected
        assert_eq!(p.try_fire_primary(), Err(ActionError::Cooldown));
        assert_eq!(p.ammo, 99);
    }

    #[test]
    fn cooldown_elapses_and_ammo_runs_out() {
        let mut p = fighter();
        let stats = WeaponStats::primary(p.loadout.primary);
        let ticks_per_shot = (stats.cooldown / tick_delta()).ceil() as u32 + 1;

        for _ in 0..p.profile.ammo_capacity {
            p.try_fire_primary().expect("shot within capacity");
            for _ in 0..ticks_per_shot {
                p.update(tick_delta());
            }
        }
        assert_eq!(p.ammo, 0);
        assert_eq!(p.try_fire_primary(), Err(ActionError::OutOfAmmo));
    }

    #[test]
    fn actions_rejected_outside_active() {
        let mut p = fighter();
        p.set_spectating(true);
        assert_eq!(p.try_fire_primary(), Err(ActionError::NotActive));
        assert_eq!(p.try_use_ability(), Err(ActionError::NotActive));

        p.set_spectating(false);
        assert!(p.try_fire_primary().is_ok());
    }

    #[test]
    fn health_clamps_and_death_fires_exactly_once() {
        let mut p = fighter();
        let source = DamageSource::Terrain;

        let events = p.apply_damage(250.0, source);
        assert_eq!(p.health, 0.0);
        assert_eq!(p.deaths, 1);
        assert_eq!(
            events.iter().filter(|e| matches!(e, PlayerEvent::Died { .. })).count(),
            1
        );

        // Already dead: further damage is a no-op
        let events = p.apply_damage(50.0, source);
        assert!(events.is_empty());
        assert_eq!(p.deaths, 1);
    }

    #[test]
    fn invulnerable_players_take_no_damage() {
        let mut p = fighter();
        p.invulnerable = true;
        let events = p.apply_damage(60.0, DamageSource::Boundary);
        assert!(events.is_empty());
        assert_eq!(p.health, MAX_HEALTH);
    }

    #[test]
    fn armor_upgrade_reduces_damage() {
        let mut p = fighter();
        p.loadout.upgrades.insert(Upgrade::Armor);
        p.apply_damage(50.0, DamageSource::Terrain);
        assert!((p.health - 60.0).abs() < 1e-4, "health = {}", p.health);
    }

    #[test]
    fn respawn_resets_resources_and_reenters_active() {
        let mut p = fighter();
        p.fuel = 10.0;
        p.ammo = 3;
        p.apply_damage(200.0, DamageSource::Terrain);
        assert_eq!(p.lifecycle, Lifecycle::Respawning);

        let spawn = Vec3::new(100.0, 800.0, 0.0);
        let events = p.complete_respawn(spawn);
        assert_eq!(p.lifecycle, Lifecycle::Active);
        assert_eq!(p.health, MAX_HEALTH);
        assert_eq!(p.fuel, MAX_FUEL);
        assert_eq!(p.ammo, p.profile.ammo_capacity);
        assert!(p.invulnerable);
        assert_eq!(p.flight.position, spawn);
        assert!(events.contains(&PlayerEvent::BecameActive));
    }

    #[test]
    fn respawn_is_a_noop_unless_respawning() {
        let mut p = fighter();
        let events = p.complete_respawn(Vec3::ZERO);
        assert!(events.is_empty());
        assert_eq!(p.lifecycle, Lifecycle::Active);
    }

    #[test]
    fn fuel_exhaustion_kills_throttle_and_reports_once() {
        let mut p = fighter();
        p.fuel = 0.01;
        p.controls.throttle = 1.0;
        p.controls.afterburner = true;

        let mut engine_out = 0;
        for _ in 0..10 {
            let events = p.update(tick_delta());
            engine_out += events
                .iter()
                .filter(|e| matches!(e, PlayerEvent::EngineOut))
                .count();
        }
        assert_eq!(p.fuel, 0.0);
        assert_eq!(p.controls.throttle, 0.0);
        assert!(!p.controls.afterburner);
        assert_eq!(engine_out, 1, "engine-out must fire exactly once");
    }

    #[test]
    fn score_accrues_and_rewards_rate_limit() {
        let mut p = fighter();
        let mut rewarded = 0u32;
        let mut total_points = 0u32;

        // Burst well past the per-window cap at one tick
        for _ in 0..10 {
            if let PlayerEvent::ScoreAwarded { points, reward, .. } =
                p.add_score(ScoreReason::Objective, 5)
            {
                total_points += points;
                if reward > 0 {
                    rewarded += 1;
                }
            }
        }
        assert_eq!(p.score, total_points);
        assert_eq!(rewarded, 5, "rewards must stop at the window cap");

        // A later window rewards again
        if let PlayerEvent::ScoreAwarded { reward, .. } = p.add_score(ScoreReason::Objective, 200) {
            assert!(reward > 0);
        }
    }

    #[test]
    fn kill_streak_unlocks_achievements_at_thresholds() {
        let mut p = fighter();
        let mut unlocked = Vec::new();
        for _ in 0..3 {
            for event in p.record_kill(0, 0, 1) {
                if let PlayerEvent::AchievementUnlocked { id } = event {
                    unlocked.push(id);
                }
            }
        }
        assert_eq!(p.kills, 3);
        assert_eq!(p.kill_streak, 3);
        assert_eq!(unlocked, vec!["streak_triple".to_string()]);
    }

    #[test]
    fn death_resets_kill_streak_but_not_kills() {
        let mut p = fighter();
        p.record_kill(0, 0, 1);
        p.record_kill(0, 0, 2);
        assert_eq!(p.kill_streak, 2);

        p.apply_damage(200.0, DamageSource::Terrain);
        assert_eq!(p.kill_streak, 0);
        assert_eq!(p.kills, 2);
    }

    #[test]
    fn score_and_counters_never_decrease() {
        let mut p = fighter();
        let mut last_score = 0;
        for i in 0..20 {
            p.add_score(ScoreReason::Mission, i);
            assert!(p.score >= last_score);
            last_score = p.score;
        }
    }
}
