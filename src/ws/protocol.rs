//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Aircraft types available in the game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AircraftKind {
    /// Balanced air-superiority jet
    Fighter,
    /// Fast climber, light airframe
    Interceptor,
    /// Ground-attack jet, heavy armor
    Striker,
    /// Slow propeller bomber, large payload
    Bomber,
}

impl Default for AircraftKind {
    fn default() -> Self {
        Self::Fighter
    }
}

/// Maps the server can host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapId {
    /// Open ocean with scattered islands
    Archipelago,
    /// Deep valleys, high terrain relief
    Canyon,
    /// Rolling hills
    Highlands,
}

impl Default for MapId {
    fn default() -> Self {
        Self::Archipelago
    }
}

/// Game modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    /// Free-for-all dogfight
    Dogfight,
    /// Objective-based scoring
    Objective,
}

impl Default for GameMode {
    fn default() -> Self {
        Self::Dogfight
    }
}

/// Difficulty affects AI and damage tuning on the client side;
/// the server carries it as session metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Rookie,
    Veteran,
    Ace,
}

impl Default for Difficulty {
    fn default() -> Self {
        Self::Veteran
    }
}

/// Session settings chosen at creation (lobby or ad hoc join)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default)]
    pub mode: GameMode,
    /// Session time limit in seconds; None = until explicitly ended
    #[serde(default)]
    pub time_limit_secs: Option<u32>,
    #[serde(default = "default_max_players")]
    pub max_players: usize,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub map: MapId,
}

fn default_max_players() -> usize {
    16
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            mode: GameMode::default(),
            time_limit_secs: Some(600),
            max_players: default_max_players(),
            difficulty: Difficulty::default(),
            map: MapId::default(),
        }
    }
}

/// Primary (gun) weapon ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryWeapon {
    Cannon,
    RotaryCannon,
}

impl Default for PrimaryWeapon {
    fn default() -> Self {
        Self::Cannon
    }
}

/// Secondary (ordnance) weapon ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryWeapon {
    HeatseekerMissile,
    RocketPod,
    BombRack,
}

impl Default for SecondaryWeapon {
    fn default() -> Self {
        Self::HeatseekerMissile
    }
}

/// Equippable abilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ability {
    /// Short burst of extra thrust
    Boost,
    /// Restores a fraction of health
    FieldRepair,
    /// Drops a decoy that breaks missile locks
    Decoy,
}

impl Default for Ability {
    fn default() -> Self {
        Self::Boost
    }
}

/// Permanent airframe upgrades
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Upgrade {
    /// 20% incoming damage reduction
    Armor,
    /// Larger fuel tank
    ExtendedTank,
    /// Faster cooldowns
    Autoloader,
}

/// Player-selected loadout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Loadout {
    #[serde(default)]
    pub primary: PrimaryWeapon,
    #[serde(default)]
    pub secondary: SecondaryWeapon,
    #[serde(default)]
    pub ability: Ability,
    #[serde(default)]
    pub upgrades: HashSet<Upgrade>,
}

/// Projectile categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectileKind {
    Bullet,
    Missile,
    Rocket,
    Bomb,
}

/// Control surface state reported with each position update
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ControlState {
    /// Throttle (0.0 - 1.0)
    #[serde(default)]
    pub throttle: f32,
    /// Pitch input (-1.0 = nose down, 1.0 = nose up)
    #[serde(default)]
    pub pitch: f32,
    /// Roll input (-1.0 = left, 1.0 = right)
    #[serde(default)]
    pub roll: f32,
    /// Yaw input (-1.0 = left, 1.0 = right)
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub flaps: bool,
    #[serde(default)]
    pub airbrake: bool,
    #[serde(default)]
    pub afterburner: bool,
}

/// Player lifecycle as visible on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Spawning,
    Active,
    Respawning,
    Spectating,
}

/// Combat/score actions a client can request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlayerAction {
    /// Fire the primary weapon along the aircraft's forward vector
    Shoot,
    /// Launch the secondary weapon, optionally locked onto a target
    FireSecondary { target_id: Option<Uuid> },
    /// Client-side hit claim; validated server-side before damage applies
    ReportHit {
        projectile_id: Uuid,
        target_id: Uuid,
    },
    /// Deploy a countermeasure
    Countermeasure,
    /// Trigger the equipped ability
    UseAbility,
}

impl PlayerAction {
    /// Short name used in rejection messages
    pub fn name(&self) -> &'static str {
        match self {
            PlayerAction::Shoot => "shoot",
            PlayerAction::FireSecondary { .. } => "fire_secondary",
            PlayerAction::ReportHit { .. } => "report_hit",
            PlayerAction::Countermeasure => "countermeasure",
            PlayerAction::UseAbility => "use_ability",
        }
    }
}

/// Why score was awarded; ordering of multipliers is kill > objective > mission > achievement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreReason {
    Kill,
    Objective,
    Mission,
    Achievement,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Request to join a session (ad hoc if no session_id)
    JoinSession {
        session_id: Option<Uuid>,
        /// Settings used only when a new session must be created
        settings: Option<SessionSettings>,
        aircraft: AircraftKind,
        #[serde(default)]
        loadout: Loadout,
    },

    /// Client-reported transform for the current tick.
    /// Server validates displacement against the flight envelope.
    UpdatePosition {
        position: Vec3,
        rotation: Quat,
        velocity: Vec3,
        #[serde(default)]
        controls: ControlState,
        /// Client clock, unix millis
        timestamp: u64,
    },

    /// Combat or item action
    Action { action: PlayerAction },

    /// Client claims mission/achievement progress; server re-validates known ids
    ReportAchievement { id: String },

    /// Request the session end now (computes final rankings)
    EndSession,

    /// Join a lobby (creates one if no id given)
    LobbyJoin {
        lobby_id: Option<Uuid>,
        #[serde(default)]
        aircraft: AircraftKind,
        #[serde(default)]
        loadout: Loadout,
    },

    /// Start the game from the current lobby
    LobbyStart,

    /// Ping for latency measurement
    Ping { t: u64 },

    /// Leave current session or lobby
    Leave,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { player_id: Uuid, server_time: u64 },

    /// Full state push for a joining/reconnecting client
    InitState {
        /// Only this client should apply the snapshot
        recipient: Uuid,
        session: SessionInfo,
        players: Vec<PlayerSnapshot>,
        projectiles: Vec<ProjectileSnapshot>,
        tick: u64,
    },

    /// Per-tick change-set; absent entities had no changes
    StateDelta {
        tick: u64,
        players: Vec<PlayerDelta>,
        projectiles: Vec<ProjectileDelta>,
        events: Vec<GameEvent>,
    },

    /// Player joined the session
    PlayerJoined { player: PlayerInfo },

    /// Player left the session
    PlayerLeft { player_id: Uuid, reason: String },

    /// Countdown before a lobby-started session goes live
    SessionCountdown { seconds_remaining: u32 },

    /// Session is live
    SessionStarted { tick: u64 },

    /// Final rankings and rewards
    SessionComplete {
        session_id: Uuid,
        duration_secs: u32,
        rankings: Vec<RankingEntry>,
    },

    /// Action refused; sent only to the originating client
    ActionRejected {
        recipient: Uuid,
        action: String,
        reason: String,
    },

    /// Non-fatal per-player notice (e.g. a reward grant that failed after
    /// retries); game state is unaffected
    Notice {
        recipient: Uuid,
        code: String,
        message: String,
    },

    /// Lobby membership confirmation
    LobbyJoined {
        lobby_id: Uuid,
        members: Vec<PlayerInfo>,
    },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong { t: u64 },
}

impl ServerMsg {
    /// Some messages are addressed to a single client; the connection
    /// writer drops them for everyone else.
    pub fn recipient(&self) -> Option<Uuid> {
        match self {
            ServerMsg::InitState { recipient, .. } => Some(*recipient),
            ServerMsg::ActionRejected { recipient, .. } => Some(*recipient),
            ServerMsg::Notice { recipient, .. } => Some(*recipient),
            _ => None,
        }
    }
}

/// Session metadata sent with the initial snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub settings: SessionSettings,
    /// World bounds, min corner
    pub bounds_min: Vec3,
    /// World bounds, max corner
    pub bounds_max: Vec3,
    pub started_at: Option<u64>,
}

/// Player identity info for join/lobby notices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub player_id: Uuid,
    pub callsign: String,
    pub aircraft: AircraftKind,
    pub loadout: Loadout,
}

/// Full player state in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub player_id: Uuid,
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub health: f32,
    pub fuel: f32,
    pub ammo: u32,
    pub missiles: u32,
    pub countermeasures: u32,
    pub lifecycle: LifecycleState,
    pub score: u32,
    pub kills: u32,
    pub deaths: u32,
}

/// Full projectile state in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectileSnapshot {
    pub id: Uuid,
    pub owner: Uuid,
    pub kind: ProjectileKind,
    pub position: Vec3,
    pub direction: Vec3,
    pub speed: f32,
}

/// Per-player delta record; only changed fields are present
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerDelta {
    pub player_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Quat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<Vec3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fuel: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ammo: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missiles: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countermeasures: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<LifecycleState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kills: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deaths: Option<u32>,
}

impl PlayerDelta {
    pub fn new(player_id: Uuid) -> Self {
        Self {
            player_id,
            ..Default::default()
        }
    }

    /// True when no field changed (empty deltas are never sent)
    pub fn is_empty(&self) -> bool {
        self.position.is_none()
            && self.rotation.is_none()
            && self.velocity.is_none()
            && self.health.is_none()
            && self.fuel.is_none()
            && self.ammo.is_none()
            && self.missiles.is_none()
            && self.countermeasures.is_none()
            && self.lifecycle.is_none()
            && self.score.is_none()
            && self.kills.is_none()
            && self.deaths.is_none()
    }
}

/// Per-projectile delta record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectileDelta {
    pub id: Uuid,
    pub position: Vec3,
    /// Present only when homing changed the heading
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Vec3>,
}

/// Final placement entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingEntry {
    pub player_id: Uuid,
    pub callsign: String,
    pub placement: u32,
    pub score: u32,
    pub kills: u32,
    pub deaths: u32,
    /// Tokens requested from the reward service for this placement
    pub reward: u32,
}

/// Game events carried inside state deltas
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GameEvent {
    /// Authoritative reposition (validator clamp or respawn placement);
    /// steady-state motion flows through deltas instead
    PlayerMoved {
        player_id: Uuid,
        position: Vec3,
        rotation: Quat,
        velocity: Vec3,
    },

    ProjectileSpawned { projectile: ProjectileSnapshot },

    ProjectileRemoved { projectile_id: Uuid, reason: String },

    PlayerHit {
        player_id: Uuid,
        attacker_id: Option<Uuid>,
        damage: f32,
        position: Vec3,
    },

    PlayerDefeated {
        player_id: Uuid,
        attacker_id: Option<Uuid>,
        cause: String,
    },

    PlayerRespawned { player_id: Uuid, position: Vec3 },

    /// Fuel exhausted, throttle forced to zero
    EngineOut { player_id: Uuid },

    ScoreAwarded {
        player_id: Uuid,
        reason: ScoreReason,
        points: u32,
        reward: u32,
    },

    AchievementUnlocked { player_id: Uuid, id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_msg_round_trips_tagged_json() {
        let raw = r#"{"type":"update_position","position":[1.0,50.0,3.0],"rotation":[0.0,0.0,0.0,1.0],"velocity":[10.0,0.0,0.0],"timestamp":123}"#;
        let msg: ClientMsg = serde_json::from_str(raw).expect("parse update_position");
        match msg {
            ClientMsg::UpdatePosition {
                position,
                timestamp,
                controls,
                ..
            } => {
                assert_eq!(position.y, 50.0);
                assert_eq!(timestamp, 123);
                // controls default when omitted
                assert_eq!(controls.throttle, 0.0);
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn empty_player_delta_serializes_id_only() {
        let delta = PlayerDelta::new(Uuid::nil());
        assert!(delta.is_empty());
        let json = serde_json::to_string(&delta).unwrap();
        assert!(!json.contains("position"), "unchanged fields must be absent: {}", json);
    }

    #[test]
    fn recipient_is_set_only_for_addressed_messages() {
        let id = Uuid::new_v4();
        let rejected = ServerMsg::ActionRejected {
            recipient: id,
            action: "shoot".into(),
            reason: "no ammo".into(),
        };
        assert_eq!(rejected.recipient(), Some(id));

        let pong = ServerMsg::Pong { t: 1 };
        assert_eq!(pong.recipient(), None);
    }
}
