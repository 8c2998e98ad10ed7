//! State synchronization: full snapshots on join, per-tick change-sets
//! afterwards. Each entity is compared against the last emitted state and
//! only changed fields are packed into its delta record.

use std::collections::HashMap;

use glam::{Quat, Vec3};
use uuid::Uuid;

use super::player::PlayerAircraft;
use super::projectile::Projectile;
use crate::ws::protocol::{
    GameEvent, LifecycleState, PlayerDelta, PlayerSnapshot, ProjectileDelta, ServerMsg,
    SessionInfo,
};

/// Positional change below this distance does not produce a delta field
const POSITION_EPSILON: f32 = 1e-3;
const ROTATION_EPSILON: f32 = 1e-4;
const SCALAR_EPSILON: f32 = 1e-3;

/// Last emitted field values for one player
#[derive(Debug, Clone)]
struct PlayerBaseline {
    position: Vec3,
    rotation: Quat,
    velocity: Vec3,
    health: f32,
    fuel: f32,
    ammo: u32,
    missiles: u32,
    countermeasures: u32,
    lifecycle: LifecycleState,
    score: u32,
    kills: u32,
    deaths: u32,
}

impl From<&PlayerSnapshot> for PlayerBaseline {
    fn from(snap: &PlayerSnapshot) -> Self {
        Self {
            position: snap.position,
            rotation: snap.rotation,
            velocity: snap.velocity,
            health: snap.health,
            fuel: snap.fuel,
            ammo: snap.ammo,
            missiles: snap.missiles,
            countermeasures: snap.countermeasures,
            lifecycle: snap.lifecycle,
            score: snap.score,
            kills: snap.kills,
            deaths: snap.deaths,
        }
    }
}

/// Tracks emitted state per entity and builds snapshots/deltas
#[derive(Debug, Default)]
pub struct SyncTracker {
    players: HashMap<Uuid, PlayerBaseline>,
}

impl SyncTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full state push for one joining or reconnecting client. Baselines
    /// are not reset: a redundant field in the next delta is idempotent
    /// for everyone else.
    pub fn full_snapshot(
        &self,
        recipient: Uuid,
        session: SessionInfo,
        tick: u64,
        players: &HashMap<Uuid, PlayerAircraft>,
        projectiles: &HashMap<Uuid, Projectile>,
    ) -> ServerMsg {
        ServerMsg::InitState {
            recipient,
            session,
            players: players.values().map(|p| p.snapshot()).collect(),
            projectiles: projectiles.values().map(Projectile::snapshot).collect(),
            tick,
        }
    }

    /// Per-tick delta: compares every entity with its baseline, emits only
    /// changed fields, and advances the baselines. Returns None when
    /// nothing changed and no events occurred.
    pub fn delta(
        &mut self,
        tick: u64,
        players: &HashMap<Uuid, PlayerAircraft>,
        projectiles: &HashMap<Uuid, Projectile>,
        steered: &[Uuid],
        events: Vec<GameEvent>,
    ) -> Option<ServerMsg> {
        let mut player_deltas = Vec::new();

        for player in players.values() {
            let snap = player.snapshot();
            match self.players.get_mut(&player.id) {
                None => {
                    // First sight of this entity: emit every field
                    self.players.insert(player.id, PlayerBaseline::from(&snap));
                    player_deltas.push(full_player_delta(&snap));
                }
                Some(baseline) => {
                    let delta = diff_player(baseline, &snap);
                    if !delta.is_empty() {
                        *baseline = PlayerBaseline::from(&snap);
                        player_deltas.push(delta);
                    }
                }
            }
        }

        // Live projectiles move every tick; heading is included only when
        // homing changed it
        let projectile_deltas: Vec<ProjectileDelta> = projectiles
            .values()
            .map(|p| ProjectileDelta {
                id: p.id,
                position: p.position,
                direction: steered.contains(&p.id).then_some(p.direction),
            })
            .collect();

        if player_deltas.is_empty() && projectile_deltas.is_empty() && events.is_empty() {
            return None;
        }

        Some(ServerMsg::StateDelta {
            tick,
            players: player_deltas,
            projectiles: projectile_deltas,
            events,
        })
    }

    /// Drop the baseline of a removed player
    pub fn forget_player(&mut self, id: Uuid) {
        self.players.remove(&id);
    }
}

fn full_player_delta(snap: &PlayerSnapshot) -> PlayerDelta {
    PlayerDelta {
        player_id: snap.player_id,
        position: Some(snap.position),
        rotation: Some(snap.rotation),
        velocity: Some(snap.velocity),
        health: Some(snap.health),
        fuel: Some(snap.fuel),
        ammo: Some(snap.ammo),
        missiles: Some(snap.missiles),
        countermeasures: Some(snap.countermeasures),
        lifecycle: Some(snap.lifecycle),
        score: Some(snap.score),
        kills: Some(snap.kills),
        deaths: Some(snap.deaths),
    }
}

fn diff_player(baseline: &PlayerBaseline, snap: &PlayerSnapshot) -> PlayerDelta {
    let mut delta = PlayerDelta::new(snap.player_id);

    if baseline.position.distance_squared(snap.position) > POSITION_EPSILON * POSITION_EPSILON {
        delta.position = Some(snap.position);
    }
    if (baseline.rotation.dot(snap.rotation).abs() - 1.0).abs() > ROTATION_EPSILON {
        delta.rotation = Some(snap.rotation);
    }
    if baseline.velocity.distance_squared(snap.velocity) > POSITION_EPSILON * POSITION_EPSILON {
        delta.velocity = Some(snap.velocity);
    }
    if (baseline.health - snap.health).abs() > SCALAR_EPSILON {
        delta.health = Some(snap.health);
    }
    if (baseline.fuel - snap.fuel).abs() > SCALAR_EPSILON {
        delta.fuel = Some(snap.fuel);
    }
    if baseline.ammo != snap.ammo {
        delta.ammo = Some(snap.ammo);
    }
    if baseline.missiles != snap.missiles {
        delta.missiles = Some(snap.missiles);
    }
    if baseline.countermeasures != snap.countermeasures {
        delta.countermeasures = Some(snap.countermeasures);
    }
    if baseline.lifecycle != snap.lifecycle {
        delta.lifecycle = Some(snap.lifecycle);
    }
    if baseline.score != snap.score {
        delta.score = Some(snap.score);
    }
    if baseline.kills != snap.kills {
        delta.kills = Some(snap.kills);
    }
    if baseline.deaths != snap.deaths {
        delta.deaths = Some(snap.deaths);
    }

    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::{AircraftKind, Loadout};

    fn one_player() -> (Uuid, HashMap<Uuid, PlayerAircraft>) {
        let player = PlayerAircraft::new(
            Uuid::new_v4(),
            "Viper".into(),
            AircraftKind::Fighter,
            Loadout::default(),
            Vec3::new(0.0, 500.0, 0.0),
        );
        let id = player.id;
        (id, HashMap::from([(id, player)]))
    }

    #[test]
    fn first_delta_carries_all_fields_then_settles() {
        let (id, players) = one_player();
        let mut tracker = SyncTracker::new();

        let first = tracker
            .delta(1, &players, &HashMap::new(), &[], Vec::new())
            .expect("first sight emits");
        match first {
            ServerMsg::StateDelta { players: deltas, .. } => {
                assert_eq!(deltas.len(), 1);
                assert_eq!(deltas[0].player_id, id);
                assert!(deltas[0].position.is_some());
                assert!(deltas[0].health.is_some());
            }
            other => panic!("wrong message: {:?}", other),
        }

        // Nothing moved since: no delta at all
        let second = tracker.delta(2, &players, &HashMap::new(), &[], Vec::new());
        assert!(second.is_none(), "idle entities must not produce deltas");
    }

    #[test]
    fn only_changed_fields_are_packed() {
        let (id, mut players) = one_player();
        let mut tracker = SyncTracker::new();
        tracker.delta(1, &players, &HashMap::new(), &[], Vec::new());

        players.get_mut(&id).unwrap().health = 70.0;

        let msg = tracker
            .delta(2, &players, &HashMap::new(), &[], Vec::new())
            .expect("health changed");
        match msg {
            ServerMsg::StateDelta { players: deltas, .. } => {
                assert_eq!(deltas.len(), 1);
                let d = &deltas[0];
                assert_eq!(d.health, Some(70.0));
                assert!(d.position.is_none(), "position did not change");
                assert!(d.score.is_none());
            }
            other => panic!("wrong message: {:?}", other),
        }
    }

    #[test]
    fn events_force_a_delta_even_without_field_changes() {
        let (_, players) = one_player();
        let mut tracker = SyncTracker::new();
        tracker.delta(1, &players, &HashMap::new(), &[], Vec::new());

        let events = vec![GameEvent::EngineOut {
            player_id: Uuid::new_v4(),
        }];
        let msg = tracker.delta(2, &players, &HashMap::new(), &[], events);
        assert!(msg.is_some());
    }

    #[test]
    fn forgotten_player_resyncs_in_full_on_return() {
        let (id, players) = one_player();
        let mut tracker = SyncTracker::new();
        tracker.delta(1, &players, &HashMap::new(), &[], Vec::new());
        tracker.forget_player(id);

        let msg = tracker
            .delta(2, &players, &HashMap::new(), &[], Vec::new())
            .expect("rejoined player emits full delta");
        match msg {
            ServerMsg::StateDelta { players: deltas, .. } => {
                assert!(deltas[0].lifecycle.is_some());
                assert!(deltas[0].deaths.is_some());
            }
            other => panic!("wrong message: {:?}", other),
        }
    }
}
