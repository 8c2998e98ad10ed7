//! Collision detection: terrain, map boundary, aircraft and projectiles

use glam::Vec3;
use uuid::Uuid;

use super::projectile::Projectile;
use super::world::WorldMap;
use crate::ws::protocol::ProjectileKind;

/// Relative speed that maps to severity 1.0 in aircraft-aircraft impacts
const RAM_SEVERITY_SPEED: f32 = 200.0;
/// Severity assigned to boundary contact
const BOUNDARY_SEVERITY: f32 = 0.5;
/// Severity assigned to any projectile hit
const PROJECTILE_SEVERITY: f32 = 0.8;
/// Terrain penetration depth that saturates severity
const TERRAIN_SEVERITY_DEPTH: f32 = 20.0;
/// Minimum severity for a grazing terrain strike
const TERRAIN_MIN_SEVERITY: f32 = 0.25;

/// What an aircraft collided with
#[derive(Debug, Clone, PartialEq)]
pub enum CollisionKind {
    Terrain,
    Boundary,
    Player {
        other: Uuid,
        relative_speed: f32,
    },
    Projectile {
        projectile: Uuid,
        owner: Uuid,
        kind: ProjectileKind,
        damage: f32,
    },
}

/// One detected collision; produced and consumed within a single tick
#[derive(Debug, Clone)]
pub struct CollisionEvent {
    pub kind: CollisionKind,
    pub position: Vec3,
    pub normal: Vec3,
    /// Normalized impact intensity in [0, 1]
    pub severity: f32,
}

/// Lightweight view of an aircraft for pairwise tests
#[derive(Debug, Clone, Copy)]
pub struct AircraftBody {
    pub id: Uuid,
    pub position: Vec3,
    pub velocity: Vec3,
    pub half_extents: Vec3,
    pub radius: f32,
}

/// Collision detection routines. All are pure; the session runs them after
/// integration and before state commit.
pub struct CollisionDetector;

impl CollisionDetector {
    /// All collisions for one aircraft against terrain, boundary, other
    /// aircraft and live projectiles, in detection order.
    pub fn detect(
        subject: &AircraftBody,
        world: &WorldMap,
        others: &[AircraftBody],
        projectiles: &[&Projectile],
    ) -> Vec<CollisionEvent> {
        let mut events = Vec::new();

        if let Some(hit) = Self::terrain_collision(world, subject.position) {
            events.push(hit);
        }

        events.extend(Self::boundary_collisions(world, subject.position));

        for other in others {
            if other.id == subject.id {
                continue;
            }
            if let Some(hit) = Self::aircraft_collision(subject, other) {
                events.push(hit);
            }
        }

        for projectile in projectiles {
            if projectile.owner == subject.id {
                continue;
            }
            if let Some(hit) = Self::projectile_collision(subject, projectile) {
                events.push(hit);
            }
        }

        events
    }

    /// Terrain contact when altitude reaches the surface. Severity scales
    /// with penetration depth and saturates at 1.0 at/below ground level.
    pub fn terrain_collision(world: &WorldMap, position: Vec3) -> Option<CollisionEvent> {
        let surface = world.terrain_height(position.x, position.z);
        if position.y > surface {
            return None;
        }

        let severity = if position.y <= world.ground_level {
            1.0
        } else {
            let depth = surface - position.y;
            (TERRAIN_MIN_SEVERITY + depth / TERRAIN_SEVERITY_DEPTH).min(1.0)
        };

        Some(CollisionEvent {
            kind: CollisionKind::Terrain,
            position: Vec3::new(position.x, surface, position.z),
            normal: world.terrain_normal(position.x, position.z),
            severity,
        })
    }

    /// Axis-aligned boundary test; one event per violated axis with the
    /// clamped contact point and outward normal.
    pub fn boundary_collisions(world: &WorldMap, position: Vec3) -> Vec<CollisionEvent> {
        let mut events = Vec::new();
        let clamped = world.clamp_point(position);

        for axis in 0..3 {
            let (p, min, max) = match axis {
                0 => (position.x, world.min.x, world.max.x),
                1 => (position.y, world.min.y, world.max.y),
                _ => (position.z, world.min.z, world.max.z),
            };

            let normal = if p < min {
                let mut n = Vec3::ZERO;
                n[axis] = 1.0;
                Some(n)
            } else if p > max {
                let mut n = Vec3::ZERO;
                n[axis] = -1.0;
                Some(n)
            } else {
                None
            };

            if let Some(normal) = normal {
                events.push(CollisionEvent {
                    kind: CollisionKind::Boundary,
                    position: clamped,
                    normal,
                    severity: BOUNDARY_SEVERITY,
                });
            }
        }

        events
    }

    /// Aircraft-aircraft bounding-box overlap. Symmetric: the same pair
    /// tested either way around yields matching events.
    pub fn aircraft_collision(a: &AircraftBody, b: &AircraftBody) -> Option<CollisionEvent> {
        let delta = b.position - a.position;
        let reach = a.half_extents + b.half_extents;

        if delta.x.abs() > reach.x || delta.y.abs() > reach.y || delta.z.abs() > reach.z {
            return None;
        }

        let relative_speed = (b.velocity - a.velocity).length();
        let severity = (relative_speed / RAM_SEVERITY_SPEED).min(1.0);
        // Normal points from the other aircraft toward the subject
        let normal = (-delta).try_normalize().unwrap_or(Vec3::Y);

        Some(CollisionEvent {
            kind: CollisionKind::Player {
                other: b.id,
                relative_speed,
            },
            position: a.position + delta * 0.5,
            normal,
            severity,
        })
    }

    /// Sphere test between an aircraft and a projectile, using the
    /// projectile kind's own radius (missiles are easier to clip).
    pub fn projectile_collision(
        subject: &AircraftBody,
        projectile: &Projectile,
    ) -> Option<CollisionEvent> {
        let delta = subject.position - projectile.position;
        let reach = subject.radius + projectile.radius;
        if delta.length_squared() > reach * reach {
            return None;
        }

        Some(CollisionEvent {
            kind: CollisionKind::Projectile {
                projectile: projectile.id,
                owner: projectile.owner,
                kind: projectile.kind,
                damage: projectile.damage,
            },
            position: projectile.position,
            normal: delta.try_normalize().unwrap_or(Vec3::Y),
            severity: PROJECTILE_SEVERITY,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::combat::WeaponStats;
    use crate::ws::protocol::{MapId, SecondaryWeapon};

    fn body(id: Uuid, position: Vec3, velocity: Vec3) -> AircraftBody {
        AircraftBody {
            id,
            position,
            velocity,
            half_extents: Vec3::new(5.0, 2.0, 7.0),
            radius: 8.0,
        }
    }

    #[test]
    fn below_ground_is_full_severity() {
        let world = WorldMap::for_map(MapId::Archipelago);
        let hit = CollisionDetector::terrain_collision(&world, Vec3::new(0.0, -1.0, 0.0))
            .expect("below ground must collide");
        assert_eq!(hit.severity, 1.0);
        assert_eq!(hit.kind, CollisionKind::Terrain);
    }

    #[test]
    fn above_terrain_is_clear() {
        let world = WorldMap::for_map(MapId::Archipelago);
        let clear = CollisionDetector::terrain_collision(&world, Vec3::new(0.0, 3000.0, 0.0));
        assert!(clear.is_none());
    }

    #[test]
    fn boundary_exit_reports_violated_axis_with_outward_normal() {
        let world = WorldMap::for_map(MapId::Archipelago);
        let outside = Vec3::new(world.max.x + 50.0, 100.0, 0.0);
        let events = CollisionDetector::boundary_collisions(&world, outside);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].normal, Vec3::new(-1.0, 0.0, 0.0));
        assert_eq!(events[0].position.x, world.max.x);
        assert_eq!(events[0].severity, BOUNDARY_SEVERITY);
    }

    #[test]
    fn overlapping_aircraft_at_rest_have_zero_severity() {
        let a = body(Uuid::new_v4(), Vec3::new(0.0, 100.0, 0.0), Vec3::ZERO);
        let b = body(Uuid::new_v4(), Vec3::new(3.0, 100.0, 0.0), Vec3::ZERO);

        let hit = CollisionDetector::aircraft_collision(&a, &b).expect("boxes overlap");
        assert_eq!(hit.severity, 0.0);
        match hit.kind {
            CollisionKind::Player { other, .. } => assert_eq!(other, b.id),
            other => panic!("wrong kind: {:?}", other),
        }
    }

    #[test]
    fn aircraft_collision_is_symmetric() {
        let a = body(
            Uuid::new_v4(),
            Vec3::new(0.0, 100.0, 0.0),
            Vec3::new(80.0, 0.0, 0.0),
        );
        let b = body(
            Uuid::new_v4(),
            Vec3::new(4.0, 101.0, 2.0),
            Vec3::new(-60.0, 0.0, 0.0),
        );

        let ab = CollisionDetector::aircraft_collision(&a, &b).expect("a sees b");
        let ba = CollisionDetector::aircraft_collision(&b, &a).expect("b sees a");

        assert!((ab.severity - ba.severity).abs() < 1e-6);
        // Normals oppose each other
        assert!((ab.normal + ba.normal).length() < 1e-5);
    }

    #[test]
    fn severity_scales_with_relative_speed() {
        let a = body(
            Uuid::new_v4(),
            Vec3::new(0.0, 100.0, 0.0),
            Vec3::new(150.0, 0.0, 0.0),
        );
        let b = body(
            Uuid::new_v4(),
            Vec3::new(3.0, 100.0, 0.0),
            Vec3::new(-150.0, 0.0, 0.0),
        );

        let hit = CollisionDetector::aircraft_collision(&a, &b).unwrap();
        // 300 m/s closure saturates at 1.0
        assert_eq!(hit.severity, 1.0);
    }

    #[test]
    fn projectile_hit_skips_owner() {
        let owner = Uuid::new_v4();
        let victim = Uuid::new_v4();
        let world = WorldMap::for_map(MapId::Archipelago);
        let stats = WeaponStats::secondary(SecondaryWeapon::HeatseekerMissile);
        let projectile = Projectile::new(
            owner,
            Vec3::new(0.0, 100.0, 0.0),
            Vec3::Z,
            &stats,
            None,
            0,
        );

        let owner_body = body(owner, Vec3::new(0.0, 100.0, 1.0), Vec3::ZERO);
        let victim_body = body(victim, Vec3::new(0.0, 100.0, 1.0), Vec3::ZERO);

        let events = CollisionDetector::detect(&owner_body, &world, &[], &[&projectile]);
        assert!(
            !events
                .iter()
                .any(|e| matches!(e.kind, CollisionKind::Projectile { .. })),
            "owner must not collide with own projectile"
        );

        let events = CollisionDetector::detect(&victim_body, &world, &[], &[&projectile]);
        let hit = events
            .iter()
            .find(|e| matches!(e.kind, CollisionKind::Projectile { .. }))
            .expect("victim should be hit");
        assert_eq!(hit.severity, PROJECTILE_SEVERITY);
    }
}
