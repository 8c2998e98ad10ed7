//! Projectile simulation: linear rounds, homing missiles, ballistic bombs

use std::collections::HashMap;

use glam::Vec3;
use uuid::Uuid;

use super::combat::WeaponStats;
use super::flight::GRAVITY;
use super::world::WorldMap;
use crate::ws::protocol::{ProjectileKind, ProjectileSnapshot};

/// Fraction of the heading error a missile closes per tick. Bounded-turn
/// homing: the direction blends toward the target vector, never snaps.
pub const MISSILE_TURN_FRACTION: f32 = 0.18;

/// A live projectile owned by a session
#[derive(Debug, Clone)]
pub struct Projectile {
    pub id: Uuid,
    pub owner: Uuid,
    pub kind: ProjectileKind,
    pub position: Vec3,
    /// Unit heading
    pub direction: Vec3,
    pub speed: f32,
    pub damage: f32,
    pub blast_radius: f32,
    pub radius: f32,
    /// Homing target designated at launch (missiles only)
    pub target: Option<Uuid>,
    pub spawned_tick: u64,
    /// Seconds before self-expiry
    pub lifetime: f32,
    pub age: f32,
}

impl Projectile {
    pub fn new(
        owner: Uuid,
        position: Vec3,
        direction: Vec3,
        stats: &WeaponStats,
        target: Option<Uuid>,
        tick: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            kind: stats.kind,
            position,
            direction: direction.try_normalize().unwrap_or(Vec3::Z),
            speed: stats.speed,
            damage: stats.damage,
            blast_radius: stats.blast_radius,
            radius: stats.radius,
            target: if stats.kind == ProjectileKind::Missile {
                target
            } else {
                None
            },
            spawned_tick: tick,
            lifetime: stats.lifetime,
            age: 0.0,
        }
    }

    pub fn snapshot(&self) -> ProjectileSnapshot {
        ProjectileSnapshot {
            id: self.id,
            owner: self.owner,
            kind: self.kind,
            position: self.position,
            direction: self.direction,
            speed: self.speed,
        }
    }
}

/// Outcome of advancing all projectiles one tick
#[derive(Debug, Default)]
pub struct ProjectileTickReport {
    /// Removed this tick, with the removal reason ("expired"/"out_of_bounds")
    pub removed: Vec<(Uuid, &'static str)>,
    /// Missiles whose heading changed (clients need the new direction)
    pub steered: Vec<Uuid>,
}

/// Advances and expires projectiles. Runs before collision testing so the
/// detector sees this tick's positions.
pub struct ProjectileSystem;

impl ProjectileSystem {
    pub fn advance(
        projectiles: &mut HashMap<Uuid, Projectile>,
        target_positions: &HashMap<Uuid, Vec3>,
        world: &WorldMap,
        dt: f32,
    ) -> ProjectileTickReport {
        let mut report = ProjectileTickReport::default();

        for projectile in projectiles.values_mut() {
            projectile.age += dt;

            match projectile.kind {
                ProjectileKind::Missile => {
                    if let Some(target_pos) = projectile
                        .target
                        .and_then(|id| target_positions.get(&id))
                    {
                        let to_target = (*target_pos - projectile.position).normalize_or_zero();
                        if to_target != Vec3::ZERO {
                            projectile.direction = projectile
                                .direction
                                .lerp(to_target, MISSILE_TURN_FRACTION)
                                .normalize();
                            report.steered.push(projectile.id);
                        }
                    }
                    projectile.position += projectile.direction * projectile.speed * dt;
                }
                ProjectileKind::Bomb => {
                    // Ballistic: release velocity plus accumulated gravity
                    let fall = Vec3::NEG_Y * (GRAVITY * projectile.age);
                    projectile.position +=
                        (projectile.direction * projectile.speed + fall) * dt;
                }
                ProjectileKind::Bullet | ProjectileKind::Rocket => {
                    projectile.position += projectile.direction * projectile.speed * dt;
                }
            }

            if projectile.age > projectile.lifetime {
                report.removed.push((projectile.id, "expired"));
            } else if !world.contains(projectile.position) {
                report.removed.push((projectile.id, "out_of_bounds"));
            }
        }

        for (id, _) in &report.removed {
            projectiles.remove(id);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::time::tick_delta;
    use crate::ws::protocol::{MapId, PrimaryWeapon, SecondaryWeapon};

    fn world() -> WorldMap {
        WorldMap::for_map(MapId::Archipelago)
    }

    fn spawn_missile(target: Option<Uuid>) -> Projectile {
        let stats = WeaponStats::secondary(SecondaryWeapon::HeatseekerMissile);
        Projectile::new(
            Uuid::new_v4(),
            Vec3::new(0.0, 500.0, 0.0),
            Vec3::Z,
            &stats,
            target,
            0,
        )
    }

    #[test]
    fn bullets_advance_linearly() {
        let stats = WeaponStats::primary(PrimaryWeapon::Cannon);
        let bullet = Projectile::new(
            Uuid::new_v4(),
            Vec3::new(0.0, 500.0, 0.0),
            Vec3::X,
            &stats,
            None,
            0,
        );
        let id = bullet.id;
        let mut projectiles = HashMap::from([(id, bullet)]);

        ProjectileSystem::advance(&mut projectiles, &HashMap::new(), &world(), tick_delta());

        let moved = &projectiles[&id];
        assert!((moved.position.x - stats.speed * tick_delta()).abs() < 1e-3);
        assert_eq!(moved.position.z, 0.0);
    }

    #[test]
    fn missile_direction_stays_unit_length_while_homing() {
        let target = Uuid::new_v4();
        let missile = spawn_missile(Some(target));
        let id = missile.id;
        let mut projectiles = HashMap::from([(id, missile)]);
        // Target off to the side so every step steers
        let targets = HashMap::from([(target, Vec3::new(2000.0, 900.0, 2000.0))]);

        for _ in 0..60 {
            ProjectileSystem::advance(&mut projectiles, &targets, &world(), tick_delta());
            if let Some(m) = projectiles.get(&id) {
                assert!(
                    (m.direction.length() - 1.0).abs() < 1e-4,
                    "direction drifted off unit length: {}",
                    m.direction.length()
                );
            }
        }
    }

    #[test]
    fn missile_turns_toward_target_without_snapping() {
        let target = Uuid::new_v4();
        let missile = spawn_missile(Some(target));
        let id = missile.id;
        let mut projectiles = HashMap::from([(id, missile)]);
        // Target directly behind the launch heading
        let targets = HashMap::from([(target, Vec3::new(0.0, 500.0, -5000.0))]);

        ProjectileSystem::advance(&mut projectiles, &targets, &world(), tick_delta());
        let after_one = projectiles[&id].direction;

        // One step must not reverse the heading outright
        assert!(after_one.z > 0.0, "homing snapped instantly: {:?}", after_one);

        for _ in 0..120 {
            ProjectileSystem::advance(&mut projectiles, &targets, &world(), tick_delta());
            if !projectiles.contains_key(&id) {
                break;
            }
        }
        if let Some(m) = projectiles.get(&id) {
            assert!(m.direction.z < 0.0, "missile never came around: {:?}", m.direction);
        }
    }

    #[test]
    fn projectiles_expire_by_lifetime() {
        let stats = WeaponStats::primary(PrimaryWeapon::Cannon);
        let bullet = Projectile::new(
            Uuid::new_v4(),
            Vec3::new(0.0, 3000.0, 0.0),
            Vec3::Y,
            &stats,
            None,
            0,
        );
        let id = bullet.id;
        let mut projectiles = HashMap::from([(id, bullet)]);

        let mut expired = false;
        for _ in 0..(2.5 * 30.0) as u32 {
            let report =
                ProjectileSystem::advance(&mut projectiles, &HashMap::new(), &world(), tick_delta());
            if report.removed.iter().any(|(rid, _)| *rid == id) {
                expired = true;
                break;
            }
        }
        assert!(expired, "bullet should expire within its lifetime");
        assert!(projectiles.is_empty());
    }

    #[test]
    fn boundary_exit_removes_projectile() {
        let stats = WeaponStats::primary(PrimaryWeapon::Cannon);
        let w = world();
        let bullet = Projectile::new(
            Uuid::new_v4(),
            Vec3::new(w.max.x - 10.0, 500.0, 0.0),
            Vec3::X,
            &stats,
            None,
            0,
        );
        let id = bullet.id;
        let mut projectiles = HashMap::from([(id, bullet)]);

        let mut reason = None;
        for _ in 0..10 {
            let report =
                ProjectileSystem::advance(&mut projectiles, &HashMap::new(), &w, tick_delta());
            if let Some((_, r)) = report.removed.iter().find(|(rid, _)| *rid == id) {
                reason = Some(*r);
                break;
            }
        }
        assert_eq!(reason, Some("out_of_bounds"));
    }

    #[test]
    fn bombs_fall_as_they_fly() {
        let stats = WeaponStats::secondary(SecondaryWeapon::BombRack);
        let bomb = Projectile::new(
            Uuid::new_v4(),
            Vec3::new(0.0, 2000.0, 0.0),
            Vec3::Z,
            &stats,
            None,
            0,
        );
        let id = bomb.id;
        let mut projectiles = HashMap::from([(id, bomb)]);

        for _ in 0..30 {
            ProjectileSystem::advance(&mut projectiles, &HashMap::new(), &world(), tick_delta());
        }
        let after = &projectiles[&id];
        assert!(after.position.y < 2000.0, "bomb should drop");
        assert!(after.position.z > 0.0, "bomb keeps forward motion");
    }
}
