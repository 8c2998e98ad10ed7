//! Combat resolution: weapon stats, damage tables, kill bookkeeping

use std::collections::HashSet;

use super::collision::{CollisionEvent, CollisionKind};
use crate::ws::protocol::{PrimaryWeapon, ProjectileKind, SecondaryWeapon, Upgrade};

/// Base damage per point of severity for impact collisions
const TERRAIN_DAMAGE: f32 = 25.0;
const BOUNDARY_DAMAGE: f32 = 10.0;
const RAM_DAMAGE: f32 = 30.0;

/// Armor upgrade damage reduction
const ARMOR_REDUCTION: f32 = 0.20;

/// Cap on the score bonus granted for downing a high-value target
const KILL_BONUS_CAP: u32 = 50;

/// Kill-streak lengths that unlock achievements
pub const STREAK_THRESHOLDS: [(u32, &str); 3] = [
    (3, "streak_triple"),
    (5, "streak_ace"),
    (10, "streak_legend"),
];

/// Ballistics of one weapon
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeaponStats {
    pub kind: ProjectileKind,
    /// Damage per hit
    pub damage: f32,
    /// Muzzle/launch speed
    pub speed: f32,
    /// Cooldown between uses (seconds)
    pub cooldown: f32,
    /// Projectile lifetime (seconds)
    pub lifetime: f32,
    /// Projectile hit radius
    pub radius: f32,
    /// Splash radius (0 = direct hit only)
    pub blast_radius: f32,
}

impl WeaponStats {
    pub fn primary(weapon: PrimaryWeapon) -> Self {
        match weapon {
            PrimaryWeapon::Cannon => Self {
                kind: ProjectileKind::Bullet,
                damage: 12.0,
                speed: 900.0,
                cooldown: 0.5,
                lifetime: 2.0,
                radius: 2.0,
                blast_radius: 0.0,
            },
            PrimaryWeapon::RotaryCannon => Self {
                kind: ProjectileKind::Bullet,
                damage: 6.0,
                speed: 1000.0,
                cooldown: 0.12,
                lifetime: 1.5,
                radius: 1.5,
                blast_radius: 0.0,
            },
        }
    }

    pub fn secondary(weapon: SecondaryWeapon) -> Self {
        match weapon {
            SecondaryWeapon::HeatseekerMissile => Self {
                kind: ProjectileKind::Missile,
                damage: 40.0,
                speed: 450.0,
                cooldown: 4.0,
                lifetime: 8.0,
                radius: 6.0,
                blast_radius: 15.0,
            },
            SecondaryWeapon::RocketPod => Self {
                kind: ProjectileKind::Rocket,
                damage: 25.0,
                speed: 350.0,
                cooldown: 1.5,
                lifetime: 4.0,
                radius: 4.0,
                blast_radius: 10.0,
            },
            SecondaryWeapon::BombRack => Self {
                kind: ProjectileKind::Bomb,
                damage: 60.0,
                speed: 80.0,
                cooldown: 3.0,
                lifetime: 15.0,
                radius: 5.0,
                blast_radius: 30.0,
            },
        }
    }
}

/// Damage resolution rules
pub struct DamageModel;

impl DamageModel {
    /// Raw damage for a collision event, before loadout reduction
    pub fn collision_damage(event: &CollisionEvent) -> f32 {
        match &event.kind {
            CollisionKind::Terrain => TERRAIN_DAMAGE * event.severity,
            CollisionKind::Boundary => BOUNDARY_DAMAGE * event.severity,
            CollisionKind::Player { .. } => RAM_DAMAGE * event.severity,
            CollisionKind::Projectile { damage, .. } => *damage,
        }
    }

    /// Apply loadout-based reduction to incoming damage
    pub fn reduce_for_loadout(damage: f32, upgrades: &HashSet<Upgrade>) -> f32 {
        if upgrades.contains(&Upgrade::Armor) {
            damage * (1.0 - ARMOR_REDUCTION)
        } else {
            damage
        }
    }

    /// Bonus score for a kill, proportional to the capped differential of
    /// the victim's score and kill streak over the killer's.
    pub fn kill_bonus(killer_score: u32, victim_score: u32, victim_streak: u32) -> u32 {
        let score_diff = victim_score.saturating_sub(killer_score) / 10;
        (score_diff + victim_streak * 5).min(KILL_BONUS_CAP)
    }

    /// Achievement ids newly unlocked by reaching the given streak length
    pub fn streak_achievements(streak: u32) -> Vec<&'static str> {
        STREAK_THRESHOLDS
            .iter()
            .filter(|(threshold, _)| *threshold == streak)
            .map(|(_, id)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn terrain_event(severity: f32) -> CollisionEvent {
        CollisionEvent {
            kind: CollisionKind::Terrain,
            position: Vec3::ZERO,
            normal: Vec3::Y,
            severity,
        }
    }

    #[test]
    fn terrain_damage_scales_with_severity() {
        assert_eq!(DamageModel::collision_damage(&terrain_event(1.0)), 25.0);
        assert_eq!(DamageModel::collision_damage(&terrain_event(0.4)), 10.0);
    }

    #[test]
    fn armor_reduces_damage_twenty_percent() {
        let mut upgrades = HashSet::new();
        assert_eq!(DamageModel::reduce_for_loadout(50.0, &upgrades), 50.0);

        upgrades.insert(Upgrade::Armor);
        assert!((DamageModel::reduce_for_loadout(50.0, &upgrades) - 40.0).abs() < 1e-6);
    }

    #[test]
    fn kill_bonus_is_capped() {
        assert_eq!(DamageModel::kill_bonus(0, 10_000, 30), KILL_BONUS_CAP);
        // Low-value victim, no streak
        assert_eq!(DamageModel::kill_bonus(500, 100, 0), 0);
        // Streak contributes 5 per kill
        assert_eq!(DamageModel::kill_bonus(100, 100, 2), 10);
    }

    #[test]
    fn streak_achievements_fire_only_at_thresholds() {
        assert!(DamageModel::streak_achievements(2).is_empty());
        assert_eq!(DamageModel::streak_achievements(3), vec!["streak_triple"]);
        assert_eq!(DamageModel::streak_achievements(5), vec!["streak_ace"]);
        assert!(DamageModel::streak_achievements(4).is_empty());
    }

    #[test]
    fn rotary_cannon_trades_damage_for_rate() {
        let cannon = WeaponStats::primary(PrimaryWeapon::Cannon);
        let rotary = WeaponStats::primary(PrimaryWeapon::RotaryCannon);
        assert!(rotary.cooldown < cannon.cooldown);
        assert!(rotary.damage < cannon.damage);
    }
}
