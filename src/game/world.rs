//! Map boundaries and procedural terrain

use glam::Vec3;

use crate::ws::protocol::MapId;

/// World data for one session: axis-aligned bounds plus a terrain descriptor
#[derive(Debug, Clone)]
pub struct WorldMap {
    pub id: MapId,
    pub min: Vec3,
    pub max: Vec3,
    /// Sea level; terrain never dips below this
    pub ground_level: f32,
    /// Peak terrain height above ground level
    pub relief: f32,
    /// Phase offset feeding the height function, differs per map
    phase: f32,
}

impl WorldMap {
    pub fn for_map(id: MapId) -> Self {
        match id {
            MapId::Archipelago => Self {
                id,
                min: Vec3::new(-6000.0, -100.0, -6000.0),
                max: Vec3::new(6000.0, 4000.0, 6000.0),
                ground_level: 0.0,
                relief: 120.0,
                phase: 0.0,
            },
            MapId::Canyon => Self {
                id,
                min: Vec3::new(-4000.0, -100.0, -4000.0),
                max: Vec3::new(4000.0, 3500.0, 4000.0),
                ground_level: 0.0,
                relief: 650.0,
                phase: 1.7,
            },
            MapId::Highlands => Self {
                id,
                min: Vec3::new(-5000.0, -100.0, -5000.0),
                max: Vec3::new(5000.0, 4000.0, 5000.0),
                ground_level: 0.0,
                relief: 320.0,
                phase: 4.2,
            },
        }
    }

    /// Terrain elevation at (x, z). Procedural layered waves; never below
    /// ground level.
    pub fn terrain_height(&self, x: f32, z: f32) -> f32 {
        let p = self.phase;
        let broad = ((x * 0.0011 + p).sin() * (z * 0.0009 + p * 0.5).cos() + 1.0) * 0.5;
        let ridges = ((x * 0.0047).sin() * (z * 0.0053 + p).sin() + 1.0) * 0.5;
        let detail = ((x * 0.021 + z * 0.017).sin() + 1.0) * 0.5;

        let height = self.relief * (0.6 * broad + 0.3 * ridges + 0.1 * detail);
        self.ground_level + height.max(0.0)
    }

    /// Approximate surface normal at (x, z) from finite differences
    pub fn terrain_normal(&self, x: f32, z: f32) -> Vec3 {
        const STEP: f32 = 2.0;
        let dx = self.terrain_height(x + STEP, z) - self.terrain_height(x - STEP, z);
        let dz = self.terrain_height(x, z + STEP) - self.terrain_height(x, z - STEP);
        Vec3::new(-dx / (2.0 * STEP), 1.0, -dz / (2.0 * STEP)).normalize()
    }

    /// Whether a point lies inside the map bounds
    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Clamp a point to the map bounds
    pub fn clamp_point(&self, p: Vec3) -> Vec3 {
        p.clamp(self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terrain_never_below_ground_level() {
        let world = WorldMap::for_map(MapId::Canyon);
        for i in -20..20 {
            for j in -20..20 {
                let h = world.terrain_height(i as f32 * 197.0, j as f32 * 211.0);
                assert!(
                    h >= world.ground_level,
                    "terrain dipped below ground at ({}, {}): {}",
                    i,
                    j,
                    h
                );
            }
        }
    }

    #[test]
    fn terrain_bounded_by_relief() {
        let world = WorldMap::for_map(MapId::Highlands);
        for i in -20..20 {
            let h = world.terrain_height(i as f32 * 313.0, i as f32 * -157.0);
            assert!(h <= world.ground_level + world.relief + 1.0);
        }
    }

    #[test]
    fn contains_and_clamp() {
        let world = WorldMap::for_map(MapId::Archipelago);
        assert!(world.contains(Vec3::new(0.0, 100.0, 0.0)));
        assert!(!world.contains(Vec3::new(7000.0, 100.0, 0.0)));

        let clamped = world.clamp_point(Vec3::new(7000.0, 100.0, 0.0));
        assert_eq!(clamped.x, world.max.x);
    }

    #[test]
    fn terrain_normal_points_up() {
        let world = WorldMap::for_map(MapId::Canyon);
        let n = world.terrain_normal(523.0, -812.0);
        assert!(n.y > 0.0, "normal should have an upward component");
        assert!((n.length() - 1.0).abs() < 1e-4);
    }
}
