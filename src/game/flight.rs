//! Flight dynamics: per-type aircraft profiles and the force integrator

use glam::{Quat, Vec3};
use rand::Rng;

use crate::ws::protocol::{AircraftKind, ControlState};

pub const GRAVITY: f32 = 9.81;
pub const SEA_LEVEL_DENSITY: f32 = 1.225;
/// Exponential density falloff scale height, meters
const DENSITY_SCALE_HEIGHT: f32 = 8500.0;

const FLAP_LIFT_BONUS: f32 = 0.4;
const FLAP_DRAG_MULT: f32 = 1.6;
const AIRBRAKE_DRAG_MULT: f32 = 3.0;

/// Dynamic pressure at which control surfaces reach full authority
const REFERENCE_DYNAMIC_PRESSURE: f32 = 8000.0;
/// How quickly angular velocity converges on the commanded rates, 1/s
const CONTROL_RESPONSE: f32 = 6.0;
const ANGULAR_DAMPING: f32 = 0.94;
const PITCH_STABILITY: f32 = 0.8;
const ROLL_STABILITY: f32 = 1.2;
/// Attitude-rate noise injected while stalled, rad/s per step
const STALL_PERTURBATION: f32 = 0.35;
const STALL_CONTROL_PENALTY: f32 = 0.35;

/// Post-stall lift decays over roughly another stall-angle of AoA
const POST_STALL_DECAY: f32 = 0.7;

/// Engine model per aircraft type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineKind {
    /// Thrust falls off with altitude; afterburner multiplies when engaged
    Jet { afterburner_multiplier: f32 },
    /// Efficiency peaks at one airspeed and falls off around it
    Propeller { peak_efficiency_speed: f32 },
}

/// Performance profile for one aircraft type
#[derive(Debug, Clone, Copy)]
pub struct AircraftProfile {
    /// Airframe mass, kg
    pub mass: f32,
    /// Wing reference area, m^2
    pub wing_area: f32,
    /// Maximum engine thrust, N
    pub max_thrust: f32,
    /// Lift coefficient at zero angle of attack
    pub base_lift_coeff: f32,
    /// Lift slope, per radian of AoA below stall
    pub lift_slope: f32,
    /// Hard cap on the lift coefficient
    pub max_lift_coeff: f32,
    /// Stall onset angle of attack, radians
    pub stall_angle: f32,
    /// Below this airspeed the wing cannot sustain flight
    pub min_flight_speed: f32,
    /// Envelope cap on airspeed
    pub max_speed: f32,
    /// Parasitic drag coefficient
    pub parasitic_drag: f32,
    /// Induced drag factor (k in k*Cl^2)
    pub induced_drag_factor: f32,
    /// Overall control surface effectiveness
    pub control_effectiveness: f32,
    /// Angular rate caps, rad/s
    pub max_roll_rate: f32,
    pub max_pitch_rate: f32,
    pub max_yaw_rate: f32,
    pub engine: EngineKind,
    /// Collision box half extents (x: half span, y: half height, z: half length)
    pub half_extents: Vec3,
    /// Sphere radius for projectile tests
    pub collision_radius: f32,
    /// Rounds of primary ammunition carried
    pub ammo_capacity: u32,
    /// Secondary ordnance carried
    pub ordnance_capacity: u32,
    pub countermeasure_capacity: u32,
}

impl AircraftProfile {
    pub fn for_kind(kind: AircraftKind) -> Self {
        match kind {
            AircraftKind::Fighter => Self {
                mass: 9000.0,
                wing_area: 28.0,
                max_thrust: 130_000.0,
                base_lift_coeff: 0.15,
                lift_slope: 4.5,
                max_lift_coeff: 1.6,
                stall_angle: 0.30,
                min_flight_speed: 70.0,
                max_speed: 600.0,
                parasitic_drag: 0.020,
                induced_drag_factor: 0.07,
                control_effectiveness: 1.0,
                max_roll_rate: 3.5,
                max_pitch_rate: 2.0,
                max_yaw_rate: 1.0,
                engine: EngineKind::Jet {
                    afterburner_multiplier: 1.5,
                },
                half_extents: Vec3::new(5.5, 1.6, 7.5),
                collision_radius: 8.0,
                ammo_capacity: 100,
                ordnance_capacity: 6,
                countermeasure_capacity: 4,
            },
            AircraftKind::Interceptor => Self {
                mass: 7000.0,
                wing_area: 24.0,
                max_thrust: 150_000.0,
                base_lift_coeff: 0.10,
                lift_slope: 4.2,
                max_lift_coeff: 1.4,
                stall_angle: 0.26,
                min_flight_speed: 85.0,
                max_speed: 720.0,
                parasitic_drag: 0.017,
                induced_drag_factor: 0.08,
                control_effectiveness: 1.1,
                max_roll_rate: 4.2,
                max_pitch_rate: 2.4,
                max_yaw_rate: 1.1,
                engine: EngineKind::Jet {
                    afterburner_multiplier: 1.7,
                },
                half_extents: Vec3::new(4.5, 1.5, 8.0),
                collision_radius: 7.5,
                ammo_capacity: 80,
                ordnance_capacity: 4,
                countermeasure_capacity: 4,
            },
            AircraftKind::Striker => Self {
                mass: 13_000.0,
                wing_area: 38.0,
                max_thrust: 110_000.0,
                base_lift_coeff: 0.22,
                lift_slope: 4.8,
                max_lift_coeff: 1.8,
                stall_angle: 0.33,
                min_flight_speed: 60.0,
                max_speed: 450.0,
                parasitic_drag: 0.028,
                induced_drag_factor: 0.06,
                control_effectiveness: 0.8,
                max_roll_rate: 2.2,
                max_pitch_rate: 1.6,
                max_yaw_rate: 0.9,
                engine: EngineKind::Jet {
                    afterburner_multiplier: 1.2,
                },
                half_extents: Vec3::new(6.0, 1.8, 8.5),
                collision_radius: 9.0,
                ammo_capacity: 150,
                ordnance_capacity: 8,
                countermeasure_capacity: 6,
            },
            AircraftKind::Bomber => Self {
                mass: 20_000.0,
                wing_area: 60.0,
                max_thrust: 70_000.0,
                base_lift_coeff: 0.30,
                lift_slope: 5.0,
                max_lift_coeff: 1.9,
                stall_angle: 0.35,
                min_flight_speed: 45.0,
                max_speed: 180.0,
                parasitic_drag: 0.035,
                induced_drag_factor: 0.05,
                control_effectiveness: 0.6,
                max_roll_rate: 1.2,
                max_pitch_rate: 0.9,
                max_yaw_rate: 0.7,
                engine: EngineKind::Propeller {
                    peak_efficiency_speed: 90.0,
                },
                half_extents: Vec3::new(14.0, 2.5, 11.0),
                collision_radius: 14.0,
                ammo_capacity: 200,
                ordnance_capacity: 10,
                countermeasure_capacity: 8,
            },
        }
    }
}

/// Mutable kinematic state of one aircraft
#[derive(Debug, Clone, Copy)]
pub struct FlightState {
    pub position: Vec3,
    pub orientation: Quat,
    pub velocity: Vec3,
    /// Body-frame rotation rates (x: pitch, y: yaw, z: roll)
    pub angular_velocity: Vec3,
    pub stalled: bool,
}

impl FlightState {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            orientation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            stalled: false,
        }
    }

    pub fn forward(&self) -> Vec3 {
        self.orientation * Vec3::Z
    }

    pub fn up(&self) -> Vec3 {
        self.orientation * Vec3::Y
    }

    pub fn right(&self) -> Vec3 {
        self.orientation * Vec3::X
    }
}

/// Diagnostics from one integration step
#[derive(Debug, Clone, Copy)]
pub struct StepInfo {
    pub airspeed: f32,
    pub angle_of_attack: f32,
    pub stalled: bool,
}

/// Atmospheric density at altitude (exponential falloff)
pub fn air_density(altitude: f32) -> f32 {
    SEA_LEVEL_DENSITY * (-altitude.max(0.0) / DENSITY_SCALE_HEIGHT).exp()
}

/// Lift coefficient for an angle of attack: linear below the stall angle,
/// decaying above it, plus flap contribution, capped at the profile max.
pub fn lift_coefficient(profile: &AircraftProfile, aoa: f32, flaps: bool) -> f32 {
    let abs_aoa = aoa.abs();
    let mut cl = if abs_aoa <= profile.stall_angle {
        profile.base_lift_coeff + profile.lift_slope * aoa
    } else {
        let peak = profile.base_lift_coeff + profile.lift_slope * profile.stall_angle * aoa.signum();
        let falloff = ((abs_aoa - profile.stall_angle) / profile.stall_angle).min(1.0);
        peak * (1.0 - POST_STALL_DECAY * falloff)
    };
    if flaps {
        cl += FLAP_LIFT_BONUS;
    }
    cl.clamp(-profile.max_lift_coeff, profile.max_lift_coeff)
}

/// Thrust in newtons for a throttle setting at the current flight condition
pub fn engine_thrust(
    profile: &AircraftProfile,
    throttle: f32,
    airspeed: f32,
    altitude: f32,
    afterburner: bool,
) -> f32 {
    let throttle = throttle.clamp(0.0, 1.0);
    match profile.engine {
        EngineKind::Jet {
            afterburner_multiplier,
        } => {
            let alt_factor = (1.0 - altitude.max(0.0) / 18_000.0).clamp(0.3, 1.0);
            let ab = if afterburner {
                afterburner_multiplier
            } else {
                1.0
            };
            throttle * profile.max_thrust * alt_factor * ab
        }
        EngineKind::Propeller {
            peak_efficiency_speed,
        } => {
            let off_peak = (airspeed - peak_efficiency_speed) / (2.0 * peak_efficiency_speed);
            let efficiency = (1.0 - off_peak * off_peak).clamp(0.2, 1.0);
            throttle * profile.max_thrust * efficiency
        }
    }
}

/// The flight dynamics integrator
pub struct FlightIntegrator;

impl FlightIntegrator {
    /// Advance one aircraft by one tick: forces -> acceleration ->
    /// semi-implicit Euler, then angular response and stall handling.
    pub fn step(
        profile: &AircraftProfile,
        state: &mut FlightState,
        controls: &ControlState,
        rng: &mut impl Rng,
        dt: f32,
    ) -> StepInfo {
        let airspeed = state.velocity.length();
        let altitude = state.position.y;
        let density = air_density(altitude);
        let forward = state.forward();
        let up = state.up();

        // Signed angle of attack: positive when the nose is above the
        // velocity vector
        let aoa = if airspeed > 1.0 {
            let v_dir = state.velocity / airspeed;
            let angle = forward.dot(v_dir).clamp(-1.0, 1.0).acos();
            if v_dir.dot(up) < 0.0 {
                angle
            } else {
                -angle
            }
        } else {
            0.0
        };

        let stalled = aoa.abs() > profile.stall_angle || airspeed < profile.min_flight_speed;
        state.stalled = stalled;

        let mut total_force = Vec3::new(0.0, -GRAVITY * profile.mass, 0.0);

        let cl = lift_coefficient(profile, aoa, controls.flaps);
        if airspeed > 0.5 {
            let v_dir = state.velocity / airspeed;
            let q = 0.5 * density * airspeed * airspeed;

            // Lift acts perpendicular to velocity, in the velocity/up plane
            let lift_dir = (up - v_dir * up.dot(v_dir)).normalize_or_zero();
            total_force += lift_dir * (q * profile.wing_area * cl);

            let mut cd = profile.parasitic_drag + profile.induced_drag_factor * cl * cl;
            if controls.airbrake {
                cd *= AIRBRAKE_DRAG_MULT;
            }
            if controls.flaps {
                cd *= FLAP_DRAG_MULT;
            }
            total_force -= v_dir * (q * profile.wing_area * cd);
        }

        let thrust = engine_thrust(
            profile,
            controls.throttle,
            airspeed,
            altitude,
            controls.afterburner,
        );
        total_force += forward * thrust;

        // Semi-implicit Euler: velocity first, then position
        state.velocity += total_force / profile.mass * dt;

        let speed = state.velocity.length();
        if speed > profile.max_speed {
            state.velocity *= profile.max_speed / speed;
        }

        state.position += state.velocity * dt;

        Self::step_attitude(profile, state, controls, density, airspeed, stalled, rng, dt);

        StepInfo {
            airspeed: state.velocity.length(),
            angle_of_attack: aoa,
            stalled,
        }
    }

    /// Angular response: commanded rates scaled by dynamic pressure and
    /// control effectiveness, self-righting stability toward level flight,
    /// damping each tick.
    #[allow(clippy::too_many_arguments)]
    fn step_attitude(
        profile: &AircraftProfile,
        state: &mut FlightState,
        controls: &ControlState,
        density: f32,
        airspeed: f32,
        stalled: bool,
        rng: &mut impl Rng,
        dt: f32,
    ) {
        let q = 0.5 * density * airspeed * airspeed;
        let authority = (q / REFERENCE_DYNAMIC_PRESSURE).clamp(0.1, 1.0)
            * profile.control_effectiveness
            * if stalled { STALL_CONTROL_PENALTY } else { 1.0 };

        // Body frame: +x rotation pitches the nose down, +y yaws right,
        // +z lifts the right wing
        let commanded = Vec3::new(
            -controls.pitch.clamp(-1.0, 1.0) * profile.max_pitch_rate,
            controls.yaw.clamp(-1.0, 1.0) * profile.max_yaw_rate,
            -controls.roll.clamp(-1.0, 1.0) * profile.max_roll_rate,
        ) * authority;

        let forward = state.forward();
        let right = state.right();
        let stability = Vec3::new(
            forward.y * PITCH_STABILITY,
            0.0,
            -right.y * ROLL_STABILITY,
        );

        let blend = (CONTROL_RESPONSE * dt).min(1.0);
        state.angular_velocity = state.angular_velocity.lerp(commanded + stability, blend);

        if stalled {
            state.angular_velocity += Vec3::new(
                rng.gen_range(-1.0..=1.0),
                rng.gen_range(-1.0..=1.0),
                rng.gen_range(-1.0..=1.0),
            ) * STALL_PERTURBATION
                * dt;
        }

        state.orientation =
            (state.orientation * Quat::from_scaled_axis(state.angular_velocity * dt)).normalize();
        state.angular_velocity *= ANGULAR_DAMPING;
    }
}
