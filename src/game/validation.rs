//! Movement validation: client-reported transforms are checked against the
//! physically achievable envelope and clamped, never rejected outright.

use glam::Vec3;

/// Updates closer together than this are accepted unmodified; the window
/// is too short for a meaningful envelope check and rapid updates would
/// otherwise be falsely rejected.
pub const MIN_DELTA_SECS: f32 = 0.01;

/// Slack multiplier absorbing network jitter
pub const JITTER_TOLERANCE: f32 = 1.2;

/// Result of validating one position report
#[derive(Debug, Clone, Copy)]
pub struct ValidatedMovement {
    pub position: Vec3,
    pub velocity: Vec3,
    /// False when the report was out of envelope and got clamped. Callers
    /// log and count repeat offenders; gameplay continues on the corrected
    /// position.
    pub valid: bool,
}

pub struct MovementValidator;

impl MovementValidator {
    /// Validate a reported position against the last known one. Velocity
    /// passes through unchanged either way.
    pub fn validate(
        last_position: Vec3,
        reported_position: Vec3,
        reported_velocity: Vec3,
        last_update_ms: u64,
        now_ms: u64,
        max_speed: f32,
    ) -> ValidatedMovement {
        let delta_time = now_ms.saturating_sub(last_update_ms) as f32 / 1000.0;

        if delta_time < MIN_DELTA_SECS {
            return ValidatedMovement {
                position: reported_position,
                velocity: reported_velocity,
                valid: true,
            };
        }

        let max_distance = max_speed * delta_time * JITTER_TOLERANCE;
        let displacement = reported_position - last_position;
        let distance = displacement.length();

        if distance <= max_distance {
            return ValidatedMovement {
                position: reported_position,
                velocity: reported_velocity,
                valid: true,
            };
        }

        // Project along the movement direction to the reachable boundary
        let clamped = last_position + displacement / distance * max_distance;
        ValidatedMovement {
            position: clamped,
            velocity: reported_velocity,
            valid: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_SPEED: f32 = 600.0;

    #[test]
    fn in_envelope_movement_passes_through() {
        let last = Vec3::new(0.0, 1000.0, 0.0);
        // 100 ms at max speed covers 60 m; report 50 m
        let reported = last + Vec3::new(50.0, 0.0, 0.0);
        let result =
            MovementValidator::validate(last, reported, Vec3::X * 500.0, 1000, 1100, MAX_SPEED);

        assert!(result.valid);
        assert_eq!(result.position, reported);
    }

    #[test]
    fn out_of_envelope_movement_is_clamped_not_rejected() {
        let last = Vec3::new(0.0, 1000.0, 0.0);
        let reported = last + Vec3::new(500.0, 0.0, 0.0); // 500 m in 100 ms
        let velocity = Vec3::X * 400.0;
        let result = MovementValidator::validate(last, reported, velocity, 1000, 1100, MAX_SPEED);

        assert!(!result.valid);
        let max_distance = MAX_SPEED * 0.1 * JITTER_TOLERANCE;
        let moved = result.position.distance(last);
        assert!(
            (moved - max_distance).abs() < 1e-2,
            "clamped to envelope edge: moved {} vs {}",
            moved,
            max_distance
        );
        // Direction preserved
        assert!(result.position.x > 0.0);
        assert_eq!(result.position.y, last.y);
        // Velocity passes through unchanged
        assert_eq!(result.velocity, velocity);
    }

    #[test]
    fn clamped_displacement_respects_envelope_for_any_delta() {
        let last = Vec3::ZERO;
        for delta_ms in [20u64, 50, 100, 500, 2000] {
            let reported = Vec3::new(1.0e6, 0.0, 0.0);
            let result =
                MovementValidator::validate(last, reported, Vec3::ZERO, 0, delta_ms, MAX_SPEED);
            let bound = MAX_SPEED * (delta_ms as f32 / 1000.0) * JITTER_TOLERANCE;
            assert!(
                result.position.length() <= bound + 1e-2,
                "displacement {} exceeded bound {} at dt {}ms",
                result.position.length(),
                bound,
                delta_ms
            );
        }
    }

    #[test]
    fn rapid_updates_are_accepted_unmodified() {
        let last = Vec3::ZERO;
        // 5 ms apart: below the minimal threshold, no envelope check
        let reported = Vec3::new(900.0, 0.0, 0.0);
        let result = MovementValidator::validate(last, reported, Vec3::ZERO, 1000, 1005, MAX_SPEED);
        assert!(result.valid);
        assert_eq!(result.position, reported);
    }
}
