// THEORY:
// The `smoother` turns the staircase of resolved targets (updated a few times a
// second) into continuous motion at render rate. Each tick moves the current
// transform a fraction of the remaining way towards the target, with the
// fraction derived from the real elapsed time:
//
//     factor = 1 - exp(-rate * dt)
//
// Because the factor depends on `dt`, two ticks of `dt/2` land exactly where one
// tick of `dt` would. The result is independent of the render frame rate.
// Position and scale move linearly, so they never overshoot. Rotation follows
// the shortest arc.

use crate::core_modules::spatial::Transform;
use nalgebra::UnitQuaternion;
use serde::{Deserialize, Serialize};

const SLERP_EPSILON: f32 = 1e-6;

/// Exponential approach rates, per second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingRates {
    /// Drives position and scale. Higher is snappier.
    pub position_rate: f32,
    /// Drives rotation. Higher is snappier.
    pub rotation_rate: f32,
}

impl Default for SmoothingRates {
    fn default() -> Self {
        Self {
            position_rate: 12.0,
            rotation_rate: 10.0,
        }
    }
}

/// Fraction of the remaining distance covered in `dt` seconds at `rate`.
pub fn approach_factor(rate: f32, dt: f32) -> f32 {
    if dt <= 0.0 {
        return 0.0;
    }
    1.0 - (-rate * dt).exp()
}

/// Shortest-arc spherical interpolation that tolerates nearly equal inputs.
pub fn slerp_shortest(
    from: &UnitQuaternion<f32>,
    to: &UnitQuaternion<f32>,
    t: f32,
) -> UnitQuaternion<f32> {
    // `try_slerp` flips the hemisphere itself; it only gives up when the two
    // rotations are too close for the arc to be defined.
    from.try_slerp(to, t, SLERP_EPSILON).unwrap_or(*to)
}

/// Advances `current` one tick towards `target`.
pub fn advance(current: &mut Transform, target: &Transform, rates: &SmoothingRates, dt: f32) {
    let position_factor = approach_factor(rates.position_rate, dt);
    let rotation_factor = approach_factor(rates.rotation_rate, dt);

    current.position = current.position.lerp(&target.position, position_factor);
    current.scale = current.scale.lerp(&target.scale, position_factor);
    current.rotation = slerp_shortest(&current.rotation, &target.rotation, rotation_factor);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Quaternion, Vector3};

    fn transform(x: f32, yaw: f32, scale: f32) -> Transform {
        Transform::new(
            Vector3::new(x, 0.0, 0.0),
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), yaw),
            Vector3::repeat(scale),
        )
    }

    #[test]
    fn factor_depends_on_elapsed_time() {
        assert_eq!(approach_factor(12.0, 0.0), 0.0);
        let half = approach_factor(12.0, 1.0 / 120.0);
        let full = approach_factor(12.0, 1.0 / 60.0);
        // Two half steps compose into one full step.
        assert_relative_eq!(1.0 - (1.0 - half) * (1.0 - half), full, epsilon = 1e-6);
    }

    #[test]
    fn position_error_decays_geometrically_without_overshoot() {
        let rates = SmoothingRates::default();
        let dt = 1.0 / 72.0;
        let target = transform(1.0, 0.0, 2.0);
        let mut current = transform(0.0, 0.0, 1.0);
        let decay = (-rates.position_rate * dt).exp();

        let mut error = 1.0f32;
        for _ in 0..200 {
            advance(&mut current, &target, &rates, dt);
            let new_error = target.position.x - current.position.x;
            assert!(new_error >= -1e-6, "overshoot");
            assert_relative_eq!(new_error, error * decay, epsilon = 1e-5);
            assert!(current.scale.x <= target.scale.x + 1e-6);
            error = new_error;
        }
        assert!(error < 1e-4);
    }

    #[test]
    fn rotation_converges_along_the_short_arc() {
        let rates = SmoothingRates::default();
        let target = transform(0.0, 0.2, 1.0);
        // Same orientation as yaw 3.0 but stored in the opposite hemisphere.
        let start = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 3.0);
        let negated = UnitQuaternion::new_unchecked(-start.into_inner());
        let mut current = Transform::new(Vector3::zeros(), negated, Vector3::repeat(1.0));

        let mut previous = current.rotation.angle_to(&target.rotation);
        for _ in 0..300 {
            advance(&mut current, &target, &rates, 1.0 / 60.0);
            let remaining = current.rotation.angle_to(&target.rotation);
            assert!(remaining <= previous + 1e-3);
            previous = remaining;
        }
        assert!(previous < 1e-3);
    }

    #[test]
    fn identical_rotations_stay_put() {
        let q = UnitQuaternion::from_quaternion(Quaternion::new(0.9, 0.1, 0.3, 0.2));
        assert_eq!(slerp_shortest(&q, &q, 0.5), q);
    }
}
