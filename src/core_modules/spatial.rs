//! World-space primitives shared by the geometry, smoothing and presentation stages.
//!
//! Convention: y is up and +z is forward. A rotation with yaw `θ` maps the
//! local forward axis `(0, 0, 1)` to `(sin θ, 0, cos θ)`.

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Position and orientation of a camera or an object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
}

impl Pose {
    pub fn new(position: Vector3<f32>, rotation: UnitQuaternion<f32>) -> Self {
        Self { position, rotation }
    }

    pub fn identity() -> Self {
        Self::new(Vector3::zeros(), UnitQuaternion::identity())
    }

    /// The local +z axis expressed in world space.
    pub fn forward(&self) -> Vector3<f32> {
        self.rotation * Vector3::z()
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

/// A half-line in world space. `direction` is unit length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vector3<f32>,
    pub direction: Vector3<f32>,
}

impl Ray {
    pub fn new(origin: Vector3<f32>, direction: Vector3<f32>) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
        }
    }

    pub fn point_at(&self, distance: f32) -> Vector3<f32> {
        self.origin + self.direction * distance
    }
}

/// Full render transform of an asset instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub scale: Vector3<f32>,
}

impl Transform {
    pub fn new(position: Vector3<f32>, rotation: UnitQuaternion<f32>, scale: Vector3<f32>) -> Self {
        Self {
            position,
            rotation,
            scale,
        }
    }
}

/// Rotation from Euler angles in degrees, applied roll (z) first, then pitch
/// (x), then yaw (y), all about fixed world axes.
pub fn euler_degrees(angles: &Vector3<f32>) -> UnitQuaternion<f32> {
    let yaw = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), angles.y.to_radians());
    let pitch = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), angles.x.to_radians());
    let roll = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angles.z.to_radians());
    yaw * pitch * roll
}

/// Yaw in radians of a direction, measured from +z towards +x.
pub fn yaw_of(direction: &Vector3<f32>) -> f32 {
    direction.x.atan2(direction.z)
}

/// Rotation about world up only.
pub fn yaw_rotation(yaw: f32) -> UnitQuaternion<f32> {
    UnitQuaternion::from_axis_angle(&Vector3::y_axis(), yaw)
}

/// Rotation whose forward axis points along `direction` with world up kept
/// vertical (no roll). Degenerate directions give the identity.
pub fn look_rotation(direction: &Vector3<f32>) -> UnitQuaternion<f32> {
    if direction.norm_squared() < 1e-12 {
        return UnitQuaternion::identity();
    }
    let horizontal = direction.x.hypot(direction.z);
    if horizontal < 1e-6 {
        // Straight up or down: yaw is undefined, keep only the pitch.
        let pitch = if direction.y > 0.0 {
            -std::f32::consts::FRAC_PI_2
        } else {
            std::f32::consts::FRAC_PI_2
        };
        return UnitQuaternion::from_axis_angle(&Vector3::x_axis(), pitch);
    }
    UnitQuaternion::face_towards(direction, &Vector3::y())
}
