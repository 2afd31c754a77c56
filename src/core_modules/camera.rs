// THEORY:
// The `camera` module describes the two upstream collaborators the geometry
// stage depends on: the passthrough camera (its pose, the size of the image the
// detector ran on, and how a viewport point becomes a world ray) and the depth
// sensor (a per-eye depth texture plus the view-projection matrix it was
// rendered with, captured together with the camera pose).
//
// Both are modelled as data or as a narrow trait so that a headset runtime, a
// replay file or a unit test can stand behind them interchangeably.
//
// Depth textures follow the GPU convention: texel (0, 0) is the bottom-left
// corner, rows grow upwards, and samples are metres along the view ray.

use crate::core_modules::spatial::{Pose, Ray};
use crate::error::{OverlayError, Result};
use image::{ImageBuffer, Luma};
use nalgebra::{Matrix4, Perspective3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Single-channel metric depth texture for one eye.
pub type DepthTexture = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Which eye's depth and projection data to sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Eye {
    #[default]
    Left,
    Right,
}

impl Eye {
    pub fn index(self) -> usize {
        match self {
            Eye::Left => 0,
            Eye::Right => 1,
        }
    }
}

/// Access to the passthrough camera.
pub trait CameraAccess {
    /// The camera's pose right now, if the runtime exposes one.
    fn current_pose(&self) -> Option<Pose>;

    /// Dimensions of the image the detector runs on. `None` while the camera
    /// feed is not yet available.
    fn texture_size(&self) -> Option<(u32, u32)>;

    /// Converts a viewport point (0..1, origin bottom-left) into a world ray
    /// cast from the given camera pose.
    fn viewport_point_to_ray(&self, viewport: Vector2<f32>, pose: &Pose) -> Ray;
}

/// A symmetric pinhole camera.
#[derive(Debug, Clone, PartialEq)]
pub struct PinholeCamera {
    pub width: u32,
    pub height: u32,
    /// Vertical field of view in degrees.
    pub vertical_fov_degrees: f32,
    /// Latest head pose, if tracking is available.
    pub pose: Option<Pose>,
}

impl PinholeCamera {
    const NEAR_PLANE: f32 = 0.05;
    const FAR_PLANE: f32 = 100.0;

    pub fn new(width: u32, height: u32, vertical_fov_degrees: f32) -> Self {
        Self {
            width,
            height,
            vertical_fov_degrees,
            pose: None,
        }
    }

    pub fn with_pose(mut self, pose: Pose) -> Self {
        self.pose = Some(pose);
        self
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    fn half_height_tangent(&self) -> f32 {
        (self.vertical_fov_degrees.to_radians() * 0.5).tan()
    }

    /// View-projection matrix consistent with [`CameraAccess::viewport_point_to_ray`]:
    /// projecting a point on a viewport ray lands on the same viewport
    /// coordinates in NDC, and `w` is the distance along the camera's forward axis.
    pub fn view_projection(&self, pose: &Pose) -> Matrix4<f32> {
        let projection = Perspective3::new(
            self.aspect(),
            self.vertical_fov_degrees.to_radians(),
            Self::NEAR_PLANE,
            Self::FAR_PLANE,
        )
        .to_homogeneous();
        // The projection looks down -z; the camera frame looks down +z.
        let flip_z = Matrix4::new_nonuniform_scaling(&Vector3::new(1.0, 1.0, -1.0));
        let view = nalgebra::Isometry3::from_parts(pose.position.into(), pose.rotation)
            .inverse()
            .to_homogeneous();
        projection * flip_z * view
    }
}

impl CameraAccess for PinholeCamera {
    fn current_pose(&self) -> Option<Pose> {
        self.pose
    }

    fn texture_size(&self) -> Option<(u32, u32)> {
        if self.width == 0 || self.height == 0 {
            None
        } else {
            Some((self.width, self.height))
        }
    }

    fn viewport_point_to_ray(&self, viewport: Vector2<f32>, pose: &Pose) -> Ray {
        let tan_y = self.half_height_tangent();
        let tan_x = tan_y * self.aspect();
        let local = Vector3::new(
            (viewport.x * 2.0 - 1.0) * tan_x,
            (viewport.y * 2.0 - 1.0) * tan_y,
            1.0,
        );
        Ray::new(pose.position, pose.rotation * local)
    }
}

/// The latest snapshot delivered by the depth sensor.
#[derive(Debug, Clone)]
pub struct DepthFrame {
    /// Camera pose at capture time; rays are cast from here.
    pub pose: Pose,
    /// One texture per eye, indexed by [`Eye::index`].
    pub textures: Vec<DepthTexture>,
    /// One view-projection matrix per eye, indexed by [`Eye::index`].
    pub view_projections: Vec<Matrix4<f32>>,
}

impl DepthFrame {
    pub fn new(pose: Pose, textures: Vec<DepthTexture>, view_projections: Vec<Matrix4<f32>>) -> Self {
        Self {
            pose,
            textures,
            view_projections,
        }
    }

    /// Builds a frame from the sensor's flat layout: `eyes` square-or-not
    /// textures of `width * height` samples each, stored back to back.
    pub fn from_raw(
        pose: Pose,
        width: u32,
        height: u32,
        samples: Vec<f32>,
        view_projections: Vec<Matrix4<f32>>,
    ) -> Result<Self> {
        let per_eye = (width as usize) * (height as usize);
        if per_eye == 0 || samples.len() % per_eye != 0 {
            return Err(OverlayError::DepthFrame {
                width,
                height,
                expected: per_eye,
                actual: samples.len(),
            });
        }
        let textures = samples
            .chunks_exact(per_eye)
            .map(|eye| DepthTexture::from_raw(width, height, eye.to_vec()))
            .collect::<Option<Vec<_>>>()
            .ok_or(OverlayError::DepthFrame {
                width,
                height,
                expected: per_eye,
                actual: samples.len(),
            })?;
        Ok(Self::new(pose, textures, view_projections))
    }

    pub fn texture(&self, eye: Eye) -> Option<&DepthTexture> {
        self.textures.get(eye.index())
    }

    pub fn view_projection(&self, eye: Eye) -> Option<&Matrix4<f32>> {
        self.view_projections.get(eye.index())
    }

    /// Depth at a texel, clamped to the texture bounds. `None` if the eye has
    /// no texture.
    pub fn sample(&self, eye: Eye, uv: Vector2<f32>) -> Option<f32> {
        let texture = self.texture(eye)?;
        let (width, height) = texture.dimensions();
        if width == 0 || height == 0 {
            return None;
        }
        let sx = ((uv.x * width as f32) as i64).clamp(0, width as i64 - 1) as u32;
        let sy = ((uv.y * height as f32) as i64).clamp(0, height as i64 - 1) as u32;
        Some(texture.get_pixel(sx, sy).0[0])
    }
}
