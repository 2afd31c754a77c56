// THEORY:
// The `geometry` module is the spatial half of the engine. It lifts a 2D box
// back into the 3D world: pick a representative screen point, cast a ray from
// the camera pose captured with the latest depth frame, find out how far along
// that ray the real surface is, and finally dress the point up with the
// category's offsets, orientation rule and scale.
//
// Key principles:
// 1.  **Pure function**: `resolve` reads its inputs and nothing else. Identical
//     inputs give bit-identical outputs, which keeps the tracker's throttling
//     observable and the whole stage trivially testable.
// 2.  **Graceful depth**: the depth sensor is treated as advisory. A missing
//     projection, a point behind the camera or an implausible sample all fall
//     back to a fixed assumed distance. The fallback is flagged, never raised.
// 3.  **Order of adjustments**: world offsets first, then orientation, then the
//     local offset through that orientation, then the optional size estimate.
//     Each step sees the result of the previous one.

use crate::core_modules::camera::{CameraAccess, DepthFrame, Eye};
use crate::core_modules::classifier::Category;
use crate::core_modules::detection::detection::BoundingBox;
use crate::core_modules::spatial::{Pose, Ray, euler_degrees, look_rotation, yaw_of, yaw_rotation};
use crate::core_modules::tuning::{CategoryTuning, YawStrategy};
use nalgebra::{UnitQuaternion, Vector2, Vector3, Vector4};
use serde::{Deserialize, Serialize};

/// Depth samples at or beyond this distance (metres) are considered unreliable.
pub const MAX_RELIABLE_DEPTH: f32 = 20.0;
/// Bounds of the bbox-derived scale factor.
pub const MIN_DERIVED_SCALE: f32 = 0.3;
pub const MAX_DERIVED_SCALE: f32 = 3.0;
const ASSUMED_VERTICAL_FOV_DEGREES: f32 = 60.0;
const REFERENCE_OBJECT_HEIGHT: f32 = 0.3;

/// Global settings of the geometry stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometrySettings {
    /// Distance in metres used whenever the depth texture cannot be trusted.
    pub fallback_depth: f32,
    /// Estimate overlay size from the box height and the resolved distance.
    pub derive_scale_from_bbox: bool,
    /// Eye whose depth texture and projection are sampled.
    pub eye: Eye,
    /// Head point for humans: fraction of the image height above the box top.
    pub head_screen_offset: f32,
    /// Head point for humans: metres added straight up after depth resolution.
    pub head_world_up_offset: f32,
}

impl Default for GeometrySettings {
    fn default() -> Self {
        Self {
            fallback_depth: 1.8,
            derive_scale_from_bbox: false,
            eye: Eye::Left,
            head_screen_offset: 0.02,
            head_world_up_offset: 0.08,
        }
    }
}

/// Everything `resolve` needs to know about one detection.
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub bbox: &'a BoundingBox,
    /// Source image dimensions in pixels.
    pub image_size: (u32, u32),
    pub category: Category,
    pub tuning: &'a CategoryTuning,
    /// Latest depth snapshot; its pose is the ray origin.
    pub frame: &'a DepthFrame,
    /// Where the user is looking from right now.
    pub viewer: &'a Pose,
}

/// A world target for an overlay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedPose {
    pub position: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub scale_multiplier: Vector3<f32>,
    /// Distance along the view ray that was used, sampled or fallback.
    pub depth: f32,
    /// True when `depth` is the configured fallback rather than a sensor sample.
    pub used_fallback_depth: bool,
}

/// The representative viewport point (0..1, origin bottom-left) of a box.
///
/// Screens and books use the box center. Humans use the horizontal center and
/// a point above the top edge, approximating where a head sits.
pub fn anchor_viewport(
    bbox: &BoundingBox,
    image_size: (u32, u32),
    category: Category,
    settings: &GeometrySettings,
) -> Vector2<f32> {
    let (width, height) = (image_size.0 as f32, image_size.1 as f32);
    let (px, py) = match category {
        Category::Human => (
            (bbox.x_min + bbox.x_max) * 0.5,
            bbox.y_min - settings.head_screen_offset * height,
        ),
        _ => bbox.center(),
    };
    Vector2::new(px / width, 1.0 - py / height)
}

/// Finds the distance along `ray` to the observed surface.
///
/// Returns the distance and whether it is the fallback.
pub fn depth_along_ray(ray: &Ray, frame: &DepthFrame, settings: &GeometrySettings) -> (f32, bool) {
    let fallback = (settings.fallback_depth, true);
    let Some(view_projection) = frame.view_projection(settings.eye) else {
        return fallback;
    };

    let probe = ray.point_at(1.0);
    let clip = view_projection * Vector4::new(probe.x, probe.y, probe.z, 1.0);
    if !clip.iter().all(|c| c.is_finite()) || clip.w <= 0.0 {
        return fallback;
    }

    let uv = Vector2::new(clip.x / clip.w, clip.y / clip.w) * 0.5 + Vector2::repeat(0.5);
    match frame.sample(settings.eye, uv) {
        Some(sampled) if is_reliable_depth(sampled) => (sampled, false),
        _ => fallback,
    }
}

/// Positive, finite and closer than [`MAX_RELIABLE_DEPTH`].
pub fn is_reliable_depth(sample: f32) -> bool {
    sample.is_finite() && sample > 0.0 && sample < MAX_RELIABLE_DEPTH
}

/// Base orientation of an overlay at `position` seen from `viewer`.
pub fn base_rotation(position: &Vector3<f32>, viewer: &Pose, tuning: &CategoryTuning) -> UnitQuaternion<f32> {
    let direction = match tuning.yaw_strategy() {
        YawStrategy::FaceCamera => position - viewer.position,
        YawStrategy::CameraForward => viewer.forward(),
    };
    if tuning.lock_pitch_and_roll {
        yaw_rotation(yaw_of(&direction))
    } else {
        look_rotation(&direction)
    }
}

/// Scale factor from the apparent box height at a given distance, clamped to
/// [`MIN_DERIVED_SCALE`, `MAX_DERIVED_SCALE`].
pub fn derived_scale(normalized_bbox_height: f32, distance: f32) -> f32 {
    let half_fov = (ASSUMED_VERTICAL_FOV_DEGREES * 0.5).to_radians();
    let approx_height = half_fov.tan() * 2.0 * distance * normalized_bbox_height;
    let scale = approx_height / REFERENCE_OBJECT_HEIGHT;
    if scale.is_nan() {
        return MIN_DERIVED_SCALE;
    }
    scale.clamp(MIN_DERIVED_SCALE, MAX_DERIVED_SCALE)
}

/// Resolves the world target of one detection.
pub fn resolve<C: CameraAccess + ?Sized>(
    camera: &C,
    request: &ResolveRequest<'_>,
    settings: &GeometrySettings,
) -> ResolvedPose {
    let tuning = request.tuning;
    let viewport = anchor_viewport(request.bbox, request.image_size, request.category, settings);
    let ray = camera.viewport_point_to_ray(viewport, &request.frame.pose);

    let (depth, used_fallback_depth) = depth_along_ray(&ray, request.frame, settings);
    let mut position = ray.point_at(depth);

    if request.category == Category::Human {
        position += Vector3::y() * settings.head_world_up_offset;
    }
    position += tuning.world_position_offset;

    let rotation = base_rotation(&position, request.viewer, tuning)
        * euler_degrees(&tuning.rotation_offset_degrees);
    position += rotation * tuning.local_position_offset;

    let mut scale_multiplier = tuning.scale_multiplier;
    if settings.derive_scale_from_bbox {
        let normalized_height = request.bbox.height() / request.image_size.1 as f32;
        let distance = (request.viewer.position - position).norm();
        scale_multiplier *= derived_scale(normalized_height, distance);
    }

    ResolvedPose {
        position,
        rotation,
        scale_multiplier,
        depth,
        used_fallback_depth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::camera::{DepthTexture, PinholeCamera};
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_2;

    const WIDTH: u32 = 640;
    const HEIGHT: u32 = 480;

    fn camera() -> PinholeCamera {
        PinholeCamera::new(WIDTH, HEIGHT, 60.0)
    }

    fn frame_with_depth(pose: Pose, depth: f32) -> DepthFrame {
        let cam = camera();
        let texture = DepthTexture::from_pixel(8, 8, image::Luma([depth]));
        DepthFrame::new(pose, vec![texture.clone(), texture], vec![cam.view_projection(&pose); 2])
    }

    fn centered_box() -> BoundingBox {
        BoundingBox::new(270.0, 190.0, 370.0, 290.0)
    }

    fn resolve_with(
        category: Category,
        tuning: &CategoryTuning,
        frame: &DepthFrame,
        viewer: &Pose,
        settings: &GeometrySettings,
    ) -> ResolvedPose {
        let bbox = centered_box();
        let request = ResolveRequest {
            bbox: &bbox,
            image_size: (WIDTH, HEIGHT),
            category,
            tuning,
            frame,
            viewer,
        };
        resolve(&camera(), &request, settings)
    }

    #[test]
    fn sampled_depth_places_point_along_the_ray() {
        let pose = Pose::identity();
        let frame = frame_with_depth(pose, 2.5);
        let resolved = resolve_with(
            Category::Book,
            &CategoryTuning::default(),
            &frame,
            &pose,
            &GeometrySettings::default(),
        );
        assert!(!resolved.used_fallback_depth);
        assert_eq!(resolved.depth, 2.5);
        assert_relative_eq!(resolved.position, Vector3::new(0.0, 0.0, 2.5), epsilon = 1e-4);
    }

    #[test]
    fn unreliable_samples_use_the_fallback_exactly() {
        let pose = Pose::identity();
        let settings = GeometrySettings::default();
        for bad in [0.0, -1.0, 20.0, 35.0, f32::INFINITY, f32::NEG_INFINITY, f32::NAN] {
            let frame = frame_with_depth(pose, bad);
            let resolved = resolve_with(Category::Book, &CategoryTuning::default(), &frame, &pose, &settings);
            assert!(resolved.used_fallback_depth, "sample {bad}");
            assert_eq!(resolved.depth, settings.fallback_depth);
        }
    }

    #[test]
    fn missing_projection_or_behind_camera_falls_back() {
        let pose = Pose::identity();
        let settings = GeometrySettings::default();

        let mut no_projection = frame_with_depth(pose, 2.0);
        no_projection.view_projections.clear();
        let resolved = resolve_with(Category::Book, &CategoryTuning::default(), &no_projection, &pose, &settings);
        assert!(resolved.used_fallback_depth);

        // A projection for a camera facing the other way sees the probe behind it.
        let mut behind = frame_with_depth(pose, 2.0);
        let turned = Pose::new(Vector3::zeros(), yaw_rotation(std::f32::consts::PI));
        behind.view_projections = vec![camera().view_projection(&turned); 2];
        let resolved = resolve_with(Category::Book, &CategoryTuning::default(), &behind, &pose, &settings);
        assert!(resolved.used_fallback_depth);
        assert_eq!(resolved.depth, settings.fallback_depth);
    }

    #[test]
    fn non_finite_projection_falls_back() {
        let pose = Pose::identity();
        let settings = GeometrySettings::default();
        let mut frame = frame_with_depth(pose, 2.0);
        for vp in frame.view_projections.iter_mut() {
            vp[(3, 2)] = f32::NAN;
        }
        let resolved = resolve_with(Category::Book, &CategoryTuning::default(), &frame, &pose, &settings);
        assert!(resolved.used_fallback_depth);
        assert_eq!(resolved.depth, settings.fallback_depth);
    }

    #[test]
    fn missing_eye_texture_falls_back() {
        let pose = Pose::identity();
        let mut frame = frame_with_depth(pose, 2.0);
        frame.textures.truncate(1);
        let settings = GeometrySettings {
            eye: Eye::Right,
            ..GeometrySettings::default()
        };
        let resolved = resolve_with(Category::Screen, &CategoryTuning::default(), &frame, &pose, &settings);
        assert!(resolved.used_fallback_depth);
    }

    #[test]
    fn human_anchor_sits_above_the_box() {
        let settings = GeometrySettings::default();
        let bbox = centered_box();
        let body = anchor_viewport(&bbox, (WIDTH, HEIGHT), Category::Book, &settings);
        let head = anchor_viewport(&bbox, (WIDTH, HEIGHT), Category::Human, &settings);
        assert_relative_eq!(body.x, head.x);
        let expected = 1.0 - (bbox.y_min - 0.02 * HEIGHT as f32) / HEIGHT as f32;
        assert_relative_eq!(head.y, expected, epsilon = 1e-6);
        assert!(head.y > body.y);
    }

    #[test]
    fn human_gets_world_up_offset() {
        let pose = Pose::identity();
        let frame = frame_with_depth(pose, 2.0);
        let settings = GeometrySettings {
            head_screen_offset: 0.0,
            ..GeometrySettings::default()
        };
        let tuning = CategoryTuning::default();
        let human = resolve_with(Category::Human, &tuning, &frame, &pose, &settings);
        let book = resolve_with(Category::Book, &tuning, &frame, &pose, &settings);
        // Same depth sample; the head point additionally moves up.
        assert_eq!(human.depth, book.depth);
        assert!(human.position.y > book.position.y);
    }

    #[test]
    fn camera_forward_and_face_camera_are_distinct() {
        // Viewer looks straight ahead but stands to the side of the object.
        let pose = Pose::identity();
        let frame = frame_with_depth(pose, 2.0);
        let viewer = Pose::new(Vector3::new(-2.0, 0.0, 2.0), UnitQuaternion::identity());
        let settings = GeometrySettings::default();

        let forward = resolve_with(Category::Book, &CategoryTuning::default(), &frame, &viewer, &settings);
        let facing = CategoryTuning {
            face_camera_yaw: true,
            ..CategoryTuning::default()
        };
        let faced = resolve_with(Category::Book, &facing, &frame, &viewer, &settings);

        assert_relative_eq!(forward.rotation * Vector3::z(), Vector3::z(), epsilon = 1e-5);
        // From viewer (-2, 0, 2) to object (0, 0, 2): +x.
        assert_relative_eq!(faced.rotation * Vector3::z(), Vector3::x(), epsilon = 1e-4);
    }

    #[test]
    fn locked_rotation_has_no_pitch_or_roll() {
        let pose = Pose::identity();
        let frame = frame_with_depth(pose, 2.0);
        let viewer = Pose::new(Vector3::zeros(), UnitQuaternion::from_euler_angles(0.3, 0.6, 0.2));
        let locked = resolve_with(Category::Book, &CategoryTuning::default(), &frame, &viewer, &GeometrySettings::default());
        let up = locked.rotation * Vector3::y();
        assert_relative_eq!(up, Vector3::y(), epsilon = 1e-5);

        let free = CategoryTuning {
            lock_pitch_and_roll: false,
            ..CategoryTuning::default()
        };
        let unlocked = resolve_with(Category::Book, &free, &frame, &viewer, &GeometrySettings::default());
        assert_relative_eq!(unlocked.rotation * Vector3::z(), viewer.forward(), epsilon = 1e-4);
    }

    #[test]
    fn local_offset_follows_the_overlay_orientation() {
        let pose = Pose::identity();
        let frame = frame_with_depth(pose, 2.0);
        let tuning = CategoryTuning {
            rotation_offset_degrees: Vector3::new(0.0, 90.0, 0.0),
            local_position_offset: Vector3::new(0.0, 0.0, 1.0),
            world_position_offset: Vector3::new(0.0, 0.5, 0.0),
            ..CategoryTuning::default()
        };
        let resolved = resolve_with(Category::Book, &tuning, &frame, &pose, &GeometrySettings::default());
        // Facing +x after the offset, so local +z moves the point along world +x.
        assert_relative_eq!(resolved.position, Vector3::new(1.0, 0.5, 2.0), epsilon = 1e-4);
        assert_relative_eq!(resolved.rotation.angle(), FRAC_PI_2, epsilon = 1e-5);
    }

    #[test]
    fn derived_scale_is_clamped() {
        for (height, distance) in [(0.0, 1.0), (1.0, 100.0), (0.2, 1.5), (0.01, 0.1), (f32::NAN, 1.0)] {
            let scale = derived_scale(height, distance);
            assert!((MIN_DERIVED_SCALE..=MAX_DERIVED_SCALE).contains(&scale), "{height} {distance} -> {scale}");
        }
    }

    #[test]
    fn derived_scale_multiplies_tuning_scale() {
        let pose = Pose::identity();
        let frame = frame_with_depth(pose, 2.0);
        let settings = GeometrySettings {
            derive_scale_from_bbox: true,
            ..GeometrySettings::default()
        };
        let tuning = CategoryTuning {
            scale_multiplier: Vector3::new(2.0, 1.0, 1.0),
            ..CategoryTuning::default()
        };
        let resolved = resolve_with(Category::Book, &tuning, &frame, &pose, &settings);
        let expected = derived_scale(100.0 / HEIGHT as f32, resolved.position.norm());
        assert_relative_eq!(resolved.scale_multiplier, Vector3::new(2.0, 1.0, 1.0) * expected, epsilon = 1e-5);
    }

    #[test]
    fn resolution_is_deterministic() {
        let pose = Pose::new(Vector3::new(0.1, 1.6, 0.0), yaw_rotation(0.4));
        let frame = frame_with_depth(pose, 3.0);
        let tuning = CategoryTuning::defaults_for(Category::Human);
        let settings = GeometrySettings {
            derive_scale_from_bbox: true,
            ..GeometrySettings::default()
        };
        let a = resolve_with(Category::Human, &tuning, &frame, &pose, &settings);
        let b = resolve_with(Category::Human, &tuning, &frame, &pose, &settings);
        assert_eq!(a, b);
    }
}
