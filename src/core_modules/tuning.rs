// THEORY:
// `CategoryTuning` is the operator-facing knob set for one category. It says
// where an overlay sits relative to the resolved anchor point, how it turns,
// how big it is relative to the asset's authored size, and how confident the
// detector must be before the category is tracked at all.
//
// One instance exists per tracked category for the life of the process. It is
// plain data: the geometry resolver reads it, configuration loading and
// runtime editing write it.
//
// A configuration section only names the fields it changes. Missing fields come
// from that category's own defaults, so `[tuning.human]` with a single
// `min_confidence` line still faces the camera.

use crate::core_modules::classifier::Category;
use nalgebra::Vector3;
use serde::{Deserialize, Deserializer, Serialize};

/// Minimum detector confidence accepted by default for every category.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.3;

/// Per-category placement, orientation and acceptance settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryTuning {
    /// Added in world space after the anchor point has been resolved.
    pub world_position_offset: Vector3<f32>,
    /// Added in the overlay's own frame, after its rotation is known.
    pub local_position_offset: Vector3<f32>,
    /// Euler degrees composed onto the base yaw, about the overlay's local axes.
    pub rotation_offset_degrees: Vector3<f32>,
    /// Multiplied with the asset's intrinsic scale.
    pub scale_multiplier: Vector3<f32>,
    /// Keep the overlay upright: only yaw is applied.
    pub lock_pitch_and_roll: bool,
    /// Turn the overlay along the camera-to-object direction.
    pub face_camera_yaw: bool,
    /// Turn the overlay along the camera's forward direction. Camera-forward
    /// is already what happens when `face_camera_yaw` is off, so this flag only
    /// records intent.
    pub use_camera_forward_yaw: bool,
    /// Detections below this confidence (0-1) are discarded.
    pub min_confidence: f32,
}

impl Default for CategoryTuning {
    fn default() -> Self {
        Self {
            world_position_offset: Vector3::zeros(),
            local_position_offset: Vector3::zeros(),
            rotation_offset_degrees: Vector3::zeros(),
            scale_multiplier: Vector3::repeat(1.0),
            lock_pitch_and_roll: true,
            face_camera_yaw: false,
            use_camera_forward_yaw: false,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

/// How the base yaw of an overlay is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YawStrategy {
    /// Along the line from the viewer to the overlay.
    FaceCamera,
    /// Along the viewer's forward direction.
    CameraForward,
}

impl CategoryTuning {
    /// The factory defaults for a category. Humans face the camera; everything
    /// else follows the camera's forward direction.
    pub fn defaults_for(category: Category) -> Self {
        match category {
            Category::Human => Self {
                face_camera_yaw: true,
                ..Self::default()
            },
            _ => Self::default(),
        }
    }

    /// Restores the factory defaults for `category` in place.
    pub fn reset_to_defaults(&mut self, category: Category) {
        *self = Self::defaults_for(category);
    }

    /// Facing the camera wins when both flags are set.
    pub fn yaw_strategy(&self) -> YawStrategy {
        if self.face_camera_yaw {
            YawStrategy::FaceCamera
        } else {
            YawStrategy::CameraForward
        }
    }

    pub fn accepts(&self, confidence: f32) -> bool {
        confidence >= self.min_confidence
    }
}

/// Fields present in one `[tuning.<category>]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CategoryTuningSection {
    world_position_offset: Option<Vector3<f32>>,
    local_position_offset: Option<Vector3<f32>>,
    rotation_offset_degrees: Option<Vector3<f32>>,
    scale_multiplier: Option<Vector3<f32>>,
    lock_pitch_and_roll: Option<bool>,
    face_camera_yaw: Option<bool>,
    use_camera_forward_yaw: Option<bool>,
    min_confidence: Option<f32>,
}

impl CategoryTuningSection {
    /// Layers the section over the defaults of `category`.
    fn over_defaults(self, category: Category) -> CategoryTuning {
        let base = CategoryTuning::defaults_for(category);
        CategoryTuning {
            world_position_offset: self.world_position_offset.unwrap_or(base.world_position_offset),
            local_position_offset: self.local_position_offset.unwrap_or(base.local_position_offset),
            rotation_offset_degrees: self.rotation_offset_degrees.unwrap_or(base.rotation_offset_degrees),
            scale_multiplier: self.scale_multiplier.unwrap_or(base.scale_multiplier),
            lock_pitch_and_roll: self.lock_pitch_and_roll.unwrap_or(base.lock_pitch_and_roll),
            face_camera_yaw: self.face_camera_yaw.unwrap_or(base.face_camera_yaw),
            use_camera_forward_yaw: self.use_camera_forward_yaw.unwrap_or(base.use_camera_forward_yaw),
            min_confidence: self.min_confidence.unwrap_or(base.min_confidence),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TuningTableSections {
    screen: CategoryTuningSection,
    book: CategoryTuningSection,
    human: CategoryTuningSection,
}

/// The fixed dispatch table from category to tuning.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TuningTable {
    pub screen: CategoryTuning,
    pub book: CategoryTuning,
    pub human: CategoryTuning,
}

impl Default for TuningTable {
    fn default() -> Self {
        Self {
            screen: CategoryTuning::defaults_for(Category::Screen),
            book: CategoryTuning::defaults_for(Category::Book),
            human: CategoryTuning::defaults_for(Category::Human),
        }
    }
}

impl<'de> Deserialize<'de> for TuningTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let sections = TuningTableSections::deserialize(deserializer)?;
        Ok(Self {
            screen: sections.screen.over_defaults(Category::Screen),
            book: sections.book.over_defaults(Category::Book),
            human: sections.human.over_defaults(Category::Human),
        })
    }
}

impl TuningTable {
    /// `None` for `Unknown`, which is never tracked.
    pub fn get(&self, category: Category) -> Option<&CategoryTuning> {
        match category {
            Category::Screen => Some(&self.screen),
            Category::Book => Some(&self.book),
            Category::Human => Some(&self.human),
            Category::Unknown => None,
        }
    }

    pub fn get_mut(&mut self, category: Category) -> Option<&mut CategoryTuning> {
        match category {
            Category::Screen => Some(&mut self.screen),
            Category::Book => Some(&mut self.book),
            Category::Human => Some(&mut self.human),
            Category::Unknown => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, &CategoryTuning)> {
        [
            (Category::Screen, &self.screen),
            (Category::Book, &self.book),
            (Category::Human, &self.human),
        ]
        .into_iter()
    }
}
