// THEORY:
// Read-only view of the tracker for observability layers (debug HUDs, logs,
// replay tools). Snapshots are plain serializable records detached from the
// live overlays, so a consumer can hold on to them, ship them over a channel or
// dump them as JSON without borrowing the pipeline.

use crate::core_modules::assets::AssetVariant;
use crate::core_modules::classifier::Category;
use crate::core_modules::tracker::TrackedOverlay;
use nalgebra::Vector3;
use serde::Serialize;

/// Diagnostic snapshot of one tracked overlay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayDiagnostics {
    /// Spatial key in `label_x_y` form.
    pub key: String,
    pub category: Category,
    /// Raw label of the most recent matching detection.
    pub label: String,
    pub confidence: f32,
    pub seen_count: u32,
    /// Seconds on the pipeline clock.
    pub first_seen: f32,
    pub last_seen: f32,
    /// Seconds from first sighting to spawn, once spawned.
    pub time_to_spawn: Option<f32>,
    /// Viewer-to-target distance in metres at the last presentation.
    pub distance: f32,
    pub variant: Option<AssetVariant>,
    pub active: bool,
    pub used_fallback_depth: bool,
    pub target_position: Option<Vector3<f32>>,
}

impl OverlayDiagnostics {
    pub fn from_overlay(overlay: &TrackedOverlay, active: bool) -> Self {
        Self {
            key: overlay.key.to_string(),
            category: overlay.category,
            label: overlay.last_label.clone(),
            confidence: overlay.last_confidence,
            seen_count: overlay.seen_count,
            first_seen: overlay.first_seen.as_secs_f32(),
            last_seen: overlay.last_seen.as_secs_f32(),
            time_to_spawn: overlay.time_to_spawn().map(|d| d.as_secs_f32()),
            distance: overlay.last_distance,
            variant: overlay.variant,
            active,
            used_fallback_depth: overlay.used_fallback_depth,
            target_position: overlay.target.map(|t| t.position),
        }
    }

    /// Whether a screen is currently shown with its near variant.
    pub fn is_near(&self) -> bool {
        self.variant == Some(AssetVariant::ScreenNear)
    }
}
