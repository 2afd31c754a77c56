// THEORY:
// `PipelineConfig` gathers every knob of the engine in one serde structure so
// it can be written by hand as TOML, built in code with struct update syntax, or
// mixed: every section and every field falls back to its default when absent.
//
// Loading is two-phase. Parsing only checks shape; `validate` then enforces the
// ranges the stages rely on (a resolve rate of zero would mean "never", a
// quantization step of zero would divide by zero, and so on). A config that
// reached the pipeline through `load_config` is always valid.

use crate::core_modules::geometry::GeometrySettings;
use crate::core_modules::presenter::PresentationSettings;
use crate::core_modules::smoother::SmoothingRates;
use crate::core_modules::tracker::{MIN_RESOLVE_HZ, TrackingSettings};
use crate::core_modules::tuning::TuningTable;
use crate::error::{OverlayError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const MIN_SMOOTHING_RATE: f32 = 0.1;
const QUANTIZE_STEP_RANGE: std::ops::RangeInclusive<f32> = 0.01..=0.2;
const HEAD_SCREEN_OFFSET_RANGE: std::ops::RangeInclusive<f32> = -0.2..=0.2;
const HEAD_WORLD_UP_OFFSET_RANGE: std::ops::RangeInclusive<f32> = 0.0..=0.3;

/// Optional log output, off by default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsSettings {
    /// Log every resolve: label, box center, depth source and world position.
    pub log_bbox_info: bool,
    /// Log per-category counts for every detection batch.
    pub log_label_counts: bool,
    /// Log the delay between first sighting and spawn.
    pub log_timing: bool,
}

/// Configuration for the `OverlayPipeline`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tracking: TrackingSettings,
    pub smoothing: SmoothingRates,
    pub geometry: GeometrySettings,
    pub presentation: PresentationSettings,
    pub tuning: TuningTable,
    pub diagnostics: DiagnosticsSettings,
}

impl PipelineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let tracking = &self.tracking;
        if tracking.persist_frames < 1 {
            return Err(invalid("tracking.persist_frames must be at least 1"));
        }
        ensure(tracking.grace_seconds >= 0.0, "tracking.grace_seconds must be >= 0")?;
        ensure(
            tracking.resolve_hz >= MIN_RESOLVE_HZ,
            "tracking.resolve_hz must be >= 0.5",
        )?;
        ensure(
            QUANTIZE_STEP_RANGE.contains(&tracking.bbox_quantize_step),
            "tracking.bbox_quantize_step must be within 0.01..=0.2",
        )?;

        ensure(
            self.smoothing.position_rate >= MIN_SMOOTHING_RATE,
            "smoothing.position_rate must be >= 0.1",
        )?;
        ensure(
            self.smoothing.rotation_rate >= MIN_SMOOTHING_RATE,
            "smoothing.rotation_rate must be >= 0.1",
        )?;

        let geometry = &self.geometry;
        ensure(
            geometry.fallback_depth > 0.0 && geometry.fallback_depth.is_finite(),
            "geometry.fallback_depth must be a positive distance",
        )?;
        ensure(
            HEAD_SCREEN_OFFSET_RANGE.contains(&geometry.head_screen_offset),
            "geometry.head_screen_offset must be within -0.2..=0.2",
        )?;
        ensure(
            HEAD_WORLD_UP_OFFSET_RANGE.contains(&geometry.head_world_up_offset),
            "geometry.head_world_up_offset must be within 0..=0.3",
        )?;

        ensure(
            self.presentation.near_threshold >= 0.0,
            "presentation.near_threshold must be >= 0",
        )?;

        for (category, tuning) in self.tuning.iter() {
            if !(0.0..=1.0).contains(&tuning.min_confidence) {
                return Err(invalid(format!(
                    "tuning.{category}.min_confidence must be within 0..=1"
                )));
            }
            let vectors = [
                tuning.world_position_offset,
                tuning.local_position_offset,
                tuning.rotation_offset_degrees,
                tuning.scale_multiplier,
            ];
            if vectors.iter().any(|v| v.iter().any(|c| !c.is_finite())) {
                return Err(invalid(format!("tuning.{category} contains a non-finite value")));
            }
        }
        Ok(())
    }
}

/// Reads, parses and validates a TOML configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<PipelineConfig> {
    let text = fs::read_to_string(path.as_ref())?;
    PipelineConfig::from_toml_str(&text)
}

fn invalid(message: impl Into<String>) -> OverlayError {
    OverlayError::Config(message.into())
}

// NaN fails every comparison, so it is rejected along with out-of-range values.
fn ensure(condition: bool, message: &str) -> Result<()> {
    if condition { Ok(()) } else { Err(invalid(message)) }
}
