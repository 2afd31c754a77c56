// THEORY:
// The `pipeline` module is the top-level API of the overlay engine. It wires
// the stages together into the two entry points a host needs:
//
// - `on_detection_batch`, at detector cadence: classify, filter on confidence,
//   key, count, gate on persistence and resolve cadence, resolve world targets.
// - `tick`, at render cadence: drain the inbox, expire stale overlays, make sure
//   every resolved overlay is represented by the right asset, smooth, and push
//   transforms to the asset provider.
//
// Depth frames are cached as a single latest snapshot. Nothing here returns an
// error: missing camera data, missing depth and unbound assets all degrade to
// "skip this entity for now", and the reports say what was skipped.

use crate::core_modules::assets::AssetProvider;
use crate::core_modules::camera::{CameraAccess, DepthFrame};
use crate::core_modules::classifier::{Category, classify};
use crate::core_modules::geometry::{self, ResolveRequest};
use crate::core_modules::presenter::{self, PresentOutcome};
use crate::core_modules::smoother;
use crate::core_modules::tracker::{Observation, Tracker};
use crate::core_modules::tuning::CategoryTuning;
use crate::diagnostics::OverlayDiagnostics;
use crate::inbox::Inbox;
use log::{debug, info, trace};
use std::time::Duration;

// Re-export key data structures for the public API.
pub use crate::config::{DiagnosticsSettings, PipelineConfig, load_config};
pub use crate::core_modules::detection::detection::{BoundingBox, Detection, DetectionBatch};
pub use crate::core_modules::tracker::{OverlayId, TrackedOverlay};

/// Outcome of one detection batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    // --- Accepted detections per category ---
    pub screens: usize,
    pub books: usize,
    pub humans: usize,

    // --- Filtered out ---
    /// Labels that map to no known category.
    pub unknown: usize,
    pub below_confidence: usize,

    // --- Accepted detections by tracking outcome ---
    /// Matched an overlay that has not reached the persistence threshold.
    pub pending: usize,
    /// Resolved a fresh world target.
    pub resolved: usize,
    /// Confirmed but not due for a resolve; the previous target was kept.
    pub throttled: usize,
    /// Due for a resolve but no depth frame is available yet.
    pub resolve_skipped: usize,

    /// The camera feed size was unknown, so the whole batch was skipped.
    pub camera_unavailable: bool,
    /// Live overlays after the batch.
    pub overlays: usize,
}

impl BatchReport {
    pub fn accepted(&self) -> usize {
        self.screens + self.books + self.humans
    }
}

/// Outcome of one render tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Depth frames drained from the inbox, including superseded ones.
    pub depth_frames: usize,
    /// One report per batch drained from the inbox, in arrival order.
    pub batches: Vec<BatchReport>,
    pub expired: usize,
    pub spawned: usize,
    pub swapped: usize,
    /// Overlays whose asset variant is unbound or could not be instantiated.
    pub unavailable: usize,
    /// Overlays with an active instance after the tick.
    pub active: usize,
}

/// The main, top-level struct of the overlay engine.
pub struct OverlayPipeline<C: CameraAccess, A: AssetProvider> {
    config: PipelineConfig,
    camera: C,
    assets: A,
    tracker: Tracker,
    depth: Option<DepthFrame>,
    inbox: Option<Inbox>,
}

impl<C: CameraAccess, A: AssetProvider> OverlayPipeline<C, A> {
    pub fn new(config: PipelineConfig, camera: C, assets: A) -> Self {
        let tracker = Tracker::new(config.tracking.clone());
        Self {
            config,
            camera,
            assets,
            tracker,
            depth: None,
            inbox: None,
        }
    }

    /// Installs the receiving half of an inbox; it is drained on every tick.
    pub fn attach_inbox(&mut self, inbox: Inbox) {
        self.inbox = Some(inbox);
    }

    /// Replaces the cached depth snapshot.
    pub fn on_depth_frame(&mut self, frame: DepthFrame) {
        self.depth = Some(frame);
    }

    /// Processes one batch from the detector. `now` is the pipeline clock.
    pub fn on_detection_batch(&mut self, batch: &[Detection], now: Duration) -> BatchReport {
        let mut report = BatchReport::default();
        let Some(image_size) = self.camera.texture_size() else {
            trace!("camera feed size unknown, skipping batch of {}", batch.len());
            report.camera_unavailable = true;
            report.overlays = self.tracker.len();
            return report;
        };
        let viewer = self
            .camera
            .current_pose()
            .or_else(|| self.depth.as_ref().map(|frame| frame.pose));

        for detection in batch {
            let classification = classify(&detection.label);
            let Some(tuning) = self.config.tuning.get(classification.category) else {
                report.unknown += 1;
                continue;
            };
            if !tuning.accepts(classification.confidence) {
                report.below_confidence += 1;
                continue;
            }
            match classification.category {
                Category::Screen => report.screens += 1,
                Category::Book => report.books += 1,
                Category::Human => report.humans += 1,
                Category::Unknown => {}
            }

            let key = self
                .tracker
                .key_for(&detection.bbox, image_size, &classification.base_label);
            let observation = self.tracker.observe(
                key,
                classification.category,
                &detection.label,
                classification.confidence,
                now,
            );
            let id = match observation {
                Observation::Pending { .. } => {
                    report.pending += 1;
                    continue;
                }
                Observation::Confirmed { resolve_due: false, .. } => {
                    report.throttled += 1;
                    continue;
                }
                Observation::Confirmed { id, resolve_due: true } => id,
            };

            self.tracker.schedule_next_resolve(id, now);
            let (Some(frame), Some(viewer)) = (self.depth.as_ref(), viewer.as_ref()) else {
                trace!("no depth snapshot yet, resolve of '{}' deferred", detection.label);
                report.resolve_skipped += 1;
                continue;
            };

            let request = ResolveRequest {
                bbox: &detection.bbox,
                image_size,
                category: classification.category,
                tuning,
                frame,
                viewer,
            };
            let resolved = geometry::resolve(&self.camera, &request, &self.config.geometry);
            let distance = (resolved.position - viewer.position).norm();
            self.tracker.store_target(id, &resolved, distance);
            report.resolved += 1;

            if self.config.diagnostics.log_bbox_info {
                let (cx, cy) = detection.bbox.center();
                let (nx, ny) = detection.bbox.normalized_center(image_size.0, image_size.1);
                debug!(
                    "[bbox] {} center=({cx:.1}, {cy:.1})px norm=({nx:.3}, {ny:.3}) depth={:.2}m ({}) world=({:.2}, {:.2}, {:.2})",
                    detection.label,
                    resolved.depth,
                    if resolved.used_fallback_depth { "fallback" } else { "texture" },
                    resolved.position.x,
                    resolved.position.y,
                    resolved.position.z,
                );
            }
        }

        report.overlays = self.tracker.len();
        if self.config.diagnostics.log_label_counts {
            info!(
                "[labels] screens={} books={} humans={} overlays={}",
                report.screens, report.books, report.humans, report.overlays
            );
        }
        report
    }

    /// Advances the engine by one render frame. `dt` is the elapsed time since
    /// the previous tick in seconds.
    pub fn tick(&mut self, now: Duration, dt: f32) -> TickReport {
        let mut report = TickReport::default();

        if let Some(inbox) = self.inbox.as_mut() {
            let drained = inbox.drain();
            report.depth_frames = drained.depth_frames;
            if let Some(frame) = drained.depth {
                self.depth = Some(frame);
            }
            for batch in &drained.batches {
                let batch_report = self.on_detection_batch(batch, now);
                report.batches.push(batch_report);
            }
        }

        report.expired = self.tracker.expire(now, &mut self.assets);

        let viewer = self
            .camera
            .current_pose()
            .or_else(|| self.depth.as_ref().map(|frame| frame.pose));
        let Some(viewer) = viewer else {
            return report;
        };

        let log_timing = self.config.diagnostics.log_timing;
        for (_, overlay) in self.tracker.iter_mut() {
            let outcome = presenter::present(
                overlay,
                &viewer.position,
                &self.config.presentation,
                &mut self.assets,
                now,
                log_timing,
            );
            match outcome {
                PresentOutcome::Spawned(_) => report.spawned += 1,
                PresentOutcome::Swapped { .. } => report.swapped += 1,
                PresentOutcome::Unavailable(_) => report.unavailable += 1,
                PresentOutcome::Kept(_) | PresentOutcome::Unresolved => {}
            }

            if let (Some(target), Some(current)) = (overlay.target_transform(), overlay.current.as_mut()) {
                smoother::advance(current, &target, &self.config.smoothing, dt);
            }
            presenter::apply(overlay, &mut self.assets);

            if overlay.instance.is_some_and(|handle| self.assets.is_active(handle)) {
                report.active += 1;
            }
        }
        report
    }

    /// Snapshots of every live overlay.
    pub fn diagnostics(&self) -> Vec<OverlayDiagnostics> {
        self.tracker
            .iter()
            .map(|(_, overlay)| {
                let active = overlay.instance.is_some_and(|handle| self.assets.is_active(handle));
                OverlayDiagnostics::from_overlay(overlay, active)
            })
            .collect()
    }

    /// Live tuning of a category. `None` for `Unknown`.
    pub fn tuning_mut(&mut self, category: Category) -> Option<&mut CategoryTuning> {
        self.config.tuning.get_mut(category)
    }

    /// Restores the factory tuning of a category.
    pub fn reset_tuning(&mut self, category: Category) {
        if let Some(tuning) = self.config.tuning.get_mut(category) {
            tuning.reset_to_defaults(category);
        }
    }

    /// Releases every overlay and its asset instance.
    pub fn clear(&mut self) -> usize {
        self.tracker.clear(&mut self.assets)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn latest_depth(&self) -> Option<&DepthFrame> {
        self.depth.as_ref()
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut C {
        &mut self.camera
    }

    pub fn assets(&self) -> &A {
        &self.assets
    }

    pub fn assets_mut(&mut self) -> &mut A {
        &mut self.assets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::assets::InMemoryAssets;
    use crate::core_modules::camera::PinholeCamera;
    use crate::core_modules::spatial::Pose;

    fn pipeline() -> OverlayPipeline<PinholeCamera, InMemoryAssets> {
        OverlayPipeline::new(
            PipelineConfig::default(),
            PinholeCamera::new(640, 480, 60.0).with_pose(Pose::identity()),
            InMemoryAssets::new(),
        )
    }

    fn detection(label: &str) -> Detection {
        Detection::new(label, BoundingBox::new(100.0, 100.0, 200.0, 200.0))
    }

    #[test]
    fn unknown_and_weak_detections_are_filtered() {
        let mut pipeline = pipeline();
        let report = pipeline.on_detection_batch(
            &[detection("giraffe 0.99"), detection("tv 0.2"), detection("")],
            Duration::ZERO,
        );
        assert_eq!(report.unknown, 2);
        assert_eq!(report.below_confidence, 1);
        assert_eq!(report.accepted(), 0);
        assert!(pipeline.tracker().is_empty());
    }

    #[test]
    fn missing_depth_defers_the_resolve() {
        let mut pipeline = pipeline();
        let report = pipeline.on_detection_batch(&[detection("book 0.9")], Duration::ZERO);
        assert_eq!(report.books, 1);
        assert_eq!(report.resolve_skipped, 1);
        assert_eq!(report.overlays, 1);
        let (_, overlay) = pipeline.tracker().iter().next().unwrap();
        assert!(!overlay.has_resolved());
    }

    #[test]
    fn missing_camera_size_skips_the_batch() {
        let mut pipeline = OverlayPipeline::new(
            PipelineConfig::default(),
            PinholeCamera::new(0, 0, 60.0),
            InMemoryAssets::new(),
        );
        let report = pipeline.on_detection_batch(&[detection("book 0.9")], Duration::ZERO);
        assert!(report.camera_unavailable);
        assert!(pipeline.tracker().is_empty());
    }

    #[test]
    fn tuning_can_be_changed_and_reset_at_runtime() {
        let mut pipeline = pipeline();
        pipeline.tuning_mut(Category::Book).unwrap().min_confidence = 0.95;
        let report = pipeline.on_detection_batch(&[detection("book 0.9")], Duration::ZERO);
        assert_eq!(report.below_confidence, 1);

        pipeline.reset_tuning(Category::Book);
        assert_eq!(pipeline.config().tuning.book, CategoryTuning::defaults_for(Category::Book));
        assert!(pipeline.tuning_mut(Category::Unknown).is_none());
    }
}
