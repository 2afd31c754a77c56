// THEORY:
// The `tracker` module gives the engine object permanence. Detectors report a
// fresh, anonymous list of boxes every frame; the tracker turns that stream into
// a set of persistent `TrackedOverlay`s, each of which survives jitter, brief
// dropouts and the gap between detector and render cadence.
//
// Key architectural principles:
// 1.  **Spatial keys instead of matching**: identity is a coarse key made of the
//     base label and the box center quantized on a grid of normalized image
//     coordinates. Two boxes of the same label landing in the same cell are the
//     same object. There is no assignment problem to solve and at most one
//     overlay can exist per key.
// 2.  **Hysteresis**: every match bumps a counter, but an overlay only becomes
//     eligible for resolution and display once the counter reaches the
//     persistence threshold. Single-frame false positives never spawn anything.
// 3.  **Resolve cadence**: world-pose resolution is expensive and noisy, so it is
//     rate-limited per overlay. Between resolves the previous target is kept.
//     This is also the engine's only backpressure mechanism.
// 4.  **Grace period**: overlays are not dropped on the first missed frame.
//     They expire once they have gone unseen for the grace duration, and their
//     asset instance is released at that point.
// 5.  **Dense table**: overlays live in a slot vector with a free list, indexed
//     by key through a hash map. Handles (`OverlayId`) stay stable for the life
//     of an overlay and slots are recycled without reallocating.

use crate::core_modules::assets::{AssetHandle, AssetProvider, AssetVariant};
use crate::core_modules::classifier::Category;
use crate::core_modules::detection::detection::BoundingBox;
use crate::core_modules::geometry::ResolvedPose;
use crate::core_modules::spatial::Transform;
use log::debug;
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Lowest resolve rate honoured, in Hz.
pub const MIN_RESOLVE_HZ: f32 = 0.5;

/// Global settings of the tracking stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    /// Matches required before an overlay is resolved and shown (1 = immediate).
    pub persist_frames: u32,
    /// Seconds an overlay survives without a matching detection.
    pub grace_seconds: f32,
    /// How often, per overlay, the world pose is re-resolved.
    pub resolve_hz: f32,
    /// Grid step, in normalized image units, used to build spatial keys.
    pub bbox_quantize_step: f32,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            persist_frames: 1,
            grace_seconds: 0.5,
            resolve_hz: 10.0,
            bbox_quantize_step: 0.05,
        }
    }
}

impl TrackingSettings {
    pub fn resolve_interval(&self) -> Duration {
        Duration::try_from_secs_f32(1.0 / self.resolve_hz.max(MIN_RESOLVE_HZ)).unwrap_or(Duration::ZERO)
    }

    /// Grace period as a duration. Values too large for `Duration`, including
    /// infinity, saturate to `Duration::MAX`; negative or NaN values give zero.
    pub fn grace(&self) -> Duration {
        match Duration::try_from_secs_f32(self.grace_seconds) {
            Ok(grace) => grace,
            Err(_) if self.grace_seconds > 0.0 => Duration::MAX,
            Err(_) => Duration::ZERO,
        }
    }
}

/// Coarse identity of a detection: base label plus quantized normalized center.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SpatialKey {
    pub label: String,
    pub cell_x: i32,
    pub cell_y: i32,
}

impl SpatialKey {
    pub fn new(
        bbox: &BoundingBox,
        image_size: (u32, u32),
        base_label: &str,
        quantize_step: f32,
    ) -> Self {
        let (nx, ny) = bbox.normalized_center(image_size.0, image_size.1);
        Self {
            label: base_label.to_string(),
            cell_x: (nx / quantize_step).round() as i32,
            cell_y: (ny / quantize_step).round() as i32,
        }
    }
}

impl fmt::Display for SpatialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.label, self.cell_x, self.cell_y)
    }
}

/// Stable handle to a live overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OverlayId(usize);

/// Latest resolved world target of an overlay, before smoothing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetPose {
    pub position: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub scale_multiplier: Vector3<f32>,
}

/// One physical object as seen through the detector over time.
#[derive(Debug, Clone)]
pub struct TrackedOverlay {
    // --- Identity ---
    pub key: SpatialKey,
    pub category: Category,

    // --- Lifecycle ---
    /// When the key was first matched.
    pub first_seen: Duration,
    /// When the key was last matched.
    pub last_seen: Duration,
    /// Matches since creation, counted before any gating.
    pub seen_count: u32,
    /// When the current asset instance was created.
    pub spawn_time: Option<Duration>,
    /// Earliest time the world pose may be resolved again.
    pub next_resolve: Duration,

    // --- Target ---
    pub target: Option<TargetPose>,

    // --- Render state ---
    /// Asset instance owned by this overlay.
    pub instance: Option<AssetHandle>,
    pub variant: Option<AssetVariant>,
    /// Scale the instance was authored with; the smoothing baseline.
    pub intrinsic_scale: Vector3<f32>,
    /// Smoothed transform currently displayed.
    pub current: Option<Transform>,

    // --- Diagnostics ---
    pub last_label: String,
    pub last_confidence: f32,
    pub last_distance: f32,
    pub used_fallback_depth: bool,
}

impl TrackedOverlay {
    fn new(key: SpatialKey, category: Category, now: Duration) -> Self {
        Self {
            key,
            category,
            first_seen: now,
            last_seen: now,
            seen_count: 0,
            spawn_time: None,
            next_resolve: now,
            target: None,
            instance: None,
            variant: None,
            intrinsic_scale: Vector3::repeat(1.0),
            current: None,
            last_label: String::new(),
            last_confidence: 0.0,
            last_distance: 0.0,
            used_fallback_depth: false,
        }
    }

    pub fn has_resolved(&self) -> bool {
        self.target.is_some()
    }

    /// Never-resolved overlays are always due.
    pub fn resolve_due(&self, now: Duration) -> bool {
        !self.has_resolved() || now >= self.next_resolve
    }

    /// The transform the smoother is heading for: target pose with the intrinsic
    /// scale multiplied component-wise by the target multiplier.
    pub fn target_transform(&self) -> Option<Transform> {
        self.target.map(|target| {
            Transform::new(
                target.position,
                target.rotation,
                self.intrinsic_scale.component_mul(&target.scale_multiplier),
            )
        })
    }

    /// Time from the first sighting to the current instance being spawned.
    pub fn time_to_spawn(&self) -> Option<Duration> {
        self.spawn_time
            .map(|spawn| spawn.saturating_sub(self.first_seen))
    }
}

/// Outcome of matching one accepted detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Below the persistence threshold: counted, nothing else happens yet.
    Pending { id: OverlayId, seen_count: u32 },
    /// Eligible for display. `resolve_due` says whether the pose may be refreshed.
    Confirmed { id: OverlayId, resolve_due: bool },
}

/// Owner of every live overlay.
pub struct Tracker {
    settings: TrackingSettings,
    slots: Vec<Option<TrackedOverlay>>,
    free_slots: Vec<usize>,
    index: HashMap<SpatialKey, OverlayId>,
}

impl Tracker {
    pub fn new(settings: TrackingSettings) -> Self {
        Self {
            settings,
            slots: Vec::new(),
            free_slots: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &TrackingSettings {
        &self.settings
    }

    /// The key a detection maps to under the current quantization step.
    pub fn key_for(&self, bbox: &BoundingBox, image_size: (u32, u32), base_label: &str) -> SpatialKey {
        SpatialKey::new(bbox, image_size, base_label, self.settings.bbox_quantize_step)
    }

    /// Records a match for `key`, creating the overlay on first sight.
    pub fn observe(
        &mut self,
        key: SpatialKey,
        category: Category,
        raw_label: &str,
        confidence: f32,
        now: Duration,
    ) -> Observation {
        let id = match self.index.get(&key) {
            Some(id) => *id,
            None => self.insert(TrackedOverlay::new(key, category, now)),
        };
        let persist_frames = self.settings.persist_frames.max(1);
        let Some(overlay) = self.get_mut(id) else {
            return Observation::Pending { id, seen_count: 0 };
        };

        overlay.last_seen = now;
        overlay.seen_count = overlay.seen_count.saturating_add(1);
        overlay.last_label.clear();
        overlay.last_label.push_str(raw_label);
        overlay.last_confidence = confidence;
        overlay.category = category;

        if overlay.seen_count < persist_frames {
            Observation::Pending {
                id,
                seen_count: overlay.seen_count,
            }
        } else {
            Observation::Confirmed {
                id,
                resolve_due: overlay.resolve_due(now),
            }
        }
    }

    /// Pushes the next allowed resolve one interval past `now`.
    pub fn schedule_next_resolve(&mut self, id: OverlayId, now: Duration) {
        let interval = self.settings.resolve_interval();
        if let Some(overlay) = self.get_mut(id) {
            overlay.next_resolve = now + interval;
        }
    }

    /// Stores a freshly resolved target together with its diagnostics.
    pub fn store_target(&mut self, id: OverlayId, resolved: &ResolvedPose, distance: f32) {
        if let Some(overlay) = self.get_mut(id) {
            overlay.target = Some(TargetPose {
                position: resolved.position,
                rotation: resolved.rotation,
                scale_multiplier: resolved.scale_multiplier,
            });
            overlay.last_distance = distance;
            overlay.used_fallback_depth = resolved.used_fallback_depth;
        }
    }

    /// Removes every overlay unseen for at least the grace period, deactivating
    /// and releasing its asset instance. Returns how many were removed.
    pub fn expire<A: AssetProvider + ?Sized>(&mut self, now: Duration, assets: &mut A) -> usize {
        let grace = self.settings.grace();
        let expired: Vec<OverlayId> = self
            .iter()
            .filter(|(_, overlay)| now.saturating_sub(overlay.last_seen) >= grace)
            .map(|(id, _)| id)
            .collect();

        for id in &expired {
            if let Some(overlay) = self.remove(*id) {
                if let Some(handle) = overlay.instance {
                    assets.set_active(handle, false);
                    assets.release(handle);
                }
                debug!(
                    "expired overlay {} ({}) after {:.2}s unseen",
                    overlay.key,
                    overlay.category,
                    now.saturating_sub(overlay.last_seen).as_secs_f32()
                );
            }
        }
        expired.len()
    }

    /// Removes every overlay, releasing their asset instances.
    pub fn clear<A: AssetProvider + ?Sized>(&mut self, assets: &mut A) -> usize {
        let removed = self.index.len();
        for overlay in self.slots.drain(..).flatten() {
            if let Some(handle) = overlay.instance {
                assets.set_active(handle, false);
                assets.release(handle);
            }
        }
        self.free_slots.clear();
        self.index.clear();
        removed
    }

    pub fn find(&self, key: &SpatialKey) -> Option<OverlayId> {
        self.index.get(key).copied()
    }

    pub fn get(&self, id: OverlayId) -> Option<&TrackedOverlay> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: OverlayId) -> Option<&mut TrackedOverlay> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn iter(&self) -> impl Iterator<Item = (OverlayId, &TrackedOverlay)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|overlay| (OverlayId(i), overlay)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (OverlayId, &mut TrackedOverlay)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|overlay| (OverlayId(i), overlay)))
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn insert(&mut self, overlay: TrackedOverlay) -> OverlayId {
        let key = overlay.key.clone();
        let id = match self.free_slots.pop() {
            Some(slot) => {
                self.slots[slot] = Some(overlay);
                OverlayId(slot)
            }
            None => {
                self.slots.push(Some(overlay));
                OverlayId(self.slots.len() - 1)
            }
        };
        self.index.insert(key, id);
        id
    }

    fn remove(&mut self, id: OverlayId) -> Option<TrackedOverlay> {
        let overlay = self.slots.get_mut(id.0)?.take()?;
        self.index.remove(&overlay.key);
        self.free_slots.push(id.0);
        Some(overlay)
    }
}
