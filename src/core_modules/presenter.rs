// THEORY:
// The `presenter` is the last stage of the pipeline. It owns the decision of
// *what* represents an overlay and *when* that representation is (re)created,
// while the asset provider owns the rendering resources themselves.
//
// - Screens have two levels of detail. The near variant is used while the
//   viewer is within `near_threshold` metres of the target, the far variant
//   otherwise. Crossing the threshold swaps the instance.
// - Books and humans have a single fixed variant.
// - A fresh instance is created when the overlay has none, when its instance
//   was deactivated behind its back, or on a screen near/far crossover. The old
//   instance is always deactivated and released before the new one is made.
// - A fresh instance reports its authored (intrinsic) scale. That becomes the
//   baseline the tuning multiplier is applied to, and the render state snaps
//   onto the target so the instance never flies in from the origin.

use crate::core_modules::assets::{AssetBindings, AssetHandle, AssetProvider, AssetVariant};
use crate::core_modules::classifier::Category;
use crate::core_modules::tracker::TrackedOverlay;
use log::{debug, info};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresentationSettings {
    /// Distance in metres at or below which screens use the near variant.
    pub near_threshold: f32,
    pub assets: AssetBindings,
}

impl Default for PresentationSettings {
    fn default() -> Self {
        Self {
            near_threshold: 1.5,
            assets: AssetBindings::default(),
        }
    }
}

/// What happened to an overlay's visual representation this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// No target has been resolved yet; nothing to show.
    Unresolved,
    /// The required variant has no asset bound, or the provider refused it.
    Unavailable(AssetVariant),
    /// The existing instance is still the right one.
    Kept(AssetVariant),
    Spawned(AssetVariant),
    Swapped { from: AssetVariant, to: AssetVariant },
}

/// The asset selection rule, keyed by category.
pub fn select_variant(category: Category, distance: f32, near_threshold: f32) -> Option<AssetVariant> {
    match category {
        Category::Screen if distance <= near_threshold => Some(AssetVariant::ScreenNear),
        Category::Screen => Some(AssetVariant::ScreenFar),
        Category::Book => Some(AssetVariant::Book),
        Category::Human => Some(AssetVariant::Human),
        Category::Unknown => None,
    }
}

/// Deactivates and releases an instance.
pub fn retire<A: AssetProvider + ?Sized>(handle: AssetHandle, assets: &mut A) {
    assets.set_active(handle, false);
    assets.release(handle);
}

/// Makes sure the overlay is represented by the right asset instance.
pub fn present<A: AssetProvider + ?Sized>(
    overlay: &mut TrackedOverlay,
    viewer_position: &Vector3<f32>,
    settings: &PresentationSettings,
    assets: &mut A,
    now: Duration,
    log_timing: bool,
) -> PresentOutcome {
    let Some(target) = overlay.target else {
        return PresentOutcome::Unresolved;
    };
    let distance = (target.position - viewer_position).norm();
    overlay.last_distance = distance;

    let Some(variant) = select_variant(overlay.category, distance, settings.near_threshold) else {
        return PresentOutcome::Unresolved;
    };

    let instance_alive = overlay.instance.is_some_and(|handle| assets.is_active(handle));
    let crossover = overlay.category == Category::Screen && overlay.variant != Some(variant);
    if instance_alive && !crossover {
        return PresentOutcome::Kept(variant);
    }

    let Some(asset_id) = settings.assets.asset_for(variant) else {
        return PresentOutcome::Unavailable(variant);
    };

    let previous = overlay.variant.filter(|_| instance_alive);
    if let Some(handle) = overlay.instance.take() {
        retire(handle, assets);
    }
    overlay.variant = None;

    let Some(handle) = assets.instantiate(asset_id) else {
        debug!("asset provider refused '{asset_id}' for overlay {}", overlay.key);
        return PresentOutcome::Unavailable(variant);
    };

    overlay.instance = Some(handle);
    overlay.variant = Some(variant);
    overlay.intrinsic_scale = assets.intrinsic_scale(handle);
    overlay.spawn_time = Some(now);
    overlay.current = overlay.target_transform();

    match previous {
        Some(from) => {
            debug!("overlay {} swapped {from} -> {variant} at {distance:.2}m", overlay.key);
            PresentOutcome::Swapped { from, to: variant }
        }
        None => {
            debug!("overlay {} spawned {variant} at {distance:.2}m", overlay.key);
            if log_timing {
                let elapsed = overlay.time_to_spawn().unwrap_or_default();
                info!(
                    "[timing] {} ({}) spawned {:.3}s after first sighting",
                    overlay.key,
                    overlay.category,
                    elapsed.as_secs_f32()
                );
            }
            PresentOutcome::Spawned(variant)
        }
    }
}

/// Pushes the overlay's render state to its instance.
pub fn apply<A: AssetProvider + ?Sized>(overlay: &TrackedOverlay, assets: &mut A) {
    if let (Some(handle), Some(current)) = (overlay.instance, overlay.current.as_ref()) {
        assets.set_transform(handle, current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::assets::InMemoryAssets;
    use crate::core_modules::tracker::{Observation, TargetPose, Tracker, TrackingSettings};
    use crate::core_modules::detection::detection::BoundingBox;
    use nalgebra::UnitQuaternion;

    fn settings() -> PresentationSettings {
        PresentationSettings {
            near_threshold: 1.5,
            assets: AssetBindings {
                screen_near: Some("typewriter_high".into()),
                screen_far: Some("typewriter_low".into()),
                book: Some("newspaper".into()),
                human: None,
            },
        }
    }

    fn assets() -> InMemoryAssets {
        InMemoryAssets::new()
            .with_asset("typewriter_high", Vector3::repeat(0.5))
            .with_asset("typewriter_low", Vector3::repeat(0.25))
            .with_asset("newspaper", Vector3::new(0.3, 0.01, 0.4))
    }

    fn overlay(category: Category, label: &str, z: f32) -> TrackedOverlay {
        let mut tracker = Tracker::new(TrackingSettings::default());
        let key = tracker.key_for(&BoundingBox::new(0.0, 0.0, 10.0, 10.0), (640, 480), label);
        let Observation::Confirmed { id, .. } = tracker.observe(key, category, label, 0.9, Duration::ZERO) else {
            panic!("confirmed");
        };
        let mut overlay = tracker.get(id).unwrap().clone();
        overlay.target = Some(TargetPose {
            position: Vector3::new(0.0, 0.0, z),
            rotation: UnitQuaternion::identity(),
            scale_multiplier: Vector3::repeat(2.0),
        });
        overlay
    }

    #[test]
    fn screens_pick_their_variant_by_distance() {
        assert_eq!(select_variant(Category::Screen, 1.5, 1.5), Some(AssetVariant::ScreenNear));
        assert_eq!(select_variant(Category::Screen, 1.51, 1.5), Some(AssetVariant::ScreenFar));
        assert_eq!(select_variant(Category::Book, 10.0, 1.5), Some(AssetVariant::Book));
        assert_eq!(select_variant(Category::Human, 0.1, 1.5), Some(AssetVariant::Human));
        assert_eq!(select_variant(Category::Unknown, 0.1, 1.5), None);
    }

    #[test]
    fn spawn_captures_intrinsic_scale_and_snaps_to_target() {
        let mut assets = assets();
        let mut book = overlay(Category::Book, "book", 2.0);
        let outcome = present(&mut book, &Vector3::zeros(), &settings(), &mut assets, Duration::from_secs(1), false);
        assert_eq!(outcome, PresentOutcome::Spawned(AssetVariant::Book));
        assert_eq!(book.intrinsic_scale, Vector3::new(0.3, 0.01, 0.4));
        let current = book.current.unwrap();
        assert_eq!(current.position, Vector3::new(0.0, 0.0, 2.0));
        assert_eq!(current.scale, Vector3::new(0.6, 0.02, 0.8));
        assert_eq!(book.spawn_time, Some(Duration::from_secs(1)));

        let again = present(&mut book, &Vector3::zeros(), &settings(), &mut assets, Duration::from_secs(2), false);
        assert_eq!(again, PresentOutcome::Kept(AssetVariant::Book));
        assert_eq!(assets.live_count(), 1);
    }

    #[test]
    fn screen_crossover_releases_the_previous_instance() {
        let mut assets = assets();
        let mut tv = overlay(Category::Screen, "tv", 3.0);
        let first = present(&mut tv, &Vector3::zeros(), &settings(), &mut assets, Duration::ZERO, false);
        assert_eq!(first, PresentOutcome::Spawned(AssetVariant::ScreenFar));
        let far_handle = tv.instance.unwrap();

        let viewer = Vector3::new(0.0, 0.0, 2.0);
        let second = present(&mut tv, &viewer, &settings(), &mut assets, Duration::from_secs(1), false);
        assert_eq!(
            second,
            PresentOutcome::Swapped {
                from: AssetVariant::ScreenFar,
                to: AssetVariant::ScreenNear
            }
        );
        assert!(assets.instance(far_handle).is_none());
        assert_eq!(assets.live_count(), 1);
        assert_eq!(tv.intrinsic_scale, Vector3::repeat(0.5));
    }

    #[test]
    fn unbound_variants_are_skipped() {
        let mut assets = assets();
        let mut person = overlay(Category::Human, "person", 2.0);
        let outcome = present(&mut person, &Vector3::zeros(), &settings(), &mut assets, Duration::ZERO, false);
        assert_eq!(outcome, PresentOutcome::Unavailable(AssetVariant::Human));
        assert!(person.instance.is_none());
        assert_eq!(assets.live_count(), 0);
    }

    #[test]
    fn deactivated_instances_are_replaced() {
        let mut assets = assets();
        let mut book = overlay(Category::Book, "book", 2.0);
        present(&mut book, &Vector3::zeros(), &settings(), &mut assets, Duration::ZERO, false);
        let old = book.instance.unwrap();
        assets.set_active(old, false);

        let outcome = present(&mut book, &Vector3::zeros(), &settings(), &mut assets, Duration::from_secs(1), false);
        assert_eq!(outcome, PresentOutcome::Spawned(AssetVariant::Book));
        assert_ne!(book.instance, Some(old));
        assert_eq!(assets.released_count(), 1);
    }

    #[test]
    fn unresolved_overlays_are_left_alone() {
        let mut assets = assets();
        let mut book = overlay(Category::Book, "book", 2.0);
        book.target = None;
        let outcome = present(&mut book, &Vector3::zeros(), &settings(), &mut assets, Duration::ZERO, false);
        assert_eq!(outcome, PresentOutcome::Unresolved);
        apply(&book, &mut assets);
        assert_eq!(assets.live_count(), 0);
    }
}
