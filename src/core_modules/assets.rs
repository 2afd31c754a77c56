// THEORY:
// The `assets` module is the seam between the engine and whatever actually
// draws things (a scene graph, a game engine, a test double). The engine never
// owns rendering resources. It asks an `AssetProvider` for an instance of a
// named asset, keeps the opaque handle it gets back, pushes transforms and the
// active flag through it, and hands the handle back when the overlay dies.
//
// Which asset represents which category is configuration (`AssetBindings`);
// the rule for choosing between variants lives in the presenter.

use crate::core_modules::spatial::Transform;
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Opaque reference to an instantiated asset owned by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetHandle(pub u64);

/// The visual representations the engine can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetVariant {
    /// Detailed screen overlay used up close.
    ScreenNear,
    /// Lighter screen overlay used from afar.
    ScreenFar,
    Book,
    Human,
}

impl fmt::Display for AssetVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssetVariant::ScreenNear => "screen_near",
            AssetVariant::ScreenFar => "screen_far",
            AssetVariant::Book => "book",
            AssetVariant::Human => "human",
        };
        f.write_str(name)
    }
}

/// Asset identifiers bound to each variant. Unbound variants are skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetBindings {
    pub screen_near: Option<String>,
    pub screen_far: Option<String>,
    pub book: Option<String>,
    pub human: Option<String>,
}

impl AssetBindings {
    pub fn asset_for(&self, variant: AssetVariant) -> Option<&str> {
        match variant {
            AssetVariant::ScreenNear => self.screen_near.as_deref(),
            AssetVariant::ScreenFar => self.screen_far.as_deref(),
            AssetVariant::Book => self.book.as_deref(),
            AssetVariant::Human => self.human.as_deref(),
        }
    }
}

/// Instantiation and manipulation of renderable assets.
pub trait AssetProvider {
    /// Creates an instance of `asset_id`, or `None` if the asset is unknown.
    fn instantiate(&mut self, asset_id: &str) -> Option<AssetHandle>;

    /// The scale the instance was authored with.
    fn intrinsic_scale(&self, handle: AssetHandle) -> Vector3<f32>;

    fn set_transform(&mut self, handle: AssetHandle, transform: &Transform);

    fn set_active(&mut self, handle: AssetHandle, active: bool);

    fn is_active(&self, handle: AssetHandle) -> bool;

    /// Destroys the instance. The handle is invalid afterwards.
    fn release(&mut self, handle: AssetHandle);
}

/// State of one instance held by [`InMemoryAssets`].
#[derive(Debug, Clone, PartialEq)]
pub struct AssetInstance {
    pub asset_id: String,
    pub transform: Transform,
    pub active: bool,
}

/// A provider that keeps instances in a map. Used by the demo runner and
/// tests, and handy for headless hosts that only consume transforms.
#[derive(Debug, Default)]
pub struct InMemoryAssets {
    /// Known assets and their authored scale.
    catalog: HashMap<String, Vector3<f32>>,
    instances: HashMap<AssetHandle, AssetInstance>,
    next_handle: u64,
    released: u64,
}

impl InMemoryAssets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an asset under `asset_id` with its authored scale.
    pub fn with_asset(mut self, asset_id: impl Into<String>, intrinsic_scale: Vector3<f32>) -> Self {
        self.catalog.insert(asset_id.into(), intrinsic_scale);
        self
    }

    pub fn instance(&self, handle: AssetHandle) -> Option<&AssetInstance> {
        self.instances.get(&handle)
    }

    /// Number of live (not yet released) instances.
    pub fn live_count(&self) -> usize {
        self.instances.len()
    }

    /// Number of instances released so far.
    pub fn released_count(&self) -> u64 {
        self.released
    }

    pub fn instances(&self) -> impl Iterator<Item = (&AssetHandle, &AssetInstance)> {
        self.instances.iter()
    }
}

impl AssetProvider for InMemoryAssets {
    fn instantiate(&mut self, asset_id: &str) -> Option<AssetHandle> {
        let scale = *self.catalog.get(asset_id)?;
        let handle = AssetHandle(self.next_handle);
        self.next_handle += 1;
        self.instances.insert(
            handle,
            AssetInstance {
                asset_id: asset_id.to_string(),
                transform: Transform::new(Vector3::zeros(), UnitQuaternion::identity(), scale),
                active: true,
            },
        );
        Some(handle)
    }

    fn intrinsic_scale(&self, handle: AssetHandle) -> Vector3<f32> {
        self.instances
            .get(&handle)
            .and_then(|instance| self.catalog.get(&instance.asset_id))
            .copied()
            .unwrap_or_else(|| Vector3::repeat(1.0))
    }

    fn set_transform(&mut self, handle: AssetHandle, transform: &Transform) {
        if let Some(instance) = self.instances.get_mut(&handle) {
            instance.transform = *transform;
        }
    }

    fn set_active(&mut self, handle: AssetHandle, active: bool) {
        if let Some(instance) = self.instances.get_mut(&handle) {
            instance.active = active;
        }
    }

    fn is_active(&self, handle: AssetHandle) -> bool {
        self.instances.get(&handle).is_some_and(|instance| instance.active)
    }

    fn release(&mut self, handle: AssetHandle) {
        if self.instances.remove(&handle).is_some() {
            self.released += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_assets_cannot_be_instantiated() {
        let mut assets = InMemoryAssets::new().with_asset("hat", Vector3::repeat(0.5));
        assert!(assets.instantiate("typewriter").is_none());
        let handle = assets.instantiate("hat").unwrap();
        assert_eq!(assets.intrinsic_scale(handle), Vector3::repeat(0.5));
        assert!(assets.is_active(handle));
    }

    #[test]
    fn release_invalidates_the_handle() {
        let mut assets = InMemoryAssets::new().with_asset("hat", Vector3::repeat(1.0));
        let handle = assets.instantiate("hat").unwrap();
        assets.release(handle);
        assets.release(handle);
        assert!(!assets.is_active(handle));
        assert_eq!(assets.live_count(), 0);
        assert_eq!(assets.released_count(), 1);
    }

    #[test]
    fn bindings_map_variants_to_assets() {
        let bindings = AssetBindings {
            screen_near: Some("typewriter_high".into()),
            book: Some("newspaper".into()),
            ..AssetBindings::default()
        };
        assert_eq!(bindings.asset_for(AssetVariant::ScreenNear), Some("typewriter_high"));
        assert_eq!(bindings.asset_for(AssetVariant::ScreenFar), None);
        assert_eq!(bindings.asset_for(AssetVariant::Book), Some("newspaper"));
    }
}
