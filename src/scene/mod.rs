//! Read-only scene snapshot consumed by the renderer.
//!
//! The scene owner (a loader or an application) builds and mutates these
//! structures; the renderer only reads them while a frame is produced.

pub mod camera;
pub mod layer;
pub mod light;
pub mod model;
pub mod transform;

pub use camera::{Camera, Frustum, Projection};
pub use layer::{
    AoSettings, Layer, LayerBackground, LayerRect, LayerUnits, LightProbeSettings, MultisampleMode,
    ProgressiveMode, ScreenShadowSettings,
};
pub use light::{Light, LightKind};
pub use model::{
    Bounds, CustomMaterial, DefaultMaterial, ImageMap, MapKind, Material, MaterialLighting, Model,
    Path, Subset, Text,
};
pub use transform::Transform;

/// Stable identity of a scene node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Default)]
pub struct Scene {
    /// Stacking order, bottom layer first.
    pub layers: Vec<Layer>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn layer(&self, id: NodeId) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.id == id)
    }

    pub fn layer_mut(&mut self, id: NodeId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|layer| layer.id == id)
    }

    pub fn visible_layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter().filter(|layer| layer.visible)
    }
}
