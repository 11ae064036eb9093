use std::collections::BTreeMap;

use glam::{Mat4, Vec3, Vec4};

use super::NodeId;
use crate::device::{Geometry, TextureHandle, TextureSampling};
use crate::effects::EffectInstance;
use crate::renderer::blend::MaterialBlendMode;

/// Axis-aligned box in the owning node's local space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn unit() -> Self {
        Self::new(Vec3::splat(-1.0), Vec3::splat(1.0))
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Box enclosing this one after `transform`.
    pub fn transformed(&self, transform: Mat4) -> Bounds {
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            let p = transform.transform_point3(corner);
            min = min.min(p);
            max = max.max(p);
        }
        Bounds { min, max }
    }
}

/// Material image slots. Ordering fixes the sampler numbering used by
/// generated shaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MapKind {
    Diffuse,
    Specular,
    Roughness,
    Bump,
    Normal,
    Displacement,
    Opacity,
    Emissive,
    Translucency,
    LightmapIndirect,
    LightmapRadiosity,
    LightmapShadow,
}

impl MapKind {
    /// Lightmaps read the second UV set.
    pub fn uv_set(self) -> u8 {
        match self {
            MapKind::LightmapIndirect | MapKind::LightmapRadiosity | MapKind::LightmapShadow => 1,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageMap {
    pub texture: TextureHandle,
    /// UV transform. Rotation is the upper-left 2x2 block, offset the
    /// translation column.
    pub transform: Mat4,
    pub premultiplied: bool,
    pub sampling: TextureSampling,
}

impl ImageMap {
    pub fn new(texture: TextureHandle) -> Self {
        Self {
            texture,
            transform: Mat4::IDENTITY,
            premultiplied: false,
            sampling: TextureSampling::LINEAR_CLAMP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialLighting {
    Unlit,
    Pixel,
}

#[derive(Debug, Clone)]
pub struct DefaultMaterial {
    pub lighting: MaterialLighting,
    pub blend_mode: MaterialBlendMode,
    pub diffuse_color: Vec3,
    pub emissive_color: Vec3,
    pub emissive_power: f32,
    pub specular_tint: Vec3,
    pub specular_amount: f32,
    pub specular_roughness: f32,
    pub fresnel_power: f32,
    pub ior: f32,
    pub opacity: f32,
    pub bump_amount: f32,
    pub displace_amount: f32,
    pub translucent_falloff: f32,
    pub diffuse_light_wrap: f32,
    pub vertex_colors: bool,
    pub maps: BTreeMap<MapKind, ImageMap>,
    /// Per-material IBL probe overriding the layer's.
    pub light_probe: Option<ImageMap>,
}

impl Default for DefaultMaterial {
    fn default() -> Self {
        Self {
            lighting: MaterialLighting::Pixel,
            blend_mode: MaterialBlendMode::Normal,
            diffuse_color: Vec3::ONE,
            emissive_color: Vec3::ONE,
            emissive_power: 0.0,
            specular_tint: Vec3::ONE,
            specular_amount: 0.0,
            specular_roughness: 0.0,
            fresnel_power: 0.0,
            ior: 1.5,
            opacity: 1.0,
            bump_amount: 0.5,
            displace_amount: 20.0,
            translucent_falloff: 1.0,
            diffuse_light_wrap: 0.0,
            vertex_colors: false,
            maps: BTreeMap::new(),
            light_probe: None,
        }
    }
}

impl DefaultMaterial {
    pub fn with_map(mut self, kind: MapKind, map: ImageMap) -> Self {
        self.maps.insert(kind, map);
        self
    }

    /// Images in sampler order.
    pub fn image_slots(&self) -> impl Iterator<Item = (MapKind, &ImageMap)> + '_ {
        self.maps.iter().map(|(kind, map)| (*kind, map))
    }

    pub fn is_specular_enabled(&self) -> bool {
        self.specular_amount > 0.0 || self.maps.contains_key(&MapKind::Specular)
    }

    pub fn has_transparency(&self) -> bool {
        self.opacity < 1.0
            || self.maps.contains_key(&MapKind::Opacity)
            || self.maps.contains_key(&MapKind::Translucency)
            || self.blend_mode != MaterialBlendMode::Normal
    }
}

#[derive(Debug, Clone)]
pub struct CustomMaterial {
    pub instance: EffectInstance,
}

#[derive(Debug, Clone)]
pub enum Material {
    Default(DefaultMaterial),
    Custom(CustomMaterial),
}

impl Material {
    pub fn opacity(&self) -> f32 {
        match self {
            Material::Default(material) => material.opacity,
            Material::Custom(_) => 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Subset {
    pub geometry: Geometry,
    pub bounds: Bounds,
    pub material: Material,
}

#[derive(Debug, Clone)]
pub struct Model {
    pub id: NodeId,
    pub global_transform: Mat4,
    /// Opacity accumulated down the node hierarchy.
    pub opacity: f32,
    pub visible: bool,
    pub cast_shadow: bool,
    pub subsets: Vec<Subset>,
}

impl Model {
    pub fn new(id: NodeId, global_transform: Mat4) -> Self {
        Self {
            id,
            global_transform,
            opacity: 1.0,
            visible: true,
            cast_shadow: true,
            subsets: Vec::new(),
        }
    }

    pub fn with_subset(mut self, geometry: Geometry, bounds: Bounds, material: Material) -> Self {
        self.subsets.push(Subset {
            geometry,
            bounds,
            material,
        });
        self
    }
}

/// Pre-rasterised text quad.
#[derive(Debug, Clone)]
pub struct Text {
    pub id: NodeId,
    pub global_transform: Mat4,
    pub opacity: f32,
    pub visible: bool,
    pub texture: Option<TextureHandle>,
    pub color: Vec4,
    pub width: f32,
    pub height: f32,
}

/// Tessellated path fill.
#[derive(Debug, Clone)]
pub struct Path {
    pub id: NodeId,
    pub global_transform: Mat4,
    pub opacity: f32,
    pub visible: bool,
    pub geometry: Geometry,
    pub bounds: Bounds,
    pub fill_color: Vec4,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_follow_translation_and_scale() {
        let transform = Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)) * Mat4::from_scale(Vec3::splat(2.0));
        let bounds = Bounds::unit().transformed(transform);

        assert!(bounds.min.abs_diff_eq(Vec3::new(8.0, -2.0, -2.0), 1e-5));
        assert!(bounds.max.abs_diff_eq(Vec3::new(12.0, 2.0, 2.0), 1e-5));
    }

    #[test]
    fn opacity_map_makes_material_transparent() {
        let plain = DefaultMaterial::default();
        assert!(!plain.has_transparency());

        let masked = DefaultMaterial::default().with_map(MapKind::Opacity, ImageMap::new(TextureHandle(7)));
        assert!(masked.has_transparency());
    }

    #[test]
    fn image_slots_come_out_in_fixed_order() {
        let material = DefaultMaterial::default()
            .with_map(MapKind::Emissive, ImageMap::new(TextureHandle(3)))
            .with_map(MapKind::Diffuse, ImageMap::new(TextureHandle(1)));
        let kinds: Vec<_> = material.image_slots().map(|(kind, _)| kind).collect();

        assert_eq!(kinds, vec![MapKind::Diffuse, MapKind::Emissive]);
    }
}
