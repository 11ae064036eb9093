use bitflags::bitflags;

use crate::renderer::lights::MAX_LIGHTS;
use crate::scene::{DefaultMaterial, LightKind, MapKind, MaterialLighting};

bitflags! {
    /// Material inputs that change the generated shader.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct MaterialFeatures: u32 {
        const DIFFUSE_MAP = 1 << 0;
        const SPECULAR_MAP = 1 << 1;
        const ROUGHNESS_MAP = 1 << 2;
        const BUMP_MAP = 1 << 3;
        const NORMAL_MAP = 1 << 4;
        const DISPLACEMENT_MAP = 1 << 5;
        const OPACITY_MAP = 1 << 6;
        const EMISSIVE_MAP = 1 << 7;
        const TRANSLUCENCY_MAP = 1 << 8;
        const LIGHTMAP_INDIRECT = 1 << 9;
        const LIGHTMAP_RADIOSITY = 1 << 10;
        const LIGHTMAP_SHADOW = 1 << 11;
        const IBL = 1 << 12;
        const FRESNEL = 1 << 13;
        const VERTEX_COLORS = 1 << 14;
        const SPECULAR = 1 << 15;
        const PIXEL_LIGHTING = 1 << 16;
    }
}

impl MaterialFeatures {
    pub fn for_map(kind: MapKind) -> Self {
        match kind {
            MapKind::Diffuse => Self::DIFFUSE_MAP,
            MapKind::Specular => Self::SPECULAR_MAP,
            MapKind::Roughness => Self::ROUGHNESS_MAP,
            MapKind::Bump => Self::BUMP_MAP,
            MapKind::Normal => Self::NORMAL_MAP,
            MapKind::Displacement => Self::DISPLACEMENT_MAP,
            MapKind::Opacity => Self::OPACITY_MAP,
            MapKind::Emissive => Self::EMISSIVE_MAP,
            MapKind::Translucency => Self::TRANSLUCENCY_MAP,
            MapKind::LightmapIndirect => Self::LIGHTMAP_INDIRECT,
            MapKind::LightmapRadiosity => Self::LIGHTMAP_RADIOSITY,
            MapKind::LightmapShadow => Self::LIGHTMAP_SHADOW,
        }
    }

    pub fn from_material(material: &DefaultMaterial) -> Self {
        let mut features = material
            .maps
            .keys()
            .fold(Self::empty(), |acc, kind| acc | Self::for_map(*kind));
        features.set(Self::IBL, material.light_probe.is_some());
        features.set(Self::FRESNEL, material.fresnel_power > 0.0);
        features.set(Self::VERTEX_COLORS, material.vertex_colors);
        features.set(Self::SPECULAR, material.is_specular_enabled());
        features.set(
            Self::PIXEL_LIGHTING,
            material.lighting == MaterialLighting::Pixel,
        );
        features
    }
}

bitflags! {
    /// Layer-wide shader switches, emitted as `#define`s.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct ShaderFeatureSet: u8 {
        const SSM = 1 << 0;
        const SSAO = 1 << 1;
        const SSDO = 1 << 2;
        const CG_LIGHTING = 1 << 3;
        const LIGHT_PROBE = 1 << 4;
        const LIGHT_PROBE_2 = 1 << 5;
        const RGBE_LIGHT_PROBE = 1 << 6;
    }
}

impl ShaderFeatureSet {
    const DEFINES: [(ShaderFeatureSet, &'static str); 7] = [
        (ShaderFeatureSet::SSM, "ENABLE_SSM"),
        (ShaderFeatureSet::SSAO, "ENABLE_SSAO"),
        (ShaderFeatureSet::SSDO, "ENABLE_SSDO"),
        (ShaderFeatureSet::CG_LIGHTING, "ENABLE_CG_LIGHTING"),
        (ShaderFeatureSet::LIGHT_PROBE, "ENABLE_LIGHT_PROBE"),
        (ShaderFeatureSet::LIGHT_PROBE_2, "ENABLE_LIGHT_PROBE_2"),
        (ShaderFeatureSet::RGBE_LIGHT_PROBE, "ENABLE_RGBE_LIGHT_PROBE"),
    ];

    /// `#define` lines for every feature, in a fixed order, set to 0 or 1.
    pub fn define_block(self) -> String {
        let mut block = String::new();
        for (flag, name) in Self::DEFINES {
            let value = u8::from(self.contains(flag));
            block.push_str(&format!("#define {name} {value}\n"));
        }
        block
    }
}

/// Bit-packed description of everything that selects a default-material
/// program: material features plus the light list (kind and shadow per
/// light, in subset order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ShaderVariantKey {
    pub features: MaterialFeatures,
    light_count: u8,
    light_kinds: u16,
    shadow_lights: u8,
}

impl Default for MaterialFeatures {
    fn default() -> Self {
        Self::empty()
    }
}

impl ShaderVariantKey {
    pub fn new(features: MaterialFeatures) -> Self {
        Self {
            features,
            ..Self::default()
        }
    }

    /// Appends a light. Lights past [`MAX_LIGHTS`] are ignored.
    pub fn push_light(&mut self, kind: LightKind, casts_shadow: bool) {
        let index = self.light_count as usize;
        if index >= MAX_LIGHTS {
            log::warn!("Shader key light limit {} reached; light ignored", MAX_LIGHTS);
            return;
        }
        self.light_kinds |= u16::from(kind.code()) << (index * 2);
        if casts_shadow {
            self.shadow_lights |= 1 << index;
        }
        self.light_count += 1;
    }

    pub fn light_count(&self) -> usize {
        self.light_count as usize
    }

    pub fn light_kind(&self, index: usize) -> Option<LightKind> {
        if index >= self.light_count() {
            return None;
        }
        LightKind::from_code(((self.light_kinds >> (index * 2)) & 0b11) as u8)
    }

    pub fn light_has_shadow(&self, index: usize) -> bool {
        index < self.light_count() && self.shadow_lights & (1 << index) != 0
    }

    pub fn to_bits(&self) -> u128 {
        u128::from(self.features.bits())
            | u128::from(self.light_count) << 32
            | u128::from(self.light_kinds) << 40
            | u128::from(self.shadow_lights) << 56
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flipping_any_light_bit_changes_the_key() {
        let mut a = ShaderVariantKey::new(MaterialFeatures::DIFFUSE_MAP);
        a.push_light(LightKind::Directional, true);
        let mut b = ShaderVariantKey::new(MaterialFeatures::DIFFUSE_MAP);
        b.push_light(LightKind::Directional, false);
        let mut c = ShaderVariantKey::new(MaterialFeatures::DIFFUSE_MAP);
        c.push_light(LightKind::Point, true);

        assert_ne!(a.to_bits(), b.to_bits());
        assert_ne!(a.to_bits(), c.to_bits());
        assert_eq!(a.light_kind(0), Some(LightKind::Directional));
        assert!(a.light_has_shadow(0));
        assert!(!b.light_has_shadow(0));
    }

    #[test]
    fn light_limit_is_enforced() {
        let mut key = ShaderVariantKey::default();
        for _ in 0..MAX_LIGHTS + 2 {
            key.push_light(LightKind::Area, false);
        }
        assert_eq!(key.light_count(), MAX_LIGHTS);
        assert_eq!(key.light_kind(MAX_LIGHTS - 1), Some(LightKind::Area));
    }

    #[test]
    fn define_block_lists_every_feature_once() {
        let block = (ShaderFeatureSet::SSAO | ShaderFeatureSet::CG_LIGHTING).define_block();
        assert_eq!(block.lines().count(), 7);
        assert!(block.contains("#define ENABLE_SSAO 1"));
        assert!(block.contains("#define ENABLE_SSM 0"));
    }
}
