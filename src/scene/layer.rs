use std::collections::BTreeMap;

use glam::Vec4;

use super::camera::Camera;
use super::light::Light;
use super::model::{ImageMap, Model, Path, Text};
use super::NodeId;
use crate::device::{Rect, TextureHandle};
use crate::effects::EffectInstance;
use crate::renderer::blend::LayerBlendMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerBackground {
    Unspecified,
    Color,
    Transparent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerUnits {
    Percent,
    Pixels,
}

/// Layer placement inside the presentation, origin at the top-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerRect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
    pub units: LayerUnits,
}

impl LayerRect {
    pub fn full() -> Self {
        Self {
            left: 0.0,
            top: 0.0,
            width: 100.0,
            height: 100.0,
            units: LayerUnits::Percent,
        }
    }

    pub fn pixels(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width,
            height,
            units: LayerUnits::Pixels,
        }
    }

    /// Resolves against the presentation size, clipped to it.
    pub fn resolve(&self, presentation: (u32, u32)) -> Rect {
        let (pw, ph) = (presentation.0 as f32, presentation.1 as f32);
        let (left, top, width, height) = match self.units {
            LayerUnits::Percent => (
                self.left * 0.01 * pw,
                self.top * 0.01 * ph,
                self.width * 0.01 * pw,
                self.height * 0.01 * ph,
            ),
            LayerUnits::Pixels => (self.left, self.top, self.width, self.height),
        };
        let left = left.round().clamp(0.0, pw);
        let top = top.round().clamp(0.0, ph);
        let width = width.round().clamp(0.0, pw - left);
        let height = height.round().clamp(0.0, ph - top);
        Rect::new(left as i32, top as i32, width as u32, height as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultisampleMode {
    None,
    X2,
    X4,
    X8,
    Ssaa,
}

impl MultisampleMode {
    pub fn sample_count(self) -> u32 {
        match self {
            MultisampleMode::X2 => 2,
            MultisampleMode::X4 => 4,
            MultisampleMode::X8 => 8,
            MultisampleMode::None | MultisampleMode::Ssaa => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressiveMode {
    None,
    X2,
    X4,
    X8,
}

impl ProgressiveMode {
    pub fn max_pass_index(self) -> u32 {
        match self {
            ProgressiveMode::None => 0,
            ProgressiveMode::X2 => 2,
            ProgressiveMode::X4 => 4,
            ProgressiveMode::X8 => 8,
        }
    }
}

/// Screen-space ambient occlusion controls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AoSettings {
    pub strength: f32,
    pub distance: f32,
    pub softness: f32,
    pub bias: f32,
    pub sample_rate: i32,
    pub dither: bool,
}

impl AoSettings {
    pub fn enabled(&self) -> bool {
        self.strength > 0.0
    }
}

impl Default for AoSettings {
    fn default() -> Self {
        Self {
            strength: 0.0,
            distance: 5.0,
            softness: 50.0,
            bias: 0.0,
            sample_rate: 2,
            dither: true,
        }
    }
}

/// Screen-space directional occlusion ("shadow") controls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenShadowSettings {
    pub strength: f32,
    pub distance: f32,
    pub softness: f32,
    pub bias: f32,
}

impl ScreenShadowSettings {
    pub fn enabled(&self) -> bool {
        self.strength > 0.0
    }
}

impl Default for ScreenShadowSettings {
    fn default() -> Self {
        Self {
            strength: 0.0,
            distance: 10.0,
            softness: 100.0,
            bias: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightProbeSettings {
    pub probe: ImageMap,
    pub brightness: f32,
    pub horizon: f32,
    pub fov: f32,
    /// Probe texels are RGBE encoded.
    pub rgbe: bool,
    pub second: Option<ImageMap>,
    pub second_fade: f32,
    pub second_window: f32,
    pub second_position: f32,
}

impl LightProbeSettings {
    pub fn new(probe: ImageMap) -> Self {
        Self {
            probe,
            brightness: 100.0,
            horizon: -1.0,
            fov: 180.0,
            rgbe: false,
            second: None,
            second_fade: 1.0,
            second_window: 1.0,
            second_position: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Layer {
    pub id: NodeId,
    pub visible: bool,
    pub background: LayerBackground,
    pub clear_color: Vec4,
    pub blend_mode: LayerBlendMode,
    pub rect: LayerRect,
    pub multisample: MultisampleMode,
    pub progressive: ProgressiveMode,
    pub temporal_aa: bool,
    /// Applied in order; inactive entries are skipped.
    pub effects: Vec<EffectInstance>,
    pub light_probe: Option<LightProbeSettings>,
    /// Externally produced texture shown instead of the layer's own content.
    pub render_plugin: Option<TextureHandle>,
    pub ao: AoSettings,
    pub shadow: ScreenShadowSettings,
    pub depth_test_enabled: bool,
    pub depth_prepass_enabled: bool,
    pub write_transparent_depth: bool,
    /// Set by the scene owner whenever anything in the layer changed.
    pub contents_dirty: bool,
    pub camera: Option<Camera>,
    pub lights: Vec<Light>,
    pub models: Vec<Model>,
    pub texts: Vec<Text>,
    pub paths: Vec<Path>,
    parents: BTreeMap<NodeId, NodeId>,
}

impl Layer {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            visible: true,
            background: LayerBackground::Transparent,
            clear_color: Vec4::ZERO,
            blend_mode: LayerBlendMode::Normal,
            rect: LayerRect::full(),
            multisample: MultisampleMode::None,
            progressive: ProgressiveMode::None,
            temporal_aa: false,
            effects: Vec::new(),
            light_probe: None,
            render_plugin: None,
            ao: AoSettings::default(),
            shadow: ScreenShadowSettings::default(),
            depth_test_enabled: true,
            depth_prepass_enabled: true,
            write_transparent_depth: false,
            contents_dirty: true,
            camera: Some(Camera::default()),
            lights: Vec::new(),
            models: Vec::new(),
            texts: Vec::new(),
            paths: Vec::new(),
            parents: BTreeMap::new(),
        }
    }

    pub fn set_parent(&mut self, child: NodeId, parent: NodeId) {
        self.parents.insert(child, parent);
    }

    /// True when `node` is `ancestor` or sits somewhere below it.
    pub fn is_within(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = Some(node);
        let mut hops = 0;
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            hops += 1;
            if hops > self.parents.len() {
                break;
            }
            current = self.parents.get(&id).copied();
        }
        false
    }

    pub fn active_effects(&self) -> impl Iterator<Item = &EffectInstance> {
        self.effects.iter().filter(|effect| effect.active)
    }

    pub fn needs_ambient_occlusion(&self) -> bool {
        self.ao.enabled() || self.shadow.enabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_rect_scales_with_presentation() {
        let rect = LayerRect {
            left: 25.0,
            top: 0.0,
            width: 50.0,
            height: 100.0,
            units: LayerUnits::Percent,
        };
        assert_eq!(rect.resolve((800, 600)), Rect::new(200, 0, 400, 600));
    }

    #[test]
    fn pixel_rect_is_clipped_to_presentation() {
        let rect = LayerRect::pixels(700.0, 10.0, 400.0, 300.0);
        assert_eq!(rect.resolve((800, 600)), Rect::new(700, 10, 100, 300));
    }

    #[test]
    fn scope_matches_descendants_only() {
        let mut layer = Layer::new(NodeId(1));
        layer.set_parent(NodeId(3), NodeId(2));
        layer.set_parent(NodeId(4), NodeId(3));

        assert!(layer.is_within(NodeId(4), NodeId(2)));
        assert!(layer.is_within(NodeId(2), NodeId(2)));
        assert!(!layer.is_within(NodeId(2), NodeId(4)));
    }
}
