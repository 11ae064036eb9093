//! Blend mode to device blend state mapping.

use wgpu::BlendFactor;

use crate::device::{BlendEquation, BlendFunction, BlendState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerBlendMode {
    Normal,
    Screen,
    Multiply,
    Add,
    Subtract,
    Overlay,
    ColorBurn,
    ColorDodge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialBlendMode {
    Normal,
    Screen,
    Multiply,
    Overlay,
    ColorBurn,
    ColorDodge,
}

/// Modes that need either the advanced blend equations or a shader composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdvancedBlendMode {
    Overlay,
    ColorBurn,
    ColorDodge,
}

impl AdvancedBlendMode {
    pub fn equation(self) -> BlendEquation {
        match self {
            AdvancedBlendMode::Overlay => BlendEquation::Overlay,
            AdvancedBlendMode::ColorBurn => BlendEquation::ColorBurn,
            AdvancedBlendMode::ColorDodge => BlendEquation::ColorDodge,
        }
    }

    /// Preprocessor symbol selecting the mode in the composite shader.
    pub fn define(self) -> &'static str {
        match self {
            AdvancedBlendMode::Overlay => "BLEND_OVERLAY",
            AdvancedBlendMode::ColorBurn => "BLEND_COLOR_BURN",
            AdvancedBlendMode::ColorDodge => "BLEND_COLOR_DODGE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendSetup {
    /// Plain blend function + equation.
    Fixed(BlendState),
    /// Advanced equation executed by the hardware.
    Hardware(BlendState),
    /// No hardware path; the caller composites with the blend shader.
    Software(AdvancedBlendMode),
}

const PREMULTIPLIED_OVER: BlendFunction = BlendFunction::new(
    BlendFactor::One,
    BlendFactor::OneMinusSrcAlpha,
    BlendFactor::One,
    BlendFactor::OneMinusSrcAlpha,
);

fn advanced(mode: AdvancedBlendMode, supported: bool) -> BlendSetup {
    if supported {
        BlendSetup::Hardware(BlendState::new(PREMULTIPLIED_OVER, mode.equation()))
    } else {
        BlendSetup::Software(mode)
    }
}

/// Blend used when a layer's (premultiplied) texture is composited.
pub fn layer_blend_setup(mode: LayerBlendMode, advanced_supported: bool) -> BlendSetup {
    let fixed = |function: BlendFunction, equation: BlendEquation| {
        BlendSetup::Fixed(BlendState::new(function, equation))
    };
    match mode {
        LayerBlendMode::Normal => fixed(PREMULTIPLIED_OVER, BlendEquation::Add),
        LayerBlendMode::Screen => fixed(
            BlendFunction::new(
                BlendFactor::One,
                BlendFactor::OneMinusSrc,
                BlendFactor::One,
                BlendFactor::OneMinusSrcAlpha,
            ),
            BlendEquation::Add,
        ),
        LayerBlendMode::Multiply => fixed(
            BlendFunction::new(
                BlendFactor::Dst,
                BlendFactor::OneMinusSrcAlpha,
                BlendFactor::One,
                BlendFactor::OneMinusSrcAlpha,
            ),
            BlendEquation::Add,
        ),
        LayerBlendMode::Add => fixed(
            BlendFunction::uniform(BlendFactor::One, BlendFactor::One),
            BlendEquation::Add,
        ),
        LayerBlendMode::Subtract => fixed(
            BlendFunction::uniform(BlendFactor::One, BlendFactor::One),
            BlendEquation::ReverseSubtract,
        ),
        LayerBlendMode::Overlay => advanced(AdvancedBlendMode::Overlay, advanced_supported),
        LayerBlendMode::ColorBurn => advanced(AdvancedBlendMode::ColorBurn, advanced_supported),
        LayerBlendMode::ColorDodge => advanced(AdvancedBlendMode::ColorDodge, advanced_supported),
    }
}

/// Blend used when a transparent material is drawn into the layer.
pub fn material_blend_setup(mode: MaterialBlendMode, advanced_supported: bool) -> BlendSetup {
    match mode {
        MaterialBlendMode::Normal => BlendSetup::Fixed(BlendState::new(
            BlendFunction::new(
                BlendFactor::SrcAlpha,
                BlendFactor::OneMinusSrcAlpha,
                BlendFactor::One,
                BlendFactor::OneMinusSrcAlpha,
            ),
            BlendEquation::Add,
        )),
        MaterialBlendMode::Screen => BlendSetup::Fixed(BlendState::new(
            BlendFunction::uniform(BlendFactor::SrcAlpha, BlendFactor::One),
            BlendEquation::Add,
        )),
        MaterialBlendMode::Multiply => BlendSetup::Fixed(BlendState::new(
            BlendFunction::uniform(BlendFactor::Dst, BlendFactor::Zero),
            BlendEquation::Add,
        )),
        MaterialBlendMode::Overlay => advanced(AdvancedBlendMode::Overlay, advanced_supported),
        MaterialBlendMode::ColorBurn => advanced(AdvancedBlendMode::ColorBurn, advanced_supported),
        MaterialBlendMode::ColorDodge => advanced(AdvancedBlendMode::ColorDodge, advanced_supported),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtract_uses_reverse_equation() {
        let BlendSetup::Fixed(state) = layer_blend_setup(LayerBlendMode::Subtract, true) else {
            panic!("subtract should be a fixed blend");
        };
        assert_eq!(state.equation, BlendEquation::ReverseSubtract);
        assert_eq!(state.function.src_rgb, BlendFactor::One);
        assert_eq!(state.function.dst_rgb, BlendFactor::One);
    }

    #[test]
    fn advanced_modes_fall_back_without_hardware() {
        assert_eq!(
            layer_blend_setup(LayerBlendMode::ColorDodge, false),
            BlendSetup::Software(AdvancedBlendMode::ColorDodge)
        );
        assert!(matches!(
            material_blend_setup(MaterialBlendMode::Overlay, true),
            BlendSetup::Hardware(state) if state.equation == BlendEquation::Overlay
        ));
    }
}
