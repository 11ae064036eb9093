//! Fixed programs used by the layer passes.

use crate::device::ProgramSource;
use crate::renderer::blend::AdvancedBlendMode;

const VERSION: &str = "#version 330 core\n";

const FULLSCREEN_VERT: &str = include_str!("glsl/fullscreen.vert");
const MESH_VERT: &str = include_str!("glsl/mesh.vert");
const SHADOW_VERT: &str = include_str!("glsl/shadow.vert");
const DEPTH_FRAG: &str = include_str!("glsl/depth.frag");
const ORTHOGRAPHIC_SHADOW_FRAG: &str = include_str!("glsl/orthographic_shadow.frag");
const CUBE_SHADOW_FRAG: &str = include_str!("glsl/cube_shadow.frag");
const SHADOW_BLUR_FRAG: &str = include_str!("glsl/shadow_blur.frag");
const CUBE_BLUR_FRAG: &str = include_str!("glsl/cube_blur.frag");
const SSAO_FRAG: &str = include_str!("glsl/ssao.frag");
const AA_BLEND_FRAG: &str = include_str!("glsl/aa_blend.frag");
const SSAA_DOWNSAMPLE_FRAG: &str = include_str!("glsl/ssaa_downsample.frag");
const COMPOSITE_FRAG: &str = include_str!("glsl/composite.frag");
const ADVANCED_BLEND_FRAG: &str = include_str!("glsl/advanced_blend.frag");
const TEXT_FRAG: &str = include_str!("glsl/text.frag");
const PATH_FRAG: &str = include_str!("glsl/path.frag");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinProgram {
    Depth,
    OrthoShadow,
    CubeShadow,
    ShadowBlurX,
    ShadowBlurY,
    CubeBlurX,
    CubeBlurY,
    Ssao,
    AaBlend,
    SsaaDownsample,
    Composite,
    AdvancedBlend(AdvancedBlendMode),
    Text,
    Path,
}

impl BuiltinProgram {
    pub fn name(self) -> String {
        let name = match self {
            BuiltinProgram::Depth => "depth_prepass",
            BuiltinProgram::OrthoShadow => "orthographic_shadow",
            BuiltinProgram::CubeShadow => "cube_shadow",
            BuiltinProgram::ShadowBlurX => "shadow_blur_x",
            BuiltinProgram::ShadowBlurY => "shadow_blur_y",
            BuiltinProgram::CubeBlurX => "cube_blur_x",
            BuiltinProgram::CubeBlurY => "cube_blur_y",
            BuiltinProgram::Ssao => "ssao",
            BuiltinProgram::AaBlend => "aa_blend",
            BuiltinProgram::SsaaDownsample => "ssaa_downsample",
            BuiltinProgram::Composite => "layer_composite",
            BuiltinProgram::AdvancedBlend(mode) => {
                let mode = mode.define().trim_start_matches("BLEND_").to_lowercase();
                return format!("advanced_blend_{mode}");
            }
            BuiltinProgram::Text => "text",
            BuiltinProgram::Path => "path",
        };
        name.to_string()
    }

    fn defines(self) -> Vec<(&'static str, bool)> {
        match self {
            BuiltinProgram::ShadowBlurX | BuiltinProgram::CubeBlurX => vec![("BLUR_X", true)],
            BuiltinProgram::ShadowBlurY | BuiltinProgram::CubeBlurY => vec![("BLUR_X", false)],
            BuiltinProgram::AdvancedBlend(mode) => [
                AdvancedBlendMode::Overlay,
                AdvancedBlendMode::ColorBurn,
                AdvancedBlendMode::ColorDodge,
            ]
            .into_iter()
            .map(|candidate| (candidate.define(), candidate == mode))
            .collect(),
            _ => Vec::new(),
        }
    }

    fn stages(self) -> (&'static str, &'static str) {
        match self {
            BuiltinProgram::Depth => (MESH_VERT, DEPTH_FRAG),
            BuiltinProgram::OrthoShadow => (SHADOW_VERT, ORTHOGRAPHIC_SHADOW_FRAG),
            BuiltinProgram::CubeShadow => (SHADOW_VERT, CUBE_SHADOW_FRAG),
            BuiltinProgram::ShadowBlurX | BuiltinProgram::ShadowBlurY => {
                (FULLSCREEN_VERT, SHADOW_BLUR_FRAG)
            }
            BuiltinProgram::CubeBlurX | BuiltinProgram::CubeBlurY => (FULLSCREEN_VERT, CUBE_BLUR_FRAG),
            BuiltinProgram::Ssao => (FULLSCREEN_VERT, SSAO_FRAG),
            BuiltinProgram::AaBlend => (FULLSCREEN_VERT, AA_BLEND_FRAG),
            BuiltinProgram::SsaaDownsample => (FULLSCREEN_VERT, SSAA_DOWNSAMPLE_FRAG),
            BuiltinProgram::Composite => (MESH_VERT, COMPOSITE_FRAG),
            BuiltinProgram::AdvancedBlend(_) => (FULLSCREEN_VERT, ADVANCED_BLEND_FRAG),
            BuiltinProgram::Text => (MESH_VERT, TEXT_FRAG),
            BuiltinProgram::Path => (MESH_VERT, PATH_FRAG),
        }
    }

    pub fn source(self) -> ProgramSource {
        let mut header = String::from(VERSION);
        for (define, enabled) in self.defines() {
            header.push_str(&format!("#define {define} {}\n", u8::from(enabled)));
        }
        let (vertex, fragment) = self.stages();
        ProgramSource {
            name: self.name(),
            vertex: format!("{header}{vertex}"),
            fragment: format!("{header}{fragment}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blur_directions_differ_only_by_define() {
        let x = BuiltinProgram::ShadowBlurX.source();
        let y = BuiltinProgram::ShadowBlurY.source();

        assert!(x.fragment.contains("#define BLUR_X 1"));
        assert!(y.fragment.contains("#define BLUR_X 0"));
        assert_ne!(x.name, y.name);
        assert!(x.fragment.starts_with("#version 330 core"));
    }

    #[test]
    fn advanced_blend_names_are_unique_per_mode() {
        let overlay = BuiltinProgram::AdvancedBlend(AdvancedBlendMode::Overlay).name();
        let dodge = BuiltinProgram::AdvancedBlend(AdvancedBlendMode::ColorDodge).name();
        assert_eq!(overlay, "advanced_blend_overlay");
        assert_ne!(overlay, dodge);
    }
}
