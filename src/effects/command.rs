use crate::device::{BufferUsage, ImageAccess};

use super::property::PropertyValue;

/// Fixed-function toggles an effect may flip between draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderState {
    Blend,
    DepthTest,
    DepthWrite,
    Stencil,
    CullFace,
}

/// One step of an effect's command list. Names refer to buffers, images
/// and data buffers allocated earlier in the same list, or to entries of
/// the class shader table.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectCommand {
    /// Colour buffer sized relative to the effect input.
    AllocateBuffer {
        name: String,
        format: wgpu::TextureFormat,
        filter: wgpu::FilterMode,
        wrap: wgpu::AddressMode,
        size_multiplier: f32,
        /// Cleared before first use in every frame.
        per_frame: bool,
    },
    AllocateImage {
        name: String,
        format: wgpu::TextureFormat,
        access: ImageAccess,
        size_multiplier: f32,
    },
    AllocateDataBuffer {
        name: String,
        usage: BufferUsage,
        size: usize,
        per_frame: bool,
    },
    /// Allocates the effect output at input size and renders into it.
    BindTarget { format: wgpu::TextureFormat },
    BindBuffer { name: String, needs_clear: bool },
    BindShader { shader: String },
    /// Uploads one instance property, or all of them for `None`.
    ApplyInstanceValue { property: Option<String> },
    ApplyValue { property: String, value: PropertyValue },
    /// `None` disables blending.
    ApplyBlending(Option<(wgpu::BlendFactor, wgpu::BlendFactor)>),
    /// Binds a named buffer (or the effect input for `None`) to a sampler.
    /// Without a uniform name the texture becomes the source `Texture0`.
    ApplyBufferValue {
        buffer: Option<String>,
        uniform: Option<String>,
    },
    ApplyDepthValue { uniform: String },
    ApplyImageValue {
        image: String,
        uniform: String,
        /// Bind as a sampled texture instead of a load/store image.
        as_texture: bool,
    },
    ApplyDataBufferValue { buffer: String, block: String },
    ApplyRenderState { state: RenderState, enabled: bool },
    /// Draws the full-screen quad, or indirectly through a named data buffer.
    Render {
        needs_clear: bool,
        indirect: Option<String>,
    },
}

impl EffectCommand {
    pub fn name(&self) -> &'static str {
        match self {
            EffectCommand::AllocateBuffer { .. } => "AllocateBuffer",
            EffectCommand::AllocateImage { .. } => "AllocateImage",
            EffectCommand::AllocateDataBuffer { .. } => "AllocateDataBuffer",
            EffectCommand::BindTarget { .. } => "BindTarget",
            EffectCommand::BindBuffer { .. } => "BindBuffer",
            EffectCommand::BindShader { .. } => "BindShader",
            EffectCommand::ApplyInstanceValue { .. } => "ApplyInstanceValue",
            EffectCommand::ApplyValue { .. } => "ApplyValue",
            EffectCommand::ApplyBlending(_) => "ApplyBlending",
            EffectCommand::ApplyBufferValue { .. } => "ApplyBufferValue",
            EffectCommand::ApplyDepthValue { .. } => "ApplyDepthValue",
            EffectCommand::ApplyImageValue { .. } => "ApplyImageValue",
            EffectCommand::ApplyDataBufferValue { .. } => "ApplyDataBufferValue",
            EffectCommand::ApplyRenderState { .. } => "ApplyRenderState",
            EffectCommand::Render { .. } => "Render",
        }
    }
}
