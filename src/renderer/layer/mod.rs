//! Per-layer render state and pass sequencing.
//!
//! Each visible layer owns a [`LayerRenderData`] that lives across frames.
//! A frame walks it through `reset_for_frame`, `prepare_for_render`,
//! `render_to_texture` and `composite`; the passes it actually ran are
//! recorded and can be read back through [`LayerRenderData::pass_events`].

mod antialiasing;
mod composite;
mod passes;
mod preparation;

pub use antialiasing::{
    jitter_matrix, progressive_blend_factors, progressive_jitter, ssaa_render_size, temporal_jitter,
    PROGRESSIVE_BLEND_FACTORS, PROGRESSIVE_JITTER, TEMPORAL_BLEND_FACTORS, TEMPORAL_JITTER,
};
pub use composite::{CompositeTarget, TargetKind};
pub use preparation::{LightSubset, PreparedLayer};

use crate::device::{TextureDescriptor, TextureHandle};
use crate::error::RenderError;
use crate::renderer::render_context::FrameContext;
use crate::renderer::shadows::ShadowMapManager;
use crate::scene::NodeId;

pub const LAYER_COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const LAYER_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;
/// Sampled depth used by ambient occlusion and effects.
pub const DEPTH_TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
pub const AO_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R8Unorm;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerStage {
    Unprepared,
    Prepared,
    Shadow,
    Ao,
    DepthPrepass,
    Main,
    AaBlend,
    Effects,
    Composited,
}

/// Passes recorded while a layer renders, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerPass {
    Shadow,
    Ao,
    DepthPrepass,
    Main,
    AaBlend,
    Effects,
    Composite,
}

#[derive(Debug, Default)]
struct LayerTargets {
    /// Final colour at output size.
    color: Option<TextureHandle>,
    /// Supersampled colour, only with SSAA.
    render_color: Option<TextureHandle>,
    multisample_color: Option<TextureHandle>,
    depth: Option<TextureHandle>,
    depth_texture: Option<TextureHandle>,
    ao: Option<TextureHandle>,
    /// Running result of progressive or temporal accumulation.
    accumulator: Option<TextureHandle>,
}

impl LayerTargets {
    fn release(&mut self, ctx: &mut FrameContext<'_>) {
        for texture in [
            self.color.take(),
            self.render_color.take(),
            self.multisample_color.take(),
            self.depth.take(),
            self.depth_texture.take(),
            self.ao.take(),
            self.accumulator.take(),
        ]
        .into_iter()
        .flatten()
        {
            ctx.pool.release_texture(texture);
        }
    }
}

#[derive(Debug)]
pub struct LayerRenderData {
    layer: NodeId,
    stage: LayerStage,
    events: Vec<LayerPass>,
    viewport: crate::device::Rect,
    texture_size: (u32, u32),
    render_size: (u32, u32),
    sample_count: u32,
    ssaa: bool,
    targets: LayerTargets,
    effect_output: Option<TextureHandle>,
    progressive_index: u32,
    max_progressive_index: u32,
    temporal_index: u32,
    shadows: ShadowMapManager,
    prepared: Option<PreparedLayer>,
    effect_ids: Vec<NodeId>,
}

impl LayerRenderData {
    pub fn new(layer: NodeId) -> Self {
        Self {
            layer,
            stage: LayerStage::Unprepared,
            events: Vec::new(),
            viewport: crate::device::Rect::default(),
            texture_size: (0, 0),
            render_size: (0, 0),
            sample_count: 1,
            ssaa: false,
            targets: LayerTargets::default(),
            effect_output: None,
            progressive_index: 0,
            max_progressive_index: 0,
            temporal_index: 0,
            shadows: ShadowMapManager::new(),
            prepared: None,
            effect_ids: Vec::new(),
        }
    }

    pub fn layer_id(&self) -> NodeId {
        self.layer
    }

    pub fn stage(&self) -> LayerStage {
        self.stage
    }

    /// Passes run since the last `reset_for_frame`.
    pub fn pass_events(&self) -> &[LayerPass] {
        &self.events
    }

    pub fn progressive_pass_index(&self) -> u32 {
        self.progressive_index
    }

    /// Size the scene is rasterised at; larger than the output under SSAA.
    pub fn render_size(&self) -> (u32, u32) {
        self.render_size
    }

    pub fn texture_size(&self) -> (u32, u32) {
        self.texture_size
    }

    pub fn viewport(&self) -> crate::device::Rect {
        self.viewport
    }

    pub fn shadow_maps(&self) -> &ShadowMapManager {
        &self.shadows
    }

    pub fn prepared(&self) -> Option<&PreparedLayer> {
        self.prepared.as_ref()
    }

    /// Texture holding the layer's current image: effect output if effects
    /// ran, else the plugin texture, else the (accumulated) render.
    pub fn output_texture(&self) -> Option<TextureHandle> {
        self.effect_output
            .or_else(|| self.prepared.as_ref().and_then(|prepared| prepared.plugin))
            .or(self.rendered_texture())
    }

    fn rendered_texture(&self) -> Option<TextureHandle> {
        self.targets.accumulator.or(self.targets.color)
    }

    pub fn reset_for_frame(&mut self) {
        self.stage = LayerStage::Unprepared;
        self.events.clear();
        self.prepared = None;
    }

    fn record(&mut self, stage: LayerStage, pass: LayerPass) {
        self.stage = stage;
        self.events.push(pass);
    }

    /// Releases every texture, shadow map and effect context the layer holds.
    pub fn release(&mut self, ctx: &mut FrameContext<'_>) {
        self.targets.release(ctx);
        if let Some(output) = self.effect_output.take() {
            ctx.pool.release_texture(output);
        }
        self.shadows.release_all(ctx.pool);
        for id in self.effect_ids.drain(..) {
            ctx.effects.release_effect_context(ctx.device, ctx.pool, id);
        }
        self.prepared = None;
        self.progressive_index = 0;
        self.stage = LayerStage::Unprepared;
    }
}

/// Returns a pooled texture matching `desc`, keeping `slot` when it already
/// matches. A failed allocation leaves the previous texture in place.
fn ensure_texture(
    ctx: &mut FrameContext<'_>,
    slot: &mut Option<TextureHandle>,
    desc: TextureDescriptor,
    what: &str,
) -> Result<TextureHandle, RenderError> {
    if let Some(texture) = *slot {
        if ctx.pool.texture_descriptor(texture) == Some(desc) {
            return Ok(texture);
        }
    }
    let texture = ctx
        .pool
        .acquire_texture(ctx.device, desc)
        .ok_or_else(|| RenderError::creation(format!("{what} {}x{}", desc.width, desc.height)))?;
    if let Some(stale) = slot.replace(texture) {
        ctx.pool.release_texture(stale);
    }
    Ok(texture)
}
