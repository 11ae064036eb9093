use std::collections::HashMap;

use glam::Vec4;

use crate::device::{ClearFlags, DepthState, Geometry, GraphicsDevice, Rect, TextureHandle};
use crate::effects::EffectSystem;
use crate::error::RenderError;
use crate::renderer::layer::{CompositeTarget, LayerRenderData};
use crate::renderer::render_context::FrameContext;
use crate::renderer::render_task::RenderToTextureTask;
use crate::renderer::resource_pool::ResourcePool;
use crate::renderer::shader::ShaderCache;
use crate::renderer::vertex::create_quad_geometry;
use crate::scene::{NodeId, Scene};
use crate::settings::RenderSettings;

/// Per-frame driver. Owns the device and every cache the layer pipeline
/// shares, plus the render data of each layer it has seen.
pub struct Renderer<D: GraphicsDevice> {
    device: D,
    pool: ResourcePool,
    shaders: ShaderCache,
    effects: EffectSystem,
    settings: RenderSettings,
    quad: Geometry,
    layers: HashMap<NodeId, LayerRenderData>,
    presentation: (u32, u32),
    frame: u32,
}

impl<D: GraphicsDevice> Renderer<D> {
    pub fn new(mut device: D, settings: RenderSettings) -> Result<Self, RenderError> {
        let settings = settings.validate();
        let quad = create_quad_geometry(&mut device).ok_or_else(|| RenderError::creation("full-screen quad"))?;
        let shaders = ShaderCache::new(settings.prefer_constant_buffers);
        let presentation = (settings.resolution.width, settings.resolution.height);
        log::info!(
            "Renderer ready: {}x{}, constant buffers {}",
            presentation.0,
            presentation.1,
            if shaders.prefers_constant_buffers() { "on" } else { "off" }
        );

        Ok(Self {
            device,
            pool: ResourcePool::new(),
            shaders,
            effects: EffectSystem::new(),
            settings,
            quad,
            layers: HashMap::new(),
            presentation,
            frame: 0,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    pub fn shaders(&self) -> &ShaderCache {
        &self.shaders
    }

    pub fn effects(&self) -> &EffectSystem {
        &self.effects
    }

    /// Effect and custom material classes are registered through this.
    pub fn effects_mut(&mut self) -> &mut EffectSystem {
        &mut self.effects
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn presentation_size(&self) -> (u32, u32) {
        self.presentation
    }

    pub fn frame_index(&self) -> u32 {
        self.frame
    }

    pub fn layer_data(&self, layer: NodeId) -> Option<&LayerRenderData> {
        self.layers.get(&layer)
    }

    fn frame_parts(&mut self) -> (FrameContext<'_>, &mut HashMap<NodeId, LayerRenderData>) {
        let ctx = FrameContext {
            device: &mut self.device,
            pool: &mut self.pool,
            shaders: &mut self.shaders,
            effects: &mut self.effects,
            settings: &self.settings,
            quad: self.quad,
            frame: self.frame,
        };
        (ctx, &mut self.layers)
    }

    /// Sets the presentation size. A change drops every pooled resource
    /// whose size no longer fits.
    pub fn resize(&mut self, size: (u32, u32)) {
        if size == self.presentation {
            return;
        }
        log::info!("Presentation resized to {}x{}", size.0, size.1);
        self.presentation = size;
        self.pool.destroy_free_sized_resources(&mut self.device);
    }

    /// Renders every visible layer of `scene` in stacking order and
    /// composites it into `target`.
    pub fn render_frame(&mut self, scene: &Scene, target: &CompositeTarget) {
        self.resize(target.size());
        self.release_vanished_layers(scene);

        let presentation = self.presentation;
        let (mut ctx, layers) = self.frame_parts();
        ctx.device.set_render_target(target.framebuffer);
        ctx.device.set_viewport(Rect::from_size(target.width, target.height));
        ctx.device.set_depth_state(DepthState::default());
        ctx.device.clear(ClearFlags::COLOR | ClearFlags::DEPTH, Vec4::ZERO, 1.0);

        for layer in scene.visible_layers() {
            let data = layers.entry(layer.id).or_insert_with(|| LayerRenderData::new(layer.id));
            data.reset_for_frame();
            if !data.prepare_for_render(&mut ctx, layer, presentation) {
                continue;
            }
            data.render_to_texture(&mut ctx, layer);
            data.composite(&mut ctx, layer, target);
        }
        self.frame = self.frame.wrapping_add(1);
    }

    /// Prepares and renders one layer into its own texture without
    /// compositing it. Returns the layer's output texture.
    pub fn render_layer_to_texture(&mut self, scene: &Scene, layer_id: NodeId) -> Option<TextureHandle> {
        let Some(layer) = scene.layer(layer_id) else {
            log::warn!("Render-to-texture for unknown layer {:?}", layer_id);
            return None;
        };
        let presentation = self.presentation;
        let (mut ctx, layers) = self.frame_parts();
        let data = layers.entry(layer_id).or_insert_with(|| LayerRenderData::new(layer_id));
        data.reset_for_frame();
        if !data.prepare_for_render(&mut ctx, layer, presentation) {
            return None;
        }
        data.render_to_texture(&mut ctx, layer);
        data.output_texture()
    }

    pub fn create_render_to_texture_task(&self, layer: NodeId) -> RenderToTextureTask {
        RenderToTextureTask::new(layer)
    }

    /// Releases every resource held for `layer`.
    pub fn release_layer(&mut self, layer: NodeId) {
        let (mut ctx, layers) = self.frame_parts();
        if let Some(mut data) = layers.remove(&layer) {
            data.release(&mut ctx);
        }
    }

    /// Drops the render data of layers that are gone from `scene` or hidden.
    fn release_vanished_layers(&mut self, scene: &Scene) {
        let (mut ctx, layers) = self.frame_parts();
        layers.retain(|id, data| {
            match scene.layer(*id) {
                Some(layer) if layer.visible => return true,
                Some(_) => log::debug!("Layer {:?} hidden, releasing its targets", id),
                None => log::debug!("Layer {:?} left the scene, releasing its targets", id),
            }
            data.release(&mut ctx);
            false
        });
    }

    /// Releases everything the renderer allocated on the device.
    pub fn shutdown(&mut self) {
        let (mut ctx, layers) = self.frame_parts();
        for (_, mut data) in layers.drain() {
            data.release(&mut ctx);
        }
        self.effects.release_all(&mut self.device, &mut self.pool);
        self.shaders.release_all(&mut self.device);
        self.pool.release_all(&mut self.device);
        if let Some(buffer) = self.quad.vertex_buffer {
            self.device.destroy_buffer(buffer);
        }
        if let Some(buffer) = self.quad.index_buffer {
            self.device.destroy_buffer(buffer);
        }
        log::info!("Renderer shut down after {} frames", self.frame);
    }
}
