use glam::{Mat4, Vec3};

use super::{LayerPass, LayerRenderData, LayerStage, LAYER_COLOR_FORMAT};
use crate::device::{
    with_blend_state, with_depth_state, with_scissor, Attachment, AttachmentTarget, Capability, DepthState,
    FramebufferHandle, Rect, TextureDescriptor, TextureHandle, UniformValue,
};
use crate::error::RenderError;
use crate::renderer::blend::{layer_blend_setup, AdvancedBlendMode, BlendSetup, LayerBlendMode};
use crate::renderer::render_context::FrameContext;
use crate::renderer::shader::BuiltinProgram;
use crate::scene::{Camera, Layer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Screen,
    Texture,
}

/// Where layers are composited. `framebuffer` is `None` for the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeTarget {
    pub framebuffer: Option<FramebufferHandle>,
    pub width: u32,
    pub height: u32,
    pub kind: TargetKind,
}

impl CompositeTarget {
    pub fn screen(width: u32, height: u32) -> Self {
        Self {
            framebuffer: None,
            width,
            height,
            kind: TargetKind::Screen,
        }
    }

    pub fn texture(framebuffer: FramebufferHandle, width: u32, height: u32) -> Self {
        Self {
            framebuffer: Some(framebuffer),
            width,
            height,
            kind: TargetKind::Texture,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Layer rect (top-left origin) to device viewport (bottom-left origin).
    fn device_rect(&self, rect: Rect) -> Rect {
        let y = self.height as i32 - rect.y - rect.height as i32;
        Rect::new(rect.x, y, rect.width, rect.height)
    }
}

impl LayerRenderData {
    /// Draws the layer's output into `target` with the layer blend mode.
    pub fn composite(&mut self, ctx: &mut FrameContext<'_>, layer: &Layer, target: &CompositeTarget) {
        let Some(texture) = self.output_texture() else {
            log::debug!("Layer {:?} has nothing to composite", layer.id);
            return;
        };
        self.record(LayerStage::Composited, LayerPass::Composite);

        let viewport = target.device_rect(self.viewport);
        let direct_copy = target.kind == TargetKind::Texture
            && layer.blend_mode == LayerBlendMode::Normal
            && viewport == Rect::from_size(target.width, target.height);
        let result = if direct_copy {
            self.blit_output(ctx, texture, target, viewport)
        } else {
            self.draw_output(ctx, layer, texture, target, viewport)
        };
        if let Err(err) = result {
            log::warn!("Compositing layer {:?} failed: {}", layer.id, err);
        }

        if let Some(output) = self.effect_output.take() {
            ctx.pool.release_texture(output);
        }
    }

    fn blit_output(
        &self,
        ctx: &mut FrameContext<'_>,
        texture: TextureHandle,
        target: &CompositeTarget,
        viewport: Rect,
    ) -> Result<(), RenderError> {
        let (width, height) = ctx.pool.texture_size(texture).unwrap_or(self.texture_size);
        let src = ctx.acquire_target("composite", &[(Attachment::Color(0), AttachmentTarget::Texture(texture))])?;
        ctx.device.blit_framebuffer(
            Some(src),
            Rect::from_size(width, height),
            target.framebuffer,
            viewport,
            wgpu::FilterMode::Linear,
        );
        ctx.release_target(src);
        Ok(())
    }

    fn draw_output(
        &self,
        ctx: &mut FrameContext<'_>,
        layer: &Layer,
        texture: TextureHandle,
        target: &CompositeTarget,
        viewport: Rect,
    ) -> Result<(), RenderError> {
        let setup = layer_blend_setup(layer.blend_mode, ctx.device.has_capability(Capability::AdvancedBlend));
        let state = match setup {
            BlendSetup::Fixed(state) | BlendSetup::Hardware(state) => state,
            BlendSetup::Software(mode) => return self.draw_software_composite(ctx, mode, texture, target, viewport),
        };

        let bundle = ctx.use_builtin(BuiltinProgram::Composite)?;
        let program = bundle.program();
        let (width, height) = (viewport.width as f32, viewport.height as f32);
        let model = Mat4::from_scale(Vec3::new(width * 0.5, height * 0.5, 1.0));
        let mvp = Camera::layer_ortho().view_proj(width, height) * model;

        let quad = ctx.quad;
        ctx.device.set_render_target(target.framebuffer);
        ctx.device.set_viewport(viewport);
        with_scissor(ctx.device, Some(viewport), |device| {
            with_depth_state(device, DepthState::DISABLED, |device| {
                with_blend_state(device, Some(state), |device| {
                    bundle.model_view_projection.set(device, program, UniformValue::Mat4(mvp));
                    bundle.set(device, "layer_image", UniformValue::Texture2D(Some(texture)));
                    device.draw(&quad);
                })
            })
        });
        Ok(())
    }

    /// Copies the covered part of the target, then writes the blend of
    /// that copy and the layer back with blending off.
    fn draw_software_composite(
        &self,
        ctx: &mut FrameContext<'_>,
        mode: AdvancedBlendMode,
        texture: TextureHandle,
        target: &CompositeTarget,
        viewport: Rect,
    ) -> Result<(), RenderError> {
        let background = ctx
            .pool
            .acquire_texture(ctx.device, TextureDescriptor::new(viewport.width, viewport.height, LAYER_COLOR_FORMAT))
            .ok_or_else(|| RenderError::creation("composite background"))?;

        let drawn = (|| -> Result<(), RenderError> {
            let copy = ctx.acquire_target("composite background", &[(Attachment::Color(0), AttachmentTarget::Texture(background))])?;
            ctx.device.blit_framebuffer(
                target.framebuffer,
                viewport,
                Some(copy),
                Rect::from_size(viewport.width, viewport.height),
                wgpu::FilterMode::Nearest,
            );
            ctx.release_target(copy);

            let bundle = ctx.use_builtin(BuiltinProgram::AdvancedBlend(mode))?;
            let quad = ctx.quad;
            ctx.device.set_render_target(target.framebuffer);
            ctx.device.set_viewport(viewport);
            with_depth_state(ctx.device, DepthState::DISABLED, |device| {
                with_blend_state(device, None, |device| {
                    bundle.set(device, "base_layer", UniformValue::Texture2D(Some(background)));
                    bundle.set(device, "blend_layer", UniformValue::Texture2D(Some(texture)));
                    device.draw(&quad);
                })
            });
            Ok(())
        })();

        ctx.pool.release_texture(background);
        drawn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_rect_flips_to_bottom_left_origin() {
        let target = CompositeTarget::screen(800, 600);
        assert_eq!(target.device_rect(Rect::new(10, 20, 100, 50)), Rect::new(10, 530, 100, 50));
        assert_eq!(target.device_rect(Rect::from_size(800, 600)), Rect::from_size(800, 600));
    }
}
