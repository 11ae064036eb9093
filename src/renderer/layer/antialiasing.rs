//! Progressive and temporal accumulation plus MSAA/SSAA resolve.

use glam::{Mat4, Vec2, Vec3, Vec4};

use super::{ensure_texture, LayerRenderData, LAYER_COLOR_FORMAT};
use crate::device::{
    Attachment, AttachmentTarget, ClearFlags, DepthState, Rect, TextureDescriptor, TextureHandle,
    UniformValue,
};
use crate::error::RenderError;
use crate::renderer::render_context::FrameContext;
use crate::renderer::shader::BuiltinProgram;

/// (new frame, accumulator) weights for progressive pass 1..=8.
/// Pass `n` leaves each of the `n + 1` frames with an equal share.
pub const PROGRESSIVE_BLEND_FACTORS: [Vec2; 8] = [
    Vec2::new(0.5, 0.5),
    Vec2::new(0.333_333, 0.666_667),
    Vec2::new(0.25, 0.75),
    Vec2::new(0.2, 0.8),
    Vec2::new(0.166_667, 0.833_333),
    Vec2::new(0.142_857, 0.857_143),
    Vec2::new(0.125, 0.875),
    Vec2::new(0.111_111, 0.888_889),
];

pub const TEMPORAL_BLEND_FACTORS: Vec2 = Vec2::new(0.5, 0.5);

/// Sub-pixel offsets, in pixels, for progressive passes.
pub const PROGRESSIVE_JITTER: [Vec2; 8] = [
    Vec2::new(-0.170_84, -0.553_84),
    Vec2::new(0.162_96, -0.319_34),
    Vec2::new(0.360_26, -0.245_84),
    Vec2::new(-0.561_34, -0.149_54),
    Vec2::new(0.249_46, 0.453_46),
    Vec2::new(-0.336_34, 0.378_26),
    Vec2::new(0.34, 0.166_26),
    Vec2::new(0.111_67, 0.495_46),
];

pub const TEMPORAL_JITTER: [Vec2; 2] = [Vec2::new(0.3, 0.3), Vec2::new(-0.3, -0.3)];

/// Blend weights of progressive pass `pass_index`. Pass 0 is the plain
/// first frame and has none.
pub fn progressive_blend_factors(pass_index: u32) -> Option<Vec2> {
    let index = pass_index.checked_sub(1)? as usize;
    PROGRESSIVE_BLEND_FACTORS.get(index).copied()
}

pub fn progressive_jitter(pass_index: u32) -> Vec2 {
    let index = pass_index.saturating_sub(1) as usize % PROGRESSIVE_JITTER.len();
    PROGRESSIVE_JITTER[index]
}

pub fn temporal_jitter(frame: u32) -> Vec2 {
    TEMPORAL_JITTER[frame as usize % TEMPORAL_JITTER.len()]
}

/// Clip-space translation that shifts the image by `jitter` pixels.
pub fn jitter_matrix(jitter: Vec2, (width, height): (u32, u32)) -> Mat4 {
    let width = width.max(1) as f32;
    let height = height.max(1) as f32;
    Mat4::from_translation(Vec3::new(2.0 * jitter.x / width, 2.0 * jitter.y / height, 0.0))
}

/// Supersampled render size, clamped to what the device can allocate.
pub fn ssaa_render_size((width, height): (u32, u32), multiplier: f32, max_size: u32) -> (u32, u32) {
    let scale = |value: u32| ((value as f32 * multiplier).ceil() as u32).clamp(1, max_size.max(1));
    (scale(width), scale(height))
}

impl LayerRenderData {
    /// Brings the main pass result into `targets.color`: a blit for MSAA, a
    /// filtered downsample for SSAA, nothing when rendered directly.
    pub(super) fn resolve_main(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), RenderError> {
        let color_desc = TextureDescriptor::new(self.texture_size.0, self.texture_size.1, LAYER_COLOR_FORMAT);
        if let Some(multisample) = self.targets.multisample_color {
            let color = ensure_texture(ctx, &mut self.targets.color, color_desc, "layer colour")?;
            let src = ctx.acquire_target("msaa resolve", &[(Attachment::Color(0), AttachmentTarget::Texture(multisample))])?;
            let dst = match ctx.acquire_target("msaa resolve", &[(Attachment::Color(0), AttachmentTarget::Texture(color))]) {
                Ok(dst) => dst,
                Err(err) => {
                    ctx.release_target(src);
                    return Err(err);
                }
            };
            ctx.device.blit_framebuffer(
                Some(src),
                Rect::from_size(self.render_size.0, self.render_size.1),
                Some(dst),
                Rect::from_size(self.texture_size.0, self.texture_size.1),
                wgpu::FilterMode::Nearest,
            );
            ctx.release_target(src);
            ctx.release_target(dst);
            return Ok(());
        }

        let Some(supersampled) = self.targets.render_color.filter(|_| self.ssaa) else {
            return Ok(());
        };
        let color = ensure_texture(ctx, &mut self.targets.color, color_desc, "layer colour")?;
        let fb = ctx.acquire_target("ssaa downsample", &[(Attachment::Color(0), AttachmentTarget::Texture(color))])?;
        let drawn = self.draw_downsample(ctx, fb, supersampled);
        ctx.release_target(fb);
        drawn
    }

    fn draw_downsample(
        &self,
        ctx: &mut FrameContext<'_>,
        fb: crate::device::FramebufferHandle,
        source: TextureHandle,
    ) -> Result<(), RenderError> {
        let bundle = ctx.use_builtin(BuiltinProgram::SsaaDownsample)?;
        ctx.device.set_render_target(Some(fb));
        ctx.device.set_viewport(Rect::from_size(self.texture_size.0, self.texture_size.1));
        ctx.device.set_depth_state(DepthState::DISABLED);
        ctx.device.set_blend_state(None);
        ctx.device.set_texture_sampling(source, crate::device::TextureSampling::LINEAR_CLAMP);
        bundle.set(ctx.device, "source_texture", UniformValue::Texture2D(Some(source)));
        let (w, h) = self.render_size;
        bundle.set(ctx.device, "source_size", UniformValue::Vec2(Vec2::new(w as f32, h as f32)));
        ctx.device.draw(&ctx.quad);
        Ok(())
    }

    /// Folds this frame's colour into the accumulator. With `factors` and a
    /// previous accumulation the two are blended; otherwise the frame is
    /// copied and starts a new accumulation.
    pub(super) fn accumulate(&mut self, ctx: &mut FrameContext<'_>, factors: Option<Vec2>) -> Result<bool, RenderError> {
        let Some(color) = self.targets.color else {
            return Err(RenderError::MissingTarget("layer colour".to_string()));
        };
        let (width, height) = self.texture_size;
        let next = ctx
            .pool
            .acquire_texture(ctx.device, TextureDescriptor::new(width, height, LAYER_COLOR_FORMAT))
            .ok_or_else(|| RenderError::creation(format!("accumulation target {width}x{height}")))?;
        let dst = match ctx.acquire_target("aa blend", &[(Attachment::Color(0), AttachmentTarget::Texture(next))]) {
            Ok(fb) => fb,
            Err(err) => {
                ctx.pool.release_texture(next);
                return Err(err);
            }
        };

        let blended = match (factors, self.targets.accumulator) {
            (Some(factors), Some(previous)) => {
                let drawn = self.draw_blend(ctx, dst, color, previous, factors);
                if let Err(err) = drawn {
                    ctx.release_target(dst);
                    ctx.pool.release_texture(next);
                    return Err(err);
                }
                true
            }
            _ => {
                match ctx.acquire_target("aa copy", &[(Attachment::Color(0), AttachmentTarget::Texture(color))]) {
                    Ok(src) => {
                        let full = Rect::from_size(width, height);
                        ctx.device.blit_framebuffer(Some(src), full, Some(dst), full, wgpu::FilterMode::Nearest);
                        ctx.release_target(src);
                    }
                    Err(err) => {
                        ctx.release_target(dst);
                        ctx.pool.release_texture(next);
                        return Err(err);
                    }
                }
                false
            }
        };
        ctx.release_target(dst);

        if let Some(previous) = self.targets.accumulator.replace(next) {
            ctx.pool.release_texture(previous);
        }
        Ok(blended)
    }

    fn draw_blend(
        &self,
        ctx: &mut FrameContext<'_>,
        fb: crate::device::FramebufferHandle,
        frame: TextureHandle,
        accumulator: TextureHandle,
        factors: Vec2,
    ) -> Result<(), RenderError> {
        let bundle = ctx.use_builtin(BuiltinProgram::AaBlend)?;
        ctx.device.set_render_target(Some(fb));
        ctx.device.set_viewport(Rect::from_size(self.texture_size.0, self.texture_size.1));
        ctx.device.set_depth_state(DepthState::DISABLED);
        ctx.device.set_blend_state(None);
        ctx.device.clear(ClearFlags::COLOR, Vec4::ZERO, 1.0);
        bundle.set(ctx.device, "last_frame", UniformValue::Texture2D(Some(frame)));
        bundle.set(ctx.device, "accumulator", UniformValue::Texture2D(Some(accumulator)));
        bundle.set(ctx.device, "blend_factors", UniformValue::Vec2(factors));
        ctx.device.draw(&ctx.quad);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_weights_give_every_pass_an_equal_share() {
        assert_eq!(progressive_blend_factors(0), None);
        for pass in 1..=8u32 {
            let factors = progressive_blend_factors(pass).unwrap();
            assert!((factors.x + factors.y - 1.0).abs() < 1e-5);
            let frames = pass as f32 + 1.0;
            assert!((factors.x - 1.0 / frames).abs() < 1e-5, "pass {pass}: {factors:?}");
        }
        assert_eq!(progressive_blend_factors(9), None);
    }

    #[test]
    fn jitter_wraps_and_scales_to_clip_space() {
        assert_eq!(progressive_jitter(1), PROGRESSIVE_JITTER[0]);
        assert_eq!(progressive_jitter(9), PROGRESSIVE_JITTER[0]);
        assert_eq!(temporal_jitter(3), TEMPORAL_JITTER[1]);

        let shift = jitter_matrix(Vec2::new(0.5, -0.5), (100, 50));
        let moved = shift.transform_point3(Vec3::ZERO);
        assert!(moved.abs_diff_eq(Vec3::new(0.01, -0.02, 0.0), 1e-6));
    }

    #[test]
    fn ssaa_size_rounds_up_and_respects_device_limit() {
        assert_eq!(ssaa_render_size((400, 300), 1.5, 8192), (600, 450));
        assert_eq!(ssaa_render_size((101, 33), 1.5, 8192), (152, 50));
        assert_eq!(ssaa_render_size((4000, 300), 2.0, 4096), (4096, 600));
    }
}
