//! The passes `render_to_texture` runs, in their fixed order.

use glam::{Mat4, Vec2, Vec3, Vec4};

use super::preparation::PreparedLayer;
use super::{
    ensure_texture, LayerPass, LayerRenderData, LayerStage, AO_FORMAT, DEPTH_TEXTURE_FORMAT, LAYER_COLOR_FORMAT,
    LAYER_DEPTH_FORMAT,
};
use crate::device::{
    with_blend_state, with_depth_state, with_state, Attachment, AttachmentTarget, Capability, ClearFlags, CubeFace,
    DepthState, FramebufferHandle, Geometry, ProgramHandle, Rect, StateAccessor, TextureDescriptor, TextureHandle,
    UniformValue,
};
use crate::effects::EffectRenderArgs;
use crate::error::RenderError;
use crate::renderer::blend::{material_blend_setup, BlendSetup, MaterialBlendMode};
use crate::renderer::render_context::FrameContext;
use crate::renderer::renderable::{Renderable, RenderableFlags, RenderableKind};
use crate::renderer::shader::cache::{ao_properties, screen_constants, shadow_properties};
use crate::renderer::shader::{AoBinding, BuiltinProgram, GlobalInputs, MaterialInputs};
use crate::renderer::shadows::{ShadowMapEntry, ShadowMapKind, CUBE_SHADOW_NEAR};
use crate::scene::{Layer, LayerBackground, Material};

/// Filter width the blur step scale is measured against.
const SHADOW_FILTER_REFERENCE: f32 = 35.0;

type Attachments = Vec<(Attachment, AttachmentTarget)>;

impl LayerRenderData {
    /// Renders the prepared layer into its textures and runs its effects.
    /// Failures inside a pass are logged and leave that pass's output stale.
    pub fn render_to_texture(&mut self, ctx: &mut FrameContext<'_>, layer: &Layer) {
        if let Some(output) = self.effect_output.take() {
            ctx.pool.release_texture(output);
        }
        let Some(prepared) = self.prepared.take() else {
            log::warn!("Layer {:?} rendered without being prepared", layer.id);
            return;
        };

        if prepared.plugin.is_none() && !prepared.skip_render {
            self.render_passes(ctx, layer, &prepared);
        }
        self.run_effects(ctx, layer, &prepared);
        self.prepared = Some(prepared);
    }

    fn render_passes(&mut self, ctx: &mut FrameContext<'_>, layer: &Layer, prepared: &PreparedLayer) {
        if self.progressive_index == 0 && !self.shadows.entries().is_empty() {
            self.record(LayerStage::Shadow, LayerPass::Shadow);
            self.render_shadow_maps(ctx, layer, prepared);
        }

        let ao_due = prepared.needs_ao && (self.progressive_index == 0 || self.targets.ao.is_none());
        let effects_need_depth = prepared.needs_depth_texture && layer.active_effects().next().is_some();
        if ao_due {
            self.record(LayerStage::Ao, LayerPass::Ao);
        }
        if ao_due || effects_need_depth {
            let rendered = self
                .render_depth_texture(ctx, layer, prepared)
                .and_then(|()| if ao_due { self.render_ao(ctx, layer, prepared) } else { Ok(()) });
            if let Err(err) = rendered {
                log::warn!("Layer {:?} depth/AO pass skipped: {}", layer.id, err);
            }
        }

        let mut prepass_ran = false;
        if prepared.depth_prepass {
            self.record(LayerStage::DepthPrepass, LayerPass::DepthPrepass);
            match self.render_depth_prepass(ctx, layer, prepared) {
                Ok(()) => prepass_ran = true,
                Err(err) => log::warn!("Layer {:?} depth prepass skipped: {}", layer.id, err),
            }
        }

        self.record(LayerStage::Main, LayerPass::Main);
        if let Err(err) = self.render_main(ctx, layer, prepared, prepass_ran).and_then(|()| self.resolve_main(ctx)) {
            log::warn!("Layer {:?} main pass failed: {}", layer.id, err);
            return;
        }

        if prepared.accumulate {
            if prepared.blend_factors.is_some() && self.targets.accumulator.is_some() {
                self.record(LayerStage::AaBlend, LayerPass::AaBlend);
            }
            if let Err(err) = self.accumulate(ctx, prepared.blend_factors) {
                log::warn!("Layer {:?} AA blend skipped: {}", layer.id, err);
            }
        }

        if self.progressive_index < self.max_progressive_index {
            self.progressive_index += 1;
        }
        if layer.temporal_aa {
            self.temporal_index = self.temporal_index.wrapping_add(1);
        }
    }

    fn render_shadow_maps(&mut self, ctx: &mut FrameContext<'_>, layer: &Layer, prepared: &PreparedLayer) {
        for entry in self.shadows.entries() {
            let Some(light) = layer.lights.iter().find(|light| light.id == entry.light) else {
                continue;
            };
            let filter = light.shadow_filter / SHADOW_FILTER_REFERENCE;
            let rendered = match entry.kind {
                ShadowMapKind::Directional => render_directional_shadow(ctx, entry, &prepared.shadow_casters),
                ShadowMapKind::Cube => render_cube_shadow(ctx, entry, &prepared.shadow_casters),
            }
            .and_then(|()| blur_shadow_map(ctx, entry, Vec2::new(filter, entry.control.z)));
            if let Err(err) = rendered {
                log::warn!("Shadow map of light {:?} skipped: {}", entry.light, err);
            }
        }
    }

    fn render_depth_texture(&mut self, ctx: &mut FrameContext<'_>, layer: &Layer, prepared: &PreparedLayer) -> Result<(), RenderError> {
        let (width, height) = self.render_size;
        let depth = ensure_texture(
            ctx,
            &mut self.targets.depth_texture,
            TextureDescriptor::new(width, height, DEPTH_TEXTURE_FORMAT),
            "depth texture",
        )?;
        let fb = ctx.acquire_target("depth texture", &[(Attachment::Depth, AttachmentTarget::Texture(depth))])?;
        let drawn = self.draw_depth_only(ctx, fb, prepared, layer.write_transparent_depth);
        ctx.release_target(fb);
        drawn
    }

    fn render_ao(&mut self, ctx: &mut FrameContext<'_>, layer: &Layer, prepared: &PreparedLayer) -> Result<(), RenderError> {
        let depth = self
            .targets
            .depth_texture
            .ok_or_else(|| RenderError::MissingTarget("depth texture".to_string()))?;
        let (width, height) = self.render_size;
        let ao = ensure_texture(ctx, &mut self.targets.ao, TextureDescriptor::new(width, height, AO_FORMAT), "ambient occlusion")?;
        let fb = ctx.acquire_target("ambient occlusion", &[(Attachment::Color(0), AttachmentTarget::Texture(ao))])?;
        let drawn = self.draw_ao(ctx, fb, depth, layer, prepared);
        ctx.release_target(fb);
        drawn
    }

    fn draw_ao(
        &self,
        ctx: &mut FrameContext<'_>,
        fb: FramebufferHandle,
        depth: TextureHandle,
        layer: &Layer,
        prepared: &PreparedLayer,
    ) -> Result<(), RenderError> {
        let bundle = ctx.use_builtin(BuiltinProgram::Ssao)?;
        let program = bundle.program();
        ctx.device.set_render_target(Some(fb));
        ctx.device.set_viewport(Rect::from_size(self.render_size.0, self.render_size.1));
        ctx.device.set_blend_state(None);
        ctx.device.set_depth_state(DepthState::DISABLED);
        ctx.device.clear(ClearFlags::COLOR, Vec4::ONE, 1.0);

        let (props, props2) = ao_properties(&layer.ao);
        bundle.set(ctx.device, "depth_texture", UniformValue::Texture2D(Some(depth)));
        bundle.camera_properties.set(ctx.device, program, UniformValue::Vec2(prepared.camera.clip_range()));
        bundle.ao_properties.set(ctx.device, program, UniformValue::Vec4(props));
        bundle.ao_properties2.set(ctx.device, program, UniformValue::Vec4(props2));
        bundle
            .shadow_properties
            .set(ctx.device, program, UniformValue::Vec4(shadow_properties(&layer.shadow)));
        bundle
            .ao_screen_const
            .set(ctx.device, program, UniformValue::Vec4(screen_constants(self.render_size)));
        ctx.device.draw(&ctx.quad);
        Ok(())
    }

    fn render_depth_prepass(&mut self, ctx: &mut FrameContext<'_>, layer: &Layer, prepared: &PreparedLayer) -> Result<(), RenderError> {
        let attachments = self.main_attachments(ctx)?;
        let fb = ctx.acquire_target("depth prepass", &attachments)?;
        let drawn = self.draw_depth_only(ctx, fb, prepared, layer.write_transparent_depth);
        ctx.release_target(fb);
        drawn
    }

    /// Depth-only draw of the opaque objects (and transparent ones when
    /// they write depth). Colour writes are off for the duration.
    fn draw_depth_only(
        &self,
        ctx: &mut FrameContext<'_>,
        fb: FramebufferHandle,
        prepared: &PreparedLayer,
        include_transparent: bool,
    ) -> Result<(), RenderError> {
        let bundle = ctx.use_builtin(BuiltinProgram::Depth)?;
        let program = bundle.program();
        ctx.device.set_render_target(Some(fb));
        ctx.device.set_viewport(Rect::from_size(self.render_size.0, self.render_size.1));
        ctx.device.set_blend_state(None);

        let transparent = prepared.transparent.iter().filter(|_| include_transparent);
        let renderables = prepared.opaque.iter().chain(transparent);
        with_depth_state(ctx.device, DepthState::new(true, true), |device| {
            with_state(device, StateAccessor::COLOR_WRITES, false, |device| {
                device.clear(ClearFlags::DEPTH | ClearFlags::STENCIL, Vec4::ZERO, 1.0);
                for renderable in renderables {
                    bundle.model_view_projection.set(
                        device,
                        program,
                        UniformValue::Mat4(renderable.common.model_view_projection),
                    );
                    device.draw(&renderable.common.geometry);
                }
            })
        });
        Ok(())
    }

    /// Colour and depth attachments of the main pass at render size.
    fn main_attachments(&mut self, ctx: &mut FrameContext<'_>) -> Result<Attachments, RenderError> {
        let (width, height) = self.render_size;
        let color_desc = TextureDescriptor::new(width, height, LAYER_COLOR_FORMAT);
        let color = if self.sample_count > 1 {
            ensure_texture(
                ctx,
                &mut self.targets.multisample_color,
                color_desc.with_samples(self.sample_count),
                "multisample colour",
            )?
        } else if self.ssaa {
            ensure_texture(ctx, &mut self.targets.render_color, color_desc, "supersampled colour")?
        } else {
            ensure_texture(ctx, &mut self.targets.color, color_desc, "layer colour")?
        };
        let depth = ensure_texture(
            ctx,
            &mut self.targets.depth,
            TextureDescriptor::new(width, height, LAYER_DEPTH_FORMAT).with_samples(self.sample_count),
            "layer depth",
        )?;
        Ok(vec![
            (Attachment::Color(0), AttachmentTarget::Texture(color)),
            (Attachment::DepthStencil, AttachmentTarget::Texture(depth)),
        ])
    }

    fn render_main(
        &mut self,
        ctx: &mut FrameContext<'_>,
        layer: &Layer,
        prepared: &PreparedLayer,
        prepass_ran: bool,
    ) -> Result<(), RenderError> {
        let attachments = self.main_attachments(ctx)?;
        let fb = ctx.acquire_target("main", &attachments)?;
        let viewport = Rect::from_size(self.render_size.0, self.render_size.1);
        ctx.device.set_render_target(Some(fb));
        ctx.device.set_viewport(viewport);
        ctx.device.set_color_writes(true);

        let clear_color = match layer.background {
            LayerBackground::Color => layer.clear_color,
            LayerBackground::Transparent | LayerBackground::Unspecified => Vec4::ZERO,
        };
        let mut clear = ClearFlags::COLOR;
        if !prepass_ran {
            clear |= ClearFlags::DEPTH | ClearFlags::STENCIL;
        }
        ctx.device.clear(clear, clear_color, 1.0);

        let depth_test = layer.depth_test_enabled;
        ctx.device.set_blend_state(None);
        ctx.device.set_depth_state(DepthState::new(depth_test, depth_test));
        for renderable in &prepared.opaque {
            self.draw_renderable(ctx, layer, prepared, renderable, false);
        }

        ctx.device.set_depth_state(DepthState::new(depth_test, depth_test && layer.write_transparent_depth));
        for renderable in &prepared.transparent {
            if renderable.flags().contains(RenderableFlags::SOFTWARE_BLEND) {
                if let Err(err) = self.draw_software_blended(ctx, fb, layer, prepared, renderable) {
                    log::warn!("Software blend of {:?} skipped: {}", renderable.common.node, err);
                }
                ctx.device.set_render_target(Some(fb));
                ctx.device.set_viewport(viewport);
                ctx.device.set_depth_state(DepthState::new(depth_test, depth_test && layer.write_transparent_depth));
            } else {
                self.draw_renderable(ctx, layer, prepared, renderable, true);
            }
        }

        ctx.device.set_blend_state(None);
        ctx.device.set_depth_state(DepthState::default());
        ctx.release_target(fb);
        Ok(())
    }

    fn ao_binding<'l>(&self, layer: &'l Layer, prepared: &PreparedLayer) -> Option<AoBinding<'l>> {
        let texture = self.targets.ao.filter(|_| prepared.needs_ao)?;
        Some(AoBinding {
            texture,
            ao: &layer.ao,
            shadow: &layer.shadow,
            screen_size: self.render_size,
        })
    }

    fn bind_globals(&self, ctx: &mut FrameContext<'_>, program: ProgramHandle, prepared: &PreparedLayer, renderable: &Renderable) {
        let lights = prepared
            .light_subsets
            .get(renderable.common.light_subset)
            .map(|subset| subset.constants.as_slice())
            .unwrap_or_default();
        let shadow_maps = self.shadows.bindings();
        ctx.shaders.set_global_properties(
            ctx.device,
            program,
            &GlobalInputs {
                view: prepared.view,
                projection: prepared.projection,
                camera_position: prepared.camera.position(),
                camera_direction: prepared.camera.direction(),
                clip_range: prepared.camera.clip_range(),
                ambient_total: prepared.ambient_total,
                lights,
                shadow_maps: &shadow_maps,
            },
        );
    }

    /// Draws one renderable into the current target. Program failures were
    /// already reported by the shader cache, so they are skipped quietly.
    fn draw_renderable(
        &self,
        ctx: &mut FrameContext<'_>,
        layer: &Layer,
        prepared: &PreparedLayer,
        renderable: &Renderable,
        blending: bool,
    ) {
        let common = &renderable.common;
        match &renderable.kind {
            RenderableKind::DefaultMaterial {
                model,
                subset,
                key,
                pipeline,
            } => {
                let Material::Default(material) = &layer.models[*model].subsets[*subset].material else {
                    return;
                };
                let Some(program) = ctx.shaders.generate_shader(
                    ctx.device,
                    material,
                    *key,
                    *pipeline,
                    prepared.features,
                    common.is_transparent(),
                ) else {
                    return;
                };
                ctx.device.set_active_program(Some(program));
                self.bind_globals(ctx, program, prepared, renderable);
                ctx.shaders.set_material_properties(
                    ctx.device,
                    program,
                    &MaterialInputs {
                        material,
                        model_view_projection: common.model_view_projection,
                        model_matrix: common.model_matrix,
                        normal_matrix: common.normal_matrix,
                        opacity: common.opacity,
                        layer_probe: layer.light_probe.as_ref(),
                        ao: self.ao_binding(layer, prepared),
                        blending,
                    },
                );
                ctx.device.draw(&common.geometry);
            }
            RenderableKind::CustomMaterial { model, subset } => {
                let Material::Custom(custom) = &layer.models[*model].subsets[*subset].material else {
                    return;
                };
                let Some(program) = ctx.effects.custom_material_program(ctx.device, ctx.shaders, &custom.instance) else {
                    return;
                };
                ctx.device.set_active_program(Some(program));
                self.bind_globals(ctx, program, prepared, renderable);
                let bundle = ctx.shaders.get_or_create_shader_entry(ctx.device, program);
                bundle
                    .model_view_projection
                    .set(ctx.device, program, UniformValue::Mat4(common.model_view_projection));
                bundle.model_matrix.set(ctx.device, program, UniformValue::Mat4(common.model_matrix));
                bundle.normal_matrix.set(ctx.device, program, UniformValue::Mat3(common.normal_matrix));
                bundle.object_opacity.set(ctx.device, program, UniformValue::Float(common.opacity));
                ctx.effects
                    .apply_instance_values(ctx.device, ctx.shaders, program, &custom.instance, None);
                if blending {
                    set_normal_blend(ctx);
                }
                ctx.device.draw(&common.geometry);
            }
            RenderableKind::Text { index } => {
                let text = &layer.texts[*index];
                let Ok(bundle) = ctx.use_builtin(BuiltinProgram::Text) else {
                    return;
                };
                let program = bundle.program();
                bundle
                    .model_view_projection
                    .set(ctx.device, program, UniformValue::Mat4(common.model_view_projection));
                bundle.set(ctx.device, "text_texture", UniformValue::Texture2D(text.texture));
                let color = text.color.truncate().extend(text.color.w * common.opacity);
                bundle.set(ctx.device, "text_color", UniformValue::Vec4(color));
                set_normal_blend(ctx);
                ctx.device.draw(&common.geometry);
            }
            RenderableKind::Path { index } => {
                let path = &layer.paths[*index];
                let Ok(bundle) = ctx.use_builtin(BuiltinProgram::Path) else {
                    return;
                };
                let program = bundle.program();
                bundle
                    .model_view_projection
                    .set(ctx.device, program, UniformValue::Mat4(common.model_view_projection));
                let fill = path.fill_color.truncate().extend(path.fill_color.w * common.opacity);
                bundle.material_diffuse.set(ctx.device, program, UniformValue::Vec4(fill));
                if blending {
                    set_normal_blend(ctx);
                }
                ctx.device.draw(&common.geometry);
            }
        }
    }

    /// Two-pass fallback for advanced material blend modes: the object is
    /// drawn on its own, then combined with a copy of the layer so far.
    fn draw_software_blended(
        &self,
        ctx: &mut FrameContext<'_>,
        fb: FramebufferHandle,
        layer: &Layer,
        prepared: &PreparedLayer,
        renderable: &Renderable,
    ) -> Result<(), RenderError> {
        let mode = match &renderable.kind {
            RenderableKind::DefaultMaterial { model, subset, .. } => match &layer.models[*model].subsets[*subset].material {
                Material::Default(material) => material.blend_mode,
                Material::Custom(_) => MaterialBlendMode::Normal,
            },
            _ => MaterialBlendMode::Normal,
        };
        let BlendSetup::Software(mode) = material_blend_setup(mode, ctx.device.has_capability(Capability::AdvancedBlend)) else {
            self.draw_renderable(ctx, layer, prepared, renderable, true);
            return Ok(());
        };

        let (width, height) = self.render_size;
        let full = Rect::from_size(width, height);
        let desc = TextureDescriptor::new(width, height, LAYER_COLOR_FORMAT);
        let background = ctx
            .pool
            .acquire_texture(ctx.device, desc)
            .ok_or_else(|| RenderError::creation("software blend background"))?;
        let Some(object) = ctx.pool.acquire_texture(ctx.device, desc) else {
            ctx.pool.release_texture(background);
            return Err(RenderError::creation("software blend object"));
        };

        let result = (|| -> Result<(), RenderError> {
            let background_fb =
                ctx.acquire_target("software blend", &[(Attachment::Color(0), AttachmentTarget::Texture(background))])?;
            ctx.device
                .blit_framebuffer(Some(fb), full, Some(background_fb), full, wgpu::FilterMode::Nearest);
            ctx.release_target(background_fb);

            let object_fb =
                ctx.acquire_target("software blend", &[(Attachment::Color(0), AttachmentTarget::Texture(object))])?;
            ctx.device.set_render_target(Some(object_fb));
            ctx.device.set_viewport(full);
            ctx.device.set_depth_state(DepthState::DISABLED);
            ctx.device.clear(ClearFlags::COLOR, Vec4::ZERO, 1.0);
            self.draw_renderable(ctx, layer, prepared, renderable, false);
            ctx.release_target(object_fb);

            let bundle = ctx.use_builtin(BuiltinProgram::AdvancedBlend(mode))?;
            ctx.device.set_render_target(Some(fb));
            ctx.device.set_viewport(full);
            ctx.device.set_blend_state(None);
            bundle.set(ctx.device, "base_layer", UniformValue::Texture2D(Some(background)));
            bundle.set(ctx.device, "blend_layer", UniformValue::Texture2D(Some(object)));
            ctx.device.draw(&ctx.quad);
            Ok(())
        })();

        ctx.pool.release_texture(background);
        ctx.pool.release_texture(object);
        result
    }

    fn run_effects(&mut self, ctx: &mut FrameContext<'_>, layer: &Layer, prepared: &PreparedLayer) {
        if layer.active_effects().next().is_none() {
            return;
        }
        let Some(input) = prepared.plugin.or(self.rendered_texture()) else {
            return;
        };
        self.record(LayerStage::Effects, LayerPass::Effects);
        let args = EffectRenderArgs {
            input,
            input_size: ctx.pool.texture_size(input).unwrap_or(self.texture_size),
            clip_range: prepared.camera.clip_range(),
            depth: self.targets.depth_texture,
            frame: ctx.frame,
            quad: ctx.quad,
        };
        self.effect_output = ctx
            .effects
            .render_chain(ctx.device, ctx.pool, ctx.shaders, layer.active_effects(), &args);
    }
}

fn set_normal_blend(ctx: &mut FrameContext<'_>) {
    let advanced = ctx.device.has_capability(Capability::AdvancedBlend);
    if let BlendSetup::Fixed(state) = material_blend_setup(MaterialBlendMode::Normal, advanced) {
        ctx.device.set_blend_state(Some(state));
    }
}

fn render_directional_shadow(ctx: &mut FrameContext<'_>, entry: &ShadowMapEntry, casters: &[(Mat4, Geometry)]) -> Result<(), RenderError> {
    let fb = ctx.acquire_target(
        "directional shadow",
        &[
            (Attachment::Color(0), AttachmentTarget::Texture(entry.map)),
            (Attachment::Depth, AttachmentTarget::Renderbuffer(entry.depth)),
        ],
    )?;
    let drawn = draw_casters(ctx, fb, BuiltinProgram::OrthoShadow, entry.size, entry.view_proj, casters, None);
    ctx.release_target(fb);
    drawn
}

fn render_cube_shadow(ctx: &mut FrameContext<'_>, entry: &ShadowMapEntry, casters: &[(Mat4, Geometry)]) -> Result<(), RenderError> {
    let range = Vec2::new(CUBE_SHADOW_NEAR, entry.control.z);
    for (slot, face) in CubeFace::ALL.into_iter().enumerate() {
        let fb = ctx.acquire_target(
            "cube shadow",
            &[
                (Attachment::Color(0), AttachmentTarget::CubeFace(entry.map, face)),
                (Attachment::Depth, AttachmentTarget::Renderbuffer(entry.depth)),
            ],
        )?;
        let drawn = draw_casters(
            ctx,
            fb,
            BuiltinProgram::CubeShadow,
            entry.size,
            entry.face_view_projs[slot],
            casters,
            Some((entry.position, range)),
        );
        ctx.release_target(fb);
        drawn?;
    }
    Ok(())
}

fn draw_casters(
    ctx: &mut FrameContext<'_>,
    fb: FramebufferHandle,
    program: BuiltinProgram,
    size: u32,
    view_proj: Mat4,
    casters: &[(Mat4, Geometry)],
    light: Option<(Vec3, Vec2)>,
) -> Result<(), RenderError> {
    let bundle = ctx.use_builtin(program)?;
    let handle = bundle.program();
    ctx.device.set_render_target(Some(fb));
    ctx.device.set_viewport(Rect::from_size(size, size));
    with_blend_state(ctx.device, None, |device| {
        with_depth_state(device, DepthState::new(true, true), |device| {
            device.clear(ClearFlags::COLOR | ClearFlags::DEPTH, Vec4::ONE, 1.0);
            if let Some((position, range)) = light {
                bundle.camera_position.set(device, handle, UniformValue::Vec3(position));
                bundle.camera_properties.set(device, handle, UniformValue::Vec2(range));
            }
            for (model, geometry) in casters {
                bundle
                    .model_view_projection
                    .set(device, handle, UniformValue::Mat4(view_proj * *model));
                bundle.model_matrix.set(device, handle, UniformValue::Mat4(*model));
                device.draw(geometry);
            }
        })
    });
    Ok(())
}

/// Separable blur: X from the map into the scratch target, then Y back.
fn blur_shadow_map(ctx: &mut FrameContext<'_>, entry: &ShadowMapEntry, properties: Vec2) -> Result<(), RenderError> {
    let (first, second) = match entry.kind {
        ShadowMapKind::Directional => (BuiltinProgram::ShadowBlurX, BuiltinProgram::ShadowBlurY),
        ShadowMapKind::Cube => (BuiltinProgram::CubeBlurX, BuiltinProgram::CubeBlurY),
    };
    blur_step(ctx, entry, first, entry.map, entry.blur, properties)?;
    blur_step(ctx, entry, second, entry.blur, entry.map, properties)
}

fn blur_step(
    ctx: &mut FrameContext<'_>,
    entry: &ShadowMapEntry,
    program: BuiltinProgram,
    source: TextureHandle,
    dest: TextureHandle,
    properties: Vec2,
) -> Result<(), RenderError> {
    let (attachments, sampler): (Attachments, _) = match entry.kind {
        ShadowMapKind::Directional => (
            vec![(Attachment::Color(0), AttachmentTarget::Texture(dest))],
            ("depth_src", UniformValue::Texture2D(Some(source))),
        ),
        ShadowMapKind::Cube => (
            CubeFace::ALL
                .into_iter()
                .enumerate()
                .map(|(slot, face)| (Attachment::Color(slot as u32), AttachmentTarget::CubeFace(dest, face)))
                .collect(),
            ("depth_cube", UniformValue::TextureCube(Some(source))),
        ),
    };
    let fb = ctx.acquire_target("shadow blur", &attachments)?;
    let drawn = (|| -> Result<(), RenderError> {
        let bundle = ctx.use_builtin(program)?;
        let quad = ctx.quad;
        ctx.device.set_render_target(Some(fb));
        ctx.device.set_viewport(Rect::from_size(entry.size, entry.size));
        with_blend_state(ctx.device, None, |device| {
            with_depth_state(device, DepthState::DISABLED, |device| {
                bundle.set(device, sampler.0, sampler.1);
                bundle
                    .camera_properties
                    .set(device, bundle.program(), UniformValue::Vec2(properties));
                device.draw(&quad);
            })
        });
        Ok(())
    })();
    ctx.release_target(fb);
    drawn
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::shadows::SHADOW_MAP_FORMAT;

    #[test]
    fn shadow_format_is_blurrable_colour() {
        // blur passes render into the map, so it must be a colour format
        assert!(!SHADOW_MAP_FORMAT.is_depth_stencil_format());
        assert!(DEPTH_TEXTURE_FORMAT.is_depth_stencil_format());
    }
}
