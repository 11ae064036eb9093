//! Per-frame preparation: target sizing, lights, shadow entries and the
//! renderable lists.

use glam::{Mat4, Vec2, Vec3};

use super::antialiasing::{jitter_matrix, progressive_blend_factors, progressive_jitter, ssaa_render_size, temporal_jitter};
use super::{LayerRenderData, LayerStage, TEMPORAL_BLEND_FACTORS};
use crate::device::{Capability, Geometry, TextureHandle};
use crate::renderer::blend::{material_blend_setup, BlendSetup};
use crate::renderer::lights::{ambient_total, LightConstants, MAX_LIGHTS};
use crate::renderer::render_context::FrameContext;
use crate::renderer::renderable::{
    opacity_flags, sort_back_to_front, Renderable, RenderableCommon, RenderableFlags, RenderableKind,
};
use crate::renderer::shader::{MaterialFeatures, ShaderFeatureSet, ShaderVariantKey, VertexPipeline};
use crate::renderer::shadows::{update_entry_cameras, ShadowMapKind};
use crate::scene::{
    Camera, Frustum, Layer, Light, MapKind, Material, MaterialLighting, MultisampleMode, NodeId,
};

/// Lights reaching a group of renderables, as indices into the layer's
/// enabled lights plus the constants the shaders receive.
#[derive(Debug, Clone, PartialEq)]
pub struct LightSubset {
    pub lights: Vec<usize>,
    pub constants: Vec<LightConstants>,
}

/// Everything `prepare_for_render` works out for the passes of one frame.
#[derive(Debug)]
pub struct PreparedLayer {
    pub camera: Camera,
    pub view: Mat4,
    /// Projection with this frame's sub-pixel jitter applied.
    pub projection: Mat4,
    pub view_proj: Mat4,
    pub jitter: Vec2,
    /// Weights for blending into the accumulator, when this frame blends.
    pub blend_factors: Option<Vec2>,
    /// Progressive or temporal AA is active, so output goes through the accumulator.
    pub accumulate: bool,
    /// The accumulated image is settled and still valid.
    pub skip_render: bool,
    pub plugin: Option<TextureHandle>,
    pub features: ShaderFeatureSet,
    /// Indices into `Layer::lights` of the enabled lights, capped at `MAX_LIGHTS`.
    pub lights: Vec<usize>,
    pub light_subsets: Vec<LightSubset>,
    pub ambient_total: Vec3,
    pub opaque: Vec<Renderable>,
    pub transparent: Vec<Renderable>,
    /// Model matrix and geometry of every shadow caster, culled or not.
    pub shadow_casters: Vec<(Mat4, Geometry)>,
    pub needs_ao: bool,
    pub needs_depth_texture: bool,
    pub depth_prepass: bool,
}

impl PreparedLayer {
    fn plugin(camera: Camera, plugin: TextureHandle) -> Self {
        Self {
            camera,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            view_proj: Mat4::IDENTITY,
            jitter: Vec2::ZERO,
            blend_factors: None,
            accumulate: false,
            skip_render: false,
            plugin: Some(plugin),
            features: ShaderFeatureSet::empty(),
            lights: Vec::new(),
            light_subsets: Vec::new(),
            ambient_total: Vec3::ZERO,
            opaque: Vec::new(),
            transparent: Vec::new(),
            shadow_casters: Vec::new(),
            needs_ao: false,
            needs_depth_texture: false,
            depth_prepass: false,
        }
    }

    pub fn renderable_count(&self) -> usize {
        self.opaque.len() + self.transparent.len()
    }
}

impl LayerRenderData {
    /// Works out sizes, lights, shadows and the renderable lists for this
    /// frame. Returns false when the layer has nothing to render.
    pub fn prepare_for_render(&mut self, ctx: &mut FrameContext<'_>, layer: &Layer, presentation: (u32, u32)) -> bool {
        self.prepared = None;
        let viewport = layer.rect.resolve(presentation);
        if viewport.is_empty() {
            log::debug!("Layer {:?} has an empty viewport", layer.id);
            self.release(ctx);
            return false;
        }
        self.viewport = viewport;
        self.update_target_sizes(ctx, layer);

        if let Some(plugin) = layer.render_plugin {
            let camera = layer.camera.unwrap_or_else(Camera::layer_ortho);
            self.prepared = Some(PreparedLayer::plugin(camera, plugin));
            self.stage = LayerStage::Prepared;
            self.sync_effect_contexts(ctx, layer);
            return true;
        }
        let Some(camera) = layer.camera else {
            log::debug!("Layer {:?} has no camera", layer.id);
            self.release(ctx);
            return false;
        };

        let max_pass = self.max_progressive_index;
        let settled = max_pass > 0 && self.progressive_index >= max_pass;
        let skip_render = ctx.settings.layer_caching_enabled
            && settled
            && !layer.contents_dirty
            && self.rendered_texture().is_some();

        let (jitter, blend_factors) = if (1..=max_pass).contains(&self.progressive_index) {
            (progressive_jitter(self.progressive_index), progressive_blend_factors(self.progressive_index))
        } else if layer.temporal_aa {
            let factors = self.targets.accumulator.map(|_| TEMPORAL_BLEND_FACTORS);
            (temporal_jitter(self.temporal_index), factors)
        } else {
            (Vec2::ZERO, None)
        };
        let accumulate = max_pass > 0 || layer.temporal_aa;

        let (width, height) = (self.render_size.0 as f32, self.render_size.1 as f32);
        let view = camera.view();
        let unjittered = camera.proj(width, height);
        let projection = jitter_matrix(jitter, self.render_size) * unjittered;

        let lights: Vec<usize> = layer
            .lights
            .iter()
            .enumerate()
            .filter(|(_, light)| light.enabled)
            .map(|(index, _)| index)
            .take(MAX_LIGHTS)
            .collect();
        self.prepare_shadow_maps(ctx, layer, &camera, &lights);

        let constants: Vec<LightConstants> = lights
            .iter()
            .map(|&index| {
                let light = &layer.lights[index];
                let shadow = self
                    .shadows
                    .entry_index(light.id)
                    .map(|entry| self.shadows.entries()[entry].light_shadow(entry));
                LightConstants::from_light(light, shadow)
            })
            .collect();

        let features = self.feature_set(ctx, layer);
        let mut prepared = PreparedLayer {
            camera,
            view,
            projection,
            view_proj: projection * view,
            jitter,
            blend_factors,
            accumulate,
            skip_render,
            plugin: None,
            features,
            ambient_total: ambient_total(lights.iter().map(|&index| &layer.lights[index])),
            lights,
            light_subsets: Vec::new(),
            opaque: Vec::new(),
            transparent: Vec::new(),
            shadow_casters: Vec::new(),
            needs_ao: false,
            needs_depth_texture: false,
            depth_prepass: false,
        };

        let frustum = Frustum::from_view_proj(unjittered * view);
        self.collect_renderables(ctx, layer, &mut prepared, &constants, &frustum);

        let depth_textures = ctx.device.has_capability(Capability::DepthTexture);
        prepared.needs_ao = layer.needs_ambient_occlusion() && depth_textures;
        prepared.needs_depth_texture =
            prepared.needs_ao || (depth_textures && layer.active_effects().next().is_some());
        prepared.depth_prepass = layer.depth_test_enabled
            && ctx.settings.depth_prepass_enabled
            && layer.depth_prepass_enabled
            && (!prepared.opaque.is_empty()
                || (layer.write_transparent_depth && !prepared.transparent.is_empty()));

        log::trace!(
            "Layer {:?} prepared: {} opaque, {} transparent, {} lights",
            layer.id,
            prepared.opaque.len(),
            prepared.transparent.len(),
            prepared.lights.len()
        );
        self.prepared = Some(prepared);
        self.stage = LayerStage::Prepared;
        self.sync_effect_contexts(ctx, layer);
        true
    }

    /// Recomputes output and render sizes. Any change drops every target;
    /// any change or dirty content restarts progressive accumulation.
    fn update_target_sizes(&mut self, ctx: &mut FrameContext<'_>, layer: &Layer) {
        let max_size = ctx.device.max_texture_size().max(1);
        let (width, height) = self.viewport.size();
        let texture_size = (width.min(max_size), height.min(max_size));
        let ssaa = layer.multisample == MultisampleMode::Ssaa;
        let render_size = if ssaa {
            ssaa_render_size(texture_size, ctx.settings.ssaa_multiplier, max_size)
        } else {
            texture_size
        };

        let mut sample_count = layer.multisample.sample_count();
        if sample_count > 1 && !ctx.device.has_capability(Capability::MultisampleTexture) {
            log::debug!("Multisample textures unsupported; layer {:?} renders without MSAA", layer.id);
            sample_count = 1;
        }
        let sample_count = sample_count.min(ctx.device.max_samples().max(1));
        let max_pass = layer.progressive.max_pass_index();

        let resized = texture_size != self.texture_size
            || render_size != self.render_size
            || sample_count != self.sample_count
            || ssaa != self.ssaa;
        if resized {
            self.targets.release(ctx);
            self.texture_size = texture_size;
            self.render_size = render_size;
            self.sample_count = sample_count;
            self.ssaa = ssaa;
        }
        if resized
            || layer.contents_dirty
            || !ctx.settings.layer_caching_enabled
            || max_pass != self.max_progressive_index
        {
            self.progressive_index = 0;
        }
        self.max_progressive_index = max_pass;

        if max_pass == 0 && !layer.temporal_aa {
            if let Some(accumulator) = self.targets.accumulator.take() {
                log::debug!("Layer {:?} stopped accumulating", layer.id);
                ctx.pool.release_texture(accumulator);
            }
        }
    }

    fn prepare_shadow_maps(&mut self, ctx: &mut FrameContext<'_>, layer: &Layer, camera: &Camera, lights: &[usize]) {
        if !ctx.settings.shadow_mapping_enabled {
            self.shadows.release_unused(ctx.pool, &[]);
            return;
        }
        let casters: Vec<&Light> = lights
            .iter()
            .map(|&index| &layer.lights[index])
            .filter(|light| light.casts_shadow())
            .collect();
        let keep: Vec<NodeId> = casters.iter().map(|light| light.id).collect();
        self.shadows.release_unused(ctx.pool, &keep);

        for light in &casters {
            let size = if light.shadow_map_size > 0 {
                light.shadow_map_size
            } else {
                ctx.settings.default_shadow_map_size
            };
            let kind = ShadowMapKind::for_light(light.kind);
            if let Err(err) = self.shadows.add_shadow_map_entry(ctx.device, ctx.pool, light.id, kind, size) {
                log::warn!("Light {:?} renders without shadows: {}", light.id, err);
            }
        }

        // indices shift when an entry is reallocated, so look them up again
        let viewport = (self.render_size.0 as f32, self.render_size.1 as f32);
        for light in casters {
            if let Some(index) = self.shadows.entry_index(light.id) {
                update_entry_cameras(&mut self.shadows.entries_mut()[index], camera, viewport, light);
            }
        }
    }

    fn feature_set(&self, ctx: &FrameContext<'_>, layer: &Layer) -> ShaderFeatureSet {
        let mut features = ShaderFeatureSet::empty();
        features.set(ShaderFeatureSet::SSM, !self.shadows.entries().is_empty());
        let depth_textures = ctx.device.has_capability(Capability::DepthTexture);
        features.set(ShaderFeatureSet::SSAO, layer.ao.enabled() && depth_textures);
        features.set(ShaderFeatureSet::SSDO, layer.shadow.enabled() && depth_textures);
        features.set(
            ShaderFeatureSet::CG_LIGHTING,
            ctx.shaders.prefers_constant_buffers() && ctx.device.has_capability(Capability::ConstantBuffer),
        );
        if let Some(probe) = &layer.light_probe {
            features.insert(ShaderFeatureSet::LIGHT_PROBE);
            features.set(ShaderFeatureSet::LIGHT_PROBE_2, probe.second.is_some());
            features.set(ShaderFeatureSet::RGBE_LIGHT_PROBE, probe.rgbe);
        }
        features
    }

    fn collect_renderables(
        &self,
        ctx: &FrameContext<'_>,
        layer: &Layer,
        prepared: &mut PreparedLayer,
        constants: &[LightConstants],
        frustum: &Frustum,
    ) {
        let advanced_blend = ctx.device.has_capability(Capability::AdvancedBlend);
        let camera_position = prepared.camera.position();

        for (model_index, model) in layer.models.iter().enumerate() {
            if !model.visible {
                continue;
            }
            let light_subset = light_subset_for(layer, model.id, prepared, constants);
            for (subset_index, subset) in model.subsets.iter().enumerate() {
                let opacity = model.opacity * subset.material.opacity();
                let material_transparent = match &subset.material {
                    Material::Default(material) => material.has_transparency(),
                    Material::Custom(custom) => custom.instance.class().has_transparency(),
                };
                let mut flags = opacity_flags(opacity, material_transparent);
                if flags.contains(RenderableFlags::COMPLETELY_TRANSPARENT) {
                    continue;
                }
                if model.cast_shadow {
                    flags |= RenderableFlags::CASTS_SHADOW;
                    prepared.shadow_casters.push((model.global_transform, subset.geometry));
                }
                let world = subset.bounds.transformed(model.global_transform);
                if !frustum.intersects_aabb(world.min, world.max) {
                    continue;
                }

                let kind = match &subset.material {
                    Material::Default(material) => {
                        let mut key = ShaderVariantKey::new(MaterialFeatures::from_material(material));
                        if material.lighting == MaterialLighting::Pixel {
                            for &light in &prepared.light_subsets[light_subset].lights {
                                let light = &layer.lights[prepared.lights[light]];
                                key.push_light(light.kind, self.shadows.entry_index(light.id).is_some());
                            }
                        }
                        let images: Vec<MapKind> = material.image_slots().map(|(kind, _)| kind).collect();
                        let pipeline = VertexPipeline::for_material(&key, &images);
                        if flags.contains(RenderableFlags::TRANSPARENT)
                            && matches!(
                                material_blend_setup(material.blend_mode, advanced_blend),
                                BlendSetup::Software(_)
                            )
                        {
                            flags |= RenderableFlags::SOFTWARE_BLEND;
                        }
                        RenderableKind::DefaultMaterial {
                            model: model_index,
                            subset: subset_index,
                            key,
                            pipeline,
                        }
                    }
                    Material::Custom(_) => RenderableKind::CustomMaterial {
                        model: model_index,
                        subset: subset_index,
                    },
                };

                let mut common = RenderableCommon::new(
                    model.id,
                    model.global_transform,
                    prepared.view_proj,
                    camera_position,
                    subset.geometry,
                );
                common.flags = flags;
                common.opacity = opacity;
                common.light_subset = light_subset;
                push(prepared, Renderable::new(common, kind));
            }
        }

        for (index, text) in layer.texts.iter().enumerate() {
            if !text.visible || text.texture.is_none() || text.opacity < crate::renderer::renderable::MIN_VISIBLE_OPACITY {
                continue;
            }
            let model = text.global_transform * Mat4::from_scale(Vec3::new(text.width * 0.5, text.height * 0.5, 1.0));
            let world = crate::scene::Bounds::unit().transformed(model);
            if !frustum.intersects_aabb(world.min, world.max) {
                continue;
            }
            let mut common = RenderableCommon::new(text.id, model, prepared.view_proj, camera_position, ctx.quad);
            common.flags = RenderableFlags::TRANSPARENT;
            common.opacity = text.opacity;
            push(prepared, Renderable::new(common, RenderableKind::Text { index }));
        }

        for (index, path) in layer.paths.iter().enumerate() {
            if !path.visible {
                continue;
            }
            let flags = opacity_flags(path.opacity, path.fill_color.w < 1.0);
            if flags.contains(RenderableFlags::COMPLETELY_TRANSPARENT) {
                continue;
            }
            let world = path.bounds.transformed(path.global_transform);
            if !frustum.intersects_aabb(world.min, world.max) {
                continue;
            }
            let mut common = RenderableCommon::new(
                path.id,
                path.global_transform,
                prepared.view_proj,
                camera_position,
                path.geometry,
            );
            common.flags = flags;
            common.opacity = path.opacity;
            push(prepared, Renderable::new(common, RenderableKind::Path { index }));
        }

        sort_back_to_front(&mut prepared.transparent);
    }

    /// Releases effect contexts of effects that left the layer.
    fn sync_effect_contexts(&mut self, ctx: &mut FrameContext<'_>, layer: &Layer) {
        let current: Vec<NodeId> = layer.effects.iter().map(|effect| effect.id).collect();
        for id in self.effect_ids.iter().filter(|id| !current.contains(id)) {
            ctx.effects.release_effect_context(ctx.device, ctx.pool, *id);
        }
        self.effect_ids = current;
    }
}

fn push(prepared: &mut PreparedLayer, renderable: Renderable) {
    if renderable.common.is_transparent() {
        prepared.transparent.push(renderable);
    } else {
        prepared.opaque.push(renderable);
    }
}

/// Index of the subset of lights reaching `node`, adding it when new.
fn light_subset_for(layer: &Layer, node: NodeId, prepared: &mut PreparedLayer, constants: &[LightConstants]) -> usize {
    let lights: Vec<usize> = prepared
        .lights
        .iter()
        .enumerate()
        .filter(|(_, &index)| match layer.lights[index].scope {
            Some(scope) => layer.is_within(node, scope),
            None => true,
        })
        .map(|(slot, _)| slot)
        .collect();
    if let Some(existing) = prepared.light_subsets.iter().position(|subset| subset.lights == lights) {
        return existing;
    }
    let constants = lights.iter().map(|&slot| constants[slot]).collect();
    prepared.light_subsets.push(LightSubset { lights, constants });
    prepared.light_subsets.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::LightKind;

    fn prepared_with_lights(count: usize) -> PreparedLayer {
        let mut prepared = PreparedLayer::plugin(Camera::default(), TextureHandle(1));
        prepared.plugin = None;
        prepared.lights = (0..count).collect();
        prepared
    }

    #[test]
    fn scoped_lights_only_reach_their_subtree() {
        let mut layer = Layer::new(NodeId(1));
        layer.set_parent(NodeId(20), NodeId(10));
        let mut scoped = Light::new(NodeId(5), LightKind::Point);
        scoped.scope = Some(NodeId(10));
        layer.lights = vec![Light::new(NodeId(4), LightKind::Directional), scoped];
        let constants: Vec<LightConstants> = layer
            .lights
            .iter()
            .map(|light| LightConstants::from_light(light, None))
            .collect();
        let mut prepared = prepared_with_lights(2);

        let inside = light_subset_for(&layer, NodeId(20), &mut prepared, &constants);
        let outside = light_subset_for(&layer, NodeId(30), &mut prepared, &constants);
        let inside_again = light_subset_for(&layer, NodeId(10), &mut prepared, &constants);

        assert_eq!(prepared.light_subsets[inside].lights, vec![0, 1]);
        assert_eq!(prepared.light_subsets[outside].lights, vec![0]);
        assert_eq!(inside, inside_again);
        assert_eq!(prepared.light_subsets.len(), 2);
    }
}
