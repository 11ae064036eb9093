//! Compiled program cache and property binding.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

use crate::device::{
    BufferDescriptor, BufferHandle, BufferUsage, Capability, GraphicsDevice, ProgramHandle,
    ProgramSource, TextureHandle, UniformValue,
};
use crate::error::RenderError;
use crate::renderer::blend::{material_blend_setup, BlendSetup};
use crate::renderer::lights::{LightConstants, LightsBlock, MAX_LIGHTS};
use crate::scene::{AoSettings, DefaultMaterial, ImageMap, LightProbeSettings, MapKind, ScreenShadowSettings};

use super::builtin::BuiltinProgram;
use super::generator::{generate_material_program, MaterialShaderRequest, VertexPipeline};
use super::key::{ShaderFeatureSet, ShaderVariantKey};
use super::properties::{ShaderConstant, ShaderPropertyBundle};

/// Uniform block the generated shaders declare for constant-buffer lighting.
pub const LIGHTS_BLOCK: &str = "cbBufferLights";

/// Shadow texture bound for a light whose `shadow_idx` points at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowBinding {
    pub texture: TextureHandle,
    pub cube: bool,
}

/// Per-frame values shared by every object drawn with one camera.
#[derive(Debug, Clone, Copy)]
pub struct GlobalInputs<'a> {
    pub view: Mat4,
    pub projection: Mat4,
    pub camera_position: Vec3,
    pub camera_direction: Vec3,
    pub clip_range: Vec2,
    pub ambient_total: Vec3,
    /// The drawn object's light subset, in shader-key order.
    pub lights: &'a [LightConstants],
    /// Indexed by [`LightConstants::shadow_idx`].
    pub shadow_maps: &'a [ShadowBinding],
}

#[derive(Debug, Clone, Copy)]
pub struct AoBinding<'a> {
    pub texture: TextureHandle,
    pub ao: &'a AoSettings,
    pub shadow: &'a ScreenShadowSettings,
    pub screen_size: (u32, u32),
}

#[derive(Debug, Clone, Copy)]
pub struct MaterialInputs<'a> {
    pub material: &'a DefaultMaterial,
    pub model_view_projection: Mat4,
    pub model_matrix: Mat4,
    pub normal_matrix: Mat3,
    pub opacity: f32,
    pub layer_probe: Option<&'a LightProbeSettings>,
    pub ao: Option<AoBinding<'a>>,
    /// Apply the material blend state to the device.
    pub blending: bool,
}

/// Rotation (upper-left 2x2) and offset (translation column) of an image
/// transform, laid out the way `transform_uv` consumes them.
pub fn image_transform_constants(map: &ImageMap) -> (Vec4, Vec4) {
    let m = map.transform;
    let rotations = Vec4::new(m.x_axis.x, m.y_axis.x, m.x_axis.y, m.y_axis.y);
    let offsets = Vec4::new(
        m.w_axis.x,
        m.w_axis.y,
        if map.premultiplied { 1.0 } else { 0.0 },
        0.0,
    );
    (rotations, offsets)
}

pub fn ao_properties(ao: &AoSettings) -> (Vec4, Vec4) {
    (
        Vec4::new(ao.strength * 0.01, ao.distance * 0.4, ao.softness * 0.02, ao.bias),
        Vec4::new(ao.sample_rate as f32, if ao.dither { 1.0 } else { 0.0 }, 0.0, 0.0),
    )
}

pub fn shadow_properties(shadow: &ScreenShadowSettings) -> Vec4 {
    Vec4::new(
        shadow.strength * 0.01,
        shadow.distance,
        shadow.softness * 0.01,
        shadow.bias,
    )
}

pub fn screen_constants((width, height): (u32, u32)) -> Vec4 {
    let (w, h) = (width.max(1) as f32, height.max(1) as f32);
    Vec4::new(w, h, 1.0 / w, 1.0 / h)
}

#[derive(Default)]
pub struct ShaderCache {
    /// Program name to handle; `None` records a compile failure.
    programs: HashMap<String, Option<ProgramHandle>>,
    sources: BTreeMap<String, ProgramSource>,
    names: HashMap<ProgramHandle, String>,
    entries: HashMap<ProgramHandle, Rc<ShaderPropertyBundle>>,
    lights_buffer: Option<BufferHandle>,
    prefer_constant_buffers: bool,
}

impl ShaderCache {
    pub fn new(prefer_constant_buffers: bool) -> Self {
        Self {
            prefer_constant_buffers,
            ..Self::default()
        }
    }

    pub fn prefers_constant_buffers(&self) -> bool {
        self.prefer_constant_buffers
    }

    /// Compiles `source` unless a program of that name was already tried.
    /// `force` discards a cached program first.
    pub fn compile_program(
        &mut self,
        device: &mut dyn GraphicsDevice,
        source: &ProgramSource,
        force: bool,
    ) -> Option<ProgramHandle> {
        if let Some(cached) = self.programs.get(&source.name).copied() {
            match (cached, force) {
                (_, false) => return cached,
                (Some(program), true) => self.release_program(device, program),
                (None, true) => {
                    self.programs.remove(&source.name);
                }
            }
        }

        match device.create_program(source) {
            Ok(program) => {
                log::debug!("Compiled program {}", source.name);
                self.programs.insert(source.name.clone(), Some(program));
                self.names.insert(program, source.name.clone());
                self.sources.insert(source.name.clone(), source.clone());
                Some(program)
            }
            Err(compile_log) => {
                let err = RenderError::ShaderCompile {
                    name: source.name.clone(),
                    log: compile_log,
                };
                log::error!(
                    "{}. Consider removing the material or effect that uses this shader",
                    err
                );
                self.programs.insert(source.name.clone(), None);
                None
            }
        }
    }

    /// Program for a default material. Identical requests return the
    /// identical program.
    pub fn generate_shader(
        &mut self,
        device: &mut dyn GraphicsDevice,
        material: &DefaultMaterial,
        key: ShaderVariantKey,
        pipeline: VertexPipeline,
        features: ShaderFeatureSet,
        has_transparency: bool,
    ) -> Option<ProgramHandle> {
        let images: Vec<MapKind> = material.image_slots().map(|(kind, _)| kind).collect();
        let request = MaterialShaderRequest {
            key,
            features,
            pipeline,
            images: &images,
            has_transparency,
        };
        let name = request.program_name();
        if let Some(cached) = self.programs.get(&name) {
            return *cached;
        }
        let source = generate_material_program(&request);
        self.compile_program(device, &source, false)
    }

    pub fn builtin(&mut self, device: &mut dyn GraphicsDevice, program: BuiltinProgram) -> Option<ProgramHandle> {
        let name = program.name();
        if let Some(cached) = self.programs.get(&name) {
            return *cached;
        }
        self.compile_program(device, &program.source(), false)
    }

    /// Uniform handles of `program`, resolved on first use.
    pub fn get_or_create_shader_entry(
        &mut self,
        device: &dyn GraphicsDevice,
        program: ProgramHandle,
    ) -> Rc<ShaderPropertyBundle> {
        Rc::clone(
            self.entries
                .entry(program)
                .or_insert_with(|| Rc::new(ShaderPropertyBundle::new(device, program))),
        )
    }

    /// Destroys the program and drops its property bundle.
    pub fn release_program(&mut self, device: &mut dyn GraphicsDevice, program: ProgramHandle) {
        self.entries.remove(&program);
        if let Some(name) = self.names.remove(&program) {
            self.programs.remove(&name);
            self.sources.remove(&name);
        }
        if device.active_program() == Some(program) {
            device.set_active_program(None);
        }
        device.destroy_program(program);
    }

    pub fn program_name(&self, program: ProgramHandle) -> Option<&str> {
        self.names.get(&program).map(String::as_str)
    }

    pub fn source(&self, name: &str) -> Option<&ProgramSource> {
        self.sources.get(name)
    }

    pub fn has_entry(&self, program: ProgramHandle) -> bool {
        self.entries.contains_key(&program)
    }

    pub fn failed_programs(&self) -> impl Iterator<Item = &str> {
        self.programs
            .iter()
            .filter(|(_, program)| program.is_none())
            .map(|(name, _)| name.as_str())
    }

    /// Binds per-camera values and the object's lights.
    pub fn set_global_properties(
        &mut self,
        device: &mut dyn GraphicsDevice,
        program: ProgramHandle,
        inputs: &GlobalInputs<'_>,
    ) {
        let bundle = self.get_or_create_shader_entry(device, program);
        let set = |device: &mut dyn GraphicsDevice, constant: &ShaderConstant, value| {
            constant.set(device, program, value);
        };

        set(device, &bundle.view_matrix, UniformValue::Mat4(inputs.view));
        set(
            device,
            &bundle.view_projection_matrix,
            UniformValue::Mat4(inputs.projection * inputs.view),
        );
        set(device, &bundle.camera_position, UniformValue::Vec3(inputs.camera_position));
        set(device, &bundle.camera_direction, UniformValue::Vec3(inputs.camera_direction));
        set(device, &bundle.camera_properties, UniformValue::Vec2(inputs.clip_range));
        set(device, &bundle.light_ambient_total, UniformValue::Vec3(inputs.ambient_total));

        let lights = &inputs.lights[..inputs.lights.len().min(MAX_LIGHTS)];
        let buffered = self.prefer_constant_buffers
            && device.has_capability(Capability::ConstantBuffer)
            && self.upload_lights_block(device, program, lights);
        if !buffered {
            set(device, &bundle.light_count, UniformValue::Int(lights.len() as i32));
            for (fields, light) in bundle.lights.iter().zip(lights) {
                fields.apply(device, program, light);
            }
        }

        for (index, light) in lights.iter().enumerate() {
            let Ok(shadow_index) = usize::try_from(light.shadow_idx) else {
                continue;
            };
            let Some(binding) = inputs.shadow_maps.get(shadow_index) else {
                log::warn!("Light {} refers to missing shadow map {}", index, shadow_index);
                continue;
            };
            let (constants, texture) = if binding.cube {
                (&bundle.shadow_cubes[index], UniformValue::TextureCube(Some(binding.texture)))
            } else {
                (&bundle.shadow_maps[index], UniformValue::Texture2D(Some(binding.texture)))
            };
            set(device, &constants.map, texture);
            set(
                device,
                &constants.matrix,
                UniformValue::Mat4(Mat4::from_cols_array_2d(&light.shadow_view)),
            );
            set(
                device,
                &constants.control,
                UniformValue::Vec4(Vec4::from_array(light.shadow_control)),
            );
        }
    }

    fn upload_lights_block(
        &mut self,
        device: &mut dyn GraphicsDevice,
        program: ProgramHandle,
        lights: &[LightConstants],
    ) -> bool {
        let block = LightsBlock::from_lights(lights);
        let bytes = bytemuck::bytes_of(&block);
        let buffer = match self.lights_buffer {
            Some(buffer) => {
                device.update_buffer(buffer, 0, bytes);
                buffer
            }
            None => {
                let desc = BufferDescriptor {
                    usage: BufferUsage::Constant,
                    size: bytes.len(),
                    dynamic: true,
                };
                let Some(buffer) = device.create_buffer(&desc, Some(bytes)) else {
                    log::warn!("Could not create the lights constant buffer; using uniforms");
                    return false;
                };
                self.lights_buffer = Some(buffer);
                buffer
            }
        };
        device.bind_constant_buffer(program, LIGHTS_BLOCK, buffer)
    }

    pub fn lights_buffer(&self) -> Option<BufferHandle> {
        self.lights_buffer
    }

    /// Binds object and material values, then the material's blend state
    /// when `inputs.blending` is set. The returned setup tells the caller
    /// whether a software composite is needed.
    pub fn set_material_properties(
        &mut self,
        device: &mut dyn GraphicsDevice,
        program: ProgramHandle,
        inputs: &MaterialInputs<'_>,
    ) -> BlendSetup {
        let bundle = self.get_or_create_shader_entry(device, program);
        let material = inputs.material;
        let set = |device: &mut dyn GraphicsDevice, constant: &ShaderConstant, value| {
            constant.set(device, program, value);
        };

        set(device, &bundle.model_view_projection, UniformValue::Mat4(inputs.model_view_projection));
        set(device, &bundle.model_matrix, UniformValue::Mat4(inputs.model_matrix));
        set(device, &bundle.normal_matrix, UniformValue::Mat3(inputs.normal_matrix));
        set(
            device,
            &bundle.material_diffuse,
            UniformValue::Vec4(material.diffuse_color.extend(material.opacity)),
        );
        set(
            device,
            &bundle.material_specular,
            UniformValue::Vec4(material.specular_tint.extend(material.specular_amount)),
        );
        set(
            device,
            &bundle.material_properties,
            UniformValue::Vec4(Vec4::new(
                material.specular_roughness,
                material.fresnel_power,
                material.ior,
                material.translucent_falloff,
            )),
        );
        set(
            device,
            &bundle.material_emissive,
            UniformValue::Vec3(material.emissive_color * material.emissive_power),
        );
        set(device, &bundle.bump_amount, UniformValue::Float(material.bump_amount));
        set(device, &bundle.displace_amount, UniformValue::Float(material.displace_amount));
        set(device, &bundle.object_opacity, UniformValue::Float(inputs.opacity));

        for (slot, (_, map)) in material.image_slots().enumerate() {
            let Some(constants) = bundle.images.get(slot) else {
                log::warn!("Material uses more than {} images; extra images ignored", bundle.images.len());
                break;
            };
            device.set_texture_sampling(map.texture, map.sampling);
            let (rotations, offsets) = image_transform_constants(map);
            set(device, &constants.sampler, UniformValue::Texture2D(Some(map.texture)));
            set(device, &constants.rotations, UniformValue::Vec4(rotations));
            set(device, &constants.offsets, UniformValue::Vec4(offsets));
        }

        self.bind_light_probes(device, &bundle, material, inputs.layer_probe);

        if let Some(ao) = inputs.ao {
            let (props, props2) = ao_properties(ao.ao);
            set(device, &bundle.ao_texture, UniformValue::Texture2D(Some(ao.texture)));
            set(device, &bundle.ao_properties, UniformValue::Vec4(props));
            set(device, &bundle.ao_properties2, UniformValue::Vec4(props2));
            set(device, &bundle.shadow_properties, UniformValue::Vec4(shadow_properties(ao.shadow)));
            set(device, &bundle.ao_screen_const, UniformValue::Vec4(screen_constants(ao.screen_size)));
        }

        let setup = material_blend_setup(
            material.blend_mode,
            device.has_capability(Capability::AdvancedBlend),
        );
        if inputs.blending {
            match setup {
                BlendSetup::Fixed(state) | BlendSetup::Hardware(state) => {
                    device.set_blend_state(Some(state));
                }
                BlendSetup::Software(_) => device.set_blend_state(None),
            }
        }
        setup
    }

    /// The material's own probe wins over the layer probe. Only the layer
    /// probe can carry a second probe.
    fn bind_light_probes(
        &self,
        device: &mut dyn GraphicsDevice,
        bundle: &ShaderPropertyBundle,
        material: &DefaultMaterial,
        layer_probe: Option<&LightProbeSettings>,
    ) {
        let program = bundle.program();
        let (probe, props, second) = match (&material.light_probe, layer_probe) {
            (Some(probe), _) => (probe, Vec4::new(0.0, 0.0, 0.0, 1.0), None),
            (None, Some(settings)) => (
                &settings.probe,
                Vec4::new(
                    settings.horizon,
                    settings.fov,
                    if settings.rgbe { 1.0 } else { 0.0 },
                    settings.brightness * 0.01,
                ),
                settings.second.as_ref().map(|second| {
                    (
                        second,
                        Vec4::new(
                            settings.second_fade,
                            settings.second_window,
                            settings.second_position,
                            0.0,
                        ),
                    )
                }),
            ),
            (None, None) => return,
        };

        device.set_texture_sampling(probe.texture, probe.sampling);
        let (rotation, offset) = image_transform_constants(probe);
        bundle.light_probe.set(device, program, UniformValue::Texture2D(Some(probe.texture)));
        bundle.light_probe_props.set(device, program, UniformValue::Vec4(props));
        bundle.light_probe_rotation.set(device, program, UniformValue::Vec4(rotation));
        bundle.light_probe_offset.set(device, program, UniformValue::Vec4(offset));

        if let Some((second, props2)) = second {
            bundle.light_probe2.set(device, program, UniformValue::Texture2D(Some(second.texture)));
            bundle.light_probe2_props.set(device, program, UniformValue::Vec4(props2));
        }
    }

    /// Serialises every successfully compiled source.
    pub fn export_entries(&self) -> Result<String, serde_json::Error> {
        let sources: Vec<&ProgramSource> = self.sources.values().collect();
        serde_json::to_string(&sources)
    }

    /// Compiles sources saved by [`Self::export_entries`]. Returns how many
    /// new programs compiled.
    pub fn import_entries(
        &mut self,
        device: &mut dyn GraphicsDevice,
        json: &str,
    ) -> Result<usize, serde_json::Error> {
        let sources: Vec<ProgramSource> = serde_json::from_str(json)?;
        let mut compiled = 0;
        for source in &sources {
            if self.programs.contains_key(&source.name) {
                continue;
            }
            if self.compile_program(device, source, false).is_some() {
                compiled += 1;
            }
        }
        log::info!("Imported {} of {} cached programs", compiled, sources.len());
        Ok(compiled)
    }

    pub fn program_count(&self) -> usize {
        self.names.len()
    }

    pub fn release_all(&mut self, device: &mut dyn GraphicsDevice) {
        let programs: Vec<ProgramHandle> = self.names.keys().copied().collect();
        for program in programs {
            self.release_program(device, program);
        }
        self.programs.clear();
        if let Some(buffer) = self.lights_buffer.take() {
            device.destroy_buffer(buffer);
        }
    }
}
