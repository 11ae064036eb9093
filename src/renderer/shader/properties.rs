//! Per-program uniform handles.
//!
//! Names are looked up against the program once, when its bundle is built.
//! After that every set goes straight to the resolved location.

use std::cell::RefCell;
use std::collections::HashMap;

use glam::{Mat4, Vec4};

use crate::device::{GraphicsDevice, ProgramHandle, UniformInfo, UniformValue};
use crate::renderer::lights::{LightConstants, MAX_LIGHTS};

/// Upper bound on material image slots a generated program can declare.
pub const MAX_MATERIAL_IMAGES: usize = 12;

/// One named uniform of one program. A constant the program does not
/// declare stays unresolved; setting it logs at debug level and does nothing.
#[derive(Debug, Clone)]
pub struct ShaderConstant {
    name: String,
    info: Option<UniformInfo>,
}

impl ShaderConstant {
    pub fn resolve(device: &dyn GraphicsDevice, program: ProgramHandle, name: impl Into<String>) -> Self {
        let name = name.into();
        let info = device.uniform_info(program, &name);
        Self { name, info }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_resolved(&self) -> bool {
        self.info.is_some()
    }

    /// Returns true when the value reached the program.
    pub fn set(&self, device: &mut dyn GraphicsDevice, program: ProgramHandle, value: UniformValue) -> bool {
        let Some(info) = self.info else {
            log::debug!("Shader constant {} not found in program {:?}", self.name, program);
            return false;
        };
        if info.ty != value.uniform_type() {
            log::error!(
                "Shader constant {} is declared as {} but a {} value was supplied; not applied",
                self.name,
                info.ty.name(),
                value.uniform_type().name()
            );
            return false;
        }
        device.set_uniform(program, info.location, &value);
        true
    }
}

#[derive(Debug, Clone)]
pub struct ImageConstants {
    pub sampler: ShaderConstant,
    pub rotations: ShaderConstant,
    pub offsets: ShaderConstant,
}

#[derive(Debug, Clone)]
pub struct LightFieldConstants {
    pub position: ShaderConstant,
    pub direction: ShaderConstant,
    pub up: ShaderConstant,
    pub right: ShaderConstant,
    pub diffuse: ShaderConstant,
    pub ambient: ShaderConstant,
    pub specular: ShaderConstant,
    pub spot_exponent: ShaderConstant,
    pub spot_cutoff: ShaderConstant,
    pub constant_attenuation: ShaderConstant,
    pub linear_attenuation: ShaderConstant,
    pub quadratic_attenuation: ShaderConstant,
    pub range: ShaderConstant,
    pub width: ShaderConstant,
    pub height: ShaderConstant,
    pub shadow_controls: ShaderConstant,
    pub shadow_view: ShaderConstant,
    pub shadow_idx: ShaderConstant,
}

impl LightFieldConstants {
    fn resolve(device: &dyn GraphicsDevice, program: ProgramHandle, index: usize) -> Self {
        let field = |name: &str| ShaderConstant::resolve(device, program, format!("lights[{index}].{name}"));
        Self {
            position: field("position"),
            direction: field("direction"),
            up: field("up"),
            right: field("right"),
            diffuse: field("diffuse"),
            ambient: field("ambient"),
            specular: field("specular"),
            spot_exponent: field("spotExponent"),
            spot_cutoff: field("spotCutoff"),
            constant_attenuation: field("constantAttenuation"),
            linear_attenuation: field("linearAttenuation"),
            quadratic_attenuation: field("quadraticAttenuation"),
            range: field("range"),
            width: field("width"),
            height: field("height"),
            shadow_controls: field("shadowControls"),
            shadow_view: field("shadowView"),
            shadow_idx: field("shadowIdx"),
        }
    }

    /// Uploads every field of `light` as an individual uniform.
    pub fn apply(&self, device: &mut dyn GraphicsDevice, program: ProgramHandle, light: &LightConstants) {
        let vec4 = |v: [f32; 4]| UniformValue::Vec4(Vec4::from_array(v));
        self.position.set(device, program, vec4(light.position));
        self.direction.set(device, program, vec4(light.direction));
        self.up.set(device, program, vec4(light.up));
        self.right.set(device, program, vec4(light.right));
        self.diffuse.set(device, program, vec4(light.diffuse));
        self.ambient.set(device, program, vec4(light.ambient));
        self.specular.set(device, program, vec4(light.specular));
        self.spot_exponent.set(device, program, UniformValue::Float(light.spot_exponent));
        self.spot_cutoff.set(device, program, UniformValue::Float(light.spot_cutoff));
        self.constant_attenuation
            .set(device, program, UniformValue::Float(light.constant_attenuation));
        self.linear_attenuation
            .set(device, program, UniformValue::Float(light.linear_attenuation));
        self.quadratic_attenuation
            .set(device, program, UniformValue::Float(light.quadratic_attenuation));
        self.range.set(device, program, UniformValue::Float(light.range));
        self.width.set(device, program, UniformValue::Float(light.width));
        self.height.set(device, program, UniformValue::Float(light.height));
        self.shadow_controls.set(device, program, vec4(light.shadow_control));
        self.shadow_view.set(
            device,
            program,
            UniformValue::Mat4(Mat4::from_cols_array_2d(&light.shadow_view)),
        );
        self.shadow_idx.set(device, program, UniformValue::Int(light.shadow_idx));
    }
}

#[derive(Debug, Clone)]
pub struct ShadowMapConstants {
    pub map: ShaderConstant,
    pub matrix: ShaderConstant,
    pub control: ShaderConstant,
}

impl ShadowMapConstants {
    fn resolve(device: &dyn GraphicsDevice, program: ProgramHandle, prefix: &str, index: usize) -> Self {
        Self {
            map: ShaderConstant::resolve(device, program, format!("{prefix}{index}")),
            matrix: ShaderConstant::resolve(device, program, format!("{prefix}{index}_matrix")),
            control: ShaderConstant::resolve(device, program, format!("{prefix}{index}_control")),
        }
    }
}

/// Every uniform handle a program is known to need, plus a lazily filled
/// table for anything else looked up by name.
#[derive(Debug)]
pub struct ShaderPropertyBundle {
    program: ProgramHandle,

    pub model_view_projection: ShaderConstant,
    pub model_matrix: ShaderConstant,
    pub normal_matrix: ShaderConstant,
    pub view_projection_matrix: ShaderConstant,
    pub view_matrix: ShaderConstant,
    pub camera_position: ShaderConstant,
    pub camera_direction: ShaderConstant,
    pub camera_properties: ShaderConstant,
    pub light_ambient_total: ShaderConstant,

    pub material_diffuse: ShaderConstant,
    pub material_specular: ShaderConstant,
    pub material_properties: ShaderConstant,
    pub material_emissive: ShaderConstant,
    pub bump_amount: ShaderConstant,
    pub displace_amount: ShaderConstant,
    pub object_opacity: ShaderConstant,

    pub light_count: ShaderConstant,
    pub lights: Vec<LightFieldConstants>,
    pub shadow_maps: Vec<ShadowMapConstants>,
    pub shadow_cubes: Vec<ShadowMapConstants>,
    pub images: Vec<ImageConstants>,

    pub light_probe: ShaderConstant,
    pub light_probe_props: ShaderConstant,
    pub light_probe_rotation: ShaderConstant,
    pub light_probe_offset: ShaderConstant,
    pub light_probe2: ShaderConstant,
    pub light_probe2_props: ShaderConstant,

    pub ao_texture: ShaderConstant,
    pub ao_properties: ShaderConstant,
    pub ao_properties2: ShaderConstant,
    pub shadow_properties: ShaderConstant,
    pub ao_screen_const: ShaderConstant,

    extra: RefCell<HashMap<String, ShaderConstant>>,
}

impl ShaderPropertyBundle {
    pub fn new(device: &dyn GraphicsDevice, program: ProgramHandle) -> Self {
        let named = |name: &str| ShaderConstant::resolve(device, program, name);
        Self {
            program,
            model_view_projection: named("model_view_projection"),
            model_matrix: named("model_matrix"),
            normal_matrix: named("normal_matrix"),
            view_projection_matrix: named("view_projection_matrix"),
            view_matrix: named("view_matrix"),
            camera_position: named("camera_position"),
            camera_direction: named("camera_direction"),
            camera_properties: named("camera_properties"),
            light_ambient_total: named("light_ambient_total"),
            material_diffuse: named("material_diffuse"),
            material_specular: named("material_specular"),
            material_properties: named("material_properties"),
            material_emissive: named("material_emissive"),
            bump_amount: named("bump_amount"),
            displace_amount: named("displace_amount"),
            object_opacity: named("object_opacity"),
            light_count: named("uNumLights"),
            lights: (0..MAX_LIGHTS)
                .map(|index| LightFieldConstants::resolve(device, program, index))
                .collect(),
            shadow_maps: (0..MAX_LIGHTS)
                .map(|index| ShadowMapConstants::resolve(device, program, "shadowmap", index))
                .collect(),
            shadow_cubes: (0..MAX_LIGHTS)
                .map(|index| ShadowMapConstants::resolve(device, program, "shadowcube", index))
                .collect(),
            images: (0..MAX_MATERIAL_IMAGES)
                .map(|index| ImageConstants {
                    sampler: named(&format!("image{index}_sampler")),
                    rotations: named(&format!("image{index}_rotations")),
                    offsets: named(&format!("image{index}_offsets")),
                })
                .collect(),
            light_probe: named("light_probe"),
            light_probe_props: named("light_probe_props"),
            light_probe_rotation: named("light_probe_rotation"),
            light_probe_offset: named("light_probe_offset"),
            light_probe2: named("light_probe2"),
            light_probe2_props: named("light_probe2_props"),
            ao_texture: named("ao_texture"),
            ao_properties: named("ao_properties"),
            ao_properties2: named("ao_properties2"),
            shadow_properties: named("shadow_properties"),
            ao_screen_const: named("ao_screen_const"),
            extra: RefCell::new(HashMap::new()),
        }
    }

    pub fn program(&self) -> ProgramHandle {
        self.program
    }

    /// Looks up a uniform outside the standard set, caching the result.
    pub fn constant(&self, device: &dyn GraphicsDevice, name: &str) -> ShaderConstant {
        if let Some(constant) = self.extra.borrow().get(name) {
            return constant.clone();
        }
        let constant = ShaderConstant::resolve(device, self.program, name);
        self.extra
            .borrow_mut()
            .insert(name.to_string(), constant.clone());
        constant
    }

    /// Sets a uniform by name through [`Self::constant`].
    pub fn set(&self, device: &mut dyn GraphicsDevice, name: &str, value: UniformValue) -> bool {
        let constant = self.constant(device, name);
        constant.set(device, self.program, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{HeadlessDevice, ProgramSource};

    fn program(device: &mut HeadlessDevice) -> ProgramHandle {
        let source = ProgramSource {
            name: "props".into(),
            vertex: "uniform mat4 model_view_projection;\nvoid main() {}\n".into(),
            fragment: "uniform float object_opacity;\nuniform sampler2D image0_sampler;\nvoid main() {}\n"
                .into(),
        };
        device.create_program(&source).unwrap()
    }

    #[test]
    fn mismatched_type_is_not_applied() {
        let mut device = HeadlessDevice::new();
        let program = program(&mut device);
        let bundle = ShaderPropertyBundle::new(&device, program);

        assert!(!bundle.object_opacity.set(&mut device, program, UniformValue::Int(1)));
        assert_eq!(device.uniform_value(program, "object_opacity"), None);
        assert!(bundle.object_opacity.set(&mut device, program, UniformValue::Float(0.5)));
        assert_eq!(
            device.uniform_value(program, "object_opacity"),
            Some(UniformValue::Float(0.5))
        );
    }

    #[test]
    fn missing_constants_stay_unresolved() {
        let mut device = HeadlessDevice::new();
        let program = program(&mut device);
        let bundle = ShaderPropertyBundle::new(&device, program);

        assert!(bundle.images[0].sampler.is_resolved());
        assert!(!bundle.images[1].sampler.is_resolved());
        assert!(!bundle.set(&mut device, "does_not_exist", UniformValue::Float(1.0)));
        assert!(!bundle.lights[0].position.is_resolved());
    }
}
