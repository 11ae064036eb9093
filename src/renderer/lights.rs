//! Light data as the shaders see it.
//!
//! [`LightConstants`] is laid out to match the std140 `LightSource` struct
//! the generated shaders declare, so the same value can be copied into the
//! shared constant buffer or split into individual uniforms.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::scene::{Light, LightKind};

pub const MAX_LIGHTS: usize = 8;

pub fn translate_constant_attenuation(brightness: f32) -> f32 {
    brightness * 0.01
}

pub fn translate_linear_attenuation(fade: f32) -> f32 {
    fade.clamp(0.0, 1000.0) * 0.0001
}

pub fn translate_quadratic_attenuation(fade: f32) -> f32 {
    fade.clamp(0.0, 1000.0) * 0.000_000_1
}

/// Maps clip space [-1, 1] to texture space [0, 1].
pub fn shadow_bias_matrix() -> Mat4 {
    Mat4::from_cols(
        Vec4::new(0.5, 0.0, 0.0, 0.0),
        Vec4::new(0.0, 0.5, 0.0, 0.0),
        Vec4::new(0.0, 0.0, 0.5, 0.0),
        Vec4::new(0.5, 0.5, 0.5, 1.0),
    )
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct LightConstants {
    pub position: [f32; 4],
    pub direction: [f32; 4],
    pub up: [f32; 4],
    pub right: [f32; 4],
    pub diffuse: [f32; 4],
    pub ambient: [f32; 4],
    pub specular: [f32; 4],
    pub spot_exponent: f32,
    pub spot_cutoff: f32,
    pub constant_attenuation: f32,
    pub linear_attenuation: f32,
    pub quadratic_attenuation: f32,
    pub range: f32,
    pub width: f32,
    pub height: f32,
    pub shadow_control: [f32; 4],
    pub shadow_view: [[f32; 4]; 4],
    pub shadow_idx: i32,
    pub _pad: [i32; 3],
}

/// Shadow data attached to a light that has a shadow map this frame.
#[derive(Clone, Copy, Debug)]
pub struct LightShadow {
    pub index: i32,
    /// World to shadow-texture space (directional) or world to light view (cube).
    pub view: Mat4,
    pub control: Vec4,
}

impl LightConstants {
    pub fn from_light(light: &Light, shadow: Option<LightShadow>) -> Self {
        let brightness = light.brightness * 0.01;
        let direction = light.direction();
        let position = match light.kind {
            LightKind::Directional => (-direction).extend(0.0),
            LightKind::Point | LightKind::Area => light.position().extend(1.0),
        };
        let (width, height) = match light.kind {
            LightKind::Area => (light.area_width, light.area_height),
            _ => (0.0, 0.0),
        };
        let (shadow_idx, shadow_view, shadow_control) = match shadow {
            Some(shadow) => (shadow.index, shadow.view, shadow.control),
            None => (-1, Mat4::IDENTITY, Vec4::ZERO),
        };

        Self {
            position: position.to_array(),
            direction: direction.extend(0.0).to_array(),
            up: light.up().extend(0.0).to_array(),
            right: light.right().extend(0.0).to_array(),
            diffuse: (light.diffuse * brightness).extend(1.0).to_array(),
            ambient: light.ambient.extend(1.0).to_array(),
            specular: (light.specular * brightness).extend(1.0).to_array(),
            spot_exponent: 1.0,
            spot_cutoff: 180.0,
            constant_attenuation: translate_constant_attenuation(light.brightness),
            linear_attenuation: translate_linear_attenuation(light.linear_fade),
            quadratic_attenuation: translate_quadratic_attenuation(light.exponential_fade),
            range: light.shadow_map_far,
            width,
            height,
            shadow_control: shadow_control.to_array(),
            shadow_view: shadow_view.to_cols_array_2d(),
            shadow_idx,
            _pad: [0; 3],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct LightsBlock {
    pub count: i32,
    pub _pad: [i32; 3],
    pub lights: [LightConstants; MAX_LIGHTS],
}

impl LightsBlock {
    pub fn from_lights(lights: &[LightConstants]) -> Self {
        let mut block = Self::zeroed();
        let count = lights.len().min(MAX_LIGHTS);
        block.count = count as i32;
        block.lights[..count].copy_from_slice(&lights[..count]);
        block
    }
}

/// Sum of the ambient terms of every enabled light.
pub fn ambient_total<'a>(lights: impl IntoIterator<Item = &'a Light>) -> Vec3 {
    lights
        .into_iter()
        .filter(|light| light.enabled)
        .fold(Vec3::ZERO, |acc, light| acc + light.ambient)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::NodeId;

    #[test]
    fn attenuation_follows_the_fixed_scales() {
        assert_eq!(translate_constant_attenuation(100.0), 1.0);
        assert_eq!(translate_constant_attenuation(0.0), 0.0);
        assert!((translate_linear_attenuation(500.0) - 0.05).abs() < 1e-6);
        assert!((translate_quadratic_attenuation(500.0) - 0.000_05).abs() < 1e-9);
    }

    #[test]
    fn fade_is_clamped_to_one_thousand() {
        assert_eq!(translate_linear_attenuation(2000.0), translate_linear_attenuation(1000.0));
        assert_eq!(translate_quadratic_attenuation(5000.0), translate_quadratic_attenuation(1000.0));
        assert_eq!(translate_linear_attenuation(-10.0), 0.0);
        assert_eq!(translate_quadratic_attenuation(-10.0), 0.0);
    }

    #[test]
    fn constants_match_std140_struct_size() {
        assert_eq!(std::mem::size_of::<LightConstants>(), 240);
        assert_eq!(std::mem::size_of::<LightsBlock>(), 16 + 240 * MAX_LIGHTS);
    }

    #[test]
    fn bias_matrix_maps_clip_corners_to_texture_corners() {
        let bias = shadow_bias_matrix();
        let lo = bias.transform_point3(Vec3::splat(-1.0));
        let hi = bias.transform_point3(Vec3::splat(1.0));
        assert!(lo.abs_diff_eq(Vec3::ZERO, 1e-6));
        assert!(hi.abs_diff_eq(Vec3::ONE, 1e-6));
    }

    #[test]
    fn directional_position_points_back_at_the_light() {
        let light = Light::directional(NodeId(1), Vec3::NEG_Y);
        let constants = LightConstants::from_light(&light, None);

        assert_eq!(constants.position[3], 0.0);
        assert!((constants.position[1] - 1.0).abs() < 1e-6);
        assert_eq!(constants.shadow_idx, -1);
    }

    #[test]
    fn block_clamps_to_max_lights() {
        let light = LightConstants::from_light(&Light::point(NodeId(2), Vec3::ZERO), None);
        let block = LightsBlock::from_lights(&[light; MAX_LIGHTS + 3]);
        assert_eq!(block.count, MAX_LIGHTS as i32);
    }
}
