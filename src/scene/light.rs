use glam::{Mat4, Vec3};

use super::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightKind {
    Directional,
    Point,
    Area,
}

impl LightKind {
    /// Two-bit code used inside shader variant keys.
    pub const fn code(self) -> u8 {
        match self {
            LightKind::Directional => 1,
            LightKind::Point => 2,
            LightKind::Area => 3,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(LightKind::Directional),
            2 => Some(LightKind::Point),
            3 => Some(LightKind::Area),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Light {
    pub id: NodeId,
    pub kind: LightKind,
    /// Light-to-world transform. The light shines down its local -Z.
    pub global_transform: Mat4,
    pub enabled: bool,
    pub diffuse: Vec3,
    pub specular: Vec3,
    pub ambient: Vec3,
    pub brightness: f32,
    pub linear_fade: f32,
    pub exponential_fade: f32,
    pub area_width: f32,
    pub area_height: f32,
    /// Only models under this node are lit when set.
    pub scope: Option<NodeId>,
    pub cast_shadow: bool,
    pub shadow_bias: f32,
    pub shadow_factor: f32,
    pub shadow_filter: f32,
    pub shadow_map_far: f32,
    pub shadow_map_fov: f32,
    /// Edge length of the shadow map; zero picks the configured default.
    pub shadow_map_size: u32,
}

impl Light {
    pub fn new(id: NodeId, kind: LightKind) -> Self {
        Self {
            id,
            kind,
            global_transform: Mat4::IDENTITY,
            enabled: true,
            diffuse: Vec3::ONE,
            specular: Vec3::ONE,
            ambient: Vec3::ZERO,
            brightness: 100.0,
            linear_fade: 0.0,
            exponential_fade: 0.0,
            area_width: 100.0,
            area_height: 100.0,
            scope: None,
            cast_shadow: false,
            shadow_bias: 0.0,
            shadow_factor: 10.0,
            shadow_filter: 35.0,
            shadow_map_far: 5000.0,
            shadow_map_fov: 90.0,
            shadow_map_size: 0,
        }
    }

    pub fn directional(id: NodeId, direction: Vec3) -> Self {
        let mut light = Self::new(id, LightKind::Directional);
        light.global_transform = orient_along(Vec3::ZERO, direction);
        light
    }

    pub fn point(id: NodeId, position: Vec3) -> Self {
        let mut light = Self::new(id, LightKind::Point);
        light.global_transform = Mat4::from_translation(position);
        light
    }

    pub fn position(&self) -> Vec3 {
        self.global_transform.w_axis.truncate()
    }

    pub fn direction(&self) -> Vec3 {
        (-self.global_transform.z_axis.truncate()).normalize_or_zero()
    }

    pub fn up(&self) -> Vec3 {
        self.global_transform.y_axis.truncate().normalize_or_zero()
    }

    pub fn right(&self) -> Vec3 {
        self.global_transform.x_axis.truncate().normalize_or_zero()
    }

    pub fn casts_shadow(&self) -> bool {
        self.enabled && self.cast_shadow
    }
}

/// Transform placing a node at `position` with its -Z axis along `direction`.
pub fn orient_along(position: Vec3, direction: Vec3) -> Mat4 {
    let forward = direction.normalize_or_zero();
    let up = if forward.abs().dot(Vec3::Y) > 0.95 {
        Vec3::Z
    } else {
        Vec3::Y
    };
    let right = forward.cross(up).normalize();
    let up = right.cross(forward);
    Mat4::from_cols(
        right.extend(0.0),
        up.extend(0.0),
        (-forward).extend(0.0),
        position.extend(1.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directional_light_points_where_asked() {
        let dir = Vec3::new(0.3, -1.0, -0.2).normalize();
        let light = Light::directional(NodeId(1), dir);

        assert!(light.direction().abs_diff_eq(dir, 1e-5));
        assert!(light.up().dot(light.direction()).abs() < 1e-5);
        assert!(light.right().dot(light.up()).abs() < 1e-5);
    }

    #[test]
    fn kind_codes_round_trip() {
        for kind in [LightKind::Directional, LightKind::Point, LightKind::Area] {
            assert_eq!(LightKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(LightKind::from_code(0), None);
    }
}
