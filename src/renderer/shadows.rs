//! Per-light shadow map resources and light cameras.

use glam::{Mat4, Vec3, Vec4};

use crate::device::{CubeFace, GraphicsDevice, RenderbufferHandle, TextureHandle};
use crate::error::RenderError;
use crate::renderer::lights::{shadow_bias_matrix, LightShadow};
use crate::renderer::resource_pool::ResourcePool;
use crate::renderer::shader::ShadowBinding;
use crate::scene::{Camera, Light, LightKind, NodeId};

/// Depth is stored as a colour value so it can be blurred.
pub const SHADOW_MAP_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R16Float;
pub const SHADOW_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;
pub const CUBE_SHADOW_NEAR: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowMapKind {
    /// Single 2D map rendered with an orthographic light camera.
    Directional,
    /// Six-face cube rendered from the light position.
    Cube,
}

impl ShadowMapKind {
    pub fn for_light(kind: LightKind) -> Self {
        match kind {
            LightKind::Directional => ShadowMapKind::Directional,
            LightKind::Point | LightKind::Area => ShadowMapKind::Cube,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShadowMapEntry {
    pub light: NodeId,
    pub kind: ShadowMapKind,
    pub size: u32,
    pub map: TextureHandle,
    /// Scratch target for the first blur direction.
    pub blur: TextureHandle,
    pub depth: RenderbufferHandle,
    pub view: Mat4,
    pub projection: Mat4,
    pub view_proj: Mat4,
    pub face_view_projs: [Mat4; 6],
    pub position: Vec3,
    /// (bias, factor, far, 0)
    pub control: Vec4,
}

impl ShadowMapEntry {
    pub fn binding(&self) -> ShadowBinding {
        ShadowBinding {
            texture: self.map,
            cube: self.kind == ShadowMapKind::Cube,
        }
    }

    /// What the lit shaders need to sample this map.
    pub fn light_shadow(&self, index: usize) -> LightShadow {
        let view = match self.kind {
            ShadowMapKind::Directional => shadow_bias_matrix() * self.view_proj,
            // cube faces are world aligned; lookups use the world vector
            ShadowMapKind::Cube => Mat4::IDENTITY,
        };
        LightShadow {
            index: index as i32,
            view,
            control: self.control,
        }
    }
}

#[derive(Debug, Default)]
pub struct ShadowMapManager {
    entries: Vec<ShadowMapEntry>,
}

impl ShadowMapManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ShadowMapEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [ShadowMapEntry] {
        &mut self.entries
    }

    pub fn entry_index(&self, light: NodeId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.light == light)
    }

    pub fn bindings(&self) -> Vec<ShadowBinding> {
        self.entries.iter().map(ShadowMapEntry::binding).collect()
    }

    /// Drops entries for lights not in `keep`. Indices of the survivors may
    /// change, so call this before handing out new indices.
    pub fn release_unused(&mut self, pool: &mut ResourcePool, keep: &[NodeId]) {
        let (kept, dropped): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|entry| keep.contains(&entry.light));
        for entry in dropped {
            release_entry(pool, &entry);
        }
        self.entries = kept;
    }

    /// Returns the index of the light's entry, allocating (or reallocating
    /// on a kind/size change) as needed.
    pub fn add_shadow_map_entry(
        &mut self,
        device: &mut dyn GraphicsDevice,
        pool: &mut ResourcePool,
        light: NodeId,
        kind: ShadowMapKind,
        size: u32,
    ) -> Result<usize, RenderError> {
        if let Some(index) = self.entry_index(light) {
            let entry = &self.entries[index];
            if entry.kind == kind && entry.size == size {
                return Ok(index);
            }
            let stale = self.entries.remove(index);
            release_entry(pool, &stale);
        }

        let map = acquire_map(device, pool, kind, size)
            .ok_or_else(|| RenderError::creation(format!("shadow map {size}x{size}")))?;
        let Some(blur) = acquire_map(device, pool, kind, size) else {
            pool.release_texture(map);
            return Err(RenderError::creation("shadow blur target"));
        };
        let Some(depth) = pool.acquire_renderbuffer(device, size, size, SHADOW_DEPTH_FORMAT, 1) else {
            pool.release_texture(map);
            pool.release_texture(blur);
            return Err(RenderError::creation("shadow depth buffer"));
        };

        self.entries.push(ShadowMapEntry {
            light,
            kind,
            size,
            map,
            blur,
            depth,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            view_proj: Mat4::IDENTITY,
            face_view_projs: [Mat4::IDENTITY; 6],
            position: Vec3::ZERO,
            control: Vec4::ZERO,
        });
        Ok(self.entries.len() - 1)
    }

    pub fn release_all(&mut self, pool: &mut ResourcePool) {
        for entry in self.entries.drain(..) {
            release_entry(pool, &entry);
        }
    }
}

fn acquire_map(
    device: &mut dyn GraphicsDevice,
    pool: &mut ResourcePool,
    kind: ShadowMapKind,
    size: u32,
) -> Option<TextureHandle> {
    match kind {
        ShadowMapKind::Directional => {
            pool.acquire_texture_2d(device, size, size, SHADOW_MAP_FORMAT, 1, false)
        }
        ShadowMapKind::Cube => pool.acquire_texture_cube(device, size, SHADOW_MAP_FORMAT),
    }
}

fn release_entry(pool: &mut ResourcePool, entry: &ShadowMapEntry) {
    pool.release_texture(entry.map);
    pool.release_texture(entry.blur);
    pool.release_renderbuffer(entry.depth);
}

fn light_up(direction: Vec3) -> Vec3 {
    if direction.abs().dot(Vec3::Y) > 0.95 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

/// Orthographic light camera that tightly bounds the main camera frustum
/// (clipped to the light's shadow distance), seen along the light direction.
pub fn fit_directional_shadow(camera: &Camera, viewport: (f32, f32), light: &Light) -> (Mat4, Mat4) {
    let clipped = Camera {
        far: camera.far.min(light.shadow_map_far).max(camera.near + 1.0),
        ..*camera
    };
    let corners = clipped.frustum_corners(viewport.0, viewport.1);
    let center = corners.iter().copied().sum::<Vec3>() / corners.len() as f32;
    let radius = corners
        .iter()
        .map(|corner| corner.distance(center))
        .fold(0.0f32, f32::max)
        .max(1.0);

    let direction = light.direction().normalize_or_zero();
    let direction = if direction == Vec3::ZERO { Vec3::NEG_Z } else { direction };
    let eye = center - direction * radius * 2.0;
    let view = Mat4::look_at_rh(eye, center, light_up(direction));

    let mut min = Vec3::splat(f32::MAX);
    let mut max = Vec3::splat(f32::MIN);
    for corner in corners {
        let p = view.transform_point3(corner);
        min = min.min(p);
        max = max.max(p);
    }
    // view space looks down -Z, so the near plane sits at -max.z
    let projection = Mat4::orthographic_rh_gl(min.x, max.x, min.y, max.y, -max.z, -min.z);
    (view, projection)
}

pub fn cube_face_view(position: Vec3, face: CubeFace) -> Mat4 {
    let (forward, up) = face.basis();
    Mat4::look_at_rh(position, position + forward, up)
}

pub fn cube_face_projection(far: f32) -> Mat4 {
    Mat4::perspective_rh_gl(
        std::f32::consts::FRAC_PI_2,
        1.0,
        CUBE_SHADOW_NEAR,
        far.max(CUBE_SHADOW_NEAR + 1.0),
    )
}

/// Fills the camera data of `entry` for this frame.
pub fn update_entry_cameras(entry: &mut ShadowMapEntry, camera: &Camera, viewport: (f32, f32), light: &Light) {
    entry.control = Vec4::new(light.shadow_bias, light.shadow_factor, light.shadow_map_far, 0.0);
    entry.position = light.position();
    match entry.kind {
        ShadowMapKind::Directional => {
            let (view, projection) = fit_directional_shadow(camera, viewport, light);
            entry.view = view;
            entry.projection = projection;
            entry.view_proj = projection * view;
        }
        ShadowMapKind::Cube => {
            let projection = cube_face_projection(light.shadow_map_far);
            entry.view = Mat4::from_translation(-entry.position);
            entry.projection = projection;
            entry.view_proj = projection * entry.view;
            for (slot, face) in CubeFace::ALL.into_iter().enumerate() {
                entry.face_view_projs[slot] = projection * cube_face_view(entry.position, face);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;

    #[test]
    fn directional_fit_contains_the_clipped_frustum() {
        let camera = Camera {
            near: 1.0,
            far: 100.0,
            ..Camera::perspective(Vec3::new(0.0, 5.0, 20.0), Vec3::ZERO, 45f32.to_radians())
        };
        let light = Light::directional(NodeId(1), Vec3::new(0.3, -1.0, 0.2));
        let (view, projection) = fit_directional_shadow(&camera, (16.0, 9.0), &light);
        let view_proj = projection * view;

        for corner in camera.frustum_corners(16.0, 9.0) {
            let ndc = view_proj.project_point3(corner);
            assert!(ndc.abs().max_element() <= 1.0 + 1e-3, "{ndc:?}");
        }
    }

    #[test]
    fn cube_faces_look_along_their_axes() {
        let position = Vec3::new(1.0, 2.0, 3.0);
        for face in CubeFace::ALL {
            let (forward, _) = face.basis();
            let view = cube_face_view(position, face);
            let ahead = view.transform_point3(position + forward);
            assert!(ahead.abs_diff_eq(Vec3::new(0.0, 0.0, -1.0), 1e-5));
        }
    }

    #[test]
    fn size_change_reallocates_and_unused_entries_are_released() {
        let mut device = HeadlessDevice::new();
        let mut pool = ResourcePool::new();
        let mut shadows = ShadowMapManager::new();

        let index = shadows
            .add_shadow_map_entry(&mut device, &mut pool, NodeId(3), ShadowMapKind::Cube, 256)
            .unwrap();
        let again = shadows
            .add_shadow_map_entry(&mut device, &mut pool, NodeId(3), ShadowMapKind::Cube, 256)
            .unwrap();
        assert_eq!(index, again);
        let map = shadows.entries()[index].map;

        shadows
            .add_shadow_map_entry(&mut device, &mut pool, NodeId(3), ShadowMapKind::Cube, 512)
            .unwrap();
        assert_ne!(shadows.entries()[0].map, map);
        assert_eq!(shadows.entries().len(), 1);

        shadows.release_unused(&mut pool, &[]);
        assert!(shadows.entries().is_empty());
        assert_eq!(pool.outstanding_references(), 0);
    }
}
