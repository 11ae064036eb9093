//! Per-frame draw items produced by layer preparation.
//!
//! A renderable never borrows the scene. It records indices into the
//! layer's model/text/path lists and the matrices computed for this frame,
//! so the layer can be read again when the draw is issued.

use bitflags::bitflags;
use glam::{Mat3, Mat4, Vec3};

use crate::device::Geometry;
use crate::renderer::shader::{ShaderVariantKey, VertexPipeline};
use crate::scene::NodeId;

/// Below this accumulated opacity an object is not drawn at all.
pub const MIN_VISIBLE_OPACITY: f32 = 0.01;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RenderableFlags: u8 {
        const TRANSPARENT = 1 << 0;
        const COMPLETELY_TRANSPARENT = 1 << 1;
        const CASTS_SHADOW = 1 << 2;
        /// Needs the two-pass advanced blend fallback.
        const SOFTWARE_BLEND = 1 << 3;
    }
}

#[derive(Debug, Clone)]
pub struct RenderableCommon {
    pub node: NodeId,
    pub flags: RenderableFlags,
    pub model_matrix: Mat4,
    pub model_view_projection: Mat4,
    pub normal_matrix: Mat3,
    pub opacity: f32,
    /// Index into the layer's light subsets.
    pub light_subset: usize,
    pub camera_distance: f32,
    pub geometry: Geometry,
}

impl RenderableCommon {
    pub fn new(node: NodeId, model_matrix: Mat4, view_proj: Mat4, camera: Vec3, geometry: Geometry) -> Self {
        Self {
            node,
            flags: RenderableFlags::empty(),
            model_matrix,
            model_view_projection: view_proj * model_matrix,
            normal_matrix: Mat3::from_mat4(model_matrix.inverse().transpose()),
            opacity: 1.0,
            light_subset: 0,
            camera_distance: model_matrix.w_axis.truncate().distance(camera),
            geometry,
        }
    }

    pub fn is_transparent(&self) -> bool {
        self.flags.contains(RenderableFlags::TRANSPARENT)
    }
}

#[derive(Debug, Clone)]
pub enum RenderableKind {
    DefaultMaterial {
        model: usize,
        subset: usize,
        key: ShaderVariantKey,
        pipeline: VertexPipeline,
    },
    CustomMaterial {
        model: usize,
        subset: usize,
    },
    Text {
        index: usize,
    },
    Path {
        index: usize,
    },
}

#[derive(Debug, Clone)]
pub struct Renderable {
    pub common: RenderableCommon,
    pub kind: RenderableKind,
}

impl Renderable {
    pub fn new(common: RenderableCommon, kind: RenderableKind) -> Self {
        Self { common, kind }
    }

    pub fn flags(&self) -> RenderableFlags {
        self.common.flags
    }
}

/// Classifies accumulated opacity plus the material's own transparency.
pub fn opacity_flags(opacity: f32, material_transparent: bool) -> RenderableFlags {
    let mut flags = RenderableFlags::empty();
    if opacity < MIN_VISIBLE_OPACITY {
        flags |= RenderableFlags::COMPLETELY_TRANSPARENT;
    }
    if material_transparent || opacity < 1.0 {
        flags |= RenderableFlags::TRANSPARENT;
    }
    flags
}

/// Farthest first so blending composes correctly. The sort is stable,
/// equal distances keep submission order.
pub fn sort_back_to_front(renderables: &mut [Renderable]) {
    renderables.sort_by(|a, b| b.common.camera_distance.total_cmp(&a.common.camera_distance));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BufferHandle;

    fn item(id: u32, z: f32) -> Renderable {
        let common = RenderableCommon::new(
            NodeId(id),
            Mat4::from_translation(Vec3::new(0.0, 0.0, z)),
            Mat4::IDENTITY,
            Vec3::new(0.0, 0.0, 100.0),
            Geometry::triangles(BufferHandle(1), None, 3),
        );
        Renderable::new(common, RenderableKind::Path { index: id as usize })
    }

    #[test]
    fn transparent_items_sort_far_to_near() {
        let mut items = vec![item(1, 50.0), item(2, -20.0), item(3, 10.0)];
        sort_back_to_front(&mut items);
        let order: Vec<_> = items.iter().map(|item| item.common.node.0).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn near_zero_opacity_is_completely_transparent() {
        let flags = opacity_flags(0.005, false);
        assert!(flags.contains(RenderableFlags::COMPLETELY_TRANSPARENT | RenderableFlags::TRANSPARENT));
        assert_eq!(opacity_flags(1.0, false), RenderableFlags::empty());
        assert_eq!(opacity_flags(1.0, true), RenderableFlags::TRANSPARENT);
    }
}
