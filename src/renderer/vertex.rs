use bytemuck::{Pod, Zeroable};

use crate::device::{create_buffer_with, BufferUsage, Geometry, GraphicsDevice};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    /// Attribute names bound by every generated vertex stage, in location order.
    pub const ATTRIBUTES: [&'static str; 3] = ["attr_pos", "attr_norm", "attr_uv0"];
}

#[inline]
pub fn v(pos: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Vertex {
    Vertex { pos, normal, uv }
}

/// Two triangles covering clip space [-1, 1] with UVs in [0, 1].
pub fn fullscreen_quad() -> ([Vertex; 4], [u16; 6]) {
    let n = [0.0, 0.0, 1.0];
    (
        [
            v([-1.0, -1.0, 0.0], n, [0.0, 0.0]),
            v([1.0, -1.0, 0.0], n, [1.0, 0.0]),
            v([1.0, 1.0, 0.0], n, [1.0, 1.0]),
            v([-1.0, 1.0, 0.0], n, [0.0, 1.0]),
        ],
        [0, 1, 2, 0, 2, 3],
    )
}

/// Uploads the shared full-screen quad.
pub fn create_quad_geometry(device: &mut dyn GraphicsDevice) -> Option<Geometry> {
    let (vertices, indices) = fullscreen_quad();
    let vertex_buffer = create_buffer_with(device, BufferUsage::Vertex, &vertices)?;
    let Some(index_buffer) = create_buffer_with(device, BufferUsage::Index, &indices) else {
        device.destroy_buffer(vertex_buffer);
        return None;
    };
    Some(Geometry::triangles(
        vertex_buffer,
        Some(index_buffer),
        indices.len() as u32,
    ))
}

/// Axis-aligned cube of half-extent `h`, outward normals.
pub fn cube_mesh(h: f32) -> (Vec<Vertex>, Vec<u16>) {
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u_axis, v_axis) in faces {
        let base = vertices.len() as u16;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let pos = [
                (normal[0] + u_axis[0] * su + v_axis[0] * sv) * h,
                (normal[1] + u_axis[1] * su + v_axis[1] * sv) * h,
                (normal[2] + u_axis[2] * su + v_axis[2] * sv) * h,
            ];
            vertices.push(v(pos, normal, [(su + 1.0) * 0.5, (sv + 1.0) * 0.5]));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

/// Uploads [`cube_mesh`] and returns drawable geometry.
pub fn create_cube_geometry(device: &mut dyn GraphicsDevice, half_extent: f32) -> Option<Geometry> {
    let (vertices, indices) = cube_mesh(half_extent);
    let vertex_buffer = create_buffer_with(device, BufferUsage::Vertex, &vertices)?;
    let index_buffer = create_buffer_with(device, BufferUsage::Index, &indices)?;
    Some(Geometry::triangles(
        vertex_buffer,
        Some(index_buffer),
        indices.len() as u32,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn vertex_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
    }

    #[test]
    fn cube_faces_wind_outward() {
        let (vertices, indices) = cube_mesh(1.0);
        for tri in indices.chunks(3) {
            let a = Vec3::from(vertices[tri[0] as usize].pos);
            let b = Vec3::from(vertices[tri[1] as usize].pos);
            let c = Vec3::from(vertices[tri[2] as usize].pos);
            let n = Vec3::from(vertices[tri[0] as usize].normal);
            assert!((b - a).cross(c - a).dot(n) > 0.0);
        }
    }
}
