use glam::{Mat4, Vec2, Vec3, Vec4};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Projection {
    Perspective { fov_y_radians: f32 },
    /// Orthographic camera measured in layer pixels.
    Orthographic,
}

/// Layer camera. Matrices follow GL conventions (clip depth in [-1, 1]).
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub projection: Projection,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn perspective(eye: Vec3, target: Vec3, fov_y_radians: f32) -> Self {
        Self {
            eye,
            target,
            projection: Projection::Perspective { fov_y_radians },
            ..Self::default()
        }
    }

    /// Camera that maps a `width` x `height` pixel area onto the whole
    /// viewport, looking down -Z. Used for compositing quads.
    pub fn layer_ortho() -> Self {
        Self {
            eye: Vec3::new(0.0, 0.0, 600.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            projection: Projection::Orthographic,
            near: 1.0,
            far: 1200.0,
        }
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    pub fn proj(&self, width: f32, height: f32) -> Mat4 {
        match self.projection {
            Projection::Perspective { fov_y_radians } => {
                let aspect = if height > 0.0 { width / height } else { 1.0 };
                Mat4::perspective_rh_gl(fov_y_radians, aspect, self.near, self.far)
            }
            Projection::Orthographic => {
                let half_w = width * 0.5;
                let half_h = height * 0.5;
                Mat4::orthographic_rh_gl(-half_w, half_w, -half_h, half_h, self.near, self.far)
            }
        }
    }

    pub fn view_proj(&self, width: f32, height: f32) -> Mat4 {
        self.proj(width, height) * self.view()
    }

    pub fn position(&self) -> Vec3 {
        self.eye
    }

    pub fn direction(&self) -> Vec3 {
        (self.target - self.eye).normalize_or_zero()
    }

    pub fn clip_range(&self) -> Vec2 {
        Vec2::new(self.near, self.far)
    }

    /// World-space corners of the view frustum, near plane first.
    pub fn frustum_corners(&self, width: f32, height: f32) -> [Vec3; 8] {
        let inverse = self.view_proj(width, height).inverse();
        let mut corners = [Vec3::ZERO; 8];
        let mut i = 0;
        for z in [-1.0, 1.0] {
            for y in [-1.0, 1.0] {
                for x in [-1.0, 1.0] {
                    corners[i] = inverse.project_point3(Vec3::new(x, y, z));
                    i += 1;
                }
            }
        }
        corners
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Vec3::new(0.0, 0.0, 600.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            projection: Projection::Perspective {
                fov_y_radians: 60f32.to_radians(),
            },
            near: 10.0,
            far: 5000.0,
        }
    }
}

/// Six clip planes pulled out of a view-projection matrix.
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    pub fn from_view_proj(m: Mat4) -> Self {
        let r0 = m.row(0);
        let r1 = m.row(1);
        let r2 = m.row(2);
        let r3 = m.row(3);
        let planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r3 + r2, r3 - r2].map(|p| {
            let len = p.truncate().length();
            if len > 0.0 {
                p / len
            } else {
                p
            }
        });
        Self { planes }
    }

    /// Conservative box test: false only when the box is fully outside one plane.
    pub fn intersects_aabb(&self, min: Vec3, max: Vec3) -> bool {
        self.planes.iter().all(|plane| {
            let normal = plane.truncate();
            let positive = Vec3::select(normal.cmpge(Vec3::ZERO), max, min);
            normal.dot(positive) + plane.w >= 0.0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_proj_is_invertible() {
        let cam = Camera::default();
        let vp = cam.view_proj(1920.0, 1080.0);
        let id = vp * vp.inverse();
        assert!(id.abs_diff_eq(Mat4::IDENTITY, 1e-4));
    }

    #[test]
    fn frustum_rejects_boxes_behind_the_camera() {
        let cam = Camera::perspective(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, 60f32.to_radians());
        let cam = Camera { near: 0.1, far: 100.0, ..cam };
        let frustum = Frustum::from_view_proj(cam.view_proj(1.0, 1.0));

        assert!(frustum.intersects_aabb(Vec3::splat(-1.0), Vec3::splat(1.0)));
        assert!(!frustum.intersects_aabb(Vec3::new(-1.0, -1.0, 20.0), Vec3::new(1.0, 1.0, 22.0)));
    }

    #[test]
    fn corners_span_near_and_far_planes() {
        let cam = Camera::perspective(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, 90f32.to_radians());
        let cam = Camera { near: 1.0, far: 11.0, ..cam };
        let corners = cam.frustum_corners(1.0, 1.0);

        assert!((corners[0].z - 9.0).abs() < 1e-3);
        assert!((corners[7].z + 1.0).abs() < 1e-3);
        // 90 degree fov: far half-extent equals the far distance
        assert!((corners[7].x - 11.0).abs() < 1e-2);
    }
}
