use glam::{Mat4, Quat, Vec3};

/// Local node transform. Global transforms are composed by the scene owner.
#[derive(Clone, Copy, Debug)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::default()
        }
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// `parent * self`, the global matrix of a child of `parent`.
    pub fn under(&self, parent: Mat4) -> Mat4 {
        parent * self.matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_inherits_parent_translation() {
        let parent = Transform::from_translation(Vec3::new(0.0, 5.0, 0.0)).matrix();
        let child = Transform::from_translation(Vec3::X).with_scale(Vec3::splat(2.0));
        let p = child.under(parent).transform_point3(Vec3::X);
        // scale about origin, then child then parent translation
        assert!(p.abs_diff_eq(Vec3::new(3.0, 5.0, 0.0), 1e-6));
    }
}
