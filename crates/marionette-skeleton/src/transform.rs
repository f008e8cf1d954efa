//! Rigid joint transforms

use glam::{Mat4, Quat, Vec3};

/// Local transform of one joint relative to its parent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointTransform {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for JointTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl JointTransform {
    pub const IDENTITY: JointTransform = JointTransform {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
        }
    }

    /// Linear interpolation: lerp on position, normalized lerp on rotation
    ///
    /// `Quat::lerp` takes the short way round and renormalizes, which keeps
    /// consecutive frames continuous without the cost of a slerp.
    pub fn lerp(&self, other: &JointTransform, t: f32) -> JointTransform {
        let t = t.clamp(0.0, 1.0);
        JointTransform {
            position: self.position.lerp(other.position, t),
            rotation: self.rotation.lerp(other.rotation, t),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.rotation.is_finite()
    }

    #[inline]
    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.position)
    }

    /// Approximate equality with a tolerance on every channel
    pub fn abs_diff_eq(&self, other: &JointTransform, eps: f32) -> bool {
        self.position.abs_diff_eq(other.position, eps)
            && (self.rotation.abs_diff_eq(other.rotation, eps)
                || self.rotation.abs_diff_eq(-other.rotation, eps))
    }
}
