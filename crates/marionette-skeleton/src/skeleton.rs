//! Skeleton State - the full pose of one avatar

use glam::{Mat4, Vec3};
use marionette_core::DetailLevel;

use crate::{FaceWeights, Joint, JointTransform, SkeletonSample};

/// Axis-aligned bounds in avatar space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseBounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl PoseBounds {
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Grow uniformly on every side
    pub fn padded(&self, pad: f32) -> PoseBounds {
        PoseBounds {
            min: self.min - Vec3::splat(pad),
            max: self.max + Vec3::splat(pad),
        }
    }
}

/// Complete pose: root placement, local joint transforms, optional face
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonState {
    /// Avatar placement in the world
    pub root: JointTransform,

    /// Local joint transforms (indexed by `Joint`)
    pub joints: Vec<JointTransform>,

    /// Facial weights, absent when the rig has no face
    pub face: Option<FaceWeights>,
}

impl Default for SkeletonState {
    fn default() -> Self {
        Self::rest_pose()
    }
}

impl SkeletonState {
    /// Idle pose: a 1.7m tall figure standing at the origin, arms down
    pub fn rest_pose() -> Self {
        let joints = Joint::all()
            .iter()
            .map(|joint| JointTransform::from_position(rest_offset(*joint)))
            .collect();

        Self {
            root: JointTransform::IDENTITY,
            joints,
            face: None,
        }
    }

    /// Rest pose with a neutral face of `channels` weights
    pub fn rest_pose_with_face(channels: usize) -> Self {
        let mut pose = Self::rest_pose();
        pose.face = Some(FaceWeights::neutral(channels));
        pose
    }

    /// Get joint transform
    pub fn joint(&self, joint: Joint) -> Option<&JointTransform> {
        self.joints.get(joint.index())
    }

    /// Set joint transform
    pub fn set_joint(&mut self, joint: Joint, transform: JointTransform) {
        if let Some(slot) = self.joints.get_mut(joint.index()) {
            *slot = transform;
        }
    }

    /// Capture the subset of this pose carried at `level`
    ///
    /// A level that asks for face data on a rig without a face yields a
    /// sample whose face section is absent.
    pub fn sample(&self, level: DetailLevel) -> SkeletonSample {
        let joints = Joint::for_level(level)
            .iter()
            .map(|joint| self.joint(*joint).copied().unwrap_or_default())
            .collect();

        let face = if level.includes_face() {
            self.face.clone()
        } else {
            None
        };

        SkeletonSample::from_parts(level, self.root, joints, face)
    }

    /// Model-space matrices for `bones`, which must list parents first
    pub fn model_space(&self, bones: &[Joint]) -> Vec<Mat4> {
        let mut world = [Mat4::IDENTITY; Joint::count()];
        let mut computed = [false; Joint::count()];
        let root = self.root.to_mat4();
        let mut out = Vec::with_capacity(bones.len());

        for bone in bones {
            let local = self.joint(*bone).copied().unwrap_or_default().to_mat4();
            let parent = match bone.parent() {
                Some(p) if computed[p.index()] => world[p.index()],
                // Parent not in the layout: attach straight to the root
                _ => root,
            };
            let m = parent * local;
            world[bone.index()] = m;
            computed[bone.index()] = true;
            out.push(m);
        }

        out
    }

    /// Bounds of `bones` in world space
    pub fn bounds(&self, bones: &[Joint]) -> PoseBounds {
        let origin = self.root.position;
        let (min, max) = self
            .model_space(bones)
            .iter()
            .map(|m| m.w_axis.truncate())
            .fold((origin, origin), |(min, max), p| (min.min(p), max.max(p)));
        PoseBounds { min, max }
    }

    /// Every channel finite?
    pub fn is_finite(&self) -> bool {
        self.root.is_finite()
            && self.joints.iter().all(JointTransform::is_finite)
            && self
                .face
                .as_ref()
                .map_or(true, |f| f.weights().iter().all(|w| w.is_finite()))
    }
}

fn rest_offset(joint: Joint) -> Vec3 {
    use Joint::*;
    match joint {
        Hips => Vec3::new(0.0, 0.95, 0.0),
        Spine => Vec3::new(0.0, 0.12, 0.0),
        Chest => Vec3::new(0.0, 0.2, 0.0),
        Neck => Vec3::new(0.0, 0.2, 0.0),
        Head => Vec3::new(0.0, 0.12, 0.0),
        LeftShoulder => Vec3::new(0.18, 0.15, 0.0),
        RightShoulder => Vec3::new(-0.18, 0.15, 0.0),
        LeftElbow | RightElbow => Vec3::new(0.0, -0.28, 0.0),
        LeftWrist | RightWrist => Vec3::new(0.0, -0.25, 0.0),
        LeftHand | RightHand => Vec3::new(0.0, -0.08, 0.0),
        LeftHip => Vec3::new(0.1, -0.05, 0.0),
        RightHip => Vec3::new(-0.1, -0.05, 0.0),
        LeftKnee | RightKnee => Vec3::new(0.0, -0.42, 0.0),
        LeftAnkle | RightAnkle => Vec3::new(0.0, -0.4, 0.0),
        LeftFoot | RightFoot => Vec3::new(0.0, -0.05, 0.12),
    }
}
