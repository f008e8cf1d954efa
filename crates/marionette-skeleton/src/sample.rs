//! Skeleton Sample - the level-restricted slice of a pose
//!
//! A sample holds exactly the joints its detail level carries. Joints
//! outside the level are absent, never zeroed.

use marionette_core::DetailLevel;

use crate::{FaceWeights, Joint, JointTransform, SkeletonState};

/// Level-restricted pose content
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonSample {
    level: DetailLevel,
    root: JointTransform,
    /// One transform per `Joint::for_level(level)` entry, same order
    joints: Vec<JointTransform>,
    face: Option<FaceWeights>,
}

impl SkeletonSample {
    /// Build a sample, rejecting a joint list that does not match the level
    pub fn new(
        level: DetailLevel,
        root: JointTransform,
        joints: Vec<JointTransform>,
        face: Option<FaceWeights>,
    ) -> Option<Self> {
        if joints.len() != Joint::for_level(level).len() {
            return None;
        }
        Some(Self::from_parts(level, root, joints, face))
    }

    pub(crate) fn from_parts(
        level: DetailLevel,
        root: JointTransform,
        joints: Vec<JointTransform>,
        face: Option<FaceWeights>,
    ) -> Self {
        debug_assert_eq!(joints.len(), Joint::for_level(level).len());
        let face = if level.includes_face() { face } else { None };
        Self {
            level,
            root,
            joints,
            face,
        }
    }

    /// Rest pose restricted to `level`
    pub fn rest(level: DetailLevel) -> Self {
        SkeletonState::rest_pose().sample(level)
    }

    pub fn level(&self) -> DetailLevel {
        self.level
    }

    pub fn root(&self) -> &JointTransform {
        &self.root
    }

    /// Joint transform, `None` when the level does not carry it
    pub fn joint(&self, joint: Joint) -> Option<&JointTransform> {
        Joint::for_level(self.level)
            .iter()
            .position(|j| *j == joint)
            .and_then(|i| self.joints.get(i))
    }

    /// Carried joints in wire order
    pub fn joints(&self) -> impl Iterator<Item = (Joint, &JointTransform)> + '_ {
        Joint::for_level(self.level)
            .iter()
            .copied()
            .zip(self.joints.iter())
    }

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    /// Facial weights, `None` when excluded by level or absent at the source
    pub fn face(&self) -> Option<&FaceWeights> {
        self.face.as_ref()
    }

    pub fn is_finite(&self) -> bool {
        self.root.is_finite()
            && self.joints.iter().all(JointTransform::is_finite)
            && self
                .face
                .as_ref()
                .map_or(true, |f| f.weights().iter().all(|w| w.is_finite()))
    }

    /// Interpolate between two samples
    pub fn lerp(&self, other: &SkeletonSample, t: f32) -> SkeletonSample {
        let t = t.clamp(0.0, 1.0);

        if self.level != other.level {
            return if t < 0.5 { self.clone() } else { other.clone() };
        }

        let joints = self
            .joints
            .iter()
            .zip(other.joints.iter())
            .map(|(a, b)| a.lerp(b, t))
            .collect();

        let face = match (&self.face, &other.face) {
            (Some(a), Some(b)) => Some(a.lerp(b, t)),
            (None, Some(f)) => Some(f.clone()),
            (Some(f), None) => {
                if t < 0.5 {
                    Some(f.clone())
                } else {
                    None
                }
            }
            (None, None) => None,
        };

        SkeletonSample {
            level: self.level,
            root: self.root.lerp(&other.root, t),
            joints,
            face,
        }
    }

    /// Write the sample into a live pose, applying no more than `cap`
    ///
    /// Joints the sample or the cap exclude keep whatever the pose already
    /// holds, as does the face when the cap drops it.
    pub fn apply_to(&self, state: &mut SkeletonState, cap: DetailLevel) {
        state.root = self.root;

        let allowed = Joint::for_level(cap);
        for (joint, transform) in self.joints() {
            if allowed.contains(&joint) {
                state.set_joint(joint, *transform);
            }
        }

        if cap.includes_face() {
            if let Some(face) = &self.face {
                state.face = Some(face.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    fn posed(offset: f32) -> SkeletonState {
        let mut pose = SkeletonState::rest_pose_with_face(3);
        pose.root = JointTransform::from_position(Vec3::new(offset, 0.0, 0.0));
        pose.set_joint(
            Joint::LeftKnee,
            JointTransform::new(Vec3::new(0.0, -0.42, offset), Quat::from_rotation_x(offset)),
        );
        if let Some(face) = pose.face.as_mut() {
            face.set(0, offset.clamp(0.0, 1.0));
        }
        pose
    }

    #[test]
    fn test_new_rejects_mismatched_joints() {
        let joints = vec![JointTransform::IDENTITY; 3];
        assert!(SkeletonSample::new(DetailLevel::FullBone, JointTransform::IDENTITY, joints, None)
            .is_none());
    }

    #[test]
    fn test_new_drops_face_for_faceless_level() {
        let joints = vec![JointTransform::IDENTITY; Joint::count()];
        let sample = SkeletonSample::new(
            DetailLevel::FullBone,
            JointTransform::IDENTITY,
            joints,
            Some(FaceWeights::neutral(2)),
        )
        .unwrap();
        assert!(sample.face().is_none());
    }

    #[test]
    fn test_lerp_same_level() {
        let a = posed(0.0).sample(DetailLevel::FullBoneFace);
        let b = posed(1.0).sample(DetailLevel::FullBoneFace);

        let mid = a.lerp(&b, 0.5);
        assert!((mid.root().position.x - 0.5).abs() < 1e-5);
        assert!((mid.face().unwrap().get(0).unwrap() - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_apply_respects_cap() {
        let source = posed(1.0);
        let sample = source.sample(DetailLevel::FullBoneFace);

        let mut target = SkeletonState::rest_pose();
        sample.apply_to(&mut target, DetailLevel::BoneOnly);

        assert_eq!(target.root, source.root);
        assert_eq!(target.joint(Joint::LeftKnee), SkeletonState::rest_pose().joint(Joint::LeftKnee));
        assert!(target.face.is_none());

        sample.apply_to(&mut target, DetailLevel::FullBoneFace);
        assert_eq!(target.joint(Joint::LeftKnee), source.joint(Joint::LeftKnee));
        assert_eq!(target.face, source.face);
    }
}
