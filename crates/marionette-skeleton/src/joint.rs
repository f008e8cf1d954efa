//! Joint set for the body skeleton

use marionette_core::DetailLevel;

/// Joint identifier for body skeleton
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Joint {
    // Torso
    Hips,
    Spine,
    Chest,

    // Head
    Neck,
    Head,

    // Left arm
    LeftShoulder,
    LeftElbow,
    LeftWrist,
    LeftHand,

    // Right arm
    RightShoulder,
    RightElbow,
    RightWrist,
    RightHand,

    // Left leg
    LeftHip,
    LeftKnee,
    LeftAnkle,
    LeftFoot,

    // Right leg
    RightHip,
    RightKnee,
    RightAnkle,
    RightFoot,
}

const ALL_JOINTS: [Joint; 21] = [
    Joint::Hips,
    Joint::Spine,
    Joint::Chest,
    Joint::Neck,
    Joint::Head,
    Joint::LeftShoulder,
    Joint::LeftElbow,
    Joint::LeftWrist,
    Joint::LeftHand,
    Joint::RightShoulder,
    Joint::RightElbow,
    Joint::RightWrist,
    Joint::RightHand,
    Joint::LeftHip,
    Joint::LeftKnee,
    Joint::LeftAnkle,
    Joint::LeftFoot,
    Joint::RightHip,
    Joint::RightKnee,
    Joint::RightAnkle,
    Joint::RightFoot,
];

// The chain driven directly by headset and controllers.
const CORE_JOINTS: [Joint; 7] = [
    Joint::Hips,
    Joint::Spine,
    Joint::Chest,
    Joint::Neck,
    Joint::Head,
    Joint::LeftHand,
    Joint::RightHand,
];

impl Joint {
    /// All joints in storage order
    pub fn all() -> &'static [Joint] {
        &ALL_JOINTS
    }

    /// Number of joints
    pub const fn count() -> usize {
        ALL_JOINTS.len()
    }

    /// Storage index
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Joint> {
        ALL_JOINTS.get(index).copied()
    }

    /// Parent in the hierarchy; `None` for the hips (child of the root)
    pub fn parent(self) -> Option<Joint> {
        use Joint::*;
        match self {
            Hips => None,
            Spine => Some(Hips),
            Chest => Some(Spine),
            Neck => Some(Chest),
            Head => Some(Neck),
            LeftShoulder | RightShoulder => Some(Chest),
            LeftElbow => Some(LeftShoulder),
            LeftWrist => Some(LeftElbow),
            LeftHand => Some(LeftWrist),
            RightElbow => Some(RightShoulder),
            RightWrist => Some(RightElbow),
            RightHand => Some(RightWrist),
            LeftHip | RightHip => Some(Hips),
            LeftKnee => Some(LeftHip),
            LeftAnkle => Some(LeftKnee),
            LeftFoot => Some(LeftAnkle),
            RightKnee => Some(RightHip),
            RightAnkle => Some(RightKnee),
            RightFoot => Some(RightAnkle),
        }
    }

    /// Joints carried at a detail level, parents before children
    pub fn for_level(level: DetailLevel) -> &'static [Joint] {
        match level {
            DetailLevel::BoneOnly => &CORE_JOINTS,
            DetailLevel::FullBone | DetailLevel::FullBoneFace => &ALL_JOINTS,
        }
    }

    /// Is this joint carried at the given level?
    pub fn included_in(self, level: DetailLevel) -> bool {
        Joint::for_level(level).contains(&self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_matches_storage_order() {
        for (i, joint) in Joint::all().iter().enumerate() {
            assert_eq!(joint.index(), i);
            assert_eq!(Joint::from_index(i), Some(*joint));
        }
        assert_eq!(Joint::count(), 21);
    }

    #[test]
    fn test_parents_precede_children() {
        for level in DetailLevel::all() {
            let joints = Joint::for_level(*level);
            for (i, joint) in joints.iter().enumerate() {
                if let Some(parent) = joint.parent() {
                    if let Some(pos) = joints.iter().position(|j| *j == parent) {
                        assert!(pos < i, "{:?} listed before its parent", joint);
                    }
                }
            }
        }
    }

    #[test]
    fn test_core_subset() {
        assert!(Joint::Head.included_in(DetailLevel::BoneOnly));
        assert!(!Joint::LeftKnee.included_in(DetailLevel::BoneOnly));
        assert!(Joint::LeftKnee.included_in(DetailLevel::FullBone));
    }
}
