//! Detail level definitions
//!
//! Two independent ladders:
//! - DetailLevel: how much of the skeleton a snapshot carries
//! - LodLevel: which built resolution tier an avatar is recomputed against

/// Subset of the skeleton carried by a snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum DetailLevel {
    /// Tracked core bones only (head, hands, spine chain)
    BoneOnly = 0x00,
    /// Every body bone
    #[default]
    FullBone = 0x01,
    /// Every body bone plus facial blend weights
    FullBoneFace = 0x02,
}

impl DetailLevel {
    /// Parse from wire byte
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(DetailLevel::BoneOnly),
            0x01 => Some(DetailLevel::FullBone),
            0x02 => Some(DetailLevel::FullBoneFace),
            _ => None,
        }
    }

    /// Convert to wire byte
    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Does this level carry facial blend weights?
    #[inline]
    pub fn includes_face(self) -> bool {
        matches!(self, DetailLevel::FullBoneFace)
    }

    /// All levels from coarsest to finest
    pub fn all() -> &'static [DetailLevel] {
        &[
            DetailLevel::BoneOnly,
            DetailLevel::FullBone,
            DetailLevel::FullBoneFace,
        ]
    }
}

/// Discrete resolution tier; Lod0 is the finest
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum LodLevel {
    #[default]
    Lod0 = 0,
    Lod1 = 1,
    Lod2 = 2,
    Lod3 = 3,
}

impl LodLevel {
    pub const COUNT: usize = 4;

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(LodLevel::Lod0),
            1 => Some(LodLevel::Lod1),
            2 => Some(LodLevel::Lod2),
            3 => Some(LodLevel::Lod3),
            _ => None,
        }
    }

    #[inline]
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Coarsest available tier
    #[inline]
    pub fn coarsest() -> Self {
        LodLevel::Lod3
    }

    /// Next coarser tier, saturating at the coarsest
    pub fn coarser(self) -> Self {
        LodLevel::from_index(self.index() + 1).unwrap_or(LodLevel::Lod3)
    }

    /// Next finer tier, saturating at Lod0
    pub fn finer(self) -> Self {
        self.index()
            .checked_sub(1)
            .and_then(LodLevel::from_index)
            .unwrap_or(LodLevel::Lod0)
    }
}
