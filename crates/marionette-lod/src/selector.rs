//! Distance-based LOD selection with hysteresis, and the playback level
//! policy derived from it.

use marionette_core::{DetailLevel, LodLevel};

/// Distance boundaries between LOD levels, metres
///
/// `thresholds[i]` is the maximum distance for `Lod{i}`; beyond the last
/// one the coarsest level applies.
#[derive(Clone, Debug, PartialEq)]
pub struct LodThresholds {
    thresholds: [f32; LodLevel::COUNT - 1],
}

impl LodThresholds {
    /// Returns `None` unless strictly increasing and positive
    pub fn new(thresholds: [f32; LodLevel::COUNT - 1]) -> Option<Self> {
        let positive = thresholds.iter().all(|t| *t > 0.0 && t.is_finite());
        let increasing = thresholds.windows(2).all(|w| w[1] > w[0]);
        (positive && increasing).then_some(LodThresholds { thresholds })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.thresholds
    }
}

impl Default for LodThresholds {
    fn default() -> Self {
        LodThresholds {
            thresholds: [5.0, 15.0, 40.0],
        }
    }
}

/// Picks a LOD level from viewer distance
#[derive(Clone, Debug)]
pub struct LodSelector {
    thresholds: LodThresholds,
    /// Band around each threshold inside which the current level is kept
    hysteresis: f32,
}

impl LodSelector {
    pub fn new(thresholds: LodThresholds, hysteresis: f32) -> Self {
        LodSelector {
            thresholds,
            hysteresis: hysteresis.max(0.0),
        }
    }

    /// Level for `distance` with no memory of the current level
    pub fn select(&self, distance: f32) -> LodLevel {
        let distance = if distance.is_finite() { distance.max(0.0) } else { f32::MAX };
        let index = self
            .thresholds
            .as_slice()
            .iter()
            .position(|t| distance < *t)
            .unwrap_or(LodLevel::COUNT - 1);
        LodLevel::from_index(index as u8).unwrap_or(LodLevel::coarsest())
    }

    /// Level for `distance`, keeping `current` while within the hysteresis band
    pub fn select_with_hysteresis(&self, current: Option<LodLevel>, distance: f32) -> LodLevel {
        let raw = self.select(distance);
        let Some(current) = current else {
            return raw;
        };
        let finest = self.select(distance - self.hysteresis);
        let coarsest = self.select(distance + self.hysteresis);
        if current >= finest && current <= coarsest {
            current
        } else {
            raw
        }
    }

    pub fn thresholds(&self) -> &LodThresholds {
        &self.thresholds
    }
}

impl Default for LodSelector {
    fn default() -> Self {
        LodSelector::new(LodThresholds::default(), 1.0)
    }
}

/// Caps how much of a received pose is applied
#[derive(Clone, Debug)]
pub struct PlaybackLevelPolicy {
    /// Face weights applied within this distance
    pub face_distance: f32,
    /// All body joints applied within this distance
    pub full_bone_distance: f32,
    /// Coarsest LOD that still gets every body joint
    pub full_bone_max_lod: LodLevel,
}

impl Default for PlaybackLevelPolicy {
    fn default() -> Self {
        PlaybackLevelPolicy {
            face_distance: 4.0,
            full_bone_distance: 20.0,
            full_bone_max_lod: LodLevel::Lod1,
        }
    }
}

impl PlaybackLevelPolicy {
    /// Detail cap for an avatar at `distance` with `lod` active
    pub fn cap(&self, lod: Option<LodLevel>, distance: f32) -> DetailLevel {
        let lod = lod.unwrap_or(LodLevel::coarsest());
        if distance <= self.face_distance && lod == LodLevel::Lod0 {
            DetailLevel::FullBoneFace
        } else if distance <= self.full_bone_distance && lod <= self.full_bone_max_lod {
            DetailLevel::FullBone
        } else {
            DetailLevel::BoneOnly
        }
    }
}
