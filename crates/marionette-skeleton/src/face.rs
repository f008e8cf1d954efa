//! Facial blend weights
//!
//! Weights are opaque to this crate: the index layout is agreed between the
//! authoring rig and the renderer. We only carry, clamp and blend them.

/// Default number of facial channels on the reference rig
pub const DEFAULT_FACE_CHANNELS: usize = 52;

/// Largest weight vector that fits the wire format
pub const MAX_FACE_CHANNELS: usize = u8::MAX as usize;

/// Facial expression weights, each in `[0.0, 1.0]`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FaceWeights {
    weights: Vec<f32>,
}

impl FaceWeights {
    /// All channels at rest
    pub fn neutral(channels: usize) -> Self {
        Self {
            weights: vec![0.0; channels.min(MAX_FACE_CHANNELS)],
        }
    }

    /// Build from raw weights; values are clamped and the vector truncated
    /// to what the wire format can carry.
    pub fn from_weights(weights: impl IntoIterator<Item = f32>) -> Self {
        Self {
            weights: weights
                .into_iter()
                .take(MAX_FACE_CHANNELS)
                .map(|w| if w.is_nan() { 0.0 } else { w.clamp(0.0, 1.0) })
                .collect(),
        }
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn get(&self, channel: usize) -> Option<f32> {
        self.weights.get(channel).copied()
    }

    pub fn set(&mut self, channel: usize, value: f32) {
        if let Some(w) = self.weights.get_mut(channel) {
            *w = value.clamp(0.0, 1.0);
        }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Blend with another weight set. Mismatched layouts cannot be blended
    /// channel-wise, so they switch over at the midpoint.
    pub fn lerp(&self, other: &FaceWeights, t: f32) -> FaceWeights {
        let t = t.clamp(0.0, 1.0);
        if self.weights.len() != other.weights.len() {
            return if t < 0.5 { self.clone() } else { other.clone() };
        }

        FaceWeights {
            weights: self
                .weights
                .iter()
                .zip(other.weights.iter())
                .map(|(a, b)| a + (b - a) * t)
                .collect(),
        }
    }
}
