//! Snapshot - one timestamped pose sample as carried on the wire

use marionette_core::{DetailLevel, MotionTime};
use marionette_skeleton::{SkeletonSample, SkeletonState};

/// Immutable pose sample tagged with its capture time
///
/// Produced by recording a live pose or by decoding a packet. Never
/// mutated after construction; consumers share it behind `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    timestamp: MotionTime,
    sample: SkeletonSample,
}

impl Snapshot {
    pub fn new(timestamp: MotionTime, sample: SkeletonSample) -> Self {
        Snapshot { timestamp, sample }
    }

    /// Capture `state` restricted to `level`
    pub fn capture(state: &SkeletonState, level: DetailLevel, timestamp: MotionTime) -> Self {
        Snapshot {
            timestamp,
            sample: state.sample(level),
        }
    }

    /// Rest pose at `level`
    pub fn rest(level: DetailLevel, timestamp: MotionTime) -> Self {
        Snapshot {
            timestamp,
            sample: SkeletonSample::rest(level),
        }
    }

    #[inline]
    pub fn timestamp(&self) -> MotionTime {
        self.timestamp
    }

    #[inline]
    pub fn level(&self) -> DetailLevel {
        self.sample.level()
    }

    #[inline]
    pub fn sample(&self) -> &SkeletonSample {
        &self.sample
    }

    pub fn into_sample(self) -> SkeletonSample {
        self.sample
    }
}
