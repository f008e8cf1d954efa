//! Local pose recording
//!
//! Recording and sending run at different cadences. Between recordings the
//! recorder hands back the last packet so callers can resend it cheaply.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use marionette_core::{DetailLevel, MotionTime};
use marionette_skeleton::SkeletonState;
use marionette_wire::{Snapshot, SnapshotCodec};
use tracing::trace;

/// Recorder configuration
#[derive(Clone, Debug)]
pub struct RecorderConfig {
    /// Time between recordings; zero disables recording
    pub record_interval: Duration,
    pub detail_level: DetailLevel,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        RecorderConfig {
            record_interval: Duration::from_millis(50),
            detail_level: DetailLevel::FullBone,
        }
    }
}

/// A recorded snapshot and its encoded packet
#[derive(Clone, Debug)]
pub struct Recorded {
    pub packet: Bytes,
    pub snapshot: Arc<Snapshot>,
    pub timestamp: MotionTime,
    pub sequence: u64,
    /// Recorded on this tick (as opposed to handed back from an earlier one)
    pub fresh: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub recorded: u64,
    pub reused: u64,
    pub bytes_encoded: u64,
}

/// Samples the local pose into snapshots at a fixed interval
pub struct PacketRecorder {
    config: RecorderConfig,
    last_record_time: MotionTime,
    last: Option<Recorded>,
    sequence: u64,
    stats: RecorderStats,
}

impl PacketRecorder {
    pub fn new(config: RecorderConfig) -> Self {
        PacketRecorder {
            config,
            last_record_time: MotionTime::ZERO,
            last: None,
            sequence: 0,
            stats: RecorderStats::default(),
        }
    }

    /// Record if the interval has elapsed, else hand back the last recording
    ///
    /// Returns `None` when recording is disabled or nothing was recorded yet.
    pub fn tick(&mut self, now: MotionTime, state: &SkeletonState) -> Option<Recorded> {
        let interval = self.config.record_interval;
        if interval.is_zero() {
            return None;
        }

        if now - self.last_record_time >= interval {
            let snapshot = Arc::new(Snapshot::capture(state, self.config.detail_level, now));
            let packet = SnapshotCodec::encode_snapshot(&snapshot);
            self.sequence += 1;
            self.last_record_time = now;
            self.stats.recorded += 1;
            self.stats.bytes_encoded += packet.len() as u64;
            trace!(?now, seq = self.sequence, len = packet.len(), "recorded snapshot");

            let recorded = Recorded {
                packet,
                snapshot,
                timestamp: now,
                sequence: self.sequence,
                fresh: true,
            };
            self.last = Some(Recorded {
                fresh: false,
                ..recorded.clone()
            });
            return Some(recorded);
        }

        let last = self.last.clone()?;
        self.stats.reused += 1;
        Some(last)
    }

    /// Most recent recording, if any
    pub fn last(&self) -> Option<&Recorded> {
        self.last.as_ref()
    }

    pub fn last_record_time(&self) -> MotionTime {
        self.last_record_time
    }

    pub fn set_detail_level(&mut self, level: DetailLevel) {
        self.config.detail_level = level;
    }

    pub fn set_record_interval(&mut self, interval: Duration) {
        self.config.record_interval = interval;
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn stats(&self) -> RecorderStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(interval_ms: u64) -> PacketRecorder {
        PacketRecorder::new(RecorderConfig {
            record_interval: Duration::from_millis(interval_ms),
            detail_level: DetailLevel::BoneOnly,
        })
    }

    // Scenario A
    #[test]
    fn test_records_only_when_interval_elapsed() {
        let mut rec = recorder(200);
        let state = SkeletonState::rest_pose();

        let fresh: Vec<bool> = [0, 100, 200, 300]
            .iter()
            .map(|ms| {
                rec.tick(MotionTime::from_millis(*ms), &state)
                    .map_or(false, |r| r.fresh)
            })
            .collect();

        assert_eq!(fresh, vec![false, false, true, false]);
        assert_eq!(rec.last_record_time(), MotionTime::from_millis(200));
        assert_eq!(rec.stats().recorded, 1);
    }

    #[test]
    fn test_stale_tick_returns_same_packet() {
        let mut rec = recorder(200);
        let state = SkeletonState::rest_pose();

        let first = rec.tick(MotionTime::from_millis(250), &state).unwrap();
        let again = rec.tick(MotionTime::from_millis(300), &state).unwrap();

        assert!(first.fresh);
        assert!(!again.fresh);
        assert_eq!(first.packet, again.packet);
        assert_eq!(first.sequence, again.sequence);
        assert!(Arc::ptr_eq(&first.snapshot, &again.snapshot));
    }

    #[test]
    fn test_zero_interval_disables() {
        let mut rec = recorder(0);
        let state = SkeletonState::rest_pose();
        assert!(rec.tick(MotionTime::from_millis(1000), &state).is_none());
        assert_eq!(rec.stats().recorded, 0);
    }

    #[test]
    fn test_packet_decodes_to_recorded_snapshot() {
        let mut rec = recorder(10);
        let state = SkeletonState::rest_pose();
        let recorded = rec.tick(MotionTime::from_millis(20), &state).unwrap();

        let decoded = SnapshotCodec::decode(&recorded.packet).unwrap();
        assert_eq!(&decoded, recorded.snapshot.as_ref());
        assert_eq!(decoded.level(), DetailLevel::BoneOnly);
    }
}
