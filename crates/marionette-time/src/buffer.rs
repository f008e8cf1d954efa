//! Per-avatar jitter buffer with a closed-loop replay rate
//!
//! Playback runs behind the newest received snapshot. Each tick measures
//! the buffered duration (newest timestamp minus playback position) and
//! steers the replay rate toward keeping it at the target delay:
//!
//! ```text
//! NoData -> Buffering -> Steady <-> Starving
//!                           ^  \
//!                           |   `-> CatchingUp
//!                           `-------'
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use marionette_core::{DetailLevel, MotionTime};
use marionette_skeleton::SkeletonSample;
use marionette_wire::Snapshot;
use tracing::{debug, trace};

use crate::{DelayEstimator, LocalClock};

/// Playback buffer configuration
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Desired buffered duration behind the newest snapshot
    pub target_delay: Duration,
    /// Replay rate floor
    pub min_speed_ratio: f64,
    /// Replay rate ceiling
    pub max_speed_ratio: f64,
    /// Maximum snapshots held; the oldest are dropped past this
    pub max_buffered_count: usize,
    /// Surplus over `target_delay` tolerated before catching up at full rate
    pub catch_up_allowance: Duration,
    /// Proportional gain on the normalized buffered-duration error
    pub ratio_gain: f64,
    /// Largest change of the replay rate in one tick
    pub max_ratio_step: f64,
    /// Grow the target delay with measured jitter
    pub adaptive_delay: bool,
    /// Jitter envelope multiplier for the adaptive target
    pub jitter_multiplier: f64,
    /// Upper bound for the adaptive target
    pub max_target_delay: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        PlaybackConfig {
            target_delay: Duration::from_millis(100),
            min_speed_ratio: 0.8,
            max_speed_ratio: 1.25,
            max_buffered_count: 32,
            catch_up_allowance: Duration::from_millis(150),
            ratio_gain: 0.5,
            max_ratio_step: 0.05,
            adaptive_delay: false,
            jitter_multiplier: 2.0,
            max_target_delay: Duration::from_millis(500),
        }
    }
}

impl PlaybackConfig {
    /// Tolerant of jittery links: deeper buffer, adaptive target
    pub fn jittery() -> Self {
        PlaybackConfig {
            target_delay: Duration::from_millis(200),
            max_buffered_count: 64,
            adaptive_delay: true,
            max_target_delay: Duration::from_millis(800),
            ..Default::default()
        }
    }

    /// Low latency on a clean link
    pub fn low_latency() -> Self {
        PlaybackConfig {
            target_delay: Duration::from_millis(50),
            catch_up_allowance: Duration::from_millis(60),
            max_buffered_count: 16,
            ..Default::default()
        }
    }
}

/// Buffer state, evaluated every tick
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlaybackStatus {
    /// Nothing ever buffered; the rest pose is returned
    NoData,
    /// Holding at the oldest snapshot until the target delay is buffered
    Buffering,
    /// Normal playback
    Steady,
    /// Ran past the newest snapshot; frozen there at the minimum rate
    Starving,
    /// Buffered well beyond target; replaying at the maximum rate
    CatchingUp,
}

/// Outcome of an enqueue
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    /// Replaced a snapshot with the same timestamp
    Replaced,
    /// Older than the playback position; dropped
    Late,
}

/// Result of one playback tick
#[derive(Clone, Debug)]
pub struct PlaybackSample {
    pub sample: SkeletonSample,
    pub timestamp: MotionTime,
    pub status: PlaybackStatus,
}

/// Buffer statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub received: u64,
    pub late: u64,
    pub replaced: u64,
    pub overflow_dropped: u64,
    pub starvations: u64,
}

/// Timestamp-ordered snapshot queue for one remote avatar
pub struct PlaybackBuffer {
    config: PlaybackConfig,
    entries: VecDeque<Arc<Snapshot>>,
    /// `None` until the first snapshot arrives
    playback_time: Option<MotionTime>,
    /// Set once a tick has returned a sample at `playback_time`
    started: bool,
    speed_ratio: f64,
    status: PlaybackStatus,
    /// Raised on entry to `Starving`, cleared by `take_starved`
    starved: bool,
    clock: LocalClock,
    estimator: DelayEstimator,
    rest_level: DetailLevel,
    stats: BufferStats,
}

impl PlaybackBuffer {
    pub fn new(config: PlaybackConfig) -> Self {
        let speed_ratio = 1.0_f64.clamp(config.min_speed_ratio, config.max_speed_ratio);
        PlaybackBuffer {
            entries: VecDeque::with_capacity(config.max_buffered_count + 1),
            config,
            playback_time: None,
            started: false,
            speed_ratio,
            status: PlaybackStatus::NoData,
            starved: false,
            clock: LocalClock::new(),
            estimator: DelayEstimator::new(),
            rest_level: DetailLevel::FullBone,
            stats: BufferStats::default(),
        }
    }

    /// Detail level of the rest pose returned while there is no data
    pub fn with_rest_level(mut self, level: DetailLevel) -> Self {
        self.rest_level = level;
        self
    }

    /// Insert a snapshot in timestamp order
    pub fn enqueue(&mut self, snapshot: Arc<Snapshot>) -> EnqueueOutcome {
        let ts = snapshot.timestamp();
        self.stats.received += 1;

        if let Some(pt) = self.playback_time {
            if self.started && ts < pt {
                self.stats.late += 1;
                trace!(?ts, ?pt, "dropping late snapshot");
                return EnqueueOutcome::Late;
            }
        }

        self.estimator
            .update(self.clock.now().as_secs_f64(), ts.as_secs_f64());

        // Common case: in-order arrival appends
        let pos = self.entries.partition_point(|e| e.timestamp() < ts);
        let outcome = match self.entries.get(pos) {
            Some(existing) if existing.timestamp() == ts => {
                self.entries[pos] = snapshot;
                self.stats.replaced += 1;
                EnqueueOutcome::Replaced
            }
            _ => {
                self.entries.insert(pos, snapshot);
                EnqueueOutcome::Accepted
            }
        };

        while self.entries.len() > self.config.max_buffered_count.max(1) {
            self.entries.pop_front();
            self.stats.overflow_dropped += 1;
        }

        if !self.started {
            // Until a sample has been returned, hold at the oldest snapshot
            self.playback_time = self.entries.front().map(|e| e.timestamp());
            self.status = PlaybackStatus::Buffering;
        }

        outcome
    }

    /// Advance playback by `dt` seconds and sample the pose
    pub fn tick(&mut self, dt: f64) -> PlaybackSample {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        self.clock.advance(dt);

        let Some(mut pt) = self.playback_time else {
            return self.rest_sample();
        };
        self.started = true;

        let target = self.effective_target_delay().as_secs_f64();

        if self.status == PlaybackStatus::Buffering {
            // Overflow may have dropped the held snapshot
            if let Some(front) = self.entries.front() {
                pt = pt.max(front.timestamp());
                self.playback_time = Some(pt);
            }
            let full = self.entries.len() >= self.config.max_buffered_count.max(1);
            if self.buffered_secs_at(pt) < target && !full {
                return self.sample_at(pt);
            }
            debug!(buffered = self.buffered_secs_at(pt), full, "playback started");
            self.status = PlaybackStatus::Steady;
        } else {
            pt = pt.advance_secs(dt * self.speed_ratio);
        }

        if let (Some(front), Some(back)) = (self.entries.front(), self.entries.back()) {
            pt = pt.max(front.timestamp()).min(back.timestamp());
        }
        // Monotonic even if overflow removed everything behind us
        pt = pt.max(self.playback_time.unwrap_or(pt));
        self.playback_time = Some(pt);
        self.prune_consumed(pt);

        self.update_controller(dt, target);
        self.sample_at(pt)
    }

    fn update_controller(&mut self, dt: f64, target: f64) {
        let Some(pt) = self.playback_time else {
            return;
        };
        let buffered = self.buffered_secs_at(pt);
        let (min, max) = (self.config.min_speed_ratio, self.config.max_speed_ratio);
        let allowance = self.config.catch_up_allowance.as_secs_f64();

        if buffered <= 0.0 && dt > 0.0 {
            if self.status != PlaybackStatus::Starving {
                self.starved = true;
                self.stats.starvations += 1;
                debug!(?pt, "playback starved");
            }
            self.status = PlaybackStatus::Starving;
            self.speed_ratio = min;
            return;
        }

        let desired = if buffered > target + allowance {
            self.status = PlaybackStatus::CatchingUp;
            max
        } else {
            self.status = PlaybackStatus::Steady;
            let error = (buffered - target) / target.max(1e-3);
            (1.0 + self.config.ratio_gain * error).clamp(min, max)
        };

        let step = self.config.max_ratio_step.abs();
        let delta = (desired - self.speed_ratio).clamp(-step, step);
        self.speed_ratio = (self.speed_ratio + delta).clamp(min, max);
    }

    /// Drop snapshots that can no longer be interpolated from
    fn prune_consumed(&mut self, pt: MotionTime) {
        while self.entries.len() > 1 && self.entries[1].timestamp() <= pt {
            self.entries.pop_front();
        }
    }

    fn sample_at(&self, pt: MotionTime) -> PlaybackSample {
        let next = self.entries.partition_point(|e| e.timestamp() <= pt);

        let sample = match (next.checked_sub(1).and_then(|i| self.entries.get(i)), self.entries.get(next)) {
            (Some(a), Some(b)) => {
                let span = b.timestamp().secs_since(a.timestamp());
                let t = if span > 0.0 {
                    (pt.secs_since(a.timestamp()) / span) as f32
                } else {
                    0.0
                };
                a.sample().lerp(b.sample(), t)
            }
            (Some(only), None) | (None, Some(only)) => only.sample().clone(),
            (None, None) => SkeletonSample::rest(self.rest_level),
        };

        PlaybackSample {
            sample,
            timestamp: pt,
            status: self.status,
        }
    }

    fn rest_sample(&self) -> PlaybackSample {
        PlaybackSample {
            sample: SkeletonSample::rest(self.rest_level),
            timestamp: MotionTime::ZERO,
            status: PlaybackStatus::NoData,
        }
    }

    fn buffered_secs_at(&self, pt: MotionTime) -> f64 {
        self.entries
            .back()
            .map_or(0.0, |newest| newest.timestamp().secs_since(pt).max(0.0))
    }

    /// Target delay after jitter adaptation
    pub fn effective_target_delay(&self) -> Duration {
        let target = self.config.target_delay;
        if !self.config.adaptive_delay || !self.estimator.is_warm() {
            return target;
        }
        let ceiling = self.config.max_target_delay.max(target);
        let wanted = self.estimator.jitter_envelope() * self.config.jitter_multiplier;
        Duration::from_secs_f64(wanted.clamp(target.as_secs_f64(), ceiling.as_secs_f64()))
    }

    /// Consume the starvation edge
    pub fn take_starved(&mut self) -> bool {
        std::mem::take(&mut self.starved)
    }

    /// Forget everything; the next tick returns `NoData`
    pub fn clear(&mut self) {
        self.entries.clear();
        self.playback_time = None;
        self.started = false;
        self.status = PlaybackStatus::NoData;
        self.starved = false;
        self.speed_ratio = 1.0_f64.clamp(self.config.min_speed_ratio, self.config.max_speed_ratio);
        self.estimator.reset();
    }

    pub fn buffered_duration(&self) -> Duration {
        self.playback_time
            .map_or(Duration::ZERO, |pt| Duration::from_secs_f64(self.buffered_secs_at(pt)))
    }

    pub fn playback_time(&self) -> Option<MotionTime> {
        self.playback_time
    }

    pub fn speed_ratio(&self) -> f64 {
        self.speed_ratio
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Timestamps currently held, oldest first
    pub fn timestamps(&self) -> impl Iterator<Item = MotionTime> + '_ {
        self.entries.iter().map(|e| e.timestamp())
    }

    pub fn estimator(&self) -> &DelayEstimator {
        &self.estimator
    }

    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }
}
