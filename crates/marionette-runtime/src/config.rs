//! Node configuration, persisted as JSON
//!
//! Durations are stored as seconds. Every section has defaults, so a file
//! only needs the keys it changes.

use std::path::Path;
use std::time::Duration;

use marionette_core::{DetailLevel, LodLevel};
use marionette_lod::{LodManagerConfig, LodSelector, LodThresholds, PlaybackLevelPolicy};
use marionette_time::PlaybackConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{RecorderConfig, SchedulerConfig};

/// Errors from loading, saving or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    ReadError(#[source] std::io::Error),

    #[error("failed to write config: {0}")]
    WriteError(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    ParseError(#[source] serde_json::Error),

    #[error("failed to serialize config: {0}")]
    SerializeError(#[source] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MarionetteConfig {
    pub recorder: RecorderSection,
    pub playback: PlaybackSection,
    pub scheduler: SchedulerSection,
    pub lod: LodSection,
    pub runtime: RuntimeSection,
}

/// Wire name of a detail level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetailSetting {
    BoneOnly,
    #[default]
    FullBone,
    FullBoneFace,
}

impl From<DetailSetting> for DetailLevel {
    fn from(setting: DetailSetting) -> Self {
        match setting {
            DetailSetting::BoneOnly => DetailLevel::BoneOnly,
            DetailSetting::FullBone => DetailLevel::FullBone,
            DetailSetting::FullBoneFace => DetailLevel::FullBoneFace,
        }
    }
}

/// Local pose recording
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecorderSection {
    /// Seconds between snapshots; 0 disables recording
    pub record_interval: f64,
    pub detail_level: DetailSetting,
    /// Resend the last packet on frames that record nothing new
    pub resend_stale: bool,
}

impl Default for RecorderSection {
    fn default() -> Self {
        RecorderSection {
            record_interval: 0.05,
            detail_level: DetailSetting::FullBone,
            resend_stale: false,
        }
    }
}

/// Remote playback
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackSection {
    pub target_delay: f64,
    pub min_playback_speed_ratio: f64,
    pub max_playback_speed_ratio: f64,
    pub max_buffered_count: usize,
    pub catch_up_allowance: f64,
    pub ratio_gain: f64,
    pub max_ratio_step: f64,
    pub adaptive_delay: bool,
    pub jitter_multiplier: f64,
    pub max_target_delay: f64,
}

impl Default for PlaybackSection {
    fn default() -> Self {
        let d = PlaybackConfig::default();
        PlaybackSection {
            target_delay: d.target_delay.as_secs_f64(),
            min_playback_speed_ratio: d.min_speed_ratio,
            max_playback_speed_ratio: d.max_speed_ratio,
            max_buffered_count: d.max_buffered_count,
            catch_up_allowance: d.catch_up_allowance.as_secs_f64(),
            ratio_gain: d.ratio_gain,
            max_ratio_step: d.max_ratio_step,
            adaptive_delay: d.adaptive_delay,
            jitter_multiplier: d.jitter_multiplier,
            max_target_delay: d.max_target_delay.as_secs_f64(),
        }
    }
}

/// Per-frame update scheduling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerSection {
    /// Longest an avatar may go without a recompute, seconds
    pub skip_interval: f64,
    /// Visible avatars within this distance update every frame, metres
    pub near_distance: f32,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        SchedulerSection {
            skip_interval: 0.5,
            near_distance: 15.0,
        }
    }
}

/// LOD builds and selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LodSection {
    pub max_lod_build_retries: u32,
    pub build_workers: usize,
    /// Maximum builds in flight
    pub build_budget: usize,
    /// Upper distance bound of Lod0, Lod1, Lod2, metres
    pub thresholds: [f32; 3],
    pub hysteresis: f32,
    pub face_distance: f32,
    pub full_bone_distance: f32,
    /// Coarsest LOD index still applying every body joint
    pub full_bone_max_lod: u8,
}

impl Default for LodSection {
    fn default() -> Self {
        let thresholds = LodThresholds::default();
        let policy = PlaybackLevelPolicy::default();
        LodSection {
            max_lod_build_retries: LodManagerConfig::default().max_build_retries,
            build_workers: 2,
            build_budget: 16,
            thresholds: [
                thresholds.as_slice()[0],
                thresholds.as_slice()[1],
                thresholds.as_slice()[2],
            ],
            hysteresis: 1.0,
            face_distance: policy.face_distance,
            full_bone_distance: policy.full_bone_distance,
            full_bone_max_lod: policy.full_bone_max_lod.index(),
        }
    }
}

/// Node runtime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeSection {
    /// Phase worker threads; 0 uses one per core
    pub worker_threads: usize,
    pub event_queue_capacity: usize,
    /// Packets ingested per frame before the rest wait
    pub max_packets_per_frame: usize,
    /// Default filter when `RUST_LOG` is unset
    pub log_filter: String,
    pub log_json: bool,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        RuntimeSection {
            worker_threads: 0,
            event_queue_capacity: 1024,
            max_packets_per_frame: 4096,
            log_filter: "info".to_string(),
            log_json: false,
        }
    }
}

impl MarionetteConfig {
    /// Sparse sends, deeper buffering
    pub fn low_bandwidth() -> Self {
        let mut config = MarionetteConfig::default();
        config.recorder.record_interval = 0.15;
        config.recorder.detail_level = DetailSetting::BoneOnly;
        config.recorder.resend_stale = false;
        config.playback.target_delay = 0.3;
        config.playback.max_target_delay = 0.8;
        config.playback.adaptive_delay = true;
        config
    }

    /// Load and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config = Self::from_json_str(&contents)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        let config: MarionetteConfig =
            serde_json::from_str(contents).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let serialized =
            serde_json::to_string_pretty(self).map_err(ConfigError::SerializeError)?;
        std::fs::write(path, serialized).map_err(ConfigError::WriteError)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        let p = &self.playback;

        if !(self.recorder.record_interval >= 0.0 && self.recorder.record_interval.is_finite()) {
            return invalid("recorder.record_interval must be a non-negative number");
        }
        if !(p.target_delay > 0.0 && p.target_delay.is_finite()) {
            return invalid("playback.target_delay must be positive");
        }
        if !(p.min_playback_speed_ratio > 0.0) {
            return invalid("playback.min_playback_speed_ratio must be positive");
        }
        if !(p.max_playback_speed_ratio >= p.min_playback_speed_ratio) {
            return invalid("playback.max_playback_speed_ratio is below the minimum");
        }
        if p.max_buffered_count < 2 {
            return invalid("playback.max_buffered_count must hold at least two snapshots");
        }
        if !(p.catch_up_allowance >= 0.0 && p.max_ratio_step > 0.0 && p.ratio_gain >= 0.0) {
            return invalid("playback controller settings out of range");
        }
        if !(p.max_target_delay >= p.target_delay) {
            return invalid("playback.max_target_delay is below target_delay");
        }
        // A full buffer of snapshots must span the deepest delay playback waits for
        let deepest = if p.adaptive_delay {
            p.max_target_delay
        } else {
            p.target_delay
        };
        let span = (p.max_buffered_count - 1) as f64 * self.recorder.record_interval;
        if self.recorder.record_interval > 0.0 && span < deepest {
            return invalid("playback.max_buffered_count cannot cover the target delay at recorder.record_interval");
        }
        if !(self.scheduler.skip_interval > 0.0 && self.scheduler.skip_interval.is_finite()) {
            return invalid("scheduler.skip_interval must be positive");
        }
        if LodThresholds::new(self.lod.thresholds).is_none() {
            return invalid("lod.thresholds must be positive and strictly increasing");
        }
        if LodLevel::from_index(self.lod.full_bone_max_lod).is_none() {
            return invalid("lod.full_bone_max_lod is not a LOD level");
        }
        if self.lod.build_budget == 0 {
            return invalid("lod.build_budget must be at least 1");
        }
        if self.runtime.event_queue_capacity == 0 {
            return invalid("runtime.event_queue_capacity must be at least 1");
        }
        Ok(())
    }

    pub fn recorder_config(&self) -> RecorderConfig {
        RecorderConfig {
            record_interval: secs(self.recorder.record_interval),
            detail_level: self.recorder.detail_level.into(),
        }
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        let p = &self.playback;
        PlaybackConfig {
            target_delay: secs(p.target_delay),
            min_speed_ratio: p.min_playback_speed_ratio,
            max_speed_ratio: p.max_playback_speed_ratio,
            max_buffered_count: p.max_buffered_count,
            catch_up_allowance: secs(p.catch_up_allowance),
            ratio_gain: p.ratio_gain,
            max_ratio_step: p.max_ratio_step,
            adaptive_delay: p.adaptive_delay,
            jitter_multiplier: p.jitter_multiplier,
            max_target_delay: secs(p.max_target_delay),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            skip_interval: secs(self.scheduler.skip_interval),
            near_distance: self.scheduler.near_distance,
        }
    }

    pub fn lod_manager_config(&self) -> LodManagerConfig {
        LodManagerConfig {
            max_build_retries: self.lod.max_lod_build_retries,
        }
    }

    pub fn lod_selector(&self) -> LodSelector {
        let thresholds = LodThresholds::new(self.lod.thresholds).unwrap_or_default();
        LodSelector::new(thresholds, self.lod.hysteresis)
    }

    pub fn playback_level_policy(&self) -> PlaybackLevelPolicy {
        PlaybackLevelPolicy {
            face_distance: self.lod.face_distance,
            full_bone_distance: self.lod.full_bone_distance,
            full_bone_max_lod: LodLevel::from_index(self.lod.full_bone_max_lod)
                .unwrap_or(LodLevel::Lod1),
        }
    }
}

/// Seconds to `Duration`, treating invalid input as zero
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}
