//! Per-frame update scheduling
//!
//! Decides, for every avatar, whether its skeleton gets a full recompute
//! this frame. Off-screen and distant avatars are throttled but never
//! starved: `skip_interval` is a hard floor on staleness.

use std::collections::HashMap;
use std::time::Duration;

use marionette_core::{AvatarId, MarionetteError, MarionetteResult, MotionTime};
use marionette_lod::{Aabb, CameraView};

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub skip_interval: Duration,
    pub near_distance: f32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            skip_interval: Duration::from_millis(500),
            near_distance: 15.0,
        }
    }
}

/// Why an avatar is recomputed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UpdateReason {
    /// In view and near enough to update every frame
    Visible,
    /// Caller asked for guaranteed freshness
    Forced,
    /// Throttled long enough; staleness floor reached
    ThrottleExpired,
}

/// Why an avatar is skipped
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SkipReason {
    Throttled,
    /// No active LOD to recompute against
    NotReady,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkDecision {
    Update(UpdateReason),
    Skip(SkipReason),
}

/// One avatar's decision for one frame
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScheduledWork {
    pub avatar: AvatarId,
    pub decision: WorkDecision,
    pub visible: bool,
    pub distance: f32,
}

impl ScheduledWork {
    pub fn needs_full_update(&self) -> bool {
        matches!(self.decision, WorkDecision::Update(_))
    }

    pub fn reason(&self) -> Option<UpdateReason> {
        match self.decision {
            WorkDecision::Update(reason) => Some(reason),
            WorkDecision::Skip(_) => None,
        }
    }
}

/// What the scheduler needs to know about an avatar this frame
#[derive(Clone, Copy, Debug)]
pub struct ScheduleInput {
    pub avatar: AvatarId,
    pub bounds: Aabb,
    pub has_active_lod: bool,
}

#[derive(Clone, Copy, Debug, Default)]
struct AvatarSchedule {
    last_update: Option<MotionTime>,
    force: bool,
}

pub struct UpdateScheduler {
    config: SchedulerConfig,
    avatars: HashMap<AvatarId, AvatarSchedule>,
}

impl UpdateScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        UpdateScheduler {
            config,
            avatars: HashMap::new(),
        }
    }

    pub fn register(&mut self, avatar: AvatarId) {
        self.avatars.entry(avatar).or_default();
    }

    pub fn unregister(&mut self, avatar: AvatarId) {
        self.avatars.remove(&avatar);
    }

    /// Guarantee a recompute on the next frame the avatar is ready
    pub fn force_update(&mut self, avatar: AvatarId) -> MarionetteResult<()> {
        let entry = self
            .avatars
            .get_mut(&avatar)
            .ok_or(MarionetteError::UnknownAvatar(avatar))?;
        entry.force = true;
        Ok(())
    }

    /// Decide this frame's work; scheduled avatars count as updated at `now`
    pub fn schedule(
        &mut self,
        now: MotionTime,
        camera: &CameraView,
        inputs: &[ScheduleInput],
    ) -> Vec<ScheduledWork> {
        inputs
            .iter()
            .map(|input| {
                let visible = camera.is_visible(&input.bounds);
                let distance = camera.distance_to(&input.bounds);
                let entry = self.avatars.entry(input.avatar).or_default();
                let decision = decide(&self.config, entry, now, input.has_active_lod, visible, distance);

                if let WorkDecision::Update(reason) = decision {
                    entry.last_update = Some(now);
                    if reason == UpdateReason::Forced {
                        entry.force = false;
                    }
                }

                ScheduledWork {
                    avatar: input.avatar,
                    decision,
                    visible,
                    distance,
                }
            })
            .collect()
    }

    pub fn last_update(&self, avatar: AvatarId) -> Option<MotionTime> {
        self.avatars.get(&avatar).and_then(|a| a.last_update)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

fn decide(
    config: &SchedulerConfig,
    entry: &AvatarSchedule,
    now: MotionTime,
    ready: bool,
    visible: bool,
    distance: f32,
) -> WorkDecision {
    if !ready {
        // Force flag survives until the avatar can actually be updated
        return WorkDecision::Skip(SkipReason::NotReady);
    }
    if entry.force {
        return WorkDecision::Update(UpdateReason::Forced);
    }
    if visible && distance <= config.near_distance {
        return WorkDecision::Update(UpdateReason::Visible);
    }
    match entry.last_update {
        Some(last) if now - last < config.skip_interval => WorkDecision::Skip(SkipReason::Throttled),
        _ => WorkDecision::Update(UpdateReason::ThrottleExpired),
    }
}
