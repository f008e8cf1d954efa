//! Per-avatar LOD lifecycle
//!
//! INVARIANTS:
//! - At most one instance is `Active`
//! - At most one build is pending (`Requested` or `Building`)
//! - A level becomes `Active` only from `Ready`, and only in `begin_pass`
//! - A replaced `Active` level is destroyed in the first `end_pass` that
//!   follows a completed recompute against its replacement

use std::sync::Arc;

use marionette_core::{AvatarEvent, AvatarId, LodInstanceId, LodLevel, MarionetteError};
use tracing::{debug, info, trace, warn};

use crate::{BuildRequest, BuildResult, LodAsset, LodInstance, LodState};

/// Lifecycle configuration
#[derive(Clone, Debug)]
pub struct LodManagerConfig {
    /// Retries at the same level after the first failed build
    pub max_build_retries: u32,
}

impl Default for LodManagerConfig {
    fn default() -> Self {
        LodManagerConfig {
            max_build_retries: 2,
        }
    }
}

/// Result of `request_level`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Level already active; any other pending build was cancelled
    AlreadyActive,
    /// Level already requested, building, or built and waiting
    AlreadyPending,
    /// Level exhausted its retries; call `clear_failure` to try again
    PreviouslyFailed,
    /// New build requested, replacing `superseded` if any
    Requested { superseded: Option<LodLevel> },
}

/// Result of `on_build_complete`
#[derive(Clone, Debug, PartialEq)]
pub enum BuildCompletion {
    /// Result for a superseded or unknown instance; destroyed unseen
    Discarded,
    /// Built; activates at the next `begin_pass`
    Ready,
    /// Failed; requested again at the same level
    Retrying { attempt: u32 },
    /// Retries exhausted; the avatar keeps its last good level
    Failed(MarionetteError),
}

/// Owns every LOD instance of one avatar
pub struct LodLifecycleManager {
    avatar: AvatarId,
    config: LodManagerConfig,
    active: Option<LodInstance>,
    pending: Option<LodInstance>,
    ready: Option<LodInstance>,
    retiring: Vec<LodInstance>,
    /// Superseded builds still running on a worker
    stale: Vec<LodInstance>,
    last_good: Option<LodLevel>,
    failed: Option<LodLevel>,
    next_id: LodInstanceId,
    ever_active: bool,
    destroyed: u64,
    events: Vec<AvatarEvent>,
}

impl LodLifecycleManager {
    pub fn new(avatar: AvatarId, config: LodManagerConfig) -> Self {
        LodLifecycleManager {
            avatar,
            config,
            active: None,
            pending: None,
            ready: None,
            retiring: Vec::new(),
            stale: Vec::new(),
            last_good: None,
            failed: None,
            next_id: LodInstanceId::new(1),
            ever_active: false,
            destroyed: 0,
            events: Vec::new(),
        }
    }

    /// Ask for `level` to become active
    pub fn request_level(&mut self, level: LodLevel) -> RequestOutcome {
        if self.active_level() == Some(level) {
            if let Some(pending) = self.pending.take() {
                trace!(avatar = ?self.avatar, level = ?pending.level(), "cancelling build, level already active");
                self.retire_pending(pending);
            }
            if let Some(ready) = self.ready.take() {
                self.destroy(ready);
            }
            return RequestOutcome::AlreadyActive;
        }

        let waiting = self
            .pending
            .as_ref()
            .or(self.ready.as_ref())
            .map(LodInstance::level);
        if waiting == Some(level) {
            return RequestOutcome::AlreadyPending;
        }

        if self.failed == Some(level) {
            return RequestOutcome::PreviouslyFailed;
        }
        self.failed = None;

        let superseded = match (self.pending.take(), self.ready.take()) {
            (Some(pending), ready) => {
                let stale = pending.level();
                self.retire_pending(pending);
                if let Some(ready) = ready {
                    self.destroy(ready);
                }
                Some(stale)
            }
            (None, Some(ready)) => {
                let stale = ready.level();
                self.destroy(ready);
                Some(stale)
            }
            (None, None) => None,
        };

        if let Some(stale) = superseded {
            debug!(avatar = ?self.avatar, ?stale, requested = ?level, "LOD request superseded");
            self.events.push(AvatarEvent::LodSuperseded {
                avatar: self.avatar,
                stale,
                requested: level,
            });
        }

        let id = self.next_id;
        self.next_id = id.next();
        self.pending = Some(LodInstance::new(id, level));
        RequestOutcome::Requested { superseded }
    }

    /// Take the pending request for submission to a builder
    pub fn begin_build(&mut self) -> Option<BuildRequest> {
        let pending = self.pending.as_mut()?;
        if pending.state() != LodState::Requested {
            return None;
        }
        pending.transition(LodState::Building);
        let attempt = pending.record_attempt();
        Some(BuildRequest {
            avatar: self.avatar,
            instance: pending.id(),
            level: pending.level(),
            attempt,
        })
    }

    /// Return a build that could not be submitted to the `Requested` state
    pub fn abort_build(&mut self, instance: LodInstanceId) {
        if let Some(pending) = self.pending.as_mut() {
            if pending.id() == instance && pending.state() == LodState::Building {
                pending.undo_attempt();
                pending.transition(LodState::Requested);
            }
        }
    }

    /// Apply a finished build
    pub fn on_build_complete(&mut self, result: BuildResult) -> BuildCompletion {
        if let Some(pos) = self.stale.iter().position(|s| s.id() == result.instance) {
            let stale = self.stale.swap_remove(pos);
            trace!(avatar = ?self.avatar, level = ?stale.level(), "discarding superseded build");
            self.destroy(stale);
            return BuildCompletion::Discarded;
        }

        let matches_pending = self.pending.as_ref().map_or(false, |p| {
            p.id() == result.instance && p.state() == LodState::Building
        });
        if !matches_pending {
            return BuildCompletion::Discarded;
        }
        let Some(mut instance) = self.pending.take() else {
            return BuildCompletion::Discarded;
        };

        match result.outcome {
            Ok(asset) => {
                instance.set_asset(asset);
                instance.transition(LodState::Ready);
                debug!(avatar = ?self.avatar, level = ?instance.level(), "LOD ready");
                self.ready = Some(instance);
                BuildCompletion::Ready
            }
            Err(err) if instance.attempts() <= self.config.max_build_retries => {
                warn!(avatar = ?self.avatar, level = ?instance.level(), attempt = instance.attempts(), %err, "LOD build failed, retrying");
                instance.transition(LodState::Requested);
                let attempt = instance.attempts() + 1;
                self.pending = Some(instance);
                BuildCompletion::Retrying { attempt }
            }
            Err(err) => {
                let level = instance.level();
                let attempts = instance.attempts();
                warn!(avatar = ?self.avatar, ?level, attempts, %err, fallback = ?self.last_good, "LOD build failed");
                self.destroy(instance);
                self.failed = Some(level);
                self.events.push(AvatarEvent::LodBuildFailed {
                    avatar: self.avatar,
                    level,
                    reason: err.to_string(),
                });
                BuildCompletion::Failed(MarionetteError::LodBuildFailed {
                    avatar: self.avatar,
                    level,
                    attempts,
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Start of a recompute pass: swap in a ready level
    pub fn begin_pass(&mut self) -> Option<LodInstanceId> {
        let mut ready = self.ready.take()?;
        ready.transition(LodState::Active);

        if let Some(mut old) = self.active.take() {
            old.transition(LodState::Retiring);
            self.retiring.push(old);
        }

        let id = ready.id();
        let level = ready.level();
        self.last_good = Some(level);
        self.active = Some(ready);
        info!(avatar = ?self.avatar, ?level, "LOD activated");

        self.events.push(AvatarEvent::LodActivated {
            avatar: self.avatar,
            level,
            instance: id,
        });
        if !self.ever_active {
            self.ever_active = true;
            self.events.push(AvatarEvent::AvatarReady(self.avatar));
        }
        Some(id)
    }

    /// End of a recompute pass
    ///
    /// Levels replaced in `begin_pass` are released only when `recomputed`
    /// is set; otherwise they stay `Retiring` until a later pass recomputes.
    pub fn end_pass(&mut self, recomputed: bool) -> usize {
        if !recomputed {
            if !self.retiring.is_empty() {
                trace!(avatar = ?self.avatar, held = self.retiring.len(), "no recompute, keeping retired levels");
            }
            return 0;
        }
        let retired: Vec<_> = self.retiring.drain(..).collect();
        let count = retired.len();
        for instance in retired {
            self.destroy(instance);
        }
        count
    }

    /// Destroy every instance the avatar owns
    pub fn teardown(&mut self) -> usize {
        let before = self.destroyed;
        let held: Vec<LodInstance> = self
            .active
            .take()
            .into_iter()
            .chain(self.pending.take())
            .chain(self.ready.take())
            .chain(self.retiring.drain(..))
            .chain(self.stale.drain(..))
            .collect();
        for instance in held {
            self.destroy(instance);
        }
        (self.destroyed - before) as usize
    }

    /// Allow a level whose retries ran out to be requested again
    pub fn clear_failure(&mut self) {
        self.failed = None;
    }

    fn retire_pending(&mut self, mut pending: LodInstance) {
        match pending.state() {
            // A worker still holds it; destroy when its result comes back
            LodState::Building => self.stale.push(pending),
            _ => {
                pending.transition(LodState::Destroyed);
                self.destroyed += 1;
            }
        }
    }

    fn destroy(&mut self, mut instance: LodInstance) {
        instance.transition(LodState::Destroyed);
        self.destroyed += 1;
    }

    /// Events raised since the last call
    pub fn take_events(&mut self) -> Vec<AvatarEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn avatar(&self) -> AvatarId {
        self.avatar
    }

    pub fn active(&self) -> Option<&LodInstance> {
        self.active.as_ref()
    }

    pub fn active_level(&self) -> Option<LodLevel> {
        self.active.as_ref().map(LodInstance::level)
    }

    pub fn active_asset(&self) -> Option<Arc<LodAsset>> {
        self.active.as_ref().and_then(|a| a.asset().cloned())
    }

    pub fn pending_level(&self) -> Option<LodLevel> {
        self.pending.as_ref().map(LodInstance::level)
    }

    pub fn ready_level(&self) -> Option<LodLevel> {
        self.ready.as_ref().map(LodInstance::level)
    }

    pub fn last_good_level(&self) -> Option<LodLevel> {
        self.last_good
    }

    /// Every live instance
    pub fn instances(&self) -> impl Iterator<Item = &LodInstance> {
        self.active
            .iter()
            .chain(self.pending.iter())
            .chain(self.ready.iter())
            .chain(self.retiring.iter())
            .chain(self.stale.iter())
    }

    pub fn active_count(&self) -> usize {
        self.instances()
            .filter(|i| i.state() == LodState::Active)
            .count()
    }

    pub fn destroyed_count(&self) -> u64 {
        self.destroyed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LodBuildError, LodBuilder, SkeletalLodBuilder};

    fn manager() -> LodLifecycleManager {
        LodLifecycleManager::new(AvatarId::new(7), LodManagerConfig::default())
    }

    fn build_ok(request: BuildRequest) -> BuildResult {
        BuildResult::run(&SkeletalLodBuilder, request)
    }

    fn build_err(request: BuildRequest) -> BuildResult {
        BuildResult {
            avatar: request.avatar,
            instance: request.instance,
            level: request.level,
            outcome: Err(LodBuildError::Failed("out of memory".into())),
        }
    }

    fn activate(m: &mut LodLifecycleManager, level: LodLevel) {
        m.request_level(level);
        let req = m.begin_build().unwrap();
        assert_eq!(m.on_build_complete(build_ok(req)), BuildCompletion::Ready);
        m.begin_pass();
        m.end_pass(true);
    }

    #[test]
    fn test_first_activation_reports_ready() {
        let mut m = manager();
        activate(&mut m, LodLevel::Lod1);

        assert_eq!(m.active_level(), Some(LodLevel::Lod1));
        let events = m.take_events();
        assert!(events.contains(&AvatarEvent::AvatarReady(AvatarId::new(7))));
    }

    #[test]
    fn test_ready_waits_for_pass() {
        let mut m = manager();
        m.request_level(LodLevel::Lod0);
        let req = m.begin_build().unwrap();
        m.on_build_complete(build_ok(req));

        assert_eq!(m.active_level(), None);
        assert_eq!(m.ready_level(), Some(LodLevel::Lod0));
        m.begin_pass();
        assert_eq!(m.active_level(), Some(LodLevel::Lod0));
    }

    #[test]
    fn test_request_idempotent() {
        let mut m = manager();
        activate(&mut m, LodLevel::Lod2);

        assert_eq!(m.request_level(LodLevel::Lod2), RequestOutcome::AlreadyActive);
        assert!(matches!(
            m.request_level(LodLevel::Lod1),
            RequestOutcome::Requested { superseded: None }
        ));
        assert_eq!(m.request_level(LodLevel::Lod1), RequestOutcome::AlreadyPending);
        m.begin_build();
        assert_eq!(m.request_level(LodLevel::Lod1), RequestOutcome::AlreadyPending);
    }

    #[test]
    fn test_request_active_cancels_pending() {
        let mut m = manager();
        activate(&mut m, LodLevel::Lod2);
        m.request_level(LodLevel::Lod0);
        let req = m.begin_build().unwrap();

        assert_eq!(m.request_level(LodLevel::Lod2), RequestOutcome::AlreadyActive);
        assert_eq!(m.pending_level(), None);
        assert_eq!(m.on_build_complete(build_ok(req)), BuildCompletion::Discarded);
        assert_eq!(m.active_level(), Some(LodLevel::Lod2));
    }

    // Scenario D: Lod2 in flight, Lod0 requested, Lod2 finishes first
    #[test]
    fn test_superseded_build_discarded() {
        let mut m = manager();
        m.request_level(LodLevel::Lod2);
        let lod2 = m.begin_build().unwrap();

        assert_eq!(
            m.request_level(LodLevel::Lod0),
            RequestOutcome::Requested {
                superseded: Some(LodLevel::Lod2)
            }
        );
        let lod0 = m.begin_build().unwrap();

        assert_eq!(m.on_build_complete(build_ok(lod2)), BuildCompletion::Discarded);
        assert_eq!(m.begin_pass(), None);
        assert_eq!(m.active_level(), None);

        assert_eq!(m.on_build_complete(build_ok(lod0)), BuildCompletion::Ready);
        m.begin_pass();
        m.end_pass(true);

        assert_eq!(m.active_level(), Some(LodLevel::Lod0));
        assert_eq!(m.instances().count(), 1);
        assert_eq!(m.active_count(), 1);

        let events = m.take_events();
        assert!(events.iter().any(|e| matches!(
            e,
            AvatarEvent::LodSuperseded {
                stale: LodLevel::Lod2,
                requested: LodLevel::Lod0,
                ..
            }
        )));
        assert!(!events.iter().any(|e| matches!(
            e,
            AvatarEvent::LodActivated {
                level: LodLevel::Lod2,
                ..
            }
        )));
    }

    #[test]
    fn test_old_level_retires_after_one_pass() {
        let mut m = manager();
        activate(&mut m, LodLevel::Lod3);
        m.request_level(LodLevel::Lod1);
        let req = m.begin_build().unwrap();
        m.on_build_complete(build_ok(req));

        m.begin_pass();
        let retiring: Vec<_> = m
            .instances()
            .filter(|i| i.state() == LodState::Retiring)
            .map(|i| i.level())
            .collect();
        assert_eq!(retiring, vec![LodLevel::Lod3]);
        assert_eq!(m.active_count(), 1);

        assert_eq!(m.end_pass(true), 1);
        assert_eq!(m.instances().count(), 1);
    }

    #[test]
    fn test_old_level_kept_until_recompute() {
        let mut m = manager();
        activate(&mut m, LodLevel::Lod0);
        let destroyed = m.destroyed_count();

        m.request_level(LodLevel::Lod3);
        let req = m.begin_build().unwrap();
        m.on_build_complete(build_ok(req));
        m.begin_pass();

        // Skipped frames keep the replaced level alive
        for _ in 0..3 {
            assert_eq!(m.end_pass(false), 0);
            m.begin_pass();
        }
        assert_eq!(m.destroyed_count(), destroyed);
        let retiring: Vec<_> = m
            .instances()
            .filter(|i| i.state() == LodState::Retiring)
            .map(|i| i.level())
            .collect();
        assert_eq!(retiring, vec![LodLevel::Lod0]);
        assert_eq!(m.active_level(), Some(LodLevel::Lod3));

        assert_eq!(m.end_pass(true), 1);
        assert_eq!(m.destroyed_count(), destroyed + 1);
        assert_eq!(m.instances().count(), 1);
    }

    #[test]
    fn test_retry_then_fail_keeps_last_good() {
        let mut m = LodLifecycleManager::new(
            AvatarId::new(1),
            LodManagerConfig {
                max_build_retries: 2,
            },
        );
        activate(&mut m, LodLevel::Lod2);
        m.take_events();
        m.request_level(LodLevel::Lod0);

        let req = m.begin_build().unwrap();
        assert_eq!(
            m.on_build_complete(build_err(req)),
            BuildCompletion::Retrying { attempt: 2 }
        );
        let req = m.begin_build().unwrap();
        assert_eq!(req.attempt, 2);
        assert_eq!(
            m.on_build_complete(build_err(req)),
            BuildCompletion::Retrying { attempt: 3 }
        );
        let req = m.begin_build().unwrap();
        let completion = m.on_build_complete(build_err(req));

        assert!(matches!(
            completion,
            BuildCompletion::Failed(MarionetteError::LodBuildFailed { attempts: 3, .. })
        ));
        assert_eq!(m.active_level(), Some(LodLevel::Lod2));
        assert_eq!(m.last_good_level(), Some(LodLevel::Lod2));
        assert_eq!(m.request_level(LodLevel::Lod0), RequestOutcome::PreviouslyFailed);
        assert!(m
            .take_events()
            .iter()
            .any(|e| matches!(e, AvatarEvent::LodBuildFailed { level: LodLevel::Lod0, .. })));
    }

    #[test]
    fn test_abort_build_allows_resubmit() {
        let mut m = manager();
        m.request_level(LodLevel::Lod1);
        let req = m.begin_build().unwrap();
        m.abort_build(req.instance);

        let again = m.begin_build().unwrap();
        assert_eq!(again.instance, req.instance);
        assert_eq!(again.attempt, 1);
    }

    #[test]
    fn test_teardown_destroys_everything() {
        let mut m = manager();
        activate(&mut m, LodLevel::Lod1);
        m.request_level(LodLevel::Lod0);
        m.begin_build();

        assert_eq!(m.teardown(), 2);
        assert_eq!(m.instances().count(), 0);
        assert_eq!(m.active_level(), None);
    }

    #[test]
    fn test_active_count_never_exceeds_one() {
        let mut m = manager();
        let levels = [
            LodLevel::Lod3,
            LodLevel::Lod0,
            LodLevel::Lod2,
            LodLevel::Lod1,
            LodLevel::Lod0,
            LodLevel::Lod3,
        ];

        let mut in_flight: Vec<BuildRequest> = Vec::new();
        for (frame, level) in levels.iter().cycle().take(40).enumerate() {
            m.request_level(*level);
            if let Some(req) = m.begin_build() {
                in_flight.push(req);
            }
            // Complete builds out of order
            if frame % 3 == 0 {
                while let Some(req) = in_flight.pop() {
                    m.on_build_complete(build_ok(req));
                }
            }
            m.begin_pass();
            assert!(m.active_count() <= 1);
            m.end_pass(frame % 2 == 0);
            assert!(m.active_count() <= 1);
        }
    }

    #[test]
    fn test_builder_trait_object() {
        let builder: &dyn LodBuilder = &SkeletalLodBuilder;
        let req = BuildRequest {
            avatar: AvatarId::new(1),
            instance: LodInstanceId::new(1),
            level: LodLevel::Lod3,
            attempt: 1,
        };
        assert_eq!(builder.build(&req).unwrap().bone_count(), 5);
    }
}
