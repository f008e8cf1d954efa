//! Replication node - the per-frame loop
//!
//! One node per peer. The control thread calls `tick` once per frame; all
//! registry mutation, LOD bookkeeping and event emission happen here, while
//! per-avatar work runs in the three parallel phases.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use marionette_core::{
    AvatarEvent, AvatarId, EventQueue, MarionetteError, MarionetteResult, MotionTime, PeerId,
};
use marionette_lod::{
    Aabb, BuildCompletion, CameraView, LodBuildPipeline, LodBuilder, LodSelector,
    PlaybackLevelPolicy, SkeletalLodBuilder,
};
use marionette_skeleton::SkeletonState;
use marionette_time::{
    EnqueueOutcome, LocalClock, PlaybackBuffer, PlaybackStatus, PlaybackSynchronizer,
};
use marionette_transport::Transport;
use marionette_wire::SnapshotCodec;
use tracing::{debug, info, trace, warn};

use crate::{
    AvatarHandle, AvatarRegistry, AvatarSource, MarionetteConfig, Phase, PhaseExecutor,
    Recorded, ScheduleInput, UpdateScheduler,
};

#[derive(Clone, Debug, Default)]
pub struct RuntimeStats {
    pub frames: u64,
    pub packets_in: u64,
    pub packets_out: u64,
    pub packets_resent: u64,
    pub malformed: u64,
    pub unknown_sender: u64,
    pub late_snapshots: u64,
    pub lod_builds_submitted: u64,
    pub lod_builds_failed: u64,
    /// Units that did work, per phase
    pub phase_updates: [u64; 3],
    pub phase_durations: [Duration; 3],
    pub skipped: u64,
    pub unit_failures: u64,
    pub last_frame_duration: Duration,
}

/// Runtime for one peer's avatars, local and remote
pub struct ReplicationNode<T: Transport> {
    local_peer: PeerId,
    config: MarionetteConfig,
    transport: T,
    registry: AvatarRegistry,
    remote_by_owner: HashMap<PeerId, AvatarId>,
    local_avatar: Option<AvatarId>,
    subscribers: Vec<PeerId>,
    synchronizer: PlaybackSynchronizer,
    scheduler: UpdateScheduler,
    executor: PhaseExecutor,
    pipeline: LodBuildPipeline,
    selector: LodSelector,
    policy: PlaybackLevelPolicy,
    events: EventQueue,
    clock: LocalClock,
    stats: RuntimeStats,
}

impl<T: Transport> ReplicationNode<T> {
    pub fn new(transport: T, config: MarionetteConfig) -> MarionetteResult<Self> {
        Self::with_builder(transport, config, Arc::new(SkeletalLodBuilder))
    }

    pub fn with_builder(
        transport: T,
        config: MarionetteConfig,
        builder: Arc<dyn LodBuilder>,
    ) -> MarionetteResult<Self> {
        config
            .validate()
            .map_err(|e| MarionetteError::InvalidConfig(e.to_string()))?;

        let executor = PhaseExecutor::new(config.runtime.worker_threads)?;
        let pipeline =
            LodBuildPipeline::new(config.lod.build_workers, config.lod.build_budget, builder);
        let synchronizer = PlaybackSynchronizer::new(config.playback_config());

        Ok(ReplicationNode {
            local_peer: transport.local_peer(),
            scheduler: UpdateScheduler::new(config.scheduler_config()),
            selector: config.lod_selector(),
            policy: config.playback_level_policy(),
            events: EventQueue::new(config.runtime.event_queue_capacity),
            config,
            transport,
            registry: AvatarRegistry::new(),
            remote_by_owner: HashMap::new(),
            local_avatar: None,
            subscribers: Vec::new(),
            synchronizer,
            executor,
            pipeline,
            clock: LocalClock::new(),
            stats: RuntimeStats::default(),
        })
    }

    /// Register the avatar this peer authors
    pub fn add_local_avatar(&mut self) -> MarionetteResult<AvatarId> {
        let id = AvatarId::from_owner_index(self.local_peer, 0);
        if self.registry.contains(id) {
            return Err(MarionetteError::DuplicateAvatarHandle(id));
        }
        let handle = AvatarHandle::local(
            id,
            self.local_peer,
            self.config.recorder_config(),
            self.config.lod_manager_config(),
        );
        self.registry.insert(handle)?;
        self.scheduler.register(id);
        self.local_avatar = Some(id);
        info!(avatar = ?id, "local avatar added");
        Ok(id)
    }

    /// Register the avatar authored by `owner`
    pub fn add_remote_avatar(&mut self, owner: PeerId) -> MarionetteResult<AvatarId> {
        let id = AvatarId::from_owner_index(owner, 0);
        if self.registry.contains(id) {
            return Err(MarionetteError::DuplicateAvatarHandle(id));
        }
        let handle = AvatarHandle::remote(id, owner, self.config.lod_manager_config());
        self.registry.insert(handle)?;
        self.synchronizer.add_avatar(id);
        self.scheduler.register(id);
        self.remote_by_owner.insert(owner, id);
        info!(avatar = ?id, ?owner, "remote avatar added");
        Ok(id)
    }

    /// Unload an avatar; it is destroyed at the next phase boundary
    pub fn remove_avatar(&mut self, id: AvatarId) -> MarionetteResult<()> {
        self.registry.unload(id)
    }

    /// Peers that receive the local avatar's snapshots
    pub fn set_subscribers(&mut self, peers: Vec<PeerId>) {
        self.subscribers = peers;
    }

    /// Pose of the local avatar, for the input layer to drive
    pub fn local_skeleton_mut(&mut self) -> Option<&mut SkeletonState> {
        let id = self.local_avatar?;
        self.registry.get_mut(id).map(AvatarHandle::skeleton_mut)
    }

    pub fn force_update(&mut self, id: AvatarId) -> MarionetteResult<()> {
        self.scheduler.force_update(id)
    }

    /// Run one frame
    pub fn tick(&mut self, dt: f64, camera: &CameraView) {
        let start = Instant::now();
        self.stats.frames += 1;

        // Stage 1: Advance local time
        let now = self.clock.advance(dt);

        // Stage 2: Ingest packets
        self.ingest_packets();

        // Stage 3: Apply finished LOD builds
        self.drain_lod_builds();

        // Stage 4: Pick LOD levels and submit builds
        self.request_lod_levels(camera);

        // Stage 5: Pre-update phase (record / replay)
        self.pre_update(now, dt);
        self.flush_removals();

        // Stage 6: Swap in ready levels, decide who recomputes
        self.begin_recompute_pass();
        self.schedule(now, camera);

        // Stage 7: Core recompute phase
        self.core_recompute();
        self.flush_removals();

        // Stage 8: Post-update phase
        self.post_update(camera);
        self.flush_removals();

        // Stage 9: Surface events
        self.collect_lod_events();

        self.stats.last_frame_duration = start.elapsed();
        trace!(frame = self.stats.frames, elapsed = ?self.stats.last_frame_duration, "frame complete");
    }

    /// Stage 2: Decode received packets into playback buffers
    fn ingest_packets(&mut self) {
        for _ in 0..self.config.runtime.max_packets_per_frame {
            let Some((sender, payload)) = self.transport.poll_receive() else {
                break;
            };
            self.stats.packets_in += 1;

            let Some(avatar) = self.remote_by_owner.get(&sender).copied() else {
                self.stats.unknown_sender += 1;
                trace!(?sender, "packet from peer without an avatar");
                continue;
            };

            let snapshot = match SnapshotCodec::decode(&payload) {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    self.stats.malformed += 1;
                    warn!(?sender, %err, "dropping malformed packet");
                    continue;
                }
            };

            match self.synchronizer.enqueue(avatar, Arc::new(snapshot)) {
                Ok(EnqueueOutcome::Late) => self.stats.late_snapshots += 1,
                Ok(_) => {}
                Err(err) => trace!(%err, "snapshot for avatar without a buffer"),
            }
        }
    }

    /// Stage 3: Hand finished builds to their managers
    fn drain_lod_builds(&mut self) {
        for result in self.pipeline.drain_results() {
            let Some(handle) = self.registry.get_mut(result.avatar) else {
                trace!(avatar = ?result.avatar, "build result for removed avatar");
                continue;
            };
            if let BuildCompletion::Failed(err) = handle.lod.on_build_complete(result) {
                self.stats.lod_builds_failed += 1;
                warn!(%err, "LOD build gave up");
            }
        }
    }

    /// Stage 4: Distance-driven LOD requests
    fn request_lod_levels(&mut self, camera: &CameraView) {
        for handle in self.registry.handles_mut() {
            if handle.is_pending_removal() {
                continue;
            }
            let distance = camera.distance_to(&handle.bounds);
            let current = handle
                .lod
                .pending_level()
                .or(handle.lod.ready_level())
                .or(handle.lod.active_level());
            let level = self.selector.select_with_hysteresis(current, distance);
            handle.lod.request_level(level);

            if let Some(request) = handle.lod.begin_build() {
                if self.pipeline.submit(request) {
                    self.stats.lod_builds_submitted += 1;
                } else {
                    handle.lod.abort_build(request.instance);
                }
            }
        }
    }

    /// Stage 5: Record the local pose, replay remote ones
    fn pre_update(&mut self, now: MotionTime, dt: f64) {
        for (id, sample) in self.synchronizer.tick_all(dt) {
            if let Some(handle) = self.registry.get_mut(id) {
                handle.playback_sample = Some(sample);
            }
        }
        for id in self.synchronizer.take_starved() {
            self.events.push(AvatarEvent::PlaybackStarved(id));
        }

        let report = self
            .executor
            .run(Phase::PreUpdate, self.registry.handles_mut(), |handle| {
                Ok(pre_update_unit(handle, now))
            });
        self.stats.phase_durations[Phase::PreUpdate.index()] = report.elapsed;
        self.stats.phase_updates[Phase::PreUpdate.index()] += report.outcomes.len() as u64;
        self.stats.unit_failures += report.failure_count() as u64;

        for outcome in report.outcomes {
            if let Ok(Some(recorded)) = outcome.result {
                self.send_recorded(&recorded);
            }
        }
    }

    fn send_recorded(&mut self, recorded: &Recorded) {
        if self.subscribers.is_empty() {
            return;
        }
        if !recorded.fresh {
            if !self.config.recorder.resend_stale {
                return;
            }
            self.stats.packets_resent += 1;
        }

        // One recipient per call so only delivered packets are counted
        for peer in &self.subscribers {
            match self
                .transport
                .send(std::slice::from_ref(peer), recorded.packet.clone())
            {
                Ok(()) => self.stats.packets_out += 1,
                // The peer may have just left
                Err(MarionetteError::UnknownRecipient(peer)) => {
                    trace!(?peer, "snapshot recipient unknown");
                }
                Err(err) => warn!(?peer, %err, "snapshot send failed"),
            }
        }
    }

    /// Stage 6a: Start of the recompute pass
    fn begin_recompute_pass(&mut self) {
        for handle in self.registry.handles_mut() {
            handle.lod.begin_pass();
        }
    }

    /// Stage 6b: Per-avatar update decisions
    fn schedule(&mut self, now: MotionTime, camera: &CameraView) {
        let inputs: Vec<ScheduleInput> = self
            .registry
            .handles()
            .iter()
            .map(|h| ScheduleInput {
                avatar: h.id(),
                bounds: h.bounds,
                has_active_lod: h.lod.active_level().is_some(),
            })
            .collect();

        let decisions = self.scheduler.schedule(now, camera, &inputs);
        for work in decisions {
            if !work.needs_full_update() {
                self.stats.skipped += 1;
            }
            if let Some(handle) = self.registry.get_mut(work.avatar) {
                handle.work = Some(work);
            }
        }
    }

    /// Stage 7: Recompute model-space bones for scheduled avatars
    fn core_recompute(&mut self) {
        let report = self
            .executor
            .run(Phase::CoreRecompute, self.registry.handles_mut(), |handle| {
                Ok(recompute_unit(handle))
            });
        self.stats.phase_durations[Phase::CoreRecompute.index()] = report.elapsed;
        self.stats.phase_updates[Phase::CoreRecompute.index()] += report
            .outcomes
            .iter()
            .filter(|o| matches!(o.result, Ok(true)))
            .count() as u64;
        self.stats.unit_failures += report.failure_count() as u64;
    }

    /// Stage 8: Release retired levels, refresh the playback level cap
    fn post_update(&mut self, camera: &CameraView) {
        let policy = &self.policy;
        let report = self
            .executor
            .run(Phase::PostUpdate, self.registry.handles_mut(), |handle| {
                handle.lod.end_pass(std::mem::take(&mut handle.recomputed));
                let distance = camera.distance_to(&handle.bounds);
                handle.detail_cap = policy.cap(handle.lod.active_level(), distance);
                handle.work = None;
                Ok(())
            });
        self.stats.phase_durations[Phase::PostUpdate.index()] = report.elapsed;
        self.stats.phase_updates[Phase::PostUpdate.index()] += report.outcomes.len() as u64;
        self.stats.unit_failures += report.failure_count() as u64;
    }

    /// Destroy avatars unloaded since the last phase boundary
    fn flush_removals(&mut self) {
        self.collect_lod_events();
        for id in self.registry.flush_removals() {
            self.synchronizer.remove_avatar(id);
            self.scheduler.unregister(id);
            self.remote_by_owner.retain(|_, avatar| *avatar != id);
            if self.local_avatar == Some(id) {
                self.local_avatar = None;
            }
            debug!(avatar = ?id, "avatar removed");
            self.events.push(AvatarEvent::AvatarRemoved(id));
        }
    }

    fn collect_lod_events(&mut self) {
        for handle in self.registry.handles_mut() {
            for event in handle.lod.take_events() {
                self.events.push(event);
            }
        }
    }

    /// Events since the last call, oldest first
    pub fn drain_events(&mut self) -> Vec<AvatarEvent> {
        self.events.drain()
    }

    pub fn avatar(&self, id: AvatarId) -> Option<&AvatarHandle> {
        self.registry.get(id)
    }

    pub fn avatars(&self) -> &[AvatarHandle] {
        self.registry.handles()
    }

    /// Playback buffer of a remote avatar
    pub fn playback(&self, id: AvatarId) -> Option<&PlaybackBuffer> {
        self.synchronizer.buffer(id)
    }

    pub fn synchronizer(&self) -> &PlaybackSynchronizer {
        &self.synchronizer
    }

    pub fn local_avatar(&self) -> Option<AvatarId> {
        self.local_avatar
    }

    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    pub fn now(&self) -> MotionTime {
        self.clock.now()
    }

    pub fn stats(&self) -> &RuntimeStats {
        &self.stats
    }

    pub fn config(&self) -> &MarionetteConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Destroy every avatar and stop the build workers
    pub fn shutdown(&mut self) {
        for id in self.registry.ids() {
            let _ = self.registry.unload(id);
        }
        self.flush_removals();
        self.pipeline.shutdown();
        info!("replication node shut down");
    }
}

fn pre_update_unit(handle: &mut AvatarHandle, now: MotionTime) -> Option<Recorded> {
    match &mut handle.source {
        AvatarSource::Local(recorder) => recorder.tick(now, &handle.skeleton),
        AvatarSource::Remote => {
            let sample = handle.playback_sample.take()?;
            if sample.status != PlaybackStatus::NoData {
                sample.sample.apply_to(&mut handle.skeleton, handle.detail_cap);
            }
            handle.playback_status = Some(sample.status);
            None
        }
    }
}

fn recompute_unit(handle: &mut AvatarHandle) -> bool {
    if !handle.work.map_or(false, |w| w.needs_full_update()) {
        return false;
    }
    let Some(asset) = handle.lod.active_asset() else {
        return false;
    };

    handle.model_space = handle.skeleton.model_space(&asset.bones);
    let bounds = handle
        .skeleton
        .bounds(&asset.bones)
        .padded(asset.bounds_padding);
    handle.bounds = Aabb::from(bounds);
    handle.update_count += 1;
    handle.recomputed = true;
    true
}
