//! Avatar registry
//!
//! Mutated only on the control thread. Removal is deferred: `unload` marks
//! the handle and `flush_removals` destroys it at the next phase boundary,
//! so a phase never observes a half-removed avatar.

use std::collections::HashMap;

use glam::Mat4;
use marionette_core::{AvatarId, DetailLevel, MarionetteError, MarionetteResult, PeerId};
use marionette_lod::{Aabb, LodLifecycleManager, LodManagerConfig};
use marionette_skeleton::SkeletonState;
use marionette_time::{PlaybackSample, PlaybackStatus};
use tracing::debug;

use crate::{PacketRecorder, PhaseUnit, RecorderConfig, ScheduledWork};

/// Where an avatar's motion comes from
pub enum AvatarSource {
    /// Authored here; recorded and sent
    Local(PacketRecorder),
    /// Authored by a peer; replayed from its playback buffer
    Remote,
}

/// One replicated character
pub struct AvatarHandle {
    id: AvatarId,
    owner: PeerId,
    pub(crate) source: AvatarSource,
    pub(crate) skeleton: SkeletonState,
    pub(crate) lod: LodLifecycleManager,
    pub(crate) bounds: Aabb,
    pub(crate) model_space: Vec<Mat4>,
    pub(crate) detail_cap: DetailLevel,
    pub(crate) playback_status: Option<PlaybackStatus>,
    /// Sample ticked on the control thread, applied in the pre-update phase
    pub(crate) playback_sample: Option<PlaybackSample>,
    pub(crate) work: Option<ScheduledWork>,
    /// Set when this frame's core recompute ran
    pub(crate) recomputed: bool,
    pub(crate) update_count: u64,
    pending_removal: bool,
}

impl AvatarHandle {
    pub fn local(
        id: AvatarId,
        owner: PeerId,
        recorder: RecorderConfig,
        lod: LodManagerConfig,
    ) -> Self {
        Self::with_source(id, owner, AvatarSource::Local(PacketRecorder::new(recorder)), lod)
    }

    pub fn remote(id: AvatarId, owner: PeerId, lod: LodManagerConfig) -> Self {
        Self::with_source(id, owner, AvatarSource::Remote, lod)
    }

    fn with_source(
        id: AvatarId,
        owner: PeerId,
        source: AvatarSource,
        lod: LodManagerConfig,
    ) -> Self {
        let skeleton = SkeletonState::rest_pose();
        let bounds = Aabb::from(skeleton.bounds(marionette_skeleton::Joint::all()));
        AvatarHandle {
            id,
            owner,
            source,
            skeleton,
            lod: LodLifecycleManager::new(id, lod),
            bounds,
            model_space: Vec::new(),
            detail_cap: DetailLevel::FullBoneFace,
            playback_status: None,
            playback_sample: None,
            work: None,
            recomputed: false,
            update_count: 0,
            pending_removal: false,
        }
    }

    pub fn id(&self) -> AvatarId {
        self.id
    }

    pub fn owner(&self) -> PeerId {
        self.owner
    }

    pub fn is_local(&self) -> bool {
        matches!(self.source, AvatarSource::Local(_))
    }

    pub fn skeleton(&self) -> &SkeletonState {
        &self.skeleton
    }

    pub fn skeleton_mut(&mut self) -> &mut SkeletonState {
        &mut self.skeleton
    }

    pub fn lod(&self) -> &LodLifecycleManager {
        &self.lod
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Model-space bone matrices from the last recompute
    pub fn model_space(&self) -> &[Mat4] {
        &self.model_space
    }

    pub fn detail_cap(&self) -> DetailLevel {
        self.detail_cap
    }

    pub fn recorder(&self) -> Option<&PacketRecorder> {
        match &self.source {
            AvatarSource::Local(recorder) => Some(recorder),
            AvatarSource::Remote => None,
        }
    }

    pub fn playback_status(&self) -> Option<PlaybackStatus> {
        self.playback_status
    }

    /// Work decided for the current frame
    pub fn scheduled(&self) -> Option<&ScheduledWork> {
        self.work.as_ref()
    }

    /// Full recomputes so far
    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    pub fn is_pending_removal(&self) -> bool {
        self.pending_removal
    }

    /// Release everything the avatar owns
    fn destroy(mut self) {
        let released = self.lod.teardown();
        debug!(avatar = ?self.id, lod_instances = released, "avatar destroyed");
    }
}

impl PhaseUnit for AvatarHandle {
    fn avatar(&self) -> AvatarId {
        self.id
    }
}

/// All avatars known to a node, stored contiguously for parallel phases
#[derive(Default)]
pub struct AvatarRegistry {
    handles: Vec<AvatarHandle>,
    index: HashMap<AvatarId, usize>,
}

impl AvatarRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: AvatarHandle) -> MarionetteResult<()> {
        let id = handle.id();
        debug_assert!(!self.index.contains_key(&id), "duplicate avatar handle {:?}", id);
        if self.index.contains_key(&id) {
            return Err(MarionetteError::DuplicateAvatarHandle(id));
        }
        self.index.insert(id, self.handles.len());
        self.handles.push(handle);
        Ok(())
    }

    /// Mark for removal at the next phase boundary
    pub fn unload(&mut self, id: AvatarId) -> MarionetteResult<()> {
        let handle = self
            .get_mut(id)
            .ok_or(MarionetteError::UnknownAvatar(id))?;
        handle.pending_removal = true;
        Ok(())
    }

    /// Destroy every marked handle; returns their ids
    pub fn flush_removals(&mut self) -> Vec<AvatarId> {
        if !self.handles.iter().any(|h| h.pending_removal) {
            return Vec::new();
        }

        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.handles)
            .into_iter()
            .partition(|h| h.pending_removal);
        self.handles = kept;
        self.reindex();

        removed
            .into_iter()
            .map(|handle| {
                let id = handle.id();
                handle.destroy();
                id
            })
            .collect()
    }

    fn reindex(&mut self) {
        self.index = self
            .handles
            .iter()
            .enumerate()
            .map(|(i, h)| (h.id(), i))
            .collect();
    }

    pub fn get(&self, id: AvatarId) -> Option<&AvatarHandle> {
        self.index.get(&id).map(|i| &self.handles[*i])
    }

    pub fn get_mut(&mut self, id: AvatarId) -> Option<&mut AvatarHandle> {
        let i = *self.index.get(&id)?;
        self.handles.get_mut(i)
    }

    pub fn contains(&self, id: AvatarId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn handles(&self) -> &[AvatarHandle] {
        &self.handles
    }

    pub fn handles_mut(&mut self) -> &mut [AvatarHandle] {
        &mut self.handles
    }

    pub fn ids(&self) -> Vec<AvatarId> {
        self.handles.iter().map(AvatarHandle::id).collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
