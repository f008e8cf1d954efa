//! Playback synchronizer - one buffer per remote avatar

use std::collections::HashMap;
use std::sync::Arc;

use marionette_core::{AvatarId, MarionetteError, MarionetteResult};
use marionette_wire::Snapshot;

use crate::{EnqueueOutcome, PlaybackBuffer, PlaybackConfig, PlaybackSample};

/// Owns the playback buffers of every remote avatar
pub struct PlaybackSynchronizer {
    config: PlaybackConfig,
    buffers: HashMap<AvatarId, PlaybackBuffer>,
}

impl PlaybackSynchronizer {
    pub fn new(config: PlaybackConfig) -> Self {
        PlaybackSynchronizer {
            config,
            buffers: HashMap::new(),
        }
    }

    /// Start tracking an avatar; returns false if it was already tracked
    pub fn add_avatar(&mut self, avatar: AvatarId) -> bool {
        if self.buffers.contains_key(&avatar) {
            return false;
        }
        self.buffers
            .insert(avatar, PlaybackBuffer::new(self.config.clone()));
        true
    }

    /// Stop tracking an avatar, releasing its buffer
    pub fn remove_avatar(&mut self, avatar: AvatarId) -> Option<PlaybackBuffer> {
        self.buffers.remove(&avatar)
    }

    pub fn enqueue(
        &mut self,
        avatar: AvatarId,
        snapshot: Arc<Snapshot>,
    ) -> MarionetteResult<EnqueueOutcome> {
        self.buffers
            .get_mut(&avatar)
            .map(|buffer| buffer.enqueue(snapshot))
            .ok_or(MarionetteError::UnknownAvatar(avatar))
    }

    pub fn tick(&mut self, avatar: AvatarId, dt: f64) -> MarionetteResult<PlaybackSample> {
        self.buffers
            .get_mut(&avatar)
            .map(|buffer| buffer.tick(dt))
            .ok_or(MarionetteError::UnknownAvatar(avatar))
    }

    /// Tick every buffer
    pub fn tick_all(&mut self, dt: f64) -> Vec<(AvatarId, PlaybackSample)> {
        self.buffers
            .iter_mut()
            .map(|(id, buffer)| (*id, buffer.tick(dt)))
            .collect()
    }

    /// Avatars that entered starvation since the last call
    pub fn take_starved(&mut self) -> Vec<AvatarId> {
        self.buffers
            .iter_mut()
            .filter_map(|(id, buffer)| buffer.take_starved().then_some(*id))
            .collect()
    }

    pub fn buffer(&self, avatar: AvatarId) -> Option<&PlaybackBuffer> {
        self.buffers.get(&avatar)
    }

    pub fn buffer_mut(&mut self, avatar: AvatarId) -> Option<&mut PlaybackBuffer> {
        self.buffers.get_mut(&avatar)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PlaybackStatus;
    use marionette_core::{DetailLevel, MotionTime};
    use marionette_skeleton::SkeletonState;

    fn snapshot(ms: i64) -> Arc<Snapshot> {
        Arc::new(Snapshot::capture(
            &SkeletonState::rest_pose(),
            DetailLevel::BoneOnly,
            MotionTime::from_millis(ms),
        ))
    }

    #[test]
    fn test_unknown_avatar_rejected() {
        let mut sync = PlaybackSynchronizer::new(PlaybackConfig::default());
        let result = sync.enqueue(AvatarId::new(3), snapshot(0));
        assert_eq!(result, Err(MarionetteError::UnknownAvatar(AvatarId::new(3))));
    }

    #[test]
    fn test_buffers_independent() {
        let mut sync = PlaybackSynchronizer::new(PlaybackConfig::default());
        let a = AvatarId::new(1);
        let b = AvatarId::new(2);
        assert!(sync.add_avatar(a));
        assert!(sync.add_avatar(b));
        assert!(!sync.add_avatar(a));

        sync.enqueue(a, snapshot(0)).unwrap();
        sync.enqueue(a, snapshot(500)).unwrap();

        let out: HashMap<_, _> = sync.tick_all(0.016).into_iter().collect();
        assert_ne!(out[&a].status, PlaybackStatus::NoData);
        assert_eq!(out[&b].status, PlaybackStatus::NoData);
    }

    #[test]
    fn test_starved_reported_once() {
        let mut sync = PlaybackSynchronizer::new(PlaybackConfig::default());
        let a = AvatarId::new(1);
        sync.add_avatar(a);
        sync.enqueue(a, snapshot(0)).unwrap();
        sync.enqueue(a, snapshot(200)).unwrap();

        for _ in 0..60 {
            sync.tick_all(0.016);
        }
        assert_eq!(sync.take_starved(), vec![a]);
        assert!(sync.take_starved().is_empty());
    }

    #[test]
    fn test_remove_releases_buffer() {
        let mut sync = PlaybackSynchronizer::new(PlaybackConfig::default());
        let a = AvatarId::new(1);
        sync.add_avatar(a);
        assert!(sync.remove_avatar(a).is_some());
        assert!(sync.is_empty());
        assert!(sync.tick(a, 0.016).is_err());
    }
}
