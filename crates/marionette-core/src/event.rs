//! Upward events
//!
//! Presentation-layer collaborators never receive callbacks from worker
//! threads. Everything they need to know is pushed onto an `EventQueue`
//! by the control thread and drained at a defined point in the frame.

use std::collections::VecDeque;

use crate::{AvatarId, LodInstanceId, LodLevel};

/// Event surfaced to the presentation layer
#[derive(Clone, Debug, PartialEq)]
pub enum AvatarEvent {
    /// First detail level became active; the avatar can be shown
    AvatarReady(AvatarId),
    /// A new detail level was swapped in
    LodActivated {
        avatar: AvatarId,
        level: LodLevel,
        instance: LodInstanceId,
    },
    /// An in-flight build was replaced by a newer request
    LodSuperseded {
        avatar: AvatarId,
        stale: LodLevel,
        requested: LodLevel,
    },
    /// Retries exhausted; the avatar stays at its last good level
    LodBuildFailed {
        avatar: AvatarId,
        level: LodLevel,
        reason: String,
    },
    /// Playback ran out of buffered motion and is holding the last pose
    PlaybackStarved(AvatarId),
    /// Handle destroyed at a phase boundary
    AvatarRemoved(AvatarId),
}

impl AvatarEvent {
    /// Avatar this event concerns
    pub fn avatar(&self) -> AvatarId {
        match self {
            AvatarEvent::AvatarReady(id)
            | AvatarEvent::PlaybackStarved(id)
            | AvatarEvent::AvatarRemoved(id) => *id,
            AvatarEvent::LodActivated { avatar, .. }
            | AvatarEvent::LodSuperseded { avatar, .. }
            | AvatarEvent::LodBuildFailed { avatar, .. } => *avatar,
        }
    }
}

/// Bounded FIFO of pending events
#[derive(Debug)]
pub struct EventQueue {
    events: VecDeque<AvatarEvent>,
    capacity: usize,
    dropped: u64,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        EventQueue {
            events: VecDeque::with_capacity(capacity.min(256)),
            capacity,
            dropped: 0,
        }
    }

    /// Push an event, evicting the oldest when full
    pub fn push(&mut self, event: AvatarEvent) {
        if self.capacity == 0 {
            self.dropped += 1;
            return;
        }
        if self.events.len() >= self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    /// Take every pending event in order
    pub fn drain(&mut self) -> Vec<AvatarEvent> {
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events evicted because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(1024)
    }
}
