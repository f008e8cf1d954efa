//! LOD instance state machine

use std::sync::Arc;

use marionette_core::{LodInstanceId, LodLevel};

use crate::LodAsset;

/// Lifecycle state of one built level
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LodState {
    Requested,
    Building,
    Ready,
    Active,
    Retiring,
    Destroyed,
}

impl LodState {
    /// Is `self -> to` a legal step?
    pub fn can_transition(self, to: LodState) -> bool {
        use LodState::*;
        matches!(
            (self, to),
            (Requested, Building)
                | (Building, Requested)
                | (Building, Ready)
                | (Ready, Active)
                | (Active, Retiring)
                | (Requested | Building | Ready | Active | Retiring, Destroyed)
        )
    }
}

/// One detail level of one avatar
#[derive(Clone, Debug)]
pub struct LodInstance {
    id: LodInstanceId,
    level: LodLevel,
    state: LodState,
    asset: Option<Arc<LodAsset>>,
    /// Build attempts so far
    attempts: u32,
}

impl LodInstance {
    pub fn new(id: LodInstanceId, level: LodLevel) -> Self {
        LodInstance {
            id,
            level,
            state: LodState::Requested,
            asset: None,
            attempts: 0,
        }
    }

    pub(crate) fn transition(&mut self, to: LodState) {
        debug_assert!(
            self.state.can_transition(to),
            "illegal LOD transition {:?} -> {:?}",
            self.state,
            to
        );
        self.state = to;
        if to == LodState::Destroyed {
            self.asset = None;
        }
    }

    pub(crate) fn set_asset(&mut self, asset: LodAsset) {
        self.asset = Some(Arc::new(asset));
    }

    pub(crate) fn record_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub(crate) fn undo_attempt(&mut self) {
        self.attempts = self.attempts.saturating_sub(1);
    }

    pub fn id(&self) -> LodInstanceId {
        self.id
    }

    pub fn level(&self) -> LodLevel {
        self.level
    }

    pub fn state(&self) -> LodState {
        self.state
    }

    pub fn asset(&self) -> Option<&Arc<LodAsset>> {
        self.asset.as_ref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        use LodState::*;
        assert!(Requested.can_transition(Building));
        assert!(Building.can_transition(Ready));
        assert!(Ready.can_transition(Active));
        assert!(Active.can_transition(Retiring));
        assert!(Retiring.can_transition(Destroyed));
        assert!(Building.can_transition(Destroyed));
    }

    #[test]
    fn test_illegal_transitions() {
        use LodState::*;
        assert!(!Requested.can_transition(Active));
        assert!(!Building.can_transition(Active));
        assert!(!Destroyed.can_transition(Requested));
        assert!(!Retiring.can_transition(Active));
    }

    #[test]
    fn test_destroy_releases_asset() {
        let mut instance = LodInstance::new(LodInstanceId::new(1), LodLevel::Lod1);
        instance.transition(LodState::Building);
        instance.set_asset(LodAsset::for_level(LodLevel::Lod1));
        instance.transition(LodState::Destroyed);
        assert!(instance.asset().is_none());
    }
}
