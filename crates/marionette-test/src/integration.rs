//! End-to-end replication scenarios
//!
//! Each scenario builds a session, warms it up until every LOD is active,
//! runs it, and checks the report against the scenario's expectations.

use std::time::Duration;

use marionette_core::MarionetteResult;
use marionette_runtime::MarionetteConfig;

use crate::chaos::ChaosConfig;
use crate::session::{SessionConfig, SessionReport, SessionSimulator};

/// Scenario parameters
#[derive(Debug, Clone)]
pub struct IntegrationTestConfig {
    pub session: SessionConfig,
    /// Run before measurements start
    pub warmup: Duration,
    pub duration: Duration,
    /// Wall-clock limit for asynchronous LOD builds
    pub ready_timeout: Duration,
}

impl Default for IntegrationTestConfig {
    fn default() -> Self {
        IntegrationTestConfig {
            session: SessionConfig::default(),
            warmup: Duration::from_secs(2),
            duration: Duration::from_secs(3),
            ready_timeout: Duration::from_secs(10),
        }
    }
}

impl IntegrationTestConfig {
    /// Two peers, ideal network
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Four peers over a good network
    pub fn standard(seed: u64) -> Self {
        IntegrationTestConfig {
            session: SessionConfig::default()
                .with_peers(4)
                .with_chaos(ChaosConfig::good(), seed),
            duration: Duration::from_secs(5),
            ..Self::default()
        }
    }

    /// Three peers over a hostile network with deeper buffering
    pub fn stress(seed: u64) -> Self {
        IntegrationTestConfig {
            session: SessionConfig::default()
                .with_peers(3)
                .with_chaos(ChaosConfig::hostile(), seed)
                .with_node_config(MarionetteConfig::low_bandwidth()),
            duration: Duration::from_secs(10),
            ..Self::default()
        }
    }
}

/// Outcome of a scenario run
#[derive(Debug, Clone)]
pub struct IntegrationTestResult {
    pub ready: bool,
    pub report: SessionReport,
}

impl IntegrationTestResult {
    /// Every avatar came up and no pose was ever corrupted
    pub fn passed(&self) -> bool {
        self.ready && self.report.non_finite_poses == 0 && self.total_malformed() == 0
    }

    pub fn total_malformed(&self) -> u64 {
        self.report.node_stats.iter().map(|s| s.malformed).sum()
    }

    pub fn total_packets_in(&self) -> u64 {
        self.report.node_stats.iter().map(|s| s.packets_in).sum()
    }
}

/// Run one scenario to completion
pub fn run_scenario(config: &IntegrationTestConfig) -> MarionetteResult<IntegrationTestResult> {
    let mut sim = SessionSimulator::new(config.session.clone())?;
    let ready = sim.wait_until_ready(config.ready_timeout);

    sim.run_for(config.warmup);
    sim.reset_measurements();
    sim.run_for(config.duration);

    Ok(IntegrationTestResult {
        ready,
        report: sim.report(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use marionette_core::{AvatarId, DetailLevel, LodLevel, PeerId};
    use marionette_lod::CameraView;

    #[test]
    fn test_ideal_network_tracks_sender() {
        let result = run_scenario(&IntegrationTestConfig::minimal()).unwrap();
        let report = &result.report;

        assert!(result.passed(), "{:?}", report);
        assert_eq!(report.starved_events, 0);
        // Target delay plus up to one record interval and a frame of transit
        assert!(report.mean_playback_lag >= Duration::from_millis(80));
        assert!(report.mean_playback_lag <= Duration::from_millis(200));
        assert!(report.max_playback_lag <= Duration::from_millis(300));
        assert!(report.max_pose_error < 0.05, "pose error {}", report.max_pose_error);
    }

    #[test]
    fn test_good_network_four_peers() {
        let result = run_scenario(&IntegrationTestConfig::standard(7)).unwrap();
        let report = &result.report;

        assert!(result.passed(), "{:?}", report);
        assert_eq!(report.node_stats.len(), 4);
        assert!(report
            .node_stats
            .iter()
            .all(|s| s.packets_in > 0 && s.packets_out > 0));
        assert!(report.max_playback_lag <= Duration::from_millis(500));
        assert!(report.max_pose_error < 0.2, "pose error {}", report.max_pose_error);
    }

    #[test]
    fn test_hostile_network_degrades_without_breaking() {
        let result = run_scenario(&IntegrationTestConfig::stress(3)).unwrap();
        let report = &result.report;

        assert!(result.passed(), "{:?}", report);
        assert!(report.network.packets_lost > 0);
        assert!(report.starved_events > 0);
        // Nothing is delivered twice into a node beyond what the network duplicated
        assert!(
            result.total_packets_in()
                <= report.network.packets_sent + report.network.packets_duplicated
        );
    }

    #[test]
    fn test_adaptive_delay_grows_with_jitter() {
        let mut node = MarionetteConfig::default();
        node.playback.adaptive_delay = true;
        node.playback.target_delay = 0.05;
        node.playback.max_target_delay = 0.6;
        let config = SessionConfig::default()
            .with_chaos(ChaosConfig::poor(), 11)
            .with_node_config(node);

        let mut sim = SessionSimulator::new(config).unwrap();
        assert!(sim.wait_until_ready(Duration::from_secs(10)));
        sim.run_for(Duration::from_secs(8));

        let remote = AvatarId::from_owner_index(PeerId::new(2), 0);
        let buffer = sim.node(0).unwrap().playback(remote).unwrap();
        let target = buffer.effective_target_delay();
        assert!(target > Duration::from_millis(50), "target {:?}", target);
        assert!(target <= Duration::from_millis(600));
    }

    #[test]
    fn test_departed_peer_is_unloaded() {
        let mut sim = SessionSimulator::new(SessionConfig::default().with_peers(3)).unwrap();
        assert!(sim.wait_until_ready(Duration::from_secs(10)));
        sim.run_for(Duration::from_secs(1));

        sim.disconnect_peer(2);
        sim.run_for(Duration::from_secs(1));

        let report = sim.report();
        assert_eq!(sim.peer_count(), 2);
        assert_eq!(report.removed_events, 2);
        let gone = AvatarId::from_owner_index(PeerId::new(3), 0);
        assert!(sim.node(0).unwrap().avatar(gone).is_none());
        assert!(sim.node(1).unwrap().avatar(gone).is_none());
        // Still replicating between the remaining pair
        assert!(report.max_pose_error < 0.05);
    }

    #[test]
    fn test_far_camera_coarsens_remote_avatar() {
        let mut sim = SessionSimulator::new(SessionConfig::default()).unwrap();
        assert!(sim.wait_until_ready(Duration::from_secs(10)));

        let far = CameraView::look_at(
            Vec3::new(0.0, 1.6, 120.0),
            Vec3::new(0.0, 1.0, 0.0),
            std::f32::consts::FRAC_PI_3,
            16.0 / 9.0,
            0.1,
            500.0,
        );
        sim.set_camera(0, far);

        let remote = AvatarId::from_owner_index(PeerId::new(2), 0);
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        let mut coarse = false;
        while std::time::Instant::now() < deadline && !coarse {
            sim.step();
            coarse = sim
                .node(0)
                .and_then(|n| n.avatar(remote))
                .map_or(false, |h| h.lod().active_level() == Some(LodLevel::Lod3));
            std::thread::sleep(Duration::from_millis(1));
        }
        sim.step();

        assert!(coarse);
        let handle = sim.node(0).unwrap().avatar(remote).unwrap();
        assert_eq!(handle.detail_cap(), DetailLevel::BoneOnly);
    }
}
