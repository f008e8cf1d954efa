//! Multi-peer session simulator
//!
//! Every peer runs a real `ReplicationNode` over a `NetworkSimulator`
//! endpoint, authors one scripted avatar, and replays everyone else's.

use std::time::{Duration, Instant};

use glam::{Quat, Vec3};
use marionette_core::{AvatarEvent, AvatarId, MarionetteResult, PeerId};
use marionette_lod::CameraView;
use marionette_runtime::{MarionetteConfig, ReplicationNode, RuntimeStats};
use marionette_skeleton::{Joint, JointTransform, SkeletonState};
use marionette_time::PlaybackStatus;
use tracing::debug;

use crate::chaos::{ChaosConfig, ChaosStats};
use crate::simulator::{ChaosEndpoint, NetworkSimulator};

/// Session parameters
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub peer_count: usize,
    /// Simulated frame length
    pub frame: Duration,
    pub chaos: ChaosConfig,
    pub seed: u64,
    pub node: MarionetteConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            peer_count: 2,
            frame: Duration::from_micros(16_667),
            chaos: ChaosConfig::perfect(),
            seed: 1,
            node: MarionetteConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_peers(mut self, count: usize) -> Self {
        self.peer_count = count;
        self
    }

    pub fn with_chaos(mut self, chaos: ChaosConfig, seed: u64) -> Self {
        self.chaos = chaos;
        self.seed = seed;
        self
    }

    pub fn with_node_config(mut self, node: MarionetteConfig) -> Self {
        self.node = node;
        self
    }
}

/// Pose authored by peer `index` at `t` seconds: a sway and a knee bend
pub fn scripted_pose(index: usize, t: f64) -> SkeletonState {
    let phase = index as f64 * 0.7;
    let sway = (t * std::f64::consts::TAU * 0.5 + phase).sin() as f32;

    let mut pose = SkeletonState::rest_pose();
    pose.root = JointTransform::from_position(Vec3::new(index as f32 * 0.8 + 0.4 * sway, 0.0, 0.0));
    if let Some(knee) = pose.joint(Joint::LeftKnee).copied() {
        pose.set_joint(
            Joint::LeftKnee,
            JointTransform::new(knee.position, Quat::from_rotation_x(0.6 * sway)),
        );
    }
    pose
}

/// What a run produced
#[derive(Clone, Debug, Default)]
pub struct SessionReport {
    pub frames: u64,
    /// Sender clock minus playback time, over steady remote avatars
    pub max_playback_lag: Duration,
    pub mean_playback_lag: Duration,
    pub starved_events: u64,
    pub removed_events: u64,
    /// Largest root distance from the sender's pose at the playback time
    pub max_pose_error: f32,
    pub non_finite_poses: u64,
    pub network: ChaosStats,
    pub node_stats: Vec<RuntimeStats>,
}

struct SimPeer {
    index: usize,
    node: ReplicationNode<ChaosEndpoint>,
    local: AvatarId,
    camera: CameraView,
}

pub struct SessionSimulator {
    config: SessionConfig,
    network: NetworkSimulator,
    peers: Vec<SimPeer>,
    frames: u64,
    lag_total: Duration,
    lag_samples: u64,
    report: SessionReport,
}

impl SessionSimulator {
    pub fn new(config: SessionConfig) -> MarionetteResult<Self> {
        let network = NetworkSimulator::new(config.chaos.clone(), config.seed);
        let ids: Vec<PeerId> = (0..config.peer_count)
            .map(|i| PeerId::new(i as u64 + 1))
            .collect();

        let mut peers = Vec::with_capacity(ids.len());
        for (index, &id) in ids.iter().enumerate() {
            let mut node = ReplicationNode::new(network.endpoint(id), config.node.clone())?;
            let local = node.add_local_avatar()?;
            let others: Vec<PeerId> = ids.iter().copied().filter(|p| *p != id).collect();
            for &other in &others {
                node.add_remote_avatar(other)?;
            }
            node.set_subscribers(others);

            let eye = Vec3::new(ids.len() as f32 * 0.4, 1.6, 4.0);
            let camera = CameraView::look_at(
                eye,
                Vec3::new(ids.len() as f32 * 0.4, 1.0, 0.0),
                std::f32::consts::FRAC_PI_2,
                16.0 / 9.0,
                0.1,
                500.0,
            );
            peers.push(SimPeer {
                index,
                node,
                local,
                camera,
            });
        }

        Ok(SessionSimulator {
            config,
            network,
            peers,
            frames: 0,
            lag_total: Duration::ZERO,
            lag_samples: 0,
            report: SessionReport::default(),
        })
    }

    /// Tick without advancing time until every avatar on every node has an
    /// active LOD level
    pub fn wait_until_ready(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            for peer in &mut self.peers {
                peer.node.tick(0.0, &peer.camera);
            }
            self.collect_events();
            let ready = self.peers.iter().all(|p| {
                p.node
                    .avatars()
                    .iter()
                    .all(|h| h.lod().active_level().is_some())
            });
            if ready {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    /// Run one frame on every peer
    pub fn step(&mut self) {
        let dt = self.config.frame;
        self.frames += 1;

        for peer in &mut self.peers {
            let t = peer.node.now().as_secs_f64() + dt.as_secs_f64();
            if let Some(skeleton) = peer.node.local_skeleton_mut() {
                *skeleton = scripted_pose(peer.index, t);
            }
            peer.node.tick(dt.as_secs_f64(), &peer.camera);
        }
        self.network.advance(dt);

        self.collect_events();
        self.measure();
    }

    pub fn run_for(&mut self, duration: Duration) {
        let frames = (duration.as_secs_f64() / self.config.frame.as_secs_f64()).ceil() as u64;
        for _ in 0..frames {
            self.step();
        }
    }

    fn collect_events(&mut self) {
        for peer in &mut self.peers {
            for event in peer.node.drain_events() {
                match event {
                    AvatarEvent::PlaybackStarved(_) => self.report.starved_events += 1,
                    AvatarEvent::AvatarRemoved(_) => self.report.removed_events += 1,
                    _ => {}
                }
            }
        }
    }

    fn measure(&mut self) {
        for peer in &self.peers {
            let now = peer.node.now();
            for handle in peer.node.avatars() {
                if !handle.skeleton().is_finite() {
                    self.report.non_finite_poses += 1;
                }
                let Some(buffer) = peer.node.playback(handle.id()) else {
                    continue;
                };
                if buffer.status() != PlaybackStatus::Steady {
                    continue;
                }
                let Some(playback_time) = buffer.playback_time() else {
                    continue;
                };

                let lag = now - playback_time;
                self.lag_total += lag;
                self.lag_samples += 1;
                self.report.max_playback_lag = self.report.max_playback_lag.max(lag);

                let sender = (handle.owner().0 as usize).saturating_sub(1);
                let expected = scripted_pose(sender, playback_time.as_secs_f64());
                let error = handle.skeleton().root.position.distance(expected.root.position);
                self.report.max_pose_error = self.report.max_pose_error.max(error);
            }
        }
    }

    /// Remove peer `index` from the session; the others unload its avatar
    pub fn disconnect_peer(&mut self, index: usize) {
        let Some(pos) = self.peers.iter().position(|p| p.index == index) else {
            return;
        };
        let gone = self.peers.remove(pos);
        let gone_peer = gone.node.local_peer();
        self.network.disconnect(gone_peer);
        debug!(peer = ?gone_peer, "peer left the session");

        for peer in &mut self.peers {
            let remote = AvatarId::from_owner_index(gone_peer, 0);
            let _ = peer.node.remove_avatar(remote);
        }
    }

    /// Avatar authored by peer `index`
    pub fn local_avatar(&self, index: usize) -> Option<AvatarId> {
        self.peers.iter().find(|p| p.index == index).map(|p| p.local)
    }

    pub fn node(&self, index: usize) -> Option<&ReplicationNode<ChaosEndpoint>> {
        self.peers
            .iter()
            .find(|p| p.index == index)
            .map(|p| &p.node)
    }

    pub fn node_mut(&mut self, index: usize) -> Option<&mut ReplicationNode<ChaosEndpoint>> {
        self.peers
            .iter_mut()
            .find(|p| p.index == index)
            .map(|p| &mut p.node)
    }

    /// Move peer `index`'s viewpoint
    pub fn set_camera(&mut self, index: usize, camera: CameraView) {
        if let Some(peer) = self.peers.iter_mut().find(|p| p.index == index) {
            peer.camera = camera;
        }
    }

    pub fn network(&self) -> &NetworkSimulator {
        &self.network
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Clear lag and error measurements, e.g. after warm-up
    pub fn reset_measurements(&mut self) {
        self.lag_total = Duration::ZERO;
        self.lag_samples = 0;
        self.report.max_playback_lag = Duration::ZERO;
        self.report.max_pose_error = 0.0;
        self.report.starved_events = 0;
    }

    pub fn report(&self) -> SessionReport {
        let mut report = self.report.clone();
        report.frames = self.frames;
        if self.lag_samples > 0 {
            report.mean_playback_lag = self.lag_total / self.lag_samples as u32;
        }
        report.network = self.network.total_stats();
        report.node_stats = self.peers.iter().map(|p| p.node.stats().clone()).collect();
        report
    }
}

impl Drop for SessionSimulator {
    fn drop(&mut self) {
        for peer in &mut self.peers {
            peer.node.shutdown();
        }
    }
}
