//! Asynchronous LOD builds
//!
//! The control thread submits `BuildRequest`s; worker threads run the
//! configured `LodBuilder` and push `BuildResult`s back over a channel that
//! the control thread drains once per frame. Workers never touch avatar
//! state.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use marionette_core::{AvatarId, LodInstanceId, LodLevel};
use marionette_skeleton::Joint;
use thiserror::Error;
use tracing::warn;

/// Why a build did not produce an asset
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LodBuildError {
    #[error("source asset unavailable: {0}")]
    SourceUnavailable(String),

    #[error("build failed: {0}")]
    Failed(String),
}

/// The product of a build: the bone layout recomputed at this level
#[derive(Clone, Debug, PartialEq)]
pub struct LodAsset {
    pub level: LodLevel,
    /// Bones recomputed each pass, parents first
    pub bones: Vec<Joint>,
    /// Padding added to pose bounds for culling, metres
    pub bounds_padding: f32,
}

impl LodAsset {
    /// Standard bone layout for a level
    pub fn for_level(level: LodLevel) -> Self {
        use Joint::*;
        let bones: Vec<Joint> = match level {
            LodLevel::Lod0 => Joint::all().to_vec(),
            LodLevel::Lod1 => Joint::all()
                .iter()
                .copied()
                .filter(|j| !matches!(j, LeftFoot | RightFoot))
                .collect(),
            LodLevel::Lod2 => vec![
                Hips,
                Spine,
                Chest,
                Neck,
                Head,
                LeftShoulder,
                LeftElbow,
                RightShoulder,
                RightElbow,
                LeftHip,
                LeftKnee,
                RightHip,
                RightKnee,
            ],
            LodLevel::Lod3 => vec![Hips, Spine, Chest, Neck, Head],
        };
        LodAsset {
            level,
            bones,
            bounds_padding: 0.15 + 0.1 * level.index() as f32,
        }
    }

    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }
}

/// Produces the asset for one detail level
pub trait LodBuilder: Send + Sync {
    fn build(&self, request: &BuildRequest) -> Result<LodAsset, LodBuildError>;
}

/// Builder that derives the standard bone layout for each level
#[derive(Clone, Copy, Debug, Default)]
pub struct SkeletalLodBuilder;

impl LodBuilder for SkeletalLodBuilder {
    fn build(&self, request: &BuildRequest) -> Result<LodAsset, LodBuildError> {
        Ok(LodAsset::for_level(request.level))
    }
}

/// One build job
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuildRequest {
    pub avatar: AvatarId,
    pub instance: LodInstanceId,
    pub level: LodLevel,
    /// 1 for the first attempt
    pub attempt: u32,
}

/// Completed build, successful or not
#[derive(Clone, Debug)]
pub struct BuildResult {
    pub avatar: AvatarId,
    pub instance: LodInstanceId,
    pub level: LodLevel,
    pub outcome: Result<LodAsset, LodBuildError>,
}

impl BuildResult {
    /// Run `builder` synchronously on the calling thread
    ///
    /// A panicking builder yields a `Failed` outcome.
    pub fn run(builder: &dyn LodBuilder, request: BuildRequest) -> Self {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| builder.build(&request)))
            .unwrap_or_else(|payload| {
                let reason = panic_message(payload.as_ref());
                warn!(avatar = ?request.avatar, level = ?request.level, %reason, "LOD builder panicked");
                Err(LodBuildError::Failed(format!("builder panicked: {}", reason)))
            });
        BuildResult {
            avatar: request.avatar,
            instance: request.instance,
            level: request.level,
            outcome,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Worker pool running LOD builds off the control thread
pub struct LodBuildPipeline {
    task_sender: Option<crossbeam_channel::Sender<BuildRequest>>,
    result_receiver: crossbeam_channel::Receiver<BuildResult>,
    worker_handles: Vec<JoinHandle<()>>,
    /// Maximum in-flight builds
    budget: usize,
    in_flight: Arc<AtomicUsize>,
}

impl LodBuildPipeline {
    pub fn new(worker_count: usize, budget: usize, builder: Arc<dyn LodBuilder>) -> Self {
        let budget = budget.max(1);
        let (task_tx, task_rx) = crossbeam_channel::bounded::<BuildRequest>(budget);
        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        let in_flight = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(worker_count.max(1));
        for _ in 0..worker_count.max(1) {
            let rx = task_rx.clone();
            let tx = result_tx.clone();
            let builder = Arc::clone(&builder);
            let flight = Arc::clone(&in_flight);

            handles.push(std::thread::spawn(move || {
                while let Ok(request) = rx.recv() {
                    let result = BuildResult::run(builder.as_ref(), request);
                    flight.fetch_sub(1, Ordering::Relaxed);
                    if tx.send(result).is_err() {
                        warn!(avatar = ?request.avatar, "LOD result channel closed");
                    }
                }
            }));
        }

        LodBuildPipeline {
            task_sender: Some(task_tx),
            result_receiver: result_rx,
            worker_handles: handles,
            budget,
            in_flight,
        }
    }

    /// Queue a build. Returns `false` if the budget is exhausted or the
    /// pipeline has shut down.
    pub fn submit(&self, request: BuildRequest) -> bool {
        let Some(sender) = &self.task_sender else {
            return false;
        };
        if self.in_flight.load(Ordering::Relaxed) >= self.budget {
            return false;
        }
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        if sender.send(request).is_err() {
            self.in_flight.fetch_sub(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Drain completed builds. Called once per frame on the control thread.
    pub fn drain_results(&self) -> Vec<BuildResult> {
        self.result_receiver.try_iter().collect()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Stop accepting work and join the workers
    pub fn shutdown(&mut self) {
        self.task_sender.take();
        for handle in self.worker_handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for LodBuildPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
