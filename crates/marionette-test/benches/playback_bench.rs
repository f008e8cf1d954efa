//! Benchmarks for playback buffering and the per-frame node loop

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use glam::Vec3;
use marionette_core::{DetailLevel, MotionTime, PeerId};
use marionette_lod::CameraView;
use marionette_runtime::{MarionetteConfig, ReplicationNode};
use marionette_test::scripted_pose;
use marionette_time::{PlaybackBuffer, PlaybackConfig};
use marionette_transport::LoopbackHub;
use marionette_wire::Snapshot;

const FRAME: f64 = 1.0 / 60.0;

fn snapshots(count: usize) -> Vec<Arc<Snapshot>> {
    (0..count)
        .map(|i| {
            let t = i as f64 * 0.05;
            Arc::new(Snapshot::capture(
                &scripted_pose(0, t),
                DetailLevel::FullBone,
                MotionTime::from_secs_f64(t),
            ))
        })
        .collect()
}

fn bench_playback_tick(c: &mut Criterion) {
    let feed = snapshots(32);

    c.bench_function("playback_tick_steady", |b| {
        b.iter_batched(
            || {
                let mut buffer = PlaybackBuffer::new(PlaybackConfig::default());
                for snapshot in &feed {
                    buffer.enqueue(Arc::clone(snapshot));
                }
                buffer
            },
            |mut buffer| {
                for _ in 0..60 {
                    black_box(buffer.tick(FRAME));
                }
                buffer
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_playback_enqueue(c: &mut Criterion) {
    let feed = snapshots(256);

    c.bench_function("playback_enqueue_overflow", |b| {
        b.iter_batched(
            || PlaybackBuffer::new(PlaybackConfig::default()),
            |mut buffer| {
                for snapshot in &feed {
                    black_box(buffer.enqueue(Arc::clone(snapshot)));
                }
                buffer
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_node_tick(c: &mut Criterion) {
    let hub = LoopbackHub::new();
    let mut config = MarionetteConfig::default();
    config.recorder.record_interval = FRAME;
    let Ok(mut node) = ReplicationNode::new(hub.endpoint(PeerId::new(1)), config) else {
        return;
    };
    let _ = node.add_local_avatar();
    for peer in 2..34 {
        let _ = node.add_remote_avatar(PeerId::new(peer));
    }
    let camera = CameraView::look_at(
        Vec3::new(0.0, 1.6, 3.0),
        Vec3::new(0.0, 1.0, 0.0),
        std::f32::consts::FRAC_PI_2,
        16.0 / 9.0,
        0.1,
        500.0,
    );

    c.bench_function("node_tick_33_avatars", |b| {
        b.iter(|| {
            node.tick(FRAME, &camera);
            black_box(node.stats().frames)
        })
    });
}

criterion_group!(
    benches,
    bench_playback_tick,
    bench_playback_enqueue,
    bench_node_tick
);
criterion_main!(benches);
