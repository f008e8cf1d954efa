//! Chaos network
//!
//! Simulates hostile links between peers:
//! - Latency and jitter
//! - Random and burst loss
//! - Reordering
//! - Duplication
//!
//! Time is virtual and only moves when `tick` is called, so a run with a
//! given seed is fully reproducible.

use std::time::Duration;

use bytes::Bytes;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Jitter added on top of the base latency
#[derive(Clone, Debug)]
pub enum JitterDistribution {
    None,
    Uniform { min_ms: u32, max_ms: u32 },
    /// Box-Muller sampled; negative draws clamp to zero
    Normal { mean_ms: f64, stddev_ms: f64 },
    /// Heavy tail, capped at one second
    Pareto { scale_ms: f64, shape: f64 },
}

impl JitterDistribution {
    pub fn sample(&self, rng: &mut StdRng) -> Duration {
        match self {
            JitterDistribution::None => Duration::ZERO,
            JitterDistribution::Uniform { min_ms, max_ms } => {
                if max_ms <= min_ms {
                    return Duration::from_millis(*min_ms as u64);
                }
                let dist = Uniform::new(*min_ms, *max_ms);
                Duration::from_millis(dist.sample(rng) as u64)
            }
            JitterDistribution::Normal { mean_ms, stddev_ms } => {
                let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
                let u2: f64 = rng.gen();
                let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
                Duration::from_micros(((mean_ms + stddev_ms * z).max(0.0) * 1000.0) as u64)
            }
            JitterDistribution::Pareto { scale_ms, shape } => {
                let u: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
                let value = scale_ms / u.powf(1.0 / shape);
                Duration::from_micros((value.min(1000.0) * 1000.0) as u64)
            }
        }
    }
}

/// Link conditions
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    pub base_latency: Duration,
    pub jitter: JitterDistribution,
    /// Independent loss probability (0.0 - 1.0)
    pub loss_rate: f64,
    /// Probability that a send starts a loss burst
    pub burst_loss_prob: f64,
    /// Burst length range, in packets
    pub burst_length: (u32, u32),
    pub reorder_prob: f64,
    /// How many queued packets a reordered one may overtake
    pub reorder_depth: u32,
    pub duplicate_prob: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(50),
            jitter: JitterDistribution::Uniform {
                min_ms: 0,
                max_ms: 50,
            },
            loss_rate: 0.01,
            burst_loss_prob: 0.01,
            burst_length: (2, 5),
            reorder_prob: 0.05,
            reorder_depth: 3,
            duplicate_prob: 0.01,
        }
    }
}

impl ChaosConfig {
    /// Zero latency, nothing lost
    pub fn perfect() -> Self {
        ChaosConfig {
            base_latency: Duration::ZERO,
            jitter: JitterDistribution::None,
            loss_rate: 0.0,
            burst_loss_prob: 0.0,
            burst_length: (0, 0),
            reorder_prob: 0.0,
            reorder_depth: 0,
            duplicate_prob: 0.0,
        }
    }

    /// Home broadband
    pub fn good() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(20),
            jitter: JitterDistribution::Uniform {
                min_ms: 0,
                max_ms: 10,
            },
            loss_rate: 0.001,
            burst_loss_prob: 0.001,
            burst_length: (1, 2),
            reorder_prob: 0.01,
            reorder_depth: 2,
            duplicate_prob: 0.001,
        }
    }

    /// Congested wifi
    pub fn poor() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(80),
            jitter: JitterDistribution::Pareto {
                scale_ms: 20.0,
                shape: 1.5,
            },
            loss_rate: 0.05,
            burst_loss_prob: 0.02,
            burst_length: (3, 8),
            reorder_prob: 0.1,
            reorder_depth: 5,
            duplicate_prob: 0.02,
        }
    }

    /// Mobile network at the cell edge
    pub fn hostile() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(200),
            jitter: JitterDistribution::Pareto {
                scale_ms: 60.0,
                shape: 1.2,
            },
            loss_rate: 0.15,
            burst_loss_prob: 0.05,
            burst_length: (5, 15),
            reorder_prob: 0.2,
            reorder_depth: 10,
            duplicate_prob: 0.05,
        }
    }
}

/// Packet in flight
#[derive(Clone, Debug)]
pub struct ChaosPacket {
    pub data: Bytes,
    pub delivery_time: Duration,
    pub send_time: Duration,
    pub seq: u64,
}

#[derive(Clone, Debug, Default)]
pub struct ChaosStats {
    pub packets_sent: u64,
    pub packets_delivered: u64,
    pub packets_lost: u64,
    pub packets_reordered: u64,
    pub packets_duplicated: u64,
    pub total_latency_ms: u64,
    pub max_latency_ms: u64,
}

impl ChaosStats {
    pub fn loss_rate(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.packets_lost as f64 / self.packets_sent as f64
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.packets_delivered == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.packets_delivered as f64
        }
    }
}

/// One directed lossy link
pub struct ChaosNetwork {
    config: ChaosConfig,
    rng: StdRng,
    /// Delivery order; a reordered packet sits ahead of older ones
    in_flight: Vec<ChaosPacket>,
    current_time: Duration,
    burst_remaining: u32,
    next_seq: u64,
    stats: ChaosStats,
}

impl ChaosNetwork {
    pub fn new(config: ChaosConfig, seed: u64) -> Self {
        ChaosNetwork {
            config,
            rng: StdRng::seed_from_u64(seed),
            in_flight: Vec::new(),
            current_time: Duration::ZERO,
            burst_remaining: 0,
            next_seq: 0,
            stats: ChaosStats::default(),
        }
    }

    /// Put a packet on the link
    pub fn send(&mut self, data: Bytes) {
        self.stats.packets_sent += 1;
        let seq = self.next_seq;
        self.next_seq += 1;

        if self.should_drop() {
            self.stats.packets_lost += 1;
            return;
        }

        let latency = self.config.base_latency + self.config.jitter.sample(&mut self.rng);
        let delivery_time = self.current_time + latency;
        let packet = ChaosPacket {
            data: data.clone(),
            delivery_time,
            send_time: self.current_time,
            seq,
        };

        if self.rng.gen::<f64>() < self.config.reorder_prob && !self.in_flight.is_empty() {
            let depth = self.config.reorder_depth.min(self.in_flight.len() as u32);
            let overtake = self.rng.gen_range(0..=depth) as usize;
            let at = self.in_flight.len() - overtake;
            self.in_flight.insert(at, packet);
            self.stats.packets_reordered += 1;
        } else {
            self.in_flight.push(packet);
        }

        if self.rng.gen::<f64>() < self.config.duplicate_prob {
            let extra = self.config.jitter.sample(&mut self.rng);
            self.in_flight.push(ChaosPacket {
                data,
                delivery_time: delivery_time + extra,
                send_time: self.current_time,
                seq,
            });
            self.stats.packets_duplicated += 1;
        }
    }

    fn should_drop(&mut self) -> bool {
        if self.burst_remaining > 0 {
            self.burst_remaining -= 1;
            return true;
        }

        if self.rng.gen::<f64>() < self.config.burst_loss_prob {
            let (min, max) = self.config.burst_length;
            // This packet is the first of the burst
            self.burst_remaining = self.rng.gen_range(min..=max.max(min)).saturating_sub(1);
            return true;
        }

        self.rng.gen::<f64>() < self.config.loss_rate
    }

    /// Advance virtual time and collect every packet now due
    pub fn tick(&mut self, dt: Duration) -> Vec<Bytes> {
        self.current_time += dt;
        let now = self.current_time;

        let mut delivered = Vec::new();
        let mut waiting = Vec::with_capacity(self.in_flight.len());
        for packet in self.in_flight.drain(..) {
            if packet.delivery_time > now {
                waiting.push(packet);
                continue;
            }
            let latency = (packet.delivery_time - packet.send_time).as_millis() as u64;
            self.stats.packets_delivered += 1;
            self.stats.total_latency_ms += latency;
            self.stats.max_latency_ms = self.stats.max_latency_ms.max(latency);
            delivered.push(packet.data);
        }
        self.in_flight = waiting;

        delivered
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> &ChaosStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = ChaosStats::default();
    }

    pub fn current_time(&self) -> Duration {
        self.current_time
    }

    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }
}
