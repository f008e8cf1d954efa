//! Passive delay and jitter estimation from snapshot arrivals

use std::collections::VecDeque;

/// Per-sender arrival statistics
///
/// Fed with `(local arrival, source timestamp)` pairs. The offset between
/// the two clocks is unknown, so only its median and the spread around it
/// are meaningful.
#[derive(Clone, Debug)]
pub struct DelayEstimator {
    /// Median of (local - source), seconds
    offset: f64,
    /// Max deviation from the median offset, seconds
    jitter_envelope: f64,
    /// Smoothed spacing between consecutive source timestamps, seconds
    mean_interval: f64,
    samples: VecDeque<f64>,
    last_source: Option<f64>,
    max_samples: usize,
}

impl DelayEstimator {
    /// Samples needed before the estimates are trusted
    pub const MIN_SAMPLES: usize = 5;

    const INTERVAL_SMOOTHING: f64 = 0.1;

    pub fn new() -> Self {
        Self::with_window(64)
    }

    pub fn with_window(max_samples: usize) -> Self {
        DelayEstimator {
            offset: 0.0,
            jitter_envelope: 0.0,
            mean_interval: 0.0,
            samples: VecDeque::with_capacity(max_samples),
            last_source: None,
            max_samples: max_samples.max(Self::MIN_SAMPLES),
        }
    }

    /// Record one arrival
    pub fn update(&mut self, local_secs: f64, source_secs: f64) {
        if !local_secs.is_finite() || !source_secs.is_finite() {
            return;
        }

        self.samples.push_back(local_secs - source_secs);
        if self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }

        if let Some(last) = self.last_source {
            let interval = source_secs - last;
            if interval > 0.0 {
                self.mean_interval = if self.mean_interval == 0.0 {
                    interval
                } else {
                    self.mean_interval * (1.0 - Self::INTERVAL_SMOOTHING)
                        + interval * Self::INTERVAL_SMOOTHING
                };
            }
        }
        self.last_source = Some(self.last_source.map_or(source_secs, |l| l.max(source_secs)));

        if self.is_warm() {
            self.offset = median(&self.samples);
            self.jitter_envelope = self
                .samples
                .iter()
                .map(|s| (s - self.offset).abs())
                .fold(0.0, f64::max);
        }
    }

    pub fn is_warm(&self) -> bool {
        self.samples.len() >= Self::MIN_SAMPLES
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn jitter_envelope(&self) -> f64 {
        self.jitter_envelope
    }

    pub fn mean_interval(&self) -> f64 {
        self.mean_interval
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn reset(&mut self) {
        *self = Self::with_window(self.max_samples);
    }
}

impl Default for DelayEstimator {
    fn default() -> Self {
        Self::new()
    }
}

fn median(values: &VecDeque<f64>) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().collect();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
