//! Parallel phase execution
//!
//! Each phase runs one closure per avatar on a rayon pool. Collecting the
//! results is the join barrier: `run` returns only once every unit of the
//! phase has finished, so no avatar starts phase k+1 before all finish k.

use std::fmt;
use std::time::{Duration, Instant};

use marionette_core::{AvatarId, MarionetteError, MarionetteResult};
use rayon::prelude::*;
use tracing::{debug, warn};

/// The three ordered per-frame phases
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    PreUpdate,
    CoreRecompute,
    PostUpdate,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::PreUpdate, Phase::CoreRecompute, Phase::PostUpdate];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::PreUpdate => "pre-update",
            Phase::CoreRecompute => "core-recompute",
            Phase::PostUpdate => "post-update",
        };
        f.write_str(name)
    }
}

/// Something a phase can run against
pub trait PhaseUnit: Send {
    fn avatar(&self) -> AvatarId;
}

/// One unit's result, returned to the control thread
#[derive(Debug)]
pub struct UnitOutcome<T> {
    pub avatar: AvatarId,
    pub result: MarionetteResult<T>,
}

/// All outcomes of one phase
#[derive(Debug)]
pub struct PhaseReport<T> {
    pub phase: Phase,
    pub outcomes: Vec<UnitOutcome<T>>,
    pub elapsed: Duration,
}

impl<T> PhaseReport<T> {
    pub fn failures(&self) -> impl Iterator<Item = (AvatarId, &MarionetteError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.avatar, e)))
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }
}

/// Runs phases on a dedicated rayon pool
pub struct PhaseExecutor {
    pool: rayon::ThreadPool,
}

impl PhaseExecutor {
    /// `threads == 0` sizes the pool to the machine
    pub fn new(threads: usize) -> MarionetteResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("marionette-phase-{}", i))
            .build()
            .map_err(|e| MarionetteError::InvalidConfig(e.to_string()))?;
        Ok(PhaseExecutor { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `work` for every unit and wait for all of them
    pub fn run<U, T, F>(&self, phase: Phase, units: &mut [U], work: F) -> PhaseReport<T>
    where
        U: PhaseUnit,
        T: Send,
        F: Fn(&mut U) -> MarionetteResult<T> + Sync,
    {
        let start = Instant::now();
        let outcomes: Vec<UnitOutcome<T>> = self.pool.install(|| {
            units
                .par_iter_mut()
                .map(|unit| UnitOutcome {
                    avatar: unit.avatar(),
                    result: work(unit),
                })
                .collect()
        });
        let elapsed = start.elapsed();

        let report = PhaseReport {
            phase,
            outcomes,
            elapsed,
        };
        for (avatar, err) in report.failures() {
            warn!(%phase, ?avatar, %err, "phase unit failed");
        }
        debug!(%phase, units = report.outcomes.len(), ?elapsed, "phase complete");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        id: AvatarId,
        value: u32,
    }

    impl PhaseUnit for Counter {
        fn avatar(&self) -> AvatarId {
            self.id
        }
    }

    fn units(n: u64) -> Vec<Counter> {
        (0..n)
            .map(|i| Counter {
                id: AvatarId::new(i),
                value: 0,
            })
            .collect()
    }

    #[test]
    fn test_every_unit_runs_once() {
        let executor = PhaseExecutor::new(4).unwrap();
        let mut units = units(100);

        let report = executor.run(Phase::PreUpdate, &mut units, |u| {
            u.value += 1;
            Ok(u.value)
        });

        assert_eq!(report.outcomes.len(), 100);
        assert!(units.iter().all(|u| u.value == 1));
    }

    #[test]
    fn test_barrier_between_phases() {
        let executor = PhaseExecutor::new(4).unwrap();
        let mut units = units(64);
        let finished_first = AtomicUsize::new(0);

        executor.run(Phase::PreUpdate, &mut units, |u| {
            u.value = 1;
            finished_first.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let report = executor.run(Phase::CoreRecompute, &mut units, |_| {
            Ok(finished_first.load(Ordering::SeqCst))
        });

        assert!(report.outcomes.iter().all(|o| o.result == Ok(64)));
    }

    #[test]
    fn test_failures_are_values() {
        let executor = PhaseExecutor::new(2).unwrap();
        let mut units = units(10);

        let report = executor.run(Phase::PostUpdate, &mut units, |u| {
            if u.id.0 % 3 == 0 {
                Err(MarionetteError::UnknownAvatar(u.id))
            } else {
                Ok(())
            }
        });

        assert_eq!(report.failure_count(), 4);
        assert_eq!(report.outcomes.len(), 10);
    }

    #[test]
    fn test_phase_order() {
        assert_eq!(Phase::ALL.map(Phase::index), [0, 1, 2]);
        assert_eq!(Phase::CoreRecompute.to_string(), "core-recompute");
    }
}
