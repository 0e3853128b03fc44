//! Phase timing for speed experiments.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::{ExperimentHooks, Phase};

/// Accumulates wall-clock time spent in the timed phases of a run.
#[derive(Debug, Clone, Default)]
pub struct SpeedTimer {
    started: Option<Instant>,
    total: Duration,
    per_phase: BTreeMap<Phase, Duration>,
}

impl SpeedTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Phases whose brackets contribute to the total.
    pub fn is_timed(phase: Phase) -> bool {
        matches!(
            phase,
            Phase::PatternGeneration
                | Phase::ProjectAndCapture
                | Phase::ProcessCapture
                | Phase::PostIterationsProcess
        )
    }

    /// Add `elapsed` to the total and to the phase breakdown.
    pub fn add(&mut self, phase: Phase, elapsed: Duration) {
        self.total += elapsed;
        *self.per_phase.entry(phase).or_default() += elapsed;
    }

    pub fn total_elapsed(&self) -> Duration {
        self.total
    }

    pub fn phase_elapsed(&self, phase: Phase) -> Duration {
        self.per_phase.get(&phase).copied().unwrap_or_default()
    }
}

impl ExperimentHooks for SpeedTimer {
    fn before(&mut self, phase: Phase, _iteration: usize) {
        if Self::is_timed(phase) {
            self.started = Some(Instant::now());
        }
    }

    fn after(&mut self, phase: Phase, _iteration: usize) {
        if !Self::is_timed(phase) {
            return;
        }
        if let Some(started) = self.started.take() {
            self.add(phase, started.elapsed());
        }
    }
}
