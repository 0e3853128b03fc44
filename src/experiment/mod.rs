//! Experiment execution: binds one capture source to one pattern solver and
//! drives the pattern/capture iteration loop.

mod depth;
mod speed;

pub use depth::{DepthGrid, DepthSample};
pub use speed::SpeedTimer;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::capture::{undistort, Frame, SharedCaptureSource};
use crate::config::InfrastructureSetup;
use crate::error::{BenchmarkError, Result};
use crate::session::{capture_file, pattern_file, SessionContext};
use crate::solver::{DiscardResults, ResultSink, SharedPatternSolver};
use crate::triangulation::TriangulationInput;

/// Which measurements an experiment records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentKind {
    /// Sparse depth samples.
    #[default]
    Depth,
    /// Elapsed time of the timed phases.
    Speed,
    /// Depth and speed.
    Both,
}

impl ExperimentKind {
    pub fn records_depth(&self) -> bool {
        matches!(self, ExperimentKind::Depth | ExperimentKind::Both)
    }

    pub fn records_speed(&self) -> bool {
        matches!(self, ExperimentKind::Speed | ExperimentKind::Both)
    }
}

/// Lifecycle of an experiment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentState {
    Created,
    Initializing,
    Iterating,
    PostProcessing,
    Completed,
}

impl ExperimentState {
    fn can_advance_to(self, next: ExperimentState) -> bool {
        use ExperimentState::*;
        matches!(
            (self, next),
            (Created, Initializing)
                | (Initializing, Iterating)
                | (Iterating, PostProcessing)
                | (PostProcessing, Completed)
        )
    }
}

impl std::fmt::Display for ExperimentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExperimentState::Created => write!(f, "Created"),
            ExperimentState::Initializing => write!(f, "Initializing"),
            ExperimentState::Iterating => write!(f, "Iterating"),
            ExperimentState::PostProcessing => write!(f, "Post Processing"),
            ExperimentState::Completed => write!(f, "Completed"),
        }
    }
}

/// Bracketed stages of a run announced to [`ExperimentHooks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// The whole iteration loop.
    Iterations,
    /// One pass of the loop.
    Iteration,
    PatternGeneration,
    ProjectAndCapture,
    ProcessCapture,
    /// The solver's post-iterations processing.
    PostIterationsProcess,
}

/// Observer notified before and after each phase of a run.
pub trait ExperimentHooks {
    fn before(&mut self, _phase: Phase, _iteration: usize) {}
    fn after(&mut self, _phase: Phase, _iteration: usize) {}
}

/// Context handed to capture sources and solvers during a run.
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    /// Experiment identifier.
    pub experiment: &'a str,
    /// Solver identifier.
    pub solver: &'a str,
    /// Current iteration counter.
    pub iteration: usize,
    pub setup: &'a InfrastructureSetup,
    /// Experiment output directory.
    pub path: &'a Path,
}

/// One benchmarked run of a pattern solver on a capture source.
pub struct Experiment {
    identifier: String,
    kind: ExperimentKind,
    source: SharedCaptureSource,
    solver: SharedPatternSolver,
    setup: InfrastructureSetup,
    pattern_width: u32,
    state: ExperimentState,
    iteration: usize,
    path: Option<PathBuf>,
    captures: Vec<Option<Frame>>,
    depth: Option<DepthGrid>,
    speed: Option<SpeedTimer>,
    hooks: Vec<Box<dyn ExperimentHooks>>,
}

impl Experiment {
    /// Create an experiment; the identifier is the source name followed by the
    /// solver identifier.
    pub fn new(
        source: SharedCaptureSource,
        solver: SharedPatternSolver,
        kind: ExperimentKind,
    ) -> Result<Self> {
        let (name, setup) = {
            let source = source
                .try_borrow()
                .map_err(|_| BenchmarkError::AlreadyBound("capture source"))?;
            (source.name().to_string(), *source.setup())
        };
        let (solver_id, pattern_width) = {
            let solver = solver
                .try_borrow()
                .map_err(|_| BenchmarkError::AlreadyBound("pattern solver"))?;
            (solver.identifier().to_string(), solver.pattern_width())
        };

        let depth = kind
            .records_depth()
            .then(|| DepthGrid::new(pattern_width, setup.camera.resolution.height));
        let speed = kind.records_speed().then(SpeedTimer::new);

        Ok(Self {
            identifier: format!("{}{}", name, solver_id),
            kind,
            source,
            solver,
            setup,
            pattern_width,
            state: ExperimentState::Created,
            iteration: 0,
            path: None,
            captures: Vec::new(),
            depth,
            speed,
            hooks: Vec::new(),
        })
    }

    /// Register an additional phase observer.
    pub fn add_hook(&mut self, hook: Box<dyn ExperimentHooks>) {
        self.hooks.push(hook);
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn kind(&self) -> ExperimentKind {
        self.kind
    }

    pub fn state(&self) -> ExperimentState {
        self.state
    }

    pub fn is_completed(&self) -> bool {
        self.state == ExperimentState::Completed
    }

    pub fn setup(&self) -> &InfrastructureSetup {
        &self.setup
    }

    pub fn pattern_width(&self) -> u32 {
        self.pattern_width
    }

    /// Current iteration counter; after a run, the number of iterations performed.
    pub fn iteration_index(&self) -> usize {
        self.iteration
    }

    /// Output directory, available once the run has started.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn captures(&self) -> &[Option<Frame>] {
        &self.captures
    }

    pub fn capture_at(&self, index: usize) -> Option<&Frame> {
        self.captures.get(index).and_then(|c| c.as_ref())
    }

    pub fn last_capture(&self) -> Option<&Frame> {
        self.captures.last().and_then(|c| c.as_ref())
    }

    pub fn capture_count(&self) -> usize {
        self.captures.len()
    }

    pub fn depth(&self) -> Option<&DepthGrid> {
        self.depth.as_ref()
    }

    pub fn speed(&self) -> Option<&SpeedTimer> {
        self.speed.as_ref()
    }

    /// Depth data, or an error naming the missing capability.
    pub fn require_depth(&self) -> Result<&DepthGrid> {
        self.depth().ok_or_else(|| BenchmarkError::MissingCapability {
            experiment: self.identifier.clone(),
            capability: "depth",
        })
    }

    /// Speed data, or an error naming the missing capability.
    pub fn require_speed(&self) -> Result<&SpeedTimer> {
        self.speed().ok_or_else(|| BenchmarkError::MissingCapability {
            experiment: self.identifier.clone(),
            capability: "speed",
        })
    }

    /// Error unless the run has completed.
    pub fn require_completed(&self) -> Result<()> {
        if self.is_completed() {
            Ok(())
        } else {
            Err(BenchmarkError::NotCompleted(self.identifier.clone()))
        }
    }

    /// Triangulated displacement for this experiment's geometry.
    pub fn displacement(&self, x_pattern: f64, x_camera: f64) -> f64 {
        TriangulationInput::from_setup(&self.setup, self.pattern_width)
            .displacement(x_pattern, x_camera)
    }

    fn transition(&mut self, next: ExperimentState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(BenchmarkError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        log::debug!("{}: {} -> {}", self.identifier, self.state, next);
        self.state = next;
        Ok(())
    }

    fn notify_before(&mut self, phase: Phase) {
        let iteration = self.iteration;
        if let Some(speed) = self.speed.as_mut() {
            speed.before(phase, iteration);
        }
        for hook in &mut self.hooks {
            hook.before(phase, iteration);
        }
    }

    fn notify_after(&mut self, phase: Phase) {
        let iteration = self.iteration;
        if let Some(speed) = self.speed.as_mut() {
            speed.after(phase, iteration);
        }
        for hook in &mut self.hooks {
            hook.after(phase, iteration);
        }
    }

    /// Run the experiment to completion.
    ///
    /// The capture source and solver stay bound to this experiment for the
    /// whole run; binding fails if either is held by another run. Any error
    /// aborts the run immediately.
    pub fn run(&mut self, session: &SessionContext) -> Result<()> {
        let source_handle = Rc::clone(&self.source);
        let solver_handle = Rc::clone(&self.solver);

        let mut source = source_handle
            .try_borrow_mut()
            .map_err(|_| BenchmarkError::AlreadyBound("capture source"))?;
        let mut solver = solver_handle
            .try_borrow_mut()
            .map_err(|_| BenchmarkError::AlreadyBound("pattern solver"))?;

        self.transition(ExperimentState::Initializing)?;
        log::info!(
            "Running experiment {} ({} source, solver {})",
            self.identifier,
            source.kind(),
            solver.identifier()
        );

        let path = session.experiment_dir(&self.identifier)?;
        self.path = Some(path.clone());
        self.iteration = 0;

        let identifier = self.identifier.clone();
        let solver_id = solver.identifier().to_string();
        let setup = self.setup;
        let context = |iteration: usize| RunContext {
            experiment: &identifier,
            solver: &solver_id,
            iteration,
            setup: &setup,
            path: &path,
        };

        source.ensure_calibrated(&context(0))?;
        solver.pre_experiment_run(&context(0))?;

        self.transition(ExperimentState::Iterating)?;
        self.notify_before(Phase::Iterations);

        while solver.has_more_iterations(&context(self.iteration)) {
            let ctx = context(self.iteration);
            self.notify_before(Phase::Iteration);
            log::debug!("{}: starting iteration {}", identifier, ctx.iteration);

            self.notify_before(Phase::PatternGeneration);
            let pattern = solver.generate_pattern(&ctx)?;
            self.notify_after(Phase::PatternGeneration);

            pattern.save(pattern_file(&path, ctx.iteration))?;

            self.notify_before(Phase::ProjectAndCapture);
            let captured = source.project_and_capture(&pattern, &ctx)?;
            self.notify_after(Phase::ProjectAndCapture);

            let capture = captured.map(|frame| match source.calibration() {
                Some(calibration) => undistort(&frame, calibration),
                None => frame,
            });

            if let Some(frame) = &capture {
                frame.save(capture_file(&path, ctx.iteration))?;
            }

            self.notify_before(Phase::ProcessCapture);
            solver.process_capture(capture.as_ref(), &ctx)?;
            self.notify_after(Phase::ProcessCapture);

            self.captures.push(capture);

            self.notify_after(Phase::Iteration);
            self.iteration += 1;
        }

        self.notify_after(Phase::Iterations);
        self.transition(ExperimentState::PostProcessing)?;

        let ctx = context(self.iteration);
        self.notify_before(Phase::PostIterationsProcess);
        {
            let mut discard = DiscardResults;
            let results: &mut dyn ResultSink = match self.depth.as_mut() {
                Some(depth) => depth,
                None => &mut discard,
            };
            solver.post_iterations_process(&ctx, results)?;
        }
        self.notify_after(Phase::PostIterationsProcess);

        solver.post_experiment_run(&ctx)?;

        self.transition(ExperimentState::Completed)?;
        log::info!(
            "Experiment {} completed: {} iteration(s), {} depth sample(s)",
            identifier,
            self.iteration,
            self.depth.as_ref().map(|d| d.valued_count()).unwrap_or(0)
        );

        Ok(())
    }
}

impl std::fmt::Debug for Experiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Experiment")
            .field("identifier", &self.identifier)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("iteration", &self.iteration)
            .field("path", &self.path)
            .finish()
    }
}
