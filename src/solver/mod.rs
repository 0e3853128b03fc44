//! Pattern solvers: the pluggable structured light techniques under test.
//!
//! A solver generates one pattern per iteration, consumes the matching
//! capture, and afterwards answers correspondence queries: which camera
//! column saw a given pattern column on a given camera row.

mod gray_code;
mod reference;

pub use gray_code::{GrayCodeSolver, PatternSpec};
pub use reference::RaycastReferenceSolver;

use std::cell::RefCell;
use std::rc::Rc;

use crate::capture::Frame;
use crate::error::Result;
use crate::experiment::{DepthSample, RunContext};
use crate::triangulation::TriangulationInput;

/// Solver handle shared between experiments; at most one run may hold it.
pub type SharedPatternSolver = Rc<RefCell<dyn PatternSolver>>;

/// Wrap a solver so several experiments can reference it.
pub fn share_solver<S: PatternSolver + 'static>(solver: S) -> SharedPatternSolver {
    Rc::new(RefCell::new(solver))
}

/// Receives depth samples produced by post-iterations processing.
pub trait ResultSink {
    fn store_sample(&mut self, sample: DepthSample);
}

/// Sink for experiments that do not record depth.
#[derive(Debug, Default)]
pub struct DiscardResults;

impl ResultSink for DiscardResults {
    fn store_sample(&mut self, _sample: DepthSample) {}
}

impl ResultSink for Vec<DepthSample> {
    fn store_sample(&mut self, sample: DepthSample) {
        self.push(sample);
    }
}

/// Whether a correspondence result names a camera column.
///
/// Both NaN and -1 mean "no match".
pub fn is_valid_correspondence(x_camera: f64) -> bool {
    !x_camera.is_nan() && x_camera != -1.0
}

/// A structured light technique.
pub trait PatternSolver {
    fn identifier(&self) -> &str;

    /// Number of pattern columns (may differ from the projector width).
    fn pattern_width(&self) -> u32;

    /// Projector-relative position of a pattern column, in `[0, 1)`.
    fn pattern_x_offset_factor(&self, x_pattern: f64) -> f64 {
        x_pattern / self.pattern_width() as f64
    }

    fn pre_experiment_run(&mut self, _ctx: &RunContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Queried with the current iteration counter before each iteration.
    fn has_more_iterations(&self, ctx: &RunContext<'_>) -> bool;

    /// Pattern for `ctx.iteration`; deterministic given the counter.
    fn generate_pattern(&mut self, ctx: &RunContext<'_>) -> Result<Frame>;

    /// Consume the (undistorted) capture of the current iteration.
    ///
    /// `None` means the capture source had no frame; treat it as no correspondence.
    fn process_capture(&mut self, capture: Option<&Frame>, ctx: &RunContext<'_>) -> Result<()>;

    /// Camera column matching `x_pattern` on camera row `y`, or NaN / -1 for no match.
    fn solve_correspondence(&self, x_pattern: u32, y: u32) -> f64;

    /// Turn correspondences into depth samples after the last iteration.
    fn post_iterations_process(
        &mut self,
        ctx: &RunContext<'_>,
        results: &mut dyn ResultSink,
    ) -> Result<()> {
        let stored = depth_sweep(&*self, ctx, results);
        log::debug!("{}: stored {} depth sample(s)", ctx.experiment, stored);
        Ok(())
    }

    fn post_experiment_run(&mut self, _ctx: &RunContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Default depth extraction: solve every (pattern column, camera row) cell,
/// triangulate valid matches and store finite displacements at the matching
/// projector column. Returns the number of samples stored.
pub fn depth_sweep<S: PatternSolver + ?Sized>(
    solver: &S,
    ctx: &RunContext<'_>,
    results: &mut dyn ResultSink,
) -> usize {
    let pattern_width = solver.pattern_width();
    let camera_height = ctx.setup.camera.resolution.height;
    let projector_width = ctx.setup.projector.resolution.width as f64;
    let triangulation = TriangulationInput::from_setup(ctx.setup, pattern_width);

    let mut stored = 0;
    for y in 0..camera_height {
        for x_pattern in 0..pattern_width {
            let x_camera = solver.solve_correspondence(x_pattern, y);
            if !is_valid_correspondence(x_camera) {
                continue;
            }

            let displacement = triangulation.displacement(x_pattern as f64, x_camera);
            if !displacement.is_finite() {
                continue;
            }

            let x_projector =
                (solver.pattern_x_offset_factor(x_pattern as f64) * projector_width) as u32;
            results.store_sample(DepthSample::new(x_projector, y, displacement));
            stored += 1;
        }
    }
    stored
}
