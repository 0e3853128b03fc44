//! End-to-end runs of experiments and comparisons with an in-memory rig.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use sl_benchmark::benchmark::{Benchmark, ComparisonReport};
use sl_benchmark::capture::{
    share_source, CameraCalibration, CaptureKind, CaptureSource, DeviceState, Frame,
    SharedCaptureSource,
};
use sl_benchmark::config::{DeviceConfig, InfrastructureSetup};
use sl_benchmark::error::{BenchmarkError, Result};
use sl_benchmark::experiment::{
    Experiment, ExperimentHooks, ExperimentKind, ExperimentState, Phase, RunContext,
};
use sl_benchmark::metric::{
    AccuracyComparison, Comparison, ComparisonStrategy, ResolutionComparison, SpeedComparison,
};
use sl_benchmark::reconstruct::{PointCloudProjector, POINT_CLOUD_FILE};
use sl_benchmark::session::{capture_file, pattern_file, SessionContext};
use sl_benchmark::solver::{share_solver, PatternSolver, SharedPatternSolver};

/// Capture source that echoes the pattern back, optionally dropping one frame.
struct EchoSource {
    device: DeviceState,
    drop_iteration: Option<usize>,
}

impl CaptureSource for EchoSource {
    fn kind(&self) -> CaptureKind {
        CaptureKind::Custom
    }

    fn device(&self) -> &DeviceState {
        &self.device
    }

    fn device_mut(&mut self) -> &mut DeviceState {
        &mut self.device
    }

    fn project_and_capture(&mut self, pattern: &Frame, ctx: &RunContext<'_>) -> Result<Option<Frame>> {
        if self.drop_iteration == Some(ctx.iteration) {
            return Ok(None);
        }
        Ok(Some(pattern.clone()))
    }
}

/// Matches pattern column x to camera column x - shift on the first
/// `valid_rows` rows; column 0 never matches.
struct ShiftSolver {
    identifier: String,
    width: u32,
    shift: f64,
    valid_rows: u32,
    iterations: usize,
}

impl PatternSolver for ShiftSolver {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn pattern_width(&self) -> u32 {
        self.width
    }

    fn has_more_iterations(&self, ctx: &RunContext<'_>) -> bool {
        ctx.iteration < self.iterations
    }

    fn generate_pattern(&mut self, ctx: &RunContext<'_>) -> Result<Frame> {
        let level = (ctx.iteration * 40) as u8;
        Ok(Frame::ImageLuma8(image::GrayImage::from_pixel(
            self.width,
            4,
            image::Luma([level]),
        )))
    }

    fn process_capture(&mut self, _capture: Option<&Frame>, _ctx: &RunContext<'_>) -> Result<()> {
        Ok(())
    }

    fn solve_correspondence(&self, x_pattern: u32, y: u32) -> f64 {
        if x_pattern == 0 || y >= self.valid_rows {
            return f64::NAN;
        }
        x_pattern as f64 - self.shift
    }
}

fn setup(camera_height: u32) -> InfrastructureSetup {
    InfrastructureSetup::new(
        DeviceConfig::new(8, camera_height, 60.0, 45.0),
        DeviceConfig::new(8, 4, 60.0, 45.0),
        10.0,
    )
}

fn source(name: &str, setup: InfrastructureSetup) -> SharedCaptureSource {
    // A preset calibration skips the consent prompt.
    let device = DeviceState::new(name, setup)
        .with_calibration(CameraCalibration::pinhole(8.0, 8.0, 4.0, 2.0));
    share_source(EchoSource {
        device,
        drop_iteration: None,
    })
}

fn solver(identifier: &str, shift: f64, valid_rows: u32) -> SharedPatternSolver {
    share_solver(ShiftSolver {
        identifier: identifier.to_string(),
        width: 8,
        shift,
        valid_rows,
        iterations: 3,
    })
}

fn session(test: &str) -> SessionContext {
    let parent = std::env::temp_dir().join(format!("sl_benchmark_{}_{}", test, std::process::id()));
    let _ = std::fs::remove_dir_all(&parent);
    std::fs::create_dir_all(&parent).unwrap();
    SessionContext::create(&parent).unwrap()
}

fn cleanup(session: &SessionContext) {
    if let Some(parent) = session.root().parent() {
        let _ = std::fs::remove_dir_all(parent);
    }
}

#[test]
fn test_run_completes_and_writes_artifacts() {
    let session = session("run");
    let mut experiment = Experiment::new(
        source("rig", setup(4)),
        solver("shift", 1.0, 4),
        ExperimentKind::Both,
    )
    .unwrap();

    assert_eq!(experiment.identifier(), "rigshift");
    assert_eq!(experiment.state(), ExperimentState::Created);

    experiment.run(&session).unwrap();

    assert!(experiment.is_completed());
    assert_eq!(experiment.iteration_index(), 3);
    assert_eq!(experiment.capture_count(), 3);

    let path = experiment.path().unwrap().to_path_buf();
    assert!(path.starts_with(session.root()));
    for n in 0..3 {
        assert!(pattern_file(&path, n).exists());
        assert!(capture_file(&path, n).exists());
    }

    // columns 1..8 on four rows, stored at projector columns
    let depth = experiment.depth().unwrap();
    assert_eq!(depth.valued_count(), 28);
    assert!(!depth.is_depth_data_valued(0, 0));
    let expected = experiment.displacement(3.0, 2.0);
    assert_eq!(depth.get_depth_data(3, 0), Some(expected));

    assert!(experiment.speed().unwrap().total_elapsed() > std::time::Duration::ZERO);

    cleanup(&session);
}

#[test]
fn test_missing_frame_is_soft_failure() {
    let session = session("missing_frame");
    let device = DeviceState::new("rig", setup(4))
        .with_calibration(CameraCalibration::pinhole(8.0, 8.0, 4.0, 2.0));
    let source = share_source(EchoSource {
        device,
        drop_iteration: Some(1),
    });

    let mut experiment =
        Experiment::new(source, solver("shift", 1.0, 4), ExperimentKind::Depth).unwrap();
    experiment.run(&session).unwrap();

    assert!(experiment.is_completed());
    assert_eq!(experiment.capture_count(), 3);
    assert!(experiment.capture_at(1).is_none());
    assert!(experiment.capture_at(2).is_some());
    assert_eq!(experiment.last_capture(), experiment.capture_at(2));

    let path = experiment.path().unwrap();
    assert!(!capture_file(path, 1).exists());
    assert!(capture_file(path, 2).exists());

    cleanup(&session);
}

#[test]
fn test_bound_source_is_rejected() {
    let session = session("bound");
    let shared = source("rig", setup(4));
    let mut experiment =
        Experiment::new(Rc::clone(&shared), solver("shift", 1.0, 4), ExperimentKind::Depth)
            .unwrap();

    {
        let _held = shared.borrow_mut();
        let err = experiment.run(&session).unwrap_err();
        assert!(matches!(err, BenchmarkError::AlreadyBound("capture source")));
        assert_eq!(experiment.state(), ExperimentState::Created);

        let err = Experiment::new(Rc::clone(&shared), solver("other", 1.0, 4), ExperimentKind::Depth)
            .unwrap_err();
        assert!(matches!(err, BenchmarkError::AlreadyBound(_)));
    }

    // Released once the holder is dropped.
    experiment.run(&session).unwrap();
    assert!(experiment.is_completed());

    cleanup(&session);
}

#[test]
fn test_bound_solver_is_rejected() {
    let session = session("bound_solver");
    let shared = solver("shift", 1.0, 4);
    let mut experiment =
        Experiment::new(source("rig", setup(4)), Rc::clone(&shared), ExperimentKind::Depth)
            .unwrap();

    let _held = shared.borrow();
    let err = experiment.run(&session).unwrap_err();
    assert!(matches!(err, BenchmarkError::AlreadyBound("pattern solver")));

    cleanup(&session);
}

#[test]
fn test_second_run_is_invalid_transition() {
    let session = session("rerun");
    let mut experiment = Experiment::new(
        source("rig", setup(4)),
        solver("shift", 1.0, 4),
        ExperimentKind::Depth,
    )
    .unwrap();

    experiment.run(&session).unwrap();
    let err = experiment.run(&session).unwrap_err();
    assert!(matches!(err, BenchmarkError::InvalidTransition { .. }));

    cleanup(&session);
}

/// Records every phase notification.
struct PhaseLog(Rc<RefCell<Vec<(bool, Phase, usize)>>>);

impl ExperimentHooks for PhaseLog {
    fn before(&mut self, phase: Phase, iteration: usize) {
        self.0.borrow_mut().push((true, phase, iteration));
    }

    fn after(&mut self, phase: Phase, iteration: usize) {
        self.0.borrow_mut().push((false, phase, iteration));
    }
}

#[test]
fn test_hooks_bracket_every_phase() {
    let session = session("hooks");
    let events = Rc::new(RefCell::new(Vec::new()));
    let mut experiment = Experiment::new(
        source("rig", setup(4)),
        solver("shift", 1.0, 4),
        ExperimentKind::Depth,
    )
    .unwrap();
    experiment.add_hook(Box::new(PhaseLog(Rc::clone(&events))));
    experiment.run(&session).unwrap();

    let events = events.borrow();
    assert_eq!(events.first(), Some(&(true, Phase::Iterations, 0)));
    assert_eq!(events.last(), Some(&(false, Phase::PostIterationsProcess, 3)));

    let first_iteration: Vec<(bool, Phase)> = events[1..9].iter().map(|(b, p, _)| (*b, *p)).collect();
    assert_eq!(
        first_iteration,
        vec![
            (true, Phase::Iteration),
            (true, Phase::PatternGeneration),
            (false, Phase::PatternGeneration),
            (true, Phase::ProjectAndCapture),
            (false, Phase::ProjectAndCapture),
            (true, Phase::ProcessCapture),
            (false, Phase::ProcessCapture),
            (false, Phase::Iteration),
        ]
    );

    let before_count = events.iter().filter(|(b, _, _)| *b).count();
    assert_eq!(before_count * 2, events.len());

    cleanup(&session);
}

fn completed(
    session: &SessionContext,
    source: &SharedCaptureSource,
    solver: SharedPatternSolver,
    kind: ExperimentKind,
) -> Experiment {
    let mut experiment = Experiment::new(Rc::clone(source), solver, kind).unwrap();
    experiment.run(session).unwrap();
    experiment
}

fn strategies() -> Vec<Box<dyn ComparisonStrategy>> {
    vec![
        Box::new(SpeedComparison),
        Box::new(ResolutionComparison),
        Box::new(AccuracyComparison::default()),
    ]
}

fn deterministic(reports: &[ComparisonReport]) -> Vec<ComparisonReport> {
    let mut reports: Vec<ComparisonReport> = reports
        .iter()
        .filter(|r| r.strategy != "speed")
        .cloned()
        .collect();
    reports.sort_by(|a, b| (&a.strategy, &a.candidate).cmp(&(&b.strategy, &b.candidate)));
    reports
}

fn build_benchmark(session: &SessionContext, reversed: bool) -> Benchmark {
    let rig = source("rig", setup(4));
    let reference = completed(session, &rig, solver("truth", 1.0, 4), ExperimentKind::Both);
    let mut candidates = vec![
        completed(session, &rig, solver("half", 0.5, 2), ExperimentKind::Both),
        completed(session, &rig, solver("full", 0.25, 4), ExperimentKind::Both),
    ];

    let mut strategies = strategies();
    if reversed {
        candidates.reverse();
        strategies.reverse();
    }

    let mut benchmark = Benchmark::new(reference);
    for candidate in candidates {
        benchmark.add_experiment(candidate);
    }
    for strategy in strategies {
        benchmark.add_metric(strategy);
    }
    benchmark
}

#[test]
fn test_compare_runs_every_strategy_on_every_candidate() {
    let session = session("compare");
    let benchmark = build_benchmark(&session, false);
    let reports = benchmark.compare_experiments(&session);

    assert_eq!(reports.len(), 3 * 2);

    let resolution: Vec<&ComparisonReport> =
        reports.iter().filter(|r| r.strategy == "resolution").collect();
    assert_eq!(
        resolution[0].comparison,
        Comparison::Resolution {
            reference_count: 28,
            candidate_count: 14,
            difference: 14,
        }
    );
    assert_eq!(
        resolution[1].comparison,
        Comparison::Resolution {
            reference_count: 28,
            candidate_count: 28,
            difference: 0,
        }
    );

    for report in reports.iter().filter(|r| r.strategy == "accuracy") {
        match &report.comparison {
            Comparison::Accuracy {
                histogram: Some(histogram),
                path: Some(path),
            } => {
                assert!((histogram.total_probability() - 1.0).abs() < 1e-9);
                assert_eq!(
                    path.file_name().unwrap().to_str().unwrap(),
                    format!("rigtruth_vs_{}_accuracy_histogram.csv", report.candidate)
                );
                assert!(path.exists());
            }
            other => panic!("unexpected comparison {:?}", other),
        }
    }

    cleanup(&session);
}

#[test]
fn test_registration_order_does_not_change_reports() {
    let first_session = session("order_a");
    let second_session = session("order_b");

    let forward = build_benchmark(&first_session, false).compare_experiments(&first_session);
    let backward = build_benchmark(&second_session, true).compare_experiments(&second_session);

    assert_eq!(forward.len(), backward.len());

    let strip_paths = |reports: Vec<ComparisonReport>| -> Vec<ComparisonReport> {
        reports
            .into_iter()
            .map(|mut r| {
                if let Comparison::Accuracy { path, .. } = &mut r.comparison {
                    *path = path.as_ref().and_then(|p| p.file_name()).map(PathBuf::from);
                }
                r
            })
            .collect()
    };
    assert_eq!(
        strip_paths(deterministic(&forward)),
        strip_paths(deterministic(&backward))
    );

    cleanup(&first_session);
    cleanup(&second_session);
}

#[test]
fn test_mismatched_domain_is_skipped() {
    let session = session("mismatch");
    let rig = source("rig", setup(4));
    let tall = source("tall", setup(6));

    let reference = completed(&session, &rig, solver("truth", 1.0, 4), ExperimentKind::Both);
    let mut benchmark = Benchmark::new(reference);
    benchmark.add_experiment(completed(&session, &tall, solver("tallrun", 2.0, 4), ExperimentKind::Both));
    benchmark.add_experiment(completed(&session, &rig, solver("same", 2.0, 4), ExperimentKind::Both));
    for strategy in strategies() {
        benchmark.add_metric(strategy);
    }

    let reports = benchmark.compare_experiments(&session);

    // speed for both, resolution and accuracy only for the matching candidate
    assert_eq!(reports.len(), 4);
    assert!(reports
        .iter()
        .filter(|r| r.candidate == "talltallrun")
        .all(|r| r.strategy == "speed"));
    assert_eq!(reports.iter().filter(|r| r.candidate == "rigsame").count(), 3);

    cleanup(&session);
}

#[test]
fn test_mismatched_projector_width_is_skipped() {
    let session = session("mismatch_projector");
    let rig = source("rig", setup(4));
    let wide = source(
        "wide",
        InfrastructureSetup::new(
            DeviceConfig::new(8, 4, 60.0, 45.0),
            DeviceConfig::new(10, 4, 60.0, 45.0),
            10.0,
        ),
    );

    let reference = completed(&session, &rig, solver("truth", 1.0, 4), ExperimentKind::Both);
    let mut benchmark = Benchmark::new(reference);
    benchmark.add_experiment(completed(&session, &wide, solver("widerun", 0.5, 4), ExperimentKind::Both));
    benchmark.add_experiment(completed(&session, &rig, solver("same", 0.5, 4), ExperimentKind::Both));
    for strategy in strategies() {
        benchmark.add_metric(strategy);
    }

    let err = ResolutionComparison
        .compare(benchmark.reference(), &benchmark.experiments()[0], &session)
        .unwrap_err();
    assert!(matches!(
        err,
        BenchmarkError::DomainMismatch {
            reference: (8, 4),
            candidate: (10, 4),
        }
    ));

    let reports = benchmark.compare_experiments(&session);
    assert_eq!(reports.len(), 4);
    let skipped: Vec<&str> = reports
        .iter()
        .filter(|r| r.candidate == "widewiderun")
        .map(|r| r.strategy.as_str())
        .collect();
    assert_eq!(skipped, vec!["speed"]);
    assert_eq!(reports.iter().filter(|r| r.candidate == "rigsame").count(), 3);

    cleanup(&session);
}

#[test]
fn test_unbinnable_accuracy_range_is_skipped() {
    let session = session("wide_range");
    let rig = source("rig", setup(4));
    // Narrower projector FOV and an enormous baseline spread the candidate's
    // depths across ~1e13.
    let far = source(
        "far",
        InfrastructureSetup::new(
            DeviceConfig::new(8, 4, 60.0, 45.0),
            DeviceConfig::new(8, 4, 40.0, 30.0),
            1.0e12,
        ),
    );

    let reference = completed(&session, &rig, solver("truth", 1.0, 4), ExperimentKind::Both);
    let mut benchmark = Benchmark::new(reference);
    benchmark.add_experiment(completed(&session, &far, solver("spread", 0.25, 4), ExperimentKind::Both));
    benchmark.add_experiment(completed(&session, &rig, solver("same", 0.5, 4), ExperimentKind::Both));
    for strategy in strategies() {
        benchmark.add_metric(strategy);
    }

    let err = AccuracyComparison::default()
        .compare(benchmark.reference(), &benchmark.experiments()[0], &session)
        .unwrap_err();
    assert!(matches!(err, BenchmarkError::HistogramTooWide { .. }));

    let reports = benchmark.compare_experiments(&session);
    assert_eq!(reports.len(), 5);
    assert!(!reports
        .iter()
        .any(|r| r.candidate == "farspread" && r.strategy == "accuracy"));
    assert!(reports
        .iter()
        .any(|r| r.candidate == "rigsame" && r.strategy == "accuracy"));

    cleanup(&session);
}

#[test]
fn test_missing_capability_and_incomplete_runs_are_skipped() {
    let session = session("capability");
    let rig = source("rig", setup(4));

    let reference = completed(&session, &rig, solver("truth", 1.0, 4), ExperimentKind::Depth);
    let mut benchmark = Benchmark::new(reference);
    benchmark.add_experiment(completed(&session, &rig, solver("timed", 2.0, 4), ExperimentKind::Speed));
    benchmark.add_experiment(
        Experiment::new(Rc::clone(&rig), solver("idle", 2.0, 4), ExperimentKind::Both).unwrap(),
    );
    for strategy in strategies() {
        benchmark.add_metric(strategy);
    }

    // reference has no speed data, candidates lack depth or never ran
    assert!(benchmark.compare_experiments(&session).is_empty());

    cleanup(&session);
}

#[test]
fn test_point_cloud_written_per_sample() {
    let session = session("point_cloud");
    let rig = source("rig", setup(4));
    let experiment = completed(&session, &rig, solver("shift", 1.0, 4), ExperimentKind::Depth);

    let projector = PointCloudProjector::for_experiment(&experiment);
    let points = projector.project(&experiment).unwrap();
    assert_eq!(points.len(), 28);
    assert!(points.iter().all(|p| p.z.is_finite()));

    let path = projector.write_xyz(&experiment).unwrap();
    assert_eq!(path.file_name().unwrap(), POINT_CLOUD_FILE);
    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents.lines().count(), 28);
    assert!(contents
        .lines()
        .all(|line| line.split(' ').filter_map(|v| v.parse::<f64>().ok()).count() == 3));

    cleanup(&session);
}
