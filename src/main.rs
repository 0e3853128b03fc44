//! Structured Light Scanning Benchmark
//!
//! Entry point: loads a benchmark description, runs every experiment and
//! writes the comparison reports.

use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{bail, Context};

use sl_benchmark::benchmark::Benchmark;
use sl_benchmark::capture::{
    share_source, Calibrator, DeviceState, ReplaySource, SharedCaptureSource, VirtualRenderSource,
};
use sl_benchmark::config::{
    load_config, BenchmarkConfig, ExperimentConfig, InfrastructureConfig, MetricConfig,
    SolverConfig, SourceConfig,
};
use sl_benchmark::experiment::Experiment;
use sl_benchmark::metric::{
    AccuracyComparison, ComparisonStrategy, ResolutionComparison, SpeedComparison,
};
use sl_benchmark::reconstruct::PointCloudProjector;
use sl_benchmark::session::SessionContext;
use sl_benchmark::solver::{
    share_solver, GrayCodeSolver, RaycastReferenceSolver, SharedPatternSolver,
};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("Starting sl-benchmark v{}", env!("CARGO_PKG_VERSION"));

    let config_path = match std::env::args_os().nth(1) {
        Some(path) => PathBuf::from(path),
        None => bail!("usage: sl-benchmark <benchmark.json|benchmark.xml>"),
    };

    let config = load_config(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let session = SessionContext::create(&config.output_dir)?;

    let mut registry = Registry::new(&config);
    let reference = registry.experiment(&config.reference)?;
    let mut benchmark = Benchmark::new(reference);
    for experiment in &config.experiments {
        benchmark.add_experiment(registry.experiment(experiment)?);
    }
    for metric in &config.metrics {
        benchmark.add_metric(build_metric(metric));
    }

    benchmark.run_all(&session)?;

    let reports = benchmark.compare_experiments(&session);
    log::info!("{} comparison(s) completed", reports.len());

    if config.write_point_clouds {
        let experiments =
            std::iter::once(benchmark.reference()).chain(benchmark.experiments().iter());
        for experiment in experiments.filter(|e| e.kind().records_depth()) {
            PointCloudProjector::for_experiment(experiment).write_xyz(experiment)?;
        }
    }

    log::info!("Results written to {}", session.root().display());
    Ok(())
}

/// Builds capture sources and solvers on first use so experiments naming the
/// same infrastructure or solver share one instance.
struct Registry<'a> {
    config: &'a BenchmarkConfig,
    sources: HashMap<String, SharedCaptureSource>,
    solvers: HashMap<String, SharedPatternSolver>,
}

impl<'a> Registry<'a> {
    fn new(config: &'a BenchmarkConfig) -> Self {
        Self {
            config,
            sources: HashMap::new(),
            solvers: HashMap::new(),
        }
    }

    fn experiment(&mut self, experiment: &ExperimentConfig) -> anyhow::Result<Experiment> {
        let source = self.source(&experiment.infrastructure)?;
        let solver = self.solver(&experiment.solver, &experiment.infrastructure)?;
        Ok(Experiment::new(source, solver, experiment.kind)?)
    }

    fn source(&mut self, name: &str) -> anyhow::Result<SharedCaptureSource> {
        if let Some(source) = self.sources.get(name) {
            return Ok(Rc::clone(source));
        }
        let source = build_source(self.config, self.config.infrastructure(name)?)?;
        self.sources.insert(name.to_string(), Rc::clone(&source));
        Ok(source)
    }

    fn solver(&mut self, name: &str, infrastructure: &str) -> anyhow::Result<SharedPatternSolver> {
        if let Some(solver) = self.solvers.get(name) {
            return Ok(Rc::clone(solver));
        }
        // Pattern sizes default to the projector of the first infrastructure using the solver.
        let projector = self.config.infrastructure(infrastructure)?.setup.projector.resolution;

        let solver = match self.config.solver(name)? {
            SolverConfig::GrayCode {
                name,
                pattern_width,
                contrast_threshold,
            } => share_solver(
                GrayCodeSolver::new(
                    name.clone(),
                    pattern_width.unwrap_or(projector.width),
                    projector.height,
                )
                .with_contrast_threshold(*contrast_threshold),
            ),
            SolverConfig::Reference { name, depth_file } => share_solver(
                RaycastReferenceSolver::new(name.clone(), depth_file.clone(), projector.width),
            ),
        };
        self.solvers.insert(name.to_string(), Rc::clone(&solver));
        Ok(solver)
    }
}

fn build_source(
    config: &BenchmarkConfig,
    infrastructure: &InfrastructureConfig,
) -> anyhow::Result<SharedCaptureSource> {
    let device = DeviceState::new(infrastructure.name.clone(), infrastructure.setup)
        .with_calibrator(Calibrator::new(config.calibration_dir.clone(), config.consent));

    let source = match &infrastructure.source {
        SourceConfig::Physical {
            camera_index,
            settle_ms,
            display_path,
        } => build_physical(device, *camera_index, *settle_ms, display_path.clone())?,
        SourceConfig::Virtual {
            renderer,
            script,
            scene,
            calibration_scene,
            save_scene,
        } => {
            let mut source = VirtualRenderSource::new(
                device,
                script.clone(),
                scene.clone(),
                calibration_scene.clone(),
            )
            .with_save_scene(*save_scene);
            if let Some(renderer) = renderer {
                source = source.with_renderer(renderer.clone());
            }
            share_source(source)
        }
        SourceConfig::Replay { root } => share_source(ReplaySource::new(device, root.clone())),
    };

    log::info!("Infrastructure {} ready", infrastructure.name);
    Ok(source)
}

#[cfg(feature = "camera")]
fn build_physical(
    device: DeviceState,
    camera_index: u32,
    settle_ms: u64,
    display_path: PathBuf,
) -> anyhow::Result<SharedCaptureSource> {
    use sl_benchmark::capture::{ImageFileDisplay, NokhwaGrabber, PhysicalSource};
    use std::time::Duration;

    let grabber = NokhwaGrabber::open(camera_index)?;
    Ok(share_source(PhysicalSource::new(
        device,
        Box::new(ImageFileDisplay::new(display_path)),
        Box::new(grabber),
        Duration::from_millis(settle_ms),
    )))
}

#[cfg(not(feature = "camera"))]
fn build_physical(
    device: DeviceState,
    _camera_index: u32,
    _settle_ms: u64,
    _display_path: PathBuf,
) -> anyhow::Result<SharedCaptureSource> {
    bail!(
        "Infrastructure {} needs a camera; rebuild with --features camera",
        device.name
    )
}

fn build_metric(metric: &MetricConfig) -> Box<dyn ComparisonStrategy> {
    match metric {
        MetricConfig::Speed => Box::new(SpeedComparison),
        MetricConfig::Resolution => Box::new(ResolutionComparison),
        MetricConfig::Accuracy { bin_width } => Box::new(AccuracyComparison::new(*bin_width)),
    }
}
