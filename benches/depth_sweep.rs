use std::path::Path;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use sl_benchmark::capture::Frame;
use sl_benchmark::config::{DeviceConfig, InfrastructureSetup};
use sl_benchmark::error::Result;
use sl_benchmark::experiment::{DepthGrid, RunContext};
use sl_benchmark::solver::{depth_sweep, PatternSolver};
use sl_benchmark::triangulation::TriangulationInput;

struct Diagonal {
    width: u32,
}

impl PatternSolver for Diagonal {
    fn identifier(&self) -> &str {
        "diagonal"
    }

    fn pattern_width(&self) -> u32 {
        self.width
    }

    fn has_more_iterations(&self, _ctx: &RunContext<'_>) -> bool {
        false
    }

    fn generate_pattern(&mut self, _ctx: &RunContext<'_>) -> Result<Frame> {
        Ok(Frame::new_luma8(self.width, 1))
    }

    fn process_capture(&mut self, _capture: Option<&Frame>, _ctx: &RunContext<'_>) -> Result<()> {
        Ok(())
    }

    fn solve_correspondence(&self, x_pattern: u32, y: u32) -> f64 {
        (x_pattern + y % 7) as f64 * 0.9
    }
}

fn bench_triangulation(c: &mut Criterion) {
    let setup = InfrastructureSetup::default();
    let input = TriangulationInput::from_setup(&setup, 1920);

    c.bench_function("displacement", |b| {
        b.iter(|| input.displacement(black_box(320.0), black_box(260.0)))
    });
}

fn bench_depth_sweep(c: &mut Criterion) {
    let setup = InfrastructureSetup::new(
        DeviceConfig::new(640, 480, 60.0, 45.0),
        DeviceConfig::new(640, 480, 40.0, 30.0),
        10.0,
    );
    let solver = Diagonal { width: 640 };
    let ctx = RunContext {
        experiment: "bench",
        solver: "diagonal",
        iteration: 0,
        setup: &setup,
        path: Path::new("."),
    };

    c.bench_function("depth_sweep_640x480", |b| {
        b.iter(|| {
            let mut grid = DepthGrid::new(640, 480);
            depth_sweep(&solver, &ctx, &mut grid)
        })
    });
}

criterion_group!(benches, bench_triangulation, bench_depth_sweep);
criterion_main!(benches);
