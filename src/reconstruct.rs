//! Point cloud reconstruction from a completed depth experiment.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use glam::DVec3;

use crate::error::{BenchmarkError, Result};
use crate::experiment::{DepthSample, Experiment};
use crate::triangulation::half_angle_tan;

/// File name of the point cloud written into an experiment directory.
pub const POINT_CLOUD_FILE: &str = "point_cloud.xyz";

/// Projects depth samples into world space using FOV tangent scaling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointCloudProjector {
    /// Number of columns the sample x coordinate spans.
    pub columns: u32,
    pub rows: u32,
    pub horizontal_fov: f64,
    pub vertical_fov: f64,
}

impl PointCloudProjector {
    /// Columns and horizontal FOV from the projector, rows and vertical FOV
    /// from the camera.
    pub fn for_experiment(experiment: &Experiment) -> Self {
        let setup = experiment.setup();
        Self {
            columns: setup.projector.resolution.width,
            rows: setup.camera.resolution.height,
            horizontal_fov: setup.projector.horizontal_fov,
            vertical_fov: setup.camera.vertical_fov,
        }
    }

    pub fn project_sample(&self, sample: &DepthSample) -> DVec3 {
        let columns = self.columns as f64;
        let rows = self.rows as f64;
        let scale_x = 2.0 * half_angle_tan(self.horizontal_fov) / columns;
        let scale_y = 2.0 * half_angle_tan(self.vertical_fov) / rows;

        DVec3::new(
            (sample.x as f64 - columns / 2.0) * sample.z * scale_x,
            (sample.y as f64 - rows / 2.0) * sample.z * scale_y,
            sample.z,
        )
    }

    /// World points for every valued sample, ordered by column then row.
    pub fn project(&self, experiment: &Experiment) -> Result<Vec<DVec3>> {
        experiment.require_completed()?;
        let depth = experiment.require_depth()?;

        Ok(depth
            .samples_in(self.columns, self.rows)
            .iter()
            .map(|sample| self.project_sample(sample))
            .collect())
    }

    /// Write `x y z` rows to `point_cloud.xyz` in the experiment directory.
    pub fn write_xyz(&self, experiment: &Experiment) -> Result<PathBuf> {
        let points = self.project(experiment)?;
        let dir = experiment
            .path()
            .ok_or_else(|| BenchmarkError::NotCompleted(experiment.identifier().to_string()))?;
        let path = dir.join(POINT_CLOUD_FILE);

        write_points(&path, &points)?;
        log::info!(
            "Wrote {} point(s) for {} to {}",
            points.len(),
            experiment.identifier(),
            path.display()
        );
        Ok(path)
    }
}

fn write_points(path: &Path, points: &[DVec3]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for point in points {
        writeln!(writer, "{} {} {}", point.x, point.y, point.z)?;
    }
    writer.flush()?;
    Ok(())
}
