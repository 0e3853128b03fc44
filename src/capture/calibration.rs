//! Camera calibration: cache files keyed by configuration hash and the
//! chessboard capture procedure used when no cache exists.

use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use super::{CaptureSource, Frame};
use crate::config::{ConsentPolicy, InfrastructureSetup, Resolution};
use crate::error::{BenchmarkError, Result};
use crate::experiment::RunContext;

const INTRINSIC_NAME: &str = "intrinsic";
const DISTORTION_NAME: &str = "distortion";
const CALIBRATION_EXTENSION: &str = "xml";

/// Intrinsic matrix and distortion coefficients of a camera.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraCalibration {
    /// 3x3 intrinsic matrix (row-major).
    pub intrinsic: [[f64; 3]; 3],
    /// Distortion coefficients in (k1, k2, p1, p2, k3) order.
    pub distortion: [f64; 5],
}

impl CameraCalibration {
    /// Pinhole calibration with no lens distortion.
    pub fn pinhole(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            intrinsic: [[fx, 0.0, cx], [0.0, fy, cy], [0.0, 0.0, 1.0]],
            distortion: [0.0; 5],
        }
    }

    pub fn fx(&self) -> f64 {
        self.intrinsic[0][0]
    }

    pub fn fy(&self) -> f64 {
        self.intrinsic[1][1]
    }

    pub fn cx(&self) -> f64 {
        self.intrinsic[0][2]
    }

    pub fn cy(&self) -> f64 {
        self.intrinsic[1][2]
    }

    pub fn has_distortion(&self) -> bool {
        self.distortion.iter().any(|&k| k != 0.0)
    }

    /// Read a calibration file in OpenCV FileStorage XML layout.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let parse_err = |message: String| BenchmarkError::CalibrationParse {
            path: path.to_path_buf(),
            message,
        };

        let storage: FileStorage =
            quick_xml::de::from_str(&contents).map_err(|e| parse_err(e.to_string()))?;

        let intrinsic_values = storage.intrinsic.values().map_err(&parse_err)?;
        if intrinsic_values.len() != 9 {
            return Err(parse_err(format!(
                "{} must have 9 values, found {}",
                INTRINSIC_NAME,
                intrinsic_values.len()
            )));
        }

        let mut intrinsic = [[0.0; 3]; 3];
        for (i, value) in intrinsic_values.iter().enumerate() {
            intrinsic[i / 3][i % 3] = *value;
        }

        let distortion_values = storage.distortion.values().map_err(&parse_err)?;
        if distortion_values.len() < 4 {
            return Err(parse_err(format!(
                "{} must have at least 4 values, found {}",
                DISTORTION_NAME,
                distortion_values.len()
            )));
        }

        // OpenCV may store 4, 5, 8 or more coefficients; only the first five are modelled.
        let mut distortion = [0.0; 5];
        for (slot, value) in distortion.iter_mut().zip(distortion_values) {
            *slot = value;
        }

        Ok(Self {
            intrinsic,
            distortion,
        })
    }

    /// Write this calibration in OpenCV FileStorage XML layout.
    pub fn save(&self, path: &Path) -> Result<()> {
        let storage = FileStorage {
            intrinsic: StoredMatrix::new(3, 3, self.intrinsic.iter().flatten().copied()),
            distortion: StoredMatrix::new(1, 5, self.distortion.iter().copied()),
        };

        let xml = quick_xml::se::to_string(&storage)
            .map_err(|e| BenchmarkError::CalibrationWrite(e.to_string()))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, format!("<?xml version=\"1.0\"?>\n{}\n", xml))?;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "opencv_storage")]
struct FileStorage {
    intrinsic: StoredMatrix,
    distortion: StoredMatrix,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredMatrix {
    #[serde(rename = "@type_id")]
    type_id: String,
    rows: usize,
    cols: usize,
    dt: String,
    data: String,
}

impl StoredMatrix {
    fn new(rows: usize, cols: usize, values: impl Iterator<Item = f64>) -> Self {
        let data = values
            .map(|v| format!("{:e}", v))
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            type_id: "opencv-matrix".to_string(),
            rows,
            cols,
            dt: "d".to_string(),
            data,
        }
    }

    fn values(&self) -> std::result::Result<Vec<f64>, String> {
        self.data
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<f64>()
                    .map_err(|e| format!("bad matrix value {:?}: {}", token, e))
            })
            .collect()
    }
}

/// Format a float the way a default C++ output stream does (`%g`, six significant digits).
pub(crate) fn format_general(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    if !value.is_finite() {
        return if value.is_nan() {
            "nan".to_string()
        } else if value > 0.0 {
            "inf".to_string()
        } else {
            "-inf".to_string()
        };
    }

    let scientific = format!("{:.5e}", value);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (scientific.as_str(), 0),
    };

    if exponent < -4 || exponent >= 6 {
        let mantissa = trim_fraction(mantissa);
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    } else {
        let decimals = (5 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Configuration string hashed to name the calibration cache file.
pub fn configuration_string(name: &str, setup: &InfrastructureSetup) -> String {
    format!(
        "{}-{}-{}-{}-{}-{}-{}-{}",
        name,
        setup.camera.resolution,
        format_general(setup.camera.horizontal_fov),
        format_general(setup.camera.vertical_fov),
        setup.projector.resolution,
        format_general(setup.projector.horizontal_fov),
        format_general(setup.projector.vertical_fov),
        format_general(setup.separation),
    )
}

/// Rolling hash over the configuration string.
///
/// Bytes are sign-extended like a C `char` so that cache names match files
/// written by earlier tools.
pub fn configuration_hash(name: &str, setup: &InfrastructureSetup) -> u32 {
    let mut hash: u32 = 0;

    for byte in configuration_string(name, setup).bytes() {
        hash = (hash << 4).wrapping_add(byte as i8 as i32 as u32);

        let overflow = hash & 0xF000_0000;
        if overflow != 0 {
            hash ^= overflow >> 24;
        }
        hash &= !overflow;
    }

    hash
}

/// Calibration target projected during calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chessboard {
    /// Squares across.
    pub columns: u32,
    /// Squares down.
    pub rows: u32,
    /// Square edge in projector pixels.
    pub square_size: u32,
    /// Blank margin around the board.
    pub border: u32,
    pub width: u32,
    pub height: u32,
}

impl Chessboard {
    /// Largest 10x7 board that fits the projector with a 20 pixel border.
    pub fn for_projector(resolution: Resolution) -> Self {
        let columns = 10;
        let rows = 7;
        let border = 20;

        let square_height = resolution.height.saturating_sub(border * 2) / rows;
        let square_width = resolution.width.saturating_sub(border * 2) / columns;

        Self {
            columns,
            rows,
            square_size: square_height.min(square_width),
            border,
            width: resolution.width,
            height: resolution.height,
        }
    }

    /// Inner corners (columns - 1, rows - 1) seen by a corner detector.
    pub fn inner_corners(&self) -> (u32, u32) {
        (self.columns - 1, self.rows - 1)
    }

    /// Whether projector pixel (x, y) falls on a black square.
    pub fn is_black(&self, x: u32, y: u32) -> bool {
        if self.square_size == 0 || x < self.border || y < self.border {
            return false;
        }
        let cx = (x - self.border) / self.square_size;
        let cy = (y - self.border) / self.square_size;
        if cx >= self.columns || cy >= self.rows {
            return false;
        }
        (cx + cy) % 2 == 1
    }

    /// Render the board at projector resolution.
    pub fn render(&self) -> Frame {
        let img = image::RgbImage::from_fn(self.width, self.height, |x, y| {
            if self.is_black(x, y) {
                image::Rgb([0, 0, 0])
            } else {
                image::Rgb([255, 255, 255])
            }
        });
        Frame::ImageRgb8(img)
    }
}

/// Recovers a camera calibration from a captured chessboard.
pub trait CalibrationSolver {
    fn solve(
        &self,
        capture: &Frame,
        board: &Chessboard,
        setup: &InfrastructureSetup,
    ) -> Result<CameraCalibration>;
}

/// Ideal pinhole derived from the configured fields of view, with no distortion.
///
/// Suitable for rendered scenes, which have no lens distortion.
#[derive(Debug, Clone, Copy, Default)]
pub struct NominalCalibration;

impl CalibrationSolver for NominalCalibration {
    fn solve(
        &self,
        capture: &Frame,
        _board: &Chessboard,
        setup: &InfrastructureSetup,
    ) -> Result<CameraCalibration> {
        let (width, height) = if capture.width() > 0 && capture.height() > 0 {
            (capture.width() as f64, capture.height() as f64)
        } else {
            (
                setup.camera.resolution.width as f64,
                setup.camera.resolution.height as f64,
            )
        };

        let half_width = width / 2.0;
        let half_height = height / 2.0;
        let fx = half_width / crate::triangulation::half_angle_tan(setup.camera.horizontal_fov);
        let fy = half_height / crate::triangulation::half_angle_tan(setup.camera.vertical_fov);

        if !fx.is_finite() || !fy.is_finite() {
            return Err(BenchmarkError::CalibrationFailed(
                "camera field of view must be between 0 and 180 degrees".to_string(),
            ));
        }

        Ok(CameraCalibration::pinhole(fx, fy, half_width, half_height))
    }
}

#[cfg(feature = "opencv")]
mod opencv_impl {
    use super::*;
    use opencv::calib3d;
    use opencv::core::{self, Mat, Point2f, Point3f, Size, TermCriteria, Vector};
    use opencv::imgproc;
    use opencv::prelude::*;

    /// Chessboard corner detection and `calibrateCamera` via OpenCV.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct ChessboardCalibration;

    impl CalibrationSolver for ChessboardCalibration {
        fn solve(
            &self,
            capture: &Frame,
            board: &Chessboard,
            _setup: &InfrastructureSetup,
        ) -> Result<CameraCalibration> {
            let cv_err = |e: opencv::Error| BenchmarkError::CalibrationFailed(format!("OpenCV error: {}", e));

            let gray = capture.to_luma8();
            let (width, height) = gray.dimensions();
            let image = Mat::from_slice_rows_cols(gray.as_raw(), height as usize, width as usize)
                .map_err(cv_err)?;

            let (corners_x, corners_y) = board.inner_corners();
            let board_size = Size::new(corners_x as i32, corners_y as i32);

            let mut corners = Vector::<Point2f>::new();
            let found = calib3d::find_chessboard_corners(
                &image,
                board_size,
                &mut corners,
                calib3d::CALIB_CB_ADAPTIVE_THRESH,
            )
            .map_err(cv_err)?;

            if !found {
                return Err(BenchmarkError::CalibrationFailed(
                    "Could not find chessboard corners during calibration. Please ensure the camera can capture the projector output.".to_string(),
                ));
            }

            let criteria = TermCriteria::new(
                core::TermCriteria_EPS + core::TermCriteria_COUNT,
                30,
                0.1,
            )
            .map_err(cv_err)?;
            imgproc::corner_sub_pix(
                &image,
                &mut corners,
                Size::new(11, 11),
                Size::new(-1, -1),
                criteria,
            )
            .map_err(cv_err)?;

            let object: Vector<Point3f> = (0..corners_x * corners_y)
                .map(|j| Point3f::new((j / corners_x) as f32, (j % corners_x) as f32, 0.0))
                .collect();

            let mut object_points = Vector::<Vector<Point3f>>::new();
            object_points.push(object);
            let mut image_points = Vector::<Vector<Point2f>>::new();
            image_points.push(corners);

            let mut intrinsic = Mat::eye(3, 3, core::CV_64F)
                .map_err(cv_err)?
                .to_mat()
                .map_err(cv_err)?;
            let mut distortion = Mat::default();
            let mut rvecs = Vector::<Mat>::new();
            let mut tvecs = Vector::<Mat>::new();

            let error = calib3d::calibrate_camera_def(
                &object_points,
                &image_points,
                Size::new(width as i32, height as i32),
                &mut intrinsic,
                &mut distortion,
                &mut rvecs,
                &mut tvecs,
            )
            .map_err(cv_err)?;
            log::info!("Calibration reprojection error: {:.4}", error);

            let mut calibration = CameraCalibration::pinhole(1.0, 1.0, 0.0, 0.0);
            for row in 0..3 {
                for col in 0..3 {
                    calibration.intrinsic[row][col] =
                        *intrinsic.at_2d::<f64>(row as i32, col as i32).map_err(cv_err)?;
                }
            }
            let count = (distortion.total() as usize).min(5);
            for i in 0..count {
                calibration.distortion[i] = *distortion.at::<f64>(i as i32).map_err(cv_err)?;
            }

            Ok(calibration)
        }
    }
}

#[cfg(feature = "opencv")]
pub use opencv_impl::ChessboardCalibration;

/// Where calibrations are cached and how missing ones are produced.
pub struct Calibrator {
    pub cache_dir: PathBuf,
    pub consent: ConsentPolicy,
    pub solver: Box<dyn CalibrationSolver>,
}

impl Default for Calibrator {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("."),
            consent: ConsentPolicy::Prompt,
            solver: default_solver(),
        }
    }
}

#[cfg(feature = "opencv")]
fn default_solver() -> Box<dyn CalibrationSolver> {
    Box::new(ChessboardCalibration)
}

#[cfg(not(feature = "opencv"))]
fn default_solver() -> Box<dyn CalibrationSolver> {
    Box::new(NominalCalibration)
}

impl Calibrator {
    pub fn new(cache_dir: impl Into<PathBuf>, consent: ConsentPolicy) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            consent,
            solver: default_solver(),
        }
    }

    pub fn with_solver(mut self, solver: Box<dyn CalibrationSolver>) -> Self {
        self.solver = solver;
        self
    }

    /// Cache file for an infrastructure configuration.
    pub fn cache_path(&self, name: &str, setup: &InfrastructureSetup) -> PathBuf {
        self.cache_dir.join(format!(
            "{}.{}",
            configuration_hash(name, setup),
            CALIBRATION_EXTENSION
        ))
    }

    /// Ask whether a new calibration may be captured.
    fn request_consent(&self, name: &str) -> Result<bool> {
        match self.consent {
            ConsentPolicy::Accept => Ok(true),
            ConsentPolicy::Decline => Ok(false),
            ConsentPolicy::Prompt => {
                let mut stdout = std::io::stdout();
                writeln!(
                    stdout,
                    "Calibration for infrastructure {} and setup not found, calibrate now? \
                     (please ensure projected checkerboard pattern can be captured by camera) [y,n]",
                    name
                )?;
                stdout.flush()?;

                let mut line = String::new();
                std::io::stdin().lock().read_line(&mut line)?;
                Ok(matches!(line.trim().chars().next(), Some('y') | Some('Y')))
            }
        }
    }
}

/// Load the cached calibration for `source`, or capture and persist a new one.
pub fn ensure_calibrated<S: CaptureSource + ?Sized>(
    source: &mut S,
    ctx: &RunContext<'_>,
) -> Result<()> {
    if source.calibration().is_some() {
        return Ok(());
    }

    let setup = *source.setup();
    let name = source.name().to_string();
    let path = source.device().calibrator.cache_path(&name, &setup);

    if path.exists() {
        let calibration = CameraCalibration::load(&path)?;
        log::info!("Loaded calibration for {} from {}", name, path.display());
        source.device_mut().calibration = Some(calibration);
        return Ok(());
    }

    log::info!("No calibration cached for {} ({})", name, path.display());
    if !source.device().calibrator.request_consent(&name)? {
        return Err(BenchmarkError::CalibrationDeclined);
    }

    let board = Chessboard::for_projector(setup.projector.resolution);
    let pattern = board.render();

    source.set_calibrating(true);
    let captured = source.project_and_capture(&pattern, ctx);
    source.set_calibrating(false);

    let captured = captured?.ok_or_else(|| {
        BenchmarkError::CalibrationFailed("no frame captured for the calibration board".to_string())
    })?;

    let calibration = source
        .device()
        .calibrator
        .solver
        .solve(&captured, &board, &setup)?;
    calibration.save(&path)?;
    log::info!("Saved calibration for {} to {}", name, path.display());

    source.device_mut().calibration = Some(calibration);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;

    fn setup() -> InfrastructureSetup {
        InfrastructureSetup::new(
            DeviceConfig::new(640, 480, 60.0, 45.0),
            DeviceConfig::new(1024, 768, 40.0, 30.0),
            10.0,
        )
    }

    #[test]
    fn test_format_general() {
        assert_eq!(format_general(60.0), "60");
        assert_eq!(format_general(33.75), "33.75");
        assert_eq!(format_general(0.1), "0.1");
        assert_eq!(format_general(1.0 / 3.0), "0.333333");
        assert_eq!(format_general(1234567.0), "1.23457e+06");
        assert_eq!(format_general(0.00001), "1e-05");
        assert_eq!(format_general(-2.5), "-2.5");
    }

    #[test]
    fn test_configuration_string() {
        assert_eq!(
            configuration_string("slPhysicalInfrastructure", &setup()),
            "slPhysicalInfrastructure-[640 x 480]-60-45-[1024 x 768]-40-30-10"
        );
    }

    #[test]
    fn test_configuration_hash_matches_reference_values() {
        assert_eq!(configuration_hash("slPhysicalInfrastructure", &setup()), 32971440);
    }

    #[test]
    fn test_chessboard_layout() {
        let board = Chessboard::for_projector(Resolution::new(1024, 768));
        // min((768 - 40) / 7, (1024 - 40) / 10) = min(104, 98)
        assert_eq!(board.square_size, 98);
        assert_eq!(board.inner_corners(), (9, 6));

        assert!(!board.is_black(0, 0));
        assert!(!board.is_black(20, 20));
        assert!(board.is_black(20 + 98, 20));
        assert!(board.is_black(20, 20 + 98));
        assert!(!board.is_black(20 + 98, 20 + 98));
        assert!(!board.is_black(20 + 98 * 10, 20));

        let frame = board.render();
        assert_eq!(frame.width(), 1024);
        assert_eq!(frame.height(), 768);
    }

    #[test]
    fn test_calibration_file_roundtrip() {
        let dir = std::env::temp_dir().join(format!("sl_calibration_{}", std::process::id()));
        let path = dir.join("1234.xml");

        let mut calibration = CameraCalibration::pinhole(554.25, 553.0, 320.0, 240.5);
        calibration.distortion = [-0.12, 0.03, 0.001, -0.002, 0.0];
        calibration.save(&path).unwrap();

        let loaded = CameraCalibration::load(&path).unwrap();
        assert_eq!(loaded, calibration);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_opencv_file() {
        let dir = std::env::temp_dir().join(format!("sl_opencv_cal_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cv.xml");
        std::fs::write(
            &path,
            r#"<?xml version="1.0"?>
<opencv_storage>
<intrinsic type_id="opencv-matrix">
  <rows>3</rows>
  <cols>3</cols>
  <dt>f</dt>
  <data>
    5.54e+02 0. 320. 0. 5.53e+02 240. 0. 0. 1.</data></intrinsic>
<distortion type_id="opencv-matrix">
  <rows>1</rows>
  <cols>4</cols>
  <dt>d</dt>
  <data>
    -1.2e-01 3.e-02 0. 0.</data></distortion>
</opencv_storage>
"#,
        )
        .unwrap();

        let loaded = CameraCalibration::load(&path).unwrap();
        assert_eq!(loaded.fx(), 554.0);
        assert_eq!(loaded.cy(), 240.0);
        assert_eq!(loaded.distortion, [-0.12, 0.03, 0.0, 0.0, 0.0]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_nominal_calibration_from_fov() {
        let frame = Frame::new_rgb8(640, 480);
        let board = Chessboard::for_projector(Resolution::new(1024, 768));
        let cal = NominalCalibration.solve(&frame, &board, &setup()).unwrap();

        let expected_fx = 320.0 / (30.0f64).to_radians().tan();
        assert!((cal.fx() - expected_fx).abs() < 1e-9);
        assert_eq!(cal.cx(), 320.0);
        assert_eq!(cal.cy(), 240.0);
        assert!(!cal.has_distortion());
    }

    #[test]
    fn test_cache_path_uses_hash() {
        let calibrator = Calibrator::new("cache", ConsentPolicy::Decline);
        assert_eq!(
            calibrator.cache_path("slPhysicalInfrastructure", &setup()),
            PathBuf::from("cache/32971440.xml")
        );
    }
}
