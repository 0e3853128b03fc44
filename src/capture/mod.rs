//! Capture sources: everything that turns a projected pattern into a camera frame.
//!
//! Three variants are provided:
//! - [`PhysicalSource`]: a live projector/camera pair
//! - [`VirtualRenderSource`]: a scene rendered by an external process
//! - [`ReplaySource`]: captures recorded by an earlier run

mod calibration;
mod physical;
mod replay;
mod undistort;
mod virtual_render;

pub use calibration::{
    configuration_hash, configuration_string, ensure_calibrated, CalibrationSolver, Calibrator,
    CameraCalibration, Chessboard, NominalCalibration,
};
#[cfg(feature = "opencv")]
pub use calibration::ChessboardCalibration;
pub use physical::{FrameGrabber, ImageFileDisplay, PatternDisplay, PhysicalSource};
#[cfg(feature = "camera")]
pub use physical::NokhwaGrabber;
pub use replay::ReplaySource;
pub use undistort::undistort;
pub use virtual_render::VirtualRenderSource;

pub(crate) use calibration::format_general;

use std::cell::RefCell;
use std::rc::Rc;

use crate::config::InfrastructureSetup;
use crate::error::Result;
use crate::experiment::RunContext;

/// A captured or generated image.
pub type Frame = image::DynamicImage;

/// Capture source handle shared between experiments; at most one run may hold it.
pub type SharedCaptureSource = Rc<RefCell<dyn CaptureSource>>;

/// Wrap a capture source so several experiments can reference it.
pub fn share_source<S: CaptureSource + 'static>(source: S) -> SharedCaptureSource {
    Rc::new(RefCell::new(source))
}

/// Capture source variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    Physical,
    VirtualRendered,
    FileReplay,
    /// Sources supplied by library users (test rigs, custom hardware).
    Custom,
}

impl std::fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureKind::Physical => write!(f, "physical"),
            CaptureKind::VirtualRendered => write!(f, "virtual"),
            CaptureKind::FileReplay => write!(f, "replay"),
            CaptureKind::Custom => write!(f, "custom"),
        }
    }
}

/// Configuration and calibration state common to every capture source.
pub struct DeviceState {
    /// Name used in experiment identifiers and the calibration hash.
    pub name: String,
    pub setup: InfrastructureSetup,
    pub calibration: Option<CameraCalibration>,
    pub calibrator: Calibrator,
}

impl DeviceState {
    pub fn new(name: impl Into<String>, setup: InfrastructureSetup) -> Self {
        Self {
            name: name.into(),
            setup,
            calibration: None,
            calibrator: Calibrator::default(),
        }
    }

    pub fn with_calibrator(mut self, calibrator: Calibrator) -> Self {
        self.calibrator = calibrator;
        self
    }

    pub fn with_calibration(mut self, calibration: CameraCalibration) -> Self {
        self.calibration = Some(calibration);
        self
    }
}

/// Supplies a captured frame for a projected pattern.
pub trait CaptureSource {
    fn kind(&self) -> CaptureKind;

    fn device(&self) -> &DeviceState;

    fn device_mut(&mut self) -> &mut DeviceState;

    /// Project `pattern` and return what the camera saw.
    ///
    /// `Ok(None)` is a soft failure: the frame is absent but the run continues.
    fn project_and_capture(&mut self, pattern: &Frame, ctx: &RunContext<'_>)
        -> Result<Option<Frame>>;

    /// Called around the calibration capture so sources can switch scenes.
    fn set_calibrating(&mut self, _calibrating: bool) {}

    fn name(&self) -> &str {
        &self.device().name
    }

    fn setup(&self) -> &InfrastructureSetup {
        &self.device().setup
    }

    fn calibration(&self) -> Option<&CameraCalibration> {
        self.device().calibration.as_ref()
    }

    /// Load the cached calibration or run the calibration procedure.
    fn ensure_calibrated(&mut self, ctx: &RunContext<'_>) -> Result<()> {
        ensure_calibrated(self, ctx)
    }
}
