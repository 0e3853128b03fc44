//! Configuration and serialization module.

mod benchmark;

pub use benchmark::{
    load_config, BenchmarkConfig, ConsentPolicy, ExperimentConfig, InfrastructureConfig,
    MetricConfig, SolverConfig, SourceConfig,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel resolution of a camera or projector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} x {}]", self.width, self.height)
    }
}

/// Optical configuration of a single device (camera or projector).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Native resolution.
    pub resolution: Resolution,
    /// Horizontal field of view in degrees.
    pub horizontal_fov: f64,
    /// Vertical field of view in degrees.
    pub vertical_fov: f64,
}

impl DeviceConfig {
    pub fn new(width: u32, height: u32, horizontal_fov: f64, vertical_fov: f64) -> Self {
        Self {
            resolution: Resolution::new(width, height),
            horizontal_fov,
            vertical_fov,
        }
    }
}

/// Camera/projector pair geometry shared by every capture source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InfrastructureSetup {
    pub camera: DeviceConfig,
    pub projector: DeviceConfig,
    /// Distance between the camera and the projector.
    pub separation: f64,
}

impl InfrastructureSetup {
    pub fn new(camera: DeviceConfig, projector: DeviceConfig, separation: f64) -> Self {
        Self {
            camera,
            projector,
            separation,
        }
    }
}

impl Default for InfrastructureSetup {
    fn default() -> Self {
        Self {
            camera: DeviceConfig::new(1920, 1080, 60.0, 33.75),
            projector: DeviceConfig::new(1920, 1080, 40.0, 22.5),
            separation: 10.0,
        }
    }
}
