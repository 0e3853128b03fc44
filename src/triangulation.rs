//! Camera/projector triangulation.
//!
//! Depth is approximated from the angular offset between a projector column
//! and the camera column that observed it. Both devices are assumed to have
//! symmetric fields of view and to be separated along a single axis, so this
//! is a similar-triangles estimate rather than a calibrated stereo
//! reconstruction.

use crate::config::InfrastructureSetup;

/// Geometry needed to turn a column correspondence into a displacement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangulationInput {
    /// Number of pattern columns.
    pub pattern_width: f64,
    /// Camera image width in pixels.
    pub camera_width: f64,
    /// Camera horizontal field of view in degrees.
    pub camera_hfov: f64,
    /// Projector horizontal field of view in degrees.
    pub projector_hfov: f64,
    /// Camera-projector separation.
    pub separation: f64,
}

impl TriangulationInput {
    pub fn from_setup(setup: &InfrastructureSetup, pattern_width: u32) -> Self {
        Self {
            pattern_width: pattern_width as f64,
            camera_width: setup.camera.resolution.width as f64,
            camera_hfov: setup.camera.horizontal_fov,
            projector_hfov: setup.projector.horizontal_fov,
            separation: setup.separation,
        }
    }

    /// Displacement for pattern column `x_pattern` matched at camera column `x_camera`.
    ///
    /// A zero denominator yields an infinite (or NaN) result; callers must
    /// discard non-finite values.
    pub fn displacement(&self, x_pattern: f64, x_camera: f64) -> f64 {
        let xc = x_camera / self.camera_width - 0.5;
        let xp = x_pattern / self.pattern_width - 0.5;

        let tgc = half_angle_tan(self.camera_hfov);
        let tgp = half_angle_tan(self.projector_hfov);

        self.separation / 2.0 / (tgp * xp - tgc * xc)
    }
}

/// `tan(fov / 2)` for a field of view given in degrees.
pub fn half_angle_tan(fov_degrees: f64) -> f64 {
    (fov_degrees * std::f64::consts::PI / 360.0).tan()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(separation: f64, fov: f64, width: f64) -> TriangulationInput {
        TriangulationInput {
            pattern_width: width,
            camera_width: width,
            camera_hfov: fov,
            projector_hfov: fov,
            separation,
        }
    }

    #[test]
    fn test_centered_columns_are_not_finite() {
        let d = input(10.0, 60.0, 100.0).displacement(50.0, 50.0);
        assert!(!d.is_finite());
    }

    #[test]
    fn test_golden_displacement() {
        // xpNorm = 0, xcNorm = -0.09375
        let d = input(60.0, 40.0, 640.0).displacement(320.0, 260.0);
        let expected = 30.0 / (half_angle_tan(40.0) * 0.09375);
        assert!((d - expected).abs() < 1e-9);
        assert!((d - 879.192_774_225_479_2).abs() < 1e-6);
    }

    #[test]
    fn test_sign_follows_offset() {
        let t = input(60.0, 40.0, 640.0);
        assert!(t.displacement(320.0, 260.0) > 0.0);
        assert!(t.displacement(320.0, 380.0) < 0.0);
    }

    #[test]
    fn test_from_setup_uses_camera_width() {
        let setup = InfrastructureSetup::default();
        let t = TriangulationInput::from_setup(&setup, 1024);
        assert_eq!(t.pattern_width, 1024.0);
        assert_eq!(t.camera_width, 1920.0);
        assert_eq!(t.separation, 10.0);
    }
}
