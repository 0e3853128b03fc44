//! Sparse depth sample storage.

use std::collections::HashMap;

/// A validated depth measurement at pattern column `x`, camera row `y`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthSample {
    pub x: u32,
    pub y: u32,
    pub z: f64,
}

impl DepthSample {
    pub fn new(x: u32, y: u32, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Sparse grid of depth samples over `[0, width) x [0, height)`.
///
/// A cell is either valued (holds a displacement) or absent. Absent cells are
/// never visible to aggregate queries.
#[derive(Debug, Clone, Default)]
pub struct DepthGrid {
    width: u32,
    height: u32,
    values: HashMap<(u32, u32), f64>,
}

impl DepthGrid {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            values: HashMap::new(),
        }
    }

    /// Nominal domain as (pattern width, camera height).
    pub fn domain(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Store (or overwrite) the value at (x, y).
    pub fn store_result(&mut self, x: u32, y: u32, z: f64) {
        self.values.insert((x, y), z);
    }

    pub fn store(&mut self, sample: DepthSample) {
        self.store_result(sample.x, sample.y, sample.z);
    }

    pub fn is_depth_data_valued(&self, x: u32, y: u32) -> bool {
        self.values.contains_key(&(x, y))
    }

    /// Value at (x, y), or `None` for an unvalued cell.
    pub fn get_depth_data(&self, x: u32, y: u32) -> Option<f64> {
        self.values.get(&(x, y)).copied()
    }

    /// Total number of valued cells.
    pub fn valued_count(&self) -> usize {
        self.values.len()
    }

    /// Number of valued cells inside `[0, width) x [0, height)`.
    pub fn valued_count_in(&self, width: u32, height: u32) -> usize {
        self.values
            .keys()
            .filter(|(x, y)| *x < width && *y < height)
            .count()
    }

    /// Valued samples inside `[0, width) x [0, height)`, ordered by column then row.
    pub fn samples_in(&self, width: u32, height: u32) -> Vec<DepthSample> {
        let mut samples: Vec<DepthSample> = self
            .values
            .iter()
            .filter(|((x, y), _)| *x < width && *y < height)
            .map(|(&(x, y), &z)| DepthSample::new(x, y, z))
            .collect();
        samples.sort_by_key(|s| (s.x, s.y));
        samples
    }
}

impl crate::solver::ResultSink for DepthGrid {
    fn store_sample(&mut self, sample: DepthSample) {
        self.store(sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unstored_cells_are_unvalued() {
        let grid = DepthGrid::new(16, 8);
        for x in 0..16 {
            for y in 0..8 {
                assert!(!grid.is_depth_data_valued(x, y));
                assert_eq!(grid.get_depth_data(x, y), None);
            }
        }
        assert_eq!(grid.valued_count(), 0);
    }

    #[test]
    fn test_store_overwrites() {
        let mut grid = DepthGrid::new(16, 8);
        grid.store_result(3, 4, 1.5);
        assert!(grid.is_depth_data_valued(3, 4));
        assert_eq!(grid.get_depth_data(3, 4), Some(1.5));

        grid.store_result(3, 4, -2.25);
        assert_eq!(grid.get_depth_data(3, 4), Some(-2.25));
        assert_eq!(grid.valued_count(), 1);
        assert!(!grid.is_depth_data_valued(4, 3));
    }

    #[test]
    fn test_samples_ordered_by_column() {
        let mut grid = DepthGrid::new(16, 8);
        grid.store(DepthSample::new(5, 1, 1.0));
        grid.store(DepthSample::new(2, 7, 2.0));
        grid.store(DepthSample::new(2, 3, 3.0));
        grid.store(DepthSample::new(20, 0, 4.0));

        let samples = grid.samples_in(16, 8);
        let coords: Vec<(u32, u32)> = samples.iter().map(|s| (s.x, s.y)).collect();
        assert_eq!(coords, vec![(2, 3), (2, 7), (5, 1)]);
        assert_eq!(grid.valued_count_in(16, 8), 3);
        assert_eq!(grid.valued_count(), 4);
    }
}
