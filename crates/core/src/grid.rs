//! Host-side intensity grids
//!
//! Stores a 2D field of heat values as a flat `Vec<f32>` in row-major order.
//! Used for the host snapshot, the host backend's working buffers and for
//! diagnostic readbacks.

use crate::config::GridDims;
use crate::error::{EngineError, Result};

/// Allocate a zeroed `f32` buffer, reporting failure instead of aborting
pub(crate) fn try_zeroed(len: usize, what: &'static str) -> Result<Vec<f32>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| EngineError::AllocationFailure {
            what,
            bytes: (len * std::mem::size_of::<f32>()) as u64,
        })?;
    data.resize(len, 0.0);
    Ok(data)
}

/// Summary of a grid's values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntensityStats {
    /// Smallest value
    pub min: f32,
    /// Largest value
    pub max: f32,
    /// Arithmetic mean
    pub mean: f32,
}

/// Row-major grid of heat values
#[derive(Debug, Clone, PartialEq)]
pub struct IntensityGrid {
    data: Vec<f32>,
    dims: GridDims,
}

impl IntensityGrid {
    /// Create a grid filled with zeros
    ///
    /// # Errors
    /// Returns [`EngineError::AllocationFailure`] if the buffer cannot be reserved
    pub fn zeroed(dims: GridDims) -> Result<Self> {
        Ok(Self {
            data: try_zeroed(dims.cells(), "intensity grid")?,
            dims,
        })
    }

    /// Wrap existing row-major data
    ///
    /// # Errors
    /// Returns [`EngineError::SizeMismatch`] if `data` does not cover `dims`
    pub fn from_vec(dims: GridDims, data: Vec<f32>) -> Result<Self> {
        if data.len() != dims.cells() {
            return Err(EngineError::SizeMismatch {
                expected: dims.cells(),
                actual: data.len(),
            });
        }
        Ok(Self { data, dims })
    }

    /// Wrap data already known to cover `dims`
    pub(crate) fn from_raw(dims: GridDims, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), dims.cells());
        Self { data, dims }
    }

    /// Grid dimensions
    #[must_use]
    pub fn dims(&self) -> GridDims {
        self.dims
    }

    /// Values in row-major order
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Mutable values in row-major order
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consume the grid, returning its storage
    #[must_use]
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Value at `(row, col)`
    ///
    /// # Panics
    ///
    /// Panics if coordinates are out of bounds
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        assert!(
            row < self.dims.height as usize && col < self.dims.width as usize,
            "Coordinates out of bounds"
        );
        self.data[self.dims.index(row, col)]
    }

    /// Set value at `(row, col)`
    ///
    /// # Panics
    ///
    /// Panics if coordinates are out of bounds
    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        assert!(
            row < self.dims.height as usize && col < self.dims.width as usize,
            "Coordinates out of bounds"
        );
        let idx = self.dims.index(row, col);
        self.data[idx] = value;
    }

    /// Fill the whole grid with `value`
    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    /// One row of the grid
    #[must_use]
    pub fn row(&self, row: usize) -> &[f32] {
        let width = self.dims.width as usize;
        &self.data[row * width..(row + 1) * width]
    }

    /// One column of the grid, top to bottom
    #[must_use]
    pub fn column(&self, col: usize) -> Vec<f32> {
        (0..self.dims.height as usize)
            .map(|row| self.get(row, col))
            .collect()
    }

    /// Minimum, maximum and mean of all values
    #[must_use]
    pub fn stats(&self) -> IntensityStats {
        stats_of(&self.data)
    }
}

/// Minimum, maximum and mean of a slice (all zero for an empty slice)
#[must_use]
pub fn stats_of(values: &[f32]) -> IntensityStats {
    if values.is_empty() {
        return IntensityStats {
            min: 0.0,
            max: 0.0,
            mean: 0.0,
        };
    }
    let (min, max, sum) = values.iter().fold(
        (f32::INFINITY, f32::NEG_INFINITY, 0.0_f64),
        |(min, max, sum), &v| (min.min(v), max.max(v), sum + f64::from(v)),
    );
    IntensityStats {
        min,
        max,
        mean: (sum / values.len() as f64) as f32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_creation() {
        let grid = IntensityGrid::zeroed(GridDims::new(10, 20)).unwrap();
        assert_eq!(grid.dims().width, 10);
        assert_eq!(grid.dims().height, 20);
        assert_eq!(grid.as_slice().len(), 200);
        assert!(grid.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_grid_get_set() {
        let mut grid = IntensityGrid::zeroed(GridDims::new(10, 10)).unwrap();
        grid.set(4, 3, 123.45);
        assert_eq!(grid.get(4, 3), 123.45);

        // Verify row-major indexing
        assert_eq!(grid.as_slice()[4 * 10 + 3], 123.45);
    }

    #[test]
    fn test_row_and_column() {
        let dims = GridDims::new(3, 2);
        let grid = IntensityGrid::from_vec(dims, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(grid.row(1), &[4.0, 5.0, 6.0]);
        assert_eq!(grid.column(2), vec![3.0, 6.0]);
    }

    #[test]
    fn test_from_vec_size_mismatch() {
        let err = IntensityGrid::from_vec(GridDims::new(2, 2), vec![0.0; 3]).unwrap_err();
        assert!(matches!(
            err,
            EngineError::SizeMismatch {
                expected: 4,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_stats() {
        let dims = GridDims::new(2, 2);
        let grid = IntensityGrid::from_vec(dims, vec![0.0, 10.0, 20.0, 30.0]).unwrap();
        let stats = grid.stats();
        assert_eq!(stats.min, 0.0);
        assert_eq!(stats.max, 30.0);
        assert_eq!(stats.mean, 15.0);
        assert_eq!(stats_of(&[]).mean, 0.0);
    }

    #[test]
    fn test_fill() {
        let mut grid = IntensityGrid::zeroed(GridDims::new(5, 5)).unwrap();
        grid.fill(99.9);
        assert!(grid.as_slice().iter().all(|&v| v == 99.9));
    }

    #[test]
    #[should_panic(expected = "Coordinates out of bounds")]
    fn test_grid_bounds_check() {
        let grid = IntensityGrid::zeroed(GridDims::new(10, 10)).unwrap();
        let _ = grid.get(5, 10);
    }
}
