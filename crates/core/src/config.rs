//! Engine configuration and quality presets
//!
//! The basic and supersampled variants share one engine. The preset only decides
//! the supersample factor and the stencil blend weights.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Logical width used by the terminal demo
pub const DEFAULT_WIDTH: u32 = 128;

/// Logical height used by the terminal demo
pub const DEFAULT_HEIGHT: u32 = 32;

/// Supersample factor of the [`Quality::Supersampled`] preset
pub const SUPERSAMPLE_FACTOR: u32 = 8;

/// Blend weights of the 3-tap propagation stencil
///
/// `c1` weights the cell directly behind, `c2` each of its two row neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StencilWeights {
    /// Weight of `current[row, col - 1]`
    pub c1: f32,
    /// Weight of `current[row ± 1, col - 1]`
    pub c2: f32,
}

impl StencilWeights {
    /// Total gain of one stencil application (`c1 + 2 * c2`)
    #[must_use]
    pub fn sum(&self) -> f32 {
        self.c1 + 2.0 * self.c2
    }

    /// True when a step can never add energy beyond the injected fuel
    #[must_use]
    pub fn is_dissipative(&self) -> bool {
        self.sum() <= 1.0
    }
}

/// Quality preset selecting the simulation resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Quality {
    /// Simulate directly at the output resolution
    #[default]
    Basic,
    /// Simulate at 8x resolution and box-filter down to the output grid
    Supersampled,
}

impl Quality {
    /// Integer factor applied to both axes of the simulation grid
    #[must_use]
    pub const fn supersample_factor(&self) -> u32 {
        match self {
            Self::Basic => 1,
            Self::Supersampled => SUPERSAMPLE_FACTOR,
        }
    }

    /// Stencil weights tuned for this preset
    ///
    /// Both sum slightly below one so heat decays as it travels.
    #[must_use]
    pub const fn weights(&self) -> StencilWeights {
        match self {
            Self::Basic => StencilWeights { c1: 0.53, c2: 0.225 },
            Self::Supersampled => StencilWeights {
                c1: 0.497,
                c2: 0.251,
            },
        }
    }

    /// Whether the downsample stage runs
    #[must_use]
    pub const fn is_supersampled(&self) -> bool {
        self.supersample_factor() > 1
    }
}

/// Width and height of a row-major grid
///
/// `height` is the row axis, `width` the column axis. Cell `(row, col)` lives at
/// `row * width + col`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridDims {
    /// Number of columns
    pub width: u32,
    /// Number of rows
    pub height: u32,
}

impl GridDims {
    /// Create grid dimensions
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total number of cells
    #[must_use]
    pub const fn cells(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Flat row-major index of `(row, col)`
    #[must_use]
    pub const fn index(&self, row: usize, col: usize) -> usize {
        row * self.width as usize + col
    }

    /// Size in bytes of an `f32` buffer covering the grid
    #[must_use]
    pub const fn byte_size(&self) -> u64 {
        (self.cells() * std::mem::size_of::<f32>()) as u64
    }

    /// Both axes multiplied by `factor`, or `None` on overflow
    #[must_use]
    pub fn scaled(&self, factor: u32) -> Option<Self> {
        Some(Self {
            width: self.width.checked_mul(factor)?,
            height: self.height.checked_mul(factor)?,
        })
    }
}

/// Construction parameters of a [`FireEngine`](crate::FireEngine)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FireConfig {
    /// Logical output width in cells
    pub width: u32,
    /// Logical output height in cells
    pub height: u32,
    /// Simulation quality preset
    #[serde(default)]
    pub quality: Quality,
}

impl Default for FireConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            quality: Quality::Basic,
        }
    }
}

impl FireConfig {
    /// Create a configuration
    #[must_use]
    pub const fn new(width: u32, height: u32, quality: Quality) -> Self {
        Self {
            width,
            height,
            quality,
        }
    }

    /// Check that both dimensions are positive and the simulation grid fits in memory
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidDimensions`] otherwise
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(EngineError::InvalidDimensions {
                width: self.width,
                height: self.height,
                reason: "both dimensions must be positive",
            });
        }
        let sim = self
            .logical_dims()
            .scaled(self.quality.supersample_factor())
            .ok_or(EngineError::InvalidDimensions {
                width: self.width,
                height: self.height,
                reason: "supersampled grid overflows u32",
            })?;
        // Flat indices are computed in u32 on the GPU
        if u32::try_from(sim.cells()).is_err() {
            return Err(EngineError::InvalidDimensions {
                width: self.width,
                height: self.height,
                reason: "simulation grid has more than u32::MAX cells",
            });
        }
        Ok(())
    }

    /// Output grid dimensions
    #[must_use]
    pub const fn logical_dims(&self) -> GridDims {
        GridDims::new(self.width, self.height)
    }

    /// Dimensions of the working buffers
    ///
    /// Only meaningful after [`validate`](Self::validate) succeeded.
    #[must_use]
    pub fn simulation_dims(&self) -> GridDims {
        let factor = self.quality.supersample_factor();
        GridDims::new(
            self.width.saturating_mul(factor),
            self.height.saturating_mul(factor),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_are_dissipative() {
        for quality in [Quality::Basic, Quality::Supersampled] {
            let w = quality.weights();
            assert!(w.is_dissipative(), "{quality:?} gains energy: {}", w.sum());
            assert!(w.sum() > 0.95, "{quality:?} decays too fast: {}", w.sum());
        }
    }

    #[test]
    fn test_supersample_factor() {
        assert_eq!(Quality::Basic.supersample_factor(), 1);
        assert_eq!(Quality::Supersampled.supersample_factor(), 8);
        assert!(!Quality::Basic.is_supersampled());
        assert!(Quality::Supersampled.is_supersampled());
    }

    #[test]
    fn test_simulation_dims() {
        let basic = FireConfig::new(128, 32, Quality::Basic);
        assert_eq!(basic.simulation_dims(), GridDims::new(128, 32));

        let hq = FireConfig::new(128, 32, Quality::Supersampled);
        assert_eq!(hq.simulation_dims(), GridDims::new(1024, 256));
        assert_eq!(hq.logical_dims(), GridDims::new(128, 32));
    }

    #[test]
    fn test_validate_rejects_zero() {
        assert!(FireConfig::new(0, 32, Quality::Basic).validate().is_err());
        assert!(FireConfig::new(32, 0, Quality::Basic).validate().is_err());
        assert!(FireConfig::new(4, 4, Quality::Basic).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_overflow() {
        let huge = FireConfig::new(u32::MAX / 2, 4, Quality::Supersampled);
        assert!(matches!(
            huge.validate(),
            Err(EngineError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_grid_index_is_row_major() {
        let dims = GridDims::new(5, 3);
        assert_eq!(dims.cells(), 15);
        assert_eq!(dims.index(0, 0), 0);
        assert_eq!(dims.index(1, 0), 5);
        assert_eq!(dims.index(2, 4), 14);
        assert_eq!(dims.byte_size(), 60);
    }
}
