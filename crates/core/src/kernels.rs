//! Host reference kernels
//!
//! Data-parallel implementations of the propagation stencil and the downsample
//! box filter. The host backend dispatches them on its rayon pool; the GPU
//! shaders in `engine/shaders/` compute the same expressions.
//!
//! Grids are row-major: `row` walks the height axis, `col` the width axis.
//! Heat enters at `col == 0` and travels towards increasing `col` while being
//! low-pass filtered across rows, which wrap toroidally.

use crate::config::{GridDims, StencilWeights};
use rayon::prelude::*;

/// Row index `delta` rows away from `row`, wrapping around `height`
///
/// `wrap_row(0, -1, h) == h - 1` and `wrap_row(h - 1, 1, h) == 0`.
#[inline]
#[must_use]
pub fn wrap_row(row: usize, delta: isize, height: usize) -> usize {
    (row as isize + delta).rem_euclid(height as isize) as usize
}

/// One propagation step from `current` into `next`
///
/// Column 0 of `next` receives the fuel row verbatim. Every other cell blends the
/// three cells of the previous column centred on its row:
///
/// ```text
/// next[r, c] = c1 * cur[r, c-1] + c2 * cur[r-1, c-1] + c2 * cur[r+1, c-1]
/// ```
///
/// # Arguments
///
/// * `current` - Current working buffer (read)
/// * `next` - Next working buffer (written)
/// * `fuel` - One value per row, injected at column 0
/// * `dims` - Simulation grid dimensions
/// * `weights` - Stencil blend weights
pub fn propagate(
    current: &[f32],
    next: &mut [f32],
    fuel: &[f32],
    dims: GridDims,
    weights: StencilWeights,
) {
    let width = dims.width as usize;
    let height = dims.height as usize;
    debug_assert_eq!(current.len(), dims.cells());
    debug_assert_eq!(next.len(), dims.cells());
    debug_assert_eq!(fuel.len(), height);

    let StencilWeights { c1, c2 } = weights;

    next.par_chunks_mut(width)
        .enumerate()
        .for_each(|(row, out)| {
            let up = wrap_row(row, -1, height);
            let down = wrap_row(row, 1, height);
            let centre = &current[row * width..(row + 1) * width];
            let above = &current[up * width..(up + 1) * width];
            let below = &current[down * width..(down + 1) * width];

            out[0] = fuel[row];
            for col in 1..width {
                out[col] = (c1 * centre[col - 1]) + (c2 * above[col - 1]) + (c2 * below[col - 1]);
            }
        });
}

/// Box-filter `src` into `dst`, averaging `factor × factor` blocks
///
/// `dst` has `src_dims / factor` cells. A factor of one is a plain copy.
pub fn downsample(src: &[f32], src_dims: GridDims, dst: &mut [f32], factor: u32) {
    let factor = factor as usize;
    let src_width = src_dims.width as usize;
    let out_width = src_width / factor;
    debug_assert_eq!(src.len(), src_dims.cells());
    debug_assert_eq!(dst.len(), out_width * (src_dims.height as usize / factor));

    let inv_area = 1.0 / (factor * factor) as f32;

    dst.par_chunks_mut(out_width)
        .enumerate()
        .for_each(|(out_row, out)| {
            for (out_col, cell) in out.iter_mut().enumerate() {
                let mut sum = 0.0_f32;
                for row in out_row * factor..(out_row + 1) * factor {
                    let start = row * src_width + out_col * factor;
                    sum += src[start..start + factor].iter().sum::<f32>();
                }
                *cell = sum * inv_area;
            }
        });
}

/// Fill `data` with each cell's row index, used by the context self-test
pub fn fill_row_index(data: &mut [f32], dims: GridDims) {
    let width = dims.width as usize;
    data.par_chunks_mut(width)
        .enumerate()
        .for_each(|(row, out)| out.fill(row as f32));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Quality;

    const BASIC: StencilWeights = Quality::Basic.weights();

    #[test]
    fn test_wrap_row() {
        assert_eq!(wrap_row(0, -1, 4), 3);
        assert_eq!(wrap_row(3, 1, 4), 0);
        assert_eq!(wrap_row(2, 1, 4), 3);
        assert_eq!(wrap_row(2, -1, 4), 1);
        assert_eq!(wrap_row(0, 1, 1), 0);
        assert_eq!(wrap_row(0, -1, 1), 0);
    }

    #[test]
    fn test_edge_column_is_fuel() {
        let dims = GridDims::new(4, 3);
        let current = vec![50.0; dims.cells()];
        let mut next = vec![0.0; dims.cells()];
        let fuel = [64.0, 100.0, 128.0];

        propagate(&current, &mut next, &fuel, dims, BASIC);

        for row in 0..3 {
            assert_eq!(next[dims.index(row, 0)], fuel[row]);
        }
    }

    #[test]
    fn test_stencil_blends_previous_column() {
        let dims = GridDims::new(3, 3);
        #[rustfmt::skip]
        let current = vec![
            1.0, 10.0, 0.0,
            2.0, 20.0, 0.0,
            3.0, 30.0, 0.0,
        ];
        let mut next = vec![0.0; dims.cells()];
        propagate(&current, &mut next, &[0.0; 3], dims, BASIC);

        // Middle row reads rows 0..=2 of the column behind it
        let expected = 0.53 * 2.0 + 0.225 * 1.0 + 0.225 * 3.0;
        assert!((next[dims.index(1, 1)] - expected).abs() < 1e-6);
        let expected = 0.53 * 20.0 + 0.225 * 10.0 + 0.225 * 30.0;
        assert!((next[dims.index(1, 2)] - expected).abs() < 1e-5);
    }

    #[test]
    fn test_stencil_wraps_rows() {
        let dims = GridDims::new(2, 4);
        // Heat only in the last row: row 0 must see it as its upper neighbour
        let mut current = vec![0.0; dims.cells()];
        current[dims.index(3, 0)] = 100.0;
        let mut next = vec![0.0; dims.cells()];

        propagate(&current, &mut next, &[0.0; 4], dims, BASIC);

        assert!((next[dims.index(0, 1)] - 22.5).abs() < 1e-5);
        assert!((next[dims.index(2, 1)] - 22.5).abs() < 1e-5);
        assert!((next[dims.index(3, 1)] - 53.0).abs() < 1e-5);
        assert_eq!(next[dims.index(1, 1)], 0.0);
    }

    #[test]
    fn test_single_row_reads_itself_three_times() {
        let dims = GridDims::new(2, 1);
        let current = vec![10.0, 0.0];
        let mut next = vec![0.0; 2];
        propagate(&current, &mut next, &[7.0], dims, BASIC);
        assert_eq!(next[0], 7.0);
        assert!((next[1] - 10.0 * BASIC.sum()).abs() < 1e-5);
    }

    #[test]
    fn test_propagate_is_deterministic() {
        let dims = GridDims::new(16, 8);
        let current: Vec<f32> = (0..dims.cells()).map(|i| (i % 17) as f32 * 3.5).collect();
        let fuel: Vec<f32> = (0..8).map(|i| 64.0 + i as f32 * 8.0).collect();
        let mut a = vec![0.0; dims.cells()];
        let mut b = vec![0.0; dims.cells()];

        propagate(&current, &mut a, &fuel, dims, BASIC);
        propagate(&current, &mut b, &fuel, dims, BASIC);

        assert_eq!(a, b);
    }

    #[test]
    fn test_downsample_constant_blocks() {
        let factor = 4;
        let src_dims = GridDims::new(8, 8);
        let mut src = vec![0.0; src_dims.cells()];
        for row in 0..8 {
            for col in 0..8 {
                src[src_dims.index(row, col)] = ((row / 4) * 2 + col / 4) as f32 * 10.0 + 5.0;
            }
        }
        let mut dst = vec![0.0; 4];
        downsample(&src, src_dims, &mut dst, factor);
        assert_eq!(dst, vec![5.0, 15.0, 25.0, 35.0]);
    }

    #[test]
    fn test_downsample_averages() {
        let src_dims = GridDims::new(2, 2);
        let mut dst = vec![0.0; 1];
        downsample(&[0.0, 1.0, 2.0, 5.0], src_dims, &mut dst, 2);
        assert_eq!(dst[0], 2.0);
    }

    #[test]
    fn test_downsample_factor_one_copies() {
        let dims = GridDims::new(3, 2);
        let src = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut dst = vec![0.0; 6];
        downsample(&src, dims, &mut dst, 1);
        assert_eq!(dst, src);
    }

    #[test]
    fn test_fill_row_index() {
        let dims = GridDims::new(3, 4);
        let mut data = vec![0.0; dims.cells()];
        fill_row_index(&mut data, dims);
        assert_eq!(data[dims.index(3, 0)], 3.0);
        assert_eq!(data[dims.index(1, 2)], 1.0);
    }
}
