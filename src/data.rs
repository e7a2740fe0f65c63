//! Core data model: the voxel matrix, its spatial geometry, and the
//! per-voxel fit-result record that flows between pipeline stages.
//!
//! See `SPEC_FULL.md` §3 for the authoritative shapes and invariants.

use ndarray::Array2;

use crate::fit::FailReason;

/// `N × T` time series matrix: one row per valid voxel.
pub type VoxelMatrix<F> = Array2<F>;

/// `N × L` correlation (or Gaussian-model) cube: one row per valid voxel.
pub type VoxelCube<F> = Array2<F>;

/// Maps the `N` valid-voxel row order back to native `(x, y, z)` space and
/// forward again, so that spatially-local operations (the despeckle median
/// filter) can materialize a lag map into its native shape and scatter the
/// result back.
///
/// Row order is fixed at construction time and never reordered across
/// passes (`SPEC_FULL.md` §3, "Lifecycle").
#[derive(Debug, Clone)]
pub struct VoxelGeometry {
    shape: (usize, usize, usize),
    /// Row `i` corresponds to native flat index `valid_indices[i]`, where
    /// flat index = `x + nx*(y + ny*z)`. Strictly increasing.
    valid_indices: Vec<usize>,
}

impl VoxelGeometry {
    /// Build the geometry from a boolean mask volume stored in flat,
    /// x-fastest order.
    pub fn from_mask(shape: (usize, usize, usize), mask: &[bool]) -> Self {
        let (nx, ny, nz) = shape;
        assert_eq!(mask.len(), nx * ny * nz, "mask length must match shape");
        let valid_indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &v)| v.then_some(i))
            .collect();
        Self {
            shape,
            valid_indices,
        }
    }

    /// Number of valid voxels, `N`.
    pub fn len(&self) -> usize {
        self.valid_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valid_indices.is_empty()
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.shape
    }

    pub fn valid_indices(&self) -> &[usize] {
        &self.valid_indices
    }

    /// Native `(x, y, z)` coordinate of row `row`.
    pub fn coords_of_row(&self, row: usize) -> (usize, usize, usize) {
        let flat = self.valid_indices[row];
        let (nx, ny, _nz) = self.shape;
        let z = flat / (nx * ny);
        let rem = flat % (nx * ny);
        let y = rem / nx;
        let x = rem % nx;
        (x, y, z)
    }

    /// Scatter a per-row scalar vector into a full flat native volume,
    /// filling non-valid voxels with `fill`.
    pub fn scatter_to_volume<T: Copy>(&self, rows: &[T], fill: T) -> Vec<T> {
        let (nx, ny, nz) = self.shape;
        let mut out = vec![fill; nx * ny * nz];
        for (row, &flat) in self.valid_indices.iter().enumerate() {
            out[flat] = rows[row];
        }
        out
    }

    /// Read back a per-row scalar vector from a full flat native volume
    /// (inverse of [`Self::scatter_to_volume`]).
    pub fn gather_from_volume<T: Copy>(&self, volume: &[T]) -> Vec<T> {
        self.valid_indices.iter().map(|&flat| volume[flat]).collect()
    }
}

/// Per-voxel correlation-fit record. `SPEC_FULL.md` §3 "Fit results" /
/// §4.3 "Output contract".
#[derive(Debug, Clone)]
pub struct FitResults<F> {
    /// Fitted lag, seconds.
    pub lag: Vec<F>,
    /// Fitted peak amplitude.
    pub amp: Vec<F>,
    /// Fitted peak width (sigma), seconds.
    pub sigma: Vec<F>,
    /// `true` iff the voxel passed threshold enforcement.
    pub mask: Vec<bool>,
    /// Failure-mode bitset (zero iff the fit was clean).
    pub fail: Vec<FailReason>,
}

impl<F: Copy + num_traits::Zero> FitResults<F> {
    /// Allocate a zeroed record for `n` voxels.
    pub fn zeros(n: usize) -> Self {
        Self {
            lag: vec![F::zero(); n],
            amp: vec![F::zero(); n],
            sigma: vec![F::zero(); n],
            mask: vec![false; n],
            fail: vec![FailReason::empty(); n],
        }
    }

    pub fn len(&self) -> usize {
        self.lag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lag.is_empty()
    }
}
