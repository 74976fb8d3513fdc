//! Fixed-range log10 binning over the event feature space.
//!
//! Every statistic in this crate lives on one of three axes: log10 of the
//! coherent SNR, log10 of the combined chi-square, and log10 of the rank
//! statistic. `cmin`/`cmax` are the centers of the first and last bin, so
//! `step = (cmax - cmin) / (nbin - 1)` and bin `i` covers
//! `[cmin - step/2 + i*step, cmin + step/2 + i*step]`.

use serde::{Deserialize, Serialize};

pub const LOG_SNR_CMIN: f64 = 0.54;
pub const LOG_SNR_CMAX: f64 = 3.0;
pub const LOG_SNR_NBIN: usize = 300;

pub const LOG_CHISQ_CMIN: f64 = -1.2;
pub const LOG_CHISQ_CMAX: f64 = 3.5;
pub const LOG_CHISQ_NBIN: usize = 300;

/// Rank values below 10^-30 are extrapolated into the lowest bin.
pub const LOG_RANK_CMIN: f64 = -30.0;
pub const LOG_RANK_CMAX: f64 = 0.0;
pub const LOG_RANK_NBIN: usize = 300;

/// log10 floor applied inside the rank map. The rank axis bottoms out at
/// -30, so anything this small lands in the lowest bin anyway.
pub const RANK_FLOOR: f64 = 1e-100;

/// A 1D axis of equal-width bins over log10 space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinAxis {
    pub cmin: f64,
    pub cmax: f64,
    pub nbin: usize,
    pub step: f64,
    half_step: f64,
}

impl BinAxis {
    pub fn new(cmin: f64, cmax: f64, nbin: usize) -> Self {
        debug_assert!(nbin >= 2, "axis needs at least two bins");
        let step = (cmax - cmin) / (nbin - 1) as f64;
        debug_assert!(step > 0.0);
        Self {
            cmin,
            cmax,
            nbin,
            step,
            half_step: step / 2.0,
        }
    }

    pub fn log_snr() -> Self {
        Self::new(LOG_SNR_CMIN, LOG_SNR_CMAX, LOG_SNR_NBIN)
    }

    pub fn log_chisq() -> Self {
        Self::new(LOG_CHISQ_CMIN, LOG_CHISQ_CMAX, LOG_CHISQ_NBIN)
    }

    pub fn log_rank() -> Self {
        Self::new(LOG_RANK_CMIN, LOG_RANK_CMAX, LOG_RANK_NBIN)
    }

    /// Bin index for a linear-scale value. Non-positive and subnormal values
    /// fall into bin 0; everything else is binned on log10 and clipped to
    /// `[0, nbin - 1]`.
    pub fn index_of(&self, value: f64) -> usize {
        if value < f64::MIN_POSITIVE {
            return 0;
        }
        self.index_of_log(value.log10())
    }

    /// Bin index for a value already in log10 space, clipped to the axis.
    pub fn index_of_log(&self, lg: f64) -> usize {
        let bin = ((lg - self.cmin - self.half_step) / self.step).floor();
        if bin <= 0.0 {
            0
        } else {
            (bin as usize).min(self.nbin - 1)
        }
    }

    /// Bin whose `(lower_bound, upper_bound]` range contains `lg`, clipped to
    /// the axis. This is the convention the rank transform bins cells with;
    /// `index_of` keeps the lookup-side formula. The two differ by up to one
    /// bin near edges and both are preserved as-is.
    pub fn range_index_of_log(&self, lg: f64) -> usize {
        let bin = ((lg - self.cmin + self.half_step) / self.step).ceil() - 1.0;
        if bin <= 0.0 {
            0
        } else {
            (bin as usize).min(self.nbin - 1)
        }
    }

    /// Lower edge of bin `i` in log10 space.
    pub fn lower_bound(&self, i: usize) -> f64 {
        debug_assert!(i < self.nbin);
        self.cmin - self.half_step + i as f64 * self.step
    }

    /// Upper edge of bin `i` in log10 space.
    pub fn upper_bound(&self, i: usize) -> f64 {
        debug_assert!(i < self.nbin);
        self.cmin + self.half_step + i as f64 * self.step
    }

    /// Center of bin `i` in log10 space.
    pub fn center(&self, i: usize) -> f64 {
        debug_assert!(i < self.nbin);
        self.cmin + i as f64 * self.step
    }
}

/// 1D histogram of event counts on a log10 axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hist1D {
    pub axis: BinAxis,
    counts: Vec<i64>,
}

impl Hist1D {
    pub fn new(axis: BinAxis) -> Self {
        let counts = vec![0; axis.nbin];
        Self { axis, counts }
    }

    pub fn increment(&mut self, value: f64) -> usize {
        let i = self.axis.index_of(value);
        self.counts[i] += 1;
        i
    }

    pub fn counts(&self) -> &[i64] {
        &self.counts
    }

    pub fn counts_mut(&mut self) -> &mut [i64] {
        &mut self.counts
    }

    pub fn sum(&self) -> i64 {
        self.counts.iter().sum()
    }

    /// Element-wise addition of another histogram on the same axis.
    pub fn add(&mut self, other: &Hist1D) {
        debug_assert_eq!(self.axis.nbin, other.axis.nbin);
        for (a, b) in self.counts.iter_mut().zip(other.counts.iter()) {
            *a += b;
        }
    }

    pub fn reset(&mut self) {
        self.counts.fill(0);
    }
}

/// 1D curve of f64 samples on a log10 axis (pdf and FAP curves).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Curve1D {
    pub axis: BinAxis,
    values: Vec<f64>,
}

impl Curve1D {
    pub fn new(axis: BinAxis) -> Self {
        let values = vec![0.0; axis.nbin];
        Self { axis, values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn fill(&mut self, v: f64) {
        self.values.fill(v);
    }
}

/// 2D histogram of event counts, row-major over (x, y) bins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hist2D {
    pub x: BinAxis,
    pub y: BinAxis,
    counts: Vec<i64>,
}

impl Hist2D {
    pub fn new(x: BinAxis, y: BinAxis) -> Self {
        let counts = vec![0; x.nbin * y.nbin];
        Self { x, y, counts }
    }

    #[inline]
    fn idx(&self, ix: usize, iy: usize) -> usize {
        debug_assert!(ix < self.x.nbin && iy < self.y.nbin);
        ix * self.y.nbin + iy
    }

    pub fn get(&self, ix: usize, iy: usize) -> i64 {
        self.counts[self.idx(ix, iy)]
    }

    pub fn increment_at(&mut self, ix: usize, iy: usize) {
        let i = self.idx(ix, iy);
        self.counts[i] += 1;
    }

    pub fn counts(&self) -> &[i64] {
        &self.counts
    }

    pub fn counts_mut(&mut self) -> &mut [i64] {
        &mut self.counts
    }

    pub fn sum(&self) -> i64 {
        self.counts.iter().sum()
    }

    pub fn add(&mut self, other: &Hist2D) {
        debug_assert_eq!(self.counts.len(), other.counts.len());
        for (a, b) in self.counts.iter_mut().zip(other.counts.iter()) {
            *a += b;
        }
    }

    pub fn reset(&mut self) {
        self.counts.fill(0);
    }
}

/// 2D grid of f64 samples sharing the feature axes (pdf and rank maps).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid2D {
    pub x: BinAxis,
    pub y: BinAxis,
    values: Vec<f64>,
}

impl Grid2D {
    pub fn new(x: BinAxis, y: BinAxis) -> Self {
        let values = vec![0.0; x.nbin * y.nbin];
        Self { x, y, values }
    }

    #[inline]
    fn idx(&self, ix: usize, iy: usize) -> usize {
        debug_assert!(ix < self.x.nbin && iy < self.y.nbin);
        ix * self.y.nbin + iy
    }

    pub fn get(&self, ix: usize, iy: usize) -> f64 {
        self.values[self.idx(ix, iy)]
    }

    pub fn set(&mut self, ix: usize, iy: usize, v: f64) {
        let i = self.idx(ix, iy);
        self.values[i] = v;
    }

    /// Read the grid at the bins of a linear-scale (snr, chisq) pair.
    pub fn value_at(&self, snr: f64, chisq: f64) -> f64 {
        let ix = self.x.index_of(snr);
        let iy = self.y.index_of(chisq);
        self.get(ix, iy)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn fill(&mut self, v: f64) {
        self.values.fill(v);
    }
}
