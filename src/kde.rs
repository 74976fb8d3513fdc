//! Adaptive-kernel density estimation over a 2D count histogram.
//!
//! Each occupied bin contributes a truncated Gaussian window whose width
//! shrinks with the local count, so dense regions stay sharp while sparse
//! tails get smoothed. The output is normalized to unit probability mass
//! over the grid (sum of pdf times cell area equals one).

use crate::bins::{Grid2D, Hist2D};

/// Base kernel width in bins for a single-count cell.
const BASE_BANDWIDTH_BINS: f64 = 12.0;
/// Never let the kernel collapse below one bin.
const MIN_BANDWIDTH_BINS: f64 = 1.0;
/// The window is truncated at this many standard deviations.
const TRUNCATE_SIGMA: f64 = 3.0;

/// Smooths `hist` into `pdf`. No-op when the histogram is empty.
pub fn adaptive_density(hist: &Hist2D, pdf: &mut Grid2D) {
    let total = hist.sum();
    if total == 0 {
        return;
    }

    let nx = hist.x.nbin;
    let ny = hist.y.nbin;
    pdf.fill(0.0);

    for ix in 0..nx {
        for iy in 0..ny {
            let count = hist.get(ix, iy);
            if count == 0 {
                continue;
            }
            // Bandwidth scales as count^(-1/2): well-populated cells get a
            // narrow kernel, isolated counts a wide one.
            let sigma =
                (BASE_BANDWIDTH_BINS / (count as f64).sqrt()).max(MIN_BANDWIDTH_BINS);
            let reach = (sigma * TRUNCATE_SIGMA).ceil() as isize;
            let weight = count as f64;
            let inv_two_sigma2 = 1.0 / (2.0 * sigma * sigma);

            let x_lo = (ix as isize - reach).max(0) as usize;
            let x_hi = ((ix as isize + reach) as usize).min(nx - 1);
            let y_lo = (iy as isize - reach).max(0) as usize;
            let y_hi = ((iy as isize + reach) as usize).min(ny - 1);

            // Normalize the truncated window over the in-range cells so
            // mass is not lost at the grid edges.
            let mut window = 0.0;
            for jx in x_lo..=x_hi {
                let dx = jx as f64 - ix as f64;
                for jy in y_lo..=y_hi {
                    let dy = jy as f64 - iy as f64;
                    window += (-(dx * dx + dy * dy) * inv_two_sigma2).exp();
                }
            }
            if window <= 0.0 {
                continue;
            }
            let scale = weight / window;
            for jx in x_lo..=x_hi {
                let dx = jx as f64 - ix as f64;
                for jy in y_lo..=y_hi {
                    let dy = jy as f64 - iy as f64;
                    let k = (-(dx * dx + dy * dy) * inv_two_sigma2).exp();
                    let v = pdf.get(jx, jy) + scale * k;
                    pdf.set(jx, jy, v);
                }
            }
        }
    }

    // Convert accumulated weight to a density: unit mass over the grid.
    let cell_area = pdf.x.step * pdf.y.step;
    let mass: f64 = pdf.values().iter().sum::<f64>() * cell_area;
    if mass > 0.0 {
        let inv = 1.0 / mass;
        for v in pdf.values_mut() {
            *v *= inv;
        }
    }
}
