//! Feature-plane to rank-statistic transform.
//!
//! The rank of a (SNR, chisq) cell is the log10 of the probability mass in
//! the region that is at least as SNR-loud and at most as chisq-noisy.
//! Lower magnitude means more significant. From the rank map we derive a
//! 1D rank distribution and the cumulative tail curve used for FAR
//! assignment.

use tracing::warn;

use crate::bins::RANK_FLOOR;
use crate::stats::{FeatureModel, RankModel};

/// Transform is skipped while the joint density carries less mass than this.
pub const PDF_MASS_THRESHOLD: f64 = 1e-5;
/// Rank-pdf bins below this are filled with the smallest nonzero bin.
pub const ZERO_PDF_SUBSTITUTE: f64 = 1e-200;

/// Rebuilds `rank` from the feature model's joint density. No-op when the
/// density is still empty, so a previously derived model survives.
pub fn update_rank(feature: &FeatureModel, rank: &mut RankModel) {
    let pdf = &feature.joint_pdf;
    let mass: f64 = pdf.values().iter().sum();
    if mass < PDF_MASS_THRESHOLD {
        return;
    }

    let nx = pdf.x.nbin;
    let ny = pdf.y.nbin;
    let cell_area = pdf.x.step * pdf.y.step;

    // Running 2D tail sum, built in place by inclusion-exclusion while
    // scanning SNR descending and chisq ascending:
    //   tail[x][y] = sum over {x' >= x, y' <= y} of pdf * cell_area
    // The sum is intentionally not divided by the total mass.
    for ix in (0..nx).rev() {
        for iy in 0..ny {
            let mut tmp = pdf.get(ix, iy) * cell_area;
            if iy > 0 {
                tmp += rank.rank_map.get(ix, iy - 1);
            }
            if ix < nx - 1 {
                tmp += rank.rank_map.get(ix + 1, iy);
            }
            if ix < nx - 1 && iy > 0 {
                tmp -= rank.rank_map.get(ix + 1, iy - 1);
            }
            rank.rank_map.set(ix, iy, tmp);
        }
    }

    // To log scale, floored so empty corners stay finite.
    for v in rank.rank_map.values_mut() {
        *v = v.max(RANK_FLOOR).log10();
    }

    // Bin every feature cell into the 1D rank distribution in one pass.
    // Bin membership follows (lower, upper] ranges and bin 0 is unbounded
    // below; clamping handles both ends.
    let rank_axis = rank.rank_pdf.axis;
    let rank_step = rank_axis.step;
    rank.rank_pdf.fill(0.0);
    rank.rank_hist.reset();
    for ix in 0..nx {
        for iy in 0..ny {
            let ibin = rank_axis.range_index_of_log(rank.rank_map.get(ix, iy));
            rank.rank_pdf.values_mut()[ibin] +=
                pdf.get(ix, iy) * cell_area / rank_step;
            rank.rank_hist.counts_mut()[ibin] += feature.joint_hist.get(ix, iy);
        }
    }

    // Bins the data never reached get the smallest populated value so no
    // FAR lookup ever divides by zero.
    let mut smallest = 1.0f64;
    for &v in rank.rank_pdf.values() {
        if v > 0.0 && v < smallest {
            smallest = v;
        }
    }
    let mut pdf_sum = 0.0;
    for v in rank.rank_pdf.values_mut() {
        if *v < ZERO_PDF_SUBSTITUTE {
            *v = smallest;
        }
        pdf_sum += *v;
    }
    if pdf_sum > 0.0 {
        let scale = 1.0 / (pdf_sum * rank_step);
        for v in rank.rank_pdf.values_mut() {
            *v *= scale;
        }
    }

    // Cumulative tail from the most-significant end. The curve climbs
    // toward 1.0 at the least-significant bin.
    let mut acc = 0.0;
    let floor = f32::MIN_POSITIVE as f64;
    for (fap, &p) in rank
        .rank_far
        .values_mut()
        .iter_mut()
        .zip(rank.rank_pdf.values().iter())
    {
        acc += p;
        *fap = (acc * rank_step).max(floor);
    }

    let terminal = rank
        .rank_far
        .values()
        .iter()
        .fold(0.0f64, |a, &b| a.max(b));
    if (terminal - 1.0).abs() > 1e-2 {
        warn!(terminal, "rank tail curve deviates from unit mass");
    }
}
