//! Rank and false-alarm-probability lookup against a derived model.

use crate::combo::SNR_VALID_EPSILON;
use crate::stats::CombinationStats;

/// Rank statistic of a candidate at (snr, chisq), read straight off the
/// rank map.
pub fn rank_of(snr: f64, chisq: f64, stats: &CombinationStats) -> f64 {
    stats.rank.rank_map.value_at(snr, chisq)
}

/// Tail probability of a candidate at (snr, chisq). Returns `None` for an
/// SNR at the invalid sentinel, or when the model has never been through a
/// rank transform, which would otherwise read an all-zero curve.
pub fn tail_probability(snr: f64, chisq: f64, stats: &CombinationStats) -> Option<f64> {
    if snr.abs() < SNR_VALID_EPSILON {
        return None;
    }
    let rank = rank_of(snr, chisq, stats);
    let axis = stats.rank.rank_far.axis;
    let ibin = axis.index_of(10f64.powf(rank));
    let fap = stats.rank.rank_far.values()[ibin];
    if fap <= 0.0 {
        return None;
    }
    Some(fap.max(f32::MIN_POSITIVE as f64))
}

/// User-facing FAR in Hz: the tail probability scaled by the background
/// event rate over the live observation time. `None` when the model is
/// underived or the livetime is still zero.
pub fn far_of(
    snr: f64,
    chisq: f64,
    stats: &CombinationStats,
    hist_trials: i64,
) -> Option<f64> {
    let fap = tail_probability(snr, chisq, stats)?;
    if stats.livetime <= 0 || hist_trials <= 0 {
        return None;
    }
    Some(fap * stats.nevent as f64 / (stats.livetime as f64 * hist_trials as f64))
}
