//! Density estimation policies over the joint feature histogram.

use crate::kde;
use crate::stats::FeatureModel;

/// How the joint histogram is turned into `joint_pdf`. Either policy is a
/// no-op while the model is empty, leaving any previously derived pdf in
/// place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DensityEstimator {
    /// `pdf[i][j] = hist[i][j] / nevent`.
    Empirical,
    /// Adaptive-kernel smoothing of the histogram (the default in the
    /// online pipeline).
    #[default]
    AdaptiveKde,
}

impl DensityEstimator {
    pub fn estimate(self, feature: &mut FeatureModel) {
        let nevent = feature.event_count();
        if nevent == 0 {
            return;
        }
        match self {
            Self::Empirical => {
                let n = nevent as f64;
                for (pdf, &count) in feature
                    .joint_pdf
                    .values_mut()
                    .iter_mut()
                    .zip(feature.joint_hist.counts().iter())
                {
                    *pdf = count as f64 / n;
                }
            }
            Self::AdaptiveKde => {
                kde::adaptive_density(&feature.joint_hist, &mut feature.joint_pdf);
            }
        }
    }
}

impl std::str::FromStr for DensityEstimator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "empirical" => Ok(Self::Empirical),
            "kde" => Ok(Self::AdaptiveKde),
            other => Err(format!("unknown density estimator: {other:?}")),
        }
    }
}
