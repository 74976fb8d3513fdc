//! Per-combination statistics and the collection arena.
//!
//! A `StatsCollection` holds one `CombinationStats` node per participating
//! single detector plus one for the full combination; proper subsets are
//! not modeled. Nodes are addressed by a bounds-checked small index:
//! `0..n` are the singles in detector-bit order, `n` is the full
//! combination.

use serde::{Deserialize, Serialize};

use crate::bins::{BinAxis, Curve1D, Grid2D, Hist1D, Hist2D};
use crate::combo::{self, ComboError};

/// Which block of the persisted container a collection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatsKind {
    Background,
    Zerolag,
    Signal,
}

impl StatsKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::Zerolag => "zerolag",
            Self::Signal => "signal",
        }
    }
}

/// Online histograms of the (SNR, chi-square) feature plane plus the derived
/// joint density.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureModel {
    pub snr_hist: Hist1D,
    pub chisq_hist: Hist1D,
    pub joint_hist: Hist2D,
    pub joint_pdf: Grid2D,
}

impl FeatureModel {
    pub fn new() -> Self {
        Self {
            snr_hist: Hist1D::new(BinAxis::log_snr()),
            chisq_hist: Hist1D::new(BinAxis::log_chisq()),
            joint_hist: Hist2D::new(BinAxis::log_snr(), BinAxis::log_chisq()),
            joint_pdf: Grid2D::new(BinAxis::log_snr(), BinAxis::log_chisq()),
        }
    }

    /// O(1) accumulation of one (snr, chisq) sample into all three count
    /// arrays.
    pub fn update(&mut self, snr: f64, chisq: f64) {
        let ix = self.snr_hist.increment(snr);
        let iy = self.chisq_hist.increment(chisq);
        self.joint_hist.increment_at(ix, iy);
    }

    /// Element-wise addition of another model's count arrays (combining
    /// time-slide trial files). The derived pdf is not touched.
    pub fn merge(&mut self, other: &FeatureModel) {
        self.snr_hist.add(&other.snr_hist);
        self.chisq_hist.add(&other.chisq_hist);
        self.joint_hist.add(&other.joint_hist);
    }

    /// Accumulated sample count, recomputed from the SNR histogram.
    pub fn event_count(&self) -> i64 {
        self.snr_hist.sum()
    }

    pub fn reset(&mut self) {
        self.snr_hist.reset();
        self.chisq_hist.reset();
        self.joint_hist.reset();
    }
}

impl Default for FeatureModel {
    fn default() -> Self {
        Self::new()
    }
}

/// The rank statistic derived from a feature model: a monotone significance
/// map over the feature grid plus its 1D distribution and FAP curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankModel {
    /// log10 tail mass per feature cell; lower magnitude = more significant.
    pub rank_map: Grid2D,
    /// Event counts binned by rank.
    pub rank_hist: Hist1D,
    /// Normalized rank density.
    pub rank_pdf: Curve1D,
    /// Non-decreasing tail curve from most- to least-significant rank bin.
    pub rank_far: Curve1D,
}

impl RankModel {
    pub fn new() -> Self {
        Self {
            rank_map: Grid2D::new(BinAxis::log_snr(), BinAxis::log_chisq()),
            rank_hist: Hist1D::new(BinAxis::log_rank()),
            rank_pdf: Curve1D::new(BinAxis::log_rank()),
            rank_far: Curve1D::new(BinAxis::log_rank()),
        }
    }
}

impl Default for RankModel {
    fn default() -> Self {
        Self::new()
    }
}

/// All statistics for one combination node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinationStats {
    pub label: String,
    pub feature: FeatureModel,
    pub rank: RankModel,
    pub nevent: i64,
    /// Accumulated live observation seconds.
    pub livetime: i64,
}

impl CombinationStats {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            feature: FeatureModel::new(),
            rank: RankModel::new(),
            nevent: 0,
            livetime: 0,
        }
    }

    pub fn update(&mut self, snr: f64, chisq: f64) {
        self.feature.update(snr, chisq);
        self.nevent += 1;
    }

    /// Merge another node's counts; the event count is recomputed from the
    /// merged SNR histogram rather than summed, so repeated merges stay
    /// consistent with the arrays.
    pub fn merge(&mut self, other: &CombinationStats) {
        self.feature.merge(&other.feature);
        self.nevent = self.feature.event_count();
        self.livetime += other.livetime;
    }

    pub fn reset(&mut self) {
        self.feature.reset();
        self.nevent = 0;
        self.livetime = 0;
    }
}

/// The arena of combination nodes for one fixed detector set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsCollection {
    /// Combination id of the full detector set.
    pub combo: usize,
    pub kind: StatsKind,
    /// Singles in detector-bit order, then the full combination.
    pub nodes: Vec<CombinationStats>,
}

impl StatsCollection {
    pub fn new(ifos: &str, kind: StatsKind) -> Result<Self, ComboError> {
        let combo = combo::resolve(ifos)?;
        let mut nodes = Vec::with_capacity(combo::detector_count(combo) + 1);
        for bit in combo::participating(combo) {
            nodes.push(CombinationStats::new(combo::DETECTORS[bit]));
        }
        nodes.push(CombinationStats::new(combo::combo_name(combo)?));
        Ok(Self { combo, kind, nodes })
    }

    /// Number of participating detectors (the full-combination node sits at
    /// this index).
    pub fn detector_count(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn node(&self, index: usize) -> Option<&CombinationStats> {
        self.nodes.get(index)
    }

    pub fn node_mut(&mut self, index: usize) -> Option<&mut CombinationStats> {
        self.nodes.get_mut(index)
    }

    pub fn full_node(&self) -> &CombinationStats {
        self.nodes.last().expect("collection always has nodes")
    }

    pub fn full_node_mut(&mut self) -> &mut CombinationStats {
        self.nodes.last_mut().expect("collection always has nodes")
    }

    /// Node index of a single detector by its bit, if it participates.
    pub fn node_index_of_bit(&self, bit: usize) -> Option<usize> {
        combo::participating(self.combo)
            .iter()
            .position(|&b| b == bit)
    }

    /// Zero every node's count arrays and counters. Derived pdf/rank arrays
    /// are left in place, matching snapshot-interval reset semantics.
    pub fn reset_counts(&mut self) {
        for node in &mut self.nodes {
            node.reset();
        }
    }

    /// Increment every node's livetime by one second.
    pub fn add_livetime_second(&mut self) {
        for node in &mut self.nodes {
            node.livetime += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_layout() {
        let c = StatsCollection::new("H1L1V1", StatsKind::Background).unwrap();
        assert_eq!(c.detector_count(), 3);
        assert_eq!(c.nodes.len(), 4);
        assert_eq!(c.node(0).unwrap().label, "H1");
        assert_eq!(c.node(1).unwrap().label, "L1");
        assert_eq!(c.node(2).unwrap().label, "V1");
        assert_eq!(c.full_node().label, "H1L1V1");
        assert!(c.node(4).is_none());
    }

    #[test]
    fn test_node_index_of_bit() {
        let c = StatsCollection::new("H1V1", StatsKind::Zerolag).unwrap();
        assert_eq!(c.node_index_of_bit(0), Some(0));
        assert_eq!(c.node_index_of_bit(2), Some(1));
        assert_eq!(c.node_index_of_bit(1), None);
    }

    #[test]
    fn test_update_keeps_count_invariant() {
        let mut s = CombinationStats::new("H1L1");
        // Mix of in-range and clipped samples; the invariant must hold with
        // edge clipping in play.
        let samples = [
            (10.0, 2.0),
            (0.5, 1e-3),   // snr clips low
            (1e7, 1e6),    // both clip high
            (0.0, 0.0),    // sentinel values clip to bin 0
            (100.0, 5.0),
        ];
        for (snr, chisq) in samples {
            s.update(snr, chisq);
        }
        let n = samples.len() as i64;
        assert_eq!(s.nevent, n);
        assert_eq!(s.feature.snr_hist.sum(), n);
        assert_eq!(s.feature.chisq_hist.sum(), n);
        assert_eq!(s.feature.joint_hist.sum(), n);
    }

    #[test]
    fn test_merge_recomputes_event_count() {
        let mut a = CombinationStats::new("H1");
        let mut b = CombinationStats::new("H1");
        for _ in 0..10 {
            a.update(12.0, 1.5);
        }
        for _ in 0..7 {
            b.update(9.0, 0.8);
        }
        a.livetime = 100;
        b.livetime = 50;
        a.merge(&b);
        assert_eq!(a.nevent, 17);
        assert_eq!(a.feature.event_count(), 17);
        assert_eq!(a.livetime, 150);
    }

    #[test]
    fn test_reset_counts_leaves_derived_arrays() {
        let mut c = StatsCollection::new("H1L1", StatsKind::Background).unwrap();
        c.full_node_mut().update(15.0, 2.0);
        c.full_node_mut().rank.rank_pdf.values_mut()[0] = 0.5;
        c.reset_counts();
        assert_eq!(c.full_node().nevent, 0);
        assert_eq!(c.full_node().feature.joint_hist.sum(), 0);
        assert_eq!(c.full_node().rank.rank_pdf.values()[0], 0.5);
    }
}
