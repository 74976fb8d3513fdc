//! Snapshot persistence for trigger statistics.
//!
//! One file groups, per detector set, the three statistics blocks
//! (Background, Zerolag, Signal). Write is atomic: the bytes land in a
//! `.next` sibling first and are renamed into place, so a concurrent
//! reader never observes a partial file.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bins::{BinAxis, Curve1D, Grid2D, Hist1D, Hist2D};
use crate::stats::{CombinationStats, StatsCollection, StatsKind};

/// Version for snapshot format migrations.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Axis parameters persisted alongside the arrays so a reader can reject
/// a file built against different binning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisSpec {
    pub cmin: f64,
    pub cmax: f64,
    pub nbin: usize,
}

impl AxisSpec {
    fn of(axis: &BinAxis) -> Self {
        Self {
            cmin: axis.cmin,
            cmax: axis.cmax,
            nbin: axis.nbin,
        }
    }

    fn matches(&self, axis: &BinAxis) -> bool {
        self.cmin == axis.cmin && self.cmax == axis.cmax && self.nbin == axis.nbin
    }
}

/// Serialized arrays of one combination node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub label: String,
    pub snr_rate: Hist1D,
    pub chisq_rate: Hist1D,
    pub joint_rate: Hist2D,
    pub joint_pdf: Grid2D,
    pub rank_map: Grid2D,
    pub rank_rate: Hist1D,
    pub rank_pdf: Curve1D,
    pub rank_fap: Curve1D,
    pub nevent: i64,
    pub livetime: i64,
}

impl NodeSnapshot {
    fn capture(node: &CombinationStats) -> Self {
        Self {
            label: node.label.clone(),
            snr_rate: node.feature.snr_hist.clone(),
            chisq_rate: node.feature.chisq_hist.clone(),
            joint_rate: node.feature.joint_hist.clone(),
            joint_pdf: node.feature.joint_pdf.clone(),
            rank_map: node.rank.rank_map.clone(),
            rank_rate: node.rank.rank_hist.clone(),
            rank_pdf: node.rank.rank_pdf.clone(),
            rank_fap: node.rank.rank_far.clone(),
            nevent: node.nevent,
            livetime: node.livetime,
        }
    }

    fn apply(&self, node: &mut CombinationStats) {
        node.feature.snr_hist = self.snr_rate.clone();
        node.feature.chisq_hist = self.chisq_rate.clone();
        node.feature.joint_hist = self.joint_rate.clone();
        node.feature.joint_pdf = self.joint_pdf.clone();
        node.rank.rank_map = self.rank_map.clone();
        node.rank.rank_hist = self.rank_rate.clone();
        node.rank.rank_pdf = self.rank_pdf.clone();
        node.rank.rank_far = self.rank_fap.clone();
        node.nevent = self.nevent;
        node.livetime = self.livetime;
    }

    fn validate(&self, reference: &CombinationStats) -> Result<(), SnapshotError> {
        let checks = [
            ("snr_rate", self.snr_rate.axis.nbin, reference.feature.snr_hist.axis.nbin),
            (
                "chisq_rate",
                self.chisq_rate.axis.nbin,
                reference.feature.chisq_hist.axis.nbin,
            ),
            (
                "rank_rate",
                self.rank_rate.axis.nbin,
                reference.rank.rank_hist.axis.nbin,
            ),
            (
                "rank_pdf",
                self.rank_pdf.axis.nbin,
                reference.rank.rank_pdf.axis.nbin,
            ),
            (
                "rank_fap",
                self.rank_fap.axis.nbin,
                reference.rank.rank_far.axis.nbin,
            ),
            (
                "joint_rate",
                self.joint_rate.x.nbin * self.joint_rate.y.nbin,
                reference.feature.joint_hist.x.nbin * reference.feature.joint_hist.y.nbin,
            ),
            (
                "joint_pdf",
                self.joint_pdf.x.nbin * self.joint_pdf.y.nbin,
                reference.feature.joint_pdf.x.nbin * reference.feature.joint_pdf.y.nbin,
            ),
            (
                "rank_map",
                self.rank_map.x.nbin * self.rank_map.y.nbin,
                reference.rank.rank_map.x.nbin * reference.rank.rank_map.y.nbin,
            ),
        ];
        for (name, found, expected) in checks {
            if found != expected {
                return Err(SnapshotError::ArrayMismatch {
                    array: name,
                    found,
                    expected,
                });
            }
        }
        Ok(())
    }
}

/// One statistics block (all nodes of one kind).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockSnapshot {
    pub kind: StatsKind,
    pub nodes: Vec<NodeSnapshot>,
}

impl BlockSnapshot {
    fn capture(stats: &StatsCollection) -> Self {
        Self {
            kind: stats.kind,
            nodes: stats.nodes.iter().map(NodeSnapshot::capture).collect(),
        }
    }

    /// Restores this block into a live collection. The collection's layout
    /// is authoritative; a node-count or bin-count mismatch is a hard
    /// failure and leaves the collection untouched.
    pub fn apply(&self, stats: &mut StatsCollection) -> Result<(), SnapshotError> {
        if self.kind != stats.kind {
            return Err(SnapshotError::KindMismatch {
                found: self.kind,
                expected: stats.kind,
            });
        }
        if self.nodes.len() != stats.nodes.len() {
            return Err(SnapshotError::NodeCountMismatch {
                found: self.nodes.len(),
                expected: stats.nodes.len(),
            });
        }
        for (snap, node) in self.nodes.iter().zip(stats.nodes.iter()) {
            snap.validate(node)?;
        }
        for (snap, node) in self.nodes.iter().zip(stats.nodes.iter_mut()) {
            snap.apply(node);
        }
        Ok(())
    }
}

/// The full persisted container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub version: u32,
    pub ifos: String,
    pub hist_trials: i64,
    pub snr_axis: AxisSpec,
    pub chisq_axis: AxisSpec,
    pub rank_axis: AxisSpec,
    pub background: BlockSnapshot,
    pub zerolag: BlockSnapshot,
    pub signal: BlockSnapshot,
}

impl SnapshotFile {
    pub fn capture(
        ifos: &str,
        hist_trials: i64,
        background: &StatsCollection,
        zerolag: &StatsCollection,
        signal: &StatsCollection,
    ) -> Self {
        let feature = &background.full_node().feature;
        Self {
            version: SNAPSHOT_VERSION,
            ifos: ifos.to_owned(),
            hist_trials,
            snr_axis: AxisSpec::of(&feature.snr_hist.axis),
            chisq_axis: AxisSpec::of(&feature.chisq_hist.axis),
            rank_axis: AxisSpec::of(&background.full_node().rank.rank_pdf.axis),
            background: BlockSnapshot::capture(background),
            zerolag: BlockSnapshot::capture(zerolag),
            signal: BlockSnapshot::capture(signal),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        bincode::serialize(self).map_err(|e| SnapshotError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let snap: SnapshotFile = bincode::deserialize(bytes)
            .map_err(|e| SnapshotError::Deserialization(e.to_string()))?;
        if snap.version > SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: snap.version,
                max_supported: SNAPSHOT_VERSION,
            });
        }
        Ok(snap)
    }

    /// Writes atomically: serialize to `<path>.next`, then rename over the
    /// final path.
    pub fn write(&self, path: &Path) -> Result<(), SnapshotError> {
        let bytes = self.to_bytes()?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".next");
        fs::write(&tmp, &bytes)
            .map_err(|e| SnapshotError::Io(format!("{}: {e}", path.display())))?;
        fs::rename(&tmp, path)
            .map_err(|e| SnapshotError::Io(format!("{}: {e}", path.display())))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let bytes = fs::read(path)
            .map_err(|e| SnapshotError::Io(format!("{}: {e}", path.display())))?;
        Self::from_bytes(&bytes)
    }

    /// Validates the persisted axis table against the compiled-in grids of
    /// the target collections, then restores all three blocks.
    pub fn apply(
        &self,
        background: &mut StatsCollection,
        zerolag: &mut StatsCollection,
        signal: &mut StatsCollection,
    ) -> Result<(), SnapshotError> {
        let feature = &background.full_node().feature;
        if !self.snr_axis.matches(&feature.snr_hist.axis) {
            return Err(SnapshotError::AxisMismatch("snr"));
        }
        if !self.chisq_axis.matches(&feature.chisq_hist.axis) {
            return Err(SnapshotError::AxisMismatch("chisq"));
        }
        if !self
            .rank_axis
            .matches(&background.full_node().rank.rank_pdf.axis)
        {
            return Err(SnapshotError::AxisMismatch("rank"));
        }
        self.background.apply(background)?;
        self.zerolag.apply(zerolag)?;
        self.signal.apply(signal)?;
        Ok(())
    }
}

/// Errors that can occur while persisting or restoring snapshots.
#[derive(Debug, Clone)]
pub enum SnapshotError {
    Serialization(String),
    Deserialization(String),
    UnsupportedVersion { found: u32, max_supported: u32 },
    KindMismatch { found: StatsKind, expected: StatsKind },
    NodeCountMismatch { found: usize, expected: usize },
    ArrayMismatch { array: &'static str, found: usize, expected: usize },
    AxisMismatch(&'static str),
    Io(String),
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "snapshot serialization failed: {}", e),
            Self::Deserialization(e) => write!(f, "snapshot deserialization failed: {}", e),
            Self::UnsupportedVersion {
                found,
                max_supported,
            } => write!(
                f,
                "unsupported snapshot version: {} (max supported: {})",
                found, max_supported
            ),
            Self::KindMismatch { found, expected } => write!(
                f,
                "block kind mismatch: found {}, expected {}",
                found.label(),
                expected.label()
            ),
            Self::NodeCountMismatch { found, expected } => write!(
                f,
                "node count mismatch: found {}, expected {}",
                found, expected
            ),
            Self::ArrayMismatch {
                array,
                found,
                expected,
            } => write!(
                f,
                "array {} length mismatch: found {}, expected {}",
                array, found, expected
            ),
            Self::AxisMismatch(axis) => write!(f, "{} axis differs from compiled grid", axis),
            Self::Io(e) => write!(f, "snapshot io: {}", e),
        }
    }
}

impl std::error::Error for SnapshotError {}
