//! Background and zerolag accumulation with periodic interval snapshots.
//!
//! Candidate batches flow through the accumulator: background entries feed
//! the background statistics and are consumed, foreground entries feed the
//! zerolag statistics and pass through, empty entries only advance the
//! livetime clock. When the configured interval elapses the accumulated
//! counts are snapshotted to disk and the interval starts over.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::checkpoint::{SnapshotError, SnapshotFile};
use crate::combo::{self, ComboError};
use crate::event::{CandidateEvent, EventClass};
use crate::signal::{self, SourceType};
use crate::stats::{StatsCollection, StatsKind};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Snapshot cadence. `Never` accumulates in memory only, `AtFinish` writes
/// a single file when the stream ends, `EverySecs` rolls a timestamped
/// file per elapsed interval and resets the counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotInterval {
    Never,
    AtFinish,
    EverySecs(u64),
}

#[derive(Debug, Clone)]
pub struct AccumConfig {
    /// Detector set this accumulator serves, e.g. "H1L1".
    pub ifos: String,
    /// Trials factor recorded in every snapshot.
    pub hist_trials: i64,
    pub interval: SnapshotInterval,
    /// Snapshot files are named `<prefix>_<gps>_<duration>.snap`.
    pub output_prefix: PathBuf,
    /// Optional prior background statistics merged in at startup.
    pub history_path: Option<PathBuf>,
}

#[derive(Debug)]
pub enum AccumError {
    Combo(ComboError),
    Snapshot(SnapshotError),
}

impl std::fmt::Display for AccumError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Combo(e) => write!(f, "accumulator config: {}", e),
            Self::Snapshot(e) => write!(f, "accumulator snapshot: {}", e),
        }
    }
}

impl std::error::Error for AccumError {}

impl From<ComboError> for AccumError {
    fn from(e: ComboError) -> Self {
        Self::Combo(e)
    }
}

impl From<SnapshotError> for AccumError {
    fn from(e: SnapshotError) -> Self {
        Self::Snapshot(e)
    }
}

pub struct BackgroundAccumulator {
    config: AccumConfig,
    background: StatsCollection,
    zerolag: StatsCollection,
    signal: StatsCollection,
    /// Start of the current snapshot interval; set by the first event.
    roll_start_ns: Option<u64>,
    last_ns: u64,
}

impl BackgroundAccumulator {
    pub fn new(config: AccumConfig) -> Result<Self, AccumError> {
        let background = StatsCollection::new(&config.ifos, StatsKind::Background)?;
        let zerolag = StatsCollection::new(&config.ifos, StatsKind::Zerolag)?;
        let mut signal = StatsCollection::new(&config.ifos, StatsKind::Signal)?;
        signal::init_signal_stats(&mut signal, SourceType::Bns);

        let mut acc = Self {
            config,
            background,
            zerolag,
            signal,
            roll_start_ns: None,
            last_ns: 0,
        };
        if let Some(path) = acc.config.history_path.clone() {
            acc.load_history(&path)?;
        }
        Ok(acc)
    }

    /// Merges a prior snapshot's background block into the running counts.
    /// Its `hist_trials` takes over the configured value.
    pub fn load_history(&mut self, path: &Path) -> Result<(), AccumError> {
        let snap = SnapshotFile::load(path)?;
        let mut prior = StatsCollection::new(&self.config.ifos, StatsKind::Background)?;
        snap.background.apply(&mut prior)?;
        for (node, other) in self.background.nodes.iter_mut().zip(prior.nodes.iter()) {
            node.merge(other);
        }
        self.config.hist_trials = snap.hist_trials;
        info!(path = %path.display(), "merged background history");
        Ok(())
    }

    /// Processes one batch. Background entries are consumed into the model,
    /// foreground and empty entries are returned for downstream stages.
    /// An unresolvable detector label is logged and never accumulated, but
    /// foreground and empty entries still pass through.
    pub fn process_batch(
        &mut self,
        events: Vec<CandidateEvent>,
    ) -> Result<Vec<CandidateEvent>, AccumError> {
        let mut passed = Vec::with_capacity(events.len());
        for event in events {
            if self.roll_start_ns.is_none() {
                self.roll_start_ns = Some(event.timestamp_ns);
            }
            self.last_ns = event.timestamp_ns;

            match event.class {
                EventClass::Background => match combo::resolve(&event.ifos) {
                    Ok(_) => self.update_stats(&event, StatsKind::Background),
                    Err(e) => warn!(
                        gps = event.timestamp_ns / NANOS_PER_SEC,
                        ifos = %event.ifos,
                        "dropping background entry: {e}"
                    ),
                },
                EventClass::Foreground => {
                    match combo::resolve(&event.ifos) {
                        Ok(_) => self.update_stats(&event, StatsKind::Zerolag),
                        Err(e) => warn!(
                            gps = event.timestamp_ns / NANOS_PER_SEC,
                            ifos = %event.ifos,
                            "forwarding candidate unaccumulated: {e}"
                        ),
                    }
                    passed.push(event);
                }
                EventClass::Empty => {
                    match combo::resolve(&event.ifos) {
                        // One second of live observation, counted only
                        // while at least two detectors are on.
                        Ok(icombo) if combo::detector_count(icombo) >= 2 => {
                            self.background.add_livetime_second();
                            self.zerolag.add_livetime_second();
                        }
                        Ok(_) => {}
                        Err(e) => warn!(
                            ifos = %event.ifos,
                            "heartbeat with unresolvable label: {e}"
                        ),
                    }
                    passed.push(event);
                }
            }
        }
        self.maybe_snapshot()?;
        Ok(passed)
    }

    /// Flushes a final snapshot unless snapshots are disabled.
    pub fn finish(&mut self) -> Result<Option<PathBuf>, AccumError> {
        match self.config.interval {
            SnapshotInterval::Never => Ok(None),
            SnapshotInterval::AtFinish | SnapshotInterval::EverySecs(_) => {
                let path = self.snapshot_path();
                self.write_snapshot(&path)?;
                Ok(Some(path))
            }
        }
    }

    pub fn background(&self) -> &StatsCollection {
        &self.background
    }

    pub fn zerolag(&self) -> &StatsCollection {
        &self.zerolag
    }

    fn update_stats(&mut self, event: &CandidateEvent, kind: StatsKind) {
        let stats = match kind {
            StatsKind::Background => &mut self.background,
            _ => &mut self.zerolag,
        };
        stats
            .full_node_mut()
            .update(event.coh_snr, event.comb_chisq);
        for (index, bit) in combo::participating(stats.combo).iter().enumerate() {
            if let Some(node) = stats.node_mut(index) {
                node.update(event.single_snr[*bit], event.single_chisq[*bit]);
            }
        }
        debug!(
            kind = kind.label(),
            snr = event.coh_snr,
            chisq = event.comb_chisq,
            "accumulated candidate"
        );
    }

    fn interval_elapsed_secs(&self) -> u64 {
        match self.roll_start_ns {
            Some(start) => (self.last_ns.saturating_sub(start)) / NANOS_PER_SEC,
            None => 0,
        }
    }

    fn snapshot_path(&self) -> PathBuf {
        let gps = self.roll_start_ns.unwrap_or(0) / NANOS_PER_SEC;
        let duration = self.interval_elapsed_secs();
        let mut name = self
            .config
            .output_prefix
            .as_os_str()
            .to_owned();
        name.push(format!("_{gps}_{duration}.snap"));
        PathBuf::from(name)
    }

    fn maybe_snapshot(&mut self) -> Result<(), AccumError> {
        let SnapshotInterval::EverySecs(every) = self.config.interval else {
            return Ok(());
        };
        if self.interval_elapsed_secs() < every {
            return Ok(());
        }
        let path = self.snapshot_path();
        self.write_snapshot(&path)?;
        // Next interval starts fresh; the signal block is generated, not
        // accumulated, so it survives the reset.
        self.background.reset_counts();
        self.zerolag.reset_counts();
        self.roll_start_ns = Some(self.last_ns);
        Ok(())
    }

    fn write_snapshot(&self, path: &Path) -> Result<(), AccumError> {
        let snap = SnapshotFile::capture(
            &self.config.ifos,
            self.config.hist_trials,
            &self.background,
            &self.zerolag,
            &self.signal,
        );
        snap.write(path)?;
        info!(path = %path.display(), "wrote statistics snapshot");
        Ok(())
    }
}
