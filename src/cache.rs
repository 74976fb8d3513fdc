//! Background cache controller: loads persisted background statistics on
//! three timescales and annotates candidates with FAR values.
//!
//! The controller is a small state machine. It starts Cold, enters Warming
//! on the first valid timestamp, and becomes Active once the configured
//! silent time has passed and all three timescale files load. While
//! Active it refreshes the files on a wall-clock cadence; a failed refresh
//! keeps the stale model serving.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::checkpoint::{SnapshotError, SnapshotFile};
use crate::combo::{self, ComboError};
use crate::event::{CandidateEvent, EventClass, FarScores, TIMESCALES};
use crate::far;
use crate::stats::{StatsCollection, StatsKind};

/// Default minimum background depth before any FAR is served.
pub const MIN_BACKGROUND_NEVENT: i64 = 1_000_000;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Timescale file order: index 0 is the 1-week background, 1 the 1-day,
/// 2 the 2-hour.
pub const TIMESCALE_NAMES: [&str; TIMESCALES] = ["1w", "1d", "2h"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Cold,
    Warming,
    Active,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Detector set served, e.g. "H1L1V1".
    pub ifos: String,
    /// Background statistics files in [`TIMESCALE_NAMES`] order.
    pub stats_paths: [PathBuf; TIMESCALES],
    /// Seconds of stream time to wait before the first load attempt.
    pub silent_time_secs: u64,
    /// Reload cadence while Active; 0 disables refreshing.
    pub refresh_interval_secs: u64,
    pub min_background_nevent: i64,
}

#[derive(Debug)]
pub enum CacheError {
    Combo(ComboError),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Combo(e) => write!(f, "cache config: {}", e),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<ComboError> for CacheError {
    fn from(e: ComboError) -> Self {
        Self::Combo(e)
    }
}

/// One loaded timescale: the background block plus the trials factor
/// recorded in its file.
struct TimescaleModel {
    stats: StatsCollection,
    hist_trials: i64,
}

pub struct BackgroundCache {
    config: CacheConfig,
    state: CacheState,
    models: [Option<TimescaleModel>; TIMESCALES],
    t_start_ns: u64,
    t_roll_start_ns: u64,
}

impl BackgroundCache {
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        // Fail on an unresolvable detector set up front, not at first load.
        combo::resolve(&config.ifos)?;
        Ok(Self {
            config,
            state: CacheState::Cold,
            models: [None, None, None],
            t_start_ns: 0,
            t_roll_start_ns: 0,
        })
    }

    pub fn state(&self) -> CacheState {
        self.state
    }

    /// Annotates every scorable candidate in the batch in place, advancing
    /// the controller clock from the batch timestamps.
    pub fn process_batch(&mut self, events: &mut [CandidateEvent]) {
        for event in events.iter_mut() {
            self.advance_clock(event.timestamp_ns);
            if self.state != CacheState::Active {
                continue;
            }
            if event.class == EventClass::Empty {
                continue;
            }
            self.score(event);
        }
    }

    /// Drives Cold -> Warming -> Active and the periodic refresh.
    pub fn advance_clock(&mut self, t_ns: u64) {
        match self.state {
            CacheState::Cold => {
                if t_ns > 0 {
                    self.t_start_ns = t_ns;
                    self.state = CacheState::Warming;
                    info!(ifos = %self.config.ifos, "background cache warming");
                }
            }
            CacheState::Warming => {
                let elapsed = t_ns.saturating_sub(self.t_start_ns) / NANOS_PER_SEC;
                if elapsed >= self.config.silent_time_secs {
                    // All three timescales must load before serving; a
                    // partial model keeps warming and retries next event.
                    if self.try_load_all() {
                        self.t_roll_start_ns = t_ns;
                        self.state = CacheState::Active;
                        info!(ifos = %self.config.ifos, "background cache active");
                    }
                }
            }
            CacheState::Active => {
                if self.config.refresh_interval_secs == 0 {
                    return;
                }
                let elapsed = t_ns.saturating_sub(self.t_roll_start_ns) / NANOS_PER_SEC;
                if elapsed > self.config.refresh_interval_secs {
                    self.t_roll_start_ns = t_ns;
                    self.refresh();
                }
            }
        }
    }

    /// Loads all three files into staging and commits only if every one
    /// succeeded.
    fn try_load_all(&mut self) -> bool {
        let mut staged: [Option<TimescaleModel>; TIMESCALES] = [None, None, None];
        for (slot, (path, name)) in staged.iter_mut().zip(
            self.config
                .stats_paths
                .iter()
                .zip(TIMESCALE_NAMES.iter()),
        ) {
            match self.load_one(path) {
                Ok(model) => *slot = Some(model),
                Err(e) => {
                    warn!(timescale = name, path = %path.display(), "load failed: {e}");
                    return false;
                }
            }
        }
        self.models = staged;
        true
    }

    /// Reloads each timescale independently; a failure leaves the stale
    /// model for that timescale in place.
    fn refresh(&mut self) {
        for i in 0..TIMESCALES {
            let path = self.config.stats_paths[i].clone();
            match self.load_one(&path) {
                Ok(model) => self.models[i] = Some(model),
                Err(e) => warn!(
                    timescale = TIMESCALE_NAMES[i],
                    path = %path.display(),
                    "refresh failed, serving stale model: {e}"
                ),
            }
        }
    }

    fn load_one(&self, path: &Path) -> Result<TimescaleModel, SnapshotError> {
        let snap = SnapshotFile::load(path)?;
        let mut stats = StatsCollection::new(&self.config.ifos, StatsKind::Background)
            .map_err(|e| SnapshotError::Deserialization(e.to_string()))?;
        snap.background.apply(&mut stats)?;
        Ok(TimescaleModel {
            stats,
            hist_trials: snap.hist_trials,
        })
    }

    /// True once the 1-week background is deep enough to trust.
    fn background_is_deep(&self) -> bool {
        match &self.models[0] {
            Some(m) => m.stats.full_node().nevent > self.config.min_background_nevent,
            None => false,
        }
    }

    /// Assigns per-timescale FARs and the rank statistic. The candidate is
    /// left unscored when the combination cannot be resolved, the background
    /// is too shallow, or no timescale model can produce a FAR.
    fn score(&self, event: &mut CandidateEvent) {
        let icombo = match combo::resolve(&event.ifos) {
            Ok(i) => i,
            Err(e) => {
                warn!(ifos = %event.ifos, "unscorable candidate: {e}");
                return;
            }
        };
        // Detectors at the invalid sentinel drop out of the combination.
        let icombo = match combo::rescan(icombo, event) {
            Ok(i) => i,
            Err(e) => {
                warn!(ifos = %event.ifos, "unscorable candidate: {e}");
                return;
            }
        };
        if !self.background_is_deep() {
            return;
        }

        let mut scores = FarScores::default();
        let mut rank = f64::NEG_INFINITY;
        for (i, model) in self.models.iter().enumerate() {
            let Some(model) = model else { return };
            let full = model.stats.full_node();
            scores.far[i] = far::far_of(
                event.coh_snr,
                event.comb_chisq,
                full,
                model.hist_trials,
            );
            if scores.far[i].is_some() {
                // The served rank is the least significant reading among
                // the timescales able to score.
                rank = rank.max(far::rank_of(event.coh_snr, event.comb_chisq, full));
            }

            for bit in combo::participating(icombo) {
                let Some(index) = model.stats.node_index_of_bit(bit) else {
                    continue;
                };
                let Some(node) = model.stats.node(index) else {
                    continue;
                };
                scores.far_single[i][bit] = far::far_of(
                    event.single_snr[bit],
                    event.single_chisq[bit],
                    node,
                    model.hist_trials,
                );
            }
        }
        // No timescale could score; the candidate stays unscored rather
        // than carrying an annotation with no FAR in it.
        if !rank.is_finite() {
            return;
        }
        scores.rank = rank;
        event.scores = Some(scores);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::density::DensityEstimator;
    use crate::rank;

    const SEC: u64 = NANOS_PER_SEC;

    fn write_stats(tag: &str, nevent_boost: i64) -> [PathBuf; TIMESCALES] {
        let mut bg = StatsCollection::new("H1L1", StatsKind::Background).unwrap();
        let zl = StatsCollection::new("H1L1", StatsKind::Zerolag).unwrap();
        let sg = StatsCollection::new("H1L1", StatsKind::Signal).unwrap();
        for node in &mut bg.nodes {
            for i in 0..300 {
                for j in 0..10 {
                    node.update(4.0 + i as f64, 0.5 + j as f64 * 10.0);
                }
            }
            node.nevent += nevent_boost;
            node.livetime = 604_800;
            DensityEstimator::Empirical.estimate(&mut node.feature);
            rank::update_rank(&node.feature, &mut node.rank);
        }
        let snap = SnapshotFile::capture("H1L1", 100, &bg, &zl, &sg);
        let dir = std::env::temp_dir();
        let paths = [
            dir.join(format!("bgfar_cache_{}_{}_1w.snap", std::process::id(), tag)),
            dir.join(format!("bgfar_cache_{}_{}_1d.snap", std::process::id(), tag)),
            dir.join(format!("bgfar_cache_{}_{}_2h.snap", std::process::id(), tag)),
        ];
        for p in &paths {
            snap.write(p).unwrap();
        }
        paths
    }

    /// Accumulated counts only, never rank-transformed; the kind of file a
    /// running accumulator writes.
    fn write_raw(tag: &str) -> PathBuf {
        let mut bg = StatsCollection::new("H1L1", StatsKind::Background).unwrap();
        let zl = StatsCollection::new("H1L1", StatsKind::Zerolag).unwrap();
        let sg = StatsCollection::new("H1L1", StatsKind::Signal).unwrap();
        for node in &mut bg.nodes {
            for i in 0..300 {
                node.update(4.0 + i as f64, 1.0);
            }
            node.livetime = 86_400;
        }
        let snap = SnapshotFile::capture("H1L1", 100, &bg, &zl, &sg);
        let path = std::env::temp_dir().join(format!(
            "bgfar_cache_{}_{}_raw.snap",
            std::process::id(),
            tag
        ));
        snap.write(&path).unwrap();
        path
    }

    fn config(paths: [PathBuf; TIMESCALES]) -> CacheConfig {
        CacheConfig {
            ifos: "H1L1".to_string(),
            stats_paths: paths,
            silent_time_secs: 10,
            refresh_interval_secs: 0,
            min_background_nevent: 1000,
        }
    }

    fn foreground(ts: u64) -> CandidateEvent {
        let mut e = CandidateEvent::empty("H1L1", ts);
        e.class = EventClass::Foreground;
        e.coh_snr = 40.0;
        e.comb_chisq = 2.0;
        e.single_snr = [25.0, 30.0, 0.0];
        e.single_chisq = [1.5, 2.5, 0.0];
        e
    }

    fn cleanup(paths: &[PathBuf; TIMESCALES]) {
        for p in paths {
            std::fs::remove_file(p).ok();
        }
    }

    #[test]
    fn test_cold_to_warming_on_first_timestamp() {
        let paths = write_stats("cold", 0);
        let mut cache = BackgroundCache::new(config(paths.clone())).unwrap();
        assert_eq!(cache.state(), CacheState::Cold);
        cache.advance_clock(5 * SEC);
        assert_eq!(cache.state(), CacheState::Warming);
        cleanup(&paths);
    }

    #[test]
    fn test_warming_holds_until_silent_time() {
        let paths = write_stats("silent", 0);
        let mut cache = BackgroundCache::new(config(paths.clone())).unwrap();
        cache.advance_clock(SEC);
        cache.advance_clock(5 * SEC);
        assert_eq!(cache.state(), CacheState::Warming);
        cache.advance_clock(12 * SEC);
        assert_eq!(cache.state(), CacheState::Active);
        cleanup(&paths);
    }

    #[test]
    fn test_missing_file_keeps_warming() {
        let paths = write_stats("missing", 0);
        std::fs::remove_file(&paths[1]).unwrap();
        let mut cache = BackgroundCache::new(config(paths.clone())).unwrap();
        cache.advance_clock(SEC);
        cache.advance_clock(60 * SEC);
        assert_eq!(cache.state(), CacheState::Warming);
        cleanup(&paths);
    }

    #[test]
    fn test_scores_deep_background() {
        let paths = write_stats("deep", 0);
        let mut cache = BackgroundCache::new(config(paths.clone())).unwrap();
        cache.advance_clock(SEC);
        cache.advance_clock(20 * SEC);
        assert_eq!(cache.state(), CacheState::Active);

        let mut events = vec![foreground(21 * SEC)];
        cache.process_batch(&mut events);
        let scores = events[0].scores.as_ref().expect("scored");
        assert!(scores
            .far
            .iter()
            .all(|f| f.is_some_and(|v| v.is_finite() && v > 0.0)));
        assert!(scores.rank.is_finite());
        assert!(scores.far_single[0][0].is_some());
        assert!(scores.far_single[0][2].is_none(), "V1 not in combination");
        cleanup(&paths);
    }

    #[test]
    fn test_shallow_background_leaves_unscored() {
        let paths = write_stats("shallow", 0);
        let mut cfg = config(paths.clone());
        cfg.min_background_nevent = MIN_BACKGROUND_NEVENT;
        let mut cache = BackgroundCache::new(cfg).unwrap();
        cache.advance_clock(SEC);
        cache.advance_clock(20 * SEC);
        assert_eq!(cache.state(), CacheState::Active);

        let mut events = vec![foreground(21 * SEC)];
        cache.process_batch(&mut events);
        assert!(events[0].scores.is_none());
        cleanup(&paths);
    }

    #[test]
    fn test_empty_events_never_scored() {
        let paths = write_stats("empty", 0);
        let mut cache = BackgroundCache::new(config(paths.clone())).unwrap();
        cache.advance_clock(SEC);
        cache.advance_clock(20 * SEC);

        let mut events = vec![CandidateEvent::empty("H1L1", 21 * SEC)];
        cache.process_batch(&mut events);
        assert!(events[0].scores.is_none());
        cleanup(&paths);
    }

    #[test]
    fn test_sentinel_detector_reduces_combination() {
        let paths = write_stats("rescan", 0);
        let mut cache = BackgroundCache::new(config(paths.clone())).unwrap();
        cache.advance_clock(SEC);
        cache.advance_clock(20 * SEC);

        let mut e = foreground(21 * SEC);
        e.single_snr[0] = 0.0; // H1 dropped out
        let mut events = vec![e];
        cache.process_batch(&mut events);
        let scores = events[0].scores.as_ref().expect("scored");
        assert!(scores.far_single[0][0].is_none());
        assert!(scores.far_single[0][1].is_some());
        cleanup(&paths);
    }

    #[test]
    fn test_underived_timescale_carries_no_far() {
        let derived = write_stats("mixed", 0);
        let raw = write_raw("mixed");
        let paths = [derived[0].clone(), raw.clone(), raw.clone()];
        let mut cache = BackgroundCache::new(config(paths.clone())).unwrap();
        cache.advance_clock(SEC);
        cache.advance_clock(20 * SEC);
        assert_eq!(cache.state(), CacheState::Active);

        let mut events = vec![foreground(21 * SEC)];
        cache.process_batch(&mut events);
        let scores = events[0].scores.as_ref().expect("scored");
        assert!(scores.far[0].is_some_and(|v| v.is_finite() && v > 0.0));
        assert!(scores.far[1].is_none());
        assert!(scores.far[2].is_none());
        assert!(scores.rank.is_finite());
        cleanup(&derived);
        std::fs::remove_file(&raw).ok();
    }

    #[test]
    fn test_all_underived_leaves_unscored() {
        let raw = write_raw("rawonly");
        let paths = [raw.clone(), raw.clone(), raw.clone()];
        let mut cfg = config(paths);
        cfg.min_background_nevent = 100;
        let mut cache = BackgroundCache::new(cfg).unwrap();
        cache.advance_clock(SEC);
        cache.advance_clock(20 * SEC);
        assert_eq!(cache.state(), CacheState::Active);

        let mut events = vec![foreground(21 * SEC)];
        cache.process_batch(&mut events);
        assert!(events[0].scores.is_none());
        std::fs::remove_file(&raw).ok();
    }

    #[test]
    fn test_refresh_failure_serves_stale_model() {
        let paths = write_stats("stale", 0);
        let mut cfg = config(paths.clone());
        cfg.refresh_interval_secs = 30;
        let mut cache = BackgroundCache::new(cfg).unwrap();
        cache.advance_clock(SEC);
        cache.advance_clock(20 * SEC);
        assert_eq!(cache.state(), CacheState::Active);

        std::fs::remove_file(&paths[1]).unwrap();
        cache.advance_clock(60 * SEC);
        assert_eq!(cache.state(), CacheState::Active);

        let mut events = vec![foreground(61 * SEC)];
        cache.process_batch(&mut events);
        let scores = events[0].scores.as_ref().expect("scored");
        assert!(scores.far[1].is_some_and(|v| v.is_finite() && v > 0.0));
        cleanup(&paths);
    }
}
