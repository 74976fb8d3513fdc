//! End-to-end checks over the accumulate -> snapshot -> cache -> score
//! pipeline, plus a statistical calibration of the served tail probability.

use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, LogNormal};

use bgfar::density::DensityEstimator;
use bgfar::event::{CandidateEvent, EventClass};
use bgfar::far;
use bgfar::rank;
use bgfar::{
    AccumConfig, BackgroundAccumulator, BackgroundCache, CacheConfig, CacheState,
    SnapshotFile, SnapshotInterval, StatsCollection, StatsKind,
};

const SEC: u64 = 1_000_000_000;

fn temp_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("bgfar_it_{}_{}", std::process::id(), tag))
}

fn sample_features(n: usize, seed: u64) -> Vec<(f64, f64)> {
    let mut rng = StdRng::seed_from_u64(seed);
    // Broad unimodal background well inside both axes.
    let snr = LogNormal::new(10f64.ln(), 0.3).unwrap();
    let chisq = LogNormal::new(0.0, 0.5).unwrap();
    (0..n)
        .map(|_| (snr.sample(&mut rng), chisq.sample(&mut rng)))
        .collect()
}

/// Fraction of background samples at or below a served tail probability p
/// must come out near p itself.
#[test]
fn test_tail_probability_calibration() {
    let samples = sample_features(1_000_000, 7);
    let mut stats = build_background(&samples);

    DensityEstimator::Empirical.estimate(&mut stats.feature);
    rank::update_rank(&stats.feature, &mut stats.rank);

    // At p = 0.001 the sample still holds ~1000 tail events, so the factor-3
    // window is dominated by the 300-bin rank discretization, not counting
    // noise.
    for p in [0.1, 0.01, 0.001] {
        let hits = samples
            .iter()
            .filter(|(s, c)| {
                far::tail_probability(*s, *c, &stats).expect("derived model") <= p
            })
            .count();
        let fraction = hits as f64 / samples.len() as f64;
        assert!(
            fraction > p / 3.0 && fraction < p * 3.0,
            "target {p}: observed fraction {fraction}"
        );
    }
}

fn build_background(samples: &[(f64, f64)]) -> bgfar::CombinationStats {
    let mut stats = StatsCollection::new("H1L1", StatsKind::Background).unwrap();
    let node = stats.full_node_mut();
    for &(s, c) in samples {
        node.update(s, c);
    }
    node.clone()
}

#[test]
fn test_accumulate_snapshot_cache_round_trip() {
    let prefix = temp_path("pipeline");
    let mut acc = BackgroundAccumulator::new(AccumConfig {
        ifos: "H1L1".to_string(),
        hist_trials: 100,
        interval: SnapshotInterval::AtFinish,
        output_prefix: prefix.clone(),
        history_path: None,
    })
    .unwrap();

    // Background samples interleaved with livetime heartbeats.
    let mut rng = StdRng::seed_from_u64(11);
    let mut batch = Vec::new();
    for i in 0..50_000u64 {
        let mut e = CandidateEvent::empty("H1L1", i * SEC / 10);
        e.class = EventClass::Background;
        e.coh_snr = 10.0 * (1.0 + rng.random::<f64>());
        e.comb_chisq = 0.5 + rng.random::<f64>() * 4.0;
        e.single_snr = [e.coh_snr * 0.7, e.coh_snr * 0.7, 0.0];
        e.single_chisq = [e.comb_chisq, e.comb_chisq, 0.0];
        batch.push(e);
        if i % 10 == 0 {
            batch.push(CandidateEvent::empty("H1L1", i * SEC / 10));
        }
    }
    let passed = acc.process_batch(batch).unwrap();
    assert!(passed.iter().all(|e| e.class == EventClass::Empty));

    // Derive the rank model in the persisted snapshot the way the offline
    // merger would, then serve it on all three timescales.
    let snap_path = acc.finish().unwrap().expect("final snapshot");
    let snap = SnapshotFile::load(&snap_path).unwrap();
    let mut bg = StatsCollection::new("H1L1", StatsKind::Background).unwrap();
    let mut zl = StatsCollection::new("H1L1", StatsKind::Zerolag).unwrap();
    let mut sg = StatsCollection::new("H1L1", StatsKind::Signal).unwrap();
    snap.apply(&mut bg, &mut zl, &mut sg).unwrap();
    assert!(bg.full_node().nevent == 50_000);
    assert!(bg.full_node().livetime > 0);

    for node in &mut bg.nodes {
        DensityEstimator::Empirical.estimate(&mut node.feature);
        rank::update_rank(&node.feature, &mut node.rank);
    }
    let derived = SnapshotFile::capture("H1L1", snap.hist_trials, &bg, &zl, &sg);
    let served = temp_path("served.snap");
    derived.write(&served).unwrap();

    let mut cache = BackgroundCache::new(CacheConfig {
        ifos: "H1L1".to_string(),
        stats_paths: [served.clone(), served.clone(), served.clone()],
        silent_time_secs: 5,
        refresh_interval_secs: 0,
        min_background_nevent: 10_000,
    })
    .unwrap();
    cache.advance_clock(SEC);
    cache.advance_clock(10 * SEC);
    assert_eq!(cache.state(), CacheState::Active);

    let mut candidate = CandidateEvent::empty("H1L1", 11 * SEC);
    candidate.class = EventClass::Foreground;
    candidate.coh_snr = 60.0;
    candidate.comb_chisq = 1.0;
    candidate.single_snr = [40.0, 45.0, 0.0];
    candidate.single_chisq = [0.9, 1.1, 0.0];
    let mut events = vec![candidate];
    cache.process_batch(&mut events);

    let scores = events[0].scores.as_ref().expect("scored candidate");
    assert!(scores
        .far
        .iter()
        .all(|f| f.is_some_and(|v| v.is_finite() && v > 0.0)));
    assert!(scores.rank.is_finite());

    // A much louder candidate must not come out more common.
    let mut loud = events[0].clone();
    loud.coh_snr = 400.0;
    loud.scores = None;
    let mut loud_events = vec![loud];
    cache.process_batch(&mut loud_events);
    let loud_scores = loud_events[0].scores.as_ref().expect("scored");
    assert!(loud_scores.far[0].unwrap() <= scores.far[0].unwrap());

    std::fs::remove_file(&snap_path).ok();
    std::fs::remove_file(&served).ok();
}

#[test]
fn test_snapshot_round_trip_is_bit_identical() {
    let samples = sample_features(5_000, 23);
    let mut bg = StatsCollection::new("H1L1V1", StatsKind::Background).unwrap();
    for &(s, c) in &samples {
        bg.full_node_mut().update(s, c);
    }
    let node = bg.full_node_mut();
    DensityEstimator::AdaptiveKde.estimate(&mut node.feature);
    rank::update_rank(&node.feature, &mut node.rank);
    node.livetime = 3600;
    let zl = StatsCollection::new("H1L1V1", StatsKind::Zerolag).unwrap();
    let sg = StatsCollection::new("H1L1V1", StatsKind::Signal).unwrap();

    let path = temp_path("bits.snap");
    SnapshotFile::capture("H1L1V1", 100, &bg, &zl, &sg)
        .write(&path)
        .unwrap();

    let mut bg2 = StatsCollection::new("H1L1V1", StatsKind::Background).unwrap();
    let mut zl2 = StatsCollection::new("H1L1V1", StatsKind::Zerolag).unwrap();
    let mut sg2 = StatsCollection::new("H1L1V1", StatsKind::Signal).unwrap();
    SnapshotFile::load(&path)
        .unwrap()
        .apply(&mut bg2, &mut zl2, &mut sg2)
        .unwrap();

    // Full equality covers every array bit for bit, the floating point
    // curves included.
    assert_eq!(bg.nodes, bg2.nodes);
    assert_eq!(zl.nodes, zl2.nodes);
    assert_eq!(sg.nodes, sg2.nodes);
    std::fs::remove_file(&path).ok();
}
