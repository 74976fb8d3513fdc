//! Candidate records exchanged with the surrounding pipeline.

use serde::{Deserialize, Serialize};

use crate::combo::MAX_DETECTORS;

/// Number of background timescales served by the cache (1-week, 1-day,
/// 2-hour, in file order).
pub const TIMESCALES: usize = 3;

/// Classification carried on every incoming record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventClass {
    /// A zero-lag candidate: accumulated into the zerolag model and scored.
    Foreground,
    /// A time-slide sample: accumulated into the background model, consumed.
    Background,
    /// A heartbeat with no trigger content: advances livetime, passes through.
    Empty,
}

/// One candidate event as delivered by the pipeline.
///
/// Per-detector entries are indexed by detector bit (H1 = 0, L1 = 1,
/// V1 = 2); a detector that did not contribute carries an SNR at the
/// invalid sentinel (see [`crate::combo::SNR_VALID_EPSILON`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEvent {
    /// Participation label, e.g. "H1L1V1".
    pub ifos: String,
    pub single_snr: [f64; MAX_DETECTORS],
    pub single_chisq: [f64; MAX_DETECTORS],
    /// Coincident (coherent) SNR over the participating network.
    pub coh_snr: f64,
    /// Combined chi-square over the participating network.
    pub comb_chisq: f64,
    pub class: EventClass,
    pub timestamp_ns: u64,
    /// FAR annotation, filled by the cache controller once it is Active and
    /// the background is deep enough; `None` means unscored.
    pub scores: Option<FarScores>,
}

/// Per-timescale FAR annotation attached to a scored candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FarScores {
    /// Full-combination FAR per timescale (1w, 1d, 2h); `None` where that
    /// timescale's model could not score the candidate, e.g. a background
    /// file that has never been through a rank transform.
    pub far: [Option<f64>; TIMESCALES],
    /// Single-detector FAR per timescale; `None` where the detector did not
    /// contribute to this candidate.
    pub far_single: [[Option<f64>; MAX_DETECTORS]; TIMESCALES],
    /// Rank statistic: the largest (least significant) of the three
    /// per-timescale rank-map readings.
    pub rank: f64,
}

impl CandidateEvent {
    /// A record with every field at its neutral value; tests and generators
    /// start from this and override.
    pub fn empty(ifos: &str, timestamp_ns: u64) -> Self {
        Self {
            ifos: ifos.to_string(),
            single_snr: [0.0; MAX_DETECTORS],
            single_chisq: [0.0; MAX_DETECTORS],
            coh_snr: 0.0,
            comb_chisq: 0.0,
            class: EventClass::Empty,
            timestamp_ns,
            scores: None,
        }
    }
}
