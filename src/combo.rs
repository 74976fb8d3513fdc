//! Detector-combination indexing.
//!
//! A combination id is the participation bitmask minus one, so the table of
//! all non-empty subsets of the H1/L1/V1 network is dense over `0..7`. The
//! table is hand-enumerated for the 3-detector network; growing the network
//! means generating the 2^N - 1 table instead.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use smallvec::SmallVec;

use crate::event::CandidateEvent;

/// Width of one detector name inside a combination label.
pub const IFO_NAME_LEN: usize = 2;
pub const MAX_DETECTORS: usize = 3;
pub const COMBO_COUNT: usize = (1 << MAX_DETECTORS) - 1;

/// Detector names in bit order: H1 = bit 0, L1 = bit 1, V1 = bit 2.
pub const DETECTORS: [&str; MAX_DETECTORS] = ["H1", "L1", "V1"];

/// Canonical label per combination id (id = bitmask - 1).
pub const COMBO_NAMES: [&str; COMBO_COUNT] =
    ["H1", "L1", "H1L1", "V1", "H1V1", "L1V1", "H1L1V1"];

/// A per-detector SNR at or below this is the invalid sentinel: the detector
/// did not contribute to the candidate.
pub const SNR_VALID_EPSILON: f64 = 1e-6;

static DETECTOR_BITS: Lazy<HashMap<&'static str, usize>> =
    Lazy::new(|| DETECTORS.iter().enumerate().map(|(i, n)| (*n, i)).collect());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComboError {
    /// The label does not parse into a known set of detectors.
    Unresolvable(String),
    /// A combination id outside the table.
    OutOfRange(usize),
}

impl fmt::Display for ComboError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unresolvable(s) => write!(f, "unresolvable detector combination: {:?}", s),
            Self::OutOfRange(id) => write!(f, "combination id out of range: {}", id),
        }
    }
}

impl std::error::Error for ComboError {}

/// Parse a combination label into its dense id. Detector order inside the
/// label does not matter ("L1H1" resolves the same as "H1L1"); anything that
/// is not a whole number of known detector names fails.
pub fn resolve(ifos: &str) -> Result<usize, ComboError> {
    if ifos.is_empty() || !ifos.len().is_multiple_of(IFO_NAME_LEN) {
        return Err(ComboError::Unresolvable(ifos.to_string()));
    }
    let mut mask = 0usize;
    let mut parsed = 0usize;
    for chunk_start in (0..ifos.len()).step_by(IFO_NAME_LEN) {
        let name = &ifos[chunk_start..chunk_start + IFO_NAME_LEN];
        let bit = DETECTOR_BITS
            .get(name)
            .ok_or_else(|| ComboError::Unresolvable(ifos.to_string()))?;
        mask |= 1 << bit;
        parsed += 1;
    }
    // Duplicated names would leave the popcount short of the chunk count.
    if mask.count_ones() as usize != parsed {
        return Err(ComboError::Unresolvable(ifos.to_string()));
    }
    Ok(mask - 1)
}

/// Canonical label for a combination id.
pub fn combo_name(id: usize) -> Result<&'static str, ComboError> {
    COMBO_NAMES.get(id).copied().ok_or(ComboError::OutOfRange(id))
}

/// Number of detectors participating in a combination.
pub fn detector_count(id: usize) -> usize {
    ((id + 1) as u32).count_ones() as usize
}

/// Bit indices of the participating detectors, in bit order.
pub fn participating(id: usize) -> SmallVec<[usize; MAX_DETECTORS]> {
    let mask = id + 1;
    (0..MAX_DETECTORS).filter(|b| mask & (1 << b) != 0).collect()
}

/// Re-check a nominal combination id against the event's per-detector
/// quality markers. If every nominally participating detector carries a
/// valid SNR the id is returned unchanged; otherwise the id is recomputed
/// over the valid subset. An event with no valid detector left is
/// unresolvable.
pub fn rescan(id: usize, event: &CandidateEvent) -> Result<usize, ComboError> {
    if id >= COMBO_COUNT {
        return Err(ComboError::OutOfRange(id));
    }
    let mask = id + 1;
    let mut valid_mask = 0usize;
    let mut all_valid = true;
    for bit in 0..MAX_DETECTORS {
        if mask & (1 << bit) != 0 {
            if event.single_snr[bit] > SNR_VALID_EPSILON {
                valid_mask |= 1 << bit;
            } else {
                all_valid = false;
            }
        }
    }
    if all_valid {
        return Ok(id);
    }
    if valid_mask == 0 {
        return Err(ComboError::Unresolvable(event.ifos.clone()));
    }
    Ok(valid_mask - 1)
}
