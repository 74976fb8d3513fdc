//! Online false-alarm-rate estimation for coincident transient candidates.
//!
//! The crate accumulates background and zerolag statistics over a
//! (log SNR, log chi-square) feature plane per detector combination,
//! derives a rank statistic and its tail distribution from the background,
//! and serves per-timescale FAR annotations through a periodically
//! refreshed background cache.

pub mod accum;
pub mod bins;
pub mod cache;
pub mod checkpoint;
pub mod combo;
pub mod density;
pub mod event;
pub mod far;
pub mod kde;
pub mod rank;
pub mod signal;
pub mod stats;

pub use accum::{AccumConfig, BackgroundAccumulator, SnapshotInterval};
pub use cache::{BackgroundCache, CacheConfig, CacheState, MIN_BACKGROUND_NEVENT};
pub use checkpoint::{SnapshotError, SnapshotFile};
pub use event::{CandidateEvent, EventClass, FarScores, TIMESCALES};
pub use stats::{CombinationStats, StatsCollection, StatsKind};
