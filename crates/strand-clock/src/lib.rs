#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **strand-clock** – Hybrid Logical Clock for the Strand event ledger.
//!
//! A hybrid logical clock combines wall-clock milliseconds with a logical
//! counter, producing timestamps that are monotonic on a single node and
//! mergeable across nodes: folding a foreign timestamp into the local clock
//! always yields something strictly greater than both.
//!
//! The crate is dependency-light and sits at the very bottom of the crate
//! graph so that every other crate can depend on it without causing cycles.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

//─────────────────────────────
//  Constants
//─────────────────────────────

/// Largest wall-clock value a timestamp may carry when no explicit upper
/// bound is configured (2^53 − 1, the last integer safe to round-trip
/// through a JSON number).
pub const MAX_SAFE_TIME: u64 = 9_007_199_254_740_991;

/// Fixed width of the logical counter in the wire format. The padding keeps
/// lexicographic ordering of rendered timestamps equal to numeric ordering
/// for any two timestamps whose wall components render at the same width.
pub const LOGICAL_WIDTH: usize = 5;

//─────────────────────────────
//  Timestamp
//─────────────────────────────

/// A hybrid logical timestamp: wall-clock milliseconds plus a logical
/// disambiguator for events within the same millisecond.
///
/// Ordering is lexicographic over `(time, logical)`. The wire format is
/// `"{time}-{logical:05}"`, e.g. `1736982000000-00042`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    /// Wall-clock milliseconds since the Unix epoch.
    pub time: u64,
    /// Logical counter disambiguating events within one millisecond.
    pub logical: u32,
}

impl Timestamp {
    /// Build a timestamp from its parts.
    pub const fn new(time: u64, logical: u32) -> Self {
        Self { time, logical }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:0width$}", self.time, self.logical, width = LOGICAL_WIDTH)
    }
}

impl FromStr for Timestamp {
    type Err = ClockError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (time, logical) = value
            .split_once('-')
            .ok_or_else(|| ClockError::ParseTimestamp(value.to_owned()))?;
        let time = time
            .parse::<u64>()
            .map_err(|_| ClockError::ParseTimestamp(value.to_owned()))?;
        let logical = logical
            .parse::<u32>()
            .map_err(|_| ClockError::ParseTimestamp(value.to_owned()))?;
        Ok(Self { time, logical })
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

//─────────────────────────────
//  Errors
//─────────────────────────────

/// Violations surfaced by the clock. None of these are recoverable by
/// retrying the same call; they indicate a misconfigured bound or a wall
/// clock outside the tolerated envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// The wall clock advanced past the clock state by more than the
    /// tolerated forward jump.
    #[error("wall clock jumped forward by {ahead}ms (tolerated: {tolerance}ms)")]
    ForwardJump {
        /// How far ahead of the clock state the wall clock is, in ms.
        ahead: u64,
        /// The configured tolerance, in ms.
        tolerance: u64,
    },
    /// A folded timestamp leads the wall clock by more than the maximum
    /// allowed offset.
    #[error("timestamp leads the wall clock by {offset}ms (max: {max}ms)")]
    ClockOffset {
        /// How far the candidate timestamp leads the wall clock, in ms.
        offset: u64,
        /// The configured maximum offset, in ms.
        max: u64,
    },
    /// The produced wall component reached the configured upper bound.
    #[error("wall time {time} exceeds the upper bound {max}")]
    WallTimeOverflow {
        /// The offending wall component.
        time: u64,
        /// The configured upper bound.
        max: u64,
    },
    /// A timestamp string did not match `"{time}-{logical:05}"`.
    #[error("malformed timestamp: {0:?}")]
    ParseTimestamp(String),
}

//─────────────────────────────
//  Clock
//─────────────────────────────

/// Configuration for a [`HybridLogicalClock`].
///
/// A bound set to `0` disables the corresponding check.
#[derive(Debug, Clone, Default)]
pub struct ClockConfig {
    /// Maximum distance, in ms, a folded timestamp may lead the wall clock.
    pub max_offset: u64,
    /// Upper bound on the wall component; `0` falls back to
    /// [`MAX_SAFE_TIME`].
    pub time_upper_bound: u64,
    /// Maximum forward wall-clock jump, in ms, accepted when the wall clock
    /// has advanced past the clock state.
    pub tolerated_forward_jump: u64,
    /// Seed for the clock state, e.g. the newest timestamp recovered from a
    /// persisted ledger.
    pub last: Option<Timestamp>,
}

/// Monotonic hybrid logical clock.
///
/// `now` refreshes the state against the wall clock; `update` additionally
/// folds a foreign timestamp so that replicated records never sort before
/// their origin. The internal register is a single mutex-guarded
/// read-modify-write, safe to share behind an `Arc`.
#[derive(Debug)]
pub struct HybridLogicalClock {
    last: Mutex<Timestamp>,
    config: ClockConfig,
}

impl Default for HybridLogicalClock {
    fn default() -> Self {
        Self::new(ClockConfig::default())
    }
}

impl HybridLogicalClock {
    /// Create a clock from the given configuration.
    pub fn new(config: ClockConfig) -> Self {
        Self {
            last: Mutex::new(config.last.unwrap_or_default()),
            config,
        }
    }

    /// The newest timestamp this clock has produced or folded.
    pub fn last(&self) -> Timestamp {
        *self.last.lock().expect("clock register poisoned")
    }

    /// Produce the next timestamp, refreshing the state against the wall
    /// clock.
    pub fn now(&self) -> Result<Timestamp, ClockError> {
        let last = self.last();
        self.update(last)
    }

    /// Fold a foreign timestamp into the clock and return the new state.
    ///
    /// The result is strictly greater than both the previous state and
    /// `other`.
    pub fn update(&self, other: Timestamp) -> Result<Timestamp, ClockError> {
        let mut last = self.last.lock().expect("clock register poisoned");
        let physical = wall_now();
        let candidate = other.max(*last);
        let offset = candidate.time as i128 - physical as i128;

        let next = if offset < 0 {
            // The wall clock has advanced past both timestamps.
            let ahead = (-offset) as u64;
            if self.config.tolerated_forward_jump > 0 && ahead > self.config.tolerated_forward_jump
            {
                return Err(ClockError::ForwardJump {
                    ahead,
                    tolerance: self.config.tolerated_forward_jump,
                });
            }
            Timestamp::new(physical, 0)
        } else {
            let offset = offset as u64;
            if self.config.max_offset > 0 && offset > self.config.max_offset {
                return Err(ClockError::ClockOffset {
                    offset,
                    max: self.config.max_offset,
                });
            }
            Timestamp::new(candidate.time, candidate.logical + 1)
        };

        let max_wall_time = if self.config.time_upper_bound > 0 {
            self.config.time_upper_bound
        } else {
            MAX_SAFE_TIME
        };
        if next.time >= max_wall_time {
            return Err(ClockError::WallTimeOverflow {
                time: next.time,
                max: max_wall_time,
            });
        }

        *last = next;
        Ok(next)
    }
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn wall_now() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
