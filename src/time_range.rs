//! Time ranges and the ring builder (§3, §4.2).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Half-open `[start, end)` interval. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, CoreError> {
        if start >= end {
            return Err(CoreError::Validation(format!(
                "time range start {} must precede end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> ChronoDuration {
        self.end - self.start
    }

    /// `true` iff `other` lies entirely within `self` (inclusive start,
    /// exclusive end boundaries match the half-open convention).
    pub fn contains(&self, other: &TimeRange) -> bool {
        other.start >= self.start && other.end <= self.end && other.start < other.end
    }

    /// A representative point roughly in the middle of the range, used to
    /// pick a mid-ring probe window (§4.7 step 3).
    pub fn midpoint(&self) -> DateTime<Utc> {
        self.start + self.duration() / 2
    }

    pub fn clip(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<TimeRange> {
        let s = start.max(self.start);
        let e = end.min(self.end);
        if s < e {
            Some(TimeRange { start: s, end: e })
        } else {
            None
        }
    }
}

/// A sub-window of a `TimeRange`, produced by the `RingBuilder` in
/// chronological order: pre-rings, core, post-rings.
pub type Ring = TimeRange;

/// Configuration for the ring builder, mirroring the `engine.buckets.*`
/// configuration keys in spec.md §6.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RingConfig {
    pub core_window_size: ChronoDuration,
    pub ring_step: ChronoDuration,
    pub pre_rings: usize,
    pub post_rings: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            core_window_size: ChronoDuration::minutes(5),
            ring_step: ChronoDuration::zero(),
            pre_rings: 3,
            post_rings: 1,
        }
    }
}

/// Builds an ordered, non-overlapping sequence of rings over a `TimeRange`
/// per the algorithm in spec.md §4.2.
pub struct RingBuilder;

impl RingBuilder {
    pub fn build(range: &TimeRange, config: &RingConfig) -> Vec<Ring> {
        let duration = range.duration();

        // Step 1: degenerate core window collapses to the full range.
        if config.core_window_size <= ChronoDuration::zero() || config.core_window_size > duration
        {
            return vec![*range];
        }

        // Step 2: anchor the core window at `end`, clipped to range, and
        // default the ring step when unset.
        let core_start = (range.end() - config.core_window_size).max(range.start());
        let core = TimeRange {
            start: core_start,
            end: range.end(),
        };

        let ring_step = if config.ring_step <= ChronoDuration::zero() {
            let half_core = config.core_window_size / 2;
            half_core.max(ChronoDuration::minutes(1))
        } else {
            config.ring_step
        };

        let mut rings = Vec::with_capacity(config.pre_rings + 1 + config.post_rings);

        // Step 3: pre-rings, moving backwards from the core start.
        let mut pre = Vec::with_capacity(config.pre_rings);
        let mut cursor = core.start;
        for _ in 0..config.pre_rings {
            if cursor <= range.start() {
                break;
            }
            let window_start = (cursor - ring_step).max(range.start());
            if window_start >= cursor {
                break;
            }
            pre.push(TimeRange {
                start: window_start,
                end: cursor,
            });
            cursor = window_start;
        }
        pre.reverse();
        rings.extend(pre);

        rings.push(core);

        // Step 4: post-rings, moving forwards from the core end.
        let mut cursor = core.end;
        for _ in 0..config.post_rings {
            if cursor >= range.end() {
                break;
            }
            let window_end = (cursor + ring_step).min(range.end());
            if window_end <= cursor {
                break;
            }
            rings.push(TimeRange {
                start: cursor,
                end: window_end,
            });
            cursor = window_end;
        }

        rings
    }
}
