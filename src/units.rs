//! Time units and ranges shared by every series and capture.
//!
//! The agent reports timestamps in nanoseconds. Everything in memory works in
//! microseconds, converted with truncating integer division so the same raw
//! sample always lands on the same microsecond. Open-ended intervals carry
//! [`OPEN_END`] as their end (or duration) rather than an `Option`.

/// Sentinel for an interval that has not ended yet.
pub const OPEN_END: i64 = i64::MAX;

/// Sentinel for "no pending start time".
pub const INVALID_START_TIME: i64 = -1;

/// Padding applied on both sides of a series query so charts can interpolate
/// across the visible edges.
pub const QUERY_BUFFER_US: i64 = 1_000_000;

const NANOS_PER_MICRO: i64 = 1_000;

/// Converts wire nanoseconds to microseconds. The open sentinel is preserved.
pub fn ns_to_us(ns: i64) -> i64 {
    if ns == OPEN_END {
        OPEN_END
    } else {
        ns / NANOS_PER_MICRO
    }
}

/// Converts microseconds back to wire nanoseconds, saturating at the sentinels.
pub fn us_to_ns(us: i64) -> i64 {
    if us == OPEN_END {
        OPEN_END
    } else {
        us.saturating_mul(NANOS_PER_MICRO)
    }
}

/// Duration in microseconds between two wire timestamps. An open end yields
/// [`OPEN_END`].
pub fn duration_us(start_ns: i64, end_ns: i64) -> i64 {
    if end_ns == OPEN_END {
        OPEN_END
    } else {
        ns_to_us(end_ns.saturating_sub(start_ns))
    }
}

/// Inclusive microsecond range `[min, max]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Range {
    pub min: i64,
    pub max: i64,
}

impl Range {
    pub const EVERYTHING: Range = Range {
        min: i64::MIN,
        max: i64::MAX,
    };

    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    /// An empty range (`min > max`), used to clear a timeline selection.
    pub fn empty() -> Self {
        Self { min: 1, max: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    pub fn length(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.max.saturating_sub(self.min)
        }
    }

    pub fn contains(&self, value: i64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Whether `[start, start + duration]` overlaps this range. A duration of
    /// [`OPEN_END`] extends forever.
    pub fn intersects_interval(&self, start: i64, duration: i64) -> bool {
        if self.is_empty() {
            return false;
        }
        let end = start.saturating_add(duration);
        start <= self.max && end >= self.min
    }

    /// The range widened by `buffer` on each side, saturating at the i64 limits.
    pub fn expanded(&self, buffer: i64) -> Range {
        Range {
            min: self.min.saturating_sub(buffer),
            max: self.max.saturating_add(buffer),
        }
    }

    /// The same bounds in wire nanoseconds.
    pub fn to_ns(&self) -> Range {
        Range {
            min: if self.min == i64::MIN {
                i64::MIN
            } else {
                self.min.saturating_mul(NANOS_PER_MICRO)
            },
            max: us_to_ns(self.max),
        }
    }
}

impl Default for Range {
    fn default() -> Self {
        Range::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ns_to_us_truncates() {
        assert_eq!(ns_to_us(1_999), 1);
        assert_eq!(ns_to_us(2_000), 2);
        assert_eq!(ns_to_us(OPEN_END), OPEN_END);
    }

    #[test]
    fn test_duration_open_end() {
        assert_eq!(duration_us(5_000, 15_500), 10);
        assert_eq!(duration_us(5_000, OPEN_END), OPEN_END);
    }

    #[test]
    fn test_expanded_saturates() {
        let r = Range::EVERYTHING.expanded(QUERY_BUFFER_US);
        assert_eq!(r, Range::EVERYTHING);
        let r = Range::new(10, 20).expanded(5);
        assert_eq!((r.min, r.max), (5, 25));
    }

    #[test]
    fn test_intersects_open_interval() {
        let r = Range::new(100, 200);
        assert!(r.intersects_interval(50, OPEN_END));
        assert!(r.intersects_interval(150, 10));
        assert!(!r.intersects_interval(201, 10));
        assert!(!r.intersects_interval(10, 20));
        assert!(!Range::empty().intersects_interval(0, OPEN_END));
    }
}
