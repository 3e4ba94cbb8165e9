use chrono::{DateTime, Duration, Utc};

/// A closed time interval `[start, end]`.
///
/// Used by the clustering and merge passes for overlap checks and by
/// classification aggregation for duration weighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        // Normalize inverted input so duration math never goes negative
        if end < start {
            Self { start: end, end: start }
        } else {
            Self { start, end }
        }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn duration_secs(&self) -> i64 {
        self.duration().num_seconds()
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Length of the intersection of two ranges; zero when disjoint.
    pub fn overlap_duration(&self, other: &TimeRange) -> Duration {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if end > start {
            end - start
        } else {
            Duration::zero()
        }
    }

    /// Fraction of `self` covered by `other`, in `[0.0, 1.0]`.
    /// A zero-length range counts as fully covered when its instant overlaps.
    pub fn overlap_ratio(&self, other: &TimeRange) -> f64 {
        let own = self.duration().num_milliseconds();
        if own == 0 {
            return if other.contains(self.start) { 1.0 } else { 0.0 };
        }
        self.overlap_duration(other).num_milliseconds() as f64 / own as f64
    }
}
