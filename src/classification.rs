use serde::{Deserialize, Serialize};

/// The five activity categories, in their declared (and tie-breaking) order.
pub const ACTIVITY_KINDS: [ActivityKind; 5] = [
    ActivityKind::Meeting,
    ActivityKind::Debugging,
    ActivityKind::Tutorial,
    ActivityKind::Learning,
    ActivityKind::Working,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Meeting,
    Debugging,
    Tutorial,
    Learning,
    Working,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Meeting => "meeting",
            ActivityKind::Debugging => "debugging",
            ActivityKind::Tutorial => "tutorial",
            ActivityKind::Learning => "learning",
            ActivityKind::Working => "working",
        }
    }
}

/// Activity score vector, each score a 0-100 integer by convention.
///
/// This is a closed record rather than an open map so that a missing or
/// misspelled category cannot survive past the storage boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub meeting: u32,
    pub debugging: u32,
    pub tutorial: u32,
    pub learning: u32,
    pub working: u32,
}

impl Classification {
    pub fn score(&self, kind: ActivityKind) -> u32 {
        match kind {
            ActivityKind::Meeting => self.meeting,
            ActivityKind::Debugging => self.debugging,
            ActivityKind::Tutorial => self.tutorial,
            ActivityKind::Learning => self.learning,
            ActivityKind::Working => self.working,
        }
    }

    pub fn set_score(&mut self, kind: ActivityKind, score: u32) {
        match kind {
            ActivityKind::Meeting => self.meeting = score,
            ActivityKind::Debugging => self.debugging = score,
            ActivityKind::Tutorial => self.tutorial = score,
            ActivityKind::Learning => self.learning = score,
            ActivityKind::Working => self.working = score,
        }
    }

    pub fn is_zero(&self) -> bool {
        ACTIVITY_KINDS.iter().all(|k| self.score(*k) == 0)
    }

    /// Category with the maximum score if it reaches `threshold`, else `None`.
    /// Ties resolve to the earliest category in [`ACTIVITY_KINDS`] order.
    pub fn primary(&self, threshold: u32) -> Option<ActivityKind> {
        let mut best: Option<(ActivityKind, u32)> = None;
        for kind in ACTIVITY_KINDS {
            let score = self.score(kind);
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((kind, score)),
            }
        }
        best.filter(|(_, score)| *score >= threshold).map(|(k, _)| k)
    }

    /// Every category meeting `threshold`, independent of each other.
    pub fn significant(&self, threshold: u32) -> Vec<ActivityKind> {
        ACTIVITY_KINDS
            .into_iter()
            .filter(|kind| self.score(*kind) >= threshold)
            .collect()
    }
}

/// Default score threshold for [`Classification::primary`] and
/// [`Classification::significant`].
pub const DEFAULT_SCORE_THRESHOLD: u32 = 25;

/// Weight-normalized average of several classifications.
///
/// Each output score is `sum(score_i * weight_i) / sum(weight_i)` rounded to
/// the nearest integer; sums are accumulated in f64 so that aggregating a
/// pre-aggregated group with its combined weight matches aggregating the
/// original leaves. Entries with zero weight contribute nothing; zero total
/// weight yields the all-zero vector.
pub fn aggregate(items: &[(Classification, f64)]) -> Classification {
    let total_weight: f64 = items.iter().map(|(_, w)| *w).sum();
    if total_weight <= 0.0 {
        return Classification::default();
    }

    let mut out = Classification::default();
    for kind in ACTIVITY_KINDS {
        let weighted_sum: f64 = items
            .iter()
            .map(|(c, w)| f64::from(c.score(kind)) * *w)
            .sum();
        out.set_score(kind, (weighted_sum / total_weight).round() as u32);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only(kind: ActivityKind, score: u32) -> Classification {
        let mut c = Classification::default();
        c.set_score(kind, score);
        c
    }

    #[test]
    fn aggregate_is_weighted_average() {
        let a = only(ActivityKind::Debugging, 90);
        let b = Classification::default();
        let out = aggregate(&[(a, 2.0), (b, 2.0)]);
        assert_eq!(out.debugging, 45);
        assert_eq!(out.meeting, 0);
        assert_eq!(out.working, 0);
    }

    #[test]
    fn aggregate_single_item_is_identity() {
        let c = Classification {
            meeting: 10,
            debugging: 90,
            tutorial: 15,
            learning: 20,
            working: 5,
        };
        assert_eq!(aggregate(&[(c, 7.5)]), c);
    }

    #[test]
    fn aggregate_zero_total_weight_is_all_zero() {
        let c = only(ActivityKind::Meeting, 100);
        assert_eq!(aggregate(&[(c, 0.0)]), Classification::default());
        assert_eq!(aggregate(&[]), Classification::default());
    }

    #[test]
    fn aggregate_of_pre_aggregated_group_matches_leaves() {
        let a = only(ActivityKind::Working, 80);
        let b = only(ActivityKind::Working, 40);
        let c = only(ActivityKind::Working, 30);

        let group = aggregate(&[(a, 1.0), (b, 1.0)]);
        let nested = aggregate(&[(group, 2.0), (c, 2.0)]);
        let flat = aggregate(&[(a, 1.0), (b, 1.0), (c, 2.0)]);
        assert_eq!(nested, flat);
    }

    #[test]
    fn zero_weight_entries_contribute_nothing() {
        let a = only(ActivityKind::Learning, 60);
        let ignored = only(ActivityKind::Learning, 100);
        let out = aggregate(&[(a, 3.0), (ignored, 0.0)]);
        assert_eq!(out.learning, 60);
    }

    #[test]
    fn primary_picks_max_above_threshold() {
        let c = Classification {
            meeting: 10,
            debugging: 90,
            tutorial: 15,
            learning: 20,
            working: 5,
        };
        assert_eq!(c.primary(25), Some(ActivityKind::Debugging));
    }

    #[test]
    fn primary_is_none_below_threshold() {
        let c = Classification {
            meeting: 20,
            debugging: 20,
            tutorial: 20,
            learning: 20,
            working: 20,
        };
        assert_eq!(c.primary(25), None);
    }

    #[test]
    fn primary_breaks_ties_by_declared_order() {
        let c = Classification {
            meeting: 50,
            debugging: 50,
            tutorial: 0,
            learning: 0,
            working: 50,
        };
        assert_eq!(c.primary(25), Some(ActivityKind::Meeting));
    }

    #[test]
    fn significant_returns_all_categories_at_threshold() {
        let c = Classification {
            meeting: 80,
            debugging: 10,
            tutorial: 0,
            learning: 25,
            working: 60,
        };
        assert_eq!(
            c.significant(25),
            vec![
                ActivityKind::Meeting,
                ActivityKind::Learning,
                ActivityKind::Working
            ]
        );
    }
}
