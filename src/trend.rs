// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Week-over-week trend deltas.

use crate::aggregate::GroupKey;
use crate::ranking::RankingEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Position assumed for a series that did not exist last week.
pub const DEFAULT_NEW_POSITION_BASELINE: f64 = 100.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    New,
    Up,
    Down,
    Stable,
}

impl Trend {
    pub fn as_str(self) -> &'static str {
        match self {
            Trend::New => "new",
            Trend::Up => "up",
            Trend::Down => "down",
            Trend::Stable => "stable",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last week's values for one series.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriorSnapshot {
    pub clicks: u64,
    pub impressions: u64,
    pub ctr: f64,
    pub position: f64,
    pub rank: Option<u32>,
}

/// A row from last week, keyed by series identity.
#[derive(Clone, Debug, PartialEq)]
pub struct PreviousRow {
    pub key: GroupKey,
    pub snapshot: PriorSnapshot,
}

impl From<&RankingEntry> for PreviousRow {
    fn from(entry: &RankingEntry) -> Self {
        Self {
            key: entry.aggregate.key.clone(),
            snapshot: PriorSnapshot {
                clicks: entry.aggregate.clicks,
                impressions: entry.aggregate.impressions,
                ctr: entry.aggregate.ctr,
                position: entry.aggregate.position,
                rank: Some(entry.rank),
            },
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TrendOptions {
    pub new_position_baseline: f64,
}

impl Default for TrendOptions {
    fn default() -> Self {
        Self {
            new_position_baseline: DEFAULT_NEW_POSITION_BASELINE,
        }
    }
}

/// A ranked row with its change since last week. Positive changes are improvements.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrendDelta {
    pub entry: RankingEntry,
    pub trend: Trend,
    pub clicks_change: i64,
    pub impressions_change: i64,
    pub ctr_change: f64,
    pub position_change: f64,
    /// `None` when there is no prior rank to compare against.
    pub ranking_change: Option<i64>,
    pub previous: Option<PriorSnapshot>,
}

/// Join this week's ranking against last week's rows.
///
/// An empty `previous` classifies every row as [`Trend::New`].
pub fn compute_trends(
    current: &[RankingEntry],
    previous: &[PreviousRow],
    options: TrendOptions,
) -> Vec<TrendDelta> {
    let mut lookup: HashMap<&GroupKey, &PriorSnapshot> = HashMap::with_capacity(previous.len());
    for row in previous {
        lookup.entry(&row.key).or_insert(&row.snapshot);
    }

    current
        .iter()
        .map(|entry| match lookup.get(&entry.aggregate.key) {
            Some(prior) => compare(entry, prior),
            None => new_series(entry, options),
        })
        .collect()
}

fn new_series(entry: &RankingEntry, options: TrendOptions) -> TrendDelta {
    let current = &entry.aggregate;
    TrendDelta {
        entry: entry.clone(),
        trend: Trend::New,
        clicks_change: current.clicks as i64,
        impressions_change: current.impressions as i64,
        ctr_change: current.ctr,
        position_change: options.new_position_baseline - current.position,
        ranking_change: None,
        previous: None,
    }
}

fn compare(entry: &RankingEntry, prior: &PriorSnapshot) -> TrendDelta {
    let current = &entry.aggregate;
    let clicks_change = current.clicks as i64 - prior.clicks as i64;
    let impressions_change = current.impressions as i64 - prior.impressions as i64;
    let position_change = prior.position - current.position;
    let ranking_change = prior.rank.map(|rank| rank as i64 - entry.rank as i64);

    // `up` needs every signal to improve, `down` needs only one to worsen.
    let trend = if clicks_change > 0 && impressions_change > 0 && position_change > 0.0 {
        Trend::Up
    } else if clicks_change < 0
        || impressions_change < 0
        || position_change < 0.0
        || ranking_change.is_some_and(|change| change < 0)
    {
        Trend::Down
    } else {
        Trend::Stable
    };

    TrendDelta {
        entry: entry.clone(),
        trend,
        clicks_change,
        impressions_change,
        ctr_change: current.ctr - prior.ctr,
        position_change,
        ranking_change,
        previous: Some(prior.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{self, WeeklyAggregate};
    use crate::ranking::{RankMetric, rank_week};
    use crate::week::WeeklyKey;
    use chrono::NaiveDate;

    fn weekly(query: &str, clicks: u64, impressions: u64, position: f64) -> WeeklyAggregate {
        WeeklyAggregate {
            week: WeeklyKey::starting(NaiveDate::from_ymd_opt(2025, 10, 13).unwrap()),
            key: GroupKey {
                search_query: query.to_string(),
                page_url: "/a".to_string(),
                country: "US".to_string(),
                device: "desktop".to_string(),
            },
            clicks,
            impressions,
            position,
            ctr: aggregate::ctr(clicks, impressions),
            sample_count: 1,
        }
    }

    fn previous(query: &str, clicks: u64, impressions: u64, position: f64, rank: u32) -> PreviousRow {
        let aggregate = weekly(query, clicks, impressions, position);
        PreviousRow {
            key: aggregate.key,
            snapshot: PriorSnapshot {
                clicks,
                impressions,
                ctr: aggregate.ctr,
                position,
                rank: Some(rank),
            },
        }
    }

    fn trend_of<'a>(deltas: &'a [TrendDelta], query: &str) -> &'a TrendDelta {
        deltas
            .iter()
            .find(|d| d.entry.aggregate.key.search_query == query)
            .unwrap()
    }

    #[test]
    fn test_all_new_without_previous_week() {
        let current = rank_week(
            &[weekly("a", 3, 30, 4.0), weekly("b", 0, 0, 0.0)],
            RankMetric::Unified,
        );
        let deltas = compute_trends(&current, &[], TrendOptions::default());

        assert!(deltas.iter().all(|d| d.trend == Trend::New));
        let a = trend_of(&deltas, "a");
        assert_eq!(a.clicks_change, 3);
        assert_eq!(a.impressions_change, 30);
        assert_eq!(a.ctr_change, 10.0);
        assert_eq!(a.position_change, 96.0);
        assert_eq!(a.ranking_change, None);
        assert!(a.previous.is_none());
    }

    #[test]
    fn test_new_position_baseline_is_configurable() {
        let current = rank_week(&[weekly("a", 3, 30, 4.0)], RankMetric::Unified);
        let options = TrendOptions {
            new_position_baseline: 50.0,
        };
        let deltas = compute_trends(&current, &[], options);
        assert_eq!(deltas[0].position_change, 46.0);
    }

    #[test]
    fn test_classification() {
        let current = rank_week(
            &[
                weekly("up", 10, 100, 2.0),
                weekly("mixed", 12, 90, 3.0),
                weekly("flat", 5, 50, 4.0),
                weekly("rank-drop", 5, 50, 5.0),
                weekly("fresh", 1, 10, 9.0),
            ],
            RankMetric::Unified,
        );
        let prior = vec![
            previous("up", 5, 50, 3.0, 2),
            previous("mixed", 10, 100, 3.5, 1),
            previous("flat", 5, 50, 4.0, 3),
            previous("rank-drop", 5, 50, 5.0, 1),
        ];

        let deltas = compute_trends(&current, &prior, TrendOptions::default());

        let up = trend_of(&deltas, "up");
        assert_eq!(up.trend, Trend::Up);
        assert_eq!(up.clicks_change, 5);
        assert_eq!(up.position_change, 1.0);
        assert_eq!(up.ranking_change, Some(1));

        // More clicks and a better position do not outweigh fewer impressions.
        assert_eq!(trend_of(&deltas, "mixed").trend, Trend::Down);
        assert_eq!(trend_of(&deltas, "flat").trend, Trend::Stable);

        let rank_drop = trend_of(&deltas, "rank-drop");
        assert_eq!(rank_drop.ranking_change, Some(-3));
        assert_eq!(rank_drop.trend, Trend::Down);

        assert_eq!(trend_of(&deltas, "fresh").trend, Trend::New);
    }

    #[test]
    fn test_previous_row_from_entry() {
        let entries = rank_week(&[weekly("a", 2, 8, 1.5)], RankMetric::Unified);
        let row = PreviousRow::from(&entries[0]);
        assert_eq!(row.snapshot.rank, Some(1));
        assert_eq!(row.snapshot.ctr, 25.0);
    }
}
