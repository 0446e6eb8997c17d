// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-week ranking of weekly aggregates.
//!
//! The unified ranking orders rows by position (ascending), then clicks,
//! impressions and CTR (all descending); the first criterion that differs
//! decides. Rows equal on all four keep their input order, which for
//! [`aggregate_weekly`](crate::aggregate::aggregate_weekly) output is group-key
//! order. The single-metric views sort on their metric alone with the same
//! stable fallback.

use crate::aggregate::{self, WeeklyAggregate};
use crate::week::WeeklyKey;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankMetric {
    Unified,
    Clicks,
    Impressions,
    Ctr,
    Position,
}

impl RankMetric {
    /// The legacy single-metric views.
    pub const SINGLE: [RankMetric; 4] = [
        RankMetric::Clicks,
        RankMetric::Impressions,
        RankMetric::Ctr,
        RankMetric::Position,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RankMetric::Unified => "unified",
            RankMetric::Clicks => "clicks",
            RankMetric::Impressions => "impressions",
            RankMetric::Ctr => "ctr",
            RankMetric::Position => "position",
        }
    }

    fn compare(self, a: &WeeklyAggregate, b: &WeeklyAggregate) -> Ordering {
        match self {
            RankMetric::Unified => unified_order(a, b),
            RankMetric::Clicks => b.clicks.cmp(&a.clicks),
            RankMetric::Impressions => b.impressions.cmp(&a.impressions),
            RankMetric::Ctr => b.ctr.total_cmp(&a.ctr),
            RankMetric::Position => a.position.total_cmp(&b.position),
        }
    }
}

impl fmt::Display for RankMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A weekly aggregate with its place in one ranking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub aggregate: WeeklyAggregate,
    pub metric: RankMetric,
    /// 1-based position in the ranking.
    pub rank: u32,
    /// Weighted composite score, 0 to 100.
    pub reference_score: u32,
    /// Why this row sits below the previous one. Only set for the unified ranking.
    pub ranking_reason: Option<String>,
}

/// All rankings for one week.
#[derive(Clone, Debug)]
pub struct WeekRanking {
    pub week: WeeklyKey,
    pub unified: Vec<RankingEntry>,
    pub by_metric: BTreeMap<RankMetric, Vec<RankingEntry>>,
}

/// Comparator for the unified ranking; `Less` means `a` ranks higher.
pub fn unified_order(a: &WeeklyAggregate, b: &WeeklyAggregate) -> Ordering {
    a.position
        .total_cmp(&b.position)
        .then_with(|| b.clicks.cmp(&a.clicks))
        .then_with(|| b.impressions.cmp(&a.impressions))
        .then_with(|| b.ctr.total_cmp(&a.ctr))
}

/// Rank one week's aggregates by `metric`.
pub fn rank_week(aggregates: &[WeeklyAggregate], metric: RankMetric) -> Vec<RankingEntry> {
    let mut sorted: Vec<&WeeklyAggregate> = aggregates.iter().collect();
    sorted.sort_by(|a, b| metric.compare(a, b));

    let mut entries: Vec<RankingEntry> = Vec::with_capacity(sorted.len());
    for (index, aggregate) in sorted.into_iter().enumerate() {
        let ranking_reason = match metric {
            RankMetric::Unified => Some(match entries.last() {
                Some(previous) => ranking_reason(aggregate, &previous.aggregate),
                None => TOP_PERFORMER.to_string(),
            }),
            _ => None,
        };
        entries.push(RankingEntry {
            aggregate: aggregate.clone(),
            metric,
            rank: index as u32 + 1,
            reference_score: reference_score(aggregate),
            ranking_reason,
        });
    }
    entries
}

/// Rank every week present in `aggregates`, oldest week first.
pub fn rank_weeks(aggregates: &[WeeklyAggregate], with_metric_views: bool) -> Vec<WeekRanking> {
    aggregate::partition_by_week(aggregates)
        .into_iter()
        .map(|(week, rows)| {
            let by_metric = if with_metric_views {
                RankMetric::SINGLE
                    .into_iter()
                    .map(|metric| (metric, rank_week(&rows, metric)))
                    .collect()
            } else {
                BTreeMap::new()
            };
            WeekRanking {
                week,
                unified: rank_week(&rows, RankMetric::Unified),
                by_metric,
            }
        })
        .collect()
}

/// Weighted composite of position, clicks, impressions and CTR, rounded to 0..=100.
pub fn reference_score(aggregate: &WeeklyAggregate) -> u32 {
    let position_score = (100.0 - aggregate.position * 5.0).max(0.0);
    let clicks_score = (aggregate.clicks as f64 / 10.0 * 100.0).min(100.0);
    let impressions_score = (aggregate.impressions as f64 / 50.0 * 100.0).min(100.0);
    let ctr_score = (aggregate.ctr * 1000.0).min(100.0);

    let score = 0.4 * position_score + 0.3 * clicks_score + 0.2 * impressions_score + 0.1 * ctr_score;
    score.round() as u32
}

const TOP_PERFORMER: &str = "top performer";
const SIMILAR_PERFORMANCE: &str = "similar performance";

/// Describe how `current` differs from the row ranked just above it.
pub fn ranking_reason(current: &WeeklyAggregate, previous: &WeeklyAggregate) -> String {
    let mut reasons = Vec::new();

    match current.position.total_cmp(&previous.position) {
        Ordering::Less => reasons.push("better position"),
        Ordering::Greater => reasons.push("worse position"),
        Ordering::Equal => {}
    }
    match current.clicks.cmp(&previous.clicks) {
        Ordering::Greater => reasons.push("more clicks"),
        Ordering::Less => reasons.push("fewer clicks"),
        Ordering::Equal => {}
    }
    match current.impressions.cmp(&previous.impressions) {
        Ordering::Greater => reasons.push("more impressions"),
        Ordering::Less => reasons.push("fewer impressions"),
        Ordering::Equal => {}
    }
    match current.ctr.total_cmp(&previous.ctr) {
        Ordering::Greater => reasons.push("higher ctr"),
        Ordering::Less => reasons.push("lower ctr"),
        Ordering::Equal => {}
    }

    if reasons.is_empty() {
        SIMILAR_PERFORMANCE.to_string()
    } else {
        reasons.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::GroupKey;
    use chrono::NaiveDate;

    fn weekly(query: &str, clicks: u64, impressions: u64, position: f64) -> WeeklyAggregate {
        WeeklyAggregate {
            week: WeeklyKey::starting(NaiveDate::from_ymd_opt(2025, 10, 6).unwrap()),
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

    fn queries(entries: &[RankingEntry]) -> Vec<&str> {
        entries
            .iter()
            .map(|e| e.aggregate.key.search_query.as_str())
            .collect()
    }

    #[test]
    fn test_unified_order_chain() {
        let rows = vec![
            weekly("worse-position", 100, 1000, 8.0),
            weekly("fewer-clicks", 1, 100, 2.0),
            weekly("best", 5, 100, 2.0),
            weekly("fewer-impressions", 5, 50, 2.0),
        ];

        let ranked = rank_week(&rows, RankMetric::Unified);
        assert_eq!(
            queries(&ranked),
            vec!["best", "fewer-impressions", "fewer-clicks", "worse-position"]
        );
        let ranks: Vec<u32> = ranked.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_full_tie_keeps_input_order() {
        let rows = vec![weekly("a", 1, 10, 3.0), weekly("b", 1, 10, 3.0)];
        let ranked = rank_week(&rows, RankMetric::Unified);
        assert_eq!(queries(&ranked), vec!["a", "b"]);
        assert_eq!(ranked[1].ranking_reason.as_deref(), Some("similar performance"));
    }

    #[test]
    fn test_ranking_reasons() {
        let rows = vec![weekly("top", 10, 100, 1.0), weekly("next", 12, 80, 2.5)];
        let ranked = rank_week(&rows, RankMetric::Unified);

        assert_eq!(ranked[0].ranking_reason.as_deref(), Some("top performer"));
        assert_eq!(
            ranked[1].ranking_reason.as_deref(),
            Some("worse position, more clicks, fewer impressions, higher ctr")
        );
    }

    #[test]
    fn test_single_metric_views() {
        let rows = vec![
            weekly("a", 1, 300, 1.0),
            weekly("b", 9, 100, 4.0),
            weekly("c", 5, 10, 2.0),
        ];

        assert_eq!(queries(&rank_week(&rows, RankMetric::Clicks)), vec!["b", "c", "a"]);
        assert_eq!(queries(&rank_week(&rows, RankMetric::Impressions)), vec!["a", "b", "c"]);
        assert_eq!(queries(&rank_week(&rows, RankMetric::Ctr)), vec!["c", "b", "a"]);
        assert_eq!(queries(&rank_week(&rows, RankMetric::Position)), vec!["a", "c", "b"]);
        assert!(rank_week(&rows, RankMetric::Clicks)
            .iter()
            .all(|e| e.ranking_reason.is_none()));
    }

    #[test]
    fn test_ranks_are_dense_per_week() {
        let mut rows = Vec::new();
        for i in 0..25u64 {
            rows.push(weekly(&format!("q{i}"), i % 4, i * 3 % 7, (i % 5) as f64));
        }
        let mut next_week = weekly("later", 1, 1, 1.0);
        next_week.week = next_week.week.previous();
        rows.push(next_week);

        let rankings = rank_weeks(&rows, true);
        assert_eq!(rankings.len(), 2);
        for ranking in &rankings {
            let mut ranks: Vec<u32> = ranking.unified.iter().map(|e| e.rank).collect();
            ranks.sort_unstable();
            let expected: Vec<u32> = (1..=ranking.unified.len() as u32).collect();
            assert_eq!(ranks, expected);
            assert_eq!(ranking.by_metric.len(), 4);
        }
        assert!(rankings[0].week < rankings[1].week);
    }

    #[test]
    fn test_reference_score() {
        // position 4 -> 80, clicks 6 -> 60, impressions 50 -> 100, ctr 12 -> 100
        assert_eq!(reference_score(&weekly("q", 6, 50, 4.0)), 80);
        // Everything floors at zero except position.
        assert_eq!(reference_score(&weekly("q", 0, 0, 0.0)), 40);
        assert_eq!(reference_score(&weekly("q", 0, 0, 30.0)), 0);
    }
}
