// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Weekly aggregation of daily search-performance records.

use crate::records::DailyRecord;
use crate::week::{self, WeeklyKey};
use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Identity of one performance series across weeks.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub search_query: String,
    pub page_url: String,
    pub country: String,
    pub device: String,
}

impl GroupKey {
    pub fn of(record: &DailyRecord) -> Self {
        Self {
            search_query: record.search_query.clone(),
            page_url: record.page_url.clone(),
            country: record.country.clone(),
            device: record.device.clone(),
        }
    }
}

/// Totals for one group within one week.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeeklyAggregate {
    pub week: WeeklyKey,
    pub key: GroupKey,
    pub clicks: u64,
    pub impressions: u64,
    /// Mean of the contributing daily positions.
    pub position: f64,
    /// Percentage, derived from clicks and impressions.
    pub ctr: f64,
    pub sample_count: u32,
}

/// Aggregates plus the number of records whose date could not be resolved.
#[derive(Debug, Default)]
pub struct Aggregation {
    pub aggregates: Vec<WeeklyAggregate>,
    pub skipped: usize,
}

#[derive(Default)]
struct Accumulator {
    clicks: u64,
    impressions: u64,
    positions: Vec<f64>,
}

impl Accumulator {
    fn add(&mut self, record: &DailyRecord) {
        self.clicks += record.clicks;
        self.impressions += record.impressions;
        self.positions.push(record.average_position);
    }

    fn finish(mut self, week: WeeklyKey, key: GroupKey) -> WeeklyAggregate {
        debug_assert!(!self.positions.is_empty(), "group {key:?} has no records");

        // Sum in a fixed order so the mean does not depend on input order.
        self.positions.sort_by(f64::total_cmp);
        let count = self.positions.len();
        let position = if count == 0 {
            0.0
        } else {
            self.positions.iter().sum::<f64>() / count as f64
        };

        WeeklyAggregate {
            week,
            key,
            clicks: self.clicks,
            impressions: self.impressions,
            position,
            ctr: ctr(self.clicks, self.impressions),
            sample_count: count as u32,
        }
    }
}

/// Click-through rate as a percentage; zero when there were no impressions.
pub fn ctr(clicks: u64, impressions: u64) -> f64 {
    if impressions > 0 {
        clicks as f64 / impressions as f64 * 100.0
    } else {
        0.0
    }
}

/// Fold daily records into per-week, per-group aggregates.
///
/// Output is ordered by week, then by group key.
pub fn aggregate_weekly(records: &[DailyRecord], week_start: Weekday) -> Aggregation {
    let mut groups: BTreeMap<(WeeklyKey, GroupKey), Accumulator> = BTreeMap::new();
    let mut skipped = 0;

    for record in records {
        let week = match week::week_key_for(&record.date, week_start) {
            Ok(week) => week,
            Err(err) => {
                debug!(%err, "skipping record");
                skipped += 1;
                continue;
            }
        };

        groups
            .entry((week, GroupKey::of(record)))
            .or_default()
            .add(record);
    }

    let aggregates = groups
        .into_iter()
        .map(|((week, key), acc)| acc.finish(week, key))
        .collect();

    Aggregation {
        aggregates,
        skipped,
    }
}

/// Split aggregates into per-week partitions, oldest week first.
pub fn partition_by_week(aggregates: &[WeeklyAggregate]) -> BTreeMap<WeeklyKey, Vec<WeeklyAggregate>> {
    let mut weeks: BTreeMap<WeeklyKey, Vec<WeeklyAggregate>> = BTreeMap::new();
    for aggregate in aggregates {
        weeks.entry(aggregate.week).or_default().push(aggregate.clone());
    }
    weeks
}
