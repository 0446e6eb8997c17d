// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-URL impression-weighted average position.
//!
//! A URL with no contributing rows has no average at all. That is kept
//! distinct from an average of zero all the way through to the stored matrix,
//! where it becomes an empty cell.

use crate::aggregate::WeeklyAggregate;
use crate::records::DailyRecord;
use crate::week::{self, WeeklyKey};
use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// Rounded average position per normalized URL. URLs without data are absent.
pub type UrlAverages = BTreeMap<String, u32>;

/// Canonical form of a page URL used as the matrix row key.
///
/// Absolute URLs are parsed (lower-casing scheme and host) and lose their
/// fragment; a trailing slash is dropped unless the URL carries a query.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(mut url) => {
            url.set_fragment(None);
            let has_query = url.query().is_some();
            let rendered = url.to_string();
            if has_query {
                rendered
            } else {
                rendered.trim_end_matches('/').to_string()
            }
        }
        Err(_) => {
            let without_fragment = trimmed.split('#').next().unwrap_or_default();
            match without_fragment.trim_end_matches('/') {
                "" if without_fragment.starts_with('/') => "/".to_string(),
                rest => rest.to_string(),
            }
        }
    }
}

#[derive(Default)]
struct PositionAccumulator {
    weighted_sum: f64,
    weight_sum: f64,
    plain_sum: f64,
    samples: u32,
}

impl PositionAccumulator {
    fn add(&mut self, position: f64, weight: f64) {
        self.weighted_sum += position * weight;
        self.weight_sum += weight;
        self.plain_sum += position;
        self.samples += 1;
    }

    fn average(&self) -> Option<u32> {
        let mean = if self.weight_sum > 0.0 {
            self.weighted_sum / self.weight_sum
        } else if self.samples > 0 {
            self.plain_sum / self.samples as f64
        } else {
            return None;
        };
        Some(mean.round().max(0.0) as u32)
    }
}

/// Impressions, else clicks, else the number of samples behind the row.
fn weight(impressions: u64, clicks: u64, samples: u32) -> f64 {
    if impressions > 0 {
        impressions as f64
    } else if clicks > 0 {
        clicks as f64
    } else {
        samples.max(1) as f64
    }
}

fn country_matches(country: &str, filter: Option<&str>) -> bool {
    filter.is_none_or(|wanted| country.trim().eq_ignore_ascii_case(wanted.trim()))
}

fn finish(accumulators: BTreeMap<String, PositionAccumulator>) -> UrlAverages {
    accumulators
        .into_iter()
        .filter_map(|(url, acc)| acc.average().map(|avg| (url, avg)))
        .collect()
}

/// Average position per URL for `week`, from weekly aggregates.
pub fn url_averages(
    aggregates: &[WeeklyAggregate],
    week: &WeeklyKey,
    country: Option<&str>,
) -> UrlAverages {
    let mut accumulators: BTreeMap<String, PositionAccumulator> = BTreeMap::new();
    for aggregate in aggregates
        .iter()
        .filter(|a| a.week == *week && country_matches(&a.key.country, country))
    {
        accumulators
            .entry(normalize_url(&aggregate.key.page_url))
            .or_default()
            .add(
                aggregate.position,
                weight(aggregate.impressions, aggregate.clicks, aggregate.sample_count),
            );
    }
    finish(accumulators)
}

/// Average position per URL for `week`, straight from daily records.
pub fn url_averages_from_daily(
    records: &[DailyRecord],
    week: &WeeklyKey,
    country: Option<&str>,
    week_start: Weekday,
) -> UrlAverages {
    let mut accumulators: BTreeMap<String, PositionAccumulator> = BTreeMap::new();
    for record in records {
        let in_week = week::week_key_for(&record.date, week_start).is_ok_and(|w| w == *week);
        if !in_week || !country_matches(&record.country, country) {
            continue;
        }
        accumulators
            .entry(normalize_url(&record.page_url))
            .or_default()
            .add(
                record.average_position,
                weight(record.impressions, record.clicks, 1),
            );
    }
    finish(accumulators)
}

/// Fill URLs missing from `primary` with values from `fallback`.
pub fn reconcile(mut primary: UrlAverages, fallback: &UrlAverages) -> UrlAverages {
    for (url, average) in fallback {
        primary.entry(url.clone()).or_insert(*average);
    }
    primary
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlCell {
    pub url: String,
    pub average_position: Option<u32>,
}

/// One week's column of the URL matrix.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlAverageColumn {
    pub week: String,
    pub cells: Vec<UrlCell>,
}

impl UrlAverageColumn {
    /// Lay `averages` out along `urls`, leaving gaps where a URL has no data.
    pub fn build(week: &WeeklyKey, urls: &[String], averages: &UrlAverages) -> Self {
        let cells = urls
            .iter()
            .map(|url| {
                let url = normalize_url(url);
                let average_position = averages.get(&url).copied();
                UrlCell {
                    url,
                    average_position,
                }
            })
            .collect();
        Self {
            week: week.label(),
            cells,
        }
    }

    pub fn get(&self, url: &str) -> Option<u32> {
        let url = normalize_url(url);
        self.cells
            .iter()
            .find(|cell| cell.url == url)
            .and_then(|cell| cell.average_position)
    }
}
