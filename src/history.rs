// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persisted section payloads and the history store contract.

use crate::aggregate::GroupKey;
use crate::ranking::{RankMetric, RankingEntry};
use crate::trend::{PreviousRow, PriorSnapshot, Trend, TrendDelta};
use crate::upsert::{TimeSeriesStore, UpsertOutcome};
use crate::url_average::UrlAverageColumn;
use crate::week::WeeklyKey;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row of a persisted ranking block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingRow {
    pub week: String,
    pub country: String,
    pub device: String,
    pub search_query: String,
    pub page_url: String,
    pub clicks: u64,
    pub impressions: u64,
    pub ctr: f64,
    pub position: f64,
    pub rank: u32,
    #[serde(default)]
    pub trend: Option<Trend>,
    #[serde(default)]
    pub clicks_change: Option<i64>,
    #[serde(default)]
    pub impressions_change: Option<i64>,
    #[serde(default)]
    pub ctr_change: Option<f64>,
    #[serde(default)]
    pub position_change: Option<f64>,
    #[serde(default = "default_metric")]
    pub metric: RankMetric,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranking_reason: Option<String>,
}

fn default_metric() -> RankMetric {
    RankMetric::Unified
}

impl RankingRow {
    /// A row for a single-metric view, without trend columns.
    pub fn from_entry(entry: &RankingEntry) -> Self {
        let aggregate = &entry.aggregate;
        Self {
            week: aggregate.week.label(),
            country: aggregate.key.country.clone(),
            device: aggregate.key.device.clone(),
            search_query: aggregate.key.search_query.clone(),
            page_url: aggregate.key.page_url.clone(),
            clicks: aggregate.clicks,
            impressions: aggregate.impressions,
            ctr: aggregate.ctr,
            position: aggregate.position,
            rank: entry.rank,
            trend: None,
            clicks_change: None,
            impressions_change: None,
            ctr_change: None,
            position_change: None,
            metric: entry.metric,
            reference_score: Some(entry.reference_score),
            ranking_reason: entry.ranking_reason.clone(),
        }
    }

    pub fn from_delta(delta: &TrendDelta) -> Self {
        Self {
            trend: Some(delta.trend),
            clicks_change: Some(delta.clicks_change),
            impressions_change: Some(delta.impressions_change),
            ctr_change: Some(delta.ctr_change),
            position_change: Some(delta.position_change),
            ..Self::from_entry(&delta.entry)
        }
    }

    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            search_query: self.search_query.clone(),
            page_url: self.page_url.clone(),
            country: self.country.clone(),
            device: self.device.clone(),
        }
    }

    /// This row as last week's baseline for trend computation.
    pub fn to_previous(&self) -> PreviousRow {
        PreviousRow {
            key: self.group_key(),
            snapshot: PriorSnapshot {
                clicks: self.clicks,
                impressions: self.impressions,
                ctr: self.ctr,
                position: self.position,
                rank: Some(self.rank),
            },
        }
    }
}

/// The data held by one section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum SectionPayload {
    RankingBlock(Vec<RankingRow>),
    UrlColumn(UrlAverageColumn),
}

impl SectionPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            SectionPayload::RankingBlock(_) => "ranking",
            SectionPayload::UrlColumn(_) => "url column",
        }
    }

    /// Rows for a ranking block, cells for a URL column.
    pub fn len(&self) -> usize {
        match self {
            SectionPayload::RankingBlock(rows) => rows.len(),
            SectionPayload::UrlColumn(column) => column.cells.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Position, label and size of one stored section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SectionSummary {
    pub position: usize,
    pub label: String,
    pub kind: &'static str,
    pub len: usize,
}

/// Persisted week sections, grouped into named sheets.
pub trait HistoryStore {
    /// The ranking rows stored for `week` in `sheet`; empty when absent.
    fn read_previous_week(&self, sheet: &str, week: &WeeklyKey) -> Result<Vec<RankingRow>> {
        let store = self.load_sheet(sheet)?;
        Ok(match store.get(&week.label()).map(|s| s.payload()) {
            Some(SectionPayload::RankingBlock(rows)) => rows.clone(),
            _ => Vec::new(),
        })
    }

    /// Insert or replace the section for `label` in `sheet`.
    fn upsert_section(
        &mut self,
        sheet: &str,
        label: &str,
        payload: &SectionPayload,
    ) -> Result<UpsertOutcome>;

    /// A summary of every section in `sheet`, newest first.
    fn list_sections(&self, sheet: &str) -> Result<Vec<SectionSummary>> {
        let store = self.load_sheet(sheet)?;
        Ok(store
            .sections()
            .iter()
            .enumerate()
            .map(|(position, section)| SectionSummary {
                position,
                label: section.label().to_string(),
                kind: section.payload().kind(),
                len: section.payload().len(),
            })
            .collect())
    }

    /// All sections of `sheet`, newest first.
    fn load_sheet(&self, sheet: &str) -> Result<TimeSeriesStore<SectionPayload>>;
}

/// A history store that lives only for the current process.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    sheets: BTreeMap<String, TimeSeriesStore<SectionPayload>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheet_names(&self) -> impl Iterator<Item = &str> {
        self.sheets.keys().map(String::as_str)
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn upsert_section(
        &mut self,
        sheet: &str,
        label: &str,
        payload: &SectionPayload,
    ) -> Result<UpsertOutcome> {
        let store = self.sheets.entry(sheet.to_string()).or_default();
        Ok(store.upsert(label, payload.clone())?)
    }

    fn load_sheet(&self, sheet: &str) -> Result<TimeSeriesStore<SectionPayload>> {
        Ok(self.sheets.get(sheet).cloned().unwrap_or_default())
    }
}
