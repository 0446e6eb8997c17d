// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command implementations.

use crate::aggregate::{self, WeeklyAggregate};
use crate::config::{Config, UrlMatrix};
use crate::db::SqliteHistoryStore;
use crate::history::{HistoryStore, RankingRow, SectionPayload};
use crate::ranking::{self, WeekRanking};
use crate::records::{CsvDataSource, DailyRecord, DataSource};
use crate::trend::{self, PreviousRow};
use crate::upsert::{UpsertError, UpsertOutcome};
use crate::url_average::{self, UrlAverageColumn, UrlAverages};
use crate::week::{DateWindow, WeeklyKey};
use anyhow::{Context, Result};
use camino::Utf8Path;
use chrono::{NaiveDate, Weekday};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Which daily records a rollup reads.
#[derive(Clone, Copy, Debug)]
pub enum WindowChoice {
    /// The full calendar week before the one containing `today`.
    PreviousWeek { today: NaiveDate },
    Explicit(DateWindow),
    All,
}

impl WindowChoice {
    pub fn resolve(self, week_start: Weekday) -> Option<DateWindow> {
        match self {
            WindowChoice::PreviousWeek { today } => {
                Some(DateWindow::previous_calendar_week(today, week_start))
            }
            WindowChoice::Explicit(window) => Some(window),
            WindowChoice::All => None,
        }
    }
}

/// What happened to one section during a rollup.
#[derive(Debug, Clone)]
pub struct SectionReport {
    pub sheet: String,
    pub week: String,
    pub rows: usize,
    /// `None` when the store rejected the write and the section was skipped.
    pub outcome: Option<UpsertOutcome>,
}

#[derive(Debug, Default)]
pub struct RollupSummary {
    pub records: usize,
    pub skipped_records: usize,
    pub filtered_records: usize,
    pub weeks: Vec<WeeklyKey>,
    pub sections: Vec<SectionReport>,
}

/// Run the rollup command against the SQLite workbook.
pub fn run_rollup(
    database: &Utf8Path,
    config: &Config,
    input: &Utf8Path,
    window: WindowChoice,
) -> Result<()> {
    info!(%database, "opening history store");
    let mut store = SqliteHistoryStore::open(database).context("failed to open history store")?;
    let source = CsvDataSource::new(input).with_site(config.site.clone());

    let week_start = config.week_start()?;
    let window = window.resolve(week_start);
    if let Some(window) = &window {
        info!(start = %window.start, end = %window.end, "reading records in window");
    }

    let summary = rollup(&mut store, &source, config, window.as_ref())?;

    println!(
        "\nRead {} records ({} skipped as malformed, {} outside window or site)",
        summary.records, summary.skipped_records, summary.filtered_records
    );
    println!("\n{:<28} {:<25} {:>6}  {}", "Sheet", "Week", "Rows", "Result");
    println!("{}", "=".repeat(80));
    for section in &summary.sections {
        let result = match &section.outcome {
            Some(outcome) => outcome.to_string(),
            None => "skipped".to_string(),
        };
        println!(
            "{:<28} {:<25} {:>6}  {}",
            section.sheet, section.week, section.rows, result
        );
    }

    println!("\nRollup complete.");
    Ok(())
}

/// Aggregate, rank, trend and persist one batch of daily records.
pub fn rollup<S: HistoryStore, D: DataSource>(
    store: &mut S,
    source: &D,
    config: &Config,
    window: Option<&DateWindow>,
) -> Result<RollupSummary> {
    let week_start = config.week_start()?;
    let read = source
        .read_daily_records(window)
        .context("failed to read daily records")?;

    let aggregation = aggregate::aggregate_weekly(&read.records, week_start);
    if aggregation.skipped > 0 {
        warn!(skipped = aggregation.skipped, "records with unresolvable dates were skipped");
    }

    let rankings = ranking::rank_weeks(&aggregation.aggregates, config.sheets.metric_views);
    info!(
        records = read.records.len(),
        aggregates = aggregation.aggregates.len(),
        weeks = rankings.len(),
        "aggregated daily records"
    );

    let mut summary = RollupSummary {
        records: read.records.len(),
        skipped_records: read.skipped + aggregation.skipped,
        filtered_records: read.filtered,
        weeks: rankings.iter().map(|r| r.week).collect(),
        sections: Vec::new(),
    };

    // Oldest first, so each week finds the one before it already stored.
    for week_ranking in &rankings {
        write_rankings(store, config, week_ranking, &mut summary.sections)?;
    }

    let batch = Batch {
        aggregates: &aggregation.aggregates,
        records: &read.records,
        week_start,
    };
    for matrix in &config.url_matrix {
        write_url_matrix(store, config, matrix, &batch, &summary.weeks, &mut summary.sections)?;
    }

    Ok(summary)
}

fn write_rankings<S: HistoryStore>(
    store: &mut S,
    config: &Config,
    week_ranking: &WeekRanking,
    reports: &mut Vec<SectionReport>,
) -> Result<()> {
    let sheet = config.sheets.ranking.as_str();
    let previous_week = week_ranking.week.previous();
    let previous: Vec<PreviousRow> = match store.read_previous_week(sheet, &previous_week) {
        Ok(rows) => rows.iter().map(RankingRow::to_previous).collect(),
        Err(err) => {
            warn!(sheet, week = %previous_week, "failed to read previous week, treating all rows as new: {err:#}");
            Vec::new()
        }
    };

    let deltas = trend::compute_trends(&week_ranking.unified, &previous, config.trend_options());
    let rows: Vec<RankingRow> = deltas.iter().map(RankingRow::from_delta).collect();
    let label = week_ranking.week.label();
    let count = rows.len();
    write_section(
        store,
        sheet,
        &label,
        SectionPayload::RankingBlock(rows),
        count,
        reports,
    )?;

    for (metric, entries) in &week_ranking.by_metric {
        let rows: Vec<RankingRow> = entries.iter().map(RankingRow::from_entry).collect();
        let count = rows.len();
        write_section(
            store,
            &config.metric_sheet(metric.as_str()),
            &label,
            SectionPayload::RankingBlock(rows),
            count,
            reports,
        )?;
    }

    Ok(())
}

/// The daily records of one rollup and their weekly aggregates.
struct Batch<'a> {
    aggregates: &'a [WeeklyAggregate],
    records: &'a [DailyRecord],
    week_start: Weekday,
}

impl Batch<'_> {
    fn url_averages(&self, week: &WeeklyKey, country: Option<&str>) -> UrlAverages {
        let weekly = url_average::url_averages(self.aggregates, week, country);
        let daily = url_average::url_averages_from_daily(self.records, week, country, self.week_start);
        url_average::reconcile(weekly, &daily)
    }
}

/// Write one URL-average column per week, all sharing one row order.
fn write_url_matrix<S: HistoryStore>(
    store: &mut S,
    config: &Config,
    matrix: &UrlMatrix,
    batch: &Batch<'_>,
    weeks: &[WeeklyKey],
    reports: &mut Vec<SectionReport>,
) -> Result<()> {
    let country = matrix.country.as_deref();
    let averages: Vec<UrlAverages> = weeks
        .iter()
        .map(|week| batch.url_averages(week, country))
        .collect();
    let urls = matrix_urls(&*store, config, &matrix.sheet, &averages);

    for (week, averages) in weeks.iter().zip(&averages) {
        let column = UrlAverageColumn::build(week, &urls, averages);
        let rows = column.cells.len();
        write_section(
            store,
            &matrix.sheet,
            &week.label(),
            SectionPayload::UrlColumn(column),
            rows,
            reports,
        )?;
    }
    Ok(())
}

/// Row order of a URL matrix: the configured URLs, or every URL in the
/// batch and in the sheet's week columns, sorted.
fn matrix_urls<S: HistoryStore>(
    store: &S,
    config: &Config,
    sheet: &str,
    averages: &[UrlAverages],
) -> Vec<String> {
    if !config.tracked_urls.is_empty() {
        return config.tracked_urls.clone();
    }

    let mut urls: BTreeSet<String> = averages
        .iter()
        .flat_map(|averages| averages.keys().cloned())
        .collect();
    match store.load_sheet(sheet) {
        Ok(existing) => {
            for section in existing.week_sections() {
                if let SectionPayload::UrlColumn(column) = section.payload() {
                    urls.extend(column.cells.iter().map(|cell| cell.url.clone()));
                }
            }
        }
        Err(err) => warn!(sheet, "failed to read existing URL rows: {err:#}"),
    }
    urls.into_iter().collect()
}

/// Upsert one section. Store failures skip the section; merge conflicts abort.
fn write_section<S: HistoryStore>(
    store: &mut S,
    sheet: &str,
    label: &str,
    payload: SectionPayload,
    rows: usize,
    reports: &mut Vec<SectionReport>,
) -> Result<()> {
    let outcome = match store.upsert_section(sheet, label, &payload) {
        Ok(outcome) => {
            info!(sheet, week = label, rows, %outcome, "wrote section");
            Some(outcome)
        }
        Err(err) if err.chain().any(|cause| cause.is::<UpsertError>()) => {
            return Err(err.context(format!("refusing to write '{}' to sheet '{}'", label, sheet)));
        }
        Err(err) => {
            warn!(sheet, week = label, "skipping section: {err:#}");
            None
        }
    };

    reports.push(SectionReport {
        sheet: sheet.to_string(),
        week: label.to_string(),
        rows,
        outcome,
    });
    Ok(())
}
