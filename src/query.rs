// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query and export functionality for stored sheets.

use crate::db::SqliteHistoryStore;
use crate::history::{HistoryStore, RankingRow, SectionPayload};
use crate::upsert::TimeSeriesStore;
use crate::url_average::UrlCell;
use crate::week::is_numeric_not_a_week;
use anyhow::{Context, Result};
use camino::Utf8Path;
use serde::Serialize;
use std::{fs::File, io::Write};

pub enum QueryKind {
    Sections { sheet: Option<String> },
    Ranking { sheet: String, week: Option<String>, limit: usize },
    Matrix { sheet: String },
    Pending,
}

pub enum ExportKind {
    Csv { output: String, sheet: String },
    Json { output: String, sheet: String },
}

pub fn run_query(store: &SqliteHistoryStore, query: QueryKind) -> Result<()> {
    match query {
        QueryKind::Sections { sheet } => query_sections(store, sheet.as_deref())?,
        QueryKind::Ranking { sheet, week, limit } => {
            query_ranking(store, &sheet, week.as_deref(), limit)?
        }
        QueryKind::Matrix { sheet } => query_matrix(store, &sheet)?,
        QueryKind::Pending => query_pending(store)?,
    }
    Ok(())
}

pub fn run_export(store: &SqliteHistoryStore, export: ExportKind) -> Result<()> {
    match export {
        ExportKind::Csv { output, sheet } => export_csv(store, Utf8Path::new(&output), &sheet)?,
        ExportKind::Json { output, sheet } => export_json(store, Utf8Path::new(&output), &sheet)?,
    }
    Ok(())
}

fn query_sections(store: &SqliteHistoryStore, sheet: Option<&str>) -> Result<()> {
    let sheets = match sheet {
        Some(sheet) => vec![sheet.to_string()],
        None => store.sheet_names()?,
    };

    for name in sheets {
        println!("\n{}", name);
        println!("{:<4} {:<26} {:<12} {:>6}", "#", "Week", "Kind", "Rows");
        println!("{}", "=".repeat(52));
        for section in store
            .list_sections(&name)?
            .into_iter()
            .filter(|section| !is_numeric_not_a_week(&section.label))
        {
            println!(
                "{:<4} {:<26} {:<12} {:>6}",
                section.position, section.label, section.kind, section.len
            );
        }
    }

    Ok(())
}

fn query_ranking(
    store: &SqliteHistoryStore,
    sheet_name: &str,
    week: Option<&str>,
    limit: usize,
) -> Result<()> {
    let sheet = store.load_sheet(sheet_name)?;
    let section = match week {
        Some(week) => sheet
            .get(week)
            .with_context(|| format!("no week '{}' in sheet '{}'", week, sheet_name))?,
        None => sheet.week_sections()
            .next()
            .with_context(|| format!("sheet '{}' has no weeks", sheet_name))?,
    };
    let SectionPayload::RankingBlock(rows) = section.payload() else {
        anyhow::bail!("sheet '{}' does not hold rankings", sheet_name);
    };

    println!("\n{} ({})", sheet_name, section.label());
    println!(
        "{:>4}  {:<30} {:<40} {:>7} {:>8} {:>6} {:>6}  {}",
        "Rank", "Query", "Page", "Clicks", "Impr", "CTR", "Pos", "Trend"
    );
    println!("{}", "=".repeat(120));
    for row in rows.iter().take(limit) {
        println!(
            "{:>4}  {:<30} {:<40} {:>7} {:>8} {:>5.1}% {:>6.1}  {}",
            row.rank,
            truncate(&row.search_query, 30),
            truncate(&row.page_url, 40),
            row.clicks,
            row.impressions,
            row.ctr,
            row.position,
            row.trend.map(|t| t.as_str()).unwrap_or("-")
        );
    }

    Ok(())
}

fn query_matrix(store: &SqliteHistoryStore, sheet_name: &str) -> Result<()> {
    let matrix = UrlMatrix::from_sheet(&store.load_sheet(sheet_name)?);

    println!("\n{}", sheet_name);
    print!("{:<50}", "URL");
    for week in &matrix.weeks {
        print!(" {:>10}", week.get(..10).unwrap_or(week));
    }
    println!();
    println!("{}", "=".repeat(50 + 11 * matrix.weeks.len()));
    for row in &matrix.rows {
        print!("{:<50}", truncate(&row.url, 50));
        for value in &row.positions {
            match value {
                Some(position) => print!(" {:>10}", position),
                None => print!(" {:>10}", ""),
            }
        }
        println!();
    }

    Ok(())
}

fn query_pending(store: &SqliteHistoryStore) -> Result<()> {
    let pending = store.pending_upserts()?;
    if pending.is_empty() {
        println!("\nNo pending upserts.");
        return Ok(());
    }

    println!("\n{:<28} {:<26} {}", "Sheet", "Week", "Started");
    println!("{}", "=".repeat(80));
    for entry in pending {
        println!(
            "{:<28} {:<26} {}",
            entry.sheet, entry.week_label, entry.updated_at
        );
    }
    Ok(())
}

/// The URL-average matrix: one row per URL, one column per week, newest first.
#[derive(Debug, Serialize, PartialEq)]
pub struct UrlMatrix {
    pub weeks: Vec<String>,
    pub rows: Vec<UrlMatrixRow>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct UrlMatrixRow {
    pub url: String,
    pub positions: Vec<Option<u32>>,
}

impl UrlMatrix {
    pub fn from_sheet(sheet: &TimeSeriesStore<SectionPayload>) -> Self {
        let columns: Vec<(&str, &[UrlCell])> = sheet.week_sections()
            .filter_map(|section| match section.payload() {
                SectionPayload::UrlColumn(column) => Some((section.label(), column.cells.as_slice())),
                SectionPayload::RankingBlock(_) => None,
            })
            .collect();

        let mut urls: Vec<&str> = Vec::new();
        for (_, cells) in &columns {
            for cell in *cells {
                if !urls.contains(&cell.url.as_str()) {
                    urls.push(&cell.url);
                }
            }
        }

        let rows = urls
            .into_iter()
            .map(|url| UrlMatrixRow {
                url: url.to_string(),
                positions: columns
                    .iter()
                    .map(|(_, cells)| {
                        cells
                            .iter()
                            .find(|cell| cell.url == url)
                            .and_then(|cell| cell.average_position)
                    })
                    .collect(),
            })
            .collect();

        Self {
            weeks: columns.iter().map(|(label, _)| label.to_string()).collect(),
            rows,
        }
    }
}

/// All ranking rows of a sheet, newest week first.
fn ranking_rows(sheet: &TimeSeriesStore<SectionPayload>) -> Vec<&RankingRow> {
    sheet.week_sections()
        .filter_map(|section| match section.payload() {
            SectionPayload::RankingBlock(rows) => Some(rows),
            SectionPayload::UrlColumn(_) => None,
        })
        .flatten()
        .collect()
}

fn is_matrix(sheet: &TimeSeriesStore<SectionPayload>) -> bool {
    sheet
        .sections()
        .iter()
        .any(|section| matches!(section.payload(), SectionPayload::UrlColumn(_)))
}

fn export_csv(store: &SqliteHistoryStore, output: &Utf8Path, sheet_name: &str) -> Result<()> {
    let sheet = store.load_sheet(sheet_name)?;
    let file = File::create(output.as_std_path())
        .with_context(|| format!("failed to create file at {}", output))?;
    let mut writer = csv::Writer::from_writer(file);

    if is_matrix(&sheet) {
        let matrix = UrlMatrix::from_sheet(&sheet);
        let mut header = vec!["url".to_string()];
        header.extend(matrix.weeks.iter().cloned());
        writer.write_record(&header)?;
        for row in &matrix.rows {
            let mut record = vec![row.url.clone()];
            record.extend(
                row.positions
                    .iter()
                    .map(|p| p.map(|p| p.to_string()).unwrap_or_default()),
            );
            writer.write_record(&record)?;
        }
    } else {
        for row in ranking_rows(&sheet) {
            writer.serialize(row).context("failed to write CSV record")?;
        }
    }

    writer.flush().context("failed to flush CSV")?;
    println!("Exported {} to {}.", sheet_name, output);
    Ok(())
}

fn export_json(store: &SqliteHistoryStore, output: &Utf8Path, sheet_name: &str) -> Result<()> {
    let sheet = store.load_sheet(sheet_name)?;
    let json = if is_matrix(&sheet) {
        serde_json::to_string_pretty(&UrlMatrix::from_sheet(&sheet))?
    } else {
        serde_json::to_string_pretty(&ranking_rows(&sheet))?
    };

    let mut file = File::create(output.as_std_path())
        .with_context(|| format!("failed to create file at {}", output))?;
    file.write_all(json.as_bytes())?;

    println!("Exported {} to {}.", sheet_name, output);
    Ok(())
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}
