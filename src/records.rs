// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Daily search-performance records and the CSV source they are read from.

use crate::url_average::normalize_url;
use crate::week::{self, DateWindow};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::{fs::File, io::Read};
use thiserror::Error;
use tracing::{debug, info};

/// One day of performance data for a (query, page, country, device) tuple.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub site: String,
    /// Calendar date as read from the source.
    pub date: String,
    pub search_query: String,
    pub page_url: String,
    pub country: String,
    pub device: String,
    pub clicks: u64,
    pub impressions: u64,
    /// Informational only; recomputed from clicks and impressions downstream.
    pub ctr: f64,
    pub average_position: f64,
}

/// Why a source row was rejected.
#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("invalid date '{0}'")]
    InvalidDate(String),
    #[error("non-numeric value '{value}' in column '{field}'")]
    NonNumericMetric { field: &'static str, value: String },
    #[error("missing value for '{0}'")]
    MissingField(&'static str),
}

/// A raw cell value as exported from a spreadsheet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CellContent {
    Plain(String),
    Hyperlink { url: String, label: String },
    FormulaLiteral(String),
}

impl CellContent {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let Some(expr) = trimmed.strip_prefix('=') else {
            return CellContent::Plain(trimmed.to_string());
        };

        let is_hyperlink = expr
            .get(..10)
            .is_some_and(|head| head.eq_ignore_ascii_case("HYPERLINK("));
        if is_hyperlink && expr.ends_with(')') {
            let args = quoted_arguments(&expr[10..expr.len() - 1]);
            if let Some(url) = args.first() {
                let label = args.get(1).unwrap_or(url);
                return CellContent::Hyperlink {
                    url: url.clone(),
                    label: label.clone(),
                };
            }
        }

        CellContent::FormulaLiteral(expr.to_string())
    }

    /// The text the core should see: hyperlinks resolve to their target.
    pub fn text(&self) -> &str {
        match self {
            CellContent::Plain(s) => s,
            CellContent::Hyperlink { url, .. } => url,
            CellContent::FormulaLiteral(expr) => expr,
        }
    }

    /// Numeric value of the cell; `Ok(None)` when blank.
    fn number(&self, field: &'static str) -> Result<Option<f64>, RecordError> {
        let non_numeric = || RecordError::NonNumericMetric {
            field,
            value: self.text().to_string(),
        };
        match self {
            CellContent::Plain(s) if s.is_empty() => Ok(None),
            CellContent::Plain(s) => {
                let cleaned: String = s.chars().filter(|c| *c != ',' && *c != '%').collect();
                match cleaned.trim().parse::<f64>() {
                    Ok(n) if n.is_finite() && n >= 0.0 => Ok(Some(n)),
                    _ => Err(non_numeric()),
                }
            }
            _ => Err(non_numeric()),
        }
    }
}

fn quoted_arguments(args: &str) -> Vec<String> {
    args.split('"')
        .enumerate()
        .filter(|(i, _)| i % 2 == 1)
        .map(|(_, s)| s.to_string())
        .collect()
}

/// Result of one read: accepted records plus how many rows were rejected.
#[derive(Debug, Default)]
pub struct DailyRead {
    pub records: Vec<DailyRecord>,
    /// Rows rejected as malformed.
    pub skipped: usize,
    /// Well-formed rows outside the window or belonging to another site.
    pub filtered: usize,
}

/// Where daily records come from.
pub trait DataSource {
    fn read_daily_records(&self, window: Option<&DateWindow>) -> Result<DailyRead>;
}

/// Reads a search-analytics CSV export with a header row.
pub struct CsvDataSource {
    path: Utf8PathBuf,
    site: Option<String>,
}

impl CsvDataSource {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            site: None,
        }
    }

    /// Only accept rows belonging to `site`.
    pub fn with_site(mut self, site: Option<String>) -> Self {
        self.site = site;
        self
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl DataSource for CsvDataSource {
    fn read_daily_records(&self, window: Option<&DateWindow>) -> Result<DailyRead> {
        let file = File::open(self.path.as_std_path())
            .with_context(|| format!("failed to open input file at {}", self.path))?;
        let read = read_records(file, window, self.site.as_deref())
            .with_context(|| format!("failed to read daily records from {}", self.path))?;

        info!(
            path = %self.path,
            records = read.records.len(),
            skipped = read.skipped,
            filtered = read.filtered,
            "read daily records"
        );
        Ok(read)
    }
}

struct Columns {
    site: Option<usize>,
    date: usize,
    query: Option<usize>,
    page: usize,
    country: Option<usize>,
    device: Option<usize>,
    clicks: Option<usize>,
    impressions: Option<usize>,
    ctr: Option<usize>,
    position: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self> {
        let find = |names: &[&str]| {
            headers.iter().position(|h| {
                let h = h.trim().to_ascii_lowercase().replace([' ', '-'], "_");
                names.contains(&h.as_str())
            })
        };

        Ok(Self {
            site: find(&["site", "site_url"]),
            date: find(&["date", "day"]).context("input has no 'date' column")?,
            query: find(&["query", "search_query", "searchquery"]),
            page: find(&["page", "page_url", "pageurl", "url"]).context("input has no 'page' column")?,
            country: find(&["country"]),
            device: find(&["device"]),
            clicks: find(&["clicks"]),
            impressions: find(&["impressions"]),
            ctr: find(&["ctr"]),
            position: find(&["position", "average_position", "averageposition", "avg_position"]),
        })
    }
}

/// Parse daily records out of CSV data.
pub fn read_records<R: Read>(
    reader: R,
    window: Option<&DateWindow>,
    site: Option<&str>,
) -> Result<DailyRead> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let columns = Columns::from_headers(reader.headers().context("failed to read CSV header")?)?;
    let site = site.map(normalize_url);

    let mut read = DailyRead::default();
    for (line, row) in reader.records().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                debug!(line = line + 2, %err, "skipping unreadable row");
                read.skipped += 1;
                continue;
            }
        };

        let record = match parse_row(&row, &columns) {
            Ok(record) => record,
            Err(err) => {
                debug!(line = line + 2, %err, "skipping malformed row");
                read.skipped += 1;
                continue;
            }
        };

        let in_window = match (window, week::parse_calendar_date(&record.date)) {
            (Some(window), Some(date)) => window.contains(date),
            _ => true,
        };
        let on_site = match &site {
            Some(site) => normalize_url(&record.site) == *site,
            None => true,
        };
        if in_window && on_site {
            read.records.push(record);
        } else {
            read.filtered += 1;
        }
    }

    Ok(read)
}

fn parse_row(row: &csv::StringRecord, columns: &Columns) -> Result<DailyRecord, RecordError> {
    let cell = |index: Option<usize>| {
        CellContent::parse(index.and_then(|i| row.get(i)).unwrap_or_default())
    };
    let text = |index: Option<usize>| cell(index).text().to_string();

    let date = text(Some(columns.date));
    if week::parse_calendar_date(&date).is_none() {
        return Err(RecordError::InvalidDate(date));
    }

    let page_url = text(Some(columns.page));
    if page_url.is_empty() {
        return Err(RecordError::MissingField("page"));
    }

    let clicks = cell(columns.clicks).number("clicks")?.unwrap_or(0.0);
    let impressions = cell(columns.impressions).number("impressions")?.unwrap_or(0.0);

    Ok(DailyRecord {
        site: text(columns.site),
        date,
        search_query: text(columns.query),
        page_url,
        country: text(columns.country),
        device: text(columns.device),
        clicks: clicks.round() as u64,
        impressions: impressions.round() as u64,
        ctr: cell(columns.ctr).number("ctr")?.unwrap_or(0.0),
        average_position: cell(columns.position).number("position")?.unwrap_or(0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const SAMPLE: &str = "\
site,date,query,page,country,device,clicks,impressions,ctr,position
https://example.com/,2025-10-06,q1,https://example.com/a,usa,DESKTOP,2,20,10%,5.0
https://example.com/,2025-10-07,q1,\"=HYPERLINK(\"\"https://example.com/a\"\",\"\"A\"\")\",usa,DESKTOP,4,30,13.3%,3.0
https://example.com/,2025-10-32,q2,https://example.com/b,usa,MOBILE,1,10,10%,7.0
https://example.com/,2025-10-08,q3,https://example.com/c,usa,MOBILE,lots,10,10%,7.0
https://example.com/,2025-10-08,q4,https://example.com/d,usa,MOBILE,,,,
https://other.org/,2025-10-08,q5,https://other.org/e,usa,MOBILE,1,1,100%,1.0
https://example.com/,2025-09-30,q6,https://example.com/f,usa,MOBILE,1,1,100%,1.0
";

    #[test]
    fn test_cell_content_parse() {
        assert_eq!(
            CellContent::parse("  /plain  "),
            CellContent::Plain("/plain".to_string())
        );
        assert_eq!(
            CellContent::parse("=HYPERLINK(\"https://x.test/a\",\"A page\")"),
            CellContent::Hyperlink {
                url: "https://x.test/a".to_string(),
                label: "A page".to_string()
            }
        );
        assert_eq!(
            CellContent::parse("=hyperlink(\"https://x.test/a\")").text(),
            "https://x.test/a"
        );
        assert_eq!(
            CellContent::parse("=SUM(A1:A3)"),
            CellContent::FormulaLiteral("SUM(A1:A3)".to_string())
        );
    }

    #[test]
    fn test_cell_numbers() {
        assert_eq!(CellContent::parse("1,234").number("clicks"), Ok(Some(1234.0)));
        assert_eq!(CellContent::parse("12.5%").number("ctr"), Ok(Some(12.5)));
        assert_eq!(CellContent::parse("").number("clicks"), Ok(None));
        assert!(CellContent::parse("=A1*2").number("clicks").is_err());
        assert!(CellContent::parse("-3").number("clicks").is_err());
    }

    #[test]
    fn test_read_records_skips_malformed_rows() {
        let read = read_records(SAMPLE.as_bytes(), None, None).unwrap();

        // Bad date and non-numeric clicks are skipped; blanks become zero.
        assert_eq!(read.skipped, 2);
        assert_eq!(read.filtered, 0);
        assert_eq!(read.records.len(), 5);

        let hyperlinked = &read.records[1];
        assert_eq!(hyperlinked.page_url, "https://example.com/a");
        assert_eq!(hyperlinked.clicks, 4);

        let blank = read.records.iter().find(|r| r.search_query == "q4").unwrap();
        assert_eq!(blank.clicks, 0);
        assert_eq!(blank.impressions, 0);
        assert_eq!(blank.average_position, 0.0);
    }

    #[test]
    fn test_read_records_window_and_site() {
        let window = DateWindow::new(
            NaiveDate::from_ymd_opt(2025, 10, 6).unwrap(),
            NaiveDate::from_ymd_opt(2025, 10, 12).unwrap(),
        );
        let read = read_records(SAMPLE.as_bytes(), Some(&window), Some("https://example.com")).unwrap();

        let queries: Vec<_> = read.records.iter().map(|r| r.search_query.as_str()).collect();
        assert_eq!(queries, vec!["q1", "q1", "q4"]);
        assert_eq!(read.filtered, 2);
    }

    #[test]
    fn test_read_records_requires_date_and_page() {
        let err = read_records("query,clicks\nq,1\n".as_bytes(), None, None).unwrap_err();
        assert!(err.to_string().contains("date"));
    }
}
