// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing and command dispatch.

use crate::commands::{self, WindowChoice};
use crate::week::DateWindow;
use crate::{config, db, query};
use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use chrono::{NaiveDate, Utc};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the SQLite database file
    #[arg(short, long, default_value = "search-rollup.db", global = true)]
    database: Utf8PathBuf,

    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: Utf8PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Parser, Debug)]
enum Command {
    /// Aggregate daily records into weekly rankings and URL averages
    Rollup {
        /// CSV export of daily search performance rows
        #[arg(short, long)]
        input: Utf8PathBuf,

        /// First day to include (YYYY-MM-DD)
        #[arg(long, requires = "to", conflicts_with = "all")]
        from: Option<NaiveDate>,

        /// Last day to include (YYYY-MM-DD)
        #[arg(long, requires = "from", conflicts_with = "all")]
        to: Option<NaiveDate>,

        /// Include every record regardless of date
        #[arg(long)]
        all: bool,

        /// Reference date for the default window (default: today)
        #[arg(long)]
        today: Option<NaiveDate>,
    },

    /// Query stored sheets
    Query {
        #[command(subcommand)]
        query_type: QueryType,
    },

    /// Export a sheet to various formats
    Export {
        #[command(subcommand)]
        export_type: ExportType,
    },
}

#[derive(Parser, Debug)]
enum QueryType {
    /// List the week sections of a sheet, newest first
    Sections {
        /// Sheet to list (default: all sheets)
        #[arg(short, long)]
        sheet: Option<String>,
    },

    /// Show the ranking block for a week
    Ranking {
        /// Sheet to read (default: the unified ranking sheet)
        #[arg(short, long)]
        sheet: Option<String>,

        /// Week label (default: the latest week)
        #[arg(short, long)]
        week: Option<String>,

        /// Number of rows to show (default: 20)
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Show a URL average position matrix
    Matrix {
        /// Sheet to read (default: the first configured matrix)
        #[arg(short, long)]
        sheet: Option<String>,
    },

    /// Show upserts that started but never committed
    Pending,
}

#[derive(Parser, Debug)]
enum ExportType {
    /// Export to CSV format
    Csv {
        /// Output file path
        #[arg(short, long)]
        output: Utf8PathBuf,

        /// Sheet to export (default: the unified ranking sheet)
        #[arg(short, long)]
        sheet: Option<String>,
    },

    /// Export to JSON format
    Json {
        /// Output file path
        #[arg(short, long)]
        output: Utf8PathBuf,

        /// Sheet to export (default: the unified ranking sheet)
        #[arg(short, long)]
        sheet: Option<String>,
    },
}

/// Parse arguments and dispatch to the appropriate command.
pub fn dispatch() -> Result<()> {
    let args = Args::parse();
    let config = config::Config::load_or_default(&args.config)
        .context("failed to load configuration")?;

    match args.command {
        Command::Rollup {
            input,
            from,
            to,
            all,
            today,
        } => {
            let window = match (from, to) {
                (Some(from), Some(to)) => WindowChoice::Explicit(DateWindow::new(from, to)),
                _ if all => WindowChoice::All,
                _ => WindowChoice::PreviousWeek {
                    today: today.unwrap_or_else(|| Utc::now().date_naive()),
                },
            };
            commands::run_rollup(&args.database, &config, &input, window)?;
        }
        Command::Query { query_type } => {
            let store =
                db::SqliteHistoryStore::open(&args.database).context("failed to open database")?;
            let query_kind = match query_type {
                QueryType::Sections { sheet } => query::QueryKind::Sections { sheet },
                QueryType::Ranking { sheet, week, limit } => query::QueryKind::Ranking {
                    sheet: sheet.unwrap_or_else(|| config.sheets.ranking.clone()),
                    week,
                    limit,
                },
                QueryType::Matrix { sheet } => query::QueryKind::Matrix {
                    sheet: match sheet {
                        Some(sheet) => sheet,
                        None => default_matrix_sheet(&config)?,
                    },
                },
                QueryType::Pending => query::QueryKind::Pending,
            };
            query::run_query(&store, query_kind)?;
        }
        Command::Export { export_type } => {
            let store =
                db::SqliteHistoryStore::open(&args.database).context("failed to open database")?;
            let export_kind = match export_type {
                ExportType::Csv { output, sheet } => query::ExportKind::Csv {
                    output: output.to_string(),
                    sheet: sheet.unwrap_or_else(|| config.sheets.ranking.clone()),
                },
                ExportType::Json { output, sheet } => query::ExportKind::Json {
                    output: output.to_string(),
                    sheet: sheet.unwrap_or_else(|| config.sheets.ranking.clone()),
                },
            };
            query::run_export(&store, export_kind)?;
        }
    }

    Ok(())
}

fn default_matrix_sheet(config: &config::Config) -> Result<String> {
    config
        .url_matrix
        .first()
        .map(|matrix| matrix.sheet.clone())
        .context("no URL matrix sheet configured; pass --sheet")
}
