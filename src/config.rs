// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for weekly rollups.

use crate::trend::{DEFAULT_NEW_POSITION_BASELINE, TrendOptions};
use crate::week::{self, WeekKeyError};
use anyhow::{Context, Result};
use camino::Utf8Path;
use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Only ingest rows for this site.
    pub site: Option<String>,
    /// First day of the week, 0 = Sunday through 6 = Saturday.
    pub week_start_day: u8,
    /// Position assumed for series that are new this week.
    pub new_trend_baseline_position: f64,
    /// Row order of the URL matrix. Empty means every URL seen, sorted.
    pub tracked_urls: Vec<String>,
    pub sheets: SheetNames,
    pub url_matrix: Vec<UrlMatrix>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SheetNames {
    pub ranking: String,
    pub metric_prefix: String,
    pub metric_views: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UrlMatrix {
    pub sheet: String,
    #[serde(default)]
    pub country: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let content = fs::read_to_string(path.as_std_path())
            .with_context(|| format!("failed to read config file at {}", path))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file at {}", path))?;
        config
            .week_start()
            .with_context(|| format!("invalid config file at {}", path))?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Utf8Path) -> Result<Self> {
        if path.as_std_path().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn week_start(&self) -> Result<Weekday, WeekKeyError> {
        week::weekday_from_index(self.week_start_day)
    }

    pub fn trend_options(&self) -> TrendOptions {
        TrendOptions {
            new_position_baseline: self.new_trend_baseline_position,
        }
    }

    /// Sheet name for a single-metric ranking view.
    pub fn metric_sheet(&self, metric: &str) -> String {
        format!("{} - {}", self.sheets.metric_prefix, metric)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site: None,
            week_start_day: 1,
            new_trend_baseline_position: DEFAULT_NEW_POSITION_BASELINE,
            tracked_urls: Vec::new(),
            sheets: SheetNames::default(),
            url_matrix: vec![UrlMatrix {
                sheet: "URL Avg Position".to_string(),
                country: None,
            }],
        }
    }
}

impl Default for SheetNames {
    fn default() -> Self {
        Self {
            ranking: "Weekly Ranking".to_string(),
            metric_prefix: "Ranking".to_string(),
            metric_views: true,
        }
    }
}
