// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Weekly search-performance rollups: aggregation, rankings, trends and URL averages.

pub mod aggregate;
pub mod commands;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod history;
pub mod query;
pub mod ranking;
pub mod records;
pub mod trend;
pub mod upsert;
pub mod url_average;
pub mod week;
