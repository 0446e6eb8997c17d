// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Newest-first, week-labeled section store with idempotent upserts.
//!
//! Each section carries one week's payload. Sections are unique under
//! [`identity_key`], so a week written as `2025/10/06 - 2025/10/12` and later as
//! `2025-10-6_2025-10-12` lands in the same section. Ordering is newest first by
//! parsed start date, except for back-filled weeks older than the newest one,
//! which are appended at the tail, and labels that do not parse at all, which
//! are always appended at the tail and never take part in recency comparisons.

use crate::week::{identity_key, is_numeric_not_a_week, range_for_key};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UpsertError {
    #[error("week '{identity}' is stored in more than one section (positions {positions:?})")]
    MergeConflict {
        identity: String,
        positions: Vec<usize>,
    },
}

/// What an upsert did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// An existing section for the same week was overwritten.
    Replaced { position: usize },
    /// A new most-recent week was inserted before every other section.
    InsertedFront,
    /// A historical or unparseable week was appended after every other section.
    AppendedBackfill { position: usize },
}

impl fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpsertOutcome::Replaced { position } => write!(f, "replaced at position {position}"),
            UpsertOutcome::InsertedFront => f.write_str("inserted as newest"),
            UpsertOutcome::AppendedBackfill { position } => {
                write!(f, "appended as back-fill at position {position}")
            }
        }
    }
}

/// One week's worth of data.
#[derive(Clone, Debug, PartialEq)]
pub struct Section<P> {
    label: String,
    identity: String,
    start: Option<NaiveDate>,
    payload: P,
}

impl<P> Section<P> {
    pub fn new(label: impl Into<String>, payload: P) -> Self {
        let label = label.into();
        Self {
            identity: identity_key(&label),
            start: range_for_key(&label).map(|range| range.start),
            label,
            payload,
        }
    }

    /// The label as it was written.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Parsed start date; `None` when the label is not a recognizable week.
    pub fn start(&self) -> Option<NaiveDate> {
        self.start
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }
}

/// Ordered sections plus an index from identity to position.
#[derive(Clone, Debug)]
pub struct TimeSeriesStore<P> {
    sections: Vec<Section<P>>,
    index: HashMap<String, usize>,
}

impl<P> Default for TimeSeriesStore<P> {
    fn default() -> Self {
        Self {
            sections: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<P> TimeSeriesStore<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt sections in their stored order.
    ///
    /// Fails with [`UpsertError::MergeConflict`] if two of them name the same week.
    pub fn from_sections(sections: Vec<Section<P>>) -> Result<Self, UpsertError> {
        let mut store = Self {
            sections,
            index: HashMap::new(),
        };
        store.rebuild_index()?;
        Ok(store)
    }

    /// Insert `payload` for the week named by `label`, or replace that week's data.
    pub fn upsert(&mut self, label: &str, payload: P) -> Result<UpsertOutcome, UpsertError> {
        let section = Section::new(label, payload);

        if let Some(&position) = self.index.get(&section.identity) {
            self.sections[position] = section;
            return Ok(UpsertOutcome::Replaced { position });
        }

        let is_newest = match (section.start, self.latest_start()) {
            (Some(start), Some(latest)) => start >= latest,
            (Some(_), None) => true,
            (None, _) => false,
        };

        if !is_newest {
            let position = self.sections.len();
            self.index.insert(section.identity.clone(), position);
            self.sections.push(section);
            return Ok(UpsertOutcome::AppendedBackfill { position });
        }

        // Last look over the full list before growing it.
        if let Some(position) = self
            .sections
            .iter()
            .position(|existing| existing.identity == section.identity)
        {
            self.sections[position] = section;
            self.rebuild_index()?;
            return Ok(UpsertOutcome::Replaced { position });
        }

        self.sections.insert(0, section);
        self.rebuild_index()?;
        Ok(UpsertOutcome::InsertedFront)
    }

    /// Sections, newest first.
    pub fn sections(&self) -> &[Section<P>] {
        &self.sections
    }

    /// Sections whose label is a week rather than a bare number, newest first.
    pub fn week_sections(&self) -> impl Iterator<Item = &Section<P>> {
        self.sections
            .iter()
            .filter(|section| !is_numeric_not_a_week(section.label()))
    }

    pub fn into_sections(self) -> Vec<Section<P>> {
        self.sections
    }

    /// The section for the week named by `label`, in any textual form.
    pub fn get(&self, label: &str) -> Option<&Section<P>> {
        self.position_of(label).map(|position| &self.sections[position])
    }

    pub fn position_of(&self, label: &str) -> Option<usize> {
        self.index.get(&identity_key(label)).copied()
    }

    /// Start of the most recent parseable week.
    pub fn latest_start(&self) -> Option<NaiveDate> {
        self.sections.iter().filter_map(|s| s.start).max()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    fn rebuild_index(&mut self) -> Result<(), UpsertError> {
        let mut index: HashMap<String, usize> = HashMap::with_capacity(self.sections.len());
        for (position, section) in self.sections.iter().enumerate() {
            if let Some(&first) = index.get(&section.identity) {
                return Err(UpsertError::MergeConflict {
                    identity: section.identity.clone(),
                    positions: vec![first, position],
                });
            }
            index.insert(section.identity.clone(), position);
        }
        self.index = index;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels<P>(store: &TimeSeriesStore<P>) -> Vec<&str> {
        store.sections().iter().map(|s| s.label()).collect()
    }

    #[test]
    fn test_replace_under_label_drift() {
        let mut store = TimeSeriesStore::new();
        assert_eq!(
            store.upsert("2025/10/06 - 2025/10/12", 1).unwrap(),
            UpsertOutcome::InsertedFront
        );
        assert_eq!(
            store.upsert("2025-10-6_2025-10-12", 2).unwrap(),
            UpsertOutcome::Replaced { position: 0 }
        );

        assert_eq!(store.len(), 1);
        assert_eq!(*store.get("2025/10/06").unwrap().payload(), 2);
    }

    #[test]
    fn test_newest_first_ordering() {
        let weeks = [
            "2025/09/22 - 2025/09/28",
            "2025/09/29 - 2025/10/05",
            "2025/10/06 - 2025/10/12",
            "2025/10/13 - 2025/10/19",
        ];

        let mut store = TimeSeriesStore::new();
        for (i, week) in weeks.iter().enumerate() {
            assert_eq!(store.upsert(week, i).unwrap(), UpsertOutcome::InsertedFront);
        }

        let mut expected: Vec<&str> = weeks.to_vec();
        expected.reverse();
        assert_eq!(labels(&store), expected);
        assert_eq!(store.position_of("2025-09-22 - 2025-09-28"), Some(3));
    }

    #[test]
    fn test_backfill_goes_to_tail() {
        let mut store = TimeSeriesStore::new();
        store.upsert("2025/10/13 - 2025/10/19", "latest").unwrap();
        store.upsert("2025/10/06 - 2025/10/12", "older").unwrap();
        let outcome = store.upsert("2025/09/29 - 2025/10/05", "oldest").unwrap();

        assert_eq!(outcome, UpsertOutcome::AppendedBackfill { position: 2 });
        assert_eq!(
            labels(&store),
            vec![
                "2025/10/13 - 2025/10/19",
                "2025/10/06 - 2025/10/12",
                "2025/09/29 - 2025/10/05"
            ]
        );

        // Replacing a back-filled week keeps its slot.
        assert_eq!(
            store.upsert("2025/10/06 - 2025/10/12", "older v2").unwrap(),
            UpsertOutcome::Replaced { position: 1 }
        );
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_unparseable_labels_append_and_never_count_as_newest() {
        let mut store = TimeSeriesStore::new();
        assert_eq!(
            store.upsert("Week ???", 0).unwrap(),
            UpsertOutcome::AppendedBackfill { position: 0 }
        );
        assert_eq!(
            store.upsert("2025/10/06 - 2025/10/12", 1).unwrap(),
            UpsertOutcome::InsertedFront
        );
        assert_eq!(
            store.upsert("another label", 2).unwrap(),
            UpsertOutcome::AppendedBackfill { position: 2 }
        );
        assert_eq!(
            store.upsert("WEEK ???", 3).unwrap(),
            UpsertOutcome::Replaced { position: 1 }
        );
        assert_eq!(store.latest_start(), chrono::NaiveDate::from_ymd_opt(2025, 10, 6));
        assert_eq!(
            labels(&store),
            vec!["2025/10/06 - 2025/10/12", "WEEK ???", "another label"]
        );
    }

    #[test]
    fn test_week_sections_skip_numeric_labels() {
        let mut store = TimeSeriesStore::new();
        store.upsert("45678", 0).unwrap();
        store.upsert("2025/10/06 - 2025/10/12", 1).unwrap();
        store.upsert("12.5", 2).unwrap();

        assert_eq!(store.len(), 3);
        let weeks: Vec<&str> = store.week_sections().map(|s| s.label()).collect();
        assert_eq!(weeks, vec!["2025/10/06 - 2025/10/12"]);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut once = TimeSeriesStore::new();
        once.upsert("2025/10/06 - 2025/10/12", "a").unwrap();
        once.upsert("2025/10/13 - 2025/10/19", "b").unwrap();

        let mut twice = once.clone();
        twice.upsert("2025/10/13 - 2025/10/19", "b").unwrap();

        assert_eq!(once.sections(), twice.sections());
    }

    #[test]
    fn test_duplicate_sections_are_a_merge_conflict() {
        let sections = vec![
            Section::new("2025/10/06 - 2025/10/12", 1),
            Section::new("2025/10/13 - 2025/10/19", 2),
            Section::new("2025-10-06-2025-10-12", 3),
        ];

        let err = TimeSeriesStore::from_sections(sections).unwrap_err();
        assert_eq!(
            err,
            UpsertError::MergeConflict {
                identity: "2025-10-06-2025-10-12".to_string(),
                positions: vec![0, 2],
            }
        );
    }
}
