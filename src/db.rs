// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-backed history store.
//!
//! The database plays the part of a workbook: every sheet is a set of rows in
//! `sections`, each row one week with its position in the sheet.

use crate::history::{HistoryStore, SectionPayload};
use crate::upsert::{Section, TimeSeriesStore, UpsertOutcome};
use anyhow::{Context, Result};
use camino::Utf8Path;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::{debug, warn};

/// Open the database file and make sure the schema exists.
pub fn init_db(path: &Utf8Path) -> Result<Connection> {
    let conn = Connection::open(path.as_std_path())
        .with_context(|| format!("failed to open database at {}", path))?;
    configure(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    // journal_mode and synchronous persist in the file; the rest are per-connection.
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -64000;
        PRAGMA temp_store = MEMORY;
        "#,
    )
    .context("failed to set database pragmas")?;

    conn.execute_batch(
        r#"
        -- One row per week section of a sheet
        CREATE TABLE IF NOT EXISTS sections (
            sheet TEXT NOT NULL,
            identity TEXT NOT NULL,          -- normalized week identity
            position INTEGER NOT NULL,       -- 0 is the newest week
            week_label TEXT NOT NULL,        -- label as written
            week_start TEXT,                 -- YYYY-MM-DD, NULL when the label does not parse
            payload TEXT NOT NULL,           -- JSON
            PRIMARY KEY (sheet, identity)
        ) WITHOUT ROWID;

        -- Upserts that were started; 'pending' rows never reached commit
        CREATE TABLE IF NOT EXISTS upsert_journal (
            sheet TEXT NOT NULL,
            identity TEXT NOT NULL,
            week_label TEXT NOT NULL,
            status TEXT NOT NULL,            -- 'pending' or 'done'
            updated_at TEXT NOT NULL,
            PRIMARY KEY (sheet, identity)
        ) WITHOUT ROWID;

        CREATE INDEX IF NOT EXISTS idx_sections_position ON sections(sheet, position);
        "#,
    )
    .context("failed to initialize database schema")?;

    Ok(())
}

/// An upsert that started but never committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpsert {
    pub sheet: String,
    pub week_label: String,
    pub updated_at: String,
}

pub struct SqliteHistoryStore {
    conn: Connection,
}

impl SqliteHistoryStore {
    pub fn open(path: &Utf8Path) -> Result<Self> {
        Ok(Self {
            conn: init_db(path)?,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        configure(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Names of all sheets holding at least one section.
    pub fn sheet_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT sheet FROM sections ORDER BY sheet")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    /// Upserts that were started but not committed, oldest first.
    pub fn pending_upserts(&self) -> Result<Vec<PendingUpsert>> {
        let mut stmt = self.conn.prepare(
            "SELECT sheet, week_label, updated_at FROM upsert_journal
             WHERE status = 'pending'
             ORDER BY updated_at, sheet",
        )?;
        let pending = stmt
            .query_map([], |row| {
                Ok(PendingUpsert {
                    sheet: row.get(0)?,
                    week_label: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pending)
    }

    fn set_journal(&self, sheet: &str, section: &Section<()>, status: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO upsert_journal (sheet, identity, week_label, status, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    sheet,
                    section.identity(),
                    section.label(),
                    status,
                    Utc::now().to_rfc3339()
                ],
            )
            .context("failed to update upsert journal")?;
        Ok(())
    }

    fn apply_upsert(&mut self, sheet: &str, label: &str, payload: &SectionPayload) -> Result<UpsertOutcome> {
        let json = serde_json::to_string(payload).context("failed to serialize section payload")?;
        let section = Section::new(label, ());
        let week_start = section.start().map(|d| d.to_string());

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start transaction")?;

        let (mut store, stored_identities) = load_rows(&tx, sheet)?;
        let mut outcome = store.upsert(label, payload.clone())?;
        let mut target = match outcome {
            UpsertOutcome::Replaced { position } => stored_identities.get(position).cloned(),
            _ => None,
        };

        if outcome == UpsertOutcome::InsertedFront {
            // The row may have been written since the sheet was read.
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT position FROM sections WHERE sheet = ?1 AND identity = ?2",
                    params![sheet, section.identity()],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(position) = existing {
                outcome = UpsertOutcome::Replaced {
                    position: position as usize,
                };
                target = Some(section.identity().to_string());
            }
        }

        match outcome {
            UpsertOutcome::Replaced { .. } => {
                let target = target.context("replaced section has no stored row")?;
                tx.execute(
                    "UPDATE sections SET identity = ?1, week_label = ?2, week_start = ?3, payload = ?4
                     WHERE sheet = ?5 AND identity = ?6",
                    params![
                        section.identity(),
                        section.label(),
                        week_start,
                        json,
                        sheet,
                        target
                    ],
                )
                .context("failed to replace section")?;
            }
            UpsertOutcome::InsertedFront => {
                tx.execute(
                    "UPDATE sections SET position = position + 1 WHERE sheet = ?1",
                    params![sheet],
                )
                .context("failed to shift sections")?;
                insert_section(&tx, sheet, &section, week_start.as_deref(), &json, 0)?;
            }
            UpsertOutcome::AppendedBackfill { .. } => {
                let tail: i64 = tx.query_row(
                    "SELECT COALESCE(MAX(position) + 1, 0) FROM sections WHERE sheet = ?1",
                    params![sheet],
                    |row| row.get(0),
                )?;
                insert_section(&tx, sheet, &section, week_start.as_deref(), &json, tail)?;
            }
        }

        tx.commit().context("failed to commit section upsert")?;
        Ok(outcome)
    }
}

fn insert_section(
    conn: &Connection,
    sheet: &str,
    section: &Section<()>,
    week_start: Option<&str>,
    json: &str,
    position: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO sections (sheet, identity, position, week_label, week_start, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            sheet,
            section.identity(),
            position,
            section.label(),
            week_start,
            json
        ],
    )
    .context("failed to insert section")?;
    Ok(())
}

/// Load a sheet along with the identity each row was stored under.
fn load_rows(
    conn: &Connection,
    sheet: &str,
) -> Result<(TimeSeriesStore<SectionPayload>, Vec<String>)> {
    let mut stmt = conn.prepare(
        "SELECT identity, week_label, payload FROM sections
         WHERE sheet = ?1
         ORDER BY position",
    )?;
    let rows = stmt.query_map([sheet], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut sections = Vec::new();
    let mut identities = Vec::new();
    for row in rows {
        let (identity, label, json) = row?;
        let payload: SectionPayload = serde_json::from_str(&json)
            .with_context(|| format!("failed to parse section '{}' of sheet '{}'", label, sheet))?;
        sections.push(Section::new(label, payload));
        identities.push(identity);
    }

    let store = TimeSeriesStore::from_sections(sections)
        .with_context(|| format!("sheet '{}' holds conflicting sections", sheet))?;
    Ok((store, identities))
}

impl HistoryStore for SqliteHistoryStore {
    fn upsert_section(
        &mut self,
        sheet: &str,
        label: &str,
        payload: &SectionPayload,
    ) -> Result<UpsertOutcome> {
        let marker = Section::new(label, ());
        self.set_journal(sheet, &marker, "pending")?;

        match self.apply_upsert(sheet, label, payload) {
            Ok(outcome) => {
                self.set_journal(sheet, &marker, "done")?;
                debug!(sheet, label, %outcome, "section upserted");
                Ok(outcome)
            }
            Err(err) => {
                warn!(sheet, label, "section upsert failed, left pending for retry");
                Err(err)
            }
        }
    }

    fn load_sheet(&self, sheet: &str) -> Result<TimeSeriesStore<SectionPayload>> {
        load_rows(&self.conn, sheet).map(|(store, _)| store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url_average::{UrlAverageColumn, UrlCell};
    use crate::week::WeeklyKey;
    use chrono::NaiveDate;

    fn column(label: &str, average: Option<u32>) -> SectionPayload {
        SectionPayload::UrlColumn(UrlAverageColumn {
            week: label.to_string(),
            cells: vec![UrlCell {
                url: "/a".to_string(),
                average_position: average,
            }],
        })
    }

    fn labels(store: &SqliteHistoryStore, sheet: &str) -> Vec<String> {
        store
            .load_sheet(sheet)
            .unwrap()
            .sections()
            .iter()
            .map(|s| s.label().to_string())
            .collect()
    }

    #[test]
    fn test_upsert_orders_and_replaces() {
        let mut store = SqliteHistoryStore::open_in_memory().unwrap();

        store
            .upsert_section("Matrix", "2025/10/06 - 2025/10/12", &column("a", Some(3)))
            .unwrap();
        store
            .upsert_section("Matrix", "2025/10/13 - 2025/10/19", &column("b", Some(4)))
            .unwrap();
        let backfill = store
            .upsert_section("Matrix", "2025/09/29 - 2025/10/05", &column("c", None))
            .unwrap();
        assert_eq!(backfill, UpsertOutcome::AppendedBackfill { position: 2 });

        let replaced = store
            .upsert_section("Matrix", "2025-10-6 - 2025-10-12", &column("a2", Some(9)))
            .unwrap();
        assert_eq!(replaced, UpsertOutcome::Replaced { position: 1 });

        assert_eq!(
            labels(&store, "Matrix"),
            vec![
                "2025/10/13 - 2025/10/19",
                "2025-10-6 - 2025-10-12",
                "2025/09/29 - 2025/10/05"
            ]
        );

        let sheet = store.load_sheet("Matrix").unwrap();
        assert_eq!(*sheet.get("2025/10/06 - 2025/10/12").unwrap().payload(), column("a2", Some(9)));
        // Absence survives the round trip through storage.
        assert_eq!(*sheet.get("2025/09/29").unwrap().payload(), column("c", None));
        assert!(store.pending_upserts().unwrap().is_empty());
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut store = SqliteHistoryStore::open_in_memory().unwrap();
        let payload = column("x", Some(1));

        store.upsert_section("S", "2025/10/06 - 2025/10/12", &payload).unwrap();
        let first = labels(&store, "S");
        store.upsert_section("S", "2025/10/06 - 2025/10/12", &payload).unwrap();

        assert_eq!(labels(&store, "S"), first);
        let count: i64 = store
            .connection()
            .query_row("SELECT COUNT(*) FROM sections WHERE sheet = 'S'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_sheets_are_independent() {
        let mut store = SqliteHistoryStore::open_in_memory().unwrap();
        store.upsert_section("A", "2025/10/06", &column("a", Some(1))).unwrap();
        store.upsert_section("B", "2025/10/06", &column("b", Some(2))).unwrap();

        assert_eq!(store.sheet_names().unwrap(), vec!["A", "B"]);
        assert_eq!(store.load_sheet("A").unwrap().len(), 1);
        assert!(store.load_sheet("missing").unwrap().is_empty());

        let week = WeeklyKey::starting(NaiveDate::from_ymd_opt(2025, 10, 6).unwrap());
        // A URL column is not a ranking block.
        assert!(store.read_previous_week("A", &week).unwrap().is_empty());
    }

    #[test]
    fn test_failed_upsert_leaves_pending_marker() {
        let mut store = SqliteHistoryStore::open_in_memory().unwrap();
        store
            .connection()
            .execute(
                "INSERT INTO sections (sheet, identity, position, week_label, week_start, payload)
                 VALUES ('S', 'junk', 0, 'junk', NULL, 'not json')",
                [],
            )
            .unwrap();

        let result = store.upsert_section("S", "2025/10/06 - 2025/10/12", &column("x", Some(1)));
        assert!(result.is_err());

        let pending = store.pending_upserts().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sheet, "S");
        assert_eq!(pending[0].week_label, "2025/10/06 - 2025/10/12");

        // Nothing was half-written.
        let count: i64 = store
            .connection()
            .query_row("SELECT COUNT(*) FROM sections WHERE sheet = 'S'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_conflicting_rows_fail_to_load() {
        let store = SqliteHistoryStore::open_in_memory().unwrap();
        for (identity, position, label) in [
            ("legacy-a", 0, "2025/10/06 - 2025/10/12"),
            ("legacy-b", 1, "2025_10_06_2025_10_12"),
        ] {
            store
                .connection()
                .execute(
                    "INSERT INTO sections (sheet, identity, position, week_label, week_start, payload)
                     VALUES ('S', ?1, ?2, ?3, '2025-10-06', ?4)",
                    params![
                        identity,
                        position,
                        label,
                        serde_json::to_string(&column("x", None)).unwrap()
                    ],
                )
                .unwrap();
        }

        let err = store.load_sheet("S").unwrap_err();
        assert!(format!("{err:#}").contains("more than one section"));
    }
}
