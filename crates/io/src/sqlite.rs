// Canonical store backed by a SQLite file

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, params_from_iter, Connection, OpenFlags};

use tally_recon::breakdown::Breakdown;
use tally_recon::error::StoreError;
use tally_recon::model::{Provenance, Record, RecordId};
use tally_recon::store::{CanonicalStore, RecordFilter};

/// Increment when the table layout changes in a way old readers can't handle.
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    period_key TEXT NOT NULL,            -- YYYY-MM-DD
    source_label TEXT NOT NULL CHECK (length(trim(source_label)) > 0),
    quantity INTEGER NOT NULL CHECK (quantity >= 0),
    supplemental_quantity INTEGER NOT NULL DEFAULT 0 CHECK (supplemental_quantity >= 0),
    breakdown TEXT,                      -- JSON list, NULL when empty
    submitted_at TEXT NOT NULL,          -- RFC 3339
    provenance TEXT NOT NULL,
    note TEXT
);

CREATE INDEX IF NOT EXISTS idx_collections_period ON collections (period_key);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const COLUMNS: &str =
    "id, period_key, source_label, quantity, breakdown, submitted_at, provenance, note";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Create (or upgrade in place) a store at `path`.
    pub fn init(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| unavailable(path, e))?;
        conn.execute_batch(SCHEMA).map_err(|e| unavailable(path, e))?;
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )
        .map_err(|e| unavailable(path, e))?;
        tracing::info!(path = %path.display(), "initialised store");
        Ok(Self { conn })
    }

    /// Open an existing store. A missing file or a database without the
    /// store schema is unavailable, never silently created.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if !path.is_file() {
            return Err(StoreError::Unavailable(format!(
                "{}: no such store (create one with `tally init`)",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)
            .map_err(|e| unavailable(path, e))?;
        let version: String = conn
            .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| row.get(0))
            .map_err(|_| {
                StoreError::Unavailable(format!("{}: not a tally store", path.display()))
            })?;
        if version.parse::<u32>().map_or(true, |v| v > SCHEMA_VERSION) {
            return Err(StoreError::Unavailable(format!(
                "{}: unsupported schema version {version}",
                path.display()
            )));
        }
        Ok(Self { conn })
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM collections", [], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
            .map_err(query)
    }
}

impl CanonicalStore for SqliteStore {
    fn enumerate_records(&self, filter: &RecordFilter) -> Result<Vec<Record>, StoreError> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<String> = Vec::new();

        // the positive label pattern is applied below: SQLite's LIKE folds
        // ASCII case only and would drop non-ASCII case variants
        for excluded in &filter.exclude_labels {
            clauses.push("source_label NOT LIKE ?");
            values.push(excluded.as_like().to_string());
        }
        if let Some(from) = filter.period_from {
            clauses.push("period_key >= ?");
            values.push(from.to_string());
        }
        if let Some(to) = filter.period_to {
            clauses.push("period_key <= ?");
            values.push(to.to_string());
        }
        if filter.exclude_adjustments {
            clauses.push("provenance <> ?");
            values.push(Provenance::ReconciliationAdjustment.as_str().to_string());
        }

        let mut sql = format!("SELECT {COLUMNS} FROM collections");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY period_key, id");

        let mut stmt = self.conn.prepare(&sql).map_err(query)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok(StoredRow {
                    id: row.get(0)?,
                    period_key: row.get(1)?,
                    source_label: row.get(2)?,
                    quantity: row.get(3)?,
                    breakdown: row.get(4)?,
                    submitted_at: row.get(5)?,
                    provenance: row.get(6)?,
                    note: row.get(7)?,
                })
            })
            .map_err(query)?;

        let mut records = Vec::new();
        for row in rows {
            let row = row.map_err(query)?;
            let record = row.into_record()?;
            // label match, plus exclusions NOT LIKE let through on non-ASCII case
            if filter.matches(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn insert_record(&mut self, record: &Record) -> Result<RecordId, StoreError> {
        if let Some(id) = record.id() {
            return Err(StoreError::Rejected(format!("record already persisted as id {id}")));
        }
        let quantity = i64::try_from(record.quantity())
            .map_err(|_| StoreError::Rejected(format!("quantity {} out of range", record.quantity())))?;
        let supplemental = i64::try_from(record.supplemental_quantity()).map_err(|_| {
            StoreError::Rejected(format!(
                "supplemental quantity {} out of range",
                record.supplemental_quantity()
            ))
        })?;
        let breakdown = (!record.breakdown().is_empty()).then(|| record.breakdown().to_json());

        self.conn
            .execute(
                "INSERT INTO collections (period_key, source_label, quantity, supplemental_quantity, \
                 breakdown, submitted_at, provenance, note) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.period_key().to_string(),
                    record.source_label(),
                    quantity,
                    supplemental,
                    breakdown,
                    record.submitted_at().to_rfc3339(),
                    record.provenance_tag().as_str(),
                    record.note(),
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(ref f, _)
                    if f.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::Rejected(e.to_string())
                }
                other => query(other),
            })?;
        Ok(self.conn.last_insert_rowid())
    }

    fn delete_records(&mut self, ids: &[RecordId]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction().map_err(query)?;
        let mut deleted = 0;
        {
            let mut stmt = tx
                .prepare("DELETE FROM collections WHERE id = ?1")
                .map_err(query)?;
            for id in ids {
                deleted += stmt.execute(params![id]).map_err(query)?;
            }
        }
        tx.commit().map_err(query)?;
        Ok(deleted)
    }
}

struct StoredRow {
    id: i64,
    period_key: String,
    source_label: String,
    quantity: i64,
    breakdown: Option<String>,
    submitted_at: String,
    provenance: String,
    note: Option<String>,
}

impl StoredRow {
    fn into_record(self) -> Result<Record, StoreError> {
        let id = self.id;
        let bad = |what: &str, value: &str| StoreError::Query(format!("row {id}: bad {what} '{value}'"));

        let period = NaiveDate::parse_from_str(&self.period_key, "%Y-%m-%d")
            .map_err(|_| bad("period_key", &self.period_key))?;
        let submitted_at = DateTime::parse_from_rfc3339(&self.submitted_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| bad("submitted_at", &self.submitted_at))?;
        let provenance =
            Provenance::parse(&self.provenance).ok_or_else(|| bad("provenance", &self.provenance))?;
        let breakdown = self
            .breakdown
            .as_deref()
            .map(Breakdown::decode)
            .unwrap_or_default();

        let record = Record::new(period, self.source_label, self.quantity, submitted_at, provenance)
            .map_err(|e| StoreError::Query(format!("row {id}: {e}")))?
            .with_breakdown(breakdown)
            .with_id(id);
        Ok(match self.note {
            Some(note) => record.with_note(note),
            None => record,
        })
    }
}

fn unavailable(path: &Path, e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(format!("{}: {e}", path.display()))
}

fn query(e: rusqlite::Error) -> StoreError {
    StoreError::Query(e.to_string())
}
