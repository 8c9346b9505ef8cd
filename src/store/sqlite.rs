//! SQLite-backed record store.
//!
//! Captures live in a single `captures` table. Identifiers are not declared
//! unique so that duplicated source rows survive import and are caught by
//! the partitioner. A run holds one transaction from reset to the last batch
//! write; any error before commit rolls back every change.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use log::{info, warn};
use rusqlite::{params, params_from_iter, Connection, Row, Transaction};
use serde::{Deserialize, Serialize};

use super::{RecordStore, StoreSession};
use crate::{Direction, ObsoleteSet, Record, Result, RouteScope};

const SELECT_COLUMNS: &str = "id, route_id, position, relative_position, acquisition_id, \
                              direction, sequence_index, captured_at, quality, obsolete";

/// Record store backed by a SQLite database.
pub struct SqliteStore {
    conn: Connection,
    db_path: String,
}

/// Flag totals for one route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteFlagCount {
    pub route_id: String,
    pub total: usize,
    pub obsolete: usize,
}

impl SqliteStore {
    /// Open (or create) a store at the given database path.
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn,
            db_path: db_path.to_string(),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS captures (
                id TEXT NOT NULL,
                route_id TEXT,
                position REAL,
                relative_position REAL,       -- Position from the start of the acquisition
                acquisition_id TEXT,
                direction TEXT,               -- '+' or '-'
                sequence_index INTEGER,
                captured_at INTEGER,          -- Unix timestamp (seconds)
                quality REAL,                 -- Higher is worse
                obsolete INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_captures_route ON captures(route_id, position);
            CREATE INDEX IF NOT EXISTS idx_captures_id ON captures(id);
            "#,
        )?;
        Ok(())
    }

    /// Bulk insert records in a single transaction.
    pub fn insert_records(&mut self, records: &[Record]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO captures (id, route_id, position, relative_position, acquisition_id,
                                       direction, sequence_index, captured_at, quality, obsolete)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for r in records {
                stmt.execute(params![
                    r.id,
                    r.route_id,
                    r.position,
                    r.relative_position,
                    r.acquisition_id,
                    r.direction.map(|d| d.as_str()),
                    r.sequence_index,
                    r.captured_at.map(|t| t.timestamp()),
                    r.quality,
                    r.obsolete,
                ])?;
            }
        }
        tx.commit()?;
        info!("[SqliteStore] inserted {} records", records.len());
        Ok(records.len())
    }

    /// Per-route record and obsolete counts.
    pub fn flag_counts(&self, scope: &RouteScope) -> Result<Vec<RouteFlagCount>> {
        let (clause, args) = scope_clause(scope);
        let sql = format!(
            "SELECT route_id, COUNT(*), SUM(CASE WHEN obsolete <> 0 THEN 1 ELSE 0 END)
             FROM captures WHERE route_id IS NOT NULL{}
             GROUP BY route_id ORDER BY route_id",
            clause
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let counts = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok(RouteFlagCount {
                    route_id: row.get(0)?,
                    total: row.get::<_, i64>(1)? as usize,
                    obsolete: row.get::<_, i64>(2)? as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(counts)
    }
}

impl RecordStore for SqliteStore {
    type Session<'a> = SqliteSession<'a>;

    fn begin(&mut self) -> Result<SqliteSession<'_>> {
        Ok(SqliteSession {
            tx: self.conn.transaction()?,
        })
    }

    fn flagged_ids(&mut self, scope: &RouteScope) -> Result<ObsoleteSet> {
        query_flagged(&self.conn, scope)
    }
}

/// One run's transaction on a [`SqliteStore`].
pub struct SqliteSession<'a> {
    tx: Transaction<'a>,
}

impl StoreSession for SqliteSession<'_> {
    fn reset_flags(&mut self, scope: &RouteScope) -> Result<usize> {
        let (clause, args) = scope_clause(scope);
        let sql = format!("UPDATE captures SET obsolete = 0 WHERE obsolete <> 0{}", clause);
        let changed = self.tx.execute(&sql, params_from_iter(args.iter()))?;
        Ok(changed)
    }

    fn fetch_active(&mut self, scope: &RouteScope) -> Result<Vec<Record>> {
        let (clause, args) = scope_clause(scope);
        let sql = format!(
            "SELECT {} FROM captures
             WHERE obsolete = 0 AND route_id IS NOT NULL{}
             ORDER BY route_id, position",
            SELECT_COLUMNS, clause
        );
        let mut stmt = self.tx.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(args.iter()), record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn duplicate_ids(&mut self) -> Result<BTreeSet<String>> {
        let mut stmt = self
            .tx
            .prepare("SELECT id FROM captures GROUP BY id HAVING COUNT(*) > 1")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(ids)
    }

    fn flag_obsolete(&mut self, ids: &[String], scope: &RouteScope) -> Result<usize> {
        let (clause, args) = scope_clause(scope);
        let sql = format!("UPDATE captures SET obsolete = 1 WHERE id = ?{}", clause);
        let mut stmt = self.tx.prepare_cached(&sql)?;
        let mut updated = 0;
        for id in ids {
            updated += stmt.execute(params_from_iter(std::iter::once(id).chain(args.iter())))?;
        }
        Ok(updated)
    }

    fn flagged_ids(&mut self, scope: &RouteScope) -> Result<ObsoleteSet> {
        query_flagged(&self.tx, scope)
    }

    fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }

    fn rollback(self) -> Result<()> {
        self.tx.rollback()?;
        Ok(())
    }
}

fn query_flagged(conn: &Connection, scope: &RouteScope) -> Result<ObsoleteSet> {
    let (clause, args) = scope_clause(scope);
    let sql = format!("SELECT DISTINCT id FROM captures WHERE obsolete <> 0{}", clause);
    let mut stmt = conn.prepare(&sql)?;
    let ids = stmt
        .query_map(params_from_iter(args.iter()), |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<ObsoleteSet>>()?;
    Ok(ids)
}

/// SQL condition (prefixed with ` AND`) and its bound values for a scope.
fn scope_clause(scope: &RouteScope) -> (String, Vec<String>) {
    match scope {
        RouteScope::All => (String::new(), Vec::new()),
        RouteScope::Routes(routes) if routes.is_empty() => (" AND 0 = 1".to_string(), Vec::new()),
        RouteScope::Routes(routes) => {
            let placeholders = vec!["?"; routes.len()].join(", ");
            (
                format!(" AND route_id IN ({})", placeholders),
                routes.iter().cloned().collect(),
            )
        }
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Record> {
    let id: String = row.get(0)?;
    let direction = match row.get::<_, Option<String>>(5)? {
        Some(raw) => {
            let parsed = Direction::parse(&raw);
            if parsed.is_none() {
                warn!("[SqliteStore] record {} has unknown direction {:?}", id, raw);
            }
            parsed
        }
        None => None,
    };
    let captured_at = row
        .get::<_, Option<i64>>(7)?
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

    Ok(Record {
        id,
        route_id: row.get(1)?,
        position: row.get(2)?,
        relative_position: row.get(3)?,
        acquisition_id: row.get(4)?,
        direction,
        sequence_index: row.get(6)?,
        captured_at,
        quality: row.get(8)?,
        obsolete: row.get::<_, i64>(9)? != 0,
    })
}
