//! SQLite store implementation.

use rusqlite::{params, Connection, Result as SqlResult};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::models::{AppEntryRow, RetentionPolicy};
use crate::status::{AppStatus, Evaluation, ResourceStatus};

/// How many trailing rows per app id the dedup rule inspects. With a
/// lookback of 2 a steady state keeps its two boundary rows, so "since when"
/// a state held stays reconstructable.
const APP_DEDUP_LOOKBACK: usize = 2;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Thread-safe store. Mutating operations serialize on the writer
/// connection; queries use a separate read connection and never contend
/// with the writer lock.
#[derive(Clone)]
pub struct Store {
    writer: Arc<Mutex<Connection>>,
    reader: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let writer = open_connection(&path)?;

        writer
            .execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("schema init failed: {}", e)))?;

        let reader = open_connection(&path)?;

        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            reader: Arc::new(Mutex::new(reader)),
        })
    }

    // --- Write path ---

    /// Persist one evaluation: one measurement row plus one entry per status,
    /// in a single transaction. App entries are deduped on write; resource
    /// entries are stored every tick (needed for averaging).
    pub fn insert(&self, eval: &Evaluation) -> Result<(), DbError> {
        let conn = self.writer.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO measurement (timestamp) VALUES (?1)",
            params![eval.time],
        )?;
        let measurement_id = tx.last_insert_rowid();

        for app in &eval.apps {
            insert_app_status(&tx, measurement_id, app)?;
        }
        for res in &eval.resources {
            insert_resource_status(&tx, measurement_id, res)?;
        }

        tx.commit()?;
        Ok(())
    }

    // --- Read paths ---

    /// Get the latest `count` measurements with their entries, ordered from
    /// oldest to newest. Used to rebuild the in-memory window on startup.
    pub fn recent_evaluations(&self, count: usize) -> Result<Vec<Evaluation>, DbError> {
        let conn = self.reader.lock().unwrap();

        let mut stmt =
            conn.prepare("SELECT id, timestamp FROM measurement ORDER BY id DESC LIMIT ?1")?;
        let mut measurements = stmt
            .query_map(params![count as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        measurements.reverse();

        let mut app_stmt = conn.prepare(
            "SELECT id, app_id, description, is_alive, is_http_reachable, is_https_reachable \
             FROM app_entry WHERE measurement_id = ?1 ORDER BY id ASC",
        )?;
        let mut res_stmt = conn.prepare(
            "SELECT resource_id, value, max, description \
             FROM resource_entry WHERE measurement_id = ?1 ORDER BY id ASC",
        )?;

        let mut evaluations = Vec::with_capacity(measurements.len());
        for (measurement_id, timestamp) in measurements {
            let apps = app_stmt
                .query_map(params![measurement_id], map_app_entry)?
                .collect::<SqlResult<Vec<_>>>()?
                .into_iter()
                .map(|row| row.to_status())
                .collect();

            let resources = res_stmt
                .query_map(params![measurement_id], map_resource_entry)?
                .collect::<SqlResult<Vec<_>>>()?;

            evaluations.push(Evaluation::at(timestamp, apps, resources));
        }

        Ok(evaluations)
    }

    /// Average resource samples in `[start, end)` into `buckets` equal-width
    /// buckets, ordered oldest to newest.
    ///
    /// Long ranges are thinned with a sampling stride before bucketing to
    /// bound query cost. Each bucket is stamped with its midpoint; a bucket
    /// without samples yields an evaluation with no resources, which callers
    /// must treat as "no sample", not zero.
    pub fn query_range(
        &self,
        start: i64,
        end: i64,
        buckets: usize,
    ) -> Result<Vec<Evaluation>, DbError> {
        if buckets == 0 {
            return Ok(Vec::new());
        }
        let bucket_size = (end - start) / buckets as i64;
        if bucket_size <= 0 {
            tracing::warn!("Invalid time range {}..{} for {} buckets", start, end, buckets);
            return Ok(Vec::new());
        }

        let stride = sample_stride(end - start);
        let rows = self.resource_rows_in_range(start, end, stride)?;
        tracing::debug!(
            "Range query {}..{}: {} resource rows (stride {})",
            start,
            end,
            rows.len(),
            stride
        );

        // Partition rows into buckets, then average per resource id.
        let mut by_bucket: Vec<Vec<&ResourceRow>> = vec![Vec::new(); buckets];
        for row in &rows {
            let index = ((row.timestamp - start) / bucket_size).clamp(0, buckets as i64 - 1);
            by_bucket[index as usize].push(row);
        }

        let results = by_bucket
            .iter()
            .enumerate()
            .map(|(index, bucket_rows)| {
                let bucket_time = start + index as i64 * bucket_size + bucket_size / 2;
                Evaluation::at(bucket_time, Vec::new(), average_resources(bucket_rows))
            })
            .collect();

        Ok(results)
    }

    /// Raw resource rows in range, sampled every `stride`-th measurement.
    fn resource_rows_in_range(
        &self,
        start: i64,
        end: i64,
        stride: usize,
    ) -> Result<Vec<ResourceRow>, DbError> {
        let conn = self.reader.lock().unwrap();

        if stride <= 1 {
            let mut stmt = conn.prepare(
                "SELECT r.resource_id, r.value, r.max, r.description, m.timestamp \
                 FROM resource_entry r JOIN measurement m ON r.measurement_id = m.id \
                 WHERE m.timestamp >= ?1 AND m.timestamp < ?2 ORDER BY m.timestamp ASC",
            )?;
            let rows = stmt
                .query_map(params![start, end], map_resource_row)?
                .collect::<SqlResult<Vec<_>>>()?;
            return Ok(rows);
        }

        let mut id_stmt = conn.prepare(
            "SELECT id, timestamp FROM measurement \
             WHERE timestamp >= ?1 AND timestamp < ?2 ORDER BY timestamp ASC",
        )?;
        let sampled: Vec<(i64, i64)> = id_stmt
            .query_map(params![start, end], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<SqlResult<Vec<_>>>()?
            .into_iter()
            .step_by(stride)
            .collect();

        let mut entry_stmt = conn.prepare(
            "SELECT resource_id, value, max, description \
             FROM resource_entry WHERE measurement_id = ?1 ORDER BY id ASC",
        )?;

        let mut rows = Vec::new();
        for (measurement_id, timestamp) in sampled {
            let entries = entry_stmt
                .query_map(params![measurement_id], map_resource_entry)?
                .collect::<SqlResult<Vec<_>>>()?;
            for status in entries {
                rows.push(ResourceRow {
                    resource_id: status.id,
                    value: status.current,
                    max: status.total,
                    description: status.description,
                    timestamp,
                });
            }
        }
        Ok(rows)
    }

    /// Persisted status changes for one app, newest first, paired with the
    /// measurement timestamp they were recorded at.
    pub fn app_status_history(
        &self,
        app_id: &str,
        limit: usize,
    ) -> Result<Vec<(i64, AppStatus)>, DbError> {
        let conn = self.reader.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT m.timestamp, a.id, a.app_id, a.description, a.is_alive, \
                    a.is_http_reachable, a.is_https_reachable \
             FROM app_entry a JOIN measurement m ON a.measurement_id = m.id \
             WHERE a.app_id = ?1 ORDER BY m.timestamp DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![app_id, limit as i64], |row| {
                let timestamp: i64 = row.get(0)?;
                let entry = AppEntryRow {
                    id: row.get(1)?,
                    app_id: row.get(2)?,
                    description: row.get(3)?,
                    is_alive: row.get(4)?,
                    is_http_reachable: row.get(5)?,
                    is_https_reachable: row.get(6)?,
                };
                Ok((timestamp, entry.to_status()))
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rows)
    }

    // --- Retention ---

    /// Apply the retention policy relative to `now_ms`. Idempotent.
    pub fn apply_retention(&self, policy: &RetentionPolicy, now_ms: i64) -> Result<(), DbError> {
        if let Some(age) = policy.max_age_ms {
            let deleted = self.purge_measurements_before(now_ms - age)?;
            if deleted > 0 {
                tracing::info!("Retention: deleted {} measurements past global age", deleted);
            }
        }

        if !policy.per_resource.is_empty() {
            for retention in &policy.per_resource {
                let cutoff = now_ms - retention.max_age_ms;
                let deleted = self.purge_resource_entries_before(&retention.id_prefix, cutoff)?;
                if deleted > 0 {
                    tracing::info!(
                        "Retention: deleted {} resource rows for prefix {}",
                        deleted,
                        retention.id_prefix
                    );
                }
            }
            let pruned = self.prune_empty_measurements()?;
            if pruned > 0 {
                tracing::info!("Retention: pruned {} empty measurements", pruned);
            }
        }

        Ok(())
    }

    /// Delete measurements older than the cutoff; entries cascade.
    pub fn purge_measurements_before(&self, cutoff: i64) -> Result<usize, DbError> {
        let conn = self.writer.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM measurement WHERE timestamp < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }

    /// Delete resource entries whose id matches the prefix and whose
    /// measurement is older than the cutoff.
    pub fn purge_resource_entries_before(
        &self,
        id_prefix: &str,
        cutoff: i64,
    ) -> Result<usize, DbError> {
        let conn = self.writer.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM resource_entry WHERE resource_id LIKE ?1 AND measurement_id IN \
             (SELECT id FROM measurement WHERE timestamp < ?2)",
            params![format!("{}%", id_prefix), cutoff],
        )?;
        Ok(deleted)
    }

    /// Drop measurements that no longer reference any entry.
    pub fn prune_empty_measurements(&self) -> Result<usize, DbError> {
        let conn = self.writer.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM measurement WHERE \
             id NOT IN (SELECT measurement_id FROM resource_entry) AND \
             id NOT IN (SELECT measurement_id FROM app_entry)",
            [],
        )?;
        Ok(deleted)
    }

    // --- Maintenance & stats ---

    /// WAL checkpoint plus VACUUM to reclaim disk space.
    pub fn vacuum(&self) -> Result<(), DbError> {
        let conn = self.writer.lock().unwrap();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE); VACUUM;")?;
        Ok(())
    }

    /// Get database size in bytes.
    pub fn db_size_bytes(&self) -> Result<i64, DbError> {
        let conn = self.reader.lock().unwrap();
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |r| r.get(0))?;
        Ok(page_count * page_size)
    }

    pub fn measurement_count(&self) -> Result<i64, DbError> {
        let conn = self.reader.lock().unwrap();
        Ok(conn.query_row("SELECT COUNT(*) FROM measurement", [], |r| r.get(0))?)
    }

    pub fn resource_entry_count(&self) -> Result<i64, DbError> {
        let conn = self.reader.lock().unwrap();
        Ok(conn.query_row("SELECT COUNT(*) FROM resource_entry", [], |r| r.get(0))?)
    }

    pub fn app_entry_count(&self, app_id: &str) -> Result<i64, DbError> {
        let conn = self.reader.lock().unwrap();
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM app_entry WHERE app_id = ?1",
            params![app_id],
            |r| r.get(0),
        )?)
    }
}

fn open_connection(path: &Path) -> Result<Connection, DbError> {
    let conn = Connection::open(path)?;
    // journal_mode cannot change inside a transaction; set pragmas up front.
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; \
         PRAGMA busy_timeout=5000; \
         PRAGMA synchronous=NORMAL; \
         PRAGMA foreign_keys=ON;",
    )?;
    Ok(conn)
}

fn insert_app_status(
    conn: &Connection,
    measurement_id: i64,
    status: &AppStatus,
) -> Result<(), DbError> {
    let app_id = status.id();

    let mut stmt = conn.prepare_cached(
        "SELECT id, app_id, description, is_alive, is_http_reachable, is_https_reachable \
         FROM app_entry WHERE app_id = ?1 ORDER BY id DESC LIMIT ?2",
    )?;
    let recent = stmt
        .query_map(params![app_id, APP_DEDUP_LOOKBACK as i64], map_app_entry)?
        .collect::<SqlResult<Vec<_>>>()?;

    // Unchanged for the full lookback: drop the immediately-preceding row so
    // a steady state keeps only its boundary rows.
    if recent.len() == APP_DEDUP_LOOKBACK
        && recent.iter().all(|row| row.to_status().same_state(status))
    {
        conn.execute("DELETE FROM app_entry WHERE id = ?1", params![recent[0].id])?;
    }

    conn.execute(
        "INSERT INTO app_entry \
         (app_id, description, is_alive, is_http_reachable, is_https_reachable, measurement_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            app_id,
            status.app.description,
            status.is_running,
            status.is_http_reachable,
            status.is_https_reachable,
            measurement_id,
        ],
    )?;
    Ok(())
}

fn insert_resource_status(
    conn: &Connection,
    measurement_id: i64,
    status: &ResourceStatus,
) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO resource_entry (resource_id, value, max, description, measurement_id) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            status.id,
            status.current as f64,
            status.total as f64,
            status.description,
            measurement_id,
        ],
    )?;
    Ok(())
}

/// Sampling stride by range length: all data up to a day, then progressively
/// sparser to keep long-range queries bounded.
fn sample_stride(span_ms: i64) -> usize {
    let days = span_ms / (24 * 60 * 60 * 1000);
    match days {
        d if d <= 1 => 1,
        d if d <= 7 => 3,
        d if d <= 30 => 15,
        d if d <= 365 => 100,
        _ => 200,
    }
}

struct ResourceRow {
    resource_id: String,
    value: f32,
    max: f32,
    description: String,
    timestamp: i64,
}

fn average_resources(rows: &[&ResourceRow]) -> Vec<ResourceStatus> {
    let mut order: Vec<&str> = Vec::new();
    for row in rows {
        if !order.contains(&row.resource_id.as_str()) {
            order.push(&row.resource_id);
        }
    }

    order
        .into_iter()
        .map(|resource_id| {
            let group: Vec<&&ResourceRow> =
                rows.iter().filter(|r| r.resource_id == resource_id).collect();
            let count = group.len() as f32;
            ResourceStatus {
                id: resource_id.to_string(),
                name: resource_id.to_string(),
                description: group[0].description.clone(),
                current: group.iter().map(|r| r.value).sum::<f32>() / count,
                total: group.iter().map(|r| r.max).sum::<f32>() / count,
            }
        })
        .collect()
}

fn map_app_entry(row: &rusqlite::Row<'_>) -> SqlResult<AppEntryRow> {
    Ok(AppEntryRow {
        id: row.get(0)?,
        app_id: row.get(1)?,
        description: row.get(2)?,
        is_alive: row.get(3)?,
        is_http_reachable: row.get(4)?,
        is_https_reachable: row.get(5)?,
    })
}

fn map_resource_entry(row: &rusqlite::Row<'_>) -> SqlResult<ResourceStatus> {
    let resource_id: String = row.get(0)?;
    Ok(ResourceStatus {
        name: resource_id.clone(),
        id: resource_id,
        current: row.get::<_, f64>(1)? as f32,
        total: row.get::<_, f64>(2)? as f32,
        description: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
    })
}

fn map_resource_row(row: &rusqlite::Row<'_>) -> SqlResult<ResourceRow> {
    Ok(ResourceRow {
        resource_id: row.get(0)?,
        value: row.get::<_, f64>(1)? as f32,
        max: row.get::<_, f64>(2)? as f32,
        description: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        timestamp: row.get(4)?,
    })
}
