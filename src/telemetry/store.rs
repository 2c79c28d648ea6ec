//! # SQLite telemetry store.
//!
//! One connection behind `Arc<Mutex<_>>`; every method is synchronous and meant to
//! run on the blocking pool through [`TelemetryStore::run`].
//!
//! ## Tables
//! ```text
//! sessions ◄─────────────── handler_invocations ──────► listeners
//!     ▲                                                  (natural key)
//!     └──────────────────── job_executions ───────────► scheduled_jobs
//!                                                        (natural key)
//! ```
//!
//! ## Retention
//! ```text
//! sweep(now, retention, max_db_bytes)
//!   1. delete records with started_at < now - retention
//!   2. while (page_count - freelist_count) * page_size > max_db_bytes:
//!          delete the oldest EVICT_BATCH records of each kind
//!   3. delete registrations without records and last_registered_at < horizon
//! ```
//! Sessions are never swept.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::events::FailureDetail;
use crate::telemetry::model::{
    ExecutionRecord, ExecutionSummary, ExecutionTarget, JobRegistration, ListenerRegistration,
    RecentError, RegistrationKey, Session, SessionStatus, SweepReport,
};
use crate::telemetry::schema;

const EVICT_BATCH: i64 = 500;

const SESSION_COLUMNS: &str = "id, started_at, stopped_at, last_heartbeat_at, status, \
                               error_type, error_message, error_trace";

/// Table names of one registration kind and its records.
struct Family {
    registrations: &'static str,
    records: &'static str,
    fk: &'static str,
    name_column: &'static str,
    target: fn(i64) -> ExecutionTarget,
}

const LISTENERS: Family = Family {
    registrations: "listeners",
    records: "handler_invocations",
    fk: "listener_id",
    name_column: "handler_name",
    target: ExecutionTarget::Listener,
};

const JOBS: Family = Family {
    registrations: "scheduled_jobs",
    records: "job_executions",
    fk: "job_id",
    name_column: "job_name",
    target: ExecutionTarget::Job,
};

/// Handle to the telemetry database. Cheap to clone.
#[derive(Clone)]
pub struct TelemetryStore {
    conn: Arc<Mutex<Connection>>,
}

impl fmt::Debug for TelemetryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryStore").finish_non_exhaustive()
    }
}

impl TelemetryStore {
    /// Opens (or creates) the database at `path` in WAL mode.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "telemetry store opened");
        Self::init(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        schema::apply(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&mut conn)?)
    }

    /// Runs `f` against this store on the blocking pool.
    pub async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&TelemetryStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store)).await?
    }

    /// Inserts or refreshes a listener by natural key and returns its id.
    ///
    /// `first_registered_at` is kept from the first insert.
    pub fn upsert_listener(
        &self,
        reg: &ListenerRegistration,
        now: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "INSERT INTO listeners (app_key, instance_index, handler_name, topic,
                     debounce_ms, throttle_ms, once, priority, predicate, source_location,
                     first_registered_at, last_registered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                 ON CONFLICT (app_key, instance_index, handler_name, topic) DO UPDATE SET
                     debounce_ms = excluded.debounce_ms,
                     throttle_ms = excluded.throttle_ms,
                     once = excluded.once,
                     priority = excluded.priority,
                     predicate = excluded.predicate,
                     source_location = excluded.source_location,
                     last_registered_at = excluded.last_registered_at
                 RETURNING id",
                params![
                    reg.key.app_key,
                    reg.key.instance_index,
                    reg.key.name,
                    reg.key.topic,
                    reg.debounce.map(millis),
                    reg.throttle.map(millis),
                    reg.once,
                    reg.priority,
                    reg.predicate,
                    reg.source_location,
                    micros(now),
                ],
                |row| row.get(0),
            )
        })
    }

    /// Inserts or refreshes a scheduled job by natural key and returns its id.
    pub fn upsert_job(&self, reg: &JobRegistration, now: DateTime<Utc>) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "INSERT INTO scheduled_jobs (app_key, instance_index, job_name, topic,
                     handler_name, trigger_type, trigger_description, repeats, source_location,
                     first_registered_at, last_registered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
                 ON CONFLICT (app_key, instance_index, job_name, topic) DO UPDATE SET
                     handler_name = excluded.handler_name,
                     trigger_type = excluded.trigger_type,
                     trigger_description = excluded.trigger_description,
                     repeats = excluded.repeats,
                     source_location = excluded.source_location,
                     last_registered_at = excluded.last_registered_at
                 RETURNING id",
                params![
                    reg.key.app_key,
                    reg.key.instance_index,
                    reg.key.name,
                    reg.key.topic,
                    reg.handler_name,
                    reg.trigger_type,
                    reg.trigger_description,
                    reg.repeat,
                    reg.source_location,
                    micros(now),
                ],
                |row| row.get(0),
            )
        })
    }

    /// Appends records in one transaction and returns how many were written.
    ///
    /// Records violating a constraint (unknown registration or session) are
    /// skipped with a warning; the rest of the batch is kept.
    pub fn insert_records(&self, records: &[ExecutionRecord]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut written = 0;
            {
                let mut listener_stmt = tx.prepare_cached(&insert_record_sql(&LISTENERS))?;
                let mut job_stmt = tx.prepare_cached(&insert_record_sql(&JOBS))?;
                for r in records {
                    let (stmt, id) = match r.target {
                        ExecutionTarget::Listener(id) => (&mut listener_stmt, id),
                        ExecutionTarget::Job(id) => (&mut job_stmt, id),
                    };
                    let res = stmt.execute(params![
                        id,
                        r.session_id,
                        micros(r.started_at),
                        millis(r.duration),
                        r.status.as_str(),
                        r.error_type,
                        r.error_message,
                        r.error_trace,
                    ]);
                    match res {
                        Ok(_) => written += 1,
                        Err(rusqlite::Error::SqliteFailure(err, msg))
                            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                        {
                            warn!(
                                registration = %r.target,
                                session_id = r.session_id,
                                error = msg.as_deref().unwrap_or("constraint violation"),
                                "dropping telemetry record"
                            );
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            tx.commit()?;
            Ok(written)
        })
    }

    /// Opens a new `running` session and returns its id.
    pub fn begin_session(&self, now: DateTime<Utc>) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "INSERT INTO sessions (started_at, last_heartbeat_at, status)
                 VALUES (?1, ?1, 'running') RETURNING id",
                [micros(now)],
                |row| row.get(0),
            )
        })
    }

    /// Refreshes `last_heartbeat_at` of a running session.
    pub fn heartbeat(&self, session_id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET last_heartbeat_at = ?2 WHERE id = ?1 AND status = 'running'",
                params![session_id, micros(now)],
            )
        })
        .map(|n| n > 0)
    }

    /// Closes a running session. Error fields already recorded are kept.
    pub fn finish_session(
        &self,
        session_id: i64,
        status: SessionStatus,
        failure: Option<&FailureDetail>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET
                     status = ?2,
                     stopped_at = ?3,
                     last_heartbeat_at = ?3,
                     error_type = CASE WHEN error_type IS NULL THEN ?4 ELSE error_type END,
                     error_message = CASE WHEN error_type IS NULL THEN ?5 ELSE error_message END,
                     error_trace = CASE WHEN error_type IS NULL THEN ?6 ELSE error_trace END
                 WHERE id = ?1 AND status = 'running'",
                params![
                    session_id,
                    status.as_str(),
                    micros(now),
                    failure.map(|f| f.error_type.as_str()),
                    failure.map(|f| f.message.as_str()),
                    failure.and_then(|f| f.trace.as_deref()),
                ],
            )
        })
        .map(|n| n > 0)
    }

    /// Records the session's first error. Later calls are no-ops.
    pub fn record_session_error(
        &self,
        session_id: i64,
        failure: &FailureDetail,
    ) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET error_type = ?2, error_message = ?3, error_trace = ?4
                 WHERE id = ?1 AND error_type IS NULL",
                params![session_id, failure.error_type, failure.message, failure.trace],
            )
        })
        .map(|n| n > 0)
    }

    /// Marks every `running` session as `unknown`, stopped at its last heartbeat.
    ///
    /// Must run before [`begin_session`](Self::begin_session) of the live process.
    pub fn finalize_orphans(&self) -> Result<Vec<i64>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "UPDATE sessions SET status = 'unknown', stopped_at = last_heartbeat_at
                 WHERE status = 'running' RETURNING id",
            )?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?;
            Ok(ids)
        })
    }

    /// Loads one session.
    pub fn session(&self, session_id: i64) -> Result<Option<Session>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                [session_id],
                session_from_row,
            )
            .optional()
        })
    }

    /// Most recent sessions first.
    pub fn sessions(&self, limit: usize) -> Result<Vec<Session>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY id DESC LIMIT ?1"
            ))?;
            let rows = stmt
                .query_map([to_limit(limit)], session_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Bytes in use: `(page_count - freelist_count) * page_size`.
    pub fn used_bytes(&self) -> Result<u64, StoreError> {
        self.with_conn(|conn| used_bytes_on(conn))
    }

    /// Runs one retention pass. See the module docs for the order of steps.
    pub fn sweep(
        &self,
        now: DateTime<Utc>,
        retention: Duration,
        max_db_bytes: u64,
    ) -> Result<SweepReport, StoreError> {
        let horizon = TimeDelta::from_std(retention)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or_default();
        let horizon = micros(horizon);

        self.with_conn(|conn| {
            let mut report = SweepReport::default();

            let tx = conn.transaction()?;
            for fam in [&LISTENERS, &JOBS] {
                report.expired += tx.execute(
                    &format!("DELETE FROM {} WHERE started_at < ?1", fam.records),
                    [horizon],
                )?;
            }
            tx.commit()?;

            while used_bytes_on(conn)? > max_db_bytes {
                let mut evicted = 0;
                for fam in [&LISTENERS, &JOBS] {
                    evicted += conn.execute(
                        &format!(
                            "DELETE FROM {t} WHERE id IN
                                 (SELECT id FROM {t} ORDER BY started_at, id LIMIT ?1)",
                            t = fam.records
                        ),
                        [EVICT_BATCH],
                    )?;
                }
                if evicted == 0 {
                    break;
                }
                report.evicted += evicted;
            }

            for fam in [&LISTENERS, &JOBS] {
                report.registrations += conn.execute(
                    &format!(
                        "DELETE FROM {reg} WHERE last_registered_at < ?1
                           AND NOT EXISTS (SELECT 1 FROM {rec} r WHERE r.{fk} = {reg}.id)",
                        reg = fam.registrations,
                        rec = fam.records,
                        fk = fam.fk,
                    ),
                    [horizon],
                )?;
            }
            Ok(report)
        })
    }

    /// Aggregates per listener, optionally restricted to one app.
    pub fn listener_summaries(&self, app_key: Option<&str>) -> Result<Vec<ExecutionSummary>, StoreError> {
        self.summaries(&LISTENERS, app_key)
    }

    /// Aggregates per scheduled job, optionally restricted to one app.
    pub fn job_summaries(&self, app_key: Option<&str>) -> Result<Vec<ExecutionSummary>, StoreError> {
        self.summaries(&JOBS, app_key)
    }

    fn summaries(&self, fam: &Family, app_key: Option<&str>) -> Result<Vec<ExecutionSummary>, StoreError> {
        let sql = format!(
            "SELECT g.id, g.app_key, g.instance_index, g.{name}, g.topic,
                    COUNT(r.id),
                    COALESCE(SUM(r.status = 'success'), 0),
                    COALESCE(SUM(r.status = 'error'), 0),
                    COALESCE(SUM(r.status = 'cancelled'), 0),
                    COALESCE(AVG(r.duration_ms), 0.0),
                    (SELECT x.duration_ms FROM {rec} x WHERE x.{fk} = g.id
                       ORDER BY x.started_at DESC, x.id DESC LIMIT 1),
                    MAX(r.started_at)
             FROM {reg} g LEFT JOIN {rec} r ON r.{fk} = g.id
             WHERE ?1 IS NULL OR g.app_key = ?1
             GROUP BY g.id
             ORDER BY g.app_key, g.instance_index, g.{name}, g.topic",
            name = fam.name_column,
            reg = fam.registrations,
            rec = fam.records,
            fk = fam.fk,
        );
        let target = fam.target;
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([app_key], |row| {
                    Ok(ExecutionSummary {
                        target: target(row.get(0)?),
                        key: key_from_row(row, 1)?,
                        total: tally(row, 5)?,
                        successes: tally(row, 6)?,
                        errors: tally(row, 7)?,
                        cancelled: tally(row, 8)?,
                        avg_duration_ms: row.get(9)?,
                        last_duration_ms: row.get(10)?,
                        last_run_at: opt_ts(row, 11)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Most recent failed records across listeners and jobs.
    pub fn recent_errors(&self, limit: usize) -> Result<Vec<RecentError>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT 'listener', g.id, g.app_key, g.instance_index, g.handler_name, g.topic,
                        r.started_at, r.error_type, r.error_message, r.id
                 FROM handler_invocations r JOIN listeners g ON g.id = r.listener_id
                 WHERE r.status = 'error'
                 UNION ALL
                 SELECT 'job', g.id, g.app_key, g.instance_index, g.job_name, g.topic,
                        r.started_at, r.error_type, r.error_message, r.id
                 FROM job_executions r JOIN scheduled_jobs g ON g.id = r.job_id
                 WHERE r.status = 'error'
                 ORDER BY 7 DESC, 10 DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([to_limit(limit)], |row| {
                    let kind: String = row.get(0)?;
                    let id: i64 = row.get(1)?;
                    Ok(RecentError {
                        target: if kind == "job" {
                            ExecutionTarget::Job(id)
                        } else {
                            ExecutionTarget::Listener(id)
                        },
                        key: key_from_row(row, 2)?,
                        started_at: ts(row, 6)?,
                        error_type: row.get(7)?,
                        error_message: row.get(8)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }
}

fn insert_record_sql(fam: &Family) -> String {
    format!(
        "INSERT INTO {} ({}, session_id, started_at, duration_ms, status,
             error_type, error_message, error_trace)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        fam.records, fam.fk
    )
}

fn used_bytes_on(conn: &Connection) -> rusqlite::Result<u64> {
    let used: i64 = conn.query_row(
        "SELECT (p.page_count - f.freelist_count) * s.page_size
         FROM pragma_page_count() p, pragma_freelist_count() f, pragma_page_size() s",
        [],
        |row| row.get(0),
    )?;
    Ok(u64::try_from(used).unwrap_or(0))
}

fn micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn tally(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let v: i64 = row.get(idx)?;
    Ok(u64::try_from(v).unwrap_or(0))
}

fn ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let v: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(v).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, v))
}

fn opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(v) => DateTime::from_timestamp_micros(v)
            .map(Some)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, v)),
        None => Ok(None),
    }
}

fn key_from_row(row: &Row<'_>, start: usize) -> rusqlite::Result<RegistrationKey> {
    Ok(RegistrationKey {
        app_key: row.get(start)?,
        instance_index: row.get(start + 1)?,
        name: row.get(start + 2)?,
        topic: row.get(start + 3)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let raw: String = row.get(4)?;
    let status = SessionStatus::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            Type::Text,
            Box::new(StoreError::Decode {
                column: "sessions.status",
                value: raw.clone(),
            }),
        )
    })?;
    Ok(Session {
        id: row.get(0)?,
        started_at: ts(row, 1)?,
        stopped_at: opt_ts(row, 2)?,
        last_heartbeat_at: ts(row, 3)?,
        status,
        error_type: row.get(5)?,
        error_message: row.get(6)?,
        error_trace: row.get(7)?,
    })
}
