//! SQLite schema. Timestamps are UTC microseconds, durations are `REAL` milliseconds.

use rusqlite::Connection;

pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at        INTEGER NOT NULL,
    stopped_at        INTEGER,
    last_heartbeat_at INTEGER NOT NULL,
    status            TEXT    NOT NULL,
    error_type        TEXT,
    error_message     TEXT,
    error_trace       TEXT
);
CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions (status);

CREATE TABLE IF NOT EXISTS listeners (
    id                  INTEGER PRIMARY KEY,
    app_key             TEXT    NOT NULL,
    instance_index      INTEGER NOT NULL,
    handler_name        TEXT    NOT NULL,
    topic               TEXT    NOT NULL DEFAULT '',
    debounce_ms         REAL,
    throttle_ms         REAL,
    once                INTEGER NOT NULL DEFAULT 0,
    priority            INTEGER NOT NULL DEFAULT 0,
    predicate           TEXT,
    source_location     TEXT,
    first_registered_at INTEGER NOT NULL,
    last_registered_at  INTEGER NOT NULL,
    UNIQUE (app_key, instance_index, handler_name, topic)
);

CREATE TABLE IF NOT EXISTS scheduled_jobs (
    id                  INTEGER PRIMARY KEY,
    app_key             TEXT    NOT NULL,
    instance_index      INTEGER NOT NULL,
    job_name            TEXT    NOT NULL,
    topic               TEXT    NOT NULL DEFAULT '',
    handler_name        TEXT    NOT NULL,
    trigger_type        TEXT    NOT NULL,
    trigger_description TEXT,
    repeats             INTEGER NOT NULL DEFAULT 0,
    source_location     TEXT,
    first_registered_at INTEGER NOT NULL,
    last_registered_at  INTEGER NOT NULL,
    UNIQUE (app_key, instance_index, job_name, topic)
);

CREATE TABLE IF NOT EXISTS handler_invocations (
    id            INTEGER PRIMARY KEY,
    listener_id   INTEGER NOT NULL REFERENCES listeners (id),
    session_id    INTEGER NOT NULL REFERENCES sessions (id),
    started_at    INTEGER NOT NULL,
    duration_ms   REAL    NOT NULL,
    status        TEXT    NOT NULL,
    error_type    TEXT,
    error_message TEXT,
    error_trace   TEXT
);
CREATE INDEX IF NOT EXISTS idx_handler_invocations_started_at
    ON handler_invocations (started_at);
CREATE INDEX IF NOT EXISTS idx_handler_invocations_listener
    ON handler_invocations (listener_id, started_at);

CREATE TABLE IF NOT EXISTS job_executions (
    id            INTEGER PRIMARY KEY,
    job_id        INTEGER NOT NULL REFERENCES scheduled_jobs (id),
    session_id    INTEGER NOT NULL REFERENCES sessions (id),
    started_at    INTEGER NOT NULL,
    duration_ms   REAL    NOT NULL,
    status        TEXT    NOT NULL,
    error_type    TEXT,
    error_message TEXT,
    error_trace   TEXT
);
CREATE INDEX IF NOT EXISTS idx_job_executions_started_at
    ON job_executions (started_at);
CREATE INDEX IF NOT EXISTS idx_job_executions_job
    ON job_executions (job_id, started_at);
";

/// Applies connection pragmas and creates missing tables.
pub(crate) fn apply(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA synchronous = NORMAL;")?;
    conn.execute_batch(SCHEMA)
}
