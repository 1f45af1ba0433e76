//! SQLite-backed orchestration state.
//!
//! One [`Store`] wraps a single `rusqlite::Connection` behind an async mutex.
//! Every method takes the lock, runs a short transaction, and releases it —
//! there is never a lock held across a transfer or subprocess wait. Schema
//! migration is automatic on open.

pub mod code_source;
pub mod credentials;
pub mod nodes;
pub mod playbook_runs;
pub mod roles;
pub mod schedules;

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use tokio::sync::Mutex;

use crate::error::Result;

pub struct Store {
    pub(crate) conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the control-plane database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        tracing::info!(path = %path.display(), "opening control-plane database");

        let conn = Connection::open(path)?;
        Self::configure_connection(&conn)?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure_connection(&conn)?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA temp_store = MEMORY;",
        )?;
        Ok(())
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS nodes (
                node_id              TEXT PRIMARY KEY,
                ip_address           TEXT NOT NULL,
                hostname             TEXT,
                ssh_user             TEXT,
                ssh_port             INTEGER NOT NULL DEFAULT 22,
                code_status          TEXT NOT NULL DEFAULT 'UNKNOWN',
                current_code_version TEXT NOT NULL DEFAULT '',
                extra_data           TEXT NOT NULL DEFAULT '{}',
                created_at           INTEGER NOT NULL,
                updated_at           INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS roles (
                name            TEXT PRIMARY KEY,
                source_paths    TEXT NOT NULL DEFAULT '[]',
                target_path     TEXT NOT NULL,
                post_sync_cmd   TEXT,
                auto_restart    INTEGER NOT NULL DEFAULT 0,
                systemd_service TEXT
            );

            CREATE TABLE IF NOT EXISTS node_roles (
                node_id         TEXT NOT NULL REFERENCES nodes(node_id) ON DELETE CASCADE,
                role_name       TEXT NOT NULL REFERENCES roles(name) ON DELETE CASCADE,
                assignment_type TEXT NOT NULL DEFAULT 'MANUAL',
                status          TEXT NOT NULL DEFAULT 'PENDING',
                current_version TEXT NOT NULL DEFAULT '',
                last_synced_at  INTEGER,
                PRIMARY KEY (node_id, role_name)
            );

            CREATE TABLE IF NOT EXISTS code_sources (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                node_id           TEXT NOT NULL REFERENCES nodes(node_id) ON DELETE CASCADE,
                repo_path         TEXT NOT NULL,
                last_known_commit TEXT,
                is_active         INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS credentials (
                credential_id      TEXT PRIMARY KEY,
                node_id            TEXT NOT NULL REFERENCES nodes(node_id) ON DELETE CASCADE,
                kind               TEXT NOT NULL CHECK(kind IN ('ssh','tls','vnc')),
                name               TEXT NOT NULL,
                ciphertext         BLOB NOT NULL,
                nonce              BLOB NOT NULL,
                port               INTEGER,
                display_number     INTEGER,
                vnc_port           INTEGER,
                websockify_enabled INTEGER NOT NULL DEFAULT 1,
                tls_common_name    TEXT,
                tls_subject        TEXT,
                tls_issuer         TEXT,
                tls_serial         TEXT,
                tls_not_before     INTEGER,
                tls_not_after      INTEGER,
                tls_san            TEXT,
                tls_fingerprint    TEXT,
                is_active          INTEGER NOT NULL DEFAULT 1,
                last_used          INTEGER,
                created_at         INTEGER NOT NULL,
                updated_at         INTEGER NOT NULL,
                UNIQUE(node_id, name, kind)
            );

            CREATE TABLE IF NOT EXISTS schedules (
                id                 INTEGER PRIMARY KEY AUTOINCREMENT,
                name               TEXT NOT NULL,
                cron_expression    TEXT NOT NULL,
                enabled            INTEGER NOT NULL DEFAULT 1,
                target_type        TEXT NOT NULL DEFAULT 'ALL',
                target_nodes       TEXT NOT NULL DEFAULT '[]',
                restart_after_sync INTEGER NOT NULL DEFAULT 1,
                restart_strategy   TEXT NOT NULL DEFAULT 'ROLLING',
                last_run           INTEGER,
                next_run           INTEGER,
                last_run_status    TEXT,
                last_run_message   TEXT,
                created_at         INTEGER NOT NULL,
                updated_at         INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS playbook_runs (
                run_id        TEXT PRIMARY KEY,
                playbook_name TEXT NOT NULL,
                targets       TEXT NOT NULL DEFAULT '[]',
                tags          TEXT NOT NULL DEFAULT '[]',
                extra_vars    TEXT NOT NULL DEFAULT '{}',
                check_mode    INTEGER NOT NULL DEFAULT 0,
                state         TEXT NOT NULL DEFAULT 'QUEUED',
                return_code   INTEGER,
                output        TEXT NOT NULL DEFAULT '',
                events        TEXT NOT NULL DEFAULT '[]',
                started_at    INTEGER,
                finished_at   INTEGER,
                created_at    INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_code_status ON nodes(code_status);
            CREATE INDEX IF NOT EXISTS idx_node_roles_role ON node_roles(role_name);
            CREATE INDEX IF NOT EXISTS idx_credentials_node ON credentials(node_id);
            CREATE INDEX IF NOT EXISTS idx_schedules_due ON schedules(enabled, next_run);",
        )?;
        Ok(())
    }
}

pub(crate) fn now_ts() -> i64 {
    Utc::now().timestamp()
}

pub(crate) fn ts_to_dt(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

pub(crate) fn opt_ts_to_dt(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.map(ts_to_dt)
}
