//! Playbook run records: one row per operator-triggered execution.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::{Store, now_ts, opt_ts_to_dt};
use crate::error::{ControlError, Result};
use crate::playbook::progress::ProgressEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaybookRunState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl PlaybookRunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(Self::Queued),
            "RUNNING" => Some(Self::Running),
            "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaybookRun {
    pub run_id: String,
    pub playbook_name: String,
    pub targets: Vec<String>,
    pub tags: Vec<String>,
    pub extra_vars: BTreeMap<String, String>,
    pub check_mode: bool,
    pub state: PlaybookRunState,
    pub return_code: Option<i32>,
    pub output: String,
    pub events: Vec<ProgressEvent>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<PlaybookRun> {
    let targets: String = row.get(2)?;
    let tags: String = row.get(3)?;
    let extra_vars: String = row.get(4)?;
    let events: String = row.get(9)?;
    Ok(PlaybookRun {
        run_id: row.get(0)?,
        playbook_name: row.get(1)?,
        targets: serde_json::from_str(&targets).unwrap_or_default(),
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        extra_vars: serde_json::from_str(&extra_vars).unwrap_or_default(),
        check_mode: row.get(5)?,
        state: PlaybookRunState::parse(&row.get::<_, String>(6)?)
            .unwrap_or(PlaybookRunState::Failed),
        return_code: row.get(7)?,
        output: row.get(8)?,
        events: serde_json::from_str(&events).unwrap_or_default(),
        started_at: opt_ts_to_dt(row.get(10)?),
        finished_at: opt_ts_to_dt(row.get(11)?),
    })
}

const RUN_COLS: &str = "run_id, playbook_name, targets, tags, extra_vars, check_mode, state, \
                        return_code, output, events, started_at, finished_at";

impl Store {
    pub async fn insert_playbook_run(&self, run: &PlaybookRun) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO playbook_runs
             (run_id, playbook_name, targets, tags, extra_vars, check_mode, state, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.run_id,
                run.playbook_name,
                serde_json::to_string(&run.targets).unwrap_or_else(|_| "[]".into()),
                serde_json::to_string(&run.tags).unwrap_or_else(|_| "[]".into()),
                serde_json::to_string(&run.extra_vars).unwrap_or_else(|_| "{}".into()),
                run.check_mode,
                run.state.as_str(),
                now_ts(),
            ],
        )?;
        Ok(())
    }

    pub async fn get_playbook_run(&self, run_id: &str) -> Result<PlaybookRun> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {RUN_COLS} FROM playbook_runs WHERE run_id = ?1"),
            params![run_id],
            run_from_row,
        )
        .optional()?
        .ok_or_else(|| ControlError::not_found("playbook run", run_id))
    }

    pub async fn list_playbook_runs(&self, limit: usize) -> Result<Vec<PlaybookRun>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLS} FROM playbook_runs ORDER BY created_at DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], run_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub async fn mark_run_started(&self, run_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE playbook_runs SET state = 'RUNNING', started_at = ?1 WHERE run_id = ?2",
            params![now_ts(), run_id],
        )?;
        Ok(())
    }

    /// Rewrite the accumulated event list mid-run.
    pub async fn update_run_events(&self, run_id: &str, events: &[ProgressEvent]) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE playbook_runs SET events = ?1 WHERE run_id = ?2",
            params![
                serde_json::to_string(events).unwrap_or_else(|_| "[]".into()),
                run_id
            ],
        )?;
        Ok(())
    }

    pub async fn finish_run(
        &self,
        run_id: &str,
        state: PlaybookRunState,
        return_code: Option<i32>,
        output: &str,
        events: &[ProgressEvent],
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE playbook_runs SET state = ?1, return_code = ?2, output = ?3, events = ?4,
                    finished_at = ?5
             WHERE run_id = ?6",
            params![
                state.as_str(),
                return_code,
                output,
                serde_json::to_string(events).unwrap_or_else(|_| "[]".into()),
                now_ts(),
                run_id,
            ],
        )?;
        Ok(())
    }
}
