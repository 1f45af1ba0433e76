//! Recurring sync schedules.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::{Store, now_ts, opt_ts_to_dt, ts_to_dt};
use crate::error::{ControlError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetType {
    All,
    Specific,
    Filter,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::Specific => "SPECIFIC",
            Self::Filter => "FILTER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ALL" => Some(Self::All),
            "SPECIFIC" => Some(Self::Specific),
            "FILTER" => Some(Self::Filter),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RestartStrategy {
    Sequential,
    Rolling,
    Parallel,
}

impl RestartStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "SEQUENTIAL",
            Self::Rolling => "ROLLING",
            Self::Parallel => "PARALLEL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SEQUENTIAL" => Some(Self::Sequential),
            "ROLLING" => Some(Self::Rolling),
            "PARALLEL" => Some(Self::Parallel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOutcome {
    Succeeded,
    Failed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Schedule {
    pub id: i64,
    pub name: String,
    pub cron_expression: String,
    pub enabled: bool,
    pub target_type: TargetType,
    /// Node ids when SPECIFIC; role names when FILTER; ignored for ALL.
    pub target_nodes: Vec<String>,
    pub restart_after_sync: bool,
    pub restart_strategy: RestartStrategy,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run_status: Option<RunOutcome>,
    pub last_run_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSchedule {
    pub name: String,
    pub cron_expression: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub target_type: TargetType,
    #[serde(default)]
    pub target_nodes: Vec<String>,
    #[serde(default = "default_enabled")]
    pub restart_after_sync: bool,
    pub restart_strategy: RestartStrategy,
}

fn default_enabled() -> bool {
    true
}

fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<Schedule> {
    let targets: String = row.get(5)?;
    Ok(Schedule {
        id: row.get(0)?,
        name: row.get(1)?,
        cron_expression: row.get(2)?,
        enabled: row.get(3)?,
        target_type: TargetType::parse(&row.get::<_, String>(4)?).unwrap_or(TargetType::All),
        target_nodes: serde_json::from_str(&targets).unwrap_or_default(),
        restart_after_sync: row.get(6)?,
        restart_strategy: RestartStrategy::parse(&row.get::<_, String>(7)?)
            .unwrap_or(RestartStrategy::Rolling),
        last_run: opt_ts_to_dt(row.get(8)?),
        next_run: opt_ts_to_dt(row.get(9)?),
        last_run_status: row
            .get::<_, Option<String>>(10)?
            .and_then(|s| RunOutcome::parse(&s)),
        last_run_message: row.get(11)?,
        created_at: ts_to_dt(row.get(12)?),
        updated_at: ts_to_dt(row.get(13)?),
    })
}

const SCHEDULE_COLS: &str = "id, name, cron_expression, enabled, target_type, target_nodes, \
                             restart_after_sync, restart_strategy, last_run, next_run, \
                             last_run_status, last_run_message, created_at, updated_at";

impl Store {
    /// Insert a schedule. The caller has already validated the cron and
    /// computed the first `next_run`.
    pub async fn create_schedule(
        &self,
        new: NewSchedule,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<Schedule> {
        let conn = self.conn.lock().await;
        let now = now_ts();
        conn.execute(
            "INSERT INTO schedules
             (name, cron_expression, enabled, target_type, target_nodes, restart_after_sync,
              restart_strategy, next_run, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                new.name,
                new.cron_expression,
                new.enabled,
                new.target_type.as_str(),
                serde_json::to_string(&new.target_nodes).unwrap_or_else(|_| "[]".into()),
                new.restart_after_sync,
                new.restart_strategy.as_str(),
                next_run.map(|t| t.timestamp()),
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {SCHEDULE_COLS} FROM schedules WHERE id = ?1"),
            params![id],
            schedule_from_row,
        )
        .map_err(Into::into)
    }

    pub async fn get_schedule(&self, id: i64) -> Result<Schedule> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {SCHEDULE_COLS} FROM schedules WHERE id = ?1"),
            params![id],
            schedule_from_row,
        )
        .optional()?
        .ok_or_else(|| ControlError::not_found("schedule", id.to_string()))
    }

    pub async fn list_schedules(&self) -> Result<Vec<Schedule>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare(&format!("SELECT {SCHEDULE_COLS} FROM schedules ORDER BY id"))?;
        let rows = stmt.query_map([], schedule_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Enabled schedules due at or before `now` — the `<=` keeps a schedule
    /// whose `next_run` equals the tick instant from being skipped.
    pub async fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCHEDULE_COLS} FROM schedules
             WHERE enabled = 1 AND next_run IS NOT NULL AND next_run <= ?1
             ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![now.timestamp()], schedule_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub async fn update_schedule(
        &self,
        schedule: &Schedule,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE schedules SET name = ?1, cron_expression = ?2, enabled = ?3,
                    target_type = ?4, target_nodes = ?5, restart_after_sync = ?6,
                    restart_strategy = ?7, next_run = ?8, updated_at = ?9
             WHERE id = ?10",
            params![
                schedule.name,
                schedule.cron_expression,
                schedule.enabled,
                schedule.target_type.as_str(),
                serde_json::to_string(&schedule.target_nodes).unwrap_or_else(|_| "[]".into()),
                schedule.restart_after_sync,
                schedule.restart_strategy.as_str(),
                next_run.map(|t| t.timestamp()),
                now_ts(),
                schedule.id,
            ],
        )?;
        if rows == 0 {
            return Err(ControlError::not_found("schedule", schedule.id.to_string()));
        }
        Ok(())
    }

    pub async fn delete_schedule(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        let rows = conn.execute("DELETE FROM schedules WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(ControlError::not_found("schedule", id.to_string()));
        }
        Ok(())
    }

    /// Write the outcome of one firing. The message is truncated to 200
    /// characters before it reaches the row.
    pub async fn record_schedule_run(
        &self,
        id: i64,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
        outcome: RunOutcome,
        message: &str,
    ) -> Result<()> {
        let truncated: String = message.chars().take(200).collect();
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE schedules SET last_run = ?1, next_run = ?2, last_run_status = ?3,
                    last_run_message = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                last_run.timestamp(),
                next_run.map(|t| t.timestamp()),
                outcome.as_str(),
                truncated,
                now_ts(),
                id,
            ],
        )?;
        Ok(())
    }
}
