//! Role catalog: what a role ships, where it lands, and how the service
//! behind it is bounced.

use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::Store;
use crate::error::{ControlError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    /// Paths relative to the cache root. A trailing "/" means "contents of".
    pub source_paths: Vec<String>,
    pub target_path: String,
    pub post_sync_cmd: Option<String>,
    pub auto_restart: bool,
    pub systemd_service: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRole {
    pub name: String,
    #[serde(default)]
    pub source_paths: Vec<String>,
    pub target_path: String,
    #[serde(default)]
    pub post_sync_cmd: Option<String>,
    #[serde(default)]
    pub auto_restart: bool,
    #[serde(default)]
    pub systemd_service: Option<String>,
}

fn role_from_row(row: &Row<'_>) -> rusqlite::Result<Role> {
    let paths: String = row.get(1)?;
    Ok(Role {
        name: row.get(0)?,
        source_paths: serde_json::from_str(&paths).unwrap_or_default(),
        target_path: row.get(2)?,
        post_sync_cmd: row.get(3)?,
        auto_restart: row.get(4)?,
        systemd_service: row.get(5)?,
    })
}

const ROLE_COLS: &str =
    "name, source_paths, target_path, post_sync_cmd, auto_restart, systemd_service";

impl Store {
    pub async fn create_role(&self, new: NewRole) -> Result<Role> {
        if new.name.trim().is_empty() {
            return Err(ControlError::Validation("role name is empty".into()));
        }
        let conn = self.conn.lock().await;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO roles
             (name, source_paths, target_path, post_sync_cmd, auto_restart, systemd_service)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new.name,
                serde_json::to_string(&new.source_paths).unwrap_or_else(|_| "[]".into()),
                new.target_path,
                new.post_sync_cmd,
                new.auto_restart,
                new.systemd_service,
            ],
        )?;
        if inserted == 0 {
            return Err(ControlError::Conflict(format!(
                "role already exists: {}",
                new.name
            )));
        }
        conn.query_row(
            &format!("SELECT {ROLE_COLS} FROM roles WHERE name = ?1"),
            params![new.name],
            role_from_row,
        )
        .map_err(Into::into)
    }

    pub async fn get_role(&self, name: &str) -> Result<Role> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {ROLE_COLS} FROM roles WHERE name = ?1"),
            params![name],
            role_from_row,
        )
        .optional()?
        .ok_or_else(|| ControlError::not_found("role", name))
    }

    pub async fn list_roles(&self) -> Result<Vec<Role>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!("SELECT {ROLE_COLS} FROM roles ORDER BY name"))?;
        let rows = stmt.query_map([], role_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub async fn update_role(&self, role: &Role) -> Result<()> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE roles SET source_paths = ?1, target_path = ?2, post_sync_cmd = ?3,
                    auto_restart = ?4, systemd_service = ?5
             WHERE name = ?6",
            params![
                serde_json::to_string(&role.source_paths).unwrap_or_else(|_| "[]".into()),
                role.target_path,
                role.post_sync_cmd,
                role.auto_restart,
                role.systemd_service,
                role.name,
            ],
        )?;
        if rows == 0 {
            return Err(ControlError::not_found("role", role.name.clone()));
        }
        Ok(())
    }

    pub async fn delete_role(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        let rows = conn.execute("DELETE FROM roles WHERE name = ?1", params![name])?;
        if rows == 0 {
            return Err(ControlError::not_found("role", name));
        }
        Ok(())
    }
}
