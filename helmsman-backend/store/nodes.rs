//! Node registry rows and role assignments.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::{Store, now_ts, opt_ts_to_dt, ts_to_dt};
use crate::error::{ControlError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CodeStatus {
    UpToDate,
    Outdated,
    Syncing,
    Failed,
    Unknown,
}

impl CodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpToDate => "UP_TO_DATE",
            Self::Outdated => "OUTDATED",
            Self::Syncing => "SYNCING",
            Self::Failed => "FAILED",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UP_TO_DATE" => Some(Self::UpToDate),
            "OUTDATED" => Some(Self::Outdated),
            "SYNCING" => Some(Self::Syncing),
            "FAILED" => Some(Self::Failed),
            "UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentType {
    Auto,
    Manual,
}

impl AssignmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Manual => "MANUAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AUTO" => Some(Self::Auto),
            "MANUAL" => Some(Self::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleStatus {
    Pending,
    Syncing,
    Active,
    Failed,
    Disabled,
}

impl RoleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Syncing => "SYNCING",
            Self::Active => "ACTIVE",
            Self::Failed => "FAILED",
            Self::Disabled => "DISABLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "SYNCING" => Some(Self::Syncing),
            "ACTIVE" => Some(Self::Active),
            "FAILED" => Some(Self::Failed),
            "DISABLED" => Some(Self::Disabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub ip_address: String,
    pub hostname: Option<String>,
    pub ssh_user: Option<String>,
    pub ssh_port: u16,
    pub code_status: CodeStatus,
    pub current_code_version: String,
    pub extra_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registration payload — everything the caller chooses; the rest defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct NewNode {
    pub node_id: String,
    pub ip_address: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub ssh_user: Option<String>,
    #[serde(default)]
    pub ssh_port: Option<u16>,
    #[serde(default)]
    pub extra_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeRole {
    pub node_id: String,
    pub role_name: String,
    pub assignment_type: AssignmentType,
    pub status: RoleStatus,
    pub current_version: String,
    pub last_synced_at: Option<DateTime<Utc>>,
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<Node> {
    let extra: String = row.get(7)?;
    Ok(Node {
        node_id: row.get(0)?,
        ip_address: row.get(1)?,
        hostname: row.get(2)?,
        ssh_user: row.get(3)?,
        ssh_port: row.get::<_, i64>(4)? as u16,
        code_status: CodeStatus::parse(&row.get::<_, String>(5)?).unwrap_or(CodeStatus::Unknown),
        current_code_version: row.get(6)?,
        extra_data: serde_json::from_str(&extra).unwrap_or_else(|_| serde_json::json!({})),
        created_at: ts_to_dt(row.get(8)?),
        updated_at: ts_to_dt(row.get(9)?),
    })
}

fn node_role_from_row(row: &Row<'_>) -> rusqlite::Result<NodeRole> {
    Ok(NodeRole {
        node_id: row.get(0)?,
        role_name: row.get(1)?,
        assignment_type: AssignmentType::parse(&row.get::<_, String>(2)?)
            .unwrap_or(AssignmentType::Manual),
        status: RoleStatus::parse(&row.get::<_, String>(3)?).unwrap_or(RoleStatus::Pending),
        current_version: row.get(4)?,
        last_synced_at: opt_ts_to_dt(row.get(5)?),
    })
}

const NODE_COLS: &str = "node_id, ip_address, hostname, ssh_user, ssh_port, code_status, \
                         current_code_version, extra_data, created_at, updated_at";

const NODE_ROLE_COLS: &str =
    "node_id, role_name, assignment_type, status, current_version, last_synced_at";

impl Store {
    pub async fn register_node(&self, new: NewNode) -> Result<Node> {
        let conn = self.conn.lock().await;
        let now = now_ts();
        let extra = new
            .extra_data
            .unwrap_or_else(|| serde_json::json!({}))
            .to_string();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO nodes
             (node_id, ip_address, hostname, ssh_user, ssh_port, code_status,
              current_code_version, extra_data, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'UNKNOWN', '', ?6, ?7, ?7)",
            params![
                new.node_id,
                new.ip_address,
                new.hostname,
                new.ssh_user,
                new.ssh_port.unwrap_or(22) as i64,
                extra,
                now,
            ],
        )?;
        if inserted == 0 {
            return Err(ControlError::Conflict(format!(
                "node already registered: {}",
                new.node_id
            )));
        }
        drop(conn);
        self.get_node(&new.node_id).await
    }

    pub async fn get_node(&self, node_id: &str) -> Result<Node> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {NODE_COLS} FROM nodes WHERE node_id = ?1"),
            params![node_id],
            node_from_row,
        )
        .optional()?
        .ok_or_else(|| ControlError::not_found("node", node_id))
    }

    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare(&format!("SELECT {NODE_COLS} FROM nodes ORDER BY node_id"))?;
        let rows = stmt.query_map([], node_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub async fn delete_node(&self, node_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        let rows = conn.execute("DELETE FROM nodes WHERE node_id = ?1", params![node_id])?;
        if rows == 0 {
            return Err(ControlError::not_found("node", node_id));
        }
        Ok(())
    }

    /// Flip a node's code status; `version` also updates
    /// `current_code_version` when given.
    pub async fn set_code_status(
        &self,
        node_id: &str,
        status: CodeStatus,
        version: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        let rows = match version {
            Some(v) => conn.execute(
                "UPDATE nodes SET code_status = ?1, current_code_version = ?2, updated_at = ?3
                 WHERE node_id = ?4",
                params![status.as_str(), v, now_ts(), node_id],
            )?,
            None => conn.execute(
                "UPDATE nodes SET code_status = ?1, updated_at = ?2 WHERE node_id = ?3",
                params![status.as_str(), now_ts(), node_id],
            )?,
        };
        if rows == 0 {
            return Err(ControlError::not_found("node", node_id));
        }
        Ok(())
    }

    pub async fn set_extra_data(&self, node_id: &str, extra: &serde_json::Value) -> Result<()> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE nodes SET extra_data = ?1, updated_at = ?2 WHERE node_id = ?3",
            params![extra.to_string(), now_ts(), node_id],
        )?;
        if rows == 0 {
            return Err(ControlError::not_found("node", node_id));
        }
        Ok(())
    }

    /// All outdated nodes, in stable id order (fan-out processes them in the
    /// order returned here).
    pub async fn list_outdated(&self) -> Result<Vec<Node>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {NODE_COLS} FROM nodes WHERE code_status = 'OUTDATED' ORDER BY node_id"
        ))?;
        let rows = stmt.query_map([], node_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub async fn list_outdated_in(&self, node_ids: &[String]) -> Result<Vec<Node>> {
        let all = self.list_outdated().await?;
        Ok(all
            .into_iter()
            .filter(|n| node_ids.contains(&n.node_id))
            .collect())
    }

    /// Outdated nodes assigned any of the given roles.
    pub async fn list_outdated_with_roles(&self, role_names: &[String]) -> Result<Vec<Node>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT n.node_id, n.ip_address, n.hostname, n.ssh_user, n.ssh_port,
                    n.code_status, n.current_code_version, n.extra_data, n.created_at, n.updated_at
             FROM nodes n JOIN node_roles nr ON nr.node_id = n.node_id
             WHERE n.code_status = 'OUTDATED'
             ORDER BY n.node_id",
        )?;
        let rows = stmt.query_map([], node_from_row)?;
        let mut nodes = Vec::new();
        for node in rows {
            nodes.push(node?);
        }
        drop(stmt);

        // Filter by role membership in a second pass; the candidate sets are
        // small (a fleet, not a datacenter).
        let mut kept = Vec::new();
        for node in nodes {
            let mut stmt = conn.prepare(
                "SELECT role_name FROM node_roles WHERE node_id = ?1 ORDER BY role_name",
            )?;
            let assigned: Vec<String> = stmt
                .query_map(params![node.node_id], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            if assigned.iter().any(|r| role_names.contains(r)) {
                kept.push(node);
            }
        }
        Ok(kept)
    }

    // -- Role assignments ---------------------------------------------------

    pub async fn assign_role(
        &self,
        node_id: &str,
        role_name: &str,
        assignment_type: AssignmentType,
    ) -> Result<NodeRole> {
        let conn = self.conn.lock().await;
        let node_exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM nodes WHERE node_id = ?1)",
            params![node_id],
            |row| row.get(0),
        )?;
        if !node_exists {
            return Err(ControlError::not_found("node", node_id));
        }
        let role_exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM roles WHERE name = ?1)",
            params![role_name],
            |row| row.get(0),
        )?;
        if !role_exists {
            return Err(ControlError::not_found("role", role_name));
        }

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO node_roles (node_id, role_name, assignment_type, status)
             VALUES (?1, ?2, ?3, 'PENDING')",
            params![node_id, role_name, assignment_type.as_str()],
        )?;
        if inserted == 0 {
            return Err(ControlError::Conflict(format!(
                "role {role_name} already assigned to {node_id}"
            )));
        }
        conn.query_row(
            &format!(
                "SELECT {NODE_ROLE_COLS} FROM node_roles WHERE node_id = ?1 AND role_name = ?2"
            ),
            params![node_id, role_name],
            node_role_from_row,
        )
        .map_err(Into::into)
    }

    pub async fn unassign_role(&self, node_id: &str, role_name: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "DELETE FROM node_roles WHERE node_id = ?1 AND role_name = ?2",
            params![node_id, role_name],
        )?;
        if rows == 0 {
            return Err(ControlError::not_found("assignment", role_name));
        }
        Ok(())
    }

    /// A node's assignments, in assignment (role-name) order — the order
    /// fan-out syncs them in.
    pub async fn list_node_roles(&self, node_id: &str) -> Result<Vec<NodeRole>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {NODE_ROLE_COLS} FROM node_roles WHERE node_id = ?1 ORDER BY role_name"
        ))?;
        let rows = stmt.query_map(params![node_id], node_role_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub async fn get_node_role(&self, node_id: &str, role_name: &str) -> Result<Option<NodeRole>> {
        let conn = self.conn.lock().await;
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {NODE_ROLE_COLS} FROM node_roles WHERE node_id = ?1 AND role_name = ?2"
                ),
                params![node_id, role_name],
                node_role_from_row,
            )
            .optional()?)
    }

    pub async fn set_node_role_status(
        &self,
        node_id: &str,
        role_name: &str,
        status: RoleStatus,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE node_roles SET status = ?1 WHERE node_id = ?2 AND role_name = ?3",
            params![status.as_str(), node_id, role_name],
        )?;
        Ok(())
    }

    /// Record a completed sync: the assignment becomes ACTIVE at `commit`,
    /// creating an AUTO assignment row when none exists yet.
    pub async fn record_role_synced(
        &self,
        node_id: &str,
        role_name: &str,
        commit: &str,
    ) -> Result<NodeRole> {
        let conn = self.conn.lock().await;
        let now = now_ts();
        conn.execute(
            "INSERT INTO node_roles
               (node_id, role_name, assignment_type, status, current_version, last_synced_at)
             VALUES (?1, ?2, 'AUTO', 'ACTIVE', ?3, ?4)
             ON CONFLICT(node_id, role_name) DO UPDATE SET
               status = 'ACTIVE', current_version = ?3, last_synced_at = ?4",
            params![node_id, role_name, commit, now],
        )?;
        conn.query_row(
            &format!(
                "SELECT {NODE_ROLE_COLS} FROM node_roles WHERE node_id = ?1 AND role_name = ?2"
            ),
            params![node_id, role_name],
            node_role_from_row,
        )
        .map_err(Into::into)
    }
}
