//! The designated code-source node. At most one row is active; switching
//! deactivates the previous row in the same transaction.

use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;

use super::Store;
use crate::error::{ControlError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct CodeSource {
    pub id: i64,
    pub node_id: String,
    pub repo_path: String,
    pub last_known_commit: Option<String>,
    pub is_active: bool,
}

fn source_from_row(row: &Row<'_>) -> rusqlite::Result<CodeSource> {
    Ok(CodeSource {
        id: row.get(0)?,
        node_id: row.get(1)?,
        repo_path: row.get(2)?,
        last_known_commit: row.get(3)?,
        is_active: row.get(4)?,
    })
}

impl Store {
    pub async fn active_code_source(&self) -> Result<Option<CodeSource>> {
        let conn = self.conn.lock().await;
        Ok(conn
            .query_row(
                "SELECT id, node_id, repo_path, last_known_commit, is_active
                 FROM code_sources WHERE is_active = 1",
                [],
                source_from_row,
            )
            .optional()?)
    }

    /// Point the fleet at a new code source. The previously active row is
    /// deactivated inside the same transaction, so there is never a moment
    /// with two active sources.
    pub async fn set_active_code_source(
        &self,
        node_id: &str,
        repo_path: &str,
        last_known_commit: Option<&str>,
    ) -> Result<CodeSource> {
        if !repo_path.starts_with('/') {
            return Err(ControlError::Validation(format!(
                "repo_path must be absolute: {repo_path}"
            )));
        }
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let node_exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM nodes WHERE node_id = ?1)",
            params![node_id],
            |row| row.get(0),
        )?;
        if !node_exists {
            return Err(ControlError::not_found("node", node_id));
        }

        tx.execute("UPDATE code_sources SET is_active = 0 WHERE is_active = 1", [])?;
        tx.execute(
            "INSERT INTO code_sources (node_id, repo_path, last_known_commit, is_active)
             VALUES (?1, ?2, ?3, 1)",
            params![node_id, repo_path, last_known_commit],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        conn.query_row(
            "SELECT id, node_id, repo_path, last_known_commit, is_active
             FROM code_sources WHERE id = ?1",
            params![id],
            source_from_row,
        )
        .map_err(Into::into)
    }

    pub async fn set_last_known_commit(&self, id: i64, commit: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE code_sources SET last_known_commit = ?1 WHERE id = ?2",
            params![commit, id],
        )?;
        Ok(())
    }
}
