//! Encrypted credential rows. Only ciphertext and public metadata live
//! here — encryption happens in the vault before anything reaches this
//! module, and nothing here can decrypt.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::{Store, now_ts, opt_ts_to_dt, ts_to_dt};
use crate::error::{ControlError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    Ssh,
    Tls,
    Vnc,
}

impl CredentialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::Tls => "tls",
            Self::Vnc => "vnc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ssh" => Some(Self::Ssh),
            "tls" => Some(Self::Tls),
            "vnc" => Some(Self::Vnc),
            _ => None,
        }
    }
}

impl std::fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queryable metadata extracted from a TLS credential's server certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsMetadata {
    pub common_name: String,
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// "DNS:..." / "IP:..." entries.
    pub san: Vec<String>,
    /// Lowercase hex SHA-256 of the DER form.
    pub fingerprint: String,
}

#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub credential_id: String,
    pub node_id: String,
    pub kind: CredentialKind,
    pub name: String,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub port: Option<u16>,
    pub display_number: Option<i64>,
    pub vnc_port: Option<u16>,
    pub websockify_enabled: bool,
    pub tls: Option<TlsMetadata>,
    pub is_active: bool,
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Default)]
pub struct CredentialPatch {
    pub secret: Option<(Vec<u8>, Vec<u8>)>, // (ciphertext, nonce)
    pub port: Option<u16>,
    pub display_number: Option<i64>,
    pub vnc_port: Option<u16>,
    pub websockify_enabled: Option<bool>,
    pub tls: Option<TlsMetadata>,
    pub is_active: Option<bool>,
}

const CRED_COLS: &str = "credential_id, node_id, kind, name, ciphertext, nonce, port, \
                         display_number, vnc_port, websockify_enabled, tls_common_name, \
                         tls_subject, tls_issuer, tls_serial, tls_not_before, tls_not_after, \
                         tls_san, tls_fingerprint, is_active, last_used, created_at, updated_at";

fn credential_from_row(row: &Row<'_>) -> rusqlite::Result<CredentialRecord> {
    let kind = CredentialKind::parse(&row.get::<_, String>(2)?).unwrap_or(CredentialKind::Ssh);
    let tls = match (
        row.get::<_, Option<String>>(10)?,
        row.get::<_, Option<String>>(17)?,
    ) {
        (Some(common_name), Some(fingerprint)) => Some(TlsMetadata {
            common_name,
            subject: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
            issuer: row.get::<_, Option<String>>(12)?.unwrap_or_default(),
            serial: row.get::<_, Option<String>>(13)?.unwrap_or_default(),
            not_before: ts_to_dt(row.get::<_, Option<i64>>(14)?.unwrap_or(0)),
            not_after: ts_to_dt(row.get::<_, Option<i64>>(15)?.unwrap_or(0)),
            san: row
                .get::<_, Option<String>>(16)?
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            fingerprint,
        }),
        _ => None,
    };
    Ok(CredentialRecord {
        credential_id: row.get(0)?,
        node_id: row.get(1)?,
        kind,
        name: row.get(3)?,
        ciphertext: row.get(4)?,
        nonce: row.get(5)?,
        port: row.get::<_, Option<i64>>(6)?.map(|p| p as u16),
        display_number: row.get(7)?,
        vnc_port: row.get::<_, Option<i64>>(8)?.map(|p| p as u16),
        websockify_enabled: row.get(9)?,
        tls,
        is_active: row.get(18)?,
        last_used: opt_ts_to_dt(row.get(19)?),
        created_at: ts_to_dt(row.get(20)?),
        updated_at: ts_to_dt(row.get(21)?),
    })
}

impl Store {
    pub async fn insert_credential(&self, rec: &CredentialRecord) -> Result<()> {
        let conn = self.conn.lock().await;

        let node_exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM nodes WHERE node_id = ?1)",
            params![rec.node_id],
            |row| row.get(0),
        )?;
        if !node_exists {
            return Err(ControlError::not_found("node", rec.node_id.clone()));
        }

        let now = now_ts();
        let tls = rec.tls.as_ref();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO credentials
             (credential_id, node_id, kind, name, ciphertext, nonce, port, display_number,
              vnc_port, websockify_enabled, tls_common_name, tls_subject, tls_issuer,
              tls_serial, tls_not_before, tls_not_after, tls_san, tls_fingerprint,
              is_active, last_used, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, NULL, ?20, ?20)",
            params![
                rec.credential_id,
                rec.node_id,
                rec.kind.as_str(),
                rec.name,
                rec.ciphertext,
                rec.nonce,
                rec.port.map(|p| p as i64),
                rec.display_number,
                rec.vnc_port.map(|p| p as i64),
                rec.websockify_enabled,
                tls.map(|t| t.common_name.clone()),
                tls.map(|t| t.subject.clone()),
                tls.map(|t| t.issuer.clone()),
                tls.map(|t| t.serial.clone()),
                tls.map(|t| t.not_before.timestamp()),
                tls.map(|t| t.not_after.timestamp()),
                tls.map(|t| serde_json::to_string(&t.san).unwrap_or_else(|_| "[]".into())),
                tls.map(|t| t.fingerprint.clone()),
                rec.is_active,
                now,
            ],
        )?;
        if inserted == 0 {
            return Err(ControlError::Conflict(format!(
                "credential {} of kind {} already exists for node {}",
                rec.name, rec.kind, rec.node_id
            )));
        }
        Ok(())
    }

    pub async fn get_credential(&self, credential_id: &str) -> Result<CredentialRecord> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {CRED_COLS} FROM credentials WHERE credential_id = ?1"),
            params![credential_id],
            credential_from_row,
        )
        .optional()?
        .ok_or_else(|| ControlError::not_found("credential", credential_id))
    }

    pub async fn list_credentials_by_node(
        &self,
        node_id: &str,
        kind: Option<CredentialKind>,
        active_only: bool,
    ) -> Result<Vec<CredentialRecord>> {
        let conn = self.conn.lock().await;
        let mut sql = format!("SELECT {CRED_COLS} FROM credentials WHERE node_id = ?1");
        if let Some(k) = kind {
            sql.push_str(&format!(" AND kind = '{}'", k.as_str()));
        }
        if active_only {
            sql.push_str(" AND is_active = 1");
        }
        sql.push_str(" ORDER BY name");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![node_id], credential_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Fleet-wide listing of one credential kind, joined with the owning
    /// node's address fields.
    pub async fn list_credential_endpoints(
        &self,
        kind: CredentialKind,
        active_only: bool,
    ) -> Result<Vec<(CredentialRecord, String, Option<String>)>> {
        let conn = self.conn.lock().await;
        // `c.*` matches the schema column order, which is what
        // `credential_from_row` indexes against.
        let mut sql = String::from(
            "SELECT c.*, n.ip_address, n.hostname
             FROM credentials c JOIN nodes n ON n.node_id = c.node_id
             WHERE c.kind = ?1",
        );
        if active_only {
            sql.push_str(" AND c.is_active = 1");
        }
        sql.push_str(" ORDER BY c.node_id, c.name");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![kind.as_str()], |row| {
            let rec = credential_from_row(row)?;
            let ip: String = row.get(22)?;
            let hostname: Option<String> = row.get(23)?;
            Ok((rec, ip, hostname))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub async fn update_credential(
        &self,
        credential_id: &str,
        patch: CredentialPatch,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        let now = now_ts();

        if let Some((ciphertext, nonce)) = &patch.secret {
            conn.execute(
                "UPDATE credentials SET ciphertext = ?1, nonce = ?2, updated_at = ?3
                 WHERE credential_id = ?4",
                params![ciphertext, nonce, now, credential_id],
            )?;
        }
        if let Some(port) = patch.port {
            conn.execute(
                "UPDATE credentials SET port = ?1, updated_at = ?2 WHERE credential_id = ?3",
                params![port as i64, now, credential_id],
            )?;
        }
        if let Some(display) = patch.display_number {
            conn.execute(
                "UPDATE credentials SET display_number = ?1, updated_at = ?2
                 WHERE credential_id = ?3",
                params![display, now, credential_id],
            )?;
        }
        if let Some(vnc_port) = patch.vnc_port {
            conn.execute(
                "UPDATE credentials SET vnc_port = ?1, updated_at = ?2 WHERE credential_id = ?3",
                params![vnc_port as i64, now, credential_id],
            )?;
        }
        if let Some(ws) = patch.websockify_enabled {
            conn.execute(
                "UPDATE credentials SET websockify_enabled = ?1, updated_at = ?2
                 WHERE credential_id = ?3",
                params![ws, now, credential_id],
            )?;
        }
        if let Some(active) = patch.is_active {
            conn.execute(
                "UPDATE credentials SET is_active = ?1, updated_at = ?2 WHERE credential_id = ?3",
                params![active, now, credential_id],
            )?;
        }
        if let Some(tls) = &patch.tls {
            conn.execute(
                "UPDATE credentials SET tls_common_name = ?1, tls_subject = ?2, tls_issuer = ?3,
                        tls_serial = ?4, tls_not_before = ?5, tls_not_after = ?6, tls_san = ?7,
                        tls_fingerprint = ?8, updated_at = ?9
                 WHERE credential_id = ?10",
                params![
                    tls.common_name,
                    tls.subject,
                    tls.issuer,
                    tls.serial,
                    tls.not_before.timestamp(),
                    tls.not_after.timestamp(),
                    serde_json::to_string(&tls.san).unwrap_or_else(|_| "[]".into()),
                    tls.fingerprint,
                    now,
                    credential_id,
                ],
            )?;
        }

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM credentials WHERE credential_id = ?1)",
            params![credential_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(ControlError::not_found("credential", credential_id));
        }
        Ok(())
    }

    pub async fn delete_credential(&self, credential_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "DELETE FROM credentials WHERE credential_id = ?1",
            params![credential_id],
        )?;
        if rows == 0 {
            return Err(ControlError::not_found("credential", credential_id));
        }
        Ok(())
    }

    pub async fn touch_credential(&self, credential_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE credentials SET last_used = ?1 WHERE credential_id = ?2",
            params![now_ts(), credential_id],
        )?;
        Ok(())
    }

    /// Active TLS credentials whose certificate expires within `days`.
    pub async fn list_expiring_tls(&self, days: i64) -> Result<Vec<CredentialRecord>> {
        let threshold = now_ts() + days * 86_400;
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CRED_COLS} FROM credentials
             WHERE kind = 'tls' AND is_active = 1 AND tls_not_after IS NOT NULL
               AND tls_not_after <= ?1
             ORDER BY tls_not_after"
        ))?;
        let rows = stmt.query_map(params![threshold], credential_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
