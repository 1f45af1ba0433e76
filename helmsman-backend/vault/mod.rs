//! Credential vault: encrypted-at-rest node secrets with one-time access
//! tokens.
//!
//! Plaintext enters through `create`/`update` and leaves only through
//! `exchange_token`. Every read path returns [`CredentialPublic`], which has
//! no secret material in it.

pub mod crypto;
pub mod tls;
pub mod tokens;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ControlError, Result};
use crate::store::Store;
use crate::store::credentials::{
    CredentialKind, CredentialPatch, CredentialRecord, TlsMetadata,
};
use crypto::SecretBox;
use tokens::TokenStore;

pub const VNC_BASE_PORT: u16 = 5900;
pub const DEFAULT_DISPLAY_NUMBER: i64 = 1;

/// Non-secret projection of a credential row.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialPublic {
    pub credential_id: String,
    pub node_id: String,
    pub kind: CredentialKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vnc_port: Option<u16>,
    pub websockify_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsMetadata>,
    pub is_active: bool,
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CredentialRecord> for CredentialPublic {
    fn from(rec: CredentialRecord) -> Self {
        Self {
            credential_id: rec.credential_id,
            node_id: rec.node_id,
            kind: rec.kind,
            name: rec.name,
            port: rec.port,
            display_number: rec.display_number,
            vnc_port: rec.vnc_port,
            websockify_enabled: rec.websockify_enabled,
            tls: rec.tls,
            is_active: rec.is_active,
            last_used: rec.last_used,
            created_at: rec.created_at,
            updated_at: rec.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub credential_id: String,
    pub node_id: String,
    pub kind: CredentialKind,
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FleetEndpoint {
    pub credential_id: String,
    pub node_id: String,
    pub ip_address: String,
    pub hostname: Option<String>,
    pub kind: CredentialKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_until_expiry: Option<i64>,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct CreateCredential {
    pub node_id: String,
    pub kind: CredentialKind,
    pub name: String,
    /// Kind-specific plaintext fields; encrypted before persistence.
    pub secret: serde_json::Value,
    pub port: Option<u16>,
    pub display_number: Option<i64>,
    pub vnc_port: Option<u16>,
    pub websockify_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateCredential {
    pub secret: Option<serde_json::Value>,
    pub port: Option<u16>,
    pub display_number: Option<i64>,
    pub vnc_port: Option<u16>,
    pub websockify_enabled: Option<bool>,
    pub is_active: Option<bool>,
}

pub struct CredentialVault {
    store: Arc<Store>,
    secret_box: SecretBox,
    tokens: TokenStore,
}

impl CredentialVault {
    pub fn new(store: Arc<Store>, key: &[u8; 32]) -> Self {
        Self {
            store,
            secret_box: SecretBox::new(key),
            tokens: TokenStore::new(),
        }
    }

    pub async fn create(&self, req: CreateCredential) -> Result<CredentialPublic> {
        // Node must exist before anything is encrypted or persisted.
        let node = self.store.get_node(&req.node_id).await?;

        if req.name.trim().is_empty() {
            return Err(ControlError::Validation("credential name is empty".into()));
        }

        let mut tls_meta = None;
        let mut port = req.port;
        let mut display_number = None;
        let mut vnc_port = None;

        match req.kind {
            CredentialKind::Ssh => {
                validate_ssh_secret(&req.secret)?;
                if port.is_none() {
                    port = Some(node.ssh_port);
                }
            }
            CredentialKind::Tls => {
                let server_cert = req
                    .secret
                    .get("server_cert")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        ControlError::Validation("tls credential requires server_cert".into())
                    })?;
                tls_meta = Some(tls::parse_certificate(server_cert)?);
            }
            CredentialKind::Vnc => {
                if req.secret.get("password").and_then(|v| v.as_str()).is_none() {
                    return Err(ControlError::Validation(
                        "vnc credential requires password".into(),
                    ));
                }
                let display = req.display_number.unwrap_or(DEFAULT_DISPLAY_NUMBER);
                display_number = Some(display);
                let derived = req.vnc_port.unwrap_or(derive_vnc_port(display)?);
                vnc_port = Some(derived);
                if port.is_none() {
                    port = Some(derived);
                }
            }
        }

        let plaintext = serde_json::to_vec(&req.secret)
            .map_err(|e| ControlError::Internal(format!("secret serialization: {e}")))?;
        let (nonce, ciphertext) = self.secret_box.encrypt(&plaintext)?;

        let rec = CredentialRecord {
            credential_id: uuid::Uuid::new_v4().to_string(),
            node_id: req.node_id,
            kind: req.kind,
            name: req.name,
            ciphertext,
            nonce,
            port,
            display_number,
            vnc_port,
            websockify_enabled: req.websockify_enabled.unwrap_or(true),
            tls: tls_meta,
            is_active: true,
            last_used: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.store.insert_credential(&rec).await?;

        tracing::info!(
            credential_id = %rec.credential_id,
            node_id = %rec.node_id,
            kind = %rec.kind,
            "created credential"
        );
        Ok(self.store.get_credential(&rec.credential_id).await?.into())
    }

    pub async fn update(
        &self,
        credential_id: &str,
        update: UpdateCredential,
    ) -> Result<CredentialPublic> {
        let existing = self.store.get_credential(credential_id).await?;
        let mut patch = CredentialPatch {
            port: update.port,
            display_number: update.display_number,
            vnc_port: update.vnc_port,
            websockify_enabled: update.websockify_enabled,
            is_active: update.is_active,
            ..Default::default()
        };

        if let Some(new_secret) = update.secret {
            let merged = match existing.kind {
                // TLS secrets are a three-part bundle; a partial update
                // merges into the decrypted blob and re-parses metadata
                // before anything is written back.
                CredentialKind::Tls => {
                    let mut current = self.decrypt_secret(&existing)?;
                    let obj = current.as_object_mut().ok_or(ControlError::Decrypt)?;
                    let new_obj = new_secret.as_object().ok_or_else(|| {
                        ControlError::Validation("tls secret must be an object".into())
                    })?;
                    for (k, v) in new_obj {
                        obj.insert(k.clone(), v.clone());
                    }
                    if let Some(server_cert) =
                        new_secret.get("server_cert").and_then(|v| v.as_str())
                    {
                        patch.tls = Some(tls::parse_certificate(server_cert)?);
                    }
                    current
                }
                CredentialKind::Ssh => {
                    validate_ssh_secret(&new_secret)?;
                    new_secret
                }
                CredentialKind::Vnc => {
                    if new_secret.get("password").and_then(|v| v.as_str()).is_none() {
                        return Err(ControlError::Validation(
                            "vnc credential requires password".into(),
                        ));
                    }
                    new_secret
                }
            };
            let plaintext = serde_json::to_vec(&merged)
                .map_err(|e| ControlError::Internal(format!("secret serialization: {e}")))?;
            patch.secret = Some({
                let (nonce, ciphertext) = self.secret_box.encrypt(&plaintext)?;
                (ciphertext, nonce)
            });
        }

        // Moving the display without pinning a port re-derives 5900+display.
        if existing.kind == CredentialKind::Vnc {
            if let (Some(display), None) = (update.display_number, update.vnc_port) {
                patch.vnc_port = Some(derive_vnc_port(display)?);
            }
        }

        self.store.update_credential(credential_id, patch).await?;
        tracing::info!(credential_id = %credential_id, "updated credential");
        Ok(self.store.get_credential(credential_id).await?.into())
    }

    pub async fn delete(&self, credential_id: &str) -> Result<()> {
        self.store.delete_credential(credential_id).await?;
        tracing::info!(credential_id = %credential_id, "deleted credential");
        Ok(())
    }

    pub async fn get_public(&self, credential_id: &str) -> Result<CredentialPublic> {
        Ok(self.store.get_credential(credential_id).await?.into())
    }

    pub async fn list_by_node(
        &self,
        node_id: &str,
        kind: Option<CredentialKind>,
        active_only: bool,
    ) -> Result<Vec<CredentialPublic>> {
        // Listing an unknown node is a 404, not an empty list.
        self.store.get_node(node_id).await?;
        Ok(self
            .store
            .list_credentials_by_node(node_id, kind, active_only)
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    pub async fn list_fleet_endpoints(
        &self,
        kind: CredentialKind,
        active_only: bool,
    ) -> Result<Vec<FleetEndpoint>> {
        let now = Utc::now();
        Ok(self
            .store
            .list_credential_endpoints(kind, active_only)
            .await?
            .into_iter()
            .map(|(rec, ip_address, hostname)| {
                let websocket_url = websocket_url(&rec, &ip_address);
                let expires_at = rec.tls.as_ref().map(|t| t.not_after);
                FleetEndpoint {
                    credential_id: rec.credential_id,
                    node_id: rec.node_id,
                    ip_address,
                    hostname,
                    kind: rec.kind,
                    name: rec.name,
                    port: rec.port,
                    websocket_url,
                    common_name: rec.tls.as_ref().map(|t| t.common_name.clone()),
                    expires_at,
                    days_until_expiry: expires_at.map(|e| (e - now).num_days()),
                    is_active: rec.is_active,
                }
            })
            .collect())
    }

    pub async fn list_expiring_tls(&self, days: i64) -> Result<Vec<CredentialPublic>> {
        Ok(self
            .store
            .list_expiring_tls(days)
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    /// Public connection fields, optionally with a freshly minted one-time
    /// token. Touches `last_used`.
    pub async fn connection_info(
        &self,
        credential_id: &str,
        issue_token: bool,
    ) -> Result<ConnectionInfo> {
        let rec = self.store.get_credential(credential_id).await?;
        if !rec.is_active {
            return Err(ControlError::not_found("credential", credential_id));
        }
        let node = self.store.get_node(&rec.node_id).await?;

        let (token, token_expires_at) = if issue_token {
            let (t, exp) = self.tokens.issue(credential_id).await?;
            (Some(t), Some(exp))
        } else {
            (None, None)
        };

        self.store.touch_credential(credential_id).await?;

        Ok(ConnectionInfo {
            credential_id: rec.credential_id.clone(),
            node_id: rec.node_id.clone(),
            kind: rec.kind,
            host: node.ip_address.clone(),
            port: rec.port,
            display_number: rec.display_number,
            websocket_url: websocket_url(&rec, &node.ip_address),
            token,
            token_expires_at,
        })
    }

    /// The single plaintext egress. Atomic single-use semantics live in the
    /// token store; this adds decryption and `last_used`.
    pub async fn exchange_token(&self, token: &str) -> Result<serde_json::Value> {
        let credential_id = self.tokens.exchange(token).await?;
        let rec = self.store.get_credential(&credential_id).await?;
        let secret = self.decrypt_secret(&rec)?;
        self.store.touch_credential(&credential_id).await?;
        Ok(secret)
    }

    fn decrypt_secret(&self, rec: &CredentialRecord) -> Result<serde_json::Value> {
        let plaintext = self.secret_box.decrypt(&rec.nonce, &rec.ciphertext)?;
        serde_json::from_slice(&plaintext).map_err(|_| ControlError::Decrypt)
    }
}

fn validate_ssh_secret(secret: &serde_json::Value) -> Result<()> {
    let username = secret.get("username").and_then(|v| v.as_str());
    if username.map_or(true, |u| u.trim().is_empty()) {
        return Err(ControlError::Validation(
            "ssh credential requires username".into(),
        ));
    }
    let has_password = secret.get("password").and_then(|v| v.as_str()).is_some();
    let has_key = secret.get("private_key").and_then(|v| v.as_str()).is_some();
    if !has_password && !has_key {
        return Err(ControlError::Validation(
            "ssh credential requires password or private_key".into(),
        ));
    }
    Ok(())
}

fn derive_vnc_port(display: i64) -> Result<u16> {
    u16::try_from(i64::from(VNC_BASE_PORT) + display)
        .map_err(|_| ControlError::Validation(format!("display number out of range: {display}")))
}

fn websocket_url(rec: &CredentialRecord, ip: &str) -> Option<String> {
    if rec.kind == CredentialKind::Vnc && rec.websockify_enabled {
        rec.port.map(|p| format!("ws://{ip}:{p}/websockify"))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::nodes::NewNode;

    async fn vault() -> CredentialVault {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .register_node(NewNode {
                node_id: "n1".to_string(),
                ip_address: "10.0.0.5".to_string(),
                hostname: Some("n1.fleet".to_string()),
                ssh_user: Some("ops".to_string()),
                ssh_port: Some(2222),
                extra_data: None,
            })
            .await
            .unwrap();
        CredentialVault::new(store, &[42u8; 32])
    }

    fn vnc_request(name: &str) -> CreateCredential {
        CreateCredential {
            node_id: "n1".to_string(),
            kind: CredentialKind::Vnc,
            name: name.to_string(),
            secret: serde_json::json!({ "password": "hunter2" }),
            port: None,
            display_number: Some(1),
            vnc_port: None,
            websockify_enabled: None,
        }
    }

    #[tokio::test]
    async fn vnc_port_derived_from_display() {
        let vault = vault().await;
        let cred = vault.create(vnc_request("console")).await.unwrap();
        assert_eq!(cred.vnc_port, Some(5901));
        assert_eq!(cred.port, Some(5901));
    }

    #[tokio::test]
    async fn explicit_vnc_port_wins() {
        let vault = vault().await;
        let mut req = vnc_request("console");
        req.vnc_port = Some(6901);
        let cred = vault.create(req).await.unwrap();
        assert_eq!(cred.vnc_port, Some(6901));
    }

    #[tokio::test]
    async fn display_update_rederives_port() {
        let vault = vault().await;
        let cred = vault.create(vnc_request("console")).await.unwrap();
        let updated = vault
            .update(
                &cred.credential_id,
                UpdateCredential {
                    display_number: Some(3),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.vnc_port, Some(5903));
    }

    #[tokio::test]
    async fn connection_info_builds_websockify_url_and_token() {
        let vault = vault().await;
        let cred = vault.create(vnc_request("console")).await.unwrap();

        let info = vault
            .connection_info(&cred.credential_id, true)
            .await
            .unwrap();
        assert_eq!(info.host, "10.0.0.5");
        assert_eq!(info.port, Some(5901));
        assert_eq!(
            info.websocket_url.as_deref(),
            Some("ws://10.0.0.5:5901/websockify")
        );
        let token = info.token.unwrap();

        // last_used was touched.
        let public = vault.get_public(&cred.credential_id).await.unwrap();
        assert!(public.last_used.is_some());

        // One-time exchange yields the original plaintext, once.
        let secret = vault.exchange_token(&token).await.unwrap();
        assert_eq!(secret["password"], "hunter2");
        assert!(matches!(
            vault.exchange_token(&token).await.unwrap_err(),
            ControlError::TokenInvalid
        ));
    }

    #[tokio::test]
    async fn reads_never_return_plaintext() {
        let vault = vault().await;
        let cred = vault.create(vnc_request("console")).await.unwrap();

        let as_json = serde_json::to_string(&vault.get_public(&cred.credential_id).await.unwrap())
            .unwrap();
        assert!(!as_json.contains("hunter2"));

        let info = vault
            .connection_info(&cred.credential_id, false)
            .await
            .unwrap();
        let as_json = serde_json::to_string(&info).unwrap();
        assert!(!as_json.contains("hunter2"));
        assert!(info.token.is_none());
    }

    #[tokio::test]
    async fn ssh_secret_requires_username_and_material() {
        let vault = vault().await;
        let mut req = vnc_request("ssh-main");
        req.kind = CredentialKind::Ssh;
        req.secret = serde_json::json!({ "username": "ops" });
        assert!(matches!(
            vault.create(req).await.unwrap_err(),
            ControlError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn ssh_port_defaults_from_node() {
        let vault = vault().await;
        let req = CreateCredential {
            node_id: "n1".to_string(),
            kind: CredentialKind::Ssh,
            name: "ssh-main".to_string(),
            secret: serde_json::json!({ "username": "ops", "password": "hunter2" }),
            port: None,
            display_number: None,
            vnc_port: None,
            websockify_enabled: None,
        };
        let cred = vault.create(req).await.unwrap();
        assert_eq!(cred.port, Some(2222));
    }

    #[tokio::test]
    async fn tls_create_parses_metadata_and_round_trips() {
        let vault = vault().await;
        let (pem, _) = crate::vault::tls::test_certs::self_signed(
            "n1.fleet",
            90,
            &["n1.fleet"],
            None,
        );
        let req = CreateCredential {
            node_id: "n1".to_string(),
            kind: CredentialKind::Tls,
            name: "mtls".to_string(),
            secret: serde_json::json!({
                "ca_cert": "CA",
                "server_cert": pem,
                "server_key": "KEY",
            }),
            port: None,
            display_number: None,
            vnc_port: None,
            websockify_enabled: None,
        };
        let cred = vault.create(req).await.unwrap();
        let tls = cred.tls.clone().unwrap();
        assert_eq!(tls.common_name, "n1.fleet");
        assert_eq!(tls.san, vec!["DNS:n1.fleet"]);

        let info = vault
            .connection_info(&cred.credential_id, true)
            .await
            .unwrap();
        let secret = vault.exchange_token(&info.token.unwrap()).await.unwrap();
        assert_eq!(secret["server_key"], "KEY");
        assert_eq!(secret["ca_cert"], "CA");
    }

    #[tokio::test]
    async fn tls_update_with_bad_cert_leaves_metadata_intact() {
        let vault = vault().await;
        let (pem, _) =
            crate::vault::tls::test_certs::self_signed("n1.fleet", 90, &[], None);
        let cred = vault
            .create(CreateCredential {
                node_id: "n1".to_string(),
                kind: CredentialKind::Tls,
                name: "mtls".to_string(),
                secret: serde_json::json!({ "server_cert": pem }),
                port: None,
                display_number: None,
                vnc_port: None,
                websockify_enabled: None,
            })
            .await
            .unwrap();

        let err = vault
            .update(
                &cred.credential_id,
                UpdateCredential {
                    secret: Some(serde_json::json!({ "server_cert": "garbage" })),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Validation(_)));

        let unchanged = vault.get_public(&cred.credential_id).await.unwrap();
        assert_eq!(unchanged.tls.unwrap().common_name, "n1.fleet");
    }

    #[tokio::test]
    async fn expiring_tls_listing() {
        let vault = vault().await;
        let (soon, _) =
            crate::vault::tls::test_certs::self_signed("soon.fleet", 10, &[], None);
        let (later, _) =
            crate::vault::tls::test_certs::self_signed("later.fleet", 300, &[], None);
        for (name, pem) in [("soon", soon), ("later", later)] {
            vault
                .create(CreateCredential {
                    node_id: "n1".to_string(),
                    kind: CredentialKind::Tls,
                    name: name.to_string(),
                    secret: serde_json::json!({ "server_cert": pem }),
                    port: None,
                    display_number: None,
                    vnc_port: None,
                    websockify_enabled: None,
                })
                .await
                .unwrap();
        }
        let expiring = vault.list_expiring_tls(30).await.unwrap();
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].name, "soon");
    }

    #[tokio::test]
    async fn inactive_credential_refuses_connection_info() {
        let vault = vault().await;
        let cred = vault.create(vnc_request("console")).await.unwrap();
        vault
            .update(
                &cred.credential_id,
                UpdateCredential {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            vault
                .connection_info(&cred.credential_id, true)
                .await
                .unwrap_err(),
            ControlError::NotFound { .. }
        ));
    }
}
