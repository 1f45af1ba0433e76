//! One-time access tokens.
//!
//! Issuing records `(credential_id, expires_at)` under a random 256-bit
//! URL-safe token. Exchange removes the entry before the expiry check, so a
//! token is gone after its first use whether that use succeeded or not.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::error::{ControlError, Result};

pub const TOKEN_TTL_MINUTES: i64 = 5;

pub struct TokenStore {
    entries: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Mint a token for `credential_id`. Returns `(token, expires_at)`.
    pub async fn issue(&self, credential_id: &str) -> Result<(String, DateTime<Utc>)> {
        let mut bytes = [0u8; 32];
        getrandom::fill(&mut bytes)
            .map_err(|e| ControlError::Internal(format!("rng failure: {e}")))?;
        let token = URL_SAFE_NO_PAD.encode(bytes);
        let expires_at = Utc::now() + Duration::minutes(TOKEN_TTL_MINUTES);

        let mut entries = self.entries.lock().await;
        entries.insert(token.clone(), (credential_id.to_string(), expires_at));
        Ok((token, expires_at))
    }

    /// Exchange a token for its credential id. Single-use: the entry is
    /// removed on every attempt, valid or not.
    pub async fn exchange(&self, token: &str) -> Result<String> {
        let mut entries = self.entries.lock().await;
        let (credential_id, expires_at) = entries
            .remove(token)
            .ok_or(ControlError::TokenInvalid)?;
        drop(entries);

        if Utc::now() > expires_at {
            tracing::warn!("expired access token presented");
            return Err(ControlError::TokenExpired);
        }
        Ok(credential_id)
    }

    #[cfg(test)]
    async fn insert_with_expiry(&self, token: &str, credential_id: &str, expires_at: DateTime<Utc>) {
        self.entries
            .lock()
            .await
            .insert(token.to_string(), (credential_id.to_string(), expires_at));
    }

    #[cfg(test)]
    async fn contains(&self, token: &str) -> bool {
        self.entries.lock().await.contains_key(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn issue_then_exchange() {
        let store = TokenStore::new();
        let (token, expires_at) = store.issue("cred-1").await.unwrap();
        assert_eq!(token.len(), 43); // 32 bytes, unpadded url-safe base64
        assert!(expires_at > Utc::now());
        assert_eq!(store.exchange(&token).await.unwrap(), "cred-1");
    }

    #[tokio::test]
    async fn second_exchange_is_invalid() {
        let store = TokenStore::new();
        let (token, _) = store.issue("cred-1").await.unwrap();
        store.exchange(&token).await.unwrap();
        assert!(matches!(
            store.exchange(&token).await.unwrap_err(),
            ControlError::TokenInvalid
        ));
    }

    #[tokio::test]
    async fn unknown_token_is_invalid() {
        let store = TokenStore::new();
        assert!(matches!(
            store.exchange("nope").await.unwrap_err(),
            ControlError::TokenInvalid
        ));
    }

    #[tokio::test]
    async fn expired_token_is_removed_and_reported() {
        let store = TokenStore::new();
        store
            .insert_with_expiry("stale", "cred-1", Utc::now() - Duration::seconds(1))
            .await;

        assert!(matches!(
            store.exchange("stale").await.unwrap_err(),
            ControlError::TokenExpired
        ));
        // The entry is gone even though the exchange failed.
        assert!(!store.contains("stale").await);
        assert!(matches!(
            store.exchange("stale").await.unwrap_err(),
            ControlError::TokenInvalid
        ));
    }

    #[tokio::test]
    async fn tokens_are_unique() {
        let store = TokenStore::new();
        let (t1, _) = store.issue("cred-1").await.unwrap();
        let (t2, _) = store.issue("cred-1").await.unwrap();
        assert_ne!(t1, t2);
    }
}
