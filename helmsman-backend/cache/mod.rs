//! Local content-addressed snapshots of the code-source tree.
//!
//! `cache_root/{commit}/` is immutable once pulled; `latest` is the one
//! mutable alias and is refreshed on every call. Failed or timed-out pulls
//! never leave a partial snapshot behind.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ControlError, Result};
use crate::store::Store;
use crate::sync::transfer::{SshEndpoint, TransferTool};

pub const PULL_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_SSH_USER: &str = "autobot";
pub const LATEST: &str = "latest";

pub struct CacheManager {
    cache_root: PathBuf,
    store: Arc<Store>,
    transfer: Arc<dyn TransferTool>,
}

impl CacheManager {
    pub fn new(cache_root: PathBuf, store: Arc<Store>, transfer: Arc<dyn TransferTool>) -> Self {
        Self {
            cache_root,
            store,
            transfer,
        }
    }

    pub fn snapshot_path(&self, commit: &str) -> PathBuf {
        self.cache_root.join(commit)
    }

    /// Make sure a snapshot for `commit` exists locally, pulling from the
    /// active code source when it does not. `latest` is re-pulled every time
    /// (it names "head of the source as of now", not a fixed tree).
    pub async fn ensure(&self, commit: &str) -> Result<PathBuf> {
        validate_commit(commit)?;
        let dest = self.snapshot_path(commit);

        if commit != LATEST && dest.exists() {
            tracing::debug!(commit = %commit, "snapshot already cached");
            return Ok(dest);
        }

        let source = self
            .store
            .active_code_source()
            .await?
            .ok_or_else(|| ControlError::Validation("no active code-source configured".into()))?;
        let node = self.store.get_node(&source.node_id).await?;
        let endpoint = SshEndpoint {
            user: node
                .ssh_user
                .clone()
                .unwrap_or_else(|| DEFAULT_SSH_USER.to_string()),
            ip: node.ip_address.clone(),
            port: node.ssh_port,
        };

        std::fs::create_dir_all(&dest)?;
        tracing::info!(commit = %commit, source = %node.node_id, "pulling code into cache");

        let pulled = self
            .transfer
            .pull(
                &endpoint,
                &source.repo_path,
                &dest,
                Duration::from_secs(PULL_TIMEOUT_SECS),
            )
            .await;

        match pulled {
            Ok(result) if result.succeeded() => {
                if commit != LATEST {
                    self.store.set_last_known_commit(source.id, commit).await?;
                }
                tracing::info!(commit = %commit, path = %dest.display(), "snapshot cached");
                Ok(dest)
            }
            Ok(result) if result.timed_out => {
                self.discard_partial(&dest);
                Err(ControlError::Timeout(PULL_TIMEOUT_SECS))
            }
            Ok(result) => {
                self.discard_partial(&dest);
                let head: String = result.output.chars().take(200).collect();
                Err(ControlError::Remote(format!("Pull failed: {head}")))
            }
            Err(e) => {
                self.discard_partial(&dest);
                Err(e)
            }
        }
    }

    fn discard_partial(&self, dest: &std::path::Path) {
        if let Err(e) = std::fs::remove_dir_all(dest) {
            tracing::warn!(path = %dest.display(), error = %e, "failed to remove partial snapshot");
        }
    }
}

/// Commit identifiers become directory names; refuse anything that could
/// escape the cache root.
fn validate_commit(commit: &str) -> Result<()> {
    if commit.is_empty()
        || commit.contains('/')
        || commit.contains('\\')
        || commit.contains("..")
    {
        return Err(ControlError::Validation(format!(
            "invalid commit identifier: {commit}"
        )));
    }
    Ok(())
}
