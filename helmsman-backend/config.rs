use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Server configuration loaded from environment variables.
pub struct Config {
    pub port: u16,
    pub db_path: PathBuf,
    pub cache_root: PathBuf,
    pub ssh_key_path: PathBuf,
    pub ansible_dir: PathBuf,
    pub inventory_path: PathBuf,
    /// 32-byte vault key decoded from `ENCRYPTION_KEY` (standard base64).
    /// None when the variable is unset; credential routes refuse to start
    /// without it.
    pub encryption_key: Option<[u8; 32]>,
    pub max_concurrent_ssh: usize,
    pub sentry_dsn: Option<String>,
    pub environment: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_raw_values(
            std::env::var("PORT").ok().as_deref(),
            std::env::var("DB_PATH").ok().as_deref(),
            std::env::var("CACHE_ROOT").ok().as_deref(),
            std::env::var("SSH_KEY_PATH").ok().as_deref(),
            std::env::var("ANSIBLE_DIR").ok().as_deref(),
            std::env::var("INVENTORY_PATH").ok().as_deref(),
            std::env::var("ENCRYPTION_KEY").ok().as_deref(),
            std::env::var("MAX_CONCURRENT_SSH").ok().as_deref(),
            std::env::var("SENTRY_DSN").ok().as_deref(),
            std::env::var("ENVIRONMENT").ok().as_deref(),
        )
    }

    /// Build a Config from raw string values (as they would come from env
    /// vars). Used directly in tests to avoid mutating process-global
    /// environment.
    #[allow(clippy::too_many_arguments)]
    pub fn from_raw_values(
        port: Option<&str>,
        db_path: Option<&str>,
        cache_root: Option<&str>,
        ssh_key_path: Option<&str>,
        ansible_dir: Option<&str>,
        inventory_path: Option<&str>,
        encryption_key: Option<&str>,
        max_concurrent_ssh: Option<&str>,
        sentry_dsn: Option<&str>,
        environment: Option<&str>,
    ) -> anyhow::Result<Self> {
        let data_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".helmsman");

        let port = port.and_then(|v| v.parse().ok()).unwrap_or(8085);

        let db_path = db_path
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("helmsman.db"));

        let cache_root = cache_root
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("code-cache"));

        let ssh_key_path = ssh_key_path.map(PathBuf::from).unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".ssh")
                .join("helmsman_key")
        });

        let ansible_dir = ansible_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/opt/helmsman/ansible"));

        let inventory_path = inventory_path
            .map(PathBuf::from)
            .unwrap_or_else(|| ansible_dir.join("inventory").join("fleet-nodes.yml"));

        // A malformed key is a hard startup error: silently running without
        // encryption would violate the at-rest guarantee.
        let encryption_key = match encryption_key.filter(|s| !s.is_empty()) {
            None => None,
            Some(raw) => {
                let bytes = BASE64
                    .decode(raw)
                    .map_err(|e| anyhow::anyhow!("ENCRYPTION_KEY is not valid base64: {e}"))?;
                let key: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("ENCRYPTION_KEY must decode to 32 bytes"))?;
                Some(key)
            }
        };

        let max_concurrent_ssh = max_concurrent_ssh
            .and_then(|v| v.parse().ok())
            .filter(|n| *n >= 1)
            .unwrap_or(16);

        let sentry_dsn = sentry_dsn.filter(|s| !s.is_empty()).map(String::from);

        let environment = environment
            .filter(|s| !s.is_empty())
            .map(String::from)
            .unwrap_or_else(|| "local".to_string());

        Ok(Config {
            port,
            db_path,
            cache_root,
            ssh_key_path,
            ansible_dir,
            inventory_path,
            encryption_key,
            max_concurrent_ssh,
            sentry_dsn,
            environment,
        })
    }
}
