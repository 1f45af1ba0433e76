//! Outbound rsync/ssh invocations.
//!
//! The orchestrator and cache manager talk to the fleet through two seams,
//! [`TransferTool`] and [`RemoteShell`], so tests can swap in mocks. The
//! production implementations shell out to `rsync` and `ssh` with host key
//! checking disabled (closed fleet network, keys rotate) and bound by a
//! process-wide semaphore so concurrent fan-outs cannot exhaust remote sshd
//! connection limits.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::Semaphore;

use crate::error::{ControlError, Result};

pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Where and how to reach a node over ssh.
#[derive(Debug, Clone)]
pub struct SshEndpoint {
    pub user: String,
    pub ip: String,
    pub port: u16,
}

impl SshEndpoint {
    pub fn remote(&self) -> String {
        format!("{}@{}", self.user, self.ip)
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    /// stdout followed by stderr, lossily decoded.
    pub output: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

#[async_trait::async_trait]
pub trait TransferTool: Send + Sync {
    /// Push a local path onto a node (`{target_dir}/` semantics: rsync
    /// appends into the directory).
    async fn push(
        &self,
        src: &str,
        endpoint: &SshEndpoint,
        target_dir: &str,
        timeout: Duration,
    ) -> Result<CommandOutput>;

    /// Pull a remote tree into a local directory.
    async fn pull(
        &self,
        endpoint: &SshEndpoint,
        repo_path: &str,
        dest: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput>;
}

#[async_trait::async_trait]
pub trait RemoteShell: Send + Sync {
    async fn run(
        &self,
        endpoint: &SshEndpoint,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput>;
}

pub fn build_ssh_opts(key_path: Option<&Path>, port: u16) -> String {
    let mut opts = format!(
        "ssh -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null \
         -o ConnectTimeout={CONNECT_TIMEOUT_SECS} -p {port}"
    );
    if let Some(key) = key_path {
        opts.push_str(&format!(" -i {}", key.display()));
    }
    opts
}

pub fn build_push_args(
    src: &str,
    endpoint: &SshEndpoint,
    target_dir: &str,
    key_path: Option<&Path>,
) -> Vec<String> {
    vec![
        "rsync".into(),
        "-avz".into(),
        "--delete".into(),
        "--exclude".into(),
        "__pycache__".into(),
        "--exclude".into(),
        "*.pyc".into(),
        "-e".into(),
        build_ssh_opts(key_path, endpoint.port),
        src.into(),
        format!("{}:{}/", endpoint.remote(), target_dir.trim_end_matches('/')),
    ]
}

pub fn build_pull_args(
    endpoint: &SshEndpoint,
    repo_path: &str,
    dest: &Path,
    key_path: Option<&Path>,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["rsync".into(), "-avz".into(), "--delete".into()];
    for exclude in [".git", "__pycache__", "*.pyc", "node_modules", "venv", ".venv"] {
        args.push("--exclude".into());
        args.push(exclude.into());
    }
    args.push("-e".into());
    args.push(build_ssh_opts(key_path, endpoint.port));
    args.push(format!(
        "{}:{}/",
        endpoint.remote(),
        repo_path.trim_end_matches('/')
    ));
    args.push(format!("{}/", dest.display()));
    args
}

pub fn build_shell_args(
    endpoint: &SshEndpoint,
    command: &str,
    key_path: Option<&Path>,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "ssh".into(),
        "-o".into(),
        "StrictHostKeyChecking=no".into(),
        "-o".into(),
        "UserKnownHostsFile=/dev/null".into(),
        "-o".into(),
        format!("ConnectTimeout={CONNECT_TIMEOUT_SECS}"),
        "-p".into(),
        endpoint.port.to_string(),
    ];
    if let Some(key) = key_path {
        args.push("-i".into());
        args.push(key.display().to_string());
    }
    args.push(endpoint.remote());
    args.push(command.into());
    args
}

/// Spawn `argv`, wait up to `timeout`, kill on expiry. Output is
/// stdout + stderr concatenated.
pub async fn run_command(argv: &[String], timeout: Duration) -> Result<CommandOutput> {
    let (program, rest) = argv
        .split_first()
        .ok_or_else(|| ControlError::Internal("empty command".into()))?;

    let child = Command::new(program)
        .args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true) // timeout drops the wait future; reap the child with it
        .spawn()
        .map_err(|e| ControlError::Remote(format!("failed to spawn {program}: {e}")))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(out)) => {
            let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
            output.push_str(&String::from_utf8_lossy(&out.stderr));
            Ok(CommandOutput {
                exit_code: out.status.code(),
                output,
                timed_out: false,
            })
        }
        Ok(Err(e)) => Err(ControlError::Remote(format!("wait failed: {e}"))),
        Err(_) => Ok(CommandOutput {
            exit_code: None,
            output: String::new(),
            timed_out: true,
        }),
    }
}

/// rsync-over-ssh transfer tool.
pub struct RsyncTransfer {
    ssh_key_path: PathBuf,
    permits: Arc<Semaphore>,
}

impl RsyncTransfer {
    pub fn new(ssh_key_path: PathBuf, permits: Arc<Semaphore>) -> Self {
        Self {
            ssh_key_path,
            permits,
        }
    }

    /// The key is only passed to ssh when it actually exists on disk.
    fn key_path(&self) -> Option<&Path> {
        self.ssh_key_path
            .exists()
            .then_some(self.ssh_key_path.as_path())
    }
}

#[async_trait::async_trait]
impl TransferTool for RsyncTransfer {
    async fn push(
        &self,
        src: &str,
        endpoint: &SshEndpoint,
        target_dir: &str,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ControlError::Internal("ssh semaphore closed".into()))?;
        let args = build_push_args(src, endpoint, target_dir, self.key_path());
        run_command(&args, timeout).await
    }

    async fn pull(
        &self,
        endpoint: &SshEndpoint,
        repo_path: &str,
        dest: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ControlError::Internal("ssh semaphore closed".into()))?;
        let args = build_pull_args(endpoint, repo_path, dest, self.key_path());
        run_command(&args, timeout).await
    }
}

/// ssh command execution (post-sync hooks, service restarts).
pub struct SshShell {
    ssh_key_path: PathBuf,
    permits: Arc<Semaphore>,
}

impl SshShell {
    pub fn new(ssh_key_path: PathBuf, permits: Arc<Semaphore>) -> Self {
        Self {
            ssh_key_path,
            permits,
        }
    }

    fn key_path(&self) -> Option<&Path> {
        self.ssh_key_path
            .exists()
            .then_some(self.ssh_key_path.as_path())
    }
}

#[async_trait::async_trait]
impl RemoteShell for SshShell {
    async fn run(
        &self,
        endpoint: &SshEndpoint,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ControlError::Internal("ssh semaphore closed".into()))?;
        let args = build_shell_args(endpoint, command, self.key_path());
        run_command(&args, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> SshEndpoint {
        SshEndpoint {
            user: "ops".to_string(),
            ip: "10.0.0.5".to_string(),
            port: 22,
        }
    }

    #[test]
    fn ssh_opts_without_key() {
        let opts = build_ssh_opts(None, 22);
        assert!(opts.contains("StrictHostKeyChecking=no"));
        assert!(opts.contains("UserKnownHostsFile=/dev/null"));
        assert!(opts.contains("ConnectTimeout=30"));
        assert!(opts.contains("-p 22"));
        assert!(!opts.contains("-i "));
    }

    #[test]
    fn ssh_opts_with_key_and_port() {
        let opts = build_ssh_opts(Some(Path::new("/keys/fleet")), 2222);
        assert!(opts.contains("-p 2222"));
        assert!(opts.ends_with("-i /keys/fleet"));
    }

    #[test]
    fn push_args_shape() {
        let args = build_push_args("/cache/abc/backend/", &endpoint(), "/srv/backend", None);
        assert_eq!(args[0], "rsync");
        assert!(args.contains(&"--delete".to_string()));
        assert!(args.contains(&"__pycache__".to_string()));
        assert!(args.contains(&"*.pyc".to_string()));
        assert_eq!(args[args.len() - 2], "/cache/abc/backend/");
        assert_eq!(args[args.len() - 1], "ops@10.0.0.5:/srv/backend/");
    }

    #[test]
    fn pull_args_exclude_scm_and_build_artifacts() {
        let args = build_pull_args(&endpoint(), "/opt/repo", Path::new("/cache/abc"), None);
        for exclude in [".git", "node_modules", "venv", ".venv"] {
            assert!(args.contains(&exclude.to_string()), "missing {exclude}");
        }
        assert_eq!(args[args.len() - 2], "ops@10.0.0.5:/opt/repo/");
        assert_eq!(args[args.len() - 1], "/cache/abc/");
    }

    #[test]
    fn shell_args_end_with_remote_and_command() {
        let args = build_shell_args(&endpoint(), "sudo systemctl restart autobot-backend", None);
        assert_eq!(args[0], "ssh");
        assert_eq!(args[args.len() - 2], "ops@10.0.0.5");
        assert_eq!(args[args.len() - 1], "sudo systemctl restart autobot-backend");
    }

    #[tokio::test]
    async fn run_command_captures_exit_and_output() {
        let argv: Vec<String> = vec![
            "bash".into(),
            "-c".into(),
            "echo out; echo err >&2; exit 7".into(),
        ];
        let result = run_command(&argv, Duration::from_secs(5)).await.unwrap();
        assert_eq!(result.exit_code, Some(7));
        assert!(!result.succeeded());
        assert!(result.output.contains("out"));
        assert!(result.output.contains("err"));
    }

    #[tokio::test]
    async fn run_command_times_out() {
        let argv: Vec<String> = vec!["sleep".into(), "30".into()];
        let result = run_command(&argv, Duration::from_millis(100)).await.unwrap();
        assert!(result.timed_out);
        assert!(result.exit_code.is_none());
    }

    #[tokio::test]
    async fn run_command_success() {
        let argv: Vec<String> = vec!["echo".into(), "synced".into()];
        let result = run_command(&argv, Duration::from_secs(5)).await.unwrap();
        assert!(result.succeeded());
        assert!(result.output.contains("synced"));
    }
}
