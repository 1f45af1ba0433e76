//! Ansible playbook supervision.
//!
//! Spawns `ansible-playbook`, streams its merged stdout/stderr line by line,
//! feeds each line through the progress parser, and reports the exit code.
//! The runner has no internal timeout; cancellation is the supervising
//! task's job (the child is killed when the spawn future is dropped).

pub mod progress;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;

use crate::error::Result;
use progress::{ProgressEvent, parse_progress};

pub const PLAYBOOK_EXE: &str = "ansible-playbook";
const FALLBACK_PATHS: [&str; 2] = ["/usr/bin/ansible-playbook", "/usr/local/bin/ansible-playbook"];

/// Fallible so a broadcaster-backed sink can report a gone subscriber; the
/// runner swallows the error either way.
pub type ProgressFn = Box<dyn FnMut(ProgressEvent) -> Result<()> + Send>;

#[derive(Debug, Clone)]
pub struct PlaybookOutcome {
    pub success: bool,
    pub output: String,
    pub return_code: i32,
}

impl PlaybookOutcome {
    fn launch_failure(message: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            output: format!("Error: {message}"),
            return_code: -1,
        }
    }
}

pub struct PlaybookRunner {
    ansible_dir: PathBuf,
    inventory_path: PathBuf,
    exe_override: Option<PathBuf>,
}

impl PlaybookRunner {
    pub fn new(ansible_dir: PathBuf, inventory_path: PathBuf) -> Self {
        Self {
            ansible_dir,
            inventory_path,
            exe_override: None,
        }
    }

    /// Pin the executable instead of searching PATH (tests, hermetic
    /// deployments).
    pub fn with_executable(mut self, exe: PathBuf) -> Self {
        self.exe_override = Some(exe);
        self
    }

    fn find_executable(&self) -> Option<PathBuf> {
        if let Some(exe) = &self.exe_override {
            return Some(exe.clone());
        }
        if let Some(paths) = std::env::var_os("PATH") {
            for dir in std::env::split_paths(&paths) {
                let candidate = dir.join(PLAYBOOK_EXE);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        FALLBACK_PATHS
            .into_iter()
            .map(PathBuf::from)
            .find(|p| p.is_file())
    }

    pub async fn execute_playbook(
        &self,
        playbook_name: &str,
        limit: Option<&[String]>,
        tags: Option<&[String]>,
        extra_vars: Option<&BTreeMap<String, String>>,
        check_mode: bool,
        mut progress_fn: Option<ProgressFn>,
    ) -> PlaybookOutcome {
        if playbook_name.contains("..") || playbook_name.starts_with('/') {
            return PlaybookOutcome::launch_failure(format!(
                "invalid playbook name: {playbook_name}"
            ));
        }
        let playbook_path = self.ansible_dir.join(playbook_name);
        if !playbook_path.exists() {
            return PlaybookOutcome::launch_failure(format!(
                "Playbook not found: {}",
                playbook_path.display()
            ));
        }
        if !self.inventory_path.exists() {
            return PlaybookOutcome::launch_failure(format!(
                "Inventory not found: {}",
                self.inventory_path.display()
            ));
        }
        let Some(exe) = self.find_executable() else {
            return PlaybookOutcome::launch_failure(format!(
                "{PLAYBOOK_EXE} not found; install ansible"
            ));
        };

        let argv = build_argv(
            &exe,
            &self.inventory_path,
            &playbook_path,
            limit,
            tags,
            extra_vars,
            check_mode,
        );
        tracing::info!(playbook = %playbook_name, "executing playbook");

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(&self.ansible_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in playbook_env() {
            cmd.env(key, value);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(playbook = %playbook_name, error = %e, "failed to spawn playbook");
                return PlaybookOutcome::launch_failure(e);
            }
        };

        // Merge stdout and stderr into one line stream.
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let tx_out = tx.clone();
        tokio::spawn(async move {
            let mut lines = LinesStream::new(BufReader::new(stdout).lines());
            while let Some(Ok(line)) = lines.next().await {
                if tx_out.send(line).is_err() {
                    break;
                }
            }
        });
        let tx_err = tx;
        tokio::spawn(async move {
            let mut lines = LinesStream::new(BufReader::new(stderr).lines());
            while let Some(Ok(line)) = lines.next().await {
                if tx_err.send(line).is_err() {
                    break;
                }
            }
        });

        let mut output_lines: Vec<String> = Vec::new();
        while let Some(line) = rx.recv().await {
            if let Some(event) = parse_progress(&line) {
                if let Some(callback) = progress_fn.as_mut() {
                    if let Err(e) = callback(event) {
                        tracing::debug!(error = %e, "progress callback error");
                    }
                }
            }
            output_lines.push(line);
        }

        let return_code = match child.wait().await {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                tracing::error!(playbook = %playbook_name, error = %e, "wait failed");
                -1
            }
        };

        let success = return_code == 0;
        if success {
            tracing::info!(playbook = %playbook_name, "playbook completed");
        } else {
            tracing::error!(playbook = %playbook_name, return_code, "playbook failed");
        }

        PlaybookOutcome {
            success,
            output: output_lines.join("\n"),
            return_code,
        }
    }
}

pub fn build_argv(
    exe: &Path,
    inventory: &Path,
    playbook: &Path,
    limit: Option<&[String]>,
    tags: Option<&[String]>,
    extra_vars: Option<&BTreeMap<String, String>>,
    check_mode: bool,
) -> Vec<String> {
    let mut argv = vec![
        exe.display().to_string(),
        "-i".to_string(),
        inventory.display().to_string(),
        playbook.display().to_string(),
    ];
    if let Some(limit) = limit.filter(|l| !l.is_empty()) {
        argv.push("--limit".to_string());
        argv.push(limit.join(","));
    }
    if let Some(tags) = tags.filter(|t| !t.is_empty()) {
        argv.push("--tags".to_string());
        argv.push(tags.join(","));
    }
    if let Some(vars) = extra_vars {
        for (key, value) in vars {
            argv.push("-e".to_string());
            argv.push(format!("{key}={value}"));
        }
    }
    if check_mode {
        argv.push("--check".to_string());
    }
    argv
}

/// Environment pinned for every invocation: no color, no host key prompts,
/// a fixed local temp dir.
pub fn playbook_env() -> Vec<(&'static str, &'static str)> {
    vec![
        ("ANSIBLE_FORCE_COLOR", "0"),
        ("ANSIBLE_NOCOLOR", "1"),
        ("ANSIBLE_HOST_KEY_CHECKING", "False"),
        ("ANSIBLE_SSH_RETRIES", "3"),
        ("ANSIBLE_LOCAL_TEMP", "/tmp/ansible_local_tmp"),
    ]
}
