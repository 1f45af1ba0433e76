//! Sync orchestrator: turns "this role should be at this commit on these
//! nodes" into remote transfers, post-sync hooks, and service restarts.
//!
//! Failure policy: a transfer failure is fatal to the (node, role) sync;
//! post-sync and restart failures are logged warnings. A failed restart must
//! not mask a successful file update, and a bad transfer must never be
//! reported as synced.

pub mod transfer;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::cache::{CacheManager, DEFAULT_SSH_USER, LATEST};
use crate::error::{ControlError, Result};
use crate::store::Store;
use crate::store::nodes::{CodeStatus, Node, RoleStatus};
use crate::store::schedules::{RestartStrategy, Schedule, TargetType};
use transfer::{RemoteShell, SshEndpoint, TransferTool};

pub const TRANSFER_TIMEOUT_SECS: u64 = 120;
pub const POST_SYNC_TIMEOUT_SECS: u64 = 300;
pub const RESTART_TIMEOUT_SECS: u64 = 60;
pub const ROLLING_PACE_SECS: u64 = 2;

/// Per-node advisory locks. Two concurrent schedules hitting the same node
/// serialize here instead of racing each other's transfers.
struct NodeLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl NodeLocks {
    fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    async fn acquire(&self, node_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(node_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub struct SyncOrchestrator {
    store: Arc<Store>,
    cache: Arc<CacheManager>,
    transfer: Arc<dyn TransferTool>,
    shell: Arc<dyn RemoteShell>,
    node_locks: NodeLocks,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<Store>,
        cache: Arc<CacheManager>,
        transfer: Arc<dyn TransferTool>,
        shell: Arc<dyn RemoteShell>,
    ) -> Self {
        Self {
            store,
            cache,
            transfer,
            shell,
            node_locks: NodeLocks::new(),
        }
    }

    /// Sync one role onto one node from the cached snapshot at `commit`.
    /// Returns the success message; any `Err` means the node's files are not
    /// at `commit`.
    pub async fn sync_node_role(
        &self,
        node_id: &str,
        role_name: &str,
        commit: &str,
        restart: bool,
    ) -> Result<String> {
        let _node_guard = self.node_locks.acquire(node_id).await;

        let node = self.store.get_node(node_id).await?;
        let role = self.store.get_role(role_name).await?;
        if role.source_paths.is_empty() {
            return Err(ControlError::Validation(format!(
                "Role has no source paths: {role_name}"
            )));
        }

        let snapshot = self.cache.snapshot_path(commit);
        if !snapshot.exists() {
            return Err(ControlError::Internal(format!(
                "Commit not cached: {commit}"
            )));
        }

        self.store
            .set_code_status(node_id, CodeStatus::Syncing, None)
            .await?;
        self.store
            .set_node_role_status(node_id, role_name, RoleStatus::Syncing)
            .await?;

        let endpoint = endpoint_for(&node);

        for source_path in &role.source_paths {
            let src = snapshot.join(source_path.trim_end_matches('/'));
            if !src.exists() {
                tracing::warn!(
                    node_id = %node_id,
                    role = %role_name,
                    path = %src.display(),
                    "source path not found in cache, skipping"
                );
                continue;
            }

            // Trailing "/" means "contents of": rsync sends children, not
            // the directory itself.
            let rsync_src = if source_path.ends_with('/') {
                format!("{}/", src.display())
            } else {
                src.display().to_string()
            };

            let pushed = self
                .transfer
                .push(
                    &rsync_src,
                    &endpoint,
                    &role.target_path,
                    Duration::from_secs(TRANSFER_TIMEOUT_SECS),
                )
                .await;

            let message = match pushed {
                Ok(result) if result.succeeded() => None,
                Ok(result) if result.timed_out => {
                    Some(format!("Sync timed out for {source_path}"))
                }
                Ok(result) => {
                    let head: String = result.output.chars().take(200).collect();
                    Some(format!("Sync failed for {source_path}: {head}"))
                }
                Err(e) => Some(format!("Sync error: {e}")),
            };

            if let Some(message) = message {
                self.mark_failed(node_id, role_name).await;
                return Err(ControlError::Remote(message));
            }
        }

        if let Some(cmd) = &role.post_sync_cmd {
            match self
                .shell
                .run(&endpoint, cmd, Duration::from_secs(POST_SYNC_TIMEOUT_SECS))
                .await
            {
                Ok(result) if result.succeeded() => {}
                Ok(result) => tracing::warn!(
                    node_id = %node_id,
                    role = %role_name,
                    exit = ?result.exit_code,
                    "post-sync command failed"
                ),
                Err(e) => tracing::warn!(
                    node_id = %node_id,
                    role = %role_name,
                    error = %e,
                    "post-sync command failed"
                ),
            }
        }

        if restart && role.auto_restart {
            if let Some(service) = &role.systemd_service {
                let restart_cmd = format!("sudo systemctl restart {service}");
                match self
                    .shell
                    .run(
                        &endpoint,
                        &restart_cmd,
                        Duration::from_secs(RESTART_TIMEOUT_SECS),
                    )
                    .await
                {
                    Ok(result) if result.succeeded() => {
                        tracing::info!(node_id = %node_id, service = %service, "restarted service");
                    }
                    Ok(result) => tracing::warn!(
                        node_id = %node_id,
                        service = %service,
                        exit = ?result.exit_code,
                        "service restart failed"
                    ),
                    Err(e) => tracing::warn!(
                        node_id = %node_id,
                        service = %service,
                        error = %e,
                        "service restart failed"
                    ),
                }
            }
        }

        self.store
            .record_role_synced(node_id, role_name, commit)
            .await?;
        self.store
            .set_code_status(node_id, CodeStatus::UpToDate, Some(commit))
            .await?;

        let short = &commit[..commit.len().min(12)];
        tracing::info!(node_id = %node_id, role = %role_name, commit = %short, "synced");
        Ok(format!("Synced {role_name} to {node_id}"))
    }

    async fn mark_failed(&self, node_id: &str, role_name: &str) {
        if let Err(e) = self
            .store
            .set_node_role_status(node_id, role_name, RoleStatus::Failed)
            .await
        {
            tracing::error!(node_id = %node_id, error = %e, "failed to record role failure");
        }
        if let Err(e) = self
            .store
            .set_code_status(node_id, CodeStatus::Failed, None)
            .await
        {
            tracing::error!(node_id = %node_id, error = %e, "failed to record node failure");
        }
    }

    /// Sync every role a node carries. First role failure aborts the node.
    async fn sync_node(&self, node: &Node, commit: &str, restart: bool) -> Result<usize> {
        let assignments = self.store.list_node_roles(&node.node_id).await?;
        let mut synced = 0usize;
        for assignment in &assignments {
            self.sync_node_role(&node.node_id, &assignment.role_name, commit, restart)
                .await?;
            synced += 1;
        }
        Ok(synced)
    }

    /// Fan a schedule out across its candidate nodes. `Err` is reserved for
    /// store-level failures; sync failures are folded into the returned
    /// `(overall_success, message)`.
    pub async fn execute_schedule(&self, schedule: &Schedule) -> Result<(bool, String)> {
        let candidates = match schedule.target_type {
            TargetType::All => self.store.list_outdated().await?,
            TargetType::Specific => self.store.list_outdated_in(&schedule.target_nodes).await?,
            TargetType::Filter => {
                self.store
                    .list_outdated_with_roles(&schedule.target_nodes)
                    .await?
            }
        };

        // Nothing to do is a success, not an empty failure.
        if candidates.is_empty() {
            tracing::info!(schedule = %schedule.name, "no outdated nodes to sync");
            return Ok((true, "No outdated nodes to sync".to_string()));
        }

        // One snapshot per execution; every node gets the same commit.
        let commit = self
            .store
            .active_code_source()
            .await?
            .and_then(|s| s.last_known_commit)
            .unwrap_or_else(|| LATEST.to_string());
        if let Err(e) = self.cache.ensure(&commit).await {
            tracing::error!(schedule = %schedule.name, error = %e, "cache pull failed");
            return Ok((false, format!("Cache pull failed: {e}")));
        }

        // Nodes with no assignments have nothing to sync; leave them out of
        // the tally entirely.
        let mut targets = Vec::new();
        for node in candidates {
            if self.store.list_node_roles(&node.node_id).await?.is_empty() {
                tracing::debug!(node_id = %node.node_id, "node has no role assignments, skipping");
            } else {
                targets.push(node);
            }
        }
        if targets.is_empty() {
            return Ok((true, "No outdated nodes to sync".to_string()));
        }

        let restart = schedule.restart_after_sync;
        let mut success_count = 0usize;
        let mut failed_count = 0usize;

        match schedule.restart_strategy {
            RestartStrategy::Parallel => {
                // All nodes at once; the ssh semaphore is the only brake.
                let commit = commit.as_str();
                let outcomes = futures::future::join_all(targets.iter().map(|node| async move {
                    (
                        node.node_id.clone(),
                        self.sync_node(node, commit, restart).await,
                    )
                }))
                .await;
                for (node_id, outcome) in outcomes {
                    match outcome {
                        Ok(_) => success_count += 1,
                        Err(e) => {
                            failed_count += 1;
                            tracing::warn!(
                                schedule = %schedule.name,
                                node_id = %node_id,
                                error = %e,
                                "node sync failed"
                            );
                        }
                    }
                }
            }
            RestartStrategy::Sequential | RestartStrategy::Rolling => {
                let pace = schedule.restart_strategy == RestartStrategy::Rolling;
                let total = targets.len();
                for (i, node) in targets.into_iter().enumerate() {
                    match self.sync_node(&node, &commit, restart).await {
                        Ok(_) => success_count += 1,
                        Err(e) => {
                            failed_count += 1;
                            tracing::warn!(
                                schedule = %schedule.name,
                                node_id = %node.node_id,
                                error = %e,
                                "node sync failed"
                            );
                        }
                    }
                    // Pace rolling restarts so services do not bounce in
                    // lockstep across the fleet.
                    if pace && i + 1 < total {
                        tokio::time::sleep(Duration::from_secs(ROLLING_PACE_SECS)).await;
                    }
                }
            }
        }

        let total = success_count + failed_count;
        Ok(if failed_count == 0 {
            (true, format!("Successfully synced {success_count} node(s)"))
        } else if success_count == 0 {
            (false, format!("All {failed_count} node sync(s) failed"))
        } else {
            (
                true,
                format!("Synced {success_count}/{total} nodes ({failed_count} failed)"),
            )
        })
    }
}

fn endpoint_for(node: &Node) -> SshEndpoint {
    SshEndpoint {
        user: node
            .ssh_user
            .clone()
            .unwrap_or_else(|| DEFAULT_SSH_USER.to_string()),
        ip: node.ip_address.clone(),
        port: node.ssh_port,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex as StdMutex;

    use transfer::CommandOutput;

    use crate::store::nodes::{AssignmentType, NewNode};
    use crate::store::roles::NewRole;
    use crate::store::schedules::{NewSchedule, RunOutcome};

    fn ok_output() -> CommandOutput {
        CommandOutput {
            exit_code: Some(0),
            output: "sent".into(),
            timed_out: false,
        }
    }

    // --- Mock transfer tool + remote shell ---

    #[derive(Default)]
    struct MockFleet {
        /// IPs whose pushes fail with exit 23.
        fail_push_ips: HashSet<String>,
        /// Commands that should exit non-zero.
        fail_commands: HashSet<String>,
        pushes: StdMutex<Vec<(String, String, String)>>, // (src, remote, target)
        commands: StdMutex<Vec<(String, String)>>,       // (remote, command)
    }

    #[async_trait::async_trait]
    impl TransferTool for MockFleet {
        async fn push(
            &self,
            src: &str,
            endpoint: &SshEndpoint,
            target_dir: &str,
            _timeout: Duration,
        ) -> Result<CommandOutput> {
            self.pushes.lock().unwrap().push((
                src.to_string(),
                endpoint.remote(),
                target_dir.to_string(),
            ));
            if self.fail_push_ips.contains(&endpoint.ip) {
                return Ok(CommandOutput {
                    exit_code: Some(23),
                    output: "rsync error: some files could not be transferred".into(),
                    timed_out: false,
                });
            }
            Ok(ok_output())
        }

        async fn pull(
            &self,
            _endpoint: &SshEndpoint,
            _repo_path: &str,
            dest: &Path,
            _timeout: Duration,
        ) -> Result<CommandOutput> {
            std::fs::create_dir_all(dest.join("backend")).unwrap();
            std::fs::write(dest.join("backend").join("app.py"), "ok").unwrap();
            Ok(ok_output())
        }
    }

    #[async_trait::async_trait]
    impl RemoteShell for MockFleet {
        async fn run(
            &self,
            endpoint: &SshEndpoint,
            command: &str,
            _timeout: Duration,
        ) -> Result<CommandOutput> {
            self.commands
                .lock()
                .unwrap()
                .push((endpoint.remote(), command.to_string()));
            if self.fail_commands.contains(command) {
                return Ok(CommandOutput {
                    exit_code: Some(1),
                    output: "boom".into(),
                    timed_out: false,
                });
            }
            Ok(ok_output())
        }
    }

    struct Harness {
        store: Arc<Store>,
        fleet: Arc<MockFleet>,
        orchestrator: Arc<SyncOrchestrator>,
        cache_dir: tempfile::TempDir,
    }

    async fn harness(fleet: MockFleet) -> Harness {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let fleet = Arc::new(fleet);
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(CacheManager::new(
            cache_dir.path().to_path_buf(),
            store.clone(),
            fleet.clone(),
        ));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            store.clone(),
            cache,
            fleet.clone(),
            fleet.clone(),
        ));
        Harness {
            store,
            fleet,
            orchestrator,
            cache_dir,
        }
    }

    async fn seed_backend_role(store: &Store) {
        store
            .create_role(NewRole {
                name: "backend".to_string(),
                source_paths: vec!["backend/".to_string()],
                target_path: "/srv/backend".to_string(),
                post_sync_cmd: None,
                auto_restart: true,
                systemd_service: Some("autobot-backend".to_string()),
            })
            .await
            .unwrap();
    }

    async fn seed_node(store: &Store, id: &str, ip: &str) {
        store
            .register_node(NewNode {
                node_id: id.to_string(),
                ip_address: ip.to_string(),
                hostname: None,
                ssh_user: Some("ops".to_string()),
                ssh_port: None,
                extra_data: None,
            })
            .await
            .unwrap();
    }

    fn make_snapshot(cache_dir: &Path, commit: &str, paths: &[&str]) -> PathBuf {
        let snapshot = cache_dir.join(commit);
        for p in paths {
            std::fs::create_dir_all(snapshot.join(p)).unwrap();
        }
        snapshot
    }

    #[tokio::test]
    async fn happy_sync_transfers_restarts_and_records() {
        let h = harness(MockFleet::default()).await;
        seed_node(&h.store, "n1", "10.0.0.5").await;
        seed_backend_role(&h.store).await;
        make_snapshot(h.cache_dir.path(), "commit-b", &["backend"]);

        let msg = h
            .orchestrator
            .sync_node_role("n1", "backend", "commit-b", true)
            .await
            .unwrap();
        assert_eq!(msg, "Synced backend to n1");

        // One transfer, trailing-slash semantics, correct destination.
        let pushes = h.fleet.pushes.lock().unwrap().clone();
        assert_eq!(pushes.len(), 1);
        assert!(pushes[0].0.ends_with("backend/"));
        assert_eq!(pushes[0].1, "ops@10.0.0.5");
        assert_eq!(pushes[0].2, "/srv/backend");

        // Restart went out.
        let commands = h.fleet.commands.lock().unwrap().clone();
        assert_eq!(
            commands,
            vec![(
                "ops@10.0.0.5".to_string(),
                "sudo systemctl restart autobot-backend".to_string()
            )]
        );

        // NodeRole and node registry reflect the sync.
        let nr = h.store.get_node_role("n1", "backend").await.unwrap().unwrap();
        assert_eq!(nr.status, RoleStatus::Active);
        assert_eq!(nr.current_version, "commit-b");
        let since = chrono::Utc::now() - nr.last_synced_at.unwrap();
        assert!(since.num_seconds() < 10);

        let node = h.store.get_node("n1").await.unwrap();
        assert_eq!(node.code_status, CodeStatus::UpToDate);
        assert_eq!(node.current_code_version, "commit-b");
    }

    #[tokio::test]
    async fn transfer_failure_fails_sync_without_restart() {
        let fleet = MockFleet {
            fail_push_ips: HashSet::from(["10.0.0.5".to_string()]),
            ..Default::default()
        };
        let h = harness(fleet).await;
        seed_node(&h.store, "n1", "10.0.0.5").await;
        seed_backend_role(&h.store).await;
        make_snapshot(h.cache_dir.path(), "commit-b", &["backend"]);
        h.store
            .assign_role("n1", "backend", AssignmentType::Manual)
            .await
            .unwrap();

        let err = h
            .orchestrator
            .sync_node_role("n1", "backend", "commit-b", true)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Sync failed for backend/:"));

        // No restart was attempted after the failed transfer.
        assert!(h.fleet.commands.lock().unwrap().is_empty());

        // Version unchanged, statuses say FAILED.
        let nr = h.store.get_node_role("n1", "backend").await.unwrap().unwrap();
        assert_eq!(nr.status, RoleStatus::Failed);
        assert_eq!(nr.current_version, "");
        assert_eq!(
            h.store.get_node("n1").await.unwrap().code_status,
            CodeStatus::Failed
        );
    }

    #[tokio::test]
    async fn post_sync_failure_is_a_warning_not_a_failure() {
        let fleet = MockFleet {
            fail_commands: HashSet::from(["/usr/local/bin/reindex".to_string()]),
            ..Default::default()
        };
        let h = harness(fleet).await;
        seed_node(&h.store, "n1", "10.0.0.5").await;
        h.store
            .create_role(NewRole {
                name: "backend".to_string(),
                source_paths: vec!["backend/".to_string()],
                target_path: "/srv/backend".to_string(),
                post_sync_cmd: Some("/usr/local/bin/reindex".to_string()),
                auto_restart: true,
                systemd_service: Some("autobot-backend".to_string()),
            })
            .await
            .unwrap();
        make_snapshot(h.cache_dir.path(), "commit-b", &["backend"]);

        let msg = h
            .orchestrator
            .sync_node_role("n1", "backend", "commit-b", true)
            .await
            .unwrap();
        assert_eq!(msg, "Synced backend to n1");

        // Post-sync ran and failed; restart was still attempted.
        let commands = h.fleet.commands.lock().unwrap().clone();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].1, "/usr/local/bin/reindex");
        assert_eq!(commands[1].1, "sudo systemctl restart autobot-backend");

        let nr = h.store.get_node_role("n1", "backend").await.unwrap().unwrap();
        assert_eq!(nr.current_version, "commit-b");
    }

    #[tokio::test]
    async fn restart_skipped_without_flag_or_auto_restart() {
        let h = harness(MockFleet::default()).await;
        seed_node(&h.store, "n1", "10.0.0.5").await;
        seed_backend_role(&h.store).await;
        make_snapshot(h.cache_dir.path(), "commit-b", &["backend"]);

        h.orchestrator
            .sync_node_role("n1", "backend", "commit-b", false)
            .await
            .unwrap();
        assert!(h.fleet.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_snapshot_fails_before_any_transfer() {
        let h = harness(MockFleet::default()).await;
        seed_node(&h.store, "n1", "10.0.0.5").await;
        seed_backend_role(&h.store).await;

        let err = h
            .orchestrator
            .sync_node_role("n1", "backend", "nowhere", true)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Commit not cached: nowhere");
        assert!(h.fleet.pushes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_source_path_is_skipped() {
        let h = harness(MockFleet::default()).await;
        seed_node(&h.store, "n1", "10.0.0.5").await;
        h.store
            .create_role(NewRole {
                name: "backend".to_string(),
                source_paths: vec!["backend/".to_string(), "ghost/".to_string()],
                target_path: "/srv/backend".to_string(),
                post_sync_cmd: None,
                auto_restart: false,
                systemd_service: None,
            })
            .await
            .unwrap();
        make_snapshot(h.cache_dir.path(), "commit-b", &["backend"]);

        h.orchestrator
            .sync_node_role("n1", "backend", "commit-b", false)
            .await
            .unwrap();
        // Only the existing path was transferred.
        assert_eq!(h.fleet.pushes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn role_without_source_paths_is_invalid() {
        let h = harness(MockFleet::default()).await;
        seed_node(&h.store, "n1", "10.0.0.5").await;
        h.store
            .create_role(NewRole {
                name: "empty".to_string(),
                source_paths: vec![],
                target_path: "/srv/empty".to_string(),
                post_sync_cmd: None,
                auto_restart: false,
                systemd_service: None,
            })
            .await
            .unwrap();

        let err = h
            .orchestrator
            .sync_node_role("n1", "empty", "commit-b", false)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Validation(_)));
    }

    // --- Fan-out ---

    fn rolling_schedule() -> Schedule {
        // Shape only; the executor tests cover cron handling.
        Schedule {
            id: 1,
            name: "nightly".to_string(),
            cron_expression: "*/5 * * * *".to_string(),
            enabled: true,
            target_type: TargetType::All,
            target_nodes: vec![],
            restart_after_sync: true,
            restart_strategy: RestartStrategy::Rolling,
            last_run: None,
            next_run: None,
            last_run_status: None,
            last_run_message: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    async fn seed_fanout(store: &Store, ips: &[(&str, &str)]) {
        seed_backend_role(store).await;
        for (id, ip) in ips {
            seed_node(store, id, ip).await;
            store
                .assign_role(id, "backend", AssignmentType::Manual)
                .await
                .unwrap();
            store
                .set_code_status(id, CodeStatus::Outdated, None)
                .await
                .unwrap();
        }
        // Give the cache manager a source to pull from.
        store
            .register_node(NewNode {
                node_id: "code-src".to_string(),
                ip_address: "10.0.0.2".to_string(),
                hostname: None,
                ssh_user: None,
                ssh_port: None,
                extra_data: None,
            })
            .await
            .unwrap();
        store
            .set_active_code_source("code-src", "/opt/repo", Some("abc123"))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn fanout_partial_failure_is_overall_success() {
        let fleet = MockFleet {
            fail_push_ips: HashSet::from(["10.0.0.12".to_string()]),
            ..Default::default()
        };
        let h = harness(fleet).await;
        seed_fanout(
            &h.store,
            &[
                ("w1", "10.0.0.11"),
                ("w2", "10.0.0.12"),
                ("w3", "10.0.0.13"),
            ],
        )
        .await;

        let (ok, msg) = h
            .orchestrator
            .execute_schedule(&rolling_schedule())
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(msg, "Synced 2/3 nodes (1 failed)");
    }

    #[tokio::test]
    async fn fanout_all_success_message() {
        let h = harness(MockFleet::default()).await;
        seed_fanout(&h.store, &[("w1", "10.0.0.11"), ("w2", "10.0.0.12")]).await;

        let mut schedule = rolling_schedule();
        schedule.restart_strategy = RestartStrategy::Parallel;
        let (ok, msg) = h.orchestrator.execute_schedule(&schedule).await.unwrap();
        assert!(ok);
        assert_eq!(msg, "Successfully synced 2 node(s)");
    }

    #[tokio::test]
    async fn fanout_all_failed_message() {
        let fleet = MockFleet {
            fail_push_ips: HashSet::from(["10.0.0.11".to_string(), "10.0.0.12".to_string()]),
            ..Default::default()
        };
        let h = harness(fleet).await;
        seed_fanout(&h.store, &[("w1", "10.0.0.11"), ("w2", "10.0.0.12")]).await;

        let mut schedule = rolling_schedule();
        schedule.restart_strategy = RestartStrategy::Sequential;
        let (ok, msg) = h.orchestrator.execute_schedule(&schedule).await.unwrap();
        assert!(!ok);
        assert_eq!(msg, "All 2 node sync(s) failed");
    }

    #[tokio::test]
    async fn fanout_with_no_candidates_is_success() {
        let h = harness(MockFleet::default()).await;
        let (ok, msg) = h
            .orchestrator
            .execute_schedule(&rolling_schedule())
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(msg, "No outdated nodes to sync");
    }

    #[tokio::test]
    async fn fanout_specific_targets_only_listed_nodes() {
        let h = harness(MockFleet::default()).await;
        seed_fanout(&h.store, &[("w1", "10.0.0.11"), ("w2", "10.0.0.12")]).await;

        let mut schedule = rolling_schedule();
        schedule.target_type = TargetType::Specific;
        schedule.target_nodes = vec!["w2".to_string()];
        schedule.restart_strategy = RestartStrategy::Sequential;
        let (ok, msg) = h.orchestrator.execute_schedule(&schedule).await.unwrap();
        assert!(ok);
        assert_eq!(msg, "Successfully synced 1 node(s)");

        // Only w2 was touched.
        let pushes = h.fleet.pushes.lock().unwrap().clone();
        assert!(pushes.iter().all(|(_, remote, _)| remote.contains("10.0.0.12")));
    }

    #[tokio::test]
    async fn fanout_outcome_feeds_schedule_row() {
        // Wiring check for the executor: record_run stores what fan-out said.
        let h = harness(MockFleet::default()).await;
        let created = h
            .store
            .create_schedule(
                NewSchedule {
                    name: "nightly".to_string(),
                    cron_expression: "*/5 * * * *".to_string(),
                    enabled: true,
                    target_type: TargetType::All,
                    target_nodes: vec![],
                    restart_after_sync: false,
                    restart_strategy: RestartStrategy::Sequential,
                },
                Some(chrono::Utc::now()),
            )
            .await
            .unwrap();

        let (ok, msg) = h.orchestrator.execute_schedule(&created).await.unwrap();
        assert!(ok);
        let now = chrono::Utc::now();
        h.store
            .record_schedule_run(
                created.id,
                now,
                Some(now + chrono::Duration::minutes(5)),
                RunOutcome::Succeeded,
                &msg,
            )
            .await
            .unwrap();
        let row = h.store.get_schedule(created.id).await.unwrap();
        assert_eq!(row.last_run_status, Some(RunOutcome::Succeeded));
        assert_eq!(row.last_run_message.as_deref(), Some("No outdated nodes to sync"));
    }
}
