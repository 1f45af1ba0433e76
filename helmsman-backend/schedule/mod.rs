//! Schedule executor: a minute-tick loop that fires due schedules through
//! the sync orchestrator.
//!
//! Catch-up policy: a schedule that missed several windows while the service
//! was down fires once for the most recent miss, then `next_run` advances to
//! the first future occurrence (computing it from "now" rather than from the
//! missed slot collapses the backlog).

pub mod cron;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::store::Store;
use crate::store::schedules::RunOutcome;
use crate::sync::SyncOrchestrator;

pub const CHECK_INTERVAL_SECS: u64 = 60;

pub struct ScheduleExecutor {
    store: Arc<Store>,
    orchestrator: Arc<SyncOrchestrator>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduleExecutor {
    pub fn new(store: Arc<Store>, orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self {
            store,
            orchestrator,
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            tracing::warn!("schedule executor already running");
            return;
        }

        self.running.store(true, Ordering::SeqCst);
        let store = self.store.clone();
        let orchestrator = self.orchestrator.clone();
        let running = self.running.clone();

        *handle = Some(tokio::spawn(async move {
            tracing::info!("schedule executor started");
            let mut interval = tokio::time::interval(Duration::from_secs(CHECK_INTERVAL_SECS));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                // The loop must outlive any single bad cycle.
                match check_and_execute(&store, &orchestrator).await {
                    Ok(0) => {}
                    Ok(executed) => {
                        tracing::info!(executed, "executed schedule(s) this cycle");
                    }
                    Err(e) => tracing::error!(error = %e, "schedule check failed"),
                }
            }
            tracing::info!("schedule executor stopped");
        }));
    }

    /// Stop dispatching. An in-flight `execute_schedule` runs to completion;
    /// the abort lands on the interval await.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut handle = self.handle.lock().await;
        if let Some(h) = handle.take() {
            h.abort();
            tracing::info!("schedule executor stop requested");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// One executor cycle: fire every enabled schedule whose `next_run` is due,
/// then advance it. Returns how many schedules fired.
pub async fn check_and_execute(
    store: &Arc<Store>,
    orchestrator: &Arc<SyncOrchestrator>,
) -> Result<usize> {
    let now = Utc::now();
    let due = store.due_schedules(now).await?;
    let mut executed = 0usize;

    for schedule in due {
        tracing::info!(
            schedule = %schedule.name,
            next_run = ?schedule.next_run,
            "schedule is due"
        );

        let (success, message) = match orchestrator.execute_schedule(&schedule).await {
            Ok(outcome) => outcome,
            Err(e) => (false, e.to_string()),
        };

        // next_run computed from now, not from the missed slot: a backlog of
        // missed windows becomes exactly one firing.
        let next_run = cron::calculate_next_run(&schedule.cron_expression, now);
        let outcome = if success {
            RunOutcome::Succeeded
        } else {
            RunOutcome::Failed
        };
        store
            .record_schedule_run(schedule.id, now, next_run, outcome, &message)
            .await?;
        executed += 1;

        tracing::info!(
            schedule = %schedule.name,
            status = outcome.as_str(),
            message = %message,
            next = ?next_run,
            "schedule completed"
        );
    }

    Ok(executed)
}
