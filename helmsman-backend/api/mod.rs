pub mod code_source;
pub mod credentials;
pub mod error;
pub mod middleware;
pub mod nodes;
pub mod playbooks;
pub mod roles;
mod routes;
pub mod schedules;
pub mod sync;

use std::sync::Arc;

use axum::Router;

use crate::broadcast::ProgressBroadcaster;
use crate::cache::CacheManager;
use crate::playbook::PlaybookRunner;
use crate::registry::NodeRegistry;
use crate::schedule::ScheduleExecutor;
use crate::store::Store;
use crate::sync::SyncOrchestrator;
use crate::vault::CredentialVault;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub registry: Arc<NodeRegistry>,
    /// None when `ENCRYPTION_KEY` is not configured; credential routes
    /// answer 503 instead of running without encryption.
    pub vault: Option<Arc<CredentialVault>>,
    pub cache: Arc<CacheManager>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub executor: Arc<ScheduleExecutor>,
    pub playbooks: Arc<PlaybookRunner>,
    pub broadcaster: Arc<ProgressBroadcaster>,
}

pub fn create_app(state: AppState) -> Router {
    routes::build_router(state)
}
