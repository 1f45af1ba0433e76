mod api;
mod broadcast;
mod cache;
mod config;
mod error;
mod playbook;
mod registry;
mod schedule;
mod store;
mod sync;
mod vault;

use std::error::Error;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::api::AppState;
use crate::broadcast::ProgressBroadcaster;
use crate::cache::CacheManager;
use crate::config::Config;
use crate::error::ControlError;
use crate::playbook::PlaybookRunner;
use crate::registry::NodeRegistry;
use crate::schedule::ScheduleExecutor;
use crate::store::Store;
use crate::sync::SyncOrchestrator;
use crate::sync::transfer::{RsyncTransfer, SshShell};
use crate::vault::CredentialVault;

#[derive(Parser)]
#[command(name = "helmsman", about = "Fleet control plane")]
enum Cli {
    /// Start the control-plane server (default when no subcommand is given)
    #[command(alias = "run")]
    Serve {
        /// Do not start the schedule executor loop
        #[arg(long)]
        no_scheduler: bool,
    },
    /// Validate a cron expression and show its next firings
    ValidateCron {
        /// 5-field cron expression, e.g. "0 2 * * *"
        expression: String,
    },
    /// Pull a snapshot from the active code source into the local cache
    Pull {
        /// Commit identifier ("latest" pulls the current head)
        #[arg(long, default_value = "latest")]
        commit: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();

    // Default to Serve when no subcommand is given, but keep --help and
    // --version working.
    let args: Vec<String> = std::env::args().collect();
    let cli = if args.len() <= 1 {
        Cli::Serve { no_scheduler: false }
    } else {
        Cli::parse()
    };

    match cli {
        Cli::Serve { no_scheduler } => run_server(no_scheduler).await,
        Cli::ValidateCron { expression } => {
            validate_cron_cmd(&expression);
            Ok(())
        }
        Cli::Pull { commit } => {
            pull_cmd(&commit).await;
            Ok(())
        }
    }
}

fn validate_cron_cmd(expression: &str) {
    if !schedule::cron::validate_cron(expression) {
        eprintln!("invalid cron expression: {expression}");
        std::process::exit(2);
    }
    println!("{}", schedule::cron::describe_cron(expression));
    for run in schedule::cron::next_runs(expression, chrono::Utc::now(), 5) {
        println!("{}", run.to_rfc3339());
    }
}

async fn pull_cmd(commit: &str) {
    let result: anyhow::Result<std::path::PathBuf> = async {
        let config = Config::from_env()?;
        let store = Arc::new(Store::open(&config.db_path)?);
        let permits = Arc::new(Semaphore::new(config.max_concurrent_ssh));
        let transfer = Arc::new(RsyncTransfer::new(config.ssh_key_path.clone(), permits));
        let cache = CacheManager::new(config.cache_root.clone(), store, transfer);
        Ok(cache.ensure(commit).await?)
    }
    .await;

    match result {
        Ok(path) => println!("cached at {}", path.display()),
        Err(e) => {
            eprintln!("pull failed: {e}");
            let code = match e.downcast_ref::<ControlError>() {
                Some(ControlError::Timeout(_)) => 124,
                Some(ControlError::Validation(_)) => 2,
                _ => 1,
            };
            std::process::exit(code);
        }
    }
}

async fn run_server(no_scheduler: bool) -> Result<(), Box<dyn Error>> {
    let config = Config::from_env()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("helmsman=info,tower_http=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_tree::HierarchicalLayer::new(2)
                .with_targets(true)
                .with_bracketed_fields(false),
        )
        .with(sentry::integrations::tracing::layer().event_filter(
            |metadata| match *metadata.level() {
                tracing::Level::ERROR => sentry::integrations::tracing::EventFilter::Event,
                tracing::Level::WARN | tracing::Level::INFO => {
                    sentry::integrations::tracing::EventFilter::Breadcrumb
                }
                _ => sentry::integrations::tracing::EventFilter::Ignore,
            },
        ))
        .init();

    let _guard = sentry::init((
        config.sentry_dsn.clone().unwrap_or_default(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.environment.clone().into()),
            send_default_pii: false,
            traces_sample_rate: 0.2,
            enable_logs: true,
            ..Default::default()
        },
    ));

    let store = Arc::new(Store::open(&config.db_path).context("failed to open store")?);

    // One semaphore caps every outbound ssh session: transfers, shells,
    // cache pulls.
    let ssh_permits = Arc::new(Semaphore::new(config.max_concurrent_ssh));
    let transfer = Arc::new(RsyncTransfer::new(
        config.ssh_key_path.clone(),
        ssh_permits.clone(),
    ));
    let shell = Arc::new(SshShell::new(config.ssh_key_path.clone(), ssh_permits));

    let cache = Arc::new(CacheManager::new(
        config.cache_root.clone(),
        store.clone(),
        transfer.clone(),
    ));
    let registry = Arc::new(NodeRegistry::new(store.clone()));
    let orchestrator = Arc::new(SyncOrchestrator::new(
        store.clone(),
        cache.clone(),
        transfer,
        shell,
    ));
    let executor = Arc::new(ScheduleExecutor::new(store.clone(), orchestrator.clone()));
    let playbooks = Arc::new(PlaybookRunner::new(
        config.ansible_dir.clone(),
        config.inventory_path.clone(),
    ));
    let broadcaster = Arc::new(ProgressBroadcaster::new());

    let vault = config
        .encryption_key
        .as_ref()
        .map(|key| Arc::new(CredentialVault::new(store.clone(), key)));
    if vault.is_none() {
        tracing::warn!("ENCRYPTION_KEY not set; credential vault routes disabled");
    }

    if no_scheduler {
        tracing::info!("schedule executor disabled by flag");
    } else {
        executor.start().await;
    }

    let state = AppState {
        store,
        registry,
        vault,
        cache,
        orchestrator,
        executor: executor.clone(),
        playbooks,
        broadcaster,
    };
    let app = api::create_app(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "control plane listening");

    axum::serve(listener, app).await?;

    executor.stop().await;
    Ok(())
}
