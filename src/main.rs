// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::Arc;

use mimalloc::MiMalloc;
use tracing::info;

use modules::collab::fakes::{FakeAccountStore, FakeMessageStore, FakeSyncConfigStore, FakeTokenStore};
use modules::collab::{AccountStore, MessageStore, SyncConfigStore, TokenStore};
use modules::common::signal::SignalManager;
use modules::context::Initialize;
use modules::error::EngineResult;
use modules::fetch::gmail::GmailFetchAdapter;
use modules::fetch::imap::{AccountCredential, ImapFetchAdapter};
use modules::fetch::FetchAdapterRouter;
use modules::fetch_scheduler::{FetchScheduler, FetchSchedulerConfig};
use modules::logger;
use modules::model::GlobalSyncConfig;
use modules::oauth2::TokenRefresher;
use modules::settings::cli::SETTINGS;
use modules::sync_manager::IncrementalSyncManager;

mod modules;

use crate::engine_version;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

static LOGO: &str = r#"
 __  __       _ _ ____                   _____             _
|  \/  | __ _(_) / ___| _   _ _ __   ___| ____|_ __   __ _(_)_ __   ___
| |\/| |/ _` | | \___ \| | | | '_ \ / __|  _| | '_ \ / _` | | '_ \ / _ \
| |  | | (_| | | |___) | |_| | | | | (__| |___| | | | (_| | | | | |  __/
|_|  |_|\__,_|_|____/ \__, |_| |_|\___|_____|_| |_|\__, |_|_| |_|\___|
                       |___/                        |___/
"#;

/// Wiring for the engine's injected collaborators. A real deployment swaps
/// the `Fake*` stores for its own persistence; this binary exists to exercise
/// the engine end-to-end, not to ship a production store.
struct Collaborators {
    accounts: Arc<dyn AccountStore>,
    sync_configs: Arc<dyn SyncConfigStore>,
    messages: Arc<dyn MessageStore>,
    tokens: Arc<dyn TokenStore>,
}

impl Collaborators {
    fn new_in_memory() -> Self {
        Self {
            accounts: Arc::new(FakeAccountStore::default()),
            sync_configs: Arc::new(FakeSyncConfigStore::default()),
            messages: Arc::new(FakeMessageStore::default()),
            tokens: Arc::new(FakeTokenStore::default()),
        }
    }
}

#[tokio::main]
async fn main() -> EngineResult<()> {
    logger::initialize_logging();
    info!("{}", LOGO);
    info!("Starting mailsync-engine");
    info!("Version: {}", engine_version!());

    SignalManager::initialize().await?;

    let collaborators = Collaborators::new_in_memory();
    let credential = Arc::new(AccountCredential::new(collaborators.tokens.clone()));
    let token_refresher = Arc::new(TokenRefresher::new(collaborators.tokens.clone()));
    let fetch_adapter: Arc<dyn modules::fetch::FetchAdapter> = Arc::new(FetchAdapterRouter::new(
        Arc::new(ImapFetchAdapter::new(credential)),
        Arc::new(GmailFetchAdapter::new(token_refresher)),
    ));

    let cache = Arc::new(modules::cache::EmailCache::new(
        SETTINGS.scheduler_cache_duration_secs as i64 * 1_000,
    ));
    let scheduler = FetchScheduler::with_config(
        collaborators.accounts.clone(),
        fetch_adapter.clone(),
        cache,
        SETTINGS.scheduler_max_workers,
        FetchSchedulerConfig {
            min_fetch_interval: std::time::Duration::from_secs(SETTINGS.scheduler_min_fetch_interval_secs),
            idle_check_interval: std::time::Duration::from_secs(SETTINGS.worker_idle_check_timer_secs),
            idle_timeout_ms: SETTINGS.worker_idle_timeout_secs as i64 * 1_000,
            cleanup_interval: std::time::Duration::from_secs(SETTINGS.worker_cleanup_interval_secs),
            subscription_default_expiration_secs: SETTINGS.subscription_default_expiration_secs,
            subscription_cleanup_interval_secs: SETTINGS.subscription_cleanup_interval_secs,
            subscription_max_subscriptions: SETTINGS.subscription_max_subscriptions,
        },
    );
    scheduler.start_event_fanout();
    let cleanup_handle = scheduler.start_cleanup_sweep();

    let sync_manager = IncrementalSyncManager::with_intervals(
        collaborators.sync_configs.clone(),
        collaborators.accounts.clone(),
        collaborators.messages.clone(),
        fetch_adapter,
        GlobalSyncConfig {
            max_sync_workers: SETTINGS.sync_workers,
            ..Default::default()
        },
        std::time::Duration::from_secs(SETTINGS.sync_poll_interval_secs),
        SETTINGS.sync_batch_size,
    );
    sync_manager.load().await?;
    let sync_handles = sync_manager.start();
    let worker_pool_handle = sync_manager.spawn_workers();

    info!("engine started, awaiting shutdown signal");
    let mut shutdown = modules::common::signal::SIGNAL_MANAGER.subscribe();
    let _ = shutdown.recv().await;

    info!("shutting down");
    cleanup_handle.cancel().await;
    for handle in sync_handles {
        handle.cancel().await;
    }
    worker_pool_handle.cancel().await;

    let metrics = scheduler.get_metrics();
    info!(
        active = metrics.active,
        total = metrics.total,
        delivered = metrics.delivered,
        cache_hit_rate = metrics.cache_hit_rate,
        active_workers = metrics.active_workers,
        "final metrics snapshot"
    );
    Ok(())
}
