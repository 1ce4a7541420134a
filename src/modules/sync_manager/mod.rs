// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Background incremental sync, independent of the real-time Fetch
//! Scheduler (§4.4): a poller enqueues accounts whose `sync_interval_seconds`
//! has elapsed, a bounded pool of workers runs each sync cycle, and a config
//! monitor keeps the in-memory view in sync with the injected
//! `SyncConfigStore` (including auto-provisioning verified accounts that
//! don't have a config yet).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock, Semaphore};

use crate::modules::collab::{AccountStore, MessageStore, SyncConfigStore};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::EngineResult;
use crate::modules::fetch::{FetchAdapter, FetchOptions};
use crate::modules::model::{
    GlobalSyncConfig, MailAccount, SyncConfig, SyncStatistics, SyncStatus, TemporarySyncConfig,
};
use crate::modules::scheduler::{PeriodicTask, TaskHandle};
use crate::{raise_error, utc_now};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_BATCH_SIZE: usize = 10;
const CONFIG_MONITOR_INTERVAL: Duration = Duration::from_secs(10);
const SYNC_QUEUE_CAPACITY: usize = 200;
const OVERLAP_MS: i64 = 5 * 60 * 1_000;
const MAX_WINDOW_MS: i64 = 24 * 60 * 60 * 1_000;
const NEAR_IMMEDIATE_OFFSET_MS: i64 = 60 * 60 * 1_000;
const SYNC_NOW_INNER_TIMEOUT: Duration = Duration::from_secs(2 * 60);
const SYNC_NOW_OUTER_TIMEOUT: Duration = Duration::from_secs(3 * 60);
const FALLBACK_FOLDERS: &[&str] = &["INBOX", "SENT", "DRAFTS"];

/// `sync_configs` and `sync_statistics` behind one lock so
/// `commit_sync_cycle` can update both in a single critical section — a
/// crash between "wrote the new cursor" and "recorded the day's counters"
/// is unrepresentable.
#[derive(Default)]
struct SyncState {
    configs: HashMap<u64, SyncConfig>,
    statistics: HashMap<(u64, String), SyncStatistics>,
    /// Caller-scoped overrides of `SyncConfig` (§3), consulted in addition
    /// to `configs` and never persisted via `SyncConfigStore`.
    temporary: HashMap<u64, TemporarySyncConfig>,
}

/// Drives incremental sync for every account the injected stores know about.
/// Owns no fetch concurrency of its own beyond `max_sync_workers`; this is
/// entirely separate from the Worker Pool's per-mailbox fetch slot.
pub struct IncrementalSyncManager {
    state: RwLock<SyncState>,
    sync_config_store: Arc<dyn SyncConfigStore>,
    account_store: Arc<dyn AccountStore>,
    message_store: Arc<dyn MessageStore>,
    fetch_adapter: Arc<dyn FetchAdapter>,
    global_config: RwLock<GlobalSyncConfig>,
    sync_queue_tx: mpsc::Sender<u64>,
    sync_queue_rx: tokio::sync::Mutex<Option<mpsc::Receiver<u64>>>,
    poll_interval: Duration,
    batch_size: usize,
}

impl IncrementalSyncManager {
    pub fn new(
        sync_config_store: Arc<dyn SyncConfigStore>,
        account_store: Arc<dyn AccountStore>,
        message_store: Arc<dyn MessageStore>,
        fetch_adapter: Arc<dyn FetchAdapter>,
        global_config: GlobalSyncConfig,
    ) -> Arc<Self> {
        let (sync_queue_tx, sync_queue_rx) = mpsc::channel(SYNC_QUEUE_CAPACITY);
        Arc::new(Self {
            state: RwLock::new(SyncState::default()),
            sync_config_store,
            account_store,
            message_store,
            fetch_adapter,
            global_config: RwLock::new(global_config),
            sync_queue_tx,
            sync_queue_rx: tokio::sync::Mutex::new(Some(sync_queue_rx)),
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Same as `new`, but with the poll cadence and per-tick batch size
    /// taken from the caller instead of the defaults.
    pub fn with_intervals(
        sync_config_store: Arc<dyn SyncConfigStore>,
        account_store: Arc<dyn AccountStore>,
        message_store: Arc<dyn MessageStore>,
        fetch_adapter: Arc<dyn FetchAdapter>,
        global_config: GlobalSyncConfig,
        poll_interval: Duration,
        batch_size: usize,
    ) -> Arc<Self> {
        let (sync_queue_tx, sync_queue_rx) = mpsc::channel(SYNC_QUEUE_CAPACITY);
        Arc::new(Self {
            state: RwLock::new(SyncState::default()),
            sync_config_store,
            account_store,
            message_store,
            fetch_adapter,
            global_config: RwLock::new(global_config),
            sync_queue_tx,
            sync_queue_rx: tokio::sync::Mutex::new(Some(sync_queue_rx)),
            poll_interval,
            batch_size,
        })
    }

    /// Today's `SyncStatistics` for one account, for callers that want to
    /// surface sync health (e.g. a status endpoint built on top of this
    /// engine).
    pub async fn statistics_for(&self, account_id: u64, date: &str) -> Option<SyncStatistics> {
        self.state
            .read()
            .await
            .statistics
            .get(&(account_id, date.to_string()))
            .cloned()
    }

    /// Loads the current config snapshot from the store into memory. Called
    /// once at startup before `start` so the first poll tick has data.
    pub async fn load(&self) -> EngineResult<()> {
        let configs = self.sync_config_store.list().await?;
        self.state.write().await.configs = configs;
        Ok(())
    }

    /// Spawns the poller and the config monitor. Returns their handles so
    /// the caller can shut the manager down cleanly. Call `spawn_workers`
    /// separately to start consuming the queue they feed.
    pub fn start(self: &Arc<Self>) -> Vec<TaskHandle> {
        vec![self.start_poller(), self.start_config_monitor()]
    }

    fn start_poller(self: &Arc<Self>) -> TaskHandle {
        let manager = self.clone();
        PeriodicTask::new("incremental-sync-poller").start(
            move || {
                let manager = manager.clone();
                async move {
                    manager.poll_tick().await;
                    Ok(())
                }
            },
            self.poll_interval,
            false,
        )
    }

    async fn poll_tick(self: &Arc<Self>) {
        let now = utc_now!();
        let due: Vec<u64> = {
            let state = self.state.read().await;
            state
                .configs
                .iter()
                .filter(|(account_id, config)| {
                    if !config.enable_auto_sync {
                        return false;
                    }
                    let temp = state.temporary.get(*account_id);
                    let effective = Self::apply_temporary_override((*config).clone(), temp, now);
                    Self::is_due(&effective, now)
                })
                .map(|(account_id, _)| *account_id)
                .take(self.batch_size)
                .collect()
        };
        for account_id in due {
            if self.sync_queue_tx.try_send(account_id).is_err() {
                tracing::warn!(account_id, "sync queue full, account stays due for next tick");
            }
        }
    }

    /// Registers (or replaces) a temporary override, active while
    /// `now <= expires_at`. Never written to `SyncConfigStore`: it overlays
    /// the stored `SyncConfig` in memory and has no effect once expired.
    pub async fn set_temporary_config(&self, temp: TemporarySyncConfig) {
        self.state.write().await.temporary.insert(temp.account_id, temp);
    }

    /// Overlays an active temporary override's `sync_interval_seconds`/
    /// `sync_folders` onto a clone of `config`, leaving `config` itself (and
    /// anything persisted from it) untouched.
    fn apply_temporary_override(mut config: SyncConfig, temp: Option<&TemporarySyncConfig>, now: i64) -> SyncConfig {
        if let Some(temp) = temp {
            if temp.is_active(now) {
                config.sync_interval_seconds = temp.sync_interval_seconds;
                config.sync_folders = temp.sync_folders.clone();
            }
        }
        config
    }

    fn is_due(config: &SyncConfig, now: i64) -> bool {
        let next = config.last_sync_time.unwrap_or(0) + (config.sync_interval_seconds as i64) * 1_000;
        now >= next
    }

    /// Consumes the queue populated by the poller, running up to
    /// `max_sync_workers` cycles concurrently. Mirrors the teacher's
    /// `TaskProcessor`: a single consumer loop gating fan-out with a
    /// `Semaphore` rather than one task per worker slot.
    pub fn spawn_workers(self: &Arc<Self>) -> WorkerPoolHandle {
        let manager = self.clone();
        let cancel = tokio_util::sync::CancellationToken::new();
        let task_cancel = cancel.clone();
        let join_handle = tokio::spawn(async move {
            let mut rx = manager
                .sync_queue_rx
                .lock()
                .await
                .take()
                .expect("spawn_workers called once");
            let max_workers = manager.global_config.read().await.max_sync_workers.max(1);
            let semaphore = Arc::new(Semaphore::new(max_workers));
            loop {
                tokio::select! {
                    account_id = rx.recv() => {
                        let Some(account_id) = account_id else { break };
                        loop {
                            match semaphore.clone().try_acquire_owned() {
                                Ok(permit) => {
                                    let manager = manager.clone();
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        if let Err(e) = manager.run_sync_cycle(account_id).await {
                                            tracing::warn!(account_id, error = %e, "sync cycle failed");
                                        }
                                    });
                                    break;
                                }
                                Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
                            }
                        }
                    }
                    _ = task_cancel.cancelled() => break,
                }
            }
        });
        WorkerPoolHandle { cancel, join_handle }
    }

    /// The per-account sync cycle (§4.4 steps 1-8): re-validate, mark
    /// syncing, compute the overlap window, fetch, dedup via the injected
    /// `MessageStore`, and commit the new cursor regardless of outcome.
    async fn run_sync_cycle(&self, account_id: u64) -> EngineResult<()> {
        let Some(account) = self.account_store.get(account_id).await? else {
            return Err(raise_error!(
                format!("account {account_id} not found"),
                ErrorCode::NotFound
            ));
        };
        if !account.verified {
            return Ok(());
        }

        let started_at = utc_now!();
        let mut config = self.config_for(account_id).await;
        let effective = self.effective_config_for(account_id, started_at).await;
        config.sync_status = SyncStatus::Syncing;
        self.commit_config(account_id, config.clone()).await?;

        let window_start = Self::window_start(&config, started_at);
        let folders = self.resolve_folders(&account, &effective).await;
        let options = FetchOptions {
            folders,
            start_date: Some(window_start),
            end_date: Some(started_at),
            limit: 0,
            offset: 0,
            include_body: true,
            last_history_id: config.last_history_id.clone(),
        };

        let outcome = self.fetch_adapter.fetch(&account, &options).await;
        let finished_at = utc_now!();
        let duration_ms = (finished_at - started_at).max(0) as u64;
        match outcome {
            Ok(result) => {
                let max_emails = self.global_config.read().await.max_emails_per_sync;
                let mut synced = 0u64;
                let mut last_message_id = config.last_sync_message_id.clone();
                for message in result.messages.into_iter().take(max_emails) {
                    let Some(message_id) = message.message_id.clone() else {
                        continue;
                    };
                    if self.message_store.exists(account_id, &message_id).await? {
                        continue;
                    }
                    last_message_id = Some(message_id);
                    self.message_store.insert(message).await?;
                    synced += 1;
                }
                config.last_sync_time = Some(started_at);
                config.last_sync_end_time = Some(finished_at);
                config.last_sync_message_id = last_message_id;
                config.last_history_id = result.history_id.or(config.last_history_id);
                config.sync_status = SyncStatus::Idle;
                config.last_sync_error = None;
                self.commit_sync_cycle(account_id, config, finished_at, synced, duration_ms, false)
                    .await?;
                tracing::info!(account_id, synced, "sync cycle completed");
                Ok(())
            }
            Err(e) => {
                config.last_sync_end_time = Some(finished_at);
                config.sync_status = SyncStatus::Error;
                config.last_sync_error = Some(e.to_string());
                self.commit_sync_cycle(account_id, config, finished_at, 0, duration_ms, true)
                    .await?;
                Err(e)
            }
        }
    }

    /// `last_sync_end_time - 5min` overlap, clamped so the window never
    /// exceeds 24h even if the account hasn't synced in a long time.
    fn window_start(config: &SyncConfig, now: i64) -> i64 {
        let floor = now - MAX_WINDOW_MS;
        match config.last_sync_end_time {
            Some(last) => (last - OVERLAP_MS).max(floor),
            None => floor,
        }
    }

    async fn resolve_folders(&self, account: &MailAccount, config: &SyncConfig) -> Vec<String> {
        if !config.sync_folders.is_empty() {
            return config.sync_folders.clone();
        }
        match self.fetch_adapter.list_mailboxes(account).await {
            Ok(mailboxes) if !mailboxes.is_empty() => {
                mailboxes.into_iter().map(|m| m.name).collect()
            }
            _ => FALLBACK_FOLDERS.iter().map(|f| f.to_string()).collect(),
        }
    }

    async fn config_for(&self, account_id: u64) -> SyncConfig {
        self.state
            .read()
            .await
            .configs
            .get(&account_id)
            .cloned()
            .unwrap_or_default()
    }

    /// `config_for` overlaid with an active `TemporarySyncConfig`, if the
    /// account has one registered. Recomputed from `now` on every call, so
    /// the override falls back to the persisted config by itself once
    /// `expires_at` passes — nothing needs to clean it up.
    async fn effective_config_for(&self, account_id: u64, now: i64) -> SyncConfig {
        let state = self.state.read().await;
        let config = state.configs.get(&account_id).cloned().unwrap_or_default();
        Self::apply_temporary_override(config, state.temporary.get(&account_id), now)
    }

    async fn commit_config(&self, account_id: u64, config: SyncConfig) -> EngineResult<()> {
        self.sync_config_store.put(account_id, config.clone()).await?;
        self.state.write().await.configs.insert(account_id, config);
        Ok(())
    }

    fn date_key(epoch_ms: i64) -> String {
        chrono::DateTime::from_timestamp_millis(epoch_ms)
            .map(|dt| dt.date_naive().to_string())
            .unwrap_or_default()
    }

    /// The terminal commit of a sync cycle: persists the new `SyncConfig`
    /// and folds this cycle's counters into today's `SyncStatistics` under
    /// one write guard over `SyncState`.
    async fn commit_sync_cycle(
        &self,
        account_id: u64,
        config: SyncConfig,
        finished_at: i64,
        emails_synced: u64,
        duration_ms: u64,
        errored: bool,
    ) -> EngineResult<()> {
        self.sync_config_store.put(account_id, config.clone()).await?;
        let date = Self::date_key(finished_at);
        let mut state = self.state.write().await;
        state.configs.insert(account_id, config);
        let entry = state
            .statistics
            .entry((account_id, date.clone()))
            .or_insert_with(|| SyncStatistics {
                date,
                ..Default::default()
            });
        entry.emails_synced += emails_synced;
        entry.duration_ms += duration_ms;
        if errored {
            entry.errors_count += 1;
        }
        Ok(())
    }

    /// Forces a sync cycle to run now, independent of `sync_interval_seconds`,
    /// bounded by a 2min inner timeout on the cycle itself and a 3min outer
    /// timeout covering queueing delay.
    pub async fn sync_now(&self, account_id: u64) -> EngineResult<()> {
        let result = tokio::time::timeout(SYNC_NOW_OUTER_TIMEOUT, async {
            tokio::time::timeout(SYNC_NOW_INNER_TIMEOUT, self.run_sync_cycle(account_id)).await
        })
        .await;
        match result {
            Ok(Ok(inner)) => inner,
            Ok(Err(_)) => Err(raise_error!(
                format!("sync_now timed out running the sync cycle for account {account_id}"),
                ErrorCode::Unavailable
            )),
            Err(_) => Err(raise_error!(
                format!("sync_now timed out waiting for account {account_id}"),
                ErrorCode::Unavailable
            )),
        }
    }

    /// Applies a new config, persisting it and rewinding `last_sync_time` by
    /// 24h when auto-sync is newly enabled so the next cycle picks up
    /// everything missed while it was off.
    pub async fn update_subscription(&self, account_id: u64, mut config: SyncConfig) -> EngineResult<()> {
        config = config.validated();
        let was_enabled = self
            .state
            .read()
            .await
            .configs
            .get(&account_id)
            .is_some_and(|c| c.enable_auto_sync);
        if config.enable_auto_sync && !was_enabled {
            config.last_sync_time = Some(utc_now!() - MAX_WINDOW_MS);
        }
        self.commit_config(account_id, config).await
    }

    fn start_config_monitor(self: &Arc<Self>) -> TaskHandle {
        let manager = self.clone();
        PeriodicTask::new("incremental-sync-config-monitor").start(
            move || {
                let manager = manager.clone();
                async move { manager.reconcile_configs().await }
            },
            CONFIG_MONITOR_INTERVAL,
            true,
        )
    }

    /// Reconciles the in-memory view with the `SyncConfigStore`: a config
    /// seen for the first time is force-run near-immediately (`now - 1h`),
    /// one already known keeps its in-memory `last_sync_time` even if the
    /// store's copy disagrees, one no longer in the store is dropped, and a
    /// verified account with no config at all is auto-provisioned from
    /// `GlobalSyncConfig` defaults.
    async fn reconcile_configs(&self) -> EngineResult<()> {
        let stored = self.sync_config_store.list().await?;
        let now = utc_now!();
        {
            let mut state = self.state.write().await;
            state.configs.retain(|account_id, _| stored.contains_key(account_id));
            for (account_id, mut config) in stored.clone() {
                match state.configs.get(&account_id) {
                    Some(existing) => config.last_sync_time = existing.last_sync_time,
                    None => config.last_sync_time = Some(now - NEAR_IMMEDIATE_OFFSET_MS),
                }
                state.configs.insert(account_id, config);
            }
        }

        let global = self.global_config.read().await.clone();
        if !global.default_enable_sync {
            return Ok(());
        }
        for account in self.account_store.list_verified().await? {
            if stored.contains_key(&account.id) {
                continue;
            }
            let config = SyncConfig {
                enable_auto_sync: global.default_enable_sync,
                sync_interval_seconds: global.default_sync_interval,
                sync_folders: global.default_sync_folders.clone(),
                last_sync_time: Some(now - NEAR_IMMEDIATE_OFFSET_MS),
                ..Default::default()
            }
            .validated();
            self.commit_config(account.id, config).await?;
            tracing::info!(account_id = account.id, "auto-provisioned sync config for verified account");
        }
        Ok(())
    }
}

/// Handle for the consumer loop spawned by `spawn_workers`, separate from
/// `TaskHandle` since it isn't interval-driven.
pub struct WorkerPoolHandle {
    cancel: tokio_util::sync::CancellationToken,
    join_handle: tokio::task::JoinHandle<()>,
}

impl WorkerPoolHandle {
    pub async fn cancel(self) {
        self.cancel.cancel();
        let _ = self.join_handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::collab::fakes::{FakeAccountStore, FakeMessageStore, FakeSyncConfigStore};
    use crate::modules::fetch::FetchResult;
    use crate::modules::model::{Mailbox, MailAccount, Message};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubAdapter {
        messages: Vec<Message>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FetchAdapter for StubAdapter {
        async fn fetch(&self, _account: &MailAccount, _options: &FetchOptions) -> EngineResult<FetchResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchResult {
                messages: self.messages.clone(),
                history_id: None,
            })
        }

        async fn list_mailboxes(&self, _account: &MailAccount) -> EngineResult<Vec<Mailbox>> {
            Ok(vec![])
        }

        async fn verify(&self, _account: &MailAccount) -> EngineResult<()> {
            Ok(())
        }
    }

    fn verified_account(id: u64) -> MailAccount {
        MailAccount {
            id,
            address: format!("user{id}@example.com"),
            verified: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn sync_now_dedupes_against_the_message_store() {
        let accounts = Arc::new(FakeAccountStore::default());
        accounts
            .accounts
            .write()
            .unwrap()
            .insert(1, verified_account(1));
        let configs = Arc::new(FakeSyncConfigStore::default());
        let messages_store = Arc::new(FakeMessageStore::default());
        let message = Message {
            account_id: 1,
            message_id: Some("m1".into()),
            date: Some(utc_now!()),
            ..Default::default()
        };
        let adapter = Arc::new(StubAdapter {
            messages: vec![message.clone()],
            calls: AtomicUsize::new(0),
        });

        let manager = IncrementalSyncManager::new(
            configs.clone(),
            accounts.clone(),
            messages_store.clone(),
            adapter,
            GlobalSyncConfig::default(),
        );
        manager.sync_now(1).await.unwrap();
        assert!(messages_store.exists(1, "m1").await.unwrap());
        let stored = configs.get(1).await.unwrap().unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Idle);
        assert!(stored.last_sync_time.is_some());

        let today = IncrementalSyncManager::date_key(utc_now!());
        let stats = manager.statistics_for(1, &today).await.unwrap();
        assert_eq!(stats.emails_synced, 1);
        assert_eq!(stats.errors_count, 0);
    }

    #[tokio::test]
    async fn sync_now_on_unverified_account_is_a_noop() {
        let accounts = Arc::new(FakeAccountStore::default());
        accounts.accounts.write().unwrap().insert(
            1,
            MailAccount {
                id: 1,
                verified: false,
                ..Default::default()
            },
        );
        let configs = Arc::new(FakeSyncConfigStore::default());
        let messages_store = Arc::new(FakeMessageStore::default());
        let adapter = Arc::new(StubAdapter {
            messages: vec![],
            calls: AtomicUsize::new(0),
        });
        let manager = IncrementalSyncManager::new(
            configs.clone(),
            accounts,
            messages_store,
            adapter,
            GlobalSyncConfig::default(),
        );
        manager.sync_now(1).await.unwrap();
        assert!(configs.get(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_subscription_rewinds_last_sync_time_when_auto_sync_is_re_enabled() {
        let accounts = Arc::new(FakeAccountStore::default());
        let configs = Arc::new(FakeSyncConfigStore::default());
        let messages_store = Arc::new(FakeMessageStore::default());
        let adapter = Arc::new(StubAdapter {
            messages: vec![],
            calls: AtomicUsize::new(0),
        });
        let manager = IncrementalSyncManager::new(
            configs.clone(),
            accounts,
            messages_store,
            adapter,
            GlobalSyncConfig::default(),
        );
        let now = utc_now!();
        manager
            .update_subscription(
                1,
                SyncConfig {
                    enable_auto_sync: true,
                    sync_interval_seconds: 60,
                    last_sync_time: Some(now),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        manager
            .update_subscription(
                1,
                SyncConfig {
                    enable_auto_sync: false,
                    sync_interval_seconds: 60,
                    last_sync_time: Some(now),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        manager
            .update_subscription(
                1,
                SyncConfig {
                    enable_auto_sync: true,
                    sync_interval_seconds: 60,
                    last_sync_time: Some(now),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let stored = configs.get(1).await.unwrap().unwrap();
        assert!(stored.last_sync_time.unwrap() <= now - MAX_WINDOW_MS + 1);
    }

    #[test]
    fn window_start_applies_overlap_and_caps_at_24h() {
        let now = 10_000_000_000;
        let recent = SyncConfig {
            last_sync_end_time: Some(now - 1_000),
            ..Default::default()
        };
        assert_eq!(
            IncrementalSyncManager::window_start(&recent, now),
            now - 1_000 - OVERLAP_MS
        );

        let stale = SyncConfig {
            last_sync_end_time: Some(now - MAX_WINDOW_MS - OVERLAP_MS - 1),
            ..Default::default()
        };
        assert_eq!(IncrementalSyncManager::window_start(&stale, now), now - MAX_WINDOW_MS);

        let never_synced = SyncConfig::default();
        assert_eq!(
            IncrementalSyncManager::window_start(&never_synced, now),
            now - MAX_WINDOW_MS
        );
    }

    #[test]
    fn apply_temporary_override_falls_back_once_expired() {
        let base = SyncConfig {
            sync_interval_seconds: 300,
            sync_folders: vec!["INBOX".to_string()],
            ..Default::default()
        };
        let temp = TemporarySyncConfig {
            account_id: 1,
            sync_interval_seconds: 30,
            sync_folders: vec!["INBOX".to_string(), "WORK".to_string()],
            expires_at: 1_000,
        };

        let active = IncrementalSyncManager::apply_temporary_override(base.clone(), Some(&temp), 999);
        assert_eq!(active.sync_interval_seconds, 30);
        assert_eq!(active.sync_folders, vec!["INBOX".to_string(), "WORK".to_string()]);

        let expired = IncrementalSyncManager::apply_temporary_override(base.clone(), Some(&temp), 1_001);
        assert_eq!(expired, base);
    }

    #[tokio::test]
    async fn effective_config_for_reflects_temporary_override_while_active() {
        let accounts = Arc::new(FakeAccountStore::default());
        let configs = Arc::new(FakeSyncConfigStore::default());
        let messages_store = Arc::new(FakeMessageStore::default());
        let adapter = Arc::new(StubAdapter {
            messages: vec![],
            calls: AtomicUsize::new(0),
        });
        let manager = IncrementalSyncManager::new(configs, accounts, messages_store, adapter, GlobalSyncConfig::default());
        manager
            .update_subscription(
                1,
                SyncConfig {
                    enable_auto_sync: true,
                    sync_interval_seconds: 300,
                    sync_folders: vec!["INBOX".to_string()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let now = utc_now!();
        manager
            .set_temporary_config(TemporarySyncConfig {
                account_id: 1,
                sync_interval_seconds: 5,
                sync_folders: vec!["INBOX".to_string(), "URGENT".to_string()],
                expires_at: now + 60_000,
            })
            .await;

        let effective = manager.effective_config_for(1, now).await;
        assert_eq!(effective.sync_interval_seconds, 5);
        assert_eq!(effective.sync_folders, vec!["INBOX".to_string(), "URGENT".to_string()]);

        let after_expiry = manager.effective_config_for(1, now + 120_000).await;
        assert_eq!(after_expiry.sync_interval_seconds, 300);
        assert_eq!(after_expiry.sync_folders, vec!["INBOX".to_string()]);
    }

    #[test]
    fn window_start_ignores_cycle_start_time() {
        // `last_sync_time` (cycle start) must not drive the window; only
        // `last_sync_end_time` (cycle end) should.
        let now = 10_000_000_000;
        let config = SyncConfig {
            last_sync_time: Some(now - 1_000),
            last_sync_end_time: None,
            ..Default::default()
        };
        assert_eq!(IncrementalSyncManager::window_start(&config, now), now - MAX_WINDOW_MS);
    }
}
