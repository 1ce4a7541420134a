// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Runs at most one concurrent fetch per `real_mailbox`, coalescing bursts
//! of trigger signals with a debounce timer and shutting workers down once
//! idle, per §4.2. Grounded on the teacher's `scheduler/processor.rs`
//! semaphore-gated concurrency pattern and `scheduler::periodic::PeriodicTask`
//! for the idle-reclaim sweep.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::modules::cache::EmailCache;
use crate::modules::collab::AccountStore;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::EngineResult;
use crate::modules::events::SchedulerEvent;
use crate::modules::fetch::{FetchAdapter, FetchOptions};
use crate::modules::model::{FetchStrategy, Message, Subscription};
use crate::modules::scheduler::{PeriodicTask, TaskHandle};
use crate::modules::subscription::SubscriptionManager;
use crate::{raise_error, utc_now};

const DEFAULT_MIN_FETCH_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_IDLE_TIMEOUT_MS: i64 = 5 * 60 * 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Idle,
    Debouncing,
    Fetching,
    IdleCheck,
    Stopped,
}

struct WorkerHandle {
    trigger_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
    account_id: u64,
    last_fetch_time: Arc<AtomicI64>,
    is_fetching: Arc<AtomicBool>,
}

/// Owns one worker task per `real_mailbox` plus the global fetch-concurrency
/// semaphore and idle-reclaim sweep.
pub struct WorkerPool {
    workers: DashMap<String, Arc<WorkerHandle>>,
    subscriptions: Arc<SubscriptionManager>,
    cache: Arc<EmailCache>,
    fetch_adapter: Arc<dyn FetchAdapter>,
    accounts: Arc<dyn AccountStore>,
    semaphore: Arc<Semaphore>,
    events: Option<broadcast::Sender<SchedulerEvent>>,
    min_fetch_interval: Duration,
    idle_check_interval: Duration,
    idle_timeout_ms: i64,
    cleanup_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        subscriptions: Arc<SubscriptionManager>,
        cache: Arc<EmailCache>,
        fetch_adapter: Arc<dyn FetchAdapter>,
        accounts: Arc<dyn AccountStore>,
        max_concurrent_fetches: usize,
        events: Option<broadcast::Sender<SchedulerEvent>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            workers: DashMap::new(),
            subscriptions,
            cache,
            fetch_adapter,
            accounts,
            semaphore: Arc::new(Semaphore::new(max_concurrent_fetches)),
            events,
            min_fetch_interval: DEFAULT_MIN_FETCH_INTERVAL,
            idle_check_interval: DEFAULT_IDLE_CHECK_INTERVAL,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        })
    }

    /// Same as `new`, but with the debounce/idle/cleanup timings taken from
    /// the caller instead of the defaults.
    #[allow(clippy::too_many_arguments)]
    pub fn with_config(
        subscriptions: Arc<SubscriptionManager>,
        cache: Arc<EmailCache>,
        fetch_adapter: Arc<dyn FetchAdapter>,
        accounts: Arc<dyn AccountStore>,
        max_concurrent_fetches: usize,
        events: Option<broadcast::Sender<SchedulerEvent>>,
        min_fetch_interval: Duration,
        idle_check_interval: Duration,
        idle_timeout_ms: i64,
        cleanup_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            workers: DashMap::new(),
            subscriptions,
            cache,
            fetch_adapter,
            accounts,
            semaphore: Arc::new(Semaphore::new(max_concurrent_fetches)),
            events,
            min_fetch_interval,
            idle_check_interval,
            idle_timeout_ms,
            cleanup_interval,
        })
    }

    #[cfg(test)]
    fn with_intervals(
        subscriptions: Arc<SubscriptionManager>,
        cache: Arc<EmailCache>,
        fetch_adapter: Arc<dyn FetchAdapter>,
        accounts: Arc<dyn AccountStore>,
        min_fetch_interval: Duration,
        idle_check_interval: Duration,
        idle_timeout_ms: i64,
    ) -> Arc<Self> {
        Arc::new(Self {
            workers: DashMap::new(),
            subscriptions,
            cache,
            fetch_adapter,
            accounts,
            semaphore: Arc::new(Semaphore::new(4)),
            events: None,
            min_fetch_interval,
            idle_check_interval,
            idle_timeout_ms,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        })
    }

    pub fn active_worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Triggers a fetch for `real_mailbox`, spawning its worker if one isn't
    /// already running (or re-creating it if the previous one stopped).
    pub fn trigger(self: &Arc<Self>, real_mailbox: &str, account_id: u64) {
        if let Some(handle) = self.workers.get(real_mailbox) {
            if !handle.cancel.is_cancelled() {
                let _ = handle.trigger_tx.try_send(());
                return;
            }
        }
        self.spawn_worker(real_mailbox.to_string(), account_id);
        if let Some(handle) = self.workers.get(real_mailbox) {
            let _ = handle.trigger_tx.try_send(());
        }
    }

    fn spawn_worker(self: &Arc<Self>, real_mailbox: String, account_id: u64) {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let handle = Arc::new(WorkerHandle {
            trigger_tx,
            cancel: cancel.clone(),
            account_id,
            last_fetch_time: Arc::new(AtomicI64::new(0)),
            is_fetching: Arc::new(AtomicBool::new(false)),
        });
        self.workers.insert(real_mailbox.clone(), handle.clone());

        let pool = self.clone();
        tokio::spawn(async move {
            pool.run_worker(real_mailbox, account_id, trigger_rx, cancel, handle).await;
        });
    }

    async fn run_worker(
        self: Arc<Self>,
        real_mailbox: String,
        account_id: u64,
        mut trigger_rx: mpsc::Receiver<()>,
        cancel: CancellationToken,
        handle: Arc<WorkerHandle>,
    ) {
        let mut state = WorkerState::Idle;
        loop {
            state = match state {
                WorkerState::Idle => tokio::select! {
                    res = trigger_rx.recv() => if res.is_some() { WorkerState::Debouncing } else { WorkerState::Stopped },
                    _ = cancel.cancelled() => WorkerState::Stopped,
                },
                WorkerState::Debouncing => tokio::select! {
                    _ = tokio::time::sleep(self.min_fetch_interval) => WorkerState::Fetching,
                    res = trigger_rx.recv() => if res.is_some() { WorkerState::Debouncing } else { WorkerState::Stopped },
                    _ = cancel.cancelled() => WorkerState::Stopped,
                },
                WorkerState::Fetching => {
                    handle.is_fetching.store(true, Ordering::Relaxed);
                    let _permit = self.semaphore.acquire().await.expect("semaphore is never closed");
                    let _ = self.perform_fetch(&real_mailbox, account_id).await;
                    handle.last_fetch_time.store(utc_now!(), Ordering::Relaxed);
                    handle.is_fetching.store(false, Ordering::Relaxed);
                    if trigger_rx.try_recv().is_ok() {
                        WorkerState::Debouncing
                    } else {
                        WorkerState::IdleCheck
                    }
                }
                WorkerState::IdleCheck => tokio::select! {
                    _ = tokio::time::sleep(self.idle_check_interval) => {
                        if self.subscriptions.subscriptions_for_mailbox(&real_mailbox) == 0 {
                            WorkerState::Stopped
                        } else {
                            WorkerState::IdleCheck
                        }
                    }
                    res = trigger_rx.recv() => if res.is_some() { WorkerState::Debouncing } else { WorkerState::Stopped },
                    _ = cancel.cancelled() => WorkerState::Stopped,
                },
                WorkerState::Stopped => break,
            };
        }
        self.workers.remove(&real_mailbox);
        tracing::debug!(real_mailbox, "worker stopped");
    }

    /// Steps 1-6 of §4.2: union subscriber strategies, consult the cache,
    /// fetch on miss, fan out, and broadcast errors on failure. Returns the
    /// messages that were delivered (from cache or freshly fetched) so
    /// `fetch_now` can report counts without a second round trip.
    async fn perform_fetch(&self, real_mailbox: &str, account_id: u64) -> EngineResult<Vec<Message>> {
        let subscriptions = self.subscriptions.list_for_mailbox(real_mailbox);
        if subscriptions.is_empty() {
            return Ok(vec![]);
        }

        let filters: Vec<_> = subscriptions.iter().map(|s| s.filter.clone()).collect();
        let strategy = FetchStrategy::union(real_mailbox, &filters);

        self.emit(SchedulerEvent::FetchStart { real_mailbox: real_mailbox.to_string() });

        if let Some(cached) = self.cache.get(real_mailbox).await {
            for message in &cached {
                self.subscriptions.distribute(real_mailbox, message).await;
                self.emit_new_email(&subscriptions, message);
            }
            self.emit(SchedulerEvent::FetchComplete {
                real_mailbox: real_mailbox.to_string(),
                count: cached.len(),
            });
            return Ok(cached);
        }

        let account = match self.accounts.get(account_id).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                let err = raise_error!("account not found".to_string(), ErrorCode::NotFound);
                self.broadcast_error(real_mailbox, &err.to_string()).await;
                return Err(err);
            }
            Err(e) => {
                self.broadcast_error(real_mailbox, &e.to_string()).await;
                return Err(e);
            }
        };

        let options = FetchOptions {
            folders: strategy.folders,
            start_date: strategy.earliest_date,
            end_date: Some(strategy.latest_date.unwrap_or_else(|| utc_now!())),
            limit: 0,
            offset: 0,
            include_body: true,
        };

        match self.fetch_adapter.fetch(&account, &options).await {
            Ok(result) => {
                let messages = result.messages;
                self.cache.put(real_mailbox, messages.clone()).await;
                for message in &messages {
                    self.subscriptions.distribute(real_mailbox, message).await;
                    self.emit_new_email(&subscriptions, message);
                }
                self.emit(SchedulerEvent::FetchComplete {
                    real_mailbox: real_mailbox.to_string(),
                    count: messages.len(),
                });
                Ok(messages)
            }
            Err(e) => {
                self.cache.record_error(real_mailbox, e.to_string()).await;
                self.broadcast_error(real_mailbox, &e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Bypasses the debounce/idle state machine entirely and runs one fetch
    /// cycle inline, per §4.3's `fetch_now`. Still serialized against the
    /// per-mailbox worker by taking the same global semaphore permit.
    pub async fn fetch_now(&self, real_mailbox: &str, account_id: u64, force_refresh: bool) -> EngineResult<Vec<Message>> {
        if force_refresh {
            self.cache.invalidate(real_mailbox).await;
        }
        let _permit = self.semaphore.acquire().await.expect("semaphore is never closed");
        self.perform_fetch(real_mailbox, account_id).await
    }

    /// Cancels the worker for `real_mailbox`, if one is running. Used by the
    /// scheduler's `on_unsubscribe` hook once the last subscriber leaves.
    pub fn force_stop(&self, real_mailbox: &str) {
        if let Some((_, handle)) = self.workers.remove(real_mailbox) {
            handle.cancel.cancel();
        }
    }

    pub fn cache(&self) -> &Arc<EmailCache> {
        &self.cache
    }

    async fn broadcast_error(&self, real_mailbox: &str, reason: &str) {
        for subscription in self.subscriptions.list_for_mailbox(real_mailbox) {
            if let Some(error_tx) = &subscription.error_tx {
                let _ = error_tx.try_send(reason.to_string());
            }
        }
        self.emit(SchedulerEvent::FetchError {
            real_mailbox: real_mailbox.to_string(),
            error: reason.to_string(),
        });
    }

    fn emit(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn emit_new_email(&self, subscriptions: &[Subscription], message: &Message) {
        if self.events.is_none() {
            return;
        }
        for subscription in subscriptions {
            if subscription.filter.matches(message) {
                self.emit(SchedulerEvent::NewEmail {
                    subscription_id: subscription.id,
                    message: message.clone(),
                });
            }
        }
    }

    /// Independent of per-worker `IdleCheck`: force-stops workers that are
    /// not fetching, have zero subscribers, and have sat idle past
    /// `idle_timeout_ms` since their last fetch.
    pub fn start_cleanup_sweep(self: &Arc<Self>) -> TaskHandle {
        let pool = self.clone();
        let interval = self.cleanup_interval;
        PeriodicTask::new("worker-pool-idle-reclaim").start(
            move || {
                let pool = pool.clone();
                async move {
                    let now = utc_now!();
                    let mut stopped = 0usize;
                    let stale: Vec<String> = pool
                        .workers
                        .iter()
                        .filter(|entry| {
                            let handle = entry.value();
                            !handle.is_fetching.load(Ordering::Relaxed)
                                && pool.subscriptions.subscriptions_for_mailbox(entry.key()) == 0
                                && now - handle.last_fetch_time.load(Ordering::Relaxed) >= pool.idle_timeout_ms
                        })
                        .map(|entry| entry.key().clone())
                        .collect();

                    for real_mailbox in stale {
                        if let Some((_, handle)) = pool.workers.remove(&real_mailbox) {
                            handle.cancel.cancel();
                            stopped += 1;
                        }
                    }
                    if stopped > 0 {
                        tracing::info!(stopped, "worker pool cleanup sweep force-stopped idle workers");
                    }
                    Ok(())
                }
            },
            interval,
            false,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::collab::fakes::FakeAccountStore;
    use crate::modules::error::EngineResult;
    use crate::modules::fetch::FetchResult;
    use crate::modules::model::{MailAccount, Mailbox};
    use crate::modules::subscription::{NoopHooks, SubscribeOutcome, SubscribeRequest};
    use crate::modules::model::{EmailFilter, SubscriptionKind};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct CountingAdapter {
        calls: Arc<AtomicUsize>,
        messages: Vec<Message>,
    }

    #[async_trait]
    impl FetchAdapter for CountingAdapter {
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

    async fn make_pool(
        fetch_calls: Arc<AtomicUsize>,
        messages: Vec<Message>,
    ) -> (Arc<WorkerPool>, Arc<SubscriptionManager>) {
        let subscriptions = SubscriptionManager::new(Arc::new(NoopHooks));
        let cache = Arc::new(EmailCache::new(60_000));
        let adapter = Arc::new(CountingAdapter { calls: fetch_calls, messages });
        let accounts = Arc::new(FakeAccountStore::default());
        accounts
            .accounts
            .write()
            .unwrap()
            .insert(1, MailAccount { id: 1, ..Default::default() });

        let pool = WorkerPool::with_intervals(
            subscriptions.clone(),
            cache,
            adapter,
            accounts,
            Duration::from_millis(10),
            Duration::from_millis(30),
            5 * 60_000,
        );
        (pool, subscriptions)
    }

    #[tokio::test]
    async fn trigger_coalesces_bursts_into_one_fetch() {
        let fetch_calls = Arc::new(AtomicUsize::new(0));
        let (pool, subscriptions) = make_pool(fetch_calls.clone(), vec![]).await;

        let outcome = subscriptions
            .subscribe(SubscribeRequest::new(
                SubscriptionKind::Realtime,
                EmailFilter { real_mailbox: "inbox@example.com".into(), ..Default::default() },
            ))
            .await
            .unwrap();
        let SubscribeOutcome::Created { .. } = outcome else { panic!("expected fresh subscription") };

        for _ in 0..5 {
            pool.trigger("inbox@example.com", 1);
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_delivers_messages_to_matching_subscription() {
        let message = Message {
            subject: Some("hello".into()),
            mailbox_name: "inbox@example.com".into(),
            date: Some(utc_now!()),
            ..Default::default()
        };
        let (pool, subscriptions) = make_pool(Arc::new(AtomicUsize::new(0)), vec![message.clone()]).await;

        let outcome = subscriptions
            .subscribe(SubscribeRequest::new(
                SubscriptionKind::Realtime,
                EmailFilter { real_mailbox: "inbox@example.com".into(), ..Default::default() },
            ))
            .await
            .unwrap();
        let SubscribeOutcome::Created { mut email_rx, .. } = outcome else { panic!("expected fresh subscription") };

        pool.trigger("inbox@example.com", 1);
        let received = tokio::time::timeout(Duration::from_millis(200), email_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.subject, Some("hello".into()));
    }
}
