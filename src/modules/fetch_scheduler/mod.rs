// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Composes the Subscription Manager, Worker Pool, Email Cache, and Fetch
//! Adapter behind the public `subscribe`/`unsubscribe`/`fetch_now` surface
//! described in §4.3.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};

use crate::modules::collab::AccountStore;
use crate::modules::error::{code::ErrorCode, EngineResult};
use crate::modules::events::SchedulerEvent;
use crate::modules::fetch::FetchAdapter;
use crate::modules::model::{EmailFilter, Message, Subscription, SubscriptionKind};
use crate::modules::scheduler::TaskHandle;
use crate::modules::subscription::{SubscribeOutcome, SubscribeRequest, SubscriptionHooks, SubscriptionManager};
use crate::modules::worker::WorkerPool;
use crate::raise_error;

const EVENT_BUS_CAPACITY: usize = 1_024;
const UNSUBSCRIBE_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Reserved extension point for history-driven cache warming (§4.3). The
/// default never runs ahead of a real subscriber request.
pub trait PrefetchHook: Send + Sync {
    fn prefetch(&self, _real_mailbox: &str) {}
}

pub struct NoopPrefetch;
impl PrefetchHook for NoopPrefetch {}

/// Result of an on-demand fetch triggered via `fetch_now`.
#[derive(Debug, Default)]
pub struct FetchNowResult {
    pub new_emails: usize,
    pub processed_emails: usize,
    pub error: Option<String>,
}

/// Point-in-time snapshot exposed by `get_metrics` (§6).
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineMetrics {
    pub active: usize,
    pub total: u64,
    pub delivered: u64,
    pub cache_hit_rate: f64,
    pub active_workers: usize,
}

/// A subscriber-facing request: an address to resolve plus the filter and
/// delivery options the Subscription Manager needs.
pub struct FetchRequest {
    pub requested_address: String,
    pub kind: SubscriptionKind,
    pub account_id: u64,
    pub filter: EmailFilter,
    pub expires_at: Option<i64>,
    pub buffer: Option<usize>,
}

/// Installed on the `SubscriptionManager` so the scheduler can force-stop a
/// mailbox's worker once its last subscriber leaves. Holds weak references
/// back into the scheduler's own collaborators to avoid an `Arc` cycle
/// (manager -> hooks -> worker pool -> manager).
struct ForceStopOnEmpty {
    subscriptions: OnceLock<Weak<SubscriptionManager>>,
    worker_pool: OnceLock<Weak<WorkerPool>>,
}

#[async_trait]
impl SubscriptionHooks for ForceStopOnEmpty {
    async fn on_unsubscribe(&self, subscription: &Subscription) {
        let real_mailbox = subscription.filter.real_mailbox.clone();
        let subscriptions = self.subscriptions.get().cloned();
        let worker_pool = self.worker_pool.get().cloned();
        tokio::spawn(async move {
            tokio::time::sleep(UNSUBSCRIBE_SETTLE_DELAY).await;
            let (Some(subscriptions), Some(worker_pool)) = (
                subscriptions.and_then(|w| w.upgrade()),
                worker_pool.and_then(|w| w.upgrade()),
            ) else {
                return;
            };
            if subscriptions.subscriptions_for_mailbox(&real_mailbox) == 0 {
                worker_pool.force_stop(&real_mailbox);
            }
        });
    }
}

pub struct FetchScheduler {
    subscriptions: Arc<SubscriptionManager>,
    worker_pool: Arc<WorkerPool>,
    accounts: Arc<dyn AccountStore>,
    fetch_adapter: Arc<dyn FetchAdapter>,
    prefetch: RwLock<Arc<dyn PrefetchHook>>,
    events: broadcast::Sender<SchedulerEvent>,
    event_subscribers: DashMap<u64, mpsc::Sender<SchedulerEvent>>,
    /// `subscription_id -> account_id`, needed by `fetch_now` to re-derive
    /// the worker's key.
    account_by_subscription: DashMap<u64, u64>,
}

/// Effective-options subset that tunes the Subscription Manager and Worker
/// Pool this scheduler builds (§6). `FetchScheduler::new` uses the same
/// defaults as the worker pool and subscription manager's own constructors.
pub struct FetchSchedulerConfig {
    pub min_fetch_interval: Duration,
    pub idle_check_interval: Duration,
    pub idle_timeout_ms: i64,
    pub cleanup_interval: Duration,
    pub subscription_default_expiration_secs: u64,
    pub subscription_cleanup_interval_secs: u64,
    pub subscription_max_subscriptions: usize,
}

impl Default for FetchSchedulerConfig {
    fn default() -> Self {
        Self {
            min_fetch_interval: Duration::from_secs(5),
            idle_check_interval: Duration::from_secs(30),
            idle_timeout_ms: 5 * 60 * 1_000,
            cleanup_interval: Duration::from_secs(60),
            subscription_default_expiration_secs: 86_400,
            subscription_cleanup_interval_secs: 300,
            subscription_max_subscriptions: 1_000,
        }
    }
}

impl FetchScheduler {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        fetch_adapter: Arc<dyn FetchAdapter>,
        cache: Arc<crate::modules::cache::EmailCache>,
        max_concurrent_fetches: usize,
    ) -> Arc<Self> {
        Self::with_config(accounts, fetch_adapter, cache, max_concurrent_fetches, FetchSchedulerConfig::default())
    }

    /// Same as `new`, but with the subscription and worker pool timings
    /// taken from `config` instead of the built-in defaults.
    pub fn with_config(
        accounts: Arc<dyn AccountStore>,
        fetch_adapter: Arc<dyn FetchAdapter>,
        cache: Arc<crate::modules::cache::EmailCache>,
        max_concurrent_fetches: usize,
        config: FetchSchedulerConfig,
    ) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);

        let hooks = Arc::new(ForceStopOnEmpty {
            subscriptions: OnceLock::new(),
            worker_pool: OnceLock::new(),
        });
        let subscriptions = SubscriptionManager::new(hooks.clone());
        subscriptions.set_default_expiration(config.subscription_default_expiration_secs);
        subscriptions.set_cleanup_interval(config.subscription_cleanup_interval_secs);
        subscriptions.set_max_subscriptions(config.subscription_max_subscriptions);
        let _ = hooks.subscriptions.set(Arc::downgrade(&subscriptions));

        let worker_pool = WorkerPool::with_config(
            subscriptions.clone(),
            cache,
            fetch_adapter.clone(),
            accounts.clone(),
            max_concurrent_fetches,
            Some(events_tx.clone()),
            config.min_fetch_interval,
            config.idle_check_interval,
            config.idle_timeout_ms,
            config.cleanup_interval,
        );
        let _ = hooks.worker_pool.set(Arc::downgrade(&worker_pool));

        Arc::new(Self {
            subscriptions,
            worker_pool,
            accounts,
            fetch_adapter,
            prefetch: RwLock::new(Arc::new(NoopPrefetch)),
            events: events_tx,
            event_subscribers: DashMap::new(),
            account_by_subscription: DashMap::new(),
        })
    }

    pub fn set_prefetch_hook(&self, hook: Arc<dyn PrefetchHook>) {
        *self.prefetch.write().unwrap() = hook;
    }

    /// Registers a subscription and returns its message receiver. Resolves
    /// `real_mailbox` identically to the requested address (§9: no
    /// catch-all alias policy specified, so resolution is the identity
    /// function).
    pub async fn subscribe(self: &Arc<Self>, req: FetchRequest) -> EngineResult<mpsc::Receiver<Message>> {
        let outcome = self.register(req).await?;
        match outcome {
            SubscribeOutcome::Created { email_rx, .. } => Ok(email_rx),
            SubscribeOutcome::Reused(_) => Err(raise_error!(
                "an identical subscription is already live; its receiver belongs to the original caller".into(),
                ErrorCode::InvalidParameter
            )),
        }
    }

    /// Mirrors `subscribe` but delivers via a callback instead of a channel,
    /// returning only the subscription id.
    pub async fn subscribe_with_callback(
        self: &Arc<Self>,
        mut req: FetchRequest,
        callback: crate::modules::model::subscription::SubscriptionCallback,
    ) -> EngineResult<u64> {
        req.filter.real_mailbox = req.requested_address.clone();
        let subscribe_req = SubscribeRequest {
            kind: req.kind,
            priority: 0,
            filter: req.filter.clone(),
            expires_at: req.expires_at,
            buffer: req.buffer,
            callback: Some(callback),
            metadata: HashMap::new(),
        };
        self.finish_subscribe(req.account_id, subscribe_req).await.map(|o| o.subscription().id)
    }

    async fn register(self: &Arc<Self>, mut req: FetchRequest) -> EngineResult<SubscribeOutcome> {
        req.filter.real_mailbox = req.requested_address.clone();
        let subscribe_req = SubscribeRequest {
            kind: req.kind,
            priority: 0,
            filter: req.filter,
            expires_at: req.expires_at,
            buffer: req.buffer,
            callback: None,
            metadata: HashMap::new(),
        };
        self.finish_subscribe(req.account_id, subscribe_req).await
    }

    async fn finish_subscribe(
        self: &Arc<Self>,
        account_id: u64,
        subscribe_req: SubscribeRequest,
    ) -> EngineResult<SubscribeOutcome> {
        let outcome = self.subscriptions.subscribe(subscribe_req).await?;
        let subscription = outcome.subscription();
        self.account_by_subscription.insert(subscription.id, account_id);
        self.prefetch.read().unwrap().prefetch(&subscription.filter.real_mailbox);
        self.worker_pool.trigger(&subscription.filter.real_mailbox, account_id);
        Ok(outcome)
    }

    pub async fn unsubscribe(self: &Arc<Self>, id: u64) -> EngineResult<()> {
        self.account_by_subscription.remove(&id);
        self.subscriptions.unsubscribe(id).await
    }

    /// Triggers an immediate fetch for the mailbox backing `id`, bypassing
    /// the worker's debounce entirely (though not its fetch-concurrency
    /// semaphore). `force_refresh` bypasses the cache too.
    pub async fn fetch_now(self: &Arc<Self>, id: u64, force_refresh: bool) -> EngineResult<FetchNowResult> {
        let Some(subscription) = self.subscriptions.get(id) else {
            return Err(raise_error!(format!("unknown subscription {id}"), ErrorCode::NotFound));
        };
        let Some(account_id) = self.account_by_subscription.get(&id).map(|v| *v) else {
            return Err(raise_error!(format!("no account bound to subscription {id}"), ErrorCode::NotFound));
        };
        let real_mailbox = subscription.filter.real_mailbox.clone();

        let before = self.worker_pool.cache().get(&real_mailbox).await.map_or(0, |m| m.len());
        match self.worker_pool.fetch_now(&real_mailbox, account_id, force_refresh).await {
            Ok(messages) => Ok(FetchNowResult {
                new_emails: messages.len().saturating_sub(before),
                processed_emails: messages.len(),
                error: None,
            }),
            Err(e) => Ok(FetchNowResult {
                new_emails: 0,
                processed_emails: 0,
                error: Some(e.to_string()),
            }),
        }
    }

    /// Opts a live subscription into the best-effort event stream. A full
    /// channel drops events rather than blocking the producer (§4.3).
    pub fn subscribe_to_events(&self, subscription_id: u64, buffer: usize) -> mpsc::Receiver<SchedulerEvent> {
        let (tx, rx) = mpsc::channel(buffer);
        self.event_subscribers.insert(subscription_id, tx);
        rx
    }

    /// Spawns the background task that fans the broadcast bus out to
    /// per-subscription event channels registered via `subscribe_to_events`.
    pub fn start_event_fanout(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let scheduler = self.clone();
        let mut rx = self.events.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let SchedulerEvent::NewEmail { subscription_id, .. } = &event {
                    if let Some(tx) = scheduler.event_subscribers.get(subscription_id) {
                        let _ = tx.try_send(event.clone());
                    }
                }
            }
        })
    }

    pub fn start_cleanup_sweep(self: &Arc<Self>) -> TaskHandle {
        self.worker_pool.start_cleanup_sweep()
    }

    pub fn active_subscription_count(&self) -> usize {
        self.subscriptions.active_count()
    }

    /// Snapshot of subscription, delivery, cache, and worker counters for
    /// the in-process `get_metrics` surface (§6).
    pub fn get_metrics(&self) -> EngineMetrics {
        EngineMetrics {
            active: self.subscriptions.active_count(),
            total: self.subscriptions.total_count(),
            delivered: self.subscriptions.delivered_count(),
            cache_hit_rate: self.worker_pool.cache().hit_rate(),
            active_workers: self.worker_pool.active_worker_count(),
        }
    }

    pub async fn verify_account(&self, account_id: u64) -> EngineResult<()> {
        let Some(account) = self.accounts.get(account_id).await? else {
            return Err(raise_error!(format!("unknown account {account_id}"), ErrorCode::NotFound));
        };
        self.fetch_adapter.verify(&account).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::cache::EmailCache;
    use crate::modules::collab::fakes::FakeAccountStore;
    use crate::modules::model::MailAccount;
    use async_trait::async_trait;

    struct EmptyAdapter;

    #[async_trait]
    impl FetchAdapter for EmptyAdapter {
        async fn fetch(
            &self,
            _account: &MailAccount,
            _options: &crate::modules::fetch::FetchOptions,
        ) -> EngineResult<crate::modules::fetch::FetchResult> {
            Ok(crate::modules::fetch::FetchResult::default())
        }

        async fn list_mailboxes(&self, _account: &MailAccount) -> EngineResult<Vec<crate::modules::model::Mailbox>> {
            Ok(vec![])
        }

        async fn verify(&self, _account: &MailAccount) -> EngineResult<()> {
            Ok(())
        }
    }

    fn make_scheduler() -> Arc<FetchScheduler> {
        let accounts = Arc::new(FakeAccountStore::default());
        accounts.accounts.write().unwrap().insert(1, MailAccount { id: 1, ..Default::default() });
        let cache = Arc::new(EmailCache::new(60_000));
        FetchScheduler::new(accounts, Arc::new(EmptyAdapter), cache, 4)
    }

    fn request(address: &str) -> FetchRequest {
        FetchRequest {
            requested_address: address.to_string(),
            kind: SubscriptionKind::Realtime,
            account_id: 1,
            filter: EmailFilter { real_mailbox: address.to_string(), ..Default::default() },
            expires_at: None,
            buffer: None,
        }
    }

    #[tokio::test]
    async fn subscribe_then_unsubscribe_round_trips() {
        let scheduler = make_scheduler();
        let rx = scheduler.subscribe(request("inbox@example.com")).await.unwrap();
        drop(rx);
        assert_eq!(scheduler.active_subscription_count(), 1);
    }

    #[tokio::test]
    async fn fetch_now_reports_zero_new_emails_for_an_empty_mailbox() {
        let scheduler = make_scheduler();
        let id = scheduler
            .subscribe_with_callback(request("inbox@example.com"), Arc::new(|_| {}))
            .await
            .unwrap();
        let result = scheduler.fetch_now(id, true).await.unwrap();
        assert_eq!(result.new_emails, 0);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn get_metrics_reflects_active_subscriptions() {
        let scheduler = make_scheduler();
        let _rx = scheduler.subscribe(request("inbox@example.com")).await.unwrap();
        let metrics = scheduler.get_metrics();
        assert_eq!(metrics.active, 1);
        assert_eq!(metrics.total, 1);
    }

    #[tokio::test]
    async fn subscribe_to_events_receives_fetch_lifecycle_events() {
        let scheduler = make_scheduler();
        scheduler.start_event_fanout();
        let _rx = scheduler.subscribe(request("inbox@example.com")).await.unwrap();

        let mut events = scheduler.events.subscribe();
        let event = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
        assert!(event.is_ok());
    }
}
