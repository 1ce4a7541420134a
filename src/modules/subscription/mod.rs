// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::modules::error::code::ErrorCode;
use crate::modules::error::EngineResult;
use crate::modules::model::subscription::SubscriptionCallback;
use crate::modules::model::{
    EmailFilter, Message, Subscription, SubscriptionFingerprint, SubscriptionKind,
};
use crate::modules::scheduler::periodic::PeriodicTask;
use crate::raise_error;
use crate::utc_now;

const DEFAULT_BUFFER: usize = 100;
const SEND_DEADLINE: Duration = Duration::from_millis(100);
const MONITOR_TICK: Duration = Duration::from_secs(30);

#[async_trait]
pub trait SubscriptionHooks: Send + Sync {
    async fn on_subscribe(&self, _subscription: &Subscription) -> EngineResult<()> {
        Ok(())
    }
    async fn on_unsubscribe(&self, _subscription: &Subscription) {}
    async fn on_expire(&self, _subscription: &Subscription) {}
    async fn on_error(&self, _subscription: &Subscription, _reason: &str) {}
}

pub struct NoopHooks;
impl SubscriptionHooks for NoopHooks {}

pub struct SubscribeRequest {
    pub kind: SubscriptionKind,
    pub priority: i32,
    pub filter: EmailFilter,
    pub expires_at: Option<i64>,
    pub buffer: Option<usize>,
    pub callback: Option<SubscriptionCallback>,
    pub metadata: HashMap<String, String>,
}

impl SubscribeRequest {
    pub fn new(kind: SubscriptionKind, filter: EmailFilter) -> Self {
        Self {
            kind,
            priority: 0,
            filter,
            expires_at: None,
            buffer: None,
            callback: None,
            metadata: HashMap::new(),
        }
    }
}

/// Either a brand-new subscription with its freshly created receivers, or
/// the live subscription an identical fingerprint already resolved to (no
/// fresh receivers exist in that case — the original caller owns them).
pub enum SubscribeOutcome {
    Created {
        subscription: Subscription,
        email_rx: mpsc::Receiver<Message>,
        error_rx: mpsc::Receiver<String>,
    },
    Reused(Subscription),
}

impl SubscribeOutcome {
    pub fn subscription(&self) -> &Subscription {
        match self {
            SubscribeOutcome::Created { subscription, .. } => subscription,
            SubscribeOutcome::Reused(subscription) => subscription,
        }
    }
}

#[derive(Default)]
struct Indices {
    by_id: HashMap<u64, Subscription>,
    by_real_mailbox: HashMap<String, HashSet<u64>>,
    by_kind: HashMap<SubscriptionKind, HashSet<u64>>,
    by_fingerprint: HashMap<SubscriptionFingerprint, u64>,
}

/// Registry of every live subscription: three supplementary indices over
/// `by_id`, fingerprint dedup, and bounded-deadline fan-out. All index
/// mutations are bundled into a single critical section per API call (§5).
pub struct SubscriptionManager {
    indices: RwLock<Indices>,
    hooks: Arc<dyn SubscriptionHooks>,
    root: CancellationToken,
    total: AtomicU64,
    delivered: AtomicU64,
    default_expiration_secs: AtomicU64,
    cleanup_interval_secs: AtomicU64,
    max_subscriptions: AtomicUsize,
}

impl SubscriptionManager {
    pub fn new(hooks: Arc<dyn SubscriptionHooks>) -> Arc<Self> {
        Arc::new(Self {
            indices: RwLock::new(Indices::default()),
            hooks,
            root: CancellationToken::new(),
            total: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            default_expiration_secs: AtomicU64::new(86_400),
            cleanup_interval_secs: AtomicU64::new(300),
            max_subscriptions: AtomicUsize::new(1000),
        })
    }

    pub fn set_default_expiration(&self, secs: u64) {
        self.default_expiration_secs.store(secs, Ordering::Relaxed);
    }

    pub fn set_cleanup_interval(&self, secs: u64) {
        self.cleanup_interval_secs.store(secs, Ordering::Relaxed);
    }

    pub fn set_max_subscriptions(&self, max: usize) {
        self.max_subscriptions.store(max, Ordering::Relaxed);
    }

    pub fn active_count(&self) -> usize {
        self.indices.read().unwrap().by_id.len()
    }

    pub fn total_count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn subscriptions_for_mailbox(&self, real_mailbox: &str) -> usize {
        self.indices
            .read()
            .unwrap()
            .by_real_mailbox
            .get(real_mailbox)
            .map_or(0, |ids| ids.len())
    }

    pub fn get(&self, id: u64) -> Option<Subscription> {
        self.indices.read().unwrap().by_id.get(&id).cloned()
    }

    /// Every live subscription registered against `real_mailbox`, used by
    /// the Worker Pool to union `FetchStrategy`s before a fetch (§4.2 step 2).
    pub fn list_for_mailbox(&self, real_mailbox: &str) -> Vec<Subscription> {
        let indices = self.indices.read().unwrap();
        let Some(ids) = indices.by_real_mailbox.get(real_mailbox) else {
            return vec![];
        };
        ids.iter().filter_map(|id| indices.by_id.get(id)).cloned().collect()
    }

    pub async fn subscribe(
        self: &Arc<Self>,
        req: SubscribeRequest,
    ) -> EngineResult<SubscribeOutcome> {
        let fingerprint = SubscriptionFingerprint::compute(req.kind, &req.filter);

        if let Some(existing) = self.live_by_fingerprint(fingerprint) {
            return Ok(SubscribeOutcome::Reused(existing));
        }

        if self.active_count() >= self.max_subscriptions.load(Ordering::Relaxed) {
            return Err(raise_error!(
                "maximum number of subscriptions reached".into(),
                ErrorCode::CapacityExceeded
            ));
        }

        let now = utc_now!();
        let expires_at = req
            .expires_at
            .or_else(|| {
                Some(now + self.default_expiration_secs.load(Ordering::Relaxed) as i64 * 1000)
            });
        let buffer = req.buffer.unwrap_or(DEFAULT_BUFFER);
        let (email_tx, email_rx) = mpsc::channel(buffer);
        let (error_tx, error_rx) = mpsc::channel(buffer);
        let scope = self.root.child_token();

        let subscription = Subscription {
            id: crate::id!(64),
            kind: req.kind,
            priority: req.priority,
            filter: req.filter,
            fingerprint,
            created_at: now,
            expires_at,
            email_tx: if req.callback.is_some() {
                None
            } else {
                Some(email_tx)
            },
            error_tx: Some(error_tx),
            callback: req.callback,
            metadata: req.metadata,
            stats: Arc::new(std::sync::Mutex::new(Default::default())),
            scope: scope.clone(),
        };

        self.hooks.on_subscribe(&subscription).await?;

        let real_mailbox = subscription.filter.real_mailbox.clone();
        let id = subscription.id;
        {
            let mut indices = self.indices.write().unwrap();
            indices.by_id.insert(id, subscription.clone());
            indices
                .by_real_mailbox
                .entry(real_mailbox)
                .or_default()
                .insert(id);
            indices.by_kind.entry(req.kind).or_default().insert(id);
            indices.by_fingerprint.insert(fingerprint, id);
        }
        self.total.fetch_add(1, Ordering::Relaxed);
        self.spawn_monitor(id, scope);

        Ok(SubscribeOutcome::Created {
            subscription,
            email_rx,
            error_rx,
        })
    }

    pub async fn unsubscribe(self: &Arc<Self>, id: u64) -> EngineResult<()> {
        let subscription = {
            let mut indices = self.indices.write().unwrap();
            let Some(subscription) = indices.by_id.remove(&id) else {
                return Err(raise_error!(
                    format!("unknown subscription {id}"),
                    ErrorCode::NotFound
                ));
            };
            if let Some(ids) = indices
                .by_real_mailbox
                .get_mut(&subscription.filter.real_mailbox)
            {
                ids.remove(&id);
            }
            if let Some(ids) = indices.by_kind.get_mut(&subscription.kind) {
                ids.remove(&id);
            }
            if indices.by_fingerprint.get(&subscription.fingerprint) == Some(&id) {
                indices.by_fingerprint.remove(&subscription.fingerprint);
            }
            subscription
        };

        self.hooks.on_unsubscribe(&subscription).await;
        subscription.scope.cancel();
        // subscription (and its Sender halves) drops here, closing both channels exactly once.
        Ok(())
    }

    /// Looks up matching subscriptions and delivers with a 100ms send
    /// deadline per match. Delivery failures never fail this call — they
    /// are routed to the per-subscription error channel (§4.1.3).
    pub async fn distribute(&self, real_mailbox: &str, message: &Message) {
        let matches: Vec<Subscription> = {
            let indices = self.indices.read().unwrap();
            let Some(ids) = indices.by_real_mailbox.get(real_mailbox) else {
                return;
            };
            ids.iter()
                .filter_map(|id| indices.by_id.get(id))
                .filter(|sub| sub.filter.matches(message))
                .cloned()
                .collect()
        };

        for subscription in matches {
            self.deliver_one(&subscription, message.clone()).await;
        }
    }

    async fn deliver_one(&self, subscription: &Subscription, message: Message) {
        if let Some(callback) = &subscription.callback {
            callback(message);
            self.delivered.fetch_add(1, Ordering::Relaxed);
            if let Ok(mut stats) = subscription.stats.lock() {
                stats.delivered += 1;
            }
            return;
        }

        let Some(tx) = &subscription.email_tx else {
            return;
        };

        match tokio::time::timeout(SEND_DEADLINE, tx.send(message)).await {
            Ok(Ok(())) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut stats) = subscription.stats.lock() {
                    stats.delivered += 1;
                }
            }
            Ok(Err(_)) => {
                // Receiver already dropped (post-unsubscribe race): silent no-op.
            }
            Err(_) => {
                let reason = format!(
                    "delivery to subscription {} exceeded the 100ms send deadline",
                    subscription.id
                );
                if let Some(error_tx) = &subscription.error_tx {
                    let _ = error_tx.try_send(reason.clone());
                }
                if let Ok(mut stats) = subscription.stats.lock() {
                    stats.dropped += 1;
                    stats.errors += 1;
                }
                self.hooks.on_error(subscription, &reason).await;
            }
        }
    }

    fn live_by_fingerprint(&self, fingerprint: SubscriptionFingerprint) -> Option<Subscription> {
        let indices = self.indices.read().unwrap();
        let id = indices.by_fingerprint.get(&fingerprint)?;
        let subscription = indices.by_id.get(id)?;
        if subscription.scope.is_cancelled() {
            return None;
        }
        Some(subscription.clone())
    }

    fn spawn_monitor(self: &Arc<Self>, id: u64, scope: CancellationToken) {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(MONITOR_TICK) => {
                        let Some(subscription) = manager.get(id) else { break };
                        let now = utc_now!();
                        if subscription.is_expired(now) {
                            manager.hooks.on_expire(&subscription).await;
                            let _ = manager.unsubscribe(id).await;
                            break;
                        }
                    }
                    _ = scope.cancelled() => break,
                }
            }
        });
    }

    /// Periodic sweep that culls expired/cancelled subscriptions in batch,
    /// independent of the per-subscription monitor tasks, and logs counts.
    pub fn start_cleanup_sweep(self: &Arc<Self>) -> crate::modules::scheduler::TaskHandle {
        let manager = self.clone();
        let interval = Duration::from_secs(self.cleanup_interval_secs.load(Ordering::Relaxed));
        PeriodicTask::new("subscription-cleanup").start(
            move || {
                let manager = manager.clone();
                async move {
                    let now = utc_now!();
                    let expired: Vec<u64> = {
                        let indices = manager.indices.read().unwrap();
                        indices
                            .by_id
                            .values()
                            .filter(|s| s.is_expired(now) || s.scope.is_cancelled())
                            .map(|s| s.id)
                            .collect()
                    };
                    let count = expired.len();
                    for id in expired {
                        let _ = manager.unsubscribe(id).await;
                    }
                    if count > 0 {
                        tracing::info!(count, "subscription cleanup sweep removed expired/cancelled subscriptions");
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
    use crate::modules::model::Message;
    use std::sync::atomic::AtomicUsize;

    fn filter(real_mailbox: &str, subject: Option<&str>) -> EmailFilter {
        EmailFilter {
            real_mailbox: real_mailbox.into(),
            subject: subject.map(String::from),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn subscribe_and_distribute_delivers_matching_email() {
        let manager = SubscriptionManager::new(Arc::new(NoopHooks));
        let req = SubscribeRequest::new(
            SubscriptionKind::Realtime,
            filter("inbox@example.com", Some("invoice")),
        );
        let outcome = manager.subscribe(req).await.unwrap();
        let SubscribeOutcome::Created { mut email_rx, .. } = outcome else {
            panic!("expected a fresh subscription")
        };

        let message = Message {
            subject: Some("October invoice".into()),
            mailbox_name: "inbox@example.com".into(),
            ..Default::default()
        };
        manager.distribute("inbox@example.com", &message).await;

        let received = email_rx.recv().await.unwrap();
        assert_eq!(received.subject, message.subject);
    }

    #[tokio::test]
    async fn duplicate_fingerprint_reuses_live_subscription() {
        let manager = SubscriptionManager::new(Arc::new(NoopHooks));
        let req = || SubscribeRequest::new(SubscriptionKind::Realtime, filter("m", Some("x")));
        let first = manager.subscribe(req()).await.unwrap();
        let first_id = first.subscription().id;
        let second = manager.subscribe(req()).await.unwrap();
        assert!(matches!(second, SubscribeOutcome::Reused(_)));
        assert_eq!(second.subscription().id, first_id);
    }

    #[tokio::test]
    async fn unsubscribe_removes_from_every_index() {
        let manager = SubscriptionManager::new(Arc::new(NoopHooks));
        let req = SubscribeRequest::new(SubscriptionKind::Realtime, filter("m", None));
        let outcome = manager.subscribe(req).await.unwrap();
        let id = outcome.subscription().id;
        manager.unsubscribe(id).await.unwrap();
        assert_eq!(manager.active_count(), 0);
        assert_eq!(manager.subscriptions_for_mailbox("m"), 0);
        assert!(manager.get(id).is_none());
    }

    #[tokio::test]
    async fn unsubscribe_unknown_id_is_not_found() {
        let manager = SubscriptionManager::new(Arc::new(NoopHooks));
        let err = manager.unsubscribe(999).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn capacity_exceeded_once_max_reached() {
        let manager = SubscriptionManager::new(Arc::new(NoopHooks));
        manager.set_max_subscriptions(1);
        manager
            .subscribe(SubscribeRequest::new(
                SubscriptionKind::Realtime,
                filter("a", None),
            ))
            .await
            .unwrap();
        let err = manager
            .subscribe(SubscribeRequest::new(
                SubscriptionKind::Realtime,
                filter("b", None),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CapacityExceeded);
    }

    #[tokio::test]
    async fn callback_subscription_receives_matching_email() {
        let manager = SubscriptionManager::new(Arc::new(NoopHooks));
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let mut req = SubscribeRequest::new(SubscriptionKind::Webhook, filter("m", None));
        req.callback = Some(Arc::new(move |_msg| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));
        manager.subscribe(req).await.unwrap();
        manager
            .distribute("m", &Message::default())
            .await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
