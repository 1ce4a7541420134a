// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::modules::model::Message;
use crate::modules::utils::{canonicalize_address, hash_parts};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum SubscriptionKind {
    Realtime,
    Scheduled,
    Webhook,
    Polling,
    IncrementalSync,
}

impl SubscriptionKind {
    fn as_str(&self) -> &'static str {
        match self {
            SubscriptionKind::Realtime => "realtime",
            SubscriptionKind::Scheduled => "scheduled",
            SubscriptionKind::Webhook => "webhook",
            SubscriptionKind::Polling => "polling",
            SubscriptionKind::IncrementalSync => "incremental_sync",
        }
    }
}

/// Selects which messages a subscription receives. `None`/empty disables a
/// predicate. See `matches` for the exact evaluation order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailFilter {
    pub requested_address: Option<String>,
    pub real_mailbox: String,
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub has_attachment: Option<bool>,
    pub unread: Option<bool>,
    pub labels: Vec<String>,
    pub folders: Vec<String>,
    pub custom_filters: HashMap<String, String>,
}

impl EmailFilter {
    /// Evaluates every predicate in the order documented by the spec's
    /// "filter match" semantics. Each trace line is gated behind `debug` so
    /// it costs nothing once release logging is filtered at `info`+.
    pub fn matches(&self, message: &Message) -> bool {
        if let Some(start) = self.start_date {
            let pass = message.date.is_some_and(|d| d >= start);
            tracing::debug!(predicate = "start_date", pass, "filter predicate");
            if !pass {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            let pass = message.date.is_some_and(|d| d <= end);
            tracing::debug!(predicate = "end_date", pass, "filter predicate");
            if !pass {
                return false;
            }
        }
        if !self.folders.is_empty() {
            let pass = self.folders.iter().any(|f| f == &message.mailbox_name);
            tracing::debug!(predicate = "folders", pass, "filter predicate");
            if !pass {
                return false;
            }
        }
        if let Some(requested) = &self.requested_address {
            let canonical = canonicalize_address(requested);
            let pass = message
                .to
                .iter()
                .chain(message.cc.iter())
                .chain(message.bcc.iter())
                .filter_map(|a| a.address.as_deref())
                .any(|a| canonicalize_address(a) == canonical);
            tracing::debug!(predicate = "requested_address", pass, "filter predicate");
            if !pass {
                return false;
            }
        }
        if let Some(subject) = &self.subject {
            let pass = message
                .subject
                .as_deref()
                .is_some_and(|s| s.to_lowercase().contains(&subject.to_lowercase()));
            tracing::debug!(predicate = "subject", pass, "filter predicate");
            if !pass {
                return false;
            }
        }
        if let Some(from) = &self.from {
            let needle = from.to_lowercase();
            let pass = message
                .from
                .iter()
                .map(|a| a.to_string().to_lowercase())
                .any(|a| a.contains(&needle));
            tracing::debug!(predicate = "from", pass, "filter predicate");
            if !pass {
                return false;
            }
        }
        if let Some(to) = &self.to {
            let needle = to.to_lowercase();
            let pass = message
                .to
                .iter()
                .map(|a| a.to_string().to_lowercase())
                .any(|a| a.contains(&needle));
            tracing::debug!(predicate = "to", pass, "filter predicate");
            if !pass {
                return false;
            }
        }
        if let Some(has_attachment) = self.has_attachment {
            let pass = !message.attachments.is_empty() == has_attachment;
            tracing::debug!(predicate = "has_attachment", pass, "filter predicate");
            if !pass {
                return false;
            }
        }
        // custom_filters: reserved extension point, always passes (§9).
        tracing::debug!(predicate = "custom_filters", pass = true, "filter predicate");
        true
    }
}

/// Deterministic canonicalization of a subscription request, used to dedup
/// identical live subscriptions.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SubscriptionFingerprint(pub u64);

impl SubscriptionFingerprint {
    pub fn compute(kind: SubscriptionKind, filter: &EmailFilter) -> Self {
        let mut folders = filter.folders.clone();
        folders.sort();
        let mut custom: Vec<String> = filter
            .custom_filters
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        custom.sort();
        let parts = vec![
            kind.as_str().to_string(),
            filter.real_mailbox.clone(),
            filter.start_date.map(|d| d.to_string()).unwrap_or_default(),
            filter.end_date.map(|d| d.to_string()).unwrap_or_default(),
            filter.subject.clone().unwrap_or_default(),
            filter.from.clone().unwrap_or_default(),
            filter.to.clone().unwrap_or_default(),
            folders.join(","),
            custom.join(","),
        ];
        SubscriptionFingerprint(hash_parts(&parts))
    }
}

/// The union of all active subscriptions' needs for a mailbox, used to issue
/// one fetch for many consumers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchStrategy {
    pub real_mailbox: String,
    pub earliest_date: Option<i64>,
    pub latest_date: Option<i64>,
    pub folders: Vec<String>,
}

impl FetchStrategy {
    /// Unions `(start_date, end_date, folders)` across every filter: earliest
    /// start, latest end, union of folders. A `None` bound on any filter
    /// widens the union to unbounded on that side, since that subscriber
    /// wants everything.
    pub fn union(real_mailbox: &str, filters: &[EmailFilter]) -> Self {
        let mut earliest_date = Some(i64::MAX);
        let mut latest_date = Some(i64::MIN);
        let mut folders = std::collections::BTreeSet::new();

        for filter in filters {
            match filter.start_date {
                Some(d) => earliest_date = earliest_date.map(|e| e.min(d)),
                None => earliest_date = None,
            }
            match filter.end_date {
                Some(d) => latest_date = latest_date.map(|l| l.max(d)),
                None => latest_date = None,
            }
            folders.extend(filter.folders.iter().cloned());
        }

        if filters.is_empty() {
            earliest_date = None;
            latest_date = None;
        }

        Self {
            real_mailbox: real_mailbox.to_string(),
            earliest_date,
            latest_date,
            folders: if folders.is_empty() {
                vec!["INBOX".to_string()]
            } else {
                folders.into_iter().collect()
            },
        }
    }
}

/// Delivery counters maintained for `get_metrics` and per-subscription
/// introspection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionStats {
    pub delivered: u64,
    pub dropped: u64,
    pub errors: u64,
}

pub type SubscriptionCallback = Arc<dyn Fn(Message) + Send + Sync>;

/// A live consumer interest. Exactly one of `callback` or `email_tx`
/// receives a matched email; both channels are dropped exactly once, by the
/// manager, on unsubscribe.
#[derive(Clone)]
pub struct Subscription {
    pub id: u64,
    pub kind: SubscriptionKind,
    pub priority: i32,
    pub filter: EmailFilter,
    pub fingerprint: SubscriptionFingerprint,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub email_tx: Option<mpsc::Sender<Message>>,
    pub error_tx: Option<mpsc::Sender<String>>,
    pub callback: Option<SubscriptionCallback>,
    pub metadata: HashMap<String, String>,
    pub stats: Arc<std::sync::Mutex<SubscriptionStats>>,
    pub scope: CancellationToken,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("filter", &self.filter)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Subscription {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(subject: Option<&str>) -> EmailFilter {
        EmailFilter {
            real_mailbox: "inbox@example.com".into(),
            subject: subject.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn fingerprint_is_stable_for_identical_requests() {
        let a = SubscriptionFingerprint::compute(SubscriptionKind::Realtime, &filter(Some("hi")));
        let b = SubscriptionFingerprint::compute(SubscriptionKind::Realtime, &filter(Some("hi")));
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_on_subject() {
        let a = SubscriptionFingerprint::compute(SubscriptionKind::Realtime, &filter(Some("hi")));
        let b = SubscriptionFingerprint::compute(SubscriptionKind::Realtime, &filter(Some("bye")));
        assert_ne!(a, b);
    }

    #[test]
    fn subject_predicate_is_case_insensitive_substring() {
        let f = filter(Some("Invoice"));
        let message = Message {
            subject: Some("Your October invoice is ready".into()),
            ..Default::default()
        };
        assert!(f.matches(&message));
    }

    #[test]
    fn start_date_predicate_excludes_older_messages() {
        let f = EmailFilter {
            real_mailbox: "inbox@example.com".into(),
            start_date: Some(1_000),
            ..Default::default()
        };
        let message = Message {
            date: Some(500),
            ..Default::default()
        };
        assert!(!f.matches(&message));
    }

    #[test]
    fn empty_predicates_always_pass() {
        let f = filter(None);
        let message = Message::default();
        assert!(f.matches(&message));
    }

    #[test]
    fn fetch_strategy_union_takes_earliest_start_and_latest_end() {
        let a = EmailFilter {
            real_mailbox: "m".into(),
            start_date: Some(500),
            end_date: Some(1_000),
            ..Default::default()
        };
        let b = EmailFilter {
            real_mailbox: "m".into(),
            start_date: Some(100),
            end_date: Some(2_000),
            ..Default::default()
        };
        let strategy = FetchStrategy::union("m", &[a, b]);
        assert_eq!(strategy.earliest_date, Some(100));
        assert_eq!(strategy.latest_date, Some(2_000));
    }

    #[test]
    fn fetch_strategy_union_is_unbounded_if_any_filter_is_unbounded() {
        let bounded = EmailFilter {
            real_mailbox: "m".into(),
            start_date: Some(500),
            ..Default::default()
        };
        let unbounded = EmailFilter {
            real_mailbox: "m".into(),
            ..Default::default()
        };
        let strategy = FetchStrategy::union("m", &[bounded, unbounded]);
        assert_eq!(strategy.earliest_date, None);
    }

    #[test]
    fn fetch_strategy_union_defaults_folders_to_inbox() {
        let filter = EmailFilter {
            real_mailbox: "m".into(),
            ..Default::default()
        };
        let strategy = FetchStrategy::union("m", &[filter]);
        assert_eq!(strategy.folders, vec!["INBOX".to_string()]);
    }
}
