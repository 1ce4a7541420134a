// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::modules::model::{CacheEntry, Message};
use crate::utc_now;

/// Per-mailbox, time-window-aware cache used to satisfy subscription fan-out
/// without re-fetching. A `RwLock`-guarded entry sits inside a top-level
/// `DashMap` over the entry map, the teacher's own preferred concurrent-map
/// type, so a write to one mailbox never blocks a read of another.
#[derive(Default)]
pub struct EmailCache {
    entries: DashMap<String, Arc<RwLock<CacheEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    ttl_ms: i64,
}

impl EmailCache {
    pub fn new(ttl_ms: i64) -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            ttl_ms,
        }
    }

    /// Returns a cached snapshot when the entry is fresh by TTL and the
    /// newest cached message is no more than 60s old; otherwise reports a
    /// miss and bumps the miss counter.
    pub async fn get(&self, real_mailbox: &str) -> Option<Vec<Message>> {
        let slot = self.entries.get(real_mailbox)?.clone();
        let entry = slot.read().await;
        let now = utc_now!();
        if entry.is_fresh(now, self.ttl_ms) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(entry.emails.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub async fn put(&self, real_mailbox: &str, emails: Vec<Message>) {
        let now = utc_now!();
        let slot = self
            .entries
            .entry(real_mailbox.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(CacheEntry::default())))
            .clone();
        let mut entry = slot.write().await;
        entry.emails = emails;
        entry.last_fetch_time = now;
        entry.fetch_error = None;
    }

    /// Drops a mailbox's entry outright, forcing the next `get` to miss
    /// regardless of TTL. Used by `fetch_now(force_refresh = true)`.
    pub async fn invalidate(&self, real_mailbox: &str) {
        self.entries.remove(real_mailbox);
    }

    pub async fn record_error(&self, real_mailbox: &str, error: String) {
        let slot = self
            .entries
            .entry(real_mailbox.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(CacheEntry::default())))
            .clone();
        let mut entry = slot.write().await;
        entry.fetch_error = Some(error);
    }

    /// `hits / (hits + misses)` over the lifetime since start, per §8.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn miss_then_hit_after_put() {
        let cache = EmailCache::new(60_000);
        assert!(cache.get("inbox@example.com").await.is_none());
        cache
            .put(
                "inbox@example.com",
                vec![Message {
                    date: Some(utc_now!()),
                    ..Default::default()
                }],
            )
            .await;
        assert!(cache.get("inbox@example.com").await.is_some());
        assert!(cache.hit_rate() > 0.0);
    }

    #[tokio::test]
    async fn invalidate_forces_a_miss_even_within_ttl() {
        let cache = EmailCache::new(60_000);
        cache
            .put(
                "inbox@example.com",
                vec![Message {
                    date: Some(utc_now!()),
                    ..Default::default()
                }],
            )
            .await;
        assert!(cache.get("inbox@example.com").await.is_some());
        cache.invalidate("inbox@example.com").await;
        assert!(cache.get("inbox@example.com").await.is_none());
    }

    #[tokio::test]
    async fn stale_entry_reports_miss() {
        let cache = EmailCache::new(1);
        cache
            .put(
                "inbox@example.com",
                vec![Message {
                    date: Some(utc_now!()),
                    ..Default::default()
                }],
            )
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(cache.get("inbox@example.com").await.is_none());
    }
}
