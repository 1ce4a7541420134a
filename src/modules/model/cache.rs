// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use serde::{Deserialize, Serialize};

use crate::modules::model::Message;

/// Cached fetch result for one `real_mailbox`. `now - last_fetch_time <
/// cache_ttl` makes the entry hit-eligible; regardless of TTL, a newest
/// cached message older than 60s marks the entry potentially-stale.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub emails: Vec<Message>,
    pub last_fetch_time: i64,
    pub fetch_error: Option<String>,
}

impl CacheEntry {
    const STALENESS_LIMIT_MS: i64 = 60_000;

    pub fn is_fresh(&self, now: i64, ttl_ms: i64) -> bool {
        if now - self.last_fetch_time >= ttl_ms {
            return false;
        }
        match self.emails.iter().filter_map(|m| m.date).max() {
            Some(newest) => now - newest < Self::STALENESS_LIMIT_MS,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_within_ttl_and_recent_message() {
        let entry = CacheEntry {
            emails: vec![Message {
                date: Some(9_940_000),
                ..Default::default()
            }],
            last_fetch_time: 10_000_000,
            fetch_error: None,
        };
        assert!(entry.is_fresh(10_010_000, 60_000));
    }

    #[test]
    fn stale_when_newest_message_older_than_60s() {
        let entry = CacheEntry {
            emails: vec![Message {
                date: Some(9_000_000),
                ..Default::default()
            }],
            last_fetch_time: 10_000_000,
            fetch_error: None,
        };
        assert!(!entry.is_fresh(10_010_000, 60_000));
    }

    #[test]
    fn stale_once_ttl_elapsed() {
        let entry = CacheEntry {
            emails: vec![],
            last_fetch_time: 0,
            fetch_error: None,
        };
        assert!(!entry.is_fresh(100_000, 60_000));
    }
}
