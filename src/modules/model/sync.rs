// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Error,
}

/// Per-account sync configuration and bookkeeping. Invariant:
/// `sync_interval_seconds >= 5`; `last_sync_end_time`, when set, is `<= now`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub enable_auto_sync: bool,
    pub sync_interval_seconds: u64,
    pub sync_folders: Vec<String>,
    pub last_sync_time: Option<i64>,
    pub last_sync_end_time: Option<i64>,
    pub last_sync_message_id: Option<String>,
    pub sync_status: SyncStatus,
    pub last_sync_error: Option<String>,
    /// Backend-specific incremental cursor (Gmail history id).
    pub last_history_id: Option<String>,
}

impl SyncConfig {
    pub fn validated(mut self) -> Self {
        if self.sync_interval_seconds < 5 {
            self.sync_interval_seconds = 5;
        }
        self
    }
}

/// A caller-scoped override of `SyncConfig`, active while `now <= expires_at`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemporarySyncConfig {
    pub account_id: u64,
    pub sync_interval_seconds: u64,
    pub sync_folders: Vec<String>,
    pub expires_at: i64,
}

impl TemporarySyncConfig {
    pub fn is_active(&self, now: i64) -> bool {
        now <= self.expires_at
    }
}

/// Process-wide sync defaults applied to verified accounts without an
/// explicit per-account `SyncConfig`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlobalSyncConfig {
    pub default_enable_sync: bool,
    pub default_sync_interval: u64,
    pub default_sync_folders: Vec<String>,
    pub max_sync_workers: usize,
    pub max_emails_per_sync: usize,
}

impl Default for GlobalSyncConfig {
    fn default() -> Self {
        Self {
            default_enable_sync: true,
            default_sync_interval: 60,
            default_sync_folders: vec!["INBOX".to_string()],
            max_sync_workers: 3,
            max_emails_per_sync: 500,
        }
    }
}

/// One day's sync counters for one account.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatistics {
    pub date: String,
    pub emails_synced: u64,
    pub duration_ms: u64,
    pub errors_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validated_clamps_interval_to_minimum() {
        let config = SyncConfig {
            sync_interval_seconds: 1,
            ..Default::default()
        }
        .validated();
        assert_eq!(config.sync_interval_seconds, 5);
    }

    #[test]
    fn temporary_config_expires() {
        let temp = TemporarySyncConfig {
            account_id: 1,
            sync_interval_seconds: 30,
            sync_folders: vec![],
            expires_at: 1_000,
        };
        assert!(temp.is_active(999));
        assert!(!temp.is_active(1_001));
    }
}
