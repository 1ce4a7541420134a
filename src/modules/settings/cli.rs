// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use clap::Parser;
use std::sync::LazyLock;

#[cfg(not(test))]
pub static SETTINGS: LazyLock<Settings> = LazyLock::new(Settings::parse);

#[cfg(test)]
pub static SETTINGS: LazyLock<Settings> = LazyLock::new(Settings::new_for_test);

#[derive(Debug, Parser)]
#[clap(
    name = "mailsync-engine",
    about = "A concurrent email fetch and subscription engine over IMAP and the Gmail API.",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct Settings {
    /// Log level (default: "info")
    #[clap(long, default_value = "info", env, help = "Set the log level")]
    pub log_level: String,

    /// Enable log file output (otherwise logs go to stdout)
    #[clap(long, default_value = "false", env)]
    pub log_to_file: bool,

    /// Enable ANSI formatted logs
    #[clap(long, default_value = "true", env)]
    pub log_ansi: bool,

    /// Maximum number of rolling daily log files to retain
    #[clap(long, default_value = "5", env)]
    pub log_max_files: usize,

    /// Directory rolling file logs are written to, when `log_to_file` is set
    #[clap(long, default_value = "./logs", env)]
    pub log_dir: String,

    /// Minimum delay between two fetches for the same mailbox worker
    #[clap(
        long,
        default_value = "5",
        env,
        help = "Minimum fetch interval in seconds"
    )]
    pub scheduler_min_fetch_interval_secs: u64,

    /// Maximum number of concurrently running mailbox workers
    #[clap(long, default_value = "10", env)]
    pub scheduler_max_workers: usize,

    /// How long a cached fetch result stays fresh
    #[clap(long, default_value = "60", env)]
    pub scheduler_cache_duration_secs: u64,

    /// Interval between idle-worker cleanup sweeps
    #[clap(long, default_value = "300", env)]
    pub scheduler_cleanup_interval_secs: u64,

    /// Whether the scheduler prefetches mailboxes near their next due fetch
    #[clap(long, default_value = "true", env)]
    pub scheduler_enable_prefetch: bool,

    /// How far ahead of a mailbox's due time prefetch may fire
    #[clap(long, default_value = "60", env)]
    pub scheduler_prefetch_window_secs: u64,

    /// Default subscription expiration when the caller does not specify one
    #[clap(long, default_value = "86400", env)]
    pub subscription_default_expiration_secs: u64,

    /// Interval between expired-subscription cleanup sweeps
    #[clap(long, default_value = "300", env)]
    pub subscription_cleanup_interval_secs: u64,

    /// Maximum number of concurrently registered subscriptions
    #[clap(long, default_value = "1000", env)]
    pub subscription_max_subscriptions: usize,

    /// How long a worker may sit idle before its state machine is torn down
    #[clap(long, default_value = "300", env)]
    pub worker_idle_timeout_secs: u64,

    /// Interval between idle-worker reclaim sweeps
    #[clap(long, default_value = "60", env)]
    pub worker_cleanup_interval_secs: u64,

    /// Interval at which a debouncing worker re-checks whether it should fetch
    #[clap(long, default_value = "30", env)]
    pub worker_idle_check_timer_secs: u64,

    /// Interval between incremental sync poll cycles
    #[clap(long, default_value = "2", env)]
    pub sync_poll_interval_secs: u64,

    /// Number of accounts processed per sync poll batch
    #[clap(long, default_value = "10", env)]
    pub sync_batch_size: usize,

    /// Timeout applied to persisted-state reads/writes during a sync cycle
    #[clap(long, default_value = "5", env)]
    pub sync_db_timeout_secs: u64,

    /// Number of concurrent sync worker tasks
    #[clap(long, default_value = "3", env)]
    pub sync_workers: usize,

    /// Overlap applied to the trailing edge of a sync window, to tolerate clock skew
    #[clap(long, default_value = "300", env)]
    pub sync_window_buffer_secs: u64,

    /// Maximum span a single sync window may cover
    #[clap(long, default_value = "86400", env)]
    pub sync_window_cap_secs: u64,
}

impl Settings {
    #[cfg(test)]
    fn new_for_test() -> Self {
        Self {
            log_level: "info".to_string(),
            log_to_file: false,
            log_ansi: false,
            log_max_files: 5,
            log_dir: "./logs".to_string(),
            scheduler_min_fetch_interval_secs: 5,
            scheduler_max_workers: 10,
            scheduler_cache_duration_secs: 60,
            scheduler_cleanup_interval_secs: 300,
            scheduler_enable_prefetch: true,
            scheduler_prefetch_window_secs: 60,
            subscription_default_expiration_secs: 86400,
            subscription_cleanup_interval_secs: 300,
            subscription_max_subscriptions: 1000,
            worker_idle_timeout_secs: 300,
            worker_cleanup_interval_secs: 60,
            worker_idle_check_timer_secs: 30,
            sync_poll_interval_secs: 2,
            sync_batch_size: 10,
            sync_db_timeout_secs: 5,
            sync_workers: 3,
            sync_window_buffer_secs: 300,
            sync_window_cap_secs: 86400,
        }
    }
}
