// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

pub mod account;
pub mod cache;
pub mod mailbox;
pub mod message;
pub mod subscription;
pub mod sync;

pub use account::{AuthKind, MailAccount, MailProvider, ProviderKind};
pub use cache::CacheEntry;
pub use mailbox::{Mailbox, MailboxFlag};
pub use message::{Attachment, Message};
pub use subscription::{
    EmailFilter, FetchStrategy, Subscription, SubscriptionFingerprint, SubscriptionKind,
};
pub use sync::{
    GlobalSyncConfig, SyncConfig, SyncStatistics, SyncStatus, TemporarySyncConfig,
};
