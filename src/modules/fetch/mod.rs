// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::Arc;

use async_trait::async_trait;

use crate::modules::error::EngineResult;
use crate::modules::model::{MailAccount, Mailbox, Message};

pub mod gmail;
pub mod imap;

/// The union of what every live subscription for a mailbox needs, built by
/// the Worker Pool (§4.2 step 2) from the active `EmailFilter`s.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FetchOptions {
    pub folders: Vec<String>,
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    pub limit: usize,
    pub offset: usize,
    pub include_body: bool,
    /// Incremental cursor for backends that support one (Gmail's history
    /// id). When set, a backend may fetch only what changed since this
    /// cursor instead of re-listing the whole window; `None` forces a full
    /// listing.
    pub last_history_id: Option<String>,
}

impl FetchOptions {
    pub fn folders_or_inbox(&self) -> Vec<String> {
        if self.folders.is_empty() {
            vec!["INBOX".to_string()]
        } else {
            self.folders.clone()
        }
    }
}

/// What a `fetch` call returned: the messages, plus the backend's new
/// incremental cursor when it has one to report.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FetchResult {
    pub messages: Vec<Message>,
    pub history_id: Option<String>,
}

/// Uniform interface over the IMAP and Gmail API backends (§4.5).
#[async_trait]
pub trait FetchAdapter: Send + Sync {
    async fn fetch(&self, account: &MailAccount, options: &FetchOptions) -> EngineResult<FetchResult>;
    async fn list_mailboxes(&self, account: &MailAccount) -> EngineResult<Vec<Mailbox>>;
    async fn verify(&self, account: &MailAccount) -> EngineResult<()>;
}

/// Picks the adapter for an account: Gmail OAuth2 routes to the Gmail API,
/// everything else (including Outlook OAuth2) goes through IMAP + XOAUTH2.
pub struct FetchAdapterRouter {
    imap: Arc<dyn FetchAdapter>,
    gmail: Arc<dyn FetchAdapter>,
}

impl FetchAdapterRouter {
    pub fn new(imap: Arc<dyn FetchAdapter>, gmail: Arc<dyn FetchAdapter>) -> Self {
        Self { imap, gmail }
    }

    pub fn select(&self, account: &MailAccount) -> Arc<dyn FetchAdapter> {
        if account.is_gmail_oauth2() {
            self.gmail.clone()
        } else {
            self.imap.clone()
        }
    }
}

#[async_trait]
impl FetchAdapter for FetchAdapterRouter {
    async fn fetch(&self, account: &MailAccount, options: &FetchOptions) -> EngineResult<FetchResult> {
        self.select(account).fetch(account, options).await
    }

    async fn list_mailboxes(&self, account: &MailAccount) -> EngineResult<Vec<Mailbox>> {
        self.select(account).list_mailboxes(account).await
    }

    async fn verify(&self, account: &MailAccount) -> EngineResult<()> {
        self.select(account).verify(account).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::model::{AuthKind, ProviderKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAdapter(Arc<AtomicUsize>);

    #[async_trait]
    impl FetchAdapter for CountingAdapter {
        async fn fetch(&self, _account: &MailAccount, _options: &FetchOptions) -> EngineResult<FetchResult> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(FetchResult::default())
        }

        async fn list_mailboxes(&self, _account: &MailAccount) -> EngineResult<Vec<Mailbox>> {
            Ok(vec![])
        }

        async fn verify(&self, _account: &MailAccount) -> EngineResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn gmail_oauth2_account_routes_to_gmail_adapter() {
        let imap_hits = Arc::new(AtomicUsize::new(0));
        let gmail_hits = Arc::new(AtomicUsize::new(0));
        let router = FetchAdapterRouter::new(
            Arc::new(CountingAdapter(imap_hits.clone())),
            Arc::new(CountingAdapter(gmail_hits.clone())),
        );
        let account = MailAccount {
            auth_kind: AuthKind::OAuth2,
            provider: ProviderKind::Gmail,
            ..Default::default()
        };
        router.fetch(&account, &FetchOptions::default()).await.unwrap();
        assert_eq!(gmail_hits.load(Ordering::SeqCst), 1);
        assert_eq!(imap_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_gmail_account_routes_to_imap_adapter() {
        let imap_hits = Arc::new(AtomicUsize::new(0));
        let gmail_hits = Arc::new(AtomicUsize::new(0));
        let router = FetchAdapterRouter::new(
            Arc::new(CountingAdapter(imap_hits.clone())),
            Arc::new(CountingAdapter(gmail_hits.clone())),
        );
        router
            .fetch(&MailAccount::default(), &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(imap_hits.load(Ordering::SeqCst), 1);
        assert_eq!(gmail_hits.load(Ordering::SeqCst), 0);
    }
}
