// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Narrow traits the engine is injected with at construction time, matching
//! §4.5/§9: persistence, alias resolution, and account/token state are
//! opaque to the core and modeled here as collaborator interfaces rather
//! than a concrete database layer.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::modules::error::EngineResult;
use crate::modules::model::{MailAccount, Message, SyncConfig};

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get(&self, account_id: u64) -> EngineResult<Option<MailAccount>>;

    /// All accounts eligible for sync provisioning. Used by the config
    /// change monitor to auto-provision a `SyncConfig` for a verified
    /// account that doesn't have one yet.
    async fn list_verified(&self) -> EngineResult<Vec<MailAccount>>;
}

#[async_trait]
pub trait SyncConfigStore: Send + Sync {
    async fn list(&self) -> EngineResult<HashMap<u64, SyncConfig>>;
    async fn get(&self, account_id: u64) -> EngineResult<Option<SyncConfig>>;
    async fn put(&self, account_id: u64, config: SyncConfig) -> EngineResult<()>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn exists(&self, account_id: u64, message_id: &str) -> EngineResult<bool>;
    async fn insert(&self, message: Message) -> EngineResult<()>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get_access_token(&self, account_id: u64) -> EngineResult<Option<String>>;
    /// The access token's expiry, in epoch milliseconds, if one is cached.
    async fn get_expires_at(&self, account_id: u64) -> EngineResult<Option<i64>>;
    async fn put_access_token(
        &self,
        account_id: u64,
        token: String,
        expires_at: i64,
    ) -> EngineResult<()>;
}

/// Resolves a requested/aliased address to the real mailbox that owns it.
/// Default behavior is identity — extension point for a domain-catch-all
/// policy the source system never specified (§9).
pub trait AliasResolver: Send + Sync {
    fn resolve(&self, requested_address: &str) -> String;
}

pub struct IdentityAliasResolver;

impl AliasResolver for IdentityAliasResolver {
    fn resolve(&self, requested_address: &str) -> String {
        requested_address.to_string()
    }
}

/// In-memory reference implementations used by the crate's own test suite;
/// no mocking framework, per the spec's test-tooling note.
pub mod fakes {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeAccountStore {
        pub accounts: RwLock<HashMap<u64, MailAccount>>,
    }

    #[async_trait]
    impl AccountStore for FakeAccountStore {
        async fn get(&self, account_id: u64) -> EngineResult<Option<MailAccount>> {
            Ok(self.accounts.read().unwrap().get(&account_id).cloned())
        }

        async fn list_verified(&self) -> EngineResult<Vec<MailAccount>> {
            Ok(self
                .accounts
                .read()
                .unwrap()
                .values()
                .filter(|a| a.verified)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    pub struct FakeSyncConfigStore {
        pub configs: RwLock<HashMap<u64, SyncConfig>>,
    }

    #[async_trait]
    impl SyncConfigStore for FakeSyncConfigStore {
        async fn list(&self) -> EngineResult<HashMap<u64, SyncConfig>> {
            Ok(self.configs.read().unwrap().clone())
        }

        async fn get(&self, account_id: u64) -> EngineResult<Option<SyncConfig>> {
            Ok(self.configs.read().unwrap().get(&account_id).cloned())
        }

        async fn put(&self, account_id: u64, config: SyncConfig) -> EngineResult<()> {
            self.configs.write().unwrap().insert(account_id, config);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeMessageStore {
        seen: Mutex<HashSet<(u64, String)>>,
        pub messages: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl MessageStore for FakeMessageStore {
        async fn exists(&self, account_id: u64, message_id: &str) -> EngineResult<bool> {
            Ok(self
                .seen
                .lock()
                .unwrap()
                .contains(&(account_id, message_id.to_string())))
        }

        async fn insert(&self, message: Message) -> EngineResult<()> {
            if let Some(message_id) = message.message_id.clone() {
                self.seen
                    .lock()
                    .unwrap()
                    .insert((message.account_id, message_id));
            }
            self.messages.lock().unwrap().push(message);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeTokenStore {
        tokens: Mutex<HashMap<u64, (String, i64)>>,
    }

    #[async_trait]
    impl TokenStore for FakeTokenStore {
        async fn get_access_token(&self, account_id: u64) -> EngineResult<Option<String>> {
            Ok(self
                .tokens
                .lock()
                .unwrap()
                .get(&account_id)
                .map(|(t, _)| t.clone()))
        }

        async fn get_expires_at(&self, account_id: u64) -> EngineResult<Option<i64>> {
            Ok(self
                .tokens
                .lock()
                .unwrap()
                .get(&account_id)
                .map(|(_, expires_at)| *expires_at))
        }

        async fn put_access_token(
            &self,
            account_id: u64,
            token: String,
            expires_at: i64,
        ) -> EngineResult<()> {
            self.tokens
                .lock()
                .unwrap()
                .insert(account_id, (token, expires_at));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::*;

    #[tokio::test]
    async fn fake_message_store_dedupes_by_account_and_message_id() {
        let store = FakeMessageStore::default();
        let message = Message {
            account_id: 1,
            message_id: Some("abc".into()),
            ..Default::default()
        };
        assert!(!store.exists(1, "abc").await.unwrap());
        store.insert(message).await.unwrap();
        assert!(store.exists(1, "abc").await.unwrap());
        assert!(!store.exists(2, "abc").await.unwrap());
    }

    #[test]
    fn identity_resolver_returns_input_unchanged() {
        let resolver = IdentityAliasResolver;
        assert_eq!(resolver.resolve("a@example.com"), "a@example.com");
    }
}
