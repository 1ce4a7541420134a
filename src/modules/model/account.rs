// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::modules::common::ProxyConfig;

/// How the engine authenticates to the backend.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum AuthKind {
    #[default]
    Password,
    Token,
    OAuth2,
}

/// Which fetch adapter `select_adapter` routes an account to.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum ProviderKind {
    Gmail,
    Outlook,
    #[default]
    Custom,
}

/// A mail account the engine fetches on behalf of. Immutable except
/// `last_sync_at`, token material in `custom_settings`, and `verified`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MailAccount {
    pub id: u64,
    pub address: String,
    pub auth_kind: AuthKind,
    pub provider: ProviderKind,
    pub imap_host: String,
    pub imap_port: u16,
    pub proxy: Option<ProxyConfig>,
    pub custom_settings: HashMap<String, String>,
    pub oauth2_provider_id: Option<u64>,
    pub verified: bool,
    pub last_sync_at: Option<i64>,
}

impl MailAccount {
    pub fn is_gmail_oauth2(&self) -> bool {
        self.auth_kind == AuthKind::OAuth2 && self.provider == ProviderKind::Gmail
    }
}

/// Referenced by `MailAccount::oauth2_provider_id` / the backend connection
/// parameters for a provider family. Never deleted while an account
/// references it; enforced by the injected account store, out of scope here.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MailProvider {
    pub id: u64,
    pub name: String,
    pub kind: ProviderKind,
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gmail_oauth2_routes_to_gmail_adapter() {
        let account = MailAccount {
            auth_kind: AuthKind::OAuth2,
            provider: ProviderKind::Gmail,
            ..Default::default()
        };
        assert!(account.is_gmail_oauth2());
    }

    #[test]
    fn outlook_oauth2_does_not_route_to_gmail_adapter() {
        let account = MailAccount {
            auth_kind: AuthKind::OAuth2,
            provider: ProviderKind::Outlook,
            ..Default::default()
        };
        assert!(!account.is_gmail_oauth2());
    }
}
