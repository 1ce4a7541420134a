// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::Arc;

use dashmap::DashMap;
use oauth2::{
    basic::BasicClient, AuthUrl, ClientId, ClientSecret, RefreshToken, Scope, TokenResponse,
    TokenUrl,
};
use tokio::sync::Mutex;

use crate::modules::collab::TokenStore;
use crate::modules::error::{code::ErrorCode, EngineResult};
use crate::modules::model::{MailAccount, ProviderKind};
use crate::{raise_error, utc_now};

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const MICROSOFT_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";

/// Margin before an access token's reported expiry at which a refresh is
/// triggered proactively rather than waiting for the server to reject it.
const EXPIRY_MARGIN_MS: i64 = 60_000;

pub type OAuth2Client = oauth2::Client<
    oauth2::StandardErrorResponse<oauth2::basic::BasicErrorResponseType>,
    oauth2::StandardTokenResponse<oauth2::EmptyExtraTokenFields, oauth2::basic::BasicTokenType>,
    oauth2::StandardTokenIntrospectionResponse<
        oauth2::EmptyExtraTokenFields,
        oauth2::basic::BasicTokenType,
    >,
    oauth2::StandardRevocableToken,
    oauth2::StandardErrorResponse<oauth2::RevocationErrorResponseType>,
    oauth2::EndpointSet,
    oauth2::EndpointNotSet,
    oauth2::EndpointNotSet,
    oauth2::EndpointNotSet,
    oauth2::EndpointSet,
>;

fn scopes_for(account: &MailAccount) -> Vec<Scope> {
    match account.provider {
        ProviderKind::Gmail => vec![Scope::new("https://mail.google.com/".to_string())],
        ProviderKind::Outlook => vec![Scope::new(
            "https://outlook.office.com/IMAP.AccessAsUser.All".to_string(),
        )],
        ProviderKind::Custom => account
            .custom_settings
            .get("oauth2_scope")
            .map(|s| vec![Scope::new(s.clone())])
            .unwrap_or_default(),
    }
}

fn token_url_for(account: &MailAccount) -> EngineResult<String> {
    match account.provider {
        ProviderKind::Gmail => Ok(GOOGLE_TOKEN_URL.to_string()),
        ProviderKind::Outlook => Ok(MICROSOFT_TOKEN_URL.to_string()),
        ProviderKind::Custom => account
            .custom_settings
            .get("oauth2_token_url")
            .cloned()
            .ok_or_else(|| {
                raise_error!(
                    "custom provider account has no oauth2_token_url configured".into(),
                    ErrorCode::MissingConfiguration
                )
            }),
    }
}

fn build_client(account: &MailAccount) -> EngineResult<OAuth2Client> {
    let client_id = account
        .custom_settings
        .get("oauth2_client_id")
        .ok_or_else(|| {
            raise_error!(
                "account has no oauth2_client_id configured".into(),
                ErrorCode::MissingConfiguration
            )
        })?;
    let client_secret = account
        .custom_settings
        .get("oauth2_client_secret")
        .ok_or_else(|| {
            raise_error!(
                "account has no oauth2_client_secret configured".into(),
                ErrorCode::MissingConfiguration
            )
        })?;
    let token_url = TokenUrl::new(token_url_for(account)?)
        .map_err(|e| raise_error!(e.to_string(), ErrorCode::InvalidParameter))?;
    // `AuthUrl` is required by the builder but never dialed during a refresh.
    let auth_url = AuthUrl::new(token_url.as_str().to_string())
        .map_err(|e| raise_error!(e.to_string(), ErrorCode::InvalidParameter))?;

    Ok(BasicClient::new(ClientId::new(client_id.clone()))
        .set_client_secret(ClientSecret::new(client_secret.clone()))
        .set_auth_uri(auth_url)
        .set_token_uri(token_url))
}

/// Refreshes and caches OAuth2 access tokens with per-account single-flight:
/// concurrent callers for the same account serialize on a per-account lock,
/// and every caller but the first observes the just-refreshed, still-valid
/// token in the injected `TokenStore` and skips the network call entirely.
pub struct TokenRefresher {
    store: Arc<dyn TokenStore>,
    locks: DashMap<u64, Arc<Mutex<()>>>,
    http_client: oauth2::reqwest::Client,
}

impl TokenRefresher {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
            http_client: oauth2::reqwest::ClientBuilder::new()
                .redirect(oauth2::reqwest::redirect::Policy::none())
                .build()
                .expect("default oauth2 http client configuration is valid"),
        }
    }

    fn lock_for(&self, account_id: u64) -> Arc<Mutex<()>> {
        self.locks
            .entry(account_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Returns a currently-valid access token for `account`, refreshing it
    /// first if the cached one is missing or within `EXPIRY_MARGIN_MS` of
    /// expiry.
    pub async fn ensure_fresh_access_token(&self, account: &MailAccount) -> EngineResult<String> {
        let lock = self.lock_for(account.id);
        let _guard = lock.lock().await;

        let cached = self.store.get_access_token(account.id).await?;
        let expires_at = self.store.get_expires_at(account.id).await?;
        if let (Some(token), Some(expires_at)) = (cached, expires_at) {
            if utc_now!() + EXPIRY_MARGIN_MS < expires_at {
                return Ok(token);
            }
        }

        self.refresh(account).await
    }

    async fn refresh(&self, account: &MailAccount) -> EngineResult<String> {
        let refresh_token = account
            .custom_settings
            .get("oauth2_refresh_token")
            .cloned()
            .ok_or_else(|| {
                raise_error!(
                    "account has no oauth2_refresh_token configured".into(),
                    ErrorCode::MissingConfiguration
                )
            })?;

        let client = build_client(account)?;
        let response = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token))
            .add_scopes(scopes_for(account))
            .request_async(&self.http_client)
            .await
            .map_err(|e| classify_refresh_error(e.to_string()))?;

        let access_token = response.access_token().secret().to_owned();
        let expires_at = utc_now!()
            + response
                .expires_in()
                .map(|d| d.as_millis() as i64)
                .unwrap_or(3_600_000);

        self.store
            .put_access_token(account.id, access_token.clone(), expires_at)
            .await?;

        Ok(access_token)
    }
}

fn classify_refresh_error(message: String) -> crate::modules::error::EngineError {
    if message.contains("invalid_grant") {
        raise_error!(
            format!(
                "OAuth2 refresh token rejected ({message}); it may be expired, revoked, or issued for a different client"
            ),
            ErrorCode::AuthExpired
        )
    } else {
        raise_error!(message, ErrorCode::AuthExpired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::collab::fakes::FakeTokenStore;
    use crate::modules::model::AuthKind;

    fn account() -> MailAccount {
        MailAccount {
            id: 1,
            address: "user@example.com".into(),
            auth_kind: AuthKind::OAuth2,
            provider: ProviderKind::Gmail,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn reuses_cached_token_without_refreshing() {
        let store = Arc::new(FakeTokenStore::default());
        store
            .put_access_token(1, "cached-token".into(), utc_now!() + 3_600_000)
            .await
            .unwrap();
        let refresher = TokenRefresher::new(store);

        let token = refresher.ensure_fresh_access_token(&account()).await.unwrap();
        assert_eq!(token, "cached-token");
    }

    #[test]
    fn google_provider_uses_mail_google_scope() {
        let scopes = scopes_for(&account());
        assert_eq!(scopes.len(), 1);
    }
}
