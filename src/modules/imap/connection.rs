// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_imap::Client as ImapClient;
use async_imap::Session;
use async_trait::async_trait;
use bb8::ManageConnection;
use tokio::io::BufWriter;
use tokio::net::lookup_host;

use crate::modules::error::{code::ErrorCode, EngineError, EngineResult};
use crate::modules::imap::capabilities::{check_capabilities, fetch_capabilities};
use crate::modules::imap::oauth2::OAuth2;
use crate::modules::imap::session::SessionStream;
use crate::modules::imap::stats::StatsWrapper;
use crate::modules::model::{AuthKind, MailAccount};
use crate::modules::utils::net::{establish_tcp_connection_with_timeout, establish_tls_connection};
use crate::raise_error;

const ALPN_IMAP: &[&str] = &["imap"];

/// Dials a single IMAP connection for an account: TLS on port 993, plain TCP
/// otherwise. The spec drops STARTTLS, so port selection alone picks the path.
pub struct Client;

impl Client {
    async fn connect(account: &MailAccount) -> EngineResult<Box<dyn SessionStream>> {
        let address = resolve_to_socket_addr(&account.imap_host, account.imap_port).await?;
        let proxy = account.proxy.as_ref();

        let stream: Box<dyn SessionStream> = if account.imap_port == 993 {
            let tls = establish_tls_connection(address, &account.imap_host, ALPN_IMAP, proxy).await?;
            Box::new(StatsWrapper::new(BufWriter::new(tls)))
        } else {
            let tcp = establish_tcp_connection_with_timeout(address, proxy).await?;
            Box::new(StatsWrapper::new(BufWriter::new(tcp)))
        };

        Ok(stream)
    }

    pub async fn login(account: &MailAccount, password: &str) -> EngineResult<Session<Box<dyn SessionStream>>> {
        let stream = Self::connect(account).await?;
        let client = ImapClient::new(stream);
        client
            .login(&account.address, password)
            .await
            .map_err(|(e, _)| raise_error!(e.to_string(), ErrorCode::AuthRequired))
    }

    pub async fn authenticate_xoauth2(
        account: &MailAccount,
        access_token: &str,
    ) -> EngineResult<Session<Box<dyn SessionStream>>> {
        let stream = Self::connect(account).await?;
        let client = ImapClient::new(stream);
        let authenticator = OAuth2::new(account.address.clone(), access_token.to_string());
        client
            .authenticate("XOAUTH2", authenticator)
            .await
            .map_err(|(e, _)| raise_error!(e.to_string(), ErrorCode::AuthExpired))
    }
}

async fn resolve_to_socket_addr(host: &str, port: u16) -> EngineResult<SocketAddr> {
    lookup_host((host, port))
        .await
        .map_err(|e| raise_error!(format!("failed to resolve {}:{}: {}", host, port, e), ErrorCode::TransportError))?
        .next()
        .ok_or_else(|| raise_error!(format!("no addresses found for {}:{}", host, port), ErrorCode::TransportError))
}

/// Supplies a credential for a connection attempt. The manager asks the
/// injected `TokenStore`/account secret for this once per `connect` call,
/// since OAuth2 access tokens can expire between checkouts.
#[async_trait]
pub trait Credential: Send + Sync {
    async fn password_or_token(&self, account: &MailAccount) -> EngineResult<String>;
}

/// `bb8::ManageConnection` impl over an owned `MailAccount`, replacing the
/// teacher's by-id database fetch with a plain value the caller already has.
pub struct ImapConnectionManager {
    account: MailAccount,
    credential: Arc<dyn Credential>,
}

impl ImapConnectionManager {
    pub fn new(account: MailAccount, credential: Arc<dyn Credential>) -> Self {
        Self { account, credential }
    }
}

impl ManageConnection for ImapConnectionManager {
    type Connection = Session<Box<dyn SessionStream>>;
    type Error = EngineError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let secret = self.credential.password_or_token(&self.account).await?;
        let mut session = match self.account.auth_kind {
            AuthKind::OAuth2 => Client::authenticate_xoauth2(&self.account, &secret).await?,
            AuthKind::Password | AuthKind::Token => Client::login(&self.account, &secret).await?,
        };
        let capabilities = fetch_capabilities(&mut session).await?;
        check_capabilities(&capabilities)?;
        Ok(session)
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.noop()
            .await
            .map(|_| ())
            .map_err(|e| raise_error!(e.to_string(), ErrorCode::TransportError))
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

pub async fn build_imap_pool(
    account: MailAccount,
    credential: Arc<dyn Credential>,
) -> EngineResult<bb8::Pool<ImapConnectionManager>> {
    let manager = ImapConnectionManager::new(account, credential);
    let pool = bb8::Pool::builder()
        .connection_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(120))
        .retry_connection(true)
        .max_size(10)
        .test_on_check_out(true)
        .build(manager)
        .await?;

    Ok(pool)
}
