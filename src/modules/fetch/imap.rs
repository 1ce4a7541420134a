// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::Arc;

use async_imap::types::{Fetch, Flag, Name, NameAttribute};
use async_trait::async_trait;
use bb8::Pool;
use dashmap::DashMap;
use futures::TryStreamExt;
use mail_parser::MessageParser;

use crate::modules::collab::TokenStore;
use crate::modules::error::{code::ErrorCode, EngineResult};
use crate::modules::fetch::{FetchAdapter, FetchOptions, FetchResult};
use crate::modules::imap::connection::{build_imap_pool, Credential, ImapConnectionManager};
use crate::modules::model::{AuthKind, MailAccount, Mailbox, MailboxFlag, Message};
use crate::modules::oauth2::TokenRefresher;
use crate::raise_error;

const ENVELOPE_QUERY: &str = "(UID ENVELOPE FLAGS RFC822.SIZE)";
const ENVELOPE_AND_BODY_QUERY: &str = "(UID ENVELOPE FLAGS RFC822.SIZE RFC822)";

/// Supplies the IMAP dialer's password/token: a plain `custom_settings`
/// lookup for `Password`/`Token` accounts, a single-flight OAuth2 refresh for
/// `OAuth2` accounts.
pub struct AccountCredential {
    token_refresher: Arc<TokenRefresher>,
}

impl AccountCredential {
    pub fn new(token_store: Arc<dyn TokenStore>) -> Self {
        Self {
            token_refresher: Arc::new(TokenRefresher::new(token_store)),
        }
    }
}

#[async_trait]
impl Credential for AccountCredential {
    async fn password_or_token(&self, account: &MailAccount) -> EngineResult<String> {
        match account.auth_kind {
            AuthKind::OAuth2 => self.token_refresher.ensure_fresh_access_token(account).await,
            AuthKind::Password | AuthKind::Token => account
                .custom_settings
                .get("password")
                .cloned()
                .ok_or_else(|| {
                    raise_error!(
                        "account has no password/token configured in custom_settings".into(),
                        ErrorCode::MissingConfiguration
                    )
                }),
        }
    }
}

/// The IMAP backend of `FetchAdapter`: dials with TLS/plaintext per §4.5,
/// authenticates with `LOGIN` or SASL `XOAUTH2`, and parses full `[RFC822]`
/// responses with `mail-parser` rather than walking BODYSTRUCTURE by hand.
pub struct ImapFetchAdapter {
    credential: Arc<dyn Credential>,
    pools: DashMap<u64, Pool<ImapConnectionManager>>,
}

impl ImapFetchAdapter {
    pub fn new(credential: Arc<dyn Credential>) -> Self {
        Self {
            credential,
            pools: DashMap::new(),
        }
    }

    async fn pool_for(&self, account: &MailAccount) -> EngineResult<Pool<ImapConnectionManager>> {
        if let Some(pool) = self.pools.get(&account.id) {
            return Ok(pool.clone());
        }
        let pool = build_imap_pool(account.clone(), self.credential.clone()).await?;
        self.pools.insert(account.id, pool.clone());
        Ok(pool)
    }

    async fn fetch_one_folder(
        &self,
        account: &MailAccount,
        folder: &str,
        options: &FetchOptions,
    ) -> EngineResult<Vec<Message>> {
        let pool = self.pool_for(account).await?;
        let mut session = pool.get().await?;

        let mailbox = session
            .select(folder)
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ProtocolError))?;

        let sequence_set = if let Some(start) = options.start_date {
            let since = chrono::DateTime::from_timestamp_millis(start)
                .unwrap_or_default()
                .format("%d-%b-%Y")
                .to_string();
            let uids = session
                .search(format!("SINCE {since}"))
                .await
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ProtocolError))?;
            if uids.is_empty() {
                return Ok(vec![]);
            }
            let mut sorted: Vec<u32> = uids.into_iter().collect();
            sorted.sort_unstable();
            if sorted.len() > options.limit && options.limit > 0 {
                sorted = sorted.split_off(sorted.len() - options.limit);
            }
            sorted
                .iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(",")
        } else {
            let total = mailbox.exists as usize;
            if total == 0 {
                return Ok(vec![]);
            }
            let limit = if options.limit == 0 { total } else { options.limit };
            let end = total.saturating_sub(options.offset);
            let start = end.saturating_sub(limit).max(1);
            if end == 0 {
                return Ok(vec![]);
            }
            format!("{start}:{end}")
        };

        let query = if options.include_body {
            ENVELOPE_AND_BODY_QUERY
        } else {
            ENVELOPE_QUERY
        };

        let stream = session
            .fetch(&sequence_set, query)
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ProtocolError))?;
        let fetches: Vec<Fetch> = stream
            .try_collect()
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ProtocolError))?;

        Ok(fetches
            .into_iter()
            .map(|fetch| convert_fetch(account.id, folder, fetch))
            .collect())
    }
}

#[async_trait]
impl FetchAdapter for ImapFetchAdapter {
    async fn fetch(&self, account: &MailAccount, options: &FetchOptions) -> EngineResult<FetchResult> {
        let mut messages = Vec::new();
        for folder in options.folders_or_inbox() {
            messages.extend(self.fetch_one_folder(account, &folder, options).await?);
        }
        // IMAP has no incremental cursor equivalent to Gmail's history id.
        Ok(FetchResult { messages, history_id: None })
    }

    async fn list_mailboxes(&self, account: &MailAccount) -> EngineResult<Vec<Mailbox>> {
        let pool = self.pool_for(account).await?;
        let mut session = pool.get().await?;
        let stream = session
            .list(Some(""), Some("*"))
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ProtocolError))?;
        let names: Vec<Name> = stream
            .try_collect()
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ProtocolError))?;
        Ok(names
            .into_iter()
            .map(|name| Mailbox {
                account_id: account.id,
                name: name.name().to_string(),
                delimiter: name.delimiter().and_then(|d| d.chars().next()),
                flags: name.attributes().iter().map(convert_mailbox_flag).collect(),
            })
            .collect())
    }

    async fn verify(&self, account: &MailAccount) -> EngineResult<()> {
        let pool = self.pool_for(account).await?;
        let mut session = pool.get().await?;
        session
            .noop()
            .await
            .map(|_| ())
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ProtocolError))
    }
}

fn convert_mailbox_flag(attr: &NameAttribute<'_>) -> MailboxFlag {
    match attr {
        NameAttribute::NoSelect => MailboxFlag::NoSelect,
        NameAttribute::NoInferiors => MailboxFlag::HasNoChildren,
        NameAttribute::Marked => MailboxFlag::Marked,
        NameAttribute::Unmarked => MailboxFlag::Unmarked,
        NameAttribute::Extension(name) => match name.to_ascii_lowercase().as_str() {
            "\\haschildren" => MailboxFlag::HasChildren,
            "\\hasnochildren" => MailboxFlag::HasNoChildren,
            // Special-use mailboxes (RFC 6154): distinct labels, but the
            // spec's enum has no per-kind variant for them.
            "\\sent" | "\\drafts" | "\\trash" | "\\junk" | "\\all" | "\\archive" | "\\important" | "\\flagged" => {
                MailboxFlag::System
            }
            _ => MailboxFlag::Unmarked,
        },
    }
}

fn convert_fetch(account_id: u64, folder: &str, fetch: Fetch) -> Message {
    let flags: Vec<String> = fetch.flags().map(flag_to_string).collect();
    let size = fetch.size.unwrap_or(0);

    let raw = fetch.body().map(|b| b.to_vec());
    let parsed = raw
        .as_deref()
        .and_then(|bytes| MessageParser::default().parse(bytes));

    match parsed {
        Some(parsed) => Message {
            id: 0,
            message_id: parsed.message_id().map(str::to_string),
            account_id,
            subject: parsed.subject().map(str::to_string),
            from: addr_vec(parsed.from()),
            to: addr_vec(parsed.to()),
            cc: addr_vec(parsed.cc()),
            bcc: addr_vec(parsed.bcc()),
            date: parsed.date().map(|d| d.to_timestamp() * 1000),
            body: parsed.body_text(0).map(|s| s.to_string()),
            html_body: parsed.body_html(0).map(|s| s.to_string()),
            raw,
            attachments: parsed
                .attachments()
                .map(|a| crate::modules::model::Attachment {
                    filename: a.attachment_name().map(str::to_string),
                    content_type: a.content_type().and_then(|c| c.ctype().into()).map(str::to_string),
                    size: a.contents().len() as u32,
                })
                .collect(),
            mailbox_name: folder.to_string(),
            flags,
            size,
        },
        None => {
            // ParseError per §7: store whatever envelope metadata was
            // obtained (just the IMAP-reported flags/size here) with an
            // empty body rather than dropping the message outright.
            let envelope = fetch.envelope();
            Message {
                id: 0,
                message_id: None,
                account_id,
                subject: envelope.and_then(|e| e.subject.as_ref()).map(|s| String::from_utf8_lossy(s).to_string()),
                from: vec![],
                to: vec![],
                cc: vec![],
                bcc: vec![],
                date: None,
                body: None,
                html_body: None,
                raw,
                attachments: vec![],
                mailbox_name: folder.to_string(),
                flags,
                size,
            }
        }
    }
}

fn addr_vec(addr: Option<&mail_parser::Address>) -> Vec<crate::modules::common::Addr> {
    match addr {
        Some(mail_parser::Address::List(list)) => list
            .iter()
            .map(|a| crate::modules::common::Addr {
                name: a.name().map(str::to_string),
                address: a.address().map(str::to_string),
            })
            .collect(),
        Some(mail_parser::Address::Group(groups)) => groups
            .iter()
            .flat_map(|g| g.addresses.iter())
            .map(|a| crate::modules::common::Addr {
                name: a.name().map(str::to_string),
                address: a.address().map(str::to_string),
            })
            .collect(),
        None => vec![],
    }
}

fn flag_to_string(flag: &Flag) -> String {
    match flag {
        Flag::Seen => "\\Seen".to_string(),
        Flag::Answered => "\\Answered".to_string(),
        Flag::Flagged => "\\Flagged".to_string(),
        Flag::Deleted => "\\Deleted".to_string(),
        Flag::Draft => "\\Draft".to_string(),
        Flag::Recent => "\\Recent".to_string(),
        Flag::MayCreate => "\\*".to_string(),
        Flag::Custom(s) => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_to_string_matches_wire_form() {
        assert_eq!(flag_to_string(&Flag::Seen), "\\Seen");
        assert_eq!(flag_to_string(&Flag::Custom("Junk".into())), "Junk");
    }

    #[test]
    fn convert_mailbox_flag_distinguishes_list_attributes() {
        assert_eq!(convert_mailbox_flag(&NameAttribute::NoSelect), MailboxFlag::NoSelect);
        assert_eq!(convert_mailbox_flag(&NameAttribute::Marked), MailboxFlag::Marked);
        assert_eq!(convert_mailbox_flag(&NameAttribute::Unmarked), MailboxFlag::Unmarked);
        assert_eq!(
            convert_mailbox_flag(&NameAttribute::Extension("\\Trash".into())),
            MailboxFlag::System
        );
        assert_eq!(
            convert_mailbox_flag(&NameAttribute::Extension("\\HasChildren".into())),
            MailboxFlag::HasChildren
        );
        assert_eq!(
            convert_mailbox_flag(&NameAttribute::Extension("\\Foo".into())),
            MailboxFlag::Unmarked
        );
    }
}
