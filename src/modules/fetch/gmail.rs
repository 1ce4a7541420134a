// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::modules::common::{Addr, ProxyScheme};
use crate::modules::error::{code::ErrorCode, EngineResult};
use crate::modules::fetch::{FetchAdapter, FetchOptions, FetchResult};
use crate::modules::model::{Mailbox, MailboxFlag, MailAccount, Message};
use crate::modules::oauth2::TokenRefresher;
use crate::{base64_decode_url_safe, raise_error};

const API_ROOT: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
/// §4.5 list caps: 100 messages per incremental history fetch, 500 for a
/// full label-scoped listing.
const INCREMENTAL_FETCH_LIMIT: usize = 100;
const FULL_SYNC_FETCH_LIMIT: usize = 500;

/// Fixed priority used to pick a message's primary mailbox out of its label
/// set, per §4.5. A message with no label in this set keeps the label it was
/// fetched under.
const MAILBOX_LABEL_PRIORITY: &[&str] = &["INBOX", "SENT", "DRAFT", "SPAM", "TRASH", "IMPORTANT", "STARRED"];

fn primary_mailbox_name(label_ids: &[String], fetched_under: &str) -> String {
    MAILBOX_LABEL_PRIORITY
        .iter()
        .find(|candidate| label_ids.iter().any(|id| id.eq_ignore_ascii_case(candidate)))
        .map(|candidate| candidate.to_string())
        .unwrap_or_else(|| fetched_under.to_string())
}

#[derive(Debug, Clone, Deserialize, Default)]
struct LabelList {
    #[serde(default)]
    labels: Vec<Label>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct Label {
    id: String,
    name: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct MessageListResponse {
    #[serde(default)]
    messages: Option<Vec<MessageIndex>>,
    #[serde(rename = "nextPageToken", default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct MessageIndex {
    id: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct FullMessage {
    id: String,
    #[serde(rename = "internalDate")]
    internal_date: String,
    #[serde(rename = "labelIds", default)]
    label_ids: Vec<String>,
    payload: MessagePart,
    #[serde(default)]
    snippet: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct MessagePart {
    #[serde(default)]
    body: PartBody,
    #[serde(rename = "mimeType", default)]
    mime_type: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PartBody {
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct HistoryListResponse {
    #[serde(default)]
    history: Vec<HistoryRecord>,
    #[serde(rename = "historyId", default)]
    history_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct HistoryRecord {
    #[serde(rename = "messagesAdded", default)]
    messages_added: Vec<HistoryMessageRef>,
    #[serde(rename = "labelsAdded", default)]
    labels_added: Vec<HistoryMessageRef>,
    #[serde(rename = "labelsRemoved", default)]
    labels_removed: Vec<HistoryMessageRef>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct HistoryMessageRef {
    message: MessageIndex,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct Profile {
    #[serde(rename = "historyId", default)]
    history_id: Option<String>,
}

/// The Gmail API backend of `FetchAdapter`, grounded on the label-scoped
/// `messages.list` + `messages.get` pair rather than IMAP SEARCH/FETCH.
/// Labels stand in for mailboxes; a fixed set maps onto the spec's
/// `MailboxFlag`s, the rest surface as plain user labels.
pub struct GmailFetchAdapter {
    token_refresher: Arc<TokenRefresher>,
}

impl GmailFetchAdapter {
    pub fn new(token_refresher: Arc<TokenRefresher>) -> Self {
        Self { token_refresher }
    }

    fn http_client(&self, account: &MailAccount) -> EngineResult<reqwest::Client> {
        let mut builder = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10));

        if let Some(proxy) = &account.proxy {
            let scheme = match proxy.scheme {
                ProxyScheme::Socks5 => "socks5",
                ProxyScheme::Http => "http",
                ProxyScheme::Https => "https",
            };
            let proxy_obj = reqwest::Proxy::all(format!("{scheme}://{}", proxy.addr)).map_err(|e| {
                raise_error!(format!("failed to configure proxy: {:#?}", e), ErrorCode::ProxyError)
            })?;
            builder = builder.redirect(reqwest::redirect::Policy::none()).proxy(proxy_obj);
        }

        builder
            .build()
            .map_err(|e| raise_error!(format!("failed to build http client: {:#?}", e), ErrorCode::TransportError))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        client: &reqwest::Client,
        account: &MailAccount,
        url: &str,
    ) -> EngineResult<T> {
        let access_token = self.token_refresher.ensure_fresh_access_token(account).await?;
        let response = client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(raise_error!(
                format!("Gmail API rejected the access token: {}", status),
                ErrorCode::AuthExpired
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(raise_error!(
                format!("Gmail API request failed ({status}): {body}"),
                ErrorCode::ProtocolError
            ));
        }

        response.json::<T>().await.map_err(|e| {
            raise_error!(
                format!("failed to deserialize Gmail API response: {:#?}", e),
                ErrorCode::ParseError
            )
        })
    }

    async fn list_labels(&self, client: &reqwest::Client, account: &MailAccount) -> EngineResult<Vec<Label>> {
        let list: LabelList = self
            .get_json(client, account, &format!("{API_ROOT}/labels"))
            .await?;
        Ok(list.labels)
    }

    async fn label_id_for(&self, client: &reqwest::Client, account: &MailAccount, name: &str) -> EngineResult<String> {
        let labels = self.list_labels(client, account).await?;
        labels
            .into_iter()
            .find(|l| l.name.eq_ignore_ascii_case(name) || l.id.eq_ignore_ascii_case(name))
            .map(|l| l.id)
            .ok_or_else(|| raise_error!(format!("no Gmail label matches '{name}'"), ErrorCode::NotFound))
    }

    async fn fetch_one_label(
        &self,
        client: &reqwest::Client,
        account: &MailAccount,
        label_id: &str,
        options: &FetchOptions,
        default_limit: usize,
    ) -> EngineResult<Vec<Message>> {
        let limit = if options.limit == 0 { default_limit } else { options.limit };
        let mut url = format!("{API_ROOT}/messages?labelIds={label_id}&maxResults={limit}");
        if let Some(start) = options.start_date {
            let days = start / 1000;
            url.push_str(&format!("&q=after:{days}"));
        }

        let list: MessageListResponse = self.get_json(client, account, &url).await?;
        let ids = list.messages.unwrap_or_default();

        let mut messages = Vec::with_capacity(ids.len());
        for index in ids {
            let detail: FullMessage = self
                .get_json(client, account, &format!("{API_ROOT}/messages/{}?format=full", index.id))
                .await?;
            messages.push(convert_message(account.id, label_id, detail, options.include_body));
        }
        Ok(messages)
    }

    /// `users.history.list` from `start_history_id`, collecting every message
    /// id touched by an add or a label change. Deleted messages have nothing
    /// left to fetch, so they're not included. A 404 means the history id is
    /// too old for Gmail to diff from; the caller falls back to a full sync.
    async fn history_list(
        &self,
        client: &reqwest::Client,
        account: &MailAccount,
        start_history_id: &str,
    ) -> EngineResult<(Vec<String>, Option<String>)> {
        let access_token = self.token_refresher.ensure_fresh_access_token(account).await?;
        let url = format!("{API_ROOT}/history?startHistoryId={start_history_id}");
        let response = client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(raise_error!(
                format!("Gmail history id '{start_history_id}' is no longer valid"),
                ErrorCode::GmailApiInvalidHistoryId
            ));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(raise_error!(
                format!("Gmail API rejected the access token: {}", status),
                ErrorCode::AuthExpired
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(raise_error!(
                format!("Gmail API request failed ({status}): {body}"),
                ErrorCode::ProtocolError
            ));
        }

        let parsed: HistoryListResponse = response.json().await.map_err(|e| {
            raise_error!(
                format!("failed to deserialize Gmail API response: {:#?}", e),
                ErrorCode::ParseError
            )
        })?;

        Ok((affected_message_ids(&parsed.history), parsed.history_id))
    }

    async fn current_history_id(&self, client: &reqwest::Client, account: &MailAccount) -> EngineResult<Option<String>> {
        let profile: Profile = self.get_json(client, account, &format!("{API_ROOT}/profile")).await?;
        Ok(profile.history_id)
    }

    async fn fetch_message_by_id(
        &self,
        client: &reqwest::Client,
        account: &MailAccount,
        id: &str,
        fallback_label: &str,
        include_body: bool,
    ) -> EngineResult<Message> {
        let detail: FullMessage = self
            .get_json(client, account, &format!("{API_ROOT}/messages/{id}?format=full"))
            .await?;
        Ok(convert_message(account.id, fallback_label, detail, include_body))
    }
}

#[async_trait]
impl FetchAdapter for GmailFetchAdapter {
    async fn fetch(&self, account: &MailAccount, options: &FetchOptions) -> EngineResult<FetchResult> {
        let client = self.http_client(account)?;

        if let Some(start_history_id) = &options.last_history_id {
            match self.history_list(&client, account, start_history_id).await {
                Ok((ids, new_history_id)) => {
                    let mut messages = Vec::with_capacity(ids.len().min(INCREMENTAL_FETCH_LIMIT));
                    for id in ids.into_iter().take(INCREMENTAL_FETCH_LIMIT) {
                        messages.push(
                            self.fetch_message_by_id(&client, account, &id, "INBOX", options.include_body)
                                .await?,
                        );
                    }
                    return Ok(FetchResult {
                        messages,
                        history_id: new_history_id.or_else(|| Some(start_history_id.clone())),
                    });
                }
                Err(e) if e.code() == ErrorCode::GmailApiInvalidHistoryId => {
                    tracing::warn!(
                        account_id = account.id,
                        "Gmail history id expired, falling back to a full sync"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let mut messages = Vec::new();
        for folder in options.folders_or_inbox() {
            let label_id = self.label_id_for(&client, account, &folder).await?;
            messages.extend(
                self.fetch_one_label(&client, account, &label_id, options, FULL_SYNC_FETCH_LIMIT)
                    .await?,
            );
        }
        let history_id = self.current_history_id(&client, account).await.ok().flatten();
        Ok(FetchResult { messages, history_id })
    }

    async fn list_mailboxes(&self, account: &MailAccount) -> EngineResult<Vec<Mailbox>> {
        let client = self.http_client(account)?;
        let labels = self.list_labels(&client, account).await?;
        Ok(labels
            .into_iter()
            .map(|label| Mailbox {
                account_id: account.id,
                name: label.name.clone(),
                delimiter: None,
                flags: vec![label_flag(&label.name)],
            })
            .collect())
    }

    async fn verify(&self, account: &MailAccount) -> EngineResult<()> {
        let client = self.http_client(account)?;
        self.list_labels(&client, account).await.map(|_| ())
    }
}

/// Distinct message ids touched by an add or a label change across a
/// history page, in first-seen order. Pure deletions carry nothing left to
/// fetch and are excluded.
fn affected_message_ids(history: &[HistoryRecord]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut ids = Vec::new();
    for record in history {
        for changed in record
            .messages_added
            .iter()
            .chain(record.labels_added.iter())
            .chain(record.labels_removed.iter())
        {
            if seen.insert(changed.message.id.clone()) {
                ids.push(changed.message.id.clone());
            }
        }
    }
    ids
}

fn label_flag(name: &str) -> MailboxFlag {
    match name {
        "INBOX" | "SENT" | "DRAFT" | "SPAM" | "TRASH" | "IMPORTANT" | "STARRED" => MailboxFlag::System,
        _ => MailboxFlag::Unmarked,
    }
}

fn convert_message(account_id: u64, label_id: &str, full: FullMessage, include_body: bool) -> Message {
    let mut headers: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    for header in &full.payload.headers {
        headers.entry(header.name.clone()).or_insert_with(|| header.value.clone());
    }

    let date = headers
        .get("Date")
        .and_then(|d| chrono::DateTime::parse_from_rfc2822(d).ok())
        .map(|d| d.timestamp_millis())
        .or_else(|| full.internal_date.parse::<i64>().ok());

    let mut body = None;
    let mut html_body = None;
    let mut attachments = Vec::new();
    if include_body {
        walk_part(&full.payload, &mut body, &mut html_body, &mut attachments);
    }
    if body.is_none() && html_body.is_none() {
        body = Some(full.snippet.clone());
    }

    Message {
        id: 0,
        message_id: headers.get("Message-ID").map(|s| clean_angle_brackets(s)),
        account_id,
        subject: headers.get("Subject").cloned(),
        from: headers.get("From").map(|v| vec![Addr::parse(v)]).unwrap_or_default(),
        to: headers.get("To").map(|v| vec![Addr::parse(v)]).unwrap_or_default(),
        cc: headers.get("Cc").map(|v| vec![Addr::parse(v)]).unwrap_or_default(),
        bcc: headers.get("Bcc").map(|v| vec![Addr::parse(v)]).unwrap_or_default(),
        date,
        body,
        html_body,
        raw: None,
        attachments,
        mailbox_name: primary_mailbox_name(&full.label_ids, label_id),
        flags: full.label_ids,
        size: 0,
    }
}

fn walk_part(
    part: &MessagePart,
    body: &mut Option<String>,
    html_body: &mut Option<String>,
    attachments: &mut Vec<crate::modules::model::Attachment>,
) {
    if let Some(data) = &part.body.data {
        match part.mime_type.as_str() {
            "text/plain" if body.is_none() => *body = decode_body(data),
            "text/html" if html_body.is_none() => *html_body = decode_body(data),
            _ if !part.filename.is_empty() => attachments.push(crate::modules::model::Attachment {
                filename: Some(part.filename.clone()),
                content_type: Some(part.mime_type.clone()),
                size: data.len() as u32,
            }),
            _ => {}
        }
    }

    for sub_part in &part.parts {
        walk_part(sub_part, body, html_body, attachments);
    }
}

fn decode_body(data: &str) -> Option<String> {
    base64_decode_url_safe!(data)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

fn clean_angle_brackets(value: &str) -> String {
    value.trim_start_matches('<').trim_end_matches('>').to_string()
}

fn classify_reqwest_error(e: reqwest::Error) -> crate::modules::error::EngineError {
    if e.is_timeout() {
        raise_error!(e.to_string(), ErrorCode::ConnectionTimeout)
    } else {
        raise_error!(e.to_string(), ErrorCode::TransportError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_flag_classifies_known_system_labels() {
        assert_eq!(label_flag("INBOX"), MailboxFlag::System);
        assert_eq!(label_flag("Work/Clients"), MailboxFlag::Unmarked);
    }

    #[test]
    fn primary_mailbox_name_prefers_inbox_over_other_labels() {
        let labels = vec!["IMPORTANT".to_string(), "INBOX".to_string(), "UNREAD".to_string()];
        assert_eq!(primary_mailbox_name(&labels, "Label_12"), "INBOX");
    }

    #[test]
    fn primary_mailbox_name_falls_back_to_fetched_label_when_unmatched() {
        let labels = vec!["UNREAD".to_string(), "CATEGORY_PERSONAL".to_string()];
        assert_eq!(primary_mailbox_name(&labels, "Label_12"), "Label_12");
    }

    #[test]
    fn clean_angle_brackets_strips_both_ends() {
        assert_eq!(clean_angle_brackets("<abc@example.com>"), "abc@example.com");
    }

    #[test]
    fn decode_body_roundtrips_url_safe_base64() {
        use base64::{engine::general_purpose::URL_SAFE, Engine};
        let encoded = URL_SAFE.encode("hello world");
        assert_eq!(decode_body(&encoded), Some("hello world".to_string()));
    }

    #[test]
    fn affected_message_ids_dedupes_across_record_kinds() {
        let response: HistoryListResponse = serde_json::from_str(
            r#"{
                "history": [
                    {
                        "messagesAdded": [{"message": {"id": "m1"}}],
                        "labelsAdded": [{"message": {"id": "m2"}}]
                    },
                    {
                        "labelsRemoved": [{"message": {"id": "m1"}}]
                    }
                ],
                "historyId": "998877"
            }"#,
        )
        .unwrap();
        assert_eq!(affected_message_ids(&response.history), vec!["m1", "m2"]);
        assert_eq!(response.history_id, Some("998877".to_string()));
    }
}
