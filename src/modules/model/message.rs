// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use serde::{Deserialize, Serialize};

use crate::modules::common::Addr;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub size: u32,
}

/// A fetched, backend-normalized email. The pair `(account_id, message_id)`
/// is the dedup key when `message_id` is non-empty; otherwise callers fall
/// back to `(account_id, subject, date)`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub message_id: Option<String>,
    pub account_id: u64,
    pub subject: Option<String>,
    pub from: Vec<Addr>,
    pub to: Vec<Addr>,
    pub cc: Vec<Addr>,
    pub bcc: Vec<Addr>,
    pub date: Option<i64>,
    pub body: Option<String>,
    pub html_body: Option<String>,
    pub raw: Option<Vec<u8>>,
    pub attachments: Vec<Attachment>,
    pub mailbox_name: String,
    pub flags: Vec<String>,
    pub size: u32,
}

impl Message {
    /// The dedup key described by §3: `message_id` when present, otherwise
    /// the `(subject, date)` fallback.
    pub fn dedup_key(&self) -> (Option<String>, Option<String>, Option<i64>) {
        match &self.message_id {
            Some(id) if !id.is_empty() => (Some(id.clone()), None, None),
            _ => (None, self.subject.clone(), self.date),
        }
    }
}
