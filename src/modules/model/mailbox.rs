// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use serde::{Deserialize, Serialize};

/// System/user/visible attributes carried on a mailbox, mirroring IMAP's
/// `LIST` response flags and Gmail's label kind.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MailboxFlag {
    NoSelect,
    HasChildren,
    HasNoChildren,
    Marked,
    Unmarked,
    System,
}

/// An IMAP folder or a Gmail label, as reported by `list_mailboxes`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Mailbox {
    pub account_id: u64,
    pub name: String,
    pub delimiter: Option<char>,
    pub flags: Vec<MailboxFlag>,
}
