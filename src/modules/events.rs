// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! The scheduler's best-effort event bus (§4.3): `NewEmail`, `FetchStart`,
//! `FetchComplete`, `FetchError`. Shared between the Worker Pool (producer)
//! and the Fetch Scheduler (per-subscription fan-out), so it lives above
//! both rather than inside either.

use crate::modules::model::Message;

#[derive(Clone, Debug)]
pub enum SchedulerEvent {
    NewEmail { subscription_id: u64, message: Message },
    FetchStart { real_mailbox: String },
    FetchComplete { real_mailbox: String, count: usize },
    FetchError { real_mailbox: String, error: String },
}
