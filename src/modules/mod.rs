// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

pub mod cache;
pub mod collab;
pub mod common;
pub mod context;
pub mod error;
pub mod events;
pub mod fetch;
pub mod fetch_scheduler;
pub mod imap;
pub mod logger;
pub mod model;
pub mod oauth2;
pub mod scheduler;
pub mod settings;
pub mod subscription;
pub mod sync_manager;
pub mod utils;
pub mod worker;
