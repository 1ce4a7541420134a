// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

pub mod capabilities;
pub mod connection;
pub mod oauth2;
pub mod session;
pub mod stats;
