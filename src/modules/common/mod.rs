// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

pub mod addr;
pub mod proxy;
pub mod signal;

pub use addr::{Addr, AddrVec};
pub use proxy::{ProxyConfig, ProxyScheme};
