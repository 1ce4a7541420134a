// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::{modules::error::{code::ErrorCode, EngineResult}, raise_error};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ProxyScheme {
    Socks5,
    Http,
    Https,
}

/// A resolved outbound proxy, shared by the IMAP dialer and the Gmail/OAuth2
/// HTTP clients. Constructed once per account from its configured proxy URL.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub scheme: ProxyScheme,
    pub addr: SocketAddr,
}

impl ProxyConfig {
    pub fn parse(input: &str) -> EngineResult<Self> {
        let (scheme, stripped) = if let Some(rest) = strip_ci(input, "socks5://") {
            (ProxyScheme::Socks5, rest)
        } else if let Some(rest) = strip_ci(input, "https://") {
            (ProxyScheme::Https, rest)
        } else if let Some(rest) = strip_ci(input, "http://") {
            (ProxyScheme::Http, rest)
        } else {
            return Err(raise_error!(
                format!(
                    "invalid proxy URL: must start with 'http://', 'https://' or 'socks5://', got '{}'",
                    input
                ),
                ErrorCode::InvalidParameter
            ));
        };

        let addr = stripped.parse::<SocketAddr>().map_err(|e| {
            raise_error!(
                format!("failed to parse proxy address '{}': {}", stripped, e),
                ErrorCode::InvalidParameter
            )
        })?;

        Ok(ProxyConfig { scheme, addr })
    }
}

fn strip_ci<'a>(input: &'a str, prefix: &str) -> Option<&'a str> {
    if input.len() >= prefix.len() && input[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&input[prefix.len()..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_socks5_and_http() {
        let p = ProxyConfig::parse("socks5://127.0.0.1:1080").unwrap();
        assert_eq!(p.scheme, ProxyScheme::Socks5);
        let p = ProxyConfig::parse("http://127.0.0.1:8080").unwrap();
        assert_eq!(p.scheme, ProxyScheme::Http);
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(ProxyConfig::parse("ftp://127.0.0.1:21").is_err());
    }
}
