// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use mail_parser::{Addr as ImapAddr, Address as ImapAddress};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::LazyLock;

static DISPLAY_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:(?P<name>.*)\s*)?<(?P<email>[^<>]+)>"#).unwrap());

/// A single envelope participant: a display name, an address, or both.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Addr {
    pub name: Option<String>,
    pub address: Option<String>,
}

impl Addr {
    pub fn parse(s: &str) -> Self {
        if let Some(caps) = DISPLAY_NAME_RE.captures(s) {
            let name: Option<String> = caps.name("name").map(|m| m.as_str().trim().into());
            let email: Option<String> = caps.name("email").map(|m| m.as_str().trim().into());
            Addr {
                name: name.filter(|n| !n.is_empty()),
                address: email,
            }
        } else {
            let trimmed = s.trim();
            Addr {
                name: None,
                address: if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.into())
                },
            }
        }
    }
}

impl std::fmt::Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.name, &self.address) {
            (Some(name), Some(address)) => write!(f, "{} <{}>", name, address),
            (None, Some(address)) => write!(f, "<{}>", address),
            (Some(name), None) => write!(f, "{}", name),
            (None, None) => write!(f, ""),
        }
    }
}

impl<'x> From<&ImapAddr<'x>> for Addr {
    fn from(original: &ImapAddr<'x>) -> Self {
        Addr {
            name: original.name.as_ref().map(|s| s.to_string()),
            address: original.address.as_ref().map(|s| s.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AddrVec(pub Vec<Addr>);

impl Deref for AddrVec {
    type Target = Vec<Addr>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'x> From<&ImapAddress<'x>> for AddrVec {
    fn from(original: &ImapAddress<'x>) -> Self {
        let vec = match original {
            ImapAddress::List(addrs) => addrs.iter().map(Addr::from).collect(),
            ImapAddress::Group(groups) => groups
                .iter()
                .flat_map(|group| group.addresses.iter().map(Addr::from))
                .collect(),
        };
        AddrVec(vec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_display_name_and_address() {
        let addr = Addr::parse("Jane Doe <jane@example.com>");
        assert_eq!(addr.name.as_deref(), Some("Jane Doe"));
        assert_eq!(addr.address.as_deref(), Some("jane@example.com"));
    }

    #[test]
    fn parses_bare_address() {
        let addr = Addr::parse("jane@example.com");
        assert_eq!(addr.name, None);
        assert_eq!(addr.address.as_deref(), Some("jane@example.com"));
    }
}
