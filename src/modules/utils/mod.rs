// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use base64::{engine::general_purpose, Engine};
use rand::{rng, Rng};

use super::error::code::ErrorCode;

pub mod net;
pub mod tls;

#[macro_export]
macro_rules! engine_version {
    () => {
        env!("CARGO_PKG_VERSION")
    };
}

#[macro_export]
macro_rules! utc_now {
    () => {{
        use chrono::Utc;
        Utc::now().timestamp_millis()
    }};
}

#[macro_export]
macro_rules! raise_error {
    ($msg:expr, $code:expr) => {
        $crate::modules::error::EngineError::Generic {
            message: $msg,
            location: snafu::Location::default(),
            code: $code,
        }
    };
}

#[macro_export]
macro_rules! run_with_timeout {
    ($duration:expr, $task:expr, $err_msg:expr) => {{
        match tokio::time::timeout($duration, $task).await {
            Ok(result) => Ok(result),
            Err(_) => Err($err_msg),
        }
    }};
}

#[macro_export]
macro_rules! validate_email {
    ($email:expr) => {{
        $crate::modules::utils::validate_email($email)
    }};
}

pub fn validate_email(email: &str) -> crate::modules::error::EngineResult<()> {
    use std::str::FromStr;
    let email_address = email_address::EmailAddress::from_str(email).map_err(|_| {
        raise_error!(
            format!("invalid email format: {}", email),
            ErrorCode::InvalidParameter
        )
    })?;
    if email != email_address.email() {
        return Err(raise_error!(
            format!("invalid email format: {}", email),
            ErrorCode::InvalidParameter
        ));
    }
    Ok(())
}

#[macro_export]
macro_rules! calculate_hash {
    ($name:expr) => {
        $crate::modules::utils::hash($name)
    };
}

#[macro_export]
macro_rules! base64_decode_url_safe {
    ($key:expr) => {{
        use base64::{engine::general_purpose::URL_SAFE, Engine};
        URL_SAFE.decode($key)
    }};
}

/// Generates a random, url-safe token with at least `bit_strength` bits of entropy.
pub fn generate_token(bit_strength: usize) -> String {
    let byte_length = (bit_strength + 23) / 24 * 3;
    let random_bytes: Vec<u8> = (0..byte_length).map(|_| rand::random::<u8>()).collect();
    let mut encoded = general_purpose::URL_SAFE.encode(&random_bytes);
    encoded = encoded
        .chars()
        .map(|c| {
            if c == '/' || c == '+' || c == '-' || c == '_' {
                random_char()
            } else {
                c
            }
        })
        .collect();
    encoded
}

fn random_char() -> char {
    let random_bytes: [u8; 3] = rng().random();
    let encoded = general_purpose::URL_SAFE.encode(random_bytes);
    encoded
        .chars()
        .find(|&c| c != '-' && c != '_' && c != '+' && c != '/')
        .unwrap_or('a')
}

/// Generates a 64-bit id. A random token is hashed so the entity id carries no
/// information about issuance order, matching the rest of the id space.
#[macro_export]
macro_rules! id {
    ($bit_strength:expr) => {{
        let token = $crate::modules::utils::generate_token($bit_strength);
        $crate::modules::utils::hash(&token)
    }};
}

/// Hashes an arbitrary string to a 64-bit value, kept within JavaScript's safe
/// integer range (0 to 2^53 - 1) since ids may cross a JSON boundary.
pub fn hash(s: &str) -> u64 {
    let mut cursor = std::io::Cursor::new(s.as_bytes());
    let hash = murmur3::murmur3_x64_128(&mut cursor, 0).unwrap();
    (hash & 0x1F_FFFF_FFFF_FFFF) as u64
}

/// Deterministic fingerprint over an ordered list of canonicalized parts,
/// used by the subscription manager to dedup equivalent requests.
pub fn hash_parts(parts: &[String]) -> u64 {
    let joined = parts.join("\u{1}");
    hash(&joined)
}

/// Canonicalizes an email address for comparison: lowercase local-part and domain.
pub fn canonicalize_address(addr: &str) -> String {
    match addr.split_once('@') {
        Some((local, domain)) => format!("{}@{}", local.to_lowercase(), domain.to_lowercase()),
        None => addr.to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_case() {
        assert_eq!(
            canonicalize_address("User.Name@Example.COM"),
            "user.name@example.com"
        );
    }

    #[test]
    fn fingerprint_is_stable_and_order_sensitive() {
        let a = hash_parts(&["realtime".into(), "inbox@example.com".into()]);
        let b = hash_parts(&["realtime".into(), "inbox@example.com".into()]);
        let c = hash_parts(&["inbox@example.com".into(), "realtime".into()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
