// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum ErrorCode {
    // Configuration errors (10000–10999)
    InvalidParameter = 10000,
    MissingConfiguration = 10010,

    // Authentication errors (20000–20999)
    AuthRequired = 20000,
    AuthExpired = 20010,
    PermissionDenied = 20020,

    // Transport errors (30000–30999)
    TransportError = 30000,
    ConnectionTimeout = 30010,
    ConnectionPoolTimeout = 30020,
    ProxyError = 30030,
    BadGateway = 30040,
    Unavailable = 30050,

    // Protocol errors (40000–40999)
    ProtocolError = 40000,
    GmailApiInvalidHistoryId = 40010,

    // Parse errors (50000–50999)
    ParseError = 50000,

    // Storage errors (60000–60999)
    StorageError = 60000,

    // Capacity errors (70000–70999)
    CapacityExceeded = 70000,

    // Not-found errors (80000–80999)
    NotFound = 80000,
}

impl ErrorCode {
    /// The broad error kind this code belongs to, per the engine's error taxonomy.
    pub fn kind(&self) -> &'static str {
        match self {
            ErrorCode::InvalidParameter | ErrorCode::MissingConfiguration => "config",
            ErrorCode::AuthRequired | ErrorCode::AuthExpired | ErrorCode::PermissionDenied => {
                "auth"
            }
            ErrorCode::TransportError
            | ErrorCode::ConnectionTimeout
            | ErrorCode::ConnectionPoolTimeout
            | ErrorCode::ProxyError
            | ErrorCode::BadGateway
            | ErrorCode::Unavailable => "transport",
            ErrorCode::ProtocolError | ErrorCode::GmailApiInvalidHistoryId => "protocol",
            ErrorCode::ParseError => "parse",
            ErrorCode::StorageError => "storage",
            ErrorCode::CapacityExceeded => "capacity",
            ErrorCode::NotFound => "not_found",
        }
    }

    /// Whether a fetch cycle should retry after hitting this error, as opposed to
    /// surfacing it to the subscription as a terminal failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::TransportError
                | ErrorCode::ConnectionTimeout
                | ErrorCode::ConnectionPoolTimeout
                | ErrorCode::ProxyError
                | ErrorCode::BadGateway
                | ErrorCode::Unavailable
                | ErrorCode::AuthExpired
        )
    }
}
