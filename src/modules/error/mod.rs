// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::raise_error;
use bb8::RunError;
use code::ErrorCode;
use snafu::{Location, Snafu};

pub mod code;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EngineError {
    #[snafu(display("{message}"))]
    Generic {
        message: String,
        #[snafu(implicit)]
        location: Location,
        code: ErrorCode,
    },
}

pub type EngineResult<T, E = EngineError> = std::result::Result<T, E>;

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Generic { code, .. } => *code,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

impl From<RunError<EngineError>> for EngineError {
    fn from(e: RunError<EngineError>) -> Self {
        match e {
            RunError::User(e) => e,
            RunError::TimedOut => raise_error!(
                "timed out while attempting to acquire a connection from the pool".into(),
                ErrorCode::ConnectionPoolTimeout
            ),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        raise_error!(e.to_string(), ErrorCode::TransportError)
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        raise_error!(e.to_string(), ErrorCode::ProtocolError)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        raise_error!(e.to_string(), ErrorCode::ParseError)
    }
}
