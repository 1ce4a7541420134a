// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::error::code::ErrorCode;
use crate::modules::imap::session::SessionStream;
use crate::{modules::error::EngineResult, raise_error};
use async_imap::{types::Capabilities, Session};

pub async fn fetch_capabilities(
    session: &mut Session<Box<dyn SessionStream>>,
) -> EngineResult<Capabilities> {
    session
        .capabilities()
        .await
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ProtocolError))
}

pub fn check_capabilities(capabilities: &Capabilities) -> EngineResult<()> {
    if !capabilities.has_str("IMAP4rev1") {
        return Err(raise_error!(
            "server does not support IMAP4rev1".into(),
            ErrorCode::ProtocolError
        ));
    }
    Ok(())
}
