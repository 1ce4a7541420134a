// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::LazyLock;

use crate::modules::{context::Initialize, error::EngineResult};
use tokio::sync::broadcast;

pub static SIGNAL_MANAGER: LazyLock<SignalManager> = LazyLock::new(SignalManager::new);

pub struct SignalManager {
    sender: broadcast::Sender<()>,
}

impl SignalManager {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        SignalManager { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }
}

impl Initialize for SignalManager {
    async fn initialize() -> EngineResult<()> {
        tokio::spawn({
            async move {
                shutdown_signal().await;
                tracing::info!("shutdown signal received, notifying tasks");
                let _ = SIGNAL_MANAGER.sender.send(());
            }
        });
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("error installing Ctrl+C signal handler");
    };

    #[cfg(unix)]
    let terminate_signal = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("error installing terminate signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate_signal = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c_signal => {},
        _ = terminate_signal => {},
    };
}
