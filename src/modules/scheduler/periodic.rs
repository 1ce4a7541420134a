// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::modules::common::signal::SIGNAL_MANAGER;
use crate::modules::error::EngineResult;

/// Runs a fallible async closure on a fixed interval until it is cancelled,
/// either through its own `CancellationToken` or the process-wide shutdown
/// broadcast. Shared by every background sweep in the engine (subscription
/// cleanup, worker idle reclaim, the sync poller and config monitor), the
/// way the teacher drives its own periodic maintenance tasks.
pub struct PeriodicTask {
    name: String,
}

pub struct TaskHandle {
    cancel: CancellationToken,
    join_handle: tokio::task::JoinHandle<()>,
}

impl TaskHandle {
    pub async fn cancel(self) {
        self.cancel.cancel();
        let _ = self.join_handle.await;
    }
}

impl PeriodicTask {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
        }
    }

    pub fn start<F, T>(self, task: T, interval: Duration, run_immediately: bool) -> TaskHandle
    where
        T: Fn() -> F + Send + Sync + 'static,
        F: Future<Output = EngineResult<()>> + Send + 'static,
    {
        info!("task '{}' started", &self.name);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let name = self.name;

        let join_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            let mut shutdown = SIGNAL_MANAGER.subscribe();

            if !run_immediately {
                interval.tick().await;
            }

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = task().await {
                            warn!("task '{}' failed: {:?}", name, e);
                        }
                    }
                    _ = task_cancel.cancelled() => {
                        info!("task '{}' cancelled", name);
                        break;
                    }
                    _ = shutdown.recv() => {
                        info!("task '{}' shutting down", name);
                        break;
                    }
                }
            }
            info!("task '{}' stopped", name);
        });

        TaskHandle { cancel, join_handle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn runs_on_interval_until_cancelled() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let handle = PeriodicTask::new("test").start(
            move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            Duration::from_millis(5),
            true,
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.cancel().await;
        assert!(counter.load(Ordering::SeqCst) >= 2);
    }
}
