// Package shutdown provides graceful shutdown functionality.

use std::future::Future;
use std::time::Duration;
use tokio::signal;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
#[error("graceful shutdown timeout exceeded")]
pub struct TimeoutError;

/// Graceful shutdown handler.
///
/// OS signals are turned into a cancellation of the unit token; the owner of
/// the token runs its teardown through [`GracefulShutdown::bounded`].
#[derive(Clone)]
pub struct GracefulShutdown {
    shutdown_token: CancellationToken,
    timeout: Duration,
}

impl GracefulShutdown {
    /// Creates a new graceful shutdown handler
    pub fn new(shutdown_token: CancellationToken, timeout: Duration) -> Self {
        Self {
            shutdown_token,
            timeout,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Spawns the OS signal listener (SIGINT, SIGTERM). The first signal
    /// cancels the token; the listener also stops once the token is
    /// cancelled from elsewhere.
    pub fn listen(&self) {
        let token = self.shutdown_token.clone();
        tokio::task::spawn(async move {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!(
                        component = "graceful-shutdown",
                        event = "os_signal",
                        signal = "SIGINT",
                        "cancellation started"
                    );
                }
                _ = terminate() => {
                    info!(
                        component = "graceful-shutdown",
                        event = "os_signal",
                        signal = "SIGTERM",
                        "cancellation started"
                    );
                }
                _ = token.cancelled() => {
                    return;
                }
            }
            token.cancel();
        });
    }

    /// Runs `teardown` with the graceful timeout.
    pub async fn bounded<F: Future>(&self, teardown: F) -> Result<F::Output, TimeoutError> {
        match timeout(self.timeout, teardown).await {
            Ok(out) => {
                info!(
                    component = "graceful-shutdown",
                    event = "shutdown_success",
                    "unit was gracefully shut down"
                );
                Ok(out)
            }
            Err(_) => {
                warn!(
                    component = "graceful-shutdown",
                    event = "shutdown_timeout",
                    timeout_secs = self.timeout.as_secs(),
                    "not all children confirmed termination within timeout"
                );
                Err(TimeoutError)
            }
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
        }
        Err(e) => {
            error!(
                component = "graceful-shutdown",
                event = "sigterm_handler_failed",
                error = %e,
                "failed to install SIGTERM handler"
            );
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
