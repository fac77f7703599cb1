//! Signal handling for graceful shutdown
//!
//! A [`ShutdownToken`] is cloned into every worker and background task. It is
//! level-triggered: once cancelled it stays cancelled, so a task that starts
//! waiting after the signal fired still sees it.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Cloneable cancellation flag shared by everything in a run
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownToken {
    /// Create a token that has not been cancelled
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Request shutdown; idempotent
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Whether shutdown has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait until shutdown is requested
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as any token, so `changed` cannot fail here.
        while !*receiver.borrow_and_update() {
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Signal handler for graceful shutdown coordination
pub struct SignalHandler {
    token: ShutdownToken,
}

impl SignalHandler {
    /// Create a handler that cancels `token` on Ctrl+C or SIGTERM
    pub fn new(token: ShutdownToken) -> Self {
        Self { token }
    }

    /// Setup signal handling for graceful shutdown (CTRL-C, SIGTERM)
    ///
    /// Returns a handle to the background task that monitors for signals.
    /// The task also exits quietly if the token is cancelled some other way.
    pub fn setup(&self) -> JoinHandle<()> {
        let token = self.token.clone();

        tokio::spawn(async move {
            let ctrl_c = async {
                if let Err(e) = signal::ctrl_c().await {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                    std::future::pending::<()>().await;
                }
            };

            #[cfg(unix)]
            let terminate = async {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut stream) => {
                        stream.recv().await;
                    }
                    Err(e) => {
                        warn!("Failed to install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => {
                    info!("Received Ctrl+C, finishing current chunks and shutting down");
                },
                _ = terminate => {
                    info!("Received terminate signal, finishing current chunks and shutting down");
                },
                _ = token.cancelled() => {
                    return;
                },
            }

            token.cancel();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_token_starts_uncancelled() {
        let token = ShutdownToken::new();
        assert!(!token.is_cancelled());
        assert!(timeout(Duration::from_millis(20), token.cancelled())
            .await
            .is_err());
    }

    /// Cancellation reaches every clone, including ones waiting already
    #[tokio::test]
    async fn test_cancel_reaches_all_clones() {
        let token = ShutdownToken::new();
        let waiter = token.clone();

        let handle = tokio::spawn(async move { waiter.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        assert!(timeout(Duration::from_millis(200), handle).await.is_ok());
        assert!(token.clone().is_cancelled());
    }

    /// A waiter that starts after cancellation returns immediately
    #[tokio::test]
    async fn test_late_waiter_sees_cancellation() {
        let token = ShutdownToken::new();
        token.cancel();
        token.cancel();

        assert!(timeout(Duration::from_millis(50), token.cancelled())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_signal_task_exits_on_programmatic_cancel() {
        let token = ShutdownToken::new();
        let handle = SignalHandler::new(token.clone()).setup();

        token.cancel();
        assert!(timeout(Duration::from_millis(200), handle).await.is_ok());
    }
}
