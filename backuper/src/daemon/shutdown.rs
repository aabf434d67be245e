//! Graceful shutdown on SIGTERM and SIGINT.
//!
//! `backuper stop` sends SIGTERM; a running job finishes the round it is in
//! and exits at its next wait instead of dying mid-upload.

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token cancelled once a shutdown signal arrives
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Install the signal handlers and cancel the token on the first signal.
    /// Handlers are in place when this returns.
    pub fn listen(&self) -> std::io::Result<JoinHandle<()>> {
        let mut terminate = signal(SignalKind::terminate())?;
        let mut interrupt = signal(SignalKind::interrupt())?;
        let token = self.token.clone();

        Ok(tokio::spawn(async move {
            tokio::select! {
                _ = terminate.recv() => {
                    info!("Received SIGTERM, finishing current round before exit");
                }
                _ = interrupt.recv() => {
                    info!("Received SIGINT, finishing current round before exit");
                }
                _ = token.cancelled() => return,
            }
            token.cancel();
        }))
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sigterm_cancels_token() {
        let coordinator = ShutdownCoordinator::new();
        let token = coordinator.token();
        let handle = coordinator.listen().unwrap();

        nix::sys::signal::raise(nix::sys::signal::Signal::SIGTERM).unwrap();

        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .expect("token should be cancelled");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_listener_exits_when_cancelled_elsewhere() {
        let coordinator = ShutdownCoordinator::default();
        let handle = coordinator.listen().unwrap();

        coordinator.token().cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("listener should exit")
            .unwrap();
    }
}
