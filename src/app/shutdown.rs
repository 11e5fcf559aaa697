use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Owns the cancellation token every long-running task watches.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancels the token on SIGINT or SIGTERM.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = wait_for_signal() => match result {
                    Ok(name) => info!(signal = name, "Received signal, initiating graceful shutdown"),
                    Err(e) => {
                        error!(error = %e, "Failed to listen for shutdown signals");
                        return;
                    }
                },
                () = token.cancelled() => return,
            }
            token.cancel();
        })
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    let mut sigterm = unix_signal(SignalKind::terminate())?;
    tokio::select! {
        result = signal::ctrl_c() => result.map(|()| "SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    signal::ctrl_c().await.map(|()| "SIGINT")
}
