use super::{ShutdownReason, SortyxOrchestrator};
use crate::error::{Result, SortyxError};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{oneshot, Mutex};
use tracing::{error, info};

impl SortyxOrchestrator {
    /// Run until a signal arrives or the API server exits, then shut down
    pub async fn run(&mut self) -> Result<i32> {
        info!("Sortyx is running");

        let shutdown_sender = self
            .shutdown_sender
            .take()
            .ok_or_else(|| SortyxError::System {
                message: "Shutdown sender already taken".to_string(),
            })?;

        let shutdown_receiver =
            self.shutdown_receiver
                .take()
                .ok_or_else(|| SortyxError::System {
                    message: "Shutdown receiver already taken".to_string(),
                })?;

        self.setup_signal_handlers(shutdown_sender);

        let server_exit = async {
            match self.server_task.as_mut() {
                Some(task) => match task.await {
                    Ok(Ok(())) => ShutdownReason::Error("API server exited".to_string()),
                    Ok(Err(e)) => ShutdownReason::Error(e.to_string()),
                    Err(e) => ShutdownReason::Error(format!("API server task failed: {}", e)),
                },
                None => std::future::pending().await,
            }
        };

        let (shutdown_reason, server_finished) = tokio::select! {
            reason = shutdown_receiver => {
                let reason = reason.map_err(|_| SortyxError::System {
                    message: "Shutdown channel closed unexpectedly".to_string(),
                })?;
                (reason, false)
            }
            reason = server_exit => (reason, true),
        };

        if server_finished {
            self.server_task = None;
        }

        info!("Shutdown initiated: {:?}", shutdown_reason);

        let mut exit_code = self.shutdown().await?;
        if matches!(shutdown_reason, ShutdownReason::Error(_)) {
            exit_code = 1;
        }

        info!("Sortyx shutdown complete");
        Ok(exit_code)
    }

    /// Set up signal handlers for graceful shutdown
    fn setup_signal_handlers(&self, shutdown_sender: oneshot::Sender<ShutdownReason>) {
        let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));

        // Handle SIGTERM (systemd stop) - Unix only
        #[cfg(unix)]
        {
            let shutdown_sender_sigterm = Arc::clone(&shutdown_sender);
            tokio::spawn(async move {
                let mut sigterm =
                    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                        Ok(sigterm) => sigterm,
                        Err(e) => {
                            error!("Failed to register SIGTERM handler: {}", e);
                            return;
                        }
                    };
                if let Some(()) = sigterm.recv().await {
                    info!("Received SIGTERM signal");
                    if let Some(sender) = shutdown_sender_sigterm.lock().await.take() {
                        let _ = sender.send(ShutdownReason::Signal("SIGTERM".to_string()));
                    }
                }
            });
        }

        // Handle SIGINT (Ctrl+C) - Cross-platform
        let shutdown_sender_sigint = Arc::clone(&shutdown_sender);
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                if let Some(sender) = shutdown_sender_sigint.lock().await.take() {
                    let _ = sender.send(ShutdownReason::Signal("SIGINT".to_string()));
                }
            }
        });
    }
}
