use super::{BeltgateOrchestrator, ShutdownReason};
use crate::error::{BeltgateError, Result};
use crate::state::PipelineState;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const PIPELINE_POLL: Duration = Duration::from_millis(100);

type ShutdownSender = Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>;

async fn send_reason(sender: &ShutdownSender, reason: ShutdownReason) {
    if let Some(sender) = sender.lock().await.take() {
        let _ = sender.send(reason);
    }
}

impl BeltgateOrchestrator {
    /// Run until a signal arrives or the pipeline winds down, then shut down
    ///
    /// Returns the process exit code. Losing every camera before the first
    /// frame is returned as an error.
    pub async fn run(&mut self) -> Result<i32> {
        info!("Beltgate system is running");

        let shutdown_sender = self
            .shutdown_sender
            .take()
            .ok_or_else(|| BeltgateError::system("Shutdown sender already taken"))?;

        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| BeltgateError::system("Shutdown receiver already taken"))?;

        let shutdown_sender: ShutdownSender = Arc::new(Mutex::new(Some(shutdown_sender)));
        self.setup_signal_handlers(Arc::clone(&shutdown_sender));
        self.watch_pipeline(shutdown_sender);

        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| BeltgateError::system("Shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {:?}", shutdown_reason);

        let exit_code = self.shutdown().await?;

        info!("Beltgate system shutdown complete");
        Ok(exit_code)
    }

    /// Set up signal handlers for graceful shutdown
    fn setup_signal_handlers(&self, shutdown_sender: ShutdownSender) {
        let token = self.cancellation_token.clone();

        // Handle SIGTERM (systemd stop) - Unix only
        #[cfg(unix)]
        {
            use signal::unix::SignalKind;

            let shutdown_sender_sigterm = Arc::clone(&shutdown_sender);
            let token = token.clone();
            tokio::spawn(async move {
                let mut sigterm = match signal::unix::signal(SignalKind::terminate()) {
                    Ok(sigterm) => sigterm,
                    Err(e) => {
                        error!("Failed to register SIGTERM handler: {}", e);
                        return;
                    }
                };
                tokio::select! {
                    Some(()) = sigterm.recv() => {
                        info!("Received SIGTERM signal");
                        let reason = ShutdownReason::Signal("SIGTERM".to_string());
                        send_reason(&shutdown_sender_sigterm, reason).await;
                    }
                    _ = token.cancelled() => {}
                }
            });
        }

        // Handle SIGINT (Ctrl+C) - Cross-platform
        tokio::spawn(async move {
            tokio::select! {
                Ok(()) = signal::ctrl_c() => {
                    info!("Received SIGINT signal (Ctrl+C)");
                    let reason = ShutdownReason::Signal("SIGINT".to_string());
                    send_reason(&shutdown_sender, reason).await;
                }
                _ = token.cancelled() => {}
            }
        });
    }

    /// Request shutdown once every camera has finished
    fn watch_pipeline(&self, shutdown_sender: ShutdownSender) {
        let state = Arc::clone(&self.state);
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            if wait_for_pipeline(state, token).await {
                send_reason(&shutdown_sender, ShutdownReason::PipelineFinished).await;
            }
        });
    }
}

/// True once all cameras are done, false if cancelled first
async fn wait_for_pipeline(state: Arc<PipelineState>, token: CancellationToken) -> bool {
    while !state.all_done() {
        tokio::select! {
            _ = tokio::time::sleep(PIPELINE_POLL) => {}
            _ = token.cancelled() => return false,
        }
    }
    info!("All cameras finished, winding down");
    true
}
