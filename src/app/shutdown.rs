use super::{BeltgateOrchestrator, ComponentState};
use crate::error::{BeltgateError, Result};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of joining one component
enum Joined<T> {
    Finished(T),
    Failed(BeltgateError),
}

/// Join a worker thread without blocking the async runtime
async fn join_thread<T: Send + 'static>(component: &str, handle: JoinHandle<T>) -> Joined<T> {
    let joined = tokio::task::spawn_blocking(move || handle.join());
    match timeout(STOP_TIMEOUT, joined).await {
        Ok(Ok(Ok(value))) => Joined::Finished(value),
        Ok(Ok(Err(_))) => Joined::Failed(BeltgateError::component(component, "thread panicked")),
        Ok(Err(e)) => {
            Joined::Failed(BeltgateError::component(component.to_string(), e.to_string()))
        }
        Err(_) => Joined::Failed(BeltgateError::component(component, "stop timeout")),
    }
}

impl BeltgateOrchestrator {
    /// Stop and join every component in reverse start order
    ///
    /// Returns 0 when everything stopped cleanly and 1 otherwise. A capture
    /// run that never had a working camera is returned as an error.
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        self.state.request_stop();
        let mut exit_code = 0;
        let mut fatal = None;

        // Capture stops the frame and output queues on its way out
        if let Some(handle) = self.running.capture.take() {
            match self.stop_thread("capture", handle).await {
                Some(Err(e @ BeltgateError::NoActiveCameras)) => {
                    self.set_component_state("capture", ComponentState::Failed)
                        .await;
                    fatal = Some(e);
                }
                Some(Err(e)) => {
                    error!("Capture ended with error: {}", e);
                    exit_code = 1;
                }
                Some(Ok(())) => {}
                None => exit_code = 1,
            }
        }
        self.frames.stop();
        self.outputs.stop();

        for (component, handle) in [
            ("inference", self.running.inference.take()),
            ("decision", self.running.decision.take()),
        ] {
            if let Some(handle) = handle {
                if self.stop_thread(component, handle).await.is_none() {
                    exit_code = 1;
                }
            }
        }

        // Reports queued by the last decision are still delivered
        self.reports.stop();
        if let Some(handle) = self.running.reporter.take() {
            if self.stop_thread("reporter", handle).await.is_none() {
                exit_code = 1;
            }
        }

        if let Err(e) = self.stop_control().await {
            error!("Error stopping control: {}", e);
            exit_code = 1;
        }

        self.telemetry.stop();
        for handle in [
            self.running.status_publisher.take(),
            self.running.log_forwarder.take(),
        ]
        .into_iter()
        .flatten()
        {
            if self.stop_thread("telemetry", handle).await.is_none() {
                exit_code = 1;
            }
        }

        self.cancellation_token.cancel();

        if let Some(e) = fatal {
            error!("Shutdown after fatal error: {}", e);
            return Err(e);
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    /// Join one worker thread, tracking its state; `None` if it failed to stop
    async fn stop_thread<T: Send + 'static>(
        &self,
        component: &str,
        handle: JoinHandle<T>,
    ) -> Option<T> {
        info!("Stopping {} component", component);
        self.set_component_state(component, ComponentState::Stopping)
            .await;

        match join_thread(component, handle).await {
            Joined::Finished(value) => {
                self.set_component_state(component, ComponentState::Stopped)
                    .await;
                info!("{} component stopped", component);
                Some(value)
            }
            Joined::Failed(e) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                error!("Error stopping {} component: {}", component, e);
                None
            }
        }
    }

    async fn stop_control(&mut self) -> Result<()> {
        let Some(task) = self.running.control.take() else {
            return Ok(());
        };

        info!("Stopping control component");
        self.set_component_state("control", ComponentState::Stopping)
            .await;
        self.cancellation_token.cancel();

        let result = match timeout(STOP_TIMEOUT, task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(e.into()),
            Ok(Err(e)) => Err(BeltgateError::component("control".to_string(), e.to_string())),
            Err(_) => {
                warn!("Control API did not stop in time");
                Err(BeltgateError::component("control", "stop timeout"))
            }
        };

        let state = if result.is_ok() {
            ComponentState::Stopped
        } else {
            ComponentState::Failed
        };
        self.set_component_state("control", state).await;
        result
    }
}
