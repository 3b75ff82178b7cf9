use crate::{
    actuator::Actuator,
    config::ControlConfig,
    decision::DecisionStats,
    error::ControlError,
    queue::QueueStatus,
    state::PipelineState,
};
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::handlers::{
    get_threshold_handler, health_handler, reverse_handler, servo_handler, set_threshold_handler,
    speed_handler, start_handler, status_handler, stop_handler,
};

/// Shared state for the control handlers
#[derive(Clone)]
pub struct ControlState {
    pub(crate) pipeline: Arc<PipelineState>,
    pub(crate) actuator: Arc<dyn Actuator>,
    pub(crate) decisions: Arc<DecisionStats>,
    pub(crate) queues: Arc<[Arc<dyn QueueStatus>]>,
}

impl ControlState {
    pub fn new(
        pipeline: Arc<PipelineState>,
        actuator: Arc<dyn Actuator>,
        decisions: Arc<DecisionStats>,
        queues: Vec<Arc<dyn QueueStatus>>,
    ) -> Self {
        Self {
            pipeline,
            actuator,
            decisions,
            queues: queues.into(),
        }
    }
}

pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/threshold", post(set_threshold_handler).get(get_threshold_handler))
        .route("/speed", post(speed_handler))
        .route("/start", post(start_handler))
        .route("/stop", post(stop_handler))
        .route("/rev", post(reverse_handler))
        .route("/servo", post(servo_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Device control API bound ahead of pipeline start
pub struct ControlServer {
    listener: tokio::net::TcpListener,
    state: ControlState,
}

impl ControlServer {
    /// Bind the listening socket; failure here is fatal for the process
    pub async fn bind(config: &ControlConfig, state: ControlState) -> Result<Self, ControlError> {
        let addr = format!("{}:{}", config.ip, config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ControlError::BindFailed {
                address: addr.clone(),
                source: e,
            })?;

        info!("Control API listening on {}", addr);
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `shutdown` is cancelled
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), ControlError> {
        axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| ControlError::Serve {
                details: format!("Server error: {}", e),
            })?;

        info!("Control API stopped");
        Ok(())
    }
}
