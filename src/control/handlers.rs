use crate::actuator::{Actuator, ActuatorCommand};
use crate::error::ActuatorError;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::server::ControlState;

/// Ramp rate used by `/start` when the body is empty
const DEFAULT_START_RAMP: u8 = 5;

/// Failure reply, rendered as `ERR: ...` plain text
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Actuator(ActuatorError),
    Internal(String),
}

impl From<ActuatorError> for ApiError {
    fn from(e: ActuatorError) -> Self {
        match e {
            ActuatorError::InvalidArgument(details) => ApiError::BadRequest(details),
            other => ApiError::Actuator(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(details) => (StatusCode::BAD_REQUEST, details),
            ApiError::Actuator(e) => {
                let status = match e {
                    ActuatorError::NotConnected | ActuatorError::Open { .. } => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    ActuatorError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, e.to_string())
            }
            ApiError::Internal(details) => (StatusCode::INTERNAL_SERVER_ERROR, details),
        };
        warn!("Control request failed ({}): {}", status, message);
        (status, format!("ERR: {}", message)).into_response()
    }
}

fn parse_body<T: FromStr>(body: &str, what: &str) -> Result<T, ApiError>
where
    T::Err: std::fmt::Display,
{
    body.trim()
        .parse::<T>()
        .map_err(|e| {
            ApiError::BadRequest(format!("Invalid {} value '{}' - {}", what, body.trim(), e))
        })
}

/// Run a blocking actuator exchange off the async workers
async fn send_command(
    actuator: Arc<dyn Actuator>,
    command: ActuatorCommand,
) -> Result<String, ApiError> {
    debug!("Control command {}", command);
    tokio::task::spawn_blocking(move || actuator.send(&command))
        .await
        .map_err(|e| ApiError::Internal(format!("Actuator task failed: {}", e)))?
        .map_err(ApiError::from)
}

pub async fn set_threshold_handler(
    State(state): State<ControlState>,
    body: String,
) -> Result<impl IntoResponse, ApiError> {
    let value: f64 = parse_body(&body, "threshold")?;
    if !value.is_finite() {
        return Err(ApiError::BadRequest(format!("Invalid threshold value '{}'", body.trim())));
    }

    let previous = state.pipeline.threshold().set(value);
    info!("Threshold changed from {} to {}", previous, value);
    Ok("Threshold changed")
}

pub async fn get_threshold_handler(State(state): State<ControlState>) -> impl IntoResponse {
    state.pipeline.threshold().get().to_string()
}

pub async fn speed_handler(
    State(state): State<ControlState>,
    body: String,
) -> Result<impl IntoResponse, ApiError> {
    let percent: u8 = parse_body(&body, "speed")?;
    send_command(Arc::clone(&state.actuator), ActuatorCommand::Speed(percent)).await
}

pub async fn servo_handler(
    State(state): State<ControlState>,
    body: String,
) -> Result<impl IntoResponse, ApiError> {
    let angle: u8 = parse_body(&body, "servo angle")?;
    send_command(Arc::clone(&state.actuator), ActuatorCommand::Servo(angle)).await
}

/// Empty body ramps at the default rate, otherwise the body is the ramp rate
pub async fn start_handler(
    State(state): State<ControlState>,
    body: String,
) -> Result<impl IntoResponse, ApiError> {
    let ramp = if body.trim().is_empty() {
        DEFAULT_START_RAMP
    } else {
        parse_body(&body, "ramp")?
    };
    send_command(Arc::clone(&state.actuator), ActuatorCommand::Start(ramp)).await
}

/// Empty body stops immediately, otherwise the body is the ramp-down rate
pub async fn stop_handler(
    State(state): State<ControlState>,
    body: String,
) -> Result<impl IntoResponse, ApiError> {
    let command = if body.trim().is_empty() {
        ActuatorCommand::Stop
    } else {
        ActuatorCommand::StopGradual(parse_body(&body, "ramp")?)
    };
    send_command(Arc::clone(&state.actuator), command).await
}

pub async fn reverse_handler(
    State(state): State<ControlState>,
) -> Result<impl IntoResponse, ApiError> {
    send_command(Arc::clone(&state.actuator), ActuatorCommand::Reverse).await
}

pub async fn status_handler(
    State(state): State<ControlState>,
) -> Result<impl IntoResponse, ApiError> {
    send_command(Arc::clone(&state.actuator), ActuatorCommand::Status).await
}

/// Pipeline counters
pub async fn health_handler(State(state): State<ControlState>) -> impl IntoResponse {
    let queues: Vec<_> = state.queues.iter().map(|q| q.snapshot()).collect();

    let health_info = serde_json::json!({
        "status": if state.pipeline.should_stop() { "stopping" } else { "running" },
        "uptime_seconds": state.pipeline.uptime().as_secs(),
        "system_ready": state.pipeline.is_system_ready(),
        "active_cameras": state.pipeline.active_cameras(),
        "threshold": state.pipeline.threshold().get(),
        "decisions": state.decisions.snapshot(),
        "queues": queues,
    });

    (StatusCode::OK, axum::Json(health_info))
}
