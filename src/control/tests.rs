use super::server::{router, ControlServer, ControlState};
use crate::actuator::{Actuator, ActuatorCommand, DisconnectedActuator, RecordingActuator};
use crate::config::ControlConfig;
use crate::decision::DecisionStats;
use crate::error::ControlError;
use crate::queue::{BoundedQueue, QueueStatus};
use crate::state::PipelineState;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct Harness {
    pipeline: Arc<PipelineState>,
    actuator: Arc<RecordingActuator>,
    app: Router,
}

fn harness() -> Harness {
    let pipeline = PipelineState::new(3, 70.0);
    let actuator = Arc::new(RecordingActuator::new());
    let frames: Arc<dyn QueueStatus> = Arc::new(BoundedQueue::<u32>::new("frames", 60));
    let state = ControlState::new(
        Arc::clone(&pipeline),
        actuator.clone(),
        Arc::new(DecisionStats::default()),
        vec![frames],
    );
    Harness {
        pipeline,
        actuator,
        app: router(state),
    }
}

fn disconnected_app() -> Router {
    let actuator: Arc<dyn Actuator> = Arc::new(DisconnectedActuator);
    router(ControlState::new(
        PipelineState::new(1, 70.0),
        actuator,
        Arc::new(DecisionStats::default()),
        Vec::new(),
    ))
}

async fn call(app: Router, method: &str, uri: &str, body: &str) -> (StatusCode, String) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn test_threshold_roundtrip() {
    let h = harness();

    let (status, body) = call(h.app.clone(), "POST", "/threshold", "55.5\n").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Threshold changed");
    assert_eq!(h.pipeline.threshold().get(), 55.5);

    let (status, body) = call(h.app, "GET", "/threshold", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "55.5");
}

#[tokio::test]
async fn test_invalid_threshold_rejected() {
    let h = harness();

    for bad in ["", "abc", "NaN", "inf"] {
        let (status, body) = call(h.app.clone(), "POST", "/threshold", bad).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {:?}", bad);
        assert!(body.starts_with("ERR:"));
    }
    assert_eq!(h.pipeline.threshold().get(), 70.0);
}

#[tokio::test]
async fn test_belt_commands_forwarded() {
    let h = harness();

    assert_eq!(call(h.app.clone(), "POST", "/speed", "40").await.0, StatusCode::OK);
    assert_eq!(call(h.app.clone(), "POST", "/servo", "150").await.0, StatusCode::OK);
    assert_eq!(call(h.app.clone(), "POST", "/start", "").await.0, StatusCode::OK);
    assert_eq!(call(h.app.clone(), "POST", "/stop", "").await.0, StatusCode::OK);
    assert_eq!(call(h.app.clone(), "POST", "/stop", "10").await.0, StatusCode::OK);
    let (status, body) = call(h.app.clone(), "POST", "/rev", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK:REV");
    let (_, body) = call(h.app, "GET", "/status", "").await;
    assert_eq!(body, "OK:STATUS");

    assert_eq!(
        h.actuator.commands(),
        vec![
            ActuatorCommand::Speed(40),
            ActuatorCommand::Servo(150),
            ActuatorCommand::Start(5),
            ActuatorCommand::Stop,
            ActuatorCommand::StopGradual(10),
            ActuatorCommand::Reverse,
            ActuatorCommand::Status,
        ]
    );
}

#[tokio::test]
async fn test_out_of_range_arguments_rejected() {
    let h = harness();

    assert_eq!(call(h.app.clone(), "POST", "/speed", "101").await.0, StatusCode::BAD_REQUEST);
    assert_eq!(call(h.app.clone(), "POST", "/speed", "fast").await.0, StatusCode::BAD_REQUEST);
    assert_eq!(call(h.app.clone(), "POST", "/servo", "181").await.0, StatusCode::BAD_REQUEST);
    assert_eq!(call(h.app.clone(), "POST", "/stop", "99").await.0, StatusCode::BAD_REQUEST);
    assert!(h.actuator.commands().is_empty());
}

#[tokio::test]
async fn test_disconnected_actuator_reports_unavailable() {
    let (status, body) = call(disconnected_app(), "POST", "/rev", "").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, "ERR: Serial port is not open");

    // Validation still comes first
    let (status, _) = call(disconnected_app(), "POST", "/speed", "300").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_reports_pipeline_counters() {
    let h = harness();
    h.pipeline.camera_finished();

    let (status, body) = call(h.app, "GET", "/health", "").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "running");
    assert_eq!(health["active_cameras"], 2);
    assert_eq!(health["system_ready"], false);
    assert_eq!(health["decisions"]["accepted"], 0);
    assert_eq!(health["queues"][0]["name"], "frames");
    assert_eq!(health["queues"][0]["capacity"], 60);
}

#[tokio::test]
async fn test_bind_conflict_is_fatal() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();
    let config = ControlConfig {
        ip: "127.0.0.1".to_string(),
        port,
    };
    let state = ControlState::new(
        PipelineState::new(1, 70.0),
        Arc::new(RecordingActuator::new()),
        Arc::new(DecisionStats::default()),
        Vec::new(),
    );

    let result = ControlServer::bind(&config, state).await;
    assert!(matches!(result, Err(ControlError::BindFailed { .. })));
}

#[tokio::test]
async fn test_server_stops_on_cancel() {
    let config = ControlConfig {
        ip: "127.0.0.1".to_string(),
        port: 0,
    };
    let state = ControlState::new(
        PipelineState::new(1, 70.0),
        Arc::new(RecordingActuator::new()),
        Arc::new(DecisionStats::default()),
        Vec::new(),
    );
    let server = ControlServer::bind(&config, state).await.unwrap();
    assert_ne!(server.local_addr().unwrap().port(), 0);

    let token = CancellationToken::new();
    let task = tokio::spawn(server.serve(token.clone()));
    token.cancel();

    let result = tokio::time::timeout(std::time::Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
