use super::types::{ComponentState, ShutdownReason};
use crate::actuator::{self, Actuator};
use crate::camera::{GstSourceOpener, SourceOpener, UdpMonitor};
use crate::config::BeltgateConfig;
use crate::control::ControlServer;
use crate::decision::{DecisionEngine, ScanRecord};
use crate::error::{ControlError, Result};
use crate::frame::{InferenceOutput, PreprocessedFrame};
use crate::inference::{HttpInferenceBackend, InferenceBackend, InferenceBridge};
use crate::queue::BoundedQueue;
use crate::report::ScanReporter;
use crate::state::PipelineState;
use crate::telemetry::{LogForwarder, StatusPublisher, TelemetryMessage};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Components built by `initialize` and consumed by `start`
pub(super) struct Prepared {
    pub(super) control: ControlServer,
    pub(super) log_forwarder: LogForwarder,
    pub(super) status_publisher: StatusPublisher,
    pub(super) reporter: ScanReporter,
    pub(super) decision: DecisionEngine,
    pub(super) inference: InferenceBridge,
}

/// Running worker threads and tasks
#[derive(Default)]
pub(super) struct Running {
    pub(super) log_forwarder: Option<JoinHandle<()>>,
    pub(super) status_publisher: Option<JoinHandle<()>>,
    pub(super) control: Option<tokio::task::JoinHandle<std::result::Result<(), ControlError>>>,
    pub(super) reporter: Option<JoinHandle<()>>,
    pub(super) decision: Option<JoinHandle<()>>,
    pub(super) inference: Option<JoinHandle<()>>,
    pub(super) capture: Option<JoinHandle<Result<()>>>,
}

/// Main application coordinator that wires and sequences the pipeline
pub struct BeltgateOrchestrator {
    pub(super) config: Arc<BeltgateConfig>,
    pub(super) state: Arc<PipelineState>,

    // Stage queues
    pub(super) frames: Arc<BoundedQueue<PreprocessedFrame>>,
    pub(super) outputs: Arc<BoundedQueue<InferenceOutput>>,
    pub(super) reports: Arc<BoundedQueue<Vec<ScanRecord>>>,
    pub(super) telemetry: Arc<BoundedQueue<TelemetryMessage>>,

    // Hardware and model seams
    pub(super) opener: Arc<dyn SourceOpener>,
    pub(super) backend: Option<Box<dyn InferenceBackend>>,
    pub(super) actuator: Option<Arc<dyn Actuator>>,
    pub(super) monitor: Option<Arc<UdpMonitor>>,

    pub(super) prepared: Option<Prepared>,
    pub(super) running: Running,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl BeltgateOrchestrator {
    /// Create an orchestrator using the production camera, model and serial seams
    ///
    /// `telemetry` is the queue fed by the logging layer; pass a fresh queue
    /// when log forwarding is not wired.
    pub fn new(config: BeltgateConfig, telemetry: Arc<BoundedQueue<TelemetryMessage>>) -> Self {
        let capacity = config.pipeline.queue_capacity;
        let state = PipelineState::new(config.cameras.channels.len(), config.decision.threshold);
        let backend: Box<dyn InferenceBackend> =
            Box::new(HttpInferenceBackend::new(&config.inference));

        let monitor = if config.monitor.enabled {
            match UdpMonitor::new(&config.monitor) {
                Ok(monitor) => Some(Arc::new(monitor)),
                Err(e) => {
                    warn!("Frame monitor disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Self {
            config: Arc::new(config),
            state,
            frames: Arc::new(BoundedQueue::new("frames", capacity)),
            outputs: Arc::new(BoundedQueue::new("outputs", capacity)),
            reports: Arc::new(BoundedQueue::new("reports", capacity)),
            telemetry,
            opener: Arc::new(GstSourceOpener),
            backend: Some(backend),
            actuator: None,
            monitor,
            prepared: None,
            running: Running::default(),
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Count the startup delay and uptime from `started_at` instead of now
    pub fn with_process_start(mut self, started_at: Instant) -> Self {
        self.state = PipelineState::started_at(
            self.config.cameras.channels.len(),
            self.config.decision.threshold,
            started_at,
        );
        self
    }

    /// Replace the camera source opener
    pub fn with_opener(mut self, opener: Arc<dyn SourceOpener>) -> Self {
        self.opener = opener;
        self
    }

    /// Replace the inference backend
    pub fn with_backend(mut self, backend: Box<dyn InferenceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use this actuator instead of opening the configured serial port
    pub fn with_actuator(mut self, actuator: Arc<dyn Actuator>) -> Self {
        self.actuator = Some(actuator);
        self
    }

    /// Replace or disable the UDP frame monitor
    pub fn with_monitor(mut self, monitor: Option<Arc<UdpMonitor>>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn config(&self) -> &BeltgateConfig {
        &self.config
    }

    pub fn pipeline_state(&self) -> Arc<PipelineState> {
        Arc::clone(&self.state)
    }

    /// Actuator in use, opening the serial port on first call
    pub(super) fn actuator(&mut self) -> Arc<dyn Actuator> {
        let config = &self.config.actuator;
        Arc::clone(
            self.actuator
                .get_or_insert_with(|| actuator::connect(config)),
        )
    }
}
