use super::scoring::{evaluate, BatchOutcome, DecisionVerdict, ScanRecord};
use crate::actuator::{Actuator, ActuatorCommand};
use crate::config::DecisionConfig;
use crate::frame::InferenceOutput;
use crate::queue::{BoundedQueue, PopError, TryPushError};
use crate::state::PipelineState;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const POP_TIMEOUT: Duration = Duration::from_millis(100);

/// Decision counters exposed to the control plane
#[derive(Debug, Default)]
pub struct DecisionStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    actuator_failures: AtomicU64,
    reports_dropped: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionStatsSnapshot {
    pub accepted: u64,
    pub rejected: u64,
    pub actuator_failures: u64,
    pub reports_dropped: u64,
}

impl DecisionStats {
    pub fn snapshot(&self) -> DecisionStatsSnapshot {
        DecisionStatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            actuator_failures: self.actuator_failures.load(Ordering::Relaxed),
            reports_dropped: self.reports_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Aggregates per-camera detections into one gate decision per object
pub struct DecisionEngine {
    state: Arc<PipelineState>,
    outputs: Arc<BoundedQueue<InferenceOutput>>,
    reports: Arc<BoundedQueue<Vec<ScanRecord>>>,
    actuator: Arc<dyn Actuator>,
    accept_angle: u8,
    reject_angle: u8,
    stats: Arc<DecisionStats>,
    batch: Vec<ScanRecord>,
}

impl DecisionEngine {
    pub fn new(
        config: &DecisionConfig,
        state: Arc<PipelineState>,
        outputs: Arc<BoundedQueue<InferenceOutput>>,
        reports: Arc<BoundedQueue<Vec<ScanRecord>>>,
        actuator: Arc<dyn Actuator>,
    ) -> Self {
        Self {
            state,
            outputs,
            reports,
            actuator,
            accept_angle: config.accept_angle,
            reject_angle: config.reject_angle,
            stats: Arc::new(DecisionStats::default()),
            batch: Vec::new(),
        }
    }

    pub fn stats(&self) -> Arc<DecisionStats> {
        Arc::clone(&self.stats)
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("decision".to_string())
            .spawn(move || self.run())
    }

    /// Consume inference outputs until the queue is stopped and drained
    pub fn run(mut self) {
        info!("Decision engine started");

        loop {
            match self.outputs.pop_timeout(POP_TIMEOUT) {
                Ok(output) => self.record(output),
                Err(PopError::Timeout) => {}
                Err(PopError::Stopped) => break,
            }
            // The active set may have shrunk while a batch was pending
            self.complete_if_ready();
        }

        if !self.batch.is_empty() {
            debug!("Discarding incomplete batch of {} scans", self.batch.len());
        }
        info!("Decision engine stopped");
    }

    fn record(&mut self, output: InferenceOutput) {
        let Some(top) = output.top_detection() else {
            debug!(
                "No objects detected in frame {} from camera {}",
                output.frame_id, output.camera
            );
            return;
        };

        info!(
            "Camera {} top detection: {} ({:.2}%)",
            output.camera, top.label, top.confidence
        );
        let record = ScanRecord::from_detection(output.camera, top);
        self.batch.push(record);
    }

    fn complete_if_ready(&mut self) {
        let active = self.state.active_cameras();
        if active == 0 || self.batch.len() < active {
            return;
        }

        let batch = std::mem::take(&mut self.batch);
        let threshold = self.state.threshold().get();
        let verdict = evaluate(&batch, threshold);
        let batch_id = Uuid::new_v4();

        self.log_verdict(&batch_id, &verdict, threshold, batch.len());
        self.actuate(&verdict);

        if let Err(e) = self.reports.try_push(batch) {
            self.stats.reports_dropped.fetch_add(1, Ordering::Relaxed);
            match e {
                TryPushError::Full(_) => {
                    warn!("Report queue full, batch {} not reported", batch_id)
                }
                TryPushError::Stopped(_) => {
                    debug!("Report queue stopped, batch {} not reported", batch_id)
                }
            }
        }
    }

    fn log_verdict(&self, batch_id: &Uuid, verdict: &DecisionVerdict, threshold: f64, size: usize) {
        for (product, health) in &verdict.products {
            debug!("Batch {} product {} health {:.2}", batch_id, product, health);
        }
        match verdict.outcome {
            BatchOutcome::Accepted => info!(
                "Batch {} accepted: score {:.2} >= threshold {:.2} over {} scans",
                batch_id, verdict.score, threshold, size
            ),
            outcome => warn!(
                "Batch {} rejected ({}): score {:.2}, threshold {:.2}, {} scans",
                batch_id, outcome, verdict.score, threshold, size
            ),
        }
    }

    fn actuate(&self, verdict: &DecisionVerdict) {
        let angle = if verdict.accept {
            self.stats.accepted.fetch_add(1, Ordering::Relaxed);
            self.accept_angle
        } else {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            self.reject_angle
        };

        match self.actuator.send(&ActuatorCommand::Servo(angle)) {
            Ok(reply) => debug!("Servo set to {}: {}", angle, reply),
            Err(e) => {
                self.stats.actuator_failures.fetch_add(1, Ordering::Relaxed);
                error!("Failed to set servo to {}: {}", angle, e);
            }
        }
    }
}
