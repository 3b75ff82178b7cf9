use super::message::{SystemStatus, TelemetryMessage};
use super::system::SystemProbe;
use crate::config::ReportingConfig;
use crate::queue::BoundedQueue;
use crate::report::JsonPoster;
use crate::state::PipelineState;
use chrono::Utc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const STOP_POLL: Duration = Duration::from_millis(100);

/// Drains the telemetry queue into the backend log endpoint
pub struct LogForwarder {
    poster: JsonPoster,
    url: String,
    queue: Arc<BoundedQueue<TelemetryMessage>>,
}

impl LogForwarder {
    pub fn new(config: &ReportingConfig, queue: Arc<BoundedQueue<TelemetryMessage>>) -> Self {
        Self {
            poster: JsonPoster::new(Duration::from_millis(config.request_timeout_ms)),
            url: config.url(&config.logs_path),
            queue,
        }
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("telemetry-logs".to_string())
            .spawn(move || self.run())
    }

    pub fn run(self) {
        debug!("Log forwarder posting to {}", self.url);
        let mut failures = 0u64;

        while let Some(message) = self.queue.pop() {
            if let Err(e) = self.poster.post(&self.url, &message) {
                failures += 1;
                // Only the first failure is logged; the backend is usually just absent
                if failures == 1 {
                    warn!("Failed to forward log message: {}", e);
                }
            }
        }

        debug!("Log forwarder stopped ({} failed posts)", failures);
    }
}

/// Posts a host status report every interval until stop is requested
pub struct StatusPublisher {
    poster: JsonPoster,
    url: String,
    interval: Duration,
    probe: SystemProbe,
    state: Arc<PipelineState>,
}

impl StatusPublisher {
    pub fn new(config: &ReportingConfig, state: Arc<PipelineState>) -> Self {
        Self {
            poster: JsonPoster::new(Duration::from_millis(config.request_timeout_ms)),
            url: config.url(&config.status_path),
            interval: Duration::from_secs(config.status_interval_seconds),
            probe: SystemProbe::default(),
            state,
        }
    }

    pub fn with_probe(mut self, probe: SystemProbe) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("telemetry-status".to_string())
            .spawn(move || self.run())
    }

    pub fn run(self) {
        info!("Status publisher started, reporting every {:?}", self.interval);

        while !self.state.should_stop() {
            match self.sample() {
                Ok(status) => match self.poster.post(&self.url, &status) {
                    Ok(()) => debug!(
                        "System status sent: {:.1}°C, {:.1}%, {}",
                        status.cpu_degree, status.cpu_usage, status.memory_usage
                    ),
                    Err(e) => warn!("Failed to send system status: {}", e),
                },
                Err(e) => warn!("Failed to sample system status: {}", e),
            }
            self.sleep_interval();
        }

        debug!("Status publisher stopped");
    }

    /// Gather one report; a missing thermal zone reads as 0 °C
    pub fn sample(&self) -> std::io::Result<SystemStatus> {
        let cpu_degree = self.probe.temperature().unwrap_or_else(|e| {
            debug!("CPU temperature unavailable: {}", e);
            0.0
        });
        let cpu_usage = self.probe.cpu_usage()?;
        let memory = self.probe.memory()?;

        Ok(SystemStatus {
            timestamp: Utc::now(),
            cpu_degree,
            cpu_usage,
            memory_usage: memory.usage_string(),
        })
    }

    fn sleep_interval(&self) {
        let deadline = Instant::now() + self.interval;
        while !self.state.should_stop() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(STOP_POLL.min(deadline - now));
        }
    }
}
