use crate::config::ReportingConfig;
use crate::decision::ScanRecord;
use crate::error::ReportError;
use crate::queue::BoundedQueue;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Blocking JSON-over-HTTP client shared by the outbound reporters
#[derive(Clone)]
pub struct JsonPoster {
    agent: ureq::Agent,
}

impl JsonPoster {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    /// POST `body` as JSON; any non-2xx status is an error
    pub fn post<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<(), ReportError> {
        let payload = serde_json::to_string(body)?;
        self.agent
            .post(url)
            .set("Content-Type", "application/json")
            .send_string(&payload)
            .map(|_| ())
            .map_err(|e| ReportError::Request {
                url: url.to_string(),
                details: e.to_string(),
            })
    }
}

/// Sends each completed scan batch to the backend, once
pub struct ScanReporter {
    poster: JsonPoster,
    url: String,
    reports: Arc<BoundedQueue<Vec<ScanRecord>>>,
    sent: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl ScanReporter {
    pub fn new(config: &ReportingConfig, reports: Arc<BoundedQueue<Vec<ScanRecord>>>) -> Self {
        Self {
            poster: JsonPoster::new(Duration::from_millis(config.request_timeout_ms)),
            url: config.url(&config.scans_path),
            reports,
            sent: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("reporter".to_string())
            .spawn(move || self.run())
    }

    /// Drain the report queue until it is stopped
    pub fn run(self) {
        info!("Scan reporter posting to {}", self.url);

        while let Some(batch) = self.reports.pop() {
            match self.poster.post(&self.url, &batch) {
                Ok(()) => {
                    self.sent.fetch_add(1, Ordering::Relaxed);
                    info!("Scans successfully sent to server ({} records)", batch.len());
                }
                Err(e) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    warn!("Failed to send scans to server: {}", e);
                }
            }
        }

        debug!(
            "Scan reporter stopped ({} sent, {} failed)",
            self.sent.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed)
        );
    }
}
