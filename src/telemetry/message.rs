use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

fn serialize_timestamp<S: Serializer>(
    ts: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&ts.format(TIMESTAMP_FORMAT))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogLevel {
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "WARNING")]
    Warning,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "DEBUG")]
    Debug,
}

impl LogLevel {
    /// Map a tracing level; TRACE folds into DEBUG
    pub fn from_tracing(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => LogLevel::Error,
            tracing::Level::WARN => LogLevel::Warning,
            tracing::Level::INFO => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One log line forwarded to the backend
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryMessage {
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl TelemetryMessage {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

/// Periodic host health report
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// SoC temperature in °C
    #[serde(rename = "cpuDegree")]
    pub cpu_degree: f64,
    /// CPU utilization percentage over the sample window
    #[serde(rename = "cpuUsage")]
    pub cpu_usage: f64,
    /// `<available>/<total> MiB`
    #[serde(rename = "memoryUsage")]
    pub memory_usage: String,
}
