//! Best-effort backend telemetry: forwarded log lines and periodic host status.

mod layer;
mod message;
mod publisher;
mod system;

pub use layer::TelemetryLayer;
pub use message::{LogLevel, SystemStatus, TelemetryMessage};
pub use publisher::{LogForwarder, StatusPublisher};
pub use system::{CpuTimes, MemInfo, SystemProbe};
