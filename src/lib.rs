pub mod actuator;
pub mod app;
pub mod camera;
pub mod capture;
pub mod config;
pub mod control;
pub mod decision;
pub mod error;
pub mod frame;
pub mod inference;
pub mod queue;
pub mod report;
pub mod state;
pub mod telemetry;

#[cfg(test)]
mod testutil;

pub use app::{BeltgateOrchestrator, ComponentState, ShutdownReason};
pub use config::BeltgateConfig;
pub use error::{BeltgateError, Result};
pub use queue::BoundedQueue;
pub use state::PipelineState;
pub use telemetry::{TelemetryLayer, TelemetryMessage};
