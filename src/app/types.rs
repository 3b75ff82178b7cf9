/// Component lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// System shutdown reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(String),
    /// Every camera has finished delivering frames
    PipelineFinished,
    Error(String),
}

/// Components in start order
pub(crate) const COMPONENTS: [&str; 6] = [
    "telemetry",
    "control",
    "reporter",
    "decision",
    "inference",
    "capture",
];
