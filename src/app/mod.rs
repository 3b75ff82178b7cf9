mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;


pub use orchestrator::BeltgateOrchestrator;
pub use types::{ComponentState, ShutdownReason};
