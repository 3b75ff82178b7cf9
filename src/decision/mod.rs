mod engine;
mod scoring;

pub use engine::{DecisionEngine, DecisionStats, DecisionStatsSnapshot};
pub use scoring::{evaluate, parse_label, BatchOutcome, DecisionVerdict, ScanRecord};
