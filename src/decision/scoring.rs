use crate::frame::{CameraId, LabeledDetection};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

const HEALTHY: &str = "Healthy";

/// Top detection of one camera for one object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanRecord {
    #[serde(skip)]
    pub camera: CameraId,
    /// `<product>_<result>` label
    #[serde(rename = "productResult")]
    pub product_result: String,
    pub confidence: f32,
    pub x: f32,
    pub y: f32,
}

impl ScanRecord {
    /// Scan positioned at the far corner of the detection box
    pub fn from_detection(camera: CameraId, detection: &LabeledDetection) -> Self {
        Self {
            camera,
            product_result: detection.label.clone(),
            confidence: detection.confidence,
            // x is the box's x_max and y its y_max, in that order
            x: detection.bbox.x_max,
            y: detection.bbox.y_max,
        }
    }
}

/// Why a batch was accepted or rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    /// Every scan healthy and the score reached the threshold
    Accepted,
    /// Every scan healthy but the score stayed below the threshold
    HealthyBelowThreshold,
    /// Some scan unhealthy although the score reached the threshold
    UnhealthyAboveThreshold,
    /// Some scan unhealthy and the score below the threshold
    UnhealthyBelowThreshold,
}

impl fmt::Display for BatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BatchOutcome::Accepted => "accepted",
            BatchOutcome::HealthyBelowThreshold => "healthy but below threshold",
            BatchOutcome::UnhealthyAboveThreshold => "unhealthy despite score above threshold",
            BatchOutcome::UnhealthyBelowThreshold => "unhealthy and below threshold",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionVerdict {
    pub accept: bool,
    pub score: f64,
    pub outcome: BatchOutcome,
    /// Summed health per product id
    pub products: BTreeMap<String, f64>,
}

/// Split a label on its first `_` into (product, healthy)
///
/// Labels without a separator are logged and treated as healthy.
pub fn parse_label(label: &str) -> (&str, bool) {
    match label.split_once('_') {
        Some((product, result)) => (product, result == HEALTHY),
        None => {
            warn!("Malformed class label '{}', counting as healthy", label);
            (label, true)
        }
    }
}

/// Score a completed batch against `threshold`
///
/// Each scan contributes +confidence when healthy and -confidence otherwise;
/// the score is the mean contribution.
pub fn evaluate(scans: &[ScanRecord], threshold: f64) -> DecisionVerdict {
    let mut total = 0.0;
    let mut all_healthy = true;
    let mut products = BTreeMap::new();

    for scan in scans {
        let (product, healthy) = parse_label(&scan.product_result);
        let confidence = scan.confidence as f64;
        let health = if healthy { confidence } else { -confidence };
        all_healthy &= healthy;
        total += health;
        *products.entry(product.to_string()).or_insert(0.0) += health;
    }

    let score = if scans.is_empty() {
        0.0
    } else {
        total / scans.len() as f64
    };
    let above = score >= threshold;

    let outcome = match (all_healthy, above) {
        (true, true) => BatchOutcome::Accepted,
        (true, false) => BatchOutcome::HealthyBelowThreshold,
        (false, true) => BatchOutcome::UnhealthyAboveThreshold,
        (false, false) => BatchOutcome::UnhealthyBelowThreshold,
    };

    DecisionVerdict {
        accept: outcome == BatchOutcome::Accepted,
        score,
        outcome,
        products,
    }
}
