use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

/// Camera identifier, the index of the channel in the configured list
pub type CameraId = u8;

/// Raw frame captured from one camera
#[derive(Debug, Clone)]
pub struct Frame {
    /// Per-camera monotonically increasing identifier
    pub id: u64,
    /// Camera that produced the frame
    pub camera: CameraId,
    /// Timestamp when the frame was captured
    pub timestamp: SystemTime,
    /// Pixel data (shared ownership, never mutated after capture)
    pub image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(id: u64, camera: CameraId, image: RgbImage) -> Self {
        Self {
            id,
            camera,
            timestamp: SystemTime::now(),
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Triggered frame, cropped to the belt and resized to the inference input size
#[derive(Debug, Clone)]
pub struct PreprocessedFrame {
    pub camera: CameraId,
    pub frame_id: u64,
    pub captured_at: SystemTime,
    pub image: RgbImage,
}

/// Axis-aligned box in inference-input pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

/// Single detection as produced by an inference backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    /// Opaque model class identifier
    pub class_id: u32,
    /// Confidence in percent (0-100)
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

/// Detection with its class resolved to a `<product>_<result>` label
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledDetection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Result of running inference over one preprocessed frame
#[derive(Debug, Clone)]
pub struct InferenceOutput {
    pub camera: CameraId,
    pub frame_id: u64,
    pub detections: Vec<LabeledDetection>,
}

impl InferenceOutput {
    /// Highest-confidence detection; on ties the earliest one wins
    pub fn top_detection(&self) -> Option<&LabeledDetection> {
        let mut best: Option<&LabeledDetection> = None;
        for detection in &self.detections {
            match best {
                Some(current) if detection.confidence <= current.confidence => {}
                _ => best = Some(detection),
            }
        }
        best
    }
}
