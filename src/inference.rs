use crate::config::InferenceConfig;
use crate::error::InferenceError;
use crate::frame::{DetectionBox, InferenceOutput, LabeledDetection, PreprocessedFrame};
use crate::queue::BoundedQueue;
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

const INFERENCE_JPEG_QUALITY: u8 = 90;

/// Object detector: frame at the model input size in, detections out
pub trait InferenceBackend: Send {
    fn infer(&mut self, frame: &PreprocessedFrame) -> Result<Vec<DetectionBox>, InferenceError>;
}

impl<F> InferenceBackend for F
where
    F: FnMut(&PreprocessedFrame) -> Result<Vec<DetectionBox>, InferenceError> + Send,
{
    fn infer(&mut self, frame: &PreprocessedFrame) -> Result<Vec<DetectionBox>, InferenceError> {
        self(frame)
    }
}

/// Class-id to label table
#[derive(Debug, Clone, Default)]
pub struct ClassLabels {
    labels: Vec<String>,
}

impl ClassLabels {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Label for `class_id`, or `class_<id>` when the table has none
    pub fn resolve(&self, class_id: u32) -> String {
        self.labels
            .get(class_id as usize)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }
}

/// Remote detector reached over HTTP
///
/// POSTs the frame as a JPEG and expects a JSON array of
/// `{"class_id", "confidence", "box": {"x_min", "y_min", "x_max", "y_max"}}`.
pub struct HttpInferenceBackend {
    agent: ureq::Agent,
    url: String,
}

impl HttpInferenceBackend {
    pub fn new(config: &InferenceConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build();
        Self {
            agent,
            url: config.url.clone(),
        }
    }
}

impl InferenceBackend for HttpInferenceBackend {
    fn infer(&mut self, frame: &PreprocessedFrame) -> Result<Vec<DetectionBox>, InferenceError> {
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, INFERENCE_JPEG_QUALITY)
            .encode(
                frame.image.as_raw(),
                frame.image.width(),
                frame.image.height(),
                ColorType::Rgb8,
            )
            .map_err(|e| InferenceError::Encode {
                details: e.to_string(),
            })?;

        let response = self
            .agent
            .post(&self.url)
            .set("Content-Type", "image/jpeg")
            .send_bytes(&jpeg)
            .map_err(|e| InferenceError::Request {
                details: e.to_string(),
            })?;

        let body = response.into_string().map_err(|e| InferenceError::Response {
            details: e.to_string(),
        })?;

        serde_json::from_str(&body).map_err(|e| InferenceError::Response {
            details: e.to_string(),
        })
    }
}

/// Inference stage: preprocessed frames in, labeled detections out
pub struct InferenceBridge {
    backend: Box<dyn InferenceBackend>,
    labels: ClassLabels,
    frames: Arc<BoundedQueue<PreprocessedFrame>>,
    outputs: Arc<BoundedQueue<InferenceOutput>>,
}

impl InferenceBridge {
    pub fn new(
        backend: Box<dyn InferenceBackend>,
        labels: ClassLabels,
        frames: Arc<BoundedQueue<PreprocessedFrame>>,
        outputs: Arc<BoundedQueue<InferenceOutput>>,
    ) -> Self {
        Self {
            backend,
            labels,
            frames,
            outputs,
        }
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("inference".to_string())
            .spawn(move || self.run())
    }

    /// Consume frames until the frame queue is stopped and drained
    pub fn run(mut self) {
        info!("Inference bridge started");

        while let Some(frame) = self.frames.pop() {
            let detections = match self.backend.infer(&frame) {
                Ok(detections) => detections,
                Err(e) => {
                    warn!(
                        "Inference failed for frame {} from camera {}: {}",
                        frame.frame_id, frame.camera, e
                    );
                    continue;
                }
            };

            debug!(
                "Camera {} frame {}: {} detections",
                frame.camera,
                frame.frame_id,
                detections.len()
            );

            let output = InferenceOutput {
                camera: frame.camera,
                frame_id: frame.frame_id,
                detections: detections
                    .into_iter()
                    .map(|d| self.label(d))
                    .collect(),
            };

            if self.outputs.push(output).is_err() {
                debug!("Output queue stopped");
                break;
            }
        }

        info!("Inference bridge stopped");
    }

    fn label(&self, detection: DetectionBox) -> LabeledDetection {
        let label = self.labels.resolve(detection.class_id);
        let confidence = detection.confidence.clamp(0.0, 100.0);
        trace!("Detection {} at {:.1}%", label, confidence);
        LabeledDetection {
            label,
            confidence,
            bbox: detection.bbox,
        }
    }
}
