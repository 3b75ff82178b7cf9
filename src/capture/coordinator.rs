use crate::camera::{CameraChannel, ChannelSettings, ChannelSlot, SourceOpener, UdpMonitor};
use crate::config::BeltgateConfig;
use crate::error::{BeltgateError, Result};
use crate::frame::{Frame, InferenceOutput, PreprocessedFrame};
use crate::queue::BoundedQueue;
use crate::state::PipelineState;
use image::imageops::{self, FilterType};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Starts the camera channels and feeds triggered frames to inference
pub struct CaptureCoordinator {
    config: Arc<BeltgateConfig>,
    state: Arc<PipelineState>,
    opener: Arc<dyn SourceOpener>,
    monitor: Option<Arc<UdpMonitor>>,
    frames: Arc<BoundedQueue<PreprocessedFrame>>,
    outputs: Arc<BoundedQueue<InferenceOutput>>,
    slots: Vec<Arc<ChannelSlot>>,
}

impl CaptureCoordinator {
    pub fn new(
        config: Arc<BeltgateConfig>,
        state: Arc<PipelineState>,
        opener: Arc<dyn SourceOpener>,
        frames: Arc<BoundedQueue<PreprocessedFrame>>,
        outputs: Arc<BoundedQueue<InferenceOutput>>,
    ) -> Self {
        let slots = (0..config.cameras.channels.len())
            .map(|_| Arc::new(ChannelSlot::new()))
            .collect();
        Self {
            config,
            state,
            opener,
            monitor: None,
            frames,
            outputs,
            slots,
        }
    }

    /// Publish raw frames to a UDP monitor
    pub fn with_monitor(mut self, monitor: Arc<UdpMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Per-camera slots, in camera-id order
    pub fn slots(&self) -> &[Arc<ChannelSlot>] {
        &self.slots
    }

    /// Run until stopped or until every camera is gone
    ///
    /// Joins the channel threads and stops both downstream queues on exit.
    pub fn run(self) -> Result<()> {
        let handles = self.spawn_channels();

        let bringup_timeout = Duration::from_secs(self.config.pipeline.bringup_timeout_seconds);
        if !self.state.latch().wait_timeout(bringup_timeout) {
            warn!(
                "Camera bring-up did not complete within {:?}, {} still pending",
                bringup_timeout,
                self.state.latch().remaining()
            );
        }

        let active = self.state.active_cameras();
        if active == 0 {
            error!("No camera could be opened");
            self.shutdown(handles);
            return Err(BeltgateError::NoActiveCameras);
        }
        info!(
            "{} of {} cameras active",
            active,
            self.config.cameras.channels.len()
        );

        // The delay runs from process start, so slow bring-up eats into it
        let ready_at = self.state.start_instant() + self.config.detection.startup_delay();
        let poll = Duration::from_millis(self.config.pipeline.poll_interval_ms);

        while !self.state.should_stop() && !self.state.all_done() {
            if !self.state.is_system_ready() && Instant::now() >= ready_at {
                self.state.set_system_ready();
            }
            if !self.forward_triggered() {
                break;
            }
            std::thread::sleep(poll);
        }

        if self.state.all_done() {
            // Flags raised just before the last camera left are still owed downstream
            self.forward_triggered();
        }

        self.shutdown(handles);
        Ok(())
    }

    fn spawn_channels(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.slots.len());
        for (index, slot) in self.slots.iter().enumerate() {
            let Some(settings) = ChannelSettings::from_config(&self.config, index) else {
                continue;
            };
            let channel = CameraChannel::new(
                index as u8,
                settings,
                Arc::clone(&self.state),
                Arc::clone(slot),
                Arc::clone(&self.opener),
                self.monitor.clone(),
            );

            match channel.spawn(self.state.latch().guard()) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!("Failed to spawn thread for camera {}: {}", index, e);
                    self.state.camera_finished();
                }
            }
        }
        handles
    }

    /// Move every pending triggered frame downstream; `false` once the queue is stopped
    fn forward_triggered(&self) -> bool {
        for slot in &self.slots {
            let Some(frame) = slot.take_triggered() else {
                continue;
            };
            let camera = frame.camera;
            let prepared = preprocess(&frame, self.config.pipeline.inference_resolution);
            debug!(
                "Queueing frame {} from camera {} for inference",
                prepared.frame_id, camera
            );
            if self.frames.push(prepared).is_err() {
                debug!("Frame queue stopped, dropping frame from camera {}", camera);
                return false;
            }
        }
        true
    }

    fn shutdown(&self, handles: Vec<JoinHandle<()>>) {
        self.state.request_stop();
        for handle in handles {
            let name = handle.thread().name().unwrap_or("camera").to_string();
            if handle.join().is_err() {
                error!("Thread {} panicked", name);
            }
        }
        self.frames.stop();
        self.outputs.stop();
        info!("Capture coordinator stopped");
    }
}

/// Resize a cropped frame to the inference input size
pub fn preprocess(frame: &Frame, size: (u32, u32)) -> PreprocessedFrame {
    let image = imageops::resize(frame.image.as_ref(), size.0, size.1, FilterType::Triangle);
    PreprocessedFrame {
        camera: frame.camera,
        frame_id: frame.id,
        captured_at: frame.timestamp,
        image,
    }
}
