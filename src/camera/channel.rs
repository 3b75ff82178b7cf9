use super::edges::{detect_belt_span, BeltSpan};
use super::monitor::UdpMonitor;
use super::source::{FrameSource, SourceOpener};
use super::tone::{diff_centroid, reference_mean, white_out, ReferenceColor};
use super::trigger::{is_centered, TriggerGate};
use crate::config::{BeltgateConfig, CamerasConfig, EdgeConfig, ToneTolerance};
use crate::error::CameraError;
use crate::frame::{CameraId, Frame};
use crate::state::{LatchGuard, PipelineState};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// State a channel shares with the coordinator
///
/// One writer (the channel thread) and one reader (the coordinator).
#[derive(Debug, Default)]
pub struct ChannelSlot {
    inner: Mutex<SlotState>,
}

#[derive(Debug, Default)]
struct SlotState {
    live: bool,
    object_present: bool,
    latest: Option<Frame>,
    triggers: u64,
}

impl ChannelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_live(&self, live: bool) {
        self.inner.lock().live = live;
    }

    /// Store the latest cropped frame, raising the object flag on a trigger
    fn publish(&self, frame: Frame, triggered: bool) {
        let mut inner = self.inner.lock();
        inner.latest = Some(frame);
        if triggered {
            inner.object_present = true;
            inner.triggers += 1;
        }
    }

    /// Take the latest frame if an object is present, clearing the flag
    ///
    /// A trigger accepted before the channel went inactive is still handed
    /// out; a channel that is no longer live raises no new ones.
    pub fn take_triggered(&self) -> Option<Frame> {
        let mut inner = self.inner.lock();
        if !inner.object_present {
            return None;
        }
        inner.object_present = false;
        inner.latest.clone()
    }

    pub fn is_live(&self) -> bool {
        self.inner.lock().live
    }

    /// Triggers accepted so far
    pub fn trigger_count(&self) -> u64 {
        self.inner.lock().triggers
    }
}

/// Per-camera detection parameters
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub device: u32,
    pub difference_threshold: f64,
    pub tone: ToneTolerance,
    pub motion: ToneTolerance,
    pub cooldown: Duration,
    pub reference_window: u32,
    pub edges: EdgeConfig,
    pub cameras: CamerasConfig,
}

impl ChannelSettings {
    /// Settings for the `index`-th configured channel, with per-camera overrides applied
    pub fn from_config(config: &BeltgateConfig, index: usize) -> Option<Self> {
        let channel = config.cameras.channels.get(index)?;
        Some(Self {
            device: channel.device,
            difference_threshold: channel.difference_threshold,
            tone: channel.tone.unwrap_or(config.detection.tone),
            motion: channel.motion.unwrap_or(config.detection.motion),
            cooldown: config.detection.cooldown(),
            reference_window: config.detection.reference_window,
            edges: config.detection.edges.clone(),
            cameras: config.cameras.clone(),
        })
    }
}

/// Counts the camera out of the active set when dropped, panics included
struct ActiveCamera(Arc<PipelineState>);

impl Drop for ActiveCamera {
    fn drop(&mut self) {
        self.0.camera_finished();
    }
}

/// Lighting and geometry measured once from the background frame
struct Calibration {
    span: BeltSpan,
    reference: ReferenceColor,
    background: image::RgbImage,
}

/// One physical camera: capture, normalization and motion triggering
pub struct CameraChannel {
    id: CameraId,
    settings: ChannelSettings,
    state: Arc<PipelineState>,
    slot: Arc<ChannelSlot>,
    opener: Arc<dyn SourceOpener>,
    monitor: Option<Arc<UdpMonitor>>,
}

impl CameraChannel {
    pub fn new(
        id: CameraId,
        settings: ChannelSettings,
        state: Arc<PipelineState>,
        slot: Arc<ChannelSlot>,
        opener: Arc<dyn SourceOpener>,
        monitor: Option<Arc<UdpMonitor>>,
    ) -> Self {
        Self {
            id,
            settings,
            state,
            slot,
            opener,
            monitor,
        }
    }

    /// Run the channel on its own thread
    ///
    /// If the thread cannot be spawned the guard is dropped with the closure.
    pub fn spawn(self, guard: LatchGuard) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("camera-{}", self.id))
            .spawn(move || self.run(guard))
    }

    /// Channel body: bring-up, latch arrival, capture loop, teardown
    pub fn run(self, guard: LatchGuard) {
        let active = ActiveCamera(Arc::clone(&self.state));
        let (mut source, calibration) = match self.start() {
            Ok(started) => started,
            Err(e) => {
                error!("Camera {} failed to start: {}", self.id, e);
                drop(active);
                guard.arrive();
                return;
            }
        };

        self.slot.set_live(true);
        guard.arrive();

        info!(
            "Camera {} running (device {}, belt span {}..{})",
            self.id, self.settings.device, calibration.span.left, calibration.span.right
        );

        self.capture_loop(source.as_mut(), calibration);

        self.slot.set_live(false);
        drop(active);
        info!("Camera {} stopped", self.id);
    }

    fn start(&self) -> Result<(Box<dyn FrameSource>, Calibration), CameraError> {
        let mut source = self
            .opener
            .open(self.id, self.settings.device, &self.settings.cameras)?;

        let background = source.read()?;
        let span = detect_belt_span(
            &background,
            &self.settings.edges,
            self.settings.cameras.fallback_span,
        );
        let cropped = span.crop(&background);
        let reference = reference_mean(&cropped, self.settings.reference_window);
        debug!(
            "Camera {} reference colour [{:.1}, {:.1}, {:.1}]",
            self.id, reference[0], reference[1], reference[2]
        );
        let background = white_out(&cropped, reference, &self.settings.tone);

        Ok((
            source,
            Calibration {
                span,
                reference,
                background,
            },
        ))
    }

    fn capture_loop(&self, source: &mut dyn FrameSource, calibration: Calibration) {
        let span = calibration.span;
        let center = span.center();
        let mut previous = calibration.background;
        let mut previous_centroid = None;
        let mut gate = TriggerGate::new(self.settings.cooldown);
        let mut frame_id = 0u64;

        while !self.state.should_stop() {
            let raw = match source.read() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Camera {} read failed, going inactive: {}", self.id, e);
                    break;
                }
            };
            frame_id += 1;

            if let Some(monitor) = &self.monitor {
                monitor.publish(self.id, &raw);
            }

            let cropped = span.crop(&raw);
            let normalized = white_out(&cropped, calibration.reference, &self.settings.tone);
            let sample = diff_centroid(
                &normalized,
                &previous,
                &self.settings.motion,
                self.settings.difference_threshold,
            );

            let triggered = is_centered(center, sample.centroid, previous_centroid)
                && self.state.is_system_ready()
                && gate.try_accept(Instant::now());

            if triggered {
                info!(
                    "Camera {} object centred (frame {}, {:.1}% changed)",
                    self.id, frame_id, sample.changed_percent
                );
            } else {
                trace!(
                    "Camera {} frame {}: {:.1}% changed",
                    self.id,
                    frame_id,
                    sample.changed_percent
                );
            }

            self.slot
                .publish(Frame::new(frame_id, self.id, cropped), triggered);

            previous_centroid = sample.centroid;
            previous = normalized;
        }
    }
}
