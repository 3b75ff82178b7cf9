use crate::config::CamerasConfig;
use crate::error::CameraError;
use crate::frame::CameraId;
use image::RgbImage;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, info};

/// Blocking source of RGB frames for one camera
pub trait FrameSource: Send {
    /// Read the next frame, blocking until one is available
    fn read(&mut self) -> Result<RgbImage, CameraError>;
}

/// Opens frame sources for configured devices
pub trait SourceOpener: Send + Sync {
    fn open(
        &self,
        camera: CameraId,
        device: u32,
        cameras: &CamerasConfig,
    ) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// Opens V4L2 devices through GStreamer
#[derive(Debug, Default, Clone)]
pub struct GstSourceOpener;

impl SourceOpener for GstSourceOpener {
    #[cfg(all(target_os = "linux", feature = "camera"))]
    fn open(
        &self,
        camera: CameraId,
        device: u32,
        cameras: &CamerasConfig,
    ) -> Result<Box<dyn FrameSource>, CameraError> {
        let source = gst::GstFrameSource::open(camera, device, cameras.resolution, cameras.fps)?;
        Ok(Box::new(source))
    }

    #[cfg(not(all(target_os = "linux", feature = "camera")))]
    fn open(
        &self,
        camera: CameraId,
        device: u32,
        _cameras: &CamerasConfig,
    ) -> Result<Box<dyn FrameSource>, CameraError> {
        debug!(
            "Camera {} (device {}) requested but camera support is not compiled in",
            camera, device
        );
        Err(CameraError::Unavailable)
    }
}

#[cfg(all(target_os = "linux", feature = "camera"))]
mod gst {
    use super::FrameSource;
    use crate::error::CameraError;
    use crate::frame::CameraId;
    use gstreamer::prelude::*;
    use gstreamer::{ClockTime, Pipeline};
    use gstreamer_app::AppSink;
    use gstreamer_video::VideoInfo;
    use image::RgbImage;
    use tracing::{info, warn};

    const READ_TIMEOUT_MS: u64 = 2000;
    const OPEN_TIMEOUT_SECS: u64 = 5;

    pub struct GstFrameSource {
        camera: CameraId,
        pipeline: Pipeline,
        appsink: AppSink,
    }

    impl GstFrameSource {
        pub fn open(
            camera: CameraId,
            device: u32,
            resolution: (u32, u32),
            fps: u32,
        ) -> Result<Self, CameraError> {
            gstreamer::init().map_err(|e| CameraError::Configuration {
                details: format!("Failed to initialize GStreamer: {}", e),
            })?;

            let (width, height) = resolution;
            let pipeline_desc = format!(
                "v4l2src device=/dev/video{} ! \
                 video/x-raw,width={},height={},framerate={}/1 ! \
                 videoconvert ! video/x-raw,format=RGB ! \
                 appsink name=sink sync=false max-buffers=2 drop=true",
                device, width, height, fps
            );

            info!("Creating GStreamer pipeline: {}", pipeline_desc);

            let pipeline = gstreamer::parse::launch(&pipeline_desc)
                .map_err(|e| CameraError::Configuration {
                    details: format!("Failed to create pipeline: {}", e),
                })?
                .downcast::<Pipeline>()
                .map_err(|_| CameraError::Configuration {
                    details: "Failed to downcast to Pipeline".to_string(),
                })?;

            let appsink = pipeline
                .by_name("sink")
                .ok_or_else(|| CameraError::Configuration {
                    details: "Pipeline has no appsink".to_string(),
                })?
                .downcast::<AppSink>()
                .map_err(|_| CameraError::Configuration {
                    details: "Failed to downcast to AppSink".to_string(),
                })?;

            pipeline
                .set_state(gstreamer::State::Playing)
                .map_err(|e| CameraError::DeviceOpen {
                    device,
                    details: e.to_string(),
                })?;

            // Surface a missing or busy device now rather than on first read
            let (result, _, _) = pipeline.state(ClockTime::from_seconds(OPEN_TIMEOUT_SECS));
            if let Err(e) = result {
                let _ = pipeline.set_state(gstreamer::State::Null);
                return Err(CameraError::DeviceOpen {
                    device,
                    details: e.to_string(),
                });
            }

            Ok(Self {
                camera,
                pipeline,
                appsink,
            })
        }
    }

    impl FrameSource for GstFrameSource {
        fn read(&mut self) -> Result<RgbImage, CameraError> {
            let camera = self.camera;
            let read_err = move |details: String| CameraError::Read { camera, details };

            let sample = self
                .appsink
                .try_pull_sample(ClockTime::from_mseconds(READ_TIMEOUT_MS))
                .ok_or_else(|| read_err("No sample within timeout".to_string()))?;
            let buffer = sample
                .buffer()
                .ok_or_else(|| read_err("No buffer in sample".to_string()))?;
            let caps = sample
                .caps()
                .ok_or_else(|| read_err("No caps in sample".to_string()))?;
            let info = VideoInfo::from_caps(caps)
                .map_err(|e| read_err(format!("Failed to get video info: {}", e)))?;
            let map = buffer
                .map_readable()
                .map_err(|e| read_err(format!("Failed to map buffer: {}", e)))?;

            let width = info.width();
            let height = info.height();
            let stride = info.stride()[0] as usize;
            let row_bytes = width as usize * 3;
            let data = map.as_slice();

            let mut pixels = Vec::with_capacity(row_bytes * height as usize);
            for row in 0..height as usize {
                let start = row * stride;
                let line = data
                    .get(start..start + row_bytes)
                    .ok_or_else(|| read_err("Buffer shorter than frame".to_string()))?;
                pixels.extend_from_slice(line);
            }

            RgbImage::from_raw(width, height, pixels)
                .ok_or_else(|| read_err("Frame size mismatch".to_string()))
        }
    }

    impl Drop for GstFrameSource {
        fn drop(&mut self) {
            if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
                warn!("Failed to stop pipeline for camera {}: {}", self.camera, e);
            }
        }
    }
}

/// What a synthetic source does once its scripted frames run out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptEnd {
    /// Keep returning the last frame
    RepeatLast,
    /// Report a read failure
    Fail,
}

/// Frame source replaying a fixed script, for tests and dry runs
pub struct SyntheticSource {
    camera: CameraId,
    frames: VecDeque<RgbImage>,
    last: Option<RgbImage>,
    end: ScriptEnd,
    interval: Duration,
}

impl SyntheticSource {
    pub fn new(camera: CameraId, frames: Vec<RgbImage>, end: ScriptEnd) -> Self {
        Self {
            camera,
            frames: frames.into(),
            last: None,
            end,
            interval: Duration::ZERO,
        }
    }

    /// Sleep between reads, emulating a camera frame rate
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl FrameSource for SyntheticSource {
    fn read(&mut self) -> Result<RgbImage, CameraError> {
        if !self.interval.is_zero() {
            std::thread::sleep(self.interval);
        }
        if let Some(frame) = self.frames.pop_front() {
            self.last = Some(frame.clone());
            return Ok(frame);
        }
        match (self.end, &self.last) {
            (ScriptEnd::RepeatLast, Some(last)) => Ok(last.clone()),
            _ => Err(CameraError::Read {
                camera: self.camera,
                details: "End of synthetic stream".to_string(),
            }),
        }
    }
}

/// Opener handing out pre-built synthetic sources by camera id
///
/// Cameras without a registered source fail to open.
#[derive(Default)]
pub struct SyntheticOpener {
    sources: Mutex<HashMap<CameraId, SyntheticSource>>,
}

impl SyntheticOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(self, camera: CameraId, source: SyntheticSource) -> Self {
        self.sources.lock().insert(camera, source);
        self
    }
}

impl SourceOpener for SyntheticOpener {
    fn open(
        &self,
        camera: CameraId,
        device: u32,
        _cameras: &CamerasConfig,
    ) -> Result<Box<dyn FrameSource>, CameraError> {
        match self.sources.lock().remove(&camera) {
            Some(source) => {
                info!("Opened synthetic source for camera {}", camera);
                Ok(Box::new(source))
            }
            None => Err(CameraError::DeviceOpen {
                device,
                details: "No synthetic source registered".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_synthetic_source_repeats_last() {
        let frames = vec![
            RgbImage::from_pixel(2, 2, Rgb([1, 1, 1])),
            RgbImage::from_pixel(2, 2, Rgb([2, 2, 2])),
        ];
        let mut source = SyntheticSource::new(0, frames, ScriptEnd::RepeatLast);
        assert_eq!(source.read().unwrap().get_pixel(0, 0)[0], 1);
        assert_eq!(source.read().unwrap().get_pixel(0, 0)[0], 2);
        assert_eq!(source.read().unwrap().get_pixel(0, 0)[0], 2);
    }

    #[test]
    fn test_synthetic_source_fails_at_end() {
        let mut source = SyntheticSource::new(1, vec![RgbImage::new(2, 2)], ScriptEnd::Fail);
        assert!(source.read().is_ok());
        assert!(matches!(
            source.read(),
            Err(CameraError::Read { camera: 1, .. })
        ));
    }

    #[test]
    fn test_opener_without_source_fails() {
        let opener = SyntheticOpener::new().with_source(
            0,
            SyntheticSource::new(0, vec![RgbImage::new(2, 2)], ScriptEnd::Fail),
        );
        let cameras = CamerasConfig::default();
        assert!(opener.open(0, 0, &cameras).is_ok());
        // Sources are handed out once
        assert!(matches!(
            opener.open(0, 0, &cameras),
            Err(CameraError::DeviceOpen { device: 0, .. })
        ));
        assert!(opener.open(2, 4, &cameras).is_err());
    }
}
