use super::*;
use crate::camera::{ScriptEnd, SyntheticOpener, SyntheticSource};
use crate::config::BeltgateConfig;
use crate::error::BeltgateError;
use crate::frame::{Frame, InferenceOutput, PreprocessedFrame};
use crate::queue::BoundedQueue;
use crate::state::PipelineState;
use image::{Rgb, RgbImage};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

fn background() -> RgbImage {
    RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([200, 200, 200]))
}

fn with_bar(x0: u32, x1: u32) -> RgbImage {
    let mut frame = background();
    for y in 0..HEIGHT {
        for x in x0..x1 {
            frame.put_pixel(x, y, Rgb([30, 30, 30]));
        }
    }
    frame
}

/// Background, one object crossing the centre, then a quiet tail
fn crossing_script(camera: u8) -> SyntheticSource {
    let mut frames = vec![background(), background(), background()];
    frames.push(with_bar(24, 32));
    frames.push(with_bar(34, 42));
    frames.extend(std::iter::repeat(background()).take(10));
    SyntheticSource::new(camera, frames, ScriptEnd::Fail).with_interval(Duration::from_millis(20))
}

/// Two crossings with `gap` quiet frames between them, 20 ms per frame
///
/// The triggers land on the second frame of each crossing, so they are
/// `(gap + 2) * 20` ms apart.
fn paced_crossings(camera: u8, gap: usize) -> SyntheticSource {
    let mut frames = vec![background(), background(), background()];
    frames.push(with_bar(24, 32));
    frames.push(with_bar(34, 42));
    frames.extend(std::iter::repeat(background()).take(gap));
    frames.push(with_bar(24, 32));
    frames.push(with_bar(34, 42));
    frames.extend(std::iter::repeat(background()).take(3));
    SyntheticSource::new(camera, frames, ScriptEnd::Fail).with_interval(Duration::from_millis(20))
}

fn create_test_config() -> Arc<BeltgateConfig> {
    let mut config = BeltgateConfig::default();
    config.cameras.resolution = (WIDTH, HEIGHT);
    config.detection.startup_delay_seconds = 0.0;
    config.pipeline.inference_resolution = (32, 32);
    config.pipeline.poll_interval_ms = 1;
    config.pipeline.bringup_timeout_seconds = 5;
    Arc::new(config)
}

struct Harness {
    state: Arc<PipelineState>,
    frames: Arc<BoundedQueue<PreprocessedFrame>>,
    outputs: Arc<BoundedQueue<InferenceOutput>>,
    coordinator: CaptureCoordinator,
}

fn harness(opener: SyntheticOpener) -> Harness {
    let config = create_test_config();
    let state = PipelineState::new(config.cameras.channels.len(), 70.0);
    harness_with(config, state, opener)
}

fn harness_with(
    config: Arc<BeltgateConfig>,
    state: Arc<PipelineState>,
    opener: SyntheticOpener,
) -> Harness {
    let frames = Arc::new(BoundedQueue::new("frames", 60));
    let outputs = Arc::new(BoundedQueue::new("outputs", 60));
    let coordinator = CaptureCoordinator::new(
        config,
        Arc::clone(&state),
        Arc::new(opener),
        Arc::clone(&frames),
        Arc::clone(&outputs),
    );
    Harness {
        state,
        frames,
        outputs,
        coordinator,
    }
}

fn drain(queue: &BoundedQueue<PreprocessedFrame>) -> Vec<PreprocessedFrame> {
    let mut items = Vec::new();
    while let Some(item) = queue.pop() {
        items.push(item);
    }
    items
}

#[test]
fn test_failed_camera_shrinks_active_set() {
    let opener = SyntheticOpener::new()
        .with_source(0, crossing_script(0))
        .with_source(1, crossing_script(1));
    let Harness {
        state,
        frames,
        outputs,
        coordinator,
    } = harness(opener);

    let runner = thread::spawn(move || coordinator.run());

    assert!(state.latch().wait_timeout(Duration::from_secs(5)));
    assert_eq!(state.active_cameras(), 2);

    runner.join().unwrap().unwrap();

    assert!(state.all_done());
    assert!(frames.is_stopped());
    assert!(outputs.is_stopped());

    let mut cameras: Vec<u8> = drain(&frames).iter().map(|f| f.camera).collect();
    cameras.sort_unstable();
    assert_eq!(cameras, vec![0, 1]);
}

#[test]
fn test_triggered_frames_are_resized() {
    let opener = SyntheticOpener::new().with_source(0, crossing_script(0));
    let harness = harness(opener);
    let frames = Arc::clone(&harness.frames);

    harness.coordinator.run().unwrap();

    let queued = drain(&frames);
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].image.dimensions(), (32, 32));
}

#[test]
fn test_no_cameras_is_fatal() {
    let harness = harness(SyntheticOpener::new());
    let frames = Arc::clone(&harness.frames);
    let outputs = Arc::clone(&harness.outputs);

    let result = harness.coordinator.run();

    assert!(matches!(result, Err(BeltgateError::NoActiveCameras)));
    assert!(frames.is_stopped());
    assert!(outputs.is_stopped());
}

#[test]
fn test_stop_request_ends_run() {
    let endless = SyntheticSource::new(0, vec![background()], ScriptEnd::RepeatLast)
        .with_interval(Duration::from_millis(5));
    let Harness {
        state,
        frames,
        coordinator,
        ..
    } = harness(SyntheticOpener::new().with_source(0, endless));

    let runner = thread::spawn(move || coordinator.run());
    assert!(state.latch().wait_timeout(Duration::from_secs(5)));
    thread::sleep(Duration::from_millis(50));
    assert!(state.is_system_ready());

    state.request_stop();
    runner.join().unwrap().unwrap();

    assert!(frames.is_stopped());
    assert_eq!(state.active_cameras(), 0);
}

#[test]
fn test_preprocess_keeps_identity() {
    let frame = Frame::new(9, 2, background());
    let prepared = preprocess(&frame, (16, 8));
    assert_eq!(prepared.camera, 2);
    assert_eq!(prepared.frame_id, 9);
    assert_eq!(prepared.image.dimensions(), (16, 8));
}

#[test]
fn test_trigger_just_before_camera_exit_is_delivered() {
    // The stream ends on the crossing frame, long before the next poll
    let mut frames = vec![background(), background(), background()];
    frames.push(with_bar(24, 32));
    frames.push(with_bar(34, 42));
    let source =
        SyntheticSource::new(0, frames, ScriptEnd::Fail).with_interval(Duration::from_millis(20));

    let mut config = (*create_test_config()).clone();
    config.pipeline.poll_interval_ms = 300;
    let config = Arc::new(config);
    let state = PipelineState::new(config.cameras.channels.len(), 70.0);
    let harness = harness_with(
        config,
        Arc::clone(&state),
        SyntheticOpener::new().with_source(0, source),
    );
    let frames = Arc::clone(&harness.frames);

    harness.coordinator.run().unwrap();

    assert!(state.all_done());
    let queued = drain(&frames);
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].camera, 0);
}

fn queued_with_cooldown(gap: usize, cooldown_seconds: f64) -> Vec<PreprocessedFrame> {
    let mut config = (*create_test_config()).clone();
    config.detection.cooldown_seconds = cooldown_seconds;
    let config = Arc::new(config);
    let state = PipelineState::new(config.cameras.channels.len(), 70.0);
    let harness = harness_with(
        config,
        state,
        SyntheticOpener::new().with_source(0, paced_crossings(0, gap)),
    );
    let frames = Arc::clone(&harness.frames);

    harness.coordinator.run().unwrap();
    drain(&frames)
}

#[test]
fn test_crossings_inside_cooldown_queue_one_frame() {
    // About 100 ms apart against a 300 ms cooldown
    let queued = queued_with_cooldown(3, 0.3);
    assert_eq!(queued.len(), 1);
}

#[test]
fn test_crossings_outside_cooldown_queue_two_frames() {
    // About 440 ms apart against a 300 ms cooldown
    let queued = queued_with_cooldown(20, 0.3);
    assert_eq!(queued.len(), 2);
    assert!(queued[0].frame_id < queued[1].frame_id);
}

#[test]
fn test_startup_delay_counts_from_process_start() {
    let mut config = (*create_test_config()).clone();
    config.detection.startup_delay_seconds = 5.0;
    let config = Arc::new(config);

    let long_ago = Instant::now()
        .checked_sub(Duration::from_secs(10))
        .unwrap_or_else(Instant::now);
    let started_earlier = PipelineState::started_at(config.cameras.channels.len(), 70.0, long_ago);
    let harness = harness_with(
        Arc::clone(&config),
        Arc::clone(&started_earlier),
        SyntheticOpener::new().with_source(0, crossing_script(0)),
    );
    let frames = Arc::clone(&harness.frames);
    harness.coordinator.run().unwrap();
    assert!(started_earlier.is_system_ready());
    assert_eq!(drain(&frames).len(), 1);

    let started_now = PipelineState::new(config.cameras.channels.len(), 70.0);
    let harness = harness_with(
        config,
        Arc::clone(&started_now),
        SyntheticOpener::new().with_source(0, crossing_script(0)),
    );
    let frames = Arc::clone(&harness.frames);
    harness.coordinator.run().unwrap();
    assert!(!started_now.is_system_ready());
    assert!(drain(&frames).is_empty());
}
