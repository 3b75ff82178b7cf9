use super::*;
use crate::config::BeltgateConfig;
use crate::state::PipelineState;
use image::{Rgb, RgbImage};
use std::sync::Arc;
use std::time::Duration;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

fn background() -> RgbImage {
    RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([200, 200, 200]))
}

/// Background with a dark full-height bar over columns `x0..x1`
fn with_bar(x0: u32, x1: u32) -> RgbImage {
    let mut frame = background();
    for y in 0..HEIGHT {
        for x in x0..x1 {
            frame.put_pixel(x, y, Rgb([30, 30, 30]));
        }
    }
    frame
}

/// One object crossing the centre line (x = 32) between two frames
fn crossing() -> Vec<RgbImage> {
    vec![background(), with_bar(24, 32), with_bar(34, 42), background()]
}

fn create_test_config(cooldown_seconds: f64) -> BeltgateConfig {
    let mut config = BeltgateConfig::default();
    config.detection.cooldown_seconds = cooldown_seconds;
    config.cameras.resolution = (WIDTH, HEIGHT);
    config
}

fn run_channel(frames: Vec<RgbImage>, cooldown_seconds: f64, ready: bool) -> Arc<ChannelSlot> {
    let config = create_test_config(cooldown_seconds);
    let state = PipelineState::new(1, 70.0);
    if ready {
        state.set_system_ready();
    }
    let slot = Arc::new(ChannelSlot::new());
    let source = SyntheticSource::new(0, frames, ScriptEnd::Fail);
    let opener = SyntheticOpener::new().with_source(0, source);
    let channel = CameraChannel::new(
        0,
        ChannelSettings::from_config(&config, 0).unwrap(),
        Arc::clone(&state),
        Arc::clone(&slot),
        Arc::new(opener),
        None,
    );

    channel.run(state.latch().guard());

    assert_eq!(state.active_cameras(), 0);
    assert!(state.all_done());
    assert_eq!(state.latch().remaining(), 0);
    slot
}

#[test]
fn test_crossing_object_triggers_once() {
    // First frame is consumed as the background
    let mut frames = vec![background()];
    frames.extend(crossing());
    let slot = run_channel(frames, 5.0, true);
    assert_eq!(slot.trigger_count(), 1);
}

#[test]
fn test_pending_trigger_outlives_channel() {
    let mut frames = vec![background()];
    frames.extend(crossing());
    let slot = run_channel(frames, 5.0, true);

    assert!(!slot.is_live());
    let frame = slot.take_triggered().expect("trigger was lost when the channel stopped");
    assert_eq!(frame.camera, 0);
    assert!(slot.take_triggered().is_none());
}

#[test]
fn test_cooldown_suppresses_second_crossing() {
    let mut frames = vec![background()];
    frames.extend(crossing());
    frames.extend(crossing());
    let slot = run_channel(frames, 5.0, true);
    assert_eq!(slot.trigger_count(), 1);
}

#[test]
fn test_crossings_outside_cooldown_both_trigger() {
    let mut frames = vec![background()];
    frames.extend(crossing());
    frames.extend(crossing());
    let slot = run_channel(frames, 0.0, true);
    assert_eq!(slot.trigger_count(), 2);
}

#[test]
fn test_no_trigger_before_system_ready() {
    let mut frames = vec![background()];
    frames.extend(crossing());
    let slot = run_channel(frames, 0.0, false);
    assert_eq!(slot.trigger_count(), 0);
}

#[test]
fn test_static_scene_never_triggers() {
    let frames = vec![background(); 6];
    let slot = run_channel(frames, 0.0, true);
    assert_eq!(slot.trigger_count(), 0);
}

#[test]
fn test_open_failure_releases_latch_and_count() {
    let config = create_test_config(5.0);
    let state = PipelineState::new(1, 70.0);
    let slot = Arc::new(ChannelSlot::new());
    let channel = CameraChannel::new(
        0,
        ChannelSettings::from_config(&config, 0).unwrap(),
        Arc::clone(&state),
        Arc::clone(&slot),
        Arc::new(SyntheticOpener::new()),
        None,
    );

    let handle = channel.spawn(state.latch().guard()).unwrap();
    assert!(state.latch().wait_timeout(Duration::from_secs(2)));
    handle.join().unwrap();

    assert_eq!(state.active_cameras(), 0);
    assert!(state.all_done());
    assert!(!slot.is_live());
    assert!(slot.take_triggered().is_none());
}

#[test]
fn test_per_camera_overrides() {
    let mut config = BeltgateConfig::default();
    config.cameras.channels[1].motion = Some(crate::config::ToneTolerance {
        luminance_percent: 20.0,
        color_percent: [1.0, 2.0, 3.0],
    });
    let first = ChannelSettings::from_config(&config, 0).unwrap();
    let second = ChannelSettings::from_config(&config, 1).unwrap();
    let third = ChannelSettings::from_config(&config, 2).unwrap();

    assert_eq!(first.motion, config.detection.motion);
    assert_eq!(second.motion.luminance_percent, 20.0);
    assert_eq!(third.difference_threshold, 5.0);
    assert_eq!(third.device, 4);
    assert!(ChannelSettings::from_config(&config, 3).is_none());
}
