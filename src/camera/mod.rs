mod channel;
mod edges;
mod monitor;
mod source;
mod tone;
mod trigger;
#[cfg(test)]
mod tests;

pub use channel::{CameraChannel, ChannelSettings, ChannelSlot};
pub use edges::{detect_belt_span, BeltSpan};
pub use monitor::UdpMonitor;
pub use source::{
    FrameSource, GstSourceOpener, ScriptEnd, SourceOpener, SyntheticOpener, SyntheticSource,
};
pub use tone::{diff_centroid, reference_mean, white_out, MotionSample, ReferenceColor};
pub use trigger::{is_centered, TriggerGate};
