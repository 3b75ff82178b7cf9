use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Maximum number of cameras the gate housing carries
pub const MAX_CAMERAS: usize = 3;

/// Upper bound for the cooldown and startup delay, in seconds
pub const MAX_DELAY_SECONDS: f64 = 3600.0;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct BeltgateConfig {
    #[serde(default)]
    pub cameras: CamerasConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub actuator: ActuatorConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub control: ControlConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CamerasConfig {
    /// Capture resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Capture frames per second
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// Usable x-span when no belt guide lines are found
    #[serde(default = "default_fallback_span")]
    pub fallback_span: (u32, u32),

    /// One entry per physical camera, in camera-id order
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChannelConfig {
    /// V4L2 device index (e.g. 2 for /dev/video2)
    pub device: u32,

    /// Percentage of changed pixels above which motion is reported
    #[serde(default = "default_difference_threshold")]
    pub difference_threshold: f64,

    /// Per-camera override of the background tone tolerance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<ToneTolerance>,

    /// Per-camera override of the frame-to-frame motion tolerance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion: Option<ToneTolerance>,
}

/// Ratio test tolerances, both expressed in percent
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct ToneTolerance {
    /// Allowed deviation of the average channel ratio from 1.0
    pub luminance_percent: f64,
    /// Allowed deviation of each channel ratio (R, G, B) from the average ratio
    pub color_percent: [f64; 3],
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DetectionConfig {
    /// Minimum time between two accepted triggers on one camera
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: f64,

    /// Delay after start before any trigger is honoured
    #[serde(default = "default_startup_delay_seconds")]
    pub startup_delay_seconds: f64,

    /// Tolerance used to paint background-toned pixels white
    #[serde(default = "default_tone_tolerance")]
    pub tone: ToneTolerance,

    /// Tolerance used when comparing consecutive normalized frames
    #[serde(default = "default_motion_tolerance")]
    pub motion: ToneTolerance,

    /// Side of the square window sampled for the reference colour
    #[serde(default = "default_reference_window")]
    pub reference_window: u32,

    #[serde(default)]
    pub edges: EdgeConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EdgeConfig {
    #[serde(default = "default_canny_low")]
    pub canny_low: f32,
    #[serde(default = "default_canny_high")]
    pub canny_high: f32,
    /// Minimum Hough accumulator votes for a line
    #[serde(default = "default_vote_threshold")]
    pub vote_threshold: u32,
    #[serde(default = "default_suppression_radius")]
    pub suppression_radius: u32,
    /// Maximum |dx| / |dy| for a line to count as vertical
    #[serde(default = "default_slope_tolerance")]
    pub slope_tolerance: f64,
    /// Lines whose midpoints are closer than this (px) are grouped
    #[serde(default = "default_merge_tolerance")]
    pub merge_tolerance: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PipelineConfig {
    /// Capacity of every inter-stage queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Input size expected by the inference model (width, height)
    #[serde(default = "default_inference_resolution")]
    pub inference_resolution: (u32, u32),

    /// Coordinator polling period
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on waiting for all cameras to come up
    #[serde(default = "default_bringup_timeout_seconds")]
    pub bringup_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DecisionConfig {
    /// Minimum batch score for acceptance (live-tunable)
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Servo angle that opens the gate
    #[serde(default = "default_accept_angle")]
    pub accept_angle: u8,

    /// Servo angle that closes the gate
    #[serde(default = "default_reject_angle")]
    pub reject_angle: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct InferenceConfig {
    /// Endpoint accepting a JPEG body and answering with a detection list
    #[serde(default = "default_inference_url")]
    pub url: String,

    #[serde(default = "default_inference_timeout_ms")]
    pub timeout_ms: u64,

    /// Class-id to label table; labels follow `<product>_<result>`
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ActuatorConfig {
    /// Serial device of the gate controller
    #[serde(default = "default_actuator_port")]
    pub port: String,

    /// Time to wait for a reply line
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Time the controller needs after the port opens (it resets on open)
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReportingConfig {
    #[serde(default = "default_backend_host")]
    pub host: String,
    #[serde(default = "default_backend_port")]
    pub port: u16,
    #[serde(default = "default_scans_path")]
    pub scans_path: String,
    #[serde(default = "default_logs_path")]
    pub logs_path: String,
    #[serde(default = "default_status_path")]
    pub status_path: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Period of system status reports
    #[serde(default = "default_status_interval_seconds")]
    pub status_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MonitorConfig {
    /// Publish raw frames to the remote monitor over UDP
    #[serde(default = "default_monitor_enabled")]
    pub enabled: bool,
    #[serde(default = "default_monitor_host")]
    pub host: String,
    #[serde(default = "default_monitor_port")]
    pub port: u16,
    #[serde(default = "default_monitor_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ControlConfig {
    /// IP address to bind to
    #[serde(default = "default_control_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_control_port")]
    pub port: u16,
}

impl BeltgateConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("beltgate.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("decision.threshold", default_threshold())?
            .set_default("pipeline.queue_capacity", default_queue_capacity() as i64)?
            .set_default("detection.cooldown_seconds", default_cooldown_seconds())?
            .set_default(
                "detection.startup_delay_seconds",
                default_startup_delay_seconds(),
            )?
            .set_default("control.ip", default_control_ip())?
            .set_default("control.port", default_control_port())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables, e.g. BELTGATE_DECISION__THRESHOLD=80
            .add_source(
                Environment::with_prefix("BELTGATE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: BeltgateConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let camera_count = self.cameras.channels.len();
        if camera_count == 0 || camera_count > MAX_CAMERAS {
            return Err(ConfigError::Message(format!(
                "Between 1 and {} camera channels must be configured, got {}",
                MAX_CAMERAS, camera_count
            )));
        }

        if self.cameras.resolution.0 == 0 || self.cameras.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.cameras.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        if self.cameras.fallback_span.0 >= self.cameras.fallback_span.1 {
            return Err(ConfigError::Message(
                "Fallback span must have left < right".to_string(),
            ));
        }

        for (id, channel) in self.cameras.channels.iter().enumerate() {
            if !is_percentage(channel.difference_threshold) {
                return Err(ConfigError::Message(format!(
                    "Camera {} difference_threshold must be within 0..=100",
                    id
                )));
            }
            for tolerance in channel.tone.iter().chain(channel.motion.iter()) {
                validate_tolerance(tolerance)?;
            }
        }

        validate_tolerance(&self.detection.tone)?;
        validate_tolerance(&self.detection.motion)?;

        if !is_delay(self.detection.cooldown_seconds) {
            return Err(ConfigError::Message(format!(
                "Cooldown must be between 0 and {} seconds",
                MAX_DELAY_SECONDS
            )));
        }

        if !is_delay(self.detection.startup_delay_seconds) {
            return Err(ConfigError::Message(format!(
                "Startup delay must be between 0 and {} seconds",
                MAX_DELAY_SECONDS
            )));
        }

        if self.detection.reference_window == 0 {
            return Err(ConfigError::Message(
                "Reference window must be greater than 0".to_string(),
            ));
        }

        if self.pipeline.queue_capacity == 0 {
            return Err(ConfigError::Message(
                "Queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.pipeline.inference_resolution.0 == 0 || self.pipeline.inference_resolution.1 == 0
        {
            return Err(ConfigError::Message(
                "Inference resolution must be greater than 0".to_string(),
            ));
        }

        if !self.decision.threshold.is_finite() {
            return Err(ConfigError::Message(
                "Decision threshold must be a finite number".to_string(),
            ));
        }

        if self.decision.accept_angle > 180 || self.decision.reject_angle > 180 {
            return Err(ConfigError::Message(
                "Servo angles must be within 0..=180".to_string(),
            ));
        }

        if self.monitor.jpeg_quality == 0 || self.monitor.jpeg_quality > 100 {
            return Err(ConfigError::Message(
                "Monitor JPEG quality must be within 1..=100".to_string(),
            ));
        }

        Ok(())
    }
}

impl DetectionConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_seconds)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs_f64(self.startup_delay_seconds)
    }
}

impl ReportingConfig {
    /// Full URL for a backend path
    pub fn url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, path)
    }
}

fn is_percentage(value: f64) -> bool {
    value.is_finite() && (0.0..=100.0).contains(&value)
}

fn is_delay(seconds: f64) -> bool {
    seconds.is_finite() && (0.0..=MAX_DELAY_SECONDS).contains(&seconds)
}

fn validate_tolerance(tolerance: &ToneTolerance) -> Result<(), ConfigError> {
    let valid = tolerance.luminance_percent.is_finite()
        && tolerance.luminance_percent >= 0.0
        && tolerance
            .color_percent
            .iter()
            .all(|c| c.is_finite() && *c >= 0.0);
    if valid {
        Ok(())
    } else {
        Err(ConfigError::Message(
            "Tone tolerances must be non-negative finite percentages".to_string(),
        ))
    }
}

impl Default for CamerasConfig {
    fn default() -> Self {
        Self {
            resolution: default_camera_resolution(),
            fps: default_camera_fps(),
            fallback_span: default_fallback_span(),
            channels: default_channels(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: default_cooldown_seconds(),
            startup_delay_seconds: default_startup_delay_seconds(),
            tone: default_tone_tolerance(),
            motion: default_motion_tolerance(),
            reference_window: default_reference_window(),
            edges: EdgeConfig::default(),
        }
    }
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            canny_low: default_canny_low(),
            canny_high: default_canny_high(),
            vote_threshold: default_vote_threshold(),
            suppression_radius: default_suppression_radius(),
            slope_tolerance: default_slope_tolerance(),
            merge_tolerance: default_merge_tolerance(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            inference_resolution: default_inference_resolution(),
            poll_interval_ms: default_poll_interval_ms(),
            bringup_timeout_seconds: default_bringup_timeout_seconds(),
        }
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            accept_angle: default_accept_angle(),
            reject_angle: default_reject_angle(),
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            url: default_inference_url(),
            timeout_ms: default_inference_timeout_ms(),
            labels: default_labels(),
        }
    }
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            port: default_actuator_port(),
            response_timeout_ms: default_response_timeout_ms(),
            settle_ms: default_settle_ms(),
        }
    }
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            host: default_backend_host(),
            port: default_backend_port(),
            scans_path: default_scans_path(),
            logs_path: default_logs_path(),
            status_path: default_status_path(),
            request_timeout_ms: default_request_timeout_ms(),
            status_interval_seconds: default_status_interval_seconds(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: default_monitor_enabled(),
            host: default_monitor_host(),
            port: default_monitor_port(),
            jpeg_quality: default_monitor_quality(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            ip: default_control_ip(),
            port: default_control_port(),
        }
    }
}

// Default value functions
fn default_camera_resolution() -> (u32, u32) {
    (640, 480)
}
fn default_camera_fps() -> u32 {
    30
}
fn default_fallback_span() -> (u32, u32) {
    (0, 640)
}
fn default_channels() -> Vec<ChannelConfig> {
    vec![
        ChannelConfig {
            device: 0,
            difference_threshold: 10.0,
            tone: None,
            motion: None,
        },
        ChannelConfig {
            device: 2,
            difference_threshold: 10.0,
            tone: None,
            motion: None,
        },
        ChannelConfig {
            device: 4,
            difference_threshold: 5.0,
            tone: None,
            motion: None,
        },
    ]
}
fn default_difference_threshold() -> f64 {
    10.0
}

fn default_cooldown_seconds() -> f64 {
    5.0
}
fn default_startup_delay_seconds() -> f64 {
    3.0
}
fn default_tone_tolerance() -> ToneTolerance {
    ToneTolerance {
        luminance_percent: 60.0,
        color_percent: [7.0, 7.0, 7.0],
    }
}
fn default_motion_tolerance() -> ToneTolerance {
    ToneTolerance {
        luminance_percent: 10.0,
        color_percent: [5.0, 5.0, 5.0],
    }
}
fn default_reference_window() -> u32 {
    10
}
fn default_canny_low() -> f32 {
    50.0
}
fn default_canny_high() -> f32 {
    150.0
}
fn default_vote_threshold() -> u32 {
    80
}
fn default_suppression_radius() -> u32 {
    8
}
fn default_slope_tolerance() -> f64 {
    0.5
}
fn default_merge_tolerance() -> f64 {
    15.0
}

fn default_queue_capacity() -> usize {
    60
}
fn default_inference_resolution() -> (u32, u32) {
    (640, 640)
}
fn default_poll_interval_ms() -> u64 {
    5
}
fn default_bringup_timeout_seconds() -> u64 {
    15
}

fn default_threshold() -> f64 {
    70.0
}
fn default_accept_angle() -> u8 {
    30
}
fn default_reject_angle() -> u8 {
    150
}

fn default_inference_url() -> String {
    "http://127.0.0.1:9000/infer".to_string()
}
fn default_inference_timeout_ms() -> u64 {
    2000
}
fn default_labels() -> Vec<String> {
    [
        "Apple_Healthy",
        "Apple_Rotten",
        "Banana_Healthy",
        "Banana_Rotten",
        "Orange_Healthy",
        "Orange_Rotten",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_actuator_port() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_response_timeout_ms() -> u64 {
    500
}
fn default_settle_ms() -> u64 {
    2000
}

fn default_backend_host() -> String {
    "127.0.0.1".to_string()
}
fn default_backend_port() -> u16 {
    6060
}
fn default_scans_path() -> String {
    "/api/v1/scans".to_string()
}
fn default_logs_path() -> String {
    "/api/v1/system/logs".to_string()
}
fn default_status_path() -> String {
    "/api/v1/system/info".to_string()
}
fn default_request_timeout_ms() -> u64 {
    2000
}
fn default_status_interval_seconds() -> u64 {
    5
}

fn default_monitor_enabled() -> bool {
    true
}
fn default_monitor_host() -> String {
    "127.0.0.1".to_string()
}
fn default_monitor_port() -> u16 {
    5000
}
fn default_monitor_quality() -> u8 {
    80
}

fn default_control_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_control_port() -> u16 {
    8080
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = BeltgateConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cameras.channels.len(), 3);
        assert_eq!(config.pipeline.queue_capacity, 60);
        assert_eq!(config.detection.cooldown(), Duration::from_secs(5));
        assert_eq!(config.decision.threshold, 70.0);
    }

    #[test]
    fn test_config_validation() {
        let mut config = BeltgateConfig::default();
        config.cameras.resolution = (0, 0);
        assert!(config.validate().is_err());

        config.cameras.resolution = (640, 480);
        assert!(config.validate().is_ok());

        config.cameras.channels.clear();
        assert!(config.validate().is_err());

        config.cameras.channels = default_channels();
        config.decision.reject_angle = 200;
        assert!(config.validate().is_err());

        config.decision.reject_angle = 150;
        config.detection.motion.color_percent = [5.0, -1.0, 5.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_delays_must_be_bounded() {
        let mut config = BeltgateConfig::default();
        for bad in [-1.0, f64::NAN, f64::INFINITY, 1e300, MAX_DELAY_SECONDS + 1.0] {
            config.detection.cooldown_seconds = bad;
            assert!(config.validate().is_err(), "cooldown {} accepted", bad);
        }
        config.detection.cooldown_seconds = MAX_DELAY_SECONDS;
        assert!(config.validate().is_ok());

        for bad in [-0.5, f64::NAN, 1e300] {
            config.detection.startup_delay_seconds = bad;
            assert!(config.validate().is_err(), "startup delay {} accepted", bad);
        }
        config.detection.startup_delay_seconds = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");

        // Keys no other test loads, so parallel tests are unaffected
        std::env::set_var("BELTGATE_REPORTING__PORT", "7171");
        std::env::set_var("BELTGATE_MONITOR__HOST", "10.0.0.9");
        let config = BeltgateConfig::load_from_file(&missing);
        std::env::remove_var("BELTGATE_REPORTING__PORT");
        std::env::remove_var("BELTGATE_MONITOR__HOST");

        let config = config.unwrap();
        assert_eq!(config.reporting.port, 7171);
        assert_eq!(config.monitor.host, "10.0.0.9");
    }

    #[test]
    fn test_too_many_channels_rejected() {
        let mut config = BeltgateConfig::default();
        let extra = config.cameras.channels[0].clone();
        config.cameras.channels.push(extra);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[decision]
threshold = 55.5
accept_angle = 45

[[cameras.channels]]
device = 0
difference_threshold = 12.0

[[cameras.channels]]
device = 2
"#
        )
        .unwrap();

        let config = BeltgateConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.decision.threshold, 55.5);
        assert_eq!(config.decision.accept_angle, 45);
        assert_eq!(config.decision.reject_angle, 150);
        assert_eq!(config.cameras.channels.len(), 2);
        assert_eq!(config.cameras.channels[0].difference_threshold, 12.0);
        assert_eq!(config.cameras.channels[1].difference_threshold, 10.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let rendered = toml::to_string_pretty(&BeltgateConfig::default()).unwrap();
        let parsed: BeltgateConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.cameras.channels.len(), 3);
        assert_eq!(parsed.detection.tone, default_tone_tolerance());
    }

    #[test]
    fn test_reporting_url() {
        let reporting = ReportingConfig::default();
        assert_eq!(
            reporting.url(&reporting.scans_path),
            "http://127.0.0.1:6060/api/v1/scans"
        );
    }
}
