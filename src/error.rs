use thiserror::Error;

#[derive(Error, Debug)]
pub enum BeltgateError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Actuator error: {0}")]
    Actuator(#[from] ActuatorError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Control plane error: {0}")]
    Control(#[from] ControlError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("No camera could be opened")]
    NoActiveCameras,

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl BeltgateError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera device {device}: {details}")]
    DeviceOpen { device: u32, details: String },

    #[error("Camera configuration failed: {details}")]
    Configuration { details: String },

    #[error("Frame read failed on camera {camera}: {details}")]
    Read { camera: u8, details: String },

    #[error("Camera support is not compiled into this build")]
    Unavailable,
}

#[derive(Error, Debug)]
pub enum ActuatorError {
    #[error("Serial port {port} could not be opened: {source}")]
    Open {
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serial port is not open")]
    NotConnected,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Serial write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("Serial read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("No response from device within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Inference request failed: {details}")]
    Request { details: String },

    #[error("Malformed inference response: {details}")]
    Response { details: String },

    #[error("Failed to encode frame for inference: {details}")]
    Encode { details: String },
}

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Failed to bind control server to {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Control server failed: {details}")]
    Serve { details: String },
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("POST {url} failed: {details}")]
    Request { url: String, details: String },

    #[error("Failed to encode report body: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BeltgateError>;
