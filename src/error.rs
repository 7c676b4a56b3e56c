use thiserror::Error;

#[derive(Error, Debug)]
pub enum SortyxError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Detection error: {0}")]
    Detection(#[from] DetectionError),

    #[error("Region error: {0}")]
    Region(#[from] RegionError),

    #[error("Classification error: {0}")]
    Classification(#[from] ClassificationError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),

    #[error("Hub error: {0}")]
    Hub(#[from] HubError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl SortyxError {
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

/// Errors raised while decoding and normalizing an inbound frame
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Invalid base64 payload: {details}")]
    InvalidEncoding { details: String },

    #[error("Image decode failed: {details}")]
    DecodeFailed { details: String },

    #[error("Image encode failed: {details}")]
    EncodeFailed { details: String },

    #[error("Empty image ({width}x{height})")]
    Empty { width: u32, height: u32 },
}

/// Errors raised by the presence detector and the model backends it calls
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Model unavailable: {model}")]
    ModelUnavailable { model: String },

    #[error("Presence detection exceeded {budget_ms}ms")]
    Timeout { budget_ms: u64 },

    #[error("Inference failed: {details}")]
    Inference { details: String },
}

/// Errors raised by the region extractor
#[derive(Error, Debug)]
pub enum RegionError {
    #[error("Invalid region: {details}")]
    InvalidRegion { details: String },

    #[error("Crop encoding failed: {0}")]
    Encode(#[from] FrameError),
}

/// Errors internal to a classification strategy.
///
/// These never escape the router: they are folded into an `Unknown` record.
#[derive(Error, Debug)]
pub enum ClassificationError {
    #[error("Classifier model unavailable")]
    ModelUnavailable,

    #[error("Classification timed out after {timeout_ms}ms")]
    ClassificationTimeout { timeout_ms: u64 },

    #[error("Classifier inference failed: {details}")]
    Inference { details: String },

    #[error("Reasoning service error: {0}")]
    Reasoning(#[from] ReasoningError),
}

/// Errors from the hosted reasoning service
#[derive(Error, Debug)]
pub enum ReasoningError {
    #[error("Reasoning service not configured")]
    NotConfigured,

    #[error("Reasoning request failed: {details}")]
    Transport { details: String },

    #[error("Reasoning service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed reasoning response: {details}")]
    MalformedResponse { details: String },
}

/// Errors raised by the scan session state machine and session registry
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Session not found: {session_id}")]
    NotFound { session_id: String },

    #[error("Session {session_id} was cancelled")]
    Cancelled { session_id: String },
}

/// Errors raised at the sensor ingestion boundary
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Malformed sensor reading: {details}")]
    MalformedSensorReading { details: String },
}

/// Errors raised by the telemetry hub
#[derive(Error, Debug)]
pub enum HubError {
    #[error("Hub actor is not running")]
    Closed,

    #[error("Observer disconnected")]
    ObserverDisconnected,

    #[error("Observer lagged behind by {missed} events")]
    Lagged { missed: u64 },
}

/// Errors raised by the HTTP/WebSocket boundary
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server startup failed: {details}")]
    StartupFailed { details: String },
}

pub type Result<T> = std::result::Result<T, SortyxError>;
