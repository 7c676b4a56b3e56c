use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::classification::Strategy;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SortyxConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub detector: DetectorConfig,
    pub extractor: ExtractorConfig,
    pub router: RouterConfig,
    pub llm: LlmConfig,
    pub session: SessionConfig,
    pub hub: HubConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// IP address to bind to
    #[serde(default = "default_server_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Allow cross-origin requests from any origin
    #[serde(default = "default_permissive_cors")]
    pub permissive_cors: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelsConfig {
    /// Base URL of the inference backend serving the vision models
    #[serde(default = "default_inference_url")]
    pub inference_url: String,

    /// Pose/keypoint model name
    #[serde(default = "default_pose_model")]
    pub pose_model: String,

    /// Object detection model name
    #[serde(default = "default_detection_model")]
    pub detection_model: String,

    /// Item classification model name
    #[serde(default = "default_classification_model")]
    pub classification_model: String,

    /// Per-request timeout against the inference backend
    #[serde(default = "default_inference_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Maximum inference calls in flight across all sessions
    #[serde(default = "default_max_concurrent_inference")]
    pub max_concurrent_inference: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DetectorConfig {
    /// Minimum wrist keypoint confidence for a hand candidate
    #[serde(default = "default_wrist_confidence")]
    pub wrist_confidence_threshold: f32,

    /// Below this elbow confidence the forearm direction uses the shoulder
    #[serde(default = "default_elbow_confidence")]
    pub elbow_confidence_threshold: f32,

    /// Minimum object detection confidence
    #[serde(default = "default_object_confidence")]
    pub object_confidence_threshold: f32,

    /// Minimum IoU between the object box and the wrist neighborhood
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,

    /// Fraction of the forearm vector to extend past the wrist
    #[serde(default = "default_hand_extension")]
    pub hand_extension: f32,

    /// Half-size of the square wrist neighborhood in pixels
    #[serde(default = "default_neighborhood_half_size")]
    pub neighborhood_half_size: f32,

    /// Detection time budget
    #[serde(default = "default_detector_timeout_ms")]
    pub timeout_ms: u64,

    /// Longest side of a normalized frame
    #[serde(default = "default_max_frame_dimension")]
    pub max_frame_dimension: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExtractorConfig {
    /// Crop padding as a fraction of the region width/height
    #[serde(default = "default_margin_fraction")]
    pub margin_fraction: f32,

    /// JPEG quality of re-encoded crops
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RouterConfig {
    /// Strategy used when a request does not pick one
    #[serde(default = "default_strategy")]
    pub default_strategy: Strategy,

    /// Model results below this confidence trigger the fallback policy
    #[serde(default = "default_min_acceptance")]
    pub min_acceptance_confidence: f32,

    /// Retry low-confidence model results with the LLM strategy
    #[serde(default = "default_fallback_enabled")]
    pub fallback_enabled: bool,

    /// Confidence multiplier for category text that maps to no known category
    #[serde(default = "default_unrecognized_penalty")]
    pub unrecognized_penalty: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    /// API key; falls back to GEMINI_API_KEY when unset
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL of the generative API
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// Model names tried in order
    #[serde(default = "default_llm_models")]
    pub models: Vec<String>,

    /// Timeout for one reasoning call, all model attempts included
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,

    #[serde(default = "default_llm_max_output_tokens")]
    pub max_output_tokens: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    /// Delay between session start and the first accepted frame
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,

    /// Minimum spacing between accepted frames while scanning
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Presence confidence needed to confirm an object in hand
    #[serde(default = "default_presence_confidence")]
    pub presence_confidence_threshold: f32,

    /// Hard bound on the Classifying phase
    #[serde(default = "default_classifying_timeout_ms")]
    pub classifying_timeout_ms: u64,

    /// How long a result stays on display
    #[serde(default = "default_display_duration_ms")]
    pub display_duration_ms: u64,

    /// Pause after the display period before scanning resumes
    #[serde(default = "default_reset_delay_ms")]
    pub reset_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HubConfig {
    /// Broadcast capacity per observer
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Command queue capacity of the hub actor
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,

    /// Fill level at which a bin reports `warning`
    #[serde(default = "default_warning_level")]
    pub warning_level: f32,

    /// Fill level at which a bin reports `full`
    #[serde(default = "default_full_level")]
    pub full_level: f32,
}

impl SortyxConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("sortyx.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("server.ip", default_server_ip())?
            .set_default("server.port", default_server_port())?
            .set_default("server.permissive_cors", default_permissive_cors())?
            .set_default("models.inference_url", default_inference_url())?
            .set_default("models.pose_model", default_pose_model())?
            .set_default("models.detection_model", default_detection_model())?
            .set_default("models.classification_model", default_classification_model())?
            .set_default("models.request_timeout_ms", default_inference_timeout_ms())?
            .set_default(
                "models.max_concurrent_inference",
                default_max_concurrent_inference() as i64,
            )?
            .set_default(
                "detector.wrist_confidence_threshold",
                default_wrist_confidence() as f64,
            )?
            .set_default(
                "detector.elbow_confidence_threshold",
                default_elbow_confidence() as f64,
            )?
            .set_default(
                "detector.object_confidence_threshold",
                default_object_confidence() as f64,
            )?
            .set_default("detector.iou_threshold", default_iou_threshold() as f64)?
            .set_default("detector.hand_extension", default_hand_extension() as f64)?
            .set_default(
                "detector.neighborhood_half_size",
                default_neighborhood_half_size() as f64,
            )?
            .set_default("detector.timeout_ms", default_detector_timeout_ms())?
            .set_default("detector.max_frame_dimension", default_max_frame_dimension())?
            .set_default("extractor.margin_fraction", default_margin_fraction() as f64)?
            .set_default("extractor.jpeg_quality", default_jpeg_quality() as i64)?
            .set_default("router.default_strategy", "model")?
            .set_default(
                "router.min_acceptance_confidence",
                default_min_acceptance() as f64,
            )?
            .set_default("router.fallback_enabled", default_fallback_enabled())?
            .set_default(
                "router.unrecognized_penalty",
                default_unrecognized_penalty() as f64,
            )?
            .set_default("llm.endpoint", default_llm_endpoint())?
            .set_default("llm.models", default_llm_models())?
            .set_default("llm.timeout_ms", default_llm_timeout_ms())?
            .set_default("llm.temperature", default_llm_temperature() as f64)?
            .set_default("llm.max_output_tokens", default_llm_max_output_tokens())?
            .set_default("session.startup_delay_ms", default_startup_delay_ms())?
            .set_default("session.poll_interval_ms", default_poll_interval_ms())?
            .set_default(
                "session.presence_confidence_threshold",
                default_presence_confidence() as f64,
            )?
            .set_default(
                "session.classifying_timeout_ms",
                default_classifying_timeout_ms(),
            )?
            .set_default("session.display_duration_ms", default_display_duration_ms())?
            .set_default("session.reset_delay_ms", default_reset_delay_ms())?
            .set_default("hub.event_capacity", default_event_capacity() as i64)?
            .set_default("hub.command_capacity", default_command_capacity() as i64)?
            .set_default("hub.warning_level", default_warning_level() as f64)?
            .set_default("hub.full_level", default_full_level() as f64)?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // SORTYX_SESSION__POLL_INTERVAL_MS=250
            .add_source(
                Environment::with_prefix("SORTYX")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let mut config: SortyxConfig = settings.try_deserialize()?;

        if config.llm.api_key.is_none() {
            config.llm.api_key = std::env::var("GEMINI_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty());
        }

        info!("Configuration loaded successfully");
        debug!(
            "Final configuration (api key {}): {:#?}",
            if config.llm.api_key.is_some() { "set" } else { "unset" },
            config.redacted()
        );

        Ok(config)
    }

    /// Copy of this configuration safe to print
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.llm.api_key.is_some() {
            copy.llm.api_key = Some("***".to_string());
        }
        copy
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit_thresholds = [
            (
                "detector.wrist_confidence_threshold",
                self.detector.wrist_confidence_threshold,
            ),
            (
                "detector.elbow_confidence_threshold",
                self.detector.elbow_confidence_threshold,
            ),
            (
                "detector.object_confidence_threshold",
                self.detector.object_confidence_threshold,
            ),
            ("detector.iou_threshold", self.detector.iou_threshold),
            (
                "router.min_acceptance_confidence",
                self.router.min_acceptance_confidence,
            ),
            ("router.unrecognized_penalty", self.router.unrecognized_penalty),
            (
                "session.presence_confidence_threshold",
                self.session.presence_confidence_threshold,
            ),
        ];

        for (name, value) in unit_thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Message(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        if self.extractor.margin_fraction < 0.0 {
            return Err(ConfigError::Message(
                "Extractor margin_fraction must not be negative".to_string(),
            ));
        }

        if self.extractor.jpeg_quality == 0 || self.extractor.jpeg_quality > 100 {
            return Err(ConfigError::Message(
                "Extractor jpeg_quality must be within 1..=100".to_string(),
            ));
        }

        if self.detector.neighborhood_half_size <= 0.0 {
            return Err(ConfigError::Message(
                "Detector neighborhood_half_size must be greater than 0".to_string(),
            ));
        }

        if self.detector.max_frame_dimension == 0 {
            return Err(ConfigError::Message(
                "Detector max_frame_dimension must be greater than 0".to_string(),
            ));
        }

        let timeouts = [
            ("detector.timeout_ms", self.detector.timeout_ms),
            ("models.request_timeout_ms", self.models.request_timeout_ms),
            ("llm.timeout_ms", self.llm.timeout_ms),
            ("session.poll_interval_ms", self.session.poll_interval_ms),
            (
                "session.classifying_timeout_ms",
                self.session.classifying_timeout_ms,
            ),
        ];

        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::Message(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if self.llm.models.is_empty() {
            return Err(ConfigError::Message(
                "At least one llm model must be configured".to_string(),
            ));
        }

        if self.models.max_concurrent_inference == 0 {
            return Err(ConfigError::Message(
                "Max concurrent inference must be greater than 0".to_string(),
            ));
        }

        if self.hub.event_capacity == 0 || self.hub.command_capacity == 0 {
            return Err(ConfigError::Message(
                "Hub capacities must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=100.0).contains(&self.hub.warning_level)
            || !(0.0..=100.0).contains(&self.hub.full_level)
            || self.hub.warning_level > self.hub.full_level
        {
            return Err(ConfigError::Message(
                "Hub levels must satisfy 0 <= warning_level <= full_level <= 100".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for SortyxConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                ip: default_server_ip(),
                port: default_server_port(),
                permissive_cors: default_permissive_cors(),
            },
            models: ModelsConfig {
                inference_url: default_inference_url(),
                pose_model: default_pose_model(),
                detection_model: default_detection_model(),
                classification_model: default_classification_model(),
                request_timeout_ms: default_inference_timeout_ms(),
                max_concurrent_inference: default_max_concurrent_inference(),
            },
            detector: DetectorConfig {
                wrist_confidence_threshold: default_wrist_confidence(),
                elbow_confidence_threshold: default_elbow_confidence(),
                object_confidence_threshold: default_object_confidence(),
                iou_threshold: default_iou_threshold(),
                hand_extension: default_hand_extension(),
                neighborhood_half_size: default_neighborhood_half_size(),
                timeout_ms: default_detector_timeout_ms(),
                max_frame_dimension: default_max_frame_dimension(),
            },
            extractor: ExtractorConfig {
                margin_fraction: default_margin_fraction(),
                jpeg_quality: default_jpeg_quality(),
            },
            router: RouterConfig {
                default_strategy: default_strategy(),
                min_acceptance_confidence: default_min_acceptance(),
                fallback_enabled: default_fallback_enabled(),
                unrecognized_penalty: default_unrecognized_penalty(),
            },
            llm: LlmConfig {
                api_key: None,
                endpoint: default_llm_endpoint(),
                models: default_llm_models(),
                timeout_ms: default_llm_timeout_ms(),
                temperature: default_llm_temperature(),
                max_output_tokens: default_llm_max_output_tokens(),
            },
            session: SessionConfig {
                startup_delay_ms: default_startup_delay_ms(),
                poll_interval_ms: default_poll_interval_ms(),
                presence_confidence_threshold: default_presence_confidence(),
                classifying_timeout_ms: default_classifying_timeout_ms(),
                display_duration_ms: default_display_duration_ms(),
                reset_delay_ms: default_reset_delay_ms(),
            },
            hub: HubConfig {
                event_capacity: default_event_capacity(),
                command_capacity: default_command_capacity(),
                warning_level: default_warning_level(),
                full_level: default_full_level(),
            },
        }
    }
}

// Default value functions
fn default_server_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_server_port() -> u16 {
    8000
}
fn default_permissive_cors() -> bool {
    true
}

fn default_inference_url() -> String {
    "http://127.0.0.1:9100".to_string()
}
fn default_pose_model() -> String {
    "yolov8n-pose".to_string()
}
fn default_detection_model() -> String {
    "yolov8n".to_string()
}
fn default_classification_model() -> String {
    "waste-classifier".to_string()
}
fn default_inference_timeout_ms() -> u64 {
    2000
}
fn default_max_concurrent_inference() -> usize {
    4
}

fn default_wrist_confidence() -> f32 {
    0.30
}
fn default_elbow_confidence() -> f32 {
    0.20
}
fn default_object_confidence() -> f32 {
    0.30
}
fn default_iou_threshold() -> f32 {
    0.10
}
fn default_hand_extension() -> f32 {
    0.35
}
fn default_neighborhood_half_size() -> f32 {
    120.0
}
fn default_detector_timeout_ms() -> u64 {
    300
}
fn default_max_frame_dimension() -> u32 {
    1280
}

fn default_margin_fraction() -> f32 {
    0.10
}
fn default_jpeg_quality() -> u8 {
    90
}

fn default_strategy() -> Strategy {
    Strategy::Model
}
fn default_min_acceptance() -> f32 {
    0.6
}
fn default_fallback_enabled() -> bool {
    true
}
fn default_unrecognized_penalty() -> f32 {
    0.5
}

fn default_llm_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_llm_models() -> Vec<String> {
    vec!["gemini-2.0-flash".to_string(), "gemini-2.5-flash".to_string()]
}
fn default_llm_timeout_ms() -> u64 {
    8000
}
fn default_llm_temperature() -> f32 {
    0.4
}
fn default_llm_max_output_tokens() -> u32 {
    1024
}

fn default_startup_delay_ms() -> u64 {
    1000
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_presence_confidence() -> f32 {
    0.30
}
fn default_classifying_timeout_ms() -> u64 {
    12000
}
fn default_display_duration_ms() -> u64 {
    3000
}
fn default_reset_delay_ms() -> u64 {
    1000
}

fn default_event_capacity() -> usize {
    256
}
fn default_command_capacity() -> usize {
    256
}
fn default_warning_level() -> f32 {
    70.0
}
fn default_full_level() -> f32 {
    90.0
}
