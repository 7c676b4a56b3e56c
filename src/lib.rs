pub mod classification;
pub mod config;
pub mod detector;
pub mod error;
pub mod events;
pub mod extractor;
pub mod frame;
pub mod hub;
pub mod models;
pub mod session;

#[cfg(feature = "server")]
pub mod app;

#[cfg(feature = "server")]
pub mod server;

pub use classification::{
    ClassificationRecord, ClassificationRouter, GeminiClient, MockReasoningService,
    ReasoningService, Strategy, WasteCategory,
};
pub use config::SortyxConfig;
pub use detector::{PresenceDetector, PresenceResult};
pub use error::{Result, SortyxError};
pub use events::{EventFilter, HubEvent, Observer};
pub use extractor::{CroppedRegion, RegionExtractor};
pub use frame::{Frame, Rect};
pub use hub::{BinLevel, BinStatus, SensorReading, StatsSnapshot, TelemetryHub};
pub use models::{MockModelBackend, ModelAvailability, ModelRegistry, RemoteModelBackend};
pub use session::{ScanOutcome, ScanPipeline, SessionManager, SessionState};

#[cfg(feature = "server")]
pub use app::{ComponentState, ShutdownReason, SortyxOrchestrator};

#[cfg(feature = "server")]
pub use server::{ApiServer, ApiServerBuilder};
