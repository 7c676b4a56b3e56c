use super::types::{ComponentState, ShutdownReason};
use crate::classification::{GeminiClient, MockReasoningService, ReasoningService};
use crate::config::SortyxConfig;
use crate::error::{ClassificationError, Result, SortyxError};
use crate::hub::TelemetryHub;
use crate::models::{MockModelBackend, ModelBackend, ModelRegistry, RemoteModelBackend};
use crate::server::{ApiServer, ApiServerBuilder};
use crate::session::{ScanPipeline, SessionManager, SystemClock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Main application coordinator that wires models, hub, sessions and the API server
pub struct SortyxOrchestrator {
    pub(super) config: SortyxConfig,
    pub(super) registry: Arc<ModelRegistry>,
    pub(super) hub: TelemetryHub,
    pub(super) sessions: Arc<SessionManager>,
    pub(super) server: Arc<ApiServer>,

    // Background tasks
    pub(super) hub_task: Option<JoinHandle<()>>,
    pub(super) server_task: Option<JoinHandle<Result<()>>>,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl SortyxOrchestrator {
    /// Create an orchestrator over explicit model and reasoning backends
    pub async fn new(
        config: SortyxConfig,
        backend: Arc<dyn ModelBackend>,
        reasoning: Arc<dyn ReasoningService>,
    ) -> Result<Self> {
        let cancellation_token = CancellationToken::new();
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        let registry = Arc::new(ModelRegistry::new(
            backend,
            config.models.max_concurrent_inference,
        ));

        let (hub, hub_task) = TelemetryHub::spawn(&config.hub, cancellation_token.child_token());

        let pipeline = Arc::new(ScanPipeline::new(
            &config,
            Arc::clone(&registry),
            reasoning,
            hub.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            pipeline,
            &config,
            Arc::new(SystemClock),
        ));

        let server = ApiServerBuilder::new()
            .config(config.server.clone())
            .sessions(Arc::clone(&sessions))
            .jpeg_quality(config.extractor.jpeg_quality)
            .shutdown(cancellation_token.child_token())
            .build()?;

        Ok(Self {
            config,
            registry,
            hub,
            sessions,
            server: Arc::new(server),
            hub_task: Some(hub_task),
            server_task: None,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token,
        })
    }

    /// Create an orchestrator with the backends named by the configuration.
    ///
    /// `mock_models` swaps both the model backend and the reasoning service
    /// for in-process mocks.
    pub async fn from_config(config: SortyxConfig, mock_models: bool) -> Result<Self> {
        let (backend, reasoning): (Arc<dyn ModelBackend>, Arc<dyn ReasoningService>) =
            if mock_models {
                warn!("Using mock model backend and reasoning service");
                (
                    Arc::new(MockModelBackend::new()),
                    Arc::new(MockReasoningService::default()),
                )
            } else {
                let backend =
                    RemoteModelBackend::new(&config.models).map_err(|e| SortyxError::Component {
                        component: "models".to_string(),
                        message: format!("Failed to build inference client: {}", e),
                    })?;
                let reasoning = GeminiClient::new(&config.llm).map_err(ClassificationError::from)?;
                (Arc::new(backend), Arc::new(reasoning))
            };

        info!(
            "Model backend ready, reasoning service configured: {}",
            reasoning.is_configured()
        );
        Self::new(config, backend, reasoning).await
    }

    pub fn config(&self) -> &SortyxConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn hub(&self) -> &TelemetryHub {
        &self.hub
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn server(&self) -> &Arc<ApiServer> {
        &self.server
    }
}
