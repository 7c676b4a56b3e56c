use super::{ComponentState, SortyxOrchestrator};
use crate::error::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

impl SortyxOrchestrator {
    /// Register every component as stopped
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing Sortyx components");

        let mut states = self.component_states.lock().await;
        for component in ["models", "hub", "sessions", "server"] {
            states.insert(component.to_string(), ComponentState::Stopped);
        }
        drop(states);

        info!("All components initialized successfully");
        Ok(())
    }

    /// Load models and start serving.
    ///
    /// Missing models do not abort startup: they leave scans blocked and
    /// show up in `/health` until a reload succeeds.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting Sortyx");

        self.set_component_state("models", ComponentState::Starting)
            .await;
        let availability = self.registry.initialize().await;
        if availability.scans_ready() {
            self.set_component_state("models", ComponentState::Running)
                .await;
        } else {
            warn!(
                "Starting without pose/detection models, scans are blocked until a reload: {:?}",
                availability.errors
            );
            self.set_component_state("models", ComponentState::Degraded)
                .await;
        }

        // The hub actor was spawned with the orchestrator
        let hub_state = match &self.hub_task {
            Some(task) if !task.is_finished() => ComponentState::Running,
            _ => ComponentState::Failed,
        };
        self.set_component_state("hub", hub_state).await;
        self.set_component_state("sessions", ComponentState::Running)
            .await;

        self.set_component_state("server", ComponentState::Starting)
            .await;
        let server = Arc::clone(&self.server);
        self.server_task = Some(tokio::spawn(async move {
            let result = server.start().await;
            if let Err(e) = &result {
                error!("API server error: {}", e);
            }
            result
        }));
        self.set_component_state("server", ComponentState::Running)
            .await;
        info!("API server started on {}", self.server.address());

        info!("Sortyx started successfully");
        Ok(())
    }
}
