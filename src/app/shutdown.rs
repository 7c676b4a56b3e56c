use super::{ComponentState, SortyxOrchestrator};
use crate::error::{Result, SortyxError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info};

const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(10);
const HUB_STOP_TIMEOUT: Duration = Duration::from_secs(5);

impl SortyxOrchestrator {
    /// Perform graceful shutdown of all components
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        // Stops the API server, open sockets and the hub actor
        self.cancellation_token.cancel();

        let mut exit_code = 0;

        // Stop components in reverse dependency order
        for component in ["server", "sessions", "hub", "models"] {
            if let Err(e) = self.stop_component(component).await {
                error!("Error stopping {}: {}", component, e);
                exit_code = 1;
            }
        }

        let connections = self.server.state().connections().snapshot();
        info!(
            "Served {} observer connection(s), {} frame(s) over sockets",
            connections.total_connections, connections.frames_received
        );

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    /// Stop a specific component
    async fn stop_component(&mut self, component: &str) -> Result<()> {
        info!("Stopping {} component", component);
        self.set_component_state(component, ComponentState::Stopping)
            .await;

        let result = match component {
            "server" => match self.server_task.take() {
                Some(task) => join_with_timeout(component, task, SERVER_STOP_TIMEOUT)
                    .await
                    .and_then(|served| served),
                None => Ok(()),
            },
            "sessions" => {
                self.sessions.shutdown();
                Ok(())
            }
            "hub" => match self.hub_task.take() {
                Some(task) => join_with_timeout(component, task, HUB_STOP_TIMEOUT).await,
                None => Ok(()),
            },
            "models" => {
                self.registry.shutdown();
                Ok(())
            }
            other => Err(SortyxError::Component {
                component: other.to_string(),
                message: "unknown component".to_string(),
            }),
        };

        match &result {
            Ok(()) => {
                self.set_component_state(component, ComponentState::Stopped)
                    .await;
                info!("{} component stopped", component);
            }
            Err(e) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                error!("Error stopping {} component: {}", component, e);
            }
        }
        result
    }
}

/// Wait for a background task, aborting it when it overruns `limit`
async fn join_with_timeout<T>(component: &str, mut task: JoinHandle<T>, limit: Duration) -> Result<T> {
    match timeout(limit, &mut task).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(SortyxError::Component {
            component: component.to_string(),
            message: format!("task failed: {}", e),
        }),
        Err(_) => {
            task.abort();
            error!("{} component stop timeout", component);
            Err(SortyxError::System {
                message: format!("{} component stop timeout", component),
            })
        }
    }
}
