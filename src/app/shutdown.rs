use super::{ComponentState, NodeOrchestrator};
use crate::error::{Result, SupervisorError};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

/// Extra time granted on top of the configured stop and drain timeouts
const STOP_MARGIN: Duration = Duration::from_secs(5);

impl NodeOrchestrator {
    /// Stop health monitoring, then the node
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        self.cancellation_token.cancel();

        let mut exit_code = 0;

        let monitor = self.monitor.clone();
        if let Err(e) = self
            .stop_component("health_monitor", STOP_MARGIN, async move {
                monitor.shutdown().await;
                Ok(())
            })
            .await
        {
            error!("Error stopping health monitor: {}", e);
            exit_code = 1;
        }

        let node = self.node.clone();
        let node_timeout = self.config.stop_timeout() + self.config.drain_timeout() + STOP_MARGIN;
        if let Err(e) = self
            .stop_component("node", node_timeout, async move {
                node.stop().await.map(|_| ())
            })
            .await
        {
            error!("Error stopping node: {}", e);
            exit_code = 1;
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    /// Stop one component within `limit`, tracking its state
    async fn stop_component<F>(&self, component: &str, limit: Duration, stop: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        info!("Stopping {} component", component);
        self.set_component_state(component, ComponentState::Stopping)
            .await;

        match timeout(limit, stop).await {
            Ok(Ok(())) => {
                self.set_component_state(component, ComponentState::Stopped)
                    .await;
                info!("{} component stopped", component);
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                error!("Error stopping {} component: {}", component, e);
                Err(e)
            }
            Err(_) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                error!("{} component stop timeout", component);
                Err(SupervisorError::component(
                    component.to_string(),
                    "stop timeout".to_string(),
                ))
            }
        }
    }
}
