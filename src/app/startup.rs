use super::orchestrator::{build_params, default_composer, request_shutdown};
use super::{ComponentState, NodeOrchestrator, ShutdownReason};
use crate::compose::LaunchConfiguration;
use crate::config::SupervisorConfig;
use crate::error::Result;
use crate::events::{log_events, EventFilter, EventReceiver, SupervisorEvent};
use crate::lifecycle::ProcessState;
use tracing::{debug, error, info};

impl NodeOrchestrator {
    /// Initialize all system components
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing supervisor for node {}", self.node.name());

        let mut states = self.component_states.lock().await;
        states.insert("node".to_string(), ComponentState::Stopped);
        states.insert("health_monitor".to_string(), ComponentState::Stopped);
        drop(states);

        // lifecycle events end up in the log
        let receiver = EventReceiver::new(&self.event_bus, EventFilter::All, "log");
        let token = self.cancellation_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = log_events(receiver) => {}
            }
        });

        Ok(())
    }

    /// Configure and launch the node, then start health monitoring
    ///
    /// Configuration and secrets errors surface here, before anything is spawned.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting node {}", self.node.name());
        self.set_component_state("node", ComponentState::Starting)
            .await;

        let launched = async {
            let params = build_params(&self.config)?;
            self.node.configure(params).await?;
            self.node.start().await
        }
        .await;

        let pid = match launched {
            Ok(pid) => pid,
            Err(e) => {
                self.set_component_state("node", ComponentState::Failed)
                    .await;
                error!("Failed to launch node {}: {}", self.node.name(), e);
                return Err(e);
            }
        };
        self.set_component_state("node", ComponentState::Running)
            .await;
        info!("Node {} running with pid {}", self.node.name(), pid);

        self.monitor.register(self.node.clone());
        self.monitor.start();
        self.set_component_state("health_monitor", ComponentState::Running)
            .await;

        self.watch_for_removal();
        Ok(())
    }

    /// Shut the application down once the node reached `Removed`
    fn watch_for_removal(&self) {
        let mut receiver = EventReceiver::new(
            &self.event_bus,
            EventFilter::EventTypes(vec!["state_changed"]),
            "removal",
        );
        let sender = self.shutdown_sender.clone();
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = receiver.recv() => event,
                };
                match event {
                    Ok(SupervisorEvent::StateChanged {
                        to: ProcessState::Removed,
                        ..
                    }) => {
                        request_shutdown(&sender, ShutdownReason::NodeRemoved).await;
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Removal watcher stopped: {}", e);
                        break;
                    }
                }
            }
        });
    }
}

/// Compose the launch configuration without touching the filesystem or spawning anything
pub fn dry_run(config: &SupervisorConfig) -> Result<LaunchConfiguration> {
    let composer = default_composer(config)?;
    let params = build_params(config)?;
    Ok(composer.compose(&params)?)
}
