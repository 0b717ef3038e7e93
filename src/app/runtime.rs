use super::orchestrator::request_shutdown;
use super::{NodeOrchestrator, ShutdownReason};
use crate::error::{Result, SupervisorError};
use tracing::{error, info};

impl NodeOrchestrator {
    /// Run until a signal or the node's removal asks for shutdown
    pub async fn run(&mut self) -> Result<i32> {
        info!("Supervisor is running");

        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| SupervisorError::system("Shutdown receiver already taken"))?;

        self.setup_signal_handlers();

        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| SupervisorError::system("Shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {:?}", shutdown_reason);

        let exit_code = self.shutdown().await?;

        info!("Supervisor shutdown complete");
        Ok(exit_code)
    }

    /// Set up signal handlers for graceful shutdown
    fn setup_signal_handlers(&self) {
        // SIGTERM from the service manager, unix only
        #[cfg(unix)]
        {
            let sender = self.shutdown_sender.clone();
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        if sigterm.recv().await.is_some() {
                            info!("Received SIGTERM signal");
                            request_shutdown(&sender, ShutdownReason::Signal("SIGTERM".to_string()))
                                .await;
                        }
                    }
                    Err(e) => error!("Failed to register SIGTERM handler: {}", e),
                }
            });
        }

        let sender = self.shutdown_sender.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                request_shutdown(&sender, ShutdownReason::Signal("SIGINT".to_string())).await;
            }
        });
    }
}
