use super::types::{ComponentState, ShutdownReason};
use crate::compose::{BuildParams, ConfigurationComposer, StaticNodeRegistry, StatvfsProbe};
use crate::config::SupervisorConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::health::HealthMonitor;
use crate::node::ManagedProcess;
use crate::process::KeystoreCli;
use crate::secrets::{load_trusted_certificates, FilesystemCertificateSource, SecretsProvisioner};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Wires the node, its health monitor and the event bus together for the binary
pub struct NodeOrchestrator {
    pub(super) config: SupervisorConfig,
    pub(super) event_bus: Arc<EventBus>,
    pub(super) node: Arc<ManagedProcess>,
    pub(super) monitor: Arc<HealthMonitor>,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl NodeOrchestrator {
    /// Create an orchestrator for a node backed by the real distribution tools
    pub fn new(config: SupervisorConfig) -> Result<Self> {
        let event_bus = Arc::new(EventBus::new(config.process.event_bus_capacity));
        let composer = default_composer(&config)?;
        let node = ManagedProcess::new(&config, composer, Arc::new(KeystoreCli), event_bus.clone());
        Ok(Self::from_parts(config, node, event_bus))
    }

    /// Create an orchestrator around an existing node
    pub fn from_parts(
        config: SupervisorConfig,
        node: Arc<ManagedProcess>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let monitor = Arc::new(HealthMonitor::new(
            config.liveness_interval(),
            config.health_interval(),
        ));
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Self {
            config,
            event_bus,
            node,
            monitor,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_sender))),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn node(&self) -> &Arc<ManagedProcess> {
        &self.node
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Ask `run` to shut down; later requests are ignored
    pub async fn request_shutdown(&self, reason: ShutdownReason) {
        request_shutdown(&self.shutdown_sender, reason).await;
    }
}

pub(super) async fn request_shutdown(
    sender: &Mutex<Option<oneshot::Sender<ShutdownReason>>>,
    reason: ShutdownReason,
) {
    if let Some(sender) = sender.lock().await.take() {
        info!("Shutdown requested: {:?}", reason);
        let _ = sender.send(reason);
    }
}

/// The contributor pipeline for a node whose certificates live on the local filesystem
pub fn default_composer(config: &SupervisorConfig) -> Result<ConfigurationComposer> {
    let fallback_dir = config.distribution_dir().join("config");
    let provisioner = SecretsProvisioner::new(vec![Box::new(
        FilesystemCertificateSource::from_config(&config.security, &fallback_dir),
    )]);

    Ok(ConfigurationComposer::with_default_pipeline(
        config,
        Arc::new(StaticNodeRegistry::default()),
        provisioner,
        Arc::new(StatvfsProbe),
    )?)
}

/// Build inputs from the configured trusted certificate directory
pub fn build_params(config: &SupervisorConfig) -> Result<BuildParams> {
    let trusted_certificates = match &config.security.trusted_certificates_dir {
        Some(dir) => load_trusted_certificates(Path::new(dir))?,
        None => Vec::new(),
    };
    Ok(BuildParams {
        trusted_certificates,
    })
}
