use super::client::{ClusterHealth, ClusterHealthClient};
use crate::error::HealthCheckError;
use crate::lifecycle::{ProcessEvent, ProcessState};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the monitor needs from a supervised node
#[async_trait]
pub trait HealthTarget: Send + Sync {
    fn node_name(&self) -> &str;

    fn state(&self) -> ProcessState;

    /// Whether the OS process is still running
    fn is_alive(&self) -> bool;

    /// REST client of the current run; `None` before the node was launched
    fn cluster_client(&self) -> Option<Arc<dyn ClusterHealthClient>>;

    fn fire(&self, event: ProcessEvent);

    /// Fire `event` unless the current state leaves it undefined; true if it was applied
    fn fire_if_defined(&self, event: ProcessEvent) -> bool;

    fn record_leader(&self, leader: bool);

    /// Called after every successful health response, once its event was fired
    async fn after_health_sample(&self, health: &ClusterHealth);
}

/// Outcome of one health sweep for one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthSample {
    Skipped,
    Healthy,
    Unhealthy,
}

/// Periodic liveness and REST health checks for all registered nodes
pub struct HealthMonitor {
    targets: RwLock<Vec<Arc<dyn HealthTarget>>>,
    liveness_interval: Duration,
    health_interval: Duration,
    sweep_guard: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(liveness_interval: Duration, health_interval: Duration) -> Self {
        Self {
            targets: RwLock::new(Vec::new()),
            liveness_interval,
            health_interval,
            sweep_guard: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, target: Arc<dyn HealthTarget>) {
        info!("Monitoring node {}", target.node_name());
        self.targets.write().push(target);
    }

    pub fn registered(&self) -> usize {
        self.targets.read().len()
    }

    /// Start both periodic loops; they run until `shutdown`
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            debug!("Health monitor already started");
            return;
        }

        let monitor = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut ticker = interval(monitor.liveness_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = monitor.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        monitor.run_liveness_sweep();
                    }
                }
            }
            debug!("Liveness loop stopped");
        }));

        let monitor = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut ticker = interval(monitor.health_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = monitor.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        monitor.run_health_sweep().await;
                    }
                }
            }
            debug!("Health loop stopped");
        }));

        info!(
            "Health monitor started (liveness every {:?}, health every {:?})",
            self.liveness_interval, self.health_interval
        );
    }

    /// Fire `Terminated` for every node whose process died unnoticed
    ///
    /// Returns the number of nodes found dead.
    pub fn run_liveness_sweep(&self) -> usize {
        let targets = self.targets.read().clone();
        let mut dead = 0;
        for target in targets {
            let state = target.state();
            if !state.is_running() || target.is_alive() {
                continue;
            }
            if !target.fire_if_defined(ProcessEvent::Terminated) {
                debug!(node = %target.node_name(), "Process gone while {}", state);
                continue;
            }
            warn!(node = %target.node_name(), "Process is no longer alive");
            dead += 1;
        }
        dead
    }

    /// Query cluster health of every running node and feed the result to its state machine
    ///
    /// Sweeps never overlap; a second caller waits for the running one.
    pub async fn run_health_sweep(&self) -> Vec<(String, HealthSample)> {
        let _guard = self.sweep_guard.lock().await;
        let targets = self.targets.read().clone();

        let mut samples = Vec::with_capacity(targets.len());
        for target in targets {
            let sample = check_target(target.as_ref()).await;
            samples.push((target.node_name().to_string(), sample));
        }
        samples
    }

    /// Cancel both loops and wait for them to finish
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Health monitor task failed: {}", e);
            }
        }
        info!("Health monitor stopped");
    }
}

async fn check_target(target: &dyn HealthTarget) -> HealthSample {
    let state = target.state();
    if !state.is_running() {
        return HealthSample::Skipped;
    }
    let Some(client) = target.cluster_client() else {
        return HealthSample::Skipped;
    };

    let result: Result<ClusterHealth, HealthCheckError> = client.cluster_health().await;
    match result {
        Ok(health) => {
            target.record_leader(health.has_leader());
            let sample = if health.is_healthy() {
                target.fire(ProcessEvent::HealthOk);
                HealthSample::Healthy
            } else {
                debug!(node = %target.node_name(), "Cluster status {:?}", health.status);
                target.fire(ProcessEvent::HealthFailed);
                HealthSample::Unhealthy
            };
            target.after_health_sample(&health).await;
            sample
        }
        Err(e) => {
            debug!(node = %target.node_name(), "Health check failed: {}", e);
            target.record_leader(false);
            target.fire(ProcessEvent::HealthFailed);
            HealthSample::Unhealthy
        }
    }
}
