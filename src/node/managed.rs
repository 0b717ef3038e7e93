use crate::compose::{BuildParams, ConfigurationComposer, LaunchConfiguration};
use crate::config::SupervisorConfig;
use crate::error::{ProcessError, Result, SupervisorError, TransitionError};
use crate::events::{EventBus, SupervisorEvent};
use crate::health::{ClusterHealth, ClusterHealthClient, HealthTarget, RestClusterClient};
use crate::lifecycle::{
    transition, FailureThresholds, LifecycleStateMachine, ProcessEvent, ProcessState, Transition,
};
use crate::process::{LogCapture, ProcessInfo, ProcessListener, ProcessSupervisor, SecureSettingsWriter};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// One supervised engine node: its process, lifecycle and observed cluster view
pub struct ManagedProcess {
    name: String,
    composer: ConfigurationComposer,
    secure_settings: Arc<dyn SecureSettingsWriter>,
    machine: LifecycleStateMachine,
    supervisor: ProcessSupervisor,
    event_bus: Arc<EventBus>,
    request_timeout: Duration,
    params: RwLock<BuildParams>,
    launch: RwLock<Option<Arc<LaunchConfiguration>>>,
    /// Set once the stored launch configuration was used for a run
    launch_used: AtomicBool,
    client: RwLock<Option<Arc<dyn ClusterHealthClient>>>,
    leader: AtomicBool,
    /// Covers the gap between firing `Started` and the spawn returning
    spawning: AtomicBool,
    /// A stale allocation exclusion of this node is cleared once it answers healthy
    exclusion_check_pending: AtomicBool,
    this: Weak<ManagedProcess>,
}

impl ManagedProcess {
    pub fn new(
        config: &SupervisorConfig,
        composer: ConfigurationComposer,
        secure_settings: Arc<dyn SecureSettingsWriter>,
        event_bus: Arc<EventBus>,
    ) -> Arc<Self> {
        Self::with_thresholds(
            config,
            config.failure_thresholds(),
            composer,
            secure_settings,
            event_bus,
        )
    }

    pub fn with_thresholds(
        config: &SupervisorConfig,
        thresholds: FailureThresholds,
        composer: ConfigurationComposer,
        secure_settings: Arc<dyn SecureSettingsWriter>,
        event_bus: Arc<EventBus>,
    ) -> Arc<Self> {
        let name = config.node.name.clone();
        let logs = Arc::new(LogCapture::new(name.clone(), config.process.log_buffer_size));
        let supervisor = ProcessSupervisor::new(
            name.clone(),
            logs,
            config.stop_timeout(),
            config.drain_timeout(),
        )
        .with_event_bus(event_bus.clone());
        let machine = LifecycleStateMachine::with_thresholds(name.clone(), thresholds)
            .with_event_bus(event_bus.clone());

        Arc::new_cyclic(|this| Self {
            name,
            composer,
            secure_settings,
            machine,
            supervisor,
            event_bus,
            request_timeout: config.request_timeout(),
            params: RwLock::new(BuildParams::default()),
            launch: RwLock::new(None),
            launch_used: AtomicBool::new(false),
            client: RwLock::new(None),
            leader: AtomicBool::new(false),
            spawning: AtomicBool::new(false),
            exclusion_check_pending: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Compose, materialize and store the launch configuration for the next start
    pub async fn configure(&self, params: BuildParams) -> Result<Arc<LaunchConfiguration>> {
        let state = self.state();
        if state.is_running() {
            return Err(ProcessError::AlreadyRunning {
                pid: self.supervisor.pid().unwrap_or_default(),
            }
            .into());
        }
        if state == ProcessState::Removed {
            return Err(SupervisorError::Transition(
                TransitionError::Undefined {
                    state,
                    event: ProcessEvent::Prepared,
                },
            ));
        }

        let launch = self.prepare(&params).await?;
        *self.params.write() = params;

        if state == ProcessState::AwaitingConfiguration {
            self.machine.fire(ProcessEvent::Prepared)?;
        }
        Ok(launch)
    }

    /// Everything a launch needs on disk; nothing is spawned and no state changes
    async fn prepare(&self, params: &BuildParams) -> Result<Arc<LaunchConfiguration>> {
        let launch = self.composer.compose(params)?;
        launch.materialize()?;
        self.secure_settings.write(&launch).await?;

        for warning in &launch.warnings {
            let _ = self.event_bus.publish(SupervisorEvent::ConfigurationWarning {
                node: self.name.clone(),
                message: warning.clone(),
            });
        }

        let launch = Arc::new(launch);
        *self.launch.write() = Some(launch.clone());
        self.launch_used.store(false, Ordering::SeqCst);
        Ok(launch)
    }

    /// Spawn the engine
    ///
    /// Every run after the first rebuilds the launch configuration so it gets fresh keystore
    /// passwords.
    pub async fn start(&self) -> Result<u32> {
        if !self.machine.can_start() {
            return Err(self.start_refusal(self.state()));
        }

        let launch = match self.launch() {
            Some(launch) if !self.launch_used.load(Ordering::SeqCst) => launch,
            _ => {
                let params = self.params.read().clone();
                self.prepare(&params).await?
            }
        };
        let client: Arc<dyn ClusterHealthClient> = Arc::new(
            RestClusterClient::for_launch(&launch, self.request_timeout).map_err(ProcessError::from)?,
        );

        // Started goes first so an immediate exit lands on Starting
        self.spawning.store(true, Ordering::SeqCst);
        let transition = match self.machine.fire(ProcessEvent::Started) {
            Ok(t) if t.to == ProcessState::Starting => t,
            Ok(t) => {
                self.spawning.store(false, Ordering::SeqCst);
                return Err(self.start_refusal(t.to));
            }
            Err(e) => {
                self.spawning.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        debug!(node = %self.name, "Spawning after {} -> {}", transition.from, transition.to);
        self.launch_used.store(true, Ordering::SeqCst);

        let listener: Arc<dyn ProcessListener> = Arc::new(ExitListener {
            process: self.this.clone(),
        });
        let spawned = self.supervisor.spawn(&launch, listener).await;
        self.spawning.store(false, Ordering::SeqCst);
        let pid = match spawned {
            Ok(pid) => pid,
            Err(e) => {
                self.machine.fire_if_defined(ProcessEvent::Terminated);
                return Err(e.into());
            }
        };

        *self.client.write() = Some(client);
        self.exclusion_check_pending.store(true, Ordering::SeqCst);
        Ok(pid)
    }

    fn start_refusal(&self, state: ProcessState) -> SupervisorError {
        match state {
            ProcessState::Terminated => ProcessError::RebootLimitExceeded {
                reboots: self.machine.reboot_count(),
            }
            .into(),
            state if state.is_running() => ProcessError::AlreadyRunning {
                pid: self.supervisor.pid().unwrap_or_default(),
            }
            .into(),
            state => SupervisorError::Transition(TransitionError::Undefined {
                state,
                event: ProcessEvent::Started,
            }),
        }
    }

    /// Terminate the process and record the stop
    ///
    /// The state machine sees `Stopped` even when the process had to be killed.
    pub async fn stop(&self) -> Result<Option<i32>> {
        let result = self.supervisor.stop().await;
        *self.client.write() = None;
        self.record_leader(false);
        self.machine.fire_if_defined(ProcessEvent::Stopped);
        Ok(result?)
    }

    /// Exclude the node from shard allocation and begin removal
    ///
    /// The node is stopped by a later health sweep once no shards are relocating.
    pub async fn remove(&self) -> Result<()> {
        let state = self.state();
        transition(state, ProcessEvent::Remove)?;
        let client = self
            .cluster_client()
            .ok_or(ProcessError::NotConfigured)?;

        client
            .set_allocation_exclusion(Some(&self.name))
            .await
            .map_err(ProcessError::from)?;
        info!(node = %self.name, "Excluded from shard allocation");

        // the state may have moved on while the request was in flight
        if let Err(e) = self.machine.fire(ProcessEvent::Remove) {
            self.withdraw_exclusion(client.as_ref()).await;
            return Err(e.into());
        }
        self.exclusion_check_pending.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn withdraw_exclusion(&self, client: &dyn ClusterHealthClient) {
        match client.set_allocation_exclusion(None).await {
            Ok(()) => info!(node = %self.name, "Removal refused, allocation exclusion withdrawn"),
            Err(e) => {
                warn!(
                    node = %self.name,
                    "Failed to withdraw allocation exclusion, retrying on the next healthy sample: {}",
                    e
                );
                self.exclusion_check_pending.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Return a removed node to `AwaitingConfiguration`
    pub fn reset(&self) -> Result<Transition> {
        let transition = self.machine.fire(ProcessEvent::Reset)?;
        *self.launch.write() = None;
        self.launch_used.store(false, Ordering::SeqCst);
        *self.params.write() = BuildParams::default();
        Ok(transition)
    }

    pub fn state(&self) -> ProcessState {
        self.machine.current()
    }

    /// Whether the last health response reported an elected cluster manager
    pub fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    pub fn stdout(&self) -> Vec<String> {
        self.supervisor.logs().stdout()
    }

    pub fn stderr(&self) -> Vec<String> {
        self.supervisor.logs().stderr()
    }

    pub fn info(&self) -> ProcessInfo {
        self.supervisor.info()
    }

    pub fn launch(&self) -> Option<Arc<LaunchConfiguration>> {
        self.launch.read().clone()
    }

    pub fn rest_base_url(&self) -> Option<String> {
        self.launch().map(|l| l.rest_base_url())
    }

    pub fn lifecycle(&self) -> &LifecycleStateMachine {
        &self.machine
    }

    fn handle_exit(&self, exit_code: Option<i32>) {
        match exit_code {
            Some(code) => warn!(node = %self.name, "Process exited unexpectedly with code {}", code),
            None => warn!(node = %self.name, "Process was terminated by a signal"),
        }
        self.record_leader(false);
        self.machine.fire_if_defined(ProcessEvent::Terminated);
    }

    async fn clear_stale_exclusion(&self, client: &dyn ClusterHealthClient) {
        match client.allocation_exclusion().await {
            Ok(Some(excluded)) if excluded == self.name => {
                match client.set_allocation_exclusion(None).await {
                    Ok(()) => {
                        info!(node = %self.name, "Cleared allocation exclusion left from an earlier removal");
                        self.exclusion_check_pending.store(false, Ordering::SeqCst);
                    }
                    Err(e) => warn!(node = %self.name, "Failed to clear allocation exclusion: {}", e),
                }
            }
            Ok(_) => {
                self.exclusion_check_pending.store(false, Ordering::SeqCst);
            }
            Err(e) => debug!(node = %self.name, "Allocation exclusion check failed: {}", e),
        }
    }
}

#[async_trait]
impl HealthTarget for ManagedProcess {
    fn node_name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ProcessState {
        self.machine.current()
    }

    fn is_alive(&self) -> bool {
        self.spawning.load(Ordering::SeqCst) || self.supervisor.is_alive()
    }

    fn cluster_client(&self) -> Option<Arc<dyn ClusterHealthClient>> {
        self.client.read().clone()
    }

    fn fire(&self, event: ProcessEvent) {
        // rejected events are logged by the machine
        let _ = self.machine.fire(event);
    }

    fn fire_if_defined(&self, event: ProcessEvent) -> bool {
        self.machine.fire_if_defined(event).is_some()
    }

    fn record_leader(&self, leader: bool) {
        let previous = self.leader.swap(leader, Ordering::SeqCst);
        if previous != leader {
            debug!(node = %self.name, "Leader flag now {}", leader);
            let _ = self.event_bus.publish(SupervisorEvent::LeaderChanged {
                node: self.name.clone(),
                leader,
                timestamp: SystemTime::now(),
            });
        }
    }

    async fn after_health_sample(&self, health: &ClusterHealth) {
        let state = self.state();
        if state == ProcessState::Removing {
            if health.relocating_shards > 0 {
                info!(
                    node = %self.name,
                    "Waiting for {} relocating shards before removal",
                    health.relocating_shards
                );
                return;
            }
            info!(node = %self.name, "No shards relocating, stopping removed node");
            if let Err(e) = self.stop().await {
                warn!(node = %self.name, "Stop during removal failed: {}", e);
            }
            return;
        }

        if health.is_healthy() && self.exclusion_check_pending.load(Ordering::SeqCst) {
            if let Some(client) = self.cluster_client() {
                self.clear_stale_exclusion(client.as_ref()).await;
            }
        }
    }
}

/// Routes exit notifications of the current run back to its process
struct ExitListener {
    process: Weak<ManagedProcess>,
}

impl ProcessListener for ExitListener {
    fn on_exit(&self, exit_code: Option<i32>) {
        if let Some(process) = self.process.upgrade() {
            process.handle_exit(exit_code);
        }
    }
}
