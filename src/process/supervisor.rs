use super::listener::{ListenerSlot, ProcessListener};
use super::logs::LogCapture;
use crate::compose::LaunchConfiguration;
use crate::error::ProcessError;
use crate::events::{EventBus, SupervisorEvent};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Extra wait after a forced kill before giving up on the exit status
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Point-in-time view of the OS process
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessInfo {
    /// Identifies one spawn; log lines of the run carry it
    pub run_id: Option<Uuid>,
    pub pid: Option<u32>,
    pub alive: bool,
    pub started_at: Option<DateTime<Utc>>,
    /// User plus system CPU time, where the OS exposes it
    pub cpu_time: Option<Duration>,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Default)]
struct RunState {
    run_id: Option<Uuid>,
    pid: Option<u32>,
    alive: bool,
    started_at: Option<DateTime<Utc>>,
    exit_code: Option<i32>,
}

struct RunningProcess {
    pid: u32,
    exited: watch::Receiver<bool>,
    kill: Option<oneshot::Sender<()>>,
    waiter: JoinHandle<()>,
}

/// Spawns, observes and stops one engine process at a time
pub struct ProcessSupervisor {
    node: String,
    stop_timeout: Duration,
    drain_timeout: Duration,
    state: Arc<Mutex<RunState>>,
    running: tokio::sync::Mutex<Option<RunningProcess>>,
    listener: ListenerSlot,
    logs: Arc<LogCapture>,
    event_bus: Option<Arc<EventBus>>,
}

impl ProcessSupervisor {
    pub fn new(
        node: impl Into<String>,
        logs: Arc<LogCapture>,
        stop_timeout: Duration,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            node: node.into(),
            stop_timeout,
            drain_timeout,
            state: Arc::new(Mutex::new(RunState::default())),
            running: tokio::sync::Mutex::new(None),
            listener: ListenerSlot::new(),
            logs,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Start the engine described by `launch`; its files must already be materialized
    pub async fn spawn(
        &self,
        launch: &LaunchConfiguration,
        listener: Arc<dyn ProcessListener>,
    ) -> Result<u32, ProcessError> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            if !*current.exited.borrow() {
                return Err(ProcessError::AlreadyRunning { pid: current.pid });
            }
        }

        let executable = launch.executable();
        let mut command = Command::new(&executable);
        command
            .envs(launch.environment())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            command: executable.clone(),
            source,
        })?;

        let pid = child.id().unwrap_or_default();
        let run_id = Uuid::new_v4();
        if let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) {
            self.logs.attach(stdout, stderr);
        }

        {
            let mut state = self.state.lock();
            *state = RunState {
                run_id: Some(run_id),
                pid: Some(pid),
                alive: true,
                started_at: Some(Utc::now()),
                exit_code: None,
            };
        }
        self.listener.attach(listener);

        let (exited_tx, exited_rx) = watch::channel(false);
        let (kill_tx, kill_rx) = oneshot::channel();
        let waiter = tokio::spawn(wait_for_exit(
            self.node.clone(),
            child,
            kill_rx,
            exited_tx,
            self.state.clone(),
            self.listener.clone(),
            self.event_bus.clone(),
        ));

        *running = Some(RunningProcess {
            pid,
            exited: exited_rx,
            kill: Some(kill_tx),
            waiter,
        });

        info!(node = %self.node, run = %run_id, "Started {} with pid {}", executable.display(), pid);
        if let Some(bus) = &self.event_bus {
            let _ = bus.publish(SupervisorEvent::ProcessStarted {
                node: self.node.clone(),
                pid,
                timestamp: SystemTime::now(),
            });
        }
        Ok(pid)
    }

    /// Detach the listener, terminate the process and wait for it and its log readers
    ///
    /// Returns the exit code of the run, if any.
    pub async fn stop(&self) -> Result<Option<i32>, ProcessError> {
        self.listener.detach();

        let mut running = self.running.lock().await;
        let Some(mut process) = running.take() else {
            return Ok(self.state.lock().exit_code);
        };

        let mut result = Ok(());
        if !*process.exited.borrow() {
            info!(node = %self.node, "Stopping process {}", process.pid);
            terminate(process.pid, &mut process.kill);

            if !wait_exited(&mut process.exited, self.stop_timeout).await {
                warn!(
                    node = %self.node,
                    "Process {} ignored SIGTERM for {:?}, killing it",
                    process.pid, self.stop_timeout
                );
                if let Some(kill) = process.kill.take() {
                    let _ = kill.send(());
                }
                wait_exited(&mut process.exited, KILL_GRACE).await;
                result = Err(ProcessError::TerminationTimeout {
                    pid: process.pid,
                    timeout_ms: self.stop_timeout.as_millis() as u64,
                });
            }
        }

        if !self.logs.drain(self.drain_timeout).await {
            warn!(node = %self.node, "Stopped without draining process output");
        }
        if let Err(e) = process.waiter.await {
            error!(node = %self.node, "Exit watcher failed: {}", e);
        }

        result.map(|_| self.state.lock().exit_code)
    }

    pub fn pid(&self) -> Option<u32> {
        let state = self.state.lock();
        state.alive.then_some(state.pid).flatten()
    }

    pub fn is_alive(&self) -> bool {
        self.state.lock().alive
    }

    pub fn info(&self) -> ProcessInfo {
        let state = self.state.lock();
        ProcessInfo {
            run_id: state.run_id,
            pid: state.pid,
            alive: state.alive,
            started_at: state.started_at,
            cpu_time: state.pid.filter(|_| state.alive).and_then(cpu_time),
            exit_code: state.exit_code,
        }
    }

    pub fn logs(&self) -> &Arc<LogCapture> {
        &self.logs
    }
}

async fn wait_for_exit(
    node: String,
    mut child: Child,
    kill: oneshot::Receiver<()>,
    exited: watch::Sender<bool>,
    state: Arc<Mutex<RunState>>,
    listener: ListenerSlot,
    event_bus: Option<Arc<EventBus>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = kill => {
            if let Err(e) = child.start_kill() {
                warn!(node = %node, "Failed to kill process: {}", e);
            }
            child.wait().await
        }
    };

    let exit_code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            error!(node = %node, "Failed to collect exit status: {}", e);
            None
        }
    };

    {
        let mut state = state.lock();
        state.alive = false;
        state.exit_code = exit_code;
    }
    let _ = exited.send(true);

    match exit_code {
        Some(code) => info!(node = %node, "Process exited with code {}", code),
        None => info!(node = %node, "Process terminated by signal"),
    }

    if let Some(bus) = &event_bus {
        let _ = bus.publish(SupervisorEvent::ProcessExited {
            node: node.clone(),
            exit_code,
            timestamp: SystemTime::now(),
        });
    }
    listener.notify_exit(exit_code);
}

async fn wait_exited(exited: &mut watch::Receiver<bool>, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, exited.wait_for(|done| *done))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
}

#[cfg(unix)]
fn terminate(pid: u32, _kill: &mut Option<oneshot::Sender<()>>) {
    debug!("Sending SIGTERM to {}", pid);
    // SAFETY: kill(2) has no memory-safety preconditions
    let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if result != 0 {
        warn!(
            "Failed to send SIGTERM to {}: {}",
            pid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32, kill: &mut Option<oneshot::Sender<()>>) {
    if let Some(kill) = kill.take() {
        let _ = kill.send(());
    }
}

/// utime + stime from `/proc/<pid>/stat`
#[cfg(target_os = "linux")]
fn cpu_time(pid: u32) -> Option<Duration> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    // the command name may contain spaces, fields restart after the last ')'
    let fields: Vec<&str> = stat.rsplit_once(')')?.1.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;

    // SAFETY: sysconf has no preconditions
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks <= 0 {
        return None;
    }
    Some(Duration::from_secs_f64(
        (utime + stime) as f64 / ticks as f64,
    ))
}

#[cfg(not(target_os = "linux"))]
fn cpu_time(_pid: u32) -> Option<Duration> {
    None
}
