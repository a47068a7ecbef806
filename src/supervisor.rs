/// Lifecycle management for the single agent subprocess: spawn with output
/// captured to a log file, signal termination, and poll for unexpected exit.
use crate::config::AgentConfig;
use chrono::{DateTime, Utc};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Observable state of the agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// No agent running; ready to start.
    Idle,
    /// Agent subprocess is alive.
    Running,
    /// Agent exited on its own (crash or normal exit) without a stop request.
    Errored,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Running => write!(f, "running"),
            AgentStatus::Errored => write!(f, "errored"),
        }
    }
}

/// Errors that can occur when starting the agent.
#[derive(Debug)]
pub enum StartError {
    /// An agent is already running; no second child is spawned.
    AlreadyRunning,
    /// Failed to create the output capture file.
    LogFile {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to spawn the agent subprocess (missing executable, permissions).
    Spawn { source: std::io::Error },
}

impl std::fmt::Display for StartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartError::AlreadyRunning => write!(f, "agent is already running"),
            StartError::LogFile { path, source } => {
                write!(
                    f,
                    "failed to create agent log file {}: {}",
                    path.display(),
                    source
                )
            }
            StartError::Spawn { source } => {
                write!(f, "failed to spawn agent subprocess: {}", source)
            }
        }
    }
}

impl std::error::Error for StartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StartError::AlreadyRunning => None,
            StartError::LogFile { source, .. } => Some(source),
            StartError::Spawn { source } => Some(source),
        }
    }
}

/// Errors that can occur when stopping the agent.
#[derive(Debug)]
pub enum StopError {
    /// No agent is running.
    NotRunning,
}

impl std::fmt::Display for StopError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopError::NotRunning => write!(f, "agent is not running"),
        }
    }
}

impl std::error::Error for StopError {}

/// Supervisor for at most one agent subprocess.
///
/// Holds the child handle while the agent runs. The handle is `Some` exactly
/// when the status is `Running`; every operation maintains that invariant.
/// Callers that may race (HTTP handlers) must share the supervisor behind a
/// mutex so precondition checks are atomic with their effects.
pub struct Supervisor {
    status: AgentStatus,
    child: Option<Child>,
    pid: Option<u32>,
    started_at: Option<DateTime<Utc>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            status: AgentStatus::Idle,
            child: None,
            pid: None,
            started_at: None,
        }
    }

    /// Current status without touching the child.
    pub fn status(&self) -> AgentStatus {
        self.status
    }

    /// PID of the running agent, if any.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// When the running agent was started, if any.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Spawn the agent subprocess described by `agent`.
    ///
    /// stdout and stderr are captured to `agent.log_file` (truncated on each
    /// start) so the session can be inspected afterwards. Arguments are passed
    /// as argv directly, never through a shell. Fails with `AlreadyRunning`
    /// when an agent is up; spawn failure leaves the status unchanged so the
    /// caller can retry.
    pub fn start(&mut self, agent: &AgentConfig) -> Result<(), StartError> {
        if self.status == AgentStatus::Running {
            return Err(StartError::AlreadyRunning);
        }

        let log_file = std::fs::File::create(&agent.log_file).map_err(|e| StartError::LogFile {
            path: agent.log_file.clone(),
            source: e,
        })?;
        // Second handle for stderr since File doesn't impl Clone
        let log_file_stderr = log_file.try_clone().map_err(|e| StartError::LogFile {
            path: agent.log_file.clone(),
            source: e,
        })?;

        tracing::info!(
            command = %agent.command,
            args = ?agent.args,
            working_dir = %agent.working_dir.display(),
            log = %agent.log_file.display(),
            "starting agent"
        );

        let child = Command::new(&agent.command)
            .args(&agent.args)
            .current_dir(&agent.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_stderr))
            .spawn()
            .map_err(|e| StartError::Spawn { source: e })?;

        let pid = child.id();
        tracing::info!(pid = ?pid, "agent subprocess started");

        self.child = Some(child);
        self.pid = pid;
        self.started_at = Some(Utc::now());
        self.status = AgentStatus::Running;
        Ok(())
    }

    /// Request termination of the running agent.
    ///
    /// Sends SIGTERM and returns without waiting for the process to exit; the
    /// runtime reaps the child in the background once it is gone. A signal
    /// that cannot be delivered because the process already exited counts as
    /// success. Fails with `NotRunning` when no agent is up.
    pub fn stop(&mut self) -> Result<(), StopError> {
        if self.status != AgentStatus::Running {
            return Err(StopError::NotRunning);
        }

        if let Some(child) = self.child.take() {
            match child.id() {
                Some(pid) => match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    Ok(()) => tracing::info!(pid, "sent SIGTERM to agent"),
                    Err(nix::errno::Errno::ESRCH) => {
                        tracing::debug!(pid, "agent already gone before SIGTERM")
                    }
                    Err(e) => tracing::warn!(pid, error = %e, "failed to signal agent"),
                },
                // Already reaped; nothing left to signal.
                None => tracing::debug!("agent exited before stop request"),
            }
        }

        self.pid = None;
        self.started_at = None;
        self.status = AgentStatus::Idle;
        Ok(())
    }

    /// Non-blocking liveness check.
    ///
    /// While running, checks whether the child exited on its own since the
    /// last call; if so, the status becomes `Errored` and the handle is
    /// released. Clean exits and crashes are not distinguished. Outside of
    /// `Running` this is a no-op. Cheap enough to call on every render cycle.
    pub fn poll(&mut self) -> AgentStatus {
        if let Some(child) = self.child.as_mut() {
            match child.try_wait() {
                Ok(Some(exit)) => {
                    tracing::warn!(
                        exit_code = ?exit.code(),
                        "agent process ended unexpectedly"
                    );
                    self.child = None;
                    self.pid = None;
                    self.started_at = None;
                    self.status = AgentStatus::Errored;
                }
                Ok(None) => {} // still alive
                Err(e) => {
                    tracing::warn!(error = %e, "agent liveness check failed");
                    self.child = None;
                    self.pid = None;
                    self.started_at = None;
                    self.status = AgentStatus::Errored;
                }
            }
        }
        self.status
    }

    /// Force-terminate any live agent on supervisor shutdown.
    ///
    /// Unlike `stop` this does not leave the child running: no agent may
    /// outlive the panel process.
    pub fn shutdown(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "agent already gone during shutdown");
            } else {
                tracing::info!(pid = ?self.pid, "killed agent on shutdown");
            }
        }
        self.pid = None;
        self.started_at = None;
        self.status = AgentStatus::Idle;
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
