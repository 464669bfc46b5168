//! Service process lifecycle: launch as a process group, adopt, tear down
//!
//! A `ServiceHandle` records whether this run started the service. Only an
//! owned handle ever carries a process group id, and only an owned handle is
//! ever signalled.

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use crate::config::StartupCommand;
use crate::error::{HarnessError, HarnessResult};

/// How long to wait for the leader after escalating to SIGKILL
const KILL_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    NotStarted,
    Starting,
    Ready,
    Verifying,
    Succeeded,
    Failed,
    TornDown,
}

impl ServiceState {
    pub fn can_transition_to(self, next: ServiceState) -> bool {
        use ServiceState::*;

        match (self, next) {
            (TornDown, _) => false,
            (_, TornDown) => true,
            (NotStarted, Starting) | (NotStarted, Ready) => true,
            (Starting, Ready) | (Starting, Failed) => true,
            (Ready, Verifying) => true,
            (Verifying, Succeeded) | (Verifying, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::NotStarted => "not_started",
            ServiceState::Starting => "starting",
            ServiceState::Ready => "ready",
            ServiceState::Verifying => "verifying",
            ServiceState::Succeeded => "succeeded",
            ServiceState::Failed => "failed",
            ServiceState::TornDown => "torn_down",
        };
        f.write_str(s)
    }
}

/// The owned process group outlived its grace period after SIGTERM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownWarning {
    pub pgid: i32,
    pub grace_period_ms: u64,
    pub detail: String,
}

impl fmt::Display for TeardownWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "process group {}: {}", self.pgid, self.detail)
    }
}

/// Delivers signals to a whole process group
pub trait ProcessSignaller: Send + Sync {
    fn signal_group(&self, pgid: Pid, signal: Signal) -> nix::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KillpgSignaller;

impl ProcessSignaller for KillpgSignaller {
    fn signal_group(&self, pgid: Pid, signal: Signal) -> nix::Result<()> {
        killpg(pgid, signal)
    }
}

/// A launched or adopted service instance
pub struct ServiceHandle {
    child: Option<Child>,
    pgid: Option<Pid>,
    /// Set for owned handles; also used by the drop backstop
    signaller: Option<Arc<dyn ProcessSignaller>>,
    owned: bool,
    state: ServiceState,
}

impl ServiceHandle {
    fn owned(child: Child, pgid: Pid, signaller: Arc<dyn ProcessSignaller>) -> Self {
        Self {
            child: Some(child),
            pgid: Some(pgid),
            signaller: Some(signaller),
            owned: true,
            state: ServiceState::Starting,
        }
    }

    fn adopted() -> Self {
        Self {
            child: None,
            pgid: None,
            signaller: None,
            owned: false,
            state: ServiceState::Ready,
        }
    }

    /// Process group id; `None` unless this run launched the service
    pub fn pgid(&self) -> Option<i32> {
        self.pgid.map(Pid::as_raw)
    }

    /// Whether this run launched the service and must stop it
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn is_torn_down(&self) -> bool {
        self.state == ServiceState::TornDown
    }

    pub(crate) fn transition(&mut self, next: ServiceState) -> HarnessResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(HarnessError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!("Service state {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("pgid", &self.pgid())
            .field("owned", &self.owned)
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        if !self.owned || self.is_torn_down() {
            return;
        }
        if let (Some(pgid), Some(signaller)) = (self.pgid, &self.signaller) {
            warn!(
                "Service handle dropped without teardown; killing process group {}",
                pgid
            );
            let _ = signaller.signal_group(pgid, Signal::SIGKILL);
        }
    }
}

/// Starts, adopts and stops the service under test
#[derive(Clone)]
pub struct LifecycleManager {
    signaller: Arc<dyn ProcessSignaller>,
    grace_period: Duration,
}

impl LifecycleManager {
    pub fn new(grace_period: Duration) -> Self {
        Self::with_signaller(Arc::new(KillpgSignaller), grace_period)
    }

    pub fn with_signaller(signaller: Arc<dyn ProcessSignaller>, grace_period: Duration) -> Self {
        Self {
            signaller,
            grace_period,
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Spawn `command` as the leader of a new process group.
    ///
    /// Must be called from within a tokio runtime.
    pub fn launch(&self, command: &StartupCommand) -> HarnessResult<ServiceHandle> {
        let launch_error = |source: std::io::Error| HarnessError::Launch {
            program: command.program.clone(),
            source,
        };

        if let Some(dir) = &command.working_dir {
            if !dir.is_dir() {
                return Err(launch_error(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("working directory '{}' does not exist", dir.display()),
                )));
            }
        }

        info!("Launching service: {}", command.display());

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::null());

        if command.inherit_output {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        // New group whose id equals the child's pid, so descendants share it
        cmd.process_group(0);

        let child = cmd.spawn().map_err(launch_error)?;
        let pid = child.id().ok_or_else(|| {
            launch_error(std::io::Error::new(
                std::io::ErrorKind::Other,
                "child exited before its pid could be read",
            ))
        })?;
        let pgid = Pid::from_raw(pid as i32);

        info!("Service started (pgid: {})", pgid);
        Ok(ServiceHandle::owned(child, pgid, self.signaller.clone()))
    }

    /// Handle for a service that was already reachable; never signalled
    pub fn adopt(&self) -> ServiceHandle {
        info!("Service already running; it will be left running afterwards");
        ServiceHandle::adopted()
    }

    /// Stop the process group owned by `handle`.
    ///
    /// No-op for adopted handles and for handles already torn down. A group
    /// that ignores SIGTERM for the whole grace period is killed and reported
    /// as a `TeardownWarning`.
    pub async fn teardown(&self, handle: &mut ServiceHandle) -> Option<TeardownWarning> {
        if handle.is_torn_down() {
            debug!("Teardown already completed");
            return None;
        }

        let pgid = match (handle.owned, handle.pgid) {
            (true, Some(pgid)) => pgid,
            _ => {
                debug!("Service not owned by this run; nothing to stop");
                handle.state = ServiceState::TornDown;
                return None;
            }
        };

        info!("Stopping service process group {}", pgid);

        let warning = match self.signaller.signal_group(pgid, Signal::SIGTERM) {
            Ok(()) => {
                if Self::wait_for_exit(handle, self.grace_period).await {
                    debug!("Process group {} exited after SIGTERM", pgid);
                    None
                } else {
                    Some(self.escalate(handle, pgid).await)
                }
            }
            Err(Errno::ESRCH) => {
                debug!("Process group {} already exited", pgid);
                Self::wait_for_exit(handle, KILL_WAIT).await;
                None
            }
            Err(e) => {
                let warning = TeardownWarning {
                    pgid: pgid.as_raw(),
                    grace_period_ms: self.grace_period.as_millis() as u64,
                    detail: format!("failed to send SIGTERM: {}", e),
                };
                warn!("Teardown warning: {}", warning);
                Some(warning)
            }
        };

        handle.state = ServiceState::TornDown;
        handle.child = None;
        warning
    }

    async fn escalate(&self, handle: &mut ServiceHandle, pgid: Pid) -> TeardownWarning {
        warn!(
            "Process group {} did not exit within {} ms, sending SIGKILL",
            pgid,
            self.grace_period.as_millis()
        );

        let detail = match self.signaller.signal_group(pgid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {
                if Self::wait_for_exit(handle, KILL_WAIT).await {
                    "did not exit within grace period; killed with SIGKILL".to_string()
                } else {
                    error!("Process group {} survived SIGKILL", pgid);
                    "did not exit within grace period and survived SIGKILL".to_string()
                }
            }
            Err(e) => format!("did not exit within grace period; SIGKILL failed: {}", e),
        };

        TeardownWarning {
            pgid: pgid.as_raw(),
            grace_period_ms: self.grace_period.as_millis() as u64,
            detail,
        }
    }

    async fn wait_for_exit(handle: &mut ServiceHandle, limit: Duration) -> bool {
        let Some(child) = handle.child.as_mut() else {
            return true;
        };

        match tokio::time::timeout(limit, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Service leader exited: {}", status);
                true
            }
            Ok(Err(e)) => {
                debug!("Unable to reap service leader: {}", e);
                true
            }
            Err(_) => false,
        }
    }
}
