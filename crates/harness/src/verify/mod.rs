//! Verification steps run against a ready service

use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::debug;

use crate::error::HarnessResult;

pub mod command;
pub mod playwright;

pub use command::CommandStep;
pub use playwright::{Browser, PlaywrightStep};

/// What a verification step reports back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    pub success: bool,
    pub artifact_path: Option<PathBuf>,
    pub error_detail: Option<String>,
}

impl StepReport {
    pub fn passed(artifact_path: impl Into<PathBuf>) -> Self {
        Self {
            success: true,
            artifact_path: Some(artifact_path.into()),
            error_detail: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            artifact_path: None,
            error_detail: Some(detail.into()),
        }
    }
}

/// External check run once the service accepts connections.
///
/// The harness only relies on the URL going in and the report coming out;
/// an `Err` is treated the same as a failed report.
#[async_trait]
pub trait VerificationStep: Send + Sync {
    async fn verify(&self, url: &str, artifact_path: &Path) -> HarnessResult<StepReport>;
}

/// Kills a verifier's process group unless disarmed
struct GroupGuard {
    pgid: Option<Pid>,
}

impl GroupGuard {
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            debug!("Killing verifier process group {}", pgid);
            let _ = killpg(pgid, Signal::SIGKILL);
        }
    }
}

/// Run `cmd` to completion as the leader of its own process group.
///
/// If the returned future is dropped first (verify timeout, cancellation)
/// the whole group is killed, not just the direct child.
pub(crate) async fn output_in_own_group(cmd: &mut Command) -> io::Result<Output> {
    cmd.process_group(0).kill_on_drop(true);
    let child = cmd.spawn()?;
    let mut guard = GroupGuard {
        pgid: child.id().map(|pid| Pid::from_raw(pid as i32)),
    };
    let output = child.wait_with_output().await;
    guard.disarm();
    output
}
