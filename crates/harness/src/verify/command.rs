//! External command verification

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use super::{output_in_own_group, StepReport, VerificationStep};
use crate::error::{HarnessError, HarnessResult};

/// Runs an external verifier (e.g. a smoke-test script).
///
/// The URL and artifact path are appended to the argument list and exported
/// as `READYGATE_URL` / `READYGATE_ARTIFACT`. Exit status 0 means success.
#[derive(Debug, Clone)]
pub struct CommandStep {
    program: String,
    args: Vec<String>,
}

impl CommandStep {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_argv(argv: &[String]) -> HarnessResult<Self> {
        match argv.split_first() {
            Some((program, args)) => Ok(Self::new(program.clone(), args.to_vec())),
            None => Err(HarnessError::InvalidConfig(
                "verifier command is empty".to_string(),
            )),
        }
    }
}

#[async_trait]
impl VerificationStep for CommandStep {
    async fn verify(&self, url: &str, artifact_path: &Path) -> HarnessResult<StepReport> {
        info!("Running verifier: {} {}", self.program, self.args.join(" "));

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(url)
            .arg(artifact_path)
            .env("READYGATE_URL", url)
            .env("READYGATE_ARTIFACT", artifact_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = output_in_own_group(&mut cmd).await.map_err(|e| {
            HarnessError::Verification(format!("failed to run {}: {}", self.program, e))
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("verifier stdout: {}", stdout.trim());
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            return Ok(StepReport::failed(if stderr.is_empty() {
                format!("verifier exited with {}", output.status)
            } else {
                format!("verifier exited with {}: {}", output.status, stderr)
            }));
        }

        Ok(StepReport {
            success: true,
            artifact_path: artifact_path
                .exists()
                .then(|| artifact_path.to_path_buf()),
            error_detail: None,
        })
    }
}
