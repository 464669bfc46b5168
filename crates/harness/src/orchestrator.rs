//! Verification run: probe, launch or adopt, wait, verify, tear down

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServiceTarget;
use crate::error::{HarnessError, HarnessResult};
use crate::poller::ReadinessPoller;
use crate::probe::Prober;
use crate::process::{LifecycleManager, ServiceHandle, ServiceState, TeardownWarning};
use crate::verify::{StepReport, VerificationStep};

/// Why a run did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    Launch { detail: String },
    ReadinessTimeout { waited_ms: u64 },
    Verification { detail: String },
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Launch { detail } => write!(f, "launch failed: {}", detail),
            FailureReason::ReadinessTimeout { waited_ms } => {
                write!(f, "service not ready within {} ms", waited_ms)
            }
            FailureReason::Verification { detail } => write!(f, "verification failed: {}", detail),
            FailureReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

impl From<HarnessError> for FailureReason {
    fn from(e: HarnessError) -> Self {
        match e {
            HarnessError::Launch { .. } => FailureReason::Launch {
                detail: e.to_string(),
            },
            HarnessError::ReadinessTimeout { waited } => FailureReason::ReadinessTimeout {
                waited_ms: waited.as_millis() as u64,
            },
            HarnessError::Cancelled => FailureReason::Cancelled,
            HarnessError::Verification(detail) => FailureReason::Verification { detail },
            other => FailureReason::Verification {
                detail: other.to_string(),
            },
        }
    }
}

/// The single externally observable result of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub success: bool,
    pub failure: Option<FailureReason>,
    pub artifact_path: Option<PathBuf>,
    pub teardown_warning: Option<TeardownWarning>,
    pub owned_service: bool,
    pub service_pgid: Option<i32>,
    /// Service state when the run settled, before teardown
    pub last_state: ServiceState,
    pub duration_ms: u64,
}

impl VerificationOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.failure, Some(FailureReason::Cancelled))
    }

    fn not_started(failure: FailureReason, start: Instant) -> Self {
        Self {
            success: false,
            failure: Some(failure),
            artifact_path: None,
            teardown_warning: None,
            owned_service: false,
            service_pgid: None,
            last_state: ServiceState::NotStarted,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// Drives one verification run against one service instance
pub struct Harness {
    prober: Arc<dyn Prober>,
    poller: ReadinessPoller,
    lifecycle: LifecycleManager,
    step: Arc<dyn VerificationStep>,
    cancel: CancellationToken,
}

impl Harness {
    pub fn new(
        prober: Arc<dyn Prober>,
        lifecycle: LifecycleManager,
        step: Arc<dyn VerificationStep>,
    ) -> Self {
        Self {
            poller: ReadinessPoller::new(prober.clone()),
            prober,
            lifecycle,
            step,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the readiness poller (e.g. one with a manual clock)
    pub fn with_poller(mut self, poller: ReadinessPoller) -> Self {
        self.poller = poller;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the full verification against `target`.
    ///
    /// Never returns an error: every failure is folded into the outcome. A
    /// service launched here is torn down before this returns, whatever
    /// happened in between; a service found already running is left alone.
    pub async fn run(&self, target: &ServiceTarget) -> VerificationOutcome {
        let start = Instant::now();
        info!("Verifying {} (service address {})", target.base_url, target.address);

        if self.cancel.is_cancelled() {
            return VerificationOutcome::not_started(FailureReason::Cancelled, start);
        }

        let mut handle = if self.prober.is_reachable(&target.address).await {
            self.lifecycle.adopt()
        } else {
            match self.lifecycle.launch(&target.startup) {
                Ok(handle) => handle,
                Err(e) => {
                    error!("{}", e);
                    return VerificationOutcome::not_started(e.into(), start);
                }
            }
        };

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!("Cancellation requested; stopping run");
                Err(HarnessError::Cancelled)
            }
            result = self.drive(target, &mut handle) => result,
        };

        let last_state = handle.state();
        let owned_service = handle.is_owned();
        let service_pgid = handle.pgid();

        let teardown_warning = self.lifecycle.teardown(&mut handle).await;
        if let Some(warning) = &teardown_warning {
            warn!("Teardown warning: {}", warning);
        }

        let (success, failure, artifact_path) = match result {
            Ok(report) if report.success => (true, None, report.artifact_path),
            Ok(report) => {
                let detail = report
                    .error_detail
                    .unwrap_or_else(|| "verification step reported failure".to_string());
                (
                    false,
                    Some(FailureReason::Verification { detail }),
                    report.artifact_path,
                )
            }
            Err(e) => (false, Some(e.into()), None),
        };

        let outcome = VerificationOutcome {
            success,
            failure,
            artifact_path,
            teardown_warning,
            owned_service,
            service_pgid,
            last_state,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        match &outcome.failure {
            None => info!("Verification passed ({} ms)", outcome.duration_ms),
            Some(reason) => error!("Run failed: {}", reason),
        }

        outcome
    }

    async fn drive(
        &self,
        target: &ServiceTarget,
        handle: &mut ServiceHandle,
    ) -> HarnessResult<StepReport> {
        if handle.state() == ServiceState::Starting {
            let ready = self
                .poller
                .await_ready(&target.address, target.poll_interval, target.readiness_timeout)
                .await;

            if !ready {
                handle.transition(ServiceState::Failed)?;
                return Err(HarnessError::ReadinessTimeout {
                    waited: target.readiness_timeout,
                });
            }

            handle.transition(ServiceState::Ready)?;
            info!("Service ready at {}", target.address);
        }

        handle.transition(ServiceState::Verifying)?;

        match self.run_step(target).await {
            Ok(report) if report.success => {
                handle.transition(ServiceState::Succeeded)?;
                Ok(report)
            }
            other => {
                handle.transition(ServiceState::Failed)?;
                other
            }
        }
    }

    /// Invoke the verification step, bounded in time and shielded from panics
    async fn run_step(&self, target: &ServiceTarget) -> HarnessResult<StepReport> {
        if let Some(parent) = target.artifact_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    HarnessError::Verification(format!(
                        "cannot create artifact directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        // Only a file written by this run's step may be reported
        match tokio::fs::remove_file(&target.artifact_path).await {
            Ok(()) => debug!(
                "Removed stale artifact {}",
                target.artifact_path.display()
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(HarnessError::Verification(format!(
                    "cannot remove stale artifact {}: {}",
                    target.artifact_path.display(),
                    e
                )))
            }
        }

        let step = AssertUnwindSafe(self.step.verify(&target.base_url, &target.artifact_path))
            .catch_unwind();

        match tokio::time::timeout(target.verify_timeout, step).await {
            Err(_) => Err(HarnessError::Verification(format!(
                "verification step timed out after {} ms",
                target.verify_timeout.as_millis()
            ))),
            Ok(Err(panic)) => Err(HarnessError::Verification(format!(
                "verification step panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Ok(Ok(Err(e @ HarnessError::Verification(_)))) => Err(e),
            Ok(Ok(Err(e))) => Err(HarnessError::Verification(e.to_string())),
            Ok(Ok(Ok(report))) => Ok(report),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
