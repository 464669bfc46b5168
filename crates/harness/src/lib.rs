//! Readygate harness
//!
//! Brings a dependent service to a ready state, runs an external check against
//! it, and guarantees the service is stopped afterwards:
//! - Probes whether the service is already listening
//! - Otherwise launches it as the leader of its own process group
//! - Polls for readiness under a bounded deadline
//! - Hands the base URL to a verification step (Playwright or any command)
//! - Tears down the process group it started, and only that one
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Harness::run(target) -> VerificationOutcome                │
//! ├─────────────────────────────────────────────────────────────┤
//! │    ├── Prober::is_reachable(address)                        │
//! │    │     ├── reachable   -> LifecycleManager::adopt()       │
//! │    │     └── unreachable -> LifecycleManager::launch(cmd)   │
//! │    ├── ReadinessPoller::await_ready(addr, interval, limit)  │
//! │    ├── VerificationStep::verify(url, artifact_path)         │
//! │    └── LifecycleManager::teardown(handle)   (always)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Process groups are a Unix concept; the harness targets Unix hosts.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod poller;
pub mod probe;
pub mod process;
pub mod report;
pub mod verify;

pub use config::{HarnessConfig, ServiceAddress, ServiceTarget, StartupCommand};
pub use error::{HarnessError, HarnessResult};
pub use orchestrator::{FailureReason, Harness, VerificationOutcome};
pub use poller::{Clock, ReadinessPoller, SystemClock};
pub use probe::{HttpProber, Prober, TcpProber};
pub use process::{
    KillpgSignaller, LifecycleManager, ProcessSignaller, ServiceHandle, ServiceState,
    TeardownWarning,
};
pub use verify::{StepReport, VerificationStep};
