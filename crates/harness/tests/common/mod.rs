//! Shared fixtures for the harness integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use readygate_harness::{
    Clock, HarnessError, HarnessResult, KillpgSignaller, ProcessSignaller, Prober,
    ServiceAddress, StartupCommand, StepReport, VerificationStep,
};

/// Real `killpg` that also records every signal it sends
#[derive(Default)]
pub struct CountingSignaller {
    inner: KillpgSignaller,
    sent: Mutex<Vec<Signal>>,
}

impl CountingSignaller {
    pub fn sent(&self) -> Vec<Signal> {
        self.sent.lock().unwrap().clone()
    }
}

impl ProcessSignaller for CountingSignaller {
    fn signal_group(&self, pgid: Pid, signal: Signal) -> nix::Result<()> {
        self.sent.lock().unwrap().push(signal);
        self.inner.signal_group(pgid, signal)
    }
}

/// Clock whose time only moves when something sleeps on it
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        *self.now.lock().unwrap() += duration;
    }
}

/// Reachable from the given (1-based) call onwards; `None` means never
pub struct ReachableAfter {
    attempt: Option<usize>,
    calls: AtomicUsize,
}

impl ReachableAfter {
    pub fn new(attempt: Option<usize>) -> Self {
        Self {
            attempt,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn never() -> Self {
        Self::new(None)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ReachableAfter {
    async fn is_reachable(&self, _address: &ServiceAddress) -> bool {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.attempt.map(|n| call >= n).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Pass,
    Fail(&'static str),
    Error(&'static str),
    Panic,
    Hang,
}

#[derive(Debug, Clone)]
pub struct StepCall {
    pub url: String,
    pub artifact_path: PathBuf,
    pub artifact_dir_existed: bool,
}

/// Verification step with scripted behaviour that records its calls
pub struct RecordingStep {
    behavior: Behavior,
    calls: Mutex<Vec<StepCall>>,
}

impl RecordingStep {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<StepCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl VerificationStep for RecordingStep {
    async fn verify(&self, url: &str, artifact_path: &Path) -> HarnessResult<StepReport> {
        self.calls.lock().unwrap().push(StepCall {
            url: url.to_string(),
            artifact_path: artifact_path.to_path_buf(),
            artifact_dir_existed: artifact_path.parent().map(Path::is_dir).unwrap_or(true),
        });

        match self.behavior {
            Behavior::Pass => {
                std::fs::write(artifact_path, b"png")?;
                Ok(StepReport::passed(artifact_path))
            }
            Behavior::Fail(detail) => Ok(StepReport::failed(detail)),
            Behavior::Error(detail) => Err(HarnessError::Verification(detail.to_string())),
            Behavior::Panic => panic!("browser crashed"),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(StepReport::failed("hung step woke up"))
            }
        }
    }
}

pub fn sh(script: &str) -> StartupCommand {
    StartupCommand::new("sh", ["-c", script])
}

/// Whether `pid` is a live (non-zombie) process
pub fn is_running(pid: i32) -> bool {
    if cfg!(target_os = "linux") {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            // state is the first field after the parenthesised command name
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next())
                .map(|state| state != "Z" && state != "X")
                .unwrap_or(false),
            Err(_) => false,
        }
    } else {
        nix::sys::signal::kill(Pid::from_raw(pid), None).is_ok()
    }
}

pub async fn wait_until<F: Fn() -> bool>(condition: F, limit: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
