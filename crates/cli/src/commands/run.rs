//! `readygate run`: bring the service up, verify it, tear it down

use anyhow::Context;
use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use readygate_harness::config::VerifierKind;
use readygate_harness::report::{self, RunReport};
use readygate_harness::verify::{Browser, CommandStep, PlaywrightStep};
use readygate_harness::{
    FailureReason, Harness, HarnessConfig, LifecycleManager, VerificationOutcome,
    VerificationStep,
};

use super::{build_prober, EXIT_CANCELLED, EXIT_FAILED};
use crate::output::{self, OutputFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Verifier {
    /// Headless browser screenshot via Playwright
    Playwright,
    /// Any external command; exit status 0 means success
    Command,
}

impl From<Verifier> for VerifierKind {
    fn from(v: Verifier) -> Self {
        match v {
            Verifier::Playwright => VerifierKind::Playwright,
            Verifier::Command => VerifierKind::Command,
        }
    }
}

/// Flags override the configuration file field by field
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Host the service binds
    #[arg(long, env = "READYGATE_HOST")]
    pub host: Option<String>,

    /// Port the service binds
    #[arg(short, long, env = "READYGATE_PORT")]
    pub port: Option<u16>,

    /// Base URL handed to the verifier
    #[arg(long, env = "READYGATE_BASE_URL")]
    pub url: Option<String>,

    /// Readiness deadline in milliseconds
    #[arg(long, env = "READYGATE_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// Delay between readiness probes in milliseconds
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Poll this HTTP path for a 2xx instead of a bare TCP connect
    #[arg(long)]
    pub health_path: Option<String>,

    /// Working directory for the startup command
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Forward the service's stdout/stderr
    #[arg(long)]
    pub show_service_output: bool,

    /// Where the verifier writes its artifact
    #[arg(short, long, env = "READYGATE_ARTIFACT_PATH")]
    pub artifact: Option<PathBuf>,

    /// Verification step to run
    #[arg(long, value_enum)]
    pub verifier: Option<Verifier>,

    /// External verifier program and arguments, one shell word per value
    /// (implies --verifier command). Values end at the next option; pass an
    /// argument that starts with `-` as `--verify-command=-x` or put the
    /// command in the config file.
    #[arg(long, num_args = 1.., value_name = "ARG")]
    pub verify_command: Vec<String>,

    /// Verification step timeout in milliseconds
    #[arg(long)]
    pub verify_timeout_ms: Option<u64>,

    /// Browser for the Playwright verifier (chromium, firefox, webkit)
    #[arg(long)]
    pub browser: Option<Browser>,

    /// SIGTERM grace period before SIGKILL, in milliseconds
    #[arg(long)]
    pub grace_ms: Option<u64>,

    /// Directory to write verification-result.json into
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Startup command replacing the configured one
    #[arg(last = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    pub fn apply(&self, config: &mut HarnessConfig) {
        if let Some(host) = &self.host {
            config.service.host = host.clone();
        }
        if let Some(port) = self.port {
            config.service.port = port;
        }
        if let Some(url) = &self.url {
            config.service.base_url = url.clone();
        }
        if let Some(dir) = &self.workdir {
            config.service.working_dir = Some(dir.clone());
        }
        if self.show_service_output {
            config.service.inherit_output = true;
        }
        if !self.command.is_empty() {
            config.service.command = self.command.clone();
        }

        if let Some(ms) = self.timeout_ms {
            config.readiness.timeout_ms = ms;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.readiness.poll_interval_ms = ms;
        }
        if let Some(path) = &self.health_path {
            config.readiness.health_path = Some(path.clone());
        }

        if let Some(path) = &self.artifact {
            config.verify.artifact_path = path.clone();
        }
        if !self.verify_command.is_empty() {
            config.verify.command = self.verify_command.clone();
            config.verify.verifier = VerifierKind::Command;
        }
        if let Some(verifier) = self.verifier {
            config.verify.verifier = verifier.into();
        }
        if let Some(ms) = self.verify_timeout_ms {
            config.verify.timeout_ms = ms;
        }
        if let Some(browser) = self.browser {
            config.playwright.browser = browser;
        }

        if let Some(ms) = self.grace_ms {
            config.teardown.grace_period_ms = ms;
        }
    }
}

pub fn build_step(config: &HarnessConfig) -> anyhow::Result<Arc<dyn VerificationStep>> {
    let step: Arc<dyn VerificationStep> = match config.verify.verifier {
        VerifierKind::Playwright => Arc::new(PlaywrightStep::new(config.playwright.clone())),
        VerifierKind::Command => Arc::new(
            CommandStep::from_argv(&config.verify.command).context("invalid verify.command")?,
        ),
    };
    Ok(step)
}

pub fn exit_status(outcome: &VerificationOutcome) -> u8 {
    match &outcome.failure {
        None => 0,
        Some(FailureReason::Cancelled) => EXIT_CANCELLED,
        Some(_) => EXIT_FAILED,
    }
}

pub async fn execute(
    args: RunArgs,
    mut config: HarnessConfig,
    format: OutputFormat,
) -> anyhow::Result<ExitCode> {
    args.apply(&mut config);
    let target = config.into_target().context("invalid configuration")?;
    debug!("Resolved target: {:?}", target);

    let prober = build_prober(&config).context("cannot build readiness prober")?;
    let step = build_step(&config)?;
    let lifecycle = LifecycleManager::new(config.grace_period());

    let harness = Harness::new(prober, lifecycle, step);
    cancel_on_signal(harness.cancellation_token());

    let outcome = harness.run(&target).await;

    if let Some(dir) = &args.output {
        let written = RunReport::new(target.base_url.clone(), outcome.clone())
            .and_then(|report| report::write_report(dir, &report));
        if let Err(e) = written {
            output::print_warning(format_args!("Cannot write results to {}: {}", dir.display(), e));
        }
    }

    output::print_outcome(&outcome, format);
    Ok(ExitCode::from(exit_status(&outcome)))
}

/// Cancel `token` on the first SIGINT or SIGTERM
fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        warn!("Received shutdown signal; tearing down");
        token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                Ok(()) = tokio::signal::ctrl_c() => {}
                Some(()) = term.recv() => {}
                else => std::future::pending::<()>().await,
            }
        }
        Err(e) => {
            warn!("Cannot install SIGTERM handler: {}", e);
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use readygate_harness::ServiceState;
    use test_case::test_case;

    fn outcome(failure: Option<FailureReason>) -> VerificationOutcome {
        VerificationOutcome {
            success: failure.is_none(),
            failure,
            artifact_path: None,
            teardown_warning: None,
            owned_service: true,
            service_pgid: Some(4242),
            last_state: ServiceState::Failed,
            duration_ms: 10,
        }
    }

    #[test_case(None, 0 ; "success")]
    #[test_case(Some(FailureReason::Cancelled), EXIT_CANCELLED ; "cancelled")]
    #[test_case(Some(FailureReason::ReadinessTimeout { waited_ms: 10 }), EXIT_FAILED ; "timeout")]
    #[test_case(Some(FailureReason::Launch { detail: "x".into() }), EXIT_FAILED ; "launch")]
    fn test_exit_status(failure: Option<FailureReason>, expected: u8) {
        assert_eq!(exit_status(&outcome(failure)), expected);
    }

    #[test]
    fn test_flags_override_file() {
        let mut config = HarnessConfig::default();
        let args = RunArgs {
            port: Some(5173),
            url: Some("http://localhost:5173".to_string()),
            timeout_ms: Some(10_000),
            verify_command: vec!["python3".into(), "smoke.py".into(), "--headless".into()],
            command: vec!["npm".into(), "run".into(), "preview".into()],
            ..Default::default()
        };

        args.apply(&mut config);

        assert_eq!(config.service.port, 5173);
        assert_eq!(config.service.host, "127.0.0.1");
        assert_eq!(config.service.base_url, "http://localhost:5173");
        assert_eq!(config.service.command, vec!["npm", "run", "preview"]);
        assert_eq!(config.readiness.timeout_ms, 10_000);
        assert_eq!(config.readiness.poll_interval_ms, 1_000);
        assert_eq!(config.verify.verifier, VerifierKind::Command);
        assert_eq!(config.verify.command, vec!["python3", "smoke.py", "--headless"]);
    }

    #[derive(Debug, clap::Parser)]
    struct RunCli {
        #[command(flatten)]
        run: RunArgs,
    }

    fn parse(args: &[&str]) -> RunArgs {
        use clap::Parser;
        RunCli::try_parse_from(std::iter::once("run").chain(args.iter().copied()))
            .unwrap()
            .run
    }

    #[test]
    fn test_verify_command_keeps_words_intact() {
        let args = parse(&[
            "--verify-command",
            "python3",
            "my smoke.py",
            "--verify-command=--headless",
            "--port",
            "8080",
            "--",
            "npm",
            "start",
        ]);

        assert_eq!(
            args.verify_command,
            vec!["python3", "my smoke.py", "--headless"]
        );
        assert_eq!(args.port, Some(8080));
        assert_eq!(args.command, vec!["npm", "start"]);

        let mut config = HarnessConfig::default();
        args.apply(&mut config);
        assert_eq!(config.verify.command[1], "my smoke.py");
        assert_eq!(config.verify.verifier, VerifierKind::Command);
    }

    #[test]
    fn test_explicit_verifier_wins() {
        let mut config = HarnessConfig::default();
        let args = RunArgs {
            verify_command: vec!["true".into()],
            verifier: Some(Verifier::Playwright),
            ..Default::default()
        };

        args.apply(&mut config);
        assert_eq!(config.verify.verifier, VerifierKind::Playwright);
    }

    #[test]
    fn test_empty_trailing_command_keeps_config() {
        let mut config = HarnessConfig::default();
        RunArgs::default().apply(&mut config);
        assert_eq!(config.service.command, vec!["npm", "run", "dev"]);
    }

    #[test]
    fn test_command_verifier_without_command_is_rejected() {
        let mut config = HarnessConfig::default();
        config.verify.verifier = VerifierKind::Command;
        assert!(build_step(&config).is_err());
    }
}
