//! Output formatting for CLI

use clap::ValueEnum;
use serde::Serialize;
use std::fmt;

use readygate_harness::{FailureReason, ServiceState, VerificationOutcome};

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable messages
    #[default]
    Text,
    /// JSON format
    Json,
}

/// Print a value as pretty JSON on stdout
pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => print_error(format_args!("Cannot serialize output: {}", e)),
    }
}

/// Print the result of a verification run
pub fn print_outcome(outcome: &VerificationOutcome, format: OutputFormat) {
    if format == OutputFormat::Json {
        print_json(outcome);
        return;
    }

    match &outcome.failure {
        None => {
            let artifact = outcome
                .artifact_path
                .as_ref()
                .map(|p| format!(" (artifact: {})", p.display()))
                .unwrap_or_default();
            print_success(format_args!(
                "Verification passed in {} ms{}",
                outcome.duration_ms, artifact
            ));
        }
        Some(FailureReason::Cancelled) => print_warning("Run cancelled"),
        Some(reason) => print_error(capitalize(&reason.to_string())),
    }

    if outcome.owned_service {
        if let Some(pgid) = outcome.service_pgid {
            print_info(format_args!("Stopped service process group {}", pgid));
        }
    } else if outcome.last_state != ServiceState::NotStarted {
        print_info("Service was already running; left untouched");
    }

    if let Some(warning) = &outcome.teardown_warning {
        print_warning(warning);
    }
}

/// Kind of a one-line status message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Passed,
    Failed,
    Warning,
    Note,
}

impl Status {
    fn marker(self) -> &'static str {
        match self {
            Status::Passed => "✅",
            Status::Failed => "❌",
            Status::Warning => "⚠️ ",
            Status::Note => "ℹ️ ",
        }
    }
}

fn status_line(status: Status, message: impl fmt::Display) -> String {
    format!("{} {}", status.marker(), message)
}

/// Failures and warnings go to stderr
fn emit(status: Status, message: impl fmt::Display) {
    let line = status_line(status, message);
    match status {
        Status::Passed | Status::Note => println!("{}", line),
        Status::Failed | Status::Warning => eprintln!("{}", line),
    }
}

pub fn print_success(message: impl fmt::Display) {
    emit(Status::Passed, message);
}

pub fn print_error(message: impl fmt::Display) {
    emit(Status::Failed, message);
}

pub fn print_warning(message: impl fmt::Display) {
    emit(Status::Warning, message);
}

pub fn print_info(message: impl fmt::Display) {
    emit(Status::Note, message);
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
