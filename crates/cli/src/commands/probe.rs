//! `readygate probe`: one reachability check, nothing launched

use anyhow::Context;
use clap::Args;
use std::process::ExitCode;

use readygate_harness::HarnessConfig;

use super::{build_prober, EXIT_FAILED};
use crate::output::{self, OutputFormat};

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Host to probe
    #[arg(long, env = "READYGATE_HOST")]
    pub host: Option<String>,

    /// Port to probe
    #[arg(short, long, env = "READYGATE_PORT")]
    pub port: Option<u16>,

    /// Probe this HTTP path for a 2xx instead of a bare TCP connect
    #[arg(long)]
    pub health_path: Option<String>,
}

pub async fn execute(
    args: ProbeArgs,
    mut config: HarnessConfig,
    format: OutputFormat,
) -> anyhow::Result<ExitCode> {
    if let Some(host) = args.host {
        config.service.host = host;
    }
    if let Some(port) = args.port {
        config.service.port = port;
    }
    if args.health_path.is_some() {
        config.readiness.health_path = args.health_path;
    }

    let address = config.address();
    let prober = build_prober(&config).context("cannot build readiness prober")?;
    let reachable = prober.is_reachable(&address).await;

    match format {
        OutputFormat::Json => output::print_json(&serde_json::json!({
            "address": address.to_string(),
            "reachable": reachable,
        })),
        OutputFormat::Text if reachable => {
            output::print_success(format_args!("{} is accepting connections", address))
        }
        OutputFormat::Text => output::print_error(format_args!("{} is not reachable", address)),
    }

    Ok(if reachable {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAILED)
    })
}
