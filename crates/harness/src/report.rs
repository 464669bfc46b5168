//! Writing run results to disk

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::HarnessResult;
use crate::orchestrator::VerificationOutcome;

pub const RESULT_FILE: &str = "verification-result.json";

/// Outcome plus run metadata, as written to `verification-result.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub finished_at: DateTime<Utc>,
    pub base_url: String,
    pub outcome: VerificationOutcome,
    pub artifact_sha256: Option<String>,
}

impl RunReport {
    pub fn new(base_url: impl Into<String>, outcome: VerificationOutcome) -> HarnessResult<Self> {
        let artifact_sha256 = match &outcome.artifact_path {
            Some(path) if path.is_file() => Some(hash_file(path)?),
            _ => None,
        };

        Ok(Self {
            finished_at: Utc::now(),
            base_url: base_url.into(),
            outcome,
            artifact_sha256,
        })
    }
}

/// Hash a file using SHA256
pub fn hash_file(path: &Path) -> HarnessResult<String> {
    let data = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

/// Write the report as pretty JSON into `output_dir`
pub fn write_report(output_dir: &Path, report: &RunReport) -> HarnessResult<PathBuf> {
    std::fs::create_dir_all(output_dir)?;

    let path = output_dir.join(RESULT_FILE);
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, json)?;

    info!("Results written to: {}", path.display());
    Ok(path)
}
