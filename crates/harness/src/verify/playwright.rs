//! Playwright browser verification

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use tokio::process::Command;
use tracing::{debug, info};

use super::{output_in_own_group, StepReport, VerificationStep};
use crate::config::PlaywrightConfig;
use crate::error::{HarnessError, HarnessResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl FromStr for Browser {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" | "safari" => Ok(Browser::Webkit),
            other => Err(format!("unknown browser '{}'", other)),
        }
    }
}

/// Result line printed by the generated script
#[derive(Debug, Deserialize)]
struct ScriptReport {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Opens the URL in a headless browser and saves a screenshot
#[derive(Debug, Clone)]
pub struct PlaywrightStep {
    config: PlaywrightConfig,
}

impl PlaywrightStep {
    pub fn new(config: PlaywrightConfig) -> Self {
        Self { config }
    }

    fn project_dir(&self) -> HarnessResult<PathBuf> {
        match &self.config.project_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    /// Check if Playwright is installed
    async fn check_playwright_installed(&self) -> HarnessResult<()> {
        let mut npx = Command::new("npx");
        npx.args(["--no-install", "playwright", "--version"])
            .current_dir(self.project_dir()?)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        match output_in_own_group(&mut npx).await {
            Ok(output) if output.status.success() => Ok(()),
            _ => Err(HarnessError::PlaywrightNotFound),
        }
    }

    /// Build the Node.js script that navigates and captures the artifact
    pub fn build_script(&self, url: &str, artifact_path: &Path) -> HarnessResult<String> {
        let url = serde_json::to_string(url)?;
        let artifact = serde_json::to_string(&artifact_path.to_string_lossy())?;

        Ok(format!(
            r#"
const {{ createRequire }} = require('module');
const projectRequire = createRequire(process.cwd() + '/');
const {{ {browser} }} = projectRequire('playwright');

(async () => {{
  let browser;
  try {{
    browser = await {browser}.launch({{ headless: true }});
    const context = await browser.newContext({{
      viewport: {{ width: {width}, height: {height} }}
    }});
    const page = await context.newPage();
    await page.goto({url}, {{ timeout: {nav_timeout} }});
    await page.screenshot({{ path: {artifact}, fullPage: {full_page} }});
    console.log(JSON.stringify({{ success: true }}));
  }} catch (error) {{
    console.log(JSON.stringify({{ success: false, error: error.message }}));
    process.exitCode = 1;
  }} finally {{
    if (browser) {{
      await browser.close();
    }}
  }}
}})();
"#,
            browser = self.config.browser.as_str(),
            width = self.config.viewport_width,
            height = self.config.viewport_height,
            url = url,
            nav_timeout = self.config.navigation_timeout_ms,
            artifact = artifact,
            full_page = self.config.full_page,
        ))
    }
}

/// Interpret the script's stdout and exit status
fn parse_script_output(stdout: &str, stderr: &str, exited_ok: bool) -> StepReport {
    let report = stdout
        .lines()
        .rev()
        .find_map(|line| serde_json::from_str::<ScriptReport>(line.trim()).ok());

    match report {
        Some(ScriptReport { success: true, .. }) if exited_ok => StepReport {
            success: true,
            artifact_path: None,
            error_detail: None,
        },
        Some(ScriptReport { error, .. }) => StepReport::failed(
            error.unwrap_or_else(|| "browser script reported failure".to_string()),
        ),
        None => {
            let stderr = stderr.trim();
            StepReport::failed(if stderr.is_empty() {
                "browser script produced no result".to_string()
            } else {
                format!("browser script failed: {}", stderr)
            })
        }
    }
}

#[async_trait]
impl VerificationStep for PlaywrightStep {
    async fn verify(&self, url: &str, artifact_path: &Path) -> HarnessResult<StepReport> {
        self.check_playwright_installed().await?;

        // node runs from the project dir, so hand it an absolute path
        let absolute_artifact = if artifact_path.is_absolute() {
            artifact_path.to_path_buf()
        } else {
            std::env::current_dir()?.join(artifact_path)
        };

        let script = self.build_script(url, &absolute_artifact)?;
        let temp_dir = tempfile::tempdir()?;
        let script_path = temp_dir.path().join("verify.js");
        std::fs::write(&script_path, script)?;

        info!(
            "Opening {} in {} ({}x{})",
            url,
            self.config.browser.as_str(),
            self.config.viewport_width,
            self.config.viewport_height
        );
        debug!("Running Playwright script: {}", script_path.display());

        let mut node = Command::new("node");
        node.arg(&script_path)
            .current_dir(self.project_dir()?)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let output = output_in_own_group(&mut node).await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut report = parse_script_output(&stdout, &stderr, output.status.success());

        if report.success {
            if absolute_artifact.is_file() {
                report.artifact_path = Some(artifact_path.to_path_buf());
            } else {
                report = StepReport::failed(format!(
                    "browser script succeeded but {} was not written",
                    absolute_artifact.display()
                ));
            }
        }
        Ok(report)
    }
}
