//! Harness configuration
//!
//! `HarnessConfig` is the on-disk (TOML) shape; every field has a default so a
//! partial file, or no file at all, is valid. `HarnessConfig::into_target`
//! validates it and produces the immutable `ServiceTarget` used for one run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HarnessError, HarnessResult};
use crate::verify::playwright::Browser;

/// Upper bound (inclusive) for `readiness.connect_timeout_ms`
pub const MAX_CONNECT_TIMEOUT_MS: u64 = 999;

/// Host and port the service is expected to bind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAddress {
    pub host: String,
    pub port: u16,
}

impl ServiceAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Command used to start the service when it is not already running
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    /// Forward the service's stdout/stderr to ours instead of discarding it
    pub inherit_output: bool,
}

impl StartupCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
            env: BTreeMap::new(),
            inherit_output: false,
        }
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Everything one run needs to know about the service under test.
///
/// Built once from static configuration and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ServiceTarget {
    pub address: ServiceAddress,
    pub base_url: String,
    pub startup: StartupCommand,
    pub readiness_timeout: Duration,
    pub poll_interval: Duration,
    pub artifact_path: PathBuf,
    pub verify_timeout: Duration,
}

/// Harness configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub service: ServiceConfig,
    pub readiness: ReadinessConfig,
    pub verify: VerifyConfig,
    pub playwright: PlaywrightConfig,
    pub teardown: TeardownConfig,
}

/// Service location and startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub base_url: String,

    /// Startup command; first element is the executable
    pub command: Vec<String>,

    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub inherit_output: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            base_url: "http://localhost:3000".to_string(),
            command: vec!["npm".to_string(), "run".to_string(), "dev".to_string()],
            working_dir: None,
            env: BTreeMap::new(),
            inherit_output: false,
        }
    }
}

/// Readiness polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub connect_timeout_ms: u64,

    /// When set, readiness means `GET base_url + health_path` returns 2xx
    /// instead of a bare TCP connect
    pub health_path: Option<String>,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            poll_interval_ms: 1_000,
            connect_timeout_ms: 500,
            health_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifierKind {
    #[default]
    Playwright,
    Command,
}

/// Verification step selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub verifier: VerifierKind,
    pub artifact_path: PathBuf,
    pub timeout_ms: u64,

    /// External verifier for `verifier = "command"`
    pub command: Vec<String>,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            verifier: VerifierKind::Playwright,
            artifact_path: PathBuf::from("verification/screenshot.png"),
            timeout_ms: 120_000,
            command: Vec::new(),
        }
    }
}

/// Browser settings for the Playwright verifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaywrightConfig {
    pub browser: Browser,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub navigation_timeout_ms: u64,
    pub full_page: bool,

    /// Directory `playwright` is resolved from (defaults to the current dir)
    pub project_dir: Option<PathBuf>,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            viewport_width: 1366,
            viewport_height: 768,
            navigation_timeout_ms: 30_000,
            full_page: true,
            project_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TeardownConfig {
    pub grace_period_ms: u64,
}

impl Default for TeardownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 5_000,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from file, falling back to defaults if it is absent
    pub fn load(path: &Path) -> HarnessResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> HarnessResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| HarnessError::InvalidConfig(e.to_string()))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn address(&self) -> ServiceAddress {
        ServiceAddress::new(self.service.host.clone(), self.service.port)
    }

    /// Full health URL, if HTTP readiness is configured
    pub fn health_url(&self) -> Option<String> {
        self.readiness.health_path.as_ref().map(|path| {
            let base = self.service.base_url.trim_end_matches('/');
            if path.starts_with('/') {
                format!("{}{}", base, path)
            } else {
                format!("{}/{}", base, path)
            }
        })
    }

    /// Per-attempt connect timeout; must stay sub-second
    pub fn connect_timeout(&self) -> HarnessResult<Duration> {
        match self.readiness.connect_timeout_ms {
            ms @ 1..=MAX_CONNECT_TIMEOUT_MS => Ok(Duration::from_millis(ms)),
            other => Err(HarnessError::InvalidConfig(format!(
                "readiness.connect_timeout_ms must be between 1 and {}, got {}",
                MAX_CONNECT_TIMEOUT_MS, other
            ))),
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.teardown.grace_period_ms)
    }

    /// Validate and freeze into a `ServiceTarget`
    pub fn into_target(&self) -> HarnessResult<ServiceTarget> {
        let service = &self.service;

        if service.port == 0 {
            return Err(HarnessError::InvalidConfig(
                "service.port must be non-zero".to_string(),
            ));
        }
        if service.host.trim().is_empty() {
            return Err(HarnessError::InvalidConfig(
                "service.host must not be empty".to_string(),
            ));
        }
        if self.readiness.poll_interval_ms == 0 {
            return Err(HarnessError::InvalidConfig(
                "readiness.poll_interval_ms must be non-zero".to_string(),
            ));
        }
        self.connect_timeout()?;

        let url = reqwest::Url::parse(&service.base_url).map_err(|e| {
            HarnessError::InvalidConfig(format!("service.base_url '{}': {}", service.base_url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(HarnessError::InvalidConfig(format!(
                "service.base_url must be http or https, got '{}'",
                url.scheme()
            )));
        }

        let (program, args) = match service.command.split_first() {
            Some((program, args)) if !program.trim().is_empty() => (program.clone(), args.to_vec()),
            _ => {
                return Err(HarnessError::InvalidConfig(
                    "service.command must name an executable".to_string(),
                ))
            }
        };

        if self.verify.verifier == VerifierKind::Command && self.verify.command.is_empty() {
            return Err(HarnessError::InvalidConfig(
                "verify.command is required when verifier = \"command\"".to_string(),
            ));
        }

        Ok(ServiceTarget {
            address: self.address(),
            base_url: service.base_url.clone(),
            startup: StartupCommand {
                program,
                args,
                working_dir: service.working_dir.clone(),
                env: service.env.clone(),
                inherit_output: service.inherit_output,
            },
            readiness_timeout: Duration::from_millis(self.readiness.timeout_ms),
            poll_interval: Duration::from_millis(self.readiness.poll_interval_ms),
            artifact_path: self.verify.artifact_path.clone(),
            verify_timeout: Duration::from_millis(self.verify.timeout_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_case::test_case;

    #[test]
    fn test_defaults_produce_valid_target() {
        let target = HarnessConfig::default().into_target().unwrap();
        assert_eq!(target.address, ServiceAddress::new("127.0.0.1", 3000));
        assert_eq!(target.startup.program, "npm");
        assert_eq!(target.startup.args, vec!["run", "dev"]);
        assert_eq!(target.poll_interval, Duration::from_secs(1));
        assert_eq!(target.readiness_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_parse_partial_file() {
        let toml = r#"
[service]
port = 8080
base_url = "http://127.0.0.1:8080"
command = ["python3", "-m", "http.server", "8080"]

[readiness]
timeout_ms = 5000
health_path = "healthz"
"#;
        let config: HarnessConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.service.host, "127.0.0.1");
        assert_eq!(config.readiness.poll_interval_ms, 1_000);
        assert_eq!(
            config.health_url().as_deref(),
            Some("http://127.0.0.1:8080/healthz")
        );

        let target = config.into_target().unwrap();
        assert_eq!(target.readiness_timeout, Duration::from_secs(5));
        assert_eq!(target.startup.display(), "python3 -m http.server 8080");
    }

    #[test_case("[service]\nport = 0" ; "zero port")]
    #[test_case("[service]\ncommand = []" ; "empty command")]
    #[test_case("[service]\nbase_url = \"ftp://localhost\"" ; "non http url")]
    #[test_case("[service]\nbase_url = \"not a url\"" ; "unparseable url")]
    #[test_case("[readiness]\npoll_interval_ms = 0" ; "zero poll interval")]
    #[test_case("[verify]\nverifier = \"command\"" ; "command verifier without command")]
    #[test_case("[readiness]\nconnect_timeout_ms = 0" ; "zero connect timeout")]
    #[test_case("[readiness]\nconnect_timeout_ms = 1000" ; "connect timeout not sub second")]
    fn test_invalid_config_rejected(toml: &str) {
        let config: HarnessConfig = toml::from_str(toml).unwrap();
        match config.into_target() {
            Err(HarnessError::InvalidConfig(_)) => {}
            other => panic!("expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_connect_timeout_bounds() {
        let mut config = HarnessConfig::default();
        assert_eq!(config.connect_timeout().unwrap(), Duration::from_millis(500));

        config.readiness.connect_timeout_ms = MAX_CONNECT_TIMEOUT_MS;
        assert!(config.into_target().is_ok());

        config.readiness.connect_timeout_ms = 600_000;
        assert!(matches!(
            config.connect_timeout(),
            Err(HarnessError::InvalidConfig(msg)) if msg.contains("600000")
        ));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = HarnessConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.service.port, 3000);
    }

    #[test]
    fn test_save_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/readygate.toml");

        let mut config = HarnessConfig::default();
        config.service.port = 4321;
        config.playwright.browser = Browser::Firefox;
        config.save(&path).unwrap();

        let loaded = HarnessConfig::load(&path).unwrap();
        assert_eq!(loaded.service.port, 4321);
        assert_eq!(loaded.playwright.browser, Browser::Firefox);
    }

    #[test]
    fn test_address_display_brackets_ipv6() {
        assert_eq!(ServiceAddress::new("::1", 80).to_string(), "[::1]:80");
        assert_eq!(ServiceAddress::new("localhost", 80).to_string(), "localhost:80");
    }
}
