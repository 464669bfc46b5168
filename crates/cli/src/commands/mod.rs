//! CLI command implementations

pub mod init;
pub mod probe;
pub mod run;

use std::sync::Arc;

use readygate_harness::{HarnessConfig, HarnessResult, HttpProber, Prober, TcpProber};

/// Verification failed, timed out, or the service could not be launched
pub const EXIT_FAILED: u8 = 1;
/// Configuration or setup problem; nothing was verified
pub const EXIT_SETUP_ERROR: u8 = 2;
/// Interrupted by SIGINT/SIGTERM
pub const EXIT_CANCELLED: u8 = 130;

/// HTTP health check when a health path is configured, bare TCP otherwise
pub fn build_prober(config: &HarnessConfig) -> HarnessResult<Arc<dyn Prober>> {
    let prober: Arc<dyn Prober> = match config.health_url() {
        Some(url) => Arc::new(HttpProber::new(url, config.connect_timeout()?)?),
        None => Arc::new(TcpProber::new(config.connect_timeout()?)),
    };
    Ok(prober)
}
