use chrono::{NaiveDate, NaiveDateTime};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::ConfigError;

pub const DEFAULT_OUTPUT_DIR: &str = "config_revisions";
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_MS: u64 = 250;

/// Timestamp format the controller uses for `instime`.
pub const INSTIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Fully resolved configuration for one run. Built once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub controller: ControllerConfig,
    /// Revisions installed before this instant are not backed up.
    pub cutoff: NaiveDateTime,
    pub output_dir: PathBuf,
    /// Upper bound on concurrent controller work units.
    pub concurrency: usize,
}

#[derive(Clone)]
pub struct ControllerConfig {
    /// Bare host (`192.168.1.99`) or base URL (`https://fmg.example:8443`).
    pub address: String,
    pub api_key: String,
    pub verify_tls: bool,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl fmt::Debug for ControllerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerConfig")
            .field("address", &self.address)
            .field("api_key", &"<redacted>")
            .field("verify_tls", &self.verify_tls)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exp)
    }
}

impl ControllerConfig {
    /// The JSON-RPC endpoint derived from the configured address.
    pub fn endpoint(&self) -> Result<reqwest::Url, ConfigError> {
        let address = self.address.trim();
        if address.is_empty() {
            return Err(ConfigError::EmptyAddress);
        }
        let base = if address.contains("://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", address.trim_end_matches('/'))
        };
        reqwest::Url::parse(&format!("{base}/jsonrpc")).map_err(|e| ConfigError::InvalidAddress {
            address: self.address.clone(),
            reason: e.to_string(),
        })
    }
}

impl SyncConfig {
    /// Startup precondition check. Nothing touches the network before this passes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.controller.endpoint()?;
        if self.controller.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if self.controller.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyOutputDir);
        }
        Ok(())
    }

    pub fn trace_loaded(&self) {
        info!(
            address = %self.controller.address,
            cutoff = %self.cutoff,
            output_dir = %self.output_dir.display(),
            concurrency = self.concurrency,
            api_key_set = !self.controller.api_key.is_empty(),
            api_key_len = self.controller.api_key.len(),
            "Loaded SyncConfig"
        );
        if !self.controller.verify_tls {
            warn!(
                address = %self.controller.address,
                "TLS certificate verification is DISABLED by configuration"
            );
        }
        debug!(?self, "SyncConfig loaded (full debug)");
    }
}

/// Parses a cutoff given as `YYYY-MM-DD` (midnight), `YYYY-MM-DD HH:MM:SS` or
/// `YYYY-MM-DDTHH:MM:SS`.
pub fn parse_cutoff(value: &str) -> Result<NaiveDateTime, ConfigError> {
    let trimmed = value.trim();
    for format in [INSTIME_FORMAT, "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(ts);
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| ConfigError::InvalidCutoff {
            value: value.to_string(),
        })
}
