/// `load_config` module: turns the YAML file plus the environment into a validated [`SyncConfig`].
///
/// This is the only place where untrusted YAML is parsed. The file carries no secrets;
/// the controller API key comes from `FMG_API_KEY`, which may be provided by an env file.
///
/// # Responsibilities
/// - Parse the YAML schema into serde structs, applying defaults for optional keys
/// - Load the env file (if any) and read the API key from the environment
/// - Parse the cutoff and map everything onto the core crate's [`SyncConfig`]
/// - Run [`SyncConfig::validate`] so a bad config never reaches the network
///
/// # Errors
/// All errors use `anyhow::Error` with context and are surfaced at the CLI boundary.
use anyhow::{anyhow, Context, Result};
use fmg_backup_core::config::{
    parse_cutoff, ControllerConfig, RetryPolicy, SyncConfig, DEFAULT_BACKOFF_MS,
    DEFAULT_CONCURRENCY, DEFAULT_MAX_ATTEMPTS, DEFAULT_OUTPUT_DIR, DEFAULT_TIMEOUT_SECS,
};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Environment variable holding the controller API key.
pub const API_KEY_ENV: &str = "FMG_API_KEY";

/// Env file consulted when none is given on the command line.
pub const DEFAULT_ENV_FILE: &str = "config.env";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    controller: ControllerSection,
    filter: FilterSection,
    #[serde(default = "default_output_dir")]
    output_dir: PathBuf,
    #[serde(default = "default_concurrency")]
    concurrency: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ControllerSection {
    address: String,
    #[serde(default = "default_true")]
    verify_tls: bool,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
    #[serde(default)]
    retry: RetrySection,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RetrySection {
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    backoff_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_ms: DEFAULT_BACKOFF_MS,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FilterSection {
    since: String,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_ms() -> u64 {
    DEFAULT_BACKOFF_MS
}

/// Loads environment variables from `env_file`.
///
/// An explicitly given file must exist. The default `config.env` is optional.
/// Variables already set in the process environment win over the file.
pub fn load_env_file(env_file: Option<&Path>) -> Result<()> {
    match env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("Failed to load env file {}", path.display()))?;
            info!(env_file = %path.display(), "Loaded env file");
        }
        None => match dotenvy::from_path(DEFAULT_ENV_FILE) {
            Ok(()) => info!(env_file = DEFAULT_ENV_FILE, "Loaded default env file"),
            Err(e) if e.not_found() => {
                debug!(env_file = DEFAULT_ENV_FILE, "No default env file present")
            }
            Err(e) => {
                warn!(error = %e, env_file = DEFAULT_ENV_FILE, "Ignoring unreadable default env file")
            }
        },
    }
    Ok(())
}

/// Loads the YAML config at `path`, injects the API key from the environment and
/// validates the result.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SyncConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let raw: RawConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let api_key = match env::var(API_KEY_ENV) {
        Ok(key) => key,
        Err(_) => {
            error!(variable = API_KEY_ENV, "API key not present in environment");
            String::new()
        }
    };

    let config = SyncConfig {
        controller: ControllerConfig {
            address: raw.controller.address,
            api_key,
            verify_tls: raw.controller.verify_tls,
            timeout: Duration::from_secs(raw.controller.timeout_secs),
            retry: RetryPolicy {
                max_attempts: raw.controller.retry.max_attempts,
                backoff_base: Duration::from_millis(raw.controller.retry.backoff_ms),
            },
        },
        cutoff: parse_cutoff(&raw.filter.since)?,
        output_dir: raw.output_dir,
        concurrency: raw.concurrency,
    };

    if let Err(e) = config.validate() {
        error!(error = %e, config_path = ?path_ref, "Configuration is invalid");
        return Err(e.into());
    }
    config.trace_loaded();
    Ok(config)
}
