//! Error taxonomy for the backup engine.
//!
//! Fatal kinds ([`ConfigError`], [`RpcError::Auth`]) stop a run. Every other kind
//! is caught at the node where it happens and recorded in the
//! [`RunSummary`](crate::summary::RunSummary) as a
//! [`NodeFailure`](crate::summary::NodeFailure).

use std::path::PathBuf;
use thiserror::Error;

/// Problems with the resolved configuration. Always raised before any network activity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("controller address must not be empty")]
    EmptyAddress,

    #[error("invalid controller address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("API key is missing or empty (set FMG_API_KEY)")]
    MissingApiKey,

    #[error("invalid cutoff '{value}': expected YYYY-MM-DD or YYYY-MM-DD HH:MM:SS")]
    InvalidCutoff { value: String },

    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("retry.max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("output directory must not be empty")]
    EmptyOutputDir,
}

/// Failure of a single remote call to the controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// Credentials were rejected. Every later call would fail the same way.
    #[error("authentication rejected by controller (HTTP {status})")]
    Auth { status: u16 },

    /// Network or server-side trouble that persisted through every retry.
    #[error("transient failure after {attempts} attempt(s): {message}")]
    Transient { attempts: u32, message: String },

    /// The controller answered, but not with the shape we expect.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("call cancelled")]
    Cancelled,
}

impl RpcError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, RpcError::Auth { .. })
    }
}

/// A revision timestamp that could not be interpreted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterParseError {
    #[error("revision has no instime")]
    Missing,

    #[error("unparsable instime '{value}': {reason}")]
    Malformed { value: String, reason: String },
}

/// Per-artifact persistence failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("name '{0}' cannot be used as a path component")]
    InvalidName(String),

    /// The artifact already exists with different content. It is left untouched.
    #[error("artifact {path} already exists with different content (existing sha256 {existing}, new sha256 {incoming})")]
    Conflict {
        path: PathBuf,
        existing: String,
        incoming: String,
    },

    #[error("background write task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors that end a whole run.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("run aborted: {0}")]
    Auth(RpcError),

    #[error("failed to build controller client: {0}")]
    Client(String),
}
