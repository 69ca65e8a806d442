//! # contract: the seams of the backup pipeline
//!
//! This module defines the two traits the coordinator is generic over, plus the plain
//! data types that flow between them:
//!
//! - [`ControllerApi`]: the walker's view of the controller (domains, devices,
//!   revision metadata, revision content). Production implementation:
//!   [`FortiManagerClient`](crate::controller::FortiManagerClient).
//! - [`ArtifactStore`]: existence checks and atomic writes of configuration snapshots.
//!   Production implementation: [`FsArtifactStore`](crate::store::FsArtifactStore).
//!
//! ## Mocking & Testing
//! Both traits are annotated for `mockall`. The generated `MockControllerApi` and
//! `MockArtifactStore` are exported under the default `test-export-mocks` feature so
//! integration tests can drive the coordinator without a controller.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::fmt;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::error::{RpcError, StoreError};

/// An administrative domain (ADOM) on the controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct Domain {
    pub name: String,
}

/// A managed device inside a domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct Device {
    pub name: String,
}

/// Revision metadata as the controller reports it. Either field may be absent.
///
/// `instime` holds the raw text; a non-string JSON value is kept as its JSON rendering
/// and fails timestamp parsing later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionMeta {
    pub revision: Option<u64>,
    pub instime: Option<String>,
}

impl RevisionMeta {
    pub fn new(revision: u64, instime: &str) -> Self {
        Self {
            revision: Some(revision),
            instime: Some(instime.to_string()),
        }
    }
}

/// A revision that passed validation and the cutoff filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub id: u64,
    pub installed_at: NaiveDateTime,
}

/// Identifies one stored artifact: (domain, device, revision timestamp).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub domain: String,
    pub device: String,
    pub timestamp: NaiveDateTime,
}

impl ArtifactKey {
    pub fn new(domain: &str, device: &str, timestamp: NaiveDateTime) -> Self {
        Self {
            domain: domain.to_string(),
            device: device.to_string(),
            timestamp,
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.domain, self.device, self.timestamp)
    }
}

/// What a successful write did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new artifact now exists at the final path.
    Written,
    /// The artifact was already there with identical content.
    Unchanged,
}

/// Read-only access to the controller hierarchy.
///
/// Errors are returned as-is; the caller decides whether a failure is fatal
/// ([`RpcError::Auth`]) or belongs to one node.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ControllerApi: Send + Sync {
    async fn list_domains(&self) -> Result<Vec<Domain>, RpcError>;

    async fn list_devices(&self, domain: &str) -> Result<Vec<Device>, RpcError>;

    /// Raw, unfiltered revision metadata for one device.
    async fn list_revisions(&self, domain: &str, device: &str) -> Result<Vec<RevisionMeta>, RpcError>;

    /// Configuration text of one revision.
    async fn fetch_revision(&self, domain: &str, device: &str, revision: u64) -> Result<String, RpcError>;
}

/// Durable storage of configuration snapshots, keyed by [`ArtifactKey`].
///
/// Implementations must make `write` atomic (no partial artifact is ever visible) and
/// must serialise concurrent writes to the same key.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn exists(&self, key: &ArtifactKey) -> Result<bool, StoreError>;

    async fn write(&self, key: &ArtifactKey, content: &[u8]) -> Result<WriteOutcome, StoreError>;
}
