//! Hierarchy walker: domains → devices → revisions, with the cutoff filter applied.

use chrono::NaiveDateTime;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::config::INSTIME_FORMAT;
use crate::contract::{ControllerApi, Device, Domain, Revision, RevisionMeta};
use crate::error::{FilterParseError, RpcError};
use crate::summary::{FailureKind, NodeFailure, NodeKey};

/// Revisions of one device after validation, filtering and de-duplication.
#[derive(Debug, Default)]
pub struct RevisionListing {
    /// Revisions at or after the cutoff, in controller order.
    pub accepted: Vec<Revision>,
    pub discovered: usize,
    pub below_cutoff: usize,
    pub duplicates: usize,
    /// Entries excluded because their metadata was unusable.
    pub rejected: Vec<NodeFailure>,
}

pub struct Walker<'a, A: ?Sized> {
    api: &'a A,
    cutoff: NaiveDateTime,
}

pub fn parse_instime(value: Option<&str>) -> Result<NaiveDateTime, FilterParseError> {
    let value = value.ok_or(FilterParseError::Missing)?;
    NaiveDateTime::parse_from_str(value.trim(), INSTIME_FORMAT).map_err(|e| {
        FilterParseError::Malformed {
            value: value.to_string(),
            reason: e.to_string(),
        }
    })
}

impl<'a, A: ControllerApi + ?Sized> Walker<'a, A> {
    pub fn new(api: &'a A, cutoff: NaiveDateTime) -> Self {
        Self { api, cutoff }
    }

    pub fn cutoff(&self) -> NaiveDateTime {
        self.cutoff
    }

    pub async fn list_domains(&self) -> Result<Vec<Domain>, RpcError> {
        let domains = self.api.list_domains().await?;
        if domains.is_empty() {
            info!("No ADOM data found");
        }
        Ok(domains)
    }

    pub async fn list_devices(&self, domain: &Domain) -> Result<Vec<Device>, RpcError> {
        let devices = self.api.list_devices(&domain.name).await?;
        if devices.is_empty() {
            info!(domain = %domain.name, "No devices found in ADOM");
        }
        Ok(devices)
    }

    /// Fetches revision metadata for one device and keeps what is at or after the cutoff.
    ///
    /// Bad metadata never fails the device: such entries are returned in
    /// [`RevisionListing::rejected`] and the rest are still processed.
    pub async fn list_revisions(&self, domain: &Domain, device: &Device) -> Result<RevisionListing, RpcError> {
        let raw = self.api.list_revisions(&domain.name, &device.name).await?;
        let listing = self.filter(&domain.name, &device.name, raw);
        debug!(
            domain = %domain.name,
            device = %device.name,
            discovered = listing.discovered,
            accepted = listing.accepted.len(),
            below_cutoff = listing.below_cutoff,
            duplicates = listing.duplicates,
            rejected = listing.rejected.len(),
            "Filtered revisions"
        );
        Ok(listing)
    }

    fn filter(&self, domain: &str, device: &str, raw: Vec<RevisionMeta>) -> RevisionListing {
        let mut listing = RevisionListing {
            discovered: raw.len(),
            ..RevisionListing::default()
        };
        let mut seen = HashSet::new();

        for meta in raw {
            let Some(id) = meta.revision else {
                warn!(domain, device, ?meta, "Revision entry without a usable revision number");
                listing.rejected.push(NodeFailure {
                    kind: FailureKind::Protocol,
                    key: NodeKey::revision(domain, device, "?"),
                    detail: format!("revision entry without a usable revision number: {meta:?}"),
                });
                continue;
            };
            if !seen.insert(id) {
                debug!(domain, device, revision = id, "Skipping duplicate revision id");
                listing.duplicates += 1;
                continue;
            }
            let installed_at = match parse_instime(meta.instime.as_deref()) {
                Ok(ts) => ts,
                Err(e) => {
                    warn!(domain, device, revision = id, error = %e, "Date parsing error for revision");
                    listing.rejected.push(NodeFailure {
                        kind: FailureKind::FilterParse,
                        key: NodeKey::revision(domain, device, id),
                        detail: e.to_string(),
                    });
                    continue;
                }
            };
            if installed_at < self.cutoff {
                listing.below_cutoff += 1;
                continue;
            }
            listing.accepted.push(Revision { id, installed_at });
        }
        listing
    }
}
