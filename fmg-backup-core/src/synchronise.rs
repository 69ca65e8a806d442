//! High-level pipeline: walks the controller hierarchy and backs up every new revision.
//!
//! This module provides the run coordinator. One call to [`synchronise`]:
//!   - Lists all administrative domains
//!   - Lists the devices of every domain, domains running concurrently
//!   - Lists, filters and selects the revisions of every device, devices running concurrently
//!   - Fetches each selected revision and writes it through the [`ArtifactStore`]
//!   - Aggregates a [`RunSummary`] of everything processed, skipped and failed
//!
//! # Concurrency
//! A semaphore sized by [`SyncConfig::concurrency`] bounds controller work. Listing a
//! domain's devices takes one permit for the call. A device pipeline takes one permit
//! for its whole duration. A domain never holds a permit while its devices run.
//!
//! Workers report through a bounded channel. A single aggregator owns the summary.
//!
//! # Error Handling
//! - Authentication failures abort the whole run: the run token is cancelled and
//!   [`SyncError::Auth`] is returned.
//! - Every other failure is recorded against its node and siblings carry on.
//! - External cancellation stops new work. The partial summary comes back with
//!   `cancelled` set.
//!
//! # Navigation
//! - Main entrypoint: [`synchronise`]
//! - Supporting types: [`RunSummary`], [`RunEvent`](crate::summary::RunEvent).

use futures::future::join_all;
use tokio::sync::{mpsc, Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::contract::{ArtifactStore, ControllerApi, Device, Domain};
use crate::error::{RpcError, StoreError, SyncError};
use crate::selector;
use crate::summary::{FailureKind, NodeFailure, NodeKey, RunEvent, RunSummary};
use crate::walker::Walker;

const EVENT_BUFFER: usize = 256;

enum Message {
    Event(RunEvent),
    Fatal(RpcError),
}

struct RunContext<'a, A: ?Sized, S: ?Sized> {
    walker: Walker<'a, A>,
    api: &'a A,
    store: &'a S,
    permits: Semaphore,
    run: CancellationToken,
    tx: mpsc::Sender<Message>,
}

fn store_failure_kind(e: &StoreError) -> FailureKind {
    match e {
        StoreError::Conflict { .. } => FailureKind::Conflict,
        _ => FailureKind::Io,
    }
}

impl<'a, A, S> RunContext<'a, A, S>
where
    A: ControllerApi + ?Sized,
    S: ArtifactStore + ?Sized,
{
    async fn emit(&self, event: RunEvent) {
        // The aggregator outlives every worker, so a send can only fail after the run ended.
        let _ = self.tx.send(Message::Event(event)).await;
    }

    async fn fail(&self, kind: FailureKind, key: NodeKey, detail: String) {
        self.emit(RunEvent::Failed(NodeFailure { kind, key, detail }))
            .await;
    }

    /// Routes an RPC error: auth is fatal, cancellation is silent, the rest belong to `key`.
    async fn rpc_failure(&self, key: NodeKey, e: RpcError) {
        match e {
            RpcError::Auth { .. } => {
                error!(node = %key, error = %e, "[SYNC][FATAL] Authentication rejected, aborting run");
                let _ = self.tx.send(Message::Fatal(e)).await;
                self.run.cancel();
            }
            RpcError::Cancelled => {
                debug!(node = %key, "[SYNC] Call cancelled");
            }
            RpcError::Transient { .. } => {
                warn!(node = %key, error = %e, "[SYNC][ERROR] Transient failure, node skipped");
                self.fail(FailureKind::Transient, key, e.to_string()).await;
            }
            RpcError::Protocol(_) => {
                warn!(node = %key, error = %e, "[SYNC][ERROR] Unexpected controller response, node skipped");
                self.fail(FailureKind::Protocol, key, e.to_string()).await;
            }
        }
    }

    async fn acquire(&self) -> Option<SemaphorePermit<'_>> {
        tokio::select! {
            biased;
            _ = self.run.cancelled() => None,
            permit = self.permits.acquire() => permit.ok(),
        }
    }

    async fn run_all(&self) {
        let domains = match self.walker.list_domains().await {
            Ok(domains) => domains,
            Err(e) => {
                self.rpc_failure(NodeKey::controller(), e).await;
                return;
            }
        };
        info!(count = domains.len(), "[SYNC] Discovered ADOMs");
        self.emit(RunEvent::DomainsDiscovered(domains.len())).await;
        if domains.is_empty() {
            self.emit(RunEvent::Note("no administrative domains discovered".to_string()))
                .await;
            return;
        }

        join_all(domains.into_iter().map(|domain| self.run_domain(domain))).await;
    }

    async fn run_domain(&self, domain: Domain) {
        let devices = {
            let Some(_permit) = self.acquire().await else {
                return;
            };
            self.walker.list_devices(&domain).await
        };
        let devices = match devices {
            Ok(devices) => devices,
            Err(e) => {
                self.rpc_failure(NodeKey::domain(&domain.name), e).await;
                return;
            }
        };
        self.emit(RunEvent::DomainListed {
            devices: devices.len(),
        })
        .await;

        join_all(devices.into_iter().map(|device| self.run_device(&domain, device))).await;
        debug!(domain = %domain.name, "[SYNC] Domain finished");
    }

    async fn run_device(&self, domain: &Domain, device: Device) {
        let Some(_permit) = self.acquire().await else {
            return;
        };

        let listing = match self.walker.list_revisions(domain, &device).await {
            Ok(listing) => listing,
            Err(e) => {
                self.rpc_failure(NodeKey::device(&domain.name, &device.name), e)
                    .await;
                return;
            }
        };
        self.emit(RunEvent::DeviceListed).await;
        self.emit(RunEvent::RevisionsFiltered {
            discovered: listing.discovered,
            qualifying: listing.accepted.len(),
            below_cutoff: listing.below_cutoff,
            duplicates: listing.duplicates,
        })
        .await;
        for rejected in listing.rejected {
            self.emit(RunEvent::Failed(rejected)).await;
        }

        let selection =
            match selector::select(self.store, &domain.name, &device.name, listing.accepted).await {
                Ok(selection) => selection,
                Err(e) => {
                    error!(domain = %domain.name, device = %device.name, error = %e, "[SYNC][ERROR] Revision selection failed");
                    self.fail(
                        store_failure_kind(&e),
                        NodeKey::device(&domain.name, &device.name),
                        e.to_string(),
                    )
                    .await;
                    return;
                }
            };
        self.emit(RunEvent::RevisionsSelected {
            already_stored: selection.already_stored,
            duplicates: selection.duplicate_keys,
        })
        .await;
        info!(
            domain = %domain.name,
            device = %device.name,
            to_fetch = selection.to_fetch.len(),
            already_stored = selection.already_stored,
            "[SYNC] Revisions selected"
        );

        for (revision, key) in selection.to_fetch {
            if self.run.is_cancelled() {
                debug!(domain = %domain.name, device = %device.name, "[SYNC] Cancelled, not starting further downloads");
                break;
            }
            let node = NodeKey::revision(&domain.name, &device.name, revision.id);
            let content = match self
                .api
                .fetch_revision(&domain.name, &device.name, revision.id)
                .await
            {
                Ok(content) => content,
                Err(e) => {
                    self.rpc_failure(node, e).await;
                    continue;
                }
            };
            match self.store.write(&key, content.as_bytes()).await {
                Ok(outcome) => {
                    debug!(%key, revision = revision.id, ?outcome, "[SYNC] Revision stored");
                    self.emit(RunEvent::Stored(outcome)).await;
                }
                Err(e) => {
                    self.fail(store_failure_kind(&e), node, e.to_string()).await;
                }
            }
        }
    }
}

/// Runs one full backup pass.
///
/// Returns `Ok` for every run that was not aborted by an auth failure, including runs
/// with per-node failures, empty controllers and cancelled runs.
pub async fn synchronise<A, S>(
    config: &SyncConfig,
    api: &A,
    store: &S,
    cancel: &CancellationToken,
) -> Result<RunSummary, SyncError>
where
    A: ControllerApi + ?Sized,
    S: ArtifactStore + ?Sized,
{
    config.validate()?;
    let run_id = Uuid::new_v4();
    let span = info_span!("sync", %run_id);

    async move {
        info!(
            cutoff = %config.cutoff,
            output_dir = %config.output_dir.display(),
            concurrency = config.concurrency,
            "[SYNC] Starting configuration revision backup"
        );

        let run = cancel.child_token();
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let ctx = RunContext {
            walker: Walker::new(api, config.cutoff),
            api,
            store,
            permits: Semaphore::new(config.concurrency),
            run: run.clone(),
            tx,
        };

        let aggregator = async move {
            let mut summary = RunSummary::new(run_id);
            let mut fatal: Option<RpcError> = None;
            while let Some(message) = rx.recv().await {
                match message {
                    Message::Event(event) => summary.apply(event),
                    Message::Fatal(e) => {
                        fatal.get_or_insert(e);
                    }
                }
            }
            (summary, fatal)
        };

        let workers = async move {
            tokio::select! {
                biased;
                _ = ctx.run.cancelled() => {
                    debug!("[SYNC] Run token cancelled, dropping in-flight work");
                }
                _ = ctx.run_all() => {}
            }
            // `ctx` (and with it the last sender) drops here, which ends the aggregator.
        };

        let ((mut summary, fatal), ()) = tokio::join!(aggregator, workers);
        summary.finish();

        if let Some(e) = fatal {
            error!(error = %e, "[SYNC][ERROR] Run aborted");
            return Err(SyncError::Auth(e));
        }

        summary.cancelled = cancel.is_cancelled();
        if summary.revisions.qualifying == 0 && !summary.cancelled {
            summary
                .notes
                .push("no revisions found at or after the cutoff".to_string());
        }

        info!(
            domains = summary.domains.processed,
            devices = summary.devices.processed,
            written = summary.revisions.written,
            already_stored = summary.revisions.already_stored,
            failures = summary.failures.len(),
            cancelled = summary.cancelled,
            "[SYNC] Run complete"
        );
        Ok(summary)
    }
    .instrument(span)
    .await
}
