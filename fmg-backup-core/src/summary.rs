//! Run summary and the events workers send to build it.
//!
//! Workers never touch the summary directly. They emit [`RunEvent`]s over a channel and
//! a single aggregator applies them in order.

use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

use crate::contract::WriteOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Protocol,
    FilterParse,
    Io,
    Conflict,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Transient => "transient",
            FailureKind::Protocol => "protocol",
            FailureKind::FilterParse => "filter-parse",
            FailureKind::Io => "io",
            FailureKind::Conflict => "conflict",
        };
        f.write_str(label)
    }
}

/// Where in the hierarchy something happened. `None` fields are above the failing level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeKey {
    pub domain: Option<String>,
    pub device: Option<String>,
    pub revision: Option<String>,
}

impl NodeKey {
    pub fn controller() -> Self {
        Self::default()
    }

    pub fn domain(domain: &str) -> Self {
        Self {
            domain: Some(domain.to_string()),
            ..Self::default()
        }
    }

    pub fn device(domain: &str, device: &str) -> Self {
        Self {
            domain: Some(domain.to_string()),
            device: Some(device.to_string()),
            revision: None,
        }
    }

    pub fn revision(domain: &str, device: &str, revision: impl ToString) -> Self {
        Self {
            domain: Some(domain.to_string()),
            device: Some(device.to_string()),
            revision: Some(revision.to_string()),
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.domain, &self.device, &self.revision) {
            (None, _, _) => f.write_str("<controller>"),
            (Some(domain), None, _) => write!(f, "{domain}"),
            (Some(domain), Some(device), None) => write!(f, "{domain}/{device}"),
            (Some(domain), Some(device), Some(rev)) => write!(f, "{domain}/{device}#{rev}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    pub kind: FailureKind,
    pub key: NodeKey,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeCounts {
    pub discovered: usize,
    pub processed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevisionCounts {
    /// Raw entries reported by the controller.
    pub discovered: usize,
    pub below_cutoff: usize,
    /// At or after the cutoff with usable metadata.
    pub qualifying: usize,
    /// Same revision id (or same artifact key) seen more than once for a device.
    pub duplicates: usize,
    /// Skipped because the artifact already exists.
    pub already_stored: usize,
    pub written: usize,
    /// Written concurrently elsewhere with identical content.
    pub unchanged: usize,
    pub failed: usize,
}

/// Messages from workers to the aggregator.
#[derive(Debug, Clone)]
pub enum RunEvent {
    DomainsDiscovered(usize),
    DomainListed { devices: usize },
    DeviceListed,
    RevisionsFiltered {
        discovered: usize,
        qualifying: usize,
        below_cutoff: usize,
        duplicates: usize,
    },
    RevisionsSelected {
        already_stored: usize,
        duplicates: usize,
    },
    Stored(WriteOutcome),
    Failed(NodeFailure),
    Note(String),
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub domains: NodeCounts,
    pub devices: NodeCounts,
    pub revisions: RevisionCounts,
    pub failures: Vec<NodeFailure>,
    pub notes: Vec<String>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            domains: NodeCounts::default(),
            devices: NodeCounts::default(),
            revisions: RevisionCounts::default(),
            failures: Vec::new(),
            notes: Vec::new(),
            cancelled: false,
        }
    }

    pub fn apply(&mut self, event: RunEvent) {
        match event {
            RunEvent::DomainsDiscovered(count) => self.domains.discovered += count,
            RunEvent::DomainListed { devices } => {
                self.domains.processed += 1;
                self.devices.discovered += devices;
            }
            RunEvent::DeviceListed => self.devices.processed += 1,
            RunEvent::RevisionsFiltered {
                discovered,
                qualifying,
                below_cutoff,
                duplicates,
            } => {
                self.revisions.discovered += discovered;
                self.revisions.qualifying += qualifying;
                self.revisions.below_cutoff += below_cutoff;
                self.revisions.duplicates += duplicates;
            }
            RunEvent::RevisionsSelected {
                already_stored,
                duplicates,
            } => {
                self.revisions.already_stored += already_stored;
                self.revisions.duplicates += duplicates;
            }
            RunEvent::Stored(WriteOutcome::Written) => self.revisions.written += 1,
            RunEvent::Stored(WriteOutcome::Unchanged) => self.revisions.unchanged += 1,
            RunEvent::Failed(failure) => {
                match (&failure.key.device, &failure.key.revision) {
                    (_, Some(_)) => self.revisions.failed += 1,
                    (Some(_), None) => self.devices.failed += 1,
                    (None, None) if failure.key.domain.is_some() => self.domains.failed += 1,
                    (None, None) => {}
                }
                self.failures.push(failure);
            }
            RunEvent::Note(note) => self.notes.push(note),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Revisions whose artifact exists after this run, whether written now or earlier.
    pub fn revisions_backed_up(&self) -> usize {
        self.revisions.written + self.revisions.unchanged + self.revisions.already_stored
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {} summary", self.run_id)?;
        if let Some(finished) = self.finished_at {
            let elapsed = finished - self.started_at;
            writeln!(f, "  duration:   {:.1}s", elapsed.num_milliseconds() as f64 / 1000.0)?;
        }
        writeln!(
            f,
            "  domains:    {} discovered, {} processed, {} failed",
            self.domains.discovered, self.domains.processed, self.domains.failed
        )?;
        writeln!(
            f,
            "  devices:    {} discovered, {} processed, {} failed",
            self.devices.discovered, self.devices.processed, self.devices.failed
        )?;
        let r = &self.revisions;
        writeln!(
            f,
            "  revisions:  {} discovered, {} qualifying, {} below cutoff, {} duplicate",
            r.discovered, r.qualifying, r.below_cutoff, r.duplicates
        )?;
        writeln!(
            f,
            "              {} already stored, {} written, {} unchanged, {} failed",
            r.already_stored, r.written, r.unchanged, r.failed
        )?;
        if self.cancelled {
            writeln!(f, "  run was cancelled before completion")?;
        }
        for note in &self.notes {
            writeln!(f, "  note: {note}")?;
        }
        if !self.failures.is_empty() {
            writeln!(f, "  failures ({}):", self.failures.len())?;
            for failure in &self.failures {
                writeln!(f, "    [{}] {}: {}", failure.kind, failure.key, failure.detail)?;
            }
        }
        Ok(())
    }
}
