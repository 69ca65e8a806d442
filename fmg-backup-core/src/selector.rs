//! Revision selection: which filtered revisions still need downloading.
//!
//! The only I/O here is the store's existence check; nothing is written.

use std::collections::HashSet;
use tracing::debug;

use crate::contract::{ArtifactKey, ArtifactStore, Revision};
use crate::error::StoreError;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Selection {
    /// Revisions to fetch, in controller order, paired with their artifact key.
    pub to_fetch: Vec<(Revision, ArtifactKey)>,
    pub already_stored: usize,
    /// Distinct revision ids that share an artifact key with an earlier revision.
    pub duplicate_keys: usize,
}

pub async fn select<S: ArtifactStore + ?Sized>(
    store: &S,
    domain: &str,
    device: &str,
    revisions: Vec<Revision>,
) -> Result<Selection, StoreError> {
    let mut selection = Selection::default();
    let mut keys = HashSet::new();

    for revision in revisions {
        let key = ArtifactKey::new(domain, device, revision.installed_at);
        if !keys.insert(key.clone()) {
            debug!(%key, revision = revision.id, "Another revision already maps to this artifact");
            selection.duplicate_keys += 1;
            continue;
        }
        if store.exists(&key).await? {
            debug!(%key, revision = revision.id, "Artifact already stored, skipping");
            selection.already_stored += 1;
            continue;
        }
        selection.to_fetch.push((revision, key));
    }
    Ok(selection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_cutoff;
    use crate::contract::MockArtifactStore;

    fn rev(id: u64, ts: &str) -> Revision {
        Revision {
            id,
            installed_at: parse_cutoff(ts).unwrap(),
        }
    }

    #[tokio::test]
    async fn skips_revisions_already_in_store() {
        let stored = parse_cutoff("2025-03-04 00:00:00").unwrap();
        let mut store = MockArtifactStore::new();
        store
            .expect_exists()
            .returning(move |key: &ArtifactKey| Ok(key.timestamp == stored));

        let selection = select(
            &store,
            "A",
            "D",
            vec![rev(1, "2025-03-04 00:00:00"), rev(2, "2025-03-05 00:00:00")],
        )
        .await
        .unwrap();

        assert_eq!(selection.already_stored, 1);
        assert_eq!(selection.to_fetch.len(), 1);
        assert_eq!(selection.to_fetch[0].0.id, 2);
        assert_eq!(selection.to_fetch[0].1.device, "D");
    }

    #[tokio::test]
    async fn same_timestamp_selects_only_first_revision() {
        let mut store = MockArtifactStore::new();
        store.expect_exists().times(1).returning(|_| Ok(false));

        let selection = select(
            &store,
            "A",
            "D",
            vec![rev(1, "2025-03-05 00:00:00"), rev(2, "2025-03-05 00:00:00")],
        )
        .await
        .unwrap();

        assert_eq!(selection.to_fetch.len(), 1);
        assert_eq!(selection.to_fetch[0].0.id, 1);
        assert_eq!(selection.duplicate_keys, 1);
    }

    #[tokio::test]
    async fn existence_check_errors_propagate() {
        let mut store = MockArtifactStore::new();
        store
            .expect_exists()
            .returning(|_| Err(StoreError::InvalidName("..".into())));

        let result = select(&store, "A", "..", vec![rev(1, "2025-03-05 00:00:00")]).await;
        assert!(matches!(result, Err(StoreError::InvalidName(_))));
    }
}
