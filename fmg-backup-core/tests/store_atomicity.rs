use fmg_backup_core::config::parse_cutoff;
use fmg_backup_core::contract::{ArtifactKey, ArtifactStore, WriteOutcome};
use fmg_backup_core::error::StoreError;
use fmg_backup_core::store::FsArtifactStore;
use futures::future::join_all;
use tempfile::tempdir;

fn key(domain: &str, device: &str, ts: &str) -> ArtifactKey {
    ArtifactKey::new(domain, device, parse_cutoff(ts).unwrap())
}

#[tokio::test]
async fn write_then_exists_and_identical_rewrite_is_unchanged() {
    let root = tempdir().unwrap();
    let store = FsArtifactStore::new(root.path());
    let key = key("root", "FGT-01", "2025-03-05 13:45:10");

    assert!(!store.exists(&key).await.unwrap());
    let first = store.write(&key, b"config v1\n").await.unwrap();
    assert_eq!(first, WriteOutcome::Written);
    assert!(store.exists(&key).await.unwrap());

    let path = root.path().join("root").join("FGT-01_2025-03-05_13-45-10.conf");
    assert_eq!(store.artifact_path(&key).unwrap(), path);
    assert_eq!(std::fs::read(&path).unwrap(), b"config v1\n");

    let second = store.write(&key, b"config v1\n").await.unwrap();
    assert_eq!(second, WriteOutcome::Unchanged);
}

#[tokio::test]
async fn differing_content_is_a_conflict_and_keeps_original() {
    let root = tempdir().unwrap();
    let store = FsArtifactStore::new(root.path());
    let key = key("root", "FGT-01", "2025-03-05 13:45:10");

    store.write(&key, b"original").await.unwrap();
    let err = store.write(&key, b"tampered").await.unwrap_err();

    assert!(matches!(err, StoreError::Conflict { .. }), "got {err:?}");
    let path = store.artifact_path(&key).unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"original");
}

#[tokio::test]
async fn crash_between_stage_and_commit_leaves_no_artifact() {
    let root = tempdir().unwrap();
    let store = FsArtifactStore::new(root.path());
    let key = key("branch", "FGT-02", "2025-03-07 00:00:00");

    let staged = store.stage(&key, b"half-way there").await.unwrap();
    let temp_path = staged.temp_path().to_path_buf();
    let final_path = staged.final_path().to_path_buf();
    assert!(temp_path.exists());
    assert_eq!(temp_path.parent(), final_path.parent());

    // Simulate the process dying before the rename: the staged file is never committed
    // and never cleaned up.
    std::mem::forget(staged);

    assert!(!final_path.exists());
    assert!(!store.exists(&key).await.unwrap());

    // A resumed run writes the artifact normally.
    assert_eq!(
        store.write(&key, b"complete").await.unwrap(),
        WriteOutcome::Written
    );
    assert_eq!(std::fs::read(&final_path).unwrap(), b"complete");
}

#[tokio::test]
async fn dropped_stage_removes_its_temporary_file() {
    let root = tempdir().unwrap();
    let store = FsArtifactStore::new(root.path());
    let key = key("root", "FGT-03", "2025-03-07 00:00:00");

    let staged = store.stage(&key, b"discard me").await.unwrap();
    let temp_path = staged.temp_path().to_path_buf();
    drop(staged);

    assert!(!temp_path.exists());
    assert!(!store.exists(&key).await.unwrap());
}

#[tokio::test]
async fn concurrent_writes_to_one_key_produce_a_single_artifact() {
    let root = tempdir().unwrap();
    let store = FsArtifactStore::new(root.path());
    let key = key("root", "FGT-04", "2025-03-08 08:08:08");

    let outcomes = join_all((0..8).map(|_| store.write(&key, b"same bytes"))).await;

    let written = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(WriteOutcome::Written)))
        .count();
    let unchanged = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(WriteOutcome::Unchanged)))
        .count();
    assert_eq!(written, 1);
    assert_eq!(unchanged, 7);

    let entries: Vec<_> = std::fs::read_dir(root.path().join("root"))
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(entries.len(), 1, "only the final artifact should remain: {entries:?}");
}

#[tokio::test]
async fn existing_domain_directory_is_fine() {
    let root = tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("root")).unwrap();
    let store = FsArtifactStore::new(root.path());

    let outcome = store
        .write(&key("root", "FGT-05", "2025-03-09 00:00:00"), b"x")
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Written);
}

#[tokio::test]
async fn unsafe_names_are_encoded_or_rejected() {
    let root = tempdir().unwrap();
    let store = FsArtifactStore::new(root.path());

    let path = store
        .artifact_path(&key("corp/emea", "fw:01", "2025-03-09 00:00:00"))
        .unwrap();
    assert_eq!(
        path,
        root.path().join("corp%2Femea").join("fw%3A01_2025-03-09_00-00-00.conf")
    );

    let err = store
        .write(&key("root", "..", "2025-03-09 00:00:00"), b"x")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidName(_)));
}

#[tokio::test]
async fn devices_differing_only_in_unsafe_characters_get_separate_artifacts() {
    let root = tempdir().unwrap();
    let store = FsArtifactStore::new(root.path());
    let colon = key("A", "fw:1", "2025-03-05 00:00:00");
    let underscore = key("A", "fw_1", "2025-03-05 00:00:00");

    assert_ne!(
        store.artifact_path(&colon).unwrap(),
        store.artifact_path(&underscore).unwrap()
    );
    assert_eq!(store.write(&colon, b"colon").await.unwrap(), WriteOutcome::Written);
    assert!(!store.exists(&underscore).await.unwrap());
    assert_eq!(
        store.write(&underscore, b"underscore").await.unwrap(),
        WriteOutcome::Written
    );
    assert_eq!(std::fs::read(store.artifact_path(&colon).unwrap()).unwrap(), b"colon");
}
