use pretty_assertions::assert_eq;
use rightsizer_fingerprint::Fingerprint;
use rightsizer_store::{
    ConfigDraft, ConfigStore, EstimateOrigin, ResourceOverrides, StoreError,
};
use tempfile::TempDir;

fn draft(digest: &str, parent_version: Option<u64>) -> ConfigDraft {
    ConfigDraft {
        source_id: "demo".to_string(),
        fingerprint: Fingerprint::Content {
            digest: digest.to_string(),
            file_count: 1,
            total_bytes: 16,
        },
        memory_bytes: 256 * 1024 * 1024,
        cpu_millis: 1000,
        bandwidth_bytes_per_sec: 1_000_000,
        overrides: ResourceOverrides::default(),
        derived_from: EstimateOrigin::Llm,
        estimate_confidence: None,
        parent_version,
    }
}

#[tokio::test]
async fn first_commit_is_version_one() {
    let temp = TempDir::new().unwrap();
    let store = ConfigStore::open(temp.path());

    assert!(store.load().await.unwrap().is_none());

    let committed = store.commit(draft("abc123", None)).await.unwrap();
    assert_eq!(committed.version, 1);
    assert_eq!(committed.source_digest, "abc123");

    let loaded = store.load().await.unwrap().expect("config present");
    assert_eq!(loaded, committed);
}

#[tokio::test]
async fn versions_are_monotonic() {
    let temp = TempDir::new().unwrap();
    let store = ConfigStore::open(temp.path());

    let v1 = store.commit(draft("a", None)).await.unwrap();
    let v2 = store.commit(draft("b", Some(v1.version))).await.unwrap();
    let v3 = store.commit(draft("c", Some(v2.version))).await.unwrap();

    assert_eq!((v1.version, v2.version, v3.version), (1, 2, 3));
}

#[tokio::test]
async fn stale_parent_version_is_a_commit_conflict() {
    let temp = TempDir::new().unwrap();
    let store = ConfigStore::open(temp.path());

    let v1 = store.commit(draft("a", None)).await.unwrap();
    store.commit(draft("b", Some(v1.version))).await.unwrap();

    // A draft merged against v1 after v2 landed must be rejected.
    let err = store.commit(draft("c", Some(v1.version))).await.unwrap_err();
    match err {
        StoreError::CommitConflict { expected, found } => {
            assert_eq!(expected, Some(1));
            assert_eq!(found, Some(2));
        }
        other => panic!("expected CommitConflict, got {other:?}"),
    }

    // The head is untouched by the failed commit.
    let head = store.load().await.unwrap().expect("config present");
    assert_eq!(head.version, 2);
    assert_eq!(head.source_digest, "b");
}

#[tokio::test]
async fn history_is_ordered_oldest_first() {
    let temp = TempDir::new().unwrap();
    let store = ConfigStore::open(temp.path());

    let v1 = store.commit(draft("a", None)).await.unwrap();
    let v2 = store.commit(draft("b", Some(v1.version))).await.unwrap();
    let v3 = store.commit(draft("c", Some(v2.version))).await.unwrap();

    let history = store.history().await.unwrap();
    assert_eq!(
        history.iter().map(|c| c.version).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(history.last(), Some(&v3));
}

#[tokio::test]
async fn empty_store_has_empty_history() {
    let temp = TempDir::new().unwrap();
    let store = ConfigStore::open(temp.path());
    assert!(store.history().await.unwrap().is_empty());
}
