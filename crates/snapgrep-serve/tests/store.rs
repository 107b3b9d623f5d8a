mod common;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use snapgrep_serve::{FetchError, StoreError};

use common::{new_store, new_store_with_budget, tar_bytes, FakeSource, COMMIT};

fn fixture_tar() -> Vec<u8> {
    tar_bytes(&[
        ("README.md", b"hello snapgrep\n".as_slice()),
        ("src/main.rs", b"fn main() {}\n"),
    ])
}

#[tokio::test]
async fn concurrent_prepares_trigger_exactly_one_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FakeSource::new(fixture_tar()).with_delay(Duration::from_millis(150)));
    let store = new_store(dir.path(), source.clone());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .prepare("org/repo", COMMIT, Duration::from_secs(5))
                .await
        }));
    }
    let mut paths = Vec::new();
    for h in handles {
        paths.push(h.await.unwrap().expect("prepare should succeed"));
    }
    assert_eq!(source.call_count(), 1, "single-flight must dedupe fetches");
    assert!(paths.windows(2).all(|w| w[0] == w[1]));
    assert!(paths[0].exists());
}

#[tokio::test]
async fn second_prepare_hits_the_disk_cache() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FakeSource::new(fixture_tar()));
    let store = new_store(dir.path(), source.clone());

    let p1 = store
        .prepare("org/repo", COMMIT, Duration::from_secs(5))
        .await
        .unwrap();
    let p2 = store
        .prepare("org/repo", COMMIT, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(p1, p2);
    assert_eq!(source.call_count(), 1);
}

#[tokio::test]
async fn different_commits_get_different_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FakeSource::new(fixture_tar()));
    let store = new_store(dir.path(), source.clone());

    let other_commit = "fedcba9876543210fedcba9876543210fedcba98";
    let p1 = store
        .prepare("org/repo", COMMIT, Duration::from_secs(5))
        .await
        .unwrap();
    let p2 = store
        .prepare("org/repo", other_commit, Duration::from_secs(5))
        .await
        .unwrap();
    assert_ne!(p1, p2);
    assert_eq!(source.call_count(), 2);
}

#[tokio::test]
async fn unresolved_commit_is_rejected_without_fetching() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FakeSource::new(fixture_tar()));
    let store = new_store(dir.path(), source.clone());

    for bad in ["HEAD", "main", "abc123", "", "g123456789abcdef0123456789abcdef01234567"] {
        let err = store
            .prepare("org/repo", bad, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(
            matches!(err, StoreError::InvalidRequest(_)),
            "commit {:?} gave {:?}",
            bad,
            err
        );
    }
    assert_eq!(source.call_count(), 0);
}

#[tokio::test]
async fn caller_timeout_leaves_the_fetch_running() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FakeSource::new(fixture_tar()).with_delay(Duration::from_millis(300)));
    let store = new_store(dir.path(), source.clone());

    let err = store
        .prepare("org/repo", COMMIT, Duration::from_millis(30))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::FetchTimeout), "got {:?}", err);

    // The detached fetch finishes and populates the cache for the next
    // caller without another upstream call.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let path = store
        .prepare("org/repo", COMMIT, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(path.exists());
    assert_eq!(source.call_count(), 1);
}

#[tokio::test]
async fn fetch_errors_propagate_to_every_waiter() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(
        FakeSource::new(Vec::new())
            .with_delay(Duration::from_millis(100))
            .failing(FetchError::temporary("upstream hiccup")),
    );
    let store = new_store(dir.path(), source.clone());

    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .prepare("org/repo", COMMIT, Duration::from_secs(5))
                .await
        }));
    }
    for h in handles {
        let err = h.await.unwrap().unwrap_err();
        assert!(err.temporary(), "expected temporary fetch error, got {:?}", err);
    }
    assert_eq!(source.call_count(), 1);
}

#[tokio::test]
async fn snapshot_contents_survive_the_filter_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let mut big = vec![b'x'; 2_000_000];
    big.push(b'\n');
    let mut binary = b"\x7fELF".to_vec();
    binary.push(0);
    binary.extend_from_slice(b"machine code");
    let tar = tar_bytes(&[
        ("keep.txt", b"text content\n".as_slice()),
        ("huge.bin", &big),
        ("tool", &binary),
    ]);
    let source = Arc::new(FakeSource::new(tar));
    let store = new_store(dir.path(), source);

    let path = store
        .prepare("org/repo", COMMIT, Duration::from_secs(5))
        .await
        .unwrap();
    let snap = snapgrep::Snapshot::open(&path).unwrap();
    let mut names: Vec<_> = snap.files().iter().map(|f| f.path.clone()).collect();
    names.sort();
    // The oversized file is dropped entirely; the binary survives as a
    // name-only entry.
    assert_eq!(names, vec!["keep.txt", "tool"]);
    let tool_idx = snap
        .files()
        .iter()
        .position(|f| f.path == "tool")
        .unwrap();
    assert_eq!(snap.content(tool_idx).unwrap(), b"");
    let keep_idx = snap
        .files()
        .iter()
        .position(|f| f.path == "keep.txt")
        .unwrap();
    assert_eq!(snap.content(keep_idx).unwrap(), b"text content\n");
}

#[tokio::test]
async fn entry_filter_excludes_files_at_fetch_time() {
    use snapgrep_serve::{FetchLimiter, SnapshotStore, StoreOpts};

    let dir = tempfile::tempdir().unwrap();
    let tar = tar_bytes(&[
        ("keep.txt", b"data\n".as_slice()),
        ("node_modules/dep.js", b"minified\n"),
    ]);
    let store = SnapshotStore::new(StoreOpts {
        cache_dir: dir.path().to_path_buf(),
        max_cache_bytes: 64 * 1024 * 1024,
        max_file_size: 1_000_000,
        large_file_patterns: Vec::new(),
        source: Arc::new(FakeSource::new(tar)),
        limiter: FetchLimiter::new(4),
        entry_filter: Some(Arc::new(|path: &str, _size: u64| {
            path.starts_with("node_modules/")
        })),
    })
    .unwrap();

    let path = store
        .prepare("org/repo", COMMIT, Duration::from_secs(5))
        .await
        .unwrap();
    let snap = snapgrep::Snapshot::open(&path).unwrap();
    let names: Vec<_> = snap.files().iter().map(|f| f.path.as_str()).collect();
    assert_eq!(names, vec!["keep.txt"]);
}

#[tokio::test]
async fn eviction_removes_least_recently_used_first() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FakeSource::new(fixture_tar()));
    // Budget below three 1000-byte snapshots.
    let store = new_store_with_budget(dir.path(), source, 2500);

    let mut paths = Vec::new();
    for (i, age_secs) in [300u64, 200, 100].iter().enumerate() {
        let path = dir.path().join(format!("snap{}.snap", i));
        std::fs::write(&path, vec![0u8; 1000]).unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(*age_secs);
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
        paths.push(path);
    }

    let (total, removed) = store.evict_once().unwrap();
    assert_eq!(removed, 1, "one eviction brings the cache under budget");
    assert!(total <= 2500);
    assert!(!paths[0].exists(), "oldest snapshot must go first");
    assert!(paths[1].exists());
    assert!(paths[2].exists());

    // A second pass under budget is a no-op.
    let (_, removed) = store.evict_once().unwrap();
    assert_eq!(removed, 0);
}
