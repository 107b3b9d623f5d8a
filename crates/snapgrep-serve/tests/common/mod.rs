use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use snapgrep_serve::{ArchiveSource, FetchError, FetchLimiter, SnapshotStore, StoreOpts};

/// Build a tar stream for the given files using the external `tar`
/// binary, the same tool the store extracts with.
pub fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    for (path, content) in files {
        let full = dir.path().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
    }
    let out = std::process::Command::new("tar")
        .arg("-cf")
        .arg("-")
        .arg("-C")
        .arg(dir.path())
        .arg(".")
        .output()
        .unwrap();
    assert!(out.status.success(), "tar -c failed");
    out.stdout
}

/// Archive source over a fixed tar blob, counting invocations the way the
/// store sees them. `delay` simulates a slow upstream; `fail` makes every
/// fetch error out instead.
pub struct FakeSource {
    tar: Vec<u8>,
    pub calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
    fail: Option<FetchError>,
}

impl FakeSource {
    pub fn new(tar: Vec<u8>) -> Self {
        Self {
            tar,
            calls: Arc::new(AtomicUsize::new(0)),
            delay: None,
            fail: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self, err: FetchError) -> Self {
        self.fail = Some(err);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ArchiveSource for FakeSource {
    fn fetch_archive(
        &self,
        _repo: &str,
        _commit: &str,
    ) -> Result<Box<dyn Read + Send>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            std::thread::sleep(d);
        }
        if let Some(e) = &self.fail {
            return Err(e.clone());
        }
        Ok(Box::new(std::io::Cursor::new(self.tar.clone())))
    }
}

pub const COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

pub fn new_store(cache_dir: &Path, source: Arc<dyn ArchiveSource>) -> SnapshotStore {
    new_store_with_budget(cache_dir, source, 64 * 1024 * 1024)
}

pub fn new_store_with_budget(
    cache_dir: &Path,
    source: Arc<dyn ArchiveSource>,
    max_cache_bytes: u64,
) -> SnapshotStore {
    SnapshotStore::new(StoreOpts {
        cache_dir: cache_dir.to_path_buf(),
        max_cache_bytes,
        max_file_size: 1_000_000,
        large_file_patterns: Vec::new(),
        source,
        limiter: FetchLimiter::new(4),
        entry_filter: None,
    })
    .unwrap()
}
