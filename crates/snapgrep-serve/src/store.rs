// Copyright 2025 Snapgrep Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Snapshot store: resolves a (repo, commit) pair to a locally cached,
//! randomly-accessible snapshot of searchable file content.
//!
//! Concurrent requests for the same key attach to one in-flight fetch
//! (single-flight); fetches run detached from any caller so a short
//! request deadline never wastes work other callers can still use; disk
//! usage is bounded by a periodic least-recently-used eviction pass keyed
//! on file mtime, which every cache hit refreshes.

use globset::{Glob, GlobSet, GlobSetBuilder};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;

use crate::error::StoreError;
use crate::fetch::{extract_tar_to_tempdir, ArchiveSource};
use crate::limiter::FetchLimiter;
use snapgrep::SnapshotWriter;

/// External per-entry exclusion hook, consulted once per archive entry
/// while building a snapshot. Returns true to exclude.
pub type EntryFilter = dyn Fn(&str, u64) -> bool + Send + Sync;

/// How many leading bytes are inspected for the binary heuristic.
const BINARY_SNIFF_LEN: usize = 256;

type FetchState = Option<Result<PathBuf, StoreError>>;

pub struct StoreOpts {
    pub cache_dir: PathBuf,
    pub max_cache_bytes: u64,
    /// Entries larger than this are dropped unless allow-listed.
    pub max_file_size: u64,
    /// Glob patterns naming large files that must be kept anyway.
    pub large_file_patterns: Vec<String>,
    pub source: Arc<dyn ArchiveSource>,
    pub limiter: FetchLimiter,
    pub entry_filter: Option<Arc<EntryFilter>>,
}

struct StoreInner {
    dir: PathBuf,
    max_cache_bytes: u64,
    max_file_size: u64,
    large_file_allow: GlobSet,
    filter_fingerprint: String,
    source: Arc<dyn ArchiveSource>,
    limiter: FetchLimiter,
    entry_filter: Option<Arc<EntryFilter>>,
    inflight: Mutex<HashMap<String, watch::Receiver<FetchState>>>,
}

#[derive(Clone)]
pub struct SnapshotStore {
    inner: Arc<StoreInner>,
}

impl SnapshotStore {
    pub fn new(opts: StoreOpts) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&opts.cache_dir)?;
        let mut allow = GlobSetBuilder::new();
        for pat in &opts.large_file_patterns {
            allow.add(Glob::new(pat)?);
        }
        // The fingerprint covers everything that changes which bytes land
        // in the cache, so a config change never serves stale snapshots.
        let mut hasher = Sha256::new();
        hasher.update(opts.max_file_size.to_le_bytes());
        for pat in &opts.large_file_patterns {
            hasher.update(pat.as_bytes());
            hasher.update([0]);
        }
        let filter_fingerprint = hex::encode(hasher.finalize());
        Ok(Self {
            inner: Arc::new(StoreInner {
                dir: opts.cache_dir,
                max_cache_bytes: opts.max_cache_bytes,
                max_file_size: opts.max_file_size,
                large_file_allow: allow.build()?,
                filter_fingerprint,
                source: opts.source,
                limiter: opts.limiter,
                entry_filter: opts.entry_filter,
                inflight: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.inner.dir
    }

    fn cache_path(&self, repo: &str, commit: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(repo.as_bytes());
        hasher.update([0]);
        hasher.update(commit.as_bytes());
        hasher.update([0]);
        hasher.update(self.inner.filter_fingerprint.as_bytes());
        self.inner
            .dir
            .join(format!("{}.snap", hex::encode(hasher.finalize())))
    }

    /// Resolve the snapshot for (repo, commit), fetching it from the
    /// archive source at most once across concurrent callers. The caller
    /// waits at most `timeout`; the fetch itself keeps running in the
    /// background on expiry so later callers still benefit.
    pub async fn prepare(
        &self,
        repo: &str,
        commit: &str,
        timeout: Duration,
    ) -> Result<PathBuf, StoreError> {
        if repo.is_empty() {
            return Err(StoreError::InvalidRequest("repo must not be empty".into()));
        }
        validate_commit(commit)?;
        let dest = self.cache_path(repo, commit);

        if std::fs::metadata(&dest).is_ok() {
            touch(&dest);
            tracing::debug!(repo = %repo, commit = %commit, "snapshot cache hit");
            return Ok(dest);
        }

        let key = dest
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut rx = {
            let mut map = self.inner.inflight.lock();
            match map.get(&key) {
                Some(rx) => {
                    tracing::debug!(repo = %repo, commit = %commit, "attaching to in-flight fetch");
                    rx.clone()
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    map.insert(key.clone(), rx.clone());
                    let store = self.clone();
                    let repo = repo.to_string();
                    let commit = commit.to_string();
                    let dest = dest.clone();
                    tokio::spawn(async move {
                        store.run_fetch(repo, commit, key, dest, tx).await;
                    });
                    rx
                }
            }
        };

        let wait = async move {
            loop {
                let current = rx.borrow().clone();
                if let Some(result) = current {
                    return result;
                }
                if rx.changed().await.is_err() {
                    return Err(StoreError::Internal(
                        "fetch task dropped without delivering a result".into(),
                    ));
                }
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::FetchTimeout),
        }
    }

    async fn run_fetch(
        self,
        repo: String,
        commit: String,
        key: String,
        dest: PathBuf,
        tx: watch::Sender<FetchState>,
    ) {
        let result = self.do_fetch(&repo, &commit, &dest).await;
        match &result {
            Ok(path) => tracing::info!(repo = %repo, commit = %commit, path = %path.display(), "snapshot fetched"),
            Err(e) => tracing::warn!(repo = %repo, commit = %commit, error = %e, "snapshot fetch failed"),
        }
        let _ = tx.send(Some(result));
        self.inner.inflight.lock().remove(&key);
    }

    async fn do_fetch(&self, repo: &str, commit: &str, dest: &Path) -> Result<PathBuf, StoreError> {
        if std::fs::metadata(dest).is_ok() {
            return Ok(dest.to_path_buf());
        }
        let mut permit = self
            .inner
            .limiter
            .acquire()
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        let inner = self.inner.clone();
        let repo_owned = repo.to_string();
        let commit_owned = commit.to_string();
        let dest_owned = dest.to_path_buf();
        let work = tokio::task::spawn_blocking(move || {
            fetch_and_pack(&inner, &repo_owned, &commit_owned, &dest_owned)
        });
        tokio::select! {
            res = work => match res {
                Ok(r) => r,
                Err(e) => Err(StoreError::Internal(format!("fetch task panicked: {}", e))),
            },
            _ = permit.revoked() => {
                tracing::warn!(repo = %repo, commit = %commit, "fetch slot revoked by limiter");
                Err(StoreError::Fetch {
                    message: "fetch aborted: concurrency limit lowered".into(),
                    temporary: true,
                })
            }
        }
    }

    /// Delete a cached snapshot (used by the corrupt-snapshot retry path).
    pub fn remove_snapshot(&self, path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove snapshot");
        }
    }

    /// One eviction pass: when the cache exceeds its budget, delete
    /// least-recently-used snapshots (oldest mtime first) until under it.
    /// Returns (bytes remaining, files removed).
    pub fn evict_once(&self) -> anyhow::Result<(u64, usize)> {
        let mut entries: Vec<(PathBuf, u64, SystemTime)> = Vec::new();
        for entry in std::fs::read_dir(&self.inner.dir)? {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("snap") {
                continue;
            }
            if let Ok(md) = entry.metadata() {
                let mtime = md.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                entries.push((path, md.len(), mtime));
            }
        }
        let mut total: u64 = entries.iter().map(|(_, len, _)| len).sum();
        if total <= self.inner.max_cache_bytes {
            return Ok((total, 0));
        }
        entries.sort_by_key(|(_, _, mtime)| *mtime);
        let mut removed = 0usize;
        for (path, len, _) in entries {
            if total <= self.inner.max_cache_bytes {
                break;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    total -= len;
                    removed += 1;
                    tracing::info!(path = %path.display(), bytes = len, "evicted snapshot");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "eviction failed");
                }
            }
        }
        Ok((total, removed))
    }

    /// Run the eviction pass forever at `interval`. Idempotent and safe to
    /// interleave with concurrent opens: opening touches mtime, so a
    /// freshly used snapshot sorts young.
    pub fn spawn_eviction_loop(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let s = store.clone();
                match tokio::task::spawn_blocking(move || s.evict_once()).await {
                    Ok(Ok((total, removed))) if removed > 0 => {
                        tracing::info!(total_bytes = total, removed, "eviction pass complete");
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "eviction pass failed"),
                    Err(e) => tracing::warn!(error = %e, "eviction task failed"),
                }
            }
        })
    }
}

fn validate_commit(commit: &str) -> Result<(), StoreError> {
    if commit.len() != 40 || !commit.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(StoreError::InvalidRequest(format!(
            "commit must be a resolved 40-character identifier, got {:?}",
            commit
        )));
    }
    Ok(())
}

/// Refresh a snapshot's mtime so the LRU eviction pass sees it as young.
fn touch(path: &Path) {
    let refresh = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .and_then(|f| f.set_modified(SystemTime::now()));
    if let Err(e) = refresh {
        tracing::debug!(path = %path.display(), error = %e, "failed to touch snapshot");
    }
}

fn looks_binary(content: &[u8]) -> bool {
    let sniff = &content[..content.len().min(BINARY_SNIFF_LEN)];
    sniff.contains(&0)
}

/// The blocking half of a fetch: pull the tar stream, extract it through
/// the external `tar` binary, filter the tree, and pack the survivors into
/// a snapshot container renamed atomically into the cache.
fn fetch_and_pack(
    inner: &StoreInner,
    repo: &str,
    commit: &str,
    dest: &Path,
) -> Result<PathBuf, StoreError> {
    let stream = inner
        .source
        .fetch_archive(repo, commit)
        .map_err(|e| StoreError::Fetch {
            message: e.message.clone(),
            temporary: e.temporary,
        })?;
    let td = extract_tar_to_tempdir(stream).map_err(|e| StoreError::Fetch {
        message: e.message.clone(),
        temporary: e.temporary,
    })?;

    let mut files: Vec<(String, PathBuf, u64)> = Vec::new();
    for entry in walkdir::WalkDir::new(td.path()).sort_by_file_name() {
        let entry = entry.map_err(|e| StoreError::Internal(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(td.path())
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .to_string_lossy()
            .into_owned();
        let size = entry
            .metadata()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .len();
        files.push((rel, entry.path().to_path_buf(), size));
    }

    let tmp = tempfile::NamedTempFile::new_in(&inner.dir)?;
    let mut writer = SnapshotWriter::new(tmp.as_file())?;
    let mut kept = 0usize;
    let mut dropped = 0usize;
    for (rel, full, size) in files {
        if let Some(filter) = &inner.entry_filter {
            if filter(&rel, size) {
                dropped += 1;
                continue;
            }
        }
        if size > inner.max_file_size && !inner.large_file_allow.is_match(&rel) {
            dropped += 1;
            continue;
        }
        let content = std::fs::read(&full)?;
        if looks_binary(&content) {
            // Track binaries by name only so path searches still see them.
            writer.append(&rel, &[])?;
        } else {
            writer.append(&rel, &content)?;
        }
        kept += 1;
    }
    writer.finish()?;
    tmp.persist(dest)
        .map_err(|e| StoreError::Internal(format!("persist snapshot: {}", e)))?;
    tracing::debug!(repo = %repo, commit = %commit, kept, dropped, "snapshot packed");
    Ok(dest.to_path_buf())
}
