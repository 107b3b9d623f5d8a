//! End-to-end search: compile the pattern, resolve the snapshot (with the
//! corrupt-snapshot retry), and run the matching engine off the runtime.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::StoreError;
use crate::store::SnapshotStore;
use snapgrep::search::DEFAULT_FILE_MATCH_LIMIT;
use snapgrep::{FileMatch, PatternSpec, SearchOpts, Snapshot};

/// How many times a (prepare, open) cycle may run before a persistently
/// corrupt snapshot is surfaced. Each failed attempt deletes the file.
const MAX_OPEN_ATTEMPTS: usize = 2;

/// Logical search request, transport-agnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
    pub repo: String,
    pub commit: String,
    pub fetch_timeout_ms: u64,
    pub pattern: String,
    pub is_regexp: bool,
    pub is_word_match: bool,
    pub is_case_sensitive: bool,
    pub is_negated: bool,
    pub include_patterns: Vec<String>,
    pub exclude_pattern: String,
    pub path_patterns_are_regexps: bool,
    pub path_patterns_are_case_sensitive: bool,
    pub file_match_limit: usize,
    pub pattern_matches_content: bool,
    pub pattern_matches_path: bool,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            repo: String::new(),
            commit: String::new(),
            fetch_timeout_ms: 500,
            pattern: String::new(),
            is_regexp: false,
            is_word_match: false,
            is_case_sensitive: false,
            is_negated: false,
            include_patterns: Vec::new(),
            exclude_pattern: String::new(),
            path_patterns_are_regexps: false,
            path_patterns_are_case_sensitive: false,
            file_match_limit: 0,
            pattern_matches_content: false,
            pattern_matches_path: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub matches: Vec<FileMatch>,
    pub limit_hit: bool,
    pub deadline_hit: bool,
}

#[derive(Clone)]
pub struct SearchService {
    store: SnapshotStore,
    max_search_duration: Duration,
}

impl SearchService {
    pub fn new(store: SnapshotStore, max_search_duration: Duration) -> Self {
        Self {
            store,
            max_search_duration,
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub async fn search(&self, req: &SearchRequest) -> Result<SearchResponse, StoreError> {
        if req.repo.is_empty() {
            return Err(StoreError::InvalidRequest("repo must not be empty".into()));
        }
        if req.pattern.is_empty() && !req.pattern_matches_path {
            return Err(StoreError::InvalidRequest(
                "pattern must not be empty for content searches".into(),
            ));
        }

        let spec = PatternSpec {
            pattern: req.pattern.clone(),
            is_regexp: req.is_regexp,
            is_word_match: req.is_word_match,
            is_case_sensitive: req.is_case_sensitive,
            is_negated: req.is_negated,
            include_patterns: req.include_patterns.clone(),
            exclude_pattern: req.exclude_pattern.clone(),
            path_patterns_are_regexps: req.path_patterns_are_regexps,
            path_patterns_are_case_sensitive: req.path_patterns_are_case_sensitive,
        };
        let compiled = snapgrep::compile::compile(&spec)?;

        let fetch_timeout = Duration::from_millis(req.fetch_timeout_ms.max(1));
        let snapshot = self.open_snapshot(&req.repo, &req.commit, fetch_timeout).await?;

        let opts = SearchOpts {
            file_match_limit: if req.file_match_limit == 0 {
                DEFAULT_FILE_MATCH_LIMIT
            } else {
                req.file_match_limit
            },
            match_content: req.pattern_matches_content,
            match_path: req.pattern_matches_path,
            negated: req.is_negated,
        };
        let deadline = Instant::now() + self.max_search_duration;
        let outcome = tokio::task::spawn_blocking(move || {
            snapgrep::search(&snapshot, &compiled, &opts, Some(deadline))
        })
        .await
        .map_err(|e| StoreError::Internal(format!("search task panicked: {}", e)))?
        .map_err(|e| StoreError::Internal(format!("{:#}", e)))?;

        Ok(SearchResponse {
            matches: outcome.matches,
            limit_hit: outcome.limit_hit,
            deadline_hit: outcome.deadline_hit,
        })
    }

    /// Prepare and open the snapshot, retrying once when the cached file
    /// turns out not to be a valid container (the bad file is deleted so
    /// the next attempt refetches).
    async fn open_snapshot(
        &self,
        repo: &str,
        commit: &str,
        fetch_timeout: Duration,
    ) -> Result<Arc<Snapshot>, StoreError> {
        let mut last_err = None;
        for attempt in 0..MAX_OPEN_ATTEMPTS {
            let path = self.store.prepare(repo, commit, fetch_timeout).await?;
            let open_path = path.clone();
            let opened = tokio::task::spawn_blocking(move || Snapshot::open(&open_path))
                .await
                .map_err(|e| StoreError::Internal(format!("open task panicked: {}", e)))?;
            match opened {
                Ok(snap) => return Ok(Arc::new(snap)),
                Err(e) if e.is_corrupt() => {
                    tracing::warn!(
                        repo = %repo,
                        commit = %commit,
                        attempt,
                        error = %e,
                        "cached snapshot is corrupt, refetching"
                    );
                    self.store.remove_snapshot(&path);
                    last_err = Some(StoreError::Corrupt(e.to_string()));
                }
                Err(e) => return Err(StoreError::Internal(e.to_string())),
            }
        }
        Err(match last_err {
            Some(e) => e,
            None => StoreError::Internal("snapshot open retry loop ran dry".into()),
        })
    }
}
