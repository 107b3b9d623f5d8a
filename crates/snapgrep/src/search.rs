//! Concurrent search over an open snapshot: a fixed pool of workers pulls
//! files from a shared cursor, applies the compiled pattern, and merges
//! results under caps and a soft deadline.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use crate::compile::CompiledPattern;
use crate::matcher::find_matches;
use crate::snapshot::Snapshot;
use crate::types::FileMatch;

/// Default cap on file matches per search when the caller supplies none.
pub const DEFAULT_FILE_MATCH_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct SearchOpts {
    pub file_match_limit: usize,
    pub match_content: bool,
    pub match_path: bool,
    pub negated: bool,
}

impl Default for SearchOpts {
    fn default() -> Self {
        Self {
            file_match_limit: DEFAULT_FILE_MATCH_LIMIT,
            match_content: true,
            match_path: false,
            negated: false,
        }
    }
}

/// A search result. `limit_hit` and `deadline_hit` mark successful but
/// partial responses; they are not errors.
#[derive(Debug, Default)]
pub struct SearchOutcome {
    pub matches: Vec<FileMatch>,
    pub limit_hit: bool,
    pub deadline_hit: bool,
}

/// Run `pat` over every file of `snap`.
///
/// The caller's `deadline` is shortened to 90% of the remaining budget so
/// the engine can stop gracefully and return what it has (`deadline_hit`)
/// instead of being killed mid-response. A per-file processing error
/// aborts the whole search; the first error wins and the remaining
/// workers stop at the shared cancel flag.
pub fn search(
    snap: &Snapshot,
    pat: &CompiledPattern,
    opts: &SearchOpts,
    deadline: Option<Instant>,
) -> anyhow::Result<SearchOutcome> {
    let (match_content, match_path) = if !opts.match_content && !opts.match_path {
        (true, false)
    } else {
        (opts.match_content, opts.match_path)
    };

    // Path-only with no content regex needs no worker pool: testing a path
    // is cheap, so scan sequentially and stop at the cap.
    if pat.regex.is_none() && match_path && !match_content {
        let mut matches = Vec::new();
        let mut limit_hit = false;
        for entry in snap.files() {
            if pat.paths.matches(&entry.path) != !opts.negated {
                continue;
            }
            if matches.len() >= opts.file_match_limit {
                limit_hit = true;
                break;
            }
            matches.push(FileMatch {
                path: entry.path.clone(),
                line_matches: Vec::new(),
                limit_hit: false,
            });
        }
        return Ok(SearchOutcome {
            matches,
            limit_hit,
            deadline_hit: false,
        });
    }

    let soft_deadline = deadline.map(|d| {
        let now = Instant::now();
        if d <= now {
            now
        } else {
            now + (d - now).mul_f64(0.9)
        }
    });

    let files = snap.files();
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .clamp(1, 8);

    let cursor = AtomicUsize::new(0);
    let cancel = AtomicBool::new(false);
    let deadline_hit = AtomicBool::new(false);
    let hit_limit = AtomicBool::new(false);
    let skipped = AtomicUsize::new(0);
    let results: Mutex<Vec<FileMatch>> = Mutex::new(Vec::new());
    let first_err: Mutex<Option<anyhow::Error>> = Mutex::new(None);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()?;
    pool.scope(|s| {
        for _ in 0..workers {
            s.spawn(|_| loop {
                if cancel.load(Ordering::SeqCst) {
                    break;
                }
                if let Some(d) = soft_deadline {
                    if Instant::now() >= d {
                        deadline_hit.store(true, Ordering::SeqCst);
                        cancel.store(true, Ordering::SeqCst);
                        break;
                    }
                }
                let i = cursor.fetch_add(1, Ordering::SeqCst);
                if i >= files.len() {
                    break;
                }
                let path = files[i].path.as_str();
                if !pat.paths.matches(path) {
                    skipped.fetch_add(1, Ordering::SeqCst);
                    continue;
                }
                let content = match snap.content(i) {
                    Ok(c) => c,
                    Err(e) => {
                        let mut guard = first_err.lock();
                        if guard.is_none() {
                            *guard = Some(anyhow::anyhow!("{}: {}", path, e));
                        }
                        cancel.store(true, Ordering::SeqCst);
                        break;
                    }
                };
                let (mut matched, lines, file_limit_hit) = if match_content {
                    find_matches(pat, content)
                } else {
                    (false, Vec::new(), false)
                };
                if !matched && match_path {
                    matched = pat.regex_matches(path.as_bytes());
                }
                if matched != !opts.negated {
                    continue;
                }
                let fm = FileMatch {
                    path: path.to_string(),
                    line_matches: if opts.negated { Vec::new() } else { lines },
                    limit_hit: file_limit_hit,
                };
                let mut guard = results.lock();
                if guard.len() < opts.file_match_limit {
                    guard.push(fm);
                }
                if guard.len() >= opts.file_match_limit {
                    hit_limit.store(true, Ordering::SeqCst);
                    cancel.store(true, Ordering::SeqCst);
                    break;
                }
            });
        }
    });

    if let Some(e) = first_err.into_inner() {
        return Err(e);
    }

    let matches = results.into_inner();
    let any_file_limit = matches.iter().any(|m| m.limit_hit);
    let outcome = SearchOutcome {
        limit_hit: hit_limit.load(Ordering::SeqCst) || any_file_limit,
        deadline_hit: deadline_hit.load(Ordering::SeqCst),
        matches,
    };
    tracing::debug!(
        files = files.len(),
        skipped = skipped.load(Ordering::SeqCst),
        matches = outcome.matches.len(),
        limit_hit = outcome.limit_hit,
        deadline_hit = outcome.deadline_hit,
        "search complete"
    );
    Ok(outcome)
}
