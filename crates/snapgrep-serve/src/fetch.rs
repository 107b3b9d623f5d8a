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

//! Archive sources: where raw (unfiltered) tar bytes come from.
//!
//! The store consumes a source through the narrow [`ArchiveSource`]
//! boundary and extracts the stream by piping it into the external `tar`
//! binary, the same flow used for `git archive` output elsewhere in the
//! ecosystem. Extraction failures are temporary by definition: a malformed
//! stream from upstream is worth one more try.

use sha2::{Digest, Sha256};
use std::fmt::{self, Display};
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Failure reported by an archive source. `temporary` marks conditions
/// where retrying may help (connection reset, upstream overload).
#[derive(Debug, Clone)]
pub struct FetchError {
    pub message: String,
    pub temporary: bool,
}

impl FetchError {
    pub fn temporary(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            temporary: true,
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            temporary: false,
        }
    }
}

impl Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for FetchError {}

/// External supplier of raw archive bytes for a (repo, commit) pair.
pub trait ArchiveSource: Send + Sync + 'static {
    fn fetch_archive(&self, repo: &str, commit: &str) -> Result<Box<dyn Read + Send>, FetchError>;
}

/// Streams `git archive --format=tar <commit>` from a local mirror tree.
/// Used for development and tests; production deployments talk to the
/// remote tar service via [`HttpArchiveSource`].
pub struct GitArchiveSource {
    mirror_root: PathBuf,
}

impl GitArchiveSource {
    pub fn new(mirror_root: impl Into<PathBuf>) -> Self {
        Self {
            mirror_root: mirror_root.into(),
        }
    }
}

impl ArchiveSource for GitArchiveSource {
    fn fetch_archive(&self, repo: &str, commit: &str) -> Result<Box<dyn Read + Send>, FetchError> {
        let repo_dir = self.mirror_root.join(repo);
        if !repo_dir.is_dir() {
            return Err(FetchError::terminal(format!(
                "no mirror for repo {:?} under {}",
                repo,
                self.mirror_root.display()
            )));
        }
        let mut child = Command::new("git")
            .arg("-C")
            .arg(&repo_dir)
            .arg("archive")
            .arg("--format=tar")
            .arg(commit)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| FetchError::temporary(format!("spawn git archive: {}", e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FetchError::temporary("git archive produced no stdout"))?;
        Ok(Box::new(ChildStream {
            child,
            stdout,
            checked: false,
        }))
    }
}

/// Reader over a child's stdout that surfaces a non-zero exit as an I/O
/// error at end of stream, so a bad commit never extracts as an empty
/// archive.
struct ChildStream {
    child: std::process::Child,
    stdout: std::process::ChildStdout,
    checked: bool,
}

impl Read for ChildStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.stdout.read(buf)?;
        if n == 0 && !self.checked {
            self.checked = true;
            let status = self.child.wait()?;
            if !status.success() {
                return Err(std::io::Error::other(format!(
                    "git archive exited with {}",
                    status
                )));
            }
        }
        Ok(n)
    }
}

impl Drop for ChildStream {
    fn drop(&mut self) {
        if !self.checked {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Fetches tars over HTTP from a set of upstream endpoints. The endpoint
/// for a repo is chosen by a stable hash so the same repo keeps hitting
/// the same upstream cache.
pub struct HttpArchiveSource {
    endpoints: Vec<String>,
}

impl HttpArchiveSource {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self { endpoints }
    }

    fn endpoint_for(&self, repo: &str) -> Option<&str> {
        if self.endpoints.is_empty() {
            return None;
        }
        let digest = Sha256::digest(repo.as_bytes());
        let idx = u64::from_le_bytes(digest[..8].try_into().unwrap()) as usize;
        Some(self.endpoints[idx % self.endpoints.len()].as_str())
    }
}

impl ArchiveSource for HttpArchiveSource {
    fn fetch_archive(&self, repo: &str, commit: &str) -> Result<Box<dyn Read + Send>, FetchError> {
        let endpoint = self
            .endpoint_for(repo)
            .ok_or_else(|| FetchError::terminal("no fetch endpoints configured"))?;
        let url = format!(
            "{}/archive?repo={}&commit={}",
            endpoint.trim_end_matches('/'),
            urlencoding::encode(repo),
            urlencoding::encode(commit),
        );
        tracing::debug!(repo = %repo, commit = %commit, url = %url, "fetching archive");
        // Runs on a blocking thread (never on the async runtime), so the
        // blocking client is safe here; building it lazily keeps this type
        // constructible from async setup code.
        let client = reqwest::blocking::Client::new();
        let resp = client
            .get(&url)
            .send()
            .map_err(|e| FetchError::temporary(format!("request error: {}", e)))?;
        let status = resp.status();
        if !status.is_success() {
            let message = format!("archive fetch returned status {}", status);
            return Err(if status.is_server_error() {
                FetchError::temporary(message)
            } else {
                FetchError::terminal(message)
            });
        }
        Ok(Box::new(resp))
    }
}

/// Extract a tar stream into a fresh temporary directory by piping it
/// through the external `tar` binary. Any failure here means the stream
/// was cut short or malformed, so the error is temporary.
pub fn extract_tar_to_tempdir(
    mut stream: Box<dyn Read + Send>,
) -> Result<tempfile::TempDir, FetchError> {
    let td = tempfile::tempdir()
        .map_err(|e| FetchError::terminal(format!("create extraction dir: {}", e)))?;
    let mut tar = Command::new("tar")
        .arg("-x")
        .arg("-C")
        .arg(td.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| FetchError::terminal(format!("spawn tar: {}", e)))?;
    let mut stdin = tar
        .stdin
        .take()
        .ok_or_else(|| FetchError::terminal("tar accepted no stdin"))?;
    let copied = std::io::copy(&mut stream, &mut stdin);
    drop(stdin);
    let status = tar
        .wait()
        .map_err(|e| FetchError::terminal(format!("wait for tar: {}", e)))?;
    if let Err(e) = copied {
        return Err(FetchError::temporary(format!("archive stream failed: {}", e)));
    }
    if !status.success() {
        return Err(FetchError::temporary(format!(
            "tar extraction exited with {}",
            status
        )));
    }
    Ok(td)
}
