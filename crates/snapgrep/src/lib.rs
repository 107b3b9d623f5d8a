//! Per-commit text search engine.
//!
//! Compiles a pattern specification into a matcher (case-fold-safe regex,
//! guaranteed-literal prefilter, path predicate) and runs it across every
//! file of a repository snapshot with a bounded worker pool, a soft
//! deadline, and result caps. The snapshot itself is a random-access
//! on-disk container produced by the fetch pipeline in `snapgrep-serve`.

pub mod casefold;
pub mod compile;
pub mod literal;
pub mod matcher;
pub mod pathmatch;
pub mod search;
pub mod snapshot;
pub mod types;

pub use crate::compile::{CompileError, CompiledPattern};
pub use crate::pathmatch::PathMatcher;
pub use crate::search::{search, SearchOpts, SearchOutcome};
pub use crate::snapshot::{Snapshot, SnapshotError, SnapshotWriter};
pub use crate::types::{FileMatch, LineMatch, PatternSpec};
