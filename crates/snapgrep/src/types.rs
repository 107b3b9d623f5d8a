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

use serde::{Deserialize, Serialize};

/// What to search for and how. Immutable once constructed; compiled once
/// into a `CompiledPattern` and shared by every worker of a search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternSpec {
    pub pattern: String,
    pub is_regexp: bool,
    pub is_word_match: bool,
    pub is_case_sensitive: bool,
    pub is_negated: bool,
    /// A path matches only if it matches every include pattern.
    pub include_patterns: Vec<String>,
    /// A path is rejected if it matches the exclude pattern.
    pub exclude_pattern: String,
    pub path_patterns_are_regexps: bool,
    pub path_patterns_are_case_sensitive: bool,
}

/// One matching file. Line numbers inside `line_matches` are strictly
/// increasing and unique; `limit_hit` is set when the per-file line-match
/// cap truncated the list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMatch {
    pub path: String,
    pub line_matches: Vec<LineMatch>,
    pub limit_hit: bool,
}

/// One matching line: the full line text for preview, its 0-based line
/// number, and the matched fragments as (offset, length) pairs measured in
/// characters, so callers stay correct under multi-byte encodings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineMatch {
    pub line: String,
    pub line_number: u32,
    pub offset_and_lengths: Vec<(u32, u32)>,
}
