//! Pattern compilation: turns a [`PatternSpec`] into an executable matcher.

use std::error::Error;
use std::fmt::{self, Display};

use crate::casefold;
use crate::literal;
use crate::pathmatch::PathMatcher;
use crate::types::PatternSpec;

/// Errors produced while compiling a pattern specification. These are
/// client errors: the request carried a pattern the engine cannot accept.
#[derive(Debug)]
pub enum CompileError {
    BadPattern(String, String),
    BadPathPattern(String, String),
}

impl Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::BadPattern(p, e) => write!(f, "invalid pattern {:?}: {}", p, e),
            CompileError::BadPathPattern(p, e) => write!(f, "invalid path pattern {:?}: {}", p, e),
        }
    }
}

impl Error for CompileError {}

/// The executable form of a [`PatternSpec`].
///
/// `regex == None` means "every file's content matches", used by path-only
/// searches. When `literal` is set, it is guaranteed to occur in any
/// successful match, so a file lacking it can be skipped without running
/// the regex. When `fold_case` is set, content must be ASCII-lowercased
/// (see [`casefold`]) before matching.
pub struct CompiledPattern {
    pub regex: Option<regex::bytes::Regex>,
    pub fold_case: bool,
    pub literal: Option<Vec<u8>>,
    pub paths: PathMatcher,
}

impl CompiledPattern {
    /// Test the content regex against an arbitrary byte string (used for
    /// matching the pattern against file paths). A `None` regex matches.
    pub fn regex_matches(&self, text: &[u8]) -> bool {
        match &self.regex {
            None => true,
            Some(re) => {
                if self.fold_case {
                    re.is_match(&casefold::to_lower_ascii(text))
                } else {
                    re.is_match(text)
                }
            }
        }
    }
}

/// Compile `spec` into a [`CompiledPattern`].
///
/// Non-regex patterns are escaped to literal-match semantics; word match
/// wraps the expression in boundary anchors; regex mode makes `^`/`$`
/// match at embedded newlines. Case-insensitivity for ASCII patterns is
/// handled by rewriting the parsed expression and folding content (the
/// engine's own `(?i)` optimizes poorly); non-ASCII patterns fall back to
/// the engine flag and forgo the literal prefilter.
pub fn compile(spec: &PatternSpec) -> Result<CompiledPattern, CompileError> {
    let paths = PathMatcher::new(
        &spec.include_patterns,
        &spec.exclude_pattern,
        spec.path_patterns_are_regexps,
        spec.path_patterns_are_case_sensitive,
    )?;

    if spec.pattern.is_empty() {
        return Ok(CompiledPattern {
            regex: None,
            fold_case: false,
            literal: None,
            paths,
        });
    }

    let mut expr = if spec.is_regexp {
        spec.pattern.clone()
    } else {
        regex::escape(&spec.pattern)
    };
    if spec.is_word_match {
        expr = format!(r"\b(?:{})\b", expr);
    }

    let mut parser = regex_syntax::ParserBuilder::new()
        .multi_line(spec.is_regexp)
        .allow_invalid_utf8(true)
        .build();
    let hir = parser
        .parse(&expr)
        .map_err(|e| CompileError::BadPattern(spec.pattern.clone(), e.to_string()))?;

    let ascii = expr.is_ascii();
    let fold_case = !spec.is_case_sensitive && ascii;
    let hir = if fold_case {
        casefold::fold_hir(&hir)
    } else {
        hir
    };

    let literal = if !spec.is_case_sensitive && !ascii {
        // Engine-level folding below; a fixed literal would be unsound.
        None
    } else {
        literal::guaranteed_literal(&hir)
    };

    let mut builder = regex::bytes::RegexBuilder::new(&hir.to_string());
    if !spec.is_case_sensitive && !ascii {
        builder.case_insensitive(true);
    }
    let regex = builder
        .build()
        .map_err(|e| CompileError::BadPattern(spec.pattern.clone(), e.to_string()))?;

    Ok(CompiledPattern {
        regex: Some(regex),
        fold_case,
        literal,
        paths,
    })
}
