//! Path filtering: compiles include/exclude patterns (glob or regex, each
//! optionally case-insensitive) into a single predicate over file paths.

use globset::{Glob, GlobMatcher};
use regex::Regex;

use crate::compile::CompileError;

enum PathPattern {
    Regex(Regex),
    /// Globs have no native case-insensitive mode, so insensitive globs are
    /// compiled from the lowercased pattern and fed the lowercased path.
    Glob {
        matcher: GlobMatcher,
        fold: bool,
    },
}

impl PathPattern {
    fn compile(pattern: &str, is_regexp: bool, case_sensitive: bool) -> Result<Self, CompileError> {
        if is_regexp {
            let pat = if case_sensitive {
                pattern.to_string()
            } else {
                format!("(?i){}", pattern)
            };
            let re = Regex::new(&pat)
                .map_err(|e| CompileError::BadPathPattern(pattern.to_string(), e.to_string()))?;
            Ok(PathPattern::Regex(re))
        } else {
            let pat = if case_sensitive {
                pattern.to_string()
            } else {
                pattern.to_lowercase()
            };
            let glob = Glob::new(&pat)
                .map_err(|e| CompileError::BadPathPattern(pattern.to_string(), e.to_string()))?;
            Ok(PathPattern::Glob {
                matcher: glob.compile_matcher(),
                fold: !case_sensitive,
            })
        }
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Regex(re) => re.is_match(path),
            PathPattern::Glob { matcher, fold } => {
                if *fold {
                    matcher.is_match(path.to_lowercase())
                } else {
                    matcher.is_match(path)
                }
            }
        }
    }
}

/// Predicate over file paths: all include patterns must match and the
/// exclude pattern must not. No patterns at all matches everything.
pub struct PathMatcher {
    includes: Vec<PathPattern>,
    exclude: Option<PathPattern>,
}

impl PathMatcher {
    pub fn new(
        include_patterns: &[String],
        exclude_pattern: &str,
        are_regexps: bool,
        case_sensitive: bool,
    ) -> Result<Self, CompileError> {
        let mut includes = Vec::with_capacity(include_patterns.len());
        for p in include_patterns {
            includes.push(PathPattern::compile(p, are_regexps, case_sensitive)?);
        }
        let exclude = if exclude_pattern.is_empty() {
            None
        } else {
            Some(PathPattern::compile(
                exclude_pattern,
                are_regexps,
                case_sensitive,
            )?)
        };
        Ok(Self { includes, exclude })
    }

    /// A matcher that accepts every path.
    pub fn match_all() -> Self {
        Self {
            includes: Vec::new(),
            exclude: None,
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        if !self.includes.iter().all(|p| p.matches(path)) {
            return false;
        }
        match &self.exclude {
            Some(p) => !p.matches(path),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_includes_must_match() {
        let m = PathMatcher::new(&["a".into(), "b".into()], "", true, true).unwrap();
        for path in ["a/b", "ab", "b/a", "ba"] {
            assert!(m.matches(path), "{} should match", path);
        }
        for path in ["a/c", "c", "b"] {
            assert!(!m.matches(path), "{} should not match", path);
        }
    }

    #[test]
    fn exclude_wins_over_includes() {
        let m = PathMatcher::new(&["src".into()], "test", true, true).unwrap();
        assert!(m.matches("src/lib.rs"));
        assert!(!m.matches("src/test/lib.rs"));
    }

    #[test]
    fn no_patterns_matches_everything() {
        let m = PathMatcher::new(&[], "", true, true).unwrap();
        assert!(m.matches("anything/at/all"));
    }

    #[test]
    fn case_insensitive_globs_fold_both_sides() {
        let m = PathMatcher::new(&["*.MD".into()], "", false, false).unwrap();
        assert!(m.matches("README.md"));
        assert!(m.matches("readme.MD"));
        assert!(!m.matches("readme.rs"));
    }

    #[test]
    fn bad_pattern_is_reported() {
        assert!(PathMatcher::new(&["[".into()], "", true, true).is_err());
        assert!(PathMatcher::new(&["a{".into()], "", false, true).is_err());
    }
}
