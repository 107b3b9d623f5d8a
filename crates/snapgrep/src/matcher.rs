//! Single-file matching: runs a compiled pattern over one file's bytes and
//! expands raw regex matches into per-line results with character-based
//! fragment offsets.

use crate::casefold;
use crate::compile::CompiledPattern;
use crate::types::LineMatch;

/// Cap on line matches accumulated for one file.
pub const MAX_LINE_MATCHES: usize = 100;

/// Byte offsets at which each line starts, always beginning with 0. A
/// terminal newline does not open a new (empty) line.
pub(crate) fn line_starts(content: &[u8]) -> Vec<u32> {
    let mut starts = vec![0u32];
    for (i, &b) in content.iter().enumerate() {
        if b == b'\n' {
            let next = i as u32 + 1;
            if (next as usize) < content.len() {
                starts.push(next);
            }
        }
    }
    starts
}

/// 0-based index of the line containing byte offset `pos`.
pub(crate) fn line_for_offset(starts: &[u32], pos: u32) -> usize {
    starts.partition_point(|&s| s <= pos).saturating_sub(1)
}

/// Byte bounds `[start, end)` of a line's text, excluding its newline.
pub(crate) fn line_bounds(starts: &[u32], line: usize, content: &[u8]) -> (usize, usize) {
    let start = starts[line] as usize;
    let end = if line + 1 < starts.len() {
        starts[line + 1] as usize - 1
    } else {
        let mut end = content.len();
        if end > start && content[end - 1] == b'\n' {
            end -= 1;
        }
        end
    };
    (start, end)
}

fn contains_sub(hay: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    if needle.len() > hay.len() {
        return false;
    }
    hay.windows(needle.len()).any(|w| w == needle)
}

fn count_chars(bytes: &[u8]) -> u32 {
    String::from_utf8_lossy(bytes).chars().count() as u32
}

/// Run `pat` over one file's content.
///
/// Returns whether the content matched at all, the per-line matches, and
/// whether the per-file cap truncated them. A `None` regex matches every
/// file (path-only searches) with no line matches. Lowercases the buffer
/// once when the pattern was compiled for folded matching, and skips the
/// regex entirely when the guaranteed literal is absent.
pub fn find_matches(pat: &CompiledPattern, content: &[u8]) -> (bool, Vec<LineMatch>, bool) {
    let re = match &pat.regex {
        None => return (true, Vec::new(), false),
        Some(re) => re,
    };
    let folded;
    let hay: &[u8] = if pat.fold_case {
        folded = casefold::to_lower_ascii(content);
        &folded
    } else {
        content
    };
    if let Some(lit) = &pat.literal {
        if !contains_sub(hay, lit) {
            return (false, Vec::new(), false);
        }
    }

    let starts = line_starts(content);
    let mut out: Vec<LineMatch> = Vec::new();
    let mut limit_hit = false;

    'matches: for m in re.find_iter(hay) {
        let (s, e) = (m.start(), m.end());
        let first = line_for_offset(&starts, s as u32);
        let last_pos = if e > s { e - 1 } else { s };
        let last = line_for_offset(&starts, last_pos as u32);
        // A match may span lines; every line it touches gets a fragment.
        for line in first..=last {
            let (lb, le) = line_bounds(&starts, line, content);
            let fs = s.max(lb);
            let fe = e.min(le).max(fs);
            let off = count_chars(&content[lb..fs]);
            let len = count_chars(&content[fs..fe]);
            match out.last_mut() {
                Some(lm) if lm.line_number == line as u32 => {
                    lm.offset_and_lengths.push((off, len));
                }
                _ => {
                    if out.len() >= MAX_LINE_MATCHES {
                        limit_hit = true;
                        break 'matches;
                    }
                    out.push(LineMatch {
                        line: String::from_utf8_lossy(&content[lb..le]).into_owned(),
                        line_number: line as u32,
                        offset_and_lengths: vec![(off, len)],
                    });
                }
            }
        }
    }
    (!out.is_empty(), out, limit_hit)
}
