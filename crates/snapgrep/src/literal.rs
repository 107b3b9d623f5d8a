//! Guaranteed-literal extraction for cheap file rejection.
//!
//! A file whose content does not contain the extracted literal cannot match
//! the pattern, so the expensive regex run can be skipped entirely.

use regex_syntax::hir::{self, Hir, HirKind, Literal, RepetitionKind, RepetitionRange};

/// Derive a substring guaranteed to occur in every match of `h`.
///
/// Prefers the required prefix reported by the regex engine's literal
/// analysis; when that is empty, walks the parse tree: literals pass
/// through, captures and `+`/`{1,}` repetitions pass through their child,
/// concatenations take their longest literal run or child result, and
/// alternations and `*`/`{0,}` groups yield nothing (they can match without
/// any fixed substring). Returns `None` when no non-empty literal exists.
pub fn guaranteed_literal(h: &Hir) -> Option<Vec<u8>> {
    let prefixes = hir::literal::Literals::prefixes(h);
    let lcp = prefixes.longest_common_prefix();
    if !lcp.is_empty() {
        return Some(lcp.to_vec());
    }
    let lit = longest_guaranteed(h);
    if lit.is_empty() {
        None
    } else {
        Some(lit)
    }
}

fn literal_bytes(lit: &Literal) -> Vec<u8> {
    match lit {
        Literal::Unicode(c) => {
            let mut buf = [0u8; 4];
            c.encode_utf8(&mut buf).as_bytes().to_vec()
        }
        Literal::Byte(b) => vec![*b],
    }
}

fn repetition_requires_one(kind: &RepetitionKind) -> bool {
    match kind {
        RepetitionKind::OneOrMore => true,
        RepetitionKind::Range(RepetitionRange::Exactly(n))
        | RepetitionKind::Range(RepetitionRange::AtLeast(n))
        | RepetitionKind::Range(RepetitionRange::Bounded(n, _)) => *n >= 1,
        _ => false,
    }
}

fn longest_guaranteed(h: &Hir) -> Vec<u8> {
    match h.kind() {
        HirKind::Literal(lit) => literal_bytes(lit),
        HirKind::Group(g) => longest_guaranteed(&g.hir),
        HirKind::Repetition(rep) => {
            if repetition_requires_one(&rep.kind) {
                longest_guaranteed(&rep.hir)
            } else {
                Vec::new()
            }
        }
        HirKind::Concat(subs) => {
            // Adjacent literal children form one run; a run and a child's
            // own guaranteed literal compete on length.
            let mut best: Vec<u8> = Vec::new();
            let mut run: Vec<u8> = Vec::new();
            for sub in subs {
                if let HirKind::Literal(lit) = sub.kind() {
                    run.extend(literal_bytes(lit));
                    continue;
                }
                if run.len() > best.len() {
                    best = std::mem::take(&mut run);
                } else {
                    run.clear();
                }
                let child = longest_guaranteed(sub);
                if child.len() > best.len() {
                    best = child;
                }
            }
            if run.len() > best.len() {
                best = run;
            }
            best
        }
        _ => Vec::new(),
    }
}
