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

//! Case folding for the rewrite-based ignore-case strategy.
//!
//! Instead of compiling with the engine's `(?i)` flag, the parsed pattern is
//! rewritten so that every literal is lowercase and every character class
//! also covers the lowercase image of its uppercase ranges, and the file
//! content is ASCII-lowercased once before matching. The engine then runs a
//! plain case-sensitive search, which optimizes much better (literal
//! prefilters survive the rewrite).

use regex_syntax::hir::{
    self, Class, ClassBytes, ClassBytesRange, ClassUnicode, ClassUnicodeRange, Hir, HirKind,
    Literal,
};

/// Rewrite a parsed pattern for matching against ASCII-lowercased input.
///
/// Pure transformation: the input tree is never mutated. Literal runes are
/// lowercased; character classes are unioned with the lowercase image of any
/// range overlapping `A-Z`. Classes that are full-range complements (the
/// expansion of exclusions like `[^A-Z]`) instead drop the lowercase images
/// of the *excluded* uppercase letters, so `[^A-Z]` behaves as `[^A-Za-z]`
/// while neighbours of the range (`@`, `[`) are left intact.
pub fn fold_hir(h: &Hir) -> Hir {
    match h.kind() {
        HirKind::Empty => Hir::empty(),
        HirKind::Literal(Literal::Unicode(c)) => {
            Hir::literal(Literal::Unicode(c.to_ascii_lowercase()))
        }
        HirKind::Literal(Literal::Byte(b)) => Hir::literal(Literal::Byte(b.to_ascii_lowercase())),
        HirKind::Class(Class::Unicode(cls)) => Hir::class(Class::Unicode(fold_class_unicode(cls))),
        HirKind::Class(Class::Bytes(cls)) => Hir::class(Class::Bytes(fold_class_bytes(cls))),
        HirKind::Anchor(a) => Hir::anchor(a.clone()),
        HirKind::WordBoundary(w) => Hir::word_boundary(w.clone()),
        HirKind::Repetition(rep) => Hir::repetition(hir::Repetition {
            kind: rep.kind.clone(),
            greedy: rep.greedy,
            hir: Box::new(fold_hir(&rep.hir)),
        }),
        HirKind::Group(g) => Hir::group(hir::Group {
            kind: g.kind.clone(),
            hir: Box::new(fold_hir(&g.hir)),
        }),
        HirKind::Concat(subs) => Hir::concat(subs.iter().map(fold_hir).collect()),
        HirKind::Alternation(subs) => Hir::alternation(subs.iter().map(fold_hir).collect()),
    }
}

fn class_contains_unicode(cls: &ClassUnicode, c: char) -> bool {
    cls.iter().any(|r| r.start() <= c && c <= r.end())
}

fn fold_class_unicode(cls: &ClassUnicode) -> ClassUnicode {
    let ranges: Vec<ClassUnicodeRange> = cls.iter().cloned().collect();
    let is_exclusion = match (ranges.first(), ranges.last()) {
        (Some(first), Some(last)) => first.start() == '\0' && last.end() == '\u{10FFFF}',
        _ => false,
    };
    let mut out = cls.clone();
    if is_exclusion {
        // The class is the complement of some source-level exclusion. Any
        // uppercase letter missing from it was excluded by the user, so its
        // lowercase image must be excluded from the folded class as well.
        let mut removed = Vec::new();
        for u in 'A'..='Z' {
            if !class_contains_unicode(cls, u) {
                let l = u.to_ascii_lowercase();
                removed.push(ClassUnicodeRange::new(l, l));
            }
        }
        if !removed.is_empty() {
            out.difference(&ClassUnicode::new(removed));
        }
    } else {
        for r in &ranges {
            let lo = r.start().max('A');
            let hi = r.end().min('Z');
            if lo <= hi {
                out.push(ClassUnicodeRange::new(
                    lo.to_ascii_lowercase(),
                    hi.to_ascii_lowercase(),
                ));
            }
        }
    }
    out
}

fn class_contains_byte(cls: &ClassBytes, b: u8) -> bool {
    cls.iter().any(|r| r.start() <= b && b <= r.end())
}

fn fold_class_bytes(cls: &ClassBytes) -> ClassBytes {
    let ranges: Vec<ClassBytesRange> = cls.iter().cloned().collect();
    let is_exclusion = match (ranges.first(), ranges.last()) {
        (Some(first), Some(last)) => first.start() == 0 && last.end() == 0xFF,
        _ => false,
    };
    let mut out = cls.clone();
    if is_exclusion {
        let mut removed = Vec::new();
        for u in b'A'..=b'Z' {
            if !class_contains_byte(cls, u) {
                let l = u.to_ascii_lowercase();
                removed.push(ClassBytesRange::new(l, l));
            }
        }
        if !removed.is_empty() {
            out.difference(&ClassBytes::new(removed));
        }
    } else {
        for r in &ranges {
            let lo = r.start().max(b'A');
            let hi = r.end().min(b'Z');
            if lo <= hi {
                out.push(ClassBytesRange::new(
                    lo.to_ascii_lowercase(),
                    hi.to_ascii_lowercase(),
                ));
            }
        }
    }
    out
}

/// ASCII-lowercase `buf` in place, word-at-a-time where possible.
///
/// Length-preserving, so byte offsets computed on the folded buffer are
/// valid for the original. Non-ASCII bytes pass through unchanged; a chunk
/// containing any falls back to the per-byte routine.
pub fn lower_ascii_in_place(buf: &mut [u8]) {
    const HIGH: u64 = 0x8080_8080_8080_8080;
    const ONES: u64 = 0x0101_0101_0101_0101;
    let mut chunks = buf.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let w = u64::from_le_bytes(chunk[..].try_into().unwrap());
        if w & HIGH != 0 {
            for b in chunk.iter_mut() {
                if b.is_ascii_uppercase() {
                    *b += 32;
                }
            }
            continue;
        }
        // High bit marks bytes in 'A'..='Z'; shifting it down two gives the
        // 0x20 case bit.
        let ge_a = w.wrapping_add(ONES * (0x80 - b'A' as u64)) & HIGH;
        let gt_z = w.wrapping_add(ONES * (0x80 - (b'Z' as u64 + 1))) & HIGH;
        let mask = ge_a & !gt_z;
        let lowered = w | (mask >> 2);
        chunk.copy_from_slice(&lowered.to_le_bytes());
    }
    for b in chunks.into_remainder() {
        if b.is_ascii_uppercase() {
            *b += 32;
        }
    }
}

/// Copying variant of [`lower_ascii_in_place`].
pub fn to_lower_ascii(src: &[u8]) -> Vec<u8> {
    let mut out = src.to_vec();
    lower_ascii_in_place(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_ascii_matches_reference() {
        let cases: &[&[u8]] = &[
            b"",
            b"a",
            b"HELLO, World! 0123",
            b"exactly8",
            b"EXACTLY8",
            b"spans multiple eight byte chunks ABCXYZ @[`{",
            &[0x41, 0xC3, 0x84, 0x5A, 0x61], // 'A', U+00C4 bytes, 'Z', 'a'
        ];
        for c in cases {
            let got = to_lower_ascii(c);
            let want: Vec<u8> = c.iter().map(|b| b.to_ascii_lowercase()).collect();
            assert_eq!(got, want, "input {:?}", c);
        }
    }

    #[test]
    fn folds_literals_and_classes() {
        let parse = |p: &str| regex_syntax::Parser::new().parse(p).unwrap();
        assert_eq!(fold_hir(&parse("Foo")).to_string(), parse("foo").to_string());
        // [A-C] gains its lowercase image.
        let folded = fold_hir(&parse("[A-C]")).to_string();
        let re = regex::Regex::new(&folded).unwrap();
        assert!(re.is_match("b"));
        assert!(re.is_match("B"));
        assert!(!re.is_match("d"));
    }

    #[test]
    fn exclusion_class_drops_lowercase_image() {
        let parse = |p: &str| regex_syntax::Parser::new().parse(p).unwrap();
        let folded = fold_hir(&parse("[^A-Z]")).to_string();
        let re = regex::Regex::new(&folded).unwrap();
        // On folded input, neither original-case letter may match.
        assert!(!re.is_match("a"));
        assert!(re.is_match("@"));
        assert!(re.is_match("["));
        assert!(re.is_match("0"));
    }
}
