//! The rewrite-based ignore-case strategy must agree with the engine's
//! `(?i)` flag on printable ASCII, including exclusion character classes.

use snapgrep::compile::compile;
use snapgrep::types::PatternSpec;

fn inputs() -> Vec<String> {
    let mut out: Vec<String> = (0x20u8..0x7f).map(|b| (b as char).to_string()).collect();
    out.extend(
        [
            "Hello",
            "HELLO world",
            "hello",
            "hELLo THERE",
            "xyz",
            "ABC abc",
            "@[`{ A0a",
            "A",
            "Z",
            "a",
            "z",
            "@",
            "[",
            "`",
            "{",
            "0123",
            "foo BAR baz",
            "FOOBAR",
            "a.c A.C",
            "aXc abc adc",
            "xYz",
            "xaz",
            "xyz xz",
            "multi\nLine\nINPUT",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    out
}

fn patterns() -> Vec<&'static str> {
    vec![
        "hello",
        "Hello",
        "HELLO",
        "[A-Z]",
        "[A-Z]+",
        "[^A-Z]",
        "[^A-Za-z]",
        "[^B-D]",
        "[a-d]x",
        "foo|BAR",
        "a.c",
        "(Foo)+",
        "[@A-C[]",
        "x[^y]z",
        "A0a",
    ]
}

#[test]
fn rewrite_agrees_with_engine_case_folding() {
    for pattern in patterns() {
        let reference = regex::Regex::new(&format!("(?i:{})", pattern)).unwrap();
        let compiled = compile(&PatternSpec {
            pattern: pattern.to_string(),
            is_regexp: true,
            is_case_sensitive: false,
            ..Default::default()
        })
        .unwrap();
        for input in inputs() {
            let want = reference.is_match(&input);
            let got = compiled.regex_matches(input.as_bytes());
            assert_eq!(
                got, want,
                "pattern {:?} on input {:?}: rewrite said {}, engine said {}",
                pattern, input, got, want
            );
        }
    }
}

#[test]
fn case_sensitive_patterns_are_untouched() {
    for pattern in ["Hello", "[A-Z]+", "foo"] {
        let reference = regex::Regex::new(pattern).unwrap();
        let compiled = compile(&PatternSpec {
            pattern: pattern.to_string(),
            is_regexp: true,
            is_case_sensitive: true,
            ..Default::default()
        })
        .unwrap();
        for input in inputs() {
            assert_eq!(
                compiled.regex_matches(input.as_bytes()),
                reference.is_match(&input),
                "pattern {:?} on input {:?}",
                pattern,
                input
            );
        }
    }
}
