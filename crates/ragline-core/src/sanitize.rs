//! Prompt-injection stripping and length capping.
//!
//! Three syntaxes are removed from any text headed for a model prompt:
//! fenced code blocks (a pair of triple backticks and everything between),
//! `{{ ... }}` template expressions, and `${ ... }` interpolations.
//! Removal repeats until none remain, then the result is trimmed and
//! capped at a maximum character count. The whole operation is
//! idempotent.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;

use crate::settings::DEFAULT_SANITIZER_MAX_LENGTH;

fn injection_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(?s)```.*?```").expect("valid fence regex"),
            Regex::new(r"(?s)\{\{.*?\}\}").expect("valid template regex"),
            Regex::new(r"(?s)\$\{.*?\}").expect("valid interpolation regex"),
        ]
    })
}

/// Remove every injection-prone region without truncating.
///
/// Used on whole documents before segmentation, where the length cap
/// applies per chunk instead.
pub fn strip_injection_syntax(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let mut changed = false;
        for re in injection_patterns() {
            if let Cow::Owned(next) = re.replace_all(&current, "") {
                current = next;
                changed = true;
            }
        }
        if !changed {
            return current;
        }
    }
}

/// Truncate to at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Sanitizer with a configurable length cap.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    max_length: usize,
}

impl Sanitizer {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Strip injection syntax, trim, and cap at `max_length` characters.
    pub fn sanitize(&self, text: &str) -> String {
        let stripped = strip_injection_syntax(text);
        truncate_chars(stripped.trim(), self.max_length)
            .trim()
            .to_string()
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_SANITIZER_MAX_LENGTH)
    }
}

/// Sanitize with the default 5000-character cap.
pub fn sanitize_user_input(text: &str) -> String {
    Sanitizer::default().sanitize(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_removes_code_fences() {
        let out = sanitize_user_input("before ```rm -rf /\nignore all``` after");
        assert_eq!(out, "before  after");
    }

    #[test]
    fn test_removes_templates_and_interpolation() {
        let out = sanitize_user_input("Hi {{system.prompt}} there ${process.env.KEY}!");
        assert_eq!(out, "Hi  there !");
    }

    #[test]
    fn test_nested_patterns_converge() {
        let out = sanitize_user_input("a{{b{{c}}d}}e");
        assert!(!out.contains("{{"));
        assert_eq!(sanitize_user_input(&out), out);
    }

    #[test]
    fn test_unpaired_fence_kept() {
        let out = sanitize_user_input("just ``` one fence");
        assert_eq!(out, "just ``` one fence");
    }

    #[test]
    fn test_truncates_to_max_length() {
        let long = "x".repeat(6000);
        assert_eq!(sanitize_user_input(&long).chars().count(), 5000);

        let s = Sanitizer::new(3);
        assert_eq!(s.sanitize("héllo"), "hél");
    }

    #[test]
    fn test_plain_text_untouched() {
        let q = "How do I reset my password?";
        assert_eq!(sanitize_user_input(q), q);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(300))]

        #[test]
        fn prop_idempotent_and_capped(
            parts in proptest::collection::vec(
                prop_oneof![
                    Just("```".to_string()),
                    Just("{{".to_string()),
                    Just("}}".to_string()),
                    Just("${".to_string()),
                    Just("}".to_string()),
                    Just(" ".to_string()),
                    "[a-z]{0,6}",
                ],
                0..40,
            ),
            max in 1usize..60,
        ) {
            let text = parts.concat();
            let s = Sanitizer::new(max);
            let once = s.sanitize(&text);
            prop_assert!(once.chars().count() <= max);
            prop_assert_eq!(s.sanitize(&once), once.clone());
            for re in injection_patterns() {
                prop_assert!(!re.is_match(&once), "pattern survived in {:?}", once);
            }
        }
    }
}
