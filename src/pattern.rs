//! `%` pattern matching shared by `patsubst`, `filter` and substitution
//! references.

/// Split a pattern at its first `%`.
fn split_pattern(pattern: &str) -> Option<(&str, &str)> {
    pattern.split_once('%')
}

/// The part of `word` matched by the `%` in `pattern`.
///
/// A pattern without `%` matches only itself and yields an empty stem. The
/// stem may be empty.
pub(crate) fn stem<'a>(pattern: &str, word: &'a str) -> Option<&'a str> {
    let (prefix, suffix) = match split_pattern(pattern) {
        Some(parts) => parts,
        None => return (pattern == word).then_some(""),
    };
    if word.len() < prefix.len() + suffix.len() {
        return None;
    }
    if !word.starts_with(prefix) || !word.ends_with(suffix) {
        return None;
    }
    Some(&word[prefix.len()..word.len() - suffix.len()])
}

/// Does `word` match `pattern`?
pub(crate) fn matches_pattern(pattern: &str, word: &str) -> bool {
    stem(pattern, word).is_some()
}

/// Replace one word, or return it unchanged if it doesn't match.
fn substitute_word(pattern: &str, replacement: &str, word: &str) -> String {
    match stem(pattern, word) {
        Some(stem) => match split_pattern(replacement) {
            Some((prefix, suffix)) if pattern.contains('%') => format!("{}{}{}", prefix, stem, suffix),
            _ => replacement.to_string(),
        },
        None => word.to_string(),
    }
}

/// `$(patsubst PATTERN,REPLACEMENT,TEXT)`.
///
/// With a `%` in the pattern, words are re-joined with single spaces.
/// Without one, only whole words equal to the pattern are replaced and the
/// whitespace between words is kept.
pub(crate) fn patsubst(pattern: &str, replacement: &str, text: &str) -> String {
    if pattern.contains('%') {
        return text
            .split_whitespace()
            .map(|word| substitute_word(pattern, replacement, word))
            .collect::<Vec<_>>()
            .join(" ");
    }

    let mut result = String::with_capacity(text.len());
    let mut word = String::new();
    for c in text.chars() {
        if c.is_whitespace() {
            if !word.is_empty() {
                result.push_str(&substitute_word(pattern, replacement, &word));
                word.clear();
            }
            result.push(c);
        } else {
            word.push(c);
        }
    }
    if !word.is_empty() {
        result.push_str(&substitute_word(pattern, replacement, &word));
    }
    result
}

/// The `$(VAR:FROM=TO)` substitution reference.
///
/// `FROM` without a `%` replaces a suffix, as if written `%FROM=%TO`.
pub(crate) fn substitution_ref(from: &str, to: &str, text: &str) -> String {
    if from.contains('%') {
        patsubst(from, to, text)
    } else {
        patsubst(&format!("%{}", from), &format!("%{}", to), text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_pattern_needs_equal_word() {
        assert!(matches_pattern("foo.o", "foo.o"));
        assert!(!matches_pattern("foo.o", "bar.o"));
    }

    #[test]
    fn test_lone_percent_accepts_empty_stem() {
        assert!(matches_pattern("%", "a"));
        assert!(matches_pattern("%", ""));
    }

    #[test]
    fn test_percent_at_either_end() {
        assert!(matches_pattern("%.o", "foo.o"));
        assert!(!matches_pattern("%.o", "foo.c"));
        assert!(matches_pattern("test_%", "test_foo"));
        assert!(!matches_pattern("test_%", "other_foo"));
    }

    #[test]
    fn test_stem_overlap() {
        // prefix and suffix may not share characters
        assert_eq!(stem("a%a", "a"), None);
        assert_eq!(stem("a%a", "aa"), Some(""));
        assert_eq!(stem("foo%bar", "foo123bar"), Some("123"));
    }

    #[test]
    fn test_patsubst_with_percent() {
        assert_eq!(patsubst("%.c", "%.o", "a.c  b.c\tc.h"), "a.o b.o c.h");
        assert_eq!(patsubst("%.c", "obj/x", "a.c"), "obj/x");
        assert_eq!(patsubst("src/%", "%", "src/a src/b"), "a b");
    }

    #[test]
    fn test_patsubst_without_percent_keeps_spacing() {
        assert_eq!(patsubst("a", "b", " a  c a "), " b  c b ");
        assert_eq!(patsubst("a", "%", "a"), "%");
    }

    #[test]
    fn test_substitution_ref() {
        assert_eq!(substitution_ref(".c", ".o", "main.c util.c"), "main.o util.o");
        assert_eq!(substitution_ref("%.c", "obj/%.o", "main.c"), "obj/main.o");
        assert_eq!(substitution_ref(".c", ".o", "main.h"), "main.h");
    }
}
