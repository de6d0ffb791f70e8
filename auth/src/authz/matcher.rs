// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wildcard matching for statement objects and actions

/// Reports whether `value` matches `pattern`
///
/// The supported grammar is deliberately small:
///
/// - `"*"` matches everything
/// - a pattern ending in `"/*"` matches any value sharing the prefix before
///   the `*` (so `"ns/*"` matches `"ns/x"` and `"ns/"` but not `"ns"`)
/// - anything else matches only by exact equality
///
/// There is no mid-segment or multi-segment globbing.
pub fn key_match(value: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        if prefix.ends_with('/') {
            return value.starts_with(prefix);
        }
    }
    value == pattern
}

/// Reports whether `value` matches any pattern in `patterns`
pub fn key_match_any<S: AsRef<str>>(value: &str, patterns: &[S]) -> bool {
    patterns.iter().any(|pattern| key_match(value, pattern.as_ref()))
}

#[cfg(test)]
mod test {
    use super::key_match;
    use super::key_match_any;

    #[test]
    fn test_universal_wildcard() {
        assert!(key_match("anything", "*"));
        assert!(key_match("", "*"));
    }

    #[test]
    fn test_exact_match() {
        assert!(key_match("ns/x", "ns/x"));
        assert!(!key_match("ns/x", "ns/y"));
        assert!(!key_match("ns", "ns/x"));
    }

    #[test]
    fn test_trailing_prefix_wildcard() {
        assert!(key_match("ns/x", "ns/*"));
        assert!(key_match("ns/x/y", "ns/*"));
        assert!(key_match("ns/", "ns/*"));
        assert!(!key_match("ns", "ns/*"));
        assert!(!key_match("other/x", "ns/*"));
    }

    #[test]
    fn test_star_must_follow_separator() {
        // "ns*" is not a supported wildcard; it only matches itself
        assert!(!key_match("nsx", "ns*"));
        assert!(key_match("ns*", "ns*"));
    }

    #[test]
    fn test_match_any() {
        assert!(key_match_any("ns/x", &["other", "ns/*"]));
        assert!(!key_match_any("ns/x", &["other", "else/*"]));
        assert!(!key_match_any::<&str>("ns/x", &[]));
    }
}
