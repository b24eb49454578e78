//! Name-path patterns.
//!
//! A name path identifies a symbol within one file's symbol tree as the
//! slash-joined chain of its ancestors' names. A pattern comes in three
//! shapes:
//!
//! - a bare name (`"foo"`) matches any symbol whose own name matches,
//!   regardless of ancestors;
//! - a relative path (`"A/foo"`) additionally requires the ancestor chain
//!   to end with `A` (an extra prefix above `A` is allowed);
//! - an absolute path (`"/A/foo"`) requires the whole chain to match from
//!   the top level.
//!
//! Only the final segment participates in substring matching; ancestor
//! segments always compare exactly. Trailing slashes are ignored.

/// A parsed name-path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamePathPattern {
    segments: Vec<String>,
    absolute: bool,
}

impl NamePathPattern {
    pub fn parse(pattern: &str) -> Self {
        let absolute = pattern.starts_with('/');
        let segments = pattern
            .trim_start_matches('/')
            .trim_end_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Self { segments, absolute }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The final segment of the pattern.
    pub fn leaf(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    /// Whether `name_path` (as stamped on a symbol) matches this pattern.
    pub fn matches(&self, name_path: &str, substring_last: bool) -> bool {
        if self.segments.is_empty() {
            return false;
        }
        let parts: Vec<&str> = name_path.split('/').collect();
        let Some(last) = parts.last() else {
            return false;
        };

        let leaf = self.leaf();
        let leaf_matches = if substring_last {
            last.contains(leaf)
        } else {
            *last == leaf
        };
        if !leaf_matches {
            return false;
        }

        let ancestors = &parts[..parts.len() - 1];
        let wanted = &self.segments[..self.segments.len() - 1];

        if self.absolute {
            // must be rooted at the top of the file's tree
            ancestors.len() == wanted.len()
                && ancestors.iter().zip(wanted).all(|(a, w)| a == w)
        } else {
            // ancestor chain must end with the wanted chain
            ancestors.len() >= wanted.len()
                && ancestors[ancestors.len() - wanted.len()..]
                    .iter()
                    .zip(wanted)
                    .all(|(a, w)| a == w)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_matches_any_ancestry() {
        let pattern = NamePathPattern::parse("foo");
        assert!(pattern.matches("foo", false));
        assert!(pattern.matches("A/foo", false));
        assert!(pattern.matches("A/B/foo", false));
        assert!(!pattern.matches("foobar", false));
        assert!(!pattern.matches("A/other", false));
    }

    #[test]
    fn relative_path_requires_matching_ancestor_suffix() {
        let pattern = NamePathPattern::parse("A/foo");
        assert!(pattern.matches("A/foo", false));
        assert!(pattern.matches("Outer/A/foo", false));
        assert!(!pattern.matches("foo", false));
        assert!(!pattern.matches("B/foo", false));
        assert!(!pattern.matches("A/B/foo", false), "A must be the direct parent");
    }

    #[test]
    fn absolute_path_must_be_rooted_at_top_level() {
        let pattern = NamePathPattern::parse("/Foo");
        assert!(pattern.matches("Foo", false));
        assert!(!pattern.matches("Bar/Foo", false));

        let nested = NamePathPattern::parse("/A/foo");
        assert!(nested.matches("A/foo", false));
        assert!(!nested.matches("Outer/A/foo", false));
    }

    #[test]
    fn substring_matching_applies_to_the_last_segment_only() {
        let pattern = NamePathPattern::parse("A/B");
        assert!(pattern.matches("A/BB", true));
        assert!(pattern.matches("NestedA/A/Broad", true));
        assert!(!pattern.matches("A/Other/B", true), "ancestor is checked, not subsumed");
        assert!(!pattern.matches("AA/BB", true), "ancestors never substring-match");
    }

    #[test]
    fn trailing_slashes_are_ignored() {
        assert_eq!(
            NamePathPattern::parse("A/foo/"),
            NamePathPattern::parse("A/foo")
        );
        assert_eq!(
            NamePathPattern::parse("A/foo//"),
            NamePathPattern::parse("A/foo")
        );
    }

    #[test]
    fn nested_class_substring_scenario() {
        // lookup under a specific class with a partial leaf name
        let pattern = NamePathPattern::parse("OuterClass/NestedCl");
        assert!(pattern.matches("OuterClass/NestedClass", true));
        assert!(!pattern.matches("OuterClass/NestedClass/find_me", true));
        assert!(!pattern.matches("OtherClass/NestedClass", true));
    }

    #[test]
    fn empty_pattern_matches_nothing() {
        let pattern = NamePathPattern::parse("");
        assert!(pattern.is_empty());
        assert!(!pattern.matches("foo", false));
        assert!(!pattern.matches("", false));
    }
}
