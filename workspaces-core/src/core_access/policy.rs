//! Permission matching
//!
//! A permission set is a list of patterns. `*` grants everything, a pattern
//! without `*` must match exactly, and any other pattern is a wildcard where
//! `*` stands for an arbitrary run of characters (`members.*` grants
//! `members.invite` but not `members` or `member.invite`). Every character of
//! a pattern other than `*` is matched literally.

use regex::Regex;
use std::fmt;
use tracing::warn;

/// A single compiled permission pattern
#[derive(Clone)]
pub enum PermissionPattern {
    /// The literal `*`
    Any,
    Exact(String),
    Wildcard { source: String, regex: Regex },
    /// A wildcard that failed to compile; never matches
    Invalid(String),
}

impl PermissionPattern {
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            return PermissionPattern::Any;
        }
        if !pattern.contains('*') {
            return PermissionPattern::Exact(pattern.to_string());
        }

        // Escape everything first, then turn the escaped `\*` back into `.*`
        let anchored = format!("^{}$", regex::escape(pattern).replace(r"\*", ".*"));
        match Regex::new(&anchored) {
            Ok(regex) => PermissionPattern::Wildcard {
                source: pattern.to_string(),
                regex,
            },
            Err(e) => {
                warn!(pattern, error = %e, "Ignoring uncompilable permission pattern");
                PermissionPattern::Invalid(pattern.to_string())
            }
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PermissionPattern::Any => "*",
            PermissionPattern::Exact(s)
            | PermissionPattern::Wildcard { source: s, .. }
            | PermissionPattern::Invalid(s) => s,
        }
    }

    pub fn matches(&self, permission: &str) -> bool {
        match self {
            PermissionPattern::Any => true,
            PermissionPattern::Exact(s) => s == permission,
            PermissionPattern::Wildcard { regex, .. } => regex.is_match(permission),
            PermissionPattern::Invalid(_) => false,
        }
    }
}

impl fmt::Debug for PermissionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PermissionPattern({:?})", self.as_str())
    }
}

impl PartialEq for PermissionPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

/// An ordered, precompiled list of permission patterns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PermissionSet {
    patterns: Vec<PermissionPattern>,
}

impl PermissionSet {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| PermissionPattern::parse(p.as_ref()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether the set grants `permission`.
    ///
    /// Checked in order: the `*` grant, an exact entry, then wildcards.
    pub fn allows(&self, permission: &str) -> bool {
        if self.patterns.iter().any(|p| matches!(p, PermissionPattern::Any)) {
            return true;
        }
        if self
            .patterns
            .iter()
            .any(|p| matches!(p, PermissionPattern::Exact(s) if s == permission))
        {
            return true;
        }
        self.patterns
            .iter()
            .filter(|p| matches!(p, PermissionPattern::Wildcard { .. }))
            .any(|p| p.matches(permission))
    }

    /// The patterns as originally written
    pub fn to_strings(&self) -> Vec<String> {
        self.patterns.iter().map(|p| p.as_str().to_string()).collect()
    }
}

/// One-shot check against an uncompiled permission list
pub fn permits(permissions: &[String], permission: &str) -> bool {
    PermissionSet::new(permissions).allows(permission)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(patterns: &[&str]) -> PermissionSet {
        PermissionSet::new(patterns.iter().copied())
    }

    #[test]
    fn test_star_grants_everything() {
        let owner = set(&["*"]);
        assert!(owner.allows("workspace.delete"));
        assert!(owner.allows(""));
        assert!(owner.allows("anything at all"));
    }

    #[test]
    fn test_exact_match() {
        let member = set(&["workspace.view", "members.view"]);
        assert!(member.allows("workspace.view"));
        assert!(!member.allows("workspace.update"));
        assert!(!member.allows("workspace"));
    }

    #[test]
    fn test_prefix_wildcard() {
        let admin = set(&["members.*"]);
        assert!(admin.allows("members.invite"));
        assert!(admin.allows("members.remove"));
        assert!(!admin.allows("member.invite"));
        assert!(!admin.allows("members"));
        assert!(!admin.allows("xmembers.invite"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        // `.` in the pattern must not act as "any character"
        let dotted = set(&["members.*"]);
        assert!(!dotted.allows("membersXinvite"));

        let tricky = set(&["a+b.*"]);
        assert!(tricky.allows("a+b.c"));
        assert!(!tricky.allows("aab.c"));

        let alternation = set(&["(admin|x).*"]);
        assert!(!alternation.allows("admin.view"));
        assert!(alternation.allows("(admin|x).view"));

        let exact = set(&["settings.[a-z]+"]);
        assert!(!exact.allows("settings.view"));
    }

    #[test]
    fn test_crafted_permission_string_cannot_widen_match() {
        let admin = set(&["members.*"]);
        assert!(!admin.allows(".*"));
        assert!(!admin.allows("^members"));
        assert!(admin.allows("members.$(whatever)"));
    }

    #[test]
    fn test_empty_set_denies() {
        assert!(!PermissionSet::default().allows("workspace.view"));
    }

    #[test]
    fn test_permits_helper() {
        let perms = vec!["invitations.*".to_string()];
        assert!(permits(&perms, "invitations.create"));
        assert!(!permits(&perms, "members.invite"));
    }

    #[test]
    fn test_to_strings_preserves_source() {
        let admin = set(&["members.*", "workspace.view", "*"]);
        assert_eq!(admin.to_strings(), vec!["members.*", "workspace.view", "*"]);
    }

    proptest! {
        #[test]
        fn prop_wildcard_never_matches_outside_prefix(
            prefix in "[a-z.+?()\\[\\]|^$\\\\]{1,12}",
            suffix in "[a-z.]{0,12}",
            other in ".{0,24}",
        ) {
            let pattern = format!("{prefix}.*");
            let set = PermissionSet::new([pattern.as_str()]);
            let literal = format!("{prefix}.");
            let candidate = format!("{literal}{suffix}");

            prop_assert!(set.allows(&candidate));
            if !other.starts_with(&literal) {
                prop_assert!(!set.allows(&other));
            }
        }

        #[test]
        fn prop_exact_only_matches_itself(pattern in "[a-z.+?()|^$]{1,16}", other in "[a-z.+?()|^$]{0,16}") {
            let set = PermissionSet::new([pattern.as_str()]);
            prop_assert_eq!(set.allows(&other), other == pattern);
        }
    }
}
