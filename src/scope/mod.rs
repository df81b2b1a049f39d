//! Scope engine: glob/prefix matching to decide whether two phases'
//! declared write-scopes overlap. Scope lists are attached to phases and
//! checked pairwise before dispatch.

use glob::Pattern;

/// Normalize a scope pattern: strip a leading `./`, use `/` separators,
/// collapse `.`/`..` segments the way `filepath.Clean` would.
pub fn normalize(pattern: &str) -> String {
    let pattern = pattern.replace('\\', "/");
    let pattern = pattern.strip_prefix("./").unwrap_or(&pattern);
    let mut segments: Vec<&str> = Vec::new();
    for seg in pattern.split('/') {
        match seg {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    let mut out = segments.join("/");
    if pattern.ends_with('/') && !out.ends_with('/') {
        out.push('/');
    }
    out
}

fn is_globstar(pattern: &str) -> bool {
    pattern.ends_with("/**") || pattern == "**"
}

fn globstar_prefix(pattern: &str) -> &str {
    pattern.strip_suffix("/**").unwrap_or("").trim_end_matches('/')
}

fn is_dir_prefix(pattern: &str) -> bool {
    pattern.ends_with('/')
}

fn contains_glob_segment(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?') || pattern.contains('[')
}

/// Pure predicate: do `a` and `b` overlap? Returns the specific pair of
/// patterns that matched, for diagnostics.
pub fn overlap<'a>(a: &'a [String], b: &'a [String]) -> Option<(&'a str, &'a str)> {
    for pa in a {
        for pb in b {
            if pattern_overlap(pa, pb) {
                return Some((pa.as_str(), pb.as_str()));
            }
        }
    }
    None
}

fn pattern_overlap(a: &str, b: &str) -> bool {
    let a = normalize(a);
    let b = normalize(b);

    if a == b {
        return true;
    }

    // Directory prefix containment, e.g. "a/b/" contains "a/b/c.go".
    if is_dir_prefix(&a) && b.starts_with(&a) {
        return true;
    }
    if is_dir_prefix(&b) && a.starts_with(&b) {
        return true;
    }

    // `**` globstar: directory-prefix containment after stripping the
    // globstar suffix.
    if is_globstar(&a) {
        let prefix = globstar_prefix(&a);
        if prefix.is_empty() || b.starts_with(prefix) {
            return true;
        }
    }
    if is_globstar(&b) {
        let prefix = globstar_prefix(&b);
        if prefix.is_empty() || a.starts_with(prefix) {
            return true;
        }
    }

    // Single-segment `*`/`?`/`[...]` glob: shell-glob match, either
    // direction, against the concrete path implied by the other side.
    if contains_glob_segment(&a) {
        if let Ok(pat) = Pattern::new(&a) {
            if pat.matches(&b) {
                return true;
            }
        }
    }
    if contains_glob_segment(&b) {
        if let Ok(pat) = Pattern::new(&b) {
            if pat.matches(&a) {
                return true;
            }
        }
    }

    false
}

/// Whether two phases conflict: scopes overlap AND they are not DAG-connected
/// AND neither opted into `allow_scope_overlap`.
pub fn phases_conflict(
    scope_a: &[String],
    allow_overlap_a: bool,
    scope_b: &[String],
    allow_overlap_b: bool,
    connected: bool,
) -> bool {
    if connected || allow_overlap_a || allow_overlap_b {
        return false;
    }
    overlap(scope_a, scope_b).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_dot_slash_and_cleans_segments() {
        assert_eq!(normalize("./src/x.rs"), "src/x.rs");
        assert_eq!(normalize("src/../lib/x.rs"), "lib/x.rs");
        assert_eq!(normalize("src/x/"), "src/x/");
    }

    #[test]
    fn exact_literal_paths_overlap() {
        assert!(overlap(&["src/x.rs".into()], &["src/x.rs".into()]).is_some());
    }

    #[test]
    fn directory_prefix_contains_nested_file() {
        assert!(overlap(&["a/b/".into()], &["a/b/c.rs".into()]).is_some());
        assert!(overlap(&["a/b/c.rs".into()], &["a/b/".into()]).is_some());
    }

    #[test]
    fn globstar_matches_anything_under_prefix() {
        assert!(overlap(&["src/**".into()], &["src/deep/nested/file.rs".into()]).is_some());
        assert!(overlap(&["**".into()], &["anything.rs".into()]).is_some());
    }

    #[test]
    fn single_star_matches_shell_glob_both_directions() {
        assert!(overlap(&["src/*.rs".into()], &["src/main.rs".into()]).is_some());
        assert!(overlap(&["src/main.rs".into()], &["src/*.rs".into()]).is_some());
    }

    #[test]
    fn disjoint_scopes_do_not_overlap() {
        assert!(overlap(&["src/a.rs".into()], &["src/b.rs".into()]).is_none());
    }

    #[test]
    fn overlap_is_symmetric() {
        let a = vec!["src/a/".to_string()];
        let b = vec!["src/a/b.rs".to_string()];
        assert_eq!(overlap(&a, &b).is_some(), overlap(&b, &a).is_some());
    }

    #[test]
    fn connected_phases_never_conflict_even_with_overlap() {
        assert!(!phases_conflict(
            &["src/x.rs".into()],
            false,
            &["src/x.rs".into()],
            false,
            true
        ));
    }

    #[test]
    fn allow_scope_overlap_on_either_side_suppresses_conflict() {
        assert!(!phases_conflict(
            &["src/x.rs".into()],
            true,
            &["src/x.rs".into()],
            false,
            false
        ));
    }

    #[test]
    fn disconnected_overlapping_scopes_without_override_conflict() {
        assert!(phases_conflict(
            &["src/x.rs".into()],
            false,
            &["src/x.rs".into()],
            false,
            false
        ));
    }

    proptest::proptest! {
        #[test]
        fn overlap_symmetric_on_random_paths(
            a in "[a-c]/[a-c](/[a-c])?",
            b in "[a-c]/[a-c](/[a-c])?",
        ) {
            let av = vec![a.clone()];
            let bv = vec![b.clone()];
            proptest::prop_assert_eq!(overlap(&av, &bv).is_some(), overlap(&bv, &av).is_some());
        }
    }
}
