//! Glob matching for atom path patterns.
//!
//! Matching is always over POSIX-style forward-slash paths regardless of
//! host OS. `**` crosses path segments, `*` stays within one segment, `?`
//! matches a single non-separator character.

use glob::{MatchOptions, Pattern};

const OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Returns `true` if `path` matches the glob `pattern`.
///
/// An unparseable pattern matches nothing; pattern syntax is validated at
/// atom-write time, so this only arises for hand-edited rows.
pub fn path_matches(pattern: &str, path: &str) -> bool {
    match Pattern::new(pattern) {
        Ok(p) => p.matches_with(path, OPTIONS),
        Err(_) => false,
    }
}

/// Returns `true` if `pattern` is syntactically valid glob.
pub fn is_valid_pattern(pattern: &str) -> bool {
    Pattern::new(pattern).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_star_crosses_segments() {
        assert!(path_matches("src/**/*.ts", "src/index.ts"));
        assert!(path_matches("src/**/*.ts", "src/a/b/index.ts"));
        assert!(!path_matches("src/**/*.ts", "docs/readme.md"));
    }

    #[test]
    fn double_star_prefix() {
        assert!(path_matches("**/index.ts", "src/index.ts"));
        assert!(path_matches("**/index.ts", "index.ts"));
        assert!(!path_matches("**/index.ts", "src/main.ts"));
    }

    #[test]
    fn single_star_stays_in_segment() {
        assert!(path_matches("src/*.rs", "src/lib.rs"));
        assert!(!path_matches("src/*.rs", "src/sqlite/store.rs"));
    }

    #[test]
    fn question_mark_matches_one_char() {
        assert!(path_matches("src/v?.rs", "src/v1.rs"));
        assert!(!path_matches("src/v?.rs", "src/v12.rs"));
    }

    #[test]
    fn literal_paths_match_exactly() {
        assert!(path_matches("Cargo.toml", "Cargo.toml"));
        assert!(!path_matches("Cargo.toml", "crates/Cargo.toml"));
    }

    #[test]
    fn invalid_pattern_matches_nothing() {
        assert!(!path_matches("src/[", "src/["));
        assert!(!is_valid_pattern("src/["));
        assert!(is_valid_pattern("src/**"));
    }
}
