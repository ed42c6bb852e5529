//! Pattern matching for shell allowlists and changed-file globs.

use glob::{MatchOptions, Pattern};
use tracing::warn;

const PATH_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

const COMMAND_MATCH: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// True if `command` is permitted by any allowlist entry.
///
/// Matching is case-insensitive. Entries containing glob metacharacters are
/// matched against the whole command; plain entries match as substrings.
/// An empty allowlist permits nothing.
pub fn command_matches_allowlist<S: AsRef<str>>(command: &str, allowlist: &[S]) -> bool {
    let command = command.trim();
    if command.is_empty() {
        return false;
    }
    allowlist.iter().any(|entry| {
        let entry = entry.as_ref().trim();
        if entry.is_empty() {
            return false;
        }
        let pattern = if has_glob_meta(entry) {
            entry.to_string()
        } else {
            format!("*{}*", Pattern::escape(entry))
        };
        match Pattern::new(&pattern) {
            Ok(compiled) => compiled.matches_with(command, COMMAND_MATCH),
            Err(err) => {
                warn!(entry, err = %err, "ignoring invalid allowlist entry");
                false
            }
        }
    })
}

/// Normalize a changed-file path: forward slashes, no leading `./`.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = path.trim().replace('\\', "/");
    while let Some(rest) = normalized.strip_prefix("./") {
        normalized = rest.to_string();
    }
    normalized
}

/// True if the normalized `path` matches any glob in `patterns`.
///
/// Invalid patterns never match.
pub fn path_matches_any<S: AsRef<str>>(path: &str, patterns: &[S]) -> bool {
    let path = normalize_path(path);
    patterns.iter().any(|pattern| {
        let pattern = normalize_path(pattern.as_ref());
        match Pattern::new(&pattern) {
            Ok(compiled) => compiled.matches_with(&path, PATH_MATCH),
            Err(err) => {
                warn!(pattern = %pattern, err = %err, "ignoring invalid path pattern");
                false
            }
        }
    })
}

fn has_glob_meta(entry: &str) -> bool {
    entry.contains(['*', '?', '['])
}
