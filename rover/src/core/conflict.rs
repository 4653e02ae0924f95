//! Merge-conflict recognition: porcelain status codes and in-file markers.

use std::sync::LazyLock;

use regex::Regex;

/// Porcelain XY codes git uses for unmerged paths.
pub const CONFLICT_CODES: [&str; 7] = ["UU", "AA", "DD", "AU", "UA", "DU", "UD"];

/// Only the opening and closing markers count; a bare `=======` line is also a
/// Markdown setext underline.
static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(<{7}|>{7})(\s|$)").expect("conflict marker regex is valid")
});

pub fn is_conflict_code(code: &str) -> bool {
    CONFLICT_CODES.contains(&code)
}

/// Conflicted paths from `git status --porcelain=v1 -z` output, in listing order.
///
/// Entries are NUL-terminated and paths are verbatim; a rename or copy entry is
/// followed by its source path as a separate field.
pub fn conflicted_paths(porcelain: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut fields = porcelain.split('\0');
    while let Some(entry) = fields.next() {
        let Some((code, path)) = entry.get(..2).zip(entry.get(3..)) else {
            continue;
        };
        if code.starts_with(['R', 'C']) {
            fields.next();
        }
        if is_conflict_code(code) && !path.is_empty() {
            paths.push(path.to_string());
        }
    }
    paths
}

/// True when `content` still carries any line-leading conflict marker.
pub fn has_conflict_markers(content: &str) -> bool {
    MARKER_RE.is_match(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_every_unmerged_code() {
        let porcelain = "UU src/a.rs\0 M src/b.rs\0AA new.txt\0?? scratch\0DU gone.rs\0UD kept.rs\0";
        assert_eq!(
            conflicted_paths(porcelain),
            vec!["src/a.rs", "new.txt", "gone.rs", "kept.rs"]
        );
    }

    #[test]
    fn paths_with_spaces_and_unicode_are_verbatim() {
        let porcelain = "UU my notes.md\0AA café.txt\0";
        assert_eq!(conflicted_paths(porcelain), vec!["my notes.md", "café.txt"]);
    }

    #[test]
    fn rename_source_is_not_read_as_an_entry() {
        let porcelain = "R  new.rs\0UU old.rs\0UU real.rs\0";
        assert_eq!(conflicted_paths(porcelain), vec!["real.rs"]);
    }

    #[test]
    fn clean_status_has_no_conflicts() {
        assert!(conflicted_paths(" M a.rs\0A  b.rs\0").is_empty());
        assert!(conflicted_paths("").is_empty());
    }

    #[test]
    fn detects_markers_only_at_line_start() {
        let conflicted = "fn a() {}\n<<<<<<< HEAD\nleft\n=======\nright\n>>>>>>> task\n";
        assert!(has_conflict_markers(conflicted));
        assert!(has_conflict_markers("left\n>>>>>>> task\n"));
        assert!(!has_conflict_markers("Release notes\n=======\n\nDone.\n"));
        assert!(!has_conflict_markers("let s = \"<<<<<<< not a marker\";\n"));
        assert!(!has_conflict_markers("fn resolved() {}\n"));
    }
}
