//! Diff text for files git does not track yet.

/// Render an untracked file as a git-style diff against an empty file.
///
/// Non-UTF-8 contents are reported the way git reports binary files.
pub fn untracked_file_diff(path: &str, contents: &[u8]) -> String {
    let mut out = format!("diff --git a/{path} b/{path}\nnew file mode 100644\n");
    let Ok(text) = std::str::from_utf8(contents) else {
        out.push_str(&format!("Binary files /dev/null and b/{path} differ\n"));
        return out;
    };
    if text.is_empty() {
        return out;
    }

    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    out.push_str("--- /dev/null\n");
    out.push_str(&format!("+++ b/{path}\n"));
    if lines.len() == 1 {
        out.push_str("@@ -0,0 +1 @@\n");
    } else {
        out.push_str(&format!("@@ -0,0 +1,{} @@\n", lines.len()));
    }
    for line in &lines {
        out.push('+');
        out.push_str(line);
    }
    if !text.ends_with('\n') {
        out.push_str("\n\\ No newline at end of file\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_text_file_as_additions() {
        let diff = untracked_file_diff("notes.txt", b"one\ntwo\n");
        assert_eq!(
            diff,
            "diff --git a/notes.txt b/notes.txt\nnew file mode 100644\n--- /dev/null\n+++ b/notes.txt\n@@ -0,0 +1,2 @@\n+one\n+two\n"
        );
    }

    #[test]
    fn marks_missing_trailing_newline() {
        let diff = untracked_file_diff("a", b"solo");
        assert!(diff.contains("@@ -0,0 +1 @@\n+solo\n\\ No newline at end of file\n"));
    }

    #[test]
    fn binary_and_empty_files() {
        assert!(untracked_file_diff("img.png", &[0xff, 0xfe, 0x00]).contains("Binary files"));
        assert!(!untracked_file_diff("empty", b"").contains("@@"));
    }
}
