//! Commit and merge message composition.

/// Longest title derived from a task description.
pub const MAX_TITLE_CHARS: usize = 72;

/// Deterministic commit message used when the AI cannot suggest one.
pub fn fallback_message(title: &str, description: &str) -> String {
    let title = title.trim();
    let description = description.trim();
    if description.is_empty() || description == title {
        return title.to_string();
    }
    format!("{title}\n\n{description}")
}

/// Append the attribution trailer unless it is already present.
pub fn with_attribution(message: &str, trailer: Option<&str>) -> String {
    let message = message.trim_end();
    match trailer.map(str::trim).filter(|t| !t.is_empty()) {
        Some(trailer) if !message.contains(trailer) => format!("{message}\n\n{trailer}"),
        _ => message.to_string(),
    }
}

pub fn merge_message(task_id: u64, title: &str) -> String {
    format!("merge: {} (rover task {task_id})", title.trim())
}

/// Title derived from the first non-empty line of a description.
pub fn title_from_description(description: &str) -> String {
    let line = description
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("Untitled task");
    if line.chars().count() <= MAX_TITLE_CHARS {
        return line.to_string();
    }
    let truncated: String = line.chars().take(MAX_TITLE_CHARS - 3).collect();
    format!("{}...", truncated.trim_end())
}

/// Reduce a free-form AI reply to a single commit subject line.
///
/// Returns `None` when nothing usable remains.
pub fn single_line_message(raw: &str) -> Option<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("```"))
        .map(|line| line.trim_matches(|c| c == '"' || c == '`' || c == '\''))
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_joins_title_and_description() {
        assert_eq!(
            fallback_message("Add retry logic", "Retry failed HTTP calls"),
            "Add retry logic\n\nRetry failed HTTP calls"
        );
        assert_eq!(fallback_message("Only title", "  "), "Only title");
    }

    #[test]
    fn attribution_is_appended_once() {
        let trailer = "Co-Authored-By: Rover <noreply@rover.local>";
        let once = with_attribution("fix: thing\n", Some(trailer));
        assert_eq!(once, format!("fix: thing\n\n{trailer}"));
        assert_eq!(with_attribution(&once, Some(trailer)), once);
        assert_eq!(with_attribution("fix: thing", None), "fix: thing");
    }

    #[test]
    fn long_descriptions_produce_truncated_titles() {
        let long = "a".repeat(100);
        let title = title_from_description(&format!("\n\n{long}\nsecond line"));
        assert_eq!(title.chars().count(), MAX_TITLE_CHARS);
        assert!(title.ends_with("..."));
        assert_eq!(title_from_description("Short one\nmore"), "Short one");
        assert_eq!(title_from_description(""), "Untitled task");
    }

    #[test]
    fn ai_replies_are_reduced_to_one_line() {
        assert_eq!(
            single_line_message("```\n\"feat: add retries\"\n```\n"),
            Some("feat: add retries".to_string())
        );
        assert_eq!(single_line_message("  \n```\n```"), None);
    }
}
