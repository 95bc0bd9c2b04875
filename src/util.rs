//! Shared utility functions used across the codebase.

/// Parse an environment variable as a boolean, returning `default` if unset.
///
/// Recognises `1`, `true`, `yes`, `y`, `on` (case-insensitive) as `true`;
/// everything else maps to `false`.
pub fn env_var_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        Err(_) => default,
    }
}

/// Read a non-empty, trimmed environment variable.
pub fn env_var_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Truncate to at most `max_chars` characters, never splitting a code point.
///
/// Returns the (possibly shortened) string and whether anything was cut.
pub fn truncate_chars(input: &str, max_chars: usize) -> (String, bool) {
    match input.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (input[..byte_idx].to_string(), true),
        None => (input.to_string(), false),
    }
}

/// Deduplicate and trim a list of names, preserving order.
pub fn dedup_trimmed(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let trimmed = item.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            out.push(trimmed.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        let (out, cut) = truncate_chars("héllo wörld", 4);
        assert_eq!(out, "héll");
        assert!(cut);
        let (out, cut) = truncate_chars("short", 10);
        assert_eq!(out, "short");
        assert!(!cut);
    }

    #[test]
    fn dedup_trimmed_removes_duplicates_and_blanks() {
        let items = vec![
            " api ".to_string(),
            "".to_string(),
            "api".to_string(),
            "cli".to_string(),
        ];
        assert_eq!(dedup_trimmed(items), vec!["api", "cli"]);
    }

    #[test]
    fn env_var_bool_defaults_when_unset() {
        assert!(env_var_bool("AGENTJOBS_TEST_SURELY_UNSET_FLAG", true));
        assert!(!env_var_bool("AGENTJOBS_TEST_SURELY_UNSET_FLAG", false));
    }
}
