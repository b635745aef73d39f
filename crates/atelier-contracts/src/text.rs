/// Truncates to `max_chars` characters, marking the cut with an ellipsis.
pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

/// Single-line excerpt suitable for log fields and failure reasons.
pub fn excerpt(value: &str, max_chars: usize) -> String {
    let collapsed = value.split_whitespace().collect::<Vec<&str>>().join(" ");
    truncate_text(&collapsed, max_chars)
}

#[cfg(test)]
mod tests {
    use super::{excerpt, truncate_text};

    #[test]
    fn truncate_text_counts_chars_not_bytes() {
        assert_eq!(truncate_text("héllo", 5), "héllo");
        assert_eq!(truncate_text("héllo wörld", 5), "héllo…");
    }

    #[test]
    fn excerpt_collapses_whitespace() {
        assert_eq!(
            excerpt("I can't\n\n  generate   that image.", 40),
            "I can't generate that image."
        );
        assert_eq!(excerpt("one two three", 7), "one two…");
    }
}
