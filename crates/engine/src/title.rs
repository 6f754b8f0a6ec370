// SPDX-License-Identifier: MIT

//! Auto-title extraction (spec §4.4). The wrapping tag is the product's
//! own name, not a placeholder — load-bearing, not decorative.

use regex::Regex;
use std::sync::OnceLock;

/// Prompt sent for the dedicated system-initiated title turn.
pub const AUTO_TITLE_PROMPT: &str = "[SYSTEM TASK] Generate a short title for this conversation.\n\
Reply with only the title, wrapped exactly as <bitk><title>...</title></bitk>.";

const MAX_TITLE_LEN: usize = 200;

fn pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<bitk><title>(.*?)</title></bitk>").expect("static regex"))
}

/// Extract, trim, and cap a reply's title. Returns `None` on no match or
/// an all-whitespace title (spec §8 round-trip property).
pub fn extract_title(text: &str) -> Option<String> {
    let captures = pattern().captures(text)?;
    let trimmed = captures.get(1)?.as_str().trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_TITLE_LEN).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_for_any_non_blank_trimmed_title() {
        for title in ["Fix the bug", "  padded  ", "unicode: héllo wörld"] {
            let wrapped = format!("<bitk><title>{title}</title></bitk>");
            let expected: String = title.trim().chars().take(MAX_TITLE_LEN).collect();
            assert_eq!(extract_title(&wrapped), Some(expected));
        }
    }

    #[test]
    fn whitespace_only_title_yields_none() {
        assert_eq!(extract_title("<bitk><title>   </title></bitk>"), None);
    }

    #[test]
    fn missing_tag_yields_none() {
        assert_eq!(extract_title("no tag here"), None);
    }

    #[test]
    fn caps_at_200_chars() {
        let long = "x".repeat(250);
        let wrapped = format!("<bitk><title>{long}</title></bitk>");
        assert_eq!(extract_title(&wrapped).unwrap().chars().count(), 200);
    }

    #[test]
    fn extracts_from_surrounding_prose() {
        let reply = "Sure thing!\n<bitk><title>Refactor auth module</title></bitk>\nDone.";
        assert_eq!(
            extract_title(reply),
            Some("Refactor auth module".to_string())
        );
    }
}
