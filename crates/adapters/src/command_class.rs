// SPDX-License-Identifier: MIT

//! Pure classification of shell command strings (spec §4.1).

use bitk_core::ToolActionKind;

const READ_COMMANDS: &[&str] = &["cat", "less", "more", "head", "tail", "bat"];
const SEARCH_COMMANDS: &[&str] = &["grep", "rg", "ag", "find", "fd", "ack"];
const EDIT_COMMANDS: &[&str] = &["sed", "awk", "tee", "truncate"];
const FETCH_COMMANDS: &[&str] = &["curl", "wget", "http"];

/// Classify a shell command string by matching its first token against
/// fixed sets, with a `>` redirection override that forces `FileEdit`.
pub fn classify_command(command: &str) -> ToolActionKind {
    if has_write_redirection(command) {
        return ToolActionKind::FileEdit;
    }

    let Some(first) = command.split_whitespace().next() else {
        return ToolActionKind::Other;
    };
    let token = first.rsplit('/').next().unwrap_or(first);

    if READ_COMMANDS.contains(&token) {
        ToolActionKind::FileRead
    } else if SEARCH_COMMANDS.contains(&token) {
        ToolActionKind::Search
    } else if EDIT_COMMANDS.contains(&token) {
        ToolActionKind::FileEdit
    } else if FETCH_COMMANDS.contains(&token) {
        ToolActionKind::WebFetch
    } else {
        ToolActionKind::Other
    }
}

/// Whether the command contains an output-redirection operator (`>` or `>>`),
/// ignoring those embedded inside quoted strings.
fn has_write_redirection(command: &str) -> bool {
    let mut in_single = false;
    let mut in_double = false;
    for c in command.chars() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '>' if !in_single && !in_double => return true,
            _ => {}
        }
    }
    false
}
