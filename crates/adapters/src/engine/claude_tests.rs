// SPDX-License-Identifier: MIT

use super::*;
use bitk_core::ToolActionKind;

#[test]
fn blank_line_yields_nothing() {
    assert!(parse_claude_line("").is_none());
    assert!(parse_claude_line("   ").is_none());
}

#[test]
fn unparseable_non_empty_line_becomes_system_message() {
    let entry = parse_claude_line("not json at all").expect("entry");
    assert_eq!(entry.entry_type, EntryType::SystemMessage);
    assert_eq!(entry.content, "not json at all");
}

#[test]
fn assistant_text_block_maps_to_assistant_message() {
    let line = serde_json::json!({
        "type": "assistant",
        "message": { "content": [{ "type": "text", "text": "hello there" }] }
    })
    .to_string();
    let entry = parse_claude_line(&line).expect("entry");
    assert_eq!(entry.entry_type, EntryType::AssistantMessage);
    assert_eq!(entry.content, "hello there");
}

#[test]
fn tool_use_block_maps_to_tool_use_with_classified_action() {
    let line = serde_json::json!({
        "type": "assistant",
        "message": { "content": [{
            "type": "tool_use",
            "name": "Edit",
            "input": { "file_path": "src/lib.rs" }
        }] }
    })
    .to_string();
    let entry = parse_claude_line(&line).expect("entry");
    assert_eq!(entry.entry_type, EntryType::ToolUse);
    let action = entry.tool_action.expect("tool action");
    assert_eq!(action.kind, Some(ToolActionKind::FileEdit));
    assert_eq!(action.path.as_deref(), Some("src/lib.rs"));
}

#[test]
fn result_record_signals_turn_completion() {
    let line = serde_json::json!({
        "type": "result",
        "subtype": "success",
        "duration_ms": 4200.0
    })
    .to_string();
    let entry = parse_claude_line(&line).expect("entry");
    assert!(entry.signals_turn_completed());
    assert_eq!(entry.metadata.unwrap().result_subtype(), Some("success"));
}

#[test]
fn error_record_maps_to_error_message() {
    let line = serde_json::json!({ "type": "error", "message": "boom" }).to_string();
    let entry = parse_claude_line(&line).expect("entry");
    assert_eq!(entry.entry_type, EntryType::ErrorMessage);
    assert_eq!(entry.content, "boom");
}

#[test]
fn user_record_is_suppressed() {
    let line = serde_json::json!({ "type": "user", "message": {} }).to_string();
    assert!(parse_claude_line(&line).is_none());
}

#[test]
fn extract_process_name_handles_paths() {
    assert_eq!(extract_process_name("/usr/bin/claude --flag"), "claude");
    assert_eq!(extract_process_name("./claude"), "claude");
    assert_eq!(extract_process_name("claudeless"), "claudeless");
    assert_eq!(extract_process_name(""), "claude");
}

#[cfg(unix)]
#[tokio::test(start_paused = true)]
async fn availability_is_cached_until_the_ttl_expires() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().expect("tempdir");
    let counter_path = dir.path().join("calls");
    let script_path = dir.path().join("fake-claude");
    std::fs::write(
        &script_path,
        format!("#!/bin/sh\necho -n x >> {counter_path:?}\necho 1.0.0\n"),
    )
    .expect("write script");
    let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script_path, perms).expect("chmod");

    let adapter = ClaudeAdapter::new("/").with_binary(script_path.to_string_lossy().to_string());

    adapter.availability().await;
    adapter.availability().await;
    assert_eq!(
        std::fs::read_to_string(&counter_path).unwrap_or_default().len(),
        1,
        "second call within the TTL must hit the cache"
    );

    tokio::time::advance(super::AVAILABILITY_CACHE_TTL + std::time::Duration::from_secs(1)).await;
    adapter.availability().await;
    assert_eq!(
        std::fs::read_to_string(&counter_path).unwrap_or_default().len(),
        2,
        "a call after the TTL must re-probe"
    );
}
