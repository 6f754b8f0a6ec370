// SPDX-License-Identifier: MIT

//! Adapter for the `claude` CLI: a plain subprocess emitting one JSON
//! object per line on stdout (spec §4.1).

use super::{Availability, AuthStatus, EngineAdapter, ModelInfo, SpawnOptions, SpawnedProcess};
use crate::env::{safe_env, within_workspace_root};
use async_trait::async_trait;
use bitk_core::{EngineError, EntryType, IssueLogEntry, IssueId, Metadata, ToolAction, ToolActionKind};
use serde_json::Value;
use std::process::Stdio;
use tokio::process::Command;

/// Extract the binary basename from a command string: handles absolute
/// paths (`/usr/bin/claude` -> `claude`), relative paths, and plain names.
pub fn extract_process_name(command: &str) -> String {
    command
        .split_whitespace()
        .next()
        .and_then(|first| first.rsplit('/').next())
        .unwrap_or("claude")
        .to_string()
}

pub struct ClaudeAdapter {
    /// Overridable for tests; defaults to `"claude"` on `$PATH`.
    binary: String,
    workspace_root: std::path::PathBuf,
    /// Memoizes `availability()` for [`super::AVAILABILITY_CACHE_TTL`], so
    /// a busy daemon doesn't shell out on every probe (spec §4.1).
    availability_cache: parking_lot::Mutex<Option<(Availability, tokio::time::Instant)>>,
}

impl ClaudeAdapter {
    pub fn new(workspace_root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            binary: "claude".to_string(),
            workspace_root: workspace_root.into(),
            availability_cache: parking_lot::Mutex::new(None),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn build_command(&self, opts: &SpawnOptions, env: &[(String, String)]) -> Result<Command, EngineError> {
        within_workspace_root(&self.workspace_root, &opts.working_dir)
            .map_err(EngineError::Forbidden)?;

        let mut cmd = Command::new(&self.binary);
        cmd.current_dir(&opts.working_dir)
            .arg("--print")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose");

        if let Some(model) = &opts.model {
            cmd.arg("--model").arg(model);
        }
        if let Some(session_id) = &opts.external_session_id {
            cmd.arg("--resume").arg(session_id);
        }
        cmd.arg(&opts.prompt);

        cmd.env_clear();
        for (k, v) in safe_env(env) {
            cmd.env(k, v);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        Ok(cmd)
    }

    async fn probe_availability(&self) -> Availability {
        let probe = Command::new(&self.binary).arg("--version").output();
        match tokio::time::timeout(super::AVAILABILITY_PROBE_TIMEOUT, probe).await {
            Ok(Ok(output)) if output.status.success() => Availability {
                installed: true,
                executable: true,
                version: Some(String::from_utf8_lossy(&output.stdout).trim().to_string()),
                auth_status: AuthStatus::Unknown,
                error: None,
            },
            Ok(Ok(output)) => Availability {
                installed: true,
                executable: false,
                version: None,
                auth_status: AuthStatus::Unknown,
                error: Some(String::from_utf8_lossy(&output.stderr).trim().to_string()),
            },
            Ok(Err(e)) => Availability {
                installed: false,
                executable: false,
                version: None,
                auth_status: AuthStatus::Unknown,
                error: Some(e.to_string()),
            },
            Err(_elapsed) => Availability::timed_out(),
        }
    }
}

#[async_trait]
impl EngineAdapter for ClaudeAdapter {
    fn name(&self) -> &'static str {
        "claude"
    }

    async fn availability(&self) -> Availability {
        if let Some((cached, at)) = self.availability_cache.lock().clone() {
            if at.elapsed() < super::AVAILABILITY_CACHE_TTL {
                return cached;
            }
        }
        let result = self.probe_availability().await;
        *self.availability_cache.lock() = Some((result.clone(), tokio::time::Instant::now()));
        result
    }

    async fn models(&self) -> Vec<ModelInfo> {
        vec![
            ModelInfo {
                id: "claude-opus".to_string(),
                name: "Claude Opus".to_string(),
                is_default: false,
            },
            ModelInfo {
                id: "claude-sonnet".to_string(),
                name: "Claude Sonnet".to_string(),
                is_default: true,
            },
        ]
    }

    async fn spawn(
        &self,
        opts: &SpawnOptions,
        env: &[(String, String)],
    ) -> Result<SpawnedProcess, EngineError> {
        let mut cmd = self.build_command(opts, env)?;
        let mut child = cmd
            .spawn()
            .map_err(|e| EngineError::SpawnFailed(e.to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::SpawnFailed("missing stdout handle".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::SpawnFailed("missing stderr handle".into()))?;
        Ok(SpawnedProcess {
            child: Box::new(child),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
        })
    }

    fn normalize_log_line(&self, raw: &str) -> Option<IssueLogEntry> {
        parse_claude_line(raw)
    }
}

fn get_str<'a>(obj: &'a Value, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

fn base_entry(entry_type: EntryType, content: String) -> IssueLogEntry {
    IssueLogEntry {
        id: None,
        issue_id: IssueId::new(""),
        turn_index: 0,
        entry_index: 0,
        entry_type,
        content,
        metadata: None,
        tool_action: None,
        reply_to_message_id: None,
        timestamp: None,
        visible: true,
    }
}

/// Map one raw stdout line from `claude --output-format stream-json` to a
/// normalized entry. Public for direct unit testing without spawning.
pub fn parse_claude_line(raw: &str) -> Option<IssueLogEntry> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let json: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(_) => return Some(base_entry(EntryType::SystemMessage, raw.to_string())),
    };

    let record_type = get_str(&json, "type").unwrap_or("");

    match record_type {
        "assistant" => parse_assistant(&json),
        "result" => Some(parse_result(&json)),
        "error" => Some(parse_error(&json)),
        "system" if get_str(&json, "subtype") == Some("init") => {
            Some(base_entry(EntryType::SystemMessage, "session initialized".to_string()))
        }
        "user" => None,
        _ => Some(base_entry(EntryType::SystemMessage, trimmed.to_string())),
    }
}

fn parse_assistant(json: &Value) -> Option<IssueLogEntry> {
    let content = json.get("message")?.get("content")?.as_array()?;
    for block in content {
        match get_str(block, "type") {
            Some("text") => {
                let text = get_str(block, "text").unwrap_or_default().to_string();
                return Some(base_entry(EntryType::AssistantMessage, text));
            }
            Some("tool_use") => {
                let tool_name = get_str(block, "name").unwrap_or_default().to_string();
                let input = block.get("input").cloned().unwrap_or(Value::Null);
                let mut entry = base_entry(
                    EntryType::ToolUse,
                    format!("tool call: {tool_name}"),
                );
                entry.tool_action = Some(ToolAction {
                    kind: Some(classify_tool(&tool_name)),
                    path: input.get("file_path").and_then(Value::as_str).map(str::to_string),
                    command: input.get("command").and_then(Value::as_str).map(str::to_string),
                    query: input.get("pattern").and_then(Value::as_str).map(str::to_string),
                    url: input.get("url").and_then(Value::as_str).map(str::to_string),
                    tool_name: Some(tool_name),
                    description: None,
                });
                return Some(entry);
            }
            _ => continue,
        }
    }
    None
}

fn classify_tool(tool_name: &str) -> ToolActionKind {
    match tool_name {
        "Read" | "NotebookRead" => ToolActionKind::FileRead,
        "Edit" | "Write" | "NotebookEdit" => ToolActionKind::FileEdit,
        "Grep" | "Glob" => ToolActionKind::Search,
        "WebFetch" | "WebSearch" => ToolActionKind::WebFetch,
        "Bash" => ToolActionKind::CommandRun,
        _ => ToolActionKind::Tool,
    }
}

fn parse_result(json: &Value) -> IssueLogEntry {
    let subtype = get_str(json, "subtype").unwrap_or("success").to_string();
    let duration = json.get("duration_ms").and_then(Value::as_f64);
    let mut entry = base_entry(EntryType::SystemMessage, format!("turn result: {subtype}"));
    let mut meta = Metadata::empty();
    meta.set("turnCompleted", serde_json::json!(true));
    meta.set("resultSubtype", serde_json::json!(subtype));
    if let Some(d) = duration {
        meta.set("duration", serde_json::json!(d));
    }
    entry.metadata = Some(meta);
    entry
}

fn parse_error(json: &Value) -> IssueLogEntry {
    let message = get_str(json, "message")
        .or_else(|| get_str(json, "error"))
        .unwrap_or("unknown error")
        .to_string();
    base_entry(EntryType::ErrorMessage, message)
}

#[cfg(test)]
#[path = "claude_tests.rs"]
mod tests;
