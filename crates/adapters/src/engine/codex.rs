// SPDX-License-Identifier: MIT

//! Adapter for the `codex` CLI's JSON-RPC-over-stdio transport.
//!
//! Per the open question in spec §9, the source this was distilled from
//! left `spawn` unimplemented for this engine; we keep that behavior as an
//! explicit stub rather than guessing at the real wire protocol.

use super::{Availability, AuthStatus, EngineAdapter, ModelInfo, SpawnOptions, SpawnedProcess};
use async_trait::async_trait;
use bitk_core::{EngineError, EntryType, IssueLogEntry, IssueId};
use serde_json::Value;

pub struct CodexAdapter;

impl Default for CodexAdapter {
    fn default() -> Self {
        Self
    }
}

#[async_trait]
impl EngineAdapter for CodexAdapter {
    fn name(&self) -> &'static str {
        "codex"
    }

    async fn availability(&self) -> Availability {
        Availability {
            installed: true,
            executable: false,
            version: None,
            auth_status: AuthStatus::Unknown,
            error: Some("codex adapter spawn is not implemented".to_string()),
        }
    }

    async fn models(&self) -> Vec<ModelInfo> {
        Vec::new()
    }

    async fn spawn(
        &self,
        _opts: &SpawnOptions,
        _env: &[(String, String)],
    ) -> Result<SpawnedProcess, EngineError> {
        Err(EngineError::EngineUnavailable(
            "codex adapter spawn is not implemented".to_string(),
        ))
    }

    fn normalize_log_line(&self, raw: &str) -> Option<IssueLogEntry> {
        parse_codex_rpc_line(raw)
    }
}

/// Best-effort mapping of a codex JSON-RPC notification line to a
/// normalized entry, used by tests exercising the RPC session helper
/// independently of the (stubbed) spawn path.
pub fn parse_codex_rpc_line(raw: &str) -> Option<IssueLogEntry> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let json: Value = serde_json::from_str(trimmed).ok()?;
    let method = json.get("method")?.as_str()?;
    let content = json
        .get("params")
        .and_then(|p| p.get("message"))
        .and_then(Value::as_str)
        .unwrap_or(trimmed)
        .to_string();

    let entry_type = match method {
        "agentMessage" => EntryType::AssistantMessage,
        "toolCall" => EntryType::ToolUse,
        "error" => EntryType::ErrorMessage,
        _ => EntryType::SystemMessage,
    };

    Some(IssueLogEntry {
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
    })
}
