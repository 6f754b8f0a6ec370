// SPDX-License-Identifier: MIT

//! Issue log entries: the durable, ordered record of everything that
//! happened during an issue's executions (spec §3, §6).

use crate::{IssueId, LogEntryId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of a normalized log entry (spec §6 wire shape).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryType {
    UserMessage,
    AssistantMessage,
    ToolUse,
    SystemMessage,
    ErrorMessage,
    Thinking,
    Loading,
    TokenUsage,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::UserMessage => "user-message",
            EntryType::AssistantMessage => "assistant-message",
            EntryType::ToolUse => "tool-use",
            EntryType::SystemMessage => "system-message",
            EntryType::ErrorMessage => "error-message",
            EntryType::Thinking => "thinking",
            EntryType::Loading => "loading",
            EntryType::TokenUsage => "token-usage",
        }
    }
}

/// Coarse classification of a tool invocation, used by `ToolAction` and by
/// the shell-command classifier (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolActionKind {
    FileRead,
    FileEdit,
    CommandRun,
    Search,
    WebFetch,
    Tool,
    Other,
}

/// A tagged, kind-specific description of a tool call surfaced to the UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolAction {
    pub kind: Option<ToolActionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Opaque key/value bag, JSON at rest. Typed accessors cover the contracts
/// the engine actually depends on (spec §9 design note); everything else
/// stays addressable via `raw()` for adapters that need bespoke fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(pub serde_json::Value);

impl Metadata {
    pub fn empty() -> Self {
        Self(serde_json::Value::Object(Default::default()))
    }

    pub fn raw(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn turn_completed(&self) -> bool {
        self.0
            .get("turnCompleted")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn result_subtype(&self) -> Option<&str> {
        self.0.get("resultSubtype").and_then(|v| v.as_str())
    }

    pub fn duration(&self) -> Option<f64> {
        self.0.get("duration").and_then(|v| v.as_f64())
    }

    pub fn is_pending(&self) -> bool {
        self.0
            .get("pending")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn type_tag(&self) -> Option<&str> {
        self.0.get("type").and_then(|v| v.as_str())
    }

    pub fn set(&mut self, key: &str, value: serde_json::Value) {
        if let serde_json::Value::Object(map) = &mut self.0 {
            map.insert(key.to_string(), value);
        } else {
            self.0 = serde_json::json!({ key: value });
        }
    }
}

/// A single entry in an issue's durable log (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueLogEntry {
    pub id: Option<LogEntryId>,
    pub issue_id: IssueId,
    pub turn_index: u32,
    pub entry_index: u64,
    pub entry_type: EntryType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_action: Option<ToolAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<LogEntryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub visible: bool,
}

impl IssueLogEntry {
    /// Whether this entry is a pending user-message per spec §3's
    /// "pending message" definition: entryType=user-message, visible,
    /// metadata.type=pending.
    pub fn is_pending_message(&self) -> bool {
        self.entry_type == EntryType::UserMessage
            && self.visible
            && self
                .metadata
                .as_ref()
                .map(|m| m.type_tag() == Some("pending"))
                .unwrap_or(false)
    }

    /// Turn-completion inference per spec §4.4.
    pub fn signals_turn_completed(&self) -> bool {
        let Some(meta) = &self.metadata else {
            return false;
        };
        if meta.turn_completed() {
            return true;
        }
        if meta.result_subtype().is_some() {
            return true;
        }
        if self.entry_type == EntryType::SystemMessage && meta.duration().is_some() {
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(entry_type: EntryType, metadata: Option<Metadata>) -> IssueLogEntry {
        IssueLogEntry {
            id: None,
            issue_id: IssueId::new("i-1"),
            turn_index: 0,
            entry_index: 0,
            entry_type,
            content: String::new(),
            metadata,
            tool_action: None,
            reply_to_message_id: None,
            timestamp: None,
            visible: true,
        }
    }

    #[test]
    fn pending_message_requires_all_three_conditions() {
        let mut meta = Metadata::empty();
        meta.set("type", serde_json::json!("pending"));
        let e = entry(EntryType::UserMessage, Some(meta));
        assert!(e.is_pending_message());

        let mut not_visible = entry(EntryType::UserMessage, e.metadata.clone());
        not_visible.visible = false;
        assert!(!not_visible.is_pending_message());

        let wrong_type = entry(EntryType::AssistantMessage, e.metadata.clone());
        assert!(!wrong_type.is_pending_message());
    }

    #[test]
    fn turn_completion_signals() {
        let mut m1 = Metadata::empty();
        m1.set("turnCompleted", serde_json::json!(true));
        assert!(entry(EntryType::AssistantMessage, Some(m1)).signals_turn_completed());

        let mut m2 = Metadata::empty();
        m2.set("resultSubtype", serde_json::json!("success"));
        assert!(entry(EntryType::SystemMessage, Some(m2)).signals_turn_completed());

        let mut m3 = Metadata::empty();
        m3.set("duration", serde_json::json!(12.5));
        assert!(entry(EntryType::SystemMessage, Some(m3)).signals_turn_completed());
        assert!(!entry(EntryType::AssistantMessage, Some(m3)).signals_turn_completed());

        assert!(!entry(EntryType::AssistantMessage, None).signals_turn_completed());
    }
}
