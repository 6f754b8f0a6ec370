// SPDX-License-Identifier: MIT

//! Row <-> domain-type conversions. Timestamps are stored as RFC3339 text
//! (spec §3: "matching the wire shape's `timestamp?: ISO-8601`"); metadata
//! and tool-action columns are JSON text, `NULL` when absent.

use crate::error::StorageError;
use bitk_core::{
    EngineType, EntryType, Issue, IssueId, IssueLogEntry, IssueStatus, LogEntryId, Metadata,
    Project, ProjectId, SessionFields, SessionStatus, ToolAction,
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::CorruptRow(format!("bad timestamp {raw:?}: {e}")))
}

pub fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub fn issue_from_row(row: &SqliteRow) -> Result<Issue, StorageError> {
    let status_id: String = row.try_get("status_id")?;
    let status = IssueStatus::parse(&status_id)
        .ok_or_else(|| StorageError::CorruptRow(format!("bad status_id {status_id:?}")))?;

    let engine_type: Option<String> = row.try_get("engine_type")?;
    let engine_type = engine_type
        .map(|s| match s.as_str() {
            "claude" => Ok(EngineType::Claude),
            "codex" => Ok(EngineType::Codex),
            other => Err(StorageError::CorruptRow(format!(
                "bad engine_type {other:?}"
            ))),
        })
        .transpose()?;

    let session_status: Option<String> = row.try_get("session_status")?;
    let session_status = session_status
        .map(|s| {
            SessionStatus::parse(&s)
                .ok_or_else(|| StorageError::CorruptRow(format!("bad session_status {s:?}")))
        })
        .transpose()?;

    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let parent_issue_id: Option<String> = row.try_get("parent_issue_id")?;

    Ok(Issue {
        id: IssueId::new(row.try_get::<String, _>("id")?),
        project_id: ProjectId::new(row.try_get::<String, _>("project_id")?),
        status,
        issue_number: row.try_get("issue_number")?,
        title: row.try_get("title")?,
        priority: row.try_get("priority")?,
        sort_order: row.try_get("sort_order")?,
        parent_issue_id: parent_issue_id.map(IssueId::new),
        use_worktree: row.try_get::<i64, _>("use_worktree")? != 0,
        session: SessionFields {
            engine_type,
            session_status,
            prompt: row.try_get("prompt")?,
            external_session_id: row.try_get("external_session_id")?,
            model: row.try_get("model")?,
            base_commit_hash: row.try_get("base_commit_hash")?,
        },
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
        is_deleted: row.try_get::<i64, _>("is_deleted")? != 0,
    })
}

pub fn log_entry_from_row(row: &SqliteRow) -> Result<IssueLogEntry, StorageError> {
    let entry_type: String = row.try_get("entry_type")?;
    let entry_type = entry_type_from_str(&entry_type)?;

    let metadata: Option<String> = row.try_get("metadata")?;
    let metadata = metadata
        .map(|raw| {
            serde_json::from_str::<serde_json::Value>(&raw)
                .map(Metadata)
                .map_err(|e| StorageError::CorruptRow(format!("bad metadata json: {e}")))
        })
        .transpose()?;

    let tool_action: Option<String> = row.try_get("tool_action")?;
    let tool_action = tool_action
        .map(|raw| {
            serde_json::from_str::<ToolAction>(&raw)
                .map_err(|e| StorageError::CorruptRow(format!("bad tool_action json: {e}")))
        })
        .transpose()?;

    let reply_to_message_id: Option<String> = row.try_get("reply_to_message_id")?;
    let timestamp: Option<String> = row.try_get("timestamp")?;
    let timestamp = timestamp.map(|t| parse_ts(&t)).transpose()?;

    Ok(IssueLogEntry {
        id: Some(LogEntryId::new(row.try_get::<String, _>("id")?)),
        issue_id: IssueId::new(row.try_get::<String, _>("issue_id")?),
        turn_index: row.try_get::<i64, _>("turn_index")? as u32,
        entry_index: row.try_get::<i64, _>("entry_index")? as u64,
        entry_type,
        content: row.try_get("content")?,
        metadata,
        tool_action,
        reply_to_message_id: reply_to_message_id.map(LogEntryId::new),
        timestamp,
        visible: row.try_get::<i64, _>("visible")? != 0,
    })
}

fn entry_type_from_str(s: &str) -> Result<EntryType, StorageError> {
    match s {
        "user-message" => Ok(EntryType::UserMessage),
        "assistant-message" => Ok(EntryType::AssistantMessage),
        "tool-use" => Ok(EntryType::ToolUse),
        "system-message" => Ok(EntryType::SystemMessage),
        "error-message" => Ok(EntryType::ErrorMessage),
        "thinking" => Ok(EntryType::Thinking),
        "loading" => Ok(EntryType::Loading),
        "token-usage" => Ok(EntryType::TokenUsage),
        other => Err(StorageError::CorruptRow(format!("bad entry_type {other:?}"))),
    }
}

pub fn project_from_row(row: &SqliteRow) -> Result<Project, StorageError> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(Project {
        id: ProjectId::new(row.try_get::<String, _>("id")?),
        name: row.try_get("name")?,
        alias: row.try_get("alias")?,
        description: row.try_get("description")?,
        directory: row.try_get("directory")?,
        repository_url: row.try_get("repository_url")?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
        is_deleted: row.try_get::<i64, _>("is_deleted")? != 0,
    })
}
