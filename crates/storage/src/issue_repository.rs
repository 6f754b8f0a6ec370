// SPDX-License-Identifier: MIT

//! `IssueRepository` implementation (spec §4.4, §5's "read-max-index +
//! insert" discipline for `entryIndex`).

use crate::mapping::{fmt_ts, issue_from_row, log_entry_from_row};
use crate::store::SqliteStore;
use async_trait::async_trait;
use bitk_core::{EngineError, Issue, IssueId, IssueLogEntry, LogEntryId};
use bitk_engine::{IssueRepository, LogCursor, LogPage};
use sqlx::Row;

#[async_trait]
impl IssueRepository for SqliteStore {
    async fn get_issue(&self, issue_id: &IssueId) -> Result<Issue, EngineError> {
        let row = sqlx::query("SELECT * FROM issues WHERE id = ?")
            .bind(issue_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(crate::error::StorageError::from)?
            .ok_or_else(|| EngineError::NotFound(format!("issue {issue_id} not found")))?;
        issue_from_row(&row).map_err(EngineError::from)
    }

    async fn save_issue(&self, issue: &Issue) -> Result<(), EngineError> {
        let now = chrono::Utc::now();
        sqlx::query(
            "UPDATE issues SET status_id = ?, title = ?, priority = ?, sort_order = ?, \
             use_worktree = ?, engine_type = ?, session_status = ?, prompt = ?, \
             external_session_id = ?, model = ?, base_commit_hash = ?, updated_at = ?, \
             is_deleted = ? WHERE id = ?",
        )
        .bind(issue.status.as_str())
        .bind(&issue.title)
        .bind(&issue.priority)
        .bind(issue.sort_order)
        .bind(issue.use_worktree as i64)
        .bind(issue.session.engine_type.map(|e| e.as_str()))
        .bind(issue.session.session_status.map(|s| s.as_str()))
        .bind(&issue.session.prompt)
        .bind(&issue.session.external_session_id)
        .bind(&issue.session.model)
        .bind(&issue.session.base_commit_hash)
        .bind(fmt_ts(&now))
        .bind(issue.is_deleted as i64)
        .bind(issue.id.as_str())
        .execute(&self.pool)
        .await
        .map_err(crate::error::StorageError::from)?;
        Ok(())
    }

    async fn insert_log_entry(&self, entry: &mut IssueLogEntry) -> Result<(), EngineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(crate::error::StorageError::from)?;

        let next_entry_index: i64 = sqlx::query(
            "SELECT COALESCE(MAX(entry_index), -1) AS m FROM issue_logs WHERE issue_id = ?",
        )
        .bind(entry.issue_id.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(crate::error::StorageError::from)?
        .try_get::<i64, _>("m")
        .map_err(crate::error::StorageError::from)?
            + 1;

        let id = LogEntryId::new(format!(
            "{}-{}",
            entry.issue_id.as_str(),
            next_entry_index
        ));
        let now = chrono::Utc::now();
        let metadata_json = entry
            .metadata
            .as_ref()
            .map(|m| serde_json::to_string(m.raw()))
            .transpose()
            .map_err(|e| EngineError::Internal(format!("metadata serialize: {e}")))?;
        let tool_action_json = entry
            .tool_action
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| EngineError::Internal(format!("tool_action serialize: {e}")))?;

        sqlx::query(
            "INSERT INTO issue_logs (id, issue_id, turn_index, entry_index, entry_type, \
             content, metadata, tool_action, reply_to_message_id, timestamp, visible, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.as_str())
        .bind(entry.issue_id.as_str())
        .bind(entry.turn_index as i64)
        .bind(next_entry_index)
        .bind(entry.entry_type.as_str())
        .bind(&entry.content)
        .bind(metadata_json)
        .bind(tool_action_json)
        .bind(entry.reply_to_message_id.as_ref().map(LogEntryId::as_str))
        .bind(entry.timestamp.map(|t| fmt_ts(&t)))
        .bind(entry.visible as i64)
        .bind(fmt_ts(&now))
        .bind(fmt_ts(&now))
        .execute(&mut *tx)
        .await
        .map_err(crate::error::StorageError::from)?;

        tx.commit().await.map_err(crate::error::StorageError::from)?;

        entry.id = Some(id);
        entry.entry_index = next_entry_index as u64;
        Ok(())
    }

    async fn list_durable_pending(
        &self,
        issue_id: &IssueId,
    ) -> Result<Vec<IssueLogEntry>, EngineError> {
        let rows = sqlx::query(
            "SELECT * FROM issue_logs WHERE issue_id = ? AND visible = 1 \
             AND entry_type = 'user-message' AND json_extract(metadata, '$.type') = 'pending' \
             ORDER BY entry_index ASC",
        )
        .bind(issue_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::StorageError::from)?;

        rows.iter()
            .map(|r| log_entry_from_row(r).map_err(EngineError::from))
            .collect()
    }

    async fn mark_dispatched(&self, entry_id: &LogEntryId) -> Result<(), EngineError> {
        sqlx::query("UPDATE issue_logs SET visible = 0 WHERE id = ?")
            .bind(entry_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(crate::error::StorageError::from)?;
        Ok(())
    }

    async fn get_logs(
        &self,
        issue_id: &IssueId,
        cursor: LogCursor,
        limit: usize,
    ) -> Result<LogPage, EngineError> {
        let limit_i64 = limit as i64;
        let rows = match cursor {
            LogCursor::Newest => sqlx::query(
                "SELECT * FROM issue_logs WHERE issue_id = ? \
                 ORDER BY turn_index DESC, entry_index DESC LIMIT ?",
            )
            .bind(issue_id.as_str())
            .bind(limit_i64 + 1)
            .fetch_all(&self.pool)
            .await
            .map_err(crate::error::StorageError::from)?,

            LogCursor::After(ref anchor) => {
                let (t, e) = self.anchor_position(anchor).await?;
                sqlx::query(
                    "SELECT * FROM issue_logs WHERE issue_id = ? \
                     AND (turn_index, entry_index) > (?, ?) \
                     ORDER BY turn_index ASC, entry_index ASC LIMIT ?",
                )
                .bind(issue_id.as_str())
                .bind(t)
                .bind(e)
                .bind(limit_i64 + 1)
                .fetch_all(&self.pool)
                .await
                .map_err(crate::error::StorageError::from)?
            }

            LogCursor::Before(ref anchor) => {
                let (t, e) = self.anchor_position(anchor).await?;
                sqlx::query(
                    "SELECT * FROM issue_logs WHERE issue_id = ? \
                     AND (turn_index, entry_index) < (?, ?) \
                     ORDER BY turn_index DESC, entry_index DESC LIMIT ?",
                )
                .bind(issue_id.as_str())
                .bind(t)
                .bind(e)
                .bind(limit_i64 + 1)
                .fetch_all(&self.pool)
                .await
                .map_err(crate::error::StorageError::from)?
            }
        };

        let has_more = rows.len() > limit;
        let mut entries: Vec<IssueLogEntry> = rows
            .iter()
            .take(limit)
            .map(|r| log_entry_from_row(r).map_err(EngineError::from))
            .collect::<Result<_, _>>()?;

        // Newest/Before are queried in descending order; present all pages
        // ascending by (turnIndex, entryIndex) as spec §4.4 requires.
        if matches!(cursor, LogCursor::Newest | LogCursor::Before(_)) {
            entries.reverse();
        }

        let next_cursor = match cursor {
            LogCursor::Before(_) => entries.first().and_then(|e| e.id.clone()),
            _ => entries.last().and_then(|e| e.id.clone()),
        };

        Ok(LogPage {
            entries,
            next_cursor,
            has_more,
        })
    }

    async fn working_issues_with_live_session_status(&self) -> Result<Vec<Issue>, EngineError> {
        let rows = sqlx::query(
            "SELECT * FROM issues WHERE status_id = 'working' \
             AND session_status IN ('pending', 'running') AND is_deleted = 0",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::StorageError::from)?;

        rows.iter()
            .map(|r| issue_from_row(r).map_err(EngineError::from))
            .collect()
    }
}

impl SqliteStore {
    async fn anchor_position(&self, anchor: &LogEntryId) -> Result<(i64, i64), EngineError> {
        let row = sqlx::query("SELECT turn_index, entry_index FROM issue_logs WHERE id = ?")
            .bind(anchor.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(crate::error::StorageError::from)?
            .ok_or_else(|| EngineError::NotFound(format!("log cursor {anchor} not found")))?;
        let turn_index: i64 = row
            .try_get("turn_index")
            .map_err(crate::error::StorageError::from)?;
        let entry_index: i64 = row
            .try_get("entry_index")
            .map_err(crate::error::StorageError::from)?;
        Ok((turn_index, entry_index))
    }
}
