// SPDX-License-Identifier: MIT

//! Persistence boundary the issue engine depends on (spec §4.4, §5's
//! "read-max-index + insert" transaction discipline for `entryIndex`).
//! `bitk-storage` supplies the SQLite-backed implementation; this crate
//! only needs the contract, so the dependency runs storage -> engine, not
//! the other way around.

use async_trait::async_trait;
use bitk_core::{EngineError, Issue, IssueId, IssueLogEntry, LogEntryId};

/// One page of a `getLogs` cursor walk (spec §4.4).
#[derive(Debug, Clone)]
pub struct LogPage {
    pub entries: Vec<IssueLogEntry>,
    pub next_cursor: Option<LogEntryId>,
    pub has_more: bool,
}

/// Direction requested for `getLogs` pagination (spec §4.4).
#[derive(Debug, Clone, Copy)]
pub enum LogCursor {
    /// No cursor: newest `limit` entries, returned ascending.
    Newest,
    /// Entries strictly after this id (forward).
    After(LogEntryId),
    /// Entries strictly before this id (backward).
    Before(LogEntryId),
}

#[async_trait]
pub trait IssueRepository: Send + Sync {
    async fn get_issue(&self, issue_id: &IssueId) -> Result<Issue, EngineError>;

    async fn save_issue(&self, issue: &Issue) -> Result<(), EngineError>;

    /// Allocate `(turnIndex, entryIndex)` and persist the entry, filling in
    /// `id` and `entry_index`. Must preserve the per-issue total order
    /// (spec §8 invariant: entries uniquely ordered and matching emission
    /// order).
    async fn insert_log_entry(&self, entry: &mut IssueLogEntry) -> Result<(), EngineError>;

    /// Durable pending messages (`visible=1`, `metadata.type=pending`) for
    /// an issue, oldest first.
    async fn list_durable_pending(
        &self,
        issue_id: &IssueId,
    ) -> Result<Vec<IssueLogEntry>, EngineError>;

    /// Flip a pending entry's `visible` flag to false. Monotonic: callers
    /// never need to (and must not) un-mark it (spec §8 invariant).
    async fn mark_dispatched(&self, entry_id: &LogEntryId) -> Result<(), EngineError>;

    async fn get_logs(
        &self,
        issue_id: &IssueId,
        cursor: LogCursor,
        limit: usize,
    ) -> Result<LogPage, EngineError>;

    /// Issues with `status=working` and `sessionStatus` in
    /// `{pending, running}` — candidates for stale-session reconciliation
    /// (spec §4.4).
    async fn working_issues_with_live_session_status(&self) -> Result<Vec<Issue>, EngineError>;
}
