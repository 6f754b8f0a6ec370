// SPDX-License-Identifier: MIT

//! Shared test doubles for the engine crate.

use crate::event_publisher::EventPublisher;
use crate::repository::{IssueRepository, LogCursor, LogPage};
use async_trait::async_trait;
use bitk_core::{
    ChangesSummary, EngineError, ExecutionId, ExecutionState, Issue, IssueId, IssueLogEntry,
    IssueStatus, LogEntryId, SessionStatus,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory `IssueRepository` for engine unit tests.
pub(crate) struct FakeRepository {
    issues: Mutex<HashMap<IssueId, Issue>>,
    logs: Mutex<HashMap<IssueId, Vec<IssueLogEntry>>>,
    next_entry_id: AtomicU64,
}

impl FakeRepository {
    pub(crate) fn new() -> Self {
        Self {
            issues: Mutex::new(HashMap::new()),
            logs: Mutex::new(HashMap::new()),
            next_entry_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn seed_issue(&self, issue: Issue) {
        self.issues.lock().insert(issue.id.clone(), issue);
    }

    pub(crate) fn logs_for(&self, issue_id: &IssueId) -> Vec<IssueLogEntry> {
        self.logs.lock().get(issue_id).cloned().unwrap_or_default()
    }
}

impl Default for FakeRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IssueRepository for FakeRepository {
    async fn get_issue(&self, issue_id: &IssueId) -> Result<Issue, EngineError> {
        self.issues
            .lock()
            .get(issue_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("issue {issue_id}")))
    }

    async fn save_issue(&self, issue: &Issue) -> Result<(), EngineError> {
        self.issues.lock().insert(issue.id.clone(), issue.clone());
        Ok(())
    }

    async fn insert_log_entry(&self, entry: &mut IssueLogEntry) -> Result<(), EngineError> {
        let id = self.next_entry_id.fetch_add(1, Ordering::SeqCst);
        let mut logs = self.logs.lock();
        let bucket = logs.entry(entry.issue_id.clone()).or_default();
        entry.entry_index = bucket.len() as u64;
        entry.id = Some(LogEntryId::new(format!("log-{id}")));
        bucket.push(entry.clone());
        Ok(())
    }

    async fn list_durable_pending(
        &self,
        issue_id: &IssueId,
    ) -> Result<Vec<IssueLogEntry>, EngineError> {
        Ok(self
            .logs_for(issue_id)
            .into_iter()
            .filter(|e| e.is_pending_message())
            .collect())
    }

    async fn mark_dispatched(&self, entry_id: &LogEntryId) -> Result<(), EngineError> {
        let mut logs = self.logs.lock();
        for bucket in logs.values_mut() {
            if let Some(e) = bucket.iter_mut().find(|e| e.id.as_ref() == Some(entry_id)) {
                e.visible = false;
            }
        }
        Ok(())
    }

    async fn get_logs(
        &self,
        issue_id: &IssueId,
        cursor: LogCursor,
        limit: usize,
    ) -> Result<LogPage, EngineError> {
        let all = self.logs_for(issue_id);
        let ordered: Vec<_> = match cursor {
            LogCursor::Newest => {
                let start = all.len().saturating_sub(limit);
                all[start..].to_vec()
            }
            LogCursor::After(ref id) => all
                .into_iter()
                .skip_while(|e| e.id.as_ref() != Some(id))
                .skip(1)
                .take(limit)
                .collect(),
            LogCursor::Before(ref id) => {
                let idx = all.iter().position(|e| e.id.as_ref() == Some(id));
                match idx {
                    Some(idx) => {
                        let start = idx.saturating_sub(limit);
                        all[start..idx].to_vec()
                    }
                    None => Vec::new(),
                }
            }
        };
        let next_cursor = ordered.first().and_then(|e| e.id.clone());
        Ok(LogPage {
            has_more: false,
            next_cursor,
            entries: ordered,
        })
    }

    async fn working_issues_with_live_session_status(&self) -> Result<Vec<Issue>, EngineError> {
        Ok(self
            .issues
            .lock()
            .values()
            .filter(|i| {
                i.status == IssueStatus::Working
                    && matches!(
                        i.session.session_status,
                        Some(SessionStatus::Pending) | Some(SessionStatus::Running)
                    )
            })
            .cloned()
            .collect())
    }
}

/// In-memory `EventPublisher` that records every call for assertions.
pub(crate) struct FakeEventPublisher {
    logs: Mutex<Vec<IssueLogEntry>>,
    states: Mutex<Vec<(IssueId, ExecutionId, ExecutionState)>>,
    settled: Mutex<Vec<(IssueId, ExecutionId, ExecutionState)>>,
    issue_updates: Mutex<Vec<Issue>>,
    changes_summaries: Mutex<Vec<ChangesSummary>>,
}

impl FakeEventPublisher {
    pub(crate) fn new() -> Self {
        Self {
            logs: Mutex::new(Vec::new()),
            states: Mutex::new(Vec::new()),
            settled: Mutex::new(Vec::new()),
            issue_updates: Mutex::new(Vec::new()),
            changes_summaries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn logged(&self) -> Vec<IssueLogEntry> {
        self.logs.lock().clone()
    }

    pub(crate) fn states(&self) -> Vec<(IssueId, ExecutionId, ExecutionState)> {
        self.states.lock().clone()
    }

    pub(crate) fn settled(&self) -> Vec<(IssueId, ExecutionId, ExecutionState)> {
        self.settled.lock().clone()
    }

    pub(crate) fn issue_updates(&self) -> Vec<Issue> {
        self.issue_updates.lock().clone()
    }
}

impl Default for FakeEventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPublisher for FakeEventPublisher {
    fn publish_log(&self, _issue_id: &IssueId, _execution_id: &ExecutionId, entry: IssueLogEntry) {
        self.logs.lock().push(entry);
    }

    fn publish_state(
        &self,
        issue_id: &IssueId,
        execution_id: &ExecutionId,
        state: ExecutionState,
    ) {
        self.states
            .lock()
            .push((issue_id.clone(), execution_id.clone(), state));
    }

    fn publish_settled(
        &self,
        issue_id: &IssueId,
        execution_id: &ExecutionId,
        final_status: ExecutionState,
    ) {
        self.settled
            .lock()
            .push((issue_id.clone(), execution_id.clone(), final_status));
    }

    fn publish_issue_updated(&self, issue: &Issue) {
        self.issue_updates.lock().push(issue.clone());
    }

    fn publish_changes_summary(&self, summary: ChangesSummary) {
        self.changes_summaries.lock().push(summary);
    }
}
