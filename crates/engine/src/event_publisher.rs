// SPDX-License-Identifier: MIT

//! The C5 publish surface the issue engine depends on (spec §4.5). Kept
//! as a plain, non-async, object-safe trait: the event bus delivers on
//! the publisher's own task, and subscribers must not block it (spec §5
//! "the event bus delivers on the publisher's task"). `bitk-daemon`'s
//! `tokio::sync::broadcast`-backed bus implements this.

use bitk_core::{ChangesSummary, ExecutionId, ExecutionState, Issue, IssueId, IssueLogEntry};

pub trait EventPublisher: Send + Sync {
    fn publish_log(&self, issue_id: &IssueId, execution_id: &ExecutionId, entry: IssueLogEntry);

    fn publish_state(&self, issue_id: &IssueId, execution_id: &ExecutionId, state: ExecutionState);

    fn publish_settled(
        &self,
        issue_id: &IssueId,
        execution_id: &ExecutionId,
        final_status: ExecutionState,
    );

    fn publish_issue_updated(&self, issue: &Issue);

    fn publish_changes_summary(&self, summary: ChangesSummary);
}
