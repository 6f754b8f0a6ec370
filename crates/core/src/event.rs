// SPDX-License-Identifier: MIT

//! Event payloads published on the event bus (spec §4.5, §6).

use crate::{ExecutionId, IssueId, IssueLogEntry};
use serde::{Deserialize, Serialize};

/// Terminal/live state of one execution, as broadcast on the `state` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Starting,
    Running,
    Terminating,
    Completed,
    Failed,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionState::Completed | ExecutionState::Failed)
    }
}

/// Placeholder summary produced by the (out-of-scope) git-diff summarizer,
/// forwarded verbatim through the `changes-summary` channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangesSummary {
    pub issue_id: IssueId,
    pub files_changed: u32,
    pub insertions: u32,
    pub deletions: u32,
}

/// The five named event kinds the bus fans out (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "log")]
    Log {
        issue_id: IssueId,
        execution_id: ExecutionId,
        entry: Box<IssueLogEntry>,
    },
    #[serde(rename = "state")]
    State {
        issue_id: IssueId,
        execution_id: ExecutionId,
        state: ExecutionState,
    },
    #[serde(rename = "settled")]
    Settled {
        issue_id: IssueId,
        execution_id: ExecutionId,
        final_status: ExecutionState,
    },
    #[serde(rename = "issue-updated")]
    IssueUpdated {
        issue_id: IssueId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deleted: Option<bool>,
    },
    #[serde(rename = "changes-summary")]
    ChangesSummaryEvent { summary: ChangesSummary },
}

impl Event {
    /// The issue this event concerns, used for project-scoped filtering.
    pub fn issue_id(&self) -> &IssueId {
        match self {
            Event::Log { issue_id, .. }
            | Event::State { issue_id, .. }
            | Event::Settled { issue_id, .. }
            | Event::IssueUpdated { issue_id, .. } => issue_id,
            Event::ChangesSummaryEvent { summary } => &summary.issue_id,
        }
    }

    /// Name used for SSE's named-event framing (spec §6).
    pub fn sse_event_name(&self) -> &'static str {
        match self {
            Event::Log { .. } => "log",
            Event::State { .. } => "state",
            Event::Settled { .. } => "done",
            Event::IssueUpdated { .. } => "issue-updated",
            Event::ChangesSummaryEvent { .. } => "changes-summary",
        }
    }
}
