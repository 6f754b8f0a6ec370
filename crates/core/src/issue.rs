// SPDX-License-Identifier: MIT

//! The `Issue` entity (spec §3).

use crate::IssueId;
use crate::ProjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of an issue's position in the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Todo,
    Working,
    Review,
    Done,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Todo => "todo",
            IssueStatus::Working => "working",
            IssueStatus::Review => "review",
            IssueStatus::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "todo" => Some(IssueStatus::Todo),
            "working" => Some(IssueStatus::Working),
            "review" => Some(IssueStatus::Review),
            "done" => Some(IssueStatus::Done),
            _ => None,
        }
    }
}

/// Which external AI CLI tool backs this issue's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineType {
    Claude,
    Codex,
}

impl EngineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineType::Claude => "claude",
            EngineType::Codex => "codex",
        }
    }
}

/// Lifecycle status of an issue's session (spec §4.4 state machine,
/// projected onto the persisted field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SessionStatus::Pending),
            "running" => Some(SessionStatus::Running),
            "completed" => Some(SessionStatus::Completed),
            "failed" => Some(SessionStatus::Failed),
            _ => None,
        }
    }
}

/// Operator-selected permission mode for a spawned process (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    Auto,
    Supervised,
    Plan,
    Bypass,
}

/// Session-related fields bundled onto `Issue` (spec §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionFields {
    pub engine_type: Option<EngineType>,
    pub session_status: Option<SessionStatus>,
    pub prompt: Option<String>,
    pub external_session_id: Option<String>,
    pub model: Option<String>,
    pub base_commit_hash: Option<String>,
}

/// A persistent unit of trackable work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    pub project_id: ProjectId,
    pub status: IssueStatus,
    pub issue_number: i64,
    pub title: String,
    pub priority: String,
    pub sort_order: i64,
    pub parent_issue_id: Option<IssueId>,
    pub use_worktree: bool,
    #[serde(flatten)]
    pub session: SessionFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
}

impl Issue {
    /// spec §3 invariant: a sub-issue's parent must itself be top-level.
    /// Call with the *parent's* parent id (None if the parent is top-level).
    pub fn validate_nesting(parent_of_parent: Option<&IssueId>) -> Result<(), String> {
        if parent_of_parent.is_some() {
            return Err("max nesting depth is 1: parent already has a parent".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            IssueStatus::Todo,
            IssueStatus::Working,
            IssueStatus::Review,
            IssueStatus::Done,
        ] {
            assert_eq!(IssueStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(IssueStatus::parse("bogus"), None);
    }

    #[test]
    fn sub_issue_of_sub_issue_is_rejected() {
        let grandparent = IssueId::new("gp-1");
        assert!(Issue::validate_nesting(Some(&grandparent)).is_err());
        assert!(Issue::validate_nesting(None).is_ok());
    }
}
