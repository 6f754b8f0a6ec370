// SPDX-License-Identifier: MIT

//! The managed-process bookkeeping (component C3, spec §3, §4.3): a
//! passive data object owned exclusively by the issue engine.

use bitk_adapters::ManagedChild;
use bitk_core::{EngineType, ExecutionId, IssueId, IssueLogEntry, LogEntryId, PermissionMode};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// Cap on the in-memory log ring per process; the durable store stays
/// authoritative and uncapped (spec §4.3, §5).
pub const MAX_LOG_ENTRIES: usize = 500;

/// Where a managed process sits in the per-issue state machine (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Running,
    Terminating,
    Exited,
}

/// One user input queued while a process is busy (spec §3).
#[derive(Debug, Clone)]
pub struct PendingInput {
    pub prompt: String,
    pub display_prompt: String,
    pub model: Option<String>,
    /// Id of the durable `user-message` row this came from, so it can be
    /// marked dispatched once accepted (spec §4.4 scenario 2).
    pub log_entry_id: Option<LogEntryId>,
}

/// The in-memory bundle for one execution attempt (spec §3, §4.3).
///
/// A single "execution" may span more than one underlying OS process:
/// each user turn after the first is delivered via `spawnFollowUp` with
/// session continuity (spec §4.1), while the execution itself stays
/// `running` in the state table across those respawns.
pub struct ManagedProcess {
    pub execution_id: ExecutionId,
    pub issue_id: IssueId,
    pub engine_type: EngineType,
    pub permission_mode: PermissionMode,
    /// Shared so the cancel path (graceful request, deadline hard-kill) and
    /// the stream-consumer task (sole owner of the final `wait()`) can each
    /// borrow it without holding a lock across the other's await points.
    pub child: Arc<AsyncMutex<Box<dyn ManagedChild>>>,
    pub state: ProcessState,
    pub turn_index: u32,
    pub turn_in_flight: bool,
    pub pending_inputs: VecDeque<PendingInput>,
    logs: VecDeque<IssueLogEntry>,
    pub cancelled_by_user: bool,
    pub meta_turn: bool,
    pub logical_failure: bool,
    pub logical_failure_reason: Option<String>,
    pub slash_commands: Vec<String>,
}

impl ManagedProcess {
    pub fn new(
        execution_id: ExecutionId,
        issue_id: IssueId,
        engine_type: EngineType,
        permission_mode: PermissionMode,
        child: Box<dyn ManagedChild>,
    ) -> Self {
        Self {
            execution_id,
            issue_id,
            engine_type,
            permission_mode,
            child: Arc::new(AsyncMutex::new(child)),
            state: ProcessState::Starting,
            turn_index: 0,
            turn_in_flight: true,
            pending_inputs: VecDeque::new(),
            logs: VecDeque::new(),
            cancelled_by_user: false,
            meta_turn: false,
            logical_failure: false,
            logical_failure_reason: None,
            slash_commands: Vec::new(),
        }
    }

    /// Push an entry into the bounded ring; overflow is silently dropped
    /// from memory (spec §4.3 — the durable store remains authoritative).
    pub fn push_log(&mut self, entry: IssueLogEntry) {
        if self.logs.len() >= MAX_LOG_ENTRIES {
            self.logs.pop_front();
        }
        self.logs.push_back(entry);
    }

    pub fn logs(&self) -> impl Iterator<Item = &IssueLogEntry> {
        self.logs.iter()
    }

    pub fn enqueue_pending(&mut self, input: PendingInput) {
        self.pending_inputs.push_back(input);
    }

    /// Merge all queued inputs into one prompt, blank-line separated, with
    /// the last queued model override winning (spec §4.4 turn completion).
    pub fn drain_and_merge_pending(&mut self) -> Option<(String, Option<String>, Vec<PendingInput>)> {
        if self.pending_inputs.is_empty() {
            return None;
        }
        let drained: Vec<_> = self.pending_inputs.drain(..).collect();
        let merged_prompt = drained
            .iter()
            .map(|p| p.prompt.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let model = drained.iter().rev().find_map(|p| p.model.clone());
        Some((merged_prompt, model, drained))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bitk_adapters::ExitOutcome;
    use bitk_core::{EntryType, IssueId};

    struct NoopChild;

    #[async_trait]
    impl ManagedChild for NoopChild {
        async fn kill(&mut self) -> Result<(), bitk_core::EngineError> {
            Ok(())
        }
        async fn wait(&mut self) -> Result<ExitOutcome, bitk_core::EngineError> {
            Ok(ExitOutcome {
                success: true,
                code: Some(0),
            })
        }
    }

    fn entry(content: &str) -> IssueLogEntry {
        IssueLogEntry {
            id: None,
            issue_id: IssueId::new("i-1"),
            turn_index: 0,
            entry_index: 0,
            entry_type: EntryType::AssistantMessage,
            content: content.to_string(),
            metadata: None,
            tool_action: None,
            reply_to_message_id: None,
            timestamp: None,
            visible: true,
        }
    }

    fn process() -> ManagedProcess {
        ManagedProcess::new(
            ExecutionId::new("e-1"),
            IssueId::new("i-1"),
            EngineType::Claude,
            PermissionMode::Auto,
            Box::new(NoopChild),
        )
    }

    #[test]
    fn ring_buffer_drops_oldest_beyond_cap() {
        let mut p = process();
        for i in 0..(MAX_LOG_ENTRIES + 10) {
            p.push_log(entry(&i.to_string()));
        }
        assert_eq!(p.logs().count(), MAX_LOG_ENTRIES);
        assert_eq!(p.logs().next().unwrap().content, "10");
    }

    #[test]
    fn pending_merge_is_blank_line_joined_with_last_model_wins() {
        let mut p = process();
        p.enqueue_pending(PendingInput {
            prompt: "first".into(),
            display_prompt: "first".into(),
            model: Some("a".into()),
            log_entry_id: None,
        });
        p.enqueue_pending(PendingInput {
            prompt: "second".into(),
            display_prompt: "second".into(),
            model: None,
            log_entry_id: None,
        });
        p.enqueue_pending(PendingInput {
            prompt: "third".into(),
            display_prompt: "third".into(),
            model: Some("c".into()),
            log_entry_id: None,
        });
        let (merged, model, drained) = p.drain_and_merge_pending().expect("pending");
        assert_eq!(merged, "first\n\nsecond\n\nthird");
        assert_eq!(model.as_deref(), Some("c"));
        assert_eq!(drained.len(), 3);
        assert!(p.drain_and_merge_pending().is_none());
    }
}
