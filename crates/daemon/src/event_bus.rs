// SPDX-License-Identifier: MIT

//! The daemon's event bus (spec §4.5, C5): one `tokio::sync::broadcast`
//! channel per named kind (`log`, `state`, `settled`, `issue-updated`,
//! `changes-summary`), delivering on the publisher's own task — a slow
//! subscriber lags and misses entries rather than blocking the engine.

use bitk_core::Event;
use bitk_engine::EventPublisher;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Five independent broadcast channels, all carrying the same `Event`
/// envelope; kept separate (rather than one channel filtered by callers)
/// so a subscriber interested only in `log` never lags behind `state`
/// traffic on a busy issue. Cloning shares the underlying channels (a
/// `broadcast::Sender` clone is cheap and targets the same queue), which
/// is how the same bus ends up both inside the issue engine and held by
/// the daemon for reconciliation/SSE wiring.
#[derive(Clone)]
pub struct EventBus {
    log: broadcast::Sender<Event>,
    state: broadcast::Sender<Event>,
    settled: broadcast::Sender<Event>,
    issue_updated: broadcast::Sender<Event>,
    changes_summary: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            log: broadcast::channel(CHANNEL_CAPACITY).0,
            state: broadcast::channel(CHANNEL_CAPACITY).0,
            settled: broadcast::channel(CHANNEL_CAPACITY).0,
            issue_updated: broadcast::channel(CHANNEL_CAPACITY).0,
            changes_summary: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribes to all five channels at once, for an SSE connection.
    /// Dropping the returned bundle is the entire `unsubscribe()`.
    pub fn subscribe_all(&self) -> Subscription {
        Subscription {
            log: self.log.subscribe(),
            state: self.state.subscribe(),
            settled: self.settled.subscribe(),
            issue_updated: self.issue_updated.subscribe(),
            changes_summary: self.changes_summary.subscribe(),
        }
    }

    fn send(sender: &broadcast::Sender<Event>, event: Event) {
        // No receivers is the common case between SSE connections; not
        // an error.
        let _ = sender.send(event);
    }
}

pub struct Subscription {
    pub log: broadcast::Receiver<Event>,
    pub state: broadcast::Receiver<Event>,
    pub settled: broadcast::Receiver<Event>,
    pub issue_updated: broadcast::Receiver<Event>,
    pub changes_summary: broadcast::Receiver<Event>,
}

impl EventPublisher for EventBus {
    fn publish_log(
        &self,
        issue_id: &bitk_core::IssueId,
        execution_id: &bitk_core::ExecutionId,
        entry: bitk_core::IssueLogEntry,
    ) {
        Self::send(
            &self.log,
            Event::Log {
                issue_id: issue_id.clone(),
                execution_id: execution_id.clone(),
                entry: Box::new(entry),
            },
        );
    }

    fn publish_state(
        &self,
        issue_id: &bitk_core::IssueId,
        execution_id: &bitk_core::ExecutionId,
        state: bitk_core::ExecutionState,
    ) {
        Self::send(
            &self.state,
            Event::State {
                issue_id: issue_id.clone(),
                execution_id: execution_id.clone(),
                state,
            },
        );
    }

    fn publish_settled(
        &self,
        issue_id: &bitk_core::IssueId,
        execution_id: &bitk_core::ExecutionId,
        final_status: bitk_core::ExecutionState,
    ) {
        Self::send(
            &self.settled,
            Event::Settled {
                issue_id: issue_id.clone(),
                execution_id: execution_id.clone(),
                final_status,
            },
        );
    }

    fn publish_issue_updated(&self, issue: &bitk_core::Issue) {
        Self::send(
            &self.issue_updated,
            Event::IssueUpdated {
                issue_id: issue.id.clone(),
                deleted: issue.is_deleted.then_some(true),
            },
        );
    }

    fn publish_changes_summary(&self, summary: bitk_core::ChangesSummary) {
        Self::send(&self.changes_summary, Event::ChangesSummaryEvent { summary });
    }
}
