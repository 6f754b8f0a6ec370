// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![forbid(unsafe_code)]

//! Managed Process (C3) and Issue Engine (C4): the per-issue execution
//! lifecycle state machine that drives adapters, persists logs, and
//! publishes events.

mod concurrency;
mod event_publisher;
mod issue_engine;
mod managed_process;
mod reconciliation;
mod repository;
#[cfg(test)]
mod test_helpers;
mod title;
mod turn;

pub use concurrency::{ConcurrencyLimiter, DEFAULT_CONCURRENCY_CAP};
pub use event_publisher::EventPublisher;
pub use issue_engine::{BusyAction, ExecuteOptions, FollowUpOptions, IssueEngine};
pub use managed_process::{ManagedProcess, PendingInput, ProcessState, MAX_LOG_ENTRIES};
pub use reconciliation::{reconcile_once, spawn_periodic, RECONCILIATION_INTERVAL};
pub use repository::{IssueRepository, LogCursor, LogPage};
pub use title::{extract_title, AUTO_TITLE_PROMPT};
pub use turn::{is_cancellation_noise, CANCEL_NOISE_PHRASES};
