// SPDX-License-Identifier: MIT

//! Stale-session reconciliation (spec §4.4): an issue left `working` with
//! a live-looking `sessionStatus` but no in-memory process gets swept back
//! to `review`/`failed`, once at startup and then on a periodic interval.
//! An issue that genuinely still has a live in-memory process is left
//! alone (spec.md "but no in-memory process is auto-moved").

use crate::event_publisher::EventPublisher;
use crate::issue_engine::IssueEngine;
use crate::repository::IssueRepository;
use bitk_core::{EngineError, IssueStatus, SessionStatus};
use std::time::Duration;

/// Default sweep cadence (spec §4.4).
pub const RECONCILIATION_INTERVAL: Duration = Duration::from_secs(60);

/// Run one sweep. Returns the number of issues reconciled. Issues the
/// engine still reports as running are skipped.
pub async fn reconcile_once<R, P>(engine: &IssueEngine<R, P>) -> Result<usize, EngineError>
where
    R: IssueRepository + 'static,
    P: EventPublisher + 'static,
{
    let repo = engine.repository();
    let publisher = engine.publisher();
    let stale = repo.working_issues_with_live_session_status().await?;
    let mut count = 0;
    for mut issue in stale {
        if engine.is_running(&issue.id) {
            continue;
        }
        issue.status = IssueStatus::Review;
        issue.session.session_status = Some(SessionStatus::Failed);
        repo.save_issue(&issue).await?;
        publisher.publish_issue_updated(&issue);
        tracing::warn!(issue_id = %issue.id, "reconciled stale working session");
        count += 1;
    }
    Ok(count)
}

/// Spawn the periodic sweep task. Call once alongside the initial
/// `reconcile_once` at daemon startup (spec §9 "Global singletons":
/// explicit init, no hidden lazy statics).
pub fn spawn_periodic<R, P>(engine: IssueEngine<R, P>) -> tokio::task::JoinHandle<()>
where
    R: IssueRepository + 'static,
    P: EventPublisher + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RECONCILIATION_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = reconcile_once(&engine).await {
                tracing::error!(error = %e, "reconciliation sweep failed");
            }
        }
    })
}
