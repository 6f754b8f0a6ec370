// SPDX-License-Identifier: MIT

//! The per-issue lifecycle controller (component C4, spec §4.4): the
//! state machine, at-most-one-live-process invariant, turn-completion
//! merge/settlement, session-error recovery, and auto-title dispatch.

use crate::concurrency::ConcurrencyLimiter;
use crate::event_publisher::EventPublisher;
use crate::managed_process::{ManagedProcess, PendingInput, ProcessState};
use crate::repository::{IssueRepository, LogCursor, LogPage};
use crate::title;
use crate::turn::is_cancellation_noise;
use bitk_adapters::{EngineAdapter, ManagedChild, SpawnOptions, CANCEL_HARD_KILL_DEADLINE};
use bitk_core::{
    EngineError, EngineType, ExecutionId, ExecutionState, IssueId, IssueLogEntry, IssueStatus,
    Metadata, PermissionMode, SessionStatus,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Parameters for a brand-new execution (spec §4.4 `executeIssue`).
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub engine_type: EngineType,
    pub prompt: String,
    pub working_dir: PathBuf,
    pub model: Option<String>,
    pub permission_mode: PermissionMode,
}

/// Parameters for `followUpIssue` (spec §4.4). `working_dir` is threaded
/// through explicitly because the Issue entity itself does not persist
/// it (workspace-path resolution is an external collaborator, per spec
/// §1's Non-goals); the caller supplies whatever it resolved for the
/// original execution.
#[derive(Debug, Clone)]
pub struct FollowUpOptions {
    pub prompt: String,
    pub working_dir: PathBuf,
    pub model: Option<String>,
    pub permission_mode: Option<PermissionMode>,
    pub busy_action: BusyAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyAction {
    Queue,
    Cancel,
}

/// Session-error phrases that trigger clearing `externalSessionId`
/// (spec §4.4 "Session-error recovery").
const SESSION_LOST_PHRASES: &[&str] = &["no conversation found", "session"];

struct Inner<R, P> {
    repo: R,
    publisher: P,
    adapters: HashMap<EngineType, Arc<dyn EngineAdapter>>,
    processes: Mutex<HashMap<IssueId, ManagedProcess>>,
    concurrency: ConcurrencyLimiter,
}

/// Owns all managed processes, keyed by issue id (the at-most-one-running
/// invariant makes indexing by issue id sufficient; each entry still
/// carries its own `executionId`).
pub struct IssueEngine<R, P> {
    inner: Arc<Inner<R, P>>,
}

impl<R, P> Clone for IssueEngine<R, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R, P> IssueEngine<R, P>
where
    R: IssueRepository + 'static,
    P: EventPublisher + 'static,
{
    pub fn new(
        repo: R,
        publisher: P,
        adapters: HashMap<EngineType, Arc<dyn EngineAdapter>>,
        concurrency_cap: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                repo,
                publisher,
                adapters,
                processes: Mutex::new(HashMap::new()),
                concurrency: ConcurrencyLimiter::new(concurrency_cap),
            }),
        }
    }

    pub fn repository(&self) -> &R {
        &self.inner.repo
    }

    pub fn publisher(&self) -> &P {
        &self.inner.publisher
    }

    /// Whether an issue currently has a live (not yet exited) process.
    pub fn is_running(&self, issue_id: &IssueId) -> bool {
        self.inner.processes.lock().contains_key(issue_id)
    }

    pub async fn execute_issue(
        &self,
        issue_id: IssueId,
        opts: ExecuteOptions,
    ) -> Result<ExecutionId, EngineError> {
        tracing::info!(issue_id = %issue_id, engine = opts.engine_type.as_str(), "executing issue");
        let mut issue = self.inner.repo.get_issue(&issue_id).await?;
        if issue.is_deleted {
            return Err(EngineError::NotFound(format!("issue {issue_id} is deleted")));
        }
        if matches!(issue.status, IssueStatus::Todo | IssueStatus::Done) {
            return Err(EngineError::Validation(
                "todo/done issues must be queued, not executed directly".to_string(),
            ));
        }
        if self.is_running(&issue_id) {
            return Err(EngineError::Busy(format!("issue {issue_id} already running")));
        }
        if issue.status == IssueStatus::Review {
            issue.status = IssueStatus::Working;
        }

        issue.session.engine_type = Some(opts.engine_type);
        issue.session.session_status = Some(SessionStatus::Pending);
        issue.session.prompt = Some(opts.prompt.clone());
        issue.session.model = opts.model.clone();
        self.inner.repo.save_issue(&issue).await?;
        self.inner.publisher.publish_issue_updated(&issue);

        let spawn_opts = SpawnOptions {
            prompt: opts.prompt.clone(),
            working_dir: opts.working_dir,
            model: opts.model,
            permission_mode: opts.permission_mode,
            external_session_id: issue.session.external_session_id.clone(),
        };

        let execution_id = self
            .start_execution(&issue_id, opts.engine_type, spawn_opts, false, false)
            .await?;

        self.persist_and_publish(
            &issue_id,
            &execution_id,
            IssueLogEntry {
                id: None,
                issue_id: issue_id.clone(),
                turn_index: 0,
                entry_index: 0,
                entry_type: bitk_core::EntryType::UserMessage,
                content: issue.session.prompt.clone().unwrap_or_default(),
                metadata: None,
                tool_action: None,
                reply_to_message_id: None,
                timestamp: Some(chrono::Utc::now()),
                visible: true,
            },
        )
        .await?;

        Ok(execution_id)
    }

    pub async fn follow_up_issue(
        &self,
        issue_id: IssueId,
        opts: FollowUpOptions,
    ) -> Result<ExecutionId, EngineError> {
        tracing::info!(issue_id = %issue_id, busy_action = ?opts.busy_action, "follow-up requested");
        if self.is_running(&issue_id) {
            return match opts.busy_action {
                BusyAction::Queue => self.queue_follow_up(&issue_id, opts).await,
                BusyAction::Cancel => {
                    self.cancel_issue(issue_id.clone()).await?;
                    self.spawn_fresh_with_continuity(issue_id, opts).await
                }
            };
        }
        self.spawn_fresh_with_continuity(issue_id, opts).await
    }

    async fn queue_follow_up(
        &self,
        issue_id: &IssueId,
        opts: FollowUpOptions,
    ) -> Result<ExecutionId, EngineError> {
        let mut metadata = Metadata::empty();
        metadata.set("pending", serde_json::json!(true));
        metadata.set("type", serde_json::json!("pending"));
        let mut entry = IssueLogEntry {
            id: None,
            issue_id: issue_id.clone(),
            turn_index: 0,
            entry_index: 0,
            entry_type: bitk_core::EntryType::UserMessage,
            content: opts.prompt.clone(),
            metadata: Some(metadata),
            tool_action: None,
            reply_to_message_id: None,
            timestamp: Some(chrono::Utc::now()),
            visible: true,
        };
        self.inner.repo.insert_log_entry(&mut entry).await?;

        let mut processes = self.inner.processes.lock();
        let mp = processes
            .get_mut(issue_id)
            .ok_or_else(|| EngineError::Internal("process disappeared while queueing".into()))?;
        let execution_id = mp.execution_id.clone();
        mp.enqueue_pending(PendingInput {
            prompt: opts.prompt,
            display_prompt: entry.content.clone(),
            model: opts.model,
            log_entry_id: entry.id.clone(),
        });
        drop(processes);
        self.inner
            .publisher
            .publish_log(issue_id, &execution_id, entry);
        Ok(execution_id)
    }

    async fn spawn_fresh_with_continuity(
        &self,
        issue_id: IssueId,
        opts: FollowUpOptions,
    ) -> Result<ExecutionId, EngineError> {
        let mut issue = self.inner.repo.get_issue(&issue_id).await?;
        let engine_type = issue
            .session
            .engine_type
            .ok_or_else(|| EngineError::Validation("issue has no engine configured".into()))?;
        let permission_mode = opts.permission_mode.unwrap_or(PermissionMode::Auto);

        if issue.status == IssueStatus::Review {
            issue.status = IssueStatus::Working;
        }
        issue.session.session_status = Some(SessionStatus::Pending);
        issue.session.prompt = Some(opts.prompt.clone());
        if opts.model.is_some() {
            issue.session.model = opts.model.clone();
        }
        self.inner.repo.save_issue(&issue).await?;
        self.inner.publisher.publish_issue_updated(&issue);

        let spawn_opts = SpawnOptions {
            prompt: opts.prompt.clone(),
            working_dir: opts.working_dir,
            model: opts.model,
            permission_mode,
            external_session_id: issue.session.external_session_id.clone(),
        };

        let execution_id = self
            .start_execution(&issue_id, engine_type, spawn_opts, true, false)
            .await?;

        self.persist_and_publish(
            &issue_id,
            &execution_id,
            IssueLogEntry {
                id: None,
                issue_id: issue_id.clone(),
                turn_index: 0,
                entry_index: 0,
                entry_type: bitk_core::EntryType::UserMessage,
                content: opts.prompt,
                metadata: None,
                tool_action: None,
                reply_to_message_id: None,
                timestamp: Some(chrono::Utc::now()),
                visible: true,
            },
        )
        .await?;

        Ok(execution_id)
    }

    /// Recover from a stuck session id: drop any queued pending without
    /// sending, then spawn fresh (spec §4.4 `restartIssue`).
    pub async fn restart_issue(&self, issue_id: IssueId) -> Result<ExecutionId, EngineError> {
        tracing::info!(issue_id = %issue_id, "restarting issue");
        if self.is_running(&issue_id) {
            self.cancel_issue(issue_id.clone()).await?;
        }
        for pending in self.inner.repo.list_durable_pending(&issue_id).await? {
            if let Some(id) = &pending.id {
                self.inner.repo.mark_dispatched(id).await?;
            }
        }

        let issue = self.inner.repo.get_issue(&issue_id).await?;
        let engine_type = issue
            .session
            .engine_type
            .ok_or_else(|| EngineError::Validation("issue has no engine configured".into()))?;
        let prompt = issue.session.prompt.clone().unwrap_or_default();
        let working_dir = PathBuf::new();
        let spawn_opts = SpawnOptions {
            prompt: prompt.clone(),
            working_dir,
            model: issue.session.model.clone(),
            permission_mode: PermissionMode::Auto,
            external_session_id: issue.session.external_session_id.clone(),
        };
        self.start_execution(&issue_id, engine_type, spawn_opts, false, false)
            .await
    }

    /// Soft cancel: request graceful termination, arm a hard-kill deadline
    /// (spec §4.4 `cancelIssue`, §5 cancellation timeouts).
    pub async fn cancel_issue(&self, issue_id: IssueId) -> Result<(), EngineError> {
        tracing::info!(issue_id = %issue_id, "cancelling issue");
        let (execution_id, child) = {
            let mut processes = self.inner.processes.lock();
            let mp = processes
                .get_mut(&issue_id)
                .ok_or_else(|| EngineError::NotFound(format!("no active process for {issue_id}")))?;
            mp.cancelled_by_user = true;
            mp.state = ProcessState::Terminating;
            (mp.execution_id.clone(), Arc::clone(&mp.child))
        };
        self.inner
            .publisher
            .publish_state(&issue_id, &execution_id, ExecutionState::Terminating);

        {
            let mut guard = child.lock().await;
            guard.cancel().await?;
        }

        tokio::spawn(async move {
            tokio::time::sleep(CANCEL_HARD_KILL_DEADLINE).await;
            let mut guard = child.lock().await;
            let _ = guard.kill().await;
        });

        Ok(())
    }

    pub async fn get_logs(
        &self,
        issue_id: IssueId,
        dev_mode: bool,
        cursor: LogCursor,
        limit: usize,
    ) -> Result<LogPage, EngineError> {
        // Overfetch so dev-mode filtering can't shrink a full page below
        // the caller's requested size (spec §4.4).
        let page = self
            .inner
            .repo
            .get_logs(&issue_id, cursor, limit.saturating_mul(2).max(limit))
            .await?;
        let mut entries: Vec<_> = page
            .entries
            .into_iter()
            .filter(|e| dev_mode || visible_outside_dev_mode(e))
            .collect();
        let has_more = page.has_more || entries.len() > limit;
        entries.truncate(limit);
        let next_cursor = entries.first().and_then(|e| e.id.clone()).or(page.next_cursor);
        Ok(LogPage {
            entries,
            next_cursor,
            has_more,
        })
    }

    /// Spawn a fresh or follow-up execution and install its bookkeeping
    /// and stream consumers. `fresh` selects `spawn` vs `spawnFollowUp`;
    /// `is_meta_turn` tags the auto-title turn (spec §4.4).
    async fn start_execution(
        &self,
        issue_id: &IssueId,
        engine_type: EngineType,
        spawn_opts: SpawnOptions,
        fresh_with_continuity: bool,
        is_meta_turn: bool,
    ) -> Result<ExecutionId, EngineError> {
        let permit = self.inner.concurrency.try_acquire()?;
        let adapter = self
            .inner
            .adapters
            .get(&engine_type)
            .cloned()
            .ok_or_else(|| EngineError::EngineUnavailable(format!("no adapter for {engine_type:?}")))?;

        let permission_mode = spawn_opts.permission_mode;
        let spawned = if fresh_with_continuity {
            adapter.spawn_follow_up(&spawn_opts, &[]).await
        } else {
            adapter.spawn(&spawn_opts, &[]).await
        };
        let mut spawned = match spawned {
            Ok(s) => s,
            Err(e) => {
                drop(permit);
                let execution_id = ExecutionId::new(uuid::Uuid::new_v4().to_string());
                self.inner
                    .publisher
                    .publish_state(issue_id, &execution_id, ExecutionState::Failed);
                return Err(e);
            }
        };

        let execution_id = ExecutionId::new(uuid::Uuid::new_v4().to_string());
        let stdout = std::mem::replace(&mut spawned.stdout, Box::new(tokio::io::empty()));
        let stderr = std::mem::replace(&mut spawned.stderr, Box::new(tokio::io::empty()));

        let mut mp = ManagedProcess::new(
            execution_id.clone(),
            issue_id.clone(),
            engine_type,
            permission_mode,
            spawned.child,
        );
        mp.meta_turn = is_meta_turn;
        mp.state = ProcessState::Running;
        let child_handle = Arc::clone(&mp.child);
        self.inner.processes.lock().insert(issue_id.clone(), mp);

        self.inner
            .publisher
            .publish_state(issue_id, &execution_id, ExecutionState::Running);

        let this = self.clone();
        let stdout_issue = issue_id.clone();
        let stdout_execution = execution_id.clone();
        tokio::spawn(async move {
            this.consume_stdout(stdout_issue, stdout_execution, adapter, stdout, child_handle)
                .await;
            drop(permit);
        });

        let this_stderr = self.clone();
        let stderr_issue = issue_id.clone();
        let stderr_execution = execution_id.clone();
        tokio::spawn(async move {
            this_stderr
                .consume_stderr(stderr_issue, stderr_execution, stderr)
                .await;
        });

        Ok(execution_id)
    }

    async fn consume_stderr(
        &self,
        issue_id: IssueId,
        execution_id: ExecutionId,
        stderr: Box<dyn tokio::io::AsyncRead + Unpin + Send>,
    ) {
        let entries = bitk_adapters::normalize_stream(stderr, |line| {
            Some(IssueLogEntry {
                id: None,
                issue_id: IssueId::new(""),
                turn_index: 0,
                entry_index: 0,
                entry_type: bitk_core::EntryType::ErrorMessage,
                content: line.to_string(),
                metadata: None,
                tool_action: None,
                reply_to_message_id: None,
                timestamp: Some(chrono::Utc::now()),
                visible: true,
            })
        })
        .await;
        for mut entry in entries {
            entry.issue_id = issue_id.clone();
            if let Err(e) = self.persist_and_publish(&issue_id, &execution_id, entry).await {
                tracing::warn!(issue_id = %issue_id, error = %e, "failed to persist stderr entry");
            }
        }
    }

    async fn consume_stdout(
        &self,
        issue_id: IssueId,
        execution_id: ExecutionId,
        adapter: Arc<dyn EngineAdapter>,
        stdout: Box<dyn tokio::io::AsyncRead + Unpin + Send>,
        child: Arc<tokio::sync::Mutex<Box<dyn ManagedChild>>>,
    ) {
        let mut splitter = bitk_adapters::LineSplitter::new(stdout);
        while let Some(line) = splitter.next_raw_line().await {
            if line.trim().is_empty() {
                continue;
            }
            let Some(normalized) = adapter.normalize_log_line(&line) else {
                continue;
            };
            if let Err(e) = self
                .handle_normalized_entry(&issue_id, &execution_id, normalized)
                .await
            {
                tracing::error!(issue_id = %issue_id, error = %e, "failed to handle stream entry");
            }
        }

        // This task owns the exact child it was spawned to read from, so
        // the final `wait()` always targets that child even if a turn
        // continuation has since replaced the managed process's current
        // child (spec §8: "exited resolves exactly once").
        {
            let mut guard = child.lock().await;
            match guard.wait().await {
                Ok(outcome) => {
                    tracing::debug!(issue_id = %issue_id, success = outcome.success, "process exited")
                }
                Err(e) => tracing::warn!(issue_id = %issue_id, error = %e, "wait on exited process failed"),
            }
        }

        self.handle_process_exit(&issue_id, &execution_id).await;
    }

    async fn handle_normalized_entry(
        &self,
        issue_id: &IssueId,
        execution_id: &ExecutionId,
        mut entry: IssueLogEntry,
    ) -> Result<(), EngineError> {
        let (turn_index, meta_turn, cancelled) = {
            let processes = self.inner.processes.lock();
            match processes.get(issue_id) {
                Some(mp) => (mp.turn_index, mp.meta_turn, mp.cancelled_by_user),
                None => return Ok(()),
            }
        };
        entry.issue_id = issue_id.clone();
        entry.turn_index = turn_index;
        if meta_turn {
            let mut meta = entry.metadata.clone().unwrap_or_else(Metadata::empty);
            meta.set("type", serde_json::json!("system"));
            entry.metadata = Some(meta);
        }

        let turn_completed = entry.signals_turn_completed();
        let suppressed = cancelled && is_cancellation_noise(&entry);

        if meta_turn {
            if let Some(title_text) = title::extract_title(&entry.content) {
                if let Ok(mut issue) = self.inner.repo.get_issue(issue_id).await {
                    issue.title = title_text;
                    if self.inner.repo.save_issue(&issue).await.is_ok() {
                        self.inner.publisher.publish_issue_updated(&issue);
                    }
                } else {
                    tracing::warn!(issue_id = %issue_id, "auto-title: issue lookup failed");
                }
            }
        }

        if !suppressed {
            self.persist_and_publish(issue_id, execution_id, entry).await?;
        }

        if turn_completed {
            self.on_turn_completed(issue_id, execution_id).await?;
        }

        Ok(())
    }

    async fn persist_and_publish(
        &self,
        issue_id: &IssueId,
        execution_id: &ExecutionId,
        mut entry: IssueLogEntry,
    ) -> Result<(), EngineError> {
        self.inner.repo.insert_log_entry(&mut entry).await?;
        {
            let mut processes = self.inner.processes.lock();
            if let Some(mp) = processes.get_mut(issue_id) {
                mp.push_log(entry.clone());
            }
        }
        self.inner
            .publisher
            .publish_log(issue_id, execution_id, entry);
        Ok(())
    }

    async fn on_turn_completed(
        &self,
        issue_id: &IssueId,
        execution_id: &ExecutionId,
    ) -> Result<(), EngineError> {
        let merged = {
            let mut processes = self.inner.processes.lock();
            processes
                .get_mut(issue_id)
                .and_then(|mp| mp.drain_and_merge_pending())
        };

        if let Some((prompt, model, drained)) = merged {
            {
                let mut processes = self.inner.processes.lock();
                if let Some(mp) = processes.get_mut(issue_id) {
                    mp.turn_index += 1;
                }
            }
            for input in &drained {
                if let Some(id) = &input.log_entry_id {
                    self.inner.repo.mark_dispatched(id).await?;
                }
            }
            let issue = self.inner.repo.get_issue(issue_id).await?;
            let spawn_opts = SpawnOptions {
                prompt,
                working_dir: PathBuf::new(),
                model: model.or_else(|| issue.session.model.clone()),
                permission_mode: {
                    let processes = self.inner.processes.lock();
                    processes
                        .get(issue_id)
                        .map(|mp| mp.permission_mode)
                        .unwrap_or(PermissionMode::Auto)
                },
                external_session_id: issue.session.external_session_id.clone(),
            };
            let engine_type = issue
                .session
                .engine_type
                .unwrap_or(bitk_core::EngineType::Claude);
            let adapter = self
                .inner
                .adapters
                .get(&engine_type)
                .cloned()
                .ok_or_else(|| EngineError::EngineUnavailable("no adapter for continuation".into()))?;
            match adapter.spawn_follow_up(&spawn_opts, &[]).await {
                Ok(mut spawned) => {
                    let stdout = std::mem::replace(&mut spawned.stdout, Box::new(tokio::io::empty()));
                    let stderr = std::mem::replace(&mut spawned.stderr, Box::new(tokio::io::empty()));
                    let child_handle: Arc<tokio::sync::Mutex<Box<dyn ManagedChild>>> =
                        Arc::new(tokio::sync::Mutex::new(spawned.child));
                    {
                        let mut processes = self.inner.processes.lock();
                        if let Some(mp) = processes.get_mut(issue_id) {
                            mp.child = Arc::clone(&child_handle);
                        }
                    }
                    let this = self.clone();
                    let next_issue = issue_id.clone();
                    let next_execution = execution_id.clone();
                    let next_adapter = adapter.clone();
                    tokio::spawn(async move {
                        this.consume_stdout(next_issue, next_execution, next_adapter, stdout, child_handle)
                            .await;
                    });
                    let this_stderr = self.clone();
                    let stderr_issue = issue_id.clone();
                    let stderr_execution = execution_id.clone();
                    tokio::spawn(async move {
                        this_stderr
                            .consume_stderr(stderr_issue, stderr_execution, stderr)
                            .await;
                    });
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!(issue_id = %issue_id, error = %e, "follow-up continuation spawn failed");
                    let mut processes = self.inner.processes.lock();
                    if let Some(mp) = processes.get_mut(issue_id) {
                        mp.logical_failure = true;
                        mp.logical_failure_reason = Some(e.to_string());
                    }
                }
            }
        }

        self.settle(issue_id, execution_id).await
    }

    /// The six-step settlement algorithm (spec §4.4).
    async fn settle(
        &self,
        issue_id: &IssueId,
        execution_id: &ExecutionId,
    ) -> Result<(), EngineError> {
        let (logical_failure, reason, meta_turn, turn_index) = {
            let processes = self.inner.processes.lock();
            match processes.get(issue_id) {
                Some(mp) => (
                    mp.logical_failure,
                    mp.logical_failure_reason.clone(),
                    mp.meta_turn,
                    mp.turn_index,
                ),
                None => (false, None, false, 0),
            }
        };
        let final_status = if logical_failure {
            ExecutionState::Failed
        } else {
            ExecutionState::Completed
        };
        self.inner
            .publisher
            .publish_state(issue_id, execution_id, final_status);

        let mut issue = self.inner.repo.get_issue(issue_id).await?;
        let session_final = if logical_failure {
            SessionStatus::Failed
        } else {
            SessionStatus::Completed
        };

        if logical_failure {
            if let Some(reason) = &reason {
                let lowered = reason.to_lowercase();
                if issue.session.external_session_id.is_some()
                    && SESSION_LOST_PHRASES.iter().any(|p| lowered.contains(p))
                {
                    issue.session.external_session_id = None;
                }
            }
        }
        issue.session.session_status = Some(session_final);
        self.inner.repo.save_issue(&issue).await?;
        self.inner.publisher.publish_issue_updated(&issue);

        // Step 3: flush durable pending as a follow-up.
        let durable_pending = self.inner.repo.list_durable_pending(issue_id).await?;
        if !durable_pending.is_empty() {
            let merged_prompt = durable_pending
                .iter()
                .map(|e| e.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            for entry in &durable_pending {
                if let Some(id) = &entry.id {
                    self.inner.repo.mark_dispatched(id).await?;
                }
            }
            self.inner.processes.lock().remove(issue_id);
            let _ = self
                .follow_up_issue(
                    issue_id.clone(),
                    FollowUpOptions {
                        prompt: merged_prompt,
                        working_dir: PathBuf::new(),
                        model: None,
                        permission_mode: None,
                        busy_action: BusyAction::Queue,
                    },
                )
                .await;
            return Ok(());
        }

        // Step 4: re-read; a follow-up may have reactivated the issue.
        let current = self.inner.repo.get_issue(issue_id).await?;
        if current.session.session_status != Some(session_final) {
            self.inner.processes.lock().remove(issue_id);
            return Ok(());
        }

        // Step 5: auto-move working -> review.
        let mut current = current;
        if current.status == IssueStatus::Working {
            current.status = IssueStatus::Review;
            self.inner.repo.save_issue(&current).await?;
            self.inner.publisher.publish_issue_updated(&current);
        }

        self.inner.processes.lock().remove(issue_id);

        // Step 6: emit settled.
        self.inner
            .publisher
            .publish_settled(issue_id, execution_id, final_status);

        // Auto-title: only the very first, non-meta turn of a completed
        // execution can trigger this, and only while the title still
        // equals the raw prompt (spec §4.4 "Auto-title").
        if !meta_turn
            && turn_index == 0
            && final_status == ExecutionState::Completed
            && current.title == current.session.prompt.clone().unwrap_or_default()
        {
            self.dispatch_auto_title(issue_id.clone(), current.session.clone());
        }

        Ok(())
    }

    /// Fires the auto-title meta-turn detached, so `settle` never blocks
    /// on it. The turn continues the same external session (spec §4.4:
    /// `metaTurn` is created only for this turn) and its reply is picked
    /// up by `handle_normalized_entry`'s title extraction.
    fn dispatch_auto_title(&self, issue_id: IssueId, session: bitk_core::SessionFields) {
        let Some(engine_type) = session.engine_type else {
            return;
        };
        let this = self.clone();
        tokio::spawn(async move {
            let spawn_opts = SpawnOptions {
                prompt: title::AUTO_TITLE_PROMPT.to_string(),
                working_dir: PathBuf::new(),
                model: session.model,
                permission_mode: PermissionMode::Auto,
                external_session_id: session.external_session_id,
            };
            if let Err(e) = this
                .start_execution(&issue_id, engine_type, spawn_opts, true, true)
                .await
            {
                tracing::warn!(issue_id = %issue_id, error = %e, "auto-title turn failed to spawn");
            }
        });
    }

    /// Final cleanup when the underlying subprocess exits with no further
    /// continuation pending (stream EOF without a trailing turn-completion
    /// signal — e.g. the process crashed mid-turn).
    async fn handle_process_exit(&self, issue_id: &IssueId, execution_id: &ExecutionId) {
        let still_present = self.inner.processes.lock().contains_key(issue_id);
        if !still_present {
            return;
        }
        let cancelled = {
            let processes = self.inner.processes.lock();
            processes
                .get(issue_id)
                .map(|mp| mp.cancelled_by_user)
                .unwrap_or(false)
        };
        if cancelled {
            let mut processes = self.inner.processes.lock();
            if let Some(mp) = processes.get_mut(issue_id) {
                mp.logical_failure = true;
                mp.logical_failure_reason = Some("cancelled by user".to_string());
            }
        } else {
            let mut processes = self.inner.processes.lock();
            if let Some(mp) = processes.get_mut(issue_id) {
                if !mp.logical_failure {
                    mp.logical_failure = true;
                    mp.logical_failure_reason = Some("process exited without completing a turn".to_string());
                }
            }
        }
        if let Err(e) = self.settle(issue_id, execution_id).await {
            tracing::error!(issue_id = %issue_id, error = %e, "settlement after process exit failed");
        }
    }
}

fn visible_outside_dev_mode(entry: &IssueLogEntry) -> bool {
    if entry.entry_type == bitk_core::EntryType::Thinking {
        return false;
    }
    if let Some(meta) = &entry.metadata {
        if meta.type_tag() == Some("system") {
            return false;
        }
    }
    true
}
