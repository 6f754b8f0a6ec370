// SPDX-License-Identifier: MIT

//! Workspace-level integration tests exercising the end-to-end scenarios:
//! happy execute, queue-while-busy, cancel-and-retry, reconciliation on
//! restart, and project-scoped SSE filtering — each wired through real
//! `SqliteStore` + `IssueEngine` + `EventBus` components rather than the
//! crates' own internal fakes.

use async_trait::async_trait;
use bitk_adapters::{
    Availability, AuthStatus, EngineAdapter, ExitOutcome, ManagedChild, ModelInfo, SpawnOptions,
    SpawnedProcess,
};
use bitk_core::{EngineType, EntryType, IssueId, IssueLogEntry, IssueStatus, Metadata, PermissionMode};
use bitk_daemon::{EventBus, ProjectScope};
use bitk_engine::{reconcile_once, BusyAction, ExecuteOptions, FollowUpOptions, IssueEngine, IssueRepository};
use bitk_storage::SqliteStore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{duplex, AsyncWriteExt};
use tokio::sync::oneshot;

/// Spawns a process that writes one scripted line tagged as turn-complete,
/// then exits — the same idiom the engine crate's own internal tests use
/// for a "one-shot happy turn" double.
struct ScriptedAdapter {
    line: parking_lot::Mutex<Option<String>>,
}

impl ScriptedAdapter {
    fn new(line: impl Into<String>) -> Self {
        Self {
            line: parking_lot::Mutex::new(Some(line.into())),
        }
    }
}

struct ScriptedChild {
    exit_rx: oneshot::Receiver<ExitOutcome>,
}

#[async_trait]
impl ManagedChild for ScriptedChild {
    async fn kill(&mut self) -> Result<(), bitk_core::EngineError> {
        Ok(())
    }

    async fn wait(&mut self) -> Result<ExitOutcome, bitk_core::EngineError> {
        (&mut self.exit_rx)
            .await
            .map_err(|_| bitk_core::EngineError::Internal("exit sender dropped".into()))
    }
}

#[async_trait]
impl EngineAdapter for ScriptedAdapter {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn availability(&self) -> Availability {
        Availability {
            installed: true,
            executable: true,
            version: None,
            auth_status: AuthStatus::Authenticated,
            error: None,
        }
    }

    async fn models(&self) -> Vec<ModelInfo> {
        Vec::new()
    }

    async fn spawn(
        &self,
        _opts: &SpawnOptions,
        _env: &[(String, String)],
    ) -> Result<SpawnedProcess, bitk_core::EngineError> {
        let (mut writer, reader) = duplex(4096);
        let line = self.line.lock().take();
        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(async move {
            if let Some(line) = line {
                let _ = writer.write_all(format!("{line}\n").as_bytes()).await;
            }
            let _ = writer.shutdown().await;
            let _ = exit_tx.send(ExitOutcome {
                success: true,
                code: Some(0),
            });
        });
        Ok(SpawnedProcess {
            child: Box::new(ScriptedChild { exit_rx }),
            stdout: Box::new(reader),
            stderr: Box::new(tokio::io::empty()),
        })
    }

    async fn spawn_follow_up(
        &self,
        opts: &SpawnOptions,
        env: &[(String, String)],
    ) -> Result<SpawnedProcess, bitk_core::EngineError> {
        self.spawn(opts, env).await
    }

    fn normalize_log_line(&self, raw: &str) -> Option<IssueLogEntry> {
        let mut metadata = Metadata::empty();
        metadata.set("turnCompleted", serde_json::json!(true));
        Some(IssueLogEntry {
            id: None,
            issue_id: IssueId::new(""),
            turn_index: 0,
            entry_index: 0,
            entry_type: EntryType::AssistantMessage,
            content: raw.to_string(),
            metadata: Some(metadata),
            tool_action: None,
            reply_to_message_id: None,
            timestamp: None,
            visible: true,
        })
    }
}

/// A process that never exits on its own — only `kill()` unblocks
/// `wait()` — used to hold an issue "running" long enough to observe a
/// busy rejection or an in-flight cancel.
struct HangingAdapter;

struct HangingChild {
    kill_tx: Option<oneshot::Sender<()>>,
    exit_rx: oneshot::Receiver<ExitOutcome>,
}

#[async_trait]
impl ManagedChild for HangingChild {
    async fn kill(&mut self) -> Result<(), bitk_core::EngineError> {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
        Ok(())
    }

    async fn wait(&mut self) -> Result<ExitOutcome, bitk_core::EngineError> {
        (&mut self.exit_rx)
            .await
            .map_err(|_| bitk_core::EngineError::Internal("exit sender dropped".into()))
    }
}

#[async_trait]
impl EngineAdapter for HangingAdapter {
    fn name(&self) -> &'static str {
        "hanging"
    }

    async fn availability(&self) -> Availability {
        Availability {
            installed: true,
            executable: true,
            version: None,
            auth_status: AuthStatus::Authenticated,
            error: None,
        }
    }

    async fn models(&self) -> Vec<ModelInfo> {
        Vec::new()
    }

    async fn spawn(
        &self,
        _opts: &SpawnOptions,
        _env: &[(String, String)],
    ) -> Result<SpawnedProcess, bitk_core::EngineError> {
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = kill_rx.await;
            let _ = exit_tx.send(ExitOutcome {
                success: true,
                code: Some(0),
            });
        });
        Ok(SpawnedProcess {
            child: Box::new(HangingChild {
                kill_tx: Some(kill_tx),
                exit_rx,
            }),
            stdout: Box::new(tokio::io::empty()),
            stderr: Box::new(tokio::io::empty()),
        })
    }

    async fn spawn_follow_up(
        &self,
        opts: &SpawnOptions,
        env: &[(String, String)],
    ) -> Result<SpawnedProcess, bitk_core::EngineError> {
        self.spawn(opts, env).await
    }

    fn normalize_log_line(&self, _raw: &str) -> Option<IssueLogEntry> {
        None
    }
}

async fn store() -> (tempfile::TempDir, SqliteStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SqliteStore::connect(dir.path().join("bitk.db"))
        .await
        .expect("connect");
    (dir, store)
}

fn adapters_with(adapter: impl EngineAdapter + 'static) -> HashMap<EngineType, Arc<dyn EngineAdapter>> {
    let mut adapters: HashMap<EngineType, Arc<dyn EngineAdapter>> = HashMap::new();
    adapters.insert(EngineType::Claude, Arc::new(adapter));
    adapters
}

fn exec_opts(prompt: &str) -> ExecuteOptions {
    ExecuteOptions {
        engine_type: EngineType::Claude,
        prompt: prompt.to_string(),
        working_dir: PathBuf::new(),
        model: None,
        permission_mode: PermissionMode::Auto,
    }
}

#[tokio::test]
async fn happy_execute_settles_issue_to_review_with_completed_execution() {
    let (_dir, storage) = store().await;
    let project = storage
        .create_project("Demo", "demo", None, None, None)
        .await
        .expect("project");
    let issue = storage
        .create_issue(&project.id, "do the thing", IssueStatus::Todo, None, false)
        .await
        .expect("issue");
    storage
        .resolve_project_ref("demo")
        .await
        .expect("alias resolves");

    let bus = EventBus::new();
    let engine = IssueEngine::new(
        storage.clone(),
        bus.clone(),
        adapters_with(ScriptedAdapter::new("assistant reply")),
        4,
    );

    let mut subscriber = bus.subscribe_all();
    engine
        .execute_issue(issue.id.clone(), exec_opts("do the thing"))
        .await
        .expect("execute");

    let settled = subscriber.settled.recv().await.expect("settled event");
    assert_eq!(settled.sse_event_name(), "done");

    let saved = bitk_engine::IssueRepository::get_issue(&storage, &issue.id)
        .await
        .expect("reload issue");
    assert_eq!(saved.status, IssueStatus::Review);
}

#[tokio::test]
async fn second_execute_while_running_is_rejected_busy() {
    let (_dir, storage) = store().await;
    let project = storage
        .create_project("Demo", "demo", None, None, None)
        .await
        .expect("project");
    let issue = storage
        .create_issue(&project.id, "t", IssueStatus::Todo, None, false)
        .await
        .expect("issue");

    let bus = EventBus::new();
    let engine = IssueEngine::new(storage.clone(), bus.clone(), adapters_with(HangingAdapter), 4);

    engine
        .execute_issue(issue.id.clone(), exec_opts("go"))
        .await
        .expect("first execute");

    let err = engine
        .execute_issue(issue.id.clone(), exec_opts("go again"))
        .await
        .expect_err("second execute must be rejected");
    assert!(matches!(err, bitk_core::EngineError::Busy(_)));
}

#[tokio::test]
async fn follow_up_while_busy_queues_as_durable_pending() {
    let (_dir, storage) = store().await;
    let project = storage
        .create_project("Demo", "demo", None, None, None)
        .await
        .expect("project");
    let issue = storage
        .create_issue(&project.id, "t", IssueStatus::Todo, None, false)
        .await
        .expect("issue");

    let bus = EventBus::new();
    let engine = IssueEngine::new(storage.clone(), bus.clone(), adapters_with(HangingAdapter), 4);

    engine
        .execute_issue(issue.id.clone(), exec_opts("go"))
        .await
        .expect("first execute");

    engine
        .follow_up_issue(
            issue.id.clone(),
            FollowUpOptions {
                prompt: "and another thing".to_string(),
                working_dir: PathBuf::new(),
                model: None,
                permission_mode: None,
                busy_action: BusyAction::Queue,
            },
        )
        .await
        .expect("queue follow-up");

    let pending = storage
        .list_durable_pending(&issue.id)
        .await
        .expect("list pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].content, "and another thing");
}

#[tokio::test]
async fn cancel_then_retry_settles_failed_then_completes() {
    let (_dir, storage) = store().await;
    let project = storage
        .create_project("Demo", "demo", None, None, None)
        .await
        .expect("project");
    let issue = storage
        .create_issue(&project.id, "t", IssueStatus::Todo, None, false)
        .await
        .expect("issue");

    let bus = EventBus::new();
    let engine = IssueEngine::new(storage.clone(), bus.clone(), adapters_with(HangingAdapter), 4);

    engine
        .execute_issue(issue.id.clone(), exec_opts("go"))
        .await
        .expect("first execute");

    let mut subscriber = bus.subscribe_all();
    engine.cancel_issue(issue.id.clone()).await.expect("cancel");
    let settled = subscriber.settled.recv().await.expect("settled after cancel");
    assert_eq!(settled.sse_event_name(), "done");

    // The issue is back in `review`; re-executing should succeed.
    let reloaded = bitk_engine::IssueRepository::get_issue(&storage, &issue.id)
        .await
        .expect("reload");
    assert_eq!(reloaded.status, IssueStatus::Review);

    let adapters = adapters_with(ScriptedAdapter::new("assistant reply"));
    let retry_engine = IssueEngine::new(storage.clone(), bus.clone(), adapters, 4);
    retry_engine
        .execute_issue(issue.id.clone(), exec_opts("go"))
        .await
        .expect("retry execute");
}

#[tokio::test]
async fn reconciliation_sweeps_stale_working_issues_back_to_review() {
    let (_dir, storage) = store().await;
    let project = storage
        .create_project("Demo", "demo", None, None, None)
        .await
        .expect("project");
    let mut issue = storage
        .create_issue(&project.id, "t", IssueStatus::Working, None, false)
        .await
        .expect("issue");
    issue.session.session_status = Some(bitk_core::SessionStatus::Running);
    bitk_engine::IssueRepository::save_issue(&storage, &issue)
        .await
        .expect("mark running");

    let bus = EventBus::new();
    let engine = IssueEngine::new(storage.clone(), bus.clone(), HashMap::new(), 4);
    let n = reconcile_once(&engine).await.expect("sweep");
    assert_eq!(n, 1);

    let reloaded = bitk_engine::IssueRepository::get_issue(&storage, &issue.id)
        .await
        .expect("reload");
    assert_eq!(reloaded.status, IssueStatus::Review);
    assert_eq!(
        reloaded.session.session_status,
        Some(bitk_core::SessionStatus::Failed)
    );
}

#[tokio::test]
async fn project_scoped_filtering_accepts_own_issues_and_rejects_others() {
    let (_dir, storage) = store().await;
    let project_a = storage
        .create_project("A", "a", None, None, None)
        .await
        .expect("project a");
    let project_b = storage
        .create_project("B", "b", None, None, None)
        .await
        .expect("project b");
    let issue_a = storage
        .create_issue(&project_a.id, "t", IssueStatus::Todo, None, false)
        .await
        .expect("issue a");
    let issue_b = storage
        .create_issue(&project_b.id, "t", IssueStatus::Todo, None, false)
        .await
        .expect("issue b");

    let scope = ProjectScope::new(storage.clone());
    let resolved = scope.resolve_ref("a").await.expect("resolve by alias");
    assert_eq!(resolved, project_a.id);

    assert!(scope
        .issue_in_project(&issue_a.id, &resolved)
        .await
        .expect("in scope"));
    assert!(!scope
        .issue_in_project(&issue_b.id, &resolved)
        .await
        .expect("out of scope"));
}
