// SPDX-License-Identifier: MIT

//! In-memory `EngineAdapter` for tests (spec §9: adapters are stateless,
//! so a fake only needs to hand back a handle it controls).

use super::{
    Availability, AuthStatus, EngineAdapter, ExitOutcome, ManagedChild, ModelInfo, SpawnOptions,
    SpawnedProcess,
};
use async_trait::async_trait;
use bitk_core::{EngineError, EntryType, IssueLogEntry, IssueId};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{duplex, AsyncWriteExt, DuplexStream};
use tokio::sync::oneshot;

/// One recorded call against a `FakeAdapter`, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    Spawn { prompt: String },
    SpawnFollowUp { prompt: String },
    Cancel,
}

struct FakeChild {
    kill_tx: Option<oneshot::Sender<()>>,
    exit_rx: oneshot::Receiver<ExitOutcome>,
}

#[async_trait]
impl ManagedChild for FakeChild {
    async fn kill(&mut self) -> Result<(), EngineError> {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
        Ok(())
    }

    async fn wait(&mut self) -> Result<ExitOutcome, EngineError> {
        (&mut self.exit_rx)
            .await
            .map_err(|_| EngineError::Internal("fake child exit sender dropped".into()))
    }
}

/// Adapter whose spawned process is a duplex pipe the test writes script
/// lines into; `finish()` ends the stream and reports the exit outcome.
pub struct FakeAdapter {
    calls: Arc<Mutex<Vec<FakeCall>>>,
    script: Arc<Mutex<Vec<String>>>,
    fail_spawn: Arc<Mutex<Option<String>>>,
}

impl Default for FakeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            script: Arc::new(Mutex::new(Vec::new())),
            fail_spawn: Arc::new(Mutex::new(None)),
        }
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().clone()
    }

    /// Lines the next spawned process will emit on stdout before exiting.
    pub fn script(&self, lines: Vec<String>) {
        *self.script.lock() = lines;
    }

    pub fn fail_next_spawn(&self, reason: impl Into<String>) {
        *self.fail_spawn.lock() = Some(reason.into());
    }
}

#[async_trait]
impl EngineAdapter for FakeAdapter {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn availability(&self) -> Availability {
        Availability {
            installed: true,
            executable: true,
            version: Some("0.0.0-fake".to_string()),
            auth_status: AuthStatus::Authenticated,
            error: None,
        }
    }

    async fn models(&self) -> Vec<ModelInfo> {
        vec![ModelInfo {
            id: "fake-model".to_string(),
            name: "Fake Model".to_string(),
            is_default: true,
        }]
    }

    async fn spawn(
        &self,
        opts: &SpawnOptions,
        _env: &[(String, String)],
    ) -> Result<SpawnedProcess, EngineError> {
        self.calls.lock().push(FakeCall::Spawn {
            prompt: opts.prompt.clone(),
        });
        if let Some(reason) = self.fail_spawn.lock().take() {
            return Err(EngineError::SpawnFailed(reason));
        }
        Ok(self.make_spawned_process())
    }

    async fn spawn_follow_up(
        &self,
        opts: &SpawnOptions,
        _env: &[(String, String)],
    ) -> Result<SpawnedProcess, EngineError> {
        self.calls.lock().push(FakeCall::SpawnFollowUp {
            prompt: opts.prompt.clone(),
        });
        Ok(self.make_spawned_process())
    }

    fn normalize_log_line(&self, raw: &str) -> Option<IssueLogEntry> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(IssueLogEntry {
            id: None,
            issue_id: IssueId::new(""),
            turn_index: 0,
            entry_index: 0,
            entry_type: EntryType::AssistantMessage,
            content: trimmed.to_string(),
            metadata: None,
            tool_action: None,
            reply_to_message_id: None,
            timestamp: None,
            visible: true,
        })
    }
}

impl FakeAdapter {
    fn make_spawned_process(&self) -> SpawnedProcess {
        let (mut writer, reader): (DuplexStream, DuplexStream) = duplex(4096);
        let lines = self.script.lock().clone();
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = oneshot::channel();

        tokio::spawn(async move {
            for line in lines {
                let _ = writer.write_all(format!("{line}\n").as_bytes()).await;
            }
            let _ = writer.shutdown().await;
            let _ = kill_rx.await;
            let _ = exit_tx.send(ExitOutcome {
                success: true,
                code: Some(0),
            });
        });

        SpawnedProcess {
            child: Box::new(FakeChild {
                kill_tx: Some(kill_tx),
                exit_rx,
            }),
            stdout: Box::new(reader),
            stderr: Box::new(tokio::io::empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::normalize_stream;

    #[tokio::test]
    async fn scripted_lines_are_readable_from_stdout() {
        let adapter = FakeAdapter::new();
        adapter.script(vec!["hello".to_string(), "world".to_string()]);
        let opts = SpawnOptions {
            prompt: "go".into(),
            working_dir: "/tmp".into(),
            model: None,
            permission_mode: bitk_core::PermissionMode::Auto,
            external_session_id: None,
        };
        let mut proc = adapter.spawn(&opts, &[]).await.expect("spawn");
        let entries = normalize_stream(&mut *proc.stdout, |l| adapter.normalize_log_line(l)).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "hello");
        assert_eq!(adapter.calls(), vec![FakeCall::Spawn { prompt: "go".into() }]);
    }

    #[tokio::test]
    async fn fail_next_spawn_is_honored_once() {
        let adapter = FakeAdapter::new();
        adapter.fail_next_spawn("boom");
        let opts = SpawnOptions {
            prompt: "go".into(),
            working_dir: "/tmp".into(),
            model: None,
            permission_mode: bitk_core::PermissionMode::Auto,
            external_session_id: None,
        };
        assert!(adapter.spawn(&opts, &[]).await.is_err());
        assert!(adapter.spawn(&opts, &[]).await.is_ok());
    }
}
