// SPDX-License-Identifier: MIT

//! Engine Adapter Set (spec §4.1, component C1): a uniform capability
//! surface over the external AI CLI tools the daemon drives.

pub mod claude;
pub mod codex;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

use async_trait::async_trait;
use bitk_core::{EngineError, PermissionMode};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncRead;

/// Hard bound on an availability probe (spec §4.1).
pub const AVAILABILITY_PROBE_TIMEOUT: Duration = Duration::from_secs(30);
/// How long an availability result stays cached.
pub const AVAILABILITY_CACHE_TTL: Duration = Duration::from_secs(600);
/// Grace period between a soft cancel and a hard kill (spec §4.1, §5).
pub const CANCEL_HARD_KILL_DEADLINE: Duration = Duration::from_secs(5);

/// Whether the CLI tool reports itself as authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Authenticated,
    Unauthenticated,
    Unknown,
}

/// Result of probing whether an adapter's CLI tool is usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub installed: bool,
    pub executable: bool,
    pub version: Option<String>,
    pub auth_status: AuthStatus,
    pub error: Option<String>,
}

impl Availability {
    pub fn timed_out() -> Self {
        Self {
            installed: true,
            executable: false,
            version: None,
            auth_status: AuthStatus::Unknown,
            error: Some("timeout".to_string()),
        }
    }
}

/// One selectable model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

/// Options for spawning or following up an execution.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub prompt: String,
    pub working_dir: PathBuf,
    pub model: Option<String>,
    pub permission_mode: PermissionMode,
    /// Set when this is a follow-up that should continue an existing
    /// external session rather than starting fresh.
    pub external_session_id: Option<String>,
}

/// Outcome of a process exiting, independent of platform exit-status types
/// so fakes can report one without spawning a real process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub success: bool,
    pub code: Option<i32>,
}

/// Control surface over one spawned child, abstracted so the real
/// `tokio::process::Child` and test fakes both implement it (spec §9
/// design note: adapters are stateless, returning only a handle).
#[async_trait]
pub trait ManagedChild: Send {
    /// Request graceful termination. Default implementations that have no
    /// portable soft-signal available fall back to a hard kill.
    async fn cancel(&mut self) -> Result<(), EngineError> {
        self.kill().await
    }
    async fn kill(&mut self) -> Result<(), EngineError>;
    async fn wait(&mut self) -> Result<ExitOutcome, EngineError>;
}

#[async_trait]
impl ManagedChild for tokio::process::Child {
    async fn kill(&mut self) -> Result<(), EngineError> {
        tokio::process::Child::kill(self)
            .await
            .map_err(|e| EngineError::Internal(format!("kill failed: {e}")))
    }

    async fn wait(&mut self) -> Result<ExitOutcome, EngineError> {
        let status = tokio::process::Child::wait(self)
            .await
            .map_err(|e| EngineError::Internal(format!("wait failed: {e}")))?;
        Ok(ExitOutcome {
            success: status.success(),
            code: status.code(),
        })
    }
}

/// A live subprocess-backed handle returned by `spawn`/`spawn_follow_up`.
pub struct SpawnedProcess {
    pub child: Box<dyn ManagedChild>,
    pub stdout: Box<dyn AsyncRead + Unpin + Send>,
    pub stderr: Box<dyn AsyncRead + Unpin + Send>,
}

impl SpawnedProcess {
    /// Hard-kill the underlying process.
    pub async fn kill(&mut self) -> Result<(), EngineError> {
        self.child.kill().await
    }

    /// Await process exit.
    pub async fn wait(&mut self) -> Result<ExitOutcome, EngineError> {
        self.child.wait().await
    }
}

/// Uniform capability surface over one external AI CLI tool (spec §4.1).
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    /// Stable name, e.g. `"claude"` or `"codex"`.
    fn name(&self) -> &'static str;

    /// Probe whether the tool is installed, executable, and authenticated.
    /// Must complete within [`AVAILABILITY_PROBE_TIMEOUT`].
    async fn availability(&self) -> Availability;

    /// List selectable models. May be empty on failure.
    async fn models(&self) -> Vec<ModelInfo>;

    /// Spawn a fresh execution.
    async fn spawn(
        &self,
        opts: &SpawnOptions,
        env: &[(String, String)],
    ) -> Result<SpawnedProcess, EngineError>;

    /// Spawn a follow-up execution for engines that cannot reuse a running
    /// session in-process; continuity comes from `opts.external_session_id`.
    async fn spawn_follow_up(
        &self,
        opts: &SpawnOptions,
        env: &[(String, String)],
    ) -> Result<SpawnedProcess, EngineError> {
        self.spawn(opts, env).await
    }

    /// Pure mapping from a raw output line to at most one normalized entry.
    /// Unrecognized but non-empty lines map to `entry_type=system-message`
    /// with the raw text, per spec §4.1.
    fn normalize_log_line(&self, raw: &str) -> Option<bitk_core::IssueLogEntry>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_out_availability_matches_spec_shape() {
        let a = Availability::timed_out();
        assert!(a.installed);
        assert!(!a.executable);
        assert_eq!(a.error.as_deref(), Some("timeout"));
    }
}
