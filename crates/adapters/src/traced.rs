// SPDX-License-Identifier: MIT

//! Tracing wrapper for any `EngineAdapter`, for consistent observability
//! across adapter implementations (mirrors the teacher's session/agent
//! tracing wrappers).

use crate::engine::{Availability, EngineAdapter, ModelInfo, SpawnOptions, SpawnedProcess};
use async_trait::async_trait;
use bitk_core::{EngineError, IssueLogEntry};

pub struct TracedAdapter<A> {
    inner: A,
}

impl<A> TracedAdapter<A> {
    pub fn new(inner: A) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<A: EngineAdapter> EngineAdapter for TracedAdapter<A> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn availability(&self) -> Availability {
        let start = std::time::Instant::now();
        let result = self.inner.availability().await;
        tracing::info!(
            adapter = self.name(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            executable = result.executable,
            "availability probe"
        );
        result
    }

    async fn models(&self) -> Vec<ModelInfo> {
        self.inner.models().await
    }

    async fn spawn(
        &self,
        opts: &SpawnOptions,
        env: &[(String, String)],
    ) -> Result<SpawnedProcess, EngineError> {
        tracing::info!(adapter = self.name(), model = ?opts.model, "spawning");
        let result = self.inner.spawn(opts, env).await;
        if let Err(ref e) = result {
            tracing::error!(adapter = self.name(), error = %e, "spawn failed");
        }
        result
    }

    async fn spawn_follow_up(
        &self,
        opts: &SpawnOptions,
        env: &[(String, String)],
    ) -> Result<SpawnedProcess, EngineError> {
        tracing::info!(adapter = self.name(), "spawning follow-up");
        let result = self.inner.spawn_follow_up(opts, env).await;
        if let Err(ref e) = result {
            tracing::error!(adapter = self.name(), error = %e, "follow-up spawn failed");
        }
        result
    }

    fn normalize_log_line(&self, raw: &str) -> Option<IssueLogEntry> {
        self.inner.normalize_log_line(raw)
    }
}
