// SPDX-License-Identifier: MIT

//! Daemon startup: wires configuration, storage, the adapter registry,
//! the issue engine, the event bus, and reconciliation into one running
//! process (teacher pattern: `crates/daemon/src/lifecycle/mod.rs`'s
//! `Config`/startup-result shape, adapted to this engine's components).

use crate::config::Config;
use crate::event_bus::EventBus;
use crate::project_scope::ProjectScope;
use crate::sse::{self, SseState};
use axum::routing::get;
use axum::Router;
use bitk_adapters::{ClaudeAdapter, CodexAdapter, EngineAdapter, TracedAdapter};
use bitk_core::EngineType;
use bitk_engine::{reconcile_once, spawn_periodic, IssueEngine, DEFAULT_CONCURRENCY_CAP};
use bitk_storage::SqliteStore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub type Engine = IssueEngine<SqliteStore, EventBus>;

/// Everything a running daemon holds. `axum_router` is handed to the
/// process's own HTTP server setup (not started here, so tests can
/// construct a `Daemon` without binding a socket).
pub struct Daemon {
    pub config: Config,
    pub store: SqliteStore,
    pub event_bus: Arc<EventBus>,
    pub engine: Engine,
    pub project_scope: Arc<ProjectScope<SqliteStore>>,
    pub axum_router: Router,
    reconcile_handle: tokio::task::JoinHandle<()>,
    cache_invalidation_handle: tokio::task::JoinHandle<()>,
}

impl Daemon {
    /// Initializes logging, opens/migrates the database, builds the
    /// adapter registry, runs an initial reconciliation sweep, and spawns
    /// the periodic one. Call once, before serving traffic.
    pub async fn startup(config: Config) -> Result<Self, bitk_core::EngineError> {
        let store = SqliteStore::connect(&config.db_path)
            .await
            .map_err(bitk_core::EngineError::from)?;

        let adapters = build_adapter_registry();
        let event_bus = Arc::new(EventBus::new());
        let engine = IssueEngine::new(
            store.clone(),
            (*event_bus).clone(),
            adapters,
            DEFAULT_CONCURRENCY_CAP,
        );

        let reconciled = reconcile_once(&engine).await?;
        tracing::info!(count = reconciled, "initial reconciliation sweep complete");
        let reconcile_handle = spawn_periodic(engine.clone());

        let project_scope = Arc::new(ProjectScope::new(store.clone()));
        let cache_invalidation_handle =
            spawn_cache_invalidation(event_bus.subscribe_all().issue_updated, Arc::clone(&project_scope));

        let sse_state = Arc::new(SseState {
            event_bus: Arc::clone(&event_bus),
            project_scope: Arc::clone(&project_scope),
        });
        let mut router = Router::new()
            .route("/events", get(sse::events_handler))
            .with_state(sse_state);
        if config.enable_runtime_endpoint {
            router = router.route("/runtime/status", get(runtime_status));
        }

        Ok(Self {
            config,
            store,
            event_bus,
            engine,
            project_scope,
            axum_router: router,
            reconcile_handle,
            cache_invalidation_handle,
        })
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        self.reconcile_handle.abort();
        self.cache_invalidation_handle.abort();
    }
}

/// Evicts a deleted issue's project-scope cache entry as soon as its
/// `issue-updated` event is observed, rather than waiting out the TTL
/// (spec §4.5 cache invariant (c)).
fn spawn_cache_invalidation(
    mut issue_updated: tokio::sync::broadcast::Receiver<bitk_core::Event>,
    project_scope: Arc<ProjectScope<SqliteStore>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match issue_updated.recv().await {
                Ok(bitk_core::Event::IssueUpdated {
                    issue_id,
                    deleted: Some(true),
                }) => project_scope.invalidate(&issue_id),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Initializes `tracing-subscriber` with an `EnvFilter` driven by
/// `LOG_LEVEL` (spec §6), human-readable formatting to stdout matching
/// the teacher's default. Call once, before `Daemon::startup`.
pub fn init_logging(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_adapter_registry() -> HashMap<EngineType, Arc<dyn EngineAdapter>> {
    // No `WORKSPACE_ROOT` env var is listed in spec §6's configuration
    // table; `/` disables the within-root boundary check (spec §8
    // boundary case), which is the correct default until a caller
    // supplies a narrower workspace per issue.
    let workspace_root = PathBuf::from("/");
    let mut adapters: HashMap<EngineType, Arc<dyn EngineAdapter>> = HashMap::new();
    adapters.insert(
        EngineType::Claude,
        Arc::new(TracedAdapter::new(ClaudeAdapter::new(workspace_root))),
    );
    adapters.insert(
        EngineType::Codex,
        Arc::new(TracedAdapter::new(CodexAdapter)),
    );
    adapters
}

async fn runtime_status() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}
