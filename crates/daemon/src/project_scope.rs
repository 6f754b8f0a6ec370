// SPDX-License-Identifier: MIT

//! Resolves an SSE subscriber's `projectId` query param (either the
//! project's id or its human alias) and maps arbitrary issue ids back to
//! their owning project, so the SSE handler can filter the shared event
//! bus down to one project's traffic (spec §4.5).

use crate::cache::TtlCache;
use async_trait::async_trait;
use bitk_core::{EngineError, IssueId, ProjectId};
use bitk_storage::SqliteStore;
use std::time::Duration;

/// Project-Issue Cache Entry TTL (spec.md "5 min").
const PROJECT_ISSUE_CACHE_TTL: Duration = Duration::from_secs(300);

#[async_trait]
pub trait ProjectResolver: Send + Sync {
    /// Resolves an id-or-alias path/query param to a project id.
    async fn resolve_ref(&self, id_or_alias: &str) -> Result<ProjectId, EngineError>;

    /// Finds the project an issue belongs to, for event filtering.
    async fn resolve_issue_project(&self, issue_id: &IssueId) -> Result<ProjectId, EngineError>;
}

#[async_trait]
impl ProjectResolver for SqliteStore {
    async fn resolve_ref(&self, id_or_alias: &str) -> Result<ProjectId, EngineError> {
        self.resolve_project_ref(id_or_alias)
            .await
            .map_err(EngineError::from)
    }

    async fn resolve_issue_project(&self, issue_id: &IssueId) -> Result<ProjectId, EngineError> {
        let issue = bitk_engine::IssueRepository::get_issue(self, issue_id).await?;
        Ok(issue.project_id)
    }
}

/// Caches `issueId -> projectId` lookups so a busy SSE connection doesn't
/// hit the database for every event (spec §8's TTL-cache round-trip
/// property; see [`TtlCache`]).
pub struct ProjectScope<R> {
    resolver: R,
    cache: TtlCache<IssueId, ProjectId>,
}

impl<R> ProjectScope<R>
where
    R: ProjectResolver,
{
    pub fn new(resolver: R) -> Self {
        Self {
            resolver,
            cache: TtlCache::new(),
        }
    }

    pub async fn resolve_ref(&self, id_or_alias: &str) -> Result<ProjectId, EngineError> {
        self.resolver.resolve_ref(id_or_alias).await
    }

    /// Whether `issue_id` belongs to `project_id`, consulting the TTL
    /// cache before falling back to the resolver.
    pub async fn issue_in_project(
        &self,
        issue_id: &IssueId,
        project_id: &ProjectId,
    ) -> Result<bool, EngineError> {
        if let Some(cached) = self.cache.get(issue_id) {
            return Ok(cached == *project_id);
        }
        let resolved = self.resolver.resolve_issue_project(issue_id).await?;
        self.cache
            .set(issue_id.clone(), resolved.clone(), PROJECT_ISSUE_CACHE_TTL);
        Ok(resolved == *project_id)
    }

    /// Evicts `issue_id`'s cache entry, e.g. on a deletion observed via
    /// `issue-updated` (spec §4.5 cache invariant (c)).
    pub fn invalidate(&self, issue_id: &IssueId) {
        self.cache.remove(issue_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingResolver {
        calls: Arc<AtomicUsize>,
        project_id: ProjectId,
    }

    #[async_trait]
    impl ProjectResolver for CountingResolver {
        async fn resolve_ref(&self, id_or_alias: &str) -> Result<ProjectId, EngineError> {
            Ok(ProjectId::new(id_or_alias))
        }

        async fn resolve_issue_project(&self, _issue_id: &IssueId) -> Result<ProjectId, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.project_id.clone())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_lookups_within_ttl_hit_the_cache_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scope = ProjectScope::new(CountingResolver {
            calls: calls.clone(),
            project_id: ProjectId::new("p-1"),
        });
        let issue_id = IssueId::new("i-1");
        let project_id = ProjectId::new("p-1");

        assert!(scope.issue_in_project(&issue_id, &project_id).await.unwrap());
        assert!(scope.issue_in_project(&issue_id, &project_id).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(PROJECT_ISSUE_CACHE_TTL + Duration::from_secs(1)).await;
        assert!(scope.issue_in_project(&issue_id, &project_id).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_a_fresh_lookup_before_ttl_expiry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scope = ProjectScope::new(CountingResolver {
            calls: calls.clone(),
            project_id: ProjectId::new("p-1"),
        });
        let issue_id = IssueId::new("i-1");
        let project_id = ProjectId::new("p-1");

        assert!(scope.issue_in_project(&issue_id, &project_id).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        scope.invalidate(&issue_id);
        assert!(scope.issue_in_project(&issue_id, &project_id).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
