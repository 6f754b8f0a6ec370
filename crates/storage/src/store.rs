// SPDX-License-Identifier: MIT

//! Connection management, migrations, and the operations that sit outside
//! `IssueRepository` (project CRUD, alias resolution, app settings, and
//! the issue-creation boundary rules from spec §8).

use crate::error::StorageError;
use crate::mapping::{fmt_ts, project_from_row};
use bitk_core::{Issue, IssueId, IssueStatus, Project, ProjectId, SessionFields};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;

/// A SQLite-backed store satisfying spec §6's schema. Implements
/// `bitk_engine::IssueRepository` (see `issue_repository.rs`) plus the
/// project/settings operations the daemon needs directly.
#[derive(Clone)]
pub struct SqliteStore {
    pub(crate) pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if absent) the database at `path` and runs
    /// migrations. `path` of `:memory:` opens an in-process database.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        tracing::info!(db_path = %path.display(), "opening database");
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn create_project(
        &self,
        name: &str,
        alias: &str,
        description: Option<&str>,
        directory: Option<&str>,
        repository_url: Option<&str>,
    ) -> Result<Project, StorageError> {
        let id = ProjectId::new(uuid::Uuid::new_v4().to_string());
        let now = chrono::Utc::now();
        sqlx::query(
            "INSERT INTO projects (id, name, alias, description, directory, repository_url, \
             created_at, updated_at, is_deleted) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(id.as_str())
        .bind(name)
        .bind(alias)
        .bind(description)
        .bind(directory)
        .bind(repository_url)
        .bind(fmt_ts(&now))
        .bind(fmt_ts(&now))
        .execute(&self.pool)
        .await?;

        Ok(Project {
            id,
            name: name.to_string(),
            alias: alias.to_string(),
            description: description.map(str::to_string),
            directory: directory.map(str::to_string),
            repository_url: repository_url.map(str::to_string),
            created_at: now,
            updated_at: now,
            is_deleted: false,
        })
    }

    pub async fn get_project(&self, id: &ProjectId) -> Result<Project, StorageError> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?")
            .bind(id.as_str())
            .fetch_one(&self.pool)
            .await?;
        project_from_row(&row)
    }

    /// Resolves an opaque id or human alias to a project id (spec §6's SSE
    /// route accepts either).
    pub async fn resolve_project_ref(&self, id_or_alias: &str) -> Result<ProjectId, StorageError> {
        if let Ok(row) = sqlx::query("SELECT id FROM projects WHERE id = ?")
            .bind(id_or_alias)
            .fetch_one(&self.pool)
            .await
        {
            return Ok(ProjectId::new(row.try_get::<String, _>("id")?));
        }
        let row = sqlx::query("SELECT id FROM projects WHERE alias = ?")
            .bind(id_or_alias)
            .fetch_one(&self.pool)
            .await?;
        Ok(ProjectId::new(row.try_get::<String, _>("id")?))
    }

    /// Creates an issue, applying the two allocation rules from spec §8:
    /// `issueNumber` is `max(all, including soft-deleted) + 1` project-wide;
    /// `sortOrder` is `max(within the target column, excluding soft-deleted)
    /// + 1`.
    pub async fn create_issue(
        &self,
        project_id: &ProjectId,
        title: &str,
        status: IssueStatus,
        parent_issue_id: Option<&IssueId>,
        use_worktree: bool,
    ) -> Result<Issue, StorageError> {
        let mut tx = self.pool.begin().await?;

        let issue_number: i64 = sqlx::query(
            "SELECT COALESCE(MAX(issue_number), 0) AS m FROM issues WHERE project_id = ?",
        )
        .bind(project_id.as_str())
        .fetch_one(&mut *tx)
        .await?
        .try_get("m")?;
        let issue_number = issue_number + 1;

        let sort_order: i64 = sqlx::query(
            "SELECT COALESCE(MAX(sort_order), -1) AS m FROM issues \
             WHERE project_id = ? AND status_id = ? AND is_deleted = 0",
        )
        .bind(project_id.as_str())
        .bind(status.as_str())
        .fetch_one(&mut *tx)
        .await?
        .try_get("m")?;
        let sort_order = sort_order + 1;

        let id = IssueId::new(uuid::Uuid::new_v4().to_string());
        let now = chrono::Utc::now();
        sqlx::query(
            "INSERT INTO issues (id, project_id, status_id, issue_number, title, priority, \
             sort_order, parent_issue_id, use_worktree, created_at, updated_at, is_deleted) \
             VALUES (?, ?, ?, ?, ?, 'medium', ?, ?, ?, ?, ?, 0)",
        )
        .bind(id.as_str())
        .bind(project_id.as_str())
        .bind(status.as_str())
        .bind(issue_number)
        .bind(title)
        .bind(sort_order)
        .bind(parent_issue_id.map(IssueId::as_str))
        .bind(use_worktree as i64)
        .bind(fmt_ts(&now))
        .bind(fmt_ts(&now))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Issue {
            id,
            project_id: project_id.clone(),
            status,
            issue_number,
            title: title.to_string(),
            priority: "medium".to_string(),
            sort_order,
            parent_issue_id: parent_issue_id.cloned(),
            use_worktree,
            session: SessionFields::default(),
            created_at: now,
            updated_at: now,
            is_deleted: false,
        })
    }

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row = sqlx::query("SELECT value FROM app_settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.try_get::<String, _>("value")).transpose()?)
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let now = chrono::Utc::now();
        sqlx::query(
            "INSERT INTO app_settings (key, value, created_at, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(fmt_ts(&now))
        .bind(fmt_ts(&now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
