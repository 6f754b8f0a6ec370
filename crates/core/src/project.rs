// SPDX-License-Identifier: MIT

//! The `Project` entity (spec §6 `projects` table).

use crate::ProjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A workspace grouping of issues, addressable by id or human alias.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub alias: String,
    pub description: Option<String>,
    pub directory: Option<String>,
    pub repository_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
}
