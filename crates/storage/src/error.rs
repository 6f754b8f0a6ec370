// SPDX-License-Identifier: MIT

//! Converts `sqlx` failures into the shared error taxonomy (spec §7): this
//! crate never lets a raw `sqlx::Error` cross into `bitk-engine` or
//! `bitk-daemon`.

use bitk_core::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match &err {
            StorageError::Database(sqlx::Error::RowNotFound) => {
                EngineError::NotFound(err.to_string())
            }
            _ => EngineError::Internal(err.to_string()),
        }
    }
}
