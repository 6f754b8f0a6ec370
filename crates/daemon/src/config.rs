// SPDX-License-Identifier: MIT

//! Startup configuration (spec §6), loaded once from the environment
//! before any other subsystem starts.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub log_level: String,
    pub service_name: String,
    pub enable_runtime_endpoint: bool,
}

impl Config {
    /// Reads `DB_PATH`, `LOG_LEVEL`, `SERVICE_NAME`, and
    /// `ENABLE_RUNTIME_ENDPOINT` from the environment, falling back to
    /// the defaults spec §6 lists.
    pub fn load() -> Self {
        Self {
            db_path: std::env::var("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/bitk.db")),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            service_name: std::env::var("SERVICE_NAME").unwrap_or_else(|_| "bitk".to_string()),
            enable_runtime_endpoint: std::env::var("ENABLE_RUNTIME_ENDPOINT")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
        }
    }
}
