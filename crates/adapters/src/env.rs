// SPDX-License-Identifier: MIT

//! Environment sanitation for spawned subprocesses (spec §4.1).
//!
//! Child processes never inherit the parent's environment wholesale; only
//! an explicit allow-list is forwarded.

use std::path::{Path, PathBuf};

/// Variables forwarded from the daemon's own environment into a child,
/// on top of whatever the caller supplies explicitly.
const ALLOWED_PARENT_VARS: &[&str] = &["PATH", "HOME", "LANG", "TERM", "TZ"];

/// Build the explicit environment for a spawned child: the allow-listed
/// subset of the current process environment, overlaid with adapter-
/// supplied pairs (credentials, model overrides, etc).
pub fn safe_env(overlay: &[(String, String)]) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = ALLOWED_PARENT_VARS
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)))
        .collect();

    for (k, v) in overlay {
        if let Some(existing) = env.iter_mut().find(|(ek, _)| ek == k) {
            existing.1 = v.clone();
        } else {
            env.push((k.clone(), v.clone()));
        }
    }
    env
}

/// Validate that `cwd` lies inside `workspace_root`, per spec §4.1 ("The
/// working directory, if present, must be inside the configured workspace
/// root"). `workspace_root == "/"` disables the check entirely (spec §8
/// boundary case).
pub fn within_workspace_root(workspace_root: &Path, cwd: &Path) -> Result<(), String> {
    if workspace_root == Path::new("/") {
        return Ok(());
    }

    let root = canonical_prefix(workspace_root);
    let target = canonical_prefix(cwd);

    if target.starts_with(&root) {
        Ok(())
    } else {
        Err(format!(
            "working directory {} is outside workspace root {}",
            cwd.display(),
            workspace_root.display()
        ))
    }
}

fn canonical_prefix(p: &Path) -> PathBuf {
    std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf())
}
