//! Workspace Manager: gives each concurrently executing task an isolated
//! filesystem view layered on the VCS adapter (spec §4.6).

use crate::constants::{MAX_BRANCH_NAME_LENGTH, MAX_BRANCH_SLUG_LENGTH};
use crate::error::Result;
use crate::models::{TaskId, Workspace};
use crate::vcs::{scratch_worktree_path, VersionControl};
use std::path::PathBuf;
use std::sync::Arc;

pub struct WorkspaceManager {
    vcs: Arc<dyn VersionControl>,
    base_path: PathBuf,
    isolation_enabled: bool,
}

impl WorkspaceManager {
    pub fn new(vcs: Arc<dyn VersionControl>, base_path: PathBuf, isolation_enabled: bool) -> Self {
        Self {
            vcs,
            base_path,
            isolation_enabled,
        }
    }

    /// Creates an isolated worktree on a fresh branch for `task_id`, or
    /// hands back the shared base path when isolation is disabled (spec
    /// §4.6, §5: unsafe with more than one worker).
    pub async fn setup(&self, task_id: &TaskId, task_name: &str) -> Result<Workspace> {
        if !self.isolation_enabled {
            return Ok(Workspace {
                task_id: task_id.clone(),
                branch: self.vcs.current_branch(&self.base_path).await?,
                work_path: self.base_path.clone(),
                is_isolated: false,
            });
        }

        let branch = branch_name(task_id, task_name);
        let base_branch = self.vcs.main_branch(&self.base_path).await?;
        let slug = branch.trim_start_matches("hermes/");
        let worktree_path = scratch_worktree_path(&self.base_path, slug);

        self.vcs
            .create_branch(&self.base_path, &branch, &base_branch)
            .await?;
        self.vcs
            .worktree_add(&self.base_path, &worktree_path, &branch)
            .await?;

        Ok(Workspace {
            task_id: task_id.clone(),
            branch,
            work_path: worktree_path,
            is_isolated: true,
        })
    }

    pub async fn has_uncommitted_changes(&self, workspace: &Workspace) -> Result<bool> {
        self.vcs.has_uncommitted_changes(&workspace.work_path).await
    }

    /// Stages and commits every change inside the worktree only (spec §4.6).
    pub async fn commit_changes(&self, workspace: &Workspace, message: &str) -> Result<()> {
        self.vcs.stage_all(&workspace.work_path).await?;
        self.vcs.commit(&workspace.work_path, message).await
    }

    /// Removes the worktree directory; the branch itself is retained for
    /// history (spec §4.6 point 4).
    pub async fn cleanup(&self, workspace: &Workspace) -> Result<()> {
        if !workspace.is_isolated {
            return Ok(());
        }
        self.vcs
            .worktree_remove(&self.base_path, &workspace.work_path)
            .await
    }

    pub fn base_path(&self) -> &std::path::Path {
        &self.base_path
    }
}

/// `hermes/<taskID>-<sanitisedName>`, the slug truncated to
/// [`MAX_BRANCH_SLUG_LENGTH`] chars and the whole identifier to
/// [`MAX_BRANCH_NAME_LENGTH`] (spec §4.6).
fn branch_name(task_id: &TaskId, task_name: &str) -> String {
    let slug = sanitize_branch_component(task_name);
    let slug: String = slug.chars().take(MAX_BRANCH_SLUG_LENGTH).collect();
    let slug = slug.trim_end_matches('-').to_string();
    let full = format!("hermes/{task_id}-{slug}");
    full.chars().take(MAX_BRANCH_NAME_LENGTH).collect()
}

/// Lowercase; non-alphanumerics except `_`/`-` become `-`; collapse
/// repeated `-`; trim trailing `-` (spec §4.6).
fn sanitize_branch_component(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_dash = false;
    for c in name.to_ascii_lowercase().chars() {
        let mapped = if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            c
        } else {
            '-'
        };
        if mapped == '-' && last_was_dash {
            continue;
        }
        last_was_dash = mapped == '-';
        out.push(mapped);
    }
    out.trim_end_matches('-').to_string()
}
