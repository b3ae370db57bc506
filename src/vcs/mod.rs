//! Version-Control Adapter: branch, worktree, commit, and merge operations
//! used by the Workspace Manager and Scheduler (spec §4.6, §9).

pub mod git_cli;

use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Options accepted by [`VersionControl::merge`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions {
    /// Re-attempt with "prefer incoming" conflict resolution if the first
    /// attempt reports conflicts (spec §4.6).
    pub prefer_incoming_on_conflict: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub merged: bool,
    pub used_fallback_strategy: bool,
}

/// Operations the core needs from a version-control system (spec §9). The
/// shipped adapter shells out to the `git` binary rather than linking
/// libgit2, mirroring how the agent runner drives its subprocess.
#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn is_repository(&self, path: &Path) -> Result<bool>;
    async fn current_branch(&self, path: &Path) -> Result<String>;
    async fn main_branch(&self, path: &Path) -> Result<String>;
    async fn is_clean(&self, path: &Path) -> Result<bool>;
    async fn has_staged_changes(&self, path: &Path) -> Result<bool>;
    async fn has_uncommitted_changes(&self, path: &Path) -> Result<bool>;
    async fn branch_exists(&self, path: &Path, branch: &str) -> Result<bool>;
    async fn create_branch(&self, path: &Path, branch: &str, from: &str) -> Result<()>;
    async fn checkout_branch(&self, path: &Path, branch: &str) -> Result<()>;
    async fn stage_all(&self, path: &Path) -> Result<()>;
    async fn commit(&self, path: &Path, message: &str) -> Result<()>;
    async fn merge(
        &self,
        path: &Path,
        branch: &str,
        task_id: &str,
        opts: MergeOptions,
    ) -> Result<MergeOutcome>;
    async fn worktree_add(&self, path: &Path, worktree_path: &Path, branch: &str) -> Result<()>;
    async fn worktree_remove(&self, path: &Path, worktree_path: &Path) -> Result<()>;
    async fn tag_create(&self, path: &Path, tag: &str) -> Result<()>;
    async fn tag_exists(&self, path: &Path, tag: &str) -> Result<bool>;
}

/// Conventional-commits message for task completion (spec §9).
pub fn task_commit_message(task_id: &str, task_name: &str) -> String {
    format!("feat({task_id}): {task_name}")
}

/// Merge commit message for a task's branch landing on the base branch
/// (spec §4.6).
pub fn merge_commit_message(branch: &str, task_id: &str) -> String {
    format!("Merge branch '{branch}' (task {task_id})")
}

pub(crate) fn scratch_worktree_path(base: &Path, branch_slug: &str) -> PathBuf {
    base.join(".hermes").join("worktrees").join(branch_slug)
}
