//! Subprocess adapter driving the `git` binary, mirroring the teacher's
//! pattern of shelling out for build tooling rather than linking libgit2.

use super::{MergeOptions, MergeOutcome, VersionControl};
use crate::error::{HermesError, Result};
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct GitCliAdapter;

impl GitCliAdapter {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, path: &Path, args: &[&str]) -> Result<(bool, String, String)> {
        let output = Command::new("git")
            .args(args)
            .current_dir(path)
            .output()
            .await
            .map_err(|e| HermesError::VersionControl {
                message: format!("failed to spawn git {}: {e}", args.join(" ")),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        debug!(args = args.join(" "), success = output.status.success(), "git command");
        Ok((output.status.success(), stdout, stderr))
    }

    async fn run_ok(&self, path: &Path, args: &[&str]) -> Result<String> {
        let (ok, stdout, stderr) = self.run(path, args).await?;
        if !ok {
            return Err(HermesError::VersionControl {
                message: format!("git {} failed: {stderr}", args.join(" ")),
            });
        }
        Ok(stdout)
    }
}

#[async_trait::async_trait]
impl VersionControl for GitCliAdapter {
    async fn is_repository(&self, path: &Path) -> Result<bool> {
        let (ok, _, _) = self
            .run(path, &["rev-parse", "--is-inside-work-tree"])
            .await?;
        Ok(ok)
    }

    async fn current_branch(&self, path: &Path) -> Result<String> {
        self.run_ok(path, &["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    async fn main_branch(&self, path: &Path) -> Result<String> {
        if let Ok(head) = self
            .run_ok(path, &["symbolic-ref", "refs/remotes/origin/HEAD"])
            .await
        {
            if let Some(name) = head.rsplit('/').next() {
                return Ok(name.to_string());
            }
        }
        for candidate in ["main", "master"] {
            if self.branch_exists(path, candidate).await? {
                return Ok(candidate.to_string());
            }
        }
        self.current_branch(path).await
    }

    async fn is_clean(&self, path: &Path) -> Result<bool> {
        let status = self.run_ok(path, &["status", "--porcelain"]).await?;
        Ok(status.is_empty())
    }

    async fn has_staged_changes(&self, path: &Path) -> Result<bool> {
        let (ok, _, _) = self.run(path, &["diff", "--cached", "--quiet"]).await?;
        Ok(!ok)
    }

    async fn has_uncommitted_changes(&self, path: &Path) -> Result<bool> {
        Ok(!self.is_clean(path).await?)
    }

    async fn branch_exists(&self, path: &Path, branch: &str) -> Result<bool> {
        let (ok, _, _) = self
            .run(
                path,
                &["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")],
            )
            .await?;
        Ok(ok)
    }

    async fn create_branch(&self, path: &Path, branch: &str, from: &str) -> Result<()> {
        self.run_ok(path, &["branch", branch, from]).await?;
        Ok(())
    }

    async fn checkout_branch(&self, path: &Path, branch: &str) -> Result<()> {
        self.run_ok(path, &["checkout", branch]).await?;
        Ok(())
    }

    async fn stage_all(&self, path: &Path) -> Result<()> {
        self.run_ok(path, &["add", "-A"]).await?;
        Ok(())
    }

    async fn commit(&self, path: &Path, message: &str) -> Result<()> {
        self.run_ok(path, &["commit", "-m", message]).await?;
        Ok(())
    }

    async fn merge(
        &self,
        path: &Path,
        branch: &str,
        task_id: &str,
        opts: MergeOptions,
    ) -> Result<MergeOutcome> {
        let message = super::merge_commit_message(branch, task_id);
        let (ok, _, stderr) = self
            .run(path, &["merge", "--no-ff", branch, "-m", &message])
            .await?;
        if ok {
            return Ok(MergeOutcome {
                merged: true,
                used_fallback_strategy: false,
            });
        }

        warn!(branch, error = stderr, "merge conflict, aborting");
        self.run(path, &["merge", "--abort"]).await?;

        if !opts.prefer_incoming_on_conflict {
            return Ok(MergeOutcome {
                merged: false,
                used_fallback_strategy: false,
            });
        }

        let fallback_message = format!("{message} (auto-resolved: prefer incoming)");
        let (ok, _, stderr) = self
            .run(
                path,
                &[
                    "merge",
                    "--no-ff",
                    "-X",
                    "theirs",
                    branch,
                    "-m",
                    &fallback_message,
                ],
            )
            .await?;

        if ok {
            Ok(MergeOutcome {
                merged: true,
                used_fallback_strategy: true,
            })
        } else {
            self.run(path, &["merge", "--abort"]).await?;
            warn!(branch, error = stderr, "fallback merge also failed");
            Ok(MergeOutcome {
                merged: false,
                used_fallback_strategy: true,
            })
        }
    }

    async fn worktree_add(&self, path: &Path, worktree_path: &Path, branch: &str) -> Result<()> {
        let worktree_str = worktree_path.to_string_lossy().to_string();
        self.run_ok(path, &["worktree", "add", &worktree_str, branch])
            .await?;
        Ok(())
    }

    async fn worktree_remove(&self, path: &Path, worktree_path: &Path) -> Result<()> {
        let worktree_str = worktree_path.to_string_lossy().to_string();
        self.run_ok(path, &["worktree", "remove", "--force", &worktree_str])
            .await?;
        Ok(())
    }

    async fn tag_create(&self, path: &Path, tag: &str) -> Result<()> {
        self.run_ok(path, &["tag", tag]).await?;
        Ok(())
    }

    async fn tag_exists(&self, path: &Path, tag: &str) -> Result<bool> {
        let (ok, _, _) = self
            .run(path, &["show-ref", "--verify", "--quiet", &format!("refs/tags/{tag}")])
            .await?;
        Ok(ok)
    }
}
