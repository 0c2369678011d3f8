//! Git branch and worktree management
//!
//! Wraps the version-control tool: linked-checkout create/remove/list/prune,
//! branch lifecycle with protection and merge checks, and HEAD archiving for
//! package export. Worktree-add failures are classified by inspecting the
//! tool's message text.

use crate::config::{is_protected_branch, ProjectContext};
use crate::errors::{GitError, Result};
use crate::runtime::{timeouts, CommandSpec, ExecOutput};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// One entry of `git worktree list`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub commit: String,
    pub branch: String,
}

/// Git operations scoped to one repository root.
pub struct GitManager {
    project_root: PathBuf,
}

impl GitManager {
    pub fn new(ctx: &ProjectContext) -> Self {
        Self {
            project_root: ctx.root.clone(),
        }
    }

    pub fn at(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    fn git(&self) -> CommandSpec {
        CommandSpec::new("git")
            .current_dir(&self.project_root)
            .timeout(timeouts::DOWN)
    }

    async fn run_git(&self, args: &[&str]) -> Result<ExecOutput> {
        self.git().args(args.iter().copied()).output().await
    }

    /// Whether the project root is inside a git repository.
    pub async fn is_git_repo(&self) -> bool {
        matches!(
            self.run_git(&["rev-parse", "--git-dir"]).await,
            Ok(output) if output.success()
        )
    }

    pub async fn ensure_git_repo(&self) -> Result<()> {
        if self.is_git_repo().await {
            Ok(())
        } else {
            Err(GitError::NotARepo {
                path: self.project_root.display().to_string(),
            }
            .into())
        }
    }

    /// Initialize a repository with one commit when the project root is not
    /// a git repository yet. Standalone imports land on hosts with no
    /// repository; worktree creation needs one.
    pub async fn ensure_repository(&self) -> Result<()> {
        if self.is_git_repo().await {
            return Ok(());
        }
        info!("Initializing git repository at {}", self.project_root.display());
        let output = self.run_git(&["init", "-b", "main"]).await?;
        if !output.success() {
            // Older git without -b support.
            let output = self.run_git(&["init"]).await?;
            if !output.success() {
                return Err(GitError::CommandFailed {
                    message: output.stderr.trim().to_string(),
                }
                .into());
            }
        }
        let _ = self.run_git(&["add", "-A"]).await;
        let output = self
            .run_git(&[
                "-c",
                "user.email=dockertree@local",
                "-c",
                "user.name=Dockertree",
                "commit",
                "--allow-empty",
                "-m",
                "Initialize project",
            ])
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(GitError::CommandFailed {
                message: output.stderr.trim().to_string(),
            }
            .into())
        }
    }

    /// Name of the currently checked-out branch, if any.
    pub async fn current_branch(&self) -> Option<String> {
        let output = self.run_git(&["branch", "--show-current"]).await.ok()?;
        if output.success() && !output.stdout_trimmed().is_empty() {
            Some(output.stdout_trimmed().to_string())
        } else {
            None
        }
    }

    pub async fn branch_exists(&self, branch: &str) -> bool {
        let reference = format!("refs/heads/{branch}");
        matches!(
            self.run_git(&["show-ref", "--verify", "--quiet", reference.as_str()])
                .await,
            Ok(output) if output.success()
        )
    }

    /// Create a branch from the current HEAD if it does not exist yet.
    pub async fn create_branch(&self, branch: &str) -> Result<()> {
        if self.branch_exists(branch).await {
            debug!("Branch {branch} already exists");
            return Ok(());
        }
        let output = self.run_git(&["branch", branch]).await?;
        if output.success() {
            info!("Branch {branch} created");
            Ok(())
        } else {
            Err(GitError::CommandFailed {
                message: output.stderr.trim().to_string(),
            }
            .into())
        }
    }

    /// Whether the branch is fully merged into HEAD.
    pub async fn branch_merged(&self, branch: &str) -> bool {
        matches!(
            self.run_git(&["merge-base", "--is-ancestor", branch, "HEAD"]).await,
            Ok(output) if output.success()
        )
    }

    /// All linked checkouts known to the repository.
    pub async fn list_worktrees(&self) -> Result<Vec<WorktreeEntry>> {
        let output = self.run_git(&["worktree", "list"]).await?;
        if !output.success() {
            return Err(GitError::CommandFailed {
                message: output.stderr.trim().to_string(),
            }
            .into());
        }

        let mut entries = Vec::new();
        for line in output.stdout_lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 3 {
                entries.push(WorktreeEntry {
                    path: PathBuf::from(parts[0]),
                    commit: parts[1].to_string(),
                    branch: parts[2].trim_matches(['[', ']']).to_string(),
                });
            }
        }
        Ok(entries)
    }

    pub async fn worktree_exists(&self, branch: &str) -> bool {
        match self.list_worktrees().await {
            Ok(entries) => entries.iter().any(|entry| entry.branch == branch),
            Err(_) => false,
        }
    }

    /// The checkout path registered for a branch, if any.
    pub async fn find_worktree_path(&self, branch: &str) -> Option<PathBuf> {
        self.list_worktrees()
            .await
            .ok()?
            .into_iter()
            .find(|entry| entry.branch == branch)
            .map(|entry| entry.path)
    }

    fn classify_worktree_add_error(branch: &str, stderr: &str) -> GitError {
        let stderr_lower = stderr.to_lowercase();
        if stderr_lower.contains("already exists") || stderr_lower.contains("already checked out")
        {
            GitError::WorktreeExists {
                branch: branch.to_string(),
            }
        } else if stderr_lower.contains("permission denied")
            || stderr_lower.contains("not a directory")
        {
            GitError::PermissionDenied {
                message: stderr.trim().to_string(),
            }
        } else {
            GitError::CommandFailed {
                message: stderr.trim().to_string(),
            }
        }
    }

    /// Add a linked checkout of `branch` at `worktree_path`, creating the
    /// branch first when needed.
    #[instrument(skip(self, worktree_path))]
    pub async fn create_worktree(&self, branch: &str, worktree_path: &Path) -> Result<()> {
        if let Some(parent) = worktree_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.create_branch(branch).await?;

        let path_arg = worktree_path.display().to_string();
        let output = self
            .run_git(&["worktree", "add", path_arg.as_str(), branch])
            .await?;
        if output.success() {
            info!("Git worktree created for {branch}");
            Ok(())
        } else {
            Err(Self::classify_worktree_add_error(branch, &output.stderr).into())
        }
    }

    /// Remove a linked checkout.
    ///
    /// When the tool refuses with exit 255 (root-owned files left behind by
    /// containers), fall back to pruning and removing the directory manually.
    #[instrument(skip(self))]
    pub async fn remove_worktree(&self, worktree_path: &Path, force: bool) -> Result<()> {
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        let path_arg = worktree_path.display().to_string();
        args.push(path_arg.as_str());

        let output = self.run_git(&args).await?;
        if output.success() {
            info!("Git worktree removed: {}", worktree_path.display());
            return Ok(());
        }

        if output.exit_code == 255 {
            warn!("Worktree remove refused; attempting manual cleanup");
            let _ = self.run_git(&["worktree", "prune"]).await;
            match std::fs::remove_dir_all(worktree_path) {
                Ok(()) => {
                    info!("Manually removed worktree directory: {}", worktree_path.display());
                    return Ok(());
                }
                Err(_) if !worktree_path.exists() => return Ok(()),
                Err(e) => {
                    return Err(GitError::PermissionDenied {
                        message: format!(
                            "could not remove {}: {e}; remove it manually and run worktree prune",
                            worktree_path.display()
                        ),
                    }
                    .into());
                }
            }
        }

        Err(GitError::CommandFailed {
            message: output.stderr.trim().to_string(),
        }
        .into())
    }

    /// Prune stale worktree registrations. Returns how many were prunable.
    pub async fn prune_worktrees(&self) -> Result<u32> {
        let output = self.run_git(&["worktree", "list"]).await?;
        let prunable = output
            .stdout_lines()
            .iter()
            .filter(|line| line.contains("prunable"))
            .count() as u32;
        if prunable == 0 {
            info!("No prunable worktrees found");
            return Ok(0);
        }
        let output = self.run_git(&["worktree", "prune"]).await?;
        if output.success() {
            info!("Pruned {prunable} worktree(s)");
            Ok(prunable)
        } else {
            Err(GitError::CommandFailed {
                message: output.stderr.trim().to_string(),
            }
            .into())
        }
    }

    /// Delete a branch, skipping protected and checked-out branches, and
    /// requiring a merged branch unless `force` is set.
    ///
    /// Returns whether the branch was actually deleted; skips that preserve
    /// the branch (checked out, unmerged without force, already gone) are not
    /// errors.
    #[instrument(skip(self))]
    pub async fn delete_branch_safely(&self, branch: &str, force: bool) -> Result<bool> {
        if !self.branch_exists(branch).await {
            debug!("Branch {branch} does not exist, skipping deletion");
            return Ok(false);
        }
        if self.current_branch().await.as_deref() == Some(branch) {
            warn!("Cannot delete branch {branch} - it is currently checked out");
            return Ok(false);
        }
        if is_protected_branch(branch) {
            return Err(GitError::ProtectedBranch {
                branch: branch.to_string(),
            }
            .into());
        }

        if !force && !self.branch_merged(branch).await {
            warn!("Branch {branch} has unmerged changes. Use --force to delete it anyway");
            return Ok(false);
        }

        let output = self.run_git(&["branch", "-d", branch]).await?;
        if output.success() {
            info!("Branch {branch} deleted");
            return Ok(true);
        }

        if force {
            let output = self.run_git(&["branch", "-D", branch]).await?;
            if output.success() {
                info!("Branch {branch} force deleted");
                return Ok(true);
            }
            warn!("Failed to force delete branch {branch}: {}", output.stderr.trim());
            return Ok(false);
        }

        warn!("Branch {branch} could not be deleted: {}", output.stderr.trim());
        Ok(false)
    }

    /// Produce a compressed tar of a worktree's HEAD tree.
    #[instrument(skip(self, worktree_path, output_path))]
    pub async fn archive_head(&self, worktree_path: &Path, output_path: &Path) -> Result<()> {
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let output = CommandSpec::new("git")
            .current_dir(worktree_path)
            .args(["archive", "--format=tar.gz"])
            .arg(format!("--output={}", output_path.display()))
            .arg("HEAD")
            .timeout(timeouts::COPY)
            .output()
            .await?;
        if output.success() {
            info!("Created git archive: {}", output_path.display());
            Ok(())
        } else {
            Err(GitError::CommandFailed {
                message: output.stderr.trim().to_string(),
            }
            .into())
        }
    }

    /// Read a global git config value.
    pub async fn global_config(&self, key: &str) -> Option<String> {
        let output = self
            .run_git(&["config", "--global", key])
            .await
            .ok()?;
        if output.success() && !output.stdout_trimmed().is_empty() {
            Some(output.stdout_trimmed().to_string())
        } else {
            None
        }
    }

    /// Set a global git config value. Best effort.
    pub async fn set_global_config(&self, key: &str, value: &str) {
        let result = self.run_git(&["config", "--global", key, value]).await;
        if let Err(e) = result {
            warn!("Failed to set git config {key}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_classify_worktree_add_errors() {
        let err = GitManager::classify_worktree_add_error(
            "beta",
            "fatal: 'worktrees/beta' already exists",
        );
        assert!(matches!(err, GitError::WorktreeExists { .. }));

        let err = GitManager::classify_worktree_add_error(
            "beta",
            "fatal: branch 'beta' is already checked out at '/x'",
        );
        assert!(matches!(err, GitError::WorktreeExists { .. }));

        let err =
            GitManager::classify_worktree_add_error("beta", "fatal: Permission denied: worktrees");
        assert!(matches!(err, GitError::PermissionDenied { .. }));

        let err = GitManager::classify_worktree_add_error("beta", "fatal: something else");
        assert!(matches!(err, GitError::CommandFailed { .. }));
    }

    #[test]
    fn test_classification_maps_to_kinds() {
        let err: crate::errors::DockertreeError =
            GitManager::classify_worktree_add_error("b", "already exists").into();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn test_is_git_repo_false_outside_repo() {
        let tmp = tempfile::TempDir::new().unwrap();
        let manager = GitManager::at(tmp.path());
        // A bare temp dir is not a repository (unless git itself is missing,
        // in which case the probe also reports false).
        assert!(!manager.is_git_repo().await || tmp.path().join(".git").exists());
    }

    #[tokio::test]
    async fn test_delete_protected_branch_is_refused() {
        let tmp = tempfile::TempDir::new().unwrap();
        // Build a real repository so branch_exists("main") can be true.
        for args in [
            vec!["init", "-b", "main"],
            vec!["-c", "user.email=t@t", "-c", "user.name=t", "commit", "--allow-empty", "-m", "x"],
            vec!["branch", "feature"],
            vec!["checkout", "feature"],
        ] {
            let status = std::process::Command::new("git")
                .args(&args)
                .current_dir(tmp.path())
                .output();
            if status.map(|o| !o.status.success()).unwrap_or(true) {
                // Host has no usable git; the protection check is covered by
                // the orchestrator-level tests.
                return;
            }
        }

        let manager = GitManager::at(tmp.path());
        let err = manager.delete_branch_safely("main", true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtectedBranch);
    }
}
