//! Worktree orchestration
//!
//! The top-level state machine for a branch environment: create, start,
//! stop, remove, delete, list, info. Operations compose the git, volume,
//! environment, and proxy managers and return structured outcomes; every
//! failure carries a classified error kind so programmatic callers never see
//! a raw panic or an unclassified message.

use crate::compose::ComposeCommand;
use crate::config::{
    is_protected_branch, is_reserved_name, is_valid_branch_name, ProjectContext, DOCKERTREE_DIR,
};
use crate::environment::EnvironmentManager;
use crate::errors::{ComposeError, GitError, Result};
use crate::git::{GitManager, WorktreeEntry};
use crate::proxy::ProxyManager;
use crate::runtime::{ContainerStatus, DockerCli, ExecOutput};
use crate::volumes::{VolumeInfo, VolumeManager};
use crate::workspace::{compose_override_path, copy_dir_filtered, env_dockertree_path};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// README placed into each worktree's `.dockertree/` copy.
const WORKTREE_README: &str = "\
# .dockertree

Per-branch environment configuration. `config.yml` and the transformed
compose document are regenerated from the project configuration; the
`env.dockertree` file scopes container names, volumes, ports, and domains to
this branch. Run commands from inside this worktree to operate on it as its
own project root.
";

/// Delay between container startup and label-based proxy reconfiguration.
const PROXY_REGISTER_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct CreateOutcome {
    pub branch: String,
    pub worktree_path: PathBuf,
    pub status: CreateStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateStatus {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub branch: String,
    pub worktree_path: PathBuf,
    pub compose_project_name: String,
    pub domain_name: String,
    pub proxy_configured: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopOutcome {
    pub branch: String,
    pub status: StopStatus,
    pub images_removed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopStatus {
    Stopped,
    NotFound,
    NoCompose,
    NoFiles,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveOutcome {
    pub branch: String,
    pub action: RemoveAction,
    pub worktree_removed: bool,
    pub volumes_removed: bool,
    pub branch_deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoveAction {
    Removed,
    BranchDeleted,
    BranchPreserved,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorktreeSummary {
    pub branch: String,
    pub path: PathBuf,
    pub commit: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoOutcome {
    pub branch: String,
    pub worktree_path: PathBuf,
    pub status: String,
    pub containers: Vec<ContainerStatus>,
    pub volumes: Vec<VolumeInfo>,
    pub domain_name: String,
    pub access_url: String,
    pub project_name: String,
}

/// The branch-environment state machine for one project.
pub struct WorktreeOrchestrator {
    ctx: ProjectContext,
    docker: DockerCli,
}

impl WorktreeOrchestrator {
    pub fn new(ctx: ProjectContext) -> Self {
        Self {
            ctx,
            docker: DockerCli::new(),
        }
    }

    pub fn context(&self) -> &ProjectContext {
        &self.ctx
    }

    fn git(&self) -> GitManager {
        GitManager::new(&self.ctx)
    }

    fn volumes(&self) -> VolumeManager<'_> {
        VolumeManager::new(&self.ctx)
    }

    fn env(&self) -> EnvironmentManager<'_> {
        EnvironmentManager::new(&self.ctx)
    }

    fn validate_branch_name(&self, branch: &str) -> Result<()> {
        if branch.is_empty() || !is_valid_branch_name(branch) {
            return Err(GitError::InvalidBranchName {
                branch: branch.to_string(),
            }
            .into());
        }
        if is_reserved_name(branch) {
            return Err(GitError::ReservedName {
                name: branch.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// The true project root, respecting fractal worktree configs: the
    /// nearest ancestor of the context root carrying a config file.
    fn true_project_root(&self) -> PathBuf {
        crate::workspace::find_project_root(&self.ctx.root)
    }

    fn copy_dockertree_into_worktree(&self, worktree_path: &std::path::Path) -> bool {
        let source = self.true_project_root().join(DOCKERTREE_DIR);
        let target = worktree_path.join(DOCKERTREE_DIR);
        if !source.exists() {
            return false;
        }
        if target.exists() {
            return true;
        }
        let worktree_dir = self.ctx.worktree_dir().to_string();
        if let Err(e) = copy_dir_filtered(&source, &target, &|name| name == worktree_dir) {
            warn!("Failed to copy .dockertree into worktree: {e}");
            return false;
        }
        let readme = target.join("README.md");
        if !readme.exists() {
            let _ = std::fs::write(&readme, WORKTREE_README);
        }
        true
    }

    /// Create a branch environment: branch, linked checkout, configuration
    /// copy, cloned volumes, env files.
    #[instrument(skip(self))]
    pub async fn create(&self, branch: &str) -> Result<CreateOutcome> {
        self.validate_branch_name(branch)?;
        let git = self.git();

        let vcs_entry = git.worktree_exists(branch).await;
        let registered_path = git.find_worktree_path(branch).await;
        let default_path = self.ctx.worktree_path(branch);

        if vcs_entry {
            match &registered_path {
                Some(path) if path.exists() => {
                    return Ok(CreateOutcome {
                        branch: branch.to_string(),
                        worktree_path: path.clone(),
                        status: CreateStatus::AlreadyExists,
                    });
                }
                _ => {
                    return Err(GitError::CorruptedWorktree {
                        branch: branch.to_string(),
                        message: "worktree is registered but its directory is missing".to_string(),
                    }
                    .into());
                }
            }
        }
        if default_path.exists() {
            return Err(GitError::CorruptedWorktree {
                branch: branch.to_string(),
                message: format!(
                    "directory {} exists but no worktree is registered for it",
                    default_path.display()
                ),
            }
            .into());
        }

        git.create_branch(branch).await?;
        match git.create_worktree(branch, &default_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == crate::errors::ErrorKind::AlreadyExists => {
                // Lost a race; resolve to wherever the worktree actually is.
                match git.find_worktree_path(branch).await {
                    Some(path) => {
                        return Ok(CreateOutcome {
                            branch: branch.to_string(),
                            worktree_path: path,
                            status: CreateStatus::AlreadyExists,
                        });
                    }
                    None => {
                        return Err(GitError::CorruptedWorktree {
                            branch: branch.to_string(),
                            message: "worktree exists but its path could not be resolved"
                                .to_string(),
                        }
                        .into());
                    }
                }
            }
            Err(e) => return Err(e),
        }

        let copied = self.copy_dockertree_into_worktree(&default_path);
        if !copied {
            warn!("No .dockertree configuration copied into worktree for {branch}");
        }

        self.volumes().create_worktree_volumes(branch, true).await?;
        self.env()
            .create_worktree_env(branch, &default_path, None, None)?;

        info!("Worktree created for {branch}");
        Ok(CreateOutcome {
            branch: branch.to_string(),
            worktree_path: default_path,
            status: CreateStatus::Created,
        })
    }

    /// Start a branch environment: volumes, network, proxy, env files,
    /// containers, proxy reconfiguration — in that order.
    #[instrument(skip(self))]
    pub async fn start(&self, branch: &str) -> Result<StartOutcome> {
        let git = self.git();
        if !git.worktree_exists(branch).await {
            return Err(GitError::WorktreeNotFound {
                branch: branch.to_string(),
            }
            .into());
        }
        let worktree_path = git.find_worktree_path(branch).await.ok_or_else(|| {
            GitError::CorruptedWorktree {
                branch: branch.to_string(),
                message: "worktree path could not be resolved".to_string(),
            }
        })?;

        let compose_file =
            compose_override_path(&worktree_path, &self.ctx.root).ok_or_else(|| {
                ComposeError::FileNotFound {
                    path: worktree_path
                        .join(DOCKERTREE_DIR)
                        .join(crate::config::COMPOSE_WORKTREE_FILE)
                        .display()
                        .to_string(),
                }
            })?;

        self.docker.ping().await?;

        // Non-destructive: volumes that already hold data are left alone.
        self.volumes().create_worktree_volumes(branch, false).await?;

        self.docker.create_network(self.ctx.caddy_network()).await?;

        let proxy = ProxyManager::new(&self.ctx);
        if !proxy.is_running().await {
            proxy.start().await?;
        }

        let env_file = env_dockertree_path(&worktree_path);
        if !self.env().environment_files_exist(&worktree_path) {
            self.env()
                .create_worktree_env(branch, &worktree_path, None, None)?;
        }

        let compose_project_name = self.ctx.compose_project_name(branch);
        ComposeCommand::new(&compose_file, &worktree_path)
            .with_env_file(&env_file)
            .with_project_name(&compose_project_name)
            .up_detached()
            .await?;

        // Give containers time to register their labels before reconfiguring.
        tokio::time::sleep(PROXY_REGISTER_DELAY).await;
        let proxy_configured = proxy.reconfigure().await;

        Ok(StartOutcome {
            branch: branch.to_string(),
            worktree_path,
            domain_name: self.env().domain_name(branch),
            compose_project_name,
            proxy_configured,
        })
    }

    /// Stop a branch environment. Tolerant: a missing worktree, compose
    /// file, or env file reports its status instead of failing, so stop is
    /// always safe to call during cleanup.
    #[instrument(skip(self))]
    pub async fn stop(&self, branch: &str, remove_images: bool) -> Result<StopOutcome> {
        let outcome = |status| StopOutcome {
            branch: branch.to_string(),
            status,
            images_removed: remove_images,
        };

        let git = self.git();
        if !git.worktree_exists(branch).await {
            return Ok(outcome(StopStatus::NotFound));
        }
        let Some(worktree_path) = git.find_worktree_path(branch).await else {
            return Ok(outcome(StopStatus::NotFound));
        };
        let Some(compose_file) = compose_override_path(&worktree_path, &self.ctx.root) else {
            return Ok(outcome(StopStatus::NoCompose));
        };
        let env_file = env_dockertree_path(&worktree_path);
        if !compose_file.is_file() || !env_file.is_file() {
            return Ok(outcome(StopStatus::NoFiles));
        }

        ComposeCommand::new(&compose_file, &worktree_path)
            .with_env_file(&env_file)
            .with_project_name(self.ctx.compose_project_name(branch))
            .down(remove_images)
            .await?;

        Ok(outcome(StopStatus::Stopped))
    }

    /// Remove a branch environment, optionally deleting the branch.
    ///
    /// Strict exact-match validation: at least one of worktree, branch, or
    /// per-worktree volumes must exist for the given name.
    #[instrument(skip(self))]
    pub async fn remove(
        &self,
        branch: &str,
        force: bool,
        delete_branch: bool,
    ) -> Result<RemoveOutcome> {
        if branch.is_empty() {
            return Err(GitError::InvalidBranchName {
                branch: branch.to_string(),
            }
            .into());
        }
        if delete_branch && is_protected_branch(branch) {
            return Err(GitError::ProtectedBranch {
                branch: branch.to_string(),
            }
            .into());
        }

        let git = self.git();
        let worktree_exists = git.worktree_exists(branch).await;
        let branch_exists = git.branch_exists(branch).await;
        let mut existing_volumes = Vec::new();
        for (_, name) in self.ctx.volume_names(branch) {
            if self.docker.volume_exists(&name).await {
                existing_volumes.push(name);
            }
        }

        if !worktree_exists && !branch_exists && existing_volumes.is_empty() {
            return Err(GitError::WorktreeNotFound {
                branch: branch.to_string(),
            }
            .into());
        }

        info!("Found for branch '{branch}':");
        if worktree_exists {
            info!("  - worktree at {:?}", git.find_worktree_path(branch).await);
        }
        if branch_exists {
            info!("  - git branch {branch}");
        }
        if !existing_volumes.is_empty() {
            info!("  - docker volumes: {}", existing_volumes.join(", "));
        }

        // Branch without a worktree: only the branch itself is in play.
        if !worktree_exists && existing_volumes.is_empty() {
            if delete_branch {
                let deleted = git.delete_branch_safely(branch, force).await?;
                return Ok(RemoveOutcome {
                    branch: branch.to_string(),
                    action: RemoveAction::BranchDeleted,
                    worktree_removed: false,
                    volumes_removed: false,
                    branch_deleted: deleted,
                });
            }
            return Ok(RemoveOutcome {
                branch: branch.to_string(),
                action: RemoveAction::BranchPreserved,
                worktree_removed: false,
                volumes_removed: false,
                branch_deleted: false,
            });
        }

        // Stop first; a failed stop must not block removal.
        if let Err(e) = self.stop(branch, true).await {
            warn!("Failed to stop environment before removal: {e}");
        }

        let volumes_removed = match self.volumes().remove_volumes(branch).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Volume removal incomplete: {e}");
                false
            }
        };

        let mut worktree_removed = false;
        if worktree_exists {
            if let Some(worktree_path) = git.find_worktree_path(branch).await {
                git.remove_worktree(&worktree_path, true).await?;
                worktree_removed = true;
            }
        }

        let branch_deleted = if delete_branch {
            git.delete_branch_safely(branch, force).await?
        } else {
            false
        };

        info!("Successfully removed worktree '{branch}'");
        Ok(RemoveOutcome {
            branch: branch.to_string(),
            action: RemoveAction::Removed,
            worktree_removed,
            volumes_removed,
            branch_deleted,
        })
    }

    /// Remove the environment and delete its branch.
    pub async fn delete(&self, branch: &str, force: bool) -> Result<RemoveOutcome> {
        self.remove(branch, force, true).await
    }

    /// All worktrees known to the VCS.
    pub async fn list(&self) -> Result<Vec<WorktreeSummary>> {
        let entries = self.git().list_worktrees().await?;
        Ok(entries
            .into_iter()
            .map(|WorktreeEntry { path, commit, branch }| WorktreeSummary {
                branch,
                path,
                commit,
                status: "active".to_string(),
            })
            .collect())
    }

    /// Detailed state of one branch environment.
    #[instrument(skip(self))]
    pub async fn info(&self, branch: &str) -> Result<InfoOutcome> {
        let git = self.git();
        if !git.worktree_exists(branch).await {
            return Err(GitError::WorktreeNotFound {
                branch: branch.to_string(),
            }
            .into());
        }
        let worktree_path = git
            .find_worktree_path(branch)
            .await
            .unwrap_or_else(|| self.ctx.worktree_path(branch));

        let project = self.ctx.compose_project_name(branch);
        let containers = self
            .docker
            .compose_project_containers(&project, true)
            .await
            .unwrap_or_default();
        let running = containers.iter().any(|c| c.state == "running");
        let volumes = self.volumes().worktree_volumes(branch).await;

        Ok(InfoOutcome {
            branch: branch.to_string(),
            worktree_path,
            status: if running { "running" } else { "stopped" }.to_string(),
            containers,
            volumes,
            domain_name: self.env().domain_name(branch),
            access_url: self.env().access_url(branch),
            project_name: self.ctx.project_name().to_string(),
        })
    }

    /// Run arbitrary compose arguments against a worktree, with the override
    /// file, scoped env file, and project name resolved automatically.
    #[instrument(skip(self, args))]
    pub async fn compose_passthrough(&self, branch: &str, args: &[String]) -> Result<ExecOutput> {
        let git = self.git();
        if !git.worktree_exists(branch).await {
            return Err(GitError::WorktreeNotFound {
                branch: branch.to_string(),
            }
            .into());
        }
        let worktree_path = git.find_worktree_path(branch).await.ok_or_else(|| {
            GitError::WorktreeNotFound {
                branch: branch.to_string(),
            }
        })?;
        let compose_file =
            compose_override_path(&worktree_path, &self.ctx.root).ok_or_else(|| {
                ComposeError::FileNotFound {
                    path: worktree_path.join(DOCKERTREE_DIR).display().to_string(),
                }
            })?;
        let env_file = env_dockertree_path(&worktree_path);

        ComposeCommand::new(&compose_file, &worktree_path)
            .with_env_file(env_file)
            .with_project_name(self.ctx.compose_project_name(branch))
            .passthrough(args)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use crate::errors::ErrorKind;
    use tempfile::TempDir;

    fn orchestrator(tmp: &TempDir) -> WorktreeOrchestrator {
        let root = tmp.path().join("myapp");
        std::fs::create_dir_all(&root).unwrap();
        let mut config = ProjectConfig::default_for(&root);
        config.project_name = "myapp".to_string();
        WorktreeOrchestrator::new(ProjectContext { root, config })
    }

    #[tokio::test]
    async fn test_create_rejects_reserved_names() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator(&tmp);
        for name in ["volumes", "start-proxy", "setup"] {
            let err = orch.create(name).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ReservedName, "{name}");
        }
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_names() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator(&tmp);
        for name in ["", "bad name", "semi;colon"] {
            let err = orch.create(name).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidBranchName, "{name:?}");
        }
    }

    #[tokio::test]
    async fn test_create_flags_untracked_directory_as_corrupted() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator(&tmp);
        // A directory at the worktree location with no VCS registration.
        std::fs::create_dir_all(orch.context().worktree_path("ghost")).unwrap();

        let err = orch.create("ghost").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptedWorktree);
    }

    #[tokio::test]
    async fn test_remove_protected_branch_is_refused() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator(&tmp);
        for branch in ["main", "master", "develop", "production", "staging"] {
            let err = orch.remove(branch, false, true).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ProtectedBranch, "{branch}");
        }
    }

    #[tokio::test]
    async fn test_remove_unknown_branch_not_found() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator(&tmp);
        let err = orch.remove("no-such-branch", false, false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_stop_missing_worktree_reports_status() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator(&tmp);
        let outcome = orch.stop("missing", false).await.unwrap();
        assert_eq!(outcome.status, StopStatus::NotFound);

        // Stop is idempotent for missing environments.
        let again = orch.stop("missing", false).await.unwrap();
        assert_eq!(again.status, StopStatus::NotFound);
    }
}
