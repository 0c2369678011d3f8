//! Server-side import orchestration
//!
//! Runs on a remote host that just received a pushed package: detects or
//! bootstraps the project context, imports the package, restores volumes
//! that arrived empty, optionally rebuilds images, and brings the
//! environment up, verifying that containers actually stay running.

use crate::config::{ProjectContext, VolumeKind, DOCKERTREE_DIR};
use crate::errors::{DockertreeError, Result};
use crate::git::GitManager;
use crate::orchestrator::WorktreeOrchestrator;
use crate::package::{ImportOptions, PackageManager};
use crate::proxy::ProxyManager;
use crate::runtime::DockerCli;
use crate::volumes::VolumeManager;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Volumes below these sizes count as empty on verification.
const MIN_DATA_VOLUME_BYTES: u64 = 10_000;

/// Options for a remote import run.
#[derive(Debug, Clone, Default)]
pub struct ServerImportOptions {
    pub domain: Option<String>,
    pub ip: Option<String>,
    /// Rebuild images after import (clearing the builder cache first).
    pub build: bool,
    pub debug: bool,
    /// Bring the environment up after import.
    pub start: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerCounts {
    pub running: usize,
    pub total: usize,
    pub exited: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerImportOutcome {
    pub branch: String,
    pub project_root: PathBuf,
    pub standalone: bool,
    pub containers: Option<ContainerCounts>,
}

/// Remote-host counterpart of the package manager.
pub struct ServerImportOrchestrator {
    docker: DockerCli,
    /// Base directory used for standalone bootstraps.
    standalone_base: PathBuf,
}

impl ServerImportOrchestrator {
    pub fn new() -> Self {
        let standalone_base = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/root"));
        Self {
            docker: DockerCli::new(),
            standalone_base,
        }
    }

    pub fn with_standalone_base(standalone_base: impl Into<PathBuf>) -> Self {
        Self {
            docker: DockerCli::new(),
            standalone_base: standalone_base.into(),
        }
    }

    /// Locate an existing project by searching well-known base directories
    /// (bounded depth) for `.dockertree/config.yml`.
    pub fn find_existing_project(&self) -> Option<PathBuf> {
        let mut bases = vec![self.standalone_base.clone()];
        if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
            if !bases.contains(&home) {
                bases.push(home);
            }
        }
        for base in bases {
            if let Some(root) = find_project_under(&base, 3) {
                return Some(root);
            }
        }
        None
    }

    /// Set a default VCS identity when none is configured, so branch and
    /// worktree operations never fail on a fresh host.
    async fn ensure_git_identity(&self, project_root: &Path) {
        let git = GitManager::at(project_root);
        if git.global_config("user.email").await.is_none() {
            git.set_global_config("user.email", "dockertree@local").await;
            info!("Set git user.email to dockertree@local");
        }
        if git.global_config("user.name").await.is_none() {
            git.set_global_config("user.name", "Dockertree").await;
            info!("Set git user.name to Dockertree");
        }
    }

    /// Remove a stale worktree of the same branch before importing over it.
    async fn cleanup_existing_worktree(&self, ctx: &ProjectContext, branch: &str) -> Result<()> {
        let git = GitManager::new(ctx);
        let Some(worktree_path) = git.find_worktree_path(branch).await else {
            info!("No existing worktree found for branch '{branch}'");
            return Ok(());
        };
        if !worktree_path.exists() {
            let _ = git.prune_worktrees().await;
            return Ok(());
        }

        info!("Worktree for '{branch}' already exists at {}; cleaning up", worktree_path.display());
        let orchestrator = WorktreeOrchestrator::new(ctx.clone());
        match orchestrator.remove(branch, true, false).await {
            Ok(_) => {
                info!("Existing worktree and volumes removed");
                return Ok(());
            }
            Err(e) => warn!("Orchestrated removal failed ({e}); attempting manual cleanup"),
        }

        // Manual fallback: stop matching containers, delete the directory,
        // and prune stale registrations.
        if let Ok(containers) = self.docker.containers_matching(branch, false).await {
            for container in containers {
                let _ = self.docker.stop_container(&container).await;
            }
        }
        if worktree_path.exists() {
            std::fs::remove_dir_all(&worktree_path)?;
        }
        let _ = git.prune_worktrees().await;
        let _ = git.remove_worktree(&worktree_path, true).await;
        info!("Worktree cleanup completed");
        Ok(())
    }

    /// Verify the per-worktree volumes hold data; returns whether a restore
    /// from the package is needed.
    async fn volumes_need_restore(&self, ctx: &ProjectContext, branch: &str) -> bool {
        let mut need_restore = false;
        for (kind, volume) in ctx.volume_names(branch) {
            if !self.docker.volume_exists(&volume).await {
                warn!("Volume missing: {volume}");
                need_restore = true;
                continue;
            }
            let has_data = match kind {
                VolumeKind::Postgres => self
                    .docker
                    .postgres_volume_has_data(&volume)
                    .await
                    .unwrap_or(false),
                _ => {
                    self.docker.volume_size_bytes(&volume).await.unwrap_or(0)
                        >= MIN_DATA_VOLUME_BYTES
                }
            };
            if has_data {
                info!("Volume verified: {volume}");
            } else {
                warn!("Volume {volume} appears empty");
                need_restore = true;
            }
        }
        need_restore
    }

    async fn build_images(&self, ctx: &ProjectContext, branch: &str) -> Result<()> {
        info!("Rebuilding images for branch: {branch}");
        info!("Clearing builder cache...");
        self.docker.builder_prune().await;

        let orchestrator = WorktreeOrchestrator::new(ctx.clone());
        info!("Building images...");
        match orchestrator
            .compose_passthrough(branch, &["build".to_string()])
            .await
        {
            Ok(_) => {
                info!("Images rebuilt");
                return Ok(());
            }
            Err(e) => warn!("Build failed ({e}), retrying with --no-cache..."),
        }
        orchestrator
            .compose_passthrough(branch, &["build".to_string(), "--no-cache".to_string()])
            .await
            .map(|_| ())
    }

    /// Bring the imported environment up.
    ///
    /// Normal mode goes through the orchestrator (proxy, env files, label
    /// reconfiguration). Standalone mode drives compose directly against the
    /// worktree's files, recreating containers so stale ones from a previous
    /// deployment never survive.
    async fn start_services(&self, ctx: &ProjectContext, branch: &str, standalone: bool) -> Result<()> {
        let orchestrator = WorktreeOrchestrator::new(ctx.clone());
        let _ = orchestrator.stop(branch, false).await;

        if !standalone {
            orchestrator.start(branch).await.map(|_| ())
        } else {
            let worktree_path = ctx.worktree_path(branch);
            let compose_file = crate::workspace::compose_override_path(&worktree_path, &ctx.root)
                .ok_or_else(|| crate::errors::ComposeError::FileNotFound {
                    path: worktree_path.display().to_string(),
                })?;
            crate::compose::ComposeCommand::new(compose_file, &worktree_path)
                .with_env_file(crate::workspace::env_dockertree_path(&worktree_path))
                .with_project_name(ctx.compose_project_name(branch))
                .up_force_recreate()
                .await
        }
    }

    async fn container_counts(&self, compose_project: &str) -> ContainerCounts {
        let all = self
            .docker
            .compose_project_containers(compose_project, true)
            .await
            .unwrap_or_default();
        let running = all.iter().filter(|c| c.state == "running").count();
        let exited = self
            .docker
            .exited_containers_matching(compose_project)
            .await
            .unwrap_or_default();
        ContainerCounts {
            running,
            total: all.len(),
            exited: exited.len(),
        }
    }

    /// Import a pushed package and bring the environment up.
    #[instrument(skip(self, package_path, options))]
    pub async fn import_and_start(
        &self,
        package_path: &Path,
        branch: &str,
        options: &ServerImportOptions,
    ) -> Result<ServerImportOutcome> {
        info!("=== Starting remote import process ===");
        info!("Package file: {}", package_path.display());
        info!("Branch name: {branch}");

        if !package_path.exists() {
            return Err(crate::errors::PackageError::NotFound {
                path: package_path.display().to_string(),
            }
            .into());
        }

        let existing_project = self.find_existing_project();
        let standalone = existing_project.is_none();
        let project_root = existing_project.unwrap_or_else(|| {
            info!("No existing project found, using standalone mode");
            self.standalone_base.clone()
        });
        self.ensure_git_identity(&project_root).await;

        let ctx = ProjectContext::new(project_root);
        if !standalone {
            info!("Found existing project at: {}", ctx.root.display());
            self.cleanup_existing_worktree(&ctx, branch).await?;
        }

        info!(
            "Importing package in {} mode...",
            if standalone { "standalone" } else { "normal" }
        );
        let import_outcome = PackageManager::new(ctx.clone())
            .import(
                package_path,
                &ImportOptions {
                    target_branch: Some(branch.to_string()),
                    restore_data: true,
                    standalone: Some(standalone),
                    target_directory: standalone.then(|| self.standalone_base.clone()),
                    domain: options.domain.clone(),
                    ip: options.ip.clone(),
                    debug: options.debug,
                    non_interactive: true,
                },
            )
            .await?;

        // The project root may have been created by the standalone bootstrap.
        let ctx = ProjectContext::new(import_outcome.project_root.clone());
        info!("Import completed, project located at: {}", ctx.root.display());

        info!("Starting shared proxy...");
        let proxy = ProxyManager::new(&ctx);
        if let Err(e) = proxy.start().await {
            warn!("Failed to start proxy, continuing: {e}");
        }
        tokio::time::sleep(Duration::from_secs(2)).await;

        if self.volumes_need_restore(&ctx, branch).await {
            info!("Restoring volumes from package...");
            if let Err(e) = VolumeManager::new(&ctx)
                .restore_volumes(branch, package_path)
                .await
            {
                warn!("Volume restoration had issues, continuing: {e}");
            }
        } else {
            info!("All volumes verified");
        }

        if options.build {
            self.build_images(&ctx, branch).await?;
        }

        let mut containers = None;
        if options.start {
            info!("Bringing up worktree environment for branch: {branch}");
            self.start_services(&ctx, branch, standalone).await?;

            tokio::time::sleep(Duration::from_secs(5)).await;
            let counts = self
                .container_counts(&ctx.compose_project_name(branch))
                .await;
            info!(
                "Container status: {} running out of {} total",
                counts.running, counts.total
            );

            if counts.exited > 0 {
                warn!("Found {} exited container(s)", counts.exited);
                let exited = self
                    .docker
                    .exited_containers_matching(&ctx.compose_project_name(branch))
                    .await
                    .unwrap_or_default();
                for container in exited {
                    if let Ok(logs) = self.docker.logs_tail(&container, 50).await {
                        for line in logs.lines().take(20) {
                            warn!("[{container}] {line}");
                        }
                    }
                }
            }
            if counts.running == 0 {
                return Err(DockertreeError::other(
                    "no containers are running - deployment may have failed",
                ));
            }
            containers = Some(counts);
        }

        info!("=== Remote import process completed ===");
        Ok(ServerImportOutcome {
            branch: branch.to_string(),
            project_root: ctx.root.clone(),
            standalone,
            containers,
        })
    }
}

impl Default for ServerImportOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

/// Breadth-limited search for a `.dockertree/config.yml` under a base path.
fn find_project_under(base: &Path, max_depth: u32) -> Option<PathBuf> {
    if !base.is_dir() {
        return None;
    }
    if base.join(DOCKERTREE_DIR).join("config.yml").is_file() {
        return Some(base.to_path_buf());
    }
    if max_depth == 0 {
        return None;
    }
    let entries = std::fs::read_dir(base).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        // Skip hidden directories; a project root is never inside one.
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(true)
        {
            continue;
        }
        if let Some(found) = find_project_under(&path, max_depth - 1) {
            return Some(found);
        }
    }
    None
}
