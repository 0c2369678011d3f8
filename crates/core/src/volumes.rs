//! Volume lifecycle management
//!
//! Clone, back up, restore, and remove the named data volumes of a worktree.
//! Every destructive operation follows the same discipline: stop the
//! containers that hold the volume, operate with file-level copies through a
//! throwaway helper container, then restart. Restarts after backup/restore
//! run as bounded background tasks so the primary return path never blocks
//! on container startup.

use crate::compose::ComposeCommand;
use crate::config::{ProjectContext, VolumeKind};
use crate::errors::{DockerError, Result};
use crate::runtime::DockerCli;
use crate::transform;
use crate::workspace::{compose_override_path, env_dockertree_path};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Volumes smaller than this are treated as empty/uninitialized on restore.
const EMPTY_VOLUME_THRESHOLD_BYTES: u64 = 10_000;

/// Outcome counts of a volume restore.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RestoreSummary {
    pub restored: u32,
    pub skipped: u32,
    pub failed: u32,
}

/// Per-volume status used by worktree info.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VolumeInfo {
    pub name: String,
    pub kind: VolumeKind,
    pub exists: bool,
}

/// Volume manager for one project.
pub struct VolumeManager<'a> {
    ctx: &'a ProjectContext,
    docker: DockerCli,
}

impl<'a> VolumeManager<'a> {
    pub fn new(ctx: &'a ProjectContext) -> Self {
        Self {
            ctx,
            docker: DockerCli::new(),
        }
    }

    /// Create per-worktree volumes by cloning the canonical source volumes.
    ///
    /// Non-destructive: when every target volume already exists and
    /// `force_copy` is not set, nothing is touched — existing volumes may
    /// hold restored backup data. When cloning, the canonical container
    /// holding the source postgres volume is stopped for the duration of all
    /// clones and restarted once afterwards.
    #[instrument(skip(self))]
    pub async fn create_worktree_volumes(&self, branch: &str, force_copy: bool) -> Result<()> {
        let targets = self.ctx.volume_names(branch);
        let mut all_exist = true;
        for (_, name) in &targets {
            if !self.docker.volume_exists(name).await {
                all_exist = false;
                break;
            }
        }

        if all_exist && !force_copy {
            info!("Worktree volumes already exist for {branch}, skipping creation (non-destructive)");
            return Ok(());
        }
        info!(
            "{} worktree-specific volumes for {branch}",
            if all_exist { "Recreating" } else { "Creating" }
        );

        // Stop the canonical database container so postgres files copy
        // consistently. One stop covers every clone.
        let source_postgres = self.ctx.source_volume_name(VolumeKind::Postgres);
        let stopped = self.stop_containers_using(&source_postgres).await;

        let mut failures = Vec::new();
        for (kind, target) in &targets {
            let source = self.ctx.source_volume_name(*kind);
            if let Err(e) = self.copy_volume(&source, target).await {
                warn!("Failed to clone {source} -> {target}: {e}");
                failures.push(target.clone());
            }
        }

        for container in &stopped {
            if let Err(e) = self.docker.start_container(container).await {
                warn!("Failed to restart container {container}: {e}");
            }
        }

        if failures.is_empty() {
            info!("Worktree volumes created for {branch}");
            Ok(())
        } else {
            Err(DockerError::CommandFailed {
                message: format!("failed to clone volumes: {}", failures.join(", ")),
            }
            .into())
        }
    }

    /// Copy one volume's file tree into another. A missing source yields an
    /// empty target volume rather than an error.
    pub async fn copy_volume(&self, source: &str, target: &str) -> Result<()> {
        info!("Copying volume {source} to {target}...");
        if !self.docker.volume_exists(source).await {
            warn!("Source volume {source} does not exist, creating empty target volume");
            return self.docker.create_volume(target).await;
        }
        self.docker.create_volume(target).await?;
        self.docker.copy_volume_files(source, target).await
    }

    async fn stop_containers_using(&self, volume: &str) -> Vec<String> {
        let running = match self.docker.running_containers_using_volume(volume).await {
            Ok(containers) => containers,
            Err(_) => return Vec::new(),
        };
        let mut stopped = Vec::new();
        for container in running {
            info!("Stopping container {container} before volume operation...");
            match self.docker.stop_container(&container).await {
                Ok(()) => stopped.push(container),
                Err(e) => warn!("Failed to stop container {container}: {e}"),
            }
        }
        stopped
    }

    /// Remove the worktree's volumes. Shared proxy volumes are never part of
    /// the per-worktree set, so they cannot be touched here.
    #[instrument(skip(self))]
    pub async fn remove_volumes(&self, branch: &str) -> Result<()> {
        info!("Removing worktree-specific volumes for {branch}");
        let mut failures = Vec::new();
        for (_, name) in self.ctx.volume_names(branch) {
            if !self.docker.volume_exists(&name).await {
                warn!("Volume {name} not found");
                continue;
            }
            match self.docker.remove_volume(&name).await {
                Ok(()) => info!("Removed volume: {name}"),
                Err(e) => {
                    warn!("Failed to remove volume {name}: {e}");
                    failures.push(name);
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DockerError::CommandFailed {
                message: format!("failed to remove volumes: {}", failures.join(", ")),
            }
            .into())
        }
    }

    /// Whether any of the worktree's compose containers are running.
    pub async fn is_worktree_running(&self, branch: &str) -> bool {
        let project = self.ctx.compose_project_name(branch);
        match self.docker.compose_project_containers(&project, false).await {
            Ok(containers) => !containers.is_empty(),
            Err(_) => false,
        }
    }

    /// Back up the worktree's volumes into `{backup_dir}/backup_{branch}.tar`.
    ///
    /// Containers are stopped first when running and restarted in a bounded
    /// background task after the archive is written (or after a failure).
    #[instrument(skip(self, backup_dir))]
    pub async fn backup_volumes(&self, branch: &str, backup_dir: &Path) -> Result<PathBuf> {
        let backup_file = backup_dir.join(format!("backup_{branch}.tar"));
        info!("Backing up volumes for {branch} to {}", backup_file.display());

        let was_running = self.is_worktree_running(branch).await;
        if was_running {
            info!("Worktree containers are running, stopping them before backup...");
            if let Err(e) = self.stop_worktree_containers(branch).await {
                warn!("Failed to stop containers, continuing with backup: {e}");
            }
        }

        std::fs::create_dir_all(backup_dir)?;
        let temp_backup_dir = backup_dir.join("temp_backup");
        std::fs::create_dir_all(&temp_backup_dir)?;

        let result = self.backup_into(branch, &temp_backup_dir, &backup_file).await;
        let _ = std::fs::remove_dir_all(&temp_backup_dir);

        if was_running {
            self.schedule_restart(branch);
        }

        match result {
            Ok(()) => {
                info!("Backup created: {}", backup_file.display());
                Ok(backup_file)
            }
            Err(e) => {
                let _ = std::fs::remove_file(&backup_file);
                Err(e)
            }
        }
    }

    async fn backup_into(
        &self,
        branch: &str,
        temp_backup_dir: &Path,
        backup_file: &Path,
    ) -> Result<()> {
        let host_dir = temp_backup_dir
            .canonicalize()
            .unwrap_or_else(|_| temp_backup_dir.to_path_buf());

        for (kind, volume) in self.ctx.volume_names(branch) {
            if !self.docker.volume_exists(&volume).await {
                warn!("Volume {volume} not found, skipping");
                continue;
            }
            info!("Backing up volume: {volume} ({kind})");
            let file_name = format!("{volume}.tar.gz");
            if let Err(e) = self.docker.archive_volume(&volume, &host_dir, &file_name).await {
                warn!("Failed to back up volume {volume}: {e}");
            }
        }

        // Combine the per-volume archives into one gzip-compressed tar. The
        // `.tar` name is kept for compatibility with existing packages.
        let file = std::fs::File::create(backup_file)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all(".", temp_backup_dir)?;
        builder.into_inner()?.finish()?;
        Ok(())
    }

    /// Best-effort `compose down` before restore. Non-fatal on failure.
    pub async fn ensure_containers_stopped_before_restore(
        &self,
        branch: &str,
        worktree_path: &Path,
    ) -> bool {
        let Some(compose_file) = compose_override_path(worktree_path, &self.ctx.root) else {
            // No compose file means no containers to stop.
            return true;
        };
        info!("Ensuring containers are stopped before volume restoration...");
        let command = ComposeCommand::new(compose_file, worktree_path)
            .with_env_file(env_dockertree_path(worktree_path))
            .with_project_name(self.ctx.compose_project_name(branch));
        match command.down(false).await {
            Ok(()) => {
                info!("Containers stopped");
                true
            }
            Err(e) => {
                warn!("Could not stop containers before restore: {e}");
                true
            }
        }
    }

    async fn stop_worktree_containers(&self, branch: &str) -> Result<()> {
        let worktree_path = self.ctx.worktree_path(branch);
        self.ensure_containers_stopped_before_restore(branch, &worktree_path)
            .await;
        Ok(())
    }

    /// Restore the worktree's volumes from a backup archive or a full
    /// package file (whose nested backup tar is unwrapped automatically).
    #[instrument(skip(self, backup_file))]
    pub async fn restore_volumes(&self, branch: &str, backup_file: &Path) -> Result<RestoreSummary> {
        if !backup_file.exists() {
            return Err(DockerError::NotFound {
                name: backup_file.display().to_string(),
            }
            .into());
        }
        let size_mb = backup_file.metadata()?.len() as f64 / (1024.0 * 1024.0);
        info!(
            "Restoring volumes for {branch} from {} ({size_mb:.2} MB)",
            backup_file.display()
        );

        let was_running = self.is_worktree_running(branch).await;
        if was_running {
            info!("Worktree containers are running, stopping them before restore...");
            if let Err(e) = self.stop_worktree_containers(branch).await {
                warn!("Failed to stop containers, continuing with restore: {e}");
            }
        }

        let restore_temp_dir = backup_file
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("restore_temp");
        std::fs::create_dir_all(&restore_temp_dir)?;

        let result = self.restore_from(branch, backup_file, &restore_temp_dir).await;
        let _ = std::fs::remove_dir_all(&restore_temp_dir);

        if was_running {
            self.schedule_restart(branch);
        }
        result
    }

    async fn restore_from(
        &self,
        branch: &str,
        backup_file: &Path,
        restore_temp_dir: &Path,
    ) -> Result<RestoreSummary> {
        extract_tar_gz(backup_file, restore_temp_dir)?;

        let is_package = backup_file
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(".dockertree-package.tar.gz"))
            .unwrap_or(false);
        if is_package {
            info!("Detected package file, extracting nested backup archive...");
            match find_file_recursive(restore_temp_dir, &format!("backup_{branch}.tar"))
                .or_else(|| find_file_by_prefix(restore_temp_dir, "backup_", ".tar"))
            {
                Some(nested) => {
                    info!("Found nested backup archive: {}", nested.display());
                    extract_tar_gz(&nested, restore_temp_dir)?;
                }
                None => warn!("No nested backup archive found in package file"),
            }
        }

        let available: Vec<PathBuf> = std::fs::read_dir(restore_temp_dir)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.ends_with(".tar.gz"))
                        .unwrap_or(false)
            })
            .collect();
        info!("Found {} file backup(s) in archive", available.len());

        let host_dir = restore_temp_dir
            .canonicalize()
            .unwrap_or_else(|_| restore_temp_dir.to_path_buf());

        let mut summary = RestoreSummary::default();
        for (kind, volume) in self.ctx.volume_names(branch) {
            let Some(archive) = locate_volume_archive(&available, &volume, kind) else {
                warn!("Volume backup for {volume} not found in backup archive");
                summary.skipped += 1;
                continue;
            };
            let archive_name = archive
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            info!("Restoring volume: {volume} ({kind}) from {archive_name}");

            match self.prepare_target_volume(&volume, kind).await {
                TargetDisposition::Skip => {
                    summary.skipped += 1;
                    continue;
                }
                TargetDisposition::Ready => {}
            }

            if let Err(e) = self.docker.create_volume(&volume).await {
                warn!("Failed to create volume {volume}: {e}");
                summary.failed += 1;
                continue;
            }
            match self
                .docker
                .restore_volume_archive(&volume, &host_dir, &archive_name)
                .await
            {
                Ok(()) => {
                    match self.docker.volume_size_human(&volume).await {
                        Ok(size) => info!("Volume {volume} restored (data size: {size})"),
                        Err(_) => info!("Volume {volume} restored"),
                    }
                    summary.restored += 1;
                }
                Err(e) => {
                    warn!("Failed to restore volume {volume}: {e}");
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Volume restoration summary: restored={} skipped={} failed={}",
            summary.restored, summary.skipped, summary.failed
        );
        if summary.failed > 0 {
            return Err(DockerError::CommandFailed {
                message: format!("failed to restore {} volume(s)", summary.failed),
            }
            .into());
        }
        if summary.restored == 0 && !available.is_empty() {
            warn!(
                "No volumes were restored despite {} backup file(s); \
                 volume names may not match this project",
                available.len()
            );
        }
        Ok(summary)
    }

    /// Decide what to do with an existing target volume before restore.
    ///
    /// Empty or init-only volumes are removed so real data can land. Volumes
    /// holding data are removed only when nothing uses them; a volume that is
    /// both populated and attached is preserved and the restore skipped.
    async fn prepare_target_volume(&self, volume: &str, kind: VolumeKind) -> TargetDisposition {
        if !self.docker.volume_exists(volume).await {
            return TargetDisposition::Ready;
        }

        let is_empty = match kind {
            VolumeKind::Postgres => !self
                .docker
                .postgres_volume_has_data(volume)
                .await
                .unwrap_or(true),
            _ => {
                self.docker.volume_size_bytes(volume).await.unwrap_or(u64::MAX)
                    < EMPTY_VOLUME_THRESHOLD_BYTES
            }
        };

        if is_empty {
            info!("Volume {volume} exists but holds no data; removing before restore");
            let users = self
                .docker
                .containers_using_volume(volume)
                .await
                .unwrap_or_default();
            if !users.is_empty() {
                warn!("Volume {volume} is in use by: {}", users.join(", "));
                for container in &users {
                    let _ = self.docker.stop_container(container).await;
                }
                let still_used = self
                    .docker
                    .containers_using_volume(volume)
                    .await
                    .unwrap_or_default();
                if !still_used.is_empty() {
                    warn!("Volume {volume} still in use, skipping restoration");
                    return TargetDisposition::Skip;
                }
            }
            if let Err(e) = self.docker.remove_volume(volume).await {
                warn!("Failed to remove volume {volume}: {e}");
                return TargetDisposition::Skip;
            }
            return TargetDisposition::Ready;
        }

        let users = self
            .docker
            .containers_using_volume(volume)
            .await
            .unwrap_or_default();
        if !users.is_empty() {
            warn!("Volume {volume} already holds data and is in use; skipping to avoid data loss");
            return TargetDisposition::Skip;
        }

        info!("Volume {volume} holds data but nothing uses it; replacing with backup");
        match self.docker.remove_volume(volume).await {
            Ok(()) => TargetDisposition::Ready,
            Err(e) => {
                warn!("Failed to remove volume {volume}: {e}");
                TargetDisposition::Skip
            }
        }
    }

    /// Fire-and-forget restart of the worktree's containers with a bounded
    /// deadline; the outcome is logged, never awaited by the caller.
    fn schedule_restart(&self, branch: &str) {
        info!("Restarting worktree containers in background...");
        let ctx = self.ctx.clone();
        let branch = branch.to_string();
        tokio::spawn(async move {
            let worktree_path = ctx.worktree_path(&branch);
            let Some(compose_file) = compose_override_path(&worktree_path, &ctx.root) else {
                warn!("Cannot restart containers for {branch}: no compose file");
                return;
            };
            let command = ComposeCommand::new(compose_file, &worktree_path)
                .with_env_file(env_dockertree_path(&worktree_path))
                .with_project_name(ctx.compose_project_name(&branch));
            match command.up_detached().await {
                Ok(()) => info!("Containers restarted for {branch}"),
                Err(e) => warn!("Failed to restart containers for {branch}: {e}"),
            }
        });
    }

    /// Volume names referenced by one service of the worktree's transformed
    /// compose document, projected into per-worktree names.
    pub fn volumes_for_service(
        &self,
        branch: &str,
        worktree_path: &Path,
        service: &str,
    ) -> Result<Vec<String>> {
        let Some(compose_file) = compose_override_path(worktree_path, &self.ctx.root) else {
            return Ok(Vec::new());
        };
        let content = std::fs::read_to_string(&compose_file)?;
        let doc = transform::parse_compose(&content)?;
        Ok(transform::service_volume_names(
            &doc,
            &self.ctx.compose_project_name(branch),
            service,
        ))
    }

    /// Existence of each per-worktree volume.
    pub async fn worktree_volumes(&self, branch: &str) -> Vec<VolumeInfo> {
        let mut volumes = Vec::new();
        for (kind, name) in self.ctx.volume_names(branch) {
            let exists = self.docker.volume_exists(&name).await;
            volumes.push(VolumeInfo { name, kind, exists });
        }
        volumes
    }

    /// All worktree-suffixed volumes known to the daemon.
    pub async fn list_all_worktree_volumes(&self) -> Result<Vec<String>> {
        let volumes = self.docker.list_volumes().await?;
        Ok(volumes
            .into_iter()
            .filter(|name| {
                VolumeKind::ALL
                    .iter()
                    .any(|kind| name.ends_with(&format!("_{}", kind.suffix())))
            })
            .collect())
    }

    /// Sizes of all worktree-suffixed volumes.
    pub async fn volume_sizes(&self) -> Result<Vec<(String, String)>> {
        let mut sizes = Vec::new();
        for volume in self.list_all_worktree_volumes().await? {
            let size = self
                .docker
                .volume_size_human(&volume)
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            sizes.push((volume, size));
        }
        Ok(sizes)
    }
}

enum TargetDisposition {
    Ready,
    Skip,
}

/// Extract a gzip-compressed tar archive into a directory.
pub fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<()> {
    debug!("Extracting {} into {}", archive.display(), dest.display());
    let file = std::fs::File::open(archive)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut tar = tar::Archive::new(decoder);
    tar.unpack(dest)?;
    Ok(())
}

fn find_file_recursive(dir: &Path, file_name: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() && path.file_name().and_then(|n| n.to_str()) == Some(file_name) {
            return Some(path);
        }
        if path.is_dir() {
            subdirs.push(path);
        }
    }
    subdirs.iter().find_map(|sub| find_file_recursive(sub, file_name))
}

fn find_file_by_prefix(dir: &Path, prefix: &str, suffix: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if path.is_file() && name.starts_with(prefix) && name.ends_with(suffix) {
                return Some(path);
            }
        }
        if path.is_dir() {
            subdirs.push(path);
        }
    }
    subdirs
        .iter()
        .find_map(|sub| find_file_by_prefix(sub, prefix, suffix))
}

/// Match a per-volume archive to a target volume: exact `{volume}.tar.gz`
/// first, then any archive sharing the volume-type suffix (the source
/// project may have had a different name).
fn locate_volume_archive(
    available: &[PathBuf],
    volume: &str,
    kind: VolumeKind,
) -> Option<PathBuf> {
    let exact = format!("{volume}.tar.gz");
    if let Some(path) = available
        .iter()
        .find(|p| p.file_name().and_then(|n| n.to_str()) == Some(exact.as_str()))
    {
        return Some(path.clone());
    }
    let suffix = format!("_{}.tar.gz", kind.suffix());
    available
        .iter()
        .find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(&suffix))
                .unwrap_or(false)
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_volumes_for_service_projects_names() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("myapp");
        let mut config = crate::config::ProjectConfig::default_for(&root);
        config.project_name = "myapp".to_string();
        let ctx = crate::config::ProjectContext {
            root: root.clone(),
            config,
        };

        let worktree = ctx.worktree_path("beta");
        let dockertree = worktree.join(".dockertree");
        fs::create_dir_all(&dockertree).unwrap();
        fs::write(
            dockertree.join("docker-compose.worktree.yml"),
            "services:\n  db:\n    image: postgres:14\n    volumes:\n      - postgres_data:/var/lib/postgresql/data\nvolumes:\n  postgres_data: {}\n",
        )
        .unwrap();

        let manager = VolumeManager::new(&ctx);
        let names = manager.volumes_for_service("beta", &worktree, "db").unwrap();
        assert_eq!(names, vec!["myapp-beta_postgres_data".to_string()]);
        assert!(manager
            .volumes_for_service("beta", &worktree, "missing")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_locate_volume_archive_exact_match_wins() {
        let available = vec![
            PathBuf::from("/t/other-app-x_postgres_data.tar.gz"),
            PathBuf::from("/t/myapp-beta_postgres_data.tar.gz"),
        ];
        let found =
            locate_volume_archive(&available, "myapp-beta_postgres_data", VolumeKind::Postgres)
                .unwrap();
        assert!(found.ends_with("myapp-beta_postgres_data.tar.gz"));
    }

    #[test]
    fn test_locate_volume_archive_falls_back_to_suffix() {
        let available = vec![PathBuf::from("/t/other-app-x_postgres_data.tar.gz")];
        let found =
            locate_volume_archive(&available, "myapp-beta_postgres_data", VolumeKind::Postgres)
                .unwrap();
        assert!(found.ends_with("other-app-x_postgres_data.tar.gz"));
        assert!(locate_volume_archive(&available, "myapp-beta_media_files", VolumeKind::Media)
            .is_none());
    }

    #[test]
    fn test_extract_tar_gz_round_trip() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("a.txt"), "hello").unwrap();
        fs::write(src.join("nested").join("b.txt"), "world").unwrap();

        let archive = tmp.path().join("backup_test.tar");
        let file = fs::File::create(&archive).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all(".", &src).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let dest = tmp.path().join("dest");
        extract_tar_gz(&archive, &dest).unwrap();
        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "hello");
        assert_eq!(
            fs::read_to_string(dest.join("nested").join("b.txt")).unwrap(),
            "world"
        );
    }

    #[test]
    fn test_find_file_recursive() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("backup_beta.tar"), "x").unwrap();

        let found = find_file_recursive(tmp.path(), "backup_beta.tar").unwrap();
        assert!(found.ends_with("a/b/backup_beta.tar"));
        assert!(find_file_recursive(tmp.path(), "missing.tar").is_none());

        let by_prefix = find_file_by_prefix(tmp.path(), "backup_", ".tar").unwrap();
        assert_eq!(by_prefix, found);
    }
}
