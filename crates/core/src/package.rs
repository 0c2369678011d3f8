//! Package export and import
//!
//! A package is a self-describing archive of one branch environment: its
//! config files, volume snapshots, optionally a HEAD archive of the source
//! tree, and a SHA-256 manifest covering every file. A package is valid iff
//! every manifest entry exists and matches its digest. Import reconstitutes
//! the environment on any host; standalone mode first bootstraps a fresh
//! project from the package itself.

use crate::checksum::{file_checksum, verify_checksum};
use crate::config::{ProjectContext, DOCKERTREE_DIR};
use crate::environment::EnvironmentManager;
use crate::errors::{PackageError, Result};
use crate::git::GitManager;
use crate::orchestrator::WorktreeOrchestrator;
use crate::setup::{SetupManager, SetupOptions};
use crate::volumes::{extract_tar_gz, VolumeManager};
use crate::workspace::{copy_dir_filtered, is_inside_project};
use flate2::write::GzEncoder;
use flate2::Compression;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

const PACKAGE_VERSION: &str = "1.0";
const PACKAGE_DIR_SUFFIX: &str = ".dockertree-package";

/// `metadata.json` at the root of every package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub package_version: String,
    pub dockertree_version: String,
    pub created_at: String,
    pub branch_name: String,
    pub project_name: String,
    pub include_code: bool,
    #[serde(default)]
    pub checksums: IndexMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportOutcome {
    pub package_path: PathBuf,
    pub metadata: PackageMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub checksum_valid: bool,
    pub metadata: PackageMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackageSummary {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub valid: bool,
    pub metadata: Option<PackageMetadata>,
}

/// Import parameters.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Target branch; defaults to the packaged branch name.
    pub target_branch: Option<String>,
    /// Restore volume data (default true from the CLI).
    pub restore_data: bool,
    /// Force standalone (`Some(true)`) or normal (`Some(false)`); `None`
    /// auto-detects from the current project context.
    pub standalone: Option<bool>,
    /// Project directory for standalone mode.
    pub target_directory: Option<PathBuf>,
    pub domain: Option<String>,
    pub ip: Option<String>,
    pub debug: bool,
    /// Skip overwrite confirmation prompts.
    pub non_interactive: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    pub branch: String,
    pub worktree_path: PathBuf,
    pub project_root: PathBuf,
    pub standalone: bool,
    pub metadata: PackageMetadata,
}

/// Extracted view of a package: either the extraction temp dir or the
/// package directory itself for uncompressed packages.
struct ExtractedPackage {
    /// Keeps the extraction directory alive for the struct's lifetime.
    _temp: Option<tempfile::TempDir>,
    package_dir: PathBuf,
    metadata: PackageMetadata,
}

/// Manages environment package export/import.
pub struct PackageManager {
    ctx: ProjectContext,
}

impl PackageManager {
    pub fn new(ctx: ProjectContext) -> Self {
        Self { ctx }
    }

    /// Export a branch environment into a package.
    #[instrument(skip(self, output_dir))]
    pub async fn export(
        &self,
        branch: &str,
        output_dir: &Path,
        include_code: bool,
        compressed: bool,
    ) -> Result<ExportOutcome> {
        let git = GitManager::new(&self.ctx);
        let worktree_path = git.find_worktree_path(branch).await.ok_or_else(|| {
            crate::errors::GitError::WorktreeNotFound {
                branch: branch.to_string(),
            }
        })?;

        std::fs::create_dir_all(output_dir)?;
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let package_name = format!("{branch}_{timestamp}{PACKAGE_DIR_SUFFIX}");
        let staging_dir = output_dir.join(&package_name);
        std::fs::create_dir_all(&staging_dir)?;

        let result = self
            .stage_package(branch, &worktree_path, &staging_dir, include_code)
            .await;
        let metadata = match result {
            Ok(metadata) => metadata,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&staging_dir);
                return Err(e);
            }
        };

        let package_path = if compressed {
            let compressed_path = output_dir.join(format!("{package_name}.tar.gz"));
            info!("Compressing package to {}...", compressed_path.display());
            compress_dir(&staging_dir, &compressed_path)?;
            std::fs::remove_dir_all(&staging_dir)?;
            compressed_path
        } else {
            staging_dir
        };

        info!("Package exported: {}", package_path.display());
        Ok(ExportOutcome {
            package_path,
            metadata,
        })
    }

    async fn stage_package(
        &self,
        branch: &str,
        worktree_path: &Path,
        staging_dir: &Path,
        include_code: bool,
    ) -> Result<PackageMetadata> {
        // Environment files: .env, .dockertree/, and the transformed compose.
        let env_dir = staging_dir.join("environment");
        std::fs::create_dir_all(&env_dir)?;
        let env_file = worktree_path.join(".env");
        if env_file.is_file() {
            std::fs::copy(&env_file, env_dir.join(".env"))?;
        }
        let dockertree_dir = worktree_path.join(DOCKERTREE_DIR);
        if dockertree_dir.is_dir() {
            copy_dir_filtered(&dockertree_dir, &env_dir.join(DOCKERTREE_DIR), &|_| false)?;
        }
        let legacy_compose = worktree_path.join("docker-compose.dockertree.yml");
        if legacy_compose.is_file() {
            std::fs::copy(&legacy_compose, env_dir.join("docker-compose.dockertree.yml"))?;
        }

        // Volume snapshots.
        info!("Backing up volumes for {branch}...");
        let volumes_dir = staging_dir.join("volumes");
        VolumeManager::new(&self.ctx)
            .backup_volumes(branch, &volumes_dir)
            .await?;
        // The staging copy must not carry the scratch directory.
        let _ = std::fs::remove_dir_all(volumes_dir.join("temp_backup"));

        // Optional HEAD archive of the source tree.
        if include_code {
            info!("Creating source archive for {branch}...");
            let code_path = staging_dir.join("code").join(format!("{branch}.tar.gz"));
            GitManager::new(&self.ctx)
                .archive_head(worktree_path, &code_path)
                .await?;
        }

        let metadata = self.write_metadata(branch, staging_dir, include_code)?;
        Ok(metadata)
    }

    fn write_metadata(
        &self,
        branch: &str,
        staging_dir: &Path,
        include_code: bool,
    ) -> Result<PackageMetadata> {
        let mut checksums = IndexMap::new();
        let mut files = Vec::new();
        collect_files(staging_dir, &mut files)?;
        files.sort();
        for file in files {
            let relative = file
                .strip_prefix(staging_dir)
                .unwrap_or(&file)
                .to_string_lossy()
                .to_string();
            checksums.insert(relative, file_checksum(&file)?);
        }

        let metadata = PackageMetadata {
            package_version: PACKAGE_VERSION.to_string(),
            dockertree_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            branch_name: branch.to_string(),
            project_name: self.ctx.project_name().to_string(),
            include_code,
            checksums,
        };
        let json = serde_json::to_string_pretty(&metadata)?;
        std::fs::write(staging_dir.join("metadata.json"), json)?;
        Ok(metadata)
    }

    fn extract_package(package_path: &Path) -> Result<ExtractedPackage> {
        if !package_path.exists() {
            return Err(PackageError::NotFound {
                path: package_path.display().to_string(),
            }
            .into());
        }

        let (temp, search_root) = if package_path.is_dir() {
            (None, package_path.to_path_buf())
        } else {
            let temp = tempfile::tempdir()?;
            extract_tar_gz(package_path, temp.path())?;
            let root = temp.path().to_path_buf();
            (Some(temp), root)
        };

        let package_dir = if search_root
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(PACKAGE_DIR_SUFFIX))
            .unwrap_or(false)
        {
            search_root
        } else {
            std::fs::read_dir(&search_root)?
                .flatten()
                .map(|entry| entry.path())
                .find(|path| {
                    path.is_dir()
                        && path
                            .file_name()
                            .and_then(|n| n.to_str())
                            .map(|n| n.ends_with(PACKAGE_DIR_SUFFIX))
                            .unwrap_or(false)
                })
                .ok_or_else(|| PackageError::Invalid {
                    message: "package directory not found".to_string(),
                })?
        };

        let metadata_path = package_dir.join("metadata.json");
        if !metadata_path.is_file() {
            return Err(PackageError::Invalid {
                message: "metadata.json not found".to_string(),
            }
            .into());
        }
        let metadata: PackageMetadata =
            serde_json::from_str(&std::fs::read_to_string(&metadata_path)?)?;

        Ok(ExtractedPackage {
            _temp: temp,
            package_dir,
            metadata,
        })
    }

    fn verify_manifest(package_dir: &Path, metadata: &PackageMetadata) -> Result<()> {
        for (relative, expected) in &metadata.checksums {
            let path = package_dir.join(relative);
            if !path.is_file() {
                return Err(PackageError::MissingEntry {
                    entry: relative.clone(),
                }
                .into());
            }
            if !verify_checksum(&path, expected) {
                return Err(PackageError::ChecksumMismatch {
                    entry: relative.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Validate a package without importing it.
    #[instrument(skip(self, package_path))]
    pub fn validate(&self, package_path: &Path) -> Result<ValidationOutcome> {
        let extracted = Self::extract_package(package_path)?;
        let checksum_valid =
            Self::verify_manifest(&extracted.package_dir, &extracted.metadata).is_ok();
        Ok(ValidationOutcome {
            valid: checksum_valid,
            checksum_valid,
            metadata: extracted.metadata,
        })
    }

    /// Enumerate packages in a directory, validating each.
    pub fn list(&self, package_dir: &Path) -> Vec<PackageSummary> {
        let mut packages = Vec::new();
        let Ok(entries) = std::fs::read_dir(package_dir) else {
            return packages;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let is_package = name.ends_with(PACKAGE_DIR_SUFFIX)
                || name.ends_with(&format!("{PACKAGE_DIR_SUFFIX}.tar.gz"));
            if !is_package {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            match self.validate(&path) {
                Ok(validation) => packages.push(PackageSummary {
                    name: name.to_string(),
                    path: path.clone(),
                    size,
                    valid: validation.valid,
                    metadata: Some(validation.metadata),
                }),
                Err(e) => {
                    warn!("Skipping invalid package {name}: {e}");
                    packages.push(PackageSummary {
                        name: name.to_string(),
                        path: path.clone(),
                        size,
                        valid: false,
                        metadata: None,
                    });
                }
            }
        }
        packages.sort_by(|a, b| a.name.cmp(&b.name));
        packages
    }

    /// Import a package into a (possibly freshly bootstrapped) project.
    #[instrument(skip(self, package_path, options))]
    pub async fn import(
        &self,
        package_path: &Path,
        options: &ImportOptions,
    ) -> Result<ImportOutcome> {
        let extracted = Self::extract_package(package_path)?;
        Self::verify_manifest(&extracted.package_dir, &extracted.metadata)?;

        let branch = options
            .target_branch
            .clone()
            .unwrap_or_else(|| extracted.metadata.branch_name.clone());
        if branch.is_empty() {
            return Err(PackageError::Invalid {
                message: "could not determine target branch from package".to_string(),
            }
            .into());
        }

        let standalone = match options.standalone {
            Some(value) => value,
            None => !is_inside_project(&self.ctx.root),
        };

        let ctx = if standalone {
            self.bootstrap_standalone_project(&extracted, options).await?
        } else {
            self.ctx.clone()
        };

        let orchestrator = WorktreeOrchestrator::new(ctx.clone());
        let volumes = VolumeManager::new(&ctx);

        // Guard against silently clobbering data in an existing environment.
        if GitManager::new(&ctx).worktree_exists(&branch).await {
            let has_data = volumes
                .worktree_volumes(&branch)
                .await
                .iter()
                .any(|v| v.exists);
            if has_data && options.restore_data && !options.non_interactive {
                let prompt = format!(
                    "Worktree '{branch}' already has volumes with data. Overwrite them? [y/N] "
                );
                if !confirm(&prompt) {
                    return Err(PackageError::Cancelled {
                        message: "existing worktree volumes would be overwritten".to_string(),
                    }
                    .into());
                }
            }
        }

        info!("Creating worktree for branch '{branch}'...");
        let created = orchestrator.create(&branch).await?;
        let worktree_path = created.worktree_path.clone();

        if !self.restore_environment_files(&extracted.package_dir, &worktree_path)? {
            warn!("No environment files found in package");
        }

        if options.restore_data {
            info!("Restoring volumes for {branch}...");
            // For uncompressed packages the user may have passed a containing
            // directory; the backup lives where stage_package wrote it, under
            // the located package dir.
            let backup_source = if package_path.is_dir() {
                extracted
                    .package_dir
                    .join("volumes")
                    .join(format!("backup_{}.tar", extracted.metadata.branch_name))
            } else {
                package_path.to_path_buf()
            };
            if backup_source.exists() {
                if let Err(e) = volumes.restore_volumes(&branch, &backup_source).await {
                    warn!("Failed to restore volumes: {e}");
                }
            } else {
                warn!("Volume backup not found in package");
            }
        }

        let code_archive = extracted
            .package_dir
            .join("code")
            .join(format!("{}.tar.gz", extracted.metadata.branch_name));
        if code_archive.is_file() {
            info!("Extracting code archive to {}...", worktree_path.display());
            if let Err(e) = extract_tar_gz(&code_archive, &worktree_path) {
                warn!("Failed to extract code archive: {e}");
            }
        }

        let env_manager = EnvironmentManager::new(&ctx);
        if standalone {
            env_manager.update_project_root(&worktree_path, &ctx.root)?;
            env_manager.fix_standalone_paths(&worktree_path)?;
        }
        if let Some(domain) = &options.domain {
            env_manager.apply_domain_overrides(&worktree_path, domain, options.debug)?;
        } else if let Some(ip) = &options.ip {
            env_manager.apply_ip_overrides(&worktree_path, ip, options.debug)?;
        }

        info!("Package imported successfully to branch '{branch}'");
        Ok(ImportOutcome {
            branch,
            worktree_path,
            project_root: ctx.root.clone(),
            standalone,
            metadata: extracted.metadata,
        })
    }

    /// Create (or reuse) a fresh project directory and run the setup pathway
    /// against the package's base compose document.
    async fn bootstrap_standalone_project(
        &self,
        extracted: &ExtractedPackage,
        options: &ImportOptions,
    ) -> Result<ProjectContext> {
        let target = options
            .target_directory
            .clone()
            .unwrap_or_else(|| self.ctx.root.clone());
        info!("Bootstrapping standalone project at {}", target.display());
        std::fs::create_dir_all(&target)?;

        // Seed the base compose from the package so setup transforms the
        // real service topology instead of the minimal template.
        let base_compose = target.join("docker-compose.yml");
        if !base_compose.is_file() {
            let packaged = [
                extracted.package_dir.join("environment").join("docker-compose.dockertree.yml"),
                extracted
                    .package_dir
                    .join("environment")
                    .join(DOCKERTREE_DIR)
                    .join(crate::config::COMPOSE_WORKTREE_FILE),
            ];
            if let Some(source) = packaged.iter().find(|p| p.is_file()) {
                std::fs::copy(source, &base_compose)?;
            }
        }

        let setup = SetupManager::new(&target);
        setup.setup_project(&SetupOptions {
            project_name: Some(extracted.metadata.project_name.clone()),
            update_gitignore: false,
        })?;

        // Worktree creation needs a repository; fresh hosts have none.
        GitManager::at(&target).ensure_repository().await?;

        Ok(ProjectContext::new(target))
    }

    fn restore_environment_files(&self, package_dir: &Path, worktree_path: &Path) -> Result<bool> {
        let env_dir = package_dir.join("environment");
        if !env_dir.is_dir() {
            return Ok(false);
        }

        let env_file = env_dir.join(".env");
        if env_file.is_file() {
            std::fs::copy(&env_file, worktree_path.join(".env"))?;
        }

        let dockertree_src = env_dir.join(DOCKERTREE_DIR);
        if dockertree_src.is_dir() {
            let dockertree_dst = worktree_path.join(DOCKERTREE_DIR);
            if dockertree_dst.exists() {
                std::fs::remove_dir_all(&dockertree_dst)?;
            }
            copy_dir_filtered(&dockertree_src, &dockertree_dst, &|_| false)?;
        }

        let compose = env_dir.join("docker-compose.dockertree.yml");
        if compose.is_file() {
            std::fs::copy(&compose, worktree_path.join("docker-compose.dockertree.yml"))?;
        }
        Ok(true)
    }
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

fn compress_dir(source_dir: &Path, output: &Path) -> Result<()> {
    let file = std::fs::File::create(output)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let arcname = source_dir
        .file_name()
        .map(|n| PathBuf::from(n))
        .unwrap_or_else(|| PathBuf::from("package"));
    builder.append_dir_all(&arcname, source_dir)?;
    builder.into_inner()?.finish()?;
    Ok(())
}

fn confirm(prompt: &str) -> bool {
    print!("{prompt}");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use crate::errors::ErrorKind;
    use std::fs;
    use tempfile::TempDir;

    fn manager(tmp: &TempDir) -> PackageManager {
        let root = tmp.path().join("myapp");
        fs::create_dir_all(&root).unwrap();
        let mut config = ProjectConfig::default_for(&root);
        config.project_name = "myapp".to_string();
        PackageManager::new(ProjectContext { root, config })
    }

    /// Build a package directory by hand, with a correct manifest.
    fn build_package_dir(dir: &Path, branch: &str) -> PathBuf {
        let package_dir = dir.join(format!("{branch}_20240101-000000{PACKAGE_DIR_SUFFIX}"));
        let env_dir = package_dir.join("environment");
        fs::create_dir_all(env_dir.join(DOCKERTREE_DIR)).unwrap();
        fs::create_dir_all(package_dir.join("volumes")).unwrap();
        fs::write(env_dir.join(".env"), "POSTGRES_USER=user\n").unwrap();
        fs::write(
            env_dir.join(DOCKERTREE_DIR).join("env.dockertree"),
            format!("COMPOSE_PROJECT_NAME=myapp-{branch}\nPROJECT_ROOT=/old/path\n"),
        )
        .unwrap();
        fs::write(package_dir.join("volumes").join(format!("backup_{branch}.tar")), b"tar").unwrap();

        let mut checksums = IndexMap::new();
        let mut files = Vec::new();
        collect_files(&package_dir, &mut files).unwrap();
        files.sort();
        for file in files {
            let relative = file.strip_prefix(&package_dir).unwrap().to_string_lossy().to_string();
            checksums.insert(relative, file_checksum(&file).unwrap());
        }
        let metadata = PackageMetadata {
            package_version: PACKAGE_VERSION.to_string(),
            dockertree_version: "0.9.4".to_string(),
            created_at: "2024-01-01T00:00:00+00:00".to_string(),
            branch_name: branch.to_string(),
            project_name: "myapp".to_string(),
            include_code: false,
            checksums,
        };
        fs::write(
            package_dir.join("metadata.json"),
            serde_json::to_string_pretty(&metadata).unwrap(),
        )
        .unwrap();
        package_dir
    }

    #[test]
    fn test_validate_accepts_well_formed_package() {
        let tmp = TempDir::new().unwrap();
        let manager = manager(&tmp);
        let package_dir = build_package_dir(tmp.path(), "beta");

        let validation = manager.validate(&package_dir).unwrap();
        assert!(validation.valid);
        assert!(validation.checksum_valid);
        assert_eq!(validation.metadata.branch_name, "beta");
    }

    #[test]
    fn test_validate_detects_corrupted_file() {
        let tmp = TempDir::new().unwrap();
        let manager = manager(&tmp);
        let package_dir = build_package_dir(tmp.path(), "beta");
        fs::write(package_dir.join("environment").join(".env"), "TAMPERED=1\n").unwrap();

        let validation = manager.validate(&package_dir).unwrap();
        assert!(!validation.valid);
    }

    #[test]
    fn test_validate_detects_missing_entry() {
        let tmp = TempDir::new().unwrap();
        let manager = manager(&tmp);
        let package_dir = build_package_dir(tmp.path(), "beta");
        fs::remove_file(package_dir.join("environment").join(".env")).unwrap();

        let validation = manager.validate(&package_dir).unwrap();
        assert!(!validation.valid);
    }

    #[test]
    fn test_import_rejects_manifest_violations() {
        let tmp = TempDir::new().unwrap();
        let manager = manager(&tmp);
        let package_dir = build_package_dir(tmp.path(), "beta");
        fs::remove_file(package_dir.join("environment").join(".env")).unwrap();

        let err = tokio_test::block_on(manager.import(
            &package_dir,
            &ImportOptions {
                restore_data: false,
                non_interactive: true,
                standalone: Some(false),
                ..Default::default()
            },
        ))
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingEntry);
    }

    #[test]
    fn test_validate_round_trips_through_compression() {
        let tmp = TempDir::new().unwrap();
        let manager = manager(&tmp);
        let package_dir = build_package_dir(tmp.path(), "beta");

        let archive = tmp.path().join(format!(
            "{}.tar.gz",
            package_dir.file_name().unwrap().to_string_lossy()
        ));
        compress_dir(&package_dir, &archive).unwrap();

        let validation = manager.validate(&archive).unwrap();
        assert!(validation.valid);
        assert_eq!(validation.metadata.project_name, "myapp");
    }

    #[test]
    fn test_validate_rejects_package_without_metadata() {
        let tmp = TempDir::new().unwrap();
        let manager = manager(&tmp);
        let bogus = tmp.path().join(format!("x{PACKAGE_DIR_SUFFIX}"));
        fs::create_dir_all(&bogus).unwrap();

        let err = manager.validate(&bogus).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingEntry);
    }

    #[test]
    fn test_list_enumerates_and_sorts_packages() {
        let tmp = TempDir::new().unwrap();
        let manager = manager(&tmp);
        let dir = tmp.path().join("packages");
        fs::create_dir_all(&dir).unwrap();
        build_package_dir(&dir, "beta");
        build_package_dir(&dir, "alpha");
        fs::write(dir.join("unrelated.txt"), "x").unwrap();

        let packages = manager.list(&dir);
        assert_eq!(packages.len(), 2);
        assert!(packages[0].name.starts_with("alpha_"));
        assert!(packages[1].name.starts_with("beta_"));
        assert!(packages.iter().all(|p| p.valid));
    }

    #[test]
    fn test_missing_package_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let manager = manager(&tmp);
        let err = manager.validate(&tmp.path().join("missing.tar.gz")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
