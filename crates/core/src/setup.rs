//! Project setup
//!
//! Initializes a project for per-branch environments: scaffolds the
//! `.dockertree/` directory, detects (or creates) the base compose file,
//! produces the transformed worktree compose document, and writes
//! `config.yml` with the services and volumes detected from the base
//! document. Standalone package imports run this pathway to bootstrap a
//! fresh project on an empty host.

use crate::config::{ProjectConfig, ServiceConfig, DOCKERTREE_DIR};
use crate::errors::{ComposeError, ConfigError, Result};
use crate::transform;
use indexmap::IndexMap;
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Compose file names recognized at the project root, in preference order.
const COMPOSE_FILE_NAMES: [&str; 4] = [
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

const MINIMAL_COMPOSE: &str = r#"services:
  web:
    image: nginx:alpine
    ports:
      - "8000:80"
    volumes:
      - ./:/app
    environment:
      - DEBUG=True
"#;

/// Setup options.
#[derive(Debug, Clone, Default)]
pub struct SetupOptions {
    /// Project name; defaults to the root directory's basename.
    pub project_name: Option<String>,
    /// Append the worktree directory to `.gitignore`.
    pub update_gitignore: bool,
}

/// Result of a setup run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SetupOutcome {
    pub project_root: PathBuf,
    pub config_path: PathBuf,
    pub compose_path: PathBuf,
    pub base_compose: PathBuf,
}

/// Manages project initialization.
pub struct SetupManager {
    project_root: PathBuf,
}

impl SetupManager {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    fn dockertree_dir(&self) -> PathBuf {
        self.project_root.join(DOCKERTREE_DIR)
    }

    /// Whether the project has both a config file and a transformed compose.
    pub fn is_setup_complete(&self) -> bool {
        self.dockertree_dir().join("config.yml").is_file()
            && self
                .dockertree_dir()
                .join(crate::config::COMPOSE_WORKTREE_FILE)
                .is_file()
    }

    /// Find base compose files at the project root.
    pub fn find_compose_files(&self) -> Vec<PathBuf> {
        COMPOSE_FILE_NAMES
            .iter()
            .map(|name| self.project_root.join(name))
            .filter(|path| path.is_file())
            .collect()
    }

    /// Initialize the project.
    #[instrument(skip(self, options))]
    pub fn setup_project(&self, options: &SetupOptions) -> Result<SetupOutcome> {
        info!("Setting up dockertree for this project...");

        std::fs::create_dir_all(self.dockertree_dir())?;
        let worktrees = self.project_root.join("worktrees");
        std::fs::create_dir_all(&worktrees)?;

        let base_compose = match self.find_compose_files().into_iter().next() {
            Some(path) => {
                info!("Found compose file: {}", path.display());
                path
            }
            None => {
                warn!("No compose file found in project root");
                info!("Creating minimal docker-compose.yml template...");
                let path = self.project_root.join("docker-compose.yml");
                std::fs::write(&path, MINIMAL_COMPOSE)?;
                path
            }
        };

        let config = self.build_config(options, &base_compose)?;
        let compose_path = self.transform_compose(&base_compose, &config.worktree_dir)?;
        let config_path = config.save(&self.project_root)?;
        info!("Created config file: {}", config_path.display());

        if options.update_gitignore {
            let entry = format!("{}/", config.worktree_dir);
            if let Err(e) = self.add_gitignore_entry(&entry) {
                warn!("Failed to update .gitignore: {e}");
            }
        }

        info!("Setup completed");
        Ok(SetupOutcome {
            project_root: self.project_root.clone(),
            config_path,
            compose_path,
            base_compose,
        })
    }

    /// Transform the base compose file into the per-worktree document.
    ///
    /// A document without any web-set service can never be routed by the
    /// shared proxy, so it is rejected rather than silently producing an
    /// unreachable environment.
    pub fn transform_compose(&self, base_compose: &Path, worktree_dir: &str) -> Result<PathBuf> {
        let content = std::fs::read_to_string(base_compose)?;
        let base = transform::parse_compose(&content)?;
        if !transform::has_web_service(&base) {
            return Err(ComposeError::NoWebService.into());
        }
        let transformed = transform::transform_base_compose(&base, worktree_dir)?;

        let target = self
            .dockertree_dir()
            .join(crate::config::COMPOSE_WORKTREE_FILE);
        std::fs::create_dir_all(self.dockertree_dir())?;
        std::fs::write(&target, transform::write_compose(&transformed)?)?;
        info!("Created worktree compose file: {}", target.display());
        Ok(target)
    }

    fn build_config(&self, options: &SetupOptions, base_compose: &Path) -> Result<ProjectConfig> {
        let project_name = options.project_name.clone().unwrap_or_else(|| {
            self.project_root
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "project".to_string())
        });

        let content = std::fs::read_to_string(base_compose)?;
        let doc: Value = serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;

        let mut services = IndexMap::new();
        if let Some(map) = doc.get("services").and_then(Value::as_mapping) {
            for name in map.keys().filter_map(Value::as_str) {
                services.insert(
                    name.to_string(),
                    ServiceConfig {
                        container_name_template: format!("${{COMPOSE_PROJECT_NAME}}-{name}"),
                    },
                );
            }
        }
        let volumes: Vec<String> = doc
            .get("volumes")
            .and_then(Value::as_mapping)
            .map(|m| m.keys().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        let mut environment = IndexMap::new();
        environment.insert("DEBUG".to_string(), "True".to_string());
        environment.insert(
            "ALLOWED_HOSTS".to_string(),
            "localhost,127.0.0.1,*.localhost,web".to_string(),
        );

        Ok(ProjectConfig {
            project_name,
            caddy_network: crate::config::CADDY_NETWORK.to_string(),
            worktree_dir: "worktrees".to_string(),
            services,
            volumes,
            environment,
            deployment: None,
        })
    }

    /// Strip prior per-worktree projections from the base compose file.
    pub fn clean_legacy_elements(&self) -> Result<PathBuf> {
        let compose_file = self
            .find_compose_files()
            .into_iter()
            .next()
            .ok_or_else(|| ConfigError::NotFound {
                path: self.project_root.join("docker-compose.yml").display().to_string(),
            })?;
        let content = std::fs::read_to_string(&compose_file)?;
        let mut doc = transform::parse_compose(&content)?;
        transform::clean_legacy_elements(&mut doc);
        std::fs::write(&compose_file, transform::write_compose(&doc)?)?;
        info!("Cleaned legacy elements from {}", compose_file.display());
        Ok(compose_file)
    }

    fn add_gitignore_entry(&self, entry: &str) -> Result<()> {
        let gitignore = self.project_root.join(".gitignore");
        let mut content = std::fs::read_to_string(&gitignore).unwrap_or_default();
        if content.lines().any(|line| line.trim() == entry) {
            return Ok(());
        }
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(entry);
        content.push('\n');
        std::fs::write(&gitignore, content)?;
        info!("Added {entry} to .gitignore");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_setup_scaffolds_minimal_project() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("myapp");
        std::fs::create_dir_all(&root).unwrap();

        let manager = SetupManager::new(&root);
        assert!(!manager.is_setup_complete());

        let outcome = manager.setup_project(&SetupOptions::default()).unwrap();
        assert!(outcome.config_path.is_file());
        assert!(outcome.compose_path.is_file());
        assert!(root.join("docker-compose.yml").is_file());
        assert!(root.join("worktrees").is_dir());
        assert!(manager.is_setup_complete());

        let config = ProjectConfig::load_strict(&root).unwrap();
        assert_eq!(config.project_name, "myapp");
        assert!(config.services.contains_key("web"));
    }

    #[test]
    fn test_setup_detects_existing_compose_and_services() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("proj");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(
            root.join("docker-compose.yml"),
            "services:\n  web:\n    image: x\n  db:\n    image: postgres:14\nvolumes:\n  postgres_data: {}\n",
        )
        .unwrap();

        let outcome = SetupManager::new(&root)
            .setup_project(&SetupOptions {
                project_name: Some("custom".to_string()),
                update_gitignore: true,
            })
            .unwrap();
        assert_eq!(outcome.base_compose, root.join("docker-compose.yml"));

        let config = ProjectConfig::load_strict(&root).unwrap();
        assert_eq!(config.project_name, "custom");
        assert!(config.services.contains_key("db"));
        assert_eq!(config.volumes, vec!["postgres_data".to_string()]);

        let transformed = std::fs::read_to_string(outcome.compose_path).unwrap();
        assert!(transformed.contains("${COMPOSE_PROJECT_NAME}_postgres_data"));

        let gitignore = std::fs::read_to_string(root.join(".gitignore")).unwrap();
        assert!(gitignore.contains("worktrees/"));
    }

    #[test]
    fn test_setup_rejects_compose_without_web_service() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("proj");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(
            root.join("docker-compose.yml"),
            "services:\n  worker:\n    image: x\n  db:\n    image: postgres:14\n",
        )
        .unwrap();

        let err = SetupManager::new(&root)
            .setup_project(&SetupOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::NoWebService);
    }

    #[test]
    fn test_gitignore_entry_not_duplicated() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("proj");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join(".gitignore"), "worktrees/\n").unwrap();

        let manager = SetupManager::new(&root);
        manager.add_gitignore_entry("worktrees/").unwrap();
        assert_eq!(
            std::fs::read_to_string(root.join(".gitignore")).unwrap(),
            "worktrees/\n"
        );
    }

    #[test]
    fn test_clean_legacy_elements_round_trip() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("proj");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(
            root.join("docker-compose.yml"),
            "services:\n  web:\n    image: x\n    container_name: ${COMPOSE_PROJECT_NAME}-web\n    labels:\n      - caddy.proxy=x.localhost\n    networks:\n      - dockertree_caddy_proxy\nnetworks:\n  dockertree_caddy_proxy:\n    external: true\n",
        )
        .unwrap();

        SetupManager::new(&root).clean_legacy_elements().unwrap();
        let cleaned = std::fs::read_to_string(root.join("docker-compose.yml")).unwrap();
        assert!(!cleaned.contains("caddy.proxy"));
        assert!(!cleaned.contains("${COMPOSE_PROJECT_NAME}"));
    }
}
