//! Project configuration and derived naming
//!
//! Loads `.dockertree/config.yml`, falls back to sensible defaults when it is
//! absent, and computes every derived identifier the engine uses: compose
//! project names, container names, per-worktree and source volume names,
//! domains, and allowed-host lists.

use crate::errors::{ConfigError, Result};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory holding per-project engine state.
pub const DOCKERTREE_DIR: &str = ".dockertree";

/// Shared external proxy network joined by every worktree's web service.
pub const CADDY_NETWORK: &str = "dockertree_caddy_proxy";

/// Reserved container name for the shared proxy.
pub const PROXY_CONTAINER: &str = "dockertree_caddy_proxy";

/// Reserved container name for the proxy's label watcher.
pub const PROXY_MONITOR_CONTAINER: &str = "caddy_monitor";

/// Compose project name used exclusively for the shared proxy stack.
pub const PROXY_PROJECT_NAME: &str = "dockertree-proxy";

/// File name of the transformed per-worktree compose document.
pub const COMPOSE_WORKTREE_FILE: &str = "docker-compose.worktree.yml";

/// File name of the scoped env file inside a worktree's `.dockertree/`.
pub const ENV_DOCKERTREE_FILE: &str = "env.dockertree";

/// Shared proxy volumes, never part of a worktree's volume set.
pub const CADDY_DATA_VOLUME: &str = "dockertree_caddy_data";
pub const CADDY_CONFIG_VOLUME: &str = "dockertree_caddy_config";

/// Branches that can never be deleted through the engine.
pub static PROTECTED_BRANCHES: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["main", "master", "develop", "production", "staging"].into());

/// Engine subcommand names that cannot be used as worktree names.
pub static RESERVED_NAMES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "start-proxy",
        "stop-proxy",
        "start",
        "stop",
        "create",
        "up",
        "down",
        "delete",
        "remove",
        "remove-all",
        "delete-all",
        "list",
        "info",
        "prune",
        "volumes",
        "packages",
        "proxy",
        "push",
        "setup",
        "help",
        "completion",
        "-D",
        "-r",
    ]
    .into()
});

static BRANCH_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("valid branch name pattern"));

/// Known per-worktree volume types, cloned from the canonical source volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeKind {
    Postgres,
    Redis,
    Media,
}

impl VolumeKind {
    pub const ALL: [VolumeKind; 3] = [VolumeKind::Postgres, VolumeKind::Redis, VolumeKind::Media];

    /// Volume name suffix, shared between source and per-worktree volumes.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres_data",
            Self::Redis => "redis_data",
            Self::Media => "media_files",
        }
    }
}

impl std::fmt::Display for VolumeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Per-service entry in `config.yml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub container_name_template: String,
}

/// Deployment defaults, all optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeploymentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<String>,
}

/// Parsed `.dockertree/config.yml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    pub project_name: String,
    #[serde(default = "default_caddy_network")]
    pub caddy_network: String,
    #[serde(default = "default_worktree_dir")]
    pub worktree_dir: String,
    #[serde(default)]
    pub services: IndexMap<String, ServiceConfig>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub environment: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentConfig>,
}

fn default_caddy_network() -> String {
    CADDY_NETWORK.to_string()
}

fn default_worktree_dir() -> String {
    "worktrees".to_string()
}

impl ProjectConfig {
    /// Load configuration from `{root}/.dockertree/config.yml`.
    ///
    /// A missing or unreadable file falls back to [`ProjectConfig::default_for`],
    /// so commands keep working against projects that were never set up.
    pub fn load(project_root: &Path) -> ProjectConfig {
        let config_path = project_root.join(DOCKERTREE_DIR).join("config.yml");
        match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<ProjectConfig>(&content) {
                Ok(config) => config,
                Err(e) => {
                    debug!(
                        "Failed to parse {}: {e}; using defaults",
                        config_path.display()
                    );
                    Self::default_for(project_root)
                }
            },
            Err(_) => Self::default_for(project_root),
        }
    }

    /// Load configuration, failing when the file is missing or invalid.
    pub fn load_strict(project_root: &Path) -> Result<ProjectConfig> {
        let config_path = project_root.join(DOCKERTREE_DIR).join("config.yml");
        let content = std::fs::read_to_string(&config_path).map_err(|_| ConfigError::NotFound {
            path: config_path.display().to_string(),
        })?;
        let config: ProjectConfig =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
                message: e.to_string(),
            })?;
        Ok(config)
    }

    /// Default configuration for projects without setup.
    pub fn default_for(project_root: &Path) -> ProjectConfig {
        let project_name = project_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "project".to_string());

        let mut services = IndexMap::new();
        for name in ["web", "db", "redis"] {
            services.insert(
                name.to_string(),
                ServiceConfig {
                    container_name_template: format!("${{COMPOSE_PROJECT_NAME}}-{name}"),
                },
            );
        }

        let mut environment = IndexMap::new();
        environment.insert("DEBUG".to_string(), "True".to_string());
        environment.insert(
            "ALLOWED_HOSTS".to_string(),
            "localhost,127.0.0.1,*.localhost,web".to_string(),
        );

        ProjectConfig {
            project_name,
            caddy_network: CADDY_NETWORK.to_string(),
            worktree_dir: "worktrees".to_string(),
            services,
            volumes: VolumeKind::ALL.iter().map(|v| v.suffix().to_string()).collect(),
            environment,
            deployment: None,
        }
    }

    /// Serialize and write the configuration to `{root}/.dockertree/config.yml`.
    pub fn save(&self, project_root: &Path) -> Result<PathBuf> {
        let dir = project_root.join(DOCKERTREE_DIR);
        std::fs::create_dir_all(&dir)?;
        let config_path = dir.join("config.yml");
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }
}

/// Sanitize a project name for use in Docker resource names and hostnames.
///
/// Lowercases, maps `_` to `-`, maps every other non `[a-z0-9-]` character to
/// `-`, and trims leading/trailing dashes. Idempotent.
pub fn sanitize_project_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        let lc = ch.to_ascii_lowercase();
        if lc.is_ascii_alphanumeric() {
            out.push(lc);
        } else {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// Validate branch name format (`^[A-Za-z0-9_.-]+$`).
pub fn is_valid_branch_name(branch: &str) -> bool {
    !branch.is_empty() && BRANCH_NAME_RE.is_match(branch)
}

/// Whether the name collides with an engine subcommand.
pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_NAMES.contains(name)
}

/// Whether the branch is protected from deletion.
pub fn is_protected_branch(branch: &str) -> bool {
    PROTECTED_BRANCHES.contains(branch)
}

/// A resolved project: root path plus parsed configuration.
///
/// Built once at the outer edge of each command and passed by reference into
/// every component, so project detection never depends on global state.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub root: PathBuf,
    pub config: ProjectConfig,
}

impl ProjectContext {
    pub fn new(root: PathBuf) -> Self {
        let config = ProjectConfig::load(&root);
        Self { root, config }
    }

    /// Unsanitized project name, as written in the base compose declarations.
    pub fn project_name(&self) -> &str {
        &self.config.project_name
    }

    /// Sanitized project name used in derived docker resource names.
    pub fn sanitized_name(&self) -> String {
        sanitize_project_name(&self.config.project_name)
    }

    pub fn worktree_dir(&self) -> &str {
        &self.config.worktree_dir
    }

    pub fn caddy_network(&self) -> &str {
        &self.config.caddy_network
    }

    /// `{sanitized_project}-{branch}` — the compose project for a worktree.
    pub fn compose_project_name(&self, branch: &str) -> String {
        format!("{}-{branch}", self.sanitized_name())
    }

    /// `{compose_project}-{service}` — the container name for a service.
    pub fn container_name(&self, branch: &str, service: &str) -> String {
        format!("{}-{service}", self.compose_project_name(branch))
    }

    /// Container name for a worktree's web service.
    pub fn web_container_name(&self, branch: &str) -> String {
        self.container_name(branch, "web")
    }

    /// `{compose_project}_{suffix}` — a per-worktree volume name.
    pub fn volume_name(&self, branch: &str, kind: VolumeKind) -> String {
        format!("{}_{}", self.compose_project_name(branch), kind.suffix())
    }

    /// All per-worktree volume names in declaration order.
    pub fn volume_names(&self, branch: &str) -> Vec<(VolumeKind, String)> {
        VolumeKind::ALL
            .iter()
            .map(|kind| (*kind, self.volume_name(branch, *kind)))
            .collect()
    }

    /// Canonical source volume name, using the *unsanitized* project name for
    /// compatibility with the base compose declarations.
    pub fn source_volume_name(&self, kind: VolumeKind) -> String {
        format!("{}_{}", self.project_name(), kind.suffix())
    }

    pub fn source_volume_names(&self) -> Vec<(VolumeKind, String)> {
        VolumeKind::ALL
            .iter()
            .map(|kind| (*kind, self.source_volume_name(*kind)))
            .collect()
    }

    /// Default routable host for a worktree.
    pub fn domain(&self, branch: &str) -> String {
        format!("{}.localhost", self.compose_project_name(branch))
    }

    /// ALLOWED_HOSTS list: `localhost, 127.0.0.1, extras…, {web container}, web`.
    pub fn allowed_hosts_with(&self, branch: &str, extras: &[&str]) -> String {
        let mut hosts = vec!["localhost".to_string(), "127.0.0.1".to_string()];
        hosts.extend(extras.iter().map(|s| s.to_string()));
        hosts.push(self.web_container_name(branch));
        hosts.push("web".to_string());
        hosts.join(",")
    }

    /// ALLOWED_HOSTS for local operation: the worktree subdomain plus a
    /// `*.localhost` wildcard fallback.
    pub fn allowed_hosts(&self, branch: &str) -> String {
        let subdomain = self.domain(branch);
        self.allowed_hosts_with(branch, &[&subdomain, "*.localhost"])
    }

    /// Absolute path to the worktree directory for a branch.
    pub fn worktree_path(&self, branch: &str) -> PathBuf {
        self.root.join(self.worktree_dir()).join(branch)
    }

    /// Legacy sibling-directory location used by older layouts.
    pub fn legacy_worktree_path(&self, branch: &str) -> PathBuf {
        self.root
            .parent()
            .map(|p| p.join(branch))
            .unwrap_or_else(|| self.root.join(branch))
    }

    /// Deployment defaults from config, if present.
    pub fn deployment(&self) -> DeploymentConfig {
        self.config.deployment.clone().unwrap_or_default()
    }
}
