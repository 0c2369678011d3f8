//! Compose command builder
//!
//! Detects the compose base command (integrated `docker compose` subcommand,
//! falling back to the legacy standalone binary) and builds bounded compose
//! invocations with the env-file chaining and environment preparation every
//! worktree operation relies on: the project-root `.env` loads first so the
//! worktree-scoped env file can override it.

use crate::errors::{ComposeError, DockertreeError, Result};
use crate::runtime::{timeouts, CommandSpec, ExecOutput};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

/// Which compose entry point is installed on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeBase {
    /// `docker compose …`
    DockerCompose,
    /// Legacy standalone `docker-compose …`
    Standalone,
}

impl ComposeBase {
    fn spec(&self) -> CommandSpec {
        match self {
            Self::DockerCompose => CommandSpec::new("docker").arg("compose"),
            Self::Standalone => CommandSpec::new("docker-compose"),
        }
    }
}

static COMPOSE_BASE: OnceCell<Option<ComposeBase>> = OnceCell::const_new();

/// Detect the compose base command, preferring the integrated subcommand.
///
/// The probe result is cached for the process lifetime. Fails with
/// `compose_unavailable` when neither entry point works.
pub async fn detect_compose_base() -> Result<ComposeBase> {
    let detected = COMPOSE_BASE
        .get_or_init(|| async {
            for base in [ComposeBase::DockerCompose, ComposeBase::Standalone] {
                let probe = base
                    .spec()
                    .arg("version")
                    .timeout(timeouts::INSPECT)
                    .output()
                    .await;
                if matches!(probe, Ok(ref output) if output.success()) {
                    debug!("compose base: {base:?}");
                    return Some(base);
                }
            }
            None
        })
        .await;
    detected.ok_or_else(|| DockertreeError::Compose(ComposeError::NotInstalled))
}

/// Builder for one compose invocation against a single compose file.
#[derive(Debug, Clone)]
pub struct ComposeCommand {
    compose_file: PathBuf,
    working_dir: PathBuf,
    env_files: Vec<PathBuf>,
    project_name: Option<String>,
    profile: Option<String>,
}

impl ComposeCommand {
    pub fn new(compose_file: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            compose_file: compose_file.into(),
            working_dir: working_dir.into(),
            env_files: Vec::new(),
            project_name: None,
            profile: None,
        }
    }

    /// Add the worktree-scoped env file. The working directory's `.env` (if
    /// present) is always chained in first so this one overrides it.
    pub fn with_env_file(mut self, env_file: impl Into<PathBuf>) -> Self {
        self.env_files.push(env_file.into());
        self
    }

    pub fn with_project_name(mut self, project_name: impl Into<String>) -> Self {
        self.project_name = Some(project_name.into());
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Build the full command for the given compose subcommand arguments.
    pub fn build(&self, base: ComposeBase, args: &[&str], timeout: Duration) -> CommandSpec {
        let working_dir = self
            .working_dir
            .canonicalize()
            .unwrap_or_else(|_| self.working_dir.clone());

        let mut spec = base.spec();

        let main_env = working_dir.join(".env");
        if main_env.is_file() {
            spec = spec.args(["--env-file".to_string(), main_env.display().to_string()]);
        }
        for env_file in &self.env_files {
            if env_file.is_file() {
                spec = spec.args(["--env-file".to_string(), env_file.display().to_string()]);
            }
        }

        if let Some(project_name) = &self.project_name {
            spec = spec.args(["-p", project_name.as_str()]);
        }

        spec = spec.args(["-f".to_string(), self.compose_file.display().to_string()]);

        if let Some(profile) = &self.profile {
            spec = spec.args(["--profile", profile.as_str()]);
        }

        spec = spec.args(args.iter().copied());

        spec = spec
            .current_dir(&working_dir)
            .env("PROJECT_ROOT", working_dir.display().to_string())
            .env("COMPOSE_PROJECT_ROOT", working_dir.display().to_string())
            .env("PWD", working_dir.display().to_string());
        if let Some(project_name) = &self.project_name {
            spec = spec.env("COMPOSE_PROJECT_NAME", project_name.clone());
        }

        spec.timeout(timeout)
    }

    async fn run(&self, args: &[&str], timeout: Duration) -> Result<ExecOutput> {
        let base = detect_compose_base().await?;
        if !self.compose_file.is_file() {
            return Err(ComposeError::FileNotFound {
                path: self.compose_file.display().to_string(),
            }
            .into());
        }
        let seconds = timeout.as_secs();
        let output = self.build(base, args, timeout).output().await.map_err(|e| {
            if e.kind() == crate::errors::ErrorKind::Timeout {
                DockertreeError::Compose(ComposeError::Timeout { seconds })
            } else {
                e
            }
        })?;
        if output.success() {
            Ok(output)
        } else {
            Err(ComposeError::CommandFailed {
                message: output.stderr.trim().to_string(),
            }
            .into())
        }
    }

    /// Start services detached.
    #[instrument(skip(self))]
    pub async fn up_detached(&self) -> Result<()> {
        self.run(&["up", "-d"], timeouts::UP).await.map(|_| ())
    }

    /// Start services detached, recreating containers and removing orphans.
    #[instrument(skip(self))]
    pub async fn up_force_recreate(&self) -> Result<()> {
        self.run(
            &["up", "-d", "--force-recreate", "--remove-orphans"],
            timeouts::UP,
        )
        .await
        .map(|_| ())
    }

    /// Stop and remove containers. `remove_images` adds `--rmi local`.
    #[instrument(skip(self))]
    pub async fn down(&self, remove_images: bool) -> Result<()> {
        let args: &[&str] = if remove_images {
            &["down", "--rmi", "local"]
        } else {
            &["down"]
        };
        self.run(args, timeouts::DOWN).await.map(|_| ())
    }

    /// Run arbitrary compose arguments (the CLI passthrough form).
    #[instrument(skip(self, args))]
    pub async fn passthrough(&self, args: &[String]) -> Result<ExecOutput> {
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&refs, timeouts::UP).await
    }
}
