//! Project setup command.

use clap::Args;
use dockertree_core::compose::detect_compose_base;
use dockertree_core::errors::{GitError, Result};
use dockertree_core::git::GitManager;
use dockertree_core::runtime::DockerCli;
use dockertree_core::setup::{SetupManager, SetupOptions};
use std::path::Path;
use tracing::warn;

#[derive(Args, Debug)]
pub struct SetupArgs {
    /// Project name (defaults to the directory name)
    #[arg(long)]
    pub project_name: Option<String>,
    /// Add the worktree directory to .gitignore
    #[arg(long)]
    pub update_gitignore: bool,
    /// Strip prior per-worktree projections from the base compose file
    #[arg(long)]
    pub clean_legacy: bool,
}

/// Prerequisites: a repository to attach worktrees to, and a usable
/// container runtime with its compose tool.
async fn check_prerequisites(project_root: &Path) -> Result<()> {
    if !GitManager::at(project_root).is_git_repo().await {
        return Err(GitError::NotARepo {
            path: project_root.display().to_string(),
        }
        .into());
    }
    DockerCli::new().ping().await?;
    detect_compose_base().await?;
    Ok(())
}

pub async fn execute_setup(args: SetupArgs) -> Result<serde_json::Value> {
    let cwd = std::env::current_dir()?;
    let manager = SetupManager::new(&cwd);

    if args.clean_legacy {
        let cleaned = manager.clean_legacy_elements()?;
        println!("Cleaned legacy elements from {}", cleaned.display());
        return Ok(serde_json::json!({ "cleaned": cleaned }));
    }

    if let Err(e) = check_prerequisites(&cwd).await {
        // Missing docker blocks start, not setup; a missing repo blocks both.
        match e.kind() {
            dockertree_core::errors::ErrorKind::NotARepo => return Err(e),
            _ => warn!("Prerequisite check failed ({e}); continuing with file setup"),
        }
    }

    let outcome = manager.setup_project(&SetupOptions {
        project_name: args.project_name,
        update_gitignore: args.update_gitignore,
    })?;
    println!("Setup complete");
    println!("  config:  {}", outcome.config_path.display());
    println!("  compose: {}", outcome.compose_path.display());
    println!("Next: dockertree create <branch>");
    Ok(serde_json::to_value(outcome)?)
}
