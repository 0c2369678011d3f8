//! Worktree lifecycle commands: create, start, stop, remove, list, info.

use crate::cli::project_context;
use dockertree_core::errors::Result;
use dockertree_core::orchestrator::{CreateStatus, StopStatus, WorktreeOrchestrator};
use serde_json::json;
use tracing::instrument;

fn orchestrator() -> Result<WorktreeOrchestrator> {
    Ok(WorktreeOrchestrator::new(project_context()?))
}

#[instrument]
pub async fn execute_create(branch: &str, json_mode: bool) -> Result<serde_json::Value> {
    let outcome = orchestrator()?.create(branch).await?;
    if !json_mode {
        match outcome.status {
            CreateStatus::Created => {
                println!("Worktree created for '{branch}'");
                println!("  path: {}", outcome.worktree_path.display());
                println!("Next: dockertree start {branch}");
            }
            CreateStatus::AlreadyExists => {
                println!(
                    "Worktree for '{branch}' already exists at {}",
                    outcome.worktree_path.display()
                );
            }
        }
    }
    Ok(serde_json::to_value(outcome)?)
}

#[instrument]
pub async fn execute_start(branch: &str, json_mode: bool) -> Result<serde_json::Value> {
    let outcome = orchestrator()?.start(branch).await?;
    if !json_mode {
        println!("Environment started for '{branch}'");
        println!("  compose project: {}", outcome.compose_project_name);
        println!("  url: http://{}", outcome.domain_name);
        if !outcome.proxy_configured {
            println!("  note: proxy reconfiguration pending; routes appear shortly");
        }
    }
    Ok(serde_json::to_value(outcome)?)
}

#[instrument]
pub async fn execute_stop(
    branch: &str,
    remove_images: bool,
    json_mode: bool,
) -> Result<serde_json::Value> {
    let outcome = orchestrator()?.stop(branch, remove_images).await?;
    if !json_mode {
        match outcome.status {
            StopStatus::Stopped => println!("Environment stopped for '{branch}'"),
            StopStatus::NotFound => println!("Worktree '{branch}' does not exist, nothing to stop"),
            StopStatus::NoCompose | StopStatus::NoFiles => {
                println!("Worktree '{branch}' has no compose/env files, nothing to stop")
            }
        }
    }
    Ok(serde_json::to_value(outcome)?)
}

#[instrument]
pub async fn execute_remove(
    branch: &str,
    force: bool,
    delete_branch: bool,
    json_mode: bool,
) -> Result<serde_json::Value> {
    let outcome = orchestrator()?.remove(branch, force, delete_branch).await?;
    if !json_mode {
        println!("Removed worktree environment '{branch}'");
        if outcome.branch_deleted {
            println!("  branch deleted");
        } else if delete_branch {
            println!("  branch preserved (checked out or unmerged; use --force)");
        }
    }
    Ok(serde_json::to_value(outcome)?)
}

#[instrument]
pub async fn execute_list(json_mode: bool) -> Result<serde_json::Value> {
    let worktrees = orchestrator()?.list().await?;
    if !json_mode {
        if worktrees.is_empty() {
            println!("No worktrees found");
        }
        for entry in &worktrees {
            println!(
                "{:<30} {:<12} {}",
                entry.branch,
                &entry.commit[..entry.commit.len().min(12)],
                entry.path.display()
            );
        }
    }
    Ok(serde_json::to_value(worktrees)?)
}

#[instrument]
pub async fn execute_info(branch: &str, json_mode: bool) -> Result<serde_json::Value> {
    let info = orchestrator()?.info(branch).await?;
    if !json_mode {
        println!("Branch:   {}", info.branch);
        println!("Project:  {}", info.project_name);
        println!("Path:     {}", info.worktree_path.display());
        println!("Status:   {}", info.status);
        println!("URL:      {}", info.access_url);
        if !info.containers.is_empty() {
            println!("Containers:");
            for container in &info.containers {
                println!("  {:<40} {}", container.name, container.status);
            }
        }
        if !info.volumes.is_empty() {
            println!("Volumes:");
            for volume in &info.volumes {
                println!(
                    "  {:<40} {}",
                    volume.name,
                    if volume.exists { "present" } else { "missing" }
                );
            }
        }
    }
    Ok(serde_json::to_value(info)?)
}

#[instrument(skip(args))]
pub async fn execute_compose_passthrough(
    branch: &str,
    args: &[String],
) -> Result<serde_json::Value> {
    let output = orchestrator()?.compose_passthrough(branch, args).await?;
    if !output.stdout.is_empty() {
        print!("{}", output.stdout);
    }
    if !output.stderr.is_empty() {
        eprint!("{}", output.stderr);
    }
    Ok(json!({ "exit_code": output.exit_code }))
}
