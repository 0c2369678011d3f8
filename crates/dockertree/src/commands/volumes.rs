//! Volume commands: list, backup, restore, clean, size.

use crate::cli::project_context;
use clap::Subcommand;
use dockertree_core::errors::Result;
use dockertree_core::volumes::VolumeManager;
use serde_json::json;
use std::path::PathBuf;

#[derive(Subcommand, Debug)]
pub enum VolumesCommand {
    /// List all worktree data volumes on this host
    List,

    /// Back up a worktree's volumes into a combined archive
    Backup {
        /// Branch name
        branch: String,
        /// Directory for the backup archive
        #[arg(long, default_value = "./backups")]
        output: PathBuf,
    },

    /// Restore a worktree's volumes from a backup or package file
    Restore {
        /// Branch name
        branch: String,
        /// Backup archive or `.dockertree-package.tar.gz` file
        backup_file: PathBuf,
    },

    /// Remove a worktree's volumes
    Clean {
        /// Branch name
        branch: String,
    },

    /// Show the size of each worktree volume
    Size,
}

pub async fn execute(command: VolumesCommand, json_mode: bool) -> Result<serde_json::Value> {
    let ctx = project_context()?;
    let manager = VolumeManager::new(&ctx);

    match command {
        VolumesCommand::List => {
            let volumes = manager.list_all_worktree_volumes().await?;
            if !json_mode {
                if volumes.is_empty() {
                    println!("No worktree volumes found");
                }
                for volume in &volumes {
                    println!("{volume}");
                }
            }
            Ok(json!({ "volumes": volumes }))
        }
        VolumesCommand::Backup { branch, output } => {
            let backup_file = manager.backup_volumes(&branch, &output).await?;
            if !json_mode {
                println!("Backup created: {}", backup_file.display());
            }
            Ok(json!({ "branch": branch, "backup_file": backup_file }))
        }
        VolumesCommand::Restore {
            branch,
            backup_file,
        } => {
            let summary = manager.restore_volumes(&branch, &backup_file).await?;
            if !json_mode {
                println!(
                    "Volumes restored for '{branch}': {} restored, {} skipped",
                    summary.restored, summary.skipped
                );
            }
            Ok(json!({ "branch": branch, "summary": summary }))
        }
        VolumesCommand::Clean { branch } => {
            manager.remove_volumes(&branch).await?;
            if !json_mode {
                println!("Volumes removed for '{branch}'");
            }
            Ok(json!({ "branch": branch, "removed": true }))
        }
        VolumesCommand::Size => {
            let sizes = manager.volume_sizes().await?;
            if !json_mode {
                if sizes.is_empty() {
                    println!("No worktree volumes found");
                }
                for (volume, size) in &sizes {
                    println!("{size:<10} {volume}");
                }
            }
            let sizes: Vec<_> = sizes
                .into_iter()
                .map(|(name, size)| json!({ "name": name, "size": size }))
                .collect();
            Ok(json!({ "volumes": sizes }))
        }
    }
}
