//! Package commands: export, import, list, validate.

use crate::cli::project_context;
use clap::{Args, Subcommand};
use dockertree_core::errors::Result;
use dockertree_core::package::{ImportOptions, PackageManager};
use serde_json::json;
use std::path::PathBuf;

#[derive(Subcommand, Debug)]
pub enum PackagesCommand {
    /// Export a branch environment into a package
    Export(ExportArgs),
    /// Import a package into this (or a fresh) project
    Import(ImportArgs),
    /// List packages in a directory
    List {
        /// Directory to search
        #[arg(default_value = "./packages")]
        dir: PathBuf,
    },
    /// Validate a package's integrity manifest
    Validate {
        /// Package file or directory
        package: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Branch name
    pub branch: String,
    /// Output directory
    #[arg(long, default_value = "./packages")]
    pub output: PathBuf,
    /// Include a HEAD archive of the source tree
    #[arg(long)]
    pub include_code: bool,
    /// Leave the package as a directory instead of a tar.gz
    #[arg(long)]
    pub no_compress: bool,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Package file or directory
    pub package: PathBuf,
    /// Target branch (defaults to the packaged branch)
    #[arg(long)]
    pub branch: Option<String>,
    /// Skip restoring volume data
    #[arg(long)]
    pub no_restore_data: bool,
    /// Force standalone mode (bootstrap a fresh project)
    #[arg(long)]
    pub standalone: bool,
    /// Project directory for standalone mode
    #[arg(long)]
    pub target_directory: Option<PathBuf>,
    /// Apply a production domain to the imported environment
    #[arg(long)]
    pub domain: Option<String>,
    /// Apply an HTTP-only IP override to the imported environment
    #[arg(long, conflicts_with = "domain")]
    pub ip: Option<String>,
    /// Keep DEBUG enabled under a domain/IP override
    #[arg(long)]
    pub debug: bool,
    /// Answer yes to overwrite confirmations
    #[arg(short = 'y', long)]
    pub yes: bool,
}

pub async fn execute(command: PackagesCommand, json_mode: bool) -> Result<serde_json::Value> {
    let manager = PackageManager::new(project_context()?);

    match command {
        PackagesCommand::Export(args) => {
            let outcome = manager
                .export(
                    &args.branch,
                    &args.output,
                    args.include_code,
                    !args.no_compress,
                )
                .await?;
            if !json_mode {
                println!("Package exported: {}", outcome.package_path.display());
            }
            Ok(serde_json::to_value(outcome)?)
        }
        PackagesCommand::Import(args) => {
            let options = ImportOptions {
                target_branch: args.branch,
                restore_data: !args.no_restore_data,
                standalone: args.standalone.then_some(true),
                target_directory: args.target_directory,
                domain: args.domain,
                ip: args.ip,
                debug: args.debug,
                non_interactive: args.yes,
            };
            let outcome = manager.import(&args.package, &options).await?;
            if !json_mode {
                println!(
                    "Package imported to branch '{}' at {}",
                    outcome.branch,
                    outcome.worktree_path.display()
                );
                if outcome.standalone {
                    println!("  project bootstrapped at {}", outcome.project_root.display());
                }
            }
            Ok(serde_json::to_value(outcome)?)
        }
        PackagesCommand::List { dir } => {
            let packages = manager.list(&dir);
            if !json_mode {
                if packages.is_empty() {
                    println!("No packages found in {}", dir.display());
                }
                for package in &packages {
                    println!(
                        "{:<60} {:>10} bytes  {}",
                        package.name,
                        package.size,
                        if package.valid { "valid" } else { "INVALID" }
                    );
                }
            }
            Ok(serde_json::to_value(packages)?)
        }
        PackagesCommand::Validate { package } => {
            let validation = manager.validate(&package)?;
            if !json_mode {
                println!(
                    "{}: {}",
                    package.display(),
                    if validation.valid { "valid" } else { "INVALID" }
                );
                println!("  branch:  {}", validation.metadata.branch_name);
                println!("  project: {}", validation.metadata.project_name);
                println!("  created: {}", validation.metadata.created_at);
            }
            Ok(json!({
                "valid": validation.valid,
                "checksum_valid": validation.checksum_valid,
                "metadata": validation.metadata,
            }))
        }
    }
}
