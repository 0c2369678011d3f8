//! Server-import command: the remote-host side of a push.

use clap::Args;
use dockertree_core::errors::Result;
use dockertree_core::server_import::{ServerImportOptions, ServerImportOrchestrator};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ServerImportArgs {
    /// Uploaded package file
    pub package: PathBuf,
    /// Branch name
    pub branch: String,
    /// Domain for proxy routing
    #[arg(long)]
    pub domain: Option<String>,
    /// HTTP-only IP for proxy routing
    #[arg(long, conflicts_with = "domain")]
    pub ip: Option<String>,
    /// Rebuild images (clearing the builder cache first)
    #[arg(long)]
    pub build: bool,
    /// Keep DEBUG enabled under a domain/IP override
    #[arg(long)]
    pub debug: bool,
    /// Bring the environment up after import
    #[arg(long)]
    pub start: bool,
    /// Base directory for standalone bootstraps
    #[arg(long)]
    pub base_dir: Option<PathBuf>,
}

pub async fn execute_server_import(
    args: ServerImportArgs,
    json_mode: bool,
) -> Result<serde_json::Value> {
    let orchestrator = match args.base_dir {
        Some(base) => ServerImportOrchestrator::with_standalone_base(base),
        None => ServerImportOrchestrator::new(),
    };

    let outcome = orchestrator
        .import_and_start(
            &args.package,
            &args.branch,
            &ServerImportOptions {
                domain: args.domain,
                ip: args.ip,
                build: args.build,
                debug: args.debug,
                start: args.start,
            },
        )
        .await?;

    if !json_mode {
        println!(
            "Imported '{}' into {} ({})",
            outcome.branch,
            outcome.project_root.display(),
            if outcome.standalone { "standalone" } else { "existing project" }
        );
        if let Some(containers) = &outcome.containers {
            println!(
                "  containers: {} running / {} total",
                containers.running, containers.total
            );
        }
    }
    Ok(serde_json::to_value(outcome)?)
}
