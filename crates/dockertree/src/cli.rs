use crate::commands::{packages, proxy, push, server_import, setup, volumes, worktree};
use crate::output;
use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "dockertree",
    version,
    about = "Isolated, per-branch Docker environments",
    long_about = "Provision an isolated Docker environment per Git branch: a linked \
                  worktree checkout, cloned data volumes, dedicated containers, and a \
                  routable subdomain behind a shared reverse proxy."
)]
pub struct Cli {
    /// Emit one JSON document instead of human-readable output
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize dockertree for this project
    Setup(setup::SetupArgs),

    /// Create a worktree environment for a branch
    Create {
        /// Branch name
        branch: String,
    },

    /// Start a worktree environment
    Start {
        /// Branch name
        branch: String,
    },

    /// Stop a worktree environment
    Stop {
        /// Branch name
        branch: String,
        /// Also remove locally built images
        #[arg(long)]
        remove_images: bool,
    },

    /// Remove a worktree environment (worktree, volumes, containers)
    Remove {
        /// Branch name
        branch: String,
        /// Delete the branch even if it is not merged
        #[arg(short, long)]
        force: bool,
        /// Keep the git branch
        #[arg(long)]
        keep_branch: bool,
    },

    /// Remove a worktree environment and delete its branch
    Delete {
        /// Branch name
        branch: String,
        /// Delete the branch even if it is not merged
        #[arg(short, long)]
        force: bool,
    },

    /// List all worktrees
    List,

    /// Show detailed information about a worktree environment
    Info {
        /// Branch name
        branch: String,
    },

    /// Manage worktree data volumes
    #[command(subcommand)]
    Volumes(volumes::VolumesCommand),

    /// Manage the shared reverse proxy
    #[command(subcommand)]
    Proxy(proxy::ProxyCommand),

    /// Export, import, and inspect environment packages
    #[command(subcommand)]
    Packages(packages::PackagesCommand),

    /// Export a branch environment and deploy it to a remote host
    Push(push::PushArgs),

    /// Receive a pushed package on this host and bring it up
    ServerImport(server_import::ServerImportArgs),

    /// Run docker compose against a worktree with its files resolved
    Compose {
        /// Branch name
        branch: String,
        /// Arguments passed through to the compose tool
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

impl Cli {
    pub async fn dispatch(self) -> Result<()> {
        let json = self.json;
        let result = match self.command {
            Commands::Setup(args) => setup::execute_setup(args).await,
            Commands::Create { branch } => worktree::execute_create(&branch, json).await,
            Commands::Start { branch } => worktree::execute_start(&branch, json).await,
            Commands::Stop {
                branch,
                remove_images,
            } => worktree::execute_stop(&branch, remove_images, json).await,
            Commands::Remove {
                branch,
                force,
                keep_branch,
            } => worktree::execute_remove(&branch, force, !keep_branch, json).await,
            Commands::Delete { branch, force } => {
                worktree::execute_remove(&branch, force, true, json).await
            }
            Commands::List => worktree::execute_list(json).await,
            Commands::Info { branch } => worktree::execute_info(&branch, json).await,
            Commands::Volumes(command) => volumes::execute(command, json).await,
            Commands::Proxy(command) => proxy::execute(command, json).await,
            Commands::Packages(command) => packages::execute(command, json).await,
            Commands::Push(args) => push::execute_push(args, json).await,
            Commands::ServerImport(args) => server_import::execute_server_import(args, json).await,
            Commands::Compose { branch, args } => {
                worktree::execute_compose_passthrough(&branch, &args).await
            }
        };
        output::finish(json, result)
    }
}

/// Resolve the project context from the working directory.
///
/// Fractal operation: when invoked from inside a worktree directory, that
/// worktree becomes the project root, so commands run there operate on the
/// worktree as an independent project.
pub fn project_context() -> Result<dockertree_core::config::ProjectContext, dockertree_core::errors::DockertreeError>
{
    use dockertree_core::config::ProjectContext;
    use dockertree_core::workspace::{detect_execution_context, ExecutionContext};

    let root = dockertree_core::workspace::find_project_root_from_cwd()?;
    let ctx = ProjectContext::new(root);

    let cwd = std::env::current_dir()?;
    if let ExecutionContext::Worktree { path, .. } =
        detect_execution_context(&ctx.root, ctx.worktree_dir(), &cwd)
    {
        return Ok(ProjectContext::new(path));
    }
    Ok(ctx)
}

