//! Push command: export a branch environment and deploy it to a remote host.
//!
//! The transfer uses the system `scp`/`ssh` binaries; the remote side runs
//! this tool's `server-import` against the uploaded package. A successful
//! push saves its target into the worktree's scoped env file so the next
//! push can omit the flags.

use crate::cli::project_context;
use clap::Args;
use dockertree_core::environment::EnvironmentManager;
use dockertree_core::errors::{DockertreeError, Result};
use dockertree_core::package::PackageManager;
use dockertree_core::runtime::CommandSpec;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

const TRANSFER_TIMEOUT: Duration = Duration::from_secs(1800);

#[derive(Args, Debug)]
pub struct PushArgs {
    /// Branch name
    pub branch: String,
    /// Target in `user@host:/path` form (defaults to the saved push target)
    #[arg(long)]
    pub target: Option<String>,
    /// Domain for the remote deployment
    #[arg(long)]
    pub domain: Option<String>,
    /// HTTP-only IP for the remote deployment
    #[arg(long, conflicts_with = "domain")]
    pub ip: Option<String>,
    /// Rebuild images on the remote host
    #[arg(long)]
    pub build: bool,
    /// Include a HEAD archive of the source tree
    #[arg(long)]
    pub include_code: bool,
    /// SSH identity file
    #[arg(long)]
    pub ssh_key: Option<PathBuf>,
    /// Directory for the exported package
    #[arg(long, default_value = "./packages")]
    pub output: PathBuf,
    /// Keep the local package after a successful push
    #[arg(long)]
    pub keep_package: bool,
    /// Request staging certificates on the remote proxy
    #[arg(long)]
    pub staging_certificates: bool,
}

pub async fn execute_push(args: PushArgs, json_mode: bool) -> Result<serde_json::Value> {
    let ctx = project_context()?;
    let env_manager = EnvironmentManager::new(&ctx);
    let saved = env_manager.push_config(&args.branch);
    let deployment = ctx.deployment();

    let target = args
        .target
        .or(saved.scp_target)
        .or(deployment.default_server)
        .ok_or_else(|| {
            DockertreeError::other(
                "no push target; pass --target user@host:/path or configure deployment defaults",
            )
        })?;
    let domain = args.domain.or(saved.domain).or(deployment.default_domain);
    let ip = if domain.is_some() {
        None
    } else {
        args.ip.or(saved.ip).or(deployment.default_ip)
    };
    let ssh_key = args
        .ssh_key
        .or(deployment.ssh_key.map(PathBuf::from));

    // The flag travels inside the packaged env file; the remote proxy start
    // sources it from there.
    if args.staging_certificates {
        env_manager.set_staging_certificate_flag(&args.branch, true)?;
    }

    // 1. Export the environment.
    let export = PackageManager::new(ctx.clone())
        .export(&args.branch, &args.output, args.include_code, true)
        .await?;
    let package_path = export.package_path.clone();
    let package_name = package_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "package.tar.gz".to_string());

    let (user_host, remote_dir) = target.split_once(':').unwrap_or((target.as_str(), "~"));
    let remote_package = format!("{remote_dir}/{package_name}");

    // 2. Upload.
    info!("Uploading {package_name} to {user_host}...");
    let mut scp = CommandSpec::new("scp").timeout(TRANSFER_TIMEOUT);
    if let Some(key) = &ssh_key {
        scp = scp.args(["-i".to_string(), key.display().to_string()]);
    }
    let output = scp
        .arg(package_path.display().to_string())
        .arg(format!("{user_host}:{remote_package}"))
        .output()
        .await?;
    if !output.success() {
        return Err(DockertreeError::other(format!(
            "scp failed: {}",
            output.stderr.trim()
        )));
    }

    // 3. Run the remote import.
    info!("Running remote import on {user_host}...");
    let remote_binary =
        std::env::var("DOCKERTREE_PATH").unwrap_or_else(|_| "dockertree".to_string());
    let mut remote_cmd = format!(
        "{remote_binary} server-import {remote_package} {branch} --start",
        branch = args.branch
    );
    if let Some(domain) = &domain {
        remote_cmd.push_str(&format!(" --domain {domain}"));
    }
    if let Some(ip) = &ip {
        remote_cmd.push_str(&format!(" --ip {ip}"));
    }
    if args.build {
        remote_cmd.push_str(" --build");
    }

    let mut ssh = CommandSpec::new("ssh").timeout(TRANSFER_TIMEOUT);
    if let Some(key) = &ssh_key {
        ssh = ssh.args(["-i".to_string(), key.display().to_string()]);
    }
    let output = ssh.arg(user_host).arg(&remote_cmd).output().await?;
    if !output.success() {
        return Err(DockertreeError::other(format!(
            "remote import failed: {}",
            output.stderr.trim()
        )));
    }

    // 4. Persist the target for the next push.
    env_manager.save_push_config(&args.branch, &target, domain.as_deref(), ip.as_deref())?;

    if !args.keep_package {
        let _ = std::fs::remove_file(&package_path);
    }

    if !json_mode {
        println!("Pushed '{}' to {target}", args.branch);
        if let Some(domain) = &domain {
            println!("  url: https://{domain}");
        } else if let Some(ip) = &ip {
            println!("  url: http://{ip}");
        }
    }
    Ok(json!({
        "branch": args.branch,
        "target": target,
        "domain": domain,
        "ip": ip,
        "package": package_name,
    }))
}
