//! Shared proxy commands: start, stop, status.

use crate::cli::project_context;
use clap::Subcommand;
use dockertree_core::errors::Result;
use dockertree_core::proxy::ProxyManager;
use serde_json::json;

#[derive(Subcommand, Debug)]
pub enum ProxyCommand {
    /// Start the shared reverse proxy
    Start,
    /// Stop the shared reverse proxy
    Stop,
    /// Show proxy status
    Status,
}

pub async fn execute(command: ProxyCommand, json_mode: bool) -> Result<serde_json::Value> {
    let ctx = project_context()?;
    let proxy = ProxyManager::new(&ctx);

    match command {
        ProxyCommand::Start => {
            proxy.start().await?;
            if !json_mode {
                println!("Shared proxy is running");
            }
            Ok(json!({ "running": true }))
        }
        ProxyCommand::Stop => {
            proxy.stop().await?;
            if !json_mode {
                println!("Shared proxy stopped");
            }
            Ok(json!({ "running": false }))
        }
        ProxyCommand::Status => {
            let status = proxy.status().await;
            if !json_mode {
                println!("running:        {}", status.running);
                println!("compose file:   {}", status.compose_template_exists);
                println!("caddyfile:      {}", status.caddyfile_exists);
                println!("network:        {}", status.network_exists);
            }
            Ok(serde_json::to_value(status)?)
        }
    }
}
