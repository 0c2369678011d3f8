//! Shared proxy lifecycle
//!
//! One host-wide Caddy reverse proxy routes every worktree by subdomain,
//! discovered from `caddy.proxy=…` labels on running containers. A companion
//! watcher container regenerates the proxy configuration from those labels.
//! Both run under a reserved compose project name and share two external
//! volumes and the external proxy network.

use crate::compose::ComposeCommand;
use crate::config::{
    ProjectContext, CADDY_CONFIG_VOLUME, CADDY_DATA_VOLUME, CADDY_NETWORK,
    PROXY_CONTAINER, PROXY_MONITOR_CONTAINER, PROXY_PROJECT_NAME,
};
use crate::errors::Result;
use crate::runtime::{timeouts, CommandSpec, DockerCli};
use crate::workspace::env_dockertree_path;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Compose document for the shared proxy stack. Rendered to a temporary file
/// with the runtime asset paths substituted before every invocation.
const PROXY_COMPOSE_TEMPLATE: &str = r#"services:
  caddy:
    image: caddy:2-alpine
    container_name: dockertree_caddy_proxy
    restart: unless-stopped
    ports:
      - "80:80"
      - "443:443"
    environment:
      - USE_STAGING_CERTIFICATES=${USE_STAGING_CERTIFICATES:-0}
      - CADDY_EMAIL=${CADDY_EMAIL:-}
    volumes:
      - {CADDYFILE_PATH}:/etc/caddy/Caddyfile
      - dockertree_caddy_data:/data
      - dockertree_caddy_config:/config
    networks:
      - dockertree_caddy_proxy

  caddy-monitor:
    image: docker:27-cli
    container_name: caddy_monitor
    restart: unless-stopped
    entrypoint: ["/bin/sh", "/monitor/caddy-docker-monitor.sh"]
    volumes:
      - {MONITOR_SCRIPT_PATH}:/monitor/caddy-docker-monitor.sh:ro
      - dockertree_caddy_config:/config
      - /var/run/docker.sock:/var/run/docker.sock:ro
    networks:
      - dockertree_caddy_proxy

volumes:
  dockertree_caddy_data:
    external: true
    name: dockertree_caddy_data
  dockertree_caddy_config:
    external: true
    name: dockertree_caddy_config

networks:
  dockertree_caddy_proxy:
    external: true
"#;

/// Base Caddyfile shipped with the proxy. Routes are generated from
/// container labels by the watcher and imported here.
const CADDYFILE_TEMPLATE: &str = r#"{
	admin :2019
	auto_https disable_redirects
}

import /config/routes/*.caddy
"#;

/// Label watcher shipped with the proxy. Regenerates one route file per
/// labeled container and reloads the proxy over its admin socket.
const MONITOR_SCRIPT: &str = r#"#!/bin/sh
# Watch running containers for caddy.proxy labels and regenerate routes.
# Usage: caddy-docker-monitor.sh [--once]

ROUTES_DIR=/config/routes
PROXY_CONTAINER=dockertree_caddy_proxy

generate() {
    mkdir -p "$ROUTES_DIR"
    : > "$ROUTES_DIR/generated.caddy"
    docker ps --filter "label=caddy.proxy" --format '{{.Names}}' | while read -r name; do
        host=$(docker inspect -f '{{index .Config.Labels "caddy.proxy"}}' "$name")
        target=$(docker inspect -f '{{index .Config.Labels "caddy.proxy.reverse_proxy"}}' "$name")
        [ -n "$host" ] && [ -n "$target" ] || continue
        printf '%s {\n\treverse_proxy %s\n}\n' "$host" "$target" >> "$ROUTES_DIR/generated.caddy"
    done
    docker exec "$PROXY_CONTAINER" caddy reload --config /etc/caddy/Caddyfile 2>/dev/null || true
}

if [ "$1" = "--once" ]; then
    generate
    exit 0
fi

while true; do
    generate
    sleep 5
done
"#;

/// Health summary of the shared proxy.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProxyStatus {
    pub running: bool,
    pub compose_template_exists: bool,
    pub caddyfile_exists: bool,
    pub network_exists: bool,
}

/// Manager for the single shared proxy on this host.
pub struct ProxyManager {
    project_root: PathBuf,
    docker: DockerCli,
}

impl ProxyManager {
    pub fn new(ctx: &ProjectContext) -> Self {
        Self {
            project_root: ctx.root.clone(),
            docker: DockerCli::new(),
        }
    }

    /// Host directory holding the shipped proxy assets (Caddyfile and the
    /// watcher script), materialized on first use.
    pub fn assets_dir() -> PathBuf {
        let base = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        base.join(".dockertree").join("proxy")
    }

    fn caddyfile_path() -> PathBuf {
        Self::assets_dir().join("Caddyfile.dockertree")
    }

    fn monitor_script_path() -> PathBuf {
        Self::assets_dir().join("caddy-docker-monitor.sh")
    }

    fn write_assets() -> Result<()> {
        let dir = Self::assets_dir();
        std::fs::create_dir_all(&dir)?;
        write_if_changed(&Self::caddyfile_path(), CADDYFILE_TEMPLATE)?;
        write_if_changed(&Self::monitor_script_path(), MONITOR_SCRIPT)?;
        Ok(())
    }

    fn rendered_compose() -> String {
        PROXY_COMPOSE_TEMPLATE
            .replace(
                "{CADDYFILE_PATH}",
                &Self::caddyfile_path().display().to_string(),
            )
            .replace(
                "{MONITOR_SCRIPT_PATH}",
                &Self::monitor_script_path().display().to_string(),
            )
    }

    /// Render the proxy compose into a temporary file and build its command.
    fn proxy_compose(&self, temp: &Path) -> ComposeCommand {
        let mut command =
            ComposeCommand::new(temp, &self.project_root).with_project_name(PROXY_PROJECT_NAME);
        // The project-root scoped env file feeds the staging-certificates
        // flag (and CADDY_EMAIL) into the proxy template.
        let env_file = env_dockertree_path(&self.project_root);
        if env_file.is_file() {
            command = command.with_env_file(env_file);
        }
        command
    }

    pub async fn is_running(&self) -> bool {
        self.docker.container_running(PROXY_CONTAINER).await
    }

    /// Start the shared proxy.
    ///
    /// Creates the external network and shared volumes if absent. An already
    /// running proxy is success; a stopped container is restarted, and one
    /// that refuses to start is removed (with its watcher) so compose can
    /// recreate both.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        info!("Starting shared proxy container");
        self.docker.create_network(CADDY_NETWORK).await?;
        for volume in [CADDY_DATA_VOLUME, CADDY_CONFIG_VOLUME] {
            if !self.docker.volume_exists(volume).await {
                info!("Creating volume: {volume}");
                self.docker.create_volume(volume).await?;
            }
        }

        if self.is_running().await {
            info!("Shared proxy container is already running");
            return Ok(());
        }
        if self.docker.container_exists(PROXY_CONTAINER).await {
            info!("Found existing {PROXY_CONTAINER} container, attempting to restart...");
            match self.docker.start_container(PROXY_CONTAINER).await {
                Ok(()) => {
                    info!("Restarted {PROXY_CONTAINER}");
                    return Ok(());
                }
                Err(e) => {
                    warn!("Failed to restart {PROXY_CONTAINER} ({e}); removing for recreation");
                    self.docker.remove_container(PROXY_CONTAINER, true).await?;
                    let _ = self
                        .docker
                        .remove_container(PROXY_MONITOR_CONTAINER, true)
                        .await;
                }
            }
        }

        Self::write_assets()?;
        let temp = tempfile::Builder::new()
            .prefix("dockertree-proxy-")
            .suffix(".yml")
            .tempfile()?;
        std::fs::write(temp.path(), Self::rendered_compose())?;

        self.proxy_compose(temp.path()).up_detached().await?;
        info!("Shared proxy container started");
        Ok(())
    }

    /// Stop the shared proxy stack.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping shared proxy container");
        Self::write_assets()?;
        let temp = tempfile::Builder::new()
            .prefix("dockertree-proxy-")
            .suffix(".yml")
            .tempfile()?;
        std::fs::write(temp.path(), Self::rendered_compose())?;

        self.proxy_compose(temp.path()).down(false).await
    }

    pub async fn status(&self) -> ProxyStatus {
        // Materializing assets here keeps status truthful on first run.
        let assets_ok = Self::write_assets().is_ok();
        ProxyStatus {
            running: self.is_running().await,
            compose_template_exists: assets_ok,
            caddyfile_exists: Self::caddyfile_path().is_file(),
            network_exists: self.docker.network_exists(CADDY_NETWORK).await,
        }
    }

    /// Trigger one label-based reconfiguration pass in the watcher.
    ///
    /// Containers register their labels when they start; callers sleep
    /// briefly after `up` before invoking this.
    pub async fn reconfigure(&self) -> bool {
        let output = CommandSpec::new("docker")
            .args([
                "exec",
                PROXY_MONITOR_CONTAINER,
                "/bin/sh",
                "/monitor/caddy-docker-monitor.sh",
                "--once",
            ])
            .timeout(timeouts::CONTAINER)
            .output()
            .await;
        match output {
            Ok(output) if output.success() => true,
            Ok(output) => {
                warn!("Proxy reconfigure failed: {}", output.stderr.trim());
                false
            }
            Err(e) => {
                warn!("Proxy reconfigure failed: {e}");
                false
            }
        }
    }
}

fn write_if_changed(path: &Path, content: &str) -> Result<()> {
    if std::fs::read_to_string(path).map(|c| c == content).unwrap_or(false) {
        return Ok(());
    }
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rendered_compose_substitutes_paths() {
        let rendered = ProxyManager::rendered_compose();
        assert!(!rendered.contains("{CADDYFILE_PATH}"));
        assert!(!rendered.contains("{MONITOR_SCRIPT_PATH}"));
        assert!(rendered.contains("Caddyfile.dockertree"));
        assert!(rendered.contains("caddy-docker-monitor.sh"));
        assert!(rendered.contains(PROXY_CONTAINER));
        assert!(rendered.contains(PROXY_MONITOR_CONTAINER));
    }

    #[test]
    fn test_rendered_compose_is_valid_yaml_with_shared_resources() {
        let doc: serde_yaml::Value = serde_yaml::from_str(&ProxyManager::rendered_compose()).unwrap();
        assert_eq!(
            doc["networks"][CADDY_NETWORK]["external"],
            serde_yaml::Value::Bool(true)
        );
        assert_eq!(
            doc["volumes"]["dockertree_caddy_data"]["name"],
            serde_yaml::Value::String(CADDY_DATA_VOLUME.to_string())
        );
        assert_eq!(
            doc["services"]["caddy"]["container_name"],
            serde_yaml::Value::String(PROXY_CONTAINER.to_string())
        );
    }

    #[test]
    fn test_write_if_changed_is_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("file");
        write_if_changed(&path, "a").unwrap();
        let first = std::fs::metadata(&path).unwrap().modified().unwrap();
        write_if_changed(&path, "a").unwrap();
        let second = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(first, second);
        write_if_changed(&path, "b").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "b");
    }
}
