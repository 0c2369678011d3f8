//! Environment file management
//!
//! Builds the per-worktree `.env` and scoped `env.dockertree` files, applies
//! domain and IP overrides to both the env files and the transformed compose
//! document, and carries the push/deployment preferences stored alongside
//! them. Env files inside a worktree are rewritten only here.

use crate::config::{ProjectContext, DOCKERTREE_DIR};
use crate::env_file::{
    collapse_blank_lines, load_env_file, read_var, remove_var, upsert_var,
};
use crate::errors::{EnvError, Result};
use crate::ports::calculate_host_ports;
use crate::transform;
use crate::workspace::{compose_override_path, copy_env_file, env_dockertree_path, env_file_path};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

static IPV4_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+\.\d+").expect("valid ipv4 pattern"));

/// Default certificate-notification address used when none is configured.
fn default_caddy_email(domain: &str) -> String {
    format!("admin@{domain}")
}

/// Strip an `http://`/`https://` prefix, a trailing slash, and quotes.
pub fn strip_protocol(site_domain: &str) -> String {
    let domain = site_domain
        .strip_prefix("https://")
        .or_else(|| site_domain.strip_prefix("http://"))
        .unwrap_or(site_domain);
    domain.trim_end_matches('/').trim_matches(['\'', '"']).to_string()
}

/// The registrable part of a domain: everything after the first label.
pub fn base_domain(domain: &str) -> String {
    match domain.split_once('.') {
        Some((_, rest)) if !rest.is_empty() => rest.to_string(),
        _ => domain.to_string(),
    }
}

/// Secure-cookie policy.
///
/// True iff the site URL is explicitly `https://…`, or the bare host is
/// neither `localhost`, nor a `.localhost` subdomain, nor an IPv4 literal.
pub fn should_use_secure_cookies(site_domain: &str) -> bool {
    if site_domain.starts_with("https://") {
        return true;
    }
    if site_domain.starts_with("http://") {
        return false;
    }
    let host = strip_protocol(site_domain);
    if host == "localhost" || host.ends_with(".localhost") || host.starts_with("127.0.0.1") {
        return false;
    }
    !IPV4_RE.is_match(&host)
}

/// Push target preferences stored in the scoped env file.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct PushConfig {
    pub scp_target: Option<String>,
    pub branch_name: Option<String>,
    pub domain: Option<String>,
    pub ip: Option<String>,
}

/// Environment manager for one project.
pub struct EnvironmentManager<'a> {
    ctx: &'a ProjectContext,
}

impl<'a> EnvironmentManager<'a> {
    pub fn new(ctx: &'a ProjectContext) -> Self {
        Self { ctx }
    }

    fn scoped_env_path(&self, branch: &str) -> PathBuf {
        let path = env_dockertree_path(&self.ctx.worktree_path(branch));
        if path.exists() {
            return path;
        }
        let legacy = self.ctx.legacy_worktree_path(branch);
        if legacy.exists() {
            let legacy_env = env_dockertree_path(&legacy);
            if legacy_env.exists() {
                return legacy_env;
            }
        }
        path
    }

    /// Create the worktree's `.env` and scoped env file.
    ///
    /// The project `.env` is copied when present (no-op when source and
    /// target coincide); otherwise a documented default is scaffolded. The
    /// scoped file is regenerated from configuration, with the domain
    /// variant applied when `domain` is given.
    #[instrument(skip(self, worktree_path, source_env))]
    pub fn create_worktree_env(
        &self,
        branch: &str,
        worktree_path: &Path,
        source_env: Option<&Path>,
        domain: Option<&str>,
    ) -> Result<()> {
        info!("Creating worktree environment files");
        std::fs::create_dir_all(worktree_path)?;

        let source_dir = source_env.unwrap_or(&self.ctx.root);
        if !copy_env_file(source_dir, worktree_path) {
            warn!("No .env file found to copy, creating default .env file");
            self.create_default_env_file(branch, worktree_path, domain)?;
        }

        let dockertree_dir = worktree_path.join(DOCKERTREE_DIR);
        std::fs::create_dir_all(&dockertree_dir)?;

        let content = match domain {
            Some(domain) => self.scoped_env_content_with_domain(branch, domain),
            None => self.scoped_env_content(branch),
        };
        let env_path = env_dockertree_path(worktree_path);
        std::fs::write(&env_path, content).map_err(|e| EnvError::WriteFailed {
            path: env_path.display().to_string(),
            message: e.to_string(),
        })?;

        if let Some(domain) = domain {
            self.apply_domain_overrides(worktree_path, domain, false)?;
        }
        Ok(())
    }

    /// Scoped env file content for local (`*.localhost`) operation.
    pub fn scoped_env_content(&self, branch: &str) -> String {
        let compose_project = self.ctx.compose_project_name(branch);
        let site_domain = format!("http://{}", self.ctx.domain(branch));
        let mut content = format!(
            "# Dockertree environment configuration for {branch}\n\
             COMPOSE_PROJECT_NAME={compose_project}\n\
             PROJECT_ROOT={root}\n\
             SITE_DOMAIN={site_domain}\n\
             ALLOWED_HOSTS={allowed_hosts}\n\
             DEBUG=True\n\
             USE_X_FORWARDED_HOST=True\n\
             CSRF_TRUSTED_ORIGINS={site_domain}\n\
             USE_SECURE_COOKIES=False\n",
            root = self.ctx.root.display(),
            allowed_hosts = self.ctx.allowed_hosts(branch),
        );
        content.push_str(&self.host_port_section(branch));
        content
    }

    /// Scoped env file content for a production/staging domain.
    pub fn scoped_env_content_with_domain(&self, branch: &str, domain: &str) -> String {
        let compose_project = self.ctx.compose_project_name(branch);
        let site_domain = format!("https://{domain}");
        let base = base_domain(domain);
        let wildcard = format!("*.{base}");
        let allowed_hosts = self.ctx.allowed_hosts_with(branch, &[domain, &wildcard]);

        // Keep a previously configured certificate email.
        let existing_env = env_dockertree_path(&self.ctx.worktree_path(branch));
        let caddy_email = read_var(&existing_env, "CADDY_EMAIL").unwrap_or_else(|| {
            let default = default_caddy_email(domain);
            warn!("CADDY_EMAIL not set; using default: {default}");
            default
        });

        let secure_cookies = should_use_secure_cookies(&site_domain);
        let mut content = format!(
            "# Dockertree environment configuration for {branch}\n\
             # Domain override: {domain}\n\
             COMPOSE_PROJECT_NAME={compose_project}\n\
             PROJECT_ROOT={root}\n\
             SITE_DOMAIN={site_domain}\n\
             ALLOWED_HOSTS={allowed_hosts}\n\
             DEBUG=False\n\
             USE_X_FORWARDED_HOST=True\n\
             CSRF_TRUSTED_ORIGINS=https://{domain} http://{domain} https://*.{base}\n\
             USE_SECURE_COOKIES={secure_cookies}\n\
             BUILD_MODE=prod\n\
             CADDY_EMAIL={caddy_email}\n",
            root = self.ctx.root.display(),
            secure_cookies = python_bool(secure_cookies),
        );
        content.push_str(&self.host_port_section(branch));
        content
    }

    fn host_port_section(&self, branch: &str) -> String {
        let ports = calculate_host_ports(self.ctx, branch);
        if ports.is_empty() {
            return String::new();
        }
        let mut section = String::new();
        for (var, port) in ports {
            section.push_str(&format!("{var}={port}\n"));
        }
        section
    }

    /// Scaffold a default `.env` when the project has none to copy.
    fn create_default_env_file(
        &self,
        branch: &str,
        worktree_path: &Path,
        domain: Option<&str>,
    ) -> Result<()> {
        let env_file = env_file_path(worktree_path);
        if env_file.exists() {
            return Ok(());
        }

        let compose_project = self.ctx.compose_project_name(branch);
        let (site_domain, allowed_hosts) = match domain {
            Some(domain) => {
                let base = base_domain(domain);
                (
                    format!("https://{domain}"),
                    format!("localhost,127.0.0.1,{domain},*.{base},web"),
                )
            }
            None => (self.ctx.domain(branch), self.ctx.allowed_hosts(branch)),
        };

        let content = format!(
            "# Default environment configuration for {branch}\n\
             # This file was automatically created by dockertree\n\
             \n\
             # Database configuration\n\
             # Set these to match the database service in your compose file\n\
             POSTGRES_USER=\n\
             POSTGRES_PASSWORD=\n\
             POSTGRES_DB=\n\
             \n\
             DEBUG=True\n\
             ALLOWED_HOSTS={allowed_hosts}\n\
             SITE_DOMAIN={site_domain}\n\
             \n\
             # Redis configuration\n\
             REDIS_HOST={compose_project}-redis\n\
             REDIS_PORT=6379\n\
             REDIS_DB=0\n\
             \n\
             # Certificate notifications\n\
             CADDY_EMAIL=admin@example.com\n"
        );
        std::fs::write(&env_file, content)?;
        info!("Created default .env file for {branch}");
        Ok(())
    }

    /// Branch name for a worktree directory: the directory name, unless the
    /// scoped env file's COMPOSE_PROJECT_NAME disagrees.
    fn branch_for_worktree(&self, worktree_path: &Path) -> Option<String> {
        if let Some(name) = worktree_path.file_name().and_then(|n| n.to_str()) {
            return Some(name.to_string());
        }
        let env_path = env_dockertree_path(worktree_path);
        read_var(&env_path, "COMPOSE_PROJECT_NAME")
            .and_then(|cpn| cpn.rsplit_once('-').map(|(_, b)| b.to_string()))
    }

    /// Apply a production/staging domain to a worktree's env files and its
    /// transformed compose document.
    #[instrument(skip(self, worktree_path, debug))]
    pub fn apply_domain_overrides(
        &self,
        worktree_path: &Path,
        domain: &str,
        debug: bool,
    ) -> Result<()> {
        let branch = self.branch_for_worktree(worktree_path);
        let base = base_domain(domain);
        let wildcard = format!("*.{base}");
        let https_url = format!("https://{domain}");

        let allowed_hosts = match &branch {
            Some(branch) => self.ctx.allowed_hosts_with(branch, &[domain, &wildcard]),
            None => {
                warn!(
                    "Could not determine branch name for worktree at {}; \
                     ALLOWED_HOSTS will omit the container name",
                    worktree_path.display()
                );
                format!("localhost,127.0.0.1,{domain},{wildcard},web")
            }
        };
        let csrf = format!("https://{domain} http://{domain} https://*.{base}");
        let secure_cookies = should_use_secure_cookies(&https_url);

        let env_path = env_dockertree_path(worktree_path);
        if env_path.exists() {
            let mut content = std::fs::read_to_string(&env_path)?;
            if !load_env_file(&env_path).contains_key("CADDY_EMAIL") {
                let default = default_caddy_email(domain);
                warn!("CADDY_EMAIL not set; using default: {default}");
                content = upsert_var(&content, "CADDY_EMAIL", &default);
            }
            content = upsert_var(&content, "SITE_DOMAIN", &https_url);
            content = upsert_var(&content, "ALLOWED_HOSTS", &allowed_hosts);
            content = upsert_var(&content, "DEBUG", python_bool(debug));
            content = upsert_var(&content, "USE_X_FORWARDED_HOST", "True");
            content = upsert_var(
                &content,
                "SECURE_PROXY_SSL_HEADER",
                "HTTP_X_FORWARDED_PROTO,https",
            );
            content = upsert_var(&content, "CSRF_TRUSTED_ORIGINS", &csrf);
            content = upsert_var(&content, "USE_SECURE_COOKIES", python_bool(secure_cookies));
            content = upsert_var(&content, "BUILD_MODE", "prod");
            std::fs::write(&env_path, content)?;
            info!("Applied domain overrides to env.dockertree: {domain}");
        }

        self.apply_compose_domain(worktree_path, domain, &allowed_hosts)?;
        Ok(())
    }

    fn apply_compose_domain(
        &self,
        worktree_path: &Path,
        domain: &str,
        allowed_hosts: &str,
    ) -> Result<()> {
        let Some(compose_file) = compose_override_path(worktree_path, &self.ctx.root) else {
            warn!(
                "Could not find compose override file for worktree at {}",
                worktree_path.display()
            );
            return Ok(());
        };

        let build_mode = read_var(&env_dockertree_path(worktree_path), "BUILD_MODE");
        let result = transform::edit_compose_file(&compose_file, |doc| {
            let mut changed =
                transform::ensure_proxy_labels_and_network(doc, Some(domain), None, false);
            let services_key = serde_yaml::Value::String("services".into());
            if let Some(services) = doc
                .as_mapping_mut()
                .and_then(|root| root.get_mut(&services_key))
                .and_then(serde_yaml::Value::as_mapping_mut)
            {
                let names: Vec<String> = services
                    .keys()
                    .filter_map(serde_yaml::Value::as_str)
                    .map(str::to_string)
                    .collect();
                for name in &names {
                    let name_key = serde_yaml::Value::String(name.clone());
                    if let Some(service) = services
                        .get_mut(&name_key)
                        .and_then(serde_yaml::Value::as_mapping_mut)
                    {
                        if transform::update_allowed_hosts_in_service(service, allowed_hosts) {
                            changed = true;
                        }
                        if transform::update_vite_allowed_hosts_in_service(name, service, domain) {
                            changed = true;
                        }
                    }
                }
            }
            if build_mode.as_deref() == Some("prod") && transform::strip_frontend_bind_mounts(doc)
            {
                info!("Removed source-code bind mounts for production build");
                changed = true;
            }
            changed
        });

        match result {
            Ok(true) => info!(
                "Updated {} with domain: {domain}",
                compose_file.display()
            ),
            Ok(false) => info!("Compose override already configured for {domain}"),
            // Env files carry the override; a compose edit failure is a warning.
            Err(e) => warn!("Failed to update compose override: {e}"),
        }
        Ok(())
    }

    /// Apply an HTTP-only IP override to a worktree's env files and compose
    /// document.
    #[instrument(skip(self, worktree_path, debug))]
    pub fn apply_ip_overrides(&self, worktree_path: &Path, ip: &str, debug: bool) -> Result<()> {
        let branch = self.branch_for_worktree(worktree_path);
        let http_url = format!("http://{ip}");
        let allowed_hosts = match &branch {
            Some(branch) => self.ctx.allowed_hosts_with(branch, &[ip]),
            None => format!("localhost,127.0.0.1,{ip},web"),
        };
        let secure_cookies = should_use_secure_cookies(&http_url);

        let env_path = env_dockertree_path(worktree_path);
        if env_path.exists() {
            let mut content = std::fs::read_to_string(&env_path)?;
            content = upsert_var(&content, "SITE_DOMAIN", &http_url);
            content = upsert_var(&content, "ALLOWED_HOSTS", &allowed_hosts);
            content = upsert_var(&content, "DEBUG", python_bool(debug));
            content = upsert_var(&content, "USE_X_FORWARDED_HOST", "True");
            content = upsert_var(&content, "CSRF_TRUSTED_ORIGINS", &http_url);
            content = upsert_var(&content, "USE_SECURE_COOKIES", python_bool(secure_cookies));
            content = upsert_var(&content, "BUILD_MODE", "prod");
            std::fs::write(&env_path, content)?;
            info!("Applied IP overrides to env.dockertree: {ip}");
        }

        if let Some(compose_file) = compose_override_path(worktree_path, &self.ctx.root) {
            let result = transform::edit_compose_file(&compose_file, |doc| {
                let mut changed = transform::replace_proxy_host_with_ip(doc, ip);
                if transform::strip_frontend_bind_mounts(doc) {
                    changed = true;
                }
                changed
            });
            if let Err(e) = result {
                warn!("Failed to update compose override: {e}");
            }
        }
        Ok(())
    }

    /// Rewrite PROJECT_ROOT in the scoped env file. Used by standalone
    /// imports to fix the path recorded on the source machine.
    pub fn update_project_root(&self, worktree_path: &Path, project_root: &Path) -> Result<()> {
        let env_path = env_dockertree_path(worktree_path);
        if !env_path.exists() {
            return Err(EnvError::NotFound {
                path: env_path.display().to_string(),
            }
            .into());
        }
        let content = std::fs::read_to_string(&env_path)?;
        let content = upsert_var(&content, "PROJECT_ROOT", &project_root.display().to_string());
        std::fs::write(&env_path, content)?;
        info!(
            "Updated PROJECT_ROOT in env.dockertree: {}",
            project_root.display()
        );
        Ok(())
    }

    /// Point build contexts and code volume mounts at the literal worktree
    /// path for standalone deployments.
    pub fn fix_standalone_paths(&self, worktree_path: &Path) -> Result<()> {
        let Some(compose_file) = compose_override_path(worktree_path, &self.ctx.root) else {
            warn!("Compose override not found under {}", worktree_path.display());
            return Ok(());
        };
        let changed = transform::edit_compose_file(&compose_file, |doc| {
            transform::rewrite_project_root_paths(doc, worktree_path)
        })?;
        if changed {
            info!("Fixed standalone paths in {}", compose_file.display());
        }
        Ok(())
    }

    /// The routable host for a branch, read back from SITE_DOMAIN when the
    /// scoped env file has one.
    pub fn domain_name(&self, branch: &str) -> String {
        let env_path = self.scoped_env_path(branch);
        match read_var(&env_path, "SITE_DOMAIN") {
            Some(site) if !site.is_empty() => strip_protocol(&site),
            _ => self.ctx.domain(branch),
        }
    }

    /// Preferred access URL for a branch.
    pub fn access_url(&self, branch: &str) -> String {
        let env_path = self.scoped_env_path(branch);
        match read_var(&env_path, "SITE_DOMAIN") {
            Some(site) if site.starts_with("http://") || site.starts_with("https://") => {
                site.trim_end_matches('/').to_string()
            }
            Some(site) if !site.is_empty() => format!("http://{site}"),
            _ => format!("http://{}", self.domain_name(branch)),
        }
    }

    /// Whether both env files exist for a worktree.
    pub fn environment_files_exist(&self, worktree_path: &Path) -> bool {
        env_file_path(worktree_path).is_file() && env_dockertree_path(worktree_path).is_file()
    }

    /// Push configuration, reading `PUSH_*` first and falling back to the
    /// `DROPLET_*` family for backward compatibility.
    pub fn push_config(&self, branch: &str) -> PushConfig {
        let vars = load_env_file(&self.scoped_env_path(branch));
        let pick = |primary: &str, fallback: &str| {
            vars.get(primary)
                .or_else(|| vars.get(fallback))
                .cloned()
                .filter(|v| !v.is_empty())
        };
        PushConfig {
            scp_target: pick("PUSH_SCP_TARGET", "DROPLET_SCP_TARGET"),
            branch_name: vars.get("PUSH_BRANCH_NAME").cloned().filter(|v| !v.is_empty()),
            domain: pick("PUSH_DOMAIN", "DROPLET_DOMAIN"),
            ip: pick("PUSH_IP", "DROPLET_IP"),
        }
    }

    /// Persist push configuration after a successful push, writing both env
    /// variable families.
    pub fn save_push_config(
        &self,
        branch: &str,
        scp_target: &str,
        domain: Option<&str>,
        ip: Option<&str>,
    ) -> Result<()> {
        let env_path = self.scoped_env_path(branch);
        if let Some(parent) = env_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut content = std::fs::read_to_string(&env_path)
            .unwrap_or_else(|_| format!("# Dockertree environment configuration for {branch}\n"));

        for var in [
            "PUSH_SCP_TARGET",
            "PUSH_BRANCH_NAME",
            "PUSH_DOMAIN",
            "PUSH_IP",
            "DROPLET_SCP_TARGET",
            "DROPLET_DOMAIN",
            "DROPLET_IP",
        ] {
            content = remove_var(&content, var);
        }
        content = collapse_blank_lines(&content);

        content.push_str("\n# Push configuration (auto-saved after successful push)\n");
        content.push_str(&format!("PUSH_SCP_TARGET={scp_target}\n"));
        content.push_str(&format!("PUSH_BRANCH_NAME={branch}\n"));
        content.push_str(&format!("DROPLET_SCP_TARGET={scp_target}\n"));
        if let Some(domain) = domain {
            content.push_str(&format!("PUSH_DOMAIN={domain}\n"));
            content.push_str(&format!("DROPLET_DOMAIN={domain}\n"));
        }
        if let Some(ip) = ip {
            content.push_str(&format!("PUSH_IP={ip}\n"));
            content.push_str(&format!("DROPLET_IP={ip}\n"));
        }

        std::fs::write(&env_path, content)?;
        info!("Saved push configuration to {}", env_path.display());
        Ok(())
    }

    /// Toggle USE_STAGING_CERTIFICATES in the branch's scoped env file.
    pub fn set_staging_certificate_flag(&self, branch: &str, value: bool) -> Result<()> {
        let env_path = self.scoped_env_path(branch);
        if let Some(parent) = env_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut content = std::fs::read_to_string(&env_path)
            .unwrap_or_else(|_| format!("# Dockertree environment configuration for {branch}\n"));
        content = remove_var(&content, "USE_STAGING_CERTIFICATES");
        content = collapse_blank_lines(&content);
        if value {
            content = upsert_var(&content, "USE_STAGING_CERTIFICATES", "1");
        }
        std::fs::write(&env_path, content)?;
        Ok(())
    }
}

fn python_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use crate::env_file::parse_env;
    use std::fs;
    use tempfile::TempDir;

    fn context(tmp: &TempDir) -> ProjectContext {
        let root = tmp.path().join("myapp");
        fs::create_dir_all(root.join(DOCKERTREE_DIR)).unwrap();
        let mut config = ProjectConfig::default_for(&root);
        config.project_name = "myapp".to_string();
        config.save(&root).unwrap();
        ProjectContext { root, config }
    }

    #[test]
    fn test_secure_cookie_policy() {
        assert!(should_use_secure_cookies("https://app.example.com"));
        assert!(!should_use_secure_cookies("http://app.example.com"));
        assert!(!should_use_secure_cookies("myapp-test.localhost"));
        assert!(!should_use_secure_cookies("localhost"));
        assert!(!should_use_secure_cookies("127.0.0.1:8000"));
        assert!(!should_use_secure_cookies("203.0.113.9"));
        assert!(should_use_secure_cookies("app.example.com"));
    }

    #[test]
    fn test_strip_protocol_and_base_domain() {
        assert_eq!(strip_protocol("https://app.example.com/"), "app.example.com");
        assert_eq!(strip_protocol("http://x.localhost"), "x.localhost");
        assert_eq!(strip_protocol("'quoted.example.com'"), "quoted.example.com");
        assert_eq!(base_domain("app.example.com"), "example.com");
        assert_eq!(base_domain("example"), "example");
    }

    #[test]
    fn test_create_worktree_env_generates_scoped_file() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        fs::write(ctx.root.join(".env"), "POSTGRES_USER=user\n").unwrap();
        let worktree = ctx.worktree_path("feature-auth");

        let manager = EnvironmentManager::new(&ctx);
        manager
            .create_worktree_env("feature-auth", &worktree, None, None)
            .unwrap();

        // .env copied from project root.
        assert_eq!(
            fs::read_to_string(worktree.join(".env")).unwrap(),
            "POSTGRES_USER=user\n"
        );

        let vars = load_env_file(&env_dockertree_path(&worktree));
        assert_eq!(vars["COMPOSE_PROJECT_NAME"], "myapp-feature-auth");
        assert_eq!(vars["SITE_DOMAIN"], "http://myapp-feature-auth.localhost");
        assert_eq!(vars["DEBUG"], "True");
        assert_eq!(vars["USE_SECURE_COOKIES"], "False");
        assert!(vars["ALLOWED_HOSTS"].contains("myapp-feature-auth-web"));
        assert!(vars.contains_key("DOCKERTREE_DB_HOST_PORT"));
    }

    #[test]
    fn test_create_worktree_env_scaffolds_default_env() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let worktree = ctx.worktree_path("beta");

        EnvironmentManager::new(&ctx)
            .create_worktree_env("beta", &worktree, None, None)
            .unwrap();

        let env = fs::read_to_string(worktree.join(".env")).unwrap();
        assert!(env.contains("POSTGRES_USER="));
        assert!(env.contains("REDIS_HOST=myapp-beta-redis"));
    }

    #[test]
    fn test_apply_domain_overrides_rewrites_env() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let worktree = ctx.worktree_path("beta");
        let manager = EnvironmentManager::new(&ctx);
        manager.create_worktree_env("beta", &worktree, None, None).unwrap();

        manager
            .apply_domain_overrides(&worktree, "app.example.com", false)
            .unwrap();

        let vars = load_env_file(&env_dockertree_path(&worktree));
        assert_eq!(vars["SITE_DOMAIN"], "https://app.example.com");
        assert!(vars["ALLOWED_HOSTS"].contains("app.example.com"));
        assert!(vars["ALLOWED_HOSTS"].contains("*.example.com"));
        assert!(vars["ALLOWED_HOSTS"].contains("myapp-beta-web"));
        assert_eq!(vars["DEBUG"], "False");
        assert_eq!(vars["USE_SECURE_COOKIES"], "True");
        assert_eq!(vars["BUILD_MODE"], "prod");
        assert_eq!(vars["SECURE_PROXY_SSL_HEADER"], "HTTP_X_FORWARDED_PROTO,https");
        assert_eq!(vars["CADDY_EMAIL"], "admin@app.example.com");
        assert!(vars["CSRF_TRUSTED_ORIGINS"].contains("https://app.example.com"));
    }

    #[test]
    fn test_apply_domain_overrides_updates_compose_labels() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let worktree = ctx.worktree_path("beta");
        let manager = EnvironmentManager::new(&ctx);
        manager.create_worktree_env("beta", &worktree, None, None).unwrap();

        let compose = "services:\n  web:\n    image: x\n    labels:\n      - caddy.proxy=${COMPOSE_PROJECT_NAME}.localhost\n    environment:\n      - ALLOWED_HOSTS=localhost\n";
        let compose_path = worktree.join(DOCKERTREE_DIR).join("docker-compose.worktree.yml");
        fs::write(&compose_path, compose).unwrap();

        manager
            .apply_domain_overrides(&worktree, "app.example.com", false)
            .unwrap();

        let doc = transform::parse_compose(&fs::read_to_string(&compose_path).unwrap()).unwrap();
        let labels: Vec<String> = doc["services"]["web"]["labels"]
            .as_sequence()
            .unwrap()
            .iter()
            .filter_map(|l| l.as_str().map(str::to_string))
            .collect();
        assert!(labels.contains(&"caddy.proxy=app.example.com".to_string()));
        let env: Vec<String> = doc["services"]["web"]["environment"]
            .as_sequence()
            .unwrap()
            .iter()
            .filter_map(|l| l.as_str().map(str::to_string))
            .collect();
        assert!(env.iter().any(|e| e.starts_with("ALLOWED_HOSTS=") && e.contains("app.example.com")));
    }

    #[test]
    fn test_apply_ip_overrides() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let worktree = ctx.worktree_path("beta");
        let manager = EnvironmentManager::new(&ctx);
        manager.create_worktree_env("beta", &worktree, None, None).unwrap();

        manager.apply_ip_overrides(&worktree, "203.0.113.9", false).unwrap();

        let vars = load_env_file(&env_dockertree_path(&worktree));
        assert_eq!(vars["SITE_DOMAIN"], "http://203.0.113.9");
        assert!(vars["ALLOWED_HOSTS"].contains("203.0.113.9"));
        assert_eq!(vars["USE_SECURE_COOKIES"], "False");
        assert_eq!(vars["BUILD_MODE"], "prod");
    }

    #[test]
    fn test_domain_name_and_access_url_read_back() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let manager = EnvironmentManager::new(&ctx);

        // No env file yet: computed fallback.
        assert_eq!(manager.domain_name("beta"), "myapp-beta.localhost");
        assert_eq!(manager.access_url("beta"), "http://myapp-beta.localhost");

        let worktree = ctx.worktree_path("beta");
        manager.create_worktree_env("beta", &worktree, None, None).unwrap();
        manager
            .apply_domain_overrides(&worktree, "app.example.com", false)
            .unwrap();
        assert_eq!(manager.domain_name("beta"), "app.example.com");
        assert_eq!(manager.access_url("beta"), "https://app.example.com");
    }

    #[test]
    fn test_update_project_root() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let worktree = ctx.worktree_path("beta");
        let manager = EnvironmentManager::new(&ctx);
        manager.create_worktree_env("beta", &worktree, None, None).unwrap();

        manager
            .update_project_root(&worktree, Path::new("/srv/app"))
            .unwrap();
        let vars = load_env_file(&env_dockertree_path(&worktree));
        assert_eq!(vars["PROJECT_ROOT"], "/srv/app");
    }

    #[test]
    fn test_push_config_reads_both_families() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let worktree = ctx.worktree_path("beta");
        fs::create_dir_all(worktree.join(DOCKERTREE_DIR)).unwrap();
        fs::write(
            env_dockertree_path(&worktree),
            "DROPLET_SCP_TARGET=user@host:/srv\nPUSH_DOMAIN=app.example.com\n",
        )
        .unwrap();

        let config = EnvironmentManager::new(&ctx).push_config("beta");
        assert_eq!(config.scp_target.as_deref(), Some("user@host:/srv"));
        assert_eq!(config.domain.as_deref(), Some("app.example.com"));
        assert_eq!(config.ip, None);
    }

    #[test]
    fn test_save_push_config_writes_both_families() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let manager = EnvironmentManager::new(&ctx);
        manager
            .save_push_config("beta", "user@host:/srv", Some("app.example.com"), None)
            .unwrap();

        let vars = parse_env(
            &fs::read_to_string(env_dockertree_path(&ctx.worktree_path("beta"))).unwrap(),
        );
        assert_eq!(vars["PUSH_SCP_TARGET"], "user@host:/srv");
        assert_eq!(vars["DROPLET_SCP_TARGET"], "user@host:/srv");
        assert_eq!(vars["PUSH_DOMAIN"], "app.example.com");
        assert_eq!(vars["PUSH_BRANCH_NAME"], "beta");

        // Round trip.
        let config = manager.push_config("beta");
        assert_eq!(config.scp_target.as_deref(), Some("user@host:/srv"));
    }

    #[test]
    fn test_staging_certificate_flag_toggle() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let manager = EnvironmentManager::new(&ctx);

        manager.set_staging_certificate_flag("beta", true).unwrap();
        let env_path = env_dockertree_path(&ctx.worktree_path("beta"));
        let vars = load_env_file(&env_path);
        assert_eq!(vars["USE_STAGING_CERTIFICATES"], "1");

        manager.set_staging_certificate_flag("beta", false).unwrap();
        let vars = load_env_file(&env_path);
        assert!(!vars.contains_key("USE_STAGING_CERTIFICATES"));
    }
}
