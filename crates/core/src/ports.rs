//! Host-port allocation
//!
//! Deterministic host ports for the db, redis, and web services of each
//! worktree. Ports already assigned to a branch are kept across restarts;
//! new assignments take the lowest free port in the reserved range that no
//! sibling worktree uses and that is actually bindable on this host. An
//! exhausted range falls back to 0, which the runtime auto-assigns.

use crate::config::ProjectContext;
use crate::env_file::load_env_file;
use crate::errors::EnvError;
use crate::workspace::env_dockertree_path;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::net::TcpListener;
use std::path::Path;
use tracing::{info, warn};

/// Env var name and inclusive port range for each allocated service port.
pub const HOST_PORT_RANGES: [(&str, u16, u16); 3] = [
    ("DOCKERTREE_DB_HOST_PORT", 55432, 56431),
    ("DOCKERTREE_REDIS_HOST_PORT", 56379, 57378),
    ("DOCKERTREE_WEB_HOST_PORT", 58000, 58999),
];

/// Assign host ports for a branch.
///
/// Previously assigned values (from the branch's scoped env file, including
/// the legacy sibling location) are preserved verbatim; everything else is
/// allocated fresh.
pub fn calculate_host_ports(ctx: &ProjectContext, branch: &str) -> IndexMap<String, u16> {
    let mut used = collect_used_host_ports(ctx);
    let existing = read_existing_host_ports(ctx, branch);

    for (var, value) in &existing {
        used.entry(var.clone()).or_default().insert(*value);
    }

    let mut assigned = IndexMap::new();
    for (var, start, end) in HOST_PORT_RANGES {
        if let Some(port) = existing.get(var) {
            assigned.insert(var.to_string(), *port);
            continue;
        }
        let taken = used.entry(var.to_string()).or_default();
        let port = match allocate_port(var, taken, start, end, branch) {
            Ok(port) => {
                taken.insert(port);
                port
            }
            Err(e) => {
                warn!("{e}; falling back to runtime auto-assignment");
                0
            }
        };
        assigned.insert(var.to_string(), port);
    }
    assigned
}

/// Scan sibling worktrees (and the legacy sibling directory) for host ports
/// already handed out.
fn collect_used_host_ports(ctx: &ProjectContext) -> HashMap<String, HashSet<u16>> {
    let mut used: HashMap<String, HashSet<u16>> = HashMap::new();
    let mut roots = vec![ctx.root.join(ctx.worktree_dir())];
    if let Some(parent) = ctx.root.parent() {
        roots.push(parent.to_path_buf());
    }

    for root in roots {
        let Ok(entries) = std::fs::read_dir(&root) else {
            continue;
        };
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            for (var, value) in extract_host_ports(&env_dockertree_path(&entry.path())) {
                used.entry(var).or_default().insert(value);
            }
        }
    }
    used
}

fn read_existing_host_ports(ctx: &ProjectContext, branch: &str) -> IndexMap<String, u16> {
    let mut env_path = env_dockertree_path(&ctx.worktree_path(branch));
    if !env_path.exists() {
        let legacy = ctx.legacy_worktree_path(branch);
        if legacy.exists() {
            env_path = env_dockertree_path(&legacy);
        }
    }
    extract_host_ports(&env_path)
}

fn extract_host_ports(env_path: &Path) -> IndexMap<String, u16> {
    let mut ports = IndexMap::new();
    if !env_path.exists() {
        return ports;
    }
    let vars = load_env_file(env_path);
    for (var, _, _) in HOST_PORT_RANGES {
        if let Some(value) = vars.get(var).and_then(|v| v.parse::<u16>().ok()) {
            ports.insert(var.to_string(), value);
        }
    }
    ports
}

fn allocate_port(
    var: &str,
    taken: &HashSet<u16>,
    start: u16,
    end: u16,
    branch: &str,
) -> Result<u16, EnvError> {
    for port in start..=end {
        if taken.contains(&port) {
            continue;
        }
        if port_is_bindable(port) {
            info!("Assigned {var}={port} for branch {branch}");
            return Ok(port);
        }
    }
    Err(EnvError::NoFreePort {
        var: var.to_string(),
        start,
        end,
    })
}

fn port_is_bindable(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use std::fs;
    use tempfile::TempDir;

    fn context(tmp: &TempDir) -> ProjectContext {
        let root = tmp.path().join("proj");
        fs::create_dir_all(&root).unwrap();
        let mut config = ProjectConfig::default_for(&root);
        config.project_name = "myapp".to_string();
        ProjectContext { root, config }
    }

    fn write_env(ctx: &ProjectContext, branch: &str, content: &str) {
        let dir = ctx.worktree_path(branch).join(".dockertree");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("env.dockertree"), content).unwrap();
    }

    #[test]
    fn test_assigns_lowest_free_ports() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let ports = calculate_host_ports(&ctx, "alpha");
        assert_eq!(ports.len(), 3);
        // Lowest free in range unless the host has it bound already.
        let db = ports["DOCKERTREE_DB_HOST_PORT"];
        assert!(db == 0 || (55432..=56431).contains(&db));
        let web = ports["DOCKERTREE_WEB_HOST_PORT"];
        assert!(web == 0 || (58000..=58999).contains(&web));
    }

    #[test]
    fn test_existing_assignment_is_stable() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        write_env(
            &ctx,
            "alpha",
            "COMPOSE_PROJECT_NAME=myapp-alpha\nDOCKERTREE_DB_HOST_PORT=55500\n",
        );
        let ports = calculate_host_ports(&ctx, "alpha");
        assert_eq!(ports["DOCKERTREE_DB_HOST_PORT"], 55500);
    }

    #[test]
    fn test_sibling_ports_are_not_reused() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        write_env(&ctx, "other", "DOCKERTREE_DB_HOST_PORT=55432\n");

        let ports = calculate_host_ports(&ctx, "alpha");
        let db = ports["DOCKERTREE_DB_HOST_PORT"];
        assert_ne!(db, 55432);
    }

    #[test]
    fn test_distinct_branches_get_distinct_ports() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);

        let first = calculate_host_ports(&ctx, "alpha");
        // Persist alpha's assignment the way the env manager would.
        let mut content = String::new();
        for (var, port) in &first {
            content.push_str(&format!("{var}={port}\n"));
        }
        write_env(&ctx, "alpha", &content);

        let second = calculate_host_ports(&ctx, "beta");
        for (var, _, _) in HOST_PORT_RANGES {
            let a = first[var];
            let b = second[var];
            if a != 0 && b != 0 {
                assert_ne!(a, b, "{var} assigned twice");
            }
        }
    }

    #[test]
    fn test_exhausted_range_is_classified_no_free_port() {
        let taken: HashSet<u16> = (55432..=55434).collect();
        let err = allocate_port("DOCKERTREE_DB_HOST_PORT", &taken, 55432, 55434, "beta")
            .unwrap_err();
        assert!(matches!(err, EnvError::NoFreePort { start: 55432, end: 55434, .. }));
    }

    #[test]
    fn test_non_numeric_existing_value_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        write_env(&ctx, "alpha", "DOCKERTREE_DB_HOST_PORT=not-a-port\n");
        let ports = calculate_host_ports(&ctx, "alpha");
        let db = ports["DOCKERTREE_DB_HOST_PORT"];
        assert!(db == 0 || (55432..=56431).contains(&db));
    }
}
