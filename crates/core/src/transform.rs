//! Compose document transformation
//!
//! Rewrites a project's base compose document into the per-worktree variant:
//! names, networks, ports, labels, env files, and volume declarations are all
//! re-projected so that any number of branches can run side by side on one
//! host. The transform is idempotent — applying it to its own output yields
//! an identical document.

use crate::config::CADDY_NETWORK;
use crate::errors::{DockertreeError, Result};
use serde_yaml::{Mapping, Value};
use std::path::Path;
use tracing::{debug, info, warn};

/// Services that exist only at global scope and are dropped per-worktree.
pub const EXCLUDED_SERVICES: [&str; 3] = ["caddy", "caddy-monitor", "dockertree_caddy_proxy"];

/// Top-level volumes shared with the proxy, never projected per-worktree.
pub const EXCLUDED_VOLUMES: [&str; 2] = ["caddy_data", "caddy_config"];

/// Service names that receive proxy labels and join the shared network.
pub const WEB_SERVICES: [&str; 4] = ["web", "app", "frontend", "api"];

/// Default container-side port the proxy forwards to.
pub const DEFAULT_WEB_PORT: u16 = 8000;

/// Path tokens that belong to the branch checkout.
const APP_PATH_TOKENS: [&str; 11] = [
    "src", "app", "code", "static", "media", "uploads", "logs", "tmp", "cache", "data",
    "node_modules",
];

fn key(s: &str) -> Value {
    Value::String(s.to_string())
}

fn services_mut(doc: &mut Value) -> Option<&mut Mapping> {
    doc.as_mapping_mut()?
        .get_mut(&key("services"))?
        .as_mapping_mut()
}

fn is_app_token(token: &str) -> bool {
    APP_PATH_TOKENS.contains(&token)
}

/// Rewrite a `./`-relative path according to the token rules: app-ish first
/// segments land in the branch checkout, everything else (config dirs,
/// docker/, scripts/, `.env`, `*-config`, unknown tokens) stays anchored at
/// the project root.
fn rewrite_relative_path(rel: &str, worktree_dir: &str) -> String {
    let first = rel.split('/').next().unwrap_or("");
    if is_app_token(first) {
        format!("${{PROJECT_ROOT}}/{worktree_dir}/${{COMPOSE_PROJECT_NAME}}/{rel}")
    } else {
        format!("${{PROJECT_ROOT}}/{rel}")
    }
}

fn rewrite_path_value(path: &str, worktree_dir: &str) -> Option<String> {
    if path == "." {
        Some("${PROJECT_ROOT}".to_string())
    } else if let Some(rel) = path.strip_prefix("./") {
        Some(rewrite_relative_path(rel, worktree_dir))
    } else {
        None
    }
}

/// Transform a parsed base compose document into the per-worktree document.
pub fn transform_base_compose(base: &Value, worktree_dir: &str) -> Result<Value> {
    let mut doc = base.clone();
    let root = doc
        .as_mapping_mut()
        .ok_or_else(|| DockertreeError::Yaml {
            message: "compose document is not a mapping".to_string(),
        })?;

    if !root.contains_key(&key("services")) {
        return Err(DockertreeError::Yaml {
            message: "compose document has no 'services' section".to_string(),
        });
    }

    // Drop the version field entirely; compose v2 does not need it and a
    // stray `version: null` breaks some parsers.
    root.remove(&key("version"));

    filter_excluded_services(root);

    if let Some(services) = root
        .get_mut(&key("services"))
        .and_then(Value::as_mapping_mut)
    {
        let names: Vec<String> = services
            .keys()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        for name in &names {
            if let Some(service) = services.get_mut(&key(name)).and_then(Value::as_mapping_mut) {
                transform_container_name(name, service);
                transform_ports_to_expose(service);
                ensure_env_file_directives(service);
                merge_environment(service);
                transform_volume_mounts(service, worktree_dir);
                transform_build(service, worktree_dir);
            }
        }
    }

    ensure_proxy_labels_and_network(&mut doc, None, None, true);
    transform_top_level_volumes(&mut doc);
    ensure_external_network(&mut doc);

    for warning in validate_transformed(&doc)? {
        warn!("{warning}");
    }

    Ok(doc)
}

fn filter_excluded_services(root: &mut Mapping) {
    if let Some(services) = root
        .get_mut(&key("services"))
        .and_then(Value::as_mapping_mut)
    {
        let excluded: Vec<String> = services
            .keys()
            .filter_map(Value::as_str)
            .filter(|name| EXCLUDED_SERVICES.contains(name))
            .map(str::to_string)
            .collect();
        for name in &excluded {
            services.remove(&key(name));
        }
        if !excluded.is_empty() {
            info!(
                "Excluding global services from worktree compose: {}",
                excluded.join(", ")
            );
        }
    }
}

fn transform_container_name(service_name: &str, service: &mut Mapping) {
    let prefixed = match service.get(&key("container_name")).and_then(Value::as_str) {
        Some(existing) if existing.starts_with("${COMPOSE_PROJECT_NAME}-") => return,
        Some(existing) => format!("${{COMPOSE_PROJECT_NAME}}-{existing}"),
        None => format!("${{COMPOSE_PROJECT_NAME}}-{service_name}"),
    };
    service.insert(key("container_name"), Value::String(prefixed));
}

fn transform_ports_to_expose(service: &mut Mapping) {
    let Some(ports) = service.remove(&key("ports")) else {
        return;
    };
    let mut expose: Vec<Value> = service
        .get(&key("expose"))
        .and_then(Value::as_sequence)
        .cloned()
        .unwrap_or_default();

    if let Some(entries) = ports.as_sequence() {
        for entry in entries {
            let container_port = match entry {
                Value::String(s) => s.rsplit(':').next().map(str::to_string),
                Value::Number(n) => Some(n.to_string()),
                Value::Mapping(m) => m
                    .get(&key("target"))
                    .map(|target| match target {
                        Value::Number(n) => n.to_string(),
                        Value::String(s) => s.clone(),
                        other => format!("{other:?}"),
                    }),
                _ => None,
            };
            if let Some(port) = container_port {
                let value = Value::String(port);
                if !expose.contains(&value) {
                    expose.push(value);
                }
            }
        }
    }
    service.insert(key("expose"), Value::Sequence(expose));
}

fn ensure_env_file_directives(service: &mut Mapping) {
    let required = [
        "${PROJECT_ROOT}/.env",
        "${PROJECT_ROOT}/.dockertree/env.dockertree",
    ];
    let mut entries: Vec<Value> = match service.get(&key("env_file")) {
        Some(Value::Sequence(seq)) => seq.clone(),
        Some(Value::String(s)) => vec![Value::String(s.clone())],
        _ => Vec::new(),
    };
    for entry in required {
        let value = Value::String(entry.to_string());
        if !entries.contains(&value) {
            entries.push(value);
        }
    }
    service.insert(key("env_file"), Value::Sequence(entries));
}

fn merge_environment(service: &mut Mapping) {
    let injected = [
        ("COMPOSE_PROJECT_NAME", "${COMPOSE_PROJECT_NAME}"),
        ("PROJECT_ROOT", "${PROJECT_ROOT}"),
    ];
    match service.get_mut(&key("environment")) {
        Some(Value::Mapping(env)) => {
            for (name, value) in injected {
                env.insert(key(name), Value::String(value.to_string()));
            }
        }
        Some(Value::Sequence(env)) => {
            for (name, value) in injected {
                let prefix = format!("{name}=");
                let present = env
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|entry| entry.starts_with(&prefix));
                if !present {
                    env.push(Value::String(format!("{name}={value}")));
                }
            }
        }
        _ => {
            let mut env = Mapping::new();
            for (name, value) in injected {
                env.insert(key(name), Value::String(value.to_string()));
            }
            service.insert(key("environment"), Value::Mapping(env));
        }
    }
}

fn transform_volume_mounts(service: &mut Mapping, worktree_dir: &str) {
    match service.get_mut(&key("volumes")) {
        Some(Value::Sequence(volumes)) => {
            for volume in volumes.iter_mut() {
                match volume {
                    Value::String(spec) => {
                        if let Some(rewritten) = rewrite_mount_string(spec, worktree_dir) {
                            *spec = rewritten;
                        }
                    }
                    Value::Mapping(mount) => {
                        if let Some(source) = mount.get(&key("source")).and_then(Value::as_str) {
                            if let Some(rewritten) = rewrite_path_value(source, worktree_dir) {
                                mount.insert(key("source"), Value::String(rewritten));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        Some(Value::Mapping(volumes)) => {
            for (_, config) in volumes.iter_mut() {
                if let Some(mount) = config.as_mapping_mut() {
                    if let Some(source) = mount.get(&key("source")).and_then(Value::as_str) {
                        if let Some(rewritten) = rewrite_path_value(source, worktree_dir) {
                            mount.insert(key("source"), Value::String(rewritten));
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

fn rewrite_mount_string(spec: &str, worktree_dir: &str) -> Option<String> {
    let (source, rest) = match spec.split_once(':') {
        Some((source, rest)) => (source, Some(rest)),
        None => (spec, None),
    };
    let rewritten_source = rewrite_path_value(source, worktree_dir)?;
    Some(match rest {
        Some(rest) => format!("{rewritten_source}:{rest}"),
        None => rewritten_source,
    })
}

fn transform_build(service: &mut Mapping, worktree_dir: &str) {
    match service.get_mut(&key("build")) {
        Some(Value::String(context)) => {
            if let Some(rewritten) = rewrite_path_value(context, worktree_dir) {
                *context = rewritten;
            }
        }
        Some(Value::Mapping(build)) => {
            for field in ["context", "dockerfile"] {
                if let Some(path) = build.get(&key(field)).and_then(Value::as_str) {
                    if let Some(rewritten) = rewrite_path_value(path, worktree_dir) {
                        build.insert(key(field), Value::String(rewritten));
                    }
                }
            }
        }
        _ => {}
    }
}

fn transform_top_level_volumes(doc: &mut Value) {
    let Some(root) = doc.as_mapping_mut() else {
        return;
    };
    let Some(volumes) = root
        .get_mut(&key("volumes"))
        .and_then(Value::as_mapping_mut)
    else {
        return;
    };

    let excluded: Vec<String> = volumes
        .keys()
        .filter_map(Value::as_str)
        .filter(|name| EXCLUDED_VOLUMES.contains(name))
        .map(str::to_string)
        .collect();
    for name in &excluded {
        volumes.remove(&key(name));
    }
    if !excluded.is_empty() {
        info!(
            "Excluding global volumes from worktree compose: {}",
            excluded.join(", ")
        );
    }

    let names: Vec<String> = volumes
        .keys()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();
    for name in &names {
        let projected = format!("${{COMPOSE_PROJECT_NAME}}_{name}");
        match volumes.get_mut(&key(name)) {
            Some(Value::Mapping(config)) => {
                config.insert(key("name"), Value::String(projected));
            }
            Some(slot) => {
                let mut config = Mapping::new();
                config.insert(key("name"), Value::String(projected));
                *slot = Value::Mapping(config);
            }
            None => {}
        }
    }
}

fn ensure_external_network(doc: &mut Value) {
    let Some(root) = doc.as_mapping_mut() else {
        return;
    };
    if !root.contains_key(&key("networks")) {
        root.insert(key("networks"), Value::Mapping(Mapping::new()));
    }
    if let Some(networks) = root
        .get_mut(&key("networks"))
        .and_then(Value::as_mapping_mut)
    {
        let mut external = Mapping::new();
        external.insert(key("external"), Value::Bool(true));
        networks.insert(key(CADDY_NETWORK), Value::Mapping(external));
    }
}

/// Ensure proxy labels and the shared network on every web-set service.
///
/// With a `domain` or `ip` override the host portion of `caddy.proxy` is
/// replaced; otherwise the `${COMPOSE_PROJECT_NAME}.localhost` pattern is
/// used (when `use_localhost_pattern` is set). Returns whether anything
/// changed.
pub fn ensure_proxy_labels_and_network(
    doc: &mut Value,
    domain: Option<&str>,
    ip: Option<&str>,
    use_localhost_pattern: bool,
) -> bool {
    let Some(services) = services_mut(doc) else {
        return false;
    };

    let proxy_host = if let Some(domain) = domain {
        domain.to_string()
    } else if let Some(ip) = ip {
        warn!("IP deployments are HTTP-only. Certificates require a domain name.");
        ip.to_string()
    } else if use_localhost_pattern {
        "${COMPOSE_PROJECT_NAME}.localhost".to_string()
    } else {
        return false;
    };

    let mut updated = false;
    let names: Vec<String> = services
        .keys()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();

    for name in &names {
        if !WEB_SERVICES.contains(&name.as_str()) {
            continue;
        }
        let Some(service) = services.get_mut(&key(name)).and_then(Value::as_mapping_mut) else {
            continue;
        };

        let labels = [
            ("caddy.proxy", proxy_host.clone()),
            (
                "caddy.proxy.reverse_proxy",
                format!("${{COMPOSE_PROJECT_NAME}}-{name}:{DEFAULT_WEB_PORT}"),
            ),
        ];
        for (label_key, label_value) in labels {
            if upsert_label(service, label_key, &label_value) {
                updated = true;
                debug!("Set label on {name}: {label_key}={label_value}");
            }
        }

        if attach_network(service, CADDY_NETWORK) {
            updated = true;
            debug!("Attached {CADDY_NETWORK} network to {name}");
        }
    }
    updated
}

/// Set `key=value` in a service's labels (list or map form), replacing an
/// existing entry for the same key. Returns whether the labels changed.
fn upsert_label(service: &mut Mapping, label_key: &str, label_value: &str) -> bool {
    match service.get_mut(&key("labels")) {
        Some(Value::Sequence(labels)) => {
            let rendered = format!("{label_key}={label_value}");
            for entry in labels.iter_mut() {
                if let Value::String(existing) = entry {
                    let existing_key = existing.split('=').next().unwrap_or(existing.as_str());
                    if existing_key == label_key {
                        if existing == &rendered {
                            return false;
                        }
                        *existing = rendered;
                        return true;
                    }
                }
            }
            labels.push(Value::String(rendered));
            true
        }
        Some(Value::Mapping(labels)) => {
            let value = Value::String(label_value.to_string());
            if labels.get(&key(label_key)) == Some(&value) {
                return false;
            }
            labels.insert(key(label_key), value);
            true
        }
        _ => {
            let rendered = format!("{label_key}={label_value}");
            service.insert(
                key("labels"),
                Value::Sequence(vec![Value::String(rendered)]),
            );
            true
        }
    }
}

/// Attach a network to a service's network list (list or map form) without
/// duplicating an existing entry.
fn attach_network(service: &mut Mapping, network: &str) -> bool {
    match service.get_mut(&key("networks")) {
        Some(Value::Sequence(networks)) => {
            let value = Value::String(network.to_string());
            if networks.contains(&value) {
                return false;
            }
            networks.push(value);
            true
        }
        Some(Value::Mapping(networks)) => {
            if networks.contains_key(&key(network)) {
                return false;
            }
            networks.insert(key(network), Value::Null);
            true
        }
        _ => {
            service.insert(
                key("networks"),
                Value::Sequence(vec![Value::String(network.to_string())]),
            );
            true
        }
    }
}

/// Update `ALLOWED_HOSTS` in a service's compose `environment` section (list
/// or map form). Returns whether the section was updated.
pub fn update_allowed_hosts_in_service(service: &mut Mapping, allowed_hosts: &str) -> bool {
    match service.get_mut(&key("environment")) {
        Some(Value::Sequence(env)) => {
            let rendered = format!("ALLOWED_HOSTS={allowed_hosts}");
            for entry in env.iter_mut() {
                if let Value::String(existing) = entry {
                    if existing.starts_with("ALLOWED_HOSTS=") {
                        if existing == &rendered {
                            return false;
                        }
                        *existing = rendered;
                        return true;
                    }
                }
            }
            env.push(Value::String(rendered));
            true
        }
        Some(Value::Mapping(env)) => {
            let value = Value::String(allowed_hosts.to_string());
            if env.get(&key("ALLOWED_HOSTS")) == Some(&value) {
                return false;
            }
            env.insert(key("ALLOWED_HOSTS"), value);
            true
        }
        _ => false,
    }
}

/// Whether the document declares any service from the web set. Without one,
/// nothing carries proxy labels and the environment can never be routed.
pub fn has_web_service(doc: &Value) -> bool {
    doc.get("services")
        .and_then(Value::as_mapping)
        .map(|services| {
            services
                .keys()
                .filter_map(Value::as_str)
                .any(|name| WEB_SERVICES.contains(&name))
        })
        .unwrap_or(false)
}

/// Update `VITE_ALLOWED_HOSTS` for a frontend service's dev server.
///
/// Existing entries are replaced with the domain; the variable is inserted
/// only on services literally named `frontend`, where the Vite dev server
/// runs.
pub fn update_vite_allowed_hosts_in_service(
    service_name: &str,
    service: &mut Mapping,
    domain: &str,
) -> bool {
    let insert_if_missing = service_name == "frontend";
    match service.get_mut(&key("environment")) {
        Some(Value::Sequence(env)) => {
            let rendered = format!("VITE_ALLOWED_HOSTS={domain}");
            for entry in env.iter_mut() {
                if let Value::String(existing) = entry {
                    if existing.starts_with("VITE_ALLOWED_HOSTS=") {
                        if existing == &rendered {
                            return false;
                        }
                        *existing = rendered;
                        return true;
                    }
                }
            }
            if insert_if_missing {
                env.push(Value::String(rendered));
                return true;
            }
            false
        }
        Some(Value::Mapping(env)) => {
            let value = Value::String(domain.to_string());
            if env.contains_key(&key("VITE_ALLOWED_HOSTS")) {
                if env.get(&key("VITE_ALLOWED_HOSTS")) == Some(&value) {
                    return false;
                }
                env.insert(key("VITE_ALLOWED_HOSTS"), value);
                return true;
            }
            if insert_if_missing {
                env.insert(key("VITE_ALLOWED_HOSTS"), value);
                return true;
            }
            false
        }
        _ => false,
    }
}

/// Replace any `*.localhost` proxy label host with a literal IP.
pub fn replace_proxy_host_with_ip(doc: &mut Value, ip: &str) -> bool {
    let Some(services) = services_mut(doc) else {
        return false;
    };
    let mut updated = false;
    for (_, service) in services.iter_mut() {
        let Some(service) = service.as_mapping_mut() else {
            continue;
        };
        match service.get_mut(&key("labels")) {
            Some(Value::Sequence(labels)) => {
                for entry in labels.iter_mut() {
                    if let Value::String(label) = entry {
                        if label.starts_with("caddy.proxy=") && label.contains(".localhost") {
                            *label = format!("caddy.proxy={ip}");
                            updated = true;
                        }
                    }
                }
            }
            Some(Value::Mapping(labels)) => {
                if let Some(Value::String(host)) = labels.get_mut(&key("caddy.proxy")) {
                    if host.contains(".localhost") {
                        *host = ip.to_string();
                        updated = true;
                    }
                }
            }
            _ => {}
        }
    }
    updated
}

/// Remove source-code bind mounts from frontend services for production
/// builds (BUILD_MODE=prod), leaving named volumes in place.
pub fn strip_frontend_bind_mounts(doc: &mut Value) -> bool {
    const FRONTEND_NAMES: [&str; 4] = ["frontend", "web", "client", "app"];
    const SOURCE_TOKENS: [&str; 4] = ["frontend", "client", "web", "src"];

    let Some(services) = services_mut(doc) else {
        return false;
    };
    let mut updated = false;

    let names: Vec<String> = services
        .keys()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();
    for name in &names {
        let Some(service) = services.get_mut(&key(name)).and_then(Value::as_mapping_mut) else {
            continue;
        };

        let mut is_frontend = FRONTEND_NAMES.contains(&name.to_lowercase().as_str());
        if !is_frontend {
            if let Some(context) = service
                .get(&key("build"))
                .and_then(|b| match b {
                    Value::String(s) => Some(s.clone()),
                    Value::Mapping(m) => m
                        .get(&key("context"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    _ => None,
                })
            {
                let context = context.to_lowercase();
                is_frontend = ["frontend", "client", "web"]
                    .iter()
                    .any(|token| context.contains(token));
            }
        }
        if !is_frontend {
            continue;
        }

        let Some(Value::Sequence(volumes)) = service.get_mut(&key("volumes")) else {
            continue;
        };
        let before = volumes.len();
        volumes.retain(|volume| match volume {
            Value::String(spec) => {
                let Some((source, _)) = spec.split_once(':') else {
                    return true;
                };
                let source_lc = source.to_lowercase();
                let is_code_mount = (source.starts_with('/') || source.starts_with("${"))
                    && SOURCE_TOKENS.iter().any(|token| source_lc.contains(token));
                !is_code_mount
            }
            Value::Mapping(mount) => {
                let is_bind = mount.get(&key("type")).and_then(Value::as_str) == Some("bind");
                if !is_bind {
                    return true;
                }
                let target = mount
                    .get(&key("target"))
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_lowercase();
                !["/app", "/code", "/src"]
                    .iter()
                    .any(|path| target.contains(path))
            }
            _ => true,
        });
        if volumes.len() != before {
            updated = true;
            if volumes.is_empty() {
                service.remove(&key("volumes"));
            }
        }
    }
    updated
}

/// Rewrite `${PROJECT_ROOT}` in build contexts and code volume mounts to a
/// literal worktree path. Used by standalone imports, where builds must run
/// against the imported checkout.
pub fn rewrite_project_root_paths(doc: &mut Value, worktree_path: &Path) -> bool {
    let replacement = worktree_path.display().to_string();
    let Some(services) = services_mut(doc) else {
        return false;
    };
    let mut updated = false;

    for (_, service) in services.iter_mut() {
        let Some(service) = service.as_mapping_mut() else {
            continue;
        };

        match service.get_mut(&key("build")) {
            Some(Value::String(context)) => {
                if context.contains("${PROJECT_ROOT}") {
                    *context = context.replace("${PROJECT_ROOT}", &replacement);
                    updated = true;
                }
            }
            Some(Value::Mapping(build)) => {
                if let Some(Value::String(context)) = build.get_mut(&key("context")) {
                    if context.contains("${PROJECT_ROOT}") {
                        *context = context.replace("${PROJECT_ROOT}", &replacement);
                        updated = true;
                    }
                }
            }
            _ => {}
        }

        if let Some(Value::Sequence(volumes)) = service.get_mut(&key("volumes")) {
            for volume in volumes.iter_mut() {
                if let Value::String(spec) = volume {
                    let is_code_mount =
                        ["/app", "/code", "/src"].iter().any(|path| spec.contains(path));
                    if is_code_mount && spec.contains("${PROJECT_ROOT}") {
                        *spec = spec.replace("${PROJECT_ROOT}", &replacement);
                        updated = true;
                    }
                }
            }
        }
    }
    updated
}

/// Strip prior per-worktree projections from a compose document: container
/// name prefixes, proxy labels, and proxy network declarations.
pub fn clean_legacy_elements(doc: &mut Value) {
    let legacy_networks = ["caddy_proxy", CADDY_NETWORK];

    if let Some(services) = services_mut(doc) {
        let names: Vec<String> = services
            .keys()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        for name in &names {
            let Some(service) = services.get_mut(&key(name)).and_then(Value::as_mapping_mut)
            else {
                continue;
            };

            if let Some(Value::Sequence(networks)) = service.get_mut(&key("networks")) {
                networks.retain(|n| {
                    n.as_str()
                        .map(|n| !legacy_networks.contains(&n))
                        .unwrap_or(true)
                });
                if networks.is_empty() {
                    networks.push(Value::String("default".to_string()));
                }
            }

            if let Some(Value::Sequence(labels)) = service.get_mut(&key("labels")) {
                labels.retain(|l| {
                    l.as_str()
                        .map(|l| !l.contains("caddy.proxy"))
                        .unwrap_or(true)
                });
                if labels.is_empty() {
                    service.remove(&key("labels"));
                }
            }

            if let Some(container_name) = service
                .get(&key("container_name"))
                .and_then(Value::as_str)
            {
                if container_name.contains("${COMPOSE_PROJECT_NAME}") {
                    service.insert(key("container_name"), Value::String(name.clone()));
                }
            }
        }
    }

    if let Some(root) = doc.as_mapping_mut() {
        if let Some(networks) = root
            .get_mut(&key("networks"))
            .and_then(Value::as_mapping_mut)
        {
            for legacy in legacy_networks {
                networks.remove(&key(legacy));
            }
            if networks.is_empty() {
                root.remove(&key("networks"));
            }
        }
    }
}

/// Validate a transformed document. Duplicate networks are an error;
/// duplicate labels and hardcoded volume names come back as warnings.
pub fn validate_transformed(doc: &Value) -> Result<Vec<String>> {
    let mut warnings = Vec::new();
    let Some(root) = doc.as_mapping() else {
        return Ok(warnings);
    };

    if let Some(services) = root.get(&key("services")).and_then(Value::as_mapping) {
        for (name, service) in services {
            let name = name.as_str().unwrap_or("?");
            let Some(service) = service.as_mapping() else {
                continue;
            };

            if let Some(networks) = service.get(&key("networks")).and_then(Value::as_sequence) {
                let mut seen = std::collections::HashSet::new();
                for network in networks.iter().filter_map(Value::as_str) {
                    if !seen.insert(network) {
                        return Err(DockertreeError::Yaml {
                            message: format!("service '{name}' has duplicate network: {network}"),
                        });
                    }
                }
            }

            if let Some(labels) = service.get(&key("labels")).and_then(Value::as_sequence) {
                let mut seen = std::collections::HashSet::new();
                for label in labels.iter().filter_map(Value::as_str) {
                    if !seen.insert(label) {
                        warnings.push(format!("service '{name}' has duplicate label: {label}"));
                    }
                }
            }
        }
    }

    if let Some(volumes) = root.get(&key("volumes")).and_then(Value::as_mapping) {
        for (name, config) in volumes {
            let name = name.as_str().unwrap_or("?");
            if let Some(volume_name) = config
                .as_mapping()
                .and_then(|m| m.get(&key("name")))
                .and_then(Value::as_str)
            {
                if !volume_name.contains("${COMPOSE_PROJECT_NAME}") {
                    warnings.push(format!(
                        "volume '{name}' has hardcoded name '{volume_name}'; \
                         it will collide between worktrees"
                    ));
                }
            }
        }
    }

    Ok(warnings)
}

/// Per-worktree volume names referenced by one service.
///
/// Matches the service's volume references against the document's top-level
/// named volumes and projects each into `{compose_project}_{name}`.
pub fn service_volume_names(doc: &Value, compose_project: &str, service_name: &str) -> Vec<String> {
    let Some(root) = doc.as_mapping() else {
        return Vec::new();
    };
    let declared: std::collections::HashSet<&str> = root
        .get(&key("volumes"))
        .and_then(Value::as_mapping)
        .map(|m| m.keys().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let Some(service) = root
        .get(&key("services"))
        .and_then(Value::as_mapping)
        .and_then(|s| s.get(&key(service_name)))
        .and_then(Value::as_mapping)
    else {
        return Vec::new();
    };

    let mut names = Vec::new();
    if let Some(volumes) = service.get(&key("volumes")).and_then(Value::as_sequence) {
        for volume in volumes {
            let source = match volume {
                Value::String(spec) => spec.split(':').next().map(str::trim),
                Value::Mapping(mount) => mount.get(&key("source")).and_then(Value::as_str),
                _ => None,
            };
            if let Some(source) = source {
                if declared.contains(source) {
                    let projected = format!("{compose_project}_{source}");
                    if !names.contains(&projected) {
                        names.push(projected);
                    }
                }
            }
        }
    }
    names
}

/// Parse YAML into a compose document value.
pub fn parse_compose(content: &str) -> Result<Value> {
    let doc: Value = serde_yaml::from_str(content)?;
    Ok(doc)
}

/// Serialize a compose document with stable key ordering.
pub fn write_compose(doc: &Value) -> Result<String> {
    Ok(serde_yaml::to_string(doc)?)
}

/// Load, mutate, and write back a compose file on disk.
pub fn edit_compose_file<F>(path: &Path, mutate: F) -> Result<bool>
where
    F: FnOnce(&mut Value) -> bool,
{
    let content = std::fs::read_to_string(path)?;
    let mut doc = parse_compose(&content)?;
    // Drop a stray `version: null` left behind by earlier tooling.
    if let Some(root) = doc.as_mapping_mut() {
        if root.get(&key("version")) == Some(&Value::Null) {
            root.remove(&key("version"));
        }
    }
    let changed = mutate(&mut doc);
    if changed {
        std::fs::write(path, write_compose(&doc)?)?;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
services:
  web:
    build: "."
    ports:
      - "8000:8000"
    volumes:
      - "./:/app"
  db:
    image: "postgres:14"
    volumes:
      - "postgres_data:/var/lib/postgresql/data"
volumes:
  postgres_data: {}
"#;

    fn transform(content: &str) -> Value {
        let base = parse_compose(content).unwrap();
        transform_base_compose(&base, "worktrees").unwrap()
    }

    fn service<'a>(doc: &'a Value, name: &str) -> &'a Mapping {
        doc["services"][name].as_mapping().unwrap()
    }

    #[test]
    fn test_transform_reference_scenario() {
        let doc = transform(BASE);

        let web = service(&doc, "web");
        assert!(web.get(&key("ports")).is_none());
        assert_eq!(
            web[&key("expose")],
            Value::Sequence(vec![Value::String("8000".to_string())])
        );
        assert_eq!(
            web[&key("volumes")][0],
            Value::String("${PROJECT_ROOT}:/app".to_string())
        );

        let labels: Vec<&str> = web[&key("labels")]
            .as_sequence()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(labels.contains(&"caddy.proxy=${COMPOSE_PROJECT_NAME}.localhost"));
        assert!(labels.contains(&"caddy.proxy.reverse_proxy=${COMPOSE_PROJECT_NAME}-web:8000"));

        let networks = web[&key("networks")].as_sequence().unwrap();
        assert!(networks.contains(&Value::String(CADDY_NETWORK.to_string())));

        assert_eq!(
            doc["volumes"]["postgres_data"]["name"],
            Value::String("${COMPOSE_PROJECT_NAME}_postgres_data".to_string())
        );
        assert_eq!(doc["networks"][CADDY_NETWORK]["external"], Value::Bool(true));
    }

    #[test]
    fn test_transform_container_names() {
        let content = r#"
services:
  web:
    image: x
    container_name: custom-web
  worker:
    image: x
"#;
        let doc = transform(content);
        assert_eq!(
            service(&doc, "web")[&key("container_name")],
            Value::String("${COMPOSE_PROJECT_NAME}-custom-web".to_string())
        );
        assert_eq!(
            service(&doc, "worker")[&key("container_name")],
            Value::String("${COMPOSE_PROJECT_NAME}-worker".to_string())
        );
    }

    #[test]
    fn test_transform_is_idempotent() {
        let once = transform(BASE);
        let twice = transform_base_compose(&once, "worktrees").unwrap();
        assert_eq!(write_compose(&once).unwrap(), write_compose(&twice).unwrap());
    }

    #[test]
    fn test_transform_drops_global_services_and_volumes() {
        let content = r#"
services:
  web:
    image: x
  caddy:
    image: caddy
  caddy-monitor:
    image: watcher
volumes:
  caddy_data: {}
  caddy_config: {}
  media_files: {}
"#;
        let doc = transform(content);
        let services = doc["services"].as_mapping().unwrap();
        assert!(services.contains_key(&key("web")));
        assert!(!services.contains_key(&key("caddy")));
        assert!(!services.contains_key(&key("caddy-monitor")));

        let volumes = doc["volumes"].as_mapping().unwrap();
        assert!(!volumes.contains_key(&key("caddy_data")));
        assert!(!volumes.contains_key(&key("caddy_config")));
        assert!(volumes.contains_key(&key("media_files")));
    }

    #[test]
    fn test_transform_path_token_rules() {
        let content = r#"
services:
  web:
    image: x
    volumes:
      - "./src:/app/src"
      - "./config/nginx.conf:/etc/nginx.conf"
      - "./postgres-config:/etc/postgresql"
      - "./media:/app/media"
"#;
        let doc = transform(content);
        let volumes: Vec<&str> = service(&doc, "web")[&key("volumes")]
            .as_sequence()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(
            volumes[0],
            "${PROJECT_ROOT}/worktrees/${COMPOSE_PROJECT_NAME}/src:/app/src"
        );
        assert_eq!(volumes[1], "${PROJECT_ROOT}/config/nginx.conf:/etc/nginx.conf");
        assert_eq!(volumes[2], "${PROJECT_ROOT}/postgres-config:/etc/postgresql");
        assert_eq!(
            volumes[3],
            "${PROJECT_ROOT}/worktrees/${COMPOSE_PROJECT_NAME}/media:/app/media"
        );
    }

    #[test]
    fn test_transform_build_long_form() {
        let content = r#"
services:
  api:
    build:
      context: "./app"
      dockerfile: "./docker/Dockerfile"
"#;
        let doc = transform(content);
        let build = service(&doc, "api")[&key("build")].as_mapping().unwrap();
        assert_eq!(
            build[&key("context")],
            Value::String("${PROJECT_ROOT}/worktrees/${COMPOSE_PROJECT_NAME}/app".to_string())
        );
        assert_eq!(
            build[&key("dockerfile")],
            Value::String("${PROJECT_ROOT}/docker/Dockerfile".to_string())
        );
    }

    #[test]
    fn test_transform_env_file_and_environment() {
        let content = r#"
services:
  web:
    image: x
    environment:
      - "DEBUG=True"
  db:
    image: x
    environment:
      DEBUG: "True"
"#;
        let doc = transform(content);

        let env_file = service(&doc, "web")[&key("env_file")].as_sequence().unwrap();
        assert!(env_file.contains(&Value::String("${PROJECT_ROOT}/.env".to_string())));
        assert!(env_file.contains(&Value::String(
            "${PROJECT_ROOT}/.dockertree/env.dockertree".to_string()
        )));

        let web_env: Vec<&str> = service(&doc, "web")[&key("environment")]
            .as_sequence()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(web_env.contains(&"DEBUG=True"));
        assert!(web_env.contains(&"COMPOSE_PROJECT_NAME=${COMPOSE_PROJECT_NAME}"));
        assert!(web_env.contains(&"PROJECT_ROOT=${PROJECT_ROOT}"));

        let db_env = service(&doc, "db")[&key("environment")].as_mapping().unwrap();
        assert_eq!(db_env[&key("DEBUG")], Value::String("True".to_string()));
        assert_eq!(
            db_env[&key("PROJECT_ROOT")],
            Value::String("${PROJECT_ROOT}".to_string())
        );
    }

    #[test]
    fn test_domain_override_replaces_label_host() {
        let mut doc = transform(BASE);
        let changed = ensure_proxy_labels_and_network(&mut doc, Some("app.example.com"), None, false);
        assert!(changed);
        let labels: Vec<&str> = service(&doc, "web")[&key("labels")]
            .as_sequence()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(labels.contains(&"caddy.proxy=app.example.com"));
        assert!(!labels.iter().any(|l| l.contains(".localhost")));

        // Second application is a no-op.
        assert!(!ensure_proxy_labels_and_network(
            &mut doc,
            Some("app.example.com"),
            None,
            false
        ));
    }

    #[test]
    fn test_has_web_service() {
        let with_web = parse_compose("services:\n  api:\n    image: x\n").unwrap();
        assert!(has_web_service(&with_web));

        let without_web = parse_compose("services:\n  worker:\n    image: x\n").unwrap();
        assert!(!has_web_service(&without_web));

        let no_services = parse_compose("volumes:\n  data: {}\n").unwrap();
        assert!(!has_web_service(&no_services));
    }

    #[test]
    fn test_vite_allowed_hosts_updates() {
        let content = r#"
services:
  frontend:
    image: x
    environment:
      - "NODE_ENV=development"
  api:
    image: x
    environment:
      VITE_ALLOWED_HOSTS: "old.localhost"
  db:
    image: x
"#;
        let mut doc = parse_compose(content).unwrap();
        let mut changed = Vec::new();
        for name in ["frontend", "api", "db"] {
            let service = doc
                .as_mapping_mut()
                .unwrap()
                .get_mut(&key("services"))
                .and_then(Value::as_mapping_mut)
                .and_then(|s| s.get_mut(&key(name)))
                .and_then(Value::as_mapping_mut)
                .unwrap();
            changed.push(update_vite_allowed_hosts_in_service(
                name,
                service,
                "app.example.com",
            ));
        }
        // frontend: inserted; api: replaced; db: no environment section.
        assert_eq!(changed, vec![true, true, false]);

        let frontend_env: Vec<&str> = doc["services"]["frontend"]["environment"]
            .as_sequence()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(frontend_env.contains(&"VITE_ALLOWED_HOSTS=app.example.com"));
        assert_eq!(
            doc["services"]["api"]["environment"]["VITE_ALLOWED_HOSTS"],
            Value::String("app.example.com".to_string())
        );
    }

    #[test]
    fn test_ip_override_replaces_localhost_labels() {
        let mut doc = transform(BASE);
        assert!(replace_proxy_host_with_ip(&mut doc, "203.0.113.10"));
        let labels: Vec<&str> = service(&doc, "web")[&key("labels")]
            .as_sequence()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(labels.contains(&"caddy.proxy=203.0.113.10"));
    }

    #[test]
    fn test_strip_frontend_bind_mounts() {
        let content = r#"
services:
  frontend:
    image: x
    volumes:
      - "${PROJECT_ROOT}/frontend:/app"
      - "node_modules:/app/node_modules"
volumes:
  node_modules: {}
"#;
        let mut doc = parse_compose(content).unwrap();
        assert!(strip_frontend_bind_mounts(&mut doc));
        let volumes = doc["services"]["frontend"]["volumes"].as_sequence().unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(
            volumes[0],
            Value::String("node_modules:/app/node_modules".to_string())
        );
    }

    #[test]
    fn test_rewrite_project_root_paths_for_standalone() {
        let content = r#"
services:
  web:
    build:
      context: "${PROJECT_ROOT}"
    volumes:
      - "${PROJECT_ROOT}:/app"
      - "${PROJECT_ROOT}/config:/etc/app"
"#;
        let mut doc = parse_compose(content).unwrap();
        let worktree = Path::new("/srv/app/worktrees/beta");
        assert!(rewrite_project_root_paths(&mut doc, worktree));

        let build = doc["services"]["web"]["build"].as_mapping().unwrap();
        assert_eq!(
            build[&key("context")],
            Value::String("/srv/app/worktrees/beta".to_string())
        );
        let volumes = doc["services"]["web"]["volumes"].as_sequence().unwrap();
        assert_eq!(volumes[0], Value::String("/srv/app/worktrees/beta:/app".to_string()));
        // Config mounts are not code mounts and stay untouched.
        assert_eq!(
            volumes[1],
            Value::String("${PROJECT_ROOT}/config:/etc/app".to_string())
        );
    }

    #[test]
    fn test_clean_legacy_elements() {
        let once = transform(BASE);
        let mut doc = once.clone();
        clean_legacy_elements(&mut doc);

        let web = service(&doc, "web");
        assert_eq!(web[&key("container_name")], Value::String("web".to_string()));
        assert!(web.get(&key("labels")).is_none());
        let networks = web[&key("networks")].as_sequence().unwrap();
        assert_eq!(networks, &vec![Value::String("default".to_string())]);
        assert!(doc["networks"].as_mapping().map_or(true, |m| !m
            .contains_key(&key(CADDY_NETWORK))));
    }

    #[test]
    fn test_validate_rejects_duplicate_networks() {
        let content = r#"
services:
  web:
    image: x
    networks:
      - dockertree_caddy_proxy
      - dockertree_caddy_proxy
"#;
        let doc = parse_compose(content).unwrap();
        assert!(validate_transformed(&doc).is_err());
    }

    #[test]
    fn test_validate_warns_on_hardcoded_volume_name() {
        let content = r#"
services:
  web:
    image: x
volumes:
  media_files:
    name: "myapp_media_files"
"#;
        let doc = parse_compose(content).unwrap();
        let warnings = validate_transformed(&doc).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("hardcoded"));
    }

    #[test]
    fn test_service_volume_names() {
        let doc = transform(BASE);
        let names = service_volume_names(&doc, "myapp-beta", "db");
        assert_eq!(names, vec!["myapp-beta_postgres_data".to_string()]);
        assert!(service_volume_names(&doc, "myapp-beta", "web").is_empty());
        assert!(service_volume_names(&doc, "myapp-beta", "missing").is_empty());
    }

    #[test]
    fn test_transform_rejects_invalid_document() {
        let doc = parse_compose("just_a_key: 1\n").unwrap();
        assert!(transform_base_compose(&doc, "worktrees").is_err());
    }
}
