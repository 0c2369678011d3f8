//! End-to-end tests for project setup, compose transformation, and
//! environment-file generation against a real temporary project tree.
//! No container runtime is required.

use dockertree_core::config::{ProjectConfig, ProjectContext, DOCKERTREE_DIR};
use dockertree_core::env_file::load_env_file;
use dockertree_core::environment::EnvironmentManager;
use dockertree_core::setup::{SetupManager, SetupOptions};
use dockertree_core::transform;
use dockertree_core::workspace;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const BASE_COMPOSE: &str = r#"services:
  web:
    build: .
    ports:
      - "8000:8000"
    volumes:
      - ./:/app
  db:
    image: postgres:14
    volumes:
      - postgres_data:/var/lib/postgresql/data
volumes:
  postgres_data: {}
"#;

fn scaffold_project(tmp: &TempDir, name: &str) -> PathBuf {
    let root = tmp.path().join(name);
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("docker-compose.yml"), BASE_COMPOSE).unwrap();
    SetupManager::new(&root)
        .setup_project(&SetupOptions {
            project_name: Some(name.to_string()),
            update_gitignore: false,
        })
        .unwrap();
    root
}

fn load_transformed(root: &Path) -> serde_yaml::Value {
    let content = fs::read_to_string(
        root.join(DOCKERTREE_DIR).join("docker-compose.worktree.yml"),
    )
    .unwrap();
    transform::parse_compose(&content).unwrap()
}

#[test]
fn test_setup_produces_reference_transform() {
    let tmp = TempDir::new().unwrap();
    let root = scaffold_project(&tmp, "myapp");
    let doc = load_transformed(&root);

    let web = &doc["services"]["web"];
    assert_eq!(
        web["expose"],
        serde_yaml::Value::Sequence(vec![serde_yaml::Value::String("8000".into())])
    );
    assert!(web.get("ports").is_none());
    assert_eq!(
        web["volumes"][0],
        serde_yaml::Value::String("${PROJECT_ROOT}:/app".into())
    );

    let labels: Vec<&str> = web["labels"]
        .as_sequence()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert!(labels.contains(&"caddy.proxy=${COMPOSE_PROJECT_NAME}.localhost"));

    assert_eq!(
        doc["volumes"]["postgres_data"]["name"],
        serde_yaml::Value::String("${COMPOSE_PROJECT_NAME}_postgres_data".into())
    );
    assert_eq!(
        doc["networks"]["dockertree_caddy_proxy"]["external"],
        serde_yaml::Value::Bool(true)
    );
}

#[test]
fn test_setup_is_repeatable() {
    let tmp = TempDir::new().unwrap();
    let root = scaffold_project(&tmp, "myapp");
    let first = fs::read_to_string(
        root.join(DOCKERTREE_DIR).join("docker-compose.worktree.yml"),
    )
    .unwrap();

    SetupManager::new(&root)
        .setup_project(&SetupOptions {
            project_name: Some("myapp".to_string()),
            update_gitignore: false,
        })
        .unwrap();
    let second = fs::read_to_string(
        root.join(DOCKERTREE_DIR).join("docker-compose.worktree.yml"),
    )
    .unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_worktree_env_files_for_created_branch() {
    let tmp = TempDir::new().unwrap();
    let root = scaffold_project(&tmp, "myapp");
    fs::write(root.join(".env"), "POSTGRES_USER=user\n").unwrap();

    let ctx = ProjectContext::new(root.clone());
    let worktree = ctx.worktree_path("feature-auth");
    EnvironmentManager::new(&ctx)
        .create_worktree_env("feature-auth", &worktree, None, None)
        .unwrap();

    let vars = load_env_file(&workspace::env_dockertree_path(&worktree));
    assert_eq!(vars["COMPOSE_PROJECT_NAME"], "myapp-feature-auth");
    assert_eq!(vars["SITE_DOMAIN"], "http://myapp-feature-auth.localhost");
    assert_eq!(
        vars["ALLOWED_HOSTS"],
        "localhost,127.0.0.1,myapp-feature-auth.localhost,*.localhost,myapp-feature-auth-web,web"
    );
    assert!(workspace::env_file_path(&worktree).is_file());
}

#[test]
fn test_host_ports_are_stable_and_disjoint() {
    let tmp = TempDir::new().unwrap();
    let root = scaffold_project(&tmp, "myapp");
    let ctx = ProjectContext::new(root);
    let manager = EnvironmentManager::new(&ctx);

    let alpha = ctx.worktree_path("alpha");
    let beta = ctx.worktree_path("beta");
    manager.create_worktree_env("alpha", &alpha, None, None).unwrap();
    manager.create_worktree_env("beta", &beta, None, None).unwrap();

    let alpha_vars = load_env_file(&workspace::env_dockertree_path(&alpha));
    let beta_vars = load_env_file(&workspace::env_dockertree_path(&beta));

    for var in [
        "DOCKERTREE_DB_HOST_PORT",
        "DOCKERTREE_REDIS_HOST_PORT",
        "DOCKERTREE_WEB_HOST_PORT",
    ] {
        let a: u16 = alpha_vars[var].parse().unwrap();
        let b: u16 = beta_vars[var].parse().unwrap();
        if a != 0 && b != 0 {
            assert_ne!(a, b, "{var} collides between branches");
        }
    }

    // Regenerating alpha keeps its assignments.
    manager.create_worktree_env("alpha", &alpha, None, None).unwrap();
    let regenerated = load_env_file(&workspace::env_dockertree_path(&alpha));
    assert_eq!(
        regenerated["DOCKERTREE_DB_HOST_PORT"],
        alpha_vars["DOCKERTREE_DB_HOST_PORT"]
    );
}

#[test]
fn test_domain_override_scenario() {
    let tmp = TempDir::new().unwrap();
    let root = scaffold_project(&tmp, "myapp");
    let ctx = ProjectContext::new(root.clone());
    let manager = EnvironmentManager::new(&ctx);

    let worktree = ctx.worktree_path("beta");
    manager.create_worktree_env("beta", &worktree, None, None).unwrap();

    // The worktree carries its own compose copy, as create() would arrange.
    let compose_src = root.join(DOCKERTREE_DIR).join("docker-compose.worktree.yml");
    let compose_dst = worktree.join(DOCKERTREE_DIR).join("docker-compose.worktree.yml");
    fs::copy(&compose_src, &compose_dst).unwrap();

    manager
        .apply_domain_overrides(&worktree, "app.example.com", false)
        .unwrap();

    let vars = load_env_file(&workspace::env_dockertree_path(&worktree));
    assert_eq!(vars["SITE_DOMAIN"], "https://app.example.com");
    assert!(vars["ALLOWED_HOSTS"].contains("app.example.com"));
    assert!(vars["ALLOWED_HOSTS"].contains("*.example.com"));
    assert_eq!(vars["USE_SECURE_COOKIES"], "True");
    assert_eq!(vars["BUILD_MODE"], "prod");

    let doc = transform::parse_compose(&fs::read_to_string(&compose_dst).unwrap()).unwrap();
    let labels: Vec<&str> = doc["services"]["web"]["labels"]
        .as_sequence()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert!(labels.contains(&"caddy.proxy=app.example.com"));
    let networks = doc["services"]["web"]["networks"].as_sequence().unwrap();
    assert!(networks.contains(&serde_yaml::Value::String("dockertree_caddy_proxy".into())));
}

#[test]
fn test_fractal_root_discovery_from_worktree() {
    let tmp = TempDir::new().unwrap();
    let root = scaffold_project(&tmp, "myapp");

    // A worktree carrying its own config is its own project root.
    let worktree = root.join("worktrees").join("beta");
    fs::create_dir_all(worktree.join(DOCKERTREE_DIR)).unwrap();
    let mut config = ProjectConfig::default_for(&worktree);
    config.project_name = "myapp".to_string();
    config.save(&worktree).unwrap();

    let inner = worktree.join("src");
    fs::create_dir_all(&inner).unwrap();
    assert_eq!(
        workspace::find_project_root(&inner),
        worktree.canonicalize().unwrap()
    );

    // From outside the worktree, the outer root wins.
    assert_eq!(
        workspace::find_project_root(&root),
        root.canonicalize().unwrap()
    );
}
