//! Workspace and path resolution
//!
//! Project-root discovery is a pure function of a starting path, which is what
//! makes fractal operation work: a worktree carrying its own
//! `.dockertree/config.yml` is itself a valid project root when commands run
//! from inside it.

use crate::config::{COMPOSE_WORKTREE_FILE, DOCKERTREE_DIR, ENV_DOCKERTREE_FILE};
use crate::errors::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable overriding the starting directory for root discovery.
pub const WORKING_DIR_ENV_VAR: &str = "DOCKERTREE_WORKING_DIR";

/// Find the project root for a starting path.
///
/// The nearest ancestor (including the path itself) containing
/// `.dockertree/config.yml` wins. A bare `.dockertree/` directory without a
/// config is accepted as a legacy fallback. If nothing matches, the starting
/// path itself is returned.
pub fn find_project_root(start: &Path) -> PathBuf {
    let start = start
        .canonicalize()
        .unwrap_or_else(|_| start.to_path_buf());

    for candidate in start.ancestors() {
        if candidate.join(DOCKERTREE_DIR).join("config.yml").is_file() {
            debug!("Project root: {}", candidate.display());
            return candidate.to_path_buf();
        }
    }

    // Legacy: .dockertree/ directory present but no config.yml yet.
    for candidate in start.ancestors() {
        if candidate.join(DOCKERTREE_DIR).is_dir() {
            debug!("Project root (legacy, no config): {}", candidate.display());
            return candidate.to_path_buf();
        }
    }

    start
}

/// Find the project root starting from the current directory, honoring
/// `DOCKERTREE_WORKING_DIR` when set.
pub fn find_project_root_from_cwd() -> Result<PathBuf> {
    let start = match std::env::var_os(WORKING_DIR_ENV_VAR) {
        Some(dir) => PathBuf::from(dir),
        None => std::env::current_dir()?,
    };
    Ok(find_project_root(&start))
}

/// Whether a directory is (or is inside) a set-up project root.
pub fn is_inside_project(path: &Path) -> bool {
    let root = find_project_root(path);
    root.join(DOCKERTREE_DIR).join("config.yml").is_file()
}

/// Execution context: where a command was launched relative to the project.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionContext {
    /// Running from the outer project root (or anywhere outside `worktrees/`).
    ProjectRoot,
    /// Running from inside a worktree directory.
    Worktree { path: PathBuf, branch: PathBuf },
}

/// Detect whether `cwd` is inside the project's worktree directory.
///
/// The branch component is the first path segment under the worktree dir;
/// callers that need the VCS-authoritative branch name should still ask the
/// git layer.
pub fn detect_execution_context(project_root: &Path, worktree_dir: &str, cwd: &Path) -> ExecutionContext {
    let worktrees = project_root.join(worktree_dir);
    let cwd = cwd.canonicalize().unwrap_or_else(|_| cwd.to_path_buf());
    match cwd.strip_prefix(&worktrees) {
        Ok(rel) => match rel.components().next() {
            Some(first) => {
                let branch = PathBuf::from(first.as_os_str());
                ExecutionContext::Worktree {
                    path: worktrees.join(&branch),
                    branch,
                }
            }
            None => ExecutionContext::ProjectRoot,
        },
        Err(_) => ExecutionContext::ProjectRoot,
    }
}

/// Path to a worktree's transformed compose file, checking the worktree's own
/// `.dockertree/` first and falling back to the project root's.
pub fn compose_override_path(worktree_path: &Path, project_root: &Path) -> Option<PathBuf> {
    let local = worktree_path.join(DOCKERTREE_DIR).join(COMPOSE_WORKTREE_FILE);
    if local.is_file() {
        return Some(local);
    }
    let fallback = project_root.join(DOCKERTREE_DIR).join(COMPOSE_WORKTREE_FILE);
    if fallback.is_file() {
        return Some(fallback);
    }
    None
}

/// Path to the `.env` file in a worktree (or project root).
pub fn env_file_path(dir: &Path) -> PathBuf {
    dir.join(".env")
}

/// Path to the scoped env file inside a directory's `.dockertree/`.
pub fn env_dockertree_path(dir: &Path) -> PathBuf {
    dir.join(DOCKERTREE_DIR).join(ENV_DOCKERTREE_FILE)
}

/// Copy `.env` from one directory to another if present.
///
/// Idempotent: when source and target resolve to the same file the copy is
/// skipped and reported as success. Returns whether a usable `.env` exists at
/// the target afterwards.
pub fn copy_env_file(source_dir: &Path, target_dir: &Path) -> bool {
    let source = env_file_path(source_dir);
    let target = env_file_path(target_dir);

    if !source.is_file() {
        return false;
    }

    let resolved_source = source.canonicalize().unwrap_or_else(|_| source.clone());
    let resolved_target = target.canonicalize().unwrap_or_else(|_| target.clone());
    if resolved_source == resolved_target {
        return true;
    }

    match std::fs::copy(&source, &target) {
        Ok(_) => target.is_file(),
        Err(e) => {
            warn!("Failed to copy .env file: {e}");
            false
        }
    }
}

/// Recursively copy a directory, skipping entries for which `skip` returns
/// true on the top level.
pub fn copy_dir_filtered(
    source: &Path,
    target: &Path,
    skip_top_level: &dyn Fn(&str) -> bool,
) -> Result<()> {
    copy_dir_inner(source, target, skip_top_level, true)
}

fn copy_dir_inner(
    source: &Path,
    target: &Path,
    skip_top_level: &dyn Fn(&str) -> bool,
    is_top: bool,
) -> Result<()> {
    std::fs::create_dir_all(target)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if is_top && skip_top_level(&name) {
            continue;
        }
        let src = entry.path();
        let dst = target.join(&name);
        if entry.file_type()?.is_dir() {
            copy_dir_inner(&src, &dst, skip_top_level, false)?;
        } else {
            std::fs::copy(&src, &dst)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn make_project(tmp: &TempDir) -> PathBuf {
        let root = tmp.path().join("proj");
        fs::create_dir_all(root.join(DOCKERTREE_DIR)).unwrap();
        fs::write(root.join(DOCKERTREE_DIR).join("config.yml"), "project_name: proj\n").unwrap();
        root
    }

    #[test]
    fn test_find_project_root_walks_upward() {
        let tmp = TempDir::new().unwrap();
        let root = make_project(&tmp);
        let nested = root.join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_project_root(&nested), root.canonicalize().unwrap());
        assert_eq!(find_project_root(&root), root.canonicalize().unwrap());
    }

    #[test]
    fn test_find_project_root_prefers_nearest_config() {
        // Fractal: a worktree with its own config is its own root.
        let tmp = TempDir::new().unwrap();
        let outer = make_project(&tmp);
        let inner = outer.join("worktrees").join("feature");
        fs::create_dir_all(inner.join(DOCKERTREE_DIR)).unwrap();
        fs::write(
            inner.join(DOCKERTREE_DIR).join("config.yml"),
            "project_name: proj\n",
        )
        .unwrap();

        assert_eq!(find_project_root(&inner), inner.canonicalize().unwrap());
    }

    #[test]
    fn test_find_project_root_legacy_directory_without_config() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("legacy");
        fs::create_dir_all(root.join(DOCKERTREE_DIR)).unwrap();
        let nested = root.join("sub");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_project_root(&nested), root.canonicalize().unwrap());
    }

    #[test]
    fn test_find_project_root_fallback_is_start() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("plain");
        fs::create_dir_all(&dir).unwrap();
        assert_eq!(find_project_root(&dir), dir.canonicalize().unwrap());
    }

    #[test]
    fn test_detect_execution_context() {
        let tmp = TempDir::new().unwrap();
        let root = make_project(&tmp);
        let wt = root.join("worktrees").join("beta").join("src");
        fs::create_dir_all(&wt).unwrap();

        let ctx = detect_execution_context(&root, "worktrees", &wt);
        match ctx {
            ExecutionContext::Worktree { branch, .. } => {
                assert_eq!(branch, PathBuf::from("beta"));
            }
            other => panic!("expected worktree context, got {other:?}"),
        }

        let ctx = detect_execution_context(&root, "worktrees", &root);
        assert_eq!(ctx, ExecutionContext::ProjectRoot);
    }

    #[test]
    fn test_copy_env_file_idempotent_on_same_path() {
        let tmp = TempDir::new().unwrap();
        fs::write(env_file_path(tmp.path()), "A=1\n").unwrap();
        assert!(copy_env_file(tmp.path(), tmp.path()));
    }

    #[test]
    fn test_copy_env_file_copies_content() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(env_file_path(&src), "A=1\n").unwrap();

        assert!(copy_env_file(&src, &dst));
        assert_eq!(fs::read_to_string(env_file_path(&dst)).unwrap(), "A=1\n");
    }

    #[test]
    fn test_copy_dir_filtered_skips_top_level_entry() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("keep")).unwrap();
        fs::create_dir_all(src.join("worktrees").join("x")).unwrap();
        fs::write(src.join("config.yml"), "x: 1\n").unwrap();
        fs::write(src.join("keep").join("worktrees"), "not a dir\n").unwrap();

        let dst = tmp.path().join("dst");
        copy_dir_filtered(&src, &dst, &|name| name == "worktrees").unwrap();

        assert!(dst.join("config.yml").is_file());
        assert!(!dst.join("worktrees").exists());
        // Nested entries with the same name are not skipped.
        assert!(dst.join("keep").join("worktrees").is_file());
    }
}
