//! Env-file parsing and rewriting
//!
//! KEY=VALUE files with `#` comments. Parsing is deliberately forgiving:
//! blank lines, comments, and malformed lines are skipped, values are split
//! on the first `=`, and surrounding whitespace is trimmed. Rewriting keeps
//! the file's existing line layout and only touches the targeted keys.

use crate::errors::Result;
use indexmap::IndexMap;
use std::path::Path;
use tracing::warn;

/// Load and parse an env file into an ordered key/value map.
///
/// Returns an empty map when the file does not exist or cannot be read.
pub fn load_env_file(path: &Path) -> IndexMap<String, String> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            if path.exists() {
                warn!("Failed to read env file {}: {e}", path.display());
            }
            return IndexMap::new();
        }
    };
    parse_env(&content)
}

/// Parse env-file content into an ordered key/value map.
pub fn parse_env(content: &str) -> IndexMap<String, String> {
    let mut vars = IndexMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            // Lines without '=' are silently ignored.
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        vars.insert(key.to_string(), value.trim().to_string());
    }
    vars
}

/// Serialize a key/value map as env-file content.
///
/// Keys are emitted in map order; pass an optional comment header (without
/// the `#` markers) to preserve the file's leading documentation.
pub fn serialize_env(vars: &IndexMap<String, String>, header: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(header) = header {
        for line in header.lines() {
            out.push('#');
            if !line.is_empty() {
                out.push(' ');
                out.push_str(line);
            }
            out.push('\n');
        }
    }
    for (key, value) in vars {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    out
}

/// Update or append a `KEY=value` line in env-file content, preserving all
/// other lines as written.
pub fn upsert_var(content: &str, key: &str, value: &str) -> String {
    let mut found = false;
    let mut lines: Vec<String> = content
        .lines()
        .map(|line| {
            let trimmed = line.trim_start();
            if !trimmed.starts_with('#') && key_of(trimmed) == Some(key) {
                found = true;
                format!("{key}={value}")
            } else {
                line.to_string()
            }
        })
        .collect();
    if !found {
        lines.push(format!("{key}={value}"));
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Remove every `KEY=...` line for the given key.
pub fn remove_var(content: &str, key: &str) -> String {
    let lines: Vec<&str> = content
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            trimmed.starts_with('#') || key_of(trimmed) != Some(key)
        })
        .collect();
    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

/// Collapse runs of three or more blank lines left behind by removals.
pub fn collapse_blank_lines(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut blanks = 0;
    for line in content.lines() {
        if line.trim().is_empty() {
            blanks += 1;
            if blanks > 1 {
                continue;
            }
        } else {
            blanks = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Read one variable out of an env file without loading the whole map.
pub fn read_var(path: &Path, key: &str) -> Option<String> {
    load_env_file(path).shift_remove(key)
}

/// Apply a set of upserts to an env file on disk, creating it (with the given
/// header) when absent.
pub fn update_env_file(path: &Path, updates: &[(&str, String)], header: Option<&str>) -> Result<()> {
    let mut content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => match header {
            Some(header) => format!("# {header}\n"),
            None => String::new(),
        },
    };
    for (key, value) in updates {
        content = upsert_var(&content, key, value);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

fn key_of(line: &str) -> Option<&str> {
    line.split_once('=').map(|(k, _)| k.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_comments_blanks_and_malformed_lines() {
        let content = "# header\n\nKEY=value\nNOEQUALS\n  SPACED = padded  \n=novalue\n";
        let vars = parse_env(content);
        assert_eq!(vars.len(), 2);
        assert_eq!(vars["KEY"], "value");
        assert_eq!(vars["SPACED"], "padded");
    }

    #[test]
    fn test_parse_splits_on_first_equals() {
        let vars = parse_env("URL=postgres://u:p@host:5432/db?a=b\n");
        assert_eq!(vars["URL"], "postgres://u:p@host:5432/db?a=b");
    }

    #[test]
    fn test_parse_serialize_round_trip() {
        let content = "# env for test\nA=1\nB=two\nC=a=b\n";
        let vars = parse_env(content);
        let serialized = serialize_env(&vars, Some("env for test"));
        assert_eq!(parse_env(&serialized), vars);
        assert!(serialized.starts_with("# env for test\n"));
    }

    #[test]
    fn test_upsert_replaces_existing_line_in_place() {
        let content = "A=1\nB=2\nC=3\n";
        let updated = upsert_var(content, "B", "changed");
        assert_eq!(updated, "A=1\nB=changed\nC=3\n");
    }

    #[test]
    fn test_upsert_appends_missing_key() {
        let content = "A=1\n";
        let updated = upsert_var(content, "NEW", "value");
        assert_eq!(updated, "A=1\nNEW=value\n");
    }

    #[test]
    fn test_upsert_does_not_touch_comments() {
        let content = "# B=commented\nB=2\n";
        let updated = upsert_var(content, "B", "3");
        assert_eq!(updated, "# B=commented\nB=3\n");
    }

    #[test]
    fn test_remove_var() {
        let content = "A=1\nPUSH_DOMAIN=x\nB=2\n";
        let removed = remove_var(content, "PUSH_DOMAIN");
        assert_eq!(removed, "A=1\nB=2\n");
    }

    #[test]
    fn test_collapse_blank_lines() {
        let content = "A=1\n\n\n\nB=2\n";
        assert_eq!(collapse_blank_lines(content), "A=1\n\nB=2\n");
    }

    #[test]
    fn test_update_env_file_creates_with_header() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("env.dockertree");
        update_env_file(&path, &[("A", "1".to_string())], Some("generated")).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# generated\n"));
        assert!(content.contains("A=1\n"));
    }
}
