//! Result rendering for human and JSON consumers
//!
//! Programmatic callers get one JSON document per invocation with the same
//! `{success, data | error}` shape the engine's structured results use;
//! humans get the command's own summary lines.

use dockertree_core::errors::DockertreeError;
use serde_json::json;

/// Render a finished operation and choose the process exit code.
pub fn finish(
    json_mode: bool,
    result: Result<serde_json::Value, DockertreeError>,
) -> anyhow::Result<()> {
    match result {
        Ok(data) => {
            if json_mode {
                println!("{}", json!({ "success": true, "data": data }));
            }
            Ok(())
        }
        Err(err) => {
            if json_mode {
                println!(
                    "{}",
                    json!({
                        "success": false,
                        "error": { "kind": err.kind(), "message": err.to_string() },
                    })
                );
                // The JSON document carries the failure; still exit non-zero.
                std::process::exit(1);
            }
            Err(anyhow::anyhow!("{} ({})", err, err.kind()))
        }
    }
}
