//! Core library for the dockertree CLI
//!
//! Isolated, per-branch Docker environments for a project: compose
//! transformation, worktree orchestration, volume lifecycle, package
//! export/import, and shared-proxy management. The CLI crate is a thin
//! driver over the managers defined here.

pub mod checksum;
pub mod compose;
pub mod config;
pub mod environment;
pub mod env_file;
pub mod errors;
pub mod git;
pub mod logging;
pub mod orchestrator;
pub mod package;
pub mod ports;
pub mod proxy;
pub mod runtime;
pub mod server_import;
pub mod setup;
pub mod transform;
pub mod volumes;
pub mod workspace;

// Re-export IndexMap for dependent crates (ordered maps are part of the API).
pub use indexmap::IndexMap;

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
