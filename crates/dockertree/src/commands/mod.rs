//! Command implementations
//!
//! Each subcommand resolves the project context, invokes the corresponding
//! engine operation, prints a human summary, and returns the structured
//! payload for `--json` consumers.

pub mod packages;
pub mod proxy;
pub mod push;
pub mod server_import;
pub mod setup;
pub mod volumes;
pub mod worktree;
