use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;
mod output;

fn main() -> Result<()> {
    let parsed = cli::Cli::parse();

    if parsed.verbose || std::env::var_os("DOCKERTREE_VERBOSE").is_some() {
        // A CLI flag beats any pre-set filter.
        std::env::set_var(dockertree_core::logging::LOG_ENV_VAR, "debug");
    }
    dockertree_core::logging::init()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(parsed.dispatch())
}
