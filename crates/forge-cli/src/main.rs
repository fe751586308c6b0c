mod context;
mod core;
mod index;
mod library;
mod progress;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use console::style;

use context::Context;
use forge_pm::ForgeError;

#[derive(Parser, Debug)]
#[command(name = "forge")]
#[command(about = "Contribution manager for platforms, tools, and libraries")]
#[command(version)]
struct Args {
    /// Data directory (indexes, staging area, installed contributions)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// HTTP proxy for all network access
    #[arg(long, global = true, value_name = "URL")]
    proxy: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage the contribution indexes
    Index {
        #[command(subcommand)]
        command: index::IndexCommands,
    },

    /// Manage platform cores and their tools
    Core {
        #[command(subcommand)]
        command: core::CoreCommands,
    },

    /// Manage libraries
    Lib {
        #[command(subcommand)]
        command: library::LibCommands,
    },
}

fn run(args: Args) -> Result<()> {
    let ctx = Context::resolve(args.root, args.proxy)?;

    // First Ctrl-C trips the shared token; running commands observe it
    // between chunks and unwind cleanly.
    let interrupt = ctx.cancel_token();
    ctrlc::set_handler(move || interrupt.cancel())
        .context("cannot register the interrupt handler")?;

    match args.command {
        Commands::Index { command } => index::execute(command, &ctx),
        Commands::Core { command } => core::execute(command, &ctx),
        Commands::Lib { command } => library::execute(command, &ctx),
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if matches!(e.downcast_ref::<ForgeError>(), Some(err) if err.is_cancelled()) {
                eprintln!("{} Interrupted.", style("Warning:").yellow());
            } else {
                eprintln!("{} {:#}", style("Error:").red().bold(), e);
            }
            ExitCode::FAILURE
        }
    }
}
