//! Index commands - refresh the package and library catalogs.

use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;
use console::style;

use forge_pm::index::{library_index_url, package_index_url};
use forge_pm::IndexUpdater;

use crate::context::Context;

#[derive(Subcommand, Debug)]
pub enum IndexCommands {
    /// Download the latest package and library indexes
    Update {
        /// Keyring of trusted index-signing keys; when given, the detached
        /// index signature must verify
        #[arg(long, value_name = "FILE")]
        keyring: Option<PathBuf>,
    },
}

pub fn execute(command: IndexCommands, ctx: &Context) -> Result<()> {
    match command {
        IndexCommands::Update { keyring } => update(ctx, keyring),
    }
}

fn update(ctx: &Context, keyring: Option<PathBuf>) -> Result<()> {
    let mut updater = IndexUpdater::new(ctx.http(), ctx.root());
    if let Some(keyring) = keyring {
        updater = updater.with_keyring(keyring);
    }
    let cancel = ctx.cancel_token();

    println!("{} Updating package index...", style("Info:").cyan());
    let packages = updater.update_package_index(&package_index_url(), &cancel)?;

    println!("{} Updating library index...", style("Info:").cyan());
    let libraries = updater.update_library_index(&library_index_url(), &cancel)?;

    println!(
        "{} {} packages, {} libraries indexed.",
        style("Done:").green().bold(),
        packages.packages.len(),
        libraries.libraries.len()
    );
    Ok(())
}
