//! Lib commands - install and remove libraries.

use anyhow::Result;
use clap::Subcommand;
use console::style;

use forge_pm::{ContributionKey, ContributionKind, LibraryInstaller};

use crate::context::Context;
use crate::progress;

#[derive(Subcommand, Debug)]
pub enum LibCommands {
    /// List libraries from the library index
    List {
        /// Only show installed libraries
        #[arg(long)]
        installed: bool,

        /// Filter by category
        #[arg(long, value_name = "CATEGORY")]
        category: Option<String>,

        /// Filter by type (e.g. Contributed)
        #[arg(long = "type", value_name = "TYPE")]
        lib_type: Option<String>,
    },

    /// Install a library
    Install {
        /// Library to install, as name or name@version
        #[arg(value_name = "LIBRARY")]
        library: String,
    },

    /// Remove an installed library
    Remove {
        /// Library name
        #[arg(value_name = "LIBRARY")]
        library: String,
    },
}

pub fn execute(command: LibCommands, ctx: &Context) -> Result<()> {
    match command {
        LibCommands::List {
            installed,
            category,
            lib_type,
        } => list(ctx, installed, category.as_deref(), lib_type.as_deref()),
        LibCommands::Install { library } => install(ctx, &library),
        LibCommands::Remove { library } => remove(ctx, &library),
    }
}

fn installer(ctx: &Context) -> LibraryInstaller {
    LibraryInstaller::new(ctx.http(), ctx.libraries_root(), ctx.staging_dir())
}

fn list(
    ctx: &Context,
    installed_only: bool,
    category: Option<&str>,
    lib_type: Option<&str>,
) -> Result<()> {
    let index = ctx.load_library_index()?;
    let state = ctx.install_state()?;

    for library in &index.libraries {
        if category.is_some_and(|c| c != library.category) {
            continue;
        }
        if lib_type.is_some_and(|t| !library.types.iter().any(|ty| ty == t)) {
            continue;
        }
        let key = ContributionKey::library(&library.name, &library.version);
        let installed = state.is_installed(&key);
        if installed_only && !installed {
            continue;
        }

        let marker = if installed {
            format!(" {}", style("(installed)").green())
        } else {
            String::new()
        };
        println!(
            "{:<28} {:<10} {}{}",
            style(&library.name).bold(),
            library.version,
            library.sentence,
            marker
        );
    }
    Ok(())
}

fn install(ctx: &Context, library: &str) -> Result<()> {
    let (name, version) = match library.split_once('@') {
        Some((name, version)) => (name, Some(version)),
        None => (library, None),
    };
    let index = ctx.load_library_index()?;
    let mut state = ctx.install_state()?;

    println!("{} Installing {}...", style("Info:").cyan(), style(name).bold());

    let bar = progress::install_bar();
    let mut observer = progress::observe(&bar);
    let result = installer(ctx).install(
        &index,
        &mut state,
        name,
        version,
        &ctx.cancel_token(),
        Some(&mut observer),
    );
    drop(observer);
    bar.finish_and_clear();
    result?;

    println!("{} {} installed.", style("Done:").green().bold(), name);
    Ok(())
}

fn remove(ctx: &Context, library: &str) -> Result<()> {
    let mut state = ctx.install_state()?;
    if !state
        .installed_of(ContributionKind::Library)
        .any(|(key, _)| key.name == library)
    {
        println!("{} {} is not installed.", style("Info:").cyan(), library);
        return Ok(());
    }

    installer(ctx).remove(&mut state, library)?;
    println!("{} {} removed.", style("Done:").green().bold(), library);
    Ok(())
}
