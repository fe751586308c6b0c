//! Core commands - install and remove platform cores.

use anyhow::{bail, Result};
use clap::Subcommand;
use console::style;

use forge_pm::{ContributionInstaller, ContributionKey};

use crate::context::Context;
use crate::progress;

#[derive(Subcommand, Debug)]
pub enum CoreCommands {
    /// List platform cores from the package index
    List {
        /// Only show installed cores
        #[arg(long)]
        installed: bool,

        /// Filter by category
        #[arg(long, value_name = "CATEGORY")]
        category: Option<String>,
    },

    /// Install a platform core and its tool dependencies
    Install {
        /// Core to install, as vendor:arch or vendor:arch@version
        #[arg(value_name = "CORE")]
        core: String,
    },

    /// Remove an installed platform core
    Remove {
        /// Core to remove, as vendor:arch or vendor:arch@version
        #[arg(value_name = "CORE")]
        core: String,
    },
}

pub fn execute(command: CoreCommands, ctx: &Context) -> Result<()> {
    match command {
        CoreCommands::List {
            installed,
            category,
        } => list(ctx, installed, category.as_deref()),
        CoreCommands::Install { core } => install(ctx, &core),
        CoreCommands::Remove { core } => remove(ctx, &core),
    }
}

/// Split `vendor:arch` or `vendor:arch@version`.
fn parse_core_spec(spec: &str) -> Result<(&str, &str, Option<&str>)> {
    let (name, version) = match spec.split_once('@') {
        Some((name, version)) => (name, Some(version)),
        None => (spec, None),
    };
    match name.split_once(':') {
        Some((vendor, arch)) if !vendor.is_empty() && !arch.is_empty() => {
            Ok((vendor, arch, version))
        }
        _ => bail!("invalid core {:?}, expected vendor:arch[@version]", spec),
    }
}

fn installer(ctx: &Context) -> ContributionInstaller {
    ContributionInstaller::new(ctx.http(), ctx.packages_root(), ctx.staging_dir())
}

fn list(ctx: &Context, installed_only: bool, category: Option<&str>) -> Result<()> {
    let index = ctx.load_package_index()?;
    let state = ctx.install_state()?;

    for (pkg, platform) in index.platforms() {
        if category.is_some_and(|c| c != platform.category) {
            continue;
        }
        let key = ContributionKey::platform(&pkg.name, &platform.architecture, &platform.version);
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
            "{:<24} {:<10} {} [{}]{}",
            style(format!("{}:{}", pkg.name, platform.architecture)).bold(),
            platform.version,
            platform.name,
            platform.category,
            marker
        );
    }
    Ok(())
}

fn install(ctx: &Context, core: &str) -> Result<()> {
    let (vendor, arch, version) = parse_core_spec(core)?;
    let index = ctx.load_package_index()?;
    let mut state = ctx.install_state()?;

    let version = match version {
        Some(version) => version.to_string(),
        None => match index.latest_platform(vendor, arch) {
            Some(platform) => platform.version.clone(),
            None => bail!("no releases of {}:{} in the index", vendor, arch),
        },
    };

    println!(
        "{} Installing {}...",
        style("Info:").cyan(),
        style(format!("{}:{}@{}", vendor, arch, version)).bold()
    );

    let bar = progress::install_bar();
    let mut observer = progress::observe(&bar);
    let result = installer(ctx).install(
        &index,
        &mut state,
        vendor,
        arch,
        &version,
        &ctx.cancel_token(),
        Some(&mut observer),
    );
    drop(observer);
    bar.finish_and_clear();
    result?;

    println!(
        "{} {}:{}@{} installed.",
        style("Done:").green().bold(),
        vendor,
        arch,
        version
    );
    Ok(())
}

fn remove(ctx: &Context, core: &str) -> Result<()> {
    let (vendor, arch, version) = parse_core_spec(core)?;
    let index = ctx.load_package_index()?;
    let mut state = ctx.install_state()?;

    let version = match version {
        Some(version) => version.to_string(),
        None => {
            // Unversioned removal targets whichever release is installed.
            let prefix = format!("{}:{}", vendor, arch);
            match state
                .installed_of(forge_pm::ContributionKind::Platform)
                .find(|(key, _)| key.name == prefix)
            {
                Some((key, _)) => key.version.clone(),
                None => bail!("{}:{} is not installed", vendor, arch),
            }
        }
    };

    installer(ctx).remove(&index, &mut state, vendor, arch, &version)?;
    println!(
        "{} {}:{}@{} removed.",
        style("Done:").green().bold(),
        vendor,
        arch,
        version
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_core_specs() {
        assert_eq!(parse_core_spec("acme:avr").unwrap(), ("acme", "avr", None));
        assert_eq!(
            parse_core_spec("acme:avr@1.6.2").unwrap(),
            ("acme", "avr", Some("1.6.2"))
        );
        assert!(parse_core_spec("acme").is_err());
        assert!(parse_core_spec(":avr").is_err());
        assert!(parse_core_spec("acme:").is_err());
    }
}
