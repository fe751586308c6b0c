//! Shared command context: data directory layout and HTTP settings.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};

use forge_pm::{CancelToken, ContributionsIndex, HttpConfig, InstallState, LibrariesIndex};

pub struct Context {
    root: PathBuf,
    http: HttpConfig,
    cancel: CancelToken,
}

impl Context {
    /// Resolve the data directory: `--root`, then `FORGE_DATA_DIR`, then
    /// `~/.forge`.
    pub fn resolve(root: Option<PathBuf>, proxy: Option<String>) -> Result<Self> {
        let root = match root {
            Some(root) => root,
            None => match std::env::var_os("FORGE_DATA_DIR") {
                Some(dir) => PathBuf::from(dir),
                None => std::env::var_os("HOME")
                    .map(|home| PathBuf::from(home).join(".forge"))
                    .context("cannot locate a data directory; pass --root")?,
            },
        };

        let mut http = HttpConfig::new();
        if let Some(proxy) = proxy {
            http = http.with_proxy(proxy);
        }

        Ok(Self {
            root,
            http,
            cancel: CancelToken::new(),
        })
    }

    pub fn http(&self) -> HttpConfig {
        self.http.clone()
    }

    /// The interrupt token shared by every command in this invocation.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn packages_root(&self) -> PathBuf {
        self.root.join("packages")
    }

    pub fn libraries_root(&self) -> PathBuf {
        self.root.join("libraries")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    pub fn package_index_path(&self) -> PathBuf {
        self.root.join("package_index.json")
    }

    pub fn library_index_path(&self) -> PathBuf {
        self.root.join("library_index.json")
    }

    pub fn load_package_index(&self) -> Result<ContributionsIndex> {
        ContributionsIndex::load(&self.package_index_path())
            .context("no package index; run `forge index update` first")
    }

    pub fn load_library_index(&self) -> Result<LibrariesIndex> {
        LibrariesIndex::load(&self.library_index_path())
            .context("no library index; run `forge index update` first")
    }

    /// Install state rebuilt from the data directory.
    pub fn install_state(&self) -> Result<InstallState> {
        let mut state = InstallState::new();
        state.rescan_packages(&self.packages_root(), None)?;
        state.rescan_libraries(&self.libraries_root())?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_root_wins() {
        let dir = TempDir::new().unwrap();
        let ctx = Context::resolve(Some(dir.path().to_path_buf()), None).unwrap();
        assert_eq!(ctx.root(), dir.path());
        assert!(ctx.packages_root().starts_with(dir.path()));
    }

    #[test]
    fn cancel_token_clones_share_one_signal() {
        let dir = TempDir::new().unwrap();
        let ctx = Context::resolve(Some(dir.path().to_path_buf()), None).unwrap();
        let handler_side = ctx.cancel_token();
        let command_side = ctx.cancel_token();
        handler_side.cancel();
        assert!(command_side.is_cancelled());
    }

    #[test]
    fn missing_index_is_a_helpful_error() {
        let dir = TempDir::new().unwrap();
        let ctx = Context::resolve(Some(dir.path().to_path_buf()), None).unwrap();
        let err = ctx.load_package_index().unwrap_err();
        assert!(format!("{:#}", err).contains("forge index update"));
    }
}
