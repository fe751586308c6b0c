//! Library installer.

use std::fs;
use std::path::{Path, PathBuf};

use crate::download::{CancelToken, FileDownloader};
use crate::http::HttpConfig;
use crate::index::{ContributedLibrary, ContributionKey, ContributionKind, InstallState, LibrariesIndex};
use crate::progress::{MultiStepProgress, ProgressObserver};
use crate::{ForgeError, Result};

use super::{stage_resource, unpack_to};

/// Installs libraries as single folders under the libraries root, named
/// after the library with spaces replaced by underscores.
pub struct LibraryInstaller {
    downloader: FileDownloader,
    libraries_root: PathBuf,
    staging_dir: PathBuf,
}

impl LibraryInstaller {
    pub fn new(
        http: HttpConfig,
        libraries_root: impl Into<PathBuf>,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            downloader: FileDownloader::new(http),
            libraries_root: libraries_root.into(),
            staging_dir: staging_dir.into(),
        }
    }

    pub fn libraries_root(&self) -> &Path {
        &self.libraries_root
    }

    pub fn install_dir(&self, library: &ContributedLibrary) -> PathBuf {
        self.libraries_root.join(library.install_dir_name())
    }

    /// Install a library release; `version` of `None` means the newest.
    ///
    /// Only one version of a library can be installed at a time, so any
    /// previously installed version is removed first.
    pub fn install(
        &self,
        index: &LibrariesIndex,
        state: &mut InstallState,
        name: &str,
        version: Option<&str>,
        cancel: &CancelToken,
        observer: Option<&mut dyn ProgressObserver>,
    ) -> Result<()> {
        let library = match version {
            Some(version) => index.find(name, version),
            None => index.latest(name),
        }
        .ok_or_else(|| {
            ForgeError::ContributionNotFound(match version {
                Some(version) => format!("{}@{}", name, version),
                None => name.to_string(),
            })
        })?;

        let key = ContributionKey::library(&library.name, &library.version);
        if state.is_installed(&key) {
            log::info!("{}@{} is already installed", library.name, library.version);
            return Ok(());
        }

        let mut progress = MultiStepProgress::new(2, observer);

        progress.step(format!("Downloading {}@{}", library.name, library.version));
        let archive = stage_resource(
            &self.downloader,
            &self.staging_dir,
            &library.resource,
            cancel,
            &mut progress,
        )?;
        progress.finish_step();

        progress.step(format!("Installing {}@{}", library.name, library.version));
        self.remove_previous_version(state, &library.name)?;
        unpack_to(&archive, &self.libraries_root, &self.install_dir(library))?;
        progress.finish_step();

        state.rescan_libraries(&self.libraries_root)?;
        Ok(())
    }

    /// Remove an installed library by name. Not-installed is a logged no-op.
    pub fn remove(&self, state: &mut InstallState, name: &str) -> Result<()> {
        let folder = state
            .installed_of(ContributionKind::Library)
            .find(|(key, _)| key.name == name)
            .map(|(_, entry)| entry.folder.clone());
        match folder {
            Some(folder) => fs::remove_dir_all(folder)?,
            None => {
                log::info!("library {} is not installed", name);
                return Ok(());
            }
        }
        state.rescan_libraries(&self.libraries_root)?;
        Ok(())
    }

    fn remove_previous_version(&self, state: &mut InstallState, name: &str) -> Result<()> {
        let previous: Vec<_> = state
            .installed_of(ContributionKind::Library)
            .filter(|(key, _)| key.name == name)
            .map(|(key, entry)| (key.clone(), entry.folder.clone()))
            .collect();
        for (key, folder) in previous {
            log::info!("replacing installed {}@{}", key.name, key.version);
            fs::remove_dir_all(folder)?;
            state.clear_installed(&key);
        }
        Ok(())
    }
}
