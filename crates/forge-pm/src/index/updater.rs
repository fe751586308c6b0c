//! Fetches catalog files and keeps the on-disk copies current.

use std::fs;
use std::path::{Path, PathBuf};

use url::Url;

use crate::download::{CancelToken, FileDownloader};
use crate::http::HttpConfig;
use crate::signature::{verify_detached, VerifierConfig};
use crate::{ForgeError, Result};

use super::library::LibrariesIndex;
use super::model::ContributionsIndex;

/// Downloads an index file (and its detached signature, when a keyring is
/// configured), verifies it, and installs it into the data directory.
///
/// The download lands in a `.tmp` sibling and only replaces the previous
/// index after verification, so a failed update never clobbers a good copy.
pub struct IndexUpdater {
    http: HttpConfig,
    data_dir: PathBuf,
    keyring: Option<PathBuf>,
    verifier: VerifierConfig,
}

impl IndexUpdater {
    pub fn new(http: HttpConfig, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            http,
            data_dir: data_dir.into(),
            keyring: None,
            verifier: VerifierConfig::new(),
        }
    }

    /// Require a valid detached signature (`<url>.sig`) against this keyring.
    pub fn with_keyring(mut self, keyring: impl Into<PathBuf>) -> Self {
        self.keyring = Some(keyring.into());
        self
    }

    pub fn with_verifier(mut self, verifier: VerifierConfig) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn update_package_index(&self, url: &str, cancel: &CancelToken) -> Result<ContributionsIndex> {
        let path = self.fetch(url, cancel)?;
        ContributionsIndex::load(&path)
    }

    pub fn update_library_index(&self, url: &str, cancel: &CancelToken) -> Result<LibrariesIndex> {
        let path = self.fetch(url, cancel)?;
        LibrariesIndex::load(&path)
    }

    /// Download `url` into the data directory and return the installed path.
    fn fetch(&self, url: &str, cancel: &CancelToken) -> Result<PathBuf> {
        fs::create_dir_all(&self.data_dir)?;
        let file_name = index_file_name(url)?;
        let target = self.data_dir.join(&file_name);
        let staged = self.data_dir.join(format!("{}.tmp", file_name));
        // A leftover partial from an interrupted run would be resumed and
        // corrupt the fresh copy.
        remove_if_present(&staged)?;

        let downloader = FileDownloader::new(self.http.clone());
        downloader.download(url, &staged, cancel, None)?;

        if let Some(keyring) = &self.keyring {
            let sig = self.data_dir.join(format!("{}.sig", file_name));
            remove_if_present(&sig)?;
            downloader.download(&format!("{}.sig", url), &sig, cancel, None)?;
            if !verify_detached(&staged, &sig, keyring, &self.verifier)? {
                remove_if_present(&staged)?;
                return Err(ForgeError::SignatureInvalid { file: file_name });
            }
        }

        fs::rename(&staged, &target)?;
        Ok(target)
    }
}

fn index_file_name(url: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|_| ForgeError::HttpStatus {
        status: 0,
        url: url.to_string(),
    })?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or(ForgeError::HttpStatus {
            status: 0,
            url: url.to_string(),
        })
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
