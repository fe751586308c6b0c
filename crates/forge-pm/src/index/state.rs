//! Local install state, kept separate from the parsed catalogs.
//!
//! The filesystem is the source of truth: [`InstallState::rescan_packages`]
//! and [`InstallState::rescan_libraries`] rebuild the table from the on-disk
//! layout (`<root>/<vendor>/hardware/<arch>/<version>`,
//! `<root>/<vendor>/tools/<tool>/<version>`, `<libraries>/<Name>`), and the
//! installer updates it as it promotes or deletes folders.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContributionKind {
    Platform,
    Tool,
    Library,
}

/// Identity of an installable unit: kind plus qualified name plus version.
/// Platforms are named `vendor:architecture`, tools `vendor:tool`, libraries
/// by their index name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ContributionKey {
    pub kind: ContributionKind,
    pub name: String,
    pub version: String,
}

impl ContributionKey {
    pub fn platform(vendor: &str, architecture: &str, version: &str) -> Self {
        Self {
            kind: ContributionKind::Platform,
            name: format!("{}:{}", vendor, architecture),
            version: version.to_string(),
        }
    }

    pub fn tool(vendor: &str, name: &str, version: &str) -> Self {
        Self {
            kind: ContributionKind::Tool,
            name: format!("{}:{}", vendor, name),
            version: version.to_string(),
        }
    }

    pub fn library(name: &str, version: &str) -> Self {
        Self {
            kind: ContributionKind::Library,
            name: name.to_string(),
            version: version.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledEntry {
    pub folder: PathBuf,
    /// Bundled with the application; never removable.
    pub read_only: bool,
}

/// Side table of locally installed contributions.
#[derive(Debug, Default, Clone)]
pub struct InstallState {
    entries: BTreeMap<ContributionKey, InstalledEntry>,
}

impl InstallState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_installed(&self, key: &ContributionKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn installed_folder(&self, key: &ContributionKey) -> Option<&Path> {
        self.entries.get(key).map(|e| e.folder.as_path())
    }

    pub fn is_read_only(&self, key: &ContributionKey) -> bool {
        self.entries.get(key).map(|e| e.read_only).unwrap_or(false)
    }

    pub fn get(&self, key: &ContributionKey) -> Option<&InstalledEntry> {
        self.entries.get(key)
    }

    pub fn record_installed(&mut self, key: ContributionKey, folder: PathBuf, read_only: bool) {
        self.entries.insert(key, InstalledEntry { folder, read_only });
    }

    pub fn clear_installed(&mut self, key: &ContributionKey) {
        self.entries.remove(key);
    }

    /// Installed entries of one kind, e.g. for listings.
    pub fn installed_of(
        &self,
        kind: ContributionKind,
    ) -> impl Iterator<Item = (&ContributionKey, &InstalledEntry)> {
        self.entries.iter().filter(move |(k, _)| k.kind == kind)
    }

    /// Rebuild platform and tool entries from a packages root. Entries under
    /// `bundled_root` (contributions shipped with the application) are
    /// re-added as read-only.
    pub fn rescan_packages(
        &mut self,
        packages_root: &Path,
        bundled_root: Option<&Path>,
    ) -> Result<()> {
        self.entries
            .retain(|k, _| k.kind == ContributionKind::Library);
        self.scan_packages_root(packages_root, false)?;
        if let Some(bundled) = bundled_root {
            self.scan_packages_root(bundled, true)?;
        }
        Ok(())
    }

    fn scan_packages_root(&mut self, root: &Path, read_only: bool) -> Result<()> {
        for vendor in subdirectories(root)? {
            let vendor_name = dir_name(&vendor);

            for arch in subdirectories(&vendor.join("hardware"))? {
                for version in subdirectories(&arch)? {
                    if !dir_is_empty(&version)? {
                        self.record_installed(
                            ContributionKey::platform(
                                &vendor_name,
                                &dir_name(&arch),
                                &dir_name(&version),
                            ),
                            version,
                            read_only,
                        );
                    }
                }
            }

            for tool in subdirectories(&vendor.join("tools"))? {
                for version in subdirectories(&tool)? {
                    if !dir_is_empty(&version)? {
                        self.record_installed(
                            ContributionKey::tool(
                                &vendor_name,
                                &dir_name(&tool),
                                &dir_name(&version),
                            ),
                            version,
                            read_only,
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Rebuild library entries from the libraries root. The installed
    /// version is read from the library's `library.properties`, when
    /// present; folders without one are recorded with an empty version.
    pub fn rescan_libraries(&mut self, libraries_root: &Path) -> Result<()> {
        self.entries
            .retain(|k, _| k.kind != ContributionKind::Library);
        for folder in subdirectories(libraries_root)? {
            let name = dir_name(&folder).replace('_', " ");
            let version = read_library_version(&folder).unwrap_or_default();
            self.record_installed(ContributionKey::library(&name, &version), folder, false);
        }
        Ok(())
    }
}

fn subdirectories(path: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn dir_is_empty(path: &Path) -> Result<bool> {
    Ok(fs::read_dir(path)?.next().is_none())
}

fn read_library_version(folder: &Path) -> Option<String> {
    let properties = fs::read_to_string(folder.join("library.properties")).ok()?;
    properties.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        (key.trim() == "version").then(|| value.trim().to_string())
    })
}
