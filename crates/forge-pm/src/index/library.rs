//! Library index data model.

use std::path::Path;

use serde::Deserialize;

use forge_semver::RelaxedVersion;

use crate::index::DownloadResource;
use crate::Result;

/// A library release in the library index.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributedLibrary {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub maintainer: String,
    /// One-line description.
    #[serde(default)]
    pub sentence: String,
    #[serde(default)]
    pub paragraph: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub architectures: Vec<String>,
    #[serde(flatten)]
    pub resource: DownloadResource,
}

impl ContributedLibrary {
    pub fn parsed_version(&self) -> Option<RelaxedVersion> {
        forge_semver::parse_lenient(&self.version)
    }

    /// Folder name used on disk: the library name with spaces replaced.
    pub fn install_dir_name(&self) -> String {
        self.name.replace(' ', "_")
    }
}

/// The parsed library index.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LibrariesIndex {
    #[serde(default)]
    pub libraries: Vec<ContributedLibrary>,
}

impl LibrariesIndex {
    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::parse(&json)
    }

    pub fn find(&self, name: &str, version: &str) -> Option<&ContributedLibrary> {
        self.libraries
            .iter()
            .find(|l| l.name == name && l.version == version)
    }

    /// Newest release of a library. Unparsable versions are never "newer".
    pub fn latest(&self, name: &str) -> Option<&ContributedLibrary> {
        let mut best: Option<&ContributedLibrary> = None;
        for candidate in self.libraries.iter().filter(|l| l.name == name) {
            let newer = match best {
                None => true,
                Some(current) => forge_semver::greater_than(
                    candidate.parsed_version().as_ref(),
                    current.parsed_version().as_ref(),
                ),
            };
            if newer {
                best = Some(candidate);
            }
        }
        best
    }

    /// All releases sharing the given library name.
    pub fn releases_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ContributedLibrary> {
        self.libraries.iter().filter(move |l| l.name == name)
    }

    pub fn by_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a ContributedLibrary> {
        self.libraries.iter().filter(move |l| l.category == category)
    }

    pub fn by_type<'a>(&'a self, ty: &'a str) -> impl Iterator<Item = &'a ContributedLibrary> {
        self.libraries
            .iter()
            .filter(move |l| l.types.iter().any(|t| t == ty))
    }
}

fn default_category() -> String {
    "Uncategorized".to_string()
}
