//! Package index data model.

use std::path::Path;

use serde::Deserialize;

use forge_semver::RelaxedVersion;

use crate::{ForgeError, Result};

/// Remote identity shared by every downloadable contribution.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResource {
    pub url: String,
    pub archive_file_name: String,
    /// `"ALGO:hexdigest"`, e.g. `SHA-256:ee6796...`.
    pub checksum: String,
    /// Expected size in bytes. Some index generators emit this as a string.
    #[serde(deserialize_with = "de_size")]
    pub size: u64,
}

/// A hardware platform release offered by a package.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributedPlatform {
    pub name: String,
    pub architecture: String,
    pub version: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default, rename = "toolsDependencies")]
    pub tool_dependencies: Vec<ToolDependency>,
    #[serde(default)]
    pub boards: Vec<Board>,
    #[serde(flatten)]
    pub resource: DownloadResource,
}

impl ContributedPlatform {
    pub fn parsed_version(&self) -> Option<RelaxedVersion> {
        forge_semver::parse_lenient(&self.version)
    }
}

/// A board name advertised by a platform, shown in listings.
#[derive(Debug, Clone, Deserialize)]
pub struct Board {
    pub name: String,
}

/// A tool dependency declared by a platform. Advisory metadata: resolved one
/// level deep against the catalog, never transitively.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolDependency {
    pub packager: String,
    pub name: String,
    pub version: String,
}

/// A toolchain release, offered per host platform.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributedTool {
    pub name: String,
    pub version: String,
    pub systems: Vec<ToolFlavour>,
}

impl ContributedTool {
    /// The downloadable flavour matching a host triple, if any.
    pub fn flavour_for_host(&self, host: &str) -> Option<&ToolFlavour> {
        self.systems.iter().find(|f| f.host == host)
    }

    /// The flavour for the machine we are running on.
    pub fn flavour_for_current_host(&self) -> Option<&ToolFlavour> {
        current_host_aliases()
            .iter()
            .find_map(|host| self.flavour_for_host(host))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolFlavour {
    pub host: String,
    #[serde(flatten)]
    pub resource: DownloadResource,
}

/// A vendor entry in the package index.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributedPackage {
    pub name: String,
    #[serde(default)]
    pub maintainer: String,
    #[serde(default, rename = "websiteURL")]
    pub website_url: String,
    #[serde(default)]
    pub platforms: Vec<ContributedPlatform>,
    #[serde(default)]
    pub tools: Vec<ContributedTool>,
}

/// The parsed package index. Unknown JSON fields are ignored throughout.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ContributionsIndex {
    #[serde(default)]
    pub packages: Vec<ContributedPackage>,
}

impl ContributionsIndex {
    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::parse(&json)
    }

    pub fn find_package(&self, name: &str) -> Option<&ContributedPackage> {
        self.packages.iter().find(|p| p.name == name)
    }

    /// Exact platform release.
    pub fn find_platform(
        &self,
        package: &str,
        architecture: &str,
        version: &str,
    ) -> Option<&ContributedPlatform> {
        self.find_package(package)?
            .platforms
            .iter()
            .find(|p| p.architecture == architecture && p.version == version)
    }

    /// Newest release of a platform, by relaxed version ordering. Releases
    /// with unparsable versions are never considered newer.
    pub fn latest_platform(
        &self,
        package: &str,
        architecture: &str,
    ) -> Option<&ContributedPlatform> {
        let mut best: Option<&ContributedPlatform> = None;
        for candidate in self
            .find_package(package)?
            .platforms
            .iter()
            .filter(|p| p.architecture == architecture)
        {
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

    pub fn find_tool(
        &self,
        packager: &str,
        name: &str,
        version: &str,
    ) -> Option<&ContributedTool> {
        self.find_package(packager)?
            .tools
            .iter()
            .find(|t| t.name == name && t.version == version)
    }

    /// Resolve a platform's declared tool dependencies against the catalog.
    pub fn resolve_tools<'a>(
        &'a self,
        platform: &'a ContributedPlatform,
    ) -> Result<Vec<(&'a ToolDependency, &'a ContributedTool)>> {
        let mut resolved = Vec::new();
        for dep in &platform.tool_dependencies {
            let tool = self
                .find_tool(&dep.packager, &dep.name, &dep.version)
                .ok_or_else(|| {
                    ForgeError::ContributionNotFound(format!(
                        "{}:{}@{}",
                        dep.packager, dep.name, dep.version
                    ))
                })?;
            resolved.push((dep, tool));
        }
        Ok(resolved)
    }

    /// Every platform release, with its owning package name.
    pub fn platforms(&self) -> impl Iterator<Item = (&ContributedPackage, &ContributedPlatform)> {
        self.packages
            .iter()
            .flat_map(|pkg| pkg.platforms.iter().map(move |p| (pkg, p)))
    }
}

fn default_category() -> String {
    "Uncategorized".to_string()
}

fn de_size<'de, D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeField {
        Number(u64),
        Text(String),
    }
    match SizeField::deserialize(deserializer)? {
        SizeField::Number(n) => Ok(n),
        SizeField::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Host triples this machine answers to, most specific first. Index entries
/// name hosts with GNU-style triples.
pub fn current_host_aliases() -> &'static [&'static str] {
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("linux", "x86_64") => &["x86_64-pc-linux-gnu", "x86_64-linux-gnu"],
        ("linux", "x86") => &["i686-pc-linux-gnu", "i686-linux-gnu"],
        ("linux", "aarch64") => &["aarch64-linux-gnu", "arm-linux-gnueabihf"],
        ("linux", "arm") => &["arm-linux-gnueabihf"],
        ("macos", "x86_64") => &["x86_64-apple-darwin", "i386-apple-darwin11"],
        ("macos", "aarch64") => &["arm64-apple-darwin", "x86_64-apple-darwin"],
        ("windows", _) => &["i686-mingw32", "x86_64-mingw32"],
        _ => &[],
    }
}

/// Primary host triple of the running machine, for error messages.
pub fn current_host() -> &'static str {
    current_host_aliases().first().copied().unwrap_or("unknown")
}
