//! Contribution catalogs.
//!
//! The package index lists vendors ("packages"), each carrying platforms and
//! tools; the library index lists libraries. Catalog entries are immutable
//! once parsed; what is installed locally lives in a separate
//! [`state::InstallState`] side table keyed by kind+name+version and merged
//! at query time, so the same entry can appear in several in-memory views
//! without aliasing trouble.

mod library;
mod model;
mod state;
mod updater;

pub use library::{ContributedLibrary, LibrariesIndex};
pub use model::{
    current_host, Board, ContributedPackage, ContributedPlatform, ContributedTool,
    ContributionsIndex, DownloadResource, ToolDependency, ToolFlavour,
};
pub use state::{ContributionKey, ContributionKind, InstallState, InstalledEntry};
pub use updater::IndexUpdater;

/// Default package index location; override with `FORGE_PACKAGE_INDEX_URL`.
pub const DEFAULT_PACKAGE_INDEX_URL: &str =
    "https://contributions.forgehq.dev/package_index.json";
/// Default library index location; override with `FORGE_LIBRARY_INDEX_URL`.
pub const DEFAULT_LIBRARY_INDEX_URL: &str =
    "https://contributions.forgehq.dev/library_index.json";

pub fn package_index_url() -> String {
    std::env::var("FORGE_PACKAGE_INDEX_URL")
        .unwrap_or_else(|_| DEFAULT_PACKAGE_INDEX_URL.to_string())
}

pub fn library_index_url() -> String {
    std::env::var("FORGE_LIBRARY_INDEX_URL")
        .unwrap_or_else(|_| DEFAULT_LIBRARY_INDEX_URL.to_string())
}
