//! Contribution management core: catalogs of platforms, tools, and
//! libraries, a resumable downloader, archive extraction, checksum and
//! OpenPGP verification, and the install/remove orchestration on top.

pub mod archive;
pub mod download;
pub mod error;
pub mod hash;
pub mod http;
pub mod index;
pub mod installer;
pub mod progress;
pub mod signature;

pub use archive::{ArchiveExtractor, ArchiveFormat};
pub use download::{CancelToken, DownloadObserver, DownloadState, DownloadSummary, FileDownloader};
pub use error::{ForgeError, Result};
pub use hash::{Algorithm, FileHash};
pub use http::HttpConfig;
pub use index::{
    ContributedLibrary, ContributedPackage, ContributedPlatform, ContributedTool,
    ContributionKey, ContributionKind, ContributionsIndex, InstallState, IndexUpdater,
    LibrariesIndex,
};
pub use installer::{ContributionInstaller, LibraryInstaller};
pub use progress::{MultiStepProgress, Progress, ProgressObserver};
pub use signature::{ClearsignOutcome, VerifierConfig};
