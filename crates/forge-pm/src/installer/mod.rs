//! Contribution installation system.
//!
//! Handles installation and removal of platforms, tools, and libraries
//! under the data directory, driving the downloader, checksum gate, and
//! extractor in sequence.

mod contribution;
mod library;

pub use contribution::ContributionInstaller;
pub use library::LibraryInstaller;

use std::fs;
use std::path::{Path, PathBuf};

use crate::download::{CancelToken, DownloadObserver, FileDownloader};
use crate::hash::FileHash;
use crate::index::DownloadResource;
use crate::progress::MultiStepProgress;
use crate::Result;

/// Forwards transfer progress into the current multi-step slot.
struct StepBridge<'a, 'b> {
    progress: &'a mut MultiStepProgress<'b>,
}

impl DownloadObserver for StepBridge<'_, '_> {
    fn on_progress(&mut self, _downloaded: u64, _total: Option<u64>, percent: f32) {
        self.progress.update(percent);
    }
}

/// Download `resource` into the staging folder, keyed by archive file name,
/// and gate it on its declared checksum.
///
/// A staged file at least as large as the declared size skips the network;
/// the checksum still decides whether the bytes are usable.
fn stage_resource(
    downloader: &FileDownloader,
    staging_dir: &Path,
    resource: &DownloadResource,
    cancel: &CancelToken,
    progress: &mut MultiStepProgress<'_>,
) -> Result<PathBuf> {
    fs::create_dir_all(staging_dir)?;
    let staged = staging_dir.join(&resource.archive_file_name);

    let already_staged = resource.size > 0
        && fs::metadata(&staged)
            .map(|m| m.len() >= resource.size)
            .unwrap_or(false);
    if already_staged {
        log::debug!("{} already staged, skipping download", resource.archive_file_name);
    } else {
        let mut bridge = StepBridge { progress };
        downloader.download(&resource.url, &staged, cancel, Some(&mut bridge))?;
    }

    FileHash::verify(&staged, &resource.checksum)?;
    Ok(staged)
}

/// Extract a staged archive into a fresh temp dir next to `dest`, then
/// promote it with a rename. The archive's single root folder is stripped.
///
/// On extraction failure the partially unpacked folder is left in place so
/// it can be inspected.
fn unpack_to(staged: &Path, root: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(root)?;
    let unpacked = tempfile::Builder::new()
        .prefix(".unpack-")
        .tempdir_in(root)?
        .into_path();
    if let Err(e) = crate::archive::ArchiveExtractor::extract(staged, &unpacked, 1, false) {
        log::warn!(
            "extraction of {} failed, partial output kept at {}",
            staged.display(),
            unpacked.display()
        );
        return Err(e);
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    if let Err(e) = fs::rename(&unpacked, dest) {
        let _ = fs::remove_dir_all(&unpacked);
        return Err(e.into());
    }
    Ok(())
}
