//! Platform and tool installer.

use std::fs;
use std::path::{Path, PathBuf};

use crate::download::{CancelToken, FileDownloader};
use crate::http::HttpConfig;
use crate::index::{
    current_host, ContributedPlatform, ContributedTool, ContributionKey, ContributionsIndex,
    InstallState, ToolDependency, ToolFlavour,
};
use crate::progress::{MultiStepProgress, ProgressObserver};
use crate::signature::{verify_detached, VerifierConfig};
use crate::{ForgeError, Result};

use super::{stage_resource, unpack_to};

/// Installs platform releases and their tool dependencies under
/// `<packages_root>/<vendor>/hardware/<arch>/<version>` and
/// `<packages_root>/<vendor>/tools/<name>/<version>`.
pub struct ContributionInstaller {
    downloader: FileDownloader,
    packages_root: PathBuf,
    staging_dir: PathBuf,
    bundled_root: Option<PathBuf>,
    keyring: Option<PathBuf>,
    verifier: VerifierConfig,
}

impl ContributionInstaller {
    pub fn new(
        http: HttpConfig,
        packages_root: impl Into<PathBuf>,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            downloader: FileDownloader::new(http),
            packages_root: packages_root.into(),
            staging_dir: staging_dir.into(),
            bundled_root: None,
            keyring: None,
            verifier: VerifierConfig::new(),
        }
    }

    /// Contributions bundled with the application, re-listed read-only on
    /// every rescan.
    pub fn with_bundled_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.bundled_root = Some(root.into());
        self
    }

    /// Require every downloaded archive to carry a valid detached
    /// signature (`<url>.asc`) against this keyring.
    pub fn with_keyring(mut self, keyring: impl Into<PathBuf>) -> Self {
        self.keyring = Some(keyring.into());
        self
    }

    pub fn with_verifier(mut self, verifier: VerifierConfig) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn packages_root(&self) -> &Path {
        &self.packages_root
    }

    pub fn platform_install_dir(&self, vendor: &str, architecture: &str, version: &str) -> PathBuf {
        self.packages_root
            .join(vendor)
            .join("hardware")
            .join(architecture)
            .join(version)
    }

    pub fn tool_install_dir(&self, vendor: &str, name: &str, version: &str) -> PathBuf {
        self.packages_root
            .join(vendor)
            .join("tools")
            .join(name)
            .join(version)
    }

    /// Install a platform release with its not-yet-installed tool
    /// dependencies.
    ///
    /// Flavour resolution for every required tool happens before any network
    /// activity, so a platform that cannot run on this host fails fast with
    /// [`ForgeError::MissingTool`]. A tool that fails to extract is logged
    /// and left uninstalled; a platform extraction failure aborts.
    pub fn install(
        &self,
        index: &ContributionsIndex,
        state: &mut InstallState,
        vendor: &str,
        architecture: &str,
        version: &str,
        cancel: &CancelToken,
        observer: Option<&mut dyn ProgressObserver>,
    ) -> Result<()> {
        let platform = index
            .find_platform(vendor, architecture, version)
            .ok_or_else(|| {
                ForgeError::ContributionNotFound(format!("{}:{}@{}", vendor, architecture, version))
            })?;

        let key = ContributionKey::platform(vendor, architecture, version);
        if state.is_installed(&key) {
            log::info!("{}:{}@{} is already installed", vendor, architecture, version);
            return Ok(());
        }

        let pending = self.pending_tools(index, state, platform)?;
        let mut progress = MultiStepProgress::new(2 * (1 + pending.len()), observer);

        progress.step(format!("Downloading {}", platform.name));
        let platform_archive = stage_resource(
            &self.downloader,
            &self.staging_dir,
            &platform.resource,
            cancel,
            &mut progress,
        )?;
        self.signature_gate(&platform_archive, &platform.resource.url, cancel)?;
        progress.finish_step();

        let mut tool_archives = Vec::new();
        for (dep, _tool, flavour) in &pending {
            progress.step(format!("Downloading {}@{}", dep.name, dep.version));
            let archive = stage_resource(
                &self.downloader,
                &self.staging_dir,
                &flavour.resource,
                cancel,
                &mut progress,
            )?;
            self.signature_gate(&archive, &flavour.resource.url, cancel)?;
            tool_archives.push(archive);
            progress.finish_step();
        }

        for ((dep, _tool, _flavour), archive) in pending.iter().zip(&tool_archives) {
            progress.step(format!("Installing {}@{}", dep.name, dep.version));
            let dest = self.tool_install_dir(&dep.packager, &dep.name, &dep.version);
            match unpack_to(archive, &self.packages_root, &dest) {
                Ok(()) => {
                    state.record_installed(
                        ContributionKey::tool(&dep.packager, &dep.name, &dep.version),
                        dest,
                        false,
                    );
                }
                Err(e) => {
                    log::warn!(
                        "tool {}:{}@{} failed to install, continuing: {}",
                        dep.packager,
                        dep.name,
                        dep.version,
                        e
                    );
                }
            }
            progress.finish_step();
        }

        progress.step(format!("Installing {}", platform.name));
        let dest = self.platform_install_dir(vendor, architecture, version);
        unpack_to(&platform_archive, &self.packages_root, &dest)?;
        state.record_installed(key, dest, false);
        progress.finish_step();

        state.rescan_packages(&self.packages_root, self.bundled_root.as_deref())?;
        Ok(())
    }

    /// Remove an installed platform, then garbage-collect tools no other
    /// installed platform still references.
    ///
    /// Removing a bundled (read-only) or not-installed platform is a logged
    /// no-op.
    pub fn remove(
        &self,
        index: &ContributionsIndex,
        state: &mut InstallState,
        vendor: &str,
        architecture: &str,
        version: &str,
    ) -> Result<()> {
        let key = ContributionKey::platform(vendor, architecture, version);
        if state.is_read_only(&key) {
            log::info!(
                "{}:{}@{} is bundled with the application, not removing",
                vendor,
                architecture,
                version
            );
            return Ok(());
        }
        let folder = match state.installed_folder(&key) {
            Some(folder) => folder.to_path_buf(),
            None => {
                log::info!("{}:{}@{} is not installed", vendor, architecture, version);
                return Ok(());
            }
        };

        fs::remove_dir_all(&folder)?;
        state.clear_installed(&key);

        if let Some(platform) = index.find_platform(vendor, architecture, version) {
            for dep in &platform.tool_dependencies {
                self.collect_tool(index, state, dep);
            }
        }

        state.rescan_packages(&self.packages_root, self.bundled_root.as_deref())?;
        Ok(())
    }

    /// Tool dependencies that still need downloading, each resolved to a
    /// flavour for the running host.
    fn pending_tools<'a>(
        &self,
        index: &'a ContributionsIndex,
        state: &InstallState,
        platform: &'a ContributedPlatform,
    ) -> Result<Vec<(&'a ToolDependency, &'a ContributedTool, &'a ToolFlavour)>> {
        let mut pending = Vec::new();
        for (dep, tool) in index.resolve_tools(platform)? {
            let key = ContributionKey::tool(&dep.packager, &dep.name, &dep.version);
            if state.is_installed(&key) {
                continue;
            }
            let flavour = tool
                .flavour_for_current_host()
                .ok_or_else(|| ForgeError::MissingTool {
                    name: dep.name.clone(),
                    version: dep.version.clone(),
                    host: current_host().to_string(),
                })?;
            pending.push((dep, tool, flavour));
        }
        Ok(pending)
    }

    fn signature_gate(&self, archive: &Path, url: &str, cancel: &CancelToken) -> Result<()> {
        let keyring = match &self.keyring {
            Some(keyring) => keyring,
            None => return Ok(()),
        };
        let sig = archive.with_extension(
            archive
                .extension()
                .map(|e| format!("{}.asc", e.to_string_lossy()))
                .unwrap_or_else(|| "asc".to_string()),
        );
        self.downloader
            .download(&format!("{}.asc", url), &sig, cancel, None)?;
        if !verify_detached(archive, &sig, keyring, &self.verifier)? {
            return Err(ForgeError::SignatureInvalid {
                file: archive.display().to_string(),
            });
        }
        Ok(())
    }

    /// Delete a tool version unless another installed platform still
    /// references it. Deletion failures are logged, not propagated.
    fn collect_tool(
        &self,
        index: &ContributionsIndex,
        state: &mut InstallState,
        dep: &ToolDependency,
    ) {
        let key = ContributionKey::tool(&dep.packager, &dep.name, &dep.version);
        if state.is_read_only(&key) || !state.is_installed(&key) {
            return;
        }
        if tool_still_referenced(index, state, dep) {
            log::debug!(
                "tool {}:{}@{} still referenced, keeping",
                dep.packager,
                dep.name,
                dep.version
            );
            return;
        }

        let folder = match state.installed_folder(&key) {
            Some(folder) => folder.to_path_buf(),
            None => return,
        };
        match fs::remove_dir_all(&folder) {
            Ok(()) => {
                state.clear_installed(&key);
                // Remove the tool-name folder when this was its last
                // version; it may hold other versions, so a failure here
                // is expected and ignored.
                if let Some(parent) = folder.parent() {
                    let _ = fs::remove_dir(parent);
                }
            }
            Err(e) => {
                log::warn!(
                    "could not remove tool {}:{}@{}: {}",
                    dep.packager,
                    dep.name,
                    dep.version,
                    e
                );
            }
        }
    }
}

/// True when any installed platform declares a dependency on exactly this
/// tool version.
fn tool_still_referenced(
    index: &ContributionsIndex,
    state: &InstallState,
    dep: &ToolDependency,
) -> bool {
    index.platforms().any(|(pkg, platform)| {
        let key = ContributionKey::platform(&pkg.name, &platform.architecture, &platform.version);
        state.is_installed(&key) && platform.tool_dependencies.contains(dep)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{Algorithm, FileHash};
    use crate::index::{ContributedPackage, DownloadResource};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::fs::File;
    use tempfile::TempDir;

    // Archives land pre-staged with matching size and checksum, so installs
    // run entirely offline through the staged-file skip.
    fn stage_archive(staging: &Path, file_name: &str, root: &str) -> DownloadResource {
        fs::create_dir_all(staging).unwrap();
        let path = staging.join(file_name);
        let encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let body = b"payload";
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{}/marker.txt", root), &body[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        DownloadResource {
            url: format!("http://127.0.0.1:9/{}", file_name),
            archive_file_name: file_name.to_string(),
            checksum: FileHash::compute(Algorithm::Sha256, &path).unwrap().to_string(),
            size: fs::metadata(&path).unwrap().len(),
        }
    }

    fn platform(
        architecture: &str,
        version: &str,
        deps: Vec<ToolDependency>,
        resource: DownloadResource,
    ) -> ContributedPlatform {
        ContributedPlatform {
            name: format!("Acme {} Boards", architecture),
            architecture: architecture.to_string(),
            version: version.to_string(),
            category: "Contributed".to_string(),
            tool_dependencies: deps,
            boards: Vec::new(),
            resource,
        }
    }

    fn gcc_dep() -> ToolDependency {
        ToolDependency {
            packager: "acme".to_string(),
            name: "gcc".to_string(),
            version: "4.8.1".to_string(),
        }
    }

    fn tool(name: &str, version: &str, host: &str, resource: DownloadResource) -> ContributedTool {
        ContributedTool {
            name: name.to_string(),
            version: version.to_string(),
            systems: vec![ToolFlavour {
                host: host.to_string(),
                resource,
            }],
        }
    }

    fn index_with(platforms: Vec<ContributedPlatform>, tools: Vec<ContributedTool>) -> ContributionsIndex {
        ContributionsIndex {
            packages: vec![ContributedPackage {
                name: "acme".to_string(),
                maintainer: "Acme Corp".to_string(),
                website_url: String::new(),
                platforms,
                tools,
            }],
        }
    }

    struct Fixture {
        _dir: TempDir,
        installer: ContributionInstaller,
        index: ContributionsIndex,
        state: InstallState,
    }

    fn fixture_with_deps(deps: Vec<ToolDependency>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join("staging");
        let avr = stage_archive(&staging, "avr-1.6.2.tar.gz", "avr-1.6.2");
        let gcc = stage_archive(&staging, "gcc-4.8.1.tar.gz", "gcc-4.8.1");
        let index = index_with(
            vec![platform("avr", "1.6.2", deps, avr)],
            vec![tool("gcc", "4.8.1", current_host(), gcc)],
        );
        let installer = ContributionInstaller::new(
            HttpConfig::new(),
            dir.path().join("packages"),
            staging,
        );
        Fixture {
            _dir: dir,
            installer,
            index,
            state: InstallState::new(),
        }
    }

    fn fixture() -> Fixture {
        fixture_with_deps(vec![gcc_dep()])
    }

    #[test]
    fn install_places_platform_and_tool() {
        let mut fx = fixture();
        let cancel = CancelToken::new();

        fx.installer
            .install(&fx.index, &mut fx.state, "acme", "avr", "1.6.2", &cancel, None)
            .unwrap();

        let platform_dir = fx.installer.platform_install_dir("acme", "avr", "1.6.2");
        let tool_dir = fx.installer.tool_install_dir("acme", "gcc", "4.8.1");
        assert!(platform_dir.join("marker.txt").is_file());
        assert!(tool_dir.join("marker.txt").is_file());
        assert!(fx.state.is_installed(&ContributionKey::platform("acme", "avr", "1.6.2")));
        assert!(fx.state.is_installed(&ContributionKey::tool("acme", "gcc", "4.8.1")));
    }

    #[test]
    fn install_is_idempotent() {
        let mut fx = fixture();
        let cancel = CancelToken::new();

        for _ in 0..2 {
            fx.installer
                .install(&fx.index, &mut fx.state, "acme", "avr", "1.6.2", &cancel, None)
                .unwrap();
        }
        assert!(fx.state.is_installed(&ContributionKey::platform("acme", "avr", "1.6.2")));
    }

    #[test]
    fn unknown_platform_is_not_found() {
        let mut fx = fixture();
        let err = fx
            .installer
            .install(&fx.index, &mut fx.state, "acme", "riscv", "1.0.0", &CancelToken::new(), None)
            .unwrap_err();
        assert!(matches!(err, ForgeError::ContributionNotFound(_)));
    }

    #[test]
    fn missing_flavour_fails_before_any_filesystem_change() {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join("staging");
        let avr = stage_archive(&staging, "avr-1.6.2.tar.gz", "avr-1.6.2");
        let gcc = stage_archive(&staging, "gcc-4.8.1.tar.gz", "gcc-4.8.1");
        let index = index_with(
            vec![platform("avr", "1.6.2", vec![gcc_dep()], avr)],
            vec![tool("gcc", "4.8.1", "m68k-unknown-elf", gcc)],
        );
        let packages_root = dir.path().join("packages");
        let installer = ContributionInstaller::new(HttpConfig::new(), &packages_root, staging);
        let mut state = InstallState::new();

        let err = installer
            .install(&index, &mut state, "acme", "avr", "1.6.2", &CancelToken::new(), None)
            .unwrap_err();

        assert!(matches!(err, ForgeError::MissingTool { .. }));
        assert!(!packages_root.exists());
    }

    #[test]
    fn corrupted_staged_archive_fails_checksum() {
        let mut fx = fixture();
        let resource = &fx.index.packages[0].platforms[0].resource;
        // Same length, different bytes: the skip path must still catch it.
        let staged = fx._dir.path().join("staging").join(&resource.archive_file_name);
        let garbage = vec![0u8; resource.size as usize];
        fs::write(&staged, garbage).unwrap();

        let err = fx
            .installer
            .install(&fx.index, &mut fx.state, "acme", "avr", "1.6.2", &CancelToken::new(), None)
            .unwrap_err();
        assert!(matches!(err, ForgeError::ChecksumMismatch { .. }));
    }

    #[test]
    fn failed_platform_extraction_keeps_partial_folder_for_inspection() {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join("staging");
        fs::create_dir_all(&staging).unwrap();
        // Checksum matches, but the bytes are not a gzip stream.
        let path = staging.join("avr-1.6.2.tar.gz");
        fs::write(&path, b"not a gzip stream").unwrap();
        let resource = DownloadResource {
            url: "http://127.0.0.1:9/avr-1.6.2.tar.gz".to_string(),
            archive_file_name: "avr-1.6.2.tar.gz".to_string(),
            checksum: FileHash::compute(Algorithm::Sha256, &path).unwrap().to_string(),
            size: fs::metadata(&path).unwrap().len(),
        };
        let index = index_with(vec![platform("avr", "1.6.2", Vec::new(), resource)], Vec::new());
        let packages_root = dir.path().join("packages");
        let installer = ContributionInstaller::new(HttpConfig::new(), &packages_root, staging);
        let mut state = InstallState::new();

        let err = installer
            .install(&index, &mut state, "acme", "avr", "1.6.2", &CancelToken::new(), None)
            .unwrap_err();
        assert!(!matches!(err, ForgeError::ChecksumMismatch { .. }));

        let kept: Vec<_> = fs::read_dir(&packages_root)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".unpack-"))
            .collect();
        assert_eq!(kept.len(), 1);
        assert!(!installer.platform_install_dir("acme", "avr", "1.6.2").exists());
    }

    #[test]
    fn remove_deletes_platform_and_collects_tool() {
        let mut fx = fixture();
        let cancel = CancelToken::new();
        fx.installer
            .install(&fx.index, &mut fx.state, "acme", "avr", "1.6.2", &cancel, None)
            .unwrap();

        fx.installer
            .remove(&fx.index, &mut fx.state, "acme", "avr", "1.6.2")
            .unwrap();

        assert!(!fx.installer.platform_install_dir("acme", "avr", "1.6.2").exists());
        assert!(!fx.installer.tool_install_dir("acme", "gcc", "4.8.1").exists());
        assert!(!fx.state.is_installed(&ContributionKey::platform("acme", "avr", "1.6.2")));
        assert!(!fx.state.is_installed(&ContributionKey::tool("acme", "gcc", "4.8.1")));
    }

    #[test]
    fn remove_keeps_tool_still_referenced_by_another_platform() {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join("staging");
        let avr = stage_archive(&staging, "avr-1.6.2.tar.gz", "avr-1.6.2");
        let sam = stage_archive(&staging, "sam-1.0.0.tar.gz", "sam-1.0.0");
        let gcc = stage_archive(&staging, "gcc-4.8.1.tar.gz", "gcc-4.8.1");
        let index = index_with(
            vec![
                platform("avr", "1.6.2", vec![gcc_dep()], avr),
                platform("sam", "1.0.0", vec![gcc_dep()], sam),
            ],
            vec![tool("gcc", "4.8.1", current_host(), gcc)],
        );
        let installer =
            ContributionInstaller::new(HttpConfig::new(), dir.path().join("packages"), staging);
        let mut state = InstallState::new();
        let cancel = CancelToken::new();

        installer
            .install(&index, &mut state, "acme", "avr", "1.6.2", &cancel, None)
            .unwrap();
        installer
            .install(&index, &mut state, "acme", "sam", "1.0.0", &cancel, None)
            .unwrap();

        installer.remove(&index, &mut state, "acme", "avr", "1.6.2").unwrap();
        assert!(installer.tool_install_dir("acme", "gcc", "4.8.1").exists());
        assert!(state.is_installed(&ContributionKey::tool("acme", "gcc", "4.8.1")));

        installer.remove(&index, &mut state, "acme", "sam", "1.0.0").unwrap();
        assert!(!installer.tool_install_dir("acme", "gcc", "4.8.1").exists());
    }

    #[test]
    fn remove_not_installed_is_noop() {
        let mut fx = fixture();
        fx.installer
            .remove(&fx.index, &mut fx.state, "acme", "avr", "1.6.2")
            .unwrap();
        assert!(!fx.state.is_installed(&ContributionKey::platform("acme", "avr", "1.6.2")));
    }

    #[test]
    fn remove_bundled_platform_is_noop() {
        let dir = TempDir::new().unwrap();
        let bundled = dir.path().join("bundled");
        let marker = bundled.join("acme/hardware/avr/1.0.0/boards.txt");
        fs::create_dir_all(marker.parent().unwrap()).unwrap();
        fs::write(&marker, b"x").unwrap();

        let installer = ContributionInstaller::new(
            HttpConfig::new(),
            dir.path().join("packages"),
            dir.path().join("staging"),
        )
        .with_bundled_root(&bundled);
        let mut state = InstallState::new();
        state
            .rescan_packages(&dir.path().join("packages"), Some(&bundled))
            .unwrap();

        installer
            .remove(&ContributionsIndex::default(), &mut state, "acme", "avr", "1.0.0")
            .unwrap();

        assert!(marker.is_file());
        assert!(state.is_installed(&ContributionKey::platform("acme", "avr", "1.0.0")));
    }

    #[test]
    fn progress_runs_to_completion() {
        let mut fx = fixture();
        let mut seen: Vec<f32> = Vec::new();
        let mut observer = |percent: f32, _status: &str| seen.push(percent);

        fx.installer
            .install(
                &fx.index,
                &mut fx.state,
                "acme",
                "avr",
                "1.6.2",
                &CancelToken::new(),
                Some(&mut observer),
            )
            .unwrap();

        assert_eq!(seen.last().copied(), Some(100.0));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }
}
