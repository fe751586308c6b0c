//! Archive extraction (zip, tar, tar.gz, tar.bz2) with POSIX semantics.
//!
//! Permissions are applied to regular files right after creation, hard and
//! symbolic links are collected during the main pass and replayed in a second
//! pass once every file exists, and directory mtimes are applied last
//! (extracting a child would overwrite them). With `strip_components > 0`
//! the prefix to remove is derived from the first entry and every later
//! entry must live under it.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

use filetime::FileTime;
use flate2::read::GzDecoder;

use crate::{ForgeError, Result};

/// Reserved prefix of OS metadata noise entries (AppleDouble files).
const METADATA_PREFIX: &str = "._";
/// Synthetic entry emitted by `git archive`.
const GIT_ARCHIVE_HEADER: &str = "pax_global_header";

/// Supported archive formats, detected from the filename suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarBz2,
    Zip,
    TarGz,
    Tar,
}

impl ArchiveFormat {
    /// Detect format from the filename suffix, in priority order.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.to_string_lossy().to_lowercase();
        if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
            Some(ArchiveFormat::TarBz2)
        } else if name.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else if name.ends_with(".tar") {
            Some(ArchiveFormat::Tar)
        } else {
            None
        }
    }
}

pub struct ArchiveExtractor;

impl ArchiveExtractor {
    /// Extract `archive` into `dest`, removing `strip_components` leading
    /// path segments from every entry.
    pub fn extract(
        archive: &Path,
        dest: &Path,
        strip_components: usize,
        overwrite: bool,
    ) -> Result<()> {
        let format = ArchiveFormat::from_path(archive)
            .ok_or_else(|| ForgeError::UnsupportedArchive(archive.display().to_string()))?;

        std::fs::create_dir_all(dest)?;
        let mut walk = Walk::new(dest, strip_components, overwrite);

        let file = File::open(archive)?;
        let reader = BufReader::new(file);
        match format {
            ArchiveFormat::Zip => extract_zip(reader, &mut walk)?,
            ArchiveFormat::Tar => extract_tar(reader, &mut walk)?,
            ArchiveFormat::TarGz => extract_tar(GzDecoder::new(reader), &mut walk)?,
            ArchiveFormat::TarBz2 => {
                extract_tar(bzip2::read::BzDecoder::new(reader), &mut walk)?
            }
        }

        walk.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Dir,
    File,
    Symlink,
    HardLink,
}

struct EntryMeta {
    path: PathBuf,
    kind: EntryKind,
    mode: Option<u32>,
    mtime: Option<i64>,
    /// Link target: archive-relative for hard links, verbatim for symlinks.
    link_target: Option<PathBuf>,
}

struct LinkDirective {
    link: PathBuf,
    target: PathBuf,
    hard: bool,
    mode: Option<u32>,
}

/// Shared extraction state for the zip and tar drivers.
struct Walk {
    dest: PathBuf,
    strip_components: usize,
    overwrite: bool,
    /// Root prefix derived from the first entry when stripping.
    prefix: Option<PathBuf>,
    links: Vec<LinkDirective>,
    dir_times: Vec<(PathBuf, i64)>,
}

impl Walk {
    fn new(dest: &Path, strip_components: usize, overwrite: bool) -> Self {
        Self {
            dest: dest.to_path_buf(),
            strip_components,
            overwrite,
            prefix: None,
            links: Vec::new(),
            dir_times: Vec::new(),
        }
    }

    fn is_metadata(path: &Path) -> bool {
        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.starts_with(METADATA_PREFIX) || name == GIT_ARCHIVE_HEADER,
            None => false,
        }
    }

    /// Strip the root prefix from an archive path, deriving the prefix from
    /// the first entry seen. Returns `None` for paths consumed entirely by
    /// the prefix (the root folder entry itself).
    fn strip(&mut self, path: &Path) -> Result<Option<PathBuf>> {
        if self.strip_components == 0 {
            return Ok(Some(path.to_path_buf()));
        }

        let prefix = match &self.prefix {
            Some(p) => p.clone(),
            None => {
                let derived: PathBuf = path
                    .components()
                    .take(self.strip_components)
                    .collect();
                if derived.components().count() < self.strip_components {
                    return Err(ForgeError::Extraction(format!(
                        "entry {:?} has fewer than {} path segments",
                        path.display(),
                        self.strip_components
                    )));
                }
                self.prefix = Some(derived.clone());
                derived
            }
        };

        match path.strip_prefix(&prefix) {
            Ok(rest) if rest.as_os_str().is_empty() => Ok(None),
            Ok(rest) => Ok(Some(rest.to_path_buf())),
            Err(_) => Err(ForgeError::ArchiveRootMismatch {
                entry: path.display().to_string(),
                prefix: prefix.display().to_string(),
            }),
        }
    }

    fn check_safe(&self, relative: &Path) -> Result<()> {
        for component in relative.components() {
            match component {
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(ForgeError::Extraction(format!(
                        "entry {:?} escapes the destination",
                        relative.display()
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn check_collision(&self, out: &Path, entry_is_dir: bool) -> Result<()> {
        if self.overwrite {
            return Ok(());
        }
        let existing = out.symlink_metadata().ok();
        match existing {
            None => Ok(()),
            // A directory entry over an existing directory is idempotent.
            Some(meta) if entry_is_dir && meta.is_dir() => Ok(()),
            Some(_) => Err(ForgeError::ExtractCollision(out.to_path_buf())),
        }
    }

    fn entry(&mut self, meta: EntryMeta, reader: &mut dyn Read) -> Result<()> {
        if Self::is_metadata(&meta.path) {
            log::debug!("skipping metadata entry {:?}", meta.path.display());
            return Ok(());
        }

        let relative = match self.strip(&meta.path)? {
            Some(p) => p,
            None => return Ok(()),
        };
        self.check_safe(&relative)?;
        let out = self.dest.join(&relative);

        match meta.kind {
            EntryKind::Dir => {
                self.check_collision(&out, true)?;
                std::fs::create_dir_all(&out)?;
                if let Some(mtime) = meta.mtime {
                    // Deferred: children extracted later would reset it.
                    self.dir_times.push((out, mtime));
                }
            }
            EntryKind::File => {
                self.check_collision(&out, false)?;
                if let Some(parent) = out.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut file = File::create(&out)?;
                std::io::copy(reader, &mut file)?;
                drop(file);
                apply_mode(&out, meta.mode)?;
                if let Some(mtime) = meta.mtime {
                    filetime::set_file_mtime(&out, FileTime::from_unix_time(mtime, 0))?;
                }
            }
            EntryKind::HardLink | EntryKind::Symlink => {
                let raw_target = meta.link_target.ok_or_else(|| {
                    ForgeError::Extraction(format!(
                        "link entry {:?} has no target",
                        meta.path.display()
                    ))
                })?;
                let hard = meta.kind == EntryKind::HardLink;
                let target = if hard {
                    // Hard link targets are archive paths: strip them too.
                    match self.strip(&raw_target)? {
                        Some(t) => {
                            self.check_safe(&t)?;
                            self.dest.join(t)
                        }
                        None => {
                            return Err(ForgeError::Extraction(format!(
                                "hard link {:?} targets the archive root",
                                meta.path.display()
                            )))
                        }
                    }
                } else {
                    if raw_target.is_absolute() {
                        log::warn!(
                            "symlink {:?} points outside the destination tree: {:?}",
                            relative.display(),
                            raw_target.display()
                        );
                    }
                    raw_target
                };
                self.check_collision(&out, false)?;
                // The target may not exist yet; replay after the main pass.
                self.links.push(LinkDirective {
                    link: out,
                    target,
                    hard,
                    mode: meta.mode,
                });
            }
        }
        Ok(())
    }

    /// Second pass: replay link directives, then directory mtimes.
    fn finish(self) -> Result<()> {
        for directive in &self.links {
            if let Some(parent) = directive.link.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if self.overwrite && directive.link.symlink_metadata().is_ok() {
                std::fs::remove_file(&directive.link)?;
            }
            if directive.hard {
                std::fs::hard_link(&directive.target, &directive.link)?;
                apply_mode(&directive.link, directive.mode)?;
            } else {
                make_symlink(&directive.target, &directive.link)?;
                // Symlink permissions are meaningless on POSIX; no chmod.
            }
        }

        for (dir, mtime) in &self.dir_times {
            filetime::set_file_mtime(dir, FileTime::from_unix_time(*mtime, 0))?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_symlink(target: &Path, link: &Path) -> Result<()> {
    log::warn!(
        "skipping symlink {:?} -> {:?}: unsupported on this platform",
        link.display(),
        target.display()
    );
    Ok(())
}

fn extract_tar<R: Read>(reader: R, walk: &mut Walk) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive
        .entries()
        .map_err(|e| ForgeError::Extraction(format!("failed to read tar: {}", e)))?
    {
        let mut entry =
            entry.map_err(|e| ForgeError::Extraction(format!("bad tar entry: {}", e)))?;
        let path = entry
            .path()
            .map_err(|e| ForgeError::Extraction(format!("bad tar path: {}", e)))?
            .into_owned();

        let entry_type = entry.header().entry_type();
        let kind = if entry_type.is_dir() {
            EntryKind::Dir
        } else if entry_type.is_symlink() {
            EntryKind::Symlink
        } else if entry_type.is_hard_link() {
            EntryKind::HardLink
        } else if entry_type.is_file() {
            EntryKind::File
        } else {
            log::debug!("skipping special tar entry {:?}", path.display());
            continue;
        };

        let link_target = entry
            .link_name()
            .map_err(|e| ForgeError::Extraction(format!("bad link target: {}", e)))?
            .map(|c| c.into_owned());
        let meta = EntryMeta {
            path,
            kind,
            mode: entry.header().mode().ok(),
            mtime: entry.header().mtime().ok().map(|t| t as i64),
            link_target,
        };
        walk.entry(meta, &mut entry)?;
    }
    Ok(())
}

fn extract_zip<R: Read + std::io::Seek>(reader: R, walk: &mut Walk) -> Result<()> {
    let mut archive = zip::ZipArchive::new(reader)
        .map_err(|e| ForgeError::Extraction(format!("failed to open zip: {}", e)))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| ForgeError::Extraction(format!("bad zip entry: {}", e)))?;
        let path = PathBuf::from(file.name());
        let mode = file.unix_mode();
        let mtime = file
            .last_modified()
            .and_then(|dt| dt.to_time().ok())
            .map(|t| t.unix_timestamp());

        // Unix symlinks in zip are files flagged S_IFLNK whose body is the
        // target path.
        let is_symlink = mode.map(|m| m & 0o170000 == 0o120000).unwrap_or(false);
        let meta = if file.is_dir() {
            EntryMeta {
                path,
                kind: EntryKind::Dir,
                mode,
                mtime,
                link_target: None,
            }
        } else if is_symlink {
            let mut target = String::new();
            file.read_to_string(&mut target)
                .map_err(|e| ForgeError::Extraction(format!("bad symlink entry: {}", e)))?;
            EntryMeta {
                path,
                kind: EntryKind::Symlink,
                mode,
                mtime,
                link_target: Some(PathBuf::from(target)),
            }
        } else {
            EntryMeta {
                path,
                kind: EntryKind::File,
                mode,
                mtime,
                link_target: None,
            }
        };
        walk.entry(meta, &mut file)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_test_zip(path: &Path) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default().unix_permissions(0o644);

        writer.add_directory("Test/", options).unwrap();
        for name in ["Test/Test.cpp", "Test/Test.h", "Test/keywords.txt", "Test/readme.txt"] {
            writer.start_file(name, options).unwrap();
            writer.write_all(b"// content\n").unwrap();
        }
        writer.add_directory("Test/examples/", options).unwrap();
        // Noise that must be skipped, not break the single-root invariant.
        writer.start_file("Test/._Test.cpp", options).unwrap();
        writer.write_all(b"apple double").unwrap();
        writer.finish().unwrap();
    }

    fn entries_of(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn format_detection_priority() {
        assert_eq!(
            ArchiveFormat::from_path(Path::new("a.tar.bz2")),
            Some(ArchiveFormat::TarBz2)
        );
        assert_eq!(ArchiveFormat::from_path(Path::new("a.zip")), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_path(Path::new("a.tar.gz")), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_path(Path::new("a.tgz")), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_path(Path::new("a.tar")), Some(ArchiveFormat::Tar));
        assert_eq!(ArchiveFormat::from_path(Path::new("a.rar")), None);
    }

    #[test]
    fn unsupported_suffix_is_an_error() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("weird.rar");
        std::fs::write(&archive, b"not an archive").unwrap();
        let err =
            ArchiveExtractor::extract(&archive, &dir.path().join("out"), 0, false).unwrap_err();
        assert!(matches!(err, ForgeError::UnsupportedArchive(_)));
    }

    #[test]
    fn strip_one_unwraps_single_root_folder() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("Test.zip");
        write_test_zip(&archive);

        let dest = dir.path().join("out");
        ArchiveExtractor::extract(&archive, &dest, 1, false).unwrap();

        assert_eq!(
            entries_of(&dest),
            vec!["Test.cpp", "Test.h", "examples", "keywords.txt", "readme.txt"]
        );
        assert!(dest.join("examples").is_dir());
    }

    #[test]
    fn broken_single_root_shape_fails() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("two-roots.zip");
        let file = File::create(&archive).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        writer.start_file("RootA/file.txt", options).unwrap();
        writer.write_all(b"a").unwrap();
        writer.start_file("RootB/file.txt", options).unwrap();
        writer.write_all(b"b").unwrap();
        writer.finish().unwrap();

        let err =
            ArchiveExtractor::extract(&archive, &dir.path().join("out"), 1, false).unwrap_err();
        assert!(matches!(err, ForgeError::ArchiveRootMismatch { .. }));
    }

    #[test]
    fn collision_with_existing_file_fails_without_overwrite() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("Test.zip");
        write_test_zip(&archive);

        let dest = dir.path().join("out");
        std::fs::create_dir_all(&dest).unwrap();
        // A file where the archive expects the `examples` directory.
        std::fs::write(dest.join("examples"), b"in the way").unwrap();

        let err = ArchiveExtractor::extract(&archive, &dest, 1, false).unwrap_err();
        assert!(matches!(err, ForgeError::ExtractCollision(_)));

        // With overwrite the same extraction replaces regular files.
        std::fs::remove_file(dest.join("examples")).unwrap();
        std::fs::write(dest.join("readme.txt"), b"old").unwrap();
        ArchiveExtractor::extract(&archive, &dest, 1, true).unwrap();
        assert_eq!(std::fs::read(dest.join("readme.txt")).unwrap(), b"// content\n");
    }

    #[test]
    fn tar_links_replayed_after_files() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("links.tar");

        let mut builder = tar::Builder::new(File::create(&archive).unwrap());
        let data = b"#!/bin/sh\necho hi\n";

        // The hard link entry precedes its target in the archive on purpose.
        let mut link_header = tar::Header::new_gnu();
        link_header.set_entry_type(tar::EntryType::Link);
        link_header.set_size(0);
        link_header.set_mode(0o755);
        builder
            .append_link(&mut link_header, "pkg/bin/alias", "pkg/bin/tool")
            .unwrap();

        let mut file_header = tar::Header::new_gnu();
        file_header.set_size(data.len() as u64);
        file_header.set_mode(0o755);
        file_header.set_mtime(1_600_000_000);
        file_header.set_cksum();
        builder
            .append_data(&mut file_header, "pkg/bin/tool", Cursor::new(data.to_vec()))
            .unwrap();

        let mut sym_header = tar::Header::new_gnu();
        sym_header.set_entry_type(tar::EntryType::Symlink);
        sym_header.set_size(0);
        builder
            .append_link(&mut sym_header, "pkg/bin/latest", "tool")
            .unwrap();
        builder.finish().unwrap();

        let dest = dir.path().join("out");
        ArchiveExtractor::extract(&archive, &dest, 1, false).unwrap();

        assert_eq!(std::fs::read(dest.join("bin/tool")).unwrap(), data);
        assert_eq!(std::fs::read(dest.join("bin/alias")).unwrap(), data);
        let link = std::fs::read_link(dest.join("bin/latest")).unwrap();
        assert_eq!(link, PathBuf::from("tool"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dest.join("bin/tool")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn directory_mtimes_applied_last() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("times.tar");

        let mut builder = tar::Builder::new(File::create(&archive).unwrap());
        let mtime = 1_500_000_000u64;

        let mut dir_header = tar::Header::new_gnu();
        dir_header.set_entry_type(tar::EntryType::Directory);
        dir_header.set_size(0);
        dir_header.set_mode(0o755);
        dir_header.set_mtime(mtime);
        dir_header.set_cksum();
        builder
            .append_data(&mut dir_header, "root/sub/", Cursor::new(Vec::new()))
            .unwrap();

        let data = b"payload";
        let mut file_header = tar::Header::new_gnu();
        file_header.set_size(data.len() as u64);
        file_header.set_mode(0o644);
        file_header.set_mtime(mtime + 1000);
        file_header.set_cksum();
        builder
            .append_data(&mut file_header, "root/sub/file.txt", Cursor::new(data.to_vec()))
            .unwrap();
        builder.finish().unwrap();

        let dest = dir.path().join("out");
        ArchiveExtractor::extract(&archive, &dest, 1, false).unwrap();

        let meta = std::fs::metadata(dest.join("sub")).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta).unix_seconds(), mtime as i64);
    }

    #[test]
    fn traversal_entries_rejected() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("evil.tar");

        // tar::Builder refuses to append `..` paths itself, so write the
        // name bytes straight into a GNU header the way a hostile archive
        // would carry them.
        let mut builder = tar::Builder::new(File::create(&archive).unwrap());
        let data = b"evil";
        let mut header = tar::Header::new_gnu();
        let name = b"root/../../escape.txt";
        header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, Cursor::new(data.to_vec())).unwrap();
        builder.finish().unwrap();

        let err =
            ArchiveExtractor::extract(&archive, &dir.path().join("out"), 0, false).unwrap_err();
        assert!(matches!(err, ForgeError::Extraction(_)));
    }

    #[test]
    fn pax_global_header_does_not_poison_prefix() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("ga.tar");

        let mut builder = tar::Builder::new(File::create(&archive).unwrap());
        let mut noise = tar::Header::new_gnu();
        let body = b"52 comment=deadbeef\n";
        noise.set_size(body.len() as u64);
        noise.set_mode(0o644);
        noise.set_cksum();
        builder
            .append_data(&mut noise, "pax_global_header", Cursor::new(body.to_vec()))
            .unwrap();

        let data = b"real";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "pkg-1.0/real.txt", Cursor::new(data.to_vec()))
            .unwrap();
        builder.finish().unwrap();

        let dest = dir.path().join("out");
        ArchiveExtractor::extract(&archive, &dest, 1, false).unwrap();
        assert_eq!(entries_of(&dest), vec!["real.txt"]);
    }
}
