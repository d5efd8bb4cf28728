// Unpacks source archives into a build directory. Tarballs and zip files both go through the
// `ArchiveEntry` trait so that the top-level directory stripping works the same way for every
// format.
use crate::extension::{Compression, Extension};
use anyhow::{Context, Result};
use binstall_tar::Archive;
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use log::debug;
use std::{
    ffi::OsString,
    fs::{self, File},
    io::{self, Read},
    path::{Component, Path, PathBuf},
};
use thiserror::Error;
use xz2::read::XzDecoder;
use zip::ZipArchive;

#[cfg(target_family = "unix")]
use std::{fs::Permissions, os::unix::fs::PermissionsExt};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("the archive entry `{0}` would be unpacked outside of the destination directory")]
    UnsafePath(String),
    #[error("the archive at {0} is empty")]
    Empty(PathBuf),
    #[error("the archive entry `{0}` is a hard link, which is not supported")]
    HardLink(String),
}

pub(crate) trait ArchiveEntry {
    fn path(&self) -> Result<PathBuf>;
    fn is_dir(&self) -> bool;
}

impl<R: Read> ArchiveEntry for binstall_tar::Entry<'_, R> {
    fn path(&self) -> Result<PathBuf> {
        Ok(self.path()?.to_path_buf())
    }

    fn is_dir(&self) -> bool {
        self.header().entry_type().is_dir()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct OwnedZipEntry {
    name: String,
    enclosed_name: Option<PathBuf>,
    is_dir: bool,
}

impl ArchiveEntry for OwnedZipEntry {
    fn path(&self) -> Result<PathBuf> {
        self.enclosed_name
            .clone()
            .ok_or_else(|| ArchiveError::UnsafePath(self.name.clone()).into())
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }
}

/// Unpacks the archive at `archive_path` into `dest`. If every entry lives under one top-level
/// directory, that directory is stripped, so `sup-4ee5083/cmd/sup/main.go` ends up at
/// `dest/cmd/sup/main.go`.
pub(crate) fn unpack(archive_path: &Path, dest: &Path) -> Result<()> {
    let ext = Extension::from_path(archive_path)?;
    debug!(
        "unpacking {} into {}",
        archive_path.display(),
        dest.display()
    );
    fs::create_dir_all(dest).with_context(|| format!("failed to create {}", dest.display()))?;
    let dest = dest
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", dest.display()))?;

    match ext.tar_compression() {
        Some(compression) => unpack_tarball(archive_path, compression, &dest),
        None => unpack_zip(archive_path, &dest),
    }
}

fn unpack_tarball(archive_path: &Path, compression: Compression, dest: &Path) -> Result<()> {
    let mut paths = vec![];
    for entry in tar_reader_for(archive_path, compression)?.entries()? {
        let entry = entry?;
        paths.push(checked_path(&entry)?);
    }
    let strip = common_top_level_dir(archive_path, &paths)?;

    // Tarballs can only be read front to back, so we open the file again to do the unpacking.
    let mut arch = tar_reader_for(archive_path, compression)?;
    for entry in arch.entries()? {
        let mut entry = entry?;
        let path = checked_path(&entry)?;
        let Some(target) = target_path(dest, &path, strip.as_ref()) else {
            continue;
        };
        if entry.is_dir() {
            checked_dir(dest, &target)?;
            continue;
        }

        let entry_type = entry.header().entry_type();
        if entry_type.is_hard_link() {
            return Err(ArchiveError::HardLink(path.display().to_string()).into());
        }
        if entry_type.is_symlink() {
            let link = entry.link_name()?.map(|l| l.to_path_buf()).unwrap_or_default();
            let relative = target.strip_prefix(dest).unwrap_or(target.as_path());
            if !link_stays_inside(relative, &link) {
                return Err(ArchiveError::UnsafePath(format!(
                    "{} -> {}",
                    path.display(),
                    link.display()
                ))
                .into());
            }
        }

        checked_parent(dest, &target)?;
        remove_link(&target)?;
        debug!("unpacking tarball entry to {}", target.display());
        entry
            .unpack(&target)
            .with_context(|| format!("failed to unpack {}", target.display()))?;
    }

    Ok(())
}

fn unpack_zip(archive_path: &Path, dest: &Path) -> Result<()> {
    let mut zip = ZipArchive::new(open_file(archive_path)?)?;

    let mut entries = vec![];
    for i in 0..zip.len() {
        let zf = zip.by_index(i)?;
        entries.push(OwnedZipEntry {
            name: zf.name().to_string(),
            enclosed_name: zf.enclosed_name(),
            is_dir: zf.is_dir(),
        });
    }
    let paths = entries
        .iter()
        .map(|e| checked_path(e))
        .collect::<Result<Vec<_>>>()?;
    let strip = common_top_level_dir(archive_path, &paths)?;

    for (i, path) in paths.iter().enumerate() {
        let Some(target) = target_path(dest, path, strip.as_ref()) else {
            continue;
        };
        if entries[i].is_dir() {
            checked_dir(dest, &target)?;
            continue;
        }
        checked_parent(dest, &target)?;
        remove_link(&target)?;
        debug!("unpacking zip entry to {}", target.display());

        let mut zf = zip.by_index(i)?;
        let mut file = File::create(&target)
            .with_context(|| format!("failed to create {}", target.display()))?;
        io::copy(&mut zf, &mut file)
            .with_context(|| format!("failed to write {}", target.display()))?;

        #[cfg(target_family = "unix")]
        if let Some(mode) = zf.unix_mode() {
            fs::set_permissions(&target, Permissions::from_mode(mode & 0o777))?;
        }
    }

    Ok(())
}

// Returns the entry's path with any `.` components removed, or an error if the path is absolute
// or climbs out of the archive with `..`.
fn checked_path(entry: &dyn ArchiveEntry) -> Result<PathBuf> {
    let path = entry.path()?;
    let mut clean = PathBuf::new();
    for c in path.components() {
        match c {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => (),
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiveError::UnsafePath(path.display().to_string()).into());
            }
        }
    }
    Ok(clean)
}

fn common_top_level_dir(archive_path: &Path, paths: &[PathBuf]) -> Result<Option<OsString>> {
    let mut non_empty = paths.iter().filter(|p| p.components().next().is_some());
    let Some(first) = non_empty.next() else {
        return Err(ArchiveError::Empty(archive_path.to_path_buf()).into());
    };
    let top = first.components().next().map(|c| c.as_os_str().to_owned());

    let mut has_nested = first.components().count() > 1;
    for p in non_empty {
        if p.components().next().map(|c| c.as_os_str()) != top.as_deref() {
            debug!("archive entries do not share a top-level directory");
            return Ok(None);
        }
        has_nested |= p.components().count() > 1;
    }

    if !has_nested {
        // A single top-level file is not a directory we can strip.
        return Ok(None);
    }
    debug!(
        "stripping the shared top-level directory {}",
        top.as_deref().unwrap_or_default().to_string_lossy(),
    );
    Ok(top)
}

fn target_path(dest: &Path, path: &Path, strip: Option<&OsString>) -> Option<PathBuf> {
    let relative = match strip {
        Some(top) => path.strip_prefix(top).ok()?,
        None => path,
    };
    if relative.as_os_str().is_empty() {
        return None;
    }
    Some(dest.join(relative))
}

fn checked_parent(dest: &Path, target: &Path) -> Result<()> {
    match target.parent() {
        Some(parent) => checked_dir(dest, parent),
        None => Ok(()),
    }
}

// Creates `dir` after making sure it resolves to somewhere inside `dest`, which must already be
// canonical. A symlink unpacked from an earlier entry can point anywhere, so the entry's path alone
// is not enough.
fn checked_dir(dest: &Path, dir: &Path) -> Result<()> {
    let existing = dir.ancestors().find(|a| a.exists()).unwrap_or(dest);
    let resolved = existing
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", existing.display()))?;
    if !resolved.starts_with(dest) {
        return Err(ArchiveError::UnsafePath(dir.display().to_string()).into());
    }
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))
}

// Writing to an existing symlink would write to wherever it points.
fn remove_link(target: &Path) -> Result<()> {
    if fs::symlink_metadata(target).is_ok_and(|m| m.file_type().is_symlink()) {
        debug!("removing existing link at {}", target.display());
        fs::remove_file(target)?;
    }
    Ok(())
}

// Checks that a symlink at `relative` (relative to the destination) pointing at `link` does not
// climb out of the destination. Links are resolved lexically, so links through other links are
// caught by `checked_parent` when something is written through them.
fn link_stays_inside(relative: &Path, link: &Path) -> bool {
    let mut depth = relative.parent().map_or(0, |p| p.components().count());
    for c in link.components() {
        match c {
            Component::Normal(_) => depth += 1,
            Component::CurDir => (),
            Component::ParentDir => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

fn tar_reader_for(archive_path: &Path, compression: Compression) -> Result<Archive<Box<dyn Read>>> {
    let file = open_file(archive_path)?;
    Ok(match compression {
        Compression::None => Archive::new(Box::new(file)),
        Compression::Bzip2 => Archive::new(Box::new(BzDecoder::new(file))),
        Compression::Gzip => Archive::new(Box::new(GzDecoder::new(file))),
        Compression::Xz => Archive::new(Box::new(XzDecoder::new(file))),
    })
}

fn open_file(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("Failed to open file at {}", path.to_string_lossy()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::{write::GzEncoder, Compression as GzLevel};
    use std::io::Write;
    use tempfile::tempdir;
    use zip::{write::SimpleFileOptions, ZipWriter};

    pub(crate) fn write_zip(path: &Path, files: &[(&str, &str)]) -> Result<()> {
        let mut zip = ZipWriter::new(File::create(path)?);
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .unix_permissions(0o644);
        for (name, contents) in files {
            if name.ends_with('/') {
                zip.add_directory(*name, options)?;
            } else {
                zip.start_file(*name, options)?;
                zip.write_all(contents.as_bytes())?;
            }
        }
        zip.finish()?;
        Ok(())
    }

    enum TarItem<'a> {
        File(&'a str),
        Symlink(&'a str),
    }

    fn write_tar_gz(path: &Path, items: &[(&str, TarItem<'_>)]) -> Result<()> {
        let encoder = GzEncoder::new(File::create(path)?, GzLevel::default());
        let mut builder = binstall_tar::Builder::new(encoder);
        for (name, item) in items {
            let mut header = binstall_tar::Header::new_gnu();
            match item {
                TarItem::File(contents) => {
                    header.set_size(contents.len() as u64);
                    header.set_mode(0o644);
                    header.set_cksum();
                    builder.append_data(&mut header, name, contents.as_bytes())?;
                }
                TarItem::Symlink(link) => {
                    header.set_entry_type(binstall_tar::EntryType::Symlink);
                    header.set_link_name(link)?;
                    header.set_size(0);
                    header.set_mode(0o777);
                    header.set_cksum();
                    builder.append_data(&mut header, name, io::empty())?;
                }
            }
        }
        builder.into_inner()?.finish()?;
        Ok(())
    }

    const SOURCE_FILES: &[(&str, &str)] = &[
        ("sup-4ee5083/", ""),
        ("sup-4ee5083/sup.go", "package sup\n"),
        ("sup-4ee5083/cmd/sup/main.go", "package main\n"),
    ];

    #[test]
    fn unpack_zip_strips_top_level_dir() -> Result<()> {
        let td = tempdir()?;
        let archive = td.path().join("4ee5083.zip");
        write_zip(&archive, SOURCE_FILES)?;

        let dest = td.path().join("build");
        unpack(&archive, &dest)?;

        assert_eq!(fs::read_to_string(dest.join("sup.go"))?, "package sup\n");
        assert_eq!(
            fs::read_to_string(dest.join("cmd/sup/main.go"))?,
            "package main\n"
        );
        assert!(!dest.join("sup-4ee5083").exists());
        Ok(())
    }

    #[test]
    fn unpack_zip_without_common_dir() -> Result<()> {
        let td = tempdir()?;
        let archive = td.path().join("flat.zip");
        write_zip(&archive, &[("a.go", "a"), ("pkg/b.go", "b")])?;

        let dest = td.path().join("build");
        unpack(&archive, &dest)?;

        assert!(dest.join("a.go").is_file());
        assert!(dest.join("pkg/b.go").is_file());
        Ok(())
    }

    #[test]
    fn unpack_tar_gz_strips_top_level_dir() -> Result<()> {
        let td = tempdir()?;
        let archive = td.path().join("sup-0.3.1.tar.gz");
        write_tar_gz(
            &archive,
            &[
                ("sup-0.3.1/sup.go", TarItem::File("package sup\n")),
                ("sup-0.3.1/cmd/sup/main.go", TarItem::File("package main\n")),
            ],
        )?;

        let dest = td.path().join("build");
        unpack(&archive, &dest)?;

        assert_eq!(fs::read_to_string(dest.join("sup.go"))?, "package sup\n");
        assert!(dest.join("cmd/sup/main.go").is_file());
        Ok(())
    }

    #[test]
    fn unpack_rejects_escaping_paths() -> Result<()> {
        let td = tempdir()?;
        let archive = td.path().join("evil.zip");
        write_zip(&archive, &[("../evil.go", "package evil\n")])?;

        let dest = td.path().join("build");
        let err = unpack(&archive, &dest).unwrap_err();
        assert!(err.downcast_ref::<ArchiveError>().is_some(), "{err}");
        assert!(!td.path().join("evil.go").exists());
        Ok(())
    }

    #[cfg(target_family = "unix")]
    #[test]
    fn unpack_keeps_links_inside_dest() -> Result<()> {
        let td = tempdir()?;
        let archive = td.path().join("sup-0.3.1.tar.gz");
        write_tar_gz(
            &archive,
            &[
                ("sup-0.3.1/cmd/sup/main.go", TarItem::File("package main\n")),
                ("sup-0.3.1/main.go", TarItem::Symlink("cmd/sup/main.go")),
            ],
        )?;

        let dest = td.path().join("build");
        unpack(&archive, &dest)?;

        assert!(fs::symlink_metadata(dest.join("main.go"))?
            .file_type()
            .is_symlink());
        assert_eq!(fs::read_to_string(dest.join("main.go"))?, "package main\n");
        Ok(())
    }

    #[cfg(target_family = "unix")]
    #[test]
    fn unpack_rejects_link_out_of_dest() -> Result<()> {
        let td = tempdir()?;
        let archive = td.path().join("evil.tar.gz");
        write_tar_gz(
            &archive,
            &[
                ("top/link", TarItem::Symlink("..")),
                ("top/link/escaped.go", TarItem::File("package evil\n")),
            ],
        )?;

        let dest = td.path().join("build");
        let err = unpack(&archive, &dest).unwrap_err();
        assert!(
            matches!(
                err.downcast_ref::<ArchiveError>(),
                Some(ArchiveError::UnsafePath(_))
            ),
            "{err}"
        );
        assert!(!td.path().join("escaped.go").exists());
        Ok(())
    }

    #[cfg(target_family = "unix")]
    #[test]
    fn unpack_rejects_writes_through_chained_links() -> Result<()> {
        let td = tempdir()?;
        let archive = td.path().join("evil.tar.gz");
        // `here/..` looks like it stays put, but `here` is the destination itself.
        write_tar_gz(
            &archive,
            &[
                ("top/here", TarItem::Symlink(".")),
                ("top/up", TarItem::Symlink("here/..")),
                ("top/up/escaped.go", TarItem::File("package evil\n")),
            ],
        )?;

        let dest = td.path().join("build");
        let err = unpack(&archive, &dest).unwrap_err();
        assert!(err.downcast_ref::<ArchiveError>().is_some(), "{err}");
        assert!(!td.path().join("escaped.go").exists());
        Ok(())
    }

    #[test]
    fn link_stays_inside_cases() {
        assert!(link_stays_inside(Path::new("a/link"), Path::new("../b")));
        assert!(link_stays_inside(Path::new("link"), Path::new("./cmd/sup")));
        assert!(!link_stays_inside(Path::new("link"), Path::new("..")));
        assert!(!link_stays_inside(Path::new("a/link"), Path::new("../../x")));
        assert!(!link_stays_inside(Path::new("link"), Path::new("/etc/passwd")));
    }

    #[test]
    fn unpack_empty_archive() -> Result<()> {
        let td = tempdir()?;
        let archive = td.path().join("empty.zip");
        write_zip(&archive, &[])?;

        assert!(unpack(&archive, &td.path().join("build")).is_err());
        Ok(())
    }

    #[test]
    fn common_top_level_dir_for_single_file() -> Result<()> {
        let paths = vec![PathBuf::from("main.go")];
        assert_eq!(common_top_level_dir(Path::new("x.zip"), &paths)?, None);
        Ok(())
    }
}
