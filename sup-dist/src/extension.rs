use anyhow::Result;
use log::debug;
use std::path::{Path, PathBuf};
use strum::{EnumIter, IntoEnumIterator};
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum ExtensionError {
    #[error("{} has unknown extension {ext:}", path.display())]
    UnknownExtension { path: PathBuf, ext: String },
    #[error("{} has no extension, so there is no way to tell how to unpack it", path.display())]
    NoExtension { path: PathBuf },
}

// The order matters. Compound extensions must come before anything that is a suffix of them.
#[derive(Clone, Copy, Debug, EnumIter, PartialEq, Eq)]
pub(crate) enum Extension {
    TarBz,
    TarBz2,
    TarGz,
    TarXz,
    Tar,
    Tbz,
    Tgz,
    Txz,
    Zip,
}

/// How the tarball inside an archive is compressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Compression {
    None,
    Bzip2,
    Gzip,
    Xz,
}

impl Extension {
    pub(crate) fn extension(self) -> &'static str {
        match self {
            Extension::TarBz => ".tar.bz",
            Extension::TarBz2 => ".tar.bz2",
            Extension::TarGz => ".tar.gz",
            Extension::TarXz => ".tar.xz",
            Extension::Tar => ".tar",
            Extension::Tbz => ".tbz",
            Extension::Tgz => ".tgz",
            Extension::Txz => ".txz",
            Extension::Zip => ".zip",
        }
    }

    /// Returns `None` for zip files, which are not tarballs at all.
    pub(crate) fn tar_compression(self) -> Option<Compression> {
        match self {
            Extension::Tar => Some(Compression::None),
            Extension::TarBz | Extension::TarBz2 | Extension::Tbz => Some(Compression::Bzip2),
            Extension::TarGz | Extension::Tgz => Some(Compression::Gzip),
            Extension::TarXz | Extension::Txz => Some(Compression::Xz),
            Extension::Zip => None,
        }
    }

    pub(crate) fn from_path(path: &Path) -> Result<Extension, ExtensionError> {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_lowercase()) else {
            return Err(ExtensionError::NoExtension {
                path: path.to_path_buf(),
            });
        };

        if let Some(ext) = Extension::iter().find(|e| name.ends_with(e.extension())) {
            debug!("{name} has a {} extension", ext.extension());
            return Ok(ext);
        }

        match path.extension() {
            Some(ext) => Err(ExtensionError::UnknownExtension {
                path: path.to_path_buf(),
                ext: ext.to_string_lossy().to_string(),
            }),
            None => Err(ExtensionError::NoExtension {
                path: path.to_path_buf(),
            }),
        }
    }
}
