use crate::{archive, download::Download, formula::Formula};
use anyhow::{Context, Result};
use log::{debug, info};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// The directory tree the Go toolchain expects when it resolves imports through `GOPATH`.
///
/// The source tree is unpacked at the build path, and `src/<import path>` is a link back to it,
/// so the code can import its own packages by their full path. Resources are unpacked under
/// `src/<resource name>`.
#[derive(Debug)]
pub(crate) struct Layout {
    build_path: PathBuf,
}

impl Layout {
    pub(crate) fn new(build_path: PathBuf) -> Self {
        Layout { build_path }
    }

    pub(crate) fn build_path(&self) -> &Path {
        &self.build_path
    }

    pub(crate) fn src_dir(&self) -> PathBuf {
        self.build_path.join("src")
    }

    pub(crate) fn import_link(&self, formula: &Formula) -> PathBuf {
        self.src_dir().join(&formula.import_path)
    }

    pub(crate) fn stage_source(&self, formula: &Formula, source: &Download) -> Result<()> {
        archive::unpack(&source.path, &self.build_path)?;

        let parent = self.src_dir().join(formula.import_parent()?);
        fs::create_dir_all(&parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;

        let link = self.import_link(formula);
        replace_with_link(&self.build_path, &link)?;
        info!(
            "Linked {} to {}",
            link.display(),
            self.build_path.display()
        );

        Ok(())
    }

    pub(crate) fn stage_resource(&self, name: &str, resource: &Download) -> Result<()> {
        let dest = self.src_dir().join(name);
        debug!("staging resource {name} at {}", dest.display());
        archive::unpack(&resource.path, &dest)
    }
}

// Behaves like `ln -sf`: whatever is at `link` is replaced.
fn replace_with_link(target: &Path, link: &Path) -> Result<()> {
    if let Ok(meta) = fs::symlink_metadata(link) {
        debug!("removing existing {}", link.display());
        if meta.is_dir() {
            fs::remove_dir_all(link)?;
        } else {
            fs::remove_file(link)?;
        }
    }
    symlink_dir(target, link)
        .with_context(|| format!("failed to link {} to {}", link.display(), target.display()))
}

#[cfg(target_family = "unix")]
fn symlink_dir(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).map_err(Into::into)
}

#[cfg(target_family = "windows")]
fn symlink_dir(target: &Path, link: &Path) -> Result<()> {
    std::os::windows::fs::symlink_dir(target, link).map_err(Into::into)
}

#[cfg(not(any(target_family = "unix", target_family = "windows")))]
fn symlink_dir(target: &Path, link: &Path) -> Result<()> {
    Err(anyhow::anyhow!(
        "cannot link {} to {} on this platform",
        link.display(),
        target.display()
    ))
}
