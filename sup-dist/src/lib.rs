//! Distribution tooling for [sup](https://github.com/pressly/sup), the super simple deployment
//! tool.
//!
//! This crate does two unrelated jobs that both sit around a sup release:
//!
//! - It keeps the "latest release" link on the project web page current. The
//!   [`ReleaseLinkUpdater`] asks the GitHub API for the project's tags and points the element with
//!   `id="releases"` at the newest one.
//! - It packages sup from a pinned source archive. The [`Packager`] downloads the archive, checks
//!   its SHA-256 digest, stages it into the directory layout `go build` expects, builds a single
//!   executable, and smoke-tests it.
//!
//! Both are created through builders. Here is how the release link is updated:
//!
//! ```ignore
//! use sup_dist::ReleaseLinkBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let page = std::fs::read_to_string("index.html")?;
//!     let updater = ReleaseLinkBuilder::new().project("pressly/sup").build()?;
//!     std::fs::write("index.html", updater.update(&page).await)?;
//!     Ok(())
//! }
//! ```
//!
//! And here is how sup is packaged into `/usr/local/Cellar/sup/0.3.1/bin/sup`:
//!
//! ```ignore
//! use sup_dist::{Formula, PackagerBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let packager = PackagerBuilder::new()
//!         .formula(Formula::sup())
//!         .prefix("/usr/local/Cellar/sup/0.3.1")
//!         .build()?;
//!     packager.package().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## The Release Link
//!
//! The newest tag is simply the first one GitHub returns. GitHub lists tags newest first, but this
//! is a property of their API and it is not checked here. The link's `href` gets `/tags/<tag>`
//! appended and its content becomes `Latest release<strong>0.4</strong>`, where the label is the
//! tag name with a single leading `v` removed.
//!
//! [`ReleaseLinkUpdater::update`] never fails. If the API request fails, returns no tags, or the
//! page has no release link, the page is returned byte for byte as it was given.
//!
//! ## Packaging
//!
//! Packaging is all or nothing. Any of these stops packaging with an error:
//!
//! - `go` is missing;
//! - a checksum does not match;
//! - an archive entry would land outside the build directory;
//! - the build fails;
//! - the built executable exits unsuccessfully, or does not print exactly the expected output.
//!
//! ## Features
//!
//! This crate offers several features to control the TLS dependency used by `reqwest`:
//!
#![doc = document_features::document_features!()]

mod archive;
mod builder;
mod checksum;
mod download;
mod extension;
mod formula;
mod github;
mod layout;
mod packager;
mod release_link;
mod tag;

pub use crate::{
    archive::ArchiveError,
    builder::{PackagerBuilder, ReleaseLinkBuilder, DEFAULT_PROJECT},
    checksum::{validate_sha256, ChecksumError},
    formula::{Formula, Resource, SmokeTest},
    github::TagSource,
    packager::{PackageError, Packager},
    release_link::{link_markup, LinkError, ReleaseLink, ReleaseLinkUpdater, ELEMENT_ID, LINK_TEXT},
    tag::{display_label, latest, Tag},
};

// The version of the `sup-dist` crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(feature = "logging")]
use fern::{
    colors::{Color, ColoredLevelConfig},
    Dispatch,
};

/// This function initializes logging for the application. It's public for the sake of the
/// `sup-dist` binary, but it lives in the library crate so that test code can also enable logging.
///
/// # Errors
///
/// This can return a `log::SetLoggerError` error.
#[cfg(feature = "logging")]
pub fn init_logger(level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
    let line_colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::BrightBlack)
        .debug(Color::BrightBlack)
        .trace(Color::BrightBlack);
    let level_colors = line_colors.info(Color::Green).debug(Color::Black);

    Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{color_line}[{target}][{level}{color_line}] {message}\x1B[0m",
                color_line = format_args!(
                    "\x1B[{}m",
                    line_colors.get_color(&record.level()).to_fg_str()
                ),
                target = record.target(),
                level = level_colors.color(record.level()),
                message = message,
            ));
        })
        .level(level)
        // This is very noisy.
        .level_for("hyper", log::LevelFilter::Error)
        .chain(std::io::stderr())
        .apply()
}
