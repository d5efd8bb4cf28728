/// The `builder` module contains the `PackagerBuilder` and `ReleaseLinkBuilder` structs, which
/// are used to create `Packager` and `ReleaseLinkUpdater` instances.
use crate::{
    formula::Formula,
    github::{GitHub, GitHubTags},
    packager::Packager,
    release_link::ReleaseLinkUpdater,
};
use anyhow::Result;
use log::debug;
use reqwest::{
    header::{HeaderMap, HeaderValue, USER_AGENT},
    Client,
};
use std::{
    env,
    path::{Path, PathBuf},
};

/// The project whose tags the release link points at when none is given.
pub const DEFAULT_PROJECT: &str = "pressly/sup";

/// `PackagerBuilder` is used to create a [`Packager`] instance.
#[derive(Debug, Default)]
#[allow(clippy::module_name_repetitions)]
pub struct PackagerBuilder {
    formula: Option<Formula>,
    prefix: Option<PathBuf>,
    build_dir: Option<PathBuf>,
    keep_build_dir: bool,
    go: Option<PathBuf>,
}

impl PackagerBuilder {
    /// Returns a new empty `PackagerBuilder`.
    #[must_use]
    pub fn new() -> Self {
        PackagerBuilder::default()
    }

    /// Set the formula to package. Defaults to [`Formula::sup`].
    #[must_use]
    pub fn formula(mut self, formula: Formula) -> Self {
        self.formula = Some(formula);
        self
    }

    /// Set the install prefix. The executable ends up in `<prefix>/bin`. If not set, it will
    /// default to `./<name>-<version>`.
    #[must_use]
    pub fn prefix<P: AsRef<Path>>(mut self, prefix: P) -> Self {
        self.prefix = Some(prefix.as_ref().to_path_buf());
        self
    }

    /// Set the directory the source is unpacked and built in. If not set, a temporary directory
    /// is used and removed once packaging is done.
    #[must_use]
    pub fn build_dir<P: AsRef<Path>>(mut self, build_dir: P) -> Self {
        self.build_dir = Some(build_dir.as_ref().to_path_buf());
        self
    }

    /// Keep the temporary build directory around after packaging. This has no effect when
    /// `build_dir` is set, since that directory is never removed.
    #[must_use]
    pub fn keep_build_dir(mut self) -> Self {
        self.keep_build_dir = true;
        self
    }

    /// Set the path of the build tool. If not set, the formula's build dependency is looked up
    /// in `PATH`.
    #[must_use]
    pub fn go<P: AsRef<Path>>(mut self, go: P) -> Self {
        self.go = Some(go.as_ref().to_path_buf());
        self
    }

    /// Builds a new [`Packager`] instance and returns it.
    ///
    /// # Errors
    ///
    /// Returns an error if the formula is invalid, see [`Formula::validate`], or if the HTTP client
    /// cannot be created.
    pub fn build(self) -> Result<Packager> {
        let formula = self.formula.unwrap_or_else(Formula::sup);
        formula.validate()?;

        let prefix = if let Some(prefix) = self.prefix {
            prefix
        } else {
            let mut prefix = env::current_dir()?;
            prefix.push(format!("{}-{}", formula.name, formula.version));
            prefix
        };
        debug!("install prefix = {}", prefix.display());

        Ok(Packager::new(
            formula,
            prefix,
            self.build_dir,
            self.keep_build_dir,
            self.go,
            reqwest_client()?,
        ))
    }
}

/// `ReleaseLinkBuilder` is used to create a [`ReleaseLinkUpdater`] that gets its tags from
/// GitHub.
#[derive(Debug, Default)]
#[allow(clippy::module_name_repetitions)]
pub struct ReleaseLinkBuilder<'a> {
    project: Option<&'a str>,
    api_base_url: Option<&'a str>,
    token: Option<&'a str>,
}

impl<'a> ReleaseLinkBuilder<'a> {
    /// Returns a new empty `ReleaseLinkBuilder`.
    #[must_use]
    pub fn new() -> Self {
        ReleaseLinkBuilder::default()
    }

    /// Set the project whose tags are used, like `pressly/sup`, which is also the default.
    #[must_use]
    pub fn project(mut self, project: &'a str) -> Self {
        self.project = Some(project);
        self
    }

    /// Set the base URL for the GitHub API. This is useful for testing or for GitHub Enterprise.
    /// This should be something like `https://github.my-corp.example.com/api/v3`.
    #[must_use]
    pub fn api_base_url(mut self, api_base_url: &'a str) -> Self {
        self.api_base_url = Some(api_base_url);
        self
    }

    /// Set a token to use for API requests. If this is not set then this will be taken from the
    /// `GITHUB_TOKEN` env var if it is set.
    #[must_use]
    pub fn token(mut self, token: &'a str) -> Self {
        self.token = Some(token);
        self
    }

    /// Builds a new [`ReleaseLinkUpdater`] instance and returns it.
    ///
    /// # Errors
    ///
    /// Returns an error if the project is not in `owner/repo` form, the API base URL does not
    /// parse, or the HTTP client cannot be created.
    pub fn build(self) -> Result<ReleaseLinkUpdater> {
        let github = GitHub::new(
            self.project.unwrap_or(DEFAULT_PROJECT),
            self.api_base_url,
            self.token.map(String::from),
        )?;
        Ok(ReleaseLinkUpdater::new(Box::new(GitHubTags {
            github,
            client: reqwest_client()?,
        })))
    }
}

fn reqwest_client() -> Result<Client> {
    let builder = Client::builder().gzip(true);

    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("sup-dist version {}", super::VERSION))?,
    );
    Ok(builder.default_headers(headers).build()?)
}
