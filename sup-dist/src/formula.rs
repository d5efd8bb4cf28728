use crate::{checksum, github};
use anyhow::{anyhow, Context, Result};
use std::fmt;
use url::Url;

/// An extra source archive that is unpacked into `src/<name>` of the build layout before
/// building. `name` is the import path the compiler resolves it by.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    pub url: String,
    pub sha256: String,
}

/// What to run after the build and the exact output it must print.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmokeTest {
    pub args: Vec<String>,
    pub expect_output: String,
}

/// Everything needed to build one package from a pinned source archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Formula {
    pub name: String,
    pub desc: String,
    pub homepage: String,
    pub url: String,
    pub version: String,
    pub sha256: String,
    /// The tool that must be present to build, but is not needed to run the result.
    pub build_dependency: String,
    /// The import path the source tree is linked at, like `github.com/pressly/sup`.
    pub import_path: String,
    /// The package passed to `go build`, relative to the source tree.
    pub build_target: String,
    pub resources: Vec<Resource>,
    pub smoke_test: SmokeTest,
}

impl Formula {
    /// The pinned formula for `sup` itself.
    #[must_use]
    pub fn sup() -> Self {
        Formula {
            name: "sup".to_string(),
            desc: "Stack Up. Super simple deployment tool - think of it like 'make' for a network of servers.".to_string(),
            homepage: "https://github.com/pressly/sup".to_string(),
            url: "https://github.com/pressly/sup/archive/4ee5083c8321340bc2a6410f24d8a760f7ad3847.zip".to_string(),
            version: "0.3.1".to_string(),
            sha256: "7fa17c20fdcd9e24d8c2fe98081e1300e936da02b3f2cf9c5a11fd699cbc487e".to_string(),
            build_dependency: "go".to_string(),
            import_path: "github.com/pressly/sup".to_string(),
            build_target: "./cmd/sup".to_string(),
            resources: vec![],
            smoke_test: SmokeTest {
                args: vec![],
                expect_output: "0.3".to_string(),
            },
        }
    }

    /// Checks that the formula can be used for packaging without touching the network.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL does not parse, a digest is not 64 hex characters, or the import
    /// path does not end in `<owner>/<repo>`.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(anyhow!("the formula has no name"));
        }
        if self.build_dependency.is_empty() {
            return Err(anyhow!("the formula for {} has no build dependency", self.name));
        }
        Url::parse(&self.url)
            .with_context(|| format!("the formula url `{}` is not a valid URL", self.url))?;
        checksum::validate_sha256(&self.sha256)?;
        self.import_parent()?;

        for r in &self.resources {
            if r.name.is_empty() || r.name.split('/').any(|p| p.is_empty() || p == "..") {
                return Err(anyhow!("`{}` is not a valid resource name", r.name));
            }
            Url::parse(&r.url)
                .with_context(|| format!("the url for resource {} is not valid", r.name))?;
            checksum::validate_sha256(&r.sha256)?;
        }

        Ok(())
    }

    /// The import path without its last segment, like `github.com/pressly`.
    pub(crate) fn import_parent(&self) -> Result<&str> {
        let (parent, repo) = self
            .import_path
            .rsplit_once('/')
            .ok_or_else(|| anyhow!("`{}` is not a valid import path", self.import_path))?;
        // The last two segments are the owner and repo.
        let (_, owner) = parent.rsplit_once('/').unwrap_or(("", parent));
        github::split_project_name(&format!("{owner}/{repo}"))
            .with_context(|| format!("`{}` is not a valid import path", self.import_path))?;
        Ok(parent)
    }

    /// The name of the executable the build produces, which is the last segment of the build
    /// target.
    #[must_use]
    pub fn exe_name(&self) -> &str {
        self.build_target
            .rsplit('/')
            .find(|s| !s.is_empty() && *s != ".")
            .unwrap_or(&self.name)
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.name, self.version)?;
        writeln!(f, "  {}", self.desc)?;
        writeln!(f, "  homepage:   {}", self.homepage)?;
        writeln!(f, "  url:        {}", self.url)?;
        writeln!(f, "  sha256:     {}", self.sha256)?;
        writeln!(f, "  depends on: {} (build)", self.build_dependency)?;
        for r in &self.resources {
            writeln!(f, "  resource:   {} {}", r.name, r.url)?;
        }
        write!(f, "  smoke test: {:?}", self.smoke_test.expect_output)
    }
}
