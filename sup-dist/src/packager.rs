use crate::{
    checksum,
    download::{download, Download},
    formula::Formula,
    layout::Layout,
};
use anyhow::{Context, Result};
use itertools::Itertools;
use log::{debug, info};
use reqwest::Client;
use std::{
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
    process::Command,
};
use tempfile::TempDir;
use thiserror::Error;
use url::Url;
use which::which;

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("the build dependency `{0}` could not be found, is it installed and in your PATH?")]
    MissingBuildDependency(String),
    #[error("`{command}` failed with {status}\n{stderr}")]
    BuildFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("the build did not produce an executable at {0}")]
    NoExecutable(PathBuf),
    #[error("smoke test failed: expected output {expected:?}, got {got:?}")]
    SmokeTestFailed { expected: String, got: String },
    #[error("smoke test failed: the executable exited with {status}\n{stderr}")]
    SmokeTestExited { status: String, stderr: String },
}

/// `Packager` builds a [`Formula`] from its pinned source archive and smoke-tests the result.
/// Use the [`PackagerBuilder`](crate::PackagerBuilder) struct to create one.
#[derive(Debug)]
pub struct Packager {
    formula: Formula,
    prefix: PathBuf,
    build_dir: Option<PathBuf>,
    keep_build_dir: bool,
    go: Option<PathBuf>,
    client: Client,
}

impl Packager {
    pub(crate) fn new(
        formula: Formula,
        prefix: PathBuf,
        build_dir: Option<PathBuf>,
        keep_build_dir: bool,
        go: Option<PathBuf>,
        client: Client,
    ) -> Self {
        Packager {
            formula,
            prefix,
            build_dir,
            keep_build_dir,
            go,
            client,
        }
    }

    #[must_use]
    pub fn formula(&self) -> &Formula {
        &self.formula
    }

    /// The directory the executable is installed into.
    #[must_use]
    pub fn bin_dir(&self) -> PathBuf {
        self.prefix.join("bin")
    }

    /// The full path of the executable once packaging is done.
    #[must_use]
    pub fn exe_path(&self) -> PathBuf {
        let mut exe = self.bin_dir().join(self.formula.exe_name());
        if cfg!(windows) {
            exe.set_extension("exe");
        }
        exe
    }

    /// Runs every packaging step in order and returns the path to the installed executable. The
    /// steps are: find the build dependency, download the source and any resources, verify their
    /// checksums, stage them into the build layout, build, and run the smoke test.
    ///
    /// # Errors
    ///
    /// Any failing step stops packaging and its error is returned. There is no retry, and
    /// whatever was written to the prefix before the failure is left as is.
    pub async fn package(&self) -> Result<PathBuf> {
        let go = self.find_build_dependency()?;

        let (_temp_build_dir, build_path) = self.build_path()?;
        let layout = Layout::new(build_path);

        let source = self.fetch_verified(&self.formula.url, &self.formula.sha256).await?;
        layout.stage_source(&self.formula, &source)?;
        for r in &self.formula.resources {
            let resource = self.fetch_verified(&r.url, &r.sha256).await?;
            layout.stage_resource(&r.name, &resource)?;
        }

        let exe = self.build(&go, &layout)?;
        self.smoke_test(&exe)?;
        info!(
            "Packaged {} {} into {}",
            self.formula.name,
            self.formula.version,
            exe.display()
        );

        Ok(exe)
    }

    fn find_build_dependency(&self) -> Result<PathBuf> {
        let dep = &self.formula.build_dependency;
        let found = match &self.go {
            Some(go) if go.is_file() => Some(go.clone()),
            Some(go) => {
                debug!("the given build tool {} is not a file", go.display());
                None
            }
            None => which(dep).ok(),
        };
        let Some(found) = found else {
            return Err(PackageError::MissingBuildDependency(dep.clone()).into());
        };
        debug!("using {} as the build dependency {dep}", found.display());
        Ok(found)
    }

    // The temp dir, if any, is returned so that it lives until packaging is done.
    fn build_path(&self) -> Result<(Option<TempDir>, PathBuf)> {
        if let Some(dir) = &self.build_dir {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create build dir {}", dir.display()))?;
            let dir = dir
                .canonicalize()
                .with_context(|| format!("failed to resolve build dir {}", dir.display()))?;
            return Ok((None, dir));
        }

        let mut td = TempDir::with_prefix(format!(
            "{}-{}-",
            self.formula.name, self.formula.version
        ))
        .context("failed to create temporary build directory")?;
        if self.keep_build_dir {
            info!("Keeping build directory: {}", td.path().display());
            td.disable_cleanup(true);
        }
        let path = td.path().canonicalize()?;
        Ok((Some(td), path))
    }

    async fn fetch_verified(&self, url: &str, sha256: &str) -> Result<Download> {
        let url = Url::parse(url).with_context(|| format!("`{url}` is not a valid URL"))?;
        let dl = download(&self.client, &url).await?;
        checksum::verify(&dl.path, sha256)?;
        Ok(dl)
    }

    fn build(&self, go: &Path, layout: &Layout) -> Result<PathBuf> {
        let bin = self.bin_dir();
        fs::create_dir_all(&bin)
            .with_context(|| format!("failed to create {}", bin.display()))?;
        let bin = bin.canonicalize()?;
        let exe = bin.join(
            self.exe_path()
                .file_name()
                .unwrap_or_else(|| OsStr::new(self.formula.exe_name())),
        );

        let args = [
            OsStr::new("build"),
            OsStr::new("-o"),
            exe.as_os_str(),
            OsStr::new(&self.formula.build_target),
        ];
        let command = format!(
            "{} {}",
            go.display(),
            args.iter().map(|a| a.to_string_lossy()).join(" ")
        );
        info!("Running {command} in {}", layout.build_path().display());

        let output = Command::new(go)
            .args(args)
            .current_dir(layout.build_path())
            .env("GOBIN", &bin)
            .env("GOPATH", layout.build_path())
            // Legacy alias for GOPATH.
            .env("GOHOME", layout.build_path())
            .output()
            .with_context(|| format!("failed to run {command}"))?;
        if !output.status.success() {
            return Err(PackageError::BuildFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }
            .into());
        }

        if !exe.is_file() {
            return Err(PackageError::NoExecutable(exe).into());
        }
        Ok(exe)
    }

    fn smoke_test(&self, exe: &Path) -> Result<()> {
        let test = &self.formula.smoke_test;
        debug!(
            "running smoke test: {} {}",
            exe.display(),
            test.args.iter().join(" ")
        );

        let output = Command::new(exe)
            .args(&test.args)
            .output()
            .with_context(|| format!("failed to run {}", exe.display()))?;
        debug!(
            "smoke test exited with {} and printed {:?}",
            output.status,
            String::from_utf8_lossy(&output.stdout),
        );

        if !output.status.success() {
            return Err(PackageError::SmokeTestExited {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }
            .into());
        }
        if output.stdout != test.expect_output.as_bytes() {
            return Err(PackageError::SmokeTestFailed {
                expected: test.expect_output.clone(),
                got: String::from_utf8_lossy(&output.stdout).into_owned(),
            }
            .into());
        }
        info!("Smoke test passed");
        Ok(())
    }
}

#[cfg(all(test, target_family = "unix"))]
mod tests {
    use super::*;
    use crate::{archive::tests::write_zip, builder::PackagerBuilder, formula::Resource};
    use mockito::{Server, ServerGuard};
    use serial_test::serial;
    use std::{env, os::unix::fs::PermissionsExt};
    use tempfile::tempdir;
    use test_log::test;

    // Stands in for `go build -o <out> <target>`. It checks the layout and env it was given, then
    // writes a shell script to `<out>` that prints the contents of `$OUTPUT` and exits with `$EXIT`.
    const FAKE_GO: &str = r#"#!/bin/sh
set -e
[ "$1" = build ] || { echo "unexpected command $1" >&2; exit 2; }
[ "$2" = -o ] || { echo "missing -o" >&2; exit 2; }
out="$3"
[ "$4" = ./cmd/sup ] || { echo "unexpected target $4" >&2; exit 2; }
[ "$GOPATH" = "$(pwd -P)" ] || { echo "GOPATH is $GOPATH" >&2; exit 2; }
[ "$GOHOME" = "$GOPATH" ] || { echo "GOHOME is $GOHOME" >&2; exit 2; }
[ "$GOBIN" = "$(dirname "$out")" ] || { echo "GOBIN is $GOBIN" >&2; exit 2; }
[ -f "$GOPATH/src/github.com/pressly/sup/cmd/sup/main.go" ] || { echo "layout is missing" >&2; exit 2; }
if [ -n "$FAKE_GO_FAIL" ]; then echo "cmd/sup/main.go:1: syntax error" >&2; exit 1; fi
printf '#!/bin/sh\nprintf "%s" "%s"\nexit %s\n' '%s' "$OUTPUT" "${EXIT:-0}" > "$out"
chmod 755 "$out"
"#;

    struct Fixture {
        td: TempDir,
        server: ServerGuard,
        go: PathBuf,
        archive: Vec<u8>,
        sha256: String,
    }

    impl Fixture {
        async fn new() -> Result<Self> {
            let td = tempdir()?;

            let go = td.path().join("go");
            fs::write(&go, FAKE_GO)?;
            fs::set_permissions(&go, fs::Permissions::from_mode(0o755))?;

            let zip_path = td.path().join("source.zip");
            write_zip(
                &zip_path,
                &[
                    ("sup-4ee5083/sup.go", "package sup\n"),
                    ("sup-4ee5083/cmd/sup/main.go", "package main\n"),
                ],
            )?;
            let archive = fs::read(&zip_path)?;
            let sha256 = checksum::sha256_for(&zip_path)?;

            Ok(Fixture {
                td,
                server: Server::new_async().await,
                go,
                archive,
                sha256,
            })
        }

        fn formula(&self) -> Formula {
            let mut formula = Formula::sup();
            formula.url = format!("{}/pressly/sup/archive/4ee5083.zip", self.server.url());
            formula.sha256 = self.sha256.clone();
            formula
        }

        fn prefix(&self) -> PathBuf {
            self.td.path().join("prefix")
        }

        fn packager(&self, formula: Formula) -> Result<Packager> {
            PackagerBuilder::new()
                .formula(formula)
                .prefix(self.prefix())
                .go(&self.go)
                .build()
        }

        async fn mock_archive(&mut self) -> mockito::Mock {
            self.server
                .mock("GET", "/pressly/sup/archive/4ee5083.zip")
                .with_status(200)
                .with_body(self.archive.clone())
                .create_async()
                .await
        }
    }

    #[test(tokio::test)]
    #[serial]
    async fn package_builds_and_smoke_tests() -> Result<()> {
        let mut f = Fixture::new().await?;
        let m = f.mock_archive().await;

        let packager = f.packager(f.formula())?;
        env::set_var("OUTPUT", "0.3");
        let res = packager.package().await;
        env::remove_var("OUTPUT");
        let exe = res?;

        assert_eq!(exe, f.prefix().canonicalize()?.join("bin/sup"));
        assert!(exe.is_file());
        assert_eq!(fs::read_dir(f.prefix().join("bin"))?.count(), 1);
        m.assert_async().await;

        Ok(())
    }

    #[test(tokio::test)]
    #[serial]
    async fn package_with_resource() -> Result<()> {
        let mut f = Fixture::new().await?;
        let m = f.mock_archive().await;

        let res_zip = f.td.path().join("prefixer.zip");
        write_zip(&res_zip, &[("prefixer-1.0/prefixer.go", "package prefixer\n")])?;
        let rm = f
            .server
            .mock("GET", "/pressly/prefixer/archive/1.0.zip")
            .with_status(200)
            .with_body(fs::read(&res_zip)?)
            .create_async()
            .await;

        let mut formula = f.formula();
        formula.resources.push(Resource {
            name: "github.com/pressly/prefixer".to_string(),
            url: format!("{}/pressly/prefixer/archive/1.0.zip", f.server.url()),
            sha256: checksum::sha256_for(&res_zip)?,
        });

        let build_dir = f.td.path().join("build");
        let packager = PackagerBuilder::new()
            .formula(formula)
            .prefix(f.prefix())
            .build_dir(&build_dir)
            .go(&f.go)
            .build()?;
        env::set_var("OUTPUT", "0.3");
        let res = packager.package().await;
        env::remove_var("OUTPUT");
        res?;

        assert!(build_dir
            .join("src/github.com/pressly/prefixer/prefixer.go")
            .is_file());
        m.assert_async().await;
        rm.assert_async().await;

        Ok(())
    }

    #[test(tokio::test)]
    #[serial]
    async fn package_resource_checksum_mismatch() -> Result<()> {
        let mut f = Fixture::new().await?;
        let m = f.mock_archive().await;

        let res_zip = f.td.path().join("prefixer.zip");
        write_zip(&res_zip, &[("prefixer-1.0/prefixer.go", "package prefixer\n")])?;
        let rm = f
            .server
            .mock("GET", "/pressly/prefixer/archive/1.0.zip")
            .with_status(200)
            .with_body(fs::read(&res_zip)?)
            .create_async()
            .await;

        let mut formula = f.formula();
        formula.resources.push(Resource {
            name: "github.com/pressly/prefixer".to_string(),
            url: format!("{}/pressly/prefixer/archive/1.0.zip", f.server.url()),
            // The digest of the main archive, not of the resource.
            sha256: f.sha256.clone(),
        });

        let packager = f.packager(formula)?;
        env::set_var("OUTPUT", "0.3");
        let res = packager.package().await;
        env::remove_var("OUTPUT");

        let err = res.unwrap_err();
        assert!(
            matches!(
                err.downcast_ref::<checksum::ChecksumError>(),
                Some(checksum::ChecksumError::Mismatch { .. })
            ),
            "{err}"
        );
        // The build never ran, so the bin dir was never even created.
        assert!(!f.prefix().join("bin").exists());
        m.assert_async().await;
        rm.assert_async().await;

        Ok(())
    }

    #[test(tokio::test)]
    #[serial]
    async fn package_smoke_test_exit_status() -> Result<()> {
        let mut f = Fixture::new().await?;
        let _m = f.mock_archive().await;

        let packager = f.packager(f.formula())?;
        env::set_var("OUTPUT", "0.3");
        env::set_var("EXIT", "3");
        let res = packager.package().await;
        env::remove_var("OUTPUT");
        env::remove_var("EXIT");

        let err = res.unwrap_err();
        match err.downcast_ref::<PackageError>() {
            Some(PackageError::SmokeTestExited { status, .. }) => {
                assert!(status.contains('3'), "{status}");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        Ok(())
    }

    #[test(tokio::test)]
    #[serial]
    async fn package_checksum_mismatch() -> Result<()> {
        let mut f = Fixture::new().await?;
        let m = f.mock_archive().await;

        let mut formula = f.formula();
        formula.sha256 = Formula::sup().sha256;
        let err = f.packager(formula)?.package().await.unwrap_err();

        assert!(
            matches!(
                err.downcast_ref::<checksum::ChecksumError>(),
                Some(checksum::ChecksumError::Mismatch { .. })
            ),
            "{err}"
        );
        assert!(!f.prefix().join("bin/sup").exists());
        m.assert_async().await;

        Ok(())
    }

    #[test(tokio::test)]
    #[serial]
    async fn package_build_failure() -> Result<()> {
        let mut f = Fixture::new().await?;
        let _m = f.mock_archive().await;

        let packager = f.packager(f.formula())?;
        env::set_var("FAKE_GO_FAIL", "1");
        let res = packager.package().await;
        env::remove_var("FAKE_GO_FAIL");

        let err = res.unwrap_err();
        match err.downcast_ref::<PackageError>() {
            Some(PackageError::BuildFailed { stderr, .. }) => {
                assert!(stderr.contains("syntax error"), "{stderr}");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        Ok(())
    }

    #[test(tokio::test)]
    #[serial]
    async fn package_smoke_test_mismatch() -> Result<()> {
        let mut f = Fixture::new().await?;
        let _m = f.mock_archive().await;

        // A trailing newline is enough to fail the exact comparison.
        let packager = f.packager(f.formula())?;
        env::set_var("OUTPUT", "0.3\n");
        let res = packager.package().await;
        env::remove_var("OUTPUT");

        let err = res.unwrap_err();
        match err.downcast_ref::<PackageError>() {
            Some(PackageError::SmokeTestFailed { expected, got }) => {
                assert_eq!(expected, "0.3");
                assert_eq!(got, "0.3\n");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        Ok(())
    }

    #[test(tokio::test)]
    #[serial]
    async fn package_missing_build_dependency() -> Result<()> {
        let f = Fixture::new().await?;

        let err = PackagerBuilder::new()
            .formula(f.formula())
            .prefix(f.prefix())
            .go(f.td.path().join("no-such-go"))
            .build()?
            .package()
            .await
            .unwrap_err();
        assert!(
            matches!(
                err.downcast_ref::<PackageError>(),
                Some(PackageError::MissingBuildDependency(dep)) if dep == "go"
            ),
            "{err}"
        );

        Ok(())
    }
}
