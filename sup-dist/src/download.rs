use anyhow::{anyhow, Context, Result};
use log::debug;
use reqwest::{
    header::{HeaderValue, ACCEPT},
    Client, StatusCode,
};
use std::{fs::File, io::Write, path::PathBuf};
use tempfile::{tempdir, TempDir};
use url::Url;

#[derive(Debug)]
pub(crate) struct Download {
    // We need to keep the temp dir around so that it's not deleted before
    // we're done with it.
    pub(crate) _temp_dir: TempDir,
    pub(crate) path: PathBuf,
}

/// Downloads `url` into a new temp dir. The file keeps the last path segment of the URL as its
/// name, since that is how the archive format is determined later.
pub(crate) async fn download(client: &Client, url: &Url) -> Result<Download> {
    debug!("downloading {url}");

    let name = url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| anyhow!("cannot determine a file name from the URL {url}"))?;

    let req = client
        .get(url.clone())
        .header(
            ACCEPT,
            HeaderValue::from_str("application/octet-stream")
                .context("failed to create header value for Accept header")?,
        )
        .build()
        .with_context(|| format!("failed to build HTTP request for {url}"))?;

    let mut resp = client
        .execute(req)
        .await
        .with_context(|| format!("failed to execute HTTP request to download {url}"))?;
    if resp.status() != StatusCode::OK {
        let mut msg = format!("error requesting {url}: {}", resp.status());
        if let Ok(t) = resp.text().await {
            msg.push('\n');
            msg.push_str(&t);
        }
        return Err(anyhow!(msg));
    }

    let td = tempdir().context("failed to create temporary directory for download")?;
    let path = td.path().join(name);
    debug!("download path is {}", path.display());

    {
        let mut downloaded_file = File::create(&path).with_context(|| {
            format!("failed to create file at {} for download", path.display())
        })?;
        while let Some(c) = resp
            .chunk()
            .await
            .with_context(|| format!("failed to read chunk while downloading {url}"))?
        {
            downloaded_file
                .write_all(c.as_ref())
                .with_context(|| format!("failed to write chunk to {}", path.display()))?;
        }
    }

    Ok(Download {
        _temp_dir: td,
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use test_log::test;

    #[test(tokio::test)]
    async fn download_writes_body() -> Result<()> {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/pressly/sup/archive/4ee5083.zip")
            .match_header("Accept", "application/octet-stream")
            .with_status(200)
            .with_body("zip bytes")
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/pressly/sup/archive/4ee5083.zip", server.url()))?;
        let download = download(&Client::new(), &url).await?;

        assert_eq!(download.path.file_name().unwrap(), "4ee5083.zip");
        assert_eq!(std::fs::read_to_string(&download.path)?, "zip bytes");
        m.assert_async().await;

        Ok(())
    }

    #[test(tokio::test)]
    async fn download_error_status_includes_body() -> Result<()> {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/missing.zip")
            .with_status(404)
            .with_body("Not Found")
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/missing.zip", server.url()))?;
        let err = download(&Client::new(), &url).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("404"), "{msg}");
        assert!(msg.contains("Not Found"), "{msg}");
        m.assert_async().await;

        Ok(())
    }

    #[test(tokio::test)]
    async fn download_needs_a_file_name() -> Result<()> {
        let url = Url::parse("https://github.com/")?;
        assert!(download(&Client::new(), &url).await.is_err());
        Ok(())
    }
}
