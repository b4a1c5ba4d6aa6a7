//! Fetching download entries into staging trees.

use std::path::Path;

use catapt_schema::Pin;
use tracing::{debug, instrument};

use crate::disk::Disk;
use crate::error::{Error, Result};

/// Expand `{{version}}` and `{{commit}}` in a download URL.
pub fn render_url(template: &str, pin: &Pin) -> String {
    template
        .replace("{{version}}", &pin.version)
        .replace("{{commit}}", &pin.commit)
}

/// HTTP downloader writing through the sandbox.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl Downloader {
    /// Wrap an existing client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Download `url` to `dest` unless something is already there.
    /// Returns the number of bytes written.
    #[instrument(skip(self, disk, dest), fields(dest = %dest.display()))]
    pub async fn fetch(&self, disk: &Disk, url: &str, dest: &Path) -> Result<u64> {
        if disk.exists(dest)? {
            debug!("destination exists, skipping download");
            return Ok(0);
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::build(format!("download {url}: {e}")))?;
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::build(format!("download {url}: {e}")))?;

        if let Some(parent) = dest.parent() {
            disk.create_dir_all(parent)?;
        }
        disk.write(dest, &body)?;
        debug!(bytes = body.len(), "downloaded");
        Ok(body.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_expand_pin_fields() {
        let pin = Pin::new("1.2.3", "abc");
        assert_eq!(
            render_url("https://x/{{version}}/tool-{{commit}}", &pin),
            "https://x/1.2.3/tool-abc"
        );
    }

    #[tokio::test]
    async fn fetches_once_and_skips_existing() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/tool")
            .with_status(200)
            .with_body("binary")
            .expect(1)
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let disk = Disk::new(tmp.path()).unwrap();
        let dest = disk.base().join("stage/usr/bin/tool");
        let url = format!("{}/tool", server.url());

        let downloader = Downloader::default();
        assert_eq!(downloader.fetch(&disk, &url, &dest).await.unwrap(), 6);
        assert_eq!(downloader.fetch(&disk, &url, &dest).await.unwrap(), 0);
        assert_eq!(std::fs::read(&dest).unwrap(), b"binary");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn http_errors_are_build_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let disk = Disk::new(tmp.path()).unwrap();
        let err = Downloader::default()
            .fetch(&disk, &format!("{}/missing", server.url()), &disk.base().join("x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Build);
        assert!(!disk.base().join("x").exists());
    }
}
