//! Release artifact retrieval.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use d2_core::{D2Error, D2Result};
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Boxed future returned by [`ArtifactSource::fetch_war`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = D2Result<()>> + Send + 'a>>;

/// Where the application WAR of a platform version comes from.
pub trait ArtifactSource: Send + Sync {
    /// Write the WAR of `version` to `dest`.
    fn fetch_war<'a>(&'a self, version: &'a str, dest: &'a Path) -> FetchFuture<'a>;
}

/// HTTP release server laid out as `<base>/<version>/dhis.war`.
#[derive(Debug, Clone)]
pub struct ReleaseServer {
    client: reqwest::Client,
    base_url: String,
}

impl ReleaseServer {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn war_url(&self, version: &str) -> String {
        format!("{}/{}/dhis.war", self.base_url.trim_end_matches('/'), version)
    }

    async fn download(&self, url: &str, dest: &Path) -> D2Result<()> {
        info!(%url, "Download file");
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| D2Error::Download(format!("{url}: {e}")))?;

        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| D2Error::Download(format!("{url}: {e}")))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

impl ArtifactSource for ReleaseServer {
    fn fetch_war<'a>(&'a self, version: &'a str, dest: &'a Path) -> FetchFuture<'a> {
        Box::pin(async move {
            let url = self.war_url(version);
            self.download(&url, dest).await
        })
    }
}
