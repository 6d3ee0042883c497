use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub struct MediaFetcher {
    client: reqwest::Client,
}

impl MediaFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Streams `url` into `dest`. Nothing is left behind in the directory on failure.
    pub async fn save(&self, url: &str, dest: &Path) -> Result<u64> {
        debug!("Fetching media {} into {}", url, dest.display());

        let dir = dest
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Invalid destination {}", dest.display()))?;
        let partial = tempfile::Builder::new()
            .prefix(".partial-")
            .tempfile_in(dir)
            .context("Failed to create temporary file")?;
        let (file, partial_path) = partial.into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to fetch media URL")?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Failed to download media: HTTP {}",
                response.status()
            ));
        }

        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.context("Failed to read media data")? {
            file.write_all(&chunk)
                .await
                .context("Failed to write media data")?;
            written += chunk.len() as u64;
        }
        file.flush().await.context("Failed to write media data")?;
        drop(file);

        if written == 0 {
            return Err(anyhow::anyhow!("Media URL returned no data"));
        }

        partial_path
            .persist(dest)
            .with_context(|| format!("Failed to move download to {}", dest.display()))?;

        Ok(written)
    }
}
