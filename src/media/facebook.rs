use super::{
    browser::{download_page_media, HeadlessBrowser, PageDetails},
    fetch::MediaFetcher,
    handler::PlatformHandler,
    types::{Platform, VideoMetadata},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

pub struct FacebookHandler {
    browser: HeadlessBrowser,
    fetcher: Arc<MediaFetcher>,
    download_dir: PathBuf,
}

impl FacebookHandler {
    pub fn new(browser: HeadlessBrowser, fetcher: Arc<MediaFetcher>, download_dir: PathBuf) -> Self {
        Self {
            browser,
            fetcher,
            download_dir,
        }
    }
}

#[async_trait]
impl PlatformHandler for FacebookHandler {
    fn platform(&self) -> Platform {
        Platform::Facebook
    }

    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata> {
        let html = self
            .browser
            .render(url)
            .await
            .context("Failed to load Facebook page")?;
        let mut details = PageDetails::parse(&html, url);
        debug!("Facebook page description: {:?}", details.description);
        details.title = details.title.filter(|title| !is_generic_title(title));

        Ok(details.into_metadata(Platform::Facebook, "Facebook Video"))
    }

    async fn download(&self, url: &str, quality: &str) -> Result<PathBuf> {
        download_page_media(
            &self.browser,
            &self.fetcher,
            url,
            quality,
            Platform::Facebook,
            &self.download_dir,
        )
        .await
    }
}

/// Titles Facebook serves when the real one is hidden behind a login.
fn is_generic_title(title: &str) -> bool {
    let title = title.trim();
    title.eq_ignore_ascii_case("facebook")
        || title.starts_with("Log in")
        || title.starts_with("Log into Facebook")
}
