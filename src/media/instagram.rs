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

pub struct InstagramHandler {
    browser: HeadlessBrowser,
    fetcher: Arc<MediaFetcher>,
    download_dir: PathBuf,
}

impl InstagramHandler {
    pub fn new(browser: HeadlessBrowser, fetcher: Arc<MediaFetcher>, download_dir: PathBuf) -> Self {
        Self {
            browser,
            fetcher,
            download_dir,
        }
    }
}

#[async_trait]
impl PlatformHandler for InstagramHandler {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata> {
        let html = self
            .browser
            .render(url)
            .await
            .context("Failed to load Instagram page")?;
        if is_login_wall(&html) {
            return Err(anyhow::anyhow!("Instagram requires login to view this post"));
        }

        let mut details = PageDetails::parse(&html, url);
        debug!("Instagram page description: {:?}", details.description);
        details.title = details.title.map(|title| caption(&title));

        Ok(details.into_metadata(Platform::Instagram, "Instagram Video"))
    }

    async fn download(&self, url: &str, quality: &str) -> Result<PathBuf> {
        download_page_media(
            &self.browser,
            &self.fetcher,
            url,
            quality,
            Platform::Instagram,
            &self.download_dir,
        )
        .await
    }
}

/// Logged-out visitors get the login form instead of the post.
fn is_login_wall(html: &str) -> bool {
    html.contains("/accounts/login") && !html.contains("og:video") && !html.contains("<video")
}

/// `Name on Instagram: "caption"` -> `caption`
fn caption(title: &str) -> String {
    match title.split_once(" on Instagram: ") {
        Some((_, rest)) => {
            let rest = rest.trim();
            let rest = rest
                .strip_prefix('"')
                .and_then(|r| r.strip_suffix('"'))
                .unwrap_or(rest);
            if rest.is_empty() {
                title.to_string()
            } else {
                rest.to_string()
            }
        }
        None => title.to_string(),
    }
}
