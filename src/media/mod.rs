mod browser;
mod facebook;
mod fetch;
mod handler;
mod instagram;
mod platform;
mod tiktok;
mod types;
mod youtube;
mod ytdlp;

pub use handler::PlatformHandler;
pub use platform::detect_platform;
pub use types::{Platform, VideoMetadata};

#[cfg(test)]
pub use types::QualityOption;

use crate::config::Config;
use crate::error::{AppError, Result};
use browser::HeadlessBrowser;
use facebook::FacebookHandler;
use fetch::MediaFetcher;
use instagram::InstagramHandler;
use std::path::PathBuf;
use std::sync::Arc;
use tiktok::TiktokHandler;
use tracing::{info, warn};
use youtube::YoutubeHandler;
use ytdlp::YtDlp;

/// Routes each call to the handler for the URL's platform.
pub struct MediaDispatcher {
    youtube: Box<dyn PlatformHandler>,
    tiktok: Box<dyn PlatformHandler>,
    instagram: Box<dyn PlatformHandler>,
    facebook: Box<dyn PlatformHandler>,
}

impl MediaDispatcher {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let tools = &config.tools;
        let dir = config.downloads.dir.clone();

        let ytdlp = YtDlp::new(
            &tools.ytdlp,
            tools.metadata_timeout(),
            tools.download_timeout(),
        );
        let browser = HeadlessBrowser::new(&tools.browser, &tools.user_agent, tools.page_timeout());
        let fetcher = Arc::new(MediaFetcher::new(tools.download_timeout(), &tools.user_agent)?);

        info!(
            "Media dispatcher initialized - staging downloads in {}",
            dir.display()
        );

        Ok(Self::from_handlers(
            Box::new(YoutubeHandler::new(
                ytdlp.clone().with_user_agent(&tools.user_agent),
                dir.clone(),
            )),
            Box::new(TiktokHandler::new(ytdlp, dir.clone())),
            Box::new(InstagramHandler::new(
                browser.clone(),
                fetcher.clone(),
                dir.clone(),
            )),
            Box::new(FacebookHandler::new(browser, fetcher, dir)),
        ))
    }

    pub fn from_handlers(
        youtube: Box<dyn PlatformHandler>,
        tiktok: Box<dyn PlatformHandler>,
        instagram: Box<dyn PlatformHandler>,
        facebook: Box<dyn PlatformHandler>,
    ) -> Self {
        Self {
            youtube,
            tiktok,
            instagram,
            facebook,
        }
    }

    fn handler(&self, platform: Platform) -> &dyn PlatformHandler {
        match platform {
            Platform::Youtube => self.youtube.as_ref(),
            Platform::Tiktok => self.tiktok.as_ref(),
            Platform::Instagram => self.instagram.as_ref(),
            Platform::Facebook => self.facebook.as_ref(),
        }
    }

    pub fn detect_platform(&self, url: &str) -> Result<Platform> {
        detect_platform(url)
    }

    pub async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata> {
        let platform = self.detect_platform(url)?;
        info!("Fetching {} metadata for URL: {}", platform, url);

        self.handler(platform)
            .fetch_metadata(url)
            .await
            .map_err(|e| AppError::MetadataFetchFailed(format!("{:#}", e)))
    }

    pub async fn download(&self, url: &str, quality: &str) -> Result<PathBuf> {
        let handler = self.handler(self.detect_platform(url)?);
        info!(
            "Starting {} download ({}) for URL: {}",
            handler.platform(),
            quality,
            url
        );

        handler
            .download(url, quality)
            .await
            .map_err(|e| AppError::DownloadFailed(format!("{:#}", e)))
    }

    /// Logs which external tools are usable. Missing tools only disable their platforms.
    pub async fn test_setup(config: &Config) {
        info!("Testing media tool setup...");

        let ytdlp_available = YtDlp::test_availability(&config.tools.ytdlp).await;
        let ffmpeg_available = probe_tool("ffmpeg", "ffmpeg", "-version").await;
        let browser_available = HeadlessBrowser::test_availability(&config.tools.browser).await;

        if !ytdlp_available {
            warn!("⚠️  YouTube and TikTok are unavailable without yt-dlp");
        } else if !ffmpeg_available {
            warn!("⚠️  yt-dlp will work but audio extraction and remuxing will fail");
        }
        if !browser_available {
            warn!("⚠️  Instagram and Facebook are unavailable without a headless browser");
        }
    }
}

async fn probe_tool(name: &str, binary: &str, version_arg: &str) -> bool {
    match tokio::process::Command::new(binary)
        .arg(version_arg)
        .kill_on_drop(true)
        .output()
        .await
    {
        Ok(output) => {
            if output.status.success() {
                let version_line = String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .next()
                    .unwrap_or("unknown")
                    .trim()
                    .to_string();
                info!("✅ {} is available: {}", name, version_line);
                true
            } else {
                warn!("❌ {} command failed", name);
                false
            }
        }
        Err(e) => {
            warn!("❌ {} not found ({}): {}", name, binary, e);
            false
        }
    }
}
