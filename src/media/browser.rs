use super::fetch::MediaFetcher;
use super::types::{
    next_output_path, MediaKind, Platform, QualityOption, QualityRequest, VideoMetadata,
};
use anyhow::{Context, Result};
use scraper::{Html, Selector};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

static META: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("meta[content]").expect("valid meta selector"));
static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid title selector"));
static VIDEO_SRC: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("video[src]").expect("valid video selector"));
static VIDEO_SOURCE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("video source[src]").expect("valid source selector"));

const VIDEO_META_KEYS: [&str; 3] = ["og:video:secure_url", "og:video:url", "og:video"];

/// Chromium in headless mode, launched once per page and torn down with it.
#[derive(Debug, Clone)]
pub struct HeadlessBrowser {
    binary: String,
    user_agent: String,
    timeout: Duration,
}

impl HeadlessBrowser {
    pub fn new(binary: &str, user_agent: &str, timeout: Duration) -> Self {
        Self {
            binary: binary.to_string(),
            user_agent: user_agent.to_string(),
            timeout,
        }
    }

    /// Loads `url` and returns the DOM after scripts have run.
    pub async fn render(&self, url: &str) -> Result<String> {
        debug!("Rendering page with {}: {}", self.binary, url);

        // Removed on drop, after the child below has been killed or reaped.
        let profile = tempfile::Builder::new()
            .prefix("vidgrab-profile-")
            .tempdir()
            .context("Failed to create browser profile directory")?;

        let mut cmd = Command::new(&self.binary);
        cmd.kill_on_drop(true)
            .stdin(Stdio::null())
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--mute-audio")
            .arg(format!("--user-agent={}", self.user_agent))
            .arg(format!("--user-data-dir={}", profile.path().display()))
            .arg("--virtual-time-budget=5000")
            .arg("--dump-dom")
            .arg(url);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .with_context(|| format!("Page load timed out after {}s", self.timeout.as_secs()))?
            .with_context(|| format!("Failed to launch browser {}", self.binary))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow::anyhow!("Browser failed to load page: {}", error.trim()));
        }

        let html = String::from_utf8_lossy(&output.stdout).into_owned();
        if html.trim().is_empty() {
            return Err(anyhow::anyhow!("Browser returned an empty page"));
        }

        Ok(html)
    }

    pub async fn test_availability(binary: &str) -> bool {
        super::probe_tool("browser", binary, "--version").await
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PageDetails {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub description: Option<String>,
    pub media_url: Option<String>,
}

impl PageDetails {
    pub fn parse(html: &str, page_url: &str) -> Self {
        let document = Html::parse_document(html);
        let base = Url::parse(page_url).ok();

        let title = meta_content(&document, "og:title").or_else(|| {
            document
                .select(&TITLE)
                .next()
                .map(|t| t.text().collect::<String>().trim().to_string())
                .filter(|t| !t.is_empty())
        });

        let element_sources = document
            .select(&VIDEO_SRC)
            .chain(document.select(&VIDEO_SOURCE))
            .filter_map(|el| el.value().attr("src"))
            .map(str::to_string);
        let meta_sources = VIDEO_META_KEYS
            .iter()
            .filter_map(|key| meta_content(&document, key));

        let media_url = element_sources
            .chain(meta_sources)
            .find_map(|raw| playable_url(&raw, base.as_ref()));

        Self {
            title,
            thumbnail: meta_content(&document, "og:image"),
            description: meta_content(&document, "og:description"),
            media_url,
        }
    }

    pub fn into_metadata(self, platform: Platform, fallback_title: &str) -> VideoMetadata {
        VideoMetadata {
            title: self.title.unwrap_or_else(|| fallback_title.to_string()),
            duration: "Unknown".to_string(),
            thumbnail: self.thumbnail.unwrap_or_default(),
            platform,
            qualities: QualityOption::default_set(),
        }
    }
}

/// Matches `<meta property=key>` or `<meta name=key>`, case-insensitively.
fn meta_content(document: &Html, key: &str) -> Option<String> {
    document
        .select(&META)
        .find(|meta| {
            let el = meta.value();
            el.attr("property")
                .or_else(|| el.attr("name"))
                .is_some_and(|marker| marker.eq_ignore_ascii_case(key))
        })
        .and_then(|meta| meta.value().attr("content"))
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
}

/// Resolves against the page and keeps only fetchable http(s) URLs.
fn playable_url(raw: &str, base: Option<&Url>) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let url = match base {
        Some(base) => base.join(raw).ok()?,
        None => Url::parse(raw).ok()?,
    };

    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

/// Shared download path for pages whose media is fetched directly.
pub async fn download_page_media(
    browser: &HeadlessBrowser,
    fetcher: &MediaFetcher,
    url: &str,
    quality: &str,
    platform: Platform,
    download_dir: &Path,
) -> Result<PathBuf> {
    let html = browser.render(url).await?;
    let details = PageDetails::parse(&html, url);

    let media_url = details
        .media_url
        .ok_or_else(|| anyhow::anyhow!("Could not find a video on the {} page", platform))?;
    debug!("Found media URL: {}", media_url);

    // Served as-is; audio requests only change how the file is named.
    let kind: MediaKind = QualityRequest::parse(quality, &[]).kind();
    let output = next_output_path(download_dir, platform, kind).await;

    let written = fetcher.save(&media_url, &output).await?;
    info!(
        "{} download finished: {} ({} bytes)",
        platform,
        output.display(),
        written
    );

    Ok(output)
}
