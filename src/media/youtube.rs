use super::{
    handler::PlatformHandler,
    types::{next_output_path, Platform, QualityOption, QualityRequest, VideoMetadata},
    ytdlp::{self, ExtractorError, YtDlp},
};
use crate::utils::{format_duration, format_file_size};
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::{info, warn};

const SUPPORTED_HEIGHTS: [u32; 3] = [1080, 720, 480];

/// Markers yt-dlp prints when YouTube asks it to prove it isn't automated.
const BOT_CHECK_MARKERS: [&str; 3] = ["bot", "Sign in", "protect our community"];

static VIDEO_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:watch\?v=|youtu\.be/|shorts/|embed/)([^&\n?#/]+)").expect("valid video id regex")
});

pub struct YoutubeHandler {
    ytdlp: YtDlp,
    download_dir: PathBuf,
}

impl YoutubeHandler {
    pub fn new(ytdlp: YtDlp, download_dir: PathBuf) -> Self {
        Self {
            ytdlp: ytdlp.with_best_audio_quality(),
            download_dir,
        }
    }
}

#[async_trait]
impl PlatformHandler for YoutubeHandler {
    fn platform(&self) -> Platform {
        Platform::Youtube
    }

    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata> {
        match self.ytdlp.dump_json(url).await {
            Ok(json) => Ok(parse_metadata(&json)),
            Err(e) => match e.downcast_ref::<ExtractorError>() {
                Some(failure) if is_bot_check(&failure.stderr) => {
                    warn!("YouTube bot check hit for {}, using fallback metadata", url);
                    Ok(fallback_metadata(url))
                }
                _ => Err(e),
            },
        }
    }

    async fn download(&self, url: &str, quality: &str) -> Result<PathBuf> {
        let request = QualityRequest::parse(quality, &SUPPORTED_HEIGHTS);
        let output =
            next_output_path(&self.download_dir, Platform::Youtube, request.kind()).await;

        let path = self.ytdlp.download(url, request, &output).await?;
        info!("YouTube download finished: {}", path.display());
        Ok(path)
    }
}

fn parse_metadata(json: &Value) -> VideoMetadata {
    let mut qualities = video_qualities(json);
    if qualities.is_empty() {
        qualities = QualityOption::default_set();
    } else {
        qualities.push(QualityOption::audio());
    }

    VideoMetadata {
        title: json["title"]
            .as_str()
            .unwrap_or("Unknown Title")
            .to_string(),
        duration: format_duration(ytdlp::duration_secs(json)),
        thumbnail: ytdlp::thumbnail(json),
        platform: Platform::Youtube,
        qualities,
    }
}

/// One option per distinct supported video height, tallest first.
fn video_qualities(json: &Value) -> Vec<QualityOption> {
    let mut by_height: BTreeMap<u64, Option<u64>> = BTreeMap::new();

    for format in json["formats"].as_array().into_iter().flatten() {
        let has_video = format["vcodec"]
            .as_str()
            .is_some_and(|codec| codec != "none");
        let Some(height) = format["height"]
            .as_u64()
            .filter(|h| SUPPORTED_HEIGHTS.iter().any(|s| u64::from(*s) == *h))
        else {
            continue;
        };
        if !has_video {
            continue;
        }

        let size = format["filesize"]
            .as_u64()
            .or_else(|| format["filesize_approx"].as_f64().map(|s| s as u64));
        // first format seen for a height decides its size
        by_height.entry(height).or_insert(size);
    }

    by_height
        .into_iter()
        .rev()
        .map(|(height, size)| {
            QualityOption::video(
                format!("{}p", height),
                size.map(format_file_size)
                    .unwrap_or_else(|| "Unknown".to_string()),
            )
        })
        .collect()
}

fn is_bot_check(stderr: &str) -> bool {
    BOT_CHECK_MARKERS
        .iter()
        .any(|marker| stderr.contains(marker))
}

pub fn video_id(url: &str) -> Option<&str> {
    VIDEO_ID
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn fallback_metadata(url: &str) -> VideoMetadata {
    let id = video_id(url);

    VideoMetadata {
        title: format!("YouTube Video ({})", id.unwrap_or("Unknown")),
        duration: "Unknown".to_string(),
        thumbnail: id
            .map(|id| format!("https://img.youtube.com/vi/{}/hqdefault.jpg", id))
            .unwrap_or_default(),
        platform: Platform::Youtube,
        qualities: QualityOption::default_set(),
    }
}
