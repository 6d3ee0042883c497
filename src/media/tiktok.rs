use super::{
    handler::PlatformHandler,
    types::{next_output_path, Platform, QualityOption, QualityRequest, VideoMetadata},
    ytdlp::{self, YtDlp},
};
use crate::utils::format_duration;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use tracing::info;

const SUPPORTED_HEIGHTS: [u32; 2] = [720, 480];

pub struct TiktokHandler {
    ytdlp: YtDlp,
    download_dir: PathBuf,
}

impl TiktokHandler {
    pub fn new(ytdlp: YtDlp, download_dir: PathBuf) -> Self {
        Self {
            ytdlp,
            download_dir,
        }
    }
}

#[async_trait]
impl PlatformHandler for TiktokHandler {
    fn platform(&self) -> Platform {
        Platform::Tiktok
    }

    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata> {
        let json = self.ytdlp.dump_json(url).await?;
        Ok(parse_metadata(&json))
    }

    async fn download(&self, url: &str, quality: &str) -> Result<PathBuf> {
        let request = QualityRequest::parse(quality, &SUPPORTED_HEIGHTS);
        let output =
            next_output_path(&self.download_dir, Platform::Tiktok, request.kind()).await;

        let path = self.ytdlp.download(url, request, &output).await?;
        info!("TikTok download finished: {}", path.display());
        Ok(path)
    }
}

fn parse_metadata(json: &Value) -> VideoMetadata {
    VideoMetadata {
        title: json["title"]
            .as_str()
            .filter(|t| !t.is_empty())
            .or(json["description"].as_str())
            .unwrap_or("TikTok Video")
            .to_string(),
        duration: format_duration(ytdlp::duration_secs(json)),
        thumbnail: ytdlp::thumbnail(json),
        platform: Platform::Tiktok,
        qualities: QualityOption::default_set(),
    }
}
