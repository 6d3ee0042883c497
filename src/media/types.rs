use crate::utils::timestamp_millis;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

static LAST_STAMP: AtomicI64 = AtomicI64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Youtube,
    Tiktok,
    Instagram,
    Facebook,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Tiktok => "tiktok",
            Self::Instagram => "instagram",
            Self::Facebook => "facebook",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Video => "mp4",
            Self::Audio => "mp3",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityOption {
    pub quality: String,
    pub format: String,
    pub size: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
}

impl QualityOption {
    pub fn video(quality: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            quality: quality.into(),
            format: "MP4".to_string(),
            size: size.into(),
            kind: MediaKind::Video,
        }
    }

    pub fn audio() -> Self {
        Self {
            quality: "audio".to_string(),
            format: "MP3".to_string(),
            size: "Unknown".to_string(),
            kind: MediaKind::Audio,
        }
    }

    /// The 720p / 480p / audio set offered when a platform can't list formats.
    pub fn default_set() -> Vec<Self> {
        vec![
            Self::video("720p", "Unknown"),
            Self::video("480p", "Unknown"),
            Self::audio(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub duration: String,
    pub thumbnail: String,
    pub platform: Platform,
    pub qualities: Vec<QualityOption>,
}

/// What a client's quality label resolves to for a given handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityRequest {
    Audio,
    MaxHeight(u32),
    Best,
}

impl QualityRequest {
    /// Parses `audio` or `<n>p`. Heights outside `supported` fall back to `Best`.
    pub fn parse(label: &str, supported: &[u32]) -> Self {
        let label = label.trim();
        if label.eq_ignore_ascii_case("audio") {
            return Self::Audio;
        }

        label
            .strip_suffix('p')
            .and_then(|h| h.parse::<u32>().ok())
            .filter(|h| supported.contains(h))
            .map(Self::MaxHeight)
            .unwrap_or(Self::Best)
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Audio => MediaKind::Audio,
            _ => MediaKind::Video,
        }
    }

    /// yt-dlp `--format` expression for video requests.
    pub fn format_selector(&self) -> String {
        match self {
            Self::MaxHeight(h) => format!("best[height<={}]", h),
            Self::Audio | Self::Best => "best".to_string(),
        }
    }
}

/// `<dir>/<platform>_<video|audio>_<timestamp>.<ext>`
pub fn output_path(dir: &Path, platform: Platform, kind: MediaKind, timestamp: i64) -> PathBuf {
    dir.join(format!(
        "{}_{}_{}.{}",
        platform,
        kind.as_str(),
        timestamp,
        kind.extension()
    ))
}

/// Millisecond timestamp never handed out twice by this process.
fn unique_timestamp() -> i64 {
    let now = timestamp_millis();
    let prev = match LAST_STAMP.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        Some(now.max(last + 1))
    }) {
        Ok(prev) | Err(prev) => prev,
    };
    now.max(prev + 1)
}

/// `output_path` stamped with the current time, moved forward past names already on disk.
pub async fn next_output_path(dir: &Path, platform: Platform, kind: MediaKind) -> PathBuf {
    loop {
        let timestamp = unique_timestamp();
        let path = output_path(dir, platform, kind, timestamp);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return path;
        }
        LAST_STAMP.fetch_max(timestamp, Ordering::SeqCst);
    }
}
