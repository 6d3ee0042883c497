use super::types::{Platform, VideoMetadata};
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

#[async_trait]
pub trait PlatformHandler: Send + Sync {
    /// Platform this handler serves
    fn platform(&self) -> Platform;

    /// Fetch normalized metadata for the given URL
    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata>;

    /// Download the media in the requested quality, returning the staged file path
    async fn download(&self, url: &str, quality: &str) -> Result<PathBuf>;
}
