use super::types::Platform;
use crate::error::{AppError, Result};

const DOMAIN_FRAGMENTS: [(&str, Platform); 6] = [
    ("youtube.com", Platform::Youtube),
    ("youtu.be", Platform::Youtube),
    ("tiktok.com", Platform::Tiktok),
    ("instagram.com", Platform::Instagram),
    ("facebook.com", Platform::Facebook),
    ("fb.com", Platform::Facebook),
];

/// Maps a URL to its platform by domain fragment, first match wins.
pub fn detect_platform(url: &str) -> Result<Platform> {
    DOMAIN_FRAGMENTS
        .iter()
        .find(|(fragment, _)| url.contains(fragment))
        .map(|(_, platform)| *platform)
        .ok_or_else(|| AppError::UnsupportedPlatform(url.to_string()))
}
