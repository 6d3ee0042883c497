use super::{envelope, AppState, Envelope};
use crate::error::{AppError, Result};
use crate::media::{Platform, VideoMetadata};
use crate::store::DownloadStatus;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Deserialize)]
pub struct InfoBody {
    url: String,
}

#[derive(Debug, Deserialize)]
pub struct DownloadBody {
    url: String,
    quality: String,
    #[serde(default)]
    id: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoData {
    id: u64,
    video_info: Option<VideoMetadata>,
    platform: Platform,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadData {
    id: u64,
    download_url: Option<String>,
    status: DownloadStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusData {
    id: u64,
    status: DownloadStatus,
    video_info: Option<VideoMetadata>,
    download_url: Option<String>,
    selected_quality: Option<String>,
    error: Option<String>,
}

/// Accepts absolute http(s) URLs only; returns the trimmed input unchanged otherwise.
fn validate_url(raw: &str) -> Result<&str> {
    let raw = raw.trim();
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(raw),
        _ => Err(AppError::ValidationFailed(
            "Please enter a valid video URL".to_string(),
        )),
    }
}

fn validate_quality(raw: &str) -> Result<&str> {
    let quality = raw.trim();
    if quality.is_empty() || quality.len() > 32 {
        return Err(AppError::ValidationFailed(
            "Please select a quality".to_string(),
        ));
    }
    Ok(quality)
}

pub async fn info(
    State(state): State<AppState>,
    body: std::result::Result<Json<InfoBody>, JsonRejection>,
) -> Result<Json<Envelope<InfoData>>> {
    let Json(body) = body?;
    let url = validate_url(&body.url)?;

    let record = state.service.fetch_info(url).await?;

    Ok(envelope(InfoData {
        id: record.id,
        video_info: record.video_info,
        platform: record.platform,
    }))
}

pub async fn download(
    State(state): State<AppState>,
    body: std::result::Result<Json<DownloadBody>, JsonRejection>,
) -> Result<Json<Envelope<DownloadData>>> {
    let Json(body) = body?;
    let url = validate_url(&body.url)?;
    let quality = validate_quality(&body.quality)?;

    let record = state.service.download(body.id, url, quality).await?;

    Ok(envelope(DownloadData {
        id: record.id,
        download_url: record.download_url,
        status: record.status,
    }))
}

pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<StatusData>>> {
    let id: u64 = id
        .parse()
        .map_err(|_| AppError::ValidationFailed(format!("invalid request id {:?}", id)))?;

    let record = state.service.status(id).await?;

    Ok(envelope(StatusData {
        id: record.id,
        status: record.status,
        video_info: record.video_info,
        download_url: record.download_url,
        selected_quality: record.selected_quality,
        error: record.error,
    }))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn test_validate_url() {
        assert_eq!(
            validate_url("  https://www.youtube.com/watch?v=abc123 ").unwrap(),
            "https://www.youtube.com/watch?v=abc123"
        );
        assert!(validate_url("www.youtube.com/watch?v=abc123").is_err());
        assert!(validate_url("ftp://youtube.com/x").is_err());
        assert!(validate_url("").is_err());
    }

    #[test]
    fn test_validate_quality() {
        assert_eq!(validate_quality(" 720p ").unwrap(), "720p");
        assert!(validate_quality("   ").is_err());
    }

    #[tokio::test]
    async fn test_info_youtube() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());

        let (status, body) = post_json(
            &app,
            "/api/video/info",
            json!({"url": "https://www.youtube.com/watch?v=abc123"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["platform"], "youtube");
        assert_eq!(body["data"]["videoInfo"]["qualities"][2]["type"], "audio");

        let id = body["data"]["id"].as_u64().unwrap();
        let (status, body) = get_json(&app, &format!("/api/video/status/{}", id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "ready");
        assert_eq!(body["data"]["downloadUrl"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_info_rejections() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());

        let (status, body) =
            post_json(&app, "/api/video/info", json!({"url": "https://vimeo.com/1"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "UnsupportedPlatform");

        let (status, body) = post_json(&app, "/api/video/info", json!({"url": "not a url"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "ValidationFailed");

        let (status, body) = post_json(&app, "/api/video/info", json!({"link": "x"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "ValidationFailed");
    }

    #[tokio::test]
    async fn test_download_flow() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let url = "https://www.tiktok.com/@user/video/123";

        let (status, _) = post_json(&app, "/api/video/info", json!({"url": url})).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = post_json(
            &app,
            "/api/video/download",
            json!({"url": url, "quality": "audio"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "completed");
        let download_url = body["data"]["downloadUrl"].as_str().unwrap();
        assert!(download_url.starts_with("/api/download/tiktok_audio_"));
        assert!(download_url.ends_with(".mp3"));
    }

    #[tokio::test]
    async fn test_download_without_record() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());

        let (status, body) = post_json(
            &app,
            "/api/video/download",
            json!({"url": "https://youtu.be/never-seen", "quality": "720p"}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "RequestNotFound");
    }

    #[tokio::test]
    async fn test_download_failure_is_500_and_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        let url = "https://www.facebook.com/watch/?v=1";

        let (_, body) = post_json(&app, "/api/video/info", json!({"url": url})).await;
        let id = body["data"]["id"].as_u64().unwrap();

        let (status, body) = post_json(
            &app,
            "/api/video/download",
            json!({"url": url, "quality": "720p", "id": id}),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "DownloadFailed");

        let (_, body) = get_json(&app, &format!("/api/video/status/{}", id)).await;
        assert_eq!(body["data"]["status"], "failed");
        assert!(body["data"]["error"].as_str().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_status_errors() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());

        let (status, body) = get_json(&app, "/api/video/status/12345").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "RequestNotFound");

        let (status, body) = get_json(&app, "/api/video/status/abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "ValidationFailed");
    }
}
