use crate::error::{AppError, Result};
use crate::media::MediaDispatcher;
use crate::store::{DownloadRequest, RequestStore};
use std::sync::Arc;
use tracing::{error, info, warn};

pub const DOWNLOAD_ROUTE: &str = "/api/download";

/// Drives download requests through the store's lifecycle.
pub struct VideoService {
    dispatcher: MediaDispatcher,
    store: Arc<RequestStore>,
}

impl VideoService {
    pub fn new(dispatcher: MediaDispatcher, store: Arc<RequestStore>) -> Self {
        Self { dispatcher, store }
    }

    pub fn store(&self) -> &RequestStore {
        &self.store
    }

    /// Fetches metadata and records a ready request for the URL.
    pub async fn fetch_info(&self, url: &str) -> Result<DownloadRequest> {
        let platform = self.dispatcher.detect_platform(url)?;
        let metadata = self.dispatcher.fetch_metadata(url).await?;

        let record = self.store.create(url, platform).await;
        let record = self.store.attach_metadata(record.id, metadata).await?;

        info!(
            "Request {} ready: {} ({})",
            record.id,
            record
                .video_info
                .as_ref()
                .map(|v| v.title.as_str())
                .unwrap_or_default(),
            platform
        );
        Ok(record)
    }

    /// Resolves the record by id when given, else the newest one for `url`.
    async fn resolve(&self, id: Option<u64>, url: &str) -> Result<DownloadRequest> {
        match id {
            Some(id) => {
                let record = self
                    .store
                    .get(id)
                    .await
                    .ok_or_else(|| AppError::RequestNotFound(format!("id {}", id)))?;
                if record.url != url {
                    return Err(AppError::ValidationFailed(format!(
                        "request {} was created for a different URL",
                        id
                    )));
                }
                Ok(record)
            }
            None => self
                .store
                .find_latest_by_url(url)
                .await
                .ok_or_else(|| AppError::RequestNotFound(url.to_string())),
        }
    }

    pub async fn download(&self, id: Option<u64>, url: &str, quality: &str) -> Result<DownloadRequest> {
        let record = self.resolve(id, url).await?;
        if record.status.is_terminal() {
            warn!(
                "Request {} is already {}, fetch info again to download anew",
                record.id, record.status
            );
        }

        let record = self.store.begin_download(record.id, quality).await?;

        let outcome = match self.dispatcher.download(&record.url, quality).await {
            Ok(path) => path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| format!("{}/{}", DOWNLOAD_ROUTE, name))
                .ok_or_else(|| {
                    AppError::DownloadFailed(format!(
                        "handler produced an unusable path {}",
                        path.display()
                    ))
                }),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(download_url) => {
                let record = self.store.complete(record.id, &download_url).await?;
                info!("Request {} completed: {}", record.id, download_url);
                Ok(record)
            }
            Err(e) => {
                error!("Request {} failed: {}", record.id, e);
                if let Err(mark) = self.store.fail(record.id, &e.to_string()).await {
                    warn!("Could not mark request {} failed: {}", record.id, mark);
                }
                Err(e)
            }
        }
    }

    pub async fn status(&self, id: u64) -> Result<DownloadRequest> {
        self.store
            .get(id)
            .await
            .ok_or_else(|| AppError::RequestNotFound(format!("id {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::media::{testing::fake_dispatcher, Platform};
    use crate::store::DownloadStatus;

    fn service(dir: &std::path::Path) -> VideoService {
        VideoService::new(
            fake_dispatcher(dir),
            Arc::new(RequestStore::new(&StoreConfig::default())),
        )
    }

    #[tokio::test]
    async fn test_fetch_info_creates_ready_record() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        let record = service
            .fetch_info("https://www.youtube.com/watch?v=abc123")
            .await
            .unwrap();
        assert_eq!(record.platform, Platform::Youtube);
        assert_eq!(record.status, DownloadStatus::Ready);
        assert!(record.video_info.is_some());
        assert_eq!(service.store().len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_info_creates_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        assert!(matches!(
            service.fetch_info("https://youtu.be/private").await,
            Err(AppError::MetadataFetchFailed(_))
        ));
        assert!(matches!(
            service.fetch_info("https://vimeo.com/1").await,
            Err(AppError::UnsupportedPlatform(_))
        ));
        assert_eq!(service.store().len().await, 0);
    }

    #[tokio::test]
    async fn test_download_without_info_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        assert!(matches!(
            service
                .download(None, "https://www.tiktok.com/@u/video/1", "720p")
                .await,
            Err(AppError::RequestNotFound(_))
        ));
        assert!(matches!(
            service
                .download(Some(7), "https://www.tiktok.com/@u/video/1", "720p")
                .await,
            Err(AppError::RequestNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_tiktok_audio_download_completes() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let url = "https://www.tiktok.com/@u/video/1";

        let info = service.fetch_info(url).await.unwrap();
        let done = service.download(None, url, "audio").await.unwrap();

        assert_eq!(done.id, info.id);
        assert_eq!(done.status, DownloadStatus::Completed);
        assert_eq!(done.selected_quality.as_deref(), Some("audio"));
        let download_url = done.download_url.unwrap();
        assert!(download_url.starts_with("/api/download/tiktok_audio_"));
        assert!(download_url.ends_with(".mp3"));

        let filename = download_url.rsplit('/').next().unwrap();
        assert!(dir.path().join(filename).exists());
    }

    #[tokio::test]
    async fn test_download_uses_latest_record_or_explicit_id() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let url = "https://www.youtube.com/watch?v=abc123";

        let first = service.fetch_info(url).await.unwrap();
        let second = service.fetch_info(url).await.unwrap();

        let done = service.download(None, url, "720p").await.unwrap();
        assert_eq!(done.id, second.id);

        let done = service.download(Some(first.id), url, "480p").await.unwrap();
        assert_eq!(done.id, first.id);
        assert!(done.download_url.unwrap().ends_with(".mp4"));
    }

    #[tokio::test]
    async fn test_explicit_id_must_match_url() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        let record = service.fetch_info("https://youtu.be/a").await.unwrap();
        assert!(matches!(
            service.download(Some(record.id), "https://youtu.be/b", "720p").await,
            Err(AppError::ValidationFailed(_))
        ));
        assert_eq!(
            service.status(record.id).await.unwrap().status,
            DownloadStatus::Ready
        );
    }

    #[tokio::test]
    async fn test_failed_download_marks_record_failed() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let url = "https://www.facebook.com/watch/?v=1";

        let info = service.fetch_info(url).await.unwrap();
        let err = service.download(None, url, "720p").await.unwrap_err();
        assert!(matches!(err, AppError::DownloadFailed(_)));

        let record = service.status(info.id).await.unwrap();
        assert_eq!(record.status, DownloadStatus::Failed);
        assert_eq!(record.selected_quality.as_deref(), Some("720p"));
        assert!(record.error.unwrap().contains("boom"));
        assert!(record.download_url.is_none());
    }

    #[tokio::test]
    async fn test_completed_record_is_not_downloaded_twice() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let url = "https://youtu.be/abc";

        service.fetch_info(url).await.unwrap();
        service.download(None, url, "720p").await.unwrap();

        assert!(matches!(
            service.download(None, url, "480p").await,
            Err(AppError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_status_unknown_id() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        assert!(matches!(
            service.status(404).await,
            Err(AppError::RequestNotFound(_))
        ));
    }
}
