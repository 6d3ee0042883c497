use crate::config::StoreConfig;
use crate::error::{AppError, Result};
use crate::media::{Platform, VideoMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Ready,
    Processing,
    Completed,
    Failed,
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The only forward edges of the lifecycle.
    fn can_move_to(&self, next: DownloadStatus) -> bool {
        use DownloadStatus::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Ready, Processing)
                | (Processing, Completed)
                | (Pending | Ready | Processing, Failed)
        )
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub id: u64,
    pub url: String,
    pub platform: Platform,
    pub status: DownloadStatus,
    pub video_info: Option<VideoMetadata>,
    pub selected_quality: Option<String>,
    pub download_url: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct Records {
    by_id: HashMap<u64, DownloadRequest>,
    /// Newest record id per URL.
    latest_by_url: HashMap<String, u64>,
}

impl Records {
    fn remove(&mut self, id: u64) {
        if let Some(record) = self.by_id.remove(&id) {
            if self.latest_by_url.get(&record.url) == Some(&id) {
                self.latest_by_url.remove(&record.url);
            }
        }
    }
}

/// In-memory download requests, shared by all request handlers.
///
/// A single record's updates are serialized by the lock and checked against
/// the lifecycle, but nothing is held across a download; overlapping requests
/// on one record race and the later transition is rejected.
pub struct RequestStore {
    records: RwLock<Records>,
    next_id: AtomicU64,
    max_records: usize,
    ttl: Duration,
}

impl RequestStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            records: RwLock::new(Records::default()),
            next_id: AtomicU64::new(1),
            max_records: config.max_records.max(1),
            ttl: Duration::from_secs(config.record_ttl_secs),
        }
    }

    pub async fn create(&self, url: &str, platform: Platform) -> DownloadRequest {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let record = DownloadRequest {
            id,
            url: url.to_string(),
            platform,
            status: DownloadStatus::Pending,
            video_info: None,
            selected_quality: None,
            download_url: None,
            error: None,
            created_at: now,
            updated_at: now,
        };

        let mut records = self.records.write().await;
        // Ids from concurrent creates may land out of order; only move the index forward.
        let newer = records
            .latest_by_url
            .get(url)
            .is_none_or(|current| *current < id);
        if newer {
            records.latest_by_url.insert(url.to_string(), id);
        }
        records.by_id.insert(id, record.clone());
        self.enforce_capacity(&mut records);

        debug!("Created download request {} for {}", id, url);
        record
    }

    pub async fn get(&self, id: u64) -> Option<DownloadRequest> {
        self.records.read().await.by_id.get(&id).cloned()
    }

    pub async fn find_latest_by_url(&self, url: &str) -> Option<DownloadRequest> {
        let records = self.records.read().await;
        records
            .latest_by_url
            .get(url)
            .and_then(|id| records.by_id.get(id))
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.by_id.len()
    }

    /// Applies `f` to the record and refreshes `updated_at`.
    pub async fn update<F>(&self, id: u64, f: F) -> Result<DownloadRequest>
    where
        F: FnOnce(&mut DownloadRequest) -> Result<()>,
    {
        let mut records = self.records.write().await;
        let record = records
            .by_id
            .get_mut(&id)
            .ok_or_else(|| AppError::RequestNotFound(format!("id {}", id)))?;

        f(record)?;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn transition<F>(&self, id: u64, next: DownloadStatus, apply: F) -> Result<DownloadRequest>
    where
        F: FnOnce(&mut DownloadRequest),
    {
        self.update(id, |record| {
            if !record.status.can_move_to(next) {
                return Err(AppError::InvalidTransition {
                    id,
                    from: record.status,
                    to: next,
                });
            }
            record.status = next;
            apply(record);
            Ok(())
        })
        .await
    }

    pub async fn attach_metadata(&self, id: u64, info: VideoMetadata) -> Result<DownloadRequest> {
        self.transition(id, DownloadStatus::Ready, |record| {
            record.video_info = Some(info);
        })
        .await
    }

    pub async fn begin_download(&self, id: u64, quality: &str) -> Result<DownloadRequest> {
        self.transition(id, DownloadStatus::Processing, |record| {
            record.selected_quality = Some(quality.to_string());
        })
        .await
    }

    pub async fn complete(&self, id: u64, download_url: &str) -> Result<DownloadRequest> {
        self.transition(id, DownloadStatus::Completed, |record| {
            record.download_url = Some(download_url.to_string());
        })
        .await
    }

    pub async fn fail(&self, id: u64, message: &str) -> Result<DownloadRequest> {
        self.transition(id, DownloadStatus::Failed, |record| {
            record.error = Some(message.to_string());
        })
        .await
    }

    /// Drops records untouched for longer than the TTL, sparing in-flight downloads.
    /// Returns how many went.
    pub async fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let Ok(ttl) = chrono::Duration::from_std(self.ttl) else {
            return 0;
        };
        let cutoff = now - ttl;

        let mut records = self.records.write().await;
        let expired: Vec<u64> = records
            .by_id
            .values()
            .filter(|record| {
                record.updated_at < cutoff && record.status != DownloadStatus::Processing
            })
            .map(|record| record.id)
            .collect();

        for id in &expired {
            records.remove(*id);
        }

        if !expired.is_empty() {
            info!("Evicted {} expired download requests", expired.len());
        }
        expired.len()
    }

    /// Removes the oldest records, sparing in-flight downloads, until within bounds.
    fn enforce_capacity(&self, records: &mut Records) {
        let overflow = records.by_id.len().saturating_sub(self.max_records);
        if overflow == 0 {
            return;
        }

        let mut candidates: Vec<u64> = records
            .by_id
            .values()
            .filter(|record| record.status != DownloadStatus::Processing)
            .map(|record| record.id)
            .collect();
        candidates.sort_unstable();

        for id in candidates.into_iter().take(overflow) {
            records.remove(id);
        }
        debug!("Store over capacity, evicted up to {} records", overflow);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::QualityOption;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn store() -> RequestStore {
        RequestStore::new(&StoreConfig::default())
    }

    fn metadata() -> VideoMetadata {
        VideoMetadata {
            title: "clip".to_string(),
            duration: "0:10".to_string(),
            thumbnail: String::new(),
            platform: Platform::Youtube,
            qualities: QualityOption::default_set(),
        }
    }

    const URL: &str = "https://www.youtube.com/watch?v=abc123";

    #[tokio::test]
    async fn test_create_then_get_is_pending() {
        let store = store();
        let created = store.create(URL, Platform::Youtube).await;

        let fetched = store.get(created.id).await.unwrap();
        assert_eq!(fetched.status, DownloadStatus::Pending);
        assert_eq!(fetched.url, URL);
        assert_eq!(fetched.platform, Platform::Youtube);
        assert!(fetched.video_info.is_none());
        assert!(fetched.download_url.is_none());
    }

    #[tokio::test]
    async fn test_attach_metadata_makes_ready() {
        let store = store();
        let created = store.create(URL, Platform::Youtube).await;

        let ready = store.attach_metadata(created.id, metadata()).await.unwrap();
        assert_eq!(ready.status, DownloadStatus::Ready);
        assert_eq!(ready.video_info.unwrap().title, "clip");
        assert!(ready.updated_at >= created.updated_at);
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let store = store();
        let id = store.create(URL, Platform::Youtube).await.id;
        store.attach_metadata(id, metadata()).await.unwrap();

        let processing = store.begin_download(id, "720p").await.unwrap();
        assert_eq!(processing.status, DownloadStatus::Processing);
        assert_eq!(processing.selected_quality.as_deref(), Some("720p"));

        let done = store
            .complete(id, "/api/download/youtube_video_1.mp4")
            .await
            .unwrap();
        assert_eq!(done.status, DownloadStatus::Completed);
        assert_eq!(
            done.download_url.as_deref(),
            Some("/api/download/youtube_video_1.mp4")
        );
    }

    #[tokio::test]
    async fn test_processing_cannot_be_skipped() {
        let store = store();
        let id = store.create(URL, Platform::Youtube).await.id;
        store.attach_metadata(id, metadata()).await.unwrap();

        let err = store.complete(id, "/api/download/x.mp4").await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: DownloadStatus::Ready,
                to: DownloadStatus::Completed,
                ..
            }
        ));
        assert_eq!(store.get(id).await.unwrap().status, DownloadStatus::Ready);
    }

    #[tokio::test]
    async fn test_terminal_states_are_final() {
        let store = store();
        let id = store.create(URL, Platform::Youtube).await.id;
        store.attach_metadata(id, metadata()).await.unwrap();
        store.begin_download(id, "audio").await.unwrap();

        let failed = store.fail(id, "network down").await.unwrap();
        assert_eq!(failed.status, DownloadStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("network down"));

        assert!(store.begin_download(id, "720p").await.is_err());
        assert!(store.complete(id, "/api/download/x.mp4").await.is_err());
        assert!(store.fail(id, "again").await.is_err());
        assert!(store.attach_metadata(id, metadata()).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let store = store();
        assert!(store.get(99).await.is_none());
        assert!(matches!(
            store.begin_download(99, "720p").await,
            Err(AppError::RequestNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_find_latest_by_url() {
        let store = store();
        let first = store.create(URL, Platform::Youtube).await;
        let other = store.create("https://youtu.be/other", Platform::Youtube).await;
        let second = store.create(URL, Platform::Youtube).await;

        assert_eq!(store.find_latest_by_url(URL).await.unwrap().id, second.id);
        assert_ne!(first.id, second.id);
        assert_eq!(
            store
                .find_latest_by_url("https://youtu.be/other")
                .await
                .unwrap()
                .id,
            other.id
        );
        assert!(store.find_latest_by_url("https://youtu.be/none").await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_get_unique_ids() {
        let store = Arc::new(store());

        let mut tasks = Vec::new();
        for i in 0..64 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .create(&format!("https://youtu.be/v{}", i), Platform::Youtube)
                    .await
                    .id
            }));
        }

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }

        let unique: HashSet<u64> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 64);
        ids.sort_unstable();
        assert_eq!(ids.first(), Some(&1));
        assert_eq!(ids.last(), Some(&64));
        assert_eq!(store.len().await, 64);

        // later creates keep climbing
        let next = store.create(URL, Platform::Youtube).await;
        assert_eq!(next.id, 65);
    }

    #[tokio::test]
    async fn test_evict_expired() {
        let store = RequestStore::new(&StoreConfig {
            max_records: 100,
            record_ttl_secs: 60,
        });
        let old = store.create(URL, Platform::Youtube).await;

        assert_eq!(store.evict_expired(Utc::now()).await, 0);

        let later = Utc::now() + chrono::Duration::seconds(61);
        assert_eq!(store.evict_expired(later).await, 1);
        assert!(store.get(old.id).await.is_none());
        assert!(store.find_latest_by_url(URL).await.is_none());
    }

    #[tokio::test]
    async fn test_ttl_spares_processing_records() {
        let store = RequestStore::new(&StoreConfig {
            max_records: 100,
            record_ttl_secs: 60,
        });
        let busy = store.create(URL, Platform::Youtube).await;
        store.attach_metadata(busy.id, metadata()).await.unwrap();
        store.begin_download(busy.id, "720p").await.unwrap();
        let idle = store.create("https://youtu.be/idle", Platform::Youtube).await;

        let later = Utc::now() + chrono::Duration::seconds(61);
        assert_eq!(store.evict_expired(later).await, 1);
        assert!(store.get(idle.id).await.is_none());

        let done = store
            .complete(busy.id, "/api/download/youtube_video_1.mp4")
            .await
            .unwrap();
        assert_eq!(done.status, DownloadStatus::Completed);
    }

    #[tokio::test]
    async fn test_capacity_spares_processing_records() {
        let store = RequestStore::new(&StoreConfig {
            max_records: 2,
            record_ttl_secs: 3600,
        });
        let busy = store.create("https://youtu.be/a", Platform::Youtube).await;
        store.attach_metadata(busy.id, metadata()).await.unwrap();
        store.begin_download(busy.id, "720p").await.unwrap();

        let idle = store.create("https://youtu.be/b", Platform::Youtube).await;
        let newest = store.create("https://youtu.be/c", Platform::Youtube).await;

        assert_eq!(store.len().await, 2);
        assert!(store.get(busy.id).await.is_some());
        assert!(store.get(idle.id).await.is_none());
        assert!(store.get(newest.id).await.is_some());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_value(DownloadStatus::Processing).unwrap(),
            "processing"
        );
        assert!(DownloadStatus::Completed.is_terminal());
        assert!(!DownloadStatus::Ready.is_terminal());
    }
}
