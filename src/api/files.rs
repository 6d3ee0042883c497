use super::AppState;
use crate::config::DownloadsConfig;
use crate::error::{AppError, Result};
use crate::store::RequestStore;
use anyhow::Context;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
        HeaderMap, HeaderValue, Method,
    },
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::io::ErrorKind;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

fn validate_filename(filename: &str) -> Result<()> {
    let allowed = filename
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if filename.is_empty() || !allowed || filename.starts_with('.') || filename.contains("..") {
        return Err(AppError::ValidationFailed(format!(
            "invalid file name {:?}",
            filename
        )));
    }
    Ok(())
}

fn content_type_for(filename: &str) -> &'static str {
    let is_mp3 = FsPath::new(filename)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mp3"));
    if is_mp3 {
        "audio/mpeg"
    } else {
        "video/mp4"
    }
}

/// Deletes the served file after `delay` once the response body is dropped.
struct CleanupGuard {
    path: PathBuf,
    delay: Duration,
    remaining: u64,
}

impl CleanupGuard {
    fn sent(&mut self, bytes: usize) {
        self.remaining = self.remaining.saturating_sub(bytes as u64);
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let path = std::mem::take(&mut self.path);
        if self.remaining > 0 {
            debug!(
                "Transfer of {} ended with {} bytes unsent",
                path.display(),
                self.remaining
            );
        }

        let delay = self.delay;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    remove_staged_file(&path).await;
                });
            }
            Err(_) => warn!("No runtime to schedule deletion of {}", path.display()),
        }
    }
}

async fn remove_staged_file(path: &FsPath) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Deleted served file {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
    }
}

pub async fn serve(
    State(state): State<AppState>,
    method: Method,
    Path(filename): Path<String>,
) -> Result<Response> {
    validate_filename(&filename)?;
    let path = state.downloads.dir.join(&filename);

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(AppError::FileNotFound(filename)),
        Err(e) => {
            return Err(anyhow::Error::new(e)
                .context(format!("Failed to open {}", path.display()))
                .into())
        }
    };
    let metadata = file
        .metadata()
        .await
        .with_context(|| format!("Failed to read metadata of {}", path.display()))?;
    if !metadata.is_file() {
        return Err(AppError::FileNotFound(filename));
    }

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type_for(&filename)));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    // validate_filename keeps this header-safe
    let disposition = format!("attachment; filename=\"{}\"", filename);
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition).context("Failed to build download header")?,
    );

    // HEAD only describes the file, so it must not trigger deletion
    if method == Method::HEAD {
        return Ok((headers, Body::empty()).into_response());
    }

    info!("Serving {} ({} bytes)", filename, metadata.len());

    let mut guard = CleanupGuard {
        path,
        delay: state.downloads.cleanup_delay(),
        remaining: metadata.len(),
    };
    let stream = ReaderStream::new(file).map(move |chunk| {
        if let Ok(bytes) = &chunk {
            guard.sent(bytes.len());
        }
        chunk
    });

    Ok((headers, Body::from_stream(stream)).into_response())
}

/// Removes staged files older than `max_age`. Returns how many were deleted.
pub async fn sweep_staging_dir(dir: &FsPath, max_age: Duration) -> usize {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to open {} for cleanup: {}", dir.display(), e);
            }
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to list {} for cleanup: {}", dir.display(), e);
                break;
            }
        };

        let path = entry.path();
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete stale file {}: {}", path.display(), e),
        }
    }

    removed
}

/// Periodically sweeps the staging directory and evicts expired requests.
pub fn spawn_janitor(downloads: Arc<DownloadsConfig>, store: Arc<RequestStore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(downloads.sweep_interval());
        loop {
            ticker.tick().await;

            let removed = sweep_staging_dir(&downloads.dir, downloads.max_file_age()).await;
            if removed > 0 {
                info!("Swept {} stale files from {}", removed, downloads.dir.display());
            }
            store.evict_expired(chrono::Utc::now()).await;
        }
    })
}
