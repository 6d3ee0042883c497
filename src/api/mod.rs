mod contact;
mod files;
mod video;

pub use files::spawn_janitor;

use crate::config::{Config, DownloadsConfig};
use crate::error::AppError;
use crate::service::VideoService;
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<VideoService>,
    pub downloads: Arc<DownloadsConfig>,
}

/// `{ "success": true, "data": ... }`
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    success: bool,
    data: T,
}

pub fn envelope<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
    })
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    code: &'static str,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedPlatform(_)
            | Self::MetadataFetchFailed(_)
            | Self::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            Self::RequestNotFound(_) | Self::FileNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::DownloadFailed(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("{} ({}): {:#}", status, self.kind(), self);
        } else {
            warn!("{} ({}): {}", status, self.kind(), self);
        }

        let body = Json(ErrorBody {
            success: false,
            error: self.to_string(),
            code: self.kind(),
        });
        (status, body).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::ValidationFailed(rejection.body_text())
    }
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    records: usize,
}

async fn health(State(state): State<AppState>) -> Json<Envelope<Health>> {
    envelope(Health {
        status: "ok",
        records: state.service.store().len().await,
    })
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/video/info", post(video::info))
        .route("/video/download", post(video::download))
        .route("/video/status/{id}", get(video::status))
        .route("/download/{filename}", get(files::serve))
        .route("/contact", post(contact::submit));

    Router::new()
        .nest("/api", api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn serve(config: &Config, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;

    info!("Listening on http://{}", config.server.bind);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutting down...");
}
