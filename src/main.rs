use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

mod api;
mod config;
mod error;
mod media;
mod service;
mod store;
mod utils;

use crate::config::Config;
use crate::media::MediaDispatcher;
use crate::service::VideoService;
use crate::store::RequestStore;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short, long)]
    config: Option<String>,

    /// Address to listen on, overrides the config file
    #[arg(short, long)]
    bind: Option<String>,
}

fn get_config_path(args: &Args) -> Option<String> {
    if let Some(path) = &args.config {
        return Some(path.clone());
    }

    if let Ok(path) = std::env::var("CONFIG_FILE") {
        return Some(path);
    }

    if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
        let config_path = format!("{}/vidgrab/config.toml", xdg_config_home);
        if std::path::Path::new(&config_path).exists() {
            return Some(config_path);
        }
    }

    if let Some(home) = dirs::home_dir() {
        let config_path = format!("{}/.config/vidgrab/config.toml", home.display());
        if std::path::Path::new(&config_path).exists() {
            return Some(config_path);
        }
    }

    None
}

fn load_config(args: &Args) -> Result<(Config, Option<String>)> {
    let path = get_config_path(args);
    let mut config = match &path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => Config::default(),
    };

    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    Ok((config, path))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (config, config_path) = load_config(&args)?;

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    if config.get_logging_format() == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    info!("Starting vidgrab...");
    match &config_path {
        Some(path) => info!("Loaded config from: {}", path),
        None => info!("No config file found, using defaults"),
    }

    tokio::fs::create_dir_all(&config.downloads.dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create download directory {}",
                config.downloads.dir.display()
            )
        })?;

    MediaDispatcher::test_setup(&config).await;

    let dispatcher = MediaDispatcher::new(&config)?;
    let store = Arc::new(RequestStore::new(&config.store));
    let downloads = Arc::new(config.downloads.clone());

    let janitor = api::spawn_janitor(downloads.clone(), store.clone());

    let state = api::AppState {
        service: Arc::new(VideoService::new(dispatcher, store)),
        downloads,
    };
    let result = api::serve(&config, state).await;

    janitor.abort();
    result
}
