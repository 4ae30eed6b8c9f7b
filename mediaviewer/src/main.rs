mod server;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use mediaviewer_api::AppState;
use mediaviewer_core::{
    logging,
    repository::MediaRepository,
    scanner::Scanner,
    sync::{HeartbeatInferrer, SyncStore},
    thumbs::Thumbnailer,
    Config,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration and fail fast on misconfigurations
    let config = Config::from_env();
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("MediaViewer server starting...");
    info!("HTTP address: {}", config.http_address());
    info!("Media root: {}", config.media.root.display());

    // 3. Open the catalog store and bootstrap its schema
    let connect_options =
        SqliteConnectOptions::from_str(&config.database.url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options)
        .await?;
    let repo = MediaRepository::new(pool);
    repo.init_schema().await?;
    info!("Catalog ready ({} items)", repo.count().await?);

    // 4. Sync hub and DeoVR heartbeat inference
    let store = Arc::new(SyncStore::new());
    let heartbeat = HeartbeatInferrer::new(Arc::clone(&store));
    heartbeat.start();

    // 5. Scanner and thumbnail generator
    let scanner = Arc::new(Scanner::new(
        repo.clone(),
        config.media.root.clone(),
        config.tools.ffprobe_path.clone(),
    ));
    let thumbs = Arc::new(Thumbnailer::new(
        config.tools.ffmpeg_path.clone(),
        config.tools.thumb_cache_dir.clone(),
    ));

    // 6. HTTP router
    let config = Arc::new(config);
    let state = AppState {
        config: Arc::clone(&config),
        repo,
        store,
        heartbeat,
        scanner,
        thumbs,
    };
    let router = mediaviewer_api::create_router(state);

    // 7. Serve until SIGINT/SIGTERM
    server::serve(&config, router).await
}
