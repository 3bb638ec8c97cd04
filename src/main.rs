mod admission;
mod auth;
mod breaker;
mod build;
mod config;
mod duration;
mod error;
mod evictor;
mod ffmpeg;
mod handlers;
mod id;
mod layout;
mod logging;
mod mp4;
mod parts;
mod preflight;
mod progress;
mod publish;
mod receiver;
mod registry;
mod request_id;
mod source;
mod state;
mod supervisor;

use std::sync::Arc;

use anyhow::Result;
use axum::middleware;
use axum::routing::{delete, get};
use axum::Router;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::{Config, RawConfig};
use crate::receiver::{HttpReceiverClient, ReceiverClient, StubReceiverClient};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let raw = RawConfig::parse();
    let cfg = Arc::new(Config::from_raw(raw)?);

    tokio::fs::create_dir_all(&cfg.hls_root).await?;
    tokio::fs::create_dir_all(cfg.data_dir.join("vod-cache")).await?;

    if let Err(e) = ffmpeg::check_ffmpeg(&cfg.transcoder_bin).await {
        warn!(error = %e, "ffmpeg sanity check failed, continuing anyway");
    }

    let receiver: Arc<dyn ReceiverClient> = if cfg.receiver_authority.is_empty() {
        warn!("no RECEIVER_AUTHORITY configured, using a stub receiver client");
        Arc::new(StubReceiverClient)
    } else {
        Arc::new(HttpReceiverClient::new(
            cfg.receiver_authority.clone(),
            cfg.receiver_stream_port,
            cfg.receiver_user.clone(),
            cfg.receiver_password.clone(),
            cfg.preflight_timeout,
        ))
    };

    let state = AppState::new(cfg.clone(), receiver);

    tokio::spawn(evictor::run(
        cfg.hls_root.clone(),
        cfg.data_dir.clone(),
        cfg.vod_cache_ttl,
        cfg.evictor_min_free_bytes,
        cfg.evictor_target_freed_bytes,
        cfg.evictor_interval,
        state.registry.clone(),
        state.shutdown.clone(),
    ));

    let app = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/api/v3/recordings", get(handlers::list))
        .route("/api/v3/vod/{id}", get(handlers::playback_info))
        .route("/api/v3/recordings/{id}/playlist.m3u8", get(handlers::playlist))
        .route("/api/v3/recordings/{id}/timeshift.m3u8", get(handlers::timeshift))
        .route("/api/v3/recordings/{id}/stream.mp4", get(handlers::stream_mp4))
        .route("/api/v3/recordings/{id}/status", get(handlers::status))
        .route("/api/v3/recordings/{id}/{segment}", get(handlers::segment))
        .route("/api/v3/recordings/{id}", delete(handlers::delete))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id::attach))
        .layer(middleware::from_fn(auth::pass_through))
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    let addr: std::net::SocketAddr = cfg.bind_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("recording gateway listening at http://{addr}");

    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
