//! entity-uploads server binary.
//!
//! Hosts the single-file upload stage behind an Axum router: every
//! configured entity gets a `POST /api/upload/{entity}` route whose files
//! land under `{storage-dir}/{uploads-root}/{entity}/`.

mod atomic;
mod config;
mod error;
mod filter;
mod handlers;
mod http;
mod logging;
mod middleware;
mod slug;
mod storage;
mod upload;

use axum::routing::{get, post};
use axum::{Router, middleware as axum_middleware};
use axum_server::Handle;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info};

use crate::config::{Args, SHUTDOWN_GRACE_SECS};
use crate::filter::MimeTypeFilter;
use crate::http::{build_cors_layer, request_span};
use crate::middleware::{UploadState, single_file_upload};
use crate::slug::TransliterateSlugger;
use crate::storage::LocalStore;
use crate::upload::UploadHandler;

/// 启动服务器并阻塞至关闭。
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let store = Arc::new(LocalStore::new(PathBuf::from(&args.storage_dir)));
    store.ensure_root().await?;
    let entities = args.upload_options();
    info!(
        entities = ?entities.keys().collect::<Vec<_>>(),
        storage_dir = ?store.root_path(),
        uploads_root = args.uploads_root,
        "upload entities configured"
    );
    let handler = Arc::new(UploadHandler::new(
        store,
        Arc::new(MimeTypeFilter),
        Arc::new(TransliterateSlugger),
        &args.uploads_root,
    ));
    let upload_state = UploadState {
        handler,
        entities: Arc::new(entities),
        max_upload_size: args.max_upload_size,
        keep_orphans: args.keep_orphans,
    };

    let uploads = Router::new()
        .route("/api/upload/{entity}", post(handlers::accept_upload))
        .route_layer(axum_middleware::from_fn_with_state(
            upload_state,
            single_file_upload,
        ));

    let mut app = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/version", get(handlers::get_version_info))
        .merge(uploads)
        .fallback(handlers::not_found)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(request_span)
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        );

    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!("Starting upload server at {}", addr);

    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        result = server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
}
