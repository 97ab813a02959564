//! Daily upload server binary.
//!
//! Accepts paired front/back image uploads per user, stores them under a
//! per-user directory, and records each upload in that user's collection. The
//! caption and download endpoints read back what an external pipeline adds to
//! those records.

mod background;
mod config;
mod error;
mod http;
mod logging;
mod naming;
mod records;
mod results;
mod staging;
mod storage;
mod upload;

#[cfg(test)]
mod test_support;

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info, info_span};

use crate::background::spawn_background_tasks;
use crate::config::{Args, PUBLIC_UPLOAD_PREFIX, StoreBackend};
use crate::http::{build_cors_layer, forwarded_client_ip};
use crate::records::RecordStore;
use crate::storage::Storage;

/// Builds the router with the three API routes and shared middleware.
pub(crate) fn build_router(
    storage: Arc<Storage>,
    records: Arc<RecordStore>,
    upload_max_size: usize,
) -> Router {
    Router::new()
        .route(
            "/daily_upload",
            post(upload::daily_upload).layer(DefaultBodyLimit::max(upload_max_size)),
        )
        .route("/caption", get(results::get_caption))
        .route("/download", get(results::download_result))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip().to_string());
                    let client_ip = forwarded_client_ip(request.headers())
                        .or(connect_ip)
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(storage))
        .layer(Extension(records))
}

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let storage = Arc::new(Storage::new(
        PathBuf::from(&args.upload_dir),
        PUBLIC_UPLOAD_PREFIX,
    ));
    storage.ensure_root().await?;

    let records = match args.store {
        StoreBackend::Mongo => RecordStore::connect_mongo(&args.mongo_uri)
            .await
            .map_err(|err| {
                error!(error = %err, "mongodb connection failed");
                std::io::Error::other(err.to_string())
            })?,
        StoreBackend::Memory => {
            info!("using in-memory record store");
            RecordStore::in_memory()
        }
    };
    let records = Arc::new(records);

    let mut app = build_router(storage.clone(), records, args.upload_max_size);
    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!(
        upload_dir = %storage.root_path().display(),
        "Server is running on http://{}",
        addr
    );

    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    spawn_background_tasks(storage, Duration::from_secs(args.staged_ttl_secs));
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
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
