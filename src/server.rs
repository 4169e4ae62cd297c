use crate::config::Config;
use crate::db::Db;
use crate::gallery::list_images;
use crate::persistence::restore_state;
use crate::sweeper::spawn_sweeper;
use crate::upload::upload_image;
use axum::extract::DefaultBodyLimit;
use axum::http::header;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::Router;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

const INDEX_HTML: &str = include_str!("../static/index.html");
const GALLERY_HTML: &str = include_str!("../static/gallery.html");
const SCRIPT_JS: &str = include_str!("../static/script.js");

/// Shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Db,
    pub config: Arc<Config>,
}

pub fn router(state: AppState) -> Router {
    let uploads = ServeDir::new(&state.config.upload_dir);
    Router::new()
        .route("/", get(index))
        .route("/gallery", get(gallery))
        .route("/static/script.js", get(script))
        .route("/api/images", get(list_images))
        .route(
            "/upload",
            post(upload_image).layer(DefaultBodyLimit::max(state.config.max_upload_bytes)),
        )
        .nest_service("/uploads", uploads)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn gallery() -> Html<&'static str> {
    Html(GALLERY_HTML)
}

async fn script() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/javascript")], SCRIPT_JS)
}

/// Reconciles on-disk state, starts the expiry sweeper and serves until the
/// listener fails or a shutdown signal arrives.
pub async fn run_server(listener: TcpListener, store: Db, config: Arc<Config>) -> io::Result<()> {
    restore_state(&store, &config).await.map_err(io::Error::other)?;

    let sweeper = spawn_sweeper(store.clone(), config.clone());
    let app = router(AppState { store, config });

    info!("Server listening on {}", listener.local_addr()?);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    sweeper.abort();
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutting down");
}
