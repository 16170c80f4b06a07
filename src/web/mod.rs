// Web server — Axum backend for the landing site.
//
// The static pages are embedded at compile time via include_dir!. The
// /api/* routes serve JSON (plus one SSE stream for the live counter);
// every other path is looked up in the embedded site and 404s if absent.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use include_dir::{include_dir, Dir};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::join::JoinFlow;
use crate::recorder::ClickRecorder;
use crate::signup::FormCapture;
use crate::store::EventLog;

pub mod handlers;

static ASSETS: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/site");

/// Shared application state threaded through all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub log: Arc<dyn EventLog>,
    pub config: Arc<Config>,
    /// `None` when no join link is configured
    pub join: Option<Arc<JoinFlow>>,
    /// `None` when no form-capture endpoint is configured
    pub signup: Option<Arc<FormCapture>>,
}

impl AppState {
    /// Wire the join flow and signup relay from the configuration. Missing
    /// optional settings disable the matching route instead of failing.
    pub fn from_config(config: Config, log: Arc<dyn EventLog>) -> Result<Self> {
        let join = match config.require_join_url() {
            Ok(url) => {
                let recorder = ClickRecorder::from_config(&config, Arc::clone(&log))?;
                Some(Arc::new(JoinFlow::new(url, Arc::new(recorder))))
            }
            Err(e) => {
                warn!("{e}");
                None
            }
        };
        let signup = match config.require_form_endpoint() {
            Ok(endpoint) => Some(Arc::new(FormCapture::new(endpoint)?)),
            Err(e) => {
                warn!("{e}");
                None
            }
        };

        Ok(Self {
            log,
            config: Arc::new(config),
            join,
            signup,
        })
    }
}

/// Start the Axum web server and block until it exits.
pub async fn run_server(
    config: Config,
    log: Arc<dyn EventLog>,
    port: u16,
    bind: &str,
) -> Result<()> {
    let state = AppState::from_config(config, log)?;
    let app = build_router(state);

    let addr = format!("{bind}:{port}");
    info!("Handl site listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    // Peer addresses feed click records when no proxy header is present.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/api/interest", get(handlers::interest::get_interest))
        .route(
            "/api/interest/stream",
            get(handlers::interest::stream_interest),
        )
        .route("/api/join", post(handlers::join::post_join))
        .route("/api/signup", post(handlers::signup::post_signup));

    Router::new()
        .merge(api)
        .fallback(serve_site)
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([header::CONTENT_TYPE]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check — always returns 200 OK.
async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({ "status": "ok" })),
    )
}

/// Serve an embedded page or asset. Directory paths map to their
/// `index.html` (`/privacy/` → `privacy/index.html`).
async fn serve_site(uri: Uri) -> Response {
    let path = uri.path().trim_start_matches('/');
    if path.split('/').any(|segment| segment == "..") {
        return api_error(StatusCode::NOT_FOUND, "Not found");
    }

    let candidates = if path.is_empty() || path.ends_with('/') {
        vec![format!("{path}index.html")]
    } else {
        vec![path.to_string(), format!("{path}/index.html")]
    };

    for candidate in &candidates {
        if let Some(file) = ASSETS.get_file(candidate) {
            return asset_response(file.contents(), candidate);
        }
    }

    api_error(StatusCode::NOT_FOUND, "Not found")
}

fn asset_response(contents: &'static [u8], path: &str) -> Response {
    let mime = mime_type(path);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, HeaderValue::from_static(mime))
        .body(Body::from(contents))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn mime_type(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or("");
    match ext {
        "html" => "text/html; charset=utf-8",
        "js" | "mjs" => "application/javascript",
        "css" => "text/css",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "woff2" => "font/woff2",
        "json" => "application/json",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Typed JSON error response helper.
pub fn api_error(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
}
