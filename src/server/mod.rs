mod error;
mod handlers;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use miette::{Context, IntoDiagnostic, Result};
use tokio::{net::TcpListener, signal};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
};
use tracing::{debug, info, warn};

use crate::{config::Settings, database::HistoryLog, pipeline::Pipeline};

pub use error::ApiError;

/// Period of the progress events
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Everything the request handlers share
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub settings: Arc<Settings>,
    pub history: Option<Arc<dyn HistoryLog>>,
    pub progress_interval: Duration,
}

impl AppState {
    pub fn new(
        pipeline: Pipeline,
        settings: Settings,
        history: Option<Arc<dyn HistoryLog>>,
    ) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            settings: Arc::new(settings),
            history,
            progress_interval: PROGRESS_INTERVAL,
        }
    }

    #[cfg(test)]
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/video-info", get(handlers::video_info))
        .route(
            "/api/download",
            get(handlers::download_get).post(handlers::download_post),
        )
        .route("/api/get-title", post(handlers::get_title))
        .route("/api/progress/{video_id}", get(handlers::progress))
        .route("/api/history", get(handlers::history));

    let app = match &state.settings.static_dir {
        Some(dir) => {
            debug!("Serving static files from {}", dir.display());
            api.fallback_service(ServeDir::new(dir))
        }
        None => api,
    };

    let cors = cors_layer(state.settings.allowed_origin.as_deref());
    app.layer(middleware::from_fn_with_state(
        state.clone(),
        reject_foreign_origin,
    ))
    .layer(cors)
    .with_state(state)
}

fn cors_layer(allowed_origin: Option<&str>) -> CorsLayer {
    let allow_origin = match allowed_origin.and_then(|o| HeaderValue::from_str(o).ok()) {
        Some(origin) => AllowOrigin::exact(origin),
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([header::CONTENT_DISPOSITION, header::CONTENT_LENGTH])
}

/// Whether a request may go through. Requests without an `Origin` are same-origin.
fn origin_allowed(allowed_origin: Option<&str>, origin: Option<&HeaderValue>) -> bool {
    match (allowed_origin, origin) {
        (None, _) | (_, None) => true,
        (Some(allowed), Some(origin)) => origin
            .to_str()
            .is_ok_and(|origin| origin.trim_end_matches('/') == allowed.trim_end_matches('/')),
    }
}

async fn reject_foreign_origin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let origin = request.headers().get(header::ORIGIN);
    if !origin_allowed(state.settings.allowed_origin.as_deref(), origin) {
        warn!("Rejecting request from origin {origin:?}");
        return ApiError::forbidden("Origin not allowed").into_response();
    }
    next.run(request).await
}

/// Listen until Ctrl-C
pub async fn serve(state: AppState) -> Result<()> {
    let addr = SocketAddr::new(state.settings.host, state.settings.port);
    let listener = TcpListener::bind(addr)
        .await
        .into_diagnostic()
        .wrap_err_with(|| format!("Could not listen on {addr}"))?;
    info!("Listening on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()
        .wrap_err("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutting down, waiting for the running requests"),
        Err(err) => {
            warn!("Could not listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_check() {
        let allowed = Some("http://localhost:8080");
        let origin = |o: &'static str| HeaderValue::from_static(o);

        assert!(origin_allowed(allowed, None));
        assert!(origin_allowed(allowed, Some(&origin("http://localhost:8080"))));
        assert!(!origin_allowed(allowed, Some(&origin("https://evil.example"))));
        assert!(!origin_allowed(allowed, Some(&origin("http://localhost:8081"))));
        assert!(origin_allowed(None, Some(&origin("https://anything.example"))));
    }
}
