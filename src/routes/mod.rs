use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::get,
    Extension, Router,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::state::AppState;

pub mod classes;
pub mod ws;

/// JSON bodies here are tiny; relay frames don't go through this limit.
const BODY_LIMIT: usize = 64 * 1024;

pub fn router() -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .nest("/api", classes::router())
        .merge(ws::router())
}

/// The full application: routes, shared components and middleware.
pub fn app(state: AppState) -> Router {
    let app = router()
        .layer(Extension(state.store))
        .layer(Extension(state.admission))
        .layer(Extension(state.hub))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT));
    let app = match state.cors_origin {
        Some(origin) => app.layer(cors(origin)),
        None => app,
    };
    app.layer(TraceLayer::new_for_http())
}

/// The browser client is served from its own origin and sends cookies.
fn cors(origin: HeaderValue) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

async fn health() -> &'static str {
    "LiveClass Backend Running"
}
