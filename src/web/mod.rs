//! The HTTP/1.1 server for UPnP control and media transport.

pub mod handlers;
pub mod headers;

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Router,
};
use tokio::net::TcpListener;
use tracing::warn;

use crate::error::AppError;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/location/yada.xml", get(handlers::device_description))
        .route("/cds.xml", get(handlers::cds_scpd))
        .route("/cms.xml", get(handlers::cms_scpd))
        .route(
            "/cds/control/ContentDirectory1",
            post(handlers::cds_control),
        )
        .route(
            "/cds/event/ContentDirectory1",
            any(handlers::event_not_implemented),
        )
        .route(
            "/cms/control/ConnectionManager1",
            post(handlers::cms_control),
        )
        .route(
            "/cms/event/ConnectionManager1",
            any(handlers::event_not_implemented),
        )
        .fallback(handlers::serve_resource)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            enforce_allowed_peers,
        ))
        .layer(middleware::from_fn(dlna_response_headers))
        .with_state(state)
}

/// Serve until the listener is torn down. The caller binds first so the
/// chosen port can be advertised before any request arrives.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let app = create_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

/// RFC 1123 time, always GMT with English day and month names.
pub fn http_date() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Stamp every response with the mandatory transport headers. Persistent
/// connections are unsupported, so each response announces the close and
/// the stack hangs up after writing it.
async fn dlna_response_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    headers.insert(header::SERVER, HeaderValue::from_static("YADA-HTTP/1.0"));
    headers.insert(header::HeaderName::from_static("ext"), HeaderValue::from_static(""));
    if let Ok(date) = HeaderValue::from_str(&http_date()) {
        headers.insert(header::DATE, date);
    }
    response
}

/// Reject peers outside the allowed list when enforcement is on.
async fn enforce_allowed_peers(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.peer_allowed(addr.ip()) {
        warn!("rejecting request from {addr}: not in allowed list");
        return AppError::Forbidden.into_response();
    }
    next.run(request).await
}
