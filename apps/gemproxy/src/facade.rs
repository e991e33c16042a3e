use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::any;
use axum::Router;
use gemproxy_gateway::state::AppState;
use gemproxy_gateway::{GatewayResponse, IncomingRequest};
use tower_http::cors::{Any, CorsLayer};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", any(health))
        .route("/v1/{*rest}", any(gateway))
        .route("/v1beta/{*rest}", any(gateway))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(state, ip_allow_list))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn ip_allow_list(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let config = state.config();
    let client_ip = resolve_client_ip(&headers, config.trust_proxy_headers, peer);
    if !config.ip_allowed(&client_ip) {
        return gateway_response_into_axum(GatewayResponse::forbidden(
            gemproxy_gateway::response::FORBIDDEN_BODY,
        ));
    }
    next.run(request).await
}

/// §4.8: trusted proxy headers first, then the directly-connected socket peer,
/// matching the original's `getattr(request.client, "host", "unknown")` fallback.
fn resolve_client_ip(headers: &HeaderMap, trust_proxy_headers: bool, peer: SocketAddr) -> String {
    if trust_proxy_headers {
        if let Some(forwarded) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
        {
            if let Some(first) = forwarded.split(',').next() {
                return first.trim().to_string();
            }
        }
        if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
            return real_ip.trim().to_string();
        }
    }
    peer.ip().to_string()
}

async fn gateway(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return (StatusCode::BAD_REQUEST, format!("failed to read request body: {err}"))
                .into_response();
        }
    };

    let client_ip = resolve_client_ip(&parts.headers, state.config().trust_proxy_headers, peer);
    let user_agent = parts
        .headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let incoming = IncomingRequest {
        method: parts.method,
        path: parts.uri.path().trim_start_matches('/').to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers,
        body,
        client_ip: Some(client_ip),
        user_agent,
    };

    gateway_response_into_axum(gemproxy_gateway::handle_request(state, incoming).await)
}

fn gateway_response_into_axum(response: GatewayResponse) -> Response {
    match response {
        GatewayResponse::Buffered { status, headers, body } => {
            let mut resp = Response::new(Body::from(body));
            *resp.status_mut() = status;
            *resp.headers_mut() = headers;
            resp
        }
        GatewayResponse::Stream { status, headers, body } => {
            let mut resp = Response::new(Body::from_stream(body));
            *resp.status_mut() = status;
            *resp.headers_mut() = headers;
            resp
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    let db_ok = match &state.storage {
        Some(storage) => storage.health().await.is_ok(),
        None => false,
    };
    let gemini_keys = state.gemini.count();
    let vertex_credentials = state.vertex.count();

    let status = if db_ok && (gemini_keys > 0 || vertex_credentials > 0) {
        "healthy"
    } else if db_ok {
        "degraded"
    } else {
        "unhealthy"
    };

    Json(serde_json::json!({
        "status": status,
        "database": db_ok,
        "gemini_keys": gemini_keys,
        "vertex_credentials": vertex_credentials,
    }))
    .into_response()
}
