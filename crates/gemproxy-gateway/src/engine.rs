use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use http::{HeaderMap, Method, StatusCode};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use gemproxy_credentials::{GeminiCredential, GeminiRotator, VertexCredential, VertexRotator};
use gemproxy_storage::{parse_usage_metadata, AttemptRecord, AttemptStorage};

use crate::classify::{self, Classification, Provider, LRO_POLL_ACTION, LRO_START_ACTION};
use crate::response::{self, GatewayResponse};
use crate::rewrite::{self, AuthHeaders};
use crate::state::AppState;

/// Response bodies are retryable only on this set — see the spec's open
/// question on 403 conflating billing-disabled and per-key-quota.
const RETRYABLE_STATUSES: [u16; 3] = [429, 403, 503];
const TRANSPORT_RETRY_DELAY: Duration = Duration::from_millis(500);
/// Cap on the in-memory telemetry accumulation buffer for streaming responses.
const TELEMETRY_STREAM_CAP: usize = 4 * 1024 * 1024;

#[derive(Clone)]
enum ActiveCredential {
    Gemini(GeminiCredential),
    Vertex(VertexCredential),
}

impl ActiveCredential {
    fn identity(&self) -> String {
        match self {
            ActiveCredential::Gemini(cred) => cred.identity(),
            ActiveCredential::Vertex(cred) => cred.project_id.clone(),
        }
    }
}

pub struct IncomingRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// C6: orchestrates one client request into up to `max_retries` upstream
/// attempts, streams the winning response back, and enqueues exactly one
/// telemetry record in the background.
pub async fn handle_request(state: Arc<AppState>, request: IncomingRequest) -> GatewayResponse {
    let t0 = Instant::now();
    let classification = classify::classify(&request.path);
    let config = state.config();
    let max_retries = config.max_retries.max(1);
    let store_bodies = config.store_request_bodies;

    let pinned_project = if classification.provider == Provider::Vertex
        && classification.action.as_deref() == Some(LRO_POLL_ACTION)
    {
        classify::extract_operation_name_from_request(&request.body)
            .and_then(|op_name| state.lro.lookup(&op_name))
    } else {
        None
    };

    let mut attempt_count = 0u32;
    let mut last_identity = "unknown".to_string();

    for attempt in 1..=max_retries {
        attempt_count = attempt;
        let is_pinned_attempt = attempt == 1 && pinned_project.is_some();

        let credential = match pick_credential(&state, classification.provider, is_pinned_attempt, pinned_project.as_deref()) {
            Ok(credential) => credential,
            Err(PoolEmpty) => {
                record_terminal(
                    &state,
                    &classification,
                    &request,
                    t0,
                    attempt_count,
                    "unknown",
                    503,
                    true,
                    Some("credential pool is empty".to_string()),
                    None,
                    store_bodies,
                );
                return GatewayResponse::service_unavailable(response::EXHAUSTED_BODY);
            }
        };
        last_identity = credential.identity();

        let send_result = send_attempt(&state, &credential, &classification, &request).await;

        match send_result {
            Err(SendError::TokenRefreshFailed) => {
                tracing::warn!(event = "token_refresh_failed", attempt, "vertex token refresh failed, retrying");
                if attempt < max_retries {
                    continue;
                }
                break;
            }
            Err(SendError::Transport) => {
                tracing::warn!(event = "transport_error", attempt, "upstream send failed, retrying");
                if attempt < max_retries {
                    tokio::time::sleep(TRANSPORT_RETRY_DELAY).await;
                    continue;
                }
                break;
            }
            Ok(response) => {
                let status = response.status();
                if RETRYABLE_STATUSES.contains(&status.as_u16()) {
                    if is_pinned_attempt {
                        tracing::warn!(
                            event = "lro_pin_retryable",
                            status = status.as_u16(),
                            "affinity-pinned attempt failed; returning upstream status instead of rotating"
                        );
                        let mut headers = response.headers().clone();
                        rewrite::strip_response_headers(&mut headers);
                        let body = response.bytes().await.unwrap_or_default();
                        record_terminal(
                            &state,
                            &classification,
                            &request,
                            t0,
                            attempt_count,
                            &last_identity,
                            status.as_u16() as i32,
                            true,
                            Some("pinned LRO credential returned a retryable status".to_string()),
                            None,
                            store_bodies,
                        );
                        return GatewayResponse::Buffered { status, headers, body };
                    }
                    let _ = response.bytes().await;
                    tracing::warn!(event = "upstream_retryable", attempt, status = status.as_u16());
                    if attempt < max_retries {
                        continue;
                    }
                    break;
                }

                return finish_successful_attempt(
                    state,
                    classification,
                    request,
                    credential,
                    t0,
                    attempt_count,
                    response,
                    store_bodies,
                )
                .await;
            }
        }
    }

    record_terminal(
        &state,
        &classification,
        &request,
        t0,
        attempt_count,
        &last_identity,
        503,
        true,
        Some("all upstream attempts exhausted".to_string()),
        None,
        store_bodies,
    );
    GatewayResponse::service_unavailable(response::EXHAUSTED_BODY)
}

struct PoolEmpty;

/// §7 treats `token_refresh_failed` and `transport_error` as distinct retry
/// triggers: the former counts as a retry with no backoff, the latter sleeps
/// `TRANSPORT_RETRY_DELAY` first.
enum SendError {
    TokenRefreshFailed,
    Transport,
}

fn pick_credential(
    state: &AppState,
    provider: Provider,
    is_pinned_attempt: bool,
    pinned_project: Option<&str>,
) -> Result<ActiveCredential, PoolEmpty> {
    match provider {
        Provider::Gemini => state.gemini.next().map(ActiveCredential::Gemini).map_err(|_| PoolEmpty),
        Provider::Vertex => {
            if is_pinned_attempt
                && let Some(project_id) = pinned_project
                && let Some(cred) = state.vertex.by_project_id(project_id)
            {
                return Ok(ActiveCredential::Vertex(cred));
            }
            state.vertex.next().map(ActiveCredential::Vertex).map_err(|_| PoolEmpty)
        }
    }
}

async fn send_attempt(
    state: &AppState,
    credential: &ActiveCredential,
    classification: &Classification,
    request: &IncomingRequest,
) -> Result<wreq::Response, SendError> {
    let config = state.config();

    let (url, headers) = match credential {
        ActiveCredential::Gemini(cred) => {
            let query = rewrite::splice_gemini_key(request.query.as_deref(), &cred.api_key);
            let url = format!(
                "{}/{}?{}",
                config.gemini_base_url.trim_end_matches('/'),
                request.path.trim_start_matches('/'),
                query
            );
            let headers = rewrite::build_upstream_headers(&request.headers, AuthHeaders::Gemini);
            (url, headers)
        }
        ActiveCredential::Vertex(cred) => {
            let token = state.tokens.get_token(cred).await.map_err(|err| {
                tracing::warn!(event = "token_refresh_failed", error = %err);
                SendError::TokenRefreshFailed
            })?;
            let rewritten_path = rewrite::rewrite_vertex_project(&request.path, &cred.project_id);
            let url = match &request.query {
                Some(q) if !q.is_empty() => format!(
                    "{}/{}?{}",
                    config.vertex_base_url.trim_end_matches('/'),
                    rewritten_path.trim_start_matches('/'),
                    q
                ),
                _ => format!(
                    "{}/{}",
                    config.vertex_base_url.trim_end_matches('/'),
                    rewritten_path.trim_start_matches('/')
                ),
            };
            let headers = rewrite::build_upstream_headers(
                &request.headers,
                AuthHeaders::Vertex {
                    bearer: token,
                    project_id: cred.project_id.clone(),
                },
            );
            (url, headers)
        }
    };

    let _ = classification;
    let mut builder = state.http.request(request.method.clone(), &url).headers(headers);
    if !request.body.is_empty() {
        builder = builder.body(request.body.clone());
    }

    builder.send().await.map_err(|err| {
        tracing::warn!(event = "transport_error", error = %err);
        SendError::Transport
    })
}

async fn finish_successful_attempt(
    state: Arc<AppState>,
    classification: Classification,
    request: IncomingRequest,
    credential: ActiveCredential,
    t0: Instant,
    attempt_count: u32,
    response: wreq::Response,
    store_bodies: bool,
) -> GatewayResponse {
    let status = response.status();
    let mut headers = response.headers().clone();
    rewrite::strip_response_headers(&mut headers);

    if classification.is_stream {
        stream_and_record(state, classification, request, credential, t0, attempt_count, status, headers, response)
    } else {
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(_) => Bytes::new(),
        };

        if classification.action.as_deref() == Some(LRO_START_ACTION) && status == StatusCode::OK {
            if let Some(op_name) = classify::extract_operation_name_from_response(&body) {
                state.lro.remember(&op_name, &credential.identity());
            } else {
                tracing::warn!(event = "lro_remember_parse_failed");
            }
        }

        let latency_ms = t0.elapsed().as_millis() as i32;
        let usage = parse_usage_metadata(&body);
        let record = build_record(
            &classification,
            &request,
            &credential,
            status.as_u16() as i32,
            latency_ms,
            attempt_count,
            usage,
            false,
            None,
            request.body.len(),
            body.len(),
            store_bodies,
            Some(&body),
        );
        spawn_telemetry(state.storage.clone(), record);

        GatewayResponse::Buffered { status, headers, body }
    }
}

#[allow(clippy::too_many_arguments)]
fn stream_and_record(
    state: Arc<AppState>,
    classification: Classification,
    request: IncomingRequest,
    credential: ActiveCredential,
    t0: Instant,
    attempt_count: u32,
    status: StatusCode,
    headers: HeaderMap,
    response: wreq::Response,
) -> GatewayResponse {
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(16);
    let request_size = request.body.len();
    let storage = state.storage.clone();

    tokio::spawn(async move {
        let mut upstream = response.bytes_stream();
        let mut accumulated = BytesMut::new();
        let mut truncated = false;
        let mut total_len: usize = 0;

        while let Some(item) = upstream.next().await {
            match item {
                Ok(chunk) => {
                    total_len += chunk.len();
                    if !truncated {
                        if accumulated.len() + chunk.len() > TELEMETRY_STREAM_CAP {
                            truncated = true;
                        } else {
                            accumulated.extend_from_slice(&chunk);
                        }
                    }
                    if tx.send(Ok(chunk)).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(std::io::Error::other(err.to_string()))).await;
                    break;
                }
            }
        }

        let latency_ms = t0.elapsed().as_millis() as i32;
        let usage = parse_usage_metadata(&accumulated);
        let error_detail = if truncated {
            Some("telemetry accumulation buffer truncated at 4 MiB".to_string())
        } else {
            None
        };
        let record = build_record(
            &classification,
            &request,
            &credential,
            status.as_u16() as i32,
            latency_ms,
            attempt_count,
            usage,
            false,
            error_detail,
            request_size,
            total_len,
            false,
            None,
        );
        spawn_telemetry(storage, record);
    });

    GatewayResponse::Stream {
        status,
        headers,
        body: Box::pin(ReceiverStream::new(rx)),
    }
}

#[allow(clippy::too_many_arguments)]
fn build_record(
    classification: &Classification,
    request: &IncomingRequest,
    credential: &ActiveCredential,
    status_code: i32,
    latency_ms: i32,
    attempt_count: u32,
    usage: gemproxy_storage::UsageCounts,
    is_error: bool,
    error_detail: Option<String>,
    request_size: usize,
    response_size: usize,
    store_bodies: bool,
    response_body: Option<&Bytes>,
) -> AttemptRecord {
    let request_json = if store_bodies {
        serde_json::from_slice(&request.body).ok()
    } else {
        None
    };
    let response_json = if store_bodies {
        response_body.and_then(|body| serde_json::from_slice(body).ok())
    } else {
        None
    };

    AttemptRecord {
        provider: classification.provider.as_str().to_string(),
        model: classification.model.clone(),
        key_id: credential.identity(),
        action: classification.action.clone(),
        http_method: request.method.to_string(),
        url_path: request.path.clone(),
        client_ip: request.client_ip.clone(),
        user_agent: request.user_agent.clone(),
        status_code,
        latency_ms,
        attempt_count: attempt_count as i32,
        prompt_tokens: usage.prompt_tokens,
        candidates_tokens: usage.candidates_tokens,
        total_tokens: usage.total_tokens,
        request_json,
        response_json,
        is_error: is_error || status_code >= 400,
        error_detail,
        request_size: Some(request_size as i32),
        response_size: Some(response_size as i32),
    }
}

fn spawn_telemetry(storage: Option<Arc<AttemptStorage>>, record: AttemptRecord) {
    let Some(storage) = storage else { return };
    tokio::spawn(async move {
        if let Err(err) = storage.record_attempt(record).await {
            tracing::error!(event = "telemetry_write_failed", error = %err);
        }
    });
}

#[allow(clippy::too_many_arguments)]
fn record_terminal(
    state: &AppState,
    classification: &Classification,
    request: &IncomingRequest,
    t0: Instant,
    attempt_count: u32,
    identity: &str,
    status_code: i32,
    is_error: bool,
    error_detail: Option<String>,
    usage: Option<gemproxy_storage::UsageCounts>,
    store_bodies: bool,
) {
    let record = AttemptRecord {
        provider: classification.provider.as_str().to_string(),
        model: classification.model.clone(),
        key_id: identity.to_string(),
        action: classification.action.clone(),
        http_method: request.method.to_string(),
        url_path: request.path.clone(),
        client_ip: request.client_ip.clone(),
        user_agent: request.user_agent.clone(),
        status_code,
        latency_ms: t0.elapsed().as_millis() as i32,
        attempt_count: attempt_count as i32,
        prompt_tokens: usage.and_then(|u| u.prompt_tokens),
        candidates_tokens: usage.and_then(|u| u.candidates_tokens),
        total_tokens: usage.and_then(|u| u.total_tokens),
        request_json: if store_bodies {
            serde_json::from_slice(&request.body).ok()
        } else {
            None
        },
        response_json: None,
        is_error,
        error_detail,
        request_size: Some(request.body.len() as i32),
        response_size: None,
    };
    spawn_telemetry(state.storage.clone(), record);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_status_set_matches_spec() {
        assert_eq!(RETRYABLE_STATUSES, [429, 403, 503]);
    }
}
