//! HTTP request handlers.

use axum::{
    body::Body,
    extract::{ConnectInfo, Extension, State},
    http::{HeaderMap, HeaderName, Method, Uri},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use std::net::SocketAddr;

use super::executor::{header_value, relayed_headers, UpstreamResponse};
use super::server::{AppState, RequestId};
use crate::error::{Error, Result};
use crate::retry::{
    format_retries_header, AttemptRecord, RequestContext, RequestExecutor, RouteAttributes,
};
use crate::upstream::{EndpointId, LoadBalancer, UpstreamRegistry};

/// Response header: correlation ID (UUID v4).
pub const RETRYGATE_REQUEST_ID_HEADER: &str = "x-retrygate-request-id";
/// Response header: endpoint that served the request.
pub const RETRYGATE_UPSTREAM_HEADER: &str = "x-retrygate-upstream";
/// Response header: failed attempts per endpoint, e.g. "1/10.0.0.1:8080".
pub const RETRYGATE_RETRIES_HEADER: &str = "x-retrygate-retries";
/// Response header: wall-clock latency in milliseconds (integer).
pub const RETRYGATE_LATENCY_MS_HEADER: &str = "x-retrygate-latency-ms";

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Result of proxying one request, with the metadata reported in headers.
struct ProxyOutcome {
    result: Result<UpstreamResponse>,
    attempts: Vec<AttemptRecord>,
    served_by: Option<EndpointId>,
}

impl ProxyOutcome {
    fn failed(error: Error) -> Self {
        Self {
            result: Err(error),
            attempts: Vec::new(),
            served_by: None,
        }
    }
}

/// Client affinity key: first `X-Forwarded-For` hop, else the peer IP.
fn affinity_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

/// Attach retrygate metadata headers to a response.
///
/// The upstream header is only present when some endpoint served the request;
/// the retries header only when at least one attempt failed.
fn attach_headers(
    response: &mut Response,
    request_id: &str,
    latency_ms: u64,
    served_by: Option<&EndpointId>,
    attempts: &[AttemptRecord],
) {
    let headers = response.headers_mut();

    if let Some(value) = header_value(request_id) {
        headers.insert(HeaderName::from_static(RETRYGATE_REQUEST_ID_HEADER), value);
    }
    headers.insert(
        HeaderName::from_static(RETRYGATE_LATENCY_MS_HEADER),
        latency_ms.into(),
    );
    if let Some(value) = served_by.and_then(|id| header_value(id.as_str())) {
        headers.insert(HeaderName::from_static(RETRYGATE_UPSTREAM_HEADER), value);
    }
    if let Some(value) = format_retries_header(attempts).and_then(|v| header_value(&v)) {
        headers.insert(HeaderName::from_static(RETRYGATE_RETRIES_HEADER), value);
    }
}

/// Fallback handler: proxy any request to its routing group.
pub async fn proxy(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = std::time::Instant::now();
    let correlation_id = request_id.0.to_string();
    let affinity = affinity_key(&headers, connect_info.map(|ConnectInfo(addr)| addr));

    tracing::info!(
        request_id = %correlation_id,
        method = %method,
        path = %uri.path(),
        "Received proxied request"
    );

    let outcome = execute_request(&state, method, &uri, headers, body, affinity).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    match &outcome.result {
        Ok(upstream) => tracing::info!(
            request_id = %correlation_id,
            status = upstream.status.as_u16(),
            upstream = ?outcome.served_by.as_ref().map(EndpointId::as_str),
            failed_attempts = outcome.attempts.len(),
            latency_ms,
            "Request completed"
        ),
        Err(err) => tracing::warn!(
            request_id = %correlation_id,
            status = err.status().as_u16(),
            failed_attempts = outcome.attempts.len(),
            latency_ms,
            error = %err,
            "Request failed"
        ),
    }

    let ProxyOutcome {
        result,
        attempts,
        served_by,
    } = outcome;
    let mut response = match result {
        Ok(upstream) => (
            upstream.status,
            relayed_headers(&upstream.headers),
            Body::from(upstream.body),
        )
            .into_response(),
        Err(err) => err.into_response(),
    };

    attach_headers(
        &mut response,
        &correlation_id,
        latency_ms,
        served_by.as_ref(),
        &attempts,
    );
    response
}

/// Resolve the routing group, dispatch the first attempt and hand it to the orchestrator.
async fn execute_request(
    state: &AppState,
    method: Method,
    uri: &Uri,
    headers: HeaderMap,
    body: Bytes,
    affinity: Option<String>,
) -> ProxyOutcome {
    let path = uri.path();
    let Some(group) = state.config.find_group(path) else {
        return ProxyOutcome::failed(Error::NoRoute {
            path: path.to_string(),
        });
    };

    let endpoints = state.registry.list_endpoints(&group.id);
    let Some(initial) = state
        .balancer
        .select(&endpoints, &group.load_balance, affinity.as_deref())
    else {
        tracing::warn!(group = %group.id, "No endpoint available for initial attempt");
        return ProxyOutcome::failed(Error::NoUpstream {
            group: group.id.clone(),
        });
    };

    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.to_string());

    let attributes = RouteAttributes::new(group.id.clone(), initial.clone())
        .with_retry_strategy(group.retry_strategy.clone())
        .with_load_balance(group.load_balance.clone());
    let ctx = RequestContext::new(method, path_and_query, body, attributes)
        .with_headers(headers)
        .with_affinity(affinity);

    tracing::debug!(
        group = %group.id,
        endpoint = %initial.id(),
        "Dispatching initial attempt"
    );

    let executor = state.orchestrator.executor();
    let pending = executor.execute(initial, &ctx);
    let outcome = state
        .orchestrator
        .retry(pending, &ctx, group.timeout(), group.retry)
        .await;

    ProxyOutcome {
        result: outcome.result.map_err(Error::from),
        attempts: outcome.attempts,
        served_by: outcome.served_by,
    }
}

/// Handle GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "retrygate",
        "groups": state.config.upstreams.len()
    }))
}

/// Handle GET /upstreams
pub async fn list_upstreams(State(state): State<AppState>) -> impl IntoResponse {
    let groups: Vec<serde_json::Value> = state
        .config
        .upstreams
        .iter()
        .map(|group| {
            let endpoints: Vec<serde_json::Value> = state
                .registry
                .all_endpoints(&group.id)
                .iter()
                .map(|e| {
                    serde_json::json!({
                        "url": e.url,
                        "id": e.id().as_str(),
                        "weight": e.weight,
                        "status": e.status,
                    })
                })
                .collect();
            serde_json::json!({
                "id": group.id,
                "prefix": group.prefix,
                "load_balance": group.load_balance,
                "retry_strategy": group.retry_strategy,
                "retry": group.retry,
                "timeout_ms": group.timeout_ms,
                "endpoints": endpoints,
            })
        })
        .collect();

    Json(serde_json::json!({ "upstreams": groups }))
}
