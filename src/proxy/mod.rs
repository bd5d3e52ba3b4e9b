//! HTTP gateway module.
//!
//! This module provides the proxy surface: it routes requests to an upstream
//! group, dispatches the first attempt and lets the retry orchestrator take it
//! from there.

pub mod executor;
mod handlers;
mod server;

pub use executor::{HttpExecutor, UpstreamResponse};
pub use handlers::{
    RETRYGATE_LATENCY_MS_HEADER, RETRYGATE_REQUEST_ID_HEADER, RETRYGATE_RETRIES_HEADER,
    RETRYGATE_UPSTREAM_HEADER,
};
pub use server::{build_http_client, create_router, run_server, AppState, RequestId};
