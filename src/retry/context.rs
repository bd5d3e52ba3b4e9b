//! Per-request context handed to the retry orchestrator.

use axum::http::{HeaderMap, Method};
use bytes::Bytes;

use crate::upstream::Endpoint;

/// Routing attributes set earlier in the pipeline.
#[derive(Debug, Clone)]
pub struct RouteAttributes {
    /// Retry strategy name; absent means "current".
    pub retry_strategy: Option<String>,
    /// Load balance strategy name.
    pub load_balance: String,
    /// Routing group the endpoints are drawn from.
    pub routing_group: String,
    /// Endpoint the original attempt was dispatched to.
    pub resolved: Endpoint,
}

impl RouteAttributes {
    pub fn new(routing_group: impl Into<String>, resolved: Endpoint) -> Self {
        Self {
            retry_strategy: None,
            load_balance: "random".to_string(),
            routing_group: routing_group.into(),
            resolved,
        }
    }

    pub fn with_retry_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.retry_strategy = Some(strategy.into());
        self
    }

    pub fn with_load_balance(mut self, strategy: impl Into<String>) -> Self {
        self.load_balance = strategy.into();
        self
    }
}

/// Immutable identity of one in-flight request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    /// Path plus query, appended to the endpoint base URL.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Client affinity key, usually the source IP.
    pub affinity_key: Option<String>,
    pub attributes: RouteAttributes,
}

impl RequestContext {
    pub fn new(
        method: Method,
        path_and_query: impl Into<String>,
        body: Bytes,
        attributes: RouteAttributes,
    ) -> Self {
        Self {
            method,
            path_and_query: path_and_query.into(),
            headers: HeaderMap::new(),
            body,
            affinity_key: None,
            attributes,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_affinity_key(mut self, key: impl Into<String>) -> Self {
        self.affinity_key = Some(key.into());
        self
    }

    /// Set or clear the affinity key; `None` leaves balancing without one.
    pub fn with_affinity(mut self, key: Option<String>) -> Self {
        self.affinity_key = key;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RequestContext {
        RequestContext::new(
            Method::GET,
            "/orders?id=7",
            Bytes::new(),
            RouteAttributes::new("orders", Endpoint::new("10.0.0.1:8080")),
        )
    }

    #[test]
    fn test_attribute_defaults() {
        let ctx = context();
        assert_eq!(ctx.attributes.retry_strategy, None);
        assert_eq!(ctx.attributes.load_balance, "random");
        assert_eq!(ctx.attributes.routing_group, "orders");
        assert_eq!(ctx.affinity_key, None);
    }

    #[test]
    fn test_with_affinity_sets_and_clears() {
        let ctx = context().with_affinity(Some("10.0.0.5".to_string()));
        assert_eq!(ctx.affinity_key.as_deref(), Some("10.0.0.5"));

        let ctx = ctx.with_affinity(None);
        assert_eq!(ctx.affinity_key, None);
    }
}
