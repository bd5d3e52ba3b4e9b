//! Retry and failover orchestration for proxied requests.
//!
//! The orchestrator takes an attempt that is already in flight and applies
//! one of two disciplines, chosen by the request's retry strategy attribute:
//! - `current` (default): retry the same endpoint with jittered exponential backoff,
//!   transient faults only
//! - anything else: fail over to a different endpoint per attempt, never reusing one
//!
//! Both are bounded by the retry budget; every attempt is bounded by its own timeout.

pub mod backoff;
mod context;
pub mod failover;
mod fault;

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use backoff::BackoffPolicy;
pub use context::{RequestContext, RouteAttributes};
pub use failover::ExclusionSet;
pub use fault::{Fault, FaultKind, RetryError};

use crate::upstream::{Endpoint, EndpointId, LoadBalancer, UpstreamRegistry};

/// Strategy name selecting the backoff discipline.
pub const CURRENT_STRATEGY: &str = "current";

/// Strategy name selecting the failover discipline.
pub const FAILOVER_STRATEGY: &str = "failover";

/// Retry discipline applied to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Backoff-retry against the same endpoint.
    Current,
    /// Re-resolve a different endpoint per attempt.
    Failover,
}

impl RetryStrategy {
    /// Dispatch rule: absent or "current" is backoff, every other name is failover.
    pub fn from_name(name: Option<&str>) -> Self {
        match name.map(str::trim) {
            None | Some(CURRENT_STRATEGY) => Self::Current,
            Some(_) => Self::Failover,
        }
    }

    /// Strict parse for configuration validation.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            CURRENT_STRATEGY => Some(Self::Current),
            FAILOVER_STRATEGY => Some(Self::Failover),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Current => CURRENT_STRATEGY,
            Self::Failover => FAILOVER_STRATEGY,
        }
    }
}

/// Performs the network call for one attempt.
pub trait RequestExecutor: Send + Sync {
    type Response: Send;

    fn execute<'a>(
        &'a self,
        endpoint: Endpoint,
        ctx: &'a RequestContext,
    ) -> BoxFuture<'a, Result<Self::Response, Fault>>;
}

/// Record of a single failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub endpoint: EndpointId,
    pub kind: FaultKind,
}

impl AttemptRecord {
    pub fn new(endpoint: EndpointId, kind: FaultKind) -> Self {
        Self { endpoint, kind }
    }
}

/// Final outcome of a retried request plus the trail that led to it.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, RetryError>,
    /// Failed attempts in the order they happened.
    pub attempts: Vec<AttemptRecord>,
    /// Endpoint that produced the successful response.
    pub served_by: Option<EndpointId>,
}

/// Format attempt records into a retries header value.
///
/// Format: `"2/10.0.0.1:8080, 1/10.0.0.2:8080"`, count of failed attempts per
/// endpoint in first-appearance order. `None` when nothing failed.
pub fn format_retries_header(attempts: &[AttemptRecord]) -> Option<String> {
    if attempts.is_empty() {
        return None;
    }
    let mut counts: Vec<(&EndpointId, u32)> = Vec::new();
    for attempt in attempts {
        if let Some(entry) = counts.iter_mut().find(|(id, _)| *id == &attempt.endpoint) {
            entry.1 += 1;
        } else {
            counts.push((&attempt.endpoint, 1));
        }
    }
    Some(
        counts
            .iter()
            .map(|(id, count)| format!("{}/{}", count, id))
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// Bound an attempt by `timeout`, turning expiry into a `Timeout` fault.
pub(crate) async fn with_timeout<T, F>(attempt: F, timeout: Duration) -> Result<T, Fault>
where
    F: Future<Output = Result<T, Fault>>,
{
    match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(Fault::new(
            FaultKind::Timeout,
            format!("Response took longer than timeout: {:?}", timeout),
        )),
    }
}

/// Owns the retry policy and the collaborators each attempt consults.
pub struct RetryOrchestrator<X> {
    registry: Arc<dyn UpstreamRegistry>,
    balancer: Arc<dyn LoadBalancer>,
    executor: X,
    backoff: BackoffPolicy,
}

impl<X: RequestExecutor> RetryOrchestrator<X> {
    pub fn new(
        registry: Arc<dyn UpstreamRegistry>,
        balancer: Arc<dyn LoadBalancer>,
        executor: X,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            registry,
            balancer,
            executor,
            backoff,
        }
    }

    /// The executor used for re-sends, also usable for the first dispatch.
    pub fn executor(&self) -> &X {
        &self.executor
    }

    /// Apply retries/failover to `pending`, the first attempt already dispatched
    /// against `ctx.attributes.resolved`.
    ///
    /// Worst-case latency is bounded by
    /// `(budget + 1) * (timeout + selection cost + backoff delay)`.
    pub async fn retry<F>(
        &self,
        pending: F,
        ctx: &RequestContext,
        timeout: Duration,
        budget: u32,
    ) -> RetryOutcome<X::Response>
    where
        F: Future<Output = Result<X::Response, Fault>> + Send,
    {
        let strategy = RetryStrategy::from_name(ctx.attributes.retry_strategy.as_deref());
        let mut attempts = Vec::new();

        tracing::debug!(
            group = %ctx.attributes.routing_group,
            strategy = strategy.as_str(),
            budget,
            timeout_ms = timeout.as_millis() as u64,
            "Applying retry strategy"
        );

        let result = match strategy {
            RetryStrategy::Current => {
                let endpoint = ctx.attributes.resolved.id();
                backoff::retry_in_place(
                    &self.backoff,
                    pending,
                    &endpoint,
                    timeout,
                    budget,
                    || self.executor.execute(ctx.attributes.resolved.clone(), ctx),
                    &mut attempts,
                )
                .await
                .map(|value| (value, endpoint))
            }
            RetryStrategy::Failover => {
                let resolver = failover::Resolver {
                    registry: self.registry.as_ref(),
                    balancer: self.balancer.as_ref(),
                };
                failover::resend(
                    resolver,
                    pending,
                    ctx,
                    timeout,
                    budget,
                    |endpoint| self.executor.execute(endpoint, ctx),
                    &mut attempts,
                )
                .await
            }
        };

        match result {
            Ok((value, served_by)) => RetryOutcome {
                result: Ok(value),
                attempts,
                served_by: Some(served_by),
            },
            Err(err) => RetryOutcome {
                result: Err(err),
                attempts,
                served_by: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(endpoint: &str) -> AttemptRecord {
        AttemptRecord::new(EndpointId::parse(endpoint), FaultKind::ReadTimeout)
    }

    #[test]
    fn test_strategy_dispatch() {
        assert_eq!(RetryStrategy::from_name(None), RetryStrategy::Current);
        assert_eq!(
            RetryStrategy::from_name(Some("current")),
            RetryStrategy::Current
        );
        assert_eq!(
            RetryStrategy::from_name(Some("failover")),
            RetryStrategy::Failover
        );
        // Any non-"current" name selects failover
        assert_eq!(
            RetryStrategy::from_name(Some("anything")),
            RetryStrategy::Failover
        );
    }

    #[test]
    fn test_strategy_strict_parse() {
        assert_eq!(RetryStrategy::parse("failover"), Some(RetryStrategy::Failover));
        assert_eq!(RetryStrategy::parse("current"), Some(RetryStrategy::Current));
        assert_eq!(RetryStrategy::parse("anything"), None);
    }

    #[test]
    fn test_format_retries_header_empty() {
        assert_eq!(format_retries_header(&[]), None);
    }

    #[test]
    fn test_format_retries_header_single_endpoint() {
        let attempts = vec![record("10.0.0.1:8080"), record(" 10.0.0.1:8080")];
        assert_eq!(
            format_retries_header(&attempts),
            Some("2/10.0.0.1:8080".to_string())
        );
    }

    #[test]
    fn test_format_retries_header_multiple_endpoints() {
        let attempts = vec![
            record("10.0.0.1:8080"),
            record("10.0.0.2:8080"),
            record("10.0.0.1:8080"),
        ];
        assert_eq!(
            format_retries_header(&attempts),
            Some("2/10.0.0.1:8080, 1/10.0.0.2:8080".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_maps_expiry() {
        let result: Result<(), Fault> = with_timeout(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            Duration::from_secs(1),
        )
        .await;

        let fault = result.unwrap_err();
        assert_eq!(fault.kind, FaultKind::Timeout);
        assert!(fault.message.contains("longer than timeout"));
    }
}
