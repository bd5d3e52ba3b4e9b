//! Failover discipline: abandon a failed endpoint and re-resolve a different
//! one for each subsequent attempt.
//!
//! Stages run strictly one after another. Each stage only activates when the
//! attempt before it failed, re-reads the registry, drops every endpoint in
//! the exclusion set and asks the balancer for one of the rest. An empty
//! remainder ends the chain no matter how much budget is left.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use super::{with_timeout, AttemptRecord, Fault, RequestContext, RetryError};
use crate::upstream::{Endpoint, EndpointId, LoadBalancer, UpstreamRegistry};

/// Endpoints already attempted for one logical request.
///
/// Only grows. There is intentionally no way to remove an entry.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    ids: HashSet<EndpointId>,
}

impl ExclusionSet {
    /// Start a set containing the originally dispatched endpoint.
    pub fn seeded(original: EndpointId) -> Self {
        let mut set = Self::default();
        set.insert(original);
        set
    }

    /// Add an endpoint. Returns `false` if it was already excluded.
    pub fn insert(&mut self, id: EndpointId) -> bool {
        self.ids.insert(id)
    }

    pub fn contains(&self, id: &EndpointId) -> bool {
        self.ids.contains(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }

    /// Keep only endpoints not yet attempted.
    pub fn retain_candidates(&self, endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
        endpoints
            .into_iter()
            .filter(|endpoint| !self.contains(&endpoint.id()))
            .collect()
    }
}

/// Collaborators a failover stage consults before dispatching.
pub struct Resolver<'a> {
    pub registry: &'a dyn UpstreamRegistry,
    pub balancer: &'a dyn LoadBalancer,
}

impl Resolver<'_> {
    /// Whether the registry still offers an endpoint outside `exclusion`.
    fn has_candidates(&self, ctx: &RequestContext, exclusion: &ExclusionSet) -> bool {
        self.registry
            .list_endpoints(&ctx.attributes.routing_group)
            .iter()
            .any(|endpoint| !exclusion.contains(&endpoint.id()))
    }

    /// Pick the next endpoint and record it in `exclusion` before it is used.
    fn next_endpoint(
        &self,
        ctx: &RequestContext,
        exclusion: &mut ExclusionSet,
    ) -> Result<Endpoint, RetryError> {
        let group = &ctx.attributes.routing_group;
        let no_healthy = |exclusion: &ExclusionSet| RetryError::NoHealthyUpstream {
            group: group.clone(),
            excluded: exclusion.len(),
        };

        let candidates = exclusion.retain_candidates(self.registry.list_endpoints(group));
        if candidates.is_empty() {
            return Err(no_healthy(exclusion));
        }

        let selected = self
            .balancer
            .select(
                &candidates,
                &ctx.attributes.load_balance,
                ctx.affinity_key.as_deref(),
            )
            .ok_or_else(|| no_healthy(exclusion))?;

        // A balancer handing back an excluded endpoint counts as no selection.
        if !exclusion.insert(selected.id()) {
            return Err(no_healthy(exclusion));
        }
        Ok(selected)
    }
}

/// Drive `first` and, on any fault, up to `budget` failover stages.
///
/// `send` dispatches the original request against a newly selected endpoint.
/// Every attempt, including `first`, is bounded by `timeout`. Failed attempts
/// are appended to `attempts`. On success the serving endpoint is returned
/// alongside the value.
///
/// When the last stage fails and the group has no untried endpoint left, the
/// chain ends with `NoHealthyUpstream` rather than the last fault.
pub async fn resend<T, F, S, Fut>(
    resolver: Resolver<'_>,
    first: F,
    ctx: &RequestContext,
    timeout: Duration,
    budget: u32,
    send: S,
    attempts: &mut Vec<AttemptRecord>,
) -> Result<(T, EndpointId), RetryError>
where
    F: Future<Output = Result<T, Fault>>,
    S: Fn(Endpoint) -> Fut,
    Fut: Future<Output = Result<T, Fault>>,
{
    let mut target = ctx.attributes.resolved.id();
    let mut exclusion = ExclusionSet::seeded(target.clone());
    let mut result = with_timeout(first, timeout).await;

    for stage in 1..=budget {
        let fault = match result {
            Ok(value) => return Ok((value, target)),
            Err(fault) => fault,
        };

        attempts.push(AttemptRecord::new(target.clone(), fault.kind));
        tracing::warn!(
            endpoint = %target,
            attempt = stage,
            kind = %fault.kind,
            error = %fault.message,
            "Attempt failed, failing over"
        );

        let next = match resolver.next_endpoint(ctx, &mut exclusion) {
            Ok(next) => next,
            Err(err) => {
                tracing::error!(
                    group = %ctx.attributes.routing_group,
                    attempt = stage,
                    excluded = exclusion.len(),
                    "No healthy upstream left after failover"
                );
                return Err(err);
            }
        };

        target = next.id();
        tracing::debug!(endpoint = %target, stage, "Dispatching failover attempt");
        result = with_timeout(send(next), timeout).await;
    }

    match result {
        Ok(value) => Ok((value, target)),
        Err(fault) => {
            attempts.push(AttemptRecord::new(target.clone(), fault.kind));
            tracing::error!(
                endpoint = %target,
                attempt = budget + 1,
                kind = %fault.kind,
                error = %fault.message,
                "Failover chain exhausted"
            );
            // Every endpoint of the group has now been tried and failed.
            if budget > 0 && !resolver.has_candidates(ctx, &exclusion) {
                return Err(RetryError::NoHealthyUpstream {
                    group: ctx.attributes.routing_group.clone(),
                    excluded: exclusion.len(),
                });
            }
            Err(RetryError::from_fault(target, fault))
        }
    }
}
