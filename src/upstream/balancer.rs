//! Load balancing over a candidate list.

use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::Endpoint;

/// Picks one endpoint out of a candidate list.
pub trait LoadBalancer: Send + Sync {
    /// Select an endpoint using the named strategy and optional affinity key.
    ///
    /// Returns `None` when the list is empty or nothing qualifies.
    fn select(
        &self,
        endpoints: &[Endpoint],
        strategy: &str,
        affinity_key: Option<&str>,
    ) -> Option<Endpoint>;
}

/// Supported balancing strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceStrategy {
    /// Weighted random.
    Random,
    /// Rotate through candidates.
    RoundRobin,
    /// Hash the affinity key onto the candidates.
    Hash,
}

impl BalanceStrategy {
    /// Parse a configured strategy name.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "random" => Some(Self::Random),
            "round_robin" | "roundRobin" => Some(Self::RoundRobin),
            "hash" => Some(Self::Hash),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::RoundRobin => "round_robin",
            Self::Hash => "hash",
        }
    }
}

/// Default balancer dispatching on [`BalanceStrategy`].
#[derive(Debug, Default)]
pub struct StrategyBalancer {
    cursor: AtomicUsize,
}

impl StrategyBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    fn random(&self, endpoints: &[Endpoint]) -> Option<Endpoint> {
        let total: u64 = endpoints.iter().map(|e| e.weight as u64).sum();
        let mut rng = rand::thread_rng();
        if total == 0 {
            return endpoints.get(rng.gen_range(0..endpoints.len())).cloned();
        }
        let mut point = rng.gen_range(0..total);
        for endpoint in endpoints {
            let weight = endpoint.weight as u64;
            if point < weight {
                return Some(endpoint.clone());
            }
            point -= weight;
        }
        endpoints.last().cloned()
    }

    fn round_robin(&self, endpoints: &[Endpoint]) -> Option<Endpoint> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % endpoints.len();
        endpoints.get(index).cloned()
    }

    fn hash(&self, endpoints: &[Endpoint], affinity_key: Option<&str>) -> Option<Endpoint> {
        let index = (fnv1a(affinity_key.unwrap_or_default()) % endpoints.len() as u64) as usize;
        endpoints.get(index).cloned()
    }
}

impl LoadBalancer for StrategyBalancer {
    fn select(
        &self,
        endpoints: &[Endpoint],
        strategy: &str,
        affinity_key: Option<&str>,
    ) -> Option<Endpoint> {
        if endpoints.is_empty() {
            return None;
        }
        let strategy = BalanceStrategy::parse(strategy).unwrap_or_else(|| {
            tracing::debug!(strategy = %strategy, "Unknown load balance strategy, using random");
            BalanceStrategy::Random
        });
        match strategy {
            BalanceStrategy::Random => self.random(endpoints),
            BalanceStrategy::RoundRobin => self.round_robin(endpoints),
            BalanceStrategy::Hash => self.hash(endpoints, affinity_key),
        }
    }
}

/// 64-bit FNV-1a.
fn fnv1a(input: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    input.bytes().fold(OFFSET, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> Vec<Endpoint> {
        vec![
            Endpoint::new("10.0.0.1:8080"),
            Endpoint::new("10.0.0.2:8080"),
            Endpoint::new("10.0.0.3:8080"),
        ]
    }

    #[test]
    fn test_parse_strategy_names() {
        assert_eq!(BalanceStrategy::parse("random"), Some(BalanceStrategy::Random));
        assert_eq!(
            BalanceStrategy::parse("roundRobin"),
            Some(BalanceStrategy::RoundRobin)
        );
        assert_eq!(BalanceStrategy::parse(" hash "), Some(BalanceStrategy::Hash));
        assert_eq!(BalanceStrategy::parse("p2c"), None);
    }

    #[test]
    fn test_empty_list_selects_nothing() {
        let balancer = StrategyBalancer::new();
        for strategy in ["random", "round_robin", "hash"] {
            assert!(balancer.select(&[], strategy, Some("10.0.0.5")).is_none());
        }
    }

    #[test]
    fn test_round_robin_rotates() {
        let balancer = StrategyBalancer::new();
        let list = endpoints();
        let picked: Vec<String> = (0..4)
            .map(|_| balancer.select(&list, "round_robin", None).unwrap().url)
            .collect();
        assert_eq!(
            picked,
            vec!["10.0.0.1:8080", "10.0.0.2:8080", "10.0.0.3:8080", "10.0.0.1:8080"]
        );
    }

    #[test]
    fn test_hash_is_deterministic_per_key() {
        let balancer = StrategyBalancer::new();
        let list = endpoints();
        let first = balancer.select(&list, "hash", Some("10.0.0.5")).unwrap();
        for _ in 0..10 {
            assert_eq!(balancer.select(&list, "hash", Some("10.0.0.5")).unwrap(), first);
        }
    }

    #[test]
    fn test_random_respects_zero_weight() {
        let balancer = StrategyBalancer::new();
        let list = vec![
            Endpoint::new("10.0.0.1:8080").with_weight(0),
            Endpoint::new("10.0.0.2:8080").with_weight(10),
        ];
        for _ in 0..50 {
            assert_eq!(
                balancer.select(&list, "random", None).unwrap().url,
                "10.0.0.2:8080"
            );
        }
    }

    #[test]
    fn test_random_all_zero_weights_still_selects() {
        let balancer = StrategyBalancer::new();
        let list = vec![Endpoint::new("a:1").with_weight(0)];
        assert_eq!(balancer.select(&list, "random", None).unwrap().url, "a:1");
    }

    #[test]
    fn test_unknown_strategy_falls_back_to_random() {
        let balancer = StrategyBalancer::new();
        let list = vec![Endpoint::new("a:1")];
        assert_eq!(balancer.select(&list, "least_active", None).unwrap().url, "a:1");
    }
}
