//! Upstream endpoints and the collaborators that hand them out.
//!
//! - `Endpoint` / `EndpointId`: addresses and their normalized identity
//! - `UpstreamRegistry`: routing group -> current candidate list
//! - `LoadBalancer`: candidate list -> one endpoint

mod balancer;
mod endpoint;
mod registry;

pub use balancer::{BalanceStrategy, LoadBalancer, StrategyBalancer};
pub use endpoint::{Endpoint, EndpointId, DEFAULT_PROTOCOL};
pub use registry::{MemoryRegistry, UpstreamRegistry};
