//! retrygate - Retry and failover layer for an API gateway's upstream client
//!
//! This library provides the retry orchestrator and its collaborators
//! (upstream registry, load balancer, request executor), plus the
//! configuration and HTTP gateway that wire them together.

pub mod config;
pub mod error;
pub mod proxy;
pub mod retry;
pub mod upstream;

pub use config::Config;
pub use error::{Error, Result};
