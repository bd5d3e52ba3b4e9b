//! Fault taxonomy for individual attempts and terminal retry errors.

use axum::http::StatusCode;
use std::fmt;

use crate::upstream::EndpointId;

/// Kind of failure a single attempt ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// The attempt's own timeout elapsed.
    Timeout,
    /// Connecting to the endpoint timed out.
    ConnectTimeout,
    /// Reading the response timed out.
    ReadTimeout,
    /// The pooled connection was closed or reset underneath the request.
    ConnectionNotReusable,
    /// Connecting failed for a reason other than a timeout.
    Connect,
    /// Anything else.
    Other,
}

impl FaultKind {
    /// Whether the backoff discipline may retry this fault.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectTimeout | Self::ReadTimeout | Self::ConnectionNotReusable
        )
    }

    pub fn is_timeout(self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectTimeout | Self::ReadTimeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectTimeout => "connect_timeout",
            Self::ReadTimeout => "read_timeout",
            Self::ConnectionNotReusable => "connection_not_reusable",
            Self::Connect => "connect",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Terminal outcome of a retry sequence that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    #[error("Request timeout, the maximum number of retry times ({retries}) has been exceeded")]
    RetryExhausted {
        retries: u32,
        #[source]
        last: Fault,
    },

    #[error("Cannot find healthy upstream in group '{group}' after failover ({excluded} excluded)")]
    NoHealthyUpstream { group: String, excluded: usize },

    #[error("Attempt against {endpoint} timed out: {fault}")]
    AttemptTimeout { endpoint: EndpointId, fault: Fault },

    #[error("Upstream {endpoint} failed: {fault}")]
    Upstream { endpoint: EndpointId, fault: Fault },
}

impl RetryError {
    /// Map the fault that ended the last attempt to a terminal error.
    pub fn from_fault(endpoint: EndpointId, fault: Fault) -> Self {
        if fault.kind.is_timeout() {
            Self::AttemptTimeout { endpoint, fault }
        } else {
            Self::Upstream { endpoint, fault }
        }
    }

    /// Caller-visible status class.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RetryExhausted { .. } => StatusCode::REQUEST_TIMEOUT,
            Self::NoHealthyUpstream { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::AttemptTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds() {
        assert!(FaultKind::Timeout.is_transient());
        assert!(FaultKind::ConnectTimeout.is_transient());
        assert!(FaultKind::ReadTimeout.is_transient());
        assert!(FaultKind::ConnectionNotReusable.is_transient());

        assert!(!FaultKind::Connect.is_transient());
        assert!(!FaultKind::Other.is_transient());
    }

    #[test]
    fn test_connection_not_reusable_is_not_a_timeout() {
        assert!(!FaultKind::ConnectionNotReusable.is_timeout());
    }

    #[test]
    fn test_status_mapping() {
        let endpoint = EndpointId::parse("10.0.0.1:8080");
        let exhausted = RetryError::RetryExhausted {
            retries: 2,
            last: Fault::new(FaultKind::ConnectTimeout, "connect timed out"),
        };
        assert_eq!(exhausted.status(), StatusCode::REQUEST_TIMEOUT);

        let none = RetryError::NoHealthyUpstream {
            group: "g1".to_string(),
            excluded: 2,
        };
        assert_eq!(none.status(), StatusCode::SERVICE_UNAVAILABLE);

        let timeout =
            RetryError::from_fault(endpoint.clone(), Fault::new(FaultKind::Timeout, "slow"));
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);

        let refused = RetryError::from_fault(endpoint, Fault::new(FaultKind::Connect, "refused"));
        assert_eq!(refused.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_error_messages_name_context() {
        let err = RetryError::NoHealthyUpstream {
            group: "orders".to_string(),
            excluded: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("orders"));
        assert!(msg.contains("3 excluded"));
    }
}
