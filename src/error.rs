//! Error types for retrygate.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::retry::RetryError;

/// Result type alias for retrygate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for retrygate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("No upstream group matches path '{path}'")]
    NoRoute { path: String },

    #[error("No healthy upstream available in group '{group}'")]
    NoUpstream { group: String },

    #[error(transparent)]
    Retry(#[from] RetryError),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::NoRoute { .. } => StatusCode::NOT_FOUND,
            Error::NoUpstream { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::Retry(err) => err.status(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": "retrygate_error",
                "code": status.as_u16()
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{Fault, FaultKind};
    use crate::upstream::EndpointId;

    #[test]
    fn test_retry_errors_keep_their_status_class() {
        let err = Error::from(RetryError::RetryExhausted {
            retries: 3,
            last: Fault::new(FaultKind::ReadTimeout, "read timed out"),
        });
        assert_eq!(err.status(), StatusCode::REQUEST_TIMEOUT);

        let err = Error::from(RetryError::AttemptTimeout {
            endpoint: EndpointId::parse("10.0.0.1:8080"),
            fault: Fault::new(FaultKind::Timeout, "slow"),
        });
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_routing_errors() {
        assert_eq!(
            Error::NoRoute {
                path: "/x".to_string()
            }
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::NoUpstream {
                group: "g1".to_string()
            }
            .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_into_response_carries_status_and_json_body() {
        let response = Error::NoRoute {
            path: "/missing".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), 1_048_576)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], 404);
        assert_eq!(json["error"]["type"], "retrygate_error");
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("/missing"));
    }
}
