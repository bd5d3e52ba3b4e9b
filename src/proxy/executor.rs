//! HTTP request executor backed by `reqwest`.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::Client;

use crate::config::ApiKey;
use crate::retry::{Fault, FaultKind, RequestContext, RequestExecutor};
use crate::upstream::Endpoint;

/// Hop-by-hop headers that must not be forwarded.
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// A fully buffered upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Sends the request to an endpoint over HTTP.
#[derive(Clone)]
pub struct HttpExecutor {
    client: Client,
    api_keys: std::collections::HashMap<String, ApiKey>,
}

impl HttpExecutor {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            api_keys: Default::default(),
        }
    }

    /// Send `Authorization: Bearer <key>` on every request to `group`.
    pub fn with_api_key(mut self, group: impl Into<String>, key: ApiKey) -> Self {
        self.api_keys.insert(group.into(), key);
        self
    }

    async fn send(
        &self,
        endpoint: Endpoint,
        ctx: &RequestContext,
    ) -> Result<UpstreamResponse, Fault> {
        let url = format!("{}{}", endpoint.base_url(), ctx.path_and_query);

        let mut request = self
            .client
            .request(ctx.method.clone(), &url)
            .headers(forwarded_headers(&ctx.headers))
            .body(ctx.body.clone());

        if let Some(key) = self.api_keys.get(&ctx.attributes.routing_group) {
            request = request.bearer_auth(key.expose_secret());
        }

        tracing::debug!(url = %url, method = %ctx.method, "Sending upstream request");

        let response = request.send().await.map_err(|e| into_fault(&e))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| into_fault(&e))?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

impl RequestExecutor for HttpExecutor {
    type Response = UpstreamResponse;

    fn execute<'a>(
        &'a self,
        endpoint: Endpoint,
        ctx: &'a RequestContext,
    ) -> BoxFuture<'a, Result<UpstreamResponse, Fault>> {
        Box::pin(self.send(endpoint, ctx))
    }
}

/// Copy request headers, dropping hop-by-hop ones and those reqwest sets itself.
pub fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if HOP_BY_HOP.contains(name) || name == header::HOST || name == header::CONTENT_LENGTH {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }
    forwarded
}

/// Copy upstream response headers that are safe to relay to the client.
pub fn relayed_headers(headers: &HeaderMap) -> HeaderMap {
    let mut relayed = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if HOP_BY_HOP.contains(name) || name == header::CONTENT_LENGTH {
            continue;
        }
        relayed.append(name.clone(), value.clone());
    }
    relayed
}

/// Classify a `reqwest` error into a fault.
pub fn into_fault(err: &reqwest::Error) -> Fault {
    Fault::new(classify(err), err.to_string())
}

fn classify(err: &reqwest::Error) -> FaultKind {
    if err.is_timeout() {
        if err.is_connect() {
            FaultKind::ConnectTimeout
        } else {
            FaultKind::ReadTimeout
        }
    } else if connection_not_reusable(err) {
        FaultKind::ConnectionNotReusable
    } else if err.is_connect() {
        FaultKind::Connect
    } else {
        FaultKind::Other
    }
}

/// Whether the error chain shows a pooled connection dying under the request.
fn connection_not_reusable(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = Some(err);
    while let Some(current) = source {
        if let Some(io) = current.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        if current
            .to_string()
            .contains("connection closed before message completed")
        {
            return true;
        }
        source = current.source();
    }
    false
}

/// Build a header value, dropping ones that are not valid header text.
pub(crate) fn header_value(value: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_headers_drop_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("gateway"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("3"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let forwarded = forwarded_headers(&headers);
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[header::ACCEPT], "application/json");
    }

    #[test]
    fn test_relayed_headers_keep_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));

        let relayed = relayed_headers(&headers);
        assert_eq!(relayed.len(), 1);
        assert!(relayed.contains_key(header::CONTENT_TYPE));
    }

    #[test]
    fn test_connection_reset_is_not_reusable() {
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(connection_not_reusable(&err));

        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(!connection_not_reusable(&err));
    }

    #[tokio::test]
    async fn test_refused_connection_is_connect_fault() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = Client::new()
            .get(format!("http://127.0.0.1:{}/", port))
            .send()
            .await
            .unwrap_err();
        assert_eq!(into_fault(&err).kind, FaultKind::Connect);
    }
}
