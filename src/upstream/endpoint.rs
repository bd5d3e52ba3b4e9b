//! Backend endpoints and their normalized identity.

use std::fmt;

/// Protocol prefix used when an endpoint does not carry its own scheme.
pub const DEFAULT_PROTOCOL: &str = "http://";

/// A backend address plus the metadata the load balancer looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Address as stored by the registry, usually "host:port".
    pub url: String,
    /// Scheme prefix, e.g. "http://".
    pub protocol: String,
    /// Relative weight for weighted selection.
    pub weight: u32,
    /// Whether the registry currently considers this endpoint usable.
    pub status: bool,
}

impl Endpoint {
    /// Create a healthy endpoint with default protocol and weight.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            protocol: DEFAULT_PROTOCOL.to_string(),
            weight: 50,
            status: true,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Normalized identity used for exclusion matching.
    pub fn id(&self) -> EndpointId {
        let url = self.url.trim();
        if url.contains("://") {
            EndpointId::parse(url)
        } else {
            EndpointId::parse(&format!("{}{}", self.protocol.trim(), url))
        }
    }

    /// Base URL requests are sent to, without a trailing slash.
    pub fn base_url(&self) -> String {
        let url = self.url.trim().trim_end_matches('/');
        if url.contains("://") {
            url.to_string()
        } else {
            format!("{}{}", self.protocol.trim(), url)
        }
    }
}

/// Normalized "host:port" identity of an endpoint.
///
/// Two addresses that differ only in surrounding whitespace, scheme, path,
/// host case or an implicit default port compare equal. This is what keeps
/// the failover path from re-selecting an endpoint it already tried.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(String);

impl EndpointId {
    /// Parse an address such as `10.0.0.1:8080`, ` http://Backend:80/ ` or `[::1]:9000`.
    ///
    /// A missing port is filled in from the scheme (80 for http, 443 for https).
    pub fn parse(address: &str) -> Self {
        let trimmed = address.trim();
        let (scheme, rest) = match trimmed.split_once("://") {
            Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
            None => ("http".to_string(), trimmed),
        };

        let authority = rest
            .split(|c| c == '/' || c == '?' || c == '#')
            .next()
            .unwrap_or_default();
        // Drop any userinfo
        let authority = authority.rsplit('@').next().unwrap_or(authority);

        let (host, port) = split_host_port(authority);
        let port = port.unwrap_or(match scheme.as_str() {
            "https" | "wss" => 443,
            _ => 80,
        });

        Self(format!("{}:{}", host.to_ascii_lowercase(), port))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn split_host_port(authority: &str) -> (&str, Option<u16>) {
    if let Some((host, port)) = authority.rsplit_once(':') {
        // Bare IPv6 literals contain colons but no brackets; leave them alone.
        let bracketed_or_plain = !host.contains(':') || host.ends_with(']');
        if bracketed_or_plain {
            if let Ok(port) = port.parse::<u16>() {
                return (host, Some(port));
            }
        }
    }
    (authority, None)
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
