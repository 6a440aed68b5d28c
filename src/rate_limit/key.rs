//! Client identity resolution.

use http::{Extensions, HeaderMap, Request};
use std::net::SocketAddr;

/// `X-Forwarded-For`, as set by proxies in front of the service.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// `X-Real-IP`, the single-address variant some proxies set instead.
pub const X_REAL_IP: &str = "x-real-ip";

/// Key used when neither headers nor a transport address are available.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Maps an inbound request to the key its rate-limit bucket is stored under.
///
/// Implementations must be deterministic and side-effect free, and must not fail.
pub trait KeyExtractor: Clone + Send + Sync + 'static {
    /// Identity string for this request.
    fn resolve_key<B>(&self, req: &Request<B>) -> String;
}

/// Any `Fn(&HeaderMap, &Extensions) -> String` is a key extractor.
impl<F> KeyExtractor for F
where
    F: Fn(&HeaderMap, &Extensions) -> String + Clone + Send + Sync + 'static,
{
    fn resolve_key<B>(&self, req: &Request<B>) -> String {
        self(req.headers(), req.extensions())
    }
}

/// Default identity policy: proxy headers first, then the peer address.
///
/// Precedence, first non-empty value wins:
/// 1. `X-Forwarded-For`, taken verbatim. A multi-hop list is not split.
/// 2. `X-Real-IP`.
/// 3. The peer [`SocketAddr`] stored in the request extensions by the server, as `ip:port`.
///
/// Proxy headers are client-controlled unless a trusted proxy overwrites them. Use
/// [`ForwardedHeaders::peer_only`] when the service is exposed directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardedHeaders {
    trust_headers: bool,
}

impl Default for ForwardedHeaders {
    fn default() -> Self {
        Self { trust_headers: true }
    }
}

impl ForwardedHeaders {
    /// Headers, then peer address.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ignore proxy headers and key on the peer address only.
    pub fn peer_only() -> Self {
        Self { trust_headers: false }
    }

    fn header(headers: &HeaderMap, name: &str) -> Option<String> {
        let value = headers.get(name)?;
        if value.is_empty() {
            return None;
        }
        Some(String::from_utf8_lossy(value.as_bytes()).into_owned())
    }
}

impl KeyExtractor for ForwardedHeaders {
    fn resolve_key<B>(&self, req: &Request<B>) -> String {
        if self.trust_headers {
            let headers = req.headers();
            if let Some(key) = Self::header(headers, X_FORWARDED_FOR)
                .or_else(|| Self::header(headers, X_REAL_IP))
            {
                return key;
            }
        }
        req.extensions()
            .get::<SocketAddr>()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }
}
