//! Client IP resolution for rate limiting and auth failure tracking.
//!
//! # Resolution order
//!
//! 1. `X-Forwarded-For` (first address), then `X-Real-IP`, if forwarded
//!    headers are trusted for this connection
//! 2. the TCP peer address (`ConnectInfo<SocketAddr>`)
//! 3. [`UNKNOWN_IP`]
//!
//! Forwarded headers are trusted only when the peer address is known and
//! inside one of the `TRUSTED_PROXIES` ranges. With the list empty (the
//! default) every client is keyed by its socket address, so rotating
//! `X-Forwarded-For` cannot mint fresh limiter keys. A peer outside the
//! ranges that sends a forwarded header is logged and keyed by its own
//! address.
//!
//! Header values that do not parse as an IP address are ignored, so
//! spoofed junk cannot mint arbitrary limiter keys.
//!
//! # Deployment
//!
//! Behind a reverse proxy, configure it to overwrite (not append to) the
//! forwarded headers and list its network in `TRUSTED_PROXIES`:
//!
//! ```nginx
//! proxy_set_header X-Real-IP $remote_addr;
//! proxy_set_header X-Forwarded-For $remote_addr;
//! ```

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap, Request};
use tracing::{debug, warn};

use crate::net::{CidrRange, canonical_ip};

/// Fallback value when no client IP can be determined.
///
/// All such requests share one limiter key.
pub const UNKNOWN_IP: &str = "unknown";

/// Resolved client IP, stored in request extensions by the rate limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractedIp {
    FromXff(IpAddr),
    FromRealIp(IpAddr),
    NotFound,
}

fn extract_ip_from_headers(headers: &HeaderMap) -> ExtractedIp {
    // Format: "client, proxy1, proxy2"
    if let Some(ip) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok())
    {
        return ExtractedIp::FromXff(canonical_ip(ip));
    }

    if let Some(ip) = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
    {
        return ExtractedIp::FromRealIp(canonical_ip(ip));
    }

    ExtractedIp::NotFound
}

/// Trusted reverse-proxy networks.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Build from CIDR strings. Invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy validation enabled");
        }

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Whether forwarded headers from `peer` should be believed.
    ///
    /// Always `false` when no ranges are configured.
    pub fn is_trusted(&self, peer: &IpAddr) -> bool {
        let peer = canonical_ip(*peer);
        self.ranges.iter().any(|range| range.contains(&peer))
    }
}

fn peer_ip(extensions: &Extensions) -> Option<IpAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| canonical_ip(addr.ip()))
}

/// Resolve the client IP for `req`.
///
/// Returns `Cow::Borrowed(UNKNOWN_IP)` when nothing usable is found.
pub fn client_ip<B>(req: &Request<B>, trusted: &TrustedProxyConfig) -> Cow<'static, str> {
    resolve_client_ip(req.headers(), req.extensions(), trusted)
}

/// [`client_ip`] over already-split request parts.
pub fn resolve_client_ip(
    headers: &HeaderMap,
    extensions: &Extensions,
    trusted: &TrustedProxyConfig,
) -> Cow<'static, str> {
    let peer = peer_ip(extensions);
    let headers_trusted = peer.is_some_and(|p| trusted.is_trusted(&p));

    match extract_ip_from_headers(headers) {
        ExtractedIp::FromXff(ip) | ExtractedIp::FromRealIp(ip) if headers_trusted => {
            Cow::Owned(ip.to_string())
        }
        ExtractedIp::FromXff(ip) | ExtractedIp::FromRealIp(ip) => {
            if trusted.is_enabled() {
                warn!(
                    claimed_ip = %ip,
                    peer = ?peer,
                    "Forwarded header from untrusted peer ignored"
                );
            } else {
                debug!(claimed_ip = %ip, "Forwarded header ignored (TRUSTED_PROXIES is empty)");
            }
            peer.map_or(Cow::Borrowed(UNKNOWN_IP), |p| Cow::Owned(p.to_string()))
        }
        ExtractedIp::NotFound => {
            if trusted.is_enabled() && peer.is_some() {
                debug!("No proxy headers found - request may be bypassing reverse proxy");
            }
            peer.map_or(Cow::Borrowed(UNKNOWN_IP), |p| Cow::Owned(p.to_string()))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(headers: &[(&str, &str)], peer: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder();
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        if let Some(peer) = peer {
            let addr: SocketAddr = peer.parse().unwrap();
            req.extensions_mut().insert(ConnectInfo(addr));
        }
        req
    }

    const PROXY_PEER: &str = "10.0.0.2:4000";

    fn behind_proxy() -> TrustedProxyConfig {
        TrustedProxyConfig::new(&["10.0.0.0/8".to_string()])
    }

    #[test]
    fn test_xff_first_address() {
        let req = request(
            &[("x-forwarded-for", " 203.0.113.50 , 10.0.0.1")],
            Some(PROXY_PEER),
        );
        assert_eq!(client_ip(&req, &behind_proxy()), "203.0.113.50");
    }

    #[test]
    fn test_real_ip_fallback() {
        let req = request(&[("x-real-ip", "2001:db8::1")], Some(PROXY_PEER));
        assert_eq!(client_ip(&req, &behind_proxy()), "2001:db8::1");
    }

    #[test]
    fn test_xff_priority_over_real_ip() {
        let req = request(
            &[("x-forwarded-for", "10.0.0.1"), ("x-real-ip", "192.168.1.1")],
            Some(PROXY_PEER),
        );
        assert_eq!(client_ip(&req, &behind_proxy()), "10.0.0.1");
    }

    #[test]
    fn test_unparseable_header_ignored() {
        let req = request(&[("x-forwarded-for", "not-an-ip")], Some("198.51.100.7:5000"));
        assert_eq!(client_ip(&req, &behind_proxy()), "198.51.100.7");

        let req = request(&[("x-forwarded-for", "192.168.1.1:8080")], Some(PROXY_PEER));
        assert_eq!(client_ip(&req, &behind_proxy()), "10.0.0.2");
    }

    #[test]
    fn test_empty_trust_list_ignores_forwarded_headers() {
        let open = TrustedProxyConfig::default();
        for spoofed in ["1.2.3.4", "5.6.7.8"] {
            let req = request(
                &[("x-forwarded-for", spoofed), ("x-real-ip", spoofed)],
                Some("198.51.100.7:5000"),
            );
            assert_eq!(client_ip(&req, &open), "198.51.100.7");
        }
    }

    #[test]
    fn test_headers_without_peer_are_not_believed() {
        let req = request(&[("x-forwarded-for", "1.2.3.4")], None);
        assert_eq!(client_ip(&req, &behind_proxy()), UNKNOWN_IP);
        assert_eq!(client_ip(&req, &TrustedProxyConfig::default()), UNKNOWN_IP);
    }

    #[test]
    fn test_unknown_is_borrowed() {
        let req = request(&[], None);
        let ip = client_ip(&req, &TrustedProxyConfig::default());
        assert_eq!(ip, UNKNOWN_IP);
        assert!(matches!(ip, Cow::Borrowed(_)));
    }

    #[test]
    fn test_peer_address_used_without_headers() {
        let req = request(&[], Some("[::ffff:198.51.100.7]:443"));
        assert_eq!(client_ip(&req, &TrustedProxyConfig::default()), "198.51.100.7");
    }

    #[test]
    fn test_untrusted_peer_cannot_spoof() {
        let trusted = TrustedProxyConfig::new(&["10.0.0.0/8".to_string()]);

        let spoofed = request(&[("x-forwarded-for", "1.2.3.4")], Some("198.51.100.7:5000"));
        assert_eq!(client_ip(&spoofed, &trusted), "198.51.100.7");

        let proxied = request(&[("x-forwarded-for", "1.2.3.4")], Some("10.1.2.3:5000"));
        assert_eq!(client_ip(&proxied, &trusted), "1.2.3.4");
    }

    #[test]
    fn test_trusted_proxy_config() {
        let config = TrustedProxyConfig::new(&[
            "10.0.0.0/8".to_string(),
            "garbage".to_string(),
            "172.16.0.0/12".to_string(),
        ]);
        assert!(config.is_enabled());
        assert!(config.is_trusted(&"172.31.255.255".parse().unwrap()));
        assert!(!config.is_trusted(&"8.8.8.8".parse().unwrap()));

        let open = TrustedProxyConfig::new(&[]);
        assert!(!open.is_enabled());
        assert!(!open.is_trusted(&"8.8.8.8".parse().unwrap()));
        assert!(!open.is_trusted(&"127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_long_proxy_chain() {
        let chain = (0..100)
            .map(|i| format!("10.0.0.{}", i % 256))
            .collect::<Vec<_>>()
            .join(", ");
        let req = request(&[("x-forwarded-for", &chain)], Some(PROXY_PEER));
        assert_eq!(client_ip(&req, &behind_proxy()), "10.0.0.0");
    }
}
