//! Client address derivation for admission identifiers.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};

/// Proxy headers consulted for the original client, in order.
const FORWARDED_HEADERS: [&str; 2] = ["x-forwarded-for", "x-real-ip"];

/// Addresses describing who sent a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddress {
    /// Socket address of the connection, if the server recorded one
    pub remote: Option<SocketAddr>,
    /// First public address found in the proxy headers
    pub forwarded_for: Option<IpAddr>,
}

impl ClientAddress {
    /// Collect addresses from a request.
    ///
    /// The remote address comes from axum's `ConnectInfo<SocketAddr>`
    /// extension; serve the router with
    /// `into_make_service_with_connect_info::<SocketAddr>()` to populate it.
    pub fn from_request<B>(req: &Request<B>) -> Self {
        Self {
            remote: req
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
            forwarded_for: forwarded_client(req.headers()),
        }
    }

    /// Host part of the connection address, or empty if unknown.
    pub fn remote_host(&self) -> String {
        self.remote
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default()
    }

    /// Raw connection address (`ip:port`), or empty if unknown.
    pub fn remote_raw(&self) -> String {
        self.remote.map(|addr| addr.to_string()).unwrap_or_default()
    }

    /// Forwarded client address, or empty if none was trusted.
    pub fn forwarded_raw(&self) -> String {
        self.forwarded_for
            .map(|ip| ip.to_string())
            .unwrap_or_default()
    }

    /// Identifier for a request path: `"{host}:{path}"`.
    ///
    /// With `trust_forwarded` set, a validated forwarded address replaces the
    /// connection host. Otherwise the connection host is always used.
    pub fn identifier(&self, path: &str, trust_forwarded: bool) -> String {
        let host = match self.forwarded_for {
            Some(ip) if trust_forwarded => ip.to_string(),
            _ => self.remote_host(),
        };
        format!("{}:{}", host, path)
    }
}

/// Find the client address a proxy chain recorded.
///
/// Each header list is walked right to left, so the first public entry is
/// the one closest to our own proxy. Entries that do not parse or are not
/// publicly routable are skipped.
pub fn forwarded_client(headers: &HeaderMap) -> Option<IpAddr> {
    FORWARDED_HEADERS.iter().find_map(|name| {
        headers
            .get_all(*name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .filter_map(|candidate| candidate.trim().parse::<IpAddr>().ok())
            .find(is_public_unicast)
    })
}

/// Whether `ip` is a globally routable unicast address.
pub fn is_public_unicast(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_public_v4(&v4),
            None => is_public_v6(v6),
        },
    }
}

fn is_public_v4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        // 0.0.0.0/8 "this network"
        || octets[0] == 0
        // 100.64.0.0/10 shared address space
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
        // 192.0.0.0/24 protocol assignments
        || (octets[0] == 192 && octets[1] == 0 && octets[2] == 0)
        // 198.18.0.0/15 benchmarking
        || (octets[0] == 198 && (octets[1] & 0xfe) == 18)
        // 240.0.0.0/4 reserved
        || octets[0] >= 240)
}

fn is_public_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_multicast()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link-local
        || (first & 0xffc0) == 0xfe80
        // 2001:db8::/32 documentation
        || (first == 0x2001 && ip.segments()[1] == 0x0db8))
}
