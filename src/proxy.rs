// Client address resolution behind trusted reverse proxies

use axum::http::HeaderMap;
use ipnetwork::IpNetwork;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, warn};

/// A trusted proxy entry: one address or a CIDR range
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustedProxy {
    Single(IpAddr),
    Cidr(IpNetwork),
}

impl TrustedProxy {
    pub fn parse(entry: &str) -> Result<Self, String> {
        let entry = entry.trim();
        if let Ok(ip) = entry.parse::<IpAddr>() {
            return Ok(Self::Single(ip));
        }
        entry
            .parse::<IpNetwork>()
            .map(Self::Cidr)
            .map_err(|e| format!("invalid trusted proxy '{}': {}", entry, e))
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match self {
            Self::Single(proxy_ip) => ip == proxy_ip,
            Self::Cidr(network) => network.contains(*ip),
        }
    }
}

impl fmt::Display for TrustedProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(ip) => write!(f, "{}", ip),
            Self::Cidr(network) => write!(f, "{}", network),
        }
    }
}

/// Resolves the client address of a request.
///
/// Forwarding headers are only honoured when the socket peer is a trusted proxy.
/// The `X-Forwarded-For` chain is walked from the right and the first hop that
/// is not itself trusted is taken as the client.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    proxies: Vec<TrustedProxy>,
}

impl TrustedProxies {
    pub fn new(entries: &[String]) -> Result<Self, String> {
        let proxies = entries
            .iter()
            .map(|entry| TrustedProxy::parse(entry))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { proxies })
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.proxies.iter().any(|proxy| proxy.contains(ip))
    }

    pub fn client_address(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        let Some(peer) = peer else {
            return "unknown".to_string();
        };
        let peer_ip = peer.ip();
        if !self.is_trusted(&peer_ip) {
            return peer_ip.to_string();
        }

        if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
            return match parse_x_forwarded_for(forwarded) {
                Some(chain) => self.first_untrusted(&chain, peer_ip).to_string(),
                None => {
                    warn!(
                        "Ignoring malformed X-Forwarded-For from proxy {}: {}",
                        peer_ip, forwarded
                    );
                    peer_ip.to_string()
                }
            };
        }

        headers
            .get("x-real-ip")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
            .unwrap_or(peer_ip)
            .to_string()
    }

    fn first_untrusted(&self, chain: &[IpAddr], peer_ip: IpAddr) -> IpAddr {
        let client = chain
            .iter()
            .rev()
            .find(|hop| !self.is_trusted(hop))
            .or_else(|| chain.first())
            .copied()
            .unwrap_or(peer_ip);
        debug!("Resolved client {} through proxy {}", client, peer_ip);
        client
    }
}

/// Parse every hop of an `X-Forwarded-For` value; `None` if any hop is unusable
fn parse_x_forwarded_for(value: &str) -> Option<Vec<IpAddr>> {
    let chain = value
        .split(',')
        .map(str::trim)
        .map(|hop| {
            hop.parse::<IpAddr>()
                .ok()
                .or_else(|| hop.parse::<SocketAddr>().ok().map(|s| s.ip()))
        })
        .collect::<Option<Vec<_>>>()?;
    (!chain.is_empty()).then_some(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    fn proxies(entries: &[&str]) -> TrustedProxies {
        let entries: Vec<String> = entries.iter().map(|e| e.to_string()).collect();
        TrustedProxies::new(&entries).unwrap()
    }

    fn peer(addr: &str) -> Option<SocketAddr> {
        Some(addr.parse().unwrap())
    }

    #[test]
    fn test_parse_single_and_cidr() {
        assert_eq!(
            TrustedProxy::parse("10.0.0.1").unwrap(),
            TrustedProxy::Single("10.0.0.1".parse().unwrap())
        );
        let cidr = TrustedProxy::parse("10.0.0.0/8").unwrap();
        assert!(cidr.contains(&"10.20.30.40".parse().unwrap()));
        assert!(!cidr.contains(&"11.0.0.1".parse().unwrap()));
        assert!(TrustedProxy::parse("not-an-ip").is_err());
    }

    #[test]
    fn test_untrusted_peer_ignores_forwarding_headers() {
        let resolver = TrustedProxies::default();
        let map = headers(&[
            ("x-forwarded-for", "203.0.113.7"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        assert_eq!(
            resolver.client_address(&map, peer("192.0.2.50:4000")),
            "192.0.2.50"
        );
        assert_eq!(resolver.client_address(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn test_trusted_peer_walks_chain_from_the_right() {
        let resolver = proxies(&["10.0.0.0/8"]);
        // A client-supplied left hop cannot override the hop the proxy appended
        let map = headers(&[("x-forwarded-for", "1.1.1.1, 203.0.113.7, 10.0.0.2")]);
        assert_eq!(
            resolver.client_address(&map, peer("10.0.0.1:443")),
            "203.0.113.7"
        );

        let map = headers(&[("x-forwarded-for", "10.0.0.3, 10.0.0.2")]);
        assert_eq!(resolver.client_address(&map, peer("10.0.0.1:443")), "10.0.0.3");
    }

    #[test]
    fn test_trusted_peer_falls_back_to_real_ip_then_peer() {
        let resolver = proxies(&["10.0.0.1"]);
        let map = headers(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(
            resolver.client_address(&map, peer("10.0.0.1:443")),
            "198.51.100.2"
        );

        let map = headers(&[("x-real-ip", "garbage")]);
        assert_eq!(resolver.client_address(&map, peer("10.0.0.1:443")), "10.0.0.1");
    }

    #[test]
    fn test_malformed_chain_uses_peer() {
        let resolver = proxies(&["10.0.0.1"]);
        let map = headers(&[("x-forwarded-for", "203.0.113.7, nonsense")]);
        assert_eq!(resolver.client_address(&map, peer("10.0.0.1:443")), "10.0.0.1");

        let map = headers(&[("x-forwarded-for", "203.0.113.7:5555")]);
        assert_eq!(
            resolver.client_address(&map, peer("10.0.0.1:443")),
            "203.0.113.7"
        );
    }
}
