use std::net::{IpAddr, SocketAddr};

use http::HeaderMap;

/// Forwarding headers consulted for the real client address, in preference
/// order. `x-forwarded-for` may carry a comma-separated chain; the first
/// entry is the originating client.
const FORWARDING_HEADERS: [&str; 3] = ["x-forwarded-for", "cf-connecting-ip", "x-real-ip"];

/// Resolve the client address used as the rate-limiter key.
///
/// Prefers proxy forwarding headers over the raw socket peer, so that many
/// clients behind one reverse proxy are not collapsed into a single budget.
/// Header values that do not parse as an IP address are skipped rather than
/// trusted, falling through to the next candidate and ultimately to `peer`.
pub fn resolve_client_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    for name in FORWARDING_HEADERS {
        let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) else {
            continue;
        };

        let first = value.split(',').next().unwrap_or(value).trim();
        if let Ok(ip) = first.parse::<IpAddr>() {
            return ip;
        }
    }

    peer.ip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn peer() -> SocketAddr {
        "10.0.0.9:40123".parse().unwrap()
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                http::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn falls_back_to_peer_without_headers() {
        let ip = resolve_client_ip(&HeaderMap::new(), peer());
        assert_eq!(ip, "10.0.0.9".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn prefers_x_forwarded_for() {
        let map = headers(&[
            ("x-forwarded-for", "203.0.113.7"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        let ip = resolve_client_ip(&map, peer());
        assert_eq!(ip, "203.0.113.7".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn takes_first_of_comma_separated_chain() {
        let map = headers(&[("x-forwarded-for", "203.0.113.7, 70.41.3.18, 150.172.238.178")]);
        let ip = resolve_client_ip(&map, peer());
        assert_eq!(ip, "203.0.113.7".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn cloudflare_header_used_when_forwarded_for_absent() {
        let map = headers(&[("cf-connecting-ip", "2001:db8::1")]);
        let ip = resolve_client_ip(&map, peer());
        assert_eq!(ip, "2001:db8::1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn x_real_ip_is_last_header_candidate() {
        let map = headers(&[("x-real-ip", "198.51.100.2")]);
        let ip = resolve_client_ip(&map, peer());
        assert_eq!(ip, "198.51.100.2".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn unparseable_header_value_is_skipped() {
        let map = headers(&[
            ("x-forwarded-for", "unknown"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        let ip = resolve_client_ip(&map, peer());
        assert_eq!(ip, "198.51.100.2".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn all_headers_unparseable_falls_back_to_peer() {
        let map = headers(&[("x-forwarded-for", "not-an-ip"), ("x-real-ip", "also-bad")]);
        let ip = resolve_client_ip(&map, peer());
        assert_eq!(ip, peer().ip());
    }
}
