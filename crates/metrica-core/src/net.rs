//! Client address helpers: trusted subnet matching and the agent's
//! outbound address hint.

use std::fmt;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::str::FromStr;

use ipnet::IpNet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid CIDR {0:?}")]
pub struct InvalidSubnet(pub String);

/// An IPv4 or IPv6 network in CIDR notation, e.g. `192.168.1.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedSubnet(IpNet);

impl TrustedSubnet {
    pub fn contains(&self, ip: IpAddr) -> bool {
        match ip {
            // IPv4-mapped IPv6 clients still match an IPv4 network.
            IpAddr::V6(v6) if matches!(self.0, IpNet::V4(_)) => v6
                .to_ipv4_mapped()
                .is_some_and(|v4| self.0.contains(&IpAddr::V4(v4))),
            ip => self.0.contains(&ip),
        }
    }

    /// Parses the header value and checks membership. Missing or malformed
    /// values are not trusted.
    pub fn allows(&self, header: Option<&str>) -> bool {
        header
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
            .is_some_and(|ip| self.contains(ip))
    }
}

impl FromStr for TrustedSubnet {
    type Err = InvalidSubnet;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<IpNet>()
            .map(Self)
            .map_err(|_| InvalidSubnet(s.to_string()))
    }
}

impl fmt::Display for TrustedSubnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Local address the OS would use to reach `server`.
///
/// Connecting a UDP socket sends nothing; it only selects a route.
pub fn outbound_ip(server: &str) -> Option<IpAddr> {
    let authority = server
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_end_matches('/');
    let target: SocketAddr = authority.to_socket_addrs().ok()?.next()?;
    let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind).ok()?;
    socket.connect(target).ok()?;
    socket.local_addr().ok().map(|a| a.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_subnet() {
        let subnet: TrustedSubnet = "192.168.1.0/24".parse().unwrap();
        assert!(subnet.contains("192.168.1.77".parse().unwrap()));
        assert!(!subnet.contains("192.168.2.1".parse().unwrap()));
        assert!(subnet.contains("::ffff:192.168.1.5".parse().unwrap()));
        assert_eq!(subnet.to_string(), "192.168.1.0/24");
    }

    #[test]
    fn test_prefix_edges() {
        let all: TrustedSubnet = "0.0.0.0/0".parse().unwrap();
        assert!(all.contains("8.8.8.8".parse().unwrap()));
        let one: TrustedSubnet = "10.0.0.1/32".parse().unwrap();
        assert!(one.contains("10.0.0.1".parse().unwrap()));
        assert!(!one.contains("10.0.0.2".parse().unwrap()));
        let host_bits: TrustedSubnet = "10.1.2.3/8".parse().unwrap();
        assert!(host_bits.contains("10.200.0.1".parse().unwrap()));
    }

    #[test]
    fn test_ipv6_subnet() {
        let subnet: TrustedSubnet = "fd00::/8".parse().unwrap();
        assert!(subnet.contains("fd12::1".parse().unwrap()));
        assert!(!subnet.contains("fe80::1".parse().unwrap()));
        assert!(!subnet.contains("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_invalid_subnets() {
        for s in ["", "10.0.0.0", "10.0.0.0/33", "nope/8", "::/129"] {
            assert!(s.parse::<TrustedSubnet>().is_err(), "{s}");
        }
    }

    #[test]
    fn test_allows_header() {
        let subnet: TrustedSubnet = "10.0.0.0/8".parse().unwrap();
        assert!(subnet.allows(Some(" 10.1.2.3 ")));
        assert!(!subnet.allows(Some("garbage")));
        assert!(!subnet.allows(None));
    }

    #[test]
    fn test_outbound_ip_loopback() {
        let ip = outbound_ip("127.0.0.1:8080").unwrap();
        assert!(ip.is_loopback());
        assert!(outbound_ip("not an address").is_none());
    }
}
