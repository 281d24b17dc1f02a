//! CIDR range matching shared by trusted-proxy validation and the SSRF guard.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Parsed CIDR network range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse CIDR notation (`"10.0.0.0/8"`, `"fe80::/10"`) or a bare address
    /// (implicit `/32` or `/128`).
    ///
    /// Returns `None` if the format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();

        let Some((addr, prefix)) = cidr.split_once('/') else {
            let ip: IpAddr = cidr.parse().ok()?;
            return Some(Self {
                network: ip,
                prefix_len: max_prefix(&ip),
            });
        };

        let ip: IpAddr = addr.parse().ok()?;
        let prefix_len: u8 = prefix.parse().ok()?;

        if prefix_len > max_prefix(&ip) {
            return None;
        }

        Some(Self {
            network: ip,
            prefix_len,
        })
    }

    /// Prefix length of this range.
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Check if an IP address is contained within this range.
    ///
    /// IPv4 and IPv6 never match each other; callers unwrap IPv4-mapped
    /// IPv6 addresses first when that matters.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u32::MAX << (32 - u32::from(self.prefix_len))
                };
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u128::MAX << (128 - u32::from(self.prefix_len))
                };
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

fn max_prefix(ip: &IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Parse a list of CIDR strings, silently dropping invalid entries.
pub fn parse_ranges<'a>(cidrs: impl IntoIterator<Item = &'a str>) -> Vec<CidrRange> {
    cidrs.into_iter().filter_map(CidrRange::parse).collect()
}

/// Unwrap IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) to IPv4.
pub fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

/// IPv4 address carried inside an IPv6 address by a translation or
/// tunnelling scheme:
///
/// - IPv4-mapped `::ffff:a.b.c.d`
/// - NAT64 well-known prefix `64:ff9b::/96`
/// - deprecated IPv4-compatible `::a.b.c.d`
/// - 6to4 `2002:aabb:ccdd::/48`
///
/// Routers along those paths deliver to the embedded IPv4 host, so range
/// checks must look at it as well as at the IPv6 address itself.
pub fn embedded_ipv4(v6: Ipv6Addr) -> Option<Ipv4Addr> {
    if let Some(mapped) = v6.to_ipv4_mapped() {
        return Some(mapped);
    }

    let [s0, s1, s2, s3, s4, s5, s6, s7] = v6.segments();
    let from_segments = |hi: u16, lo: u16| Ipv4Addr::from((u32::from(hi) << 16) | u32::from(lo));

    match (s0, s1, s2, s3, s4, s5) {
        (0x0064, 0xff9b, 0, 0, 0, 0) | (0, 0, 0, 0, 0, 0) => Some(from_segments(s6, s7)),
        (0x2002, ..) => Some(from_segments(s1, s2)),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cidr_parse_ipv4() {
        let cidr = CidrRange::parse("10.0.0.0/8").unwrap();
        assert_eq!(cidr.prefix_len(), 8);
    }

    #[test]
    fn test_cidr_parse_ipv6() {
        let cidr = CidrRange::parse("fe80::/10").unwrap();
        assert_eq!(cidr.prefix_len(), 10);
    }

    #[test]
    fn test_cidr_parse_single_ip() {
        assert_eq!(CidrRange::parse("192.168.1.1").unwrap().prefix_len(), 32);
        assert_eq!(CidrRange::parse("::1").unwrap().prefix_len(), 128);
    }

    #[test]
    fn test_cidr_parse_invalid() {
        assert!(CidrRange::parse("not-an-ip").is_none());
        assert!(CidrRange::parse("10.0.0.0/33").is_none());
        assert!(CidrRange::parse("10.0.0.0/x").is_none());
        assert!(CidrRange::parse("::/129").is_none());
    }

    #[test]
    fn test_cidr_contains_ipv4() {
        let cidr = CidrRange::parse("172.16.0.0/12").unwrap();

        assert!(cidr.contains(&"172.16.0.1".parse().unwrap()));
        assert!(cidr.contains(&"172.31.255.255".parse().unwrap()));
        assert!(!cidr.contains(&"172.32.0.1".parse().unwrap()));
        assert!(!cidr.contains(&"::1".parse().unwrap()));
    }

    #[test]
    fn test_cidr_contains_ipv6() {
        let cidr = CidrRange::parse("fc00::/7").unwrap();

        assert!(cidr.contains(&"fd12:3456::1".parse().unwrap()));
        assert!(!cidr.contains(&"2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_zero_prefix_matches_everything_in_family() {
        let cidr = CidrRange::parse("0.0.0.0/0").unwrap();
        assert!(cidr.contains(&"8.8.8.8".parse().unwrap()));
        assert!(!cidr.contains(&"2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_parse_ranges_skips_invalid() {
        let ranges = parse_ranges(["10.0.0.0/8", "garbage", "::1/128"]);
        assert_eq!(ranges.len(), 2);
    }

    #[test]
    fn test_canonical_ip_unwraps_mapped() {
        let mapped: IpAddr = "::ffff:192.168.1.10".parse().unwrap();
        assert_eq!(canonical_ip(mapped), "192.168.1.10".parse::<IpAddr>().unwrap());

        let plain: IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(canonical_ip(plain), plain);
    }

    #[test]
    fn test_embedded_ipv4_forms() {
        let cases = [
            ("::ffff:10.0.0.1", Some("10.0.0.1")),
            ("64:ff9b::a9fe:a9fe", Some("169.254.169.254")),
            ("::127.0.0.1", Some("127.0.0.1")),
            ("::a9fe:a9fe", Some("169.254.169.254")),
            ("2002:a9fe:a9fe::", Some("169.254.169.254")),
            ("2002:c0a8:0101:1::5", Some("192.168.1.1")),
            ("2001:db8::1", None),
            ("fe80::1", None),
        ];
        for (v6, expected) in cases {
            let v6: Ipv6Addr = v6.parse().unwrap();
            let expected = expected.map(|e| e.parse::<Ipv4Addr>().unwrap());
            assert_eq!(embedded_ipv4(v6), expected, "{v6}");
        }
    }
}
