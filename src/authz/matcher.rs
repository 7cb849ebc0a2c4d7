//! CIDR set membership for whitelist / blacklist decisions.

use ipnet::IpNet;

use super::request::Request;

/// True iff the request's client address lies within any of the given CIDRs.
///
/// Requests with an unparseable remote address never match.
pub fn cidrs_contain(cidrs: &[IpNet], req: &Request) -> bool {
    match req.ip() {
        Some(ip) => cidrs.iter().any(|net| net.contains(&ip)),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::parse_cidrs;

    fn request_from(addr: &str) -> Request {
        Request {
            remote_address: addr.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_matches_inside_cidr() {
        let cidrs = parse_cidrs(&["192.168.1.0/24"]);

        assert!(cidrs_contain(&cidrs, &request_from("192.168.1.1")));
        assert!(cidrs_contain(&cidrs, &request_from("192.168.1.254")));
        assert!(!cidrs_contain(&cidrs, &request_from("192.168.2.1")));
    }

    #[test]
    fn test_matches_any_of_several_cidrs() {
        let cidrs = parse_cidrs(&["127.0.0.1/32", "10.0.0.0/8"]);

        assert!(cidrs_contain(&cidrs, &request_from("127.0.0.1")));
        assert!(cidrs_contain(&cidrs, &request_from("10.5.10.20")));
        assert!(!cidrs_contain(&cidrs, &request_from("8.8.8.8")));
    }

    #[test]
    fn test_matches_ipv6() {
        let cidrs = parse_cidrs(&["2001:db8::/32"]);

        assert!(cidrs_contain(&cidrs, &request_from("2001:db8::1")));
        assert!(!cidrs_contain(&cidrs, &request_from("2001:db9::1")));
    }

    #[test]
    fn test_unparseable_address_never_matches() {
        let cidrs = parse_cidrs(&["0.0.0.0/0"]);
        assert!(!cidrs_contain(&cidrs, &request_from("not-an-address")));
    }

    #[test]
    fn test_empty_set_never_matches() {
        assert!(!cidrs_contain(&[], &request_from("192.168.1.1")));
    }
}
