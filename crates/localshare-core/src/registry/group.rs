//! Address to group-key mapping.

use std::fmt;
use std::net::IpAddr;

/// Partition key for broadcasts and signal routing.
///
/// Clients only see and reach clients with the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey(String);

impl GroupKey {
    /// Key derived from an address's network prefix (IPv4 /24, IPv6 /64).
    #[must_use]
    pub fn from_addr(addr: IpAddr) -> Self {
        let addr = match addr {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(addr, IpAddr::V4),
            IpAddr::V4(_) => addr,
        };
        match addr {
            IpAddr::V4(v4) => {
                let [a, b, c, _] = v4.octets();
                Self(format!("{a}.{b}.{c}"))
            }
            IpAddr::V6(v6) => {
                let s = v6.segments();
                Self(format!("{:x}:{:x}:{:x}:{:x}", s[0], s[1], s[2], s[3]))
            }
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_prefix() {
        let a = GroupKey::from_addr("192.168.1.10".parse().unwrap());
        let b = GroupKey::from_addr("192.168.1.200".parse().unwrap());
        let c = GroupKey::from_addr("192.168.2.10".parse().unwrap());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "192.168.1");
    }

    #[test]
    fn test_ipv6_prefix_and_mapped() {
        let a = GroupKey::from_addr("fd00:1:2:3::10".parse().unwrap());
        let b = GroupKey::from_addr("fd00:1:2:3:ffff::1".parse().unwrap());
        let c = GroupKey::from_addr("fd00:1:2:4::10".parse().unwrap());
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mapped = GroupKey::from_addr("::ffff:10.0.0.7".parse().unwrap());
        assert_eq!(mapped, GroupKey::from_addr("10.0.0.99".parse().unwrap()));
    }
}
