//! DH-006: IPv4 address blocks and `cidrsubnet` derivation.
//!
//! `cidrsubnet(base, newbits, netnum)` follows the provisioning engine's
//! semantics so derived subnet blocks are bit-exact with what the engine
//! would compute from the same inputs.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 network block, e.g. `10.0.0.0/16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    addr: Ipv4Addr,
    prefix: u8,
}

impl Cidr {
    /// Build a block, rejecting prefixes over 32 and host bits set.
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, String> {
        if prefix > 32 {
            return Err(format!("prefix /{} exceeds 32", prefix));
        }
        let cidr = Self { addr, prefix };
        if u32::from(addr) & !cidr.mask() != 0 {
            return Err(format!(
                "{}/{} has host bits set (network is {})",
                addr,
                prefix,
                Ipv4Addr::from(u32::from(addr) & cidr.mask())
            ));
        }
        Ok(cidr)
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    fn mask(&self) -> u32 {
        match self.prefix {
            0 => 0,
            p => u32::MAX << (32 - u32::from(p)),
        }
    }

    fn first(&self) -> u32 {
        u32::from(self.addr)
    }

    fn last(&self) -> u32 {
        self.first() | !self.mask()
    }

    /// Whether `other` lies entirely inside this block.
    pub fn contains(&self, other: &Cidr) -> bool {
        other.prefix >= self.prefix && other.first() & self.mask() == self.first()
    }

    /// Whether the two blocks share any address.
    pub fn overlaps(&self, other: &Cidr) -> bool {
        self.first() <= other.last() && other.first() <= self.last()
    }
}

impl FromStr for Cidr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| format!("'{}' is not in a.b.c.d/len form", s))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|e| format!("invalid address in '{}': {}", s, e))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|e| format!("invalid prefix in '{}': {}", s, e))?;
        Self::new(addr, prefix)
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Carve subnet number `netnum` out of `base`, extending its prefix by
/// `newbits`.
pub fn cidrsubnet(base: &Cidr, newbits: u8, netnum: u32) -> Result<Cidr, String> {
    let new_prefix = u32::from(base.prefix) + u32::from(newbits);
    if new_prefix > 32 {
        return Err(format!(
            "cannot extend {} by {} bits (prefix would be /{})",
            base, newbits, new_prefix
        ));
    }
    if newbits < 32 && u64::from(netnum) >= 1u64 << newbits {
        return Err(format!(
            "subnet number {} does not fit in {} bits of {}",
            netnum, newbits, base
        ));
    }
    let shift = 32 - new_prefix;
    let offset = if shift == 32 { 0 } else { netnum << shift };
    let addr = Ipv4Addr::from(base.first() | offset);
    Cidr::new(addr, new_prefix as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cidr(s: &str) -> Cidr {
        s.parse().unwrap()
    }

    #[test]
    fn test_dh006_parse_and_display() {
        let c = cidr("10.0.0.0/16");
        assert_eq!(c.addr(), Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(c.prefix(), 16);
        assert_eq!(c.to_string(), "10.0.0.0/16");
    }

    #[test]
    fn test_dh006_parse_rejects_garbage() {
        assert!("10.0.0.0".parse::<Cidr>().is_err());
        assert!("10.0.0/16".parse::<Cidr>().is_err());
        assert!("10.0.0.0/33".parse::<Cidr>().is_err());
        assert!("10.0.0.0/x".parse::<Cidr>().is_err());
    }

    #[test]
    fn test_dh006_parse_rejects_host_bits() {
        let err = "10.0.0.1/16".parse::<Cidr>().unwrap_err();
        assert!(err.contains("host bits"));
    }

    #[test]
    fn test_dh006_cidrsubnet_reference_subnets() {
        let base = cidr("10.0.0.0/16");
        assert_eq!(cidrsubnet(&base, 8, 1).unwrap(), cidr("10.0.1.0/24"));
        assert_eq!(cidrsubnet(&base, 8, 2).unwrap(), cidr("10.0.2.0/24"));
    }

    #[test]
    fn test_dh006_cidrsubnet_odd_widths() {
        let base = cidr("172.16.0.0/12");
        assert_eq!(cidrsubnet(&base, 4, 15).unwrap(), cidr("172.31.0.0/16"));
        let base = cidr("10.1.2.0/24");
        assert_eq!(cidrsubnet(&base, 2, 3).unwrap(), cidr("10.1.2.192/26"));
    }

    #[test]
    fn test_dh006_cidrsubnet_overflow() {
        let base = cidr("10.0.0.0/16");
        assert!(cidrsubnet(&base, 17, 0).is_err());
        assert!(cidrsubnet(&base, 8, 256).is_err());
        assert!(cidrsubnet(&base, 16, 65535).is_ok());
    }

    #[test]
    fn test_dh006_contains_and_overlaps() {
        let net = cidr("10.0.0.0/16");
        let a = cidr("10.0.1.0/24");
        let b = cidr("10.0.2.0/24");
        let outside = cidr("10.1.0.0/24");
        assert!(net.contains(&a));
        assert!(!net.contains(&outside));
        assert!(!a.contains(&net));
        assert!(!a.overlaps(&b));
        assert!(net.overlaps(&a));
        assert!(a.overlaps(&a));
    }

    #[test]
    fn test_dh006_zero_prefix() {
        let all = cidr("0.0.0.0/0");
        assert!(all.contains(&cidr("192.168.0.0/16")));
        assert_eq!(cidrsubnet(&all, 1, 1).unwrap(), cidr("128.0.0.0/1"));
    }

    proptest! {
        #[test]
        fn prop_dh006_cidrsubnet_inside_base(a in 0u8..=255, b in 0u8..=255, newbits in 1u8..=8, netnum in 0u32..256) {
            let base = Cidr::new(Ipv4Addr::new(a, b, 0, 0), 16).unwrap();
            let netnum = netnum % (1 << newbits);
            let sub = cidrsubnet(&base, newbits, netnum).unwrap();
            prop_assert!(base.contains(&sub));
            prop_assert_eq!(sub.prefix(), 16 + newbits);
        }

        #[test]
        fn prop_dh006_distinct_netnums_disjoint(x in 0u32..256, y in 0u32..256) {
            prop_assume!(x != y);
            let base = Cidr::new(Ipv4Addr::new(10, 0, 0, 0), 16).unwrap();
            let sx = cidrsubnet(&base, 8, x).unwrap();
            let sy = cidrsubnet(&base, 8, y).unwrap();
            prop_assert!(!sx.overlaps(&sy));
        }
    }
}
