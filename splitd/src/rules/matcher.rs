//! Address matchers for source-network routes
//!
//! A matcher list is a comma-separated set of IPv4 address tokens. A packet
//! address matches the list if it matches any token.
//!
//! | Token | Meaning |
//! |-------|---------|
//! | `any`, `*` | every address |
//! | `10.0.0.1` | exactly one address |
//! | `10.0.0.5-10.0.0.10` | inclusive range, ends in either order |
//! | `192.168.1.0/24` | CIDR prefix |
//! | `192.168.1.0/255.255.255.0` | explicit netmask |
//!
//! Whitespace around tokens is ignored. A malformed token fails the whole
//! list: a route that silently matched less than the operator wrote would
//! send traffic out the wrong uplink.
//!
//! # Example
//!
//! ```
//! use splitd::rules::matcher::MatcherList;
//! use std::net::Ipv4Addr;
//!
//! let list: MatcherList = "10.0.0.5-10.0.0.10, 192.168.1.0/24".parse().unwrap();
//! assert!(list.matches(Ipv4Addr::new(192, 168, 1, 55)));
//! assert!(!list.matches(Ipv4Addr::new(10, 0, 0, 20)));
//! ```

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::MatcherError;

/// One address token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMatcher {
    /// Matches every address
    Any,
    /// Matches exactly one address
    Single(Ipv4Addr),
    /// Matches `lo..=hi`
    Range {
        /// Lower bound (inclusive)
        lo: Ipv4Addr,
        /// Upper bound (inclusive)
        hi: Ipv4Addr,
    },
    /// Matches addresses whose masked bits equal `network`
    Subnet {
        /// Network address, already masked
        network: Ipv4Addr,
        /// Netmask
        mask: Ipv4Addr,
    },
}

impl AddressMatcher {
    /// Whether `addr` is covered by this matcher
    #[must_use]
    pub fn matches(&self, addr: Ipv4Addr) -> bool {
        match *self {
            Self::Any => true,
            Self::Single(a) => a == addr,
            Self::Range { lo, hi } => (lo..=hi).contains(&addr),
            Self::Subnet { network, mask } => u32::from(addr) & u32::from(mask) == u32::from(network),
        }
    }

    /// Build a subnet matcher, masking the host bits off `addr`
    #[must_use]
    pub fn subnet(addr: Ipv4Addr, mask: Ipv4Addr) -> Self {
        Self::Subnet {
            network: Ipv4Addr::from(u32::from(addr) & u32::from(mask)),
            mask,
        }
    }

    /// Build a range matcher; the bounds may be given in either order
    #[must_use]
    pub fn range(a: Ipv4Addr, b: Ipv4Addr) -> Self {
        Self::Range {
            lo: a.min(b),
            hi: a.max(b),
        }
    }
}

fn parse_addr(token: &str, part: &str) -> Result<Ipv4Addr, MatcherError> {
    part.trim()
        .parse()
        .map_err(|_| MatcherError::invalid(token, format!("'{}' is not an IPv4 address", part.trim())))
}

impl FromStr for AddressMatcher {
    type Err = MatcherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        if token.is_empty() {
            return Err(MatcherError::Empty { input: s.to_string() });
        }

        if token == "*" || token.eq_ignore_ascii_case("any") {
            return Ok(Self::Any);
        }

        if let Some((a, b)) = token.split_once('-') {
            return Ok(Self::range(parse_addr(token, a)?, parse_addr(token, b)?));
        }

        if let Some((addr, mask)) = token.split_once('/') {
            let addr = parse_addr(token, addr)?;
            let mask = mask.trim();
            if mask.contains('.') {
                return Ok(Self::subnet(addr, parse_addr(token, mask)?));
            }
            let prefix: u8 = mask
                .parse()
                .map_err(|_| MatcherError::invalid(token, format!("'{mask}' is not a prefix length")))?;
            let net = Ipv4Net::new(addr, prefix)
                .map_err(|_| MatcherError::invalid(token, format!("prefix length {prefix} out of range")))?;
            return Ok(Self::subnet(addr, net.netmask()));
        }

        Ok(Self::Single(parse_addr(token, token)?))
    }
}

impl fmt::Display for AddressMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Any => f.write_str("any"),
            Self::Single(a) => write!(f, "{a}"),
            Self::Range { lo, hi } => write!(f, "{lo}-{hi}"),
            Self::Subnet { network, mask } => {
                let bits = u32::from(mask);
                // Contiguous masks print as a prefix length
                if bits.leading_ones() + bits.trailing_zeros() == 32 {
                    write!(f, "{network}/{}", bits.leading_ones())
                } else {
                    write!(f, "{network}/{mask}")
                }
            }
        }
    }
}

/// Comma-separated list of address matchers, OR semantics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatcherList(Vec<AddressMatcher>);

impl MatcherList {
    /// Whether `addr` matches any entry
    #[must_use]
    pub fn matches(&self, addr: Ipv4Addr) -> bool {
        self.0.iter().any(|m| m.matches(addr))
    }

    /// The individual matchers
    #[must_use]
    pub fn matchers(&self) -> &[AddressMatcher] {
        &self.0
    }
}

impl FromStr for MatcherList {
    type Err = MatcherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Empty tokens ("a,,b", trailing comma) are skipped; blank ones are not
        let matchers = s
            .split(',')
            .filter(|token| !token.is_empty())
            .map(str::parse::<AddressMatcher>)
            .collect::<Result<Vec<_>, _>>()?;
        if matchers.is_empty() {
            return Err(MatcherError::Empty { input: s.to_string() });
        }
        Ok(Self(matchers))
    }
}

impl fmt::Display for MatcherList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, m) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{m}")?;
        }
        Ok(())
    }
}

impl Serialize for MatcherList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MatcherList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
