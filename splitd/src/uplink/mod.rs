//! Uplinks: the WAN-facing interfaces traffic can be split across
//!
//! An uplink is identified by its external ID, a stable 1-based number
//! assigned by the operator. The external ID doubles as the offset of the
//! uplink's routing table, so it is the only thing the packet path needs.
//! Interface metadata (index, addresses, MAC) is refreshed by an
//! [`UplinkDiscovery`] implementation and is informational. Link state is
//! kept current by the [`LinkMonitor`].

mod discovery;
mod monitor;
mod status;

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use discovery::{Discovered, StaticDiscovery, SysfsDiscovery, UplinkDiscovery};
pub use monitor::LinkMonitor;
pub use status::{LinkState, LinkStatusBoard};

/// Maximum number of uplinks the splitter can address
pub const MAX_UPLINKS: usize = 8;

/// Maximum interface name length including the trailing NUL (IFNAMSIZ)
pub const IFNAMSIZ: usize = 16;

/// Stable 1-based uplink identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct UplinkId(u8);

impl UplinkId {
    /// Create an uplink ID, `None` unless `1..=MAX_UPLINKS`
    #[must_use]
    pub const fn new(id: u8) -> Option<Self> {
        if id >= 1 && id as usize <= MAX_UPLINKS {
            Some(Self(id))
        } else {
            None
        }
    }

    /// Uplink ID for a zero-based slot index
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        if index < MAX_UPLINKS {
            #[allow(clippy::cast_possible_truncation)]
            Some(Self(index as u8 + 1))
        } else {
            None
        }
    }

    /// The external ID value
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Zero-based slot index
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize - 1
    }

    /// Every addressable uplink ID in ascending order
    pub fn all() -> impl Iterator<Item = Self> {
        (0..MAX_UPLINKS).filter_map(Self::from_index)
    }
}

impl TryFrom<u8> for UplinkId {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("uplink ID {value} outside 1..={MAX_UPLINKS}"))
    }
}

impl From<UplinkId> for u8 {
    fn from(id: UplinkId) -> Self {
        id.0
    }
}

impl fmt::Display for UplinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ethernet hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.trim().split(':');
        for byte in &mut bytes {
            let part = parts.next().ok_or_else(|| format!("too few octets in '{s}'"))?;
            *byte = u8::from_str_radix(part, 16).map_err(|e| format!("bad octet '{part}': {e}"))?;
        }
        if parts.next().is_some() {
            return Err(format!("too many octets in '{s}'"));
        }
        Ok(Self(bytes))
    }
}

/// One configured uplink and its last known interface metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uplink {
    /// OS interface name (e.g. `eth0`)
    pub local_name: String,
    /// Operator-assigned external ID
    pub id: UplinkId,
    /// Kernel interface index, if discovered
    pub interface_index: Option<u32>,
    /// Primary IPv4 address, if discovered
    pub primary_address: Option<Ipv4Addr>,
    /// Default gateway through this interface, if discovered
    pub gateway_address: Option<Ipv4Addr>,
    /// Hardware address, if discovered
    pub mac_address: Option<MacAddr>,
}

impl Uplink {
    /// Create an uplink with no discovered metadata
    pub fn new(local_name: impl Into<String>, id: UplinkId) -> Self {
        Self {
            local_name: local_name.into(),
            id,
            interface_index: None,
            primary_address: None,
            gateway_address: None,
            mac_address: None,
        }
    }

    /// Overwrite the discovered metadata, returns `true` if anything changed
    pub fn apply(&mut self, found: &Discovered) -> bool {
        let before = (
            self.interface_index,
            self.primary_address,
            self.gateway_address,
            self.mac_address,
        );
        self.interface_index = Some(found.interface_index);
        self.primary_address = found.primary_address;
        self.gateway_address = found.gateway_address;
        self.mac_address = found.mac_address;
        before
            != (
                self.interface_index,
                self.primary_address,
                self.gateway_address,
                self.mac_address,
            )
    }
}

/// Uplinks indexed by slot (`externalID - 1`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UplinkTable {
    slots: [Option<Uplink>; MAX_UPLINKS],
}

impl UplinkTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an uplink, returning the previous occupant of its slot
    pub fn insert(&mut self, uplink: Uplink) -> Option<Uplink> {
        let index = uplink.id.index();
        self.slots[index].replace(uplink)
    }

    /// Look up an uplink by ID
    #[must_use]
    pub fn get(&self, id: UplinkId) -> Option<&Uplink> {
        self.slots[id.index()].as_ref()
    }

    /// Mutable lookup by ID
    pub fn get_mut(&mut self, id: UplinkId) -> Option<&mut Uplink> {
        self.slots[id.index()].as_mut()
    }

    /// Whether `id` is configured
    #[must_use]
    pub fn contains(&self, id: UplinkId) -> bool {
        self.slots[id.index()].is_some()
    }

    /// Configured uplinks in external ID order
    pub fn iter(&self) -> impl Iterator<Item = &Uplink> {
        self.slots.iter().flatten()
    }

    /// Configured IDs in ascending order
    pub fn ids(&self) -> impl Iterator<Item = UplinkId> + '_ {
        self.iter().map(|u| u.id)
    }

    /// Lowest configured ID
    #[must_use]
    pub fn first(&self) -> Option<UplinkId> {
        self.ids().next()
    }

    /// Number of configured uplinks
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Whether no uplink is configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.first().is_none()
    }
}
