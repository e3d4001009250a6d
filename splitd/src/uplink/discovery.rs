//! Interface and gateway discovery for uplinks
//!
//! Discovery is best-effort: a failure for one interface is reported to the
//! caller, which keeps the stale metadata and moves on.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use parking_lot::RwLock;
use tracing::trace;

use super::MacAddr;
use crate::error::DiscoveryError;

/// Metadata found for one interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    /// Kernel interface index
    pub interface_index: u32,
    /// Primary IPv4 address
    pub primary_address: Option<Ipv4Addr>,
    /// Default gateway reachable through the interface
    pub gateway_address: Option<Ipv4Addr>,
    /// Hardware address
    pub mac_address: Option<MacAddr>,
}

/// Source of uplink interface metadata
pub trait UplinkDiscovery: Send + Sync {
    /// Look up metadata for the interface named `local_name`
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError` if the interface does not exist or cannot be
    /// queried.
    fn discover(&self, local_name: &str) -> Result<Discovered, DiscoveryError>;
}

/// Discovery backed by sysfs, procfs and `getifaddrs(3)`
#[derive(Debug, Clone)]
pub struct SysfsDiscovery {
    sys_class_net: PathBuf,
    proc_net_route: PathBuf,
}

impl Default for SysfsDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl SysfsDiscovery {
    /// Discovery against the live system
    #[must_use]
    pub fn new() -> Self {
        Self::with_paths("/sys/class/net", "/proc/net/route")
    }

    /// Discovery against alternate roots
    pub fn with_paths(sys_class_net: impl Into<PathBuf>, proc_net_route: impl Into<PathBuf>) -> Self {
        Self {
            sys_class_net: sys_class_net.into(),
            proc_net_route: proc_net_route.into(),
        }
    }

    fn read_attr(&self, interface: &str, attr: &str) -> io::Result<String> {
        fs::read_to_string(self.sys_class_net.join(interface).join(attr))
            .map(|s| s.trim().to_string())
    }

    fn default_gateway(&self, interface: &str) -> Result<Option<Ipv4Addr>, DiscoveryError> {
        let table = fs::read_to_string(&self.proc_net_route)?;
        Ok(parse_default_gateway(&table, interface))
    }
}

impl UplinkDiscovery for SysfsDiscovery {
    fn discover(&self, local_name: &str) -> Result<Discovered, DiscoveryError> {
        if !self.sys_class_net.join(local_name).exists() {
            return Err(DiscoveryError::InterfaceNotFound(local_name.to_string()));
        }

        let interface_index = self
            .read_attr(local_name, "ifindex")?
            .parse()
            .map_err(|e| DiscoveryError::invalid_attribute(local_name, "ifindex", format!("{e}")))?;

        // Tunnels and PPP links have no hardware address
        let mac_address = self
            .read_attr(local_name, "address")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|mac: &MacAddr| *mac != MacAddr::default());

        let gateway_address = self.default_gateway(local_name)?;
        let primary_address = interface_ipv4(local_name);

        trace!(
            interface = local_name,
            index = interface_index,
            ?primary_address,
            ?gateway_address,
            "Discovered uplink interface"
        );

        Ok(Discovered {
            interface_index,
            primary_address,
            gateway_address,
            mac_address,
        })
    }
}

/// Find the default route gateway for `interface` in `/proc/net/route` text
fn parse_default_gateway(table: &str, interface: &str) -> Option<Ipv4Addr> {
    table.lines().skip(1).find_map(|line| {
        let mut fields = line.split_whitespace();
        let iface = fields.next()?;
        let destination = fields.next()?;
        let gateway = fields.next()?;
        if iface != interface || destination != "00000000" {
            return None;
        }
        // procfs prints the network-order word as a host-order integer
        let raw = u32::from_str_radix(gateway, 16).ok()?;
        let addr = Ipv4Addr::from(raw.to_ne_bytes());
        (!addr.is_unspecified()).then_some(addr)
    })
}

/// First IPv4 address assigned to `interface`
fn interface_ipv4(interface: &str) -> Option<Ipv4Addr> {
    let mut head: *mut libc::ifaddrs = std::ptr::null_mut();

    // SAFETY: getifaddrs writes a list head we own until freeifaddrs.
    if unsafe { libc::getifaddrs(&mut head) } != 0 {
        return None;
    }

    let mut found = None;
    let mut cursor = head;
    while !cursor.is_null() {
        // SAFETY: cursor is a live node of the list returned above.
        let entry = unsafe { &*cursor };
        cursor = entry.ifa_next;

        if entry.ifa_addr.is_null() || entry.ifa_name.is_null() {
            continue;
        }
        // SAFETY: ifa_name is a NUL-terminated string owned by the list.
        let name = unsafe { std::ffi::CStr::from_ptr(entry.ifa_name) };
        if name.to_bytes() != interface.as_bytes() {
            continue;
        }
        // SAFETY: ifa_addr is non-null and points at a sockaddr.
        let family = unsafe { (*entry.ifa_addr).sa_family };
        if i32::from(family) != libc::AF_INET {
            continue;
        }
        // SAFETY: family is AF_INET so the storage is a sockaddr_in.
        let sin = unsafe { &*entry.ifa_addr.cast::<libc::sockaddr_in>() };
        found = Some(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)));
        break;
    }

    // SAFETY: head came from getifaddrs and is freed exactly once.
    unsafe { libc::freeifaddrs(head) };
    found
}

/// Discovery with fixed answers
///
/// Used where the system cannot be queried, and by tests.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    entries: RwLock<HashMap<String, Discovered>>,
}

impl StaticDiscovery {
    /// Create an empty discovery table; every lookup fails
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the answer for `local_name`
    pub fn insert(&self, local_name: impl Into<String>, found: Discovered) {
        self.entries.write().insert(local_name.into(), found);
    }

    /// Forget `local_name`
    pub fn remove(&self, local_name: &str) {
        self.entries.write().remove(local_name);
    }
}

impl UplinkDiscovery for StaticDiscovery {
    fn discover(&self, local_name: &str) -> Result<Discovered, DiscoveryError> {
        self.entries
            .read()
            .get(local_name)
            .cloned()
            .ok_or_else(|| DiscoveryError::InterfaceNotFound(local_name.to_string()))
    }
}

impl<T: UplinkDiscovery + ?Sized> UplinkDiscovery for std::sync::Arc<T> {
    fn discover(&self, local_name: &str) -> Result<Discovered, DiscoveryError> {
        (**self).discover(local_name)
    }
}
