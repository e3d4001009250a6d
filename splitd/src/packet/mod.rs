//! Packet view: one queued IPv4 packet and its connection tuples
//!
//! The reader owns a single [`Packet`] and refills it for every queued
//! packet, so the backing buffer is allocated once. Rules only ever see a
//! shared borrow for the duration of one call.

pub mod score;

use std::net::Ipv4Addr;

use bytes::BytesMut;

use crate::error::PacketError;

pub use score::{ScoreVector, DISQUALIFIED};

/// Minimum IPv4 header length
pub const IPV4_MIN_HEADER_LEN: usize = 20;

/// IP protocol number for ICMP
pub const IPPROTO_ICMP: u8 = 1;
/// IP protocol number for TCP
pub const IPPROTO_TCP: u8 = 6;
/// IP protocol number for UDP
pub const IPPROTO_UDP: u8 = 17;

/// Default buffer size; matches the largest copy range the queue hands out
const DEFAULT_CAPACITY: usize = 0x10000;

/// One direction of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tuple {
    /// Source address
    pub src: Ipv4Addr,
    /// Source port (0 for portless protocols)
    pub src_port: u16,
    /// Destination address
    pub dst: Ipv4Addr,
    /// Destination port (0 for portless protocols)
    pub dst_port: u16,
}

impl Tuple {
    /// Create a tuple
    #[must_use]
    pub const fn new(src: Ipv4Addr, src_port: u16, dst: Ipv4Addr, dst_port: u16) -> Self {
        Self {
            src,
            src_port,
            dst,
            dst_port,
        }
    }

    /// The same tuple seen from the other end
    #[must_use]
    pub const fn reversed(&self) -> Self {
        Self {
            src: self.dst,
            src_port: self.dst_port,
            dst: self.src,
            dst_port: self.src_port,
        }
    }
}

impl Default for Tuple {
    fn default() -> Self {
        Self::new(Ipv4Addr::UNSPECIFIED, 0, Ipv4Addr::UNSPECIFIED, 0)
    }
}

/// Connection tuples before and after NAT
///
/// `original` is the tuple as the client sent it (pre-NAT); `reply` is the
/// tuple the kernel expects replies on (post-NAT, reversed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NatInfo {
    /// Pre-NAT tuple, client to server
    pub original: Tuple,
    /// Post-NAT tuple, server to client
    pub reply: Tuple,
}

impl NatInfo {
    /// NAT info for an untranslated flow
    #[must_use]
    pub const fn untranslated(original: Tuple) -> Self {
        Self {
            original,
            reply: original.reversed(),
        }
    }
}

/// Parsed IPv4 header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    /// Transport protocol number
    pub protocol: u8,
    /// Source address
    pub src: Ipv4Addr,
    /// Destination address
    pub dst: Ipv4Addr,
    /// Header length in bytes
    pub header_len: usize,
    /// Total length field
    pub total_len: u16,
    /// Time to live
    pub ttl: u8,
}

/// Parse the IPv4 header of `data`
///
/// # Errors
///
/// Returns `PacketError` if the packet is not IPv4 or is truncated.
pub fn parse_ipv4_header(data: &[u8]) -> Result<Ipv4Header, PacketError> {
    let first = *data.first().ok_or(PacketError::Empty)?;

    let version = first >> 4;
    if version != 4 {
        return Err(PacketError::UnsupportedVersion(version));
    }

    if data.len() < IPV4_MIN_HEADER_LEN {
        return Err(PacketError::Truncated {
            len: data.len(),
            needed: IPV4_MIN_HEADER_LEN,
        });
    }

    // IHL is in 32-bit words
    let header_len = usize::from(first & 0x0F) * 4;
    if header_len < IPV4_MIN_HEADER_LEN {
        return Err(PacketError::InvalidHeaderLength(header_len));
    }
    if data.len() < header_len {
        return Err(PacketError::Truncated {
            len: data.len(),
            needed: header_len,
        });
    }

    Ok(Ipv4Header {
        protocol: data[9],
        src: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
        dst: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
        header_len,
        total_len: u16::from_be_bytes([data[2], data[3]]),
        ttl: data[8],
    })
}

/// Source and destination ports, if the transport header is present
fn transport_ports(header: &Ipv4Header, data: &[u8]) -> (u16, u16) {
    let off = header.header_len;
    match header.protocol {
        IPPROTO_TCP | IPPROTO_UDP if data.len() >= off + 4 => (
            u16::from_be_bytes([data[off], data[off + 1]]),
            u16::from_be_bytes([data[off + 2], data[off + 3]]),
        ),
        _ => (0, 0),
    }
}

/// A queued packet and what the splitter knows about it
#[derive(Debug)]
pub struct Packet {
    buffer: BytesMut,
    id: u32,
    source_interface: u32,
    mark: Option<u32>,
    header: Option<Ipv4Header>,
    nat: NatInfo,
    nat_from_queue: bool,
}

impl Default for Packet {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl Packet {
    /// Create an empty packet with a buffer of `capacity` bytes
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            id: 0,
            source_interface: 0,
            mark: None,
            header: None,
            nat: NatInfo::default(),
            nat_from_queue: false,
        }
    }

    /// Parse a standalone packet
    ///
    /// # Errors
    ///
    /// Returns `PacketError` if `data` is not a well-formed IPv4 packet.
    pub fn from_bytes(data: &[u8]) -> Result<Self, PacketError> {
        let mut packet = Self::with_capacity(data.len());
        packet.load(0, 0, None, data);
        packet.parse()?;
        Ok(packet)
    }

    /// Refill the packet with a newly queued payload
    ///
    /// Clears everything parsed from the previous packet but keeps the
    /// buffer allocation.
    pub fn load(&mut self, id: u32, source_interface: u32, mark: Option<u32>, payload: &[u8]) {
        self.buffer.clear();
        self.buffer.extend_from_slice(payload);
        self.id = id;
        self.source_interface = source_interface;
        self.mark = mark;
        self.header = None;
        self.nat = NatInfo::default();
        self.nat_from_queue = false;
    }

    /// Attach conntrack tuples supplied by the packet source
    pub fn set_nat(&mut self, nat: NatInfo) {
        self.nat = nat;
        self.nat_from_queue = true;
    }

    /// Parse the IP header and fill in the NAT tuples
    ///
    /// When the packet source did not supply conntrack tuples they are
    /// synthesized from the header: a packet queued before NAT carries its
    /// original tuple on the wire.
    ///
    /// # Errors
    ///
    /// Returns `PacketError` if the payload is not a well-formed IPv4 packet.
    pub fn parse(&mut self) -> Result<&Ipv4Header, PacketError> {
        let header = parse_ipv4_header(&self.buffer)?;
        if !self.nat_from_queue {
            let (src_port, dst_port) = transport_ports(&header, &self.buffer);
            self.nat = NatInfo::untranslated(Tuple::new(header.src, src_port, header.dst, dst_port));
        }
        Ok(self.header.insert(header))
    }

    /// Queue-assigned packet ID
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Interface index the packet arrived on, 0 if unknown
    #[must_use]
    pub const fn source_interface(&self) -> u32 {
        self.source_interface
    }

    /// Mark the packet carried when queued
    #[must_use]
    pub const fn mark(&self) -> Option<u32> {
        self.mark
    }

    /// Raw packet bytes
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.buffer
    }

    /// Parsed header, if [`parse`](Self::parse) succeeded
    #[must_use]
    pub const fn header(&self) -> Option<&Ipv4Header> {
        self.header.as_ref()
    }

    /// Transport protocol number, 0 before parsing
    #[must_use]
    pub fn protocol(&self) -> u8 {
        self.header.map_or(0, |h| h.protocol)
    }

    /// Pre- and post-NAT tuples
    #[must_use]
    pub const fn nat(&self) -> &NatInfo {
        &self.nat
    }

    /// Pre-NAT tuple
    #[must_use]
    pub const fn original(&self) -> &Tuple {
        &self.nat.original
    }

    /// Build a minimal IPv4 packet for `tuple`
    ///
    /// Produces a 20-byte header followed by the first transport word (the
    /// ports) for TCP and UDP. Used to inject synthetic flows.
    #[must_use]
    pub fn build_ipv4(protocol: u8, tuple: &Tuple) -> Vec<u8> {
        let with_ports = matches!(protocol, IPPROTO_TCP | IPPROTO_UDP);
        let len = IPV4_MIN_HEADER_LEN + if with_ports { 4 } else { 0 };

        let mut data = vec![0u8; len];
        data[0] = 0x45;
        #[allow(clippy::cast_possible_truncation)]
        data[2..4].copy_from_slice(&(len as u16).to_be_bytes());
        data[8] = 64;
        data[9] = protocol;
        data[12..16].copy_from_slice(&tuple.src.octets());
        data[16..20].copy_from_slice(&tuple.dst.octets());
        if with_ports {
            data[20..22].copy_from_slice(&tuple.src_port.to_be_bytes());
            data[22..24].copy_from_slice(&tuple.dst_port.to_be_bytes());
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(src: &str, sport: u16, dst: &str, dport: u16) -> Tuple {
        Tuple::new(src.parse().unwrap(), sport, dst.parse().unwrap(), dport)
    }

    #[test]
    fn test_parse_tcp_packet() {
        let t = tuple("192.168.1.10", 40000, "8.8.8.8", 443);
        let packet = Packet::from_bytes(&Packet::build_ipv4(IPPROTO_TCP, &t)).unwrap();

        let header = packet.header().unwrap();
        assert_eq!(header.protocol, IPPROTO_TCP);
        assert_eq!(header.header_len, 20);
        assert_eq!(header.total_len, 24);
        assert_eq!(*packet.original(), t);
        assert_eq!(packet.nat().reply, t.reversed());
    }

    #[test]
    fn test_parse_icmp_has_no_ports() {
        let t = tuple("10.0.0.1", 1, "10.0.0.2", 2);
        let packet = Packet::from_bytes(&Packet::build_ipv4(IPPROTO_ICMP, &t)).unwrap();
        assert_eq!(packet.protocol(), IPPROTO_ICMP);
        assert_eq!(packet.original().src_port, 0);
        assert_eq!(packet.original().dst_port, 0);
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(Packet::from_bytes(&[]).unwrap_err(), PacketError::Empty);
    }

    #[test]
    fn test_parse_ipv6_rejected() {
        let mut data = vec![0u8; 40];
        data[0] = 0x60;
        assert_eq!(
            Packet::from_bytes(&data).unwrap_err(),
            PacketError::UnsupportedVersion(6)
        );
    }

    #[test]
    fn test_parse_truncated_header() {
        let t = tuple("10.0.0.1", 1, "10.0.0.2", 2);
        let mut data = Packet::build_ipv4(IPPROTO_TCP, &t);
        // IHL = 15 words but only 24 bytes present
        data[0] = 0x4F;
        assert!(matches!(
            Packet::from_bytes(&data).unwrap_err(),
            PacketError::Truncated { needed: 60, .. }
        ));

        data[0] = 0x43;
        assert_eq!(
            Packet::from_bytes(&data).unwrap_err(),
            PacketError::InvalidHeaderLength(12)
        );
    }

    #[test]
    fn test_reuse_clears_previous_state() {
        let mut packet = Packet::with_capacity(128);
        let a = tuple("10.0.0.1", 1000, "1.1.1.1", 53);
        packet.load(1, 3, Some(7), &Packet::build_ipv4(IPPROTO_UDP, &a));
        packet.parse().unwrap();
        assert_eq!(packet.original().src_port, 1000);

        packet.load(2, 4, None, &[0x45]);
        assert!(packet.header().is_none());
        assert_eq!(packet.id(), 2);
        assert_eq!(packet.mark(), None);
        assert_eq!(*packet.original(), Tuple::default());
        assert!(packet.parse().is_err());
    }

    #[test]
    fn test_supplied_nat_is_kept() {
        let wire = tuple("100.64.0.2", 5555, "8.8.8.8", 53);
        let nat = NatInfo {
            original: tuple("192.168.1.20", 5555, "8.8.8.8", 53),
            reply: tuple("8.8.8.8", 53, "100.64.0.2", 5555),
        };

        let mut packet = Packet::default();
        packet.load(9, 0, None, &Packet::build_ipv4(IPPROTO_UDP, &wire));
        packet.set_nat(nat);
        packet.parse().unwrap();

        assert_eq!(*packet.nat(), nat);
        assert_eq!(packet.header().unwrap().src, wire.src);
    }
}
