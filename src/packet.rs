//! The opaque `Packet` value that flows through the modification pipeline.
//!
//! A `Packet` owns the raw bytes of a single IP datagram exactly as handed
//! to us by the kernel queue (no link-layer framing: NFQUEUE hands us IP
//! packets). Layer accessors borrow into those bytes through `pnet`'s
//! zero-copy packet views, falling back to our own `ipv6` extension-header
//! walker for the layers `pnet` doesn't model.

use crate::ipv6::{self, Ipv6HeaderView};
use pnet::packet::icmp::IcmpPacket;
use pnet::packet::icmpv6::Icmpv6Packet;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::Packet as _;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

/// A single IP datagram, carried through the pipeline by value.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    bytes: Vec<u8>,
}

/// Where the upper-layer payload starts, and what protocol it is.
struct Layers {
    version: IpVersion,
    upper_offset: usize,
    upper_protocol: pnet::packet::ip::IpNextHeaderProtocol,
    fragment_header_offset: Option<usize>,
}

impl Packet {
    pub fn new(bytes: Vec<u8>) -> Self {
        Packet { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn ip_version(&self) -> Option<IpVersion> {
        match self.bytes.first().map(|b| *b >> 4) {
            Some(4) => Some(IpVersion::V4),
            Some(6) => Some(IpVersion::V6),
            _ => None,
        }
    }

    fn layers(&self) -> Option<Layers> {
        match self.ip_version()? {
            IpVersion::V4 => {
                let ipv4 = Ipv4Packet::new(&self.bytes)?;
                let offset = (ipv4.get_header_length() as usize) * 4;
                if offset > self.bytes.len() {
                    return None;
                }
                Some(Layers {
                    version: IpVersion::V4,
                    upper_offset: offset,
                    upper_protocol: ipv4.get_next_level_protocol(),
                    fragment_header_offset: None,
                })
            }
            IpVersion::V6 => {
                let upper = ipv6::walk_extension_headers(&self.bytes)?;
                Some(Layers {
                    version: IpVersion::V6,
                    upper_offset: upper.offset,
                    upper_protocol: upper.protocol,
                    fragment_header_offset: upper.fragment_header_offset,
                })
            }
        }
    }

    pub fn ipv4(&self) -> Option<Ipv4Packet<'_>> {
        if self.ip_version()? != IpVersion::V4 {
            return None;
        }
        Ipv4Packet::new(&self.bytes)
    }

    pub fn ipv6(&self) -> Option<Ipv6HeaderView<'_>> {
        if self.ip_version()? != IpVersion::V6 {
            return None;
        }
        Ipv6HeaderView::new(&self.bytes)
    }

    /// Offset of the Fragment extension header, if this is an IPv6 packet
    /// carrying one.
    pub fn ipv6_fragment_header_offset(&self) -> Option<usize> {
        self.layers()?.fragment_header_offset
    }

    pub fn tcp(&self) -> Option<TcpPacket<'_>> {
        let layers = self.layers()?;
        if layers.upper_protocol != IpNextHeaderProtocols::Tcp {
            return None;
        }
        TcpPacket::new(&self.bytes[layers.upper_offset..])
    }

    pub fn udp(&self) -> Option<UdpPacket<'_>> {
        let layers = self.layers()?;
        if layers.upper_protocol != IpNextHeaderProtocols::Udp {
            return None;
        }
        UdpPacket::new(&self.bytes[layers.upper_offset..])
    }

    pub fn icmp(&self) -> Option<IcmpPacket<'_>> {
        let layers = self.layers()?;
        if layers.version != IpVersion::V4 || layers.upper_protocol != IpNextHeaderProtocols::Icmp
        {
            return None;
        }
        IcmpPacket::new(&self.bytes[layers.upper_offset..])
    }

    pub fn icmpv6(&self) -> Option<Icmpv6Packet<'_>> {
        let layers = self.layers()?;
        if layers.version != IpVersion::V6
            || layers.upper_protocol != IpNextHeaderProtocols::Icmpv6
        {
            return None;
        }
        Icmpv6Packet::new(&self.bytes[layers.upper_offset..])
    }

    /// The payload of the innermost transport/ICMP layer we recognise, or
    /// everything past the IP header if the upper protocol is opaque to us.
    pub fn payload(&self) -> &[u8] {
        match self.layers() {
            Some(layers) => &self.bytes[layers.upper_offset..],
            None => &[],
        }
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip_version() {
            Some(IpVersion::V4) => {
                if let Some(ip) = self.ipv4() {
                    return write!(
                        f,
                        "Packet(v4 {} -> {}, proto={:?}, {}B)",
                        ip.get_source(),
                        ip.get_destination(),
                        ip.get_next_level_protocol(),
                        self.bytes.len()
                    );
                }
            }
            Some(IpVersion::V6) => {
                if let Some(ip) = self.ipv6() {
                    return write!(
                        f,
                        "Packet(v6 {} -> {}, next={:?}, {}B)",
                        ip.source(),
                        ip.destination(),
                        ip.next_header(),
                        self.bytes.len()
                    );
                }
            }
            None => {}
        }
        write!(f, "Packet(unrecognised, {}B)", self.bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnet::packet::ipv4::{checksum, MutableIpv4Packet};
    use pnet::packet::udp::MutableUdpPacket;
    use pnet::packet::MutablePacket;

    pub fn build_udp_ipv4(payload: &[u8]) -> Packet {
        let udp_len = 8 + payload.len();
        let total_len = 20 + udp_len;
        let mut buf = vec![0u8; total_len];
        {
            let mut ip = MutableIpv4Packet::new(&mut buf).unwrap();
            ip.set_version(4);
            ip.set_header_length(5);
            ip.set_total_length(total_len as u16);
            ip.set_ttl(64);
            ip.set_next_level_protocol(IpNextHeaderProtocols::Udp);
            ip.set_source("10.0.0.1".parse().unwrap());
            ip.set_destination("10.0.0.2".parse().unwrap());
            let csum = checksum(&ip.to_immutable());
            ip.set_checksum(csum);
        }
        {
            let mut udp = MutableUdpPacket::new(&mut buf[20..]).unwrap();
            udp.set_source(1234);
            udp.set_destination(53);
            udp.set_length(udp_len as u16);
            udp.set_payload(payload);
        }
        Packet::new(buf)
    }

    #[test]
    fn recognises_ipv4_udp_layers() {
        let pkt = build_udp_ipv4(b"hello");
        assert_eq!(pkt.ip_version(), Some(IpVersion::V4));
        assert!(pkt.ipv4().is_some());
        let udp = pkt.udp().expect("udp layer");
        assert_eq!(udp.get_destination(), 53);
        assert_eq!(pkt.payload(), b"hello");
        assert!(pkt.tcp().is_none());
    }

    #[test]
    fn rejects_truncated_garbage() {
        let pkt = Packet::new(vec![0x45, 0x00]);
        assert!(pkt.ipv4().is_none() || pkt.payload().is_empty());
    }
}
