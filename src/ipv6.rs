//! Minimal IPv6 fixed-header and extension-header handling.
//!
//! `pnet`'s `ipv6` module only models the 40-byte fixed header; it has no
//! notion of the extension header chain. The fragmentation modifications
//! need to walk that chain (to find the fragmentable payload) and to splice
//! a Fragment extension header in, so we hand-roll both here rather than
//! reach for a second packet library.

use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};

pub const FIXED_HEADER_LEN: usize = 40;
pub const FRAGMENT_HEADER_LEN: usize = 8;

/// Extension header types this crate understands well enough to skip over
/// while walking the chain. Anything else (including ESP, which does not
/// carry a regular `length` field) is treated as opaque and terminates the
/// walk.
fn is_skippable_extension(proto: IpNextHeaderProtocol) -> bool {
    matches!(
        proto,
        IpNextHeaderProtocols::Hopopt
            | IpNextHeaderProtocols::Ipv6Route
            | IpNextHeaderProtocols::Ipv6Frag
            | IpNextHeaderProtocols::Ipv6Opts
    )
}

/// A read-only view over an IPv6 packet's fixed header fields.
pub struct Ipv6HeaderView<'a> {
    bytes: &'a [u8],
}

impl<'a> Ipv6HeaderView<'a> {
    pub fn new(bytes: &'a [u8]) -> Option<Self> {
        if bytes.len() < FIXED_HEADER_LEN {
            return None;
        }
        if bytes[0] >> 4 != 6 {
            return None;
        }
        Some(Ipv6HeaderView { bytes })
    }

    pub fn payload_length(&self) -> u16 {
        u16::from_be_bytes([self.bytes[4], self.bytes[5]])
    }

    pub fn next_header(&self) -> IpNextHeaderProtocol {
        IpNextHeaderProtocol::new(self.bytes[6])
    }

    pub fn hop_limit(&self) -> u8 {
        self.bytes[7]
    }

    pub fn source(&self) -> std::net::Ipv6Addr {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&self.bytes[8..24]);
        std::net::Ipv6Addr::from(octets)
    }

    pub fn destination(&self) -> std::net::Ipv6Addr {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&self.bytes[24..40]);
        std::net::Ipv6Addr::from(octets)
    }
}

/// Result of walking an IPv6 packet's extension header chain.
pub struct UpperLayer {
    /// Offset of the upper-layer (or first unrecognised extension) header.
    pub offset: usize,
    /// Protocol number of the header found at `offset`.
    pub protocol: IpNextHeaderProtocol,
    /// Whether a Fragment extension header was seen on the way, and if so
    /// at what offset.
    pub fragment_header_offset: Option<usize>,
}

/// Walks the extension header chain of an IPv6 packet starting right after
/// the fixed header, stopping at the first upper-layer protocol or the
/// first header type we don't know how to skip.
pub fn walk_extension_headers(bytes: &[u8]) -> Option<UpperLayer> {
    let header = Ipv6HeaderView::new(bytes)?;
    let mut offset = FIXED_HEADER_LEN;
    let mut next = header.next_header();
    let mut fragment_header_offset = None;

    loop {
        if !is_skippable_extension(next) {
            return Some(UpperLayer {
                offset,
                protocol: next,
                fragment_header_offset,
            });
        }
        if offset + 2 > bytes.len() {
            return None;
        }
        if next == IpNextHeaderProtocols::Ipv6Frag {
            fragment_header_offset = Some(offset);
            let nh = IpNextHeaderProtocol::new(bytes[offset]);
            if offset + FRAGMENT_HEADER_LEN > bytes.len() {
                return None;
            }
            next = nh;
            offset += FRAGMENT_HEADER_LEN;
        } else {
            let nh = IpNextHeaderProtocol::new(bytes[offset]);
            let ext_len_units = bytes[offset + 1] as usize;
            let ext_len = (ext_len_units + 1) * 8;
            if offset + ext_len > bytes.len() {
                return None;
            }
            next = nh;
            offset += ext_len;
        }
    }
}

/// An IPv6 Fragment extension header (RFC 8200 §4.5), parsed/built in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub next_header: IpNextHeaderProtocol,
    /// In 8-byte units.
    pub fragment_offset: u16,
    pub more_fragments: bool,
    pub identification: u32,
}

impl FragmentHeader {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < FRAGMENT_HEADER_LEN {
            return None;
        }
        let offset_and_flags = u16::from_be_bytes([bytes[2], bytes[3]]);
        Some(FragmentHeader {
            next_header: IpNextHeaderProtocol::new(bytes[0]),
            fragment_offset: offset_and_flags >> 3,
            more_fragments: offset_and_flags & 0x1 != 0,
            identification: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }

    pub fn write_into(&self, buffer: &mut [u8]) {
        assert!(buffer.len() >= FRAGMENT_HEADER_LEN);
        buffer[0] = self.next_header.0;
        buffer[1] = 0;
        let offset_and_flags = (self.fragment_offset << 3) | (self.more_fragments as u16);
        buffer[2..4].copy_from_slice(&offset_and_flags.to_be_bytes());
        buffer[4..8].copy_from_slice(&self.identification.to_be_bytes());
    }
}

/// Rewrites the fixed header's `next_header` and `payload_length` fields in
/// place, leaving everything else (including addresses) untouched.
pub fn set_next_header(bytes: &mut [u8], proto: IpNextHeaderProtocol) {
    bytes[6] = proto.0;
}

pub fn set_payload_length(bytes: &mut [u8], len: u16) {
    bytes[4..6].copy_from_slice(&len.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header(next_header: u8, payload_len: u16) -> Vec<u8> {
        let mut buf = vec![0u8; FIXED_HEADER_LEN];
        buf[0] = 0x60;
        buf[4..6].copy_from_slice(&payload_len.to_be_bytes());
        buf[6] = next_header;
        buf[7] = 64;
        buf
    }

    #[test]
    fn walks_straight_to_upper_layer_with_no_extensions() {
        let bytes = sample_header(IpNextHeaderProtocols::Udp.0, 8);
        let upper = walk_extension_headers(&bytes).unwrap();
        assert_eq!(upper.offset, FIXED_HEADER_LEN);
        assert_eq!(upper.protocol, IpNextHeaderProtocols::Udp);
        assert!(upper.fragment_header_offset.is_none());
    }

    #[test]
    fn finds_fragment_header_and_reports_its_offset() {
        let mut bytes = sample_header(IpNextHeaderProtocols::Ipv6Frag.0, 16);
        let mut frag_bytes = vec![0u8; FRAGMENT_HEADER_LEN];
        let header = FragmentHeader {
            next_header: IpNextHeaderProtocols::Udp,
            fragment_offset: 0,
            more_fragments: true,
            identification: 0xdead_beef,
        };
        header.write_into(&mut frag_bytes);
        bytes.extend_from_slice(&frag_bytes);
        bytes.extend_from_slice(&[0u8; 8]);

        let upper = walk_extension_headers(&bytes).unwrap();
        assert_eq!(upper.fragment_header_offset, Some(FIXED_HEADER_LEN));
        assert_eq!(upper.offset, FIXED_HEADER_LEN + FRAGMENT_HEADER_LEN);
        assert_eq!(upper.protocol, IpNextHeaderProtocols::Udp);
    }

    #[test]
    fn fragment_header_round_trips() {
        let header = FragmentHeader {
            next_header: IpNextHeaderProtocols::Tcp,
            fragment_offset: 37,
            more_fragments: true,
            identification: 0x1234_5678,
        };
        let mut buf = [0u8; FRAGMENT_HEADER_LEN];
        header.write_into(&mut buf);
        assert_eq!(FragmentHeader::parse(&buf).unwrap(), header);
    }
}
