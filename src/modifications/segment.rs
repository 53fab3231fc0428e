use super::{expect_arity, Modification, ModificationKind};
use crate::atoms::Value;
use crate::carrier::PacketCarrier;
use crate::errors::{ArgumentError, ModificationRuntimeError};
use crate::packet::{IpVersion, Packet};
use pnet::packet::ipv4::{checksum as ipv4_checksum, Ipv4Packet, MutableIpv4Packet};
use pnet::packet::tcp::{self, MutableTcpPacket, TcpPacket};
use pnet::packet::MutablePacket;
use rand::rngs::StdRng;
use std::net::{Ipv4Addr, Ipv6Addr};

const SYN: u16 = 0b0000_0010;
const FIN: u16 = 0b0000_0001;

pub struct SegmentKind;

impl ModificationKind for SegmentKind {
    fn name(&self) -> &'static str {
        "segment"
    }

    fn usage(&self) -> &'static str {
        "segment <int size>: splits each TCP entry's payload into adjacent segments of at most \
         `size` bytes, advancing sequence numbers and keeping SYN/FIN only on the first/last part"
    }

    fn parse_args(&self, args: &[Value]) -> Result<Box<dyn Modification>, ArgumentError> {
        let args = expect_arity(self.name(), args, 1)?;
        let size = args[0].as_int()?;
        if size <= 0 {
            return Err(ArgumentError::InvalidValue {
                name: self.name().to_owned(),
                value: size.to_string(),
            });
        }
        Ok(Box::new(Segment { size: size as usize }))
    }
}

struct Segment {
    size: usize,
}

impl Modification for Segment {
    fn apply(
        &self,
        carrier: PacketCarrier,
        _rng: &mut StdRng,
    ) -> Result<PacketCarrier, ModificationRuntimeError> {
        let mut out = PacketCarrier::new();
        for entry in carrier.iter() {
            match entry.packet.tcp() {
                Some(_) => {
                    let segments = segment_one(&entry.packet, self.size).map_err(|e| {
                        ModificationRuntimeError {
                            modification: self.describe(),
                            reason: e,
                        }
                    })?;
                    for seg in segments {
                        out.append(seg, entry.delay);
                    }
                }
                None => out.append(entry.packet.clone(), entry.delay),
            }
        }
        Ok(out)
    }

    fn describe(&self) -> String {
        format!("segment(size={})", self.size)
    }
}

fn segment_one(packet: &Packet, size: usize) -> Result<Vec<Packet>, String> {
    let version = packet.ip_version().ok_or("not an ip packet")?;
    let bytes = packet.as_bytes();
    let (ip_header_len, total_header_len) = match version {
        IpVersion::V4 => {
            let ip = Ipv4Packet::new(bytes).ok_or("truncated ipv4 header")?;
            let header_len = ip.get_header_length() as usize * 4;
            (header_len, header_len)
        }
        IpVersion::V6 => {
            let upper = crate::ipv6::walk_extension_headers(bytes).ok_or("malformed ipv6 packet")?;
            (upper.offset, upper.offset)
        }
    };
    let _ = ip_header_len;
    let tcp_header_len = {
        let tcp = TcpPacket::new(&bytes[total_header_len..]).ok_or("truncated tcp header")?;
        tcp.get_data_offset() as usize * 4
    };
    if tcp_header_len > bytes.len() - total_header_len {
        return Err("tcp data offset exceeds packet size".into());
    }
    let payload = &bytes[total_header_len + tcp_header_len..];
    if payload.len() <= size {
        return Ok(vec![packet.clone()]);
    }

    let chunks: Vec<&[u8]> = payload.chunks(size).collect();
    let last = chunks.len() - 1;
    let prefix = &bytes[..total_header_len];
    let tcp_header_bytes = bytes[total_header_len..total_header_len + tcp_header_len].to_vec();
    let base_seq = TcpPacket::new(&bytes[total_header_len..])
        .ok_or("truncated tcp header")?
        .get_sequence();

    let mut segments = Vec::with_capacity(chunks.len());
    let mut advanced: u32 = 0;
    for (i, chunk) in chunks.iter().enumerate() {
        let total_len = total_header_len + tcp_header_len + chunk.len();
        let mut buf = vec![0u8; total_len];
        buf[..total_header_len].copy_from_slice(prefix);
        buf[total_header_len..total_header_len + tcp_header_len].copy_from_slice(&tcp_header_bytes);
        buf[total_header_len + tcp_header_len..].copy_from_slice(chunk);

        {
            let mut tcp = MutableTcpPacket::new(&mut buf[total_header_len..])
                .ok_or("fragment buffer too small for tcp header")?;
            tcp.set_sequence(base_seq.wrapping_add(advanced));
            let mut flags = tcp.get_flags();
            if i != 0 {
                flags &= !SYN;
            }
            if i != last {
                flags &= !FIN;
            }
            tcp.set_flags(flags);
        }
        advanced += chunk.len() as u32;

        match version {
            IpVersion::V4 => {
                {
                    let mut ip = MutableIpv4Packet::new(&mut buf).ok_or("ipv4 buffer too small")?;
                    ip.set_total_length(total_len as u16);
                }
                recompute_checksums_v4(&mut buf, total_header_len)?;
            }
            IpVersion::V6 => {
                let payload_length = (total_len - crate::ipv6::FIXED_HEADER_LEN) as u16;
                crate::ipv6::set_payload_length(&mut buf, payload_length);
                recompute_tcp_checksum_v6(&mut buf, total_header_len)?;
            }
        }
        segments.push(Packet::new(buf));
    }
    Ok(segments)
}

fn recompute_checksums_v4(buf: &mut [u8], tcp_offset: usize) -> Result<(), String> {
    let (src, dst) = {
        let ip = Ipv4Packet::new(buf).ok_or("ipv4 buffer too small")?;
        (ip.get_source(), ip.get_destination())
    };
    set_tcp_checksum_v4(buf, tcp_offset, src, dst)?;
    let mut ip = MutableIpv4Packet::new(buf).ok_or("ipv4 buffer too small")?;
    let csum = ipv4_checksum(&ip.to_immutable());
    ip.set_checksum(csum);
    Ok(())
}

fn set_tcp_checksum_v4(buf: &mut [u8], tcp_offset: usize, src: Ipv4Addr, dst: Ipv4Addr) -> Result<(), String> {
    let csum = {
        let tcp = TcpPacket::new(&buf[tcp_offset..]).ok_or("truncated tcp header")?;
        tcp::ipv4_checksum(&tcp, &src, &dst)
    };
    let mut tcp = MutableTcpPacket::new(&mut buf[tcp_offset..]).ok_or("truncated tcp header")?;
    tcp.set_checksum(csum);
    Ok(())
}

fn recompute_tcp_checksum_v6(buf: &mut [u8], tcp_offset: usize) -> Result<(), String> {
    let view = crate::ipv6::Ipv6HeaderView::new(buf).ok_or("malformed ipv6 packet")?;
    let (src, dst): (Ipv6Addr, Ipv6Addr) = (view.source(), view.destination());
    let csum = {
        let tcp = TcpPacket::new(&buf[tcp_offset..]).ok_or("truncated tcp header")?;
        tcp::ipv6_checksum(&tcp, &src, &dst)
    };
    let mut tcp = MutableTcpPacket::new(&mut buf[tcp_offset..]).ok_or("truncated tcp header")?;
    tcp.set_checksum(csum);
    Ok(())
}
