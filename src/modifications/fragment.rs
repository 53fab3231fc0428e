use super::{expect_arity, expect_arity_range, Modification, ModificationKind};
use crate::atoms::Value;
use crate::carrier::PacketCarrier;
use crate::errors::{ArgumentError, ModificationRuntimeError};
use crate::ipv6::{self, FragmentHeader};
use crate::packet::Packet;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{checksum, MutableIpv4Packet};
use pnet::packet::MutablePacket;
use rand::rngs::StdRng;
use rand::Rng;
use std::sync::Mutex;

const MORE_FRAGMENTS: u8 = 0b001;

// ---------------------------------------------------------------------
// Fragment4
// ---------------------------------------------------------------------

pub struct Fragment4Kind;

impl ModificationKind for Fragment4Kind {
    fn name(&self) -> &'static str {
        "fragment4"
    }

    fn usage(&self) -> &'static str {
        "fragment4 <int size>: splits each IPv4 entry into fragments of at most `size` payload bytes \
         (a multiple of 8), clearing DF and setting MF on all but the last fragment"
    }

    fn parse_args(&self, args: &[Value]) -> Result<Box<dyn Modification>, ArgumentError> {
        let args = expect_arity(self.name(), args, 1)?;
        let size = args[0].as_int()?;
        if size <= 0 || size % 8 != 0 {
            return Err(ArgumentError::InvalidValue {
                name: self.name().to_owned(),
                value: size.to_string(),
            });
        }
        Ok(Box::new(Fragment4 { size: size as usize }))
    }
}

struct Fragment4 {
    size: usize,
}

impl Modification for Fragment4 {
    fn apply(
        &self,
        carrier: PacketCarrier,
        _rng: &mut StdRng,
    ) -> Result<PacketCarrier, ModificationRuntimeError> {
        let mut out = PacketCarrier::new();
        for entry in carrier.iter() {
            match entry.packet.ipv4() {
                Some(_) => {
                    let fragments = fragment_one_ipv4(&entry.packet, self.size).map_err(|e| {
                        ModificationRuntimeError {
                            modification: self.describe(),
                            reason: e,
                        }
                    })?;
                    for frag in fragments {
                        out.append(frag, entry.delay);
                    }
                }
                None => out.append(entry.packet.clone(), entry.delay),
            }
        }
        Ok(out)
    }

    fn describe(&self) -> String {
        format!("fragment4(size={})", self.size)
    }
}

fn fragment_one_ipv4(packet: &Packet, size: usize) -> Result<Vec<Packet>, String> {
    let bytes = packet.as_bytes();
    let ip = pnet::packet::ipv4::Ipv4Packet::new(bytes).ok_or("truncated ipv4 header")?;
    let header_len = ip.get_header_length() as usize * 4;
    if header_len > bytes.len() {
        return Err("ipv4 header length exceeds packet size".into());
    }
    let payload = &bytes[header_len..];
    if payload.len() <= size {
        return Ok(vec![packet.clone()]);
    }

    let identification = ip.get_identification();
    let next_proto = ip.get_next_level_protocol();
    let ttl = ip.get_ttl();
    let tos = ip.get_dscp() << 2 | ip.get_ecn();
    let src = ip.get_source();
    let dst = ip.get_destination();
    let header_bytes = bytes[..header_len].to_vec();

    let chunks: Vec<&[u8]> = payload.chunks(size).collect();
    let mut fragments = Vec::with_capacity(chunks.len());
    let mut offset_words: u16 = 0;
    for (i, chunk) in chunks.iter().enumerate() {
        let more_fragments = i + 1 != chunks.len();
        let total_len = header_len + chunk.len();
        let mut buf = vec![0u8; total_len];
        buf[..header_len].copy_from_slice(&header_bytes);
        buf[header_len..].copy_from_slice(chunk);
        {
            let mut frag = MutableIpv4Packet::new(&mut buf).ok_or("fragment buffer too small")?;
            frag.set_version(4);
            frag.set_dscp(tos >> 2);
            frag.set_ecn(tos & 0b11);
            frag.set_total_length(total_len as u16);
            frag.set_identification(identification);
            // DF is never set on emitted fragments (MORE_FRAGMENTS/0 only).
            frag.set_flags(if more_fragments { MORE_FRAGMENTS } else { 0 });
            frag.set_fragment_offset(offset_words);
            frag.set_ttl(ttl);
            frag.set_next_level_protocol(next_proto);
            frag.set_source(src);
            frag.set_destination(dst);
            let csum = checksum(&frag.to_immutable());
            frag.set_checksum(csum);
        }
        offset_words += (chunk.len() / 8) as u16;
        fragments.push(Packet::new(buf));
    }
    Ok(fragments)
}

// ---------------------------------------------------------------------
// Fragment6
// ---------------------------------------------------------------------

pub struct Fragment6Kind;

impl ModificationKind for Fragment6Kind {
    fn name(&self) -> &'static str {
        "fragment6"
    }

    fn usage(&self) -> &'static str {
        "fragment6 <int size> [atomic]: splits each IPv6 entry into fragments whose total wire size \
         is at most `size` bytes, inserting a Fragment extension header. If the optional trailing \
         token is 'atomic', a payload that already fits is still wrapped in a single atomic fragment; \
         otherwise (the default) it is left untouched"
    }

    fn parse_args(&self, args: &[Value]) -> Result<Box<dyn Modification>, ArgumentError> {
        let args = expect_arity_range(self.name(), args, 1, 2)?;
        let size = args[0].as_int()?;
        if size <= 0 {
            return Err(ArgumentError::InvalidValue {
                name: self.name().to_owned(),
                value: size.to_string(),
            });
        }
        let atomic = match args.get(1) {
            None => false,
            Some(Value::Str(s)) if s == "atomic" => true,
            Some(Value::Str(s)) if s == "noatomic" => false,
            Some(other) => {
                return Err(ArgumentError::InvalidValue {
                    name: self.name().to_owned(),
                    value: other.to_string(),
                })
            }
        };
        Ok(Box::new(Fragment6 {
            size: size as usize,
            atomic,
            next_id: Mutex::new(None),
        }))
    }
}

struct Fragment6 {
    size: usize,
    atomic: bool,
    next_id: Mutex<Option<u32>>,
}

impl Fragment6 {
    fn next_identification(&self, rng: &mut StdRng) -> u32 {
        let mut guard = self.next_id.lock().expect("fragment6 id mutex poisoned");
        let id = guard.unwrap_or_else(|| rng.gen::<u32>());
        *guard = Some(id.wrapping_add(1));
        id
    }
}

impl Modification for Fragment6 {
    fn apply(
        &self,
        carrier: PacketCarrier,
        rng: &mut StdRng,
    ) -> Result<PacketCarrier, ModificationRuntimeError> {
        let mut out = PacketCarrier::new();
        for entry in carrier.iter() {
            match entry.packet.ipv6() {
                Some(_) => {
                    let identification = self.next_identification(rng);
                    let fragments =
                        fragment_one_ipv6(&entry.packet, self.size, self.atomic, identification)
                            .map_err(|e| ModificationRuntimeError {
                                modification: self.describe(),
                                reason: e,
                            })?;
                    for frag in fragments {
                        out.append(frag, entry.delay);
                    }
                }
                None => out.append(entry.packet.clone(), entry.delay),
            }
        }
        Ok(out)
    }

    fn describe(&self) -> String {
        format!("fragment6(size={}, atomic={})", self.size, self.atomic)
    }
}

fn fragment_one_ipv6(
    packet: &Packet,
    size: usize,
    atomic: bool,
    identification: u32,
) -> Result<Vec<Packet>, String> {
    let bytes = packet.as_bytes();
    let upper = ipv6::walk_extension_headers(bytes).ok_or("malformed ipv6 packet")?;
    if upper.fragment_header_offset.is_some() {
        // Already fragmented; pass through unchanged rather than double-fragment.
        return Ok(vec![packet.clone()]);
    }
    let unfragmentable = &bytes[..upper.offset];
    let fragmentable = &bytes[upper.offset..];
    let overhead = unfragmentable.len() + ipv6::FRAGMENT_HEADER_LEN;
    if size <= overhead {
        return Err(format!(
            "size {size} too small to hold {overhead} bytes of header overhead"
        ));
    }
    let max_payload = size - overhead;
    let max_payload = max_payload - (max_payload % 8);

    if fragmentable.len() + overhead <= size {
        if !atomic {
            return Ok(vec![packet.clone()]);
        }
        return Ok(vec![build_ipv6_fragment(
            unfragmentable,
            upper.protocol,
            fragmentable,
            0,
            false,
            identification,
        )]);
    }

    if max_payload == 0 {
        return Err("size leaves no room for an 8-byte-aligned fragment payload".into());
    }
    let chunks: Vec<&[u8]> = fragmentable.chunks(max_payload).collect();
    let mut fragments = Vec::with_capacity(chunks.len());
    let mut offset_units: u16 = 0;
    for (i, chunk) in chunks.iter().enumerate() {
        let more = i + 1 != chunks.len();
        fragments.push(build_ipv6_fragment(
            unfragmentable,
            upper.protocol,
            chunk,
            offset_units,
            more,
            identification,
        ));
        offset_units += (chunk.len() / 8) as u16;
    }
    Ok(fragments)
}

fn build_ipv6_fragment(
    unfragmentable: &[u8],
    upper_protocol: pnet::packet::ip::IpNextHeaderProtocol,
    chunk: &[u8],
    offset_units: u16,
    more_fragments: bool,
    identification: u32,
) -> Packet {
    let mut buf = vec![0u8; unfragmentable.len() + ipv6::FRAGMENT_HEADER_LEN + chunk.len()];
    buf[..unfragmentable.len()].copy_from_slice(unfragmentable);
    ipv6::set_next_header(&mut buf, IpNextHeaderProtocols::Ipv6Frag);
    let frag_header = FragmentHeader {
        next_header: upper_protocol,
        fragment_offset: offset_units,
        more_fragments,
        identification,
    };
    frag_header.write_into(&mut buf[unfragmentable.len()..]);
    buf[unfragmentable.len() + ipv6::FRAGMENT_HEADER_LEN..].copy_from_slice(chunk);
    let payload_length = (buf.len() - ipv6::FIXED_HEADER_LEN) as u16;
    ipv6::set_payload_length(&mut buf, payload_length);
    Packet::new(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnet::packet::ipv4::MutableIpv4Packet;
    use rand::SeedableRng;

    fn build_ipv4(payload_len: usize) -> Packet {
        let total = 20 + payload_len;
        let mut buf = vec![0u8; total];
        let mut ip = MutableIpv4Packet::new(&mut buf).unwrap();
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_total_length(total as u16);
        ip.set_ttl(64);
        ip.set_identification(0xabcd);
        ip.set_next_level_protocol(IpNextHeaderProtocols::Udp);
        ip.set_source("10.0.0.1".parse().unwrap());
        ip.set_destination("10.0.0.2".parse().unwrap());
        for (i, b) in ip.payload_mut().iter_mut().enumerate() {
            *b = i as u8;
        }
        let csum = checksum(&ip.to_immutable());
        ip.set_checksum(csum);
        drop(ip);
        Packet::new(buf)
    }

    #[test]
    fn fragment4_size_8_on_40_byte_payload_yields_5_fragments() {
        let pkt = build_ipv4(40);
        let carrier = PacketCarrier::single(pkt);
        let modi = Fragment4Kind.parse_args(&[Value::Int(8)]).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let out = modi.apply(carrier, &mut rng).unwrap();
        assert_eq!(out.len(), 5);
        for (i, entry) in out.iter().enumerate() {
            let ip = entry.packet.ipv4().unwrap();
            assert_eq!(ip.get_fragment_offset(), i as u16);
            let mf = ip.get_flags() & MORE_FRAGMENTS != 0;
            assert_eq!(mf, i != 4);
            assert_eq!(ip.get_flags() & 0b010, 0);
        }
    }

    #[test]
    fn fragment4_leaves_packets_that_already_fit_untouched() {
        let pkt = build_ipv4(4);
        let carrier = PacketCarrier::single(pkt.clone());
        let modi = Fragment4Kind.parse_args(&[Value::Int(8)]).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let out = modi.apply(carrier, &mut rng).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.get(0).unwrap().packet, pkt);
    }

    fn build_ipv6(payload_len: usize) -> Packet {
        let total = ipv6::FIXED_HEADER_LEN + payload_len;
        let mut buf = vec![0u8; total];
        buf[0] = 0x60;
        let payload_length = payload_len as u16;
        buf[4..6].copy_from_slice(&payload_length.to_be_bytes());
        buf[6] = IpNextHeaderProtocols::Udp.0;
        buf[7] = 64;
        for (i, b) in buf[ipv6::FIXED_HEADER_LEN..].iter_mut().enumerate() {
            *b = i as u8;
        }
        Packet::new(buf)
    }

    #[test]
    fn fragment6_splits_into_aligned_chunks_with_fragment_header() {
        let pkt = build_ipv6(100);
        let carrier = PacketCarrier::single(pkt);
        // overhead = 40 (fixed header) + 8 (fragment header) = 48
        let modi = Fragment6Kind.parse_args(&[Value::Int(64)]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let out = modi.apply(carrier, &mut rng).unwrap();
        assert!(out.len() > 1);
        let ids: Vec<u32> = out
            .iter()
            .map(|e| {
                let off = e.packet.ipv6_fragment_header_offset().unwrap();
                FragmentHeader::parse(&e.packet.as_bytes()[off..]).unwrap().identification
            })
            .collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        let last = out.len() - 1;
        for (i, entry) in out.iter().enumerate() {
            let off = entry.packet.ipv6_fragment_header_offset().unwrap();
            let header = FragmentHeader::parse(&entry.packet.as_bytes()[off..]).unwrap();
            assert_eq!(header.more_fragments, i != last);
        }
    }

    #[test]
    fn fragment6_small_payload_passes_through_when_not_atomic() {
        let pkt = build_ipv6(4);
        let carrier = PacketCarrier::single(pkt.clone());
        let modi = Fragment6Kind.parse_args(&[Value::Int(64)]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let out = modi.apply(carrier, &mut rng).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.get(0).unwrap().packet, pkt);
    }

    #[test]
    fn fragment6_small_payload_emits_atomic_fragment_when_requested() {
        let pkt = build_ipv6(4);
        let carrier = PacketCarrier::single(pkt);
        let modi = Fragment6Kind
            .parse_args(&[Value::Int(64), Value::Str("atomic".into())])
            .unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let out = modi.apply(carrier, &mut rng).unwrap();
        assert_eq!(out.len(), 1);
        let off = out.get(0).unwrap().packet.ipv6_fragment_header_offset().unwrap();
        let header = FragmentHeader::parse(&out.get(0).unwrap().packet.as_bytes()[off..]).unwrap();
        assert_eq!(header.fragment_offset, 0);
        assert!(!header.more_fragments);
    }
}
