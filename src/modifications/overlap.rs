//! Overlapping IPv4 fragments, used to probe how a path's reassembly
//! policy resolves conflicting overlapping data (the classic
//! Ptacek/Newsham-style firewall-evasion scenario). Three strategies are
//! fixed (design decision, see `DESIGN.md`): `favor-first`, `favor-last`
//! and `zero-length-overlap`.

use super::{expect_arity, Modification, ModificationKind};
use crate::atoms::Value;
use crate::carrier::PacketCarrier;
use crate::errors::{ArgumentError, ModificationRuntimeError};
use crate::packet::Packet;
use pnet::packet::ipv4::{checksum, Ipv4Packet, MutableIpv4Packet};
use pnet::packet::MutablePacket;
use rand::rngs::StdRng;

const MORE_FRAGMENTS: u8 = 0b001;
const OVERLAP_BYTES: usize = 8;
const GARBAGE: u8 = 0xff;

pub struct OverlapKind;

impl ModificationKind for OverlapKind {
    fn name(&self) -> &'static str {
        "overlap"
    }

    fn usage(&self) -> &'static str {
        "overlap <'favor-first' | 'favor-last' | 'zero-length-overlap'> <int size>: splits each \
         IPv4 entry into deliberately overlapping fragments of at most `size` payload bytes each"
    }

    fn parse_args(&self, args: &[Value]) -> Result<Box<dyn Modification>, ArgumentError> {
        let args = expect_arity(self.name(), args, 2)?;
        let kind = match args[0].as_str()? {
            "favor-first" => OverlapKindSpec::FavorFirst,
            "favor-last" => OverlapKindSpec::FavorLast,
            "zero-length-overlap" => OverlapKindSpec::ZeroLengthOverlap,
            other => {
                return Err(ArgumentError::InvalidValue {
                    name: self.name().to_owned(),
                    value: other.to_owned(),
                })
            }
        };
        let size = args[1].as_int()?;
        if size <= 0 || size % 8 != 0 {
            return Err(ArgumentError::InvalidValue {
                name: self.name().to_owned(),
                value: size.to_string(),
            });
        }
        if !matches!(kind, OverlapKindSpec::ZeroLengthOverlap) && size as usize <= OVERLAP_BYTES {
            return Err(ArgumentError::InvalidValue {
                name: self.name().to_owned(),
                value: size.to_string(),
            });
        }
        Ok(Box::new(Overlap {
            kind,
            size: size as usize,
        }))
    }
}

#[derive(Clone, Copy)]
enum OverlapKindSpec {
    FavorFirst,
    FavorLast,
    ZeroLengthOverlap,
}

struct Overlap {
    kind: OverlapKindSpec,
    size: usize,
}

impl Modification for Overlap {
    fn apply(
        &self,
        carrier: PacketCarrier,
        _rng: &mut StdRng,
    ) -> Result<PacketCarrier, ModificationRuntimeError> {
        let mut out = PacketCarrier::new();
        for entry in carrier.iter() {
            match entry.packet.ipv4() {
                Some(_) => {
                    let fragments = overlap_one(&entry.packet, self.kind, self.size).map_err(|e| {
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
        let kind = match self.kind {
            OverlapKindSpec::FavorFirst => "favor-first",
            OverlapKindSpec::FavorLast => "favor-last",
            OverlapKindSpec::ZeroLengthOverlap => "zero-length-overlap",
        };
        format!("overlap(kind={kind}, size={})", self.size)
    }
}

fn overlap_one(packet: &Packet, kind: OverlapKindSpec, size: usize) -> Result<Vec<Packet>, String> {
    let bytes = packet.as_bytes();
    let ip = Ipv4Packet::new(bytes).ok_or("truncated ipv4 header")?;
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
    let src = ip.get_source();
    let dst = ip.get_destination();
    let header_bytes = bytes[..header_len].to_vec();

    let chunks: Vec<&[u8]> = payload.chunks(size).collect();
    let mut plan: Vec<(u16, Vec<u8>)> = Vec::new();
    let mut offset_bytes: usize = 0;
    for (i, chunk) in chunks.iter().enumerate() {
        let is_last = i + 1 == chunks.len();
        match kind {
            OverlapKindSpec::FavorFirst | OverlapKindSpec::FavorLast => {
                let mut data = chunk.to_vec();
                let overlap = OVERLAP_BYTES.min(data.len());
                if !is_last {
                    match kind {
                        OverlapKindSpec::FavorFirst => {
                            // The next fragment re-sends this tail as garbage; a
                            // first-writer-wins reassembler recovers the genuine
                            // bytes placed here.
                        }
                        OverlapKindSpec::FavorLast => {
                            let tail_start = data.len() - overlap;
                            for b in &mut data[tail_start..] {
                                *b = GARBAGE;
                            }
                        }
                        OverlapKindSpec::ZeroLengthOverlap => unreachable!(),
                    }
                }
                plan.push((offset_bytes as u16, data));
                offset_bytes += chunk.len() - if is_last { 0 } else { overlap };
            }
            OverlapKindSpec::ZeroLengthOverlap => {
                plan.push((offset_bytes as u16, chunk.to_vec()));
                if !is_last {
                    plan.push((offset_bytes as u16, Vec::new()));
                }
                offset_bytes += chunk.len();
            }
        }
    }
    if matches!(kind, OverlapKindSpec::FavorFirst) {
        for (i, (_, data)) in plan.iter_mut().enumerate() {
            if i == 0 {
                continue;
            }
            let overlap = OVERLAP_BYTES.min(data.len());
            for b in &mut data[..overlap] {
                *b = GARBAGE;
            }
        }
    }

    let mut fragments = Vec::with_capacity(plan.len());
    for (i, (offset, data)) in plan.iter().enumerate() {
        let more_fragments = i + 1 != plan.len();
        let total_len = header_len + data.len();
        let mut buf = vec![0u8; total_len];
        buf[..header_len].copy_from_slice(&header_bytes);
        buf[header_len..].copy_from_slice(data);
        let mut frag = MutableIpv4Packet::new(&mut buf).ok_or("fragment buffer too small")?;
        frag.set_version(4);
        frag.set_total_length(total_len as u16);
        frag.set_identification(identification);
        frag.set_flags(if more_fragments { MORE_FRAGMENTS } else { 0 });
        frag.set_fragment_offset(offset / 8);
        frag.set_ttl(ttl);
        frag.set_next_level_protocol(next_proto);
        frag.set_source(src);
        frag.set_destination(dst);
        let csum = checksum(&frag.to_immutable());
        frag.set_checksum(csum);
        drop(frag);
        fragments.push(Packet::new(buf));
    }
    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnet::packet::ip::IpNextHeaderProtocols;
    use rand::SeedableRng;

    fn build_ipv4(payload: &[u8]) -> Packet {
        let total = 20 + payload.len();
        let mut buf = vec![0u8; total];
        let mut ip = MutableIpv4Packet::new(&mut buf).unwrap();
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_total_length(total as u16);
        ip.set_ttl(64);
        ip.set_identification(1);
        ip.set_next_level_protocol(IpNextHeaderProtocols::Udp);
        ip.set_source("10.0.0.1".parse().unwrap());
        ip.set_destination("10.0.0.2".parse().unwrap());
        ip.set_payload(payload);
        let csum = checksum(&ip.to_immutable());
        ip.set_checksum(csum);
        drop(ip);
        Packet::new(buf)
    }

    #[test]
    fn favor_first_leaves_genuine_bytes_in_the_earlier_fragment() {
        let payload: Vec<u8> = (0..32u8).collect();
        let pkt = build_ipv4(&payload);
        let carrier = PacketCarrier::single(pkt);
        let modi = OverlapKind
            .parse_args(&[Value::Str("favor-first".into()), Value::Int(16)])
            .unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let out = modi.apply(carrier, &mut rng).unwrap();
        assert!(out.len() >= 2);
        let first = out.get(0).unwrap().packet.ipv4().unwrap();
        assert_eq!(&first.payload()[..8], &payload[..8]);
    }

    #[test]
    fn zero_length_overlap_inserts_empty_fragment_between_real_ones() {
        let payload: Vec<u8> = (0..32u8).collect();
        let pkt = build_ipv4(&payload);
        let carrier = PacketCarrier::single(pkt);
        let modi = OverlapKind
            .parse_args(&[Value::Str("zero-length-overlap".into()), Value::Int(16)])
            .unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let out = modi.apply(carrier, &mut rng).unwrap();
        assert_eq!(out.len(), 3);
        let middle = out.get(1).unwrap().packet.ipv4().unwrap();
        assert!(middle.payload().is_empty());
    }

    #[test]
    fn fitting_payload_passes_through_unchanged() {
        let pkt = build_ipv4(&[1, 2, 3]);
        let carrier = PacketCarrier::single(pkt.clone());
        let modi = OverlapKind
            .parse_args(&[Value::Str("favor-first".into()), Value::Int(16)])
            .unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let out = modi.apply(carrier, &mut rng).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.get(0).unwrap().packet, pkt);
    }
}
