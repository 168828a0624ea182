//! Raw IPv4 datagram parsing and in-place NAT rewrites.
//!
//! The hook entry points hand the engine bare IP datagrams (no link-layer
//! header). Parsing extracts the five-tuple once; the rewrite helpers
//! mutate addresses and ports in place and recompute the affected
//! checksums: the IPv4 header checksum always, the TCP checksum always
//! (it covers the pseudo-header), and the UDP checksum only when the
//! original datagram carried one, mapping a computed zero to 0xFFFF per
//! RFC 768.

use std::net::Ipv4Addr;

use crate::checksum;
use crate::error::{EngineError, Result};

/// Protocol number for ICMP.
pub const PROTO_ICMP: u8 = 1;
/// Protocol number for TCP.
pub const PROTO_TCP: u8 = 6;
/// Protocol number for UDP.
pub const PROTO_UDP: u8 = 17;

const MIN_HEADER: usize = 20;

/// The five-tuple and header geometry of one parsed datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketMeta {
    /// Source address.
    pub src: Ipv4Addr,
    /// Destination address.
    pub dst: Ipv4Addr,
    /// Source port; zero for port-less protocols.
    pub src_port: u16,
    /// Destination port; zero for port-less protocols.
    pub dst_port: u16,
    /// IP protocol number.
    pub protocol: u8,
    /// IP header length in bytes.
    pub header_len: usize,
    /// IP total length in bytes.
    pub total_len: usize,
}

impl PacketMeta {
    /// IP payload length: total length minus header length.
    #[must_use]
    pub const fn payload_len(&self) -> u32 {
        (self.total_len - self.header_len) as u32
    }
}

/// Parses the IPv4 and transport headers of `datagram`.
///
/// # Errors
///
/// Returns [`EngineError::TruncatedPacket`] when the buffer is shorter
/// than the headers advertise and [`EngineError::BadIpHeader`] for a
/// non-IPv4 or malformed header.
pub fn parse(datagram: &[u8]) -> Result<PacketMeta> {
    if datagram.len() < MIN_HEADER {
        return Err(EngineError::TruncatedPacket {
            need: MIN_HEADER,
            have: datagram.len(),
        });
    }
    if datagram[0] >> 4 != 4 {
        return Err(EngineError::BadIpHeader);
    }
    let header_len = usize::from(datagram[0] & 0x0F) * 4;
    if header_len < MIN_HEADER {
        return Err(EngineError::BadIpHeader);
    }
    let total_len = usize::from(u16::from_be_bytes([datagram[2], datagram[3]]));
    if total_len < header_len {
        return Err(EngineError::BadIpHeader);
    }
    if total_len > datagram.len() {
        return Err(EngineError::TruncatedPacket {
            need: total_len,
            have: datagram.len(),
        });
    }

    let protocol = datagram[9];
    let src = Ipv4Addr::new(datagram[12], datagram[13], datagram[14], datagram[15]);
    let dst = Ipv4Addr::new(datagram[16], datagram[17], datagram[18], datagram[19]);

    let (src_port, dst_port) = match protocol {
        PROTO_TCP | PROTO_UDP => {
            if total_len < header_len + 4 {
                return Err(EngineError::TruncatedPacket {
                    need: header_len + 4,
                    have: total_len,
                });
            }
            (
                u16::from_be_bytes([datagram[header_len], datagram[header_len + 1]]),
                u16::from_be_bytes([datagram[header_len + 2], datagram[header_len + 3]]),
            )
        }
        _ => (0, 0),
    };

    Ok(PacketMeta {
        src,
        dst,
        src_port,
        dst_port,
        protocol,
        header_len,
        total_len,
    })
}

/// Which endpoint of the datagram a rewrite touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Source,
    Dest,
}

/// Rewrites the source address and port, fixing up checksums.
///
/// # Errors
///
/// Propagates parse errors; a datagram that parses never fails to rewrite.
pub fn rewrite_source(datagram: &mut [u8], ip: Ipv4Addr, port: u16) -> Result<()> {
    rewrite(datagram, Endpoint::Source, ip, port)
}

/// Rewrites the destination address and port, fixing up checksums.
///
/// # Errors
///
/// Propagates parse errors; a datagram that parses never fails to rewrite.
pub fn rewrite_dest(datagram: &mut [u8], ip: Ipv4Addr, port: u16) -> Result<()> {
    rewrite(datagram, Endpoint::Dest, ip, port)
}

fn rewrite(datagram: &mut [u8], endpoint: Endpoint, ip: Ipv4Addr, port: u16) -> Result<()> {
    let meta = parse(datagram)?;
    let hl = meta.header_len;

    let addr_off = match endpoint {
        Endpoint::Source => 12,
        Endpoint::Dest => 16,
    };
    datagram[addr_off..addr_off + 4].copy_from_slice(&ip.octets());

    datagram[10..12].fill(0);
    let ip_sum = checksum::ipv4_header(&datagram[..hl]);
    datagram[10..12].copy_from_slice(&ip_sum.to_be_bytes());

    let src = Ipv4Addr::new(datagram[12], datagram[13], datagram[14], datagram[15]);
    let dst = Ipv4Addr::new(datagram[16], datagram[17], datagram[18], datagram[19]);

    match meta.protocol {
        PROTO_TCP if meta.total_len >= hl + 20 => {
            let port_off = match endpoint {
                Endpoint::Source => hl,
                Endpoint::Dest => hl + 2,
            };
            datagram[port_off..port_off + 2].copy_from_slice(&port.to_be_bytes());
            datagram[hl + 16..hl + 18].fill(0);
            let sum = checksum::transport(src, dst, PROTO_TCP, &datagram[hl..meta.total_len]);
            datagram[hl + 16..hl + 18].copy_from_slice(&sum.to_be_bytes());
        }
        PROTO_UDP if meta.total_len >= hl + 8 => {
            let port_off = match endpoint {
                Endpoint::Source => hl,
                Endpoint::Dest => hl + 2,
            };
            datagram[port_off..port_off + 2].copy_from_slice(&port.to_be_bytes());
            let had_checksum = datagram[hl + 6] != 0 || datagram[hl + 7] != 0;
            if had_checksum {
                datagram[hl + 6..hl + 8].fill(0);
                let sum = checksum::transport(src, dst, PROTO_UDP, &datagram[hl..meta.total_len]);
                let sum = if sum == 0 { 0xFFFF } else { sum };
                datagram[hl + 6..hl + 8].copy_from_slice(&sum.to_be_bytes());
            }
        }
        _ => {}
    }
    Ok(())
}
