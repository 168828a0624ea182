//! Internet checksum arithmetic.
//!
//! Ones'-complement sums for the IPv4 header checksum and the TCP/UDP
//! pseudo-header checksums recomputed after NAT rewrites.

use std::net::Ipv4Addr;

/// Folds a 32-bit running sum into a 16-bit ones'-complement checksum.
#[inline]
#[must_use]
pub const fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Sums `data` as big-endian 16-bit words, padding an odd tail byte.
#[inline]
#[must_use]
pub fn sum_words(data: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for word in chunks.by_ref() {
        sum = sum.wrapping_add(u32::from(u16::from_be_bytes([word[0], word[1]])));
    }
    if let [tail] = chunks.remainder() {
        sum = sum.wrapping_add(u32::from(*tail) << 8);
    }
    sum
}

/// Plain internet checksum over a byte slice.
#[inline]
#[must_use]
pub fn checksum(data: &[u8]) -> u16 {
    fold(sum_words(data))
}

/// IPv4 header checksum; the checksum field must be zeroed beforehand.
#[inline]
#[must_use]
pub fn ipv4_header(header: &[u8]) -> u16 {
    debug_assert!(header.len() >= 20, "IPv4 header too short");
    checksum(header)
}

/// Transport checksum over the pseudo-header and the full segment.
///
/// Covers TCP and UDP alike; the segment includes the transport header
/// with its checksum field zeroed.
#[must_use]
pub fn transport(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, segment: &[u8]) -> u16 {
    let mut sum = sum_words(&src.octets());
    sum = sum.wrapping_add(sum_words(&dst.octets()));
    sum = sum.wrapping_add(u32::from(protocol));
    sum = sum.wrapping_add(segment.len() as u32);
    sum = sum.wrapping_add(sum_words(segment));
    fold(sum)
}
