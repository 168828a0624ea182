//! Packed record layouts.
//!
//! Each record knows its fixed on-wire size and encodes/decodes itself
//! against a [`bytes`] buffer. Addresses and masks are written big-endian
//! so the wire carries them in network order; everything else is
//! little-endian.

use bytes::{Buf, BufMut};

use crate::error::{ProtocolError, Result};
use crate::{MAX_RULE_NAME, RULE_NAME_FIELD};

pub(crate) fn put_name(buf: &mut impl BufMut, name: &str) -> Result<()> {
    if name.len() > MAX_RULE_NAME {
        return Err(ProtocolError::NameTooLong(name.len()));
    }
    buf.put_slice(name.as_bytes());
    buf.put_bytes(0, RULE_NAME_FIELD - name.len());
    Ok(())
}

pub(crate) fn get_name(buf: &mut impl Buf) -> Result<String> {
    let mut raw = [0u8; RULE_NAME_FIELD];
    buf.copy_to_slice(&mut raw);
    let end = raw.iter().position(|&b| b == 0).unwrap_or(MAX_RULE_NAME);
    Ok(std::str::from_utf8(&raw[..end])?.to_owned())
}

pub(crate) fn ensure(buf: &impl Buf, need: usize) -> Result<()> {
    if buf.remaining() < need {
        return Err(ProtocolError::Truncated {
            need,
            have: buf.remaining(),
        });
    }
    Ok(())
}

/// A filter rule as it travels between administrator and engine.
///
/// Port ranges are packed words (see [`crate::pack_ports`]); `action` is one
/// of [`crate::ACTION_ADMIT`] / [`crate::ACTION_DROP`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpRule {
    pub name: String,
    pub saddr: u32,
    pub smask: u32,
    pub daddr: u32,
    pub dmask: u32,
    pub sport: u32,
    pub dport: u32,
    pub protocol: u8,
    pub action: u32,
    pub log: u32,
}

impl IpRule {
    /// Fixed on-wire size in bytes.
    pub const SIZE: usize = RULE_NAME_FIELD + 6 * 4 + 1 + 2 * 4;

    /// Writes the record to `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NameTooLong`] if the name exceeds the field.
    pub fn encode(&self, buf: &mut impl BufMut) -> Result<()> {
        put_name(buf, &self.name)?;
        buf.put_u32(self.saddr);
        buf.put_u32(self.smask);
        buf.put_u32(self.daddr);
        buf.put_u32(self.dmask);
        buf.put_u32_le(self.sport);
        buf.put_u32_le(self.dport);
        buf.put_u8(self.protocol);
        buf.put_u32_le(self.action);
        buf.put_u32_le(self.log);
        Ok(())
    }

    /// Reads one record from `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Truncated`] if fewer than [`Self::SIZE`]
    /// bytes remain.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        ensure(buf, Self::SIZE)?;
        Ok(Self {
            name: get_name(buf)?,
            saddr: buf.get_u32(),
            smask: buf.get_u32(),
            daddr: buf.get_u32(),
            dmask: buf.get_u32(),
            sport: buf.get_u32_le(),
            dport: buf.get_u32_le(),
            protocol: buf.get_u8(),
            action: buf.get_u32_le(),
            log: buf.get_u32_le(),
        })
    }
}

/// One per-packet verdict record from the engine's log buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpLog {
    /// Seconds since the Unix epoch.
    pub tm: i64,
    pub saddr: u32,
    pub daddr: u32,
    pub sport: u16,
    pub dport: u16,
    pub protocol: u8,
    /// IP payload length (total length minus header length).
    pub len: u32,
    pub action: u32,
}

impl IpLog {
    /// Fixed on-wire size in bytes.
    pub const SIZE: usize = 8 + 2 * 4 + 2 * 2 + 1 + 2 * 4;

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i64_le(self.tm);
        buf.put_u32(self.saddr);
        buf.put_u32(self.daddr);
        buf.put_u16_le(self.sport);
        buf.put_u16_le(self.dport);
        buf.put_u8(self.protocol);
        buf.put_u32_le(self.len);
        buf.put_u32_le(self.action);
    }

    /// # Errors
    ///
    /// Returns [`ProtocolError::Truncated`] on a short buffer.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        ensure(buf, Self::SIZE)?;
        Ok(Self {
            tm: buf.get_i64_le(),
            saddr: buf.get_u32(),
            daddr: buf.get_u32(),
            sport: buf.get_u16_le(),
            dport: buf.get_u16_le(),
            protocol: buf.get_u8(),
            len: buf.get_u32_le(),
            action: buf.get_u32_le(),
        })
    }
}

/// A NAT record, doubling as configured rule and per-flow mapping.
///
/// As a rule: `saddr`/`smask` select the source network, `daddr` is the
/// rewrite address and `sport..=dport` the allocatable port range, with
/// `now_port` the allocator cursor. Attached to a flow: `saddr:sport` is the
/// pre-NAT pair and `daddr:dport` the post-NAT pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NatRecord {
    pub saddr: u32,
    pub smask: u32,
    pub daddr: u32,
    pub sport: u16,
    pub dport: u16,
    pub now_port: u16,
}

impl NatRecord {
    /// Fixed on-wire size in bytes.
    pub const SIZE: usize = 3 * 4 + 3 * 2;

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.saddr);
        buf.put_u32(self.smask);
        buf.put_u32(self.daddr);
        buf.put_u16_le(self.sport);
        buf.put_u16_le(self.dport);
        buf.put_u16_le(self.now_port);
    }

    /// # Errors
    ///
    /// Returns [`ProtocolError::Truncated`] on a short buffer.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        ensure(buf, Self::SIZE)?;
        Ok(Self {
            saddr: buf.get_u32(),
            smask: buf.get_u32(),
            daddr: buf.get_u32(),
            sport: buf.get_u16_le(),
            dport: buf.get_u16_le(),
            now_port: buf.get_u16_le(),
        })
    }
}

/// A snapshot of one tracked connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnLog {
    pub saddr: u32,
    pub daddr: u32,
    pub sport: u16,
    pub dport: u16,
    pub protocol: u8,
    /// One of the `NAT_KIND_*` codes.
    pub nat_kind: u32,
    /// The flow's NAT mapping; zeroed when `nat_kind` is none.
    pub nat: NatRecord,
}

impl ConnLog {
    /// Fixed on-wire size in bytes.
    pub const SIZE: usize = 2 * 4 + 2 * 2 + 1 + 4 + NatRecord::SIZE;

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.saddr);
        buf.put_u32(self.daddr);
        buf.put_u16_le(self.sport);
        buf.put_u16_le(self.dport);
        buf.put_u8(self.protocol);
        buf.put_u32_le(self.nat_kind);
        self.nat.encode(buf);
    }

    /// # Errors
    ///
    /// Returns [`ProtocolError::Truncated`] on a short buffer.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        ensure(buf, Self::SIZE)?;
        Ok(Self {
            saddr: buf.get_u32(),
            daddr: buf.get_u32(),
            sport: buf.get_u16_le(),
            dport: buf.get_u16_le(),
            protocol: buf.get_u8(),
            nat_kind: buf.get_u32_le(),
            nat: NatRecord::decode(buf)?,
        })
    }
}
