//! Address and port-range utilities.
//!
//! CIDR handling is delegated to [`ipnetwork::Ipv4Network`]; this module
//! adds the conversions between networks and the control plane's packed
//! address/mask words, plus the packed port-range type used by filter
//! rules.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnetwork::Ipv4Network;

use crate::error::{EngineError, Result};

/// An inclusive port range, packed on the wire as `(min << 16) | max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    min: u16,
    max: u16,
}

impl PortRange {
    /// Creates a range, rejecting an inverted pair.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvertedPortRange`] when `min > max`.
    pub const fn new(min: u16, max: u16) -> Result<Self> {
        if min > max {
            return Err(EngineError::InvertedPortRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// The full range matching any port.
    #[must_use]
    pub const fn any() -> Self {
        Self {
            min: 0,
            max: u16::MAX,
        }
    }

    /// Unpacks a wire word.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvertedPortRange`] for an inverted word.
    pub const fn from_wire(packed: u32) -> Result<Self> {
        let (min, max) = rampart_protocol::unpack_ports(packed);
        Self::new(min, max)
    }

    /// Packs the range into its wire word.
    #[must_use]
    pub const fn to_wire(self) -> u32 {
        rampart_protocol::pack_ports(self.min, self.max)
    }

    /// Range minimum.
    #[must_use]
    pub const fn min(self) -> u16 {
        self.min
    }

    /// Range maximum.
    #[must_use]
    pub const fn max(self) -> u16 {
        self.max
    }

    /// Whether `port` falls inside the range.
    #[inline]
    #[must_use]
    pub const fn contains(self, port: u16) -> bool {
        self.min <= port && port <= self.max
    }

    /// Whether the range covers every port.
    #[must_use]
    pub const fn is_any(self) -> bool {
        self.min == 0 && self.max == u16::MAX
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            write!(f, "any")
        } else if self.min == self.max {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{}-{}", self.min, self.max)
        }
    }
}

impl FromStr for PortRange {
    type Err = EngineError;

    /// Parses `any`, a single port, or `min-max`.
    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("any") {
            return Ok(Self::any());
        }
        let parse = |p: &str| {
            p.parse::<u16>()
                .map_err(|_| EngineError::BadAddress(format!("bad port {p:?}")))
        };
        match s.split_once('-') {
            Some((lo, hi)) => Self::new(parse(lo)?, parse(hi)?),
            None => {
                let port = parse(s)?;
                Self::new(port, port)
            }
        }
    }
}

/// Parses a CIDR string; a bare address is a `/32` host network.
///
/// # Errors
///
/// Returns [`EngineError::BadAddress`] on malformed input.
pub fn parse_cidr(s: &str) -> Result<Ipv4Network> {
    s.parse::<Ipv4Network>()
        .map_err(|e| EngineError::BadAddress(format!("{s:?}: {e}")))
}

/// Rebuilds a network from the wire's address and mask words.
///
/// # Errors
///
/// Returns [`EngineError::BadAddress`] for a non-contiguous mask.
pub fn network_from_wire(addr: u32, mask: u32) -> Result<Ipv4Network> {
    Ipv4Network::with_netmask(Ipv4Addr::from(addr), Ipv4Addr::from(mask))
        .map_err(|e| EngineError::BadAddress(e.to_string()))
}

/// Splits a network into the wire's address and mask words.
#[must_use]
pub fn network_to_wire(net: Ipv4Network) -> (u32, u32) {
    (u32::from(net.ip()), u32::from(net.mask()))
}
