//! Command implementations.

pub mod nat;
pub mod rule;
pub mod show;

use std::net::Ipv4Addr;

use anyhow::{bail, Result};
use ipnetwork::Ipv4Network;

/// Parses `any`, a single port, or `min-max` into a `(min, max)` pair.
pub fn parse_ports(s: &str) -> Result<(u16, u16)> {
    if s.eq_ignore_ascii_case("any") {
        return Ok((0, u16::MAX));
    }
    let parse = |p: &str| -> Result<u16> {
        p.parse()
            .map_err(|_| anyhow::anyhow!("bad port {p:?} in range {s:?}"))
    };
    let (min, max) = match s.split_once('-') {
        Some((lo, hi)) => (parse(lo)?, parse(hi)?),
        None => {
            let port = parse(s)?;
            (port, port)
        }
    };
    if min > max {
        bail!("the min port > max port in {s:?}");
    }
    Ok((min, max))
}

/// Parses a protocol keyword into its IP protocol number.
pub fn parse_protocol(s: &str) -> Result<u8> {
    match s.to_ascii_lowercase().as_str() {
        "any" => Ok(0),
        "icmp" => Ok(1),
        "tcp" => Ok(6),
        "udp" => Ok(17),
        other => bail!("unsupported protocol {other:?} (tcp, udp, icmp or any)"),
    }
}

/// Protocol number back to its display keyword.
pub fn protocol_name(protocol: u8) -> String {
    match protocol {
        0 => "any".into(),
        1 => "icmp".into(),
        6 => "tcp".into(),
        17 => "udp".into(),
        other => other.to_string(),
    }
}

/// Formats a wire address/mask pair as CIDR.
pub fn format_cidr(addr: u32, mask: u32) -> String {
    Ipv4Network::with_netmask(Ipv4Addr::from(addr), Ipv4Addr::from(mask)).map_or_else(
        |_| format!("{}/{:#010x}", Ipv4Addr::from(addr), mask),
        |net| net.to_string(),
    )
}

/// Formats a packed port range.
pub fn format_ports(packed: u32) -> String {
    let (min, max) = rampart_protocol::unpack_ports(packed);
    format_port_pair(min, max)
}

/// Formats a `(min, max)` port pair.
pub fn format_port_pair(min: u16, max: u16) -> String {
    if min == 0 && max == u16::MAX {
        "any".into()
    } else if min == max {
        min.to_string()
    } else {
        format!("{min}-{max}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ports() {
        assert_eq!(parse_ports("any").unwrap(), (0, u16::MAX));
        assert_eq!(parse_ports("22").unwrap(), (22, 22));
        assert_eq!(parse_ports("8080-8090").unwrap(), (8080, 8090));
        assert!(parse_ports("90-80").is_err());
        assert!(parse_ports("http").is_err());
    }

    #[test]
    fn test_parse_protocol() {
        assert_eq!(parse_protocol("TCP").unwrap(), 6);
        assert_eq!(parse_protocol("udp").unwrap(), 17);
        assert_eq!(parse_protocol("icmp").unwrap(), 1);
        assert_eq!(parse_protocol("any").unwrap(), 0);
        assert!(parse_protocol("gre").is_err());
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_cidr(0xC0A8_0100, 0xFFFF_FF00), "192.168.1.0/24");
        assert_eq!(format_ports(rampart_protocol::pack_ports(0, 0xFFFF)), "any");
        assert_eq!(format_ports(rampart_protocol::pack_ports(22, 22)), "22");
        assert_eq!(
            format_ports(rampart_protocol::pack_ports(40000, 40100)),
            "40000-40100"
        );
        assert_eq!(protocol_name(6), "tcp");
        assert_eq!(protocol_name(47), "47");
    }
}
