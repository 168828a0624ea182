//! SNAT rules and port allocation.
//!
//! The NAT table holds an ordered list of source-translation rules. A rule
//! selects flows by source network and rewrites them to `nat_ip` with a
//! port drawn from `port_min..=port_max`. The allocator walks the range
//! from a per-rule cursor, skipping ports already claimed by a live SNAT
//! flow on the same address.
//!
//! The cursor is advanced without coordinating with concurrent admitters;
//! a duplicate candidate is caught by the connection-table scan, so the
//! race only costs an extra probe.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ipnetwork::Ipv4Network;

use crate::conntrack::ConnTable;

/// One configured source-NAT rule.
#[derive(Debug)]
pub struct NatRule {
    /// Source network the rule applies to.
    pub src: Ipv4Network,
    /// Rewrite address.
    pub nat_ip: Ipv4Addr,
    /// Lowest allocatable port.
    pub port_min: u16,
    /// Highest allocatable port.
    pub port_max: u16,
    cursor: AtomicU16,
}

impl NatRule {
    /// Creates a rule; the allocator cursor starts at the range minimum.
    #[must_use]
    pub fn new(src: Ipv4Network, nat_ip: Ipv4Addr, port_min: u16, port_max: u16) -> Self {
        Self {
            src,
            nat_ip,
            port_min,
            port_max,
            cursor: AtomicU16::new(port_min),
        }
    }

    /// Whether a datagram from `src` is translated by this rule.
    #[inline]
    #[must_use]
    pub fn matches_source(&self, src: Ipv4Addr) -> bool {
        self.src.contains(src)
    }

    /// The allocator cursor's current position.
    #[must_use]
    pub fn cursor(&self) -> u16 {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Picks a free port for a new flow, or `None` when the pool is dry.
    ///
    /// Starting past the cursor (an out-of-range cursor restarts just
    /// below the minimum), each port in the range is probed at most once,
    /// wrapping from the maximum back to the minimum. A port is free when
    /// no live SNAT flow holds `(nat_ip, port)`.
    #[must_use]
    pub fn allocate_port(&self, conns: &ConnTable) -> Option<u16> {
        let lo = self.port_min;
        let hi = self.port_max;
        let mut port = self.cursor.load(Ordering::Relaxed);
        if port > hi || port < lo.saturating_sub(1) {
            port = lo.saturating_sub(1);
        }
        let span = usize::from(hi - lo) + 1;
        for _ in 0..span {
            port = if port >= hi || port < lo { lo } else { port + 1 };
            if !conns.snat_port_in_use(self.nat_ip, port) {
                self.cursor.store(port, Ordering::Relaxed);
                return Some(port);
            }
        }
        None
    }
}

impl Clone for NatRule {
    fn clone(&self) -> Self {
        Self {
            src: self.src,
            nat_ip: self.nat_ip,
            port_min: self.port_min,
            port_max: self.port_max,
            cursor: AtomicU16::new(self.cursor()),
        }
    }
}

/// The reader-writer-guarded ordered NAT rule list.
pub struct NatTable {
    inner: RwLock<Vec<Arc<NatRule>>>,
}

impl Default for NatTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NatTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Vec::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<NatRule>>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<NatRule>>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a rule to the list.
    pub fn add(&self, rule: NatRule) {
        self.write().push(Arc::new(rule));
    }

    /// Removes the rule at `ordinal`; false when out of range.
    pub fn remove(&self, ordinal: usize) -> bool {
        let mut rules = self.write();
        if ordinal < rules.len() {
            rules.remove(ordinal);
            true
        } else {
            false
        }
    }

    /// First rule matching the source address, in list order.
    #[must_use]
    pub fn match_source(&self, src: Ipv4Addr) -> Option<Arc<NatRule>> {
        self.read()
            .iter()
            .find(|rule| rule.matches_source(src))
            .cloned()
    }

    /// A point-in-time copy of the rule list.
    #[must_use]
    pub fn snapshot(&self) -> Vec<NatRule> {
        self.read().iter().map(|rule| (**rule).clone()).collect()
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drops every rule.
    pub fn clear(&self) {
        self.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::parse_cidr;
    use crate::conntrack::{NatKind, NatMapping};
    use std::time::Duration;

    fn table() -> ConnTable {
        ConnTable::new(Duration::from_secs(7))
    }

    fn claim(conns: &ConnTable, nat_ip: Ipv4Addr, port: u16) {
        let src = Ipv4Addr::new(192, 168, 1, port as u8);
        let entry = conns.insert(src, Ipv4Addr::new(8, 8, 8, 8), port, 53, 17, false);
        conns.set_nat(
            entry.key,
            NatMapping {
                pre_ip: src,
                pre_port: port,
                post_ip: nat_ip,
                post_port: port,
            },
            NatKind::Source,
        );
    }

    #[test]
    fn test_allocator_starts_past_cursor() {
        let rule = NatRule::new(
            parse_cidr("192.168.0.0/16").unwrap(),
            Ipv4Addr::new(203, 0, 113, 1),
            40000,
            40100,
        );
        let conns = table();
        assert_eq!(rule.allocate_port(&conns), Some(40001));
        assert_eq!(rule.cursor(), 40001);
    }

    #[test]
    fn test_allocator_skips_claimed_ports() {
        let nat_ip = Ipv4Addr::new(203, 0, 113, 1);
        let rule = NatRule::new(parse_cidr("192.168.0.0/16").unwrap(), nat_ip, 40000, 40010);
        let conns = table();
        claim(&conns, nat_ip, 40001);
        claim(&conns, nat_ip, 40002);
        assert_eq!(rule.allocate_port(&conns), Some(40003));
    }

    #[test]
    fn test_allocator_wraps_and_exhausts() {
        let nat_ip = Ipv4Addr::new(203, 0, 113, 1);
        let rule = NatRule::new(parse_cidr("192.168.0.0/16").unwrap(), nat_ip, 40000, 40001);
        let conns = table();

        let first = rule.allocate_port(&conns).unwrap();
        assert_eq!(first, 40001);
        claim(&conns, nat_ip, first);

        let second = rule.allocate_port(&conns).unwrap();
        assert_eq!(second, 40000);
        claim(&conns, nat_ip, second);

        assert_eq!(rule.allocate_port(&conns), None);
    }

    #[test]
    fn test_allocator_ignores_other_nat_addresses() {
        let nat_ip = Ipv4Addr::new(203, 0, 113, 1);
        let rule = NatRule::new(parse_cidr("192.168.0.0/16").unwrap(), nat_ip, 40000, 40001);
        let conns = table();
        // The same port on a different NAT address does not collide.
        claim(&conns, Ipv4Addr::new(203, 0, 113, 2), 40001);
        assert_eq!(rule.allocate_port(&conns), Some(40001));
    }

    #[test]
    fn test_invalid_cursor_normalized() {
        let rule = NatRule::new(
            parse_cidr("192.168.0.0/16").unwrap(),
            Ipv4Addr::new(203, 0, 113, 1),
            40000,
            40010,
        );
        rule.cursor.store(100, Ordering::Relaxed);
        let conns = table();
        // A cursor below the range restarts at the minimum.
        assert_eq!(rule.allocate_port(&conns), Some(40000));
    }

    #[test]
    fn test_table_ordering_and_removal() {
        let nat = NatTable::new();
        nat.add(NatRule::new(
            parse_cidr("192.168.1.0/24").unwrap(),
            Ipv4Addr::new(203, 0, 113, 1),
            1000,
            2000,
        ));
        nat.add(NatRule::new(
            parse_cidr("192.168.0.0/16").unwrap(),
            Ipv4Addr::new(203, 0, 113, 2),
            1000,
            2000,
        ));

        // First match wins even when a later rule also covers the source.
        let hit = nat.match_source(Ipv4Addr::new(192, 168, 1, 5)).unwrap();
        assert_eq!(hit.nat_ip, Ipv4Addr::new(203, 0, 113, 1));
        let hit = nat.match_source(Ipv4Addr::new(192, 168, 2, 5)).unwrap();
        assert_eq!(hit.nat_ip, Ipv4Addr::new(203, 0, 113, 2));
        assert!(nat.match_source(Ipv4Addr::new(10, 0, 0, 1)).is_none());

        assert!(!nat.remove(5));
        assert!(nat.remove(0));
        assert_eq!(nat.len(), 1);
    }
}
