//! The connection table.
//!
//! An ordered five-tuple index backing stateful inspection: admitted flows
//! are inserted here so follow-up datagrams bypass rule evaluation, NAT
//! mappings hang off the entries, and a periodic sweep retires flows whose
//! deadline has passed.
//!
//! The key packs `[src_ip, dst_ip, (sport << 16) | dst_port]` and is
//! compared lexicographically; the protocol is carried on the entry for
//! display but does not participate in the comparison.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Lexicographically ordered connection key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnKey([u32; 3]);

impl ConnKey {
    /// Builds the key for a five-tuple (minus the protocol).
    #[must_use]
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, src_port: u16, dst_port: u16) -> Self {
        Self([
            u32::from(src),
            u32::from(dst),
            (u32::from(src_port) << 16) | u32::from(dst_port),
        ])
    }

    /// Source address.
    #[must_use]
    pub fn src(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.0[0])
    }

    /// Destination address.
    #[must_use]
    pub fn dst(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.0[1])
    }

    /// Source port.
    #[must_use]
    pub const fn src_port(&self) -> u16 {
        (self.0[2] >> 16) as u16
    }

    /// Destination port.
    #[must_use]
    pub const fn dst_port(&self) -> u16 {
        (self.0[2] & 0xFFFF) as u16
    }
}

/// Which translation, if any, a flow carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NatKind {
    /// Untranslated flow.
    #[default]
    None,
    /// Source translation; the flow's source is rewritten on the way out.
    Source,
    /// Destination translation; auto-created reverse flows only.
    Dest,
}

impl NatKind {
    /// The wire code for connection snapshots.
    #[must_use]
    pub const fn to_wire(self) -> u32 {
        match self {
            Self::None => rampart_protocol::NAT_KIND_NONE,
            Self::Source => rampart_protocol::NAT_KIND_SOURCE,
            Self::Dest => rampart_protocol::NAT_KIND_DEST,
        }
    }
}

/// The before/after address pair attached to a translated flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NatMapping {
    /// Address before the rewrite.
    pub pre_ip: Ipv4Addr,
    /// Port before the rewrite.
    pub pre_port: u16,
    /// Address after the rewrite.
    pub post_ip: Ipv4Addr,
    /// Port after the rewrite (zero for port-less protocols).
    pub post_port: u16,
}

/// One tracked flow.
#[derive(Debug, Clone, Copy)]
pub struct ConnEntry {
    /// The index key.
    pub key: ConnKey,
    /// Absolute expiry instant; refreshed on activity, never moved back.
    pub deadline: Instant,
    /// IP protocol, kept for display.
    pub protocol: u8,
    /// Whether fast-path hits on this flow are logged.
    pub log: bool,
    /// Which translation the flow carries.
    pub nat_kind: NatKind,
    /// The translation record when `nat_kind` is not none.
    pub nat: Option<NatMapping>,
}

/// The reader-writer-guarded ordered flow index.
pub struct ConnTable {
    inner: RwLock<BTreeMap<ConnKey, ConnEntry>>,
    ttl: Duration,
}

impl ConnTable {
    /// Creates an empty table whose entries live `ttl` past their last
    /// activity.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
            ttl,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<ConnKey, ConnEntry>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<ConnKey, ConnEntry>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// The configured base time-to-live.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Pure lookup without touching the deadline.
    #[must_use]
    pub fn lookup(&self, key: ConnKey) -> Option<ConnEntry> {
        self.read().get(&key).copied()
    }

    /// Looks up the flow for a five-tuple; a hit refreshes its deadline.
    #[must_use]
    pub fn lookup_refresh(
        &self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
    ) -> Option<ConnEntry> {
        let key = ConnKey::new(src, dst, src_port, dst_port);
        let mut map = self.write();
        let entry = map.get_mut(&key)?;
        entry.deadline = entry.deadline.max(Instant::now() + self.ttl);
        Some(*entry)
    }

    /// Inserts a fresh flow; if the key is already present the existing
    /// entry is returned unchanged.
    pub fn insert(
        &self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        protocol: u8,
        log: bool,
    ) -> ConnEntry {
        let key = ConnKey::new(src, dst, src_port, dst_port);
        let mut map = self.write();
        *map.entry(key).or_insert_with(|| ConnEntry {
            key,
            deadline: Instant::now() + self.ttl,
            protocol,
            log,
            nat_kind: NatKind::None,
            nat: None,
        })
    }

    /// Attaches a translation record to a flow.
    ///
    /// Returns false when the flow is gone.
    pub fn set_nat(&self, key: ConnKey, mapping: NatMapping, kind: NatKind) -> bool {
        let mut map = self.write();
        map.get_mut(&key).is_some_and(|entry| {
            entry.nat_kind = kind;
            entry.nat = Some(mapping);
            true
        })
    }

    /// Extends a flow's deadline to at least `ttl` from now.
    pub fn refresh(&self, key: ConnKey, ttl: Duration) {
        let mut map = self.write();
        if let Some(entry) = map.get_mut(&key) {
            entry.deadline = entry.deadline.max(Instant::now() + ttl);
        }
    }

    /// A point-in-time copy of every entry, in key order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnEntry> {
        self.read().values().copied().collect()
    }

    /// Removes every entry satisfying `predicate`, returning the count.
    pub fn erase_matching(&self, predicate: impl Fn(&ConnEntry) -> bool) -> usize {
        let mut map = self.write();
        let before = map.len();
        map.retain(|_, entry| !predicate(entry));
        before - map.len()
    }

    /// Removes every entry.
    pub fn erase_all(&self) -> usize {
        self.erase_matching(|_| true)
    }

    /// Removes every flow whose deadline has passed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Sweep against an explicit instant.
    pub fn sweep_at(&self, now: Instant) -> usize {
        self.erase_matching(|entry| entry.deadline <= now)
    }

    /// Whether any live SNAT flow already claims the post-NAT pair.
    #[must_use]
    pub fn snat_port_in_use(&self, post_ip: Ipv4Addr, post_port: u16) -> bool {
        self.read().values().any(|entry| {
            entry.nat_kind == NatKind::Source
                && entry
                    .nat
                    .is_some_and(|nat| nat.post_ip == post_ip && nat.post_port == post_port)
        })
    }

    /// Number of tracked flows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
