//! Ordered filter rules and the default verdict.
//!
//! Rules live in an ordered list; the first rule whose every predicate
//! holds decides the datagram. The default verdict is guarded by the same
//! lock as the list so one read observes a consistent (rules, default)
//! pair.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ipnetwork::Ipv4Network;
use tracing::debug;

use crate::addr::PortRange;
use crate::error::{EngineError, Result};
use crate::packet::{PacketMeta, PROTO_ICMP, PROTO_TCP, PROTO_UDP};

/// The binary filter decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Let the datagram pass.
    Admit,
    /// Discard the datagram.
    Drop,
}

impl Verdict {
    /// Decodes a wire action word; anything but admit means drop.
    #[must_use]
    pub const fn from_wire(action: u32) -> Self {
        if action == rampart_protocol::ACTION_ADMIT {
            Self::Admit
        } else {
            Self::Drop
        }
    }

    /// The wire action word.
    #[must_use]
    pub const fn to_wire(self) -> u32 {
        match self {
            Self::Admit => rampart_protocol::ACTION_ADMIT,
            Self::Drop => rampart_protocol::ACTION_DROP,
        }
    }
}

/// Protocol selector of a filter rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// Matches every protocol.
    #[default]
    Any,
    /// ICMP.
    Icmp,
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
}

impl Protocol {
    /// Decodes the wire protocol byte (0 selects any protocol).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownProtocol`] for unsupported numbers.
    pub const fn from_wire(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Any),
            PROTO_ICMP => Ok(Self::Icmp),
            PROTO_TCP => Ok(Self::Tcp),
            PROTO_UDP => Ok(Self::Udp),
            other => Err(EngineError::UnknownProtocol(other)),
        }
    }

    /// The wire protocol byte.
    #[must_use]
    pub const fn to_wire(self) -> u8 {
        match self {
            Self::Any => 0,
            Self::Icmp => PROTO_ICMP,
            Self::Tcp => PROTO_TCP,
            Self::Udp => PROTO_UDP,
        }
    }

    /// Whether a datagram of `protocol` satisfies this selector.
    #[inline]
    #[must_use]
    pub const fn matches(self, protocol: u8) -> bool {
        match self {
            Self::Any => true,
            Self::Icmp => protocol == PROTO_ICMP,
            Self::Tcp => protocol == PROTO_TCP,
            Self::Udp => protocol == PROTO_UDP,
        }
    }
}

/// One named filter rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRule {
    /// Unique name, at most eleven characters.
    pub name: String,
    /// Source network predicate.
    pub src: Ipv4Network,
    /// Destination network predicate.
    pub dst: Ipv4Network,
    /// Source port predicate.
    pub sport: PortRange,
    /// Destination port predicate.
    pub dport: PortRange,
    /// Protocol predicate.
    pub protocol: Protocol,
    /// Decision for matching datagrams.
    pub verdict: Verdict,
    /// Whether matches are recorded in the log buffer.
    pub log: bool,
}

impl FilterRule {
    /// Whether the rule matches the given five-tuple.
    #[must_use]
    pub fn matches(
        &self,
        src: std::net::Ipv4Addr,
        dst: std::net::Ipv4Addr,
        sport: u16,
        dport: u16,
        protocol: u8,
    ) -> bool {
        self.matches_endpoints(src, dst, sport, dport) && self.protocol.matches(protocol)
    }

    /// Like [`Self::matches`] with the protocol predicate waived.
    ///
    /// Used when flushing connections related to a rule, where a flow of
    /// any protocol is affected.
    #[must_use]
    pub fn matches_endpoints(
        &self,
        src: std::net::Ipv4Addr,
        dst: std::net::Ipv4Addr,
        sport: u16,
        dport: u16,
    ) -> bool {
        self.src.contains(src)
            && self.dst.contains(dst)
            && self.sport.contains(sport)
            && self.dport.contains(dport)
    }
}

/// Outcome of evaluating one datagram against the rule list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleDecision {
    /// The verdict to apply.
    pub verdict: Verdict,
    /// Whether the deciding rule asks for a log entry.
    pub log: bool,
    /// Whether a rule matched (false means the default applied).
    pub matched: bool,
}

struct RuleList {
    rules: Vec<FilterRule>,
    default: Verdict,
}

/// The reader-writer-guarded rule list plus default verdict.
pub struct RuleTable {
    inner: RwLock<RuleList>,
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleTable {
    /// Creates an empty table with an admit default.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RuleList {
                rules: Vec::new(),
                default: Verdict::Admit,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RuleList> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RuleList> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts `rule` immediately after the rule named `after`, or at the
    /// head when `after` is empty.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BadRuleName`] for an empty or oversized
    /// name, [`EngineError::DuplicateRuleName`] if the name is taken and
    /// [`EngineError::NoSuchRule`] when the anchor does not exist.
    pub fn add(&self, after: &str, rule: FilterRule) -> Result<()> {
        if rule.name.is_empty() || rule.name.len() > rampart_protocol::MAX_RULE_NAME {
            return Err(EngineError::BadRuleName(rule.name));
        }
        let mut list = self.write();
        if list.rules.iter().any(|r| r.name == rule.name) {
            return Err(EngineError::DuplicateRuleName(rule.name));
        }
        let at = if after.is_empty() {
            0
        } else {
            match list.rules.iter().position(|r| r.name == after) {
                Some(idx) => idx + 1,
                None => return Err(EngineError::NoSuchRule(after.to_owned())),
            }
        };
        list.rules.insert(at, rule);
        Ok(())
    }

    /// Removes every rule named `name`, returning the removed rules in
    /// list order.
    pub fn delete(&self, name: &str) -> Vec<FilterRule> {
        let mut list = self.write();
        let mut removed = Vec::new();
        list.rules.retain(|r| {
            if r.name == name {
                removed.push(r.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Replaces the default verdict, returning the previous one.
    pub fn set_default(&self, verdict: Verdict) -> Verdict {
        let mut list = self.write();
        std::mem::replace(&mut list.default, verdict)
    }

    /// The current default verdict.
    #[must_use]
    pub fn default_verdict(&self) -> Verdict {
        self.read().default
    }

    /// Evaluates one datagram: first matching rule wins, otherwise the
    /// default verdict applies.
    #[must_use]
    pub fn evaluate(&self, meta: &PacketMeta) -> RuleDecision {
        let list = self.read();
        for rule in &list.rules {
            if rule.matches(
                meta.src,
                meta.dst,
                meta.src_port,
                meta.dst_port,
                meta.protocol,
            ) {
                debug!(rule = %rule.name, verdict = ?rule.verdict, "rule matched");
                return RuleDecision {
                    verdict: rule.verdict,
                    log: rule.log,
                    matched: true,
                };
            }
        }
        RuleDecision {
            verdict: list.default,
            log: false,
            matched: false,
        }
    }

    /// A point-in-time copy of the rule list.
    #[must_use]
    pub fn snapshot(&self) -> Vec<FilterRule> {
        self.read().rules.clone()
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().rules.len()
    }

    /// Whether the table holds no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().rules.is_empty()
    }

    /// Drops every rule and restores the admit default.
    pub fn clear(&self) {
        let mut list = self.write();
        list.rules.clear();
        list.default = Verdict::Admit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::parse_cidr;
    use std::net::Ipv4Addr;

    fn rule(name: &str, verdict: Verdict) -> FilterRule {
        FilterRule {
            name: name.into(),
            src: parse_cidr("0.0.0.0/0").unwrap(),
            dst: parse_cidr("0.0.0.0/0").unwrap(),
            sport: PortRange::any(),
            dport: PortRange::any(),
            protocol: Protocol::Any,
            verdict,
            log: false,
        }
    }

    fn meta(src: [u8; 4], dport: u16) -> PacketMeta {
        PacketMeta {
            src: src.into(),
            dst: Ipv4Addr::new(10, 0, 0, 5),
            src_port: 40000,
            dst_port: dport,
            protocol: PROTO_TCP,
            header_len: 20,
            total_len: 40,
        }
    }

    #[test]
    fn test_insert_at_head_and_after() {
        let table = RuleTable::new();
        table.add("", rule("b", Verdict::Drop)).unwrap();
        table.add("", rule("a", Verdict::Admit)).unwrap();
        table.add("a", rule("mid", Verdict::Drop)).unwrap();

        let names: Vec<_> = table.snapshot().into_iter().map(|r| r.name).collect();
        assert_eq!(names, ["a", "mid", "b"]);
    }

    #[test]
    fn test_add_missing_anchor_fails() {
        let table = RuleTable::new();
        assert!(matches!(
            table.add("ghost", rule("a", Verdict::Admit)),
            Err(EngineError::NoSuchRule(_))
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn test_add_duplicate_name_fails() {
        let table = RuleTable::new();
        table.add("", rule("a", Verdict::Admit)).unwrap();
        assert!(matches!(
            table.add("", rule("a", Verdict::Drop)),
            Err(EngineError::DuplicateRuleName(_))
        ));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_add_validates_name() {
        let table = RuleTable::new();
        assert!(matches!(
            table.add("", rule("", Verdict::Admit)),
            Err(EngineError::BadRuleName(_))
        ));
        assert!(matches!(
            table.add("", rule("far-too-long-name", Verdict::Admit)),
            Err(EngineError::BadRuleName(_))
        ));
    }

    #[test]
    fn test_first_match_wins() {
        let table = RuleTable::new();
        let mut allow = rule("allow", Verdict::Admit);
        allow.protocol = Protocol::Tcp;
        table.add("", allow).unwrap();
        let mut deny = rule("deny", Verdict::Drop);
        deny.src = parse_cidr("1.2.3.0/24").unwrap();
        table.add("allow", deny).unwrap();

        let decision = table.evaluate(&meta([1, 2, 3, 4], 80));
        assert_eq!(decision.verdict, Verdict::Admit);
        assert!(decision.matched);

        // Removing the first rule exposes the second.
        assert_eq!(table.delete("allow").len(), 1);
        let decision = table.evaluate(&meta([1, 2, 3, 4], 80));
        assert_eq!(decision.verdict, Verdict::Drop);
    }

    #[test]
    fn test_default_applies_without_match() {
        let table = RuleTable::new();
        let decision = table.evaluate(&meta([9, 9, 9, 9], 80));
        assert_eq!(decision.verdict, Verdict::Admit);
        assert!(!decision.matched);

        table.set_default(Verdict::Drop);
        let decision = table.evaluate(&meta([9, 9, 9, 9], 80));
        assert_eq!(decision.verdict, Verdict::Drop);
        assert!(!decision.log);
    }

    #[test]
    fn test_delete_removes_all_by_name() {
        let table = RuleTable::new();
        table.add("", rule("keep", Verdict::Admit)).unwrap();
        assert_eq!(table.delete("ghost").len(), 0);
        assert_eq!(table.delete("keep").len(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_protocol_selector() {
        assert!(Protocol::Any.matches(PROTO_TCP));
        assert!(Protocol::Any.matches(200));
        assert!(Protocol::Tcp.matches(PROTO_TCP));
        assert!(!Protocol::Tcp.matches(PROTO_UDP));
        assert!(matches!(
            Protocol::from_wire(47),
            Err(EngineError::UnknownProtocol(47))
        ));
    }

    #[test]
    fn test_rule_predicates() {
        let mut r = rule("scoped", Verdict::Admit);
        r.src = parse_cidr("192.168.0.0/16").unwrap();
        r.dport = PortRange::new(22, 22).unwrap();
        r.protocol = Protocol::Tcp;

        let src = Ipv4Addr::new(192, 168, 4, 2);
        let dst = Ipv4Addr::new(10, 0, 0, 5);
        assert!(r.matches(src, dst, 40000, 22, PROTO_TCP));
        assert!(!r.matches(src, dst, 40000, 23, PROTO_TCP));
        assert!(!r.matches(src, dst, 40000, 22, PROTO_UDP));
        assert!(!r.matches(Ipv4Addr::new(172, 16, 0, 1), dst, 40000, 22, PROTO_TCP));
        // The endpoint-only form ignores the protocol.
        assert!(r.matches_endpoints(src, dst, 40000, 22));
    }
}
