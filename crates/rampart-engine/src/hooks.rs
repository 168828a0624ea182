//! Datapath entry points.
//!
//! The host stack registers three hooks: the filter at pre-routing with
//! the highest priority, the DNAT rewrite at pre-routing, and the SNAT
//! rewrite at post-routing, and honors the verdict each returns. Within a
//! flow the filter verdict is computed before any NAT rewrite of the same
//! datagram; the hook ordering enforces that.

use tracing::warn;

use crate::conntrack::{ConnKey, NatKind, NatMapping};
use crate::packet;
use crate::rules::Verdict;
use crate::Engine;

impl Engine {
    /// The filter hook: verdict for one inbound datagram.
    ///
    /// A connection-table hit short-circuits to admit without touching
    /// the rules; on a miss the first matching rule (or the default)
    /// decides, and an admitted rule-matched datagram creates a flow.
    pub fn filter(&self, datagram: &[u8]) -> Verdict {
        let meta = match packet::parse(datagram) {
            Ok(meta) => meta,
            Err(err) => {
                warn!(%err, "unparseable datagram on filter hook");
                return Verdict::Admit;
            }
        };

        if let Some(entry) = self
            .conns
            .lookup_refresh(meta.src, meta.dst, meta.src_port, meta.dst_port)
        {
            if entry.log {
                self.logs.record(Verdict::Admit, &meta);
            }
            return Verdict::Admit;
        }

        let decision = self.rules.evaluate(&meta);
        if decision.matched && decision.log {
            self.logs.record(decision.verdict, &meta);
        }
        if decision.verdict == Verdict::Admit {
            self.conns.insert(
                meta.src,
                meta.dst,
                meta.src_port,
                meta.dst_port,
                meta.protocol,
                decision.matched && decision.log,
            );
        }
        decision.verdict
    }

    /// The post-routing SNAT hook.
    ///
    /// Rewrites the source of flows matched by a NAT rule, allocating a
    /// port and pairing a reverse flow on first use. Datagrams the engine
    /// cannot translate pass through unchanged.
    pub fn nat_outbound(&self, datagram: &mut [u8]) -> Verdict {
        let meta = match packet::parse(datagram) {
            Ok(meta) => meta,
            Err(err) => {
                warn!(%err, "unparseable datagram on nat-out hook");
                return Verdict::Admit;
            }
        };
        let key = ConnKey::new(meta.src, meta.dst, meta.src_port, meta.dst_port);

        let Some(entry) = self
            .conns
            .lookup_refresh(meta.src, meta.dst, meta.src_port, meta.dst_port)
        else {
            warn!(src = %meta.src, dst = %meta.dst, "admitted flow missing from connection table at nat-out");
            return Verdict::Admit;
        };

        let mapping = if entry.nat_kind == NatKind::Source {
            match entry.nat {
                Some(mapping) => mapping,
                None => return Verdict::Admit,
            }
        } else {
            let Some(rule) = self.nat.match_source(meta.src) else {
                return Verdict::Admit;
            };
            let post_port = if meta.src_port == 0 {
                0
            } else {
                match rule.allocate_port(&self.conns) {
                    Some(port) => port,
                    None => {
                        warn!(nat_ip = %rule.nat_ip, "SNAT port pool exhausted");
                        return Verdict::Admit;
                    }
                }
            };
            let mapping = NatMapping {
                pre_ip: meta.src,
                pre_port: meta.src_port,
                post_ip: rule.nat_ip,
                post_port,
            };
            self.conns.set_nat(key, mapping, NatKind::Source);
            mapping
        };

        // Pair the reverse flow so replies translate back.
        let reverse_key = ConnKey::new(meta.dst, mapping.post_ip, meta.dst_port, mapping.post_port);
        if self.conns.lookup(reverse_key).is_none() {
            self.conns.insert(
                meta.dst,
                mapping.post_ip,
                meta.dst_port,
                mapping.post_port,
                meta.protocol,
                false,
            );
            self.conns.set_nat(
                reverse_key,
                NatMapping {
                    pre_ip: mapping.post_ip,
                    pre_port: mapping.post_port,
                    post_ip: meta.src,
                    post_port: meta.src_port,
                },
                NatKind::Dest,
            );
        }

        let nat_ttl = self.nat_ttl();
        self.conns.refresh(key, nat_ttl);
        self.conns.refresh(reverse_key, nat_ttl);

        if let Err(err) = packet::rewrite_source(datagram, mapping.post_ip, mapping.post_port) {
            warn!(%err, "source rewrite failed");
        }
        Verdict::Admit
    }

    /// The pre-routing DNAT hook.
    ///
    /// Flows tagged with a destination record (the auto-created reverse
    /// side of a SNAT pairing) get their destination rewritten back to
    /// the original peer; everything else passes through unchanged.
    pub fn nat_inbound(&self, datagram: &mut [u8]) -> Verdict {
        let meta = match packet::parse(datagram) {
            Ok(meta) => meta,
            Err(err) => {
                warn!(%err, "unparseable datagram on nat-in hook");
                return Verdict::Admit;
            }
        };

        let Some(entry) = self
            .conns
            .lookup_refresh(meta.src, meta.dst, meta.src_port, meta.dst_port)
        else {
            warn!(src = %meta.src, dst = %meta.dst, "untracked flow at nat-in");
            return Verdict::Admit;
        };
        if entry.nat_kind != NatKind::Dest {
            return Verdict::Admit;
        }
        let Some(mapping) = entry.nat else {
            return Verdict::Admit;
        };

        if let Err(err) = packet::rewrite_dest(datagram, mapping.post_ip, mapping.post_port) {
            warn!(%err, "destination rewrite failed");
        }
        Verdict::Admit
    }
}
