//! Control-plane dispatch.
//!
//! Translates decoded [`Request`]s into engine operations and engine
//! state back into wire records. Administrator input errors surface as
//! text-status responses and never reach the datapath.

use rampart_protocol::{ConnLog, IpLog, IpRule, NatRecord, Request, Response};
use tracing::info;

use crate::addr::{network_from_wire, network_to_wire, PortRange};
use crate::conntrack::{ConnEntry, NatMapping};
use crate::error::{EngineError, Result};
use crate::log::LogEntry;
use crate::nat::NatRule;
use crate::rules::{FilterRule, Protocol, Verdict};
use crate::Engine;

fn filter_rule_from_wire(wire: &IpRule) -> Result<FilterRule> {
    Ok(FilterRule {
        name: wire.name.clone(),
        src: network_from_wire(wire.saddr, wire.smask)?,
        dst: network_from_wire(wire.daddr, wire.dmask)?,
        sport: PortRange::from_wire(wire.sport)?,
        dport: PortRange::from_wire(wire.dport)?,
        protocol: Protocol::from_wire(wire.protocol)?,
        verdict: Verdict::from_wire(wire.action),
        log: wire.log != 0,
    })
}

fn filter_rule_to_wire(rule: &FilterRule) -> IpRule {
    let (saddr, smask) = network_to_wire(rule.src);
    let (daddr, dmask) = network_to_wire(rule.dst);
    IpRule {
        name: rule.name.clone(),
        saddr,
        smask,
        daddr,
        dmask,
        sport: rule.sport.to_wire(),
        dport: rule.dport.to_wire(),
        protocol: rule.protocol.to_wire(),
        action: rule.verdict.to_wire(),
        log: u32::from(rule.log),
    }
}

fn nat_rule_from_wire(wire: &NatRecord) -> Result<NatRule> {
    if wire.sport > wire.dport {
        return Err(EngineError::InvertedPortRange {
            min: wire.sport,
            max: wire.dport,
        });
    }
    Ok(NatRule::new(
        network_from_wire(wire.saddr, wire.smask)?,
        wire.daddr.into(),
        wire.sport,
        wire.dport,
    ))
}

fn nat_rule_to_wire(rule: &NatRule) -> NatRecord {
    let (saddr, smask) = network_to_wire(rule.src);
    NatRecord {
        saddr,
        smask,
        daddr: rule.nat_ip.into(),
        sport: rule.port_min,
        dport: rule.port_max,
        now_port: rule.cursor(),
    }
}

fn mapping_to_wire(mapping: &NatMapping) -> NatRecord {
    NatRecord {
        saddr: mapping.pre_ip.into(),
        smask: 0,
        daddr: mapping.post_ip.into(),
        sport: mapping.pre_port,
        dport: mapping.post_port,
        now_port: 0,
    }
}

fn conn_to_wire(entry: &ConnEntry) -> ConnLog {
    ConnLog {
        saddr: entry.key.src().into(),
        daddr: entry.key.dst().into(),
        sport: entry.key.src_port(),
        dport: entry.key.dst_port(),
        protocol: entry.protocol,
        nat_kind: entry.nat_kind.to_wire(),
        nat: entry.nat.as_ref().map(mapping_to_wire).unwrap_or_default(),
    }
}

fn log_to_wire(entry: &LogEntry) -> IpLog {
    IpLog {
        tm: entry.tm,
        saddr: entry.src.into(),
        daddr: entry.dst.into(),
        sport: entry.src_port,
        dport: entry.dst_port,
        protocol: entry.protocol,
        len: entry.len,
        action: entry.verdict.to_wire(),
    }
}

impl Engine {
    /// Services one administrator request.
    #[must_use]
    pub fn dispatch(&self, request: &Request) -> Response {
        match request {
            Request::GetAllIpRules => {
                Response::IpRules(self.rules.snapshot().iter().map(filter_rule_to_wire).collect())
            }
            Request::AddIpRule { after, rule } => {
                let added = filter_rule_from_wire(rule).and_then(|r| self.add_rule(after, r));
                match added {
                    Ok(()) => {
                        info!(rule = %rule.name, "filter rule added");
                        Response::Msg("Success.".into())
                    }
                    Err(EngineError::NoSuchRule(_)) => {
                        Response::Msg("Fail: no such rule or retry it.".into())
                    }
                    Err(err) => Response::Msg(format!("Fail: {err}.")),
                }
            }
            Request::DelIpRule { name } => {
                let count = self.delete_rules(name) as u32;
                info!(rule = %name, count, "filter rules deleted");
                Response::OnlyHead { count }
            }
            Request::SetDefaultAction { action } => {
                let verdict = Verdict::from_wire(*action);
                self.set_default(verdict);
                match verdict {
                    Verdict::Admit => Response::Msg("Set default action to ACCEPT.".into()),
                    Verdict::Drop => Response::Msg("Set default action to DROP.".into()),
                }
            }
            Request::GetAllIpLogs { count } => {
                Response::IpLogs(self.logs.latest(*count).iter().map(log_to_wire).collect())
            }
            Request::GetAllConns => {
                Response::ConnLogs(self.conns.snapshot().iter().map(conn_to_wire).collect())
            }
            Request::AddNatRule { rule } => match nat_rule_from_wire(rule) {
                Ok(r) => {
                    info!(nat_ip = %r.nat_ip, "NAT rule added");
                    self.add_nat_rule(r);
                    Response::Msg("Success.".into())
                }
                Err(err) => Response::Msg(format!("Fail: {err}.")),
            },
            Request::DelNatRule { ordinal } => {
                let removed = self.delete_nat_rule(*ordinal as usize);
                info!(ordinal, removed, "NAT rule delete");
                Response::OnlyHead {
                    count: u32::from(removed),
                }
            }
            Request::GetNatRules => {
                Response::NatRules(self.nat.snapshot().iter().map(nat_rule_to_wire).collect())
            }
        }
    }
}
