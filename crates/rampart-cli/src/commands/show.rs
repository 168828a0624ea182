//! Listing commands: rules, NAT rules, logs and connections.

use std::net::Ipv4Addr;

use anyhow::{bail, Result};
use chrono::DateTime;
use clap::Subcommand;
use rampart_protocol::{
    Request, Response, ACTION_ADMIT, NAT_KIND_DEST, NAT_KIND_SOURCE,
};

use crate::client::ControlClient;
use crate::commands::{format_cidr, format_port_pair, format_ports, protocol_name};

/// State listings.
#[derive(Subcommand)]
pub enum LsCommand {
    /// List filter rules
    Rule,
    /// List NAT rules
    Nat,
    /// Show the latest verdict log entries
    Log {
        /// How many entries (all if omitted)
        count: Option<u32>,
    },
    /// Show tracked connections
    Connect,
}

/// Executes an `ls` subcommand.
pub async fn execute(command: LsCommand, client: &ControlClient) -> Result<()> {
    match command {
        LsCommand::Rule => list_rules(client).await,
        LsCommand::Nat => list_nat_rules(client).await,
        LsCommand::Log { count } => list_logs(client, count.unwrap_or(0)).await,
        LsCommand::Connect => list_connections(client).await,
    }
}

fn action_name(action: u32) -> &'static str {
    if action == ACTION_ADMIT {
        "accept"
    } else {
        "drop"
    }
}

pub(crate) async fn list_rules(client: &ControlClient) -> Result<()> {
    let Response::IpRules(rules) = client.call(&Request::GetAllIpRules).await? else {
        bail!("unexpected response to rule listing");
    };
    println!(
        "{:<12} {:<18} {:<18} {:<11} {:<11} {:<5} {:<6} {:<3}",
        "NAME", "SOURCE", "DESTINATION", "SPORT", "DPORT", "PROTO", "ACTION", "LOG"
    );
    for rule in rules {
        println!(
            "{:<12} {:<18} {:<18} {:<11} {:<11} {:<5} {:<6} {:<3}",
            rule.name,
            format_cidr(rule.saddr, rule.smask),
            format_cidr(rule.daddr, rule.dmask),
            format_ports(rule.sport),
            format_ports(rule.dport),
            protocol_name(rule.protocol),
            action_name(rule.action),
            if rule.log == 0 { "no" } else { "yes" },
        );
    }
    Ok(())
}

pub(crate) async fn list_nat_rules(client: &ControlClient) -> Result<()> {
    let Response::NatRules(rules) = client.call(&Request::GetNatRules).await? else {
        bail!("unexpected response to NAT listing");
    };
    println!(
        "{:<4} {:<18} {:<15} {:<13} {:<8}",
        "#", "SOURCE", "NAT ADDRESS", "PORTS", "CURSOR"
    );
    for (ordinal, rule) in rules.iter().enumerate() {
        println!(
            "{:<4} {:<18} {:<15} {:<13} {:<8}",
            ordinal,
            format_cidr(rule.saddr, rule.smask),
            Ipv4Addr::from(rule.daddr),
            format_port_pair(rule.sport, rule.dport),
            rule.now_port,
        );
    }
    Ok(())
}

async fn list_logs(client: &ControlClient, count: u32) -> Result<()> {
    let Response::IpLogs(logs) = client.call(&Request::GetAllIpLogs { count }).await? else {
        bail!("unexpected response to log listing");
    };
    println!(
        "{:<20} {:<21} {:<21} {:<5} {:<6} {:<6}",
        "TIME", "SOURCE", "DESTINATION", "PROTO", "LEN", "ACTION"
    );
    for log in logs {
        let time = DateTime::from_timestamp(log.tm, 0)
            .map_or_else(|| log.tm.to_string(), |t| t.format("%F %T").to_string());
        println!(
            "{:<20} {:<21} {:<21} {:<5} {:<6} {:<6}",
            time,
            endpoint(log.saddr, log.sport),
            endpoint(log.daddr, log.dport),
            protocol_name(log.protocol),
            log.len,
            action_name(log.action),
        );
    }
    Ok(())
}

async fn list_connections(client: &ControlClient) -> Result<()> {
    let Response::ConnLogs(conns) = client.call(&Request::GetAllConns).await? else {
        bail!("unexpected response to connection listing");
    };
    println!(
        "{:<21} {:<21} {:<5} {:<6} {:<21}",
        "SOURCE", "DESTINATION", "PROTO", "NAT", "TRANSLATED"
    );
    for conn in conns {
        let (kind, translated) = match conn.nat_kind {
            NAT_KIND_SOURCE => ("snat", endpoint(conn.nat.daddr, conn.nat.dport)),
            NAT_KIND_DEST => ("dnat", endpoint(conn.nat.daddr, conn.nat.dport)),
            _ => ("-", String::from("-")),
        };
        println!(
            "{:<21} {:<21} {:<5} {:<6} {:<21}",
            endpoint(conn.saddr, conn.sport),
            endpoint(conn.daddr, conn.dport),
            protocol_name(conn.protocol),
            kind,
            translated,
        );
    }
    Ok(())
}

fn endpoint(addr: u32, port: u16) -> String {
    if port == 0 {
        Ipv4Addr::from(addr).to_string()
    } else {
        format!("{}:{}", Ipv4Addr::from(addr), port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_formatting() {
        let addr = u32::from_be_bytes([192, 168, 1, 7]);
        assert_eq!(endpoint(addr, 22), "192.168.1.7:22");
        // Port-less protocols print the bare address.
        assert_eq!(endpoint(addr, 0), "192.168.1.7");
    }

    #[test]
    fn test_action_name() {
        assert_eq!(action_name(ACTION_ADMIT), "accept");
        assert_eq!(action_name(0), "drop");
        assert_eq!(action_name(7), "drop");
    }
}
