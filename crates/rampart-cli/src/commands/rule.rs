//! Filter-rule commands.

use anyhow::{bail, Result};
use clap::{Args, Subcommand, ValueEnum};
use ipnetwork::Ipv4Network;
use rampart_protocol::{
    pack_ports, IpRule, Request, Response, ACTION_ADMIT, ACTION_DROP, MAX_RULE_NAME,
};

use crate::client::ControlClient;
use crate::commands::{parse_ports, parse_protocol, show};

/// Filter-rule management.
#[derive(Subcommand)]
pub enum RuleCommand {
    /// Add a filter rule
    Add(AddRuleArgs),
    /// Delete every rule with this name
    Del {
        /// Rule name
        name: String,
    },
    /// List filter rules
    Ls,
    /// Set the default action for unmatched datagrams
    Default {
        /// accept or drop
        action: DefaultAction,
    },
}

/// Default verdict keywords.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DefaultAction {
    /// Admit unmatched datagrams.
    Accept,
    /// Drop unmatched datagrams.
    Drop,
}

/// Arguments for `rule add`.
#[derive(Args)]
pub struct AddRuleArgs {
    /// Rule name (max 11 characters)
    #[arg(long)]
    pub name: String,

    /// Insert after this rule; omitted inserts at the head
    #[arg(long, default_value = "")]
    pub after: String,

    /// Source network, e.g. 192.168.1.0/24
    #[arg(long, default_value = "0.0.0.0/0")]
    pub src: Ipv4Network,

    /// Destination network
    #[arg(long, default_value = "0.0.0.0/0")]
    pub dst: Ipv4Network,

    /// Source port range: a port, min-max, or any
    #[arg(long, default_value = "any")]
    pub sport: String,

    /// Destination port range
    #[arg(long, default_value = "any")]
    pub dport: String,

    /// Protocol: tcp, udp, icmp or any
    #[arg(long, default_value = "any")]
    pub proto: String,

    /// Drop matching datagrams instead of admitting them
    #[arg(long)]
    pub drop: bool,

    /// Log matching datagrams
    #[arg(long)]
    pub log: bool,
}

impl AddRuleArgs {
    fn into_request(self) -> Result<Request> {
        if self.name.is_empty() || self.name.len() > MAX_RULE_NAME {
            bail!("rule name must be 1 to {MAX_RULE_NAME} characters");
        }
        let (smin, smax) = parse_ports(&self.sport)?;
        let (dmin, dmax) = parse_ports(&self.dport)?;
        let rule = IpRule {
            name: self.name,
            saddr: self.src.ip().into(),
            smask: self.src.mask().into(),
            daddr: self.dst.ip().into(),
            dmask: self.dst.mask().into(),
            sport: pack_ports(smin, smax),
            dport: pack_ports(dmin, dmax),
            protocol: parse_protocol(&self.proto)?,
            action: if self.drop { ACTION_DROP } else { ACTION_ADMIT },
            log: u32::from(self.log),
        };
        Ok(Request::AddIpRule {
            after: self.after,
            rule,
        })
    }
}

/// Executes a `rule` subcommand.
pub async fn execute(command: RuleCommand, client: &ControlClient) -> Result<()> {
    match command {
        RuleCommand::Add(args) => {
            let request = args.into_request()?;
            match client.call(&request).await? {
                Response::Msg(text) => println!("{text}"),
                other => bail!("unexpected response: {other:?}"),
            }
        }
        RuleCommand::Del { name } => {
            if name.len() > MAX_RULE_NAME {
                bail!("rule name too long");
            }
            match client.call(&Request::DelIpRule { name }).await? {
                Response::OnlyHead { count } => println!("deleted {count} rule(s)"),
                other => bail!("unexpected response: {other:?}"),
            }
        }
        RuleCommand::Ls => show::list_rules(client).await?,
        RuleCommand::Default { action } => {
            let action = match action {
                DefaultAction::Accept => ACTION_ADMIT,
                DefaultAction::Drop => ACTION_DROP,
            };
            match client.call(&Request::SetDefaultAction { action }).await? {
                Response::Msg(text) => println!("{text}"),
                other => bail!("unexpected response: {other:?}"),
            }
        }
    }
    Ok(())
}
