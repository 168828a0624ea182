//! NAT-rule commands. Only source NAT is supported.

use std::net::Ipv4Addr;

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use ipnetwork::Ipv4Network;
use rampart_protocol::{NatRecord, Request, Response};

use crate::client::ControlClient;
use crate::commands::{parse_ports, show};

/// NAT-rule management.
#[derive(Subcommand)]
pub enum NatCommand {
    /// Add a source-NAT rule
    Add(AddNatArgs),
    /// Delete the NAT rule at this position (see `nat ls`)
    Del {
        /// Rule ordinal, starting at 0
        ordinal: u32,
    },
    /// List NAT rules
    Ls,
}

/// Arguments for `nat add`.
#[derive(Args)]
pub struct AddNatArgs {
    /// Source network to translate, e.g. 192.168.0.0/16
    #[arg(long)]
    pub src: Ipv4Network,

    /// Address sources are rewritten to
    #[arg(long)]
    pub to: Ipv4Addr,

    /// Allocatable port range: min-max or any
    #[arg(long, default_value = "any")]
    pub ports: String,
}

impl AddNatArgs {
    fn into_request(self) -> Result<Request> {
        let (min, max) = parse_ports(&self.ports)?;
        Ok(Request::AddNatRule {
            rule: NatRecord {
                saddr: self.src.ip().into(),
                smask: self.src.mask().into(),
                daddr: self.to.into(),
                sport: min,
                dport: max,
                now_port: 0,
            },
        })
    }
}

/// Executes a `nat` subcommand.
pub async fn execute(command: NatCommand, client: &ControlClient) -> Result<()> {
    match command {
        NatCommand::Add(args) => {
            let request = args.into_request()?;
            match client.call(&request).await? {
                Response::Msg(text) => println!("{text}"),
                other => bail!("unexpected response: {other:?}"),
            }
        }
        NatCommand::Del { ordinal } => {
            match client.call(&Request::DelNatRule { ordinal }).await? {
                Response::OnlyHead { count: 1 } => println!("deleted NAT rule {ordinal}"),
                Response::OnlyHead { .. } => bail!("no NAT rule at ordinal {ordinal}"),
                other => bail!("unexpected response: {other:?}"),
            }
        }
        NatCommand::Ls => show::list_nat_rules(client).await?,
    }
    Ok(())
}
