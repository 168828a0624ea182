//! rampart — administration CLI for the packet-filter daemon.
//!
//! ```text
//! rampart rule add|del|ls|default ...
//! rampart nat  add|del|ls ...
//! rampart ls   rule|nat|log|connect
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use rampart_cli::client::ControlClient;
use rampart_cli::commands;
use rampart_cli::commands::nat::NatCommand;
use rampart_cli::commands::rule::RuleCommand;
use rampart_cli::commands::show::LsCommand;

#[derive(Parser)]
#[command(name = "rampart")]
#[command(author, version, about = "Administer the rampart packet filter")]
struct Cli {
    /// Control socket path
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage filter rules
    #[command(subcommand)]
    Rule(RuleCommand),
    /// Manage source-NAT rules
    #[command(subcommand)]
    Nat(NatCommand),
    /// Show engine state
    #[command(subcommand)]
    Ls(LsCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = ControlClient::new(cli.socket);
    match cli.command {
        Commands::Rule(command) => commands::rule::execute(command, &client).await,
        Commands::Nat(command) => commands::nat::execute(command, &client).await,
        Commands::Ls(command) => commands::show::execute(command, &client).await,
    }
}
