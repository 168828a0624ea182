//! # rampart-engine
//!
//! A stateful IPv4 packet filter with source NAT.
//!
//! The engine inspects every IP datagram its host stack hands to the
//! three hook entry points, decides admit/drop from an ordered rule list,
//! tracks admitted flows so established traffic bypasses rule
//! evaluation, and rewrites flows matched by a SNAT rule while keeping
//! the reverse mapping that translates replies back.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                       Engine                         │
//! │  ┌───────────┐ ┌────────────┐ ┌──────────┐ ┌──────┐ │
//! │  │ RuleTable │ │ ConnTable  │ │ NatTable │ │ Logs │ │
//! │  │ ordered   │ │ ordered    │ │ SNAT     │ │ FIFO │ │
//! │  │ rules +   │ │ five-tuple │ │ rules +  │ │      │ │
//! │  │ default   │ │ index      │ │ ports    │ │      │ │
//! │  └───────────┘ └────────────┘ └──────────┘ └──────┘ │
//! │        ▲              ▲             ▲          ▲     │
//! │  filter hook    nat-in hook   nat-out hook  control  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Each shared structure carries its own reader-writer lock; no engine
//! operation holds two of them at once. The host is responsible for
//! driving [`Engine::sweep`] periodically and for delivering every
//! datagram in both directions to the hooks.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod addr;
pub mod checksum;
pub mod conntrack;
mod control;
pub mod error;
mod hooks;
pub mod log;
pub mod nat;
pub mod packet;
pub mod rules;

use std::time::{Duration, Instant};

use tracing::info;

use crate::conntrack::ConnTable;
use crate::log::LogBuffer;
use crate::nat::{NatRule, NatTable};
use crate::rules::{FilterRule, RuleTable, Verdict};

pub use error::{EngineError, Result};

/// Maximum number of buffered log entries.
pub const MAX_LOG_LEN: usize = 1000;

/// Seconds a tracked flow lives past its last activity.
pub const CONN_EXPIRES: u64 = 7;

/// Deadline multiplier applied to translated flows.
pub const CONN_NAT_TIMES: u32 = 10;

/// Seconds between sweeps of the connection table.
pub const CONN_ROLL_INTERVAL: u64 = 5;

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base flow time-to-live.
    pub conn_ttl: Duration,
    /// Multiplier applied to the TTL of translated flows.
    pub nat_ttl_multiplier: u32,
    /// Cadence the host should drive [`Engine::sweep`] at.
    pub sweep_interval: Duration,
    /// Log buffer capacity.
    pub log_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            conn_ttl: Duration::from_secs(CONN_EXPIRES),
            nat_ttl_multiplier: CONN_NAT_TIMES,
            sweep_interval: Duration::from_secs(CONN_ROLL_INTERVAL),
            log_capacity: MAX_LOG_LEN,
        }
    }
}

/// The packet filter: four shared structures and the operations the
/// datapath and control plane run against them.
pub struct Engine {
    pub(crate) rules: RuleTable,
    pub(crate) conns: ConnTable,
    pub(crate) nat: NatTable,
    pub(crate) logs: LogBuffer,
    pub(crate) config: EngineConfig,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    /// Creates an engine with the given tunables.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            rules: RuleTable::new(),
            conns: ConnTable::new(config.conn_ttl),
            nat: NatTable::new(),
            logs: LogBuffer::new(config.log_capacity),
            config,
        }
    }

    /// The engine's tunables.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The filter-rule table.
    #[must_use]
    pub const fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// The connection table.
    #[must_use]
    pub const fn connections(&self) -> &ConnTable {
        &self.conns
    }

    /// The NAT rule table.
    #[must_use]
    pub const fn nat_rules(&self) -> &NatTable {
        &self.nat
    }

    /// The verdict log buffer.
    #[must_use]
    pub const fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    pub(crate) fn nat_ttl(&self) -> Duration {
        self.config.conn_ttl * self.config.nat_ttl_multiplier
    }

    /// Inserts a filter rule after the named anchor (empty inserts at the
    /// head). A non-admit rule flushes the flows it would have matched so
    /// the new policy takes effect on existing traffic.
    ///
    /// # Errors
    ///
    /// Propagates name validation and missing-anchor errors from
    /// [`RuleTable::add`].
    pub fn add_rule(&self, after: &str, rule: FilterRule) -> Result<()> {
        let flush = (rule.verdict != Verdict::Admit).then(|| rule.clone());
        self.rules.add(after, rule)?;
        if let Some(rule) = flush {
            let erased = self.erase_related(&rule);
            info!(rule = %rule.name, erased, "filter rule added, related flows flushed");
        }
        Ok(())
    }

    /// Removes every rule with this name, flushing flows each removed
    /// rule would have matched. Returns the number of rules removed.
    pub fn delete_rules(&self, name: &str) -> usize {
        let removed = self.rules.delete(name);
        for rule in &removed {
            self.erase_related(rule);
        }
        removed.len()
    }

    /// Replaces the default verdict. Moving away from admit flushes the
    /// whole connection table so the stricter policy applies immediately.
    pub fn set_default(&self, verdict: Verdict) {
        self.rules.set_default(verdict);
        if verdict != Verdict::Admit {
            let erased = self.conns.erase_all();
            info!(erased, "default verdict tightened, connection table flushed");
        }
    }

    /// The current default verdict.
    #[must_use]
    pub fn default_verdict(&self) -> Verdict {
        self.rules.default_verdict()
    }

    /// Appends a NAT rule.
    pub fn add_nat_rule(&self, rule: NatRule) {
        self.nat.add(rule);
    }

    /// Removes the NAT rule at `ordinal`; false when out of range.
    pub fn delete_nat_rule(&self, ordinal: usize) -> bool {
        self.nat.remove(ordinal)
    }

    /// Removes expired flows. Returns the number removed.
    pub fn sweep(&self) -> usize {
        self.conns.sweep()
    }

    /// Sweep against an explicit instant.
    pub fn sweep_at(&self, now: Instant) -> usize {
        self.conns.sweep_at(now)
    }

    /// Drains every structure; configuration does not survive teardown.
    pub fn shutdown(&self) {
        self.rules.clear();
        self.nat.clear();
        self.conns.erase_all();
        self.logs.clear();
        info!("engine drained");
    }

    /// Flows whose five-tuple the rule would have matched, with the
    /// protocol predicate waived.
    fn erase_related(&self, rule: &FilterRule) -> usize {
        self.conns.erase_matching(|entry| {
            rule.matches_endpoints(
                entry.key.src(),
                entry.key.dst(),
                entry.key.src_port(),
                entry.key.dst_port(),
            )
        })
    }
}
