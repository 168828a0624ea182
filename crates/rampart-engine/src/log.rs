//! The bounded verdict log.
//!
//! A FIFO of per-packet verdict records capped at
//! [`MAX_LOG_LEN`](crate::MAX_LOG_LEN) entries; when full, the oldest
//! entries are evicted in insertion order.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::{PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::packet::PacketMeta;
use crate::rules::Verdict;

/// One recorded verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogEntry {
    /// Seconds since the Unix epoch.
    pub tm: i64,
    /// Source address.
    pub src: Ipv4Addr,
    /// Destination address.
    pub dst: Ipv4Addr,
    /// Source port.
    pub src_port: u16,
    /// Destination port.
    pub dst_port: u16,
    /// IP protocol number.
    pub protocol: u8,
    /// IP payload length.
    pub len: u32,
    /// The verdict applied.
    pub verdict: Verdict,
}

/// The reader-writer-guarded bounded FIFO.
pub struct LogBuffer {
    inner: RwLock<VecDeque<LogEntry>>,
    capacity: usize,
}

impl LogBuffer {
    /// Creates a buffer holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(VecDeque::new()),
            capacity,
        }
    }

    /// Appends an entry, evicting from the head when over capacity.
    pub fn push(&self, entry: LogEntry) {
        let mut buf = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        buf.push_back(entry);
        while buf.len() > self.capacity {
            buf.pop_front();
        }
    }

    /// Builds and appends an entry for one datagram verdict.
    pub fn record(&self, verdict: Verdict, meta: &PacketMeta) {
        let tm = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs() as i64);
        self.push(LogEntry {
            tm,
            src: meta.src,
            dst: meta.dst,
            src_port: meta.src_port,
            dst_port: meta.dst_port,
            protocol: meta.protocol,
            len: meta.payload_len(),
            verdict,
        });
    }

    /// The last `count` entries in insertion order; zero means all.
    #[must_use]
    pub fn latest(&self, count: u32) -> Vec<LogEntry> {
        let buf = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let count = count as usize;
        let skip = if count == 0 || count > buf.len() {
            0
        } else {
            buf.len() - count
        };
        buf.iter().skip(skip).copied().collect()
    }

    /// Number of buffered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
