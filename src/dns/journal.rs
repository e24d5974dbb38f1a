//! IXFR change journal (C11).
//!
//! Every master-zone RR mutation is captured here, synchronously with the
//! mutation that caused it, so IXFR (C7) can serve exact deltas instead of
//! falling back to AXFR. Entries are append-only and monotonically
//! numbered per zone.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Datelike, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::dns::protocol::DnsRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalOp {
    Add,
    Delete,
    /// Carries both the before and after RR.
    Modify,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Monotonic, append-only within a zone.
    pub id: u64,
    pub zone: String,
    pub op: JournalOp,
    pub old_serial: u32,
    pub new_serial: u32,
    pub before: Option<DnsRecord>,
    pub after: Option<DnsRecord>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub retention_days: u32,
    pub max_entries_per_zone: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy {
            retention_days: 7,
            max_entries_per_zone: 100_000,
        }
    }
}

#[derive(Debug, Default)]
struct ZoneJournal {
    next_id: u64,
    entries: Vec<JournalEntry>,
}

/// Per-zone append-only journals, guarded by a single lock (mutations are
/// already serialized per zone by the UPDATE/AXFR-apply paths upstream).
#[derive(Default)]
pub struct Journal {
    zones: RwLock<HashMap<String, ZoneJournal>>,
    retention: RetentionPolicy,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Computes the next SOA serial per §4.11: `max(current + 1, YYYYMMDD *
/// 100 + revision)`, where `revision` is the count of bumps already made
/// today. Returns `None` if today's 99 revisions are exhausted.
pub fn next_serial(current: u32, bumps_today: u32) -> Option<u32> {
    if bumps_today >= 99 {
        return None;
    }
    let today = Utc::now();
    let date_based = today.year() as u32 * 1_000_000 + today.month() * 10_000 + today.day() * 100;
    let date_based = date_based + (bumps_today + 1);
    Some(current.wrapping_add(1).max(date_based))
}

impl Journal {
    pub fn new() -> Self {
        Journal {
            zones: RwLock::new(HashMap::new()),
            retention: RetentionPolicy::default(),
        }
    }

    pub fn with_retention(retention: RetentionPolicy) -> Self {
        Journal {
            zones: RwLock::new(HashMap::new()),
            retention,
        }
    }

    /// Appends one entry for a single RR-level operation and returns its
    /// assigned id.
    pub fn append(
        &self,
        zone: &str,
        op: JournalOp,
        old_serial: u32,
        new_serial: u32,
        before: Option<DnsRecord>,
        after: Option<DnsRecord>,
    ) -> u64 {
        let mut zones = self.zones.write();
        let entry_zone = zones.entry(zone.to_string()).or_default();
        let id = entry_zone.next_id;
        entry_zone.next_id += 1;

        entry_zone.entries.push(JournalEntry {
            id,
            zone: zone.to_string(),
            op,
            old_serial,
            new_serial,
            before,
            after,
            timestamp: now_secs(),
        });

        id
    }

    /// Returns every entry with `old_serial >= since_serial`, in id order,
    /// or `None` if the journal doesn't go back far enough (IXFR must fall
    /// back to AXFR in that case).
    pub fn deltas_since(&self, zone: &str, since_serial: u32) -> Option<Vec<JournalEntry>> {
        let zones = self.zones.read();
        let journal = zones.get(zone)?;

        if journal.entries.is_empty() {
            return if since_serial == 0 { Some(Vec::new()) } else { None };
        }

        let oldest = journal.entries.first().unwrap().old_serial;
        if serial_lt(since_serial, oldest) {
            return None;
        }

        Some(
            journal
                .entries
                .iter()
                .filter(|e| serial_ge(e.old_serial, since_serial))
                .cloned()
                .collect(),
        )
    }

    /// Prunes entries older than `retention_days` or beyond
    /// `max_entries_per_zone`, but never removes an entry whose
    /// `new_serial` is still needed to serve IXFR to `oldest_outstanding`.
    pub fn prune(&self, zone: &str, oldest_outstanding_serial: Option<u32>) {
        let cutoff = now_secs().saturating_sub(self.retention.retention_days as u64 * 86_400);
        let mut zones = self.zones.write();
        let Some(journal) = zones.get_mut(zone) else {
            return;
        };

        let floor = oldest_outstanding_serial.unwrap_or(0);
        let keep_from = journal
            .entries
            .iter()
            .position(|e| serial_ge(e.new_serial, floor))
            .unwrap_or(journal.entries.len());

        let excess = journal.entries.len().saturating_sub(self.retention.max_entries_per_zone);
        let prune_by_count = excess.min(keep_from);

        let mut drop_count = prune_by_count;
        for (i, e) in journal.entries.iter().enumerate() {
            if i >= keep_from {
                break;
            }
            if e.timestamp < cutoff {
                drop_count = drop_count.max(i + 1);
            }
        }

        if drop_count > 0 {
            journal.entries.drain(0..drop_count);
        }
    }

    pub fn len(&self, zone: &str) -> usize {
        self.zones.read().get(zone).map(|j| j.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, zone: &str) -> bool {
        self.len(zone) == 0
    }
}

/// RFC 1982 serial-number comparison: `a < b`.
fn serial_lt(a: u32, b: u32) -> bool {
    a != b && (b.wrapping_sub(a) as i32) > 0
}

fn serial_ge(a: u32, b: u32) -> bool {
    a == b || !serial_lt(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_assigns_monotonic_ids() {
        let journal = Journal::new();
        let id1 = journal.append("example.com.", JournalOp::Add, 1, 2, None, None);
        let id2 = journal.append("example.com.", JournalOp::Add, 2, 3, None, None);
        assert_eq!(id1, 0);
        assert_eq!(id2, 1);
    }

    #[test]
    fn deltas_since_returns_none_when_journal_too_short() {
        let journal = Journal::new();
        journal.append("z.", JournalOp::Add, 10, 11, None, None);
        assert!(journal.deltas_since("z.", 5).is_none());
    }

    #[test]
    fn deltas_since_returns_matching_range() {
        let journal = Journal::new();
        journal.append("z.", JournalOp::Add, 2025112603, 2025112604, None, None);
        journal.append("z.", JournalOp::Add, 2025112604, 2025112605, None, None);

        let deltas = journal.deltas_since("z.", 2025112603).unwrap();
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].old_serial, 2025112603);
        assert_eq!(deltas[1].new_serial, 2025112605);
    }

    #[test]
    fn serial_comparison_handles_wraparound() {
        assert!(serial_lt(0xFFFF_FFFF, 0));
        assert!(!serial_lt(0, 0xFFFF_FFFF));
    }

    #[test]
    fn next_serial_prefers_date_based_when_higher() {
        let serial = next_serial(1, 0).unwrap();
        assert!(serial > 2025_00_00_00);
    }

    #[test]
    fn next_serial_exhausted_returns_none() {
        assert!(next_serial(1, 99).is_none());
    }

    #[test]
    fn prune_keeps_entries_needed_by_outstanding_slave() {
        let journal = Journal::with_retention(RetentionPolicy {
            retention_days: 0,
            max_entries_per_zone: 1,
        });
        journal.append("z.", JournalOp::Add, 1, 2, None, None);
        journal.append("z.", JournalOp::Add, 2, 3, None, None);

        journal.prune("z.", Some(2));
        assert!(journal.len("z.") >= 1);
    }
}
