//! Shared-memory zone store: an arena of fixed-capacity pools addressed by
//! integer index rather than pointer, guarded by a single RW-lock. The
//! transfer process is the sole writer; query processes only ever take
//! the shared (read) lock.
//!
//! This is an in-process stand-in for the position-independent mmap
//! segment §6 describes: same index-into-pool addressing and capacity
//! budget, backed by `Vec` instead of a mapped file, since the rest of
//! this crate never needs the segment to outlive the process.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::dns::protocol::{DnsRecord, QueryType};

use super::{MutationOp, Result, Soa, ZoneStore, ZoneStoreError};

pub const MAX_ZONES: usize = 10_000;
pub const MAX_RRS: usize = 1_000_000;
pub const MAX_ACL_ENTRIES: usize = 10_000;

type ZoneIndex = u32;
type RrIndex = u32;

struct ZoneSlot {
    soa: Soa,
    /// name -> indices into the RR pool.
    names: HashMap<String, Vec<RrIndex>>,
}

#[derive(Default)]
struct Segment {
    zones: HashMap<String, ZoneIndex>,
    zone_pool: Vec<Option<ZoneSlot>>,
    rr_pool: Vec<Option<DnsRecord>>,
    free_rr_slots: Vec<RrIndex>,
}

impl Segment {
    fn alloc_rr(&mut self, rec: DnsRecord) -> Result<RrIndex> {
        if let Some(idx) = self.free_rr_slots.pop() {
            self.rr_pool[idx as usize] = Some(rec);
            return Ok(idx);
        }
        if self.rr_pool.len() >= MAX_RRS {
            return Err(ZoneStoreError::CapacityExceeded);
        }
        let idx = self.rr_pool.len() as RrIndex;
        self.rr_pool.push(Some(rec));
        Ok(idx)
    }

    fn free_rr(&mut self, idx: RrIndex) {
        self.rr_pool[idx as usize] = None;
        self.free_rr_slots.push(idx);
    }
}

/// Shared-memory-style zone store, sized per the capacity budget of
/// 10 000 zones / 1 000 000 RRs / 10 000 ACL entries.
pub struct MemZoneStore {
    segment: RwLock<Segment>,
}

impl Default for MemZoneStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemZoneStore {
    pub fn new() -> Self {
        MemZoneStore {
            segment: RwLock::new(Segment::default()),
        }
    }

    fn apply_one(segment: &mut Segment, zone_idx: ZoneIndex, op: &MutationOp) -> Result<()> {
        let slot = segment.zone_pool[zone_idx as usize]
            .as_mut()
            .expect("zone index always refers to a live slot");

        match op {
            MutationOp::Add(rec) => {
                let name = rec.get_domain().unwrap_or_default();
                if is_cname_conflict(segment, slot, &name, rec) {
                    return Err(ZoneStoreError::CnameConflict);
                }
                let idx = segment.alloc_rr(rec.clone())?;
                let slot = segment.zone_pool[zone_idx as usize].as_mut().unwrap();
                slot.names.entry(name).or_default().push(idx);
            }
            MutationOp::Delete(rec) => {
                let name = rec.get_domain().unwrap_or_default();
                if let Some(indices) = slot.names.get_mut(&name) {
                    let mut removed = None;
                    indices.retain(|idx| {
                        let keep = segment.rr_pool[*idx as usize].as_ref() != Some(rec);
                        if !keep {
                            removed = Some(*idx);
                        }
                        keep
                    });
                    if let Some(idx) = removed {
                        segment.free_rr(idx);
                    }
                }
            }
            MutationOp::DeleteRRset { name, rtype } => {
                if let Some(indices) = slot.names.get_mut(name) {
                    let (keep, drop): (Vec<_>, Vec<_>) = indices.iter().copied().partition(|idx| {
                        segment.rr_pool[*idx as usize]
                            .as_ref()
                            .map(|r| r.get_querytype() != *rtype)
                            .unwrap_or(true)
                    });
                    *indices = keep;
                    for idx in drop {
                        segment.free_rr(idx);
                    }
                }
            }
            MutationOp::DeleteName { name } => {
                if let Some(indices) = slot.names.remove(name) {
                    for idx in indices {
                        segment.free_rr(idx);
                    }
                }
            }
        }

        Ok(())
    }
}

fn is_cname_conflict(segment: &Segment, slot: &ZoneSlot, name: &str, new_rec: &DnsRecord) -> bool {
    let Some(indices) = slot.names.get(name) else {
        return false;
    };
    let adding_cname = new_rec.get_querytype() == QueryType::Cname;
    indices.iter().any(|idx| {
        segment.rr_pool[*idx as usize]
            .as_ref()
            .map(|existing| {
                let existing_is_cname = existing.get_querytype() == QueryType::Cname;
                existing_is_cname != adding_cname
            })
            .unwrap_or(false)
    })
}

#[async_trait]
impl ZoneStore for MemZoneStore {
    async fn soa_lookup(&self, origin: &str) -> Result<Option<Soa>> {
        let segment = self.segment.read();
        Ok(segment
            .zones
            .get(origin)
            .and_then(|idx| segment.zone_pool[*idx as usize].as_ref())
            .map(|slot| slot.soa.clone()))
    }

    async fn rrs_at(&self, origin: &str, name: &str) -> Result<Vec<DnsRecord>> {
        let segment = self.segment.read();
        let Some(idx) = segment.zones.get(origin) else {
            return Err(ZoneStoreError::NoSuchZone(origin.to_string()));
        };
        let slot = segment.zone_pool[*idx as usize].as_ref().unwrap();
        Ok(slot
            .names
            .get(name)
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|i| segment.rr_pool[*i as usize].clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn rrs_by_type_at(&self, origin: &str, name: &str, rtype: QueryType) -> Result<Vec<DnsRecord>> {
        Ok(self
            .rrs_at(origin, name)
            .await?
            .into_iter()
            .filter(|r| r.get_querytype() == rtype)
            .collect())
    }

    async fn apply_mutation(&self, origin: &str, ops: &[MutationOp], new_serial: u32) -> Result<()> {
        let mut segment = self.segment.write();
        let zone_idx = *segment
            .zones
            .get(origin)
            .ok_or_else(|| ZoneStoreError::NoSuchZone(origin.to_string()))?;

        for op in ops {
            Self::apply_one(&mut segment, zone_idx, op)?;
        }

        segment.zone_pool[zone_idx as usize]
            .as_mut()
            .unwrap()
            .soa
            .serial = new_serial;

        Ok(())
    }

    async fn zone_exists(&self, origin: &str) -> Result<bool> {
        Ok(self.segment.read().zones.contains_key(origin))
    }

    async fn list_zones(&self) -> Result<Vec<String>> {
        Ok(self.segment.read().zones.keys().cloned().collect())
    }

    async fn create_zone(&self, soa: Soa) -> Result<()> {
        let mut segment = self.segment.write();
        if segment.zones.contains_key(&soa.origin) {
            return Err(ZoneStoreError::ZoneExists(soa.origin));
        }
        if segment.zone_pool.len() >= MAX_ZONES {
            return Err(ZoneStoreError::CapacityExceeded);
        }
        let idx = segment.zone_pool.len() as ZoneIndex;
        let origin = soa.origin.clone();
        segment.zone_pool.push(Some(ZoneSlot {
            soa,
            names: HashMap::new(),
        }));
        segment.zones.insert(origin, idx);
        Ok(())
    }

    async fn delete_zone(&self, origin: &str) -> Result<()> {
        let mut segment = self.segment.write();
        let idx = segment
            .zones
            .remove(origin)
            .ok_or_else(|| ZoneStoreError::NoSuchZone(origin.to_string()))?;
        let rr_indices: Vec<RrIndex> = segment.zone_pool[idx as usize]
            .as_ref()
            .unwrap()
            .names
            .values()
            .flatten()
            .copied()
            .collect();
        for i in rr_indices {
            segment.free_rr(i);
        }
        segment.zone_pool[idx as usize] = None;
        Ok(())
    }

    async fn all_records(&self, origin: &str) -> Result<Vec<DnsRecord>> {
        let segment = self.segment.read();
        let idx = segment
            .zones
            .get(origin)
            .ok_or_else(|| ZoneStoreError::NoSuchZone(origin.to_string()))?;
        let slot = segment.zone_pool[*idx as usize].as_ref().unwrap();
        Ok(slot
            .names
            .values()
            .flatten()
            .filter_map(|i| segment.rr_pool[*i as usize].clone())
            .collect())
    }
}
