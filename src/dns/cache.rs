//! DNS Response Cache
//!
//! This module provides a thread-safe, TTL-aware cache for non-authoritative
//! answers. The cache helps improve performance by storing previously resolved
//! DNS queries and serving them directly without needing to perform expensive
//! upstream lookups.
//!
//! # Features
//!
//! * Hash-indexed storage (65 536 buckets) with per-bucket chaining, so a
//!   lookup or insert only takes the lock for the one chain it touches
//! * TTL-based automatic expiration, with configurable `[ttl_min, ttl_max]`
//!   clamping applied at store time
//! * Support for both positive and negative (NXDOMAIN/NODATA) caching
//! * Atomic statistics: queries, hits, misses, upstream queries, ACL denials
//!
//! # Cache Structure
//!
//! The cache buckets domain names (case-insensitively) into one of 65 536
//! chains; each chain entry is a `DomainEntry` holding every query type known
//! for that name. Within a chain, lookup is a short linear scan - the bucket
//! count is sized so that scan stays cheap under normal working sets.
//!
//! # Usage
//!
//! ```rust,no_run
//! # use atlas::dns::cache::SynchronizedCache;
//! # use atlas::dns::protocol::{DnsRecord, QueryType};
//! let cache = SynchronizedCache::new();
//!
//! // Store a record
//! let records = vec![/* DNS records */];
//! cache.store(&records);
//!
//! // Lookup records
//! if let Some(result) = cache.lookup("example.com", QueryType::A) {
//!     // Use cached result
//! }
//! ```

use std::clone::Clone;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::*;
use derive_more::{Display, Error, From};
use parking_lot::RwLock;
use serde_derive::{Deserialize, Serialize};

use crate::dns::metrics::{DNS_CACHE_OPERATIONS, DNS_CACHE_SIZE};
use crate::dns::protocol::{DnsPacket, DnsRecord, QueryType, ResultCode};

/// Number of hash buckets backing the cache. Fixed, not configurable: sizing
/// it per-deployment would require rehashing, which this cache never does.
const CACHE_BUCKETS: usize = 65536;

/// Negative-cache TTL ceiling used when `ttl_min` itself is too low to be a
/// useful cap (e.g. the default of 0, which would otherwise make negative
/// caching a no-op).
const DEFAULT_NEG_CACHE_CAP: u32 = 300;

#[derive(Debug, Display, From, Error)]
pub enum CacheError {
    Io(std::io::Error),
    PoisonedLock,
}

type Result<T> = std::result::Result<T, CacheError>;

pub enum CacheState {
    PositiveCache,
    NegativeCache,
    NotCached,
}

#[derive(Clone, Eq, Debug, Serialize, Deserialize)]
pub struct RecordEntry {
    pub record: DnsRecord,
    pub timestamp: DateTime<Local>,
}

impl PartialEq<RecordEntry> for RecordEntry {
    fn eq(&self, other: &RecordEntry) -> bool {
        self.record == other.record
    }
}

impl Hash for RecordEntry {
    fn hash<H>(&self, state: &mut H)
    where
        H: Hasher,
    {
        self.record.hash(state);
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RecordSet {
    NoRecords {
        qtype: QueryType,
        ttl: u32,
        timestamp: DateTime<Local>,
    },
    Records {
        qtype: QueryType,
        records: HashSet<RecordEntry>,
    },
}

#[derive(Clone, Debug)]
pub struct DomainEntry {
    pub domain: String,
    pub record_types: HashMap<QueryType, RecordSet>,
    pub hits: u32,
    pub updates: u32,
}

impl DomainEntry {
    pub fn new(domain: String) -> DomainEntry {
        DomainEntry {
            domain,
            record_types: HashMap::new(),
            hits: 0,
            updates: 0,
        }
    }

    pub fn store_nxdomain(&mut self, qtype: QueryType, ttl: u32) {
        self.updates += 1;

        let new_set = RecordSet::NoRecords {
            qtype,
            ttl,
            timestamp: Local::now(),
        };

        self.record_types.insert(qtype, new_set);
    }

    pub fn store_record(&mut self, rec: &DnsRecord) {
        self.updates += 1;

        let entry = RecordEntry {
            record: rec.clone(),
            timestamp: Local::now(),
        };

        if let Some(&mut RecordSet::Records {
            ref mut records, ..
        }) = self.record_types.get_mut(&rec.get_querytype())
        {
            if records.contains(&entry) {
                records.remove(&entry);
            }

            records.insert(entry);
            return;
        }

        let mut records = HashSet::new();
        records.insert(entry);

        let new_set = RecordSet::Records {
            qtype: rec.get_querytype(),
            records,
        };

        self.record_types.insert(rec.get_querytype(), new_set);
    }

    pub fn get_cache_state(&self, qtype: QueryType) -> CacheState {
        match self.record_types.get(&qtype) {
            Some(RecordSet::Records { records, .. }) => {
                let now = Local::now();

                let mut valid_count = 0;
                for entry in records {
                    let ttl_offset = Duration::seconds(entry.record.get_ttl() as i64);
                    let expires = entry.timestamp + ttl_offset;
                    if expires < now {
                        continue;
                    }

                    if entry.record.get_querytype() == qtype {
                        valid_count += 1;
                    }
                }

                if valid_count > 0 {
                    CacheState::PositiveCache
                } else {
                    CacheState::NotCached
                }
            }
            Some(&RecordSet::NoRecords { ttl, timestamp, .. }) => {
                let now = Local::now();
                let ttl_offset = Duration::seconds(ttl as i64);
                let expires = timestamp + ttl_offset;

                if expires < now {
                    CacheState::NotCached
                } else {
                    CacheState::NegativeCache
                }
            }
            None => CacheState::NotCached,
        }
    }

    pub fn fill_queryresult(&self, qtype: QueryType, result_vec: &mut Vec<DnsRecord>) {
        let now = Local::now();

        let current_set = match self.record_types.get(&qtype) {
            Some(x) => x,
            None => return,
        };

        if let RecordSet::Records { ref records, .. } = *current_set {
            for entry in records {
                let ttl_offset = Duration::seconds(entry.record.get_ttl() as i64);
                let expires = entry.timestamp + ttl_offset;
                if expires < now {
                    continue;
                }

                if entry.record.get_querytype() == qtype {
                    result_vec.push(entry.record.clone());
                }
            }
        }
    }

    /// Drops record sets that have fully expired, so a long-lived chain entry
    /// doesn't grow stale query types forever.
    fn prune_expired(&mut self) {
        let now = Local::now();
        self.record_types.retain(|_, set| match set {
            RecordSet::Records { records, .. } => {
                records.retain(|entry| {
                    entry.timestamp + Duration::seconds(entry.record.get_ttl() as i64) >= now
                });
                !records.is_empty()
            }
            RecordSet::NoRecords { ttl, timestamp, .. } => {
                *timestamp + Duration::seconds(*ttl as i64) >= now
            }
        });
    }
}

fn bucket_for(domain: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    domain.to_ascii_lowercase().hash(&mut hasher);
    (hasher.finish() as usize) % CACHE_BUCKETS
}

#[derive(Debug, Default)]
struct CacheCounters {
    queries: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    upstream_queries: AtomicU64,
    acl_denials: AtomicU64,
}

/// A hash-indexed cache of non-authoritative answers.
///
/// Storage is 65 536 buckets, each an independently-locked chain of
/// `DomainEntry` values. A lookup or store only ever takes the lock for the
/// bucket its domain hashes to, so unrelated names never contend.
pub struct Cache {
    buckets: Vec<RwLock<Vec<Arc<DomainEntry>>>>,
    ttl_min: u32,
    ttl_max: u32,
    counters: CacheCounters,
}

impl Default for Cache {
    fn default() -> Self {
        Cache::new()
    }
}

impl Cache {
    pub fn new() -> Cache {
        Cache::with_ttl_bounds(0, 86400)
    }

    /// Builds a cache that clamps every stored positive RR's TTL to
    /// `[ttl_min, ttl_max]`, and bounds negative-cache entries to at most
    /// `max(ttl_min, DEFAULT_NEG_CACHE_CAP)` seconds.
    pub fn with_ttl_bounds(ttl_min: u32, ttl_max: u32) -> Cache {
        let mut buckets = Vec::with_capacity(CACHE_BUCKETS);
        buckets.resize_with(CACHE_BUCKETS, || RwLock::new(Vec::new()));
        Cache {
            buckets,
            ttl_min,
            ttl_max,
            counters: CacheCounters::default(),
        }
    }

    fn bucket(&self, domain: &str) -> &RwLock<Vec<Arc<DomainEntry>>> {
        &self.buckets[bucket_for(domain)]
    }

    pub fn lookup(&self, qname: &str, qtype: QueryType) -> Option<DnsPacket> {
        self.counters.queries.fetch_add(1, Ordering::Relaxed);

        let qtype_str = format!("{:?}", qtype);
        let mut chain = self.bucket(qname).write();

        // Evict the entry entirely once every query type it holds has
        // expired, so a cold chain doesn't accumulate dead weight.
        chain.retain_mut(|entry| {
            if entry.domain.eq_ignore_ascii_case(qname) {
                if let Some(e) = Arc::get_mut(entry) {
                    e.prune_expired();
                }
                !entry.record_types.is_empty()
            } else {
                true
            }
        });

        let entry = chain.iter_mut().find(|e| e.domain.eq_ignore_ascii_case(qname));

        let state = entry
            .as_ref()
            .map(|e| e.get_cache_state(qtype))
            .unwrap_or(CacheState::NotCached);

        match state {
            CacheState::PositiveCache => {
                DNS_CACHE_OPERATIONS.with_label_values(&["hit", &qtype_str]).inc();
                self.counters.hits.fetch_add(1, Ordering::Relaxed);

                let mut qr = DnsPacket::new();
                if let Some(domain_entry) = entry.and_then(Arc::get_mut) {
                    domain_entry.hits += 1;
                    domain_entry.fill_queryresult(qtype, &mut qr.answers);
                    domain_entry.fill_queryresult(QueryType::Ns, &mut qr.authorities);
                }

                Some(qr)
            }
            CacheState::NegativeCache => {
                DNS_CACHE_OPERATIONS
                    .with_label_values(&["negative_hit", &qtype_str])
                    .inc();
                self.counters.hits.fetch_add(1, Ordering::Relaxed);

                let mut qr = DnsPacket::new();
                qr.header.rescode = ResultCode::NXDOMAIN;
                Some(qr)
            }
            CacheState::NotCached => {
                DNS_CACHE_OPERATIONS.with_label_values(&["miss", &qtype_str]).inc();
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn store(&self, records: &[DnsRecord]) {
        for rec in records {
            let domain = match rec.get_domain() {
                Some(x) => x,
                None => continue,
            };

            let rec = rec.with_clamped_ttl(self.ttl_min, self.ttl_max);

            let qtype_str = format!("{:?}", rec.get_querytype());
            DNS_CACHE_OPERATIONS.with_label_values(&["store", &qtype_str]).inc();

            let mut chain = self.bucket(&domain).write();
            if let Some(entry) = chain
                .iter_mut()
                .find(|e| e.domain.eq_ignore_ascii_case(&domain))
                .and_then(Arc::get_mut)
            {
                entry.store_record(&rec);
                continue;
            }

            let mut entry = DomainEntry::new(domain);
            entry.store_record(&rec);
            chain.push(Arc::new(entry));
        }

        DNS_CACHE_SIZE.with_label_values(&["entries"]).set(self.len() as i64);
    }

    pub fn store_nxdomain(&self, qname: &str, qtype: QueryType, ttl: u32) {
        let ttl = ttl.min(self.ttl_min.max(DEFAULT_NEG_CACHE_CAP));

        let mut chain = self.bucket(qname).write();
        if let Some(entry) = chain
            .iter_mut()
            .find(|e| e.domain.eq_ignore_ascii_case(qname))
            .and_then(Arc::get_mut)
        {
            entry.store_nxdomain(qtype, ttl);
            return;
        }

        let mut entry = DomainEntry::new(qname.to_string());
        entry.store_nxdomain(qtype, ttl);
        chain.push(Arc::new(entry));

        DNS_CACHE_SIZE.with_label_values(&["entries"]).set(self.len() as i64);
    }

    fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.read().len()).sum()
    }

    fn list(&self) -> Vec<Arc<DomainEntry>> {
        let mut out = Vec::new();
        for bucket in &self.buckets {
            out.extend(bucket.read().iter().cloned());
        }
        out
    }

    fn snapshot_stats(&self) -> CacheStats {
        let total_entries = self.len();
        let queries = self.counters.queries.load(Ordering::Relaxed);
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);

        let hit_rate = if queries > 0 {
            (hits as f64 / queries as f64) * 100.0
        } else {
            0.0
        };

        CacheStats {
            total_entries,
            hit_rate,
            total_hits: hits,
            total_misses: misses,
            memory_usage_bytes: total_entries * std::mem::size_of::<DomainEntry>(),
            queries,
            upstream_queries: self.counters.upstream_queries.load(Ordering::Relaxed),
            acl_denials: self.counters.acl_denials.load(Ordering::Relaxed),
        }
    }

    pub fn record_upstream_query(&self) {
        self.counters.upstream_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acl_denial(&self) {
        self.counters.acl_denials.fetch_add(1, Ordering::Relaxed);
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub hit_rate: f64,
    pub total_hits: u64,
    pub total_misses: u64,
    pub memory_usage_bytes: usize,
    pub queries: u64,
    pub upstream_queries: u64,
    pub acl_denials: u64,
}

/// Thin wrapper exposing the bucket-locked `Cache` under the name the rest of
/// the server addresses it by. The locking already lives per-bucket inside
/// `Cache`, so this no longer needs an outer lock of its own.
#[derive(Default)]
pub struct SynchronizedCache {
    cache: Cache,
}

impl SynchronizedCache {
    pub fn new() -> SynchronizedCache {
        SynchronizedCache { cache: Cache::new() }
    }

    pub fn with_ttl_bounds(ttl_min: u32, ttl_max: u32) -> SynchronizedCache {
        SynchronizedCache {
            cache: Cache::with_ttl_bounds(ttl_min, ttl_max),
        }
    }

    pub fn get_stats(&self) -> Result<CacheStats> {
        Ok(self.cache.snapshot_stats())
    }

    pub fn list(&self) -> Result<Vec<Arc<DomainEntry>>> {
        Ok(self.cache.list())
    }

    pub fn lookup(&self, qname: &str, qtype: QueryType) -> Option<DnsPacket> {
        self.cache.lookup(qname, qtype)
    }

    pub fn store(&self, records: &[DnsRecord]) -> Result<()> {
        self.cache.store(records);
        Ok(())
    }

    pub fn store_nxdomain(&self, qname: &str, qtype: QueryType, ttl: u32) -> Result<()> {
        self.cache.store_nxdomain(qname, qtype, ttl);
        Ok(())
    }

    pub fn record_upstream_query(&self) {
        self.cache.record_upstream_query();
    }

    pub fn record_acl_denial(&self) {
        self.cache.record_acl_denial();
    }
}
