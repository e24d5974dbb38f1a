//! Zone store (C3): one interface, two interchangeable backends.
//!
//! [`sql`] is a sqlx-backed store against the §6 schema, used when no
//! zone-masters configuration file is present. [`memzone`] is a
//! shared-memory, arena-indexed store loaded by AXFR on first contact with
//! a master, used in slave/database-less mode. A process runs exactly one.

pub mod memzone;
pub mod sql;

use async_trait::async_trait;
use derive_more::{Display, Error, From};

use crate::dns::protocol::{DnsRecord, QueryType};

pub mod serial {
    /// RFC 1982 serial-number `<`.
    pub fn lt(a: u32, b: u32) -> bool {
        a != b && (b.wrapping_sub(a) as i32) > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Soa {
    pub origin: String,
    pub ns: String,
    pub mbox: String,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
    pub ttl: u32,
}

/// An ordered mutation applied atomically by [`ZoneStore::apply_mutation`].
#[derive(Debug, Clone)]
pub enum MutationOp {
    Add(DnsRecord),
    Delete(DnsRecord),
    DeleteRRset { name: String, rtype: QueryType },
    DeleteName { name: String },
}

#[derive(Debug, Display, Error, From)]
pub enum ZoneStoreError {
    #[display(fmt = "zone {} not found", _0)]
    NoSuchZone(#[error(not(source))] String),
    #[display(fmt = "zone {} already exists", _0)]
    ZoneExists(#[error(not(source))] String),
    #[display(fmt = "zone at capacity")]
    CapacityExceeded,
    #[display(fmt = "CNAME cannot coexist with other record types at this name")]
    CnameConflict,
    Sql(sqlx::Error),
    Io(std::io::Error),
}

pub type Result<T> = std::result::Result<T, ZoneStoreError>;

/// The common interface §4.3 describes: SOA/RR lookup and one atomic,
/// ordered mutation transaction per call. Implementations must maintain,
/// regardless of backend: at most one SOA per zone, CNAME/other-type
/// mutual exclusion at a name, and serial monotonicity under RFC 1982
/// arithmetic.
#[async_trait]
pub trait ZoneStore: Send + Sync {
    async fn soa_lookup(&self, origin: &str) -> Result<Option<Soa>>;
    async fn rrs_at(&self, origin: &str, name: &str) -> Result<Vec<DnsRecord>>;
    async fn rrs_by_type_at(&self, origin: &str, name: &str, rtype: QueryType) -> Result<Vec<DnsRecord>>;

    /// Applies `ops` in order as a single transaction and returns the new
    /// SOA serial. Implementations must bump the serial even for an
    /// empty `ops` list only when explicitly instructed by the caller
    /// (UPDATE always recomputes the serial itself before calling this).
    async fn apply_mutation(&self, origin: &str, ops: &[MutationOp], new_serial: u32) -> Result<()>;

    async fn zone_exists(&self, origin: &str) -> Result<bool>;
    async fn list_zones(&self) -> Result<Vec<String>>;
    async fn create_zone(&self, soa: Soa) -> Result<()>;
    async fn delete_zone(&self, origin: &str) -> Result<()>;

    /// All RRs in the zone, for AXFR / journal-miss fallback.
    async fn all_records(&self, origin: &str) -> Result<Vec<DnsRecord>>;
}
