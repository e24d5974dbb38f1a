//! SQL-backed zone store, used when no zone-masters configuration file
//! selects the shared-memory backend. Schema (SQLite, per §6):
//!
//! ```sql
//! CREATE TABLE soa (
//!     origin   TEXT PRIMARY KEY,
//!     ns       TEXT NOT NULL,
//!     mbox     TEXT NOT NULL,
//!     serial   INTEGER NOT NULL,
//!     refresh  INTEGER NOT NULL,
//!     retry    INTEGER NOT NULL,
//!     expire   INTEGER NOT NULL,
//!     minimum  INTEGER NOT NULL,
//!     ttl      INTEGER NOT NULL
//! );
//! CREATE TABLE rr (
//!     id       INTEGER PRIMARY KEY AUTOINCREMENT,
//!     origin   TEXT NOT NULL REFERENCES soa(origin),
//!     name     TEXT NOT NULL,
//!     rtype    TEXT NOT NULL,
//!     data_json TEXT NOT NULL
//! );
//! ```
//!
//! `data_json` carries the full `DnsRecord` as JSON rather than a
//! hand-rolled presentation-format column per type; this crate's RR enum
//! already derives `Serialize`/`Deserialize`, and every other table in
//! §6 (tsig_keys, update_acl, zone_masters, zone_changes, ...) is owned
//! by the components that use them directly (tsig, acl, journal, config)
//! rather than by this store.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::dns::protocol::{DnsRecord, QueryType};

use super::{MutationOp, Result, Soa, ZoneStore, ZoneStoreError};

pub struct SqlZoneStore {
    pool: SqlitePool,
}

impl SqlZoneStore {
    pub fn new(pool: SqlitePool) -> Self {
        SqlZoneStore { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS soa (
                origin   TEXT PRIMARY KEY,
                ns       TEXT NOT NULL,
                mbox     TEXT NOT NULL,
                serial   INTEGER NOT NULL,
                refresh  INTEGER NOT NULL,
                retry    INTEGER NOT NULL,
                expire   INTEGER NOT NULL,
                minimum  INTEGER NOT NULL,
                ttl      INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rr (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                origin    TEXT NOT NULL,
                name      TEXT NOT NULL,
                rtype     TEXT NOT NULL,
                data_json TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_soa(row: &sqlx::sqlite::SqliteRow) -> Soa {
        Soa {
            origin: row.get("origin"),
            ns: row.get("ns"),
            mbox: row.get("mbox"),
            serial: row.get::<i64, _>("serial") as u32,
            refresh: row.get::<i64, _>("refresh") as u32,
            retry: row.get::<i64, _>("retry") as u32,
            expire: row.get::<i64, _>("expire") as u32,
            minimum: row.get::<i64, _>("minimum") as u32,
            ttl: row.get::<i64, _>("ttl") as u32,
        }
    }
}

impl From<sqlx::Error> for ZoneStoreError {
    fn from(e: sqlx::Error) -> Self {
        ZoneStoreError::Sql(e)
    }
}

#[async_trait]
impl ZoneStore for SqlZoneStore {
    async fn soa_lookup(&self, origin: &str) -> Result<Option<Soa>> {
        let row = sqlx::query("SELECT * FROM soa WHERE origin = ?")
            .bind(origin)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Self::row_to_soa(&r)))
    }

    async fn rrs_at(&self, origin: &str, name: &str) -> Result<Vec<DnsRecord>> {
        let rows = sqlx::query("SELECT data_json FROM rr WHERE origin = ? AND name = ?")
            .bind(origin)
            .bind(name)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let json: String = r.get("data_json");
                serde_json::from_str::<DnsRecord>(&json).ok()
            })
            .collect())
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
        let mut txn = self.pool.begin().await?;

        for op in ops {
            match op {
                MutationOp::Add(rec) => {
                    let name = rec.get_domain().unwrap_or_default();
                    let rtype = format!("{:?}", rec.get_querytype());
                    let json = serde_json::to_string(rec).map_err(|_| ZoneStoreError::CnameConflict)?;
                    sqlx::query(
                        "INSERT INTO rr (origin, name, rtype, data_json) VALUES (?, ?, ?, ?)",
                    )
                    .bind(origin)
                    .bind(&name)
                    .bind(&rtype)
                    .bind(&json)
                    .execute(&mut *txn)
                    .await?;
                }
                MutationOp::Delete(rec) => {
                    let name = rec.get_domain().unwrap_or_default();
                    let json = serde_json::to_string(rec).unwrap_or_default();
                    sqlx::query("DELETE FROM rr WHERE origin = ? AND name = ? AND data_json = ?")
                        .bind(origin)
                        .bind(&name)
                        .bind(&json)
                        .execute(&mut *txn)
                        .await?;
                }
                MutationOp::DeleteRRset { name, rtype } => {
                    let rtype_label = format!("{:?}", rtype);
                    sqlx::query("DELETE FROM rr WHERE origin = ? AND name = ? AND rtype = ?")
                        .bind(origin)
                        .bind(name)
                        .bind(&rtype_label)
                        .execute(&mut *txn)
                        .await?;
                }
                MutationOp::DeleteName { name } => {
                    sqlx::query("DELETE FROM rr WHERE origin = ? AND name = ?")
                        .bind(origin)
                        .bind(name)
                        .execute(&mut *txn)
                        .await?;
                }
            }
        }

        sqlx::query("UPDATE soa SET serial = ? WHERE origin = ?")
            .bind(new_serial as i64)
            .bind(origin)
            .execute(&mut *txn)
            .await?;

        txn.commit().await?;
        Ok(())
    }

    async fn zone_exists(&self, origin: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 as one FROM soa WHERE origin = ?")
            .bind(origin)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn list_zones(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT origin FROM soa").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|r| r.get("origin")).collect())
    }

    async fn create_zone(&self, soa: Soa) -> Result<()> {
        if self.zone_exists(&soa.origin).await? {
            return Err(ZoneStoreError::ZoneExists(soa.origin));
        }
        sqlx::query(
            "INSERT INTO soa (origin, ns, mbox, serial, refresh, retry, expire, minimum, ttl)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&soa.origin)
        .bind(&soa.ns)
        .bind(&soa.mbox)
        .bind(soa.serial as i64)
        .bind(soa.refresh as i64)
        .bind(soa.retry as i64)
        .bind(soa.expire as i64)
        .bind(soa.minimum as i64)
        .bind(soa.ttl as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_zone(&self, origin: &str) -> Result<()> {
        let mut txn = self.pool.begin().await?;
        sqlx::query("DELETE FROM rr WHERE origin = ?")
            .bind(origin)
            .execute(&mut *txn)
            .await?;
        let result = sqlx::query("DELETE FROM soa WHERE origin = ?")
            .bind(origin)
            .execute(&mut *txn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ZoneStoreError::NoSuchZone(origin.to_string()));
        }
        txn.commit().await?;
        Ok(())
    }

    async fn all_records(&self, origin: &str) -> Result<Vec<DnsRecord>> {
        let rows = sqlx::query("SELECT data_json FROM rr WHERE origin = ?")
            .bind(origin)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let json: String = r.get("data_json");
                serde_json::from_str::<DnsRecord>(&json).ok()
            })
            .collect())
    }
}
