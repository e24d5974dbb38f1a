//! Dynamic DNS Updates Implementation (RFC 2136)
//!
//! Provides secure dynamic DNS update capabilities allowing clients to
//! modify DNS records programmatically with authentication.
//!
//! # Features
//!
//! * **RFC 2136 Compliance** - Full UPDATE message format support
//! * **TSIG Authentication** - RFC 2845 transaction signatures
//! * **Prerequisite Checks** - Conditional updates based on existing state
//! * **Atomic Operations** - All-or-nothing update transactions
//! * **Zone Locking** - Prevents concurrent updates
//! * **Update Journal** - Transaction logging for IXFR
//! * **Access Control** - IP, geo, ASN and key-based authorization
//! * **Rate Limiting** - Prevent update flooding

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::dns::acl::{AclEngine, RequestContext, Target, UpdateOperation};
use crate::dns::buffer::{PacketBuffer, VectorPacketBuffer};
use crate::dns::journal::{self, Journal, JournalOp};
use crate::dns::metrics::MetricsCollector;
use crate::dns::protocol::{DnsHeader, DnsPacket, DnsQuestion, DnsRecord, QueryType, ResultCode};
use crate::dns::tsig::{self, TsigKey};
use crate::dns::zone_store::{MutationOp, Soa, ZoneStore};

const CLASS_IN: u16 = 1;
const CLASS_ANY: u16 = 255;
const CLASS_NONE: u16 = 254;

/// Dynamic update configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicUpdateConfig {
    /// Enable dynamic updates
    pub enabled: bool,
    /// Allow unauthenticated updates (dangerous!)
    pub allow_insecure: bool,
    /// Rate limit per IP (updates per minute)
    pub rate_limit: u32,
    /// Maximum update message size (bytes)
    pub max_update_size: usize,
}

impl Default for DynamicUpdateConfig {
    fn default() -> Self {
        Self {
            enabled: false, // disabled by default for security
            allow_insecure: false,
            rate_limit: 10,
            max_update_size: 65535,
        }
    }
}

/// Update message sections (RFC 2136)
#[derive(Debug)]
pub struct UpdateMessage {
    /// Zone section (exactly one zone)
    pub zone: String,
    pub prerequisites: Vec<Prerequisite>,
    pub updates: Vec<Update>,
}

/// Prerequisite types (RFC 2136 §2.4), each tagged with the rcode to fail
/// the whole transaction with if it doesn't hold.
#[derive(Debug, Clone)]
pub enum Prerequisite {
    /// ANY/0/0: name must exist.
    NameExists { name: String },
    /// NONE/0/0: name must not exist.
    NameNotExists { name: String },
    /// ANY/0/>0: RRset must exist (any value).
    RRsetExists { name: String, rtype: QueryType },
    /// NONE/0/>0: RRset must not exist.
    RRsetNotExists { name: String, rtype: QueryType },
    /// zone-class/0/>0: RRset must exist and contain this exact record.
    RRsetValueExists { name: String, record: DnsRecord },
}

impl Prerequisite {
    fn failure_rcode(&self) -> ResultCode {
        match self {
            Prerequisite::NameExists { .. } => ResultCode::NXDOMAIN,
            Prerequisite::NameNotExists { .. } => ResultCode::YXDOMAIN,
            Prerequisite::RRsetExists { .. } => ResultCode::NXRRSET,
            Prerequisite::RRsetNotExists { .. } => ResultCode::YXRRSET,
            Prerequisite::RRsetValueExists { .. } => ResultCode::NXRRSET,
        }
    }
}

/// Update operations (RFC 2136 §2.5).
#[derive(Debug, Clone)]
pub enum Update {
    /// zone-class: add RR to RRset.
    AddRecord { record: DnsRecord },
    /// ANY, TYPE=ANY: delete all RRsets at name.
    DeleteName { name: String },
    /// ANY, specific TYPE: delete RRset of given type.
    DeleteRRset { name: String, rtype: QueryType },
    /// NONE: delete a specific RR by value.
    DeleteRecord { record: DnsRecord },
}

/// Update statistics
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct UpdateStats {
    pub total_updates: u64,
    pub successful_updates: u64,
    pub failed_updates: u64,
    pub auth_failures: u64,
    pub prereq_failures: u64,
    pub update_errors: u64,
}

/// One audit-log row per processed UPDATE, success or failure (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateAuditRow {
    pub zone: String,
    pub client_ip: IpAddr,
    pub key_name: Option<String>,
    pub success: bool,
    pub rcode: u8,
    pub new_serial: Option<u32>,
}

/// Dynamic update handler (C6): owns nothing of the zone data itself,
/// coordinates the zone store, TSIG keys, ACL engine and change journal.
pub struct DynamicUpdateHandler {
    config: Arc<RwLock<DynamicUpdateConfig>>,
    store: Arc<dyn ZoneStore>,
    journal: Arc<Journal>,
    tsig_keys: Arc<RwLock<Vec<TsigKey>>>,
    acl: Arc<RwLock<AclEngine>>,
    metrics: Arc<MetricsCollector>,
    rate_limiter: Arc<RwLock<HashMap<IpAddr, RateLimitInfo>>>,
    stats: Arc<RwLock<UpdateStats>>,
    zone_locks: Arc<RwLock<HashMap<String, Instant>>>,
}

#[derive(Debug, Clone)]
struct RateLimitInfo {
    updates: Vec<Instant>,
    last_cleanup: Instant,
}

impl DynamicUpdateHandler {
    pub fn new(
        config: DynamicUpdateConfig,
        store: Arc<dyn ZoneStore>,
        journal: Arc<Journal>,
        tsig_keys: Vec<TsigKey>,
        acl: AclEngine,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            store,
            journal,
            tsig_keys: Arc::new(RwLock::new(tsig_keys)),
            acl: Arc::new(RwLock::new(acl)),
            metrics,
            rate_limiter: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(UpdateStats::default())),
            zone_locks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Handles a dynamic update request. `raw` is the message exactly as it
    /// arrived on the wire, TSIG record included, required to verify the MAC.
    pub async fn handle_update(&self, packet: &DnsPacket, raw: &[u8], client_ip: IpAddr) -> DnsPacket {
        self.stats.write().total_updates += 1;
        let config = self.config.read().clone();

        if !config.enabled {
            return error_response(packet.header.id, ResultCode::REFUSED);
        }

        if raw.len() > config.max_update_size {
            return error_response(packet.header.id, ResultCode::FORMERR);
        }

        if !self.check_rate_limit(client_ip, config.rate_limit) {
            self.stats.write().failed_updates += 1;
            return error_response(packet.header.id, ResultCode::REFUSED);
        }

        let update_msg = match parse_update_message(raw) {
            Ok(m) => m,
            Err(_) => {
                self.stats.write().failed_updates += 1;
                return error_response(packet.header.id, ResultCode::FORMERR);
            }
        };

        // TSIG: verify if present, require it unless insecure updates allowed.
        let mut presented_key = None;
        let has_tsig = packet.resources.iter().any(|r| matches!(r, DnsRecord::Tsig { .. }));
        if has_tsig {
            let keys = self.tsig_keys.read();
            match tsig::verify(packet, raw, &keys, None) {
                Ok(_) => {
                    presented_key = packet.resources.iter().find_map(|r| match r {
                        DnsRecord::Tsig { name, .. } => Some(name.clone()),
                        _ => None,
                    });
                }
                Err(_) => {
                    self.stats.write().auth_failures += 1;
                    return error_response(packet.header.id, ResultCode::NOTAUTH);
                }
            }
        } else if !config.allow_insecure {
            self.stats.write().auth_failures += 1;
            return error_response(packet.header.id, ResultCode::NOTAUTH);
        }

        // ACL: evaluated per update operation below, but a coarse add-only
        // context check happens first so a wholly-denied client short-circuits.
        let acl_ctx = RequestContext {
            client_ip,
            country: None,
            asn: None,
            target: Target::Master,
            presented_tsig_key: presented_key.clone(),
            operation: None,
        };
        if !self.acl.read().evaluate_and_record(&acl_ctx, &self.metrics).is_allowed() {
            self.stats.write().auth_failures += 1;
            return error_response(packet.header.id, ResultCode::REFUSED);
        }

        if !self.acquire_zone_lock(&update_msg.zone) {
            return error_response(packet.header.id, ResultCode::SERVFAIL);
        }
        let result = self.process_update(&update_msg, client_ip, presented_key).await;
        self.release_zone_lock(&update_msg.zone);

        let mut response = match result {
            Ok(new_serial) => {
                self.stats.write().successful_updates += 1;
                self.audit(&update_msg.zone, client_ip, None, true, ResultCode::NOERROR, Some(new_serial));
                success_response(packet.header.id)
            }
            Err(rcode) => {
                self.stats.write().failed_updates += 1;
                self.audit(&update_msg.zone, client_ip, None, false, rcode, None);
                error_response(packet.header.id, rcode)
            }
        };

        // A signed request always gets a signed response.
        if has_tsig {
            let keys = self.tsig_keys.read();
            if let Some(key) = presented_key.as_deref().and_then(|n| tsig::find_key(&keys, n)) {
                let _ = tsig::sign(&mut response, key, None, 65535);
            }
        }

        response
    }

    async fn process_update(
        &self,
        msg: &UpdateMessage,
        client_ip: IpAddr,
        presented_key: Option<String>,
    ) -> Result<u32, ResultCode> {
        if !self.store.zone_exists(&msg.zone).await.unwrap_or(false) {
            return Err(ResultCode::NOTAUTH);
        }

        for prereq in &msg.prerequisites {
            if !self.check_prerequisite(&msg.zone, prereq).await {
                self.stats.write().prereq_failures += 1;
                return Err(prereq.failure_rcode());
            }
        }

        for update in &msg.updates {
            let op = match update {
                Update::AddRecord { .. } => UpdateOperation::Add,
                Update::DeleteRecord { .. } => UpdateOperation::Delete,
                Update::DeleteName { .. } | Update::DeleteRRset { .. } => UpdateOperation::Update,
            };
            let ctx = RequestContext {
                client_ip,
                country: None,
                asn: None,
                target: Target::Master,
                presented_tsig_key: presented_key.clone(),
                operation: Some(op),
            };
            if !self.acl.read().evaluate_update(&ctx).is_allowed() {
                return Err(ResultCode::REFUSED);
            }
        }

        let soa = self
            .store
            .soa_lookup(&msg.zone)
            .await
            .ok()
            .flatten()
            .ok_or(ResultCode::NOTAUTH)?;
        let bumps_today = 0; // one UPDATE message is one transaction
        let new_serial = journal::next_serial(soa.serial, bumps_today).ok_or(ResultCode::SERVFAIL)?;

        let ops: Vec<MutationOp> = msg
            .updates
            .iter()
            .map(|u| match u {
                Update::AddRecord { record } => MutationOp::Add(record.clone()),
                Update::DeleteName { name } => MutationOp::DeleteName { name: name.clone() },
                Update::DeleteRRset { name, rtype } => MutationOp::DeleteRRset {
                    name: name.clone(),
                    rtype: *rtype,
                },
                Update::DeleteRecord { record } => MutationOp::Delete(record.clone()),
            })
            .collect();

        self.store
            .apply_mutation(&msg.zone, &ops, new_serial)
            .await
            .map_err(|_| ResultCode::SERVFAIL)?;

        for update in &msg.updates {
            let (op, before, after) = match update {
                Update::AddRecord { record } => (JournalOp::Add, None, Some(record.clone())),
                Update::DeleteRecord { record } => (JournalOp::Delete, Some(record.clone()), None),
                Update::DeleteName { .. } | Update::DeleteRRset { .. } => (JournalOp::Delete, None, None),
            };
            self.journal.append(&msg.zone, op, soa.serial, new_serial, before, after);
        }

        Ok(new_serial)
    }

    async fn check_prerequisite(&self, zone: &str, prereq: &Prerequisite) -> bool {
        match prereq {
            Prerequisite::NameExists { name } => self.name_exists(zone, name).await,
            Prerequisite::NameNotExists { name } => !self.name_exists(zone, name).await,
            Prerequisite::RRsetExists { name, rtype } => self.rrset_exists(zone, name, *rtype).await,
            Prerequisite::RRsetNotExists { name, rtype } => !self.rrset_exists(zone, name, *rtype).await,
            Prerequisite::RRsetValueExists { name, record } => self.record_exists(zone, name, record).await,
        }
    }

    async fn name_exists(&self, zone: &str, name: &str) -> bool {
        self.store
            .rrs_at(zone, name)
            .await
            .map(|rrs| !rrs.is_empty())
            .unwrap_or(false)
    }

    async fn rrset_exists(&self, zone: &str, name: &str, rtype: QueryType) -> bool {
        self.store
            .rrs_by_type_at(zone, name, rtype)
            .await
            .map(|rrs| !rrs.is_empty())
            .unwrap_or(false)
    }

    async fn record_exists(&self, zone: &str, name: &str, record: &DnsRecord) -> bool {
        self.store
            .rrs_at(zone, name)
            .await
            .map(|rrs| rrs.iter().any(|r| r == record))
            .unwrap_or(false)
    }

    fn audit(
        &self,
        zone: &str,
        client_ip: IpAddr,
        key_name: Option<String>,
        success: bool,
        rcode: ResultCode,
        new_serial: Option<u32>,
    ) {
        let row = UpdateAuditRow {
            zone: zone.to_string(),
            client_ip,
            key_name,
            success,
            rcode: rcode as u8,
            new_serial,
        };
        log::info!("update audit: {:?}", row);
    }

    fn check_rate_limit(&self, client_ip: IpAddr, rate_limit: u32) -> bool {
        let mut limiter = self.rate_limiter.write();
        let now = Instant::now();

        let info = limiter.entry(client_ip).or_insert_with(|| RateLimitInfo {
            updates: Vec::new(),
            last_cleanup: now,
        });

        if now.duration_since(info.last_cleanup) > Duration::from_secs(60) {
            info.updates.retain(|t| now.duration_since(*t) < Duration::from_secs(60));
            info.last_cleanup = now;
        }

        if info.updates.len() >= rate_limit as usize {
            return false;
        }

        info.updates.push(now);
        true
    }

    fn acquire_zone_lock(&self, zone: &str) -> bool {
        let mut locks = self.zone_locks.write();
        let now = Instant::now();

        if let Some(lock_time) = locks.get(zone) {
            if now.duration_since(*lock_time) < Duration::from_secs(30) {
                return false;
            }
        }

        locks.insert(zone.to_string(), now);
        true
    }

    fn release_zone_lock(&self, zone: &str) {
        self.zone_locks.write().remove(zone);
    }

    pub fn get_stats(&self) -> UpdateStats {
        self.stats.read().clone()
    }
}

fn error_response(id: u16, rcode: ResultCode) -> DnsPacket {
    let mut packet = DnsPacket::new();
    packet.header.id = id;
    packet.header.response = true;
    packet.header.opcode = 5;
    packet.header.rescode = rcode;
    packet
}

fn success_response(id: u16) -> DnsPacket {
    error_response(id, ResultCode::NOERROR)
}

/// Name/type/class/RDLENGTH read directly off the wire, without dispatching
/// into `DnsRecord::read`'s per-type RDATA decode. Needed because RFC 2136's
/// prerequisite and update sections overload CLASS (ANY/NONE/zone-class) and
/// frequently carry RDLENGTH=0 for a TYPE whose normal RDATA is never
/// zero-length (e.g. CLASS=ANY TYPE=A means "the A RRset exists", not "an A
/// record with no address") — `DnsRecord::read`'s A-variant would read past
/// the record trying to find 4 address bytes that were never written.
struct RrPrologue {
    name: String,
    qtype: QueryType,
    class: u16,
    rdlen: u16,
}

fn read_rr_prologue<T: PacketBuffer>(buffer: &mut T) -> crate::dns::protocol::Result<RrPrologue> {
    let mut name = String::new();
    buffer.read_qname(&mut name)?;
    let qtype = QueryType::from_num(buffer.read_u16()?);
    let class = buffer.read_u16()?;
    let _ttl = buffer.read_u32()?;
    let rdlen = buffer.read_u16()?;
    Ok(RrPrologue { name, qtype, class, rdlen })
}

/// Parses an UPDATE message directly from the wire bytes, rather than
/// through `DnsPacket::from_buffer`'s ordinary per-type decode (see
/// `read_rr_prologue` for why).
fn parse_update_message(raw: &[u8]) -> crate::dns::protocol::Result<UpdateMessage> {
    let mut buffer = VectorPacketBuffer::new();
    buffer.buffer = raw.to_vec();
    buffer.seek(0)?;

    let mut header = DnsHeader::new();
    header.read(&mut buffer)?;

    let mut question = DnsQuestion::new(String::new(), QueryType::Soa);
    question.read(&mut buffer)?;
    let zone = question.name;

    let mut prerequisites = Vec::new();
    for _ in 0..header.answers {
        let start = buffer.pos();
        let meta = read_rr_prologue(&mut buffer)?;

        if meta.rdlen > 0 {
            buffer.seek(start)?;
            let rec = DnsRecord::read(&mut buffer)?;
            if meta.class == CLASS_IN {
                prerequisites.push(Prerequisite::RRsetValueExists { name: meta.name, record: rec });
            }
            continue;
        }

        let is_name_wide = meta.qtype == QueryType::Unknown(255);
        match meta.class {
            CLASS_ANY if is_name_wide => prerequisites.push(Prerequisite::NameExists { name: meta.name }),
            CLASS_ANY => prerequisites.push(Prerequisite::RRsetExists { name: meta.name, rtype: meta.qtype }),
            CLASS_NONE if is_name_wide => prerequisites.push(Prerequisite::NameNotExists { name: meta.name }),
            CLASS_NONE => prerequisites.push(Prerequisite::RRsetNotExists { name: meta.name, rtype: meta.qtype }),
            _ => {}
        }
    }

    let mut updates = Vec::new();
    for _ in 0..header.authoritative_entries {
        let start = buffer.pos();
        let meta = read_rr_prologue(&mut buffer)?;

        if meta.rdlen > 0 {
            buffer.seek(start)?;
            let rec = DnsRecord::read(&mut buffer)?;
            match meta.class {
                CLASS_IN => updates.push(Update::AddRecord { record: rec }),
                CLASS_NONE => updates.push(Update::DeleteRecord { record: rec }),
                _ => {}
            }
            continue;
        }

        if meta.class == CLASS_ANY {
            if meta.qtype == QueryType::Unknown(255) {
                updates.push(Update::DeleteName { name: meta.name });
            } else {
                updates.push(Update::DeleteRRset { name: meta.name, rtype: meta.qtype });
            }
        }
    }

    Ok(UpdateMessage {
        zone,
        prerequisites,
        updates,
    })
}
