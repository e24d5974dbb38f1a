//! Zone Transfer Implementation (AXFR/IXFR)
//!
//! Provides DNS zone transfer capabilities for secondary DNS servers,
//! supporting both full (AXFR, RFC 5936) and incremental (IXFR, RFC 1995)
//! transfers, TSIG-authenticated and ACL-gated.
//!
//! The master side answers transfer requests against the zone store and
//! change journal. The slave side drives one transfer attempt per call;
//! the sleep/retry schedule and NOTIFY wakeup belong to the task/session
//! layer, not here.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use crate::dns::acl::{AclEngine, RequestContext, Target};
use crate::dns::buffer::{PacketBuffer, VectorPacketBuffer};
use crate::dns::errors::{DnsError, OperationError};
use crate::dns::journal::{Journal, JournalEntry};
use crate::dns::metrics::MetricsCollector;
use crate::dns::protocol::{DnsPacket, DnsQuestion, DnsRecord, QueryType, TransientTtl};
use crate::dns::tsig::{self, TsigKey};
use crate::dns::zone_store::{self, MutationOp, Soa, ZoneStore};

/// Leave slack under the 64 KiB wire cap for the TSIG record a signed
/// transfer session appends to every message.
const MAX_MESSAGE_SIZE: usize = 64_000;

#[derive(Debug, Clone)]
pub struct ZoneTransferConfig {
    pub enabled: bool,
    pub allow_axfr: bool,
    pub allow_ixfr: bool,
    pub transfer_timeout: Duration,
}

impl Default for ZoneTransferConfig {
    fn default() -> Self {
        ZoneTransferConfig {
            enabled: false,
            allow_axfr: true,
            allow_ixfr: true,
            transfer_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransferType {
    Axfr,
    /// Client's current serial.
    Ixfr(u32),
}

fn transfer_kind(t: &TransferType) -> &'static str {
    match t {
        TransferType::Axfr => "axfr",
        TransferType::Ixfr(_) => "ixfr",
    }
}

pub struct TransferRequest {
    pub zone: String,
    pub transfer_type: TransferType,
    pub client_ip: IpAddr,
    pub id: u16,
    /// The parsed request, inspected only for a TSIG record.
    pub packet: DnsPacket,
    /// The request as received on the wire, needed to verify that TSIG.
    pub raw: Vec<u8>,
}

pub struct TransferResponse {
    pub zone: String,
    pub transfer_type: TransferType,
    pub packets: Vec<DnsPacket>,
    pub record_count: usize,
    pub transfer_size: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    pub axfr_count: u64,
    pub ixfr_count: u64,
    pub failed_transfers: u64,
    pub total_bytes: u64,
    pub total_records: u64,
}

fn op_err(context: &str, details: impl Into<String>) -> DnsError {
    DnsError::Operation(OperationError {
        context: context.to_string(),
        details: details.into(),
        recovery_hint: None,
    })
}

/// Master-side transfer handler: answers AXFR/IXFR requests from slaves.
pub struct ZoneTransferHandler {
    config: Arc<RwLock<ZoneTransferConfig>>,
    store: Arc<dyn ZoneStore>,
    journal: Arc<Journal>,
    tsig_keys: Arc<RwLock<Vec<TsigKey>>>,
    acl: Arc<RwLock<AclEngine>>,
    metrics: Arc<MetricsCollector>,
    stats: Arc<RwLock<TransferStats>>,
}

impl ZoneTransferHandler {
    pub fn new(
        config: ZoneTransferConfig,
        store: Arc<dyn ZoneStore>,
        journal: Arc<Journal>,
        tsig_keys: Vec<TsigKey>,
        acl: AclEngine,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        ZoneTransferHandler {
            config: Arc::new(RwLock::new(config)),
            store,
            journal,
            tsig_keys: Arc::new(RwLock::new(tsig_keys)),
            acl: Arc::new(RwLock::new(acl)),
            metrics,
            stats: Arc::new(RwLock::new(TransferStats::default())),
        }
    }

    pub async fn handle_transfer_request(
        &self,
        request: TransferRequest,
    ) -> Result<TransferResponse, DnsError> {
        let config = self.config.read().clone();

        if !config.enabled {
            return Err(op_err("zone transfer", "zone transfers are disabled"));
        }
        match request.transfer_type {
            TransferType::Axfr if !config.allow_axfr => {
                return Err(op_err("zone transfer", "AXFR transfers are disabled"));
            }
            TransferType::Ixfr(_) if !config.allow_ixfr => {
                return Err(op_err("zone transfer", "IXFR transfers are disabled"));
            }
            _ => {}
        }

        let has_tsig = request
            .packet
            .resources
            .iter()
            .any(|r| matches!(r, DnsRecord::Tsig { .. }));
        let mut presented_key = None;
        if has_tsig {
            let keys = self.tsig_keys.read();
            match tsig::verify(&request.packet, &request.raw, &keys, None) {
                Ok(_) => {
                    presented_key = request.packet.resources.iter().find_map(|r| match r {
                        DnsRecord::Tsig { name, .. } => Some(name.clone()),
                        _ => None,
                    });
                }
                Err(_) => {
                    self.stats.write().failed_transfers += 1;
                    self.metrics.record_transfer_session(
                        transfer_kind(&request.transfer_type),
                        "out",
                        "notauth",
                    );
                    return Err(op_err("zone transfer", "TSIG verification failed"));
                }
            }
        }

        let ctx = RequestContext {
            client_ip: request.client_ip,
            country: None,
            asn: None,
            target: Target::Slave,
            presented_tsig_key: presented_key.clone(),
            operation: None,
        };
        if !self.acl.read().evaluate_and_record(&ctx, &self.metrics).is_allowed() {
            self.stats.write().failed_transfers += 1;
            return Err(op_err(
                "zone transfer",
                "client not authorized for zone transfer",
            ));
        }

        if !self
            .store
            .zone_exists(&request.zone)
            .await
            .unwrap_or(false)
        {
            return Err(op_err(
                "zone transfer",
                format!("no such zone {}", request.zone),
            ));
        }

        let mut response = match request.transfer_type {
            TransferType::Axfr => self.perform_axfr(&request.zone, request.id).await?,
            TransferType::Ixfr(serial) => self.perform_ixfr(&request.zone, serial, request.id).await?,
        };

        if let Some(key_name) = presented_key {
            if self.sign_transfer(&mut response.packets, &key_name).is_err() {
                self.stats.write().failed_transfers += 1;
                return Err(op_err("zone transfer", "failed to sign transfer response"));
            }
        }

        {
            let mut stats = self.stats.write();
            match response.transfer_type {
                TransferType::Axfr => stats.axfr_count += 1,
                TransferType::Ixfr(_) => stats.ixfr_count += 1,
            }
            stats.total_bytes += response.transfer_size as u64;
            stats.total_records += response.record_count as u64;
        }
        self.metrics
            .record_transfer_session(transfer_kind(&response.transfer_type), "out", "success");
        self.metrics.record_transfer_bytes(
            transfer_kind(&response.transfer_type),
            "out",
            response.transfer_size as u64,
        );

        Ok(response)
    }

    async fn perform_axfr(&self, zone: &str, request_id: u16) -> Result<TransferResponse, DnsError> {
        let soa = self
            .store
            .soa_lookup(zone)
            .await
            .map_err(|e| op_err("zone transfer", e.to_string()))?
            .ok_or_else(|| op_err("zone transfer", "zone has no SOA"))?;
        let records = self
            .store
            .all_records(zone)
            .await
            .map_err(|e| op_err("zone transfer", e.to_string()))?;
        let soa_rec = soa_to_record(&soa);

        let mut all = Vec::with_capacity(records.len() + 2);
        all.push(soa_rec.clone());
        all.extend(records.iter().cloned());
        all.push(soa_rec);

        let packets = chunk_into_packets(zone, &all, request_id, QueryType::Axfr);
        let transfer_size = estimate_total_size(&packets);

        Ok(TransferResponse {
            zone: zone.to_string(),
            transfer_type: TransferType::Axfr,
            record_count: records.len(),
            packets,
            transfer_size,
        })
    }

    async fn perform_ixfr(
        &self,
        zone: &str,
        client_serial: u32,
        request_id: u16,
    ) -> Result<TransferResponse, DnsError> {
        let soa = self
            .store
            .soa_lookup(zone)
            .await
            .map_err(|e| op_err("zone transfer", e.to_string()))?
            .ok_or_else(|| op_err("zone transfer", "zone has no SOA"))?;

        if client_serial == soa.serial {
            let packet = base_packet(zone, request_id, QueryType::Ixfr, vec![soa_to_record(&soa)]);
            let packets = vec![packet];
            let transfer_size = estimate_total_size(&packets);
            return Ok(TransferResponse {
                zone: zone.to_string(),
                transfer_type: TransferType::Ixfr(client_serial),
                record_count: 0,
                packets,
                transfer_size,
            });
        }

        let Some(deltas) = self.journal.deltas_since(zone, client_serial) else {
            // Journal doesn't go back far enough: fall back to an AXFR-style
            // payload while still answering under the IXFR question type.
            let mut fallback = self.perform_axfr(zone, request_id).await?;
            fallback.transfer_type = TransferType::Ixfr(client_serial);
            for packet in &mut fallback.packets {
                if let Some(q) = packet.questions.first_mut() {
                    q.qtype = QueryType::Ixfr;
                }
            }
            return Ok(fallback);
        };

        let soa_rec = soa_to_record(&soa);
        let mut records = vec![soa_rec.clone()];
        let mut record_count = 0;
        for (old_serial, new_serial, deleted, added) in version_groups(&deltas) {
            records.push(soa_with_serial(&soa, old_serial));
            record_count += deleted.len();
            records.extend(deleted);
            records.push(soa_with_serial(&soa, new_serial));
            record_count += added.len();
            records.extend(added);
        }
        records.push(soa_rec);

        let packets = chunk_into_packets(zone, &records, request_id, QueryType::Ixfr);
        let transfer_size = estimate_total_size(&packets);

        Ok(TransferResponse {
            zone: zone.to_string(),
            transfer_type: TransferType::Ixfr(client_serial),
            packets,
            record_count,
            transfer_size,
        })
    }

    /// Signs every packet of a transfer session in place, chaining the MAC
    /// across messages per RFC 2845 §4.4: each subsequent message's MAC
    /// covers the prior message's MAC.
    fn sign_transfer(&self, packets: &mut [DnsPacket], key_name: &str) -> tsig::Result<()> {
        let keys = self.tsig_keys.read();
        let key = tsig::find_key(&keys, key_name)
            .ok_or_else(|| tsig::TsigError::BadKey(key_name.to_string()))?;
        let mut prior_mac: Option<Vec<u8>> = None;
        for packet in packets.iter_mut() {
            let mac = tsig::sign(packet, key, prior_mac.as_deref(), 65535)?;
            prior_mac = Some(mac);
        }
        Ok(())
    }

    pub fn get_stats(&self) -> TransferStats {
        (*self.stats.read()).clone()
    }
}

fn base_packet(zone: &str, request_id: u16, qtype: QueryType, answers: Vec<DnsRecord>) -> DnsPacket {
    let mut packet = DnsPacket::new();
    packet.header.id = request_id;
    packet.header.response = true;
    packet.header.authoritative_answer = true;
    packet.questions.push(DnsQuestion::new(zone.to_string(), qtype));
    packet.header.questions = 1;
    packet.answers = answers;
    packet.header.answers = packet.answers.len() as u16;
    packet
}

fn chunk_into_packets(
    zone: &str,
    records: &[DnsRecord],
    request_id: u16,
    qtype: QueryType,
) -> Vec<DnsPacket> {
    let mut packets = Vec::new();
    let mut current = Vec::new();
    let mut current_size = 12usize; // DNS header

    for rec in records {
        let rec_size = estimate_record_size(rec);
        if current_size + rec_size > MAX_MESSAGE_SIZE && !current.is_empty() {
            packets.push(base_packet(zone, request_id, qtype, std::mem::take(&mut current)));
            current_size = 12;
        }
        current_size += rec_size;
        current.push(rec.clone());
    }

    if !current.is_empty() || packets.is_empty() {
        packets.push(base_packet(zone, request_id, qtype, current));
    }
    packets
}

fn estimate_record_size(rec: &DnsRecord) -> usize {
    let mut buf = VectorPacketBuffer::new();
    rec.write(&mut buf).map(|_| buf.pos()).unwrap_or(64)
}

fn estimate_total_size(packets: &[DnsPacket]) -> usize {
    packets
        .iter()
        .map(|p| {
            let mut buf = VectorPacketBuffer::new();
            let mut clone = p.clone();
            clone.write(&mut buf, 65535).map(|_| buf.buffer.len()).unwrap_or(0)
        })
        .sum()
}

fn soa_to_record(soa: &Soa) -> DnsRecord {
    DnsRecord::Soa {
        domain: soa.origin.clone(),
        m_name: soa.ns.clone(),
        r_name: soa.mbox.clone(),
        serial: soa.serial,
        refresh: soa.refresh,
        retry: soa.retry,
        expire: soa.expire,
        minimum: soa.minimum,
        ttl: TransientTtl(soa.ttl),
    }
}

fn soa_with_serial(soa: &Soa, serial: u32) -> DnsRecord {
    let mut rec = soa_to_record(soa);
    if let DnsRecord::Soa { serial: ref mut s, .. } = rec {
        *s = serial;
    }
    rec
}

/// Groups consecutive journal entries sharing an `(old_serial, new_serial)`
/// pair into one IXFR delta. §4.11 journals at RR-mutation granularity, so a
/// single UPDATE transaction touching several RRs becomes one group here.
fn version_groups(entries: &[JournalEntry]) -> Vec<(u32, u32, Vec<DnsRecord>, Vec<DnsRecord>)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < entries.len() {
        let old_serial = entries[i].old_serial;
        let new_serial = entries[i].new_serial;
        let mut deleted = Vec::new();
        let mut added = Vec::new();
        while i < entries.len() && entries[i].old_serial == old_serial && entries[i].new_serial == new_serial {
            if let Some(before) = &entries[i].before {
                deleted.push(before.clone());
            }
            if let Some(after) = &entries[i].after {
                added.push(after.clone());
            }
            i += 1;
        }
        out.push((old_serial, new_serial, deleted, added));
    }
    out
}

// ---------------------------------------------------------------------
// Slave (consumer) side
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SlaveZoneConfig {
    pub zone: String,
    pub master_host: String,
    pub master_port: u16,
    pub tsig_key: Option<TsigKey>,
    pub transfer_interval: Duration,
    pub retry_interval: Duration,
    pub max_failures: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SlaveState {
    pub last_transfer: Option<Instant>,
    pub last_notify: Option<Instant>,
    pub last_error: Option<String>,
    pub failures: u32,
    pub disabled: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    UpToDate,
    AppliedIxfr { applied_serial: u32 },
    AppliedAxfr { applied_serial: u32 },
    Disabled,
}

/// Drives a single transfer attempt for one slave zone binding: check the
/// master's serial, pull IXFR (falling back to AXFR), apply atomically to
/// the local store. The caller (the task/session layer) owns the sleep
/// interval and the NOTIFY-triggered early wakeup.
pub async fn attempt_slave_transfer(
    cfg: &SlaveZoneConfig,
    store: &dyn ZoneStore,
    state: &mut SlaveState,
) -> Result<TransferOutcome, DnsError> {
    if state.disabled {
        return Ok(TransferOutcome::Disabled);
    }

    let result = run_attempt(cfg, store).await;
    match &result {
        Ok(_) => {
            state.last_transfer = Some(Instant::now());
            state.last_error = None;
            state.failures = 0;
        }
        Err(e) => {
            state.failures += 1;
            state.last_error = Some(e.to_string());
            if state.failures >= cfg.max_failures {
                state.disabled = true;
            }
        }
    }
    result
}

async fn run_attempt(cfg: &SlaveZoneConfig, store: &dyn ZoneStore) -> Result<TransferOutcome, DnsError> {
    let local_serial = store
        .soa_lookup(&cfg.zone)
        .await
        .map_err(|e| op_err("zone transfer", e.to_string()))?
        .map(|s| s.serial)
        .unwrap_or(0);

    let master_serial = check_master_serial(cfg).await?;
    if !zone_store::serial::lt(local_serial, master_serial) {
        return Ok(TransferOutcome::UpToDate);
    }

    let messages = request_ixfr(cfg, local_serial).await?;
    apply_transfer_messages(cfg, store, &messages).await
}

/// Queries the master's current SOA serial over UDP.
async fn check_master_serial(cfg: &SlaveZoneConfig) -> Result<u32, DnsError> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| op_err("zone transfer", e.to_string()))?;

    let mut packet = DnsPacket::new();
    packet.header.id = (Instant::now().elapsed().subsec_nanos() % 65536) as u16;
    packet.header.questions = 1;
    packet.questions.push(DnsQuestion::new(cfg.zone.clone(), QueryType::Soa));

    let mut req = VectorPacketBuffer::new();
    packet
        .write(&mut req, 512)
        .map_err(|e| op_err("zone transfer", e.to_string()))?;

    let master = (cfg.master_host.as_str(), cfg.master_port);
    socket
        .send_to(&req.buffer, master)
        .await
        .map_err(|e| op_err("zone transfer", e.to_string()))?;

    let mut buf = [0u8; 512];
    let n = tokio::time::timeout(Duration::from_secs(5), socket.recv(&mut buf))
        .await
        .map_err(|_| op_err("zone transfer", "timed out waiting for master SOA"))?
        .map_err(|e| op_err("zone transfer", e.to_string()))?;

    let mut resp_buf = VectorPacketBuffer::new();
    resp_buf.buffer = buf[..n].to_vec();
    resp_buf.seek(0).map_err(|e| op_err("zone transfer", e.to_string()))?;
    let resp = DnsPacket::from_buffer(&mut resp_buf).map_err(|e| op_err("zone transfer", e.to_string()))?;

    resp.answers
        .iter()
        .find_map(|r| match r {
            DnsRecord::Soa { serial, .. } => Some(*serial),
            _ => None,
        })
        .ok_or_else(|| op_err("zone transfer", "master SOA response carried no SOA record"))
}

/// Sends an IXFR query over TCP and reads every length-prefixed DNS message
/// the master sends back, verifying the TSIG chain on each if a key is
/// configured.
async fn request_ixfr(cfg: &SlaveZoneConfig, local_serial: u32) -> Result<Vec<DnsPacket>, DnsError> {
    let mut stream = TcpStream::connect((cfg.master_host.as_str(), cfg.master_port))
        .await
        .map_err(|e| op_err("zone transfer", e.to_string()))?;

    let mut packet = DnsPacket::new();
    packet.header.id = (Instant::now().elapsed().subsec_nanos() % 65536) as u16;
    packet.header.questions = 1;
    packet.questions.push(DnsQuestion::new(cfg.zone.clone(), QueryType::Ixfr));
    packet.authorities.push(DnsRecord::Soa {
        domain: cfg.zone.clone(),
        m_name: String::new(),
        r_name: String::new(),
        serial: local_serial,
        refresh: 0,
        retry: 0,
        expire: 0,
        minimum: 0,
        ttl: TransientTtl(0),
    });
    packet.header.authoritative_entries = 1;

    if let Some(key) = &cfg.tsig_key {
        tsig::sign(&mut packet, key, None, 65535).map_err(|e| op_err("zone transfer", e.to_string()))?;
    }

    let mut req = VectorPacketBuffer::new();
    packet
        .write(&mut req, 65535)
        .map_err(|e| op_err("zone transfer", e.to_string()))?;

    stream
        .write_u16(req.buffer.len() as u16)
        .await
        .map_err(|e| op_err("zone transfer", e.to_string()))?;
    stream
        .write_all(&req.buffer)
        .await
        .map_err(|e| op_err("zone transfer", e.to_string()))?;

    let mut messages = Vec::new();
    let mut prior_mac: Option<Vec<u8>> = None;
    loop {
        let len = match stream.read_u16().await {
            Ok(len) => len,
            Err(_) => break, // connection closed: end of transfer session
        };
        let mut raw = vec![0u8; len as usize];
        stream
            .read_exact(&mut raw)
            .await
            .map_err(|e| op_err("zone transfer", e.to_string()))?;

        let mut buf = VectorPacketBuffer::new();
        buf.buffer = raw.clone();
        buf.seek(0).map_err(|e| op_err("zone transfer", e.to_string()))?;
        let msg = DnsPacket::from_buffer(&mut buf).map_err(|e| op_err("zone transfer", e.to_string()))?;

        if let Some(key) = &cfg.tsig_key {
            let mac = tsig::verify(&msg, &raw, std::slice::from_ref(key), prior_mac.as_deref())
                .map_err(|e| op_err("zone transfer", e.to_string()))?;
            prior_mac = Some(mac);
        }

        let done = is_final_message(&msg);
        messages.push(msg);
        if done {
            break;
        }
    }

    Ok(messages)
}

/// The transfer session ends when the SOA that opened it (or the single-SOA
/// up-to-date reply) reappears as the message's last answer.
fn is_final_message(msg: &DnsPacket) -> bool {
    let soa_count = msg
        .answers
        .iter()
        .filter(|r| matches!(r, DnsRecord::Soa { .. }))
        .count();
    match msg.answers.last() {
        Some(DnsRecord::Soa { .. }) => soa_count >= 2 || msg.answers.len() == 1,
        _ => false,
    }
}

/// Applies the concatenated answer sections of a transfer session to the
/// local store. Detects IXFR-delta shape (alternating SOA markers) versus
/// AXFR shape (opening/closing SOA around a flat RR list) from the message
/// contents themselves, per RFC 1995 §4.
async fn apply_transfer_messages(
    cfg: &SlaveZoneConfig,
    store: &dyn ZoneStore,
    messages: &[DnsPacket],
) -> Result<TransferOutcome, DnsError> {
    let answers: Vec<DnsRecord> = messages.iter().flat_map(|m| m.answers.clone()).collect();
    if answers.len() <= 1 {
        return Ok(TransferOutcome::UpToDate);
    }

    let Some(DnsRecord::Soa { serial: final_serial, .. }) = answers.last() else {
        return Err(op_err("zone transfer", "transfer did not end with a SOA"));
    };
    let final_serial = *final_serial;

    let is_ixfr_shape = matches!(answers.get(1), Some(DnsRecord::Soa { .. })) && answers.len() > 2;

    if is_ixfr_shape {
        let mut ops = Vec::new();
        let mut i = 1;
        while i + 1 < answers.len() {
            i += 1; // skip the old-SOA delete marker
            while i < answers.len() - 1 && !matches!(answers[i], DnsRecord::Soa { .. }) {
                ops.push(MutationOp::Delete(answers[i].clone()));
                i += 1;
            }
            if i >= answers.len() - 1 {
                break;
            }
            i += 1; // skip the new-SOA add marker
            while i < answers.len() - 1 && !matches!(answers[i], DnsRecord::Soa { .. }) {
                ops.push(MutationOp::Add(answers[i].clone()));
                i += 1;
            }
        }
        store
            .apply_mutation(&cfg.zone, &ops, final_serial)
            .await
            .map_err(|e| op_err("zone transfer", e.to_string()))?;
        Ok(TransferOutcome::AppliedIxfr {
            applied_serial: final_serial,
        })
    } else {
        let existing = store
            .all_records(&cfg.zone)
            .await
            .map_err(|e| op_err("zone transfer", e.to_string()))?;
        let mut ops: Vec<MutationOp> = existing
            .iter()
            .map(|r| MutationOp::Delete(r.clone()))
            .collect();
        ops.extend(
            answers[1..answers.len() - 1]
                .iter()
                .filter(|r| !matches!(r, DnsRecord::Soa { .. }))
                .cloned()
                .map(MutationOp::Add),
        );
        store
            .apply_mutation(&cfg.zone, &ops, final_serial)
            .await
            .map_err(|e| op_err("zone transfer", e.to_string()))?;
        Ok(TransferOutcome::AppliedAxfr {
            applied_serial: final_serial,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::journal::JournalOp;
    use crate::dns::zone_store::memzone::MemZoneStore;
    use std::net::{IpAddr, Ipv4Addr};

    fn sample_soa(origin: &str, serial: u32) -> Soa {
        Soa {
            origin: origin.to_string(),
            ns: format!("ns1.{}", origin),
            mbox: format!("admin.{}", origin),
            serial,
            refresh: 3600,
            retry: 600,
            expire: 86400,
            minimum: 3600,
            ttl: 3600,
        }
    }

    fn handler(store: Arc<dyn ZoneStore>) -> ZoneTransferHandler {
        ZoneTransferHandler::new(
            ZoneTransferConfig {
                enabled: true,
                ..Default::default()
            },
            store,
            Arc::new(Journal::new()),
            Vec::new(),
            AclEngine::new(),
            Arc::new(MetricsCollector::new()),
        )
    }

    fn signed_request(zone: &str, transfer_type: TransferType) -> TransferRequest {
        TransferRequest {
            zone: zone.to_string(),
            transfer_type,
            client_ip: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            id: 7,
            packet: DnsPacket::new(),
            raw: Vec::new(),
        }
    }

    #[tokio::test]
    async fn axfr_opens_and_closes_with_soa() {
        let store: Arc<dyn ZoneStore> = Arc::new(MemZoneStore::new());
        store.create_zone(sample_soa("example.com.", 5)).await.unwrap();
        store
            .apply_mutation(
                "example.com.",
                &[MutationOp::Add(DnsRecord::A {
                    domain: "host1.example.com.".to_string(),
                    addr: std::net::Ipv4Addr::new(10, 0, 0, 1),
                    ttl: TransientTtl(300),
                })],
                6,
            )
            .await
            .unwrap();

        let h = handler(store);
        let response = h
            .handle_transfer_request(signed_request("example.com.", TransferType::Axfr))
            .await
            .unwrap();

        assert_eq!(response.record_count, 1);
        let first = &response.packets[0].answers[0];
        let last = response.packets.last().unwrap().answers.last().unwrap();
        assert!(matches!(first, DnsRecord::Soa { .. }));
        assert!(matches!(last, DnsRecord::Soa { .. }));
    }

    #[tokio::test]
    async fn ixfr_up_to_date_returns_single_soa() {
        let store: Arc<dyn ZoneStore> = Arc::new(MemZoneStore::new());
        store.create_zone(sample_soa("example.com.", 5)).await.unwrap();

        let h = handler(store);
        let response = h
            .handle_transfer_request(signed_request("example.com.", TransferType::Ixfr(5)))
            .await
            .unwrap();

        assert_eq!(response.record_count, 0);
        assert_eq!(response.packets.len(), 1);
        assert_eq!(response.packets[0].answers.len(), 1);
    }

    #[tokio::test]
    async fn ixfr_without_journal_history_falls_back_to_axfr_shape() {
        let store: Arc<dyn ZoneStore> = Arc::new(MemZoneStore::new());
        store.create_zone(sample_soa("example.com.", 9)).await.unwrap();

        let h = handler(store);
        let response = h
            .handle_transfer_request(signed_request("example.com.", TransferType::Ixfr(3)))
            .await
            .unwrap();

        // No journal entries at all for this zone: deltas_since(3) is None
        // (journal empty and since_serial != 0), so this is a fallback.
        assert!(matches!(response.transfer_type, TransferType::Ixfr(3)));
        assert_eq!(response.packets[0].questions[0].qtype, QueryType::Ixfr);
    }

    #[test]
    fn version_groups_splits_on_serial_change() {
        let entries = vec![
            JournalEntry {
                id: 0,
                zone: "z.".to_string(),
                op: JournalOp::Add,
                old_serial: 1,
                new_serial: 2,
                before: None,
                after: Some(DnsRecord::A {
                    domain: "a.z.".to_string(),
                    addr: std::net::Ipv4Addr::new(1, 1, 1, 1),
                    ttl: TransientTtl(60),
                }),
                timestamp: 0,
            },
            JournalEntry {
                id: 1,
                zone: "z.".to_string(),
                op: JournalOp::Delete,
                old_serial: 2,
                new_serial: 3,
                before: Some(DnsRecord::A {
                    domain: "b.z.".to_string(),
                    addr: std::net::Ipv4Addr::new(2, 2, 2, 2),
                    ttl: TransientTtl(60),
                }),
                after: None,
                timestamp: 0,
            },
        ];

        let groups = version_groups(&entries);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, 1);
        assert_eq!(groups[0].1, 2);
        assert_eq!(groups[1].0, 2);
        assert_eq!(groups[1].1, 3);
    }
}
