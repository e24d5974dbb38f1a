//! NOTIFY listener (RFC 1996).
//!
//! A dedicated UDP listener, separate from the ordinary query port so it can
//! run unprivileged, that accepts OPCODE=4 messages from configured masters
//! and wakes up the corresponding slave zone binding for an immediate
//! transfer attempt instead of waiting out its `transfer_interval`.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::net::UdpSocket;

use crate::dns::buffer::{PacketBuffer, VectorPacketBuffer};
use crate::dns::protocol::{DnsPacket, ResultCode};
use crate::dns::tsig::{self, TsigKey};
use crate::dns::zone_store::ZoneStore;
use crate::dns::zone_transfer::{attempt_slave_transfer, SlaveState, SlaveZoneConfig};

#[derive(Debug, Clone)]
pub struct NotifyListenerConfig {
    pub bind_addr: SocketAddr,
}

impl Default for NotifyListenerConfig {
    fn default() -> Self {
        NotifyListenerConfig {
            bind_addr: "0.0.0.0:5300".parse().unwrap(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotifyStats {
    pub received: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub transfers_triggered: u64,
}

/// One zone this process slaves, keyed by zone origin (lowercase, as it
/// appears in the NOTIFY question).
struct SlaveBinding {
    cfg: SlaveZoneConfig,
    state: SlaveState,
}

/// Listens for NOTIFY and drives the matching slave zone binding.
///
/// Holds no reference to the scheduler that owns the normal
/// `transfer_interval` sleep loop; a NOTIFY simply runs one
/// `attempt_slave_transfer` immediately, same as a scheduled wakeup would.
pub struct NotifyListener {
    store: Arc<dyn ZoneStore>,
    tsig_keys: Arc<RwLock<Vec<TsigKey>>>,
    bindings: Arc<RwLock<HashMap<String, SlaveBinding>>>,
    stats: Arc<RwLock<NotifyStats>>,
}

impl NotifyListener {
    pub fn new(store: Arc<dyn ZoneStore>, tsig_keys: Arc<RwLock<Vec<TsigKey>>>) -> Self {
        NotifyListener {
            store,
            tsig_keys,
            bindings: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(NotifyStats::default())),
        }
    }

    /// Registers (or replaces) the slave zone binding a NOTIFY for this zone
    /// should wake. Only NOTIFYs whose source IP matches `cfg.master_host`'s
    /// resolved address are ever accepted for it.
    pub fn add_binding(&self, cfg: SlaveZoneConfig) {
        let zone = cfg.zone.to_ascii_lowercase();
        self.bindings.write().insert(
            zone,
            SlaveBinding {
                cfg,
                state: SlaveState::default(),
            },
        );
    }

    pub fn get_stats(&self) -> NotifyStats {
        self.stats.read().clone()
    }

    /// Runs the listener loop. Never returns under normal operation; exits
    /// only if the socket itself fails.
    pub async fn run(&self, config: &NotifyListenerConfig) -> std::io::Result<()> {
        let socket = UdpSocket::bind(config.bind_addr).await?;
        let mut buf = vec![0u8; 4096];
        loop {
            let (len, src) = socket.recv_from(&mut buf).await?;
            let raw = buf[..len].to_vec();
            self.handle_datagram(&socket, src, &raw).await;
        }
    }

    async fn handle_datagram(&self, socket: &UdpSocket, src: SocketAddr, raw: &[u8]) {
        self.stats.write().received += 1;

        let mut req = VectorPacketBuffer::new();
        req.buffer = raw.to_vec();
        let request = match DnsPacket::from_buffer(&mut req) {
            Ok(p) => p,
            Err(e) => {
                log::info!("NOTIFY: failed to parse datagram from {}: {:?}", src, e);
                return;
            }
        };

        let response = self.handle_notify(&request, raw, src.ip());
        let mut out = VectorPacketBuffer::new();
        let mut response = response;
        if response.write(&mut out, 512).is_ok() {
            let _ = socket.send_to(&out.buffer, src).await;
        }
    }

    /// Validates and, on acceptance, kicks off an immediate transfer attempt.
    /// Returns the NOTIFY response packet (NOERROR or NOTAUTH per RFC 1996).
    fn handle_notify(&self, request: &DnsPacket, raw: &[u8], client_ip: IpAddr) -> DnsPacket {
        let mut response = DnsPacket::new();
        response.header.id = request.header.id;
        response.header.response = true;
        response.header.opcode = request.header.opcode;
        response.header.authoritative_answer = true;

        let Some(question) = request.questions.first() else {
            response.header.rescode = ResultCode::FORMERR;
            return response;
        };
        response.questions.push(question.clone());
        response.header.questions = 1;

        let zone = question.name.to_ascii_lowercase();
        let mut bindings = self.bindings.write();
        let Some(binding) = bindings.get_mut(&zone) else {
            self.stats.write().rejected += 1;
            response.header.rescode = ResultCode::NOTAUTH;
            return response;
        };

        if !source_matches_master(&binding.cfg, client_ip) {
            self.stats.write().rejected += 1;
            response.header.rescode = ResultCode::NOTAUTH;
            return response;
        }

        if let Some(key) = &binding.cfg.tsig_key {
            let has_tsig = request.resources.iter().any(|r| matches!(r, crate::dns::protocol::DnsRecord::Tsig { .. }));
            if !has_tsig || tsig::verify(request, raw, std::slice::from_ref(key), None).is_err() {
                self.stats.write().rejected += 1;
                response.header.rescode = ResultCode::NOTAUTH;
                return response;
            }
        }

        binding.state.last_notify = Some(std::time::Instant::now());
        self.stats.write().accepted += 1;
        self.spawn_transfer(zone);

        response.header.rescode = ResultCode::NOERROR;
        response
    }

    /// Runs the transfer attempt on the current async runtime without
    /// blocking the NOTIFY response; the task/session layer's regular
    /// schedule will pick up the resulting state on its next tick.
    fn spawn_transfer(&self, zone: String) {
        let store = self.store.clone();
        let bindings = self.bindings.clone();
        let stats = self.stats.clone();
        tokio::spawn(async move {
            let cfg = {
                let guard = bindings.read();
                match guard.get(&zone) {
                    Some(b) => b.cfg.clone(),
                    None => return,
                }
            };
            let mut state = {
                let guard = bindings.read();
                guard.get(&zone).map(|b| b.state.clone()).unwrap_or_default()
            };
            let result = attempt_slave_transfer(&cfg, store.as_ref(), &mut state).await;
            if result.is_ok() {
                stats.write().transfers_triggered += 1;
            } else if let Err(e) = &result {
                log::info!("NOTIFY-triggered transfer for {} failed: {:?}", zone, e);
            }
            if let Some(binding) = bindings.write().get_mut(&zone) {
                binding.state = state;
            }
        });
    }

    /// Drives the `transfer_interval`/`retry_interval` sleep schedule for
    /// every currently registered binding. Runs independently of `run`'s
    /// NOTIFY loop, which still preempts a zone's wait via `spawn_transfer`;
    /// this is only the baseline cadence for zones that never get notified.
    /// Never returns under normal operation.
    pub async fn run_scheduler(&self) {
        let zones: Vec<String> = self.bindings.read().keys().cloned().collect();
        let tasks: Vec<_> = zones
            .into_iter()
            .map(|zone| {
                let store = self.store.clone();
                let bindings = self.bindings.clone();
                let stats = self.stats.clone();
                tokio::spawn(async move {
                    loop {
                        let Some((cfg, mut state)) = bindings
                            .read()
                            .get(&zone)
                            .map(|b| (b.cfg.clone(), b.state.clone()))
                        else {
                            return;
                        };
                        if state.disabled {
                            return;
                        }

                        let sleep_for = if state.failures > 0 {
                            cfg.retry_interval
                        } else {
                            cfg.transfer_interval
                        };
                        tokio::time::sleep(sleep_for).await;

                        let result = attempt_slave_transfer(&cfg, store.as_ref(), &mut state).await;
                        match &result {
                            Ok(_) => stats.write().transfers_triggered += 1,
                            Err(e) => log::info!("scheduled transfer for {} failed: {:?}", zone, e),
                        }
                        if let Some(binding) = bindings.write().get_mut(&zone) {
                            binding.state = state;
                        }
                    }
                })
            })
            .collect();

        for task in tasks {
            let _ = task.await;
        }
    }
}

/// A NOTIFY is only honored from the host configured as this zone's master;
/// a hostname binding is resolved at validation time so a DNS change on the
/// master's own name takes effect without a restart.
fn source_matches_master(cfg: &SlaveZoneConfig, client_ip: IpAddr) -> bool {
    use std::net::ToSocketAddrs;
    match (cfg.master_host.as_str(), 0u16).to_socket_addrs() {
        Ok(mut addrs) => addrs.any(|a| a.ip() == client_ip),
        Err(_) => cfg.master_host.parse::<IpAddr>().map(|ip| ip == client_ip).unwrap_or(false),
    }
}
