//! The `ServerContext in this thread holds the common state across the server

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use derive_more::{Display, Error, From};

use crate::dns::acl::AclEngine;
use crate::dns::authority::Authority;
use crate::dns::cache::SynchronizedCache;
use crate::dns::client::{DnsClient, DnsNetworkClient};
use crate::dns::dynamic_update::{DynamicUpdateConfig, DynamicUpdateHandler};
use crate::dns::journal::Journal;
use crate::dns::metrics::MetricsCollector;
use crate::dns::resolve::{DnsResolver, ForwardingDnsResolver, RecursiveDnsResolver};
use crate::dns::tsig::TsigKey;
use crate::dns::zone_store::{memzone::MemZoneStore, ZoneStore};
use crate::dns::zone_transfer::{ZoneTransferConfig, ZoneTransferHandler};

#[derive(Debug, Display, From, Error)]
pub enum ContextError {
    Authority(crate::dns::authority::AuthorityError),
    Client(crate::dns::client::ClientError),
    Io(std::io::Error),
}

type Result<T> = std::result::Result<T, ContextError>;

pub struct ServerStatistics {
    pub tcp_query_count: AtomicUsize,
    pub udp_query_count: AtomicUsize,
}

impl ServerStatistics {
    pub fn get_tcp_query_count(&self) -> usize {
        self.tcp_query_count.load(Ordering::Acquire)
    }

    pub fn get_udp_query_count(&self) -> usize {
        self.udp_query_count.load(Ordering::Acquire)
    }
}

/// DNS resolution strategy configuration
#[derive(Clone, Debug)]
pub enum ResolveStrategy {
    /// Perform recursive resolution starting from root servers
    Recursive,
    /// Forward all queries to an upstream DNS server
    Forward { host: String, port: u16 },
}

/// Main server context containing configuration and shared state
/// 
/// This struct holds all the configuration and runtime state needed by the DNS server,
/// including the authority zones, cache, resolution strategy, and server settings.
pub struct ServerContext {
    pub authority: Authority,
    pub cache: SynchronizedCache,
    pub client: Box<dyn DnsClient + Sync + Send>,
    pub dns_port: u16,
    pub resolve_strategy: ResolveStrategy,
    pub allow_recursive: bool,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub statistics: ServerStatistics,
    pub zones_dir: String,

    /// Additional round-robin upstreams for the forwarding resolver, beyond
    /// the single server named by `resolve_strategy`.
    pub upstream_servers: Vec<(String, u16)>,
    /// `[ttl_min, ttl_max]` clamp applied to every RR cached from an
    /// upstream answer.
    pub cache_ttl_min: u32,
    pub cache_ttl_max: u32,

    /// Bridges the synchronous server loop to the async zone-transfer,
    /// dynamic-update and zone-store subsystems.
    pub async_rt: tokio::runtime::Runtime,
    pub zone_store: Arc<dyn ZoneStore>,
    pub journal: Arc<Journal>,
    pub tsig_keys: Arc<parking_lot::RwLock<Vec<TsigKey>>>,
    pub acl: Arc<parking_lot::RwLock<AclEngine>>,
    pub dns_metrics: Arc<MetricsCollector>,
    pub dynamic_update: Arc<DynamicUpdateHandler>,
    pub zone_transfer: Arc<ZoneTransferHandler>,
}

impl Default for ServerContext {
    fn default() -> Self {
        ServerContext::new().expect("Failed to create default ServerContext")
    }
}

impl ServerContext {
    pub fn new() -> Result<ServerContext> {
        let async_rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;

        let zone_store: Arc<dyn ZoneStore> = Arc::new(MemZoneStore::new());
        let journal = Arc::new(Journal::new());
        let tsig_keys = Arc::new(parking_lot::RwLock::new(Vec::new()));
        let acl = Arc::new(parking_lot::RwLock::new(AclEngine::new()));
        let dns_metrics = Arc::new(MetricsCollector::new());

        let dynamic_update = Arc::new(DynamicUpdateHandler::new(
            DynamicUpdateConfig::default(),
            zone_store.clone(),
            journal.clone(),
            tsig_keys.read().clone(),
            acl.read().clone(),
            dns_metrics.clone(),
        ));
        let zone_transfer = Arc::new(ZoneTransferHandler::new(
            ZoneTransferConfig::default(),
            zone_store.clone(),
            journal.clone(),
            tsig_keys.read().clone(),
            acl.read().clone(),
            dns_metrics.clone(),
        ));

        Ok(ServerContext {
            authority: Authority::new(),
            cache: SynchronizedCache::with_ttl_bounds(0, 86400),
            client: Box::new(DnsNetworkClient::new(0)?), // Use port 0 to let OS choose available port
            dns_port: 53,
            resolve_strategy: ResolveStrategy::Recursive,
            allow_recursive: true,
            enable_udp: true,
            enable_tcp: true,
            statistics: ServerStatistics {
                tcp_query_count: AtomicUsize::new(0),
                udp_query_count: AtomicUsize::new(0),
            },
            zones_dir: "/opt/atlas/zones".to_string(),
            upstream_servers: Vec::new(),
            cache_ttl_min: 0,
            cache_ttl_max: 86400,
            async_rt,
            zone_store,
            journal,
            tsig_keys,
            acl,
            dns_metrics,
            dynamic_update,
            zone_transfer,
        })
    }

    pub fn initialize(&mut self) -> Result<()> {
        // Create zones directory if it doesn't exist
        fs::create_dir_all(&self.zones_dir)?;

        // Start UDP client thread
        self.client.run()?;

        // Load authority data
        self.authority.load()?;

        Ok(())
    }

    pub fn create_resolver(&self, ptr: Arc<ServerContext>) -> Box<dyn DnsResolver> {
        match self.resolve_strategy {
            ResolveStrategy::Recursive => Box::new(RecursiveDnsResolver::new(ptr)),
            ResolveStrategy::Forward { ref host, port } => {
                Box::new(ForwardingDnsResolver::new(ptr, (host.clone(), port)))
            }
        }
    }
}

#[cfg(test)]
pub mod tests {

    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use crate::dns::authority::Authority;
    use crate::dns::cache::SynchronizedCache;

    use crate::dns::client::tests::{DnsStubClient, StubCallback};

    use super::*;

    pub fn create_test_context(callback: Box<StubCallback>) -> Arc<ServerContext> {
        let async_rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build test runtime");

        let zone_store: Arc<dyn ZoneStore> = Arc::new(MemZoneStore::new());
        let journal = Arc::new(Journal::new());
        let tsig_keys = Arc::new(parking_lot::RwLock::new(Vec::new()));
        let acl = Arc::new(parking_lot::RwLock::new(AclEngine::new()));
        let dns_metrics = Arc::new(MetricsCollector::new());

        let dynamic_update = Arc::new(DynamicUpdateHandler::new(
            DynamicUpdateConfig::default(),
            zone_store.clone(),
            journal.clone(),
            tsig_keys.read().clone(),
            acl.read().clone(),
            dns_metrics.clone(),
        ));
        let zone_transfer = Arc::new(ZoneTransferHandler::new(
            ZoneTransferConfig::default(),
            zone_store.clone(),
            journal.clone(),
            tsig_keys.read().clone(),
            acl.read().clone(),
            dns_metrics.clone(),
        ));

        Arc::new(ServerContext {
            authority: Authority::new(),
            cache: SynchronizedCache::new(),
            client: Box::new(DnsStubClient::new(callback)),
            dns_port: 53,
            resolve_strategy: ResolveStrategy::Recursive,
            allow_recursive: true,
            enable_udp: true,
            enable_tcp: true,
            statistics: ServerStatistics {
                tcp_query_count: AtomicUsize::new(0),
                udp_query_count: AtomicUsize::new(0),
            },
            zones_dir: "/opt/atlas/zones".to_string(),
            upstream_servers: Vec::new(),
            cache_ttl_min: 0,
            cache_ttl_max: 86400,
            async_rt,
            zone_store,
            journal,
            tsig_keys,
            acl,
            dns_metrics,
            dynamic_update,
            zone_transfer,
        })
    }
}
