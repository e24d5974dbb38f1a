//! resolver implementations implementing different strategies for answering
//! incoming queries

use std::net::IpAddr;
use std::sync::Arc;
use std::vec::Vec;

use derive_more::{Display, Error, From};

use crate::dns::acl::{RequestContext, Target};
use crate::dns::context::ServerContext;
use crate::dns::protocol::{DnsPacket, QueryType, ResultCode};

#[derive(Debug, Display, From, Error)]
pub enum ResolveError {
    Client(crate::dns::client::ClientError),
    Cache(crate::dns::cache::CacheError),
    Io(std::io::Error),
    NoServerFound,
    MaxIterationsExceeded,
}

type Result<T> = std::result::Result<T, ResolveError>;

/// Trait for DNS resolution strategies
///
/// Implementors of this trait provide different strategies for resolving DNS queries,
/// such as recursive resolution, forwarding to upstream servers, or authoritative responses.
pub trait DnsResolver {
    /// Get the server context for accessing cache, authority, and configuration
    fn get_context(&self) -> Arc<ServerContext>;

    /// Resolve a DNS query
    ///
    /// # Arguments
    ///
    /// * `qname` - The domain name to resolve
    /// * `qtype` - The type of DNS record to query (A, AAAA, MX, etc.)
    /// * `recursive` - Whether to perform recursive resolution
    /// * `client_ip` - The peer the query arrived from, for ACL evaluation
    ///
    /// # Returns
    ///
    /// A DNS packet containing the response, or an error if resolution fails
    fn resolve(
        &mut self,
        qname: &str,
        qtype: QueryType,
        recursive: bool,
        client_ip: IpAddr,
    ) -> Result<DnsPacket> {
        log::info!("attempting to resolve: {:?}", qname);

        if let QueryType::Unknown(_) = qtype {
            log::info!("unknown");
            let mut packet = DnsPacket::new();
            packet.header.rescode = ResultCode::NOTIMP;
            return Ok(packet);
        }

        let context = self.get_context();

        if let Some(qr) = context.authority.query(qname, qtype) {
            log::info!("context.authority.query");
            return Ok(qr);
        }

        if !recursive || !context.allow_recursive {
            log::info!("REFUSED !allow_recursive");
            let mut packet = DnsPacket::new();
            packet.header.rescode = ResultCode::REFUSED;
            return Ok(packet);
        }

        let acl_ctx = RequestContext {
            client_ip,
            country: None,
            asn: None,
            target: Target::Cache,
            presented_tsig_key: None,
            operation: None,
        };
        if !context.acl.read().evaluate(&acl_ctx).is_allowed() {
            log::info!("REFUSED cache target denied by acl");
            context.cache.record_acl_denial();
            let mut packet = DnsPacket::new();
            packet.header.rescode = ResultCode::REFUSED;
            return Ok(packet);
        }

        if let Some(qr) = context.cache.lookup(qname, qtype) {
            log::info!("context.cache.lookup");
            return Ok(qr);
        }

        if qtype == QueryType::A || qtype == QueryType::Aaaa {
            log::info!("context.cache.lookup2");
            if let Some(qr) = context.cache.lookup(qname, QueryType::Cname) {
                return Ok(qr);
            }
        }

        self.perform(qname, qtype, client_ip)
    }

    fn perform(&mut self, qname: &str, qtype: QueryType, client_ip: IpAddr) -> Result<DnsPacket>;
}

/// A Forwarding DNS Resolver
///
/// Forwards every miss to a configured list of upstream servers, round-robin.
/// A server that errors or times out is skipped in favor of the next one in
/// the list; once the whole list has been tried without success the caller
/// gets `NoServerFound`, which the server layer turns into SERVFAIL.
pub struct ForwardingDnsResolver {
    context: Arc<ServerContext>,
    servers: Vec<(String, u16)>,
    rr_cursor: std::sync::atomic::AtomicUsize,
}

impl ForwardingDnsResolver {
    pub fn new(context: Arc<ServerContext>, primary: (String, u16)) -> ForwardingDnsResolver {
        let mut servers = vec![primary];
        servers.extend(context.upstream_servers.iter().cloned());
        ForwardingDnsResolver {
            context,
            servers,
            rr_cursor: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

impl DnsResolver for ForwardingDnsResolver {
    fn get_context(&self) -> Arc<ServerContext> {
        self.context.clone()
    }

    fn perform(&mut self, qname: &str, qtype: QueryType, _client_ip: IpAddr) -> Result<DnsPacket> {
        let start = self
            .rr_cursor
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            % self.servers.len();

        let mut last_err = None;
        for offset in 0..self.servers.len() {
            let (host, port) = &self.servers[(start + offset) % self.servers.len()];
            self.context.cache.record_upstream_query();

            match self
                .context
                .client
                .send_query(qname, qtype, (host.as_str(), *port), true)
            {
                Ok(result) => {
                    let records: Vec<_> = result
                        .answers
                        .iter()
                        .map(|r| {
                            r.with_clamped_ttl(self.context.cache_ttl_min, self.context.cache_ttl_max)
                        })
                        .collect();
                    self.context.cache.store(&records)?;
                    return Ok(result);
                }
                Err(e) => last_err = Some(e),
            }
        }

        match last_err {
            Some(e) => Err(e.into()),
            None => Err(ResolveError::NoServerFound),
        }
    }
}

/// A Recursive DNS resolver
///
/// This resolver can answer any request using the root servers of the internet
pub struct RecursiveDnsResolver {
    context: Arc<ServerContext>,
}

impl RecursiveDnsResolver {
    pub fn new(context: Arc<ServerContext>) -> RecursiveDnsResolver {
        RecursiveDnsResolver { context }
    }
    
    /// Find the closest cached nameserver for a domain
    fn find_closest_nameserver(&self, qname: &str) -> Option<String> {
        let labels = qname.split('.').collect::<Vec<&str>>();
        
        for lbl_idx in 0..labels.len() + 1 {
            let domain = labels[lbl_idx..].join(".");
            
            if let Some(addr) = self
                .context
                .cache
                .lookup(&domain, QueryType::Ns)
                .and_then(|qr| qr.get_unresolved_ns(&domain))
                .and_then(|ns| self.context.cache.lookup(&ns, QueryType::A))
                .and_then(|qr| qr.get_random_a())
            {
                return Some(addr);
            }
        }
        
        None
    }
    
    /// Store response records in cache
    fn cache_response(&self, response: &DnsPacket) {
        let _ = self.context.cache.store(&response.answers);
        let _ = self.context.cache.store(&response.authorities);
        let _ = self.context.cache.store(&response.resources);
    }
    
    /// Check if response contains a valid answer
    fn is_valid_answer(&self, response: &DnsPacket) -> bool {
        !response.answers.is_empty() && response.header.rescode == ResultCode::NOERROR
    }
    /// Query a nameserver and process the response
    fn query_nameserver(&mut self, qname: &str, qtype: QueryType, ns: &str) -> Result<DnsPacket> {
        log::info!("attempting lookup of {:?} {} with ns {}", qtype, qname, ns);
        let server = (ns, 53);
        Ok(self.context.client.send_query(qname, qtype, server, false)?)
    }

    /// Handle a successful answer response
    fn handle_answer(&mut self, response: DnsPacket) -> Result<DnsPacket> {
        self.cache_response(&response);
        Ok(response)
    }

    /// Handle an NXDOMAIN response
    fn handle_nxdomain(&mut self, qname: &str, qtype: QueryType, response: DnsPacket) -> Result<DnsPacket> {
        if let Some(ttl) = response.get_ttl_from_soa() {
            let _ = self.context.cache.store_nxdomain(qname, qtype, ttl);
        }
        Ok(response)
    }

    /// Try to find the next nameserver from the response
    fn find_next_nameserver(
        &mut self,
        response: &DnsPacket,
        qname: &str,
        client_ip: IpAddr,
    ) -> Result<Option<String>> {
        // Check for resolved NS in additional section
        if let Some(new_ns) = response.get_resolved_ns(qname) {
            self.cache_response(response);
            return Ok(Some(new_ns));
        }

        // Check for unresolved NS that needs recursive resolution
        if let Some(new_ns_name) = response.get_unresolved_ns(qname) {
            let recursive_response = self.resolve(&new_ns_name, QueryType::A, true, client_ip)?;
            return Ok(recursive_response.get_random_a());
        }

        Ok(None)
    }
}

impl DnsResolver for RecursiveDnsResolver {
    fn get_context(&self) -> Arc<ServerContext> {
        self.context.clone()
    }

    fn perform(&mut self, qname: &str, qtype: QueryType, client_ip: IpAddr) -> Result<DnsPacket> {
        // Find the closest cached nameserver
        let tentative_ns = self.find_closest_nameserver(qname);
        log::info!("tentative_ns: {:?}", tentative_ns.clone());
        
        let mut ns = tentative_ns.ok_or(ResolveError::NoServerFound)?;
        
        // Add maximum iteration limit to prevent infinite loops
        const MAX_ITERATIONS: u32 = 30;
        let mut iterations = 0;

        // Start querying name servers
        loop {
            iterations += 1;
            if iterations > MAX_ITERATIONS {
                log::warn!("Maximum iteration limit reached while resolving {} {:?}", qname, qtype);
                return Err(ResolveError::MaxIterationsExceeded);
            }
            
            let response = self.query_nameserver(qname, qtype, &ns)?;

            // Check if we have a valid answer
            if self.is_valid_answer(&response) {
                return self.handle_answer(response);
            }

            // Check for NXDOMAIN
            if response.header.rescode == ResultCode::NXDOMAIN {
                return self.handle_nxdomain(qname, qtype, response);
            }

            // Try to find the next nameserver
            match self.find_next_nameserver(&response, qname, client_ip)? {
                Some(new_ns) => ns = new_ns,
                None => return Ok(response),
            }
        }
    }
}
