//! Prometheus metrics for the authoritative/recursive DNS server.
//!
//! Covers query/response counts, cache operations, ACL decisions, TSIG
//! verification outcomes, UPDATE results, and zone-transfer activity.
//! Every counter here is incremented off the request path's hot section
//! (after the response has been built) so a registry scrape never
//! competes with query processing for a lock.

use lazy_static::lazy_static;
use prometheus::{
    GaugeVec, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec,
    register_gauge_vec, register_histogram_vec,
    register_int_counter_vec, register_int_gauge, register_int_gauge_vec,
    Encoder, TextEncoder, Registry,
};
use std::time::{Duration, Instant};

lazy_static! {
    /// DNS query counters by protocol and query type
    pub static ref DNS_QUERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "atlas_dns_queries_total",
        "Total number of DNS queries received",
        &["protocol", "query_type", "zone"]
    ).unwrap();

    /// DNS response counters by response code
    pub static ref DNS_RESPONSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "atlas_dns_responses_total",
        "Total number of DNS responses sent",
        &["response_code", "protocol", "query_type"]
    ).unwrap();

    /// DNS query duration histogram
    pub static ref DNS_QUERY_DURATION: HistogramVec = register_histogram_vec!(
        "atlas_dns_query_duration_seconds",
        "DNS query processing duration in seconds",
        &["protocol", "query_type", "cache_hit"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    /// Cache hit/miss/eviction counters
    pub static ref DNS_CACHE_OPERATIONS: IntCounterVec = register_int_counter_vec!(
        "atlas_dns_cache_operations_total",
        "DNS cache operations (hit/miss/eviction)",
        &["operation", "record_type"]
    ).unwrap();

    /// Cache size gauge
    pub static ref DNS_CACHE_SIZE: IntGaugeVec = register_int_gauge_vec!(
        "atlas_dns_cache_size",
        "Current number of entries in DNS cache",
        &["cache_type"]
    ).unwrap();

    /// Active connections gauge
    pub static ref ACTIVE_CONNECTIONS: IntGaugeVec = register_int_gauge_vec!(
        "atlas_active_connections",
        "Current number of active connections",
        &["protocol", "connection_type"]
    ).unwrap();

    /// Zone statistics
    pub static ref ZONE_STATS: IntGaugeVec = register_int_gauge_vec!(
        "atlas_zones",
        "Zone statistics",
        &["metric"]
    ).unwrap();

    /// Upstream DNS server query counters
    pub static ref UPSTREAM_QUERIES: IntCounterVec = register_int_counter_vec!(
        "atlas_upstream_queries_total",
        "Queries sent to upstream DNS servers",
        &["upstream", "status"]
    ).unwrap();

    /// Upstream response times
    pub static ref UPSTREAM_DURATION: HistogramVec = register_histogram_vec!(
        "atlas_upstream_duration_seconds",
        "Upstream DNS query duration",
        &["upstream"],
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    ).unwrap();

    /// Server uptime
    pub static ref SERVER_UPTIME: IntGauge = register_int_gauge!(
        "atlas_server_uptime_seconds",
        "Server uptime in seconds"
    ).unwrap();

    /// Error counters by component
    pub static ref ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "atlas_errors_total",
        "Total errors by component and type",
        &["component", "error_type"]
    ).unwrap();

    /// Cache hit rate gauge
    pub static ref CACHE_HIT_RATE: GaugeVec = register_gauge_vec!(
        "atlas_cache_hit_rate",
        "Cache hit rate percentage",
        &["window"]
    ).unwrap();

    /// ACL evaluation outcomes by target, match kind, and decision
    pub static ref ACL_DECISIONS: IntCounterVec = register_int_counter_vec!(
        "atlas_acl_decisions_total",
        "ACL evaluation outcomes",
        &["target", "match_kind", "decision"]
    ).unwrap();

    /// TSIG verification outcomes by reason
    pub static ref TSIG_VERIFY_TOTAL: IntCounterVec = register_int_counter_vec!(
        "atlas_tsig_verify_total",
        "TSIG verification attempts by outcome",
        &["outcome"]
    ).unwrap();

    /// TSIG sign operations by algorithm
    pub static ref TSIG_SIGN_TOTAL: IntCounterVec = register_int_counter_vec!(
        "atlas_tsig_sign_total",
        "TSIG sign operations by algorithm",
        &["algorithm"]
    ).unwrap();

    /// UPDATE (RFC 2136) operations by result
    pub static ref UPDATE_OPERATIONS: IntCounterVec = register_int_counter_vec!(
        "atlas_update_operations_total",
        "Dynamic UPDATE operations by zone and result",
        &["zone", "result"]
    ).unwrap();

    /// AXFR/IXFR transfer sessions by direction and result
    pub static ref TRANSFER_SESSIONS: IntCounterVec = register_int_counter_vec!(
        "atlas_transfer_sessions_total",
        "Zone transfer sessions",
        &["kind", "direction", "result"]
    ).unwrap();

    /// AXFR/IXFR bytes transferred
    pub static ref TRANSFER_BYTES: IntCounterVec = register_int_counter_vec!(
        "atlas_transfer_bytes_total",
        "Zone transfer bytes",
        &["kind", "direction"]
    ).unwrap();

    /// NOTIFY messages by direction and result
    pub static ref NOTIFY_TOTAL: IntCounterVec = register_int_counter_vec!(
        "atlas_notify_total",
        "NOTIFY messages sent or received",
        &["direction", "result"]
    ).unwrap();

    /// Change journal size per zone (entry count)
    pub static ref JOURNAL_SIZE: IntGaugeVec = register_int_gauge_vec!(
        "atlas_journal_entries",
        "Change journal entry count per zone",
        &["zone"]
    ).unwrap();
}

/// Collector wrapping the process-wide Prometheus registry with
/// convenience recording methods for each subsystem.
pub struct MetricsCollector {
    start_time: Instant,
    registry: Registry,
}

impl MetricsCollector {
    pub fn new() -> Self {
        initialize_metrics();
        Self {
            start_time: Instant::now(),
            registry: Registry::new(),
        }
    }

    pub fn update_uptime(&self) {
        let uptime = self.start_time.elapsed().as_secs();
        SERVER_UPTIME.set(uptime as i64);
    }

    pub fn record_dns_query(&self, protocol: &str, query_type: &str, zone: &str) {
        DNS_QUERIES_TOTAL.with_label_values(&[protocol, query_type, zone]).inc();
    }

    pub fn record_dns_response(&self, response_code: &str, protocol: &str, query_type: &str) {
        DNS_RESPONSES_TOTAL.with_label_values(&[response_code, protocol, query_type]).inc();
    }

    pub fn record_query_duration(&self, duration: Duration, protocol: &str, query_type: &str, cache_hit: bool) {
        let cache_hit_str = if cache_hit { "hit" } else { "miss" };
        DNS_QUERY_DURATION
            .with_label_values(&[protocol, query_type, cache_hit_str])
            .observe(duration.as_secs_f64());
    }

    pub fn record_cache_operation(&self, operation: &str, record_type: &str) {
        DNS_CACHE_OPERATIONS.with_label_values(&[operation, record_type]).inc();
    }

    pub fn update_cache_size(&self, cache_type: &str, size: i64) {
        DNS_CACHE_SIZE.with_label_values(&[cache_type]).set(size);
    }

    pub fn update_cache_hit_rate(&self, window: &str, rate_pct: f64) {
        CACHE_HIT_RATE.with_label_values(&[window]).set(rate_pct);
    }

    pub fn update_active_connections(&self, protocol: &str, connection_type: &str, count: i64) {
        ACTIVE_CONNECTIONS.with_label_values(&[protocol, connection_type]).set(count);
    }

    pub fn update_zone_stats(&self, metric: &str, value: i64) {
        ZONE_STATS.with_label_values(&[metric]).set(value);
    }

    pub fn record_upstream_query(&self, upstream: &str, status: &str) {
        UPSTREAM_QUERIES.with_label_values(&[upstream, status]).inc();
    }

    pub fn record_upstream_duration(&self, upstream: &str, duration: Duration) {
        UPSTREAM_DURATION.with_label_values(&[upstream]).observe(duration.as_secs_f64());
    }

    pub fn record_error(&self, component: &str, error_type: &str) {
        ERRORS_TOTAL.with_label_values(&[component, error_type]).inc();
    }

    pub fn record_acl_decision(&self, target: &str, match_kind: &str, decision: &str) {
        ACL_DECISIONS.with_label_values(&[target, match_kind, decision]).inc();
    }

    pub fn record_tsig_verify(&self, outcome: &str) {
        TSIG_VERIFY_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn record_tsig_sign(&self, algorithm: &str) {
        TSIG_SIGN_TOTAL.with_label_values(&[algorithm]).inc();
    }

    pub fn record_update_operation(&self, zone: &str, result: &str) {
        UPDATE_OPERATIONS.with_label_values(&[zone, result]).inc();
    }

    pub fn record_transfer_session(&self, kind: &str, direction: &str, result: &str) {
        TRANSFER_SESSIONS.with_label_values(&[kind, direction, result]).inc();
    }

    pub fn record_transfer_bytes(&self, kind: &str, direction: &str, bytes: u64) {
        TRANSFER_BYTES.with_label_values(&[kind, direction]).inc_by(bytes);
    }

    pub fn record_notify(&self, direction: &str, result: &str) {
        NOTIFY_TOTAL.with_label_values(&[direction, result]).inc();
    }

    pub fn update_journal_size(&self, zone: &str, entries: i64) {
        JOURNAL_SIZE.with_label_values(&[zone]).set(entries);
    }

    /// Export all registered metrics in Prometheus text exposition format.
    pub fn export_metrics(&self) -> Result<String, Box<dyn std::error::Error>> {
        self.update_uptime();
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Query timer for measuring DNS query duration via RAII.
pub struct QueryTimer {
    start: Instant,
    protocol: String,
    query_type: String,
}

impl QueryTimer {
    pub fn start(protocol: String, query_type: String) -> Self {
        Self { start: Instant::now(), protocol, query_type }
    }

    pub fn finish(self, cache_hit: bool) {
        let duration = self.start.elapsed();
        let cache_hit_str = if cache_hit { "hit" } else { "miss" };
        DNS_QUERY_DURATION
            .with_label_values(&[&self.protocol, &self.query_type, cache_hit_str])
            .observe(duration.as_secs_f64());
    }
}

#[macro_export]
macro_rules! time_dns_query {
    ($protocol:expr, $query_type:expr, $cache_hit:expr, $block:block) => {{
        let timer = $crate::dns::metrics::QueryTimer::start($protocol.to_string(), $query_type.to_string());
        let result = $block;
        timer.finish($cache_hit);
        result
    }};
}

#[macro_export]
macro_rules! record_error {
    ($component:expr, $error_type:expr) => {
        $crate::dns::metrics::ERRORS_TOTAL
            .with_label_values(&[$component, $error_type])
            .inc();
    };
    ($component:expr, $error_type:expr, $error:expr) => {
        $crate::dns::metrics::ERRORS_TOTAL
            .with_label_values(&[$component, $error_type])
            .inc();
        log::error!("Error in {}: {} - {:?}", $component, $error_type, $error);
    };
}

/// Zero out gauges at startup so a scrape before the first event still
/// exposes the metric names.
pub fn initialize_metrics() {
    DNS_CACHE_SIZE.with_label_values(&["response"]).set(0);
    DNS_CACHE_SIZE.with_label_values(&["negative"]).set(0);

    ACTIVE_CONNECTIONS.with_label_values(&["udp", "server"]).set(0);
    ACTIVE_CONNECTIONS.with_label_values(&["tcp", "server"]).set(0);

    ZONE_STATS.with_label_values(&["total_zones"]).set(0);
    ZONE_STATS.with_label_values(&["total_records"]).set(0);

    log::info!("Prometheus metrics initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new();
        assert!(collector.start_time.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_dns_query_recording() {
        let collector = MetricsCollector::new();
        collector.record_dns_query("udp", "A", "example.com");
        collector.record_dns_response("NOERROR", "udp", "A");
        let metrics = collector.export_metrics().unwrap();
        assert!(metrics.contains("atlas_dns_queries_total"));
        assert!(metrics.contains("atlas_dns_responses_total"));
    }

    #[test]
    fn test_cache_metrics() {
        let collector = MetricsCollector::new();
        collector.record_cache_operation("hit", "A");
        collector.record_cache_operation("miss", "AAAA");
        collector.update_cache_size("response", 150);
        let metrics = collector.export_metrics().unwrap();
        assert!(metrics.contains("atlas_dns_cache_operations_total"));
        assert!(metrics.contains("atlas_dns_cache_size"));
    }

    #[test]
    fn test_acl_and_tsig_metrics() {
        let collector = MetricsCollector::new();
        collector.record_acl_decision("master", "network", "allow");
        collector.record_tsig_verify("ok");
        collector.record_tsig_sign("hmac-sha256");
        let metrics = collector.export_metrics().unwrap();
        assert!(metrics.contains("atlas_acl_decisions_total"));
        assert!(metrics.contains("atlas_tsig_verify_total"));
        assert!(metrics.contains("atlas_tsig_sign_total"));
    }

    #[test]
    fn test_update_and_transfer_metrics() {
        let collector = MetricsCollector::new();
        collector.record_update_operation("example.com.", "noerror");
        collector.record_transfer_session("axfr", "outbound", "success");
        collector.record_transfer_bytes("axfr", "outbound", 4096);
        collector.record_notify("outbound", "sent");
        collector.update_journal_size("example.com.", 12);
        let metrics = collector.export_metrics().unwrap();
        assert!(metrics.contains("atlas_update_operations_total"));
        assert!(metrics.contains("atlas_transfer_sessions_total"));
        assert!(metrics.contains("atlas_transfer_bytes_total"));
        assert!(metrics.contains("atlas_notify_total"));
        assert!(metrics.contains("atlas_journal_entries"));
    }

    #[test]
    fn test_metrics_export_format() {
        let collector = MetricsCollector::new();
        collector.record_dns_query("udp", "A", "test.com");
        let exported = collector.export_metrics().unwrap();
        assert!(exported.contains("# HELP"));
        assert!(exported.contains("# TYPE"));
        assert!(exported.contains("atlas_"));
    }

    #[test]
    fn test_initialize_metrics() {
        initialize_metrics();
        let metrics = prometheus::gather();
        assert!(!metrics.is_empty());
    }
}
