//! Atlas DNS Server
//!
//! A high-performance, authoritative DNS server implementation in Rust.
//!
//! # Features
//!
//! * Full DNS protocol support (UDP and TCP)
//! * Recursive and forwarding resolution strategies
//! * Built-in caching with TTL support
//! * SQL and in-memory zone storage
//! * TSIG, AXFR/IXFR, NOTIFY and dynamic UPDATE
//! * Support for common DNS record types (A, AAAA, NS, CNAME, MX, TXT, etc.)
//!
//! # Architecture
//!
//! * `dns` - Core DNS server functionality
//! * `privilege_escalation` - Binding to privileged ports on startup

/// DNS server implementation and protocol handling
pub mod dns;

/// Privilege escalation for binding to port 53 without running as root
pub mod privilege_escalation;
