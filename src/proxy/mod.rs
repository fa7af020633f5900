//! Proxy probing and ranking
//!
//! This module provides the per-run proxy pipeline stages:
//! - Merging candidates from every source
//! - Dialing through HTTP, HTTPS and SOCKS proxies
//! - Concurrent liveness probing with bounded retries
//! - Latency ranking and PAC fallback chain construction

pub mod aggregate;
pub mod chain;
pub mod probe;
pub mod rank;
pub mod retry;
pub mod transport;

pub use chain::{pac_keyword, ChainBuilder};
pub use probe::{HttpProber, ProbeEngine, ProbeOptions, Prober};
pub use retry::{RetryOutcome, RetryPolicy};
pub use transport::ProxyTransport;
