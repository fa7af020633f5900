//! Pacgen - Proxy Auto-Config Generator
//!
//! Builds a latency-ranked PAC file from public proxy lists.
//!
//! ## Features
//!
//! - Geonode JSON and plain-text list sources, fetched concurrently
//! - Deduplication by protocol and address
//! - HTTP, HTTPS, SOCKS4 and SOCKS5 liveness probing with bounded retries
//! - Latency ranking with a configurable cap
//! - PAC output with a guaranteed `DIRECT` fallback

pub mod config;
pub mod error;
pub mod models;
pub mod output;
pub mod proxy;
pub mod services;
pub mod sources;

pub use config::Config;
pub use error::{PacError, Result};
pub use services::{Pipeline, RunReport};
