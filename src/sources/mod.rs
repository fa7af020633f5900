//! Upstream proxy list sources
//!
//! Every source is best-effort: fetch failures are logged and turned into an
//! empty batch so one outage never blocks the others.

pub mod geonode;
pub mod plain_list;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::SourcesConfig;
use crate::error::{PacError, Result};
use crate::models::{ProxyDescriptor, ProxyProtocol};

pub use geonode::GeonodeSource;
pub use plain_list::PlainListSource;

/// Protocols taken from Geonode records
const GEONODE_PROTOCOLS: &[ProxyProtocol] = &[ProxyProtocol::Http];

const SOURCE_USER_AGENT: &str = concat!("pacgen/", env!("CARGO_PKG_VERSION"));

/// A single upstream listing
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Candidate proxies from this source; empty on any failure
    async fn fetch(&self) -> HashSet<ProxyDescriptor>;
}

/// Build the adapters enabled by configuration
pub fn build_sources(config: &SourcesConfig) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let client = http_client(config.fetch_timeout)?;
    let mut sources: Vec<Arc<dyn SourceAdapter>> = Vec::new();

    if let Some(url) = &config.geonode_url {
        sources.push(Arc::new(GeonodeSource::new(
            "geonode",
            url,
            GEONODE_PROTOCOLS,
            client.clone(),
        )));
    }

    if let Some(url) = &config.proxyscrape_url {
        sources.push(Arc::new(PlainListSource::new(
            "proxyscrape",
            url,
            ProxyProtocol::Http,
            client.clone(),
        )));
    }

    for (index, list) in config.extra_lists.iter().enumerate() {
        sources.push(Arc::new(PlainListSource::new(
            format!("extra-{}", index + 1),
            &list.url,
            list.protocol,
            client.clone(),
        )));
    }

    Ok(sources)
}

/// Fetch every source concurrently, one task per source
///
/// A task that panics counts as an empty batch.
pub async fn fetch_all(sources: &[Arc<dyn SourceAdapter>]) -> Vec<HashSet<ProxyDescriptor>> {
    let handles: Vec<_> = sources
        .iter()
        .map(|source| {
            let source = source.clone();
            tokio::spawn(async move { source.fetch().await })
        })
        .collect();

    let results = futures::future::join_all(handles).await;

    results
        .into_iter()
        .zip(sources)
        .map(|(result, source)| match result {
            Ok(batch) => batch,
            Err(e) => {
                warn!(source = source.name(), error = %e, "Source task failed");
                HashSet::new()
            }
        })
        .collect()
}

/// Shared HTTP client for source requests
fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(SOURCE_USER_AGENT)
        .build()
        .map_err(|e| PacError::InvalidConfig(format!("Failed to build HTTP client: {}", e)))
}

/// GET `url` and return the body, failing on non-success statuses
async fn get_text(client: &reqwest::Client, source_name: &str, url: &str) -> Result<String> {
    let fetch_error = |e: reqwest::Error| PacError::SourceFetch {
        source_name: source_name.to_string(),
        message: e.to_string(),
    };

    client
        .get(url)
        .send()
        .await
        .map_err(fetch_error)?
        .error_for_status()
        .map_err(fetch_error)?
        .text()
        .await
        .map_err(fetch_error)
}

/// Log the outcome of a fetch and degrade failures to an empty batch
fn recover(source_name: &str, result: Result<HashSet<ProxyDescriptor>>) -> HashSet<ProxyDescriptor> {
    match result {
        Ok(proxies) => {
            info!(source = source_name, "Fetched {} proxies", proxies.len());
            proxies
        }
        Err(e) => {
            warn!(source = source_name, error = %e, "Source fetch failed; continuing without it");
            HashSet::new()
        }
    }
}
