use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{get_text, recover, SourceAdapter};
use crate::error::{PacError, Result};
use crate::models::{ProxyDescriptor, ProxyProtocol};

/// Geonode proxy-list JSON API
///
/// Only protocols in `accepted` produce descriptors; records without a
/// protocol list are tagged with the first accepted protocol.
pub struct GeonodeSource {
    name: String,
    url: String,
    accepted: Vec<ProxyProtocol>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GeonodeResponse {
    #[serde(default)]
    data: Vec<GeonodeRecord>,
}

#[derive(Debug, Deserialize)]
struct GeonodeRecord {
    ip: String,
    port: GeonodePort,
    #[serde(default)]
    protocols: Vec<String>,
}

/// The API has returned ports both as numbers and as strings
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeonodePort {
    Number(u16),
    Text(String),
}

impl GeonodePort {
    fn value(&self) -> Option<u16> {
        match self {
            GeonodePort::Number(port) => Some(*port),
            GeonodePort::Text(port) => port.trim().parse().ok(),
        }
    }
}

impl GeonodeSource {
    pub fn new(
        name: impl Into<String>,
        url: &str,
        accepted: &[ProxyProtocol],
        client: reqwest::Client,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.to_string(),
            accepted: accepted.to_vec(),
            client,
        }
    }

    async fn try_fetch(&self) -> Result<HashSet<ProxyDescriptor>> {
        let body = get_text(&self.client, &self.name, &self.url).await?;
        parse_geonode(&body, &self.accepted).map_err(|e| PacError::SourceFetch {
            source_name: self.name.clone(),
            message: format!("invalid response body: {}", e),
        })
    }
}

#[async_trait]
impl SourceAdapter for GeonodeSource {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(source = %self.name))]
    async fn fetch(&self) -> HashSet<ProxyDescriptor> {
        recover(&self.name, self.try_fetch().await)
    }
}

/// Parse a Geonode response body
///
/// Each listed protocol in `accepted` yields its own descriptor; records without
/// protocols are tagged with the first accepted protocol. Unusable records are
/// skipped.
pub fn parse_geonode(
    body: &str,
    accepted: &[ProxyProtocol],
) -> serde_json::Result<HashSet<ProxyDescriptor>> {
    let response: GeonodeResponse = serde_json::from_str(body)?;
    let mut proxies = HashSet::new();

    for record in response.data {
        let Some(port) = record.port.value() else {
            debug!("Skipping Geonode record {} with bad port", record.ip);
            continue;
        };

        let protocols: Vec<ProxyProtocol> = if record.protocols.is_empty() {
            accepted.first().copied().into_iter().collect()
        } else {
            record
                .protocols
                .iter()
                .filter_map(|p| ProxyProtocol::from_str(p))
                .filter(|p| accepted.contains(p))
                .collect()
        };

        for protocol in protocols {
            match ProxyDescriptor::from_parts(protocol, &record.ip, port) {
                Ok(descriptor) => {
                    proxies.insert(descriptor);
                }
                Err(e) => debug!("Skipping Geonode record {}: {}", record.ip, e),
            }
        }
    }

    Ok(proxies)
}
