use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{get_text, recover, SourceAdapter};
use crate::error::{PacError, Result};
use crate::models::{ProxyDescriptor, ProxyProtocol};

/// Newline-separated `host:port` list, one proxy per line
///
/// Lines may carry a `scheme://` prefix that overrides the list's protocol.
pub struct PlainListSource {
    name: String,
    url: String,
    protocol: ProxyProtocol,
    client: reqwest::Client,
}

impl PlainListSource {
    pub fn new(
        name: impl Into<String>,
        url: &str,
        protocol: ProxyProtocol,
        client: reqwest::Client,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.to_string(),
            protocol,
            client,
        }
    }

    async fn try_fetch(&self) -> Result<HashSet<ProxyDescriptor>> {
        let body = get_text(&self.client, &self.name, &self.url).await?;
        Ok(parse_plain_list(&body, self.protocol))
    }
}

#[async_trait]
impl SourceAdapter for PlainListSource {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(source = %self.name))]
    async fn fetch(&self) -> HashSet<ProxyDescriptor> {
        recover(&self.name, self.try_fetch().await)
    }
}

/// Parse a plain list body, skipping blank lines, `#` comments and bad entries
pub fn parse_plain_list(body: &str, default_protocol: ProxyProtocol) -> HashSet<ProxyDescriptor> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match parse_line(line, default_protocol) {
            Ok(descriptor) => Some(descriptor),
            Err(e) => {
                debug!("Skipping list entry '{}': {}", line, e);
                None
            }
        })
        .collect()
}

fn parse_line(line: &str, default_protocol: ProxyProtocol) -> Result<ProxyDescriptor> {
    match line.split_once("://") {
        Some((scheme, address)) => {
            let protocol = ProxyProtocol::from_str(scheme)
                .ok_or_else(|| PacError::UnsupportedProtocol(scheme.to_string()))?;
            ProxyDescriptor::new(protocol, address)
        }
        None => ProxyDescriptor::new(default_protocol, line),
    }
}
