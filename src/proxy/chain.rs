//! Conversion of ranked proxies into a PAC fallback chain

use std::collections::HashSet;

use crate::models::{ChainEntry, FallbackChain, ProxyProtocol, RankedProxy};

/// PAC keyword for a proxy protocol
///
/// SOCKS4 gets the bare `SOCKS` keyword; browsers treat it as distinct from `SOCKS5`.
pub fn pac_keyword(protocol: ProxyProtocol) -> &'static str {
    match protocol {
        ProxyProtocol::Http | ProxyProtocol::Https => "PROXY",
        ProxyProtocol::Socks5 => "SOCKS5",
        ProxyProtocol::Socks4 => "SOCKS",
    }
}

/// Builds fallback chains that always end with `DIRECT`
pub struct ChainBuilder;

impl ChainBuilder {
    /// Entries that render identically (HTTP and HTTPS on one address) keep
    /// only the first, fastest occurrence.
    pub fn build(ranked: &[RankedProxy]) -> FallbackChain {
        let mut seen = HashSet::new();

        FallbackChain::terminated(
            ranked
                .iter()
                .map(|proxy| ChainEntry::Proxy {
                    keyword: pac_keyword(proxy.descriptor.protocol()),
                    address: proxy.descriptor.address().to_string(),
                })
                .filter(|entry| seen.insert(entry.clone())),
        )
    }
}
