use std::fmt;

use chrono::{DateTime, Utc};

/// Separator between entries of a rendered fallback chain
pub const CHAIN_SEPARATOR: &str = "; ";

/// One entry of a PAC fallback chain
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChainEntry {
    Proxy {
        keyword: &'static str,
        address: String,
    },
    Direct,
}

impl ChainEntry {
    pub fn is_direct(&self) -> bool {
        matches!(self, ChainEntry::Direct)
    }
}

impl fmt::Display for ChainEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainEntry::Proxy { keyword, address } => write!(f, "{} {}", keyword, address),
            ChainEntry::Direct => write!(f, "DIRECT"),
        }
    }
}

/// Ordered proxy entries terminated by a single `DIRECT` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackChain {
    entries: Vec<ChainEntry>,
}

impl FallbackChain {
    /// Chain with only the direct fallback
    pub fn direct_only() -> Self {
        Self {
            entries: vec![ChainEntry::Direct],
        }
    }

    /// Append the direct fallback to the given proxy entries
    pub(crate) fn terminated(proxies: impl IntoIterator<Item = ChainEntry>) -> Self {
        let mut entries: Vec<ChainEntry> = proxies.into_iter().filter(|e| !e.is_direct()).collect();
        entries.push(ChainEntry::Direct);
        Self { entries }
    }

    pub fn entries(&self) -> &[ChainEntry] {
        &self.entries
    }

    /// Number of proxy entries, excluding the direct fallback
    pub fn proxy_count(&self) -> usize {
        self.entries.len() - 1
    }

    pub fn is_direct_only(&self) -> bool {
        self.proxy_count() == 0
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }

    /// Single PAC return string, e.g. `PROXY 1.2.3.4:80; DIRECT`
    pub fn render(&self) -> String {
        self.to_strings().join(CHAIN_SEPARATOR)
    }
}

/// Everything the output sink needs to render the artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacDocument {
    pub generation_timestamp: String,
    pub proxy_count: usize,
    pub chain: FallbackChain,
}

impl PacDocument {
    pub fn new(chain: FallbackChain, generated_at: DateTime<Utc>) -> Self {
        Self {
            generation_timestamp: generated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            proxy_count: chain.proxy_count(),
            chain,
        }
    }
}
