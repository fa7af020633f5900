//! Merging of per-source candidate sets

use std::collections::HashSet;

use tracing::debug;

use crate::models::ProxyDescriptor;

/// Union of every source batch, keyed by normalized `(protocol, address)`
pub fn merge<I>(batches: I) -> HashSet<ProxyDescriptor>
where
    I: IntoIterator<Item = HashSet<ProxyDescriptor>>,
{
    let mut merged = HashSet::new();
    let mut received = 0usize;

    for batch in batches {
        received += batch.len();
        merged.extend(batch);
    }

    debug!(
        "Merged {} candidates into {} unique proxies",
        received,
        merged.len()
    );

    merged
}
